use std::net::Shutdown;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use irisrpc_frame::{FrameConfig, FrameFormat, FrameReader, FrameWriter};
use irisrpc_transport::{connect_tcp, RpcStream, TransportError, DEFAULT_PORT_RANGE};
use irisrpc_u64json::{Object, Value};
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, COMPONENT_NAME};
use crate::error::{Result, RpcError};
use crate::handler::{FunctionInfo, HandlerRegistry};
use crate::handshake::{handshake_client, HandshakeConfig};
use crate::runtime::{dispatch_loop, receive_loop, CallContext, HandlerResult, Link};

/// How long a graceful disconnect waits for the target to close its side.
const CLOSE_LINGER: Duration = Duration::from_secs(1);

/// JSON-RPC client for an Iris target.
///
/// Outbound calls may be issued from any number of threads. Inbound calls
/// from the target are served one at a time, in arrival order, on a
/// dedicated dispatch thread, so a handler may itself make blocking calls.
///
/// Dropping the client forces a disconnect.
#[derive(Debug)]
pub struct Client {
    config: ClientConfig,
    registry: Arc<HandlerRegistry>,
    connection: Mutex<Option<Connection>>,
    /// Socket of a connect still in handshake or registration. Taken by a
    /// forced disconnect, which shuts it down to abort the connect.
    connecting: Mutex<Option<RpcStream>>,
}

#[derive(Debug)]
struct Connection {
    link: Arc<Link>,
    receive: Option<JoinHandle<()>>,
    dispatch: Option<JoinHandle<()>>,
}

impl Default for Client {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            registry: Arc::new(HandlerRegistry::new()),
            connection: Mutex::new(None),
            connecting: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Functions this client publishes, including the built-ins.
    pub fn handlers(&self) -> &HandlerRegistry {
        &self.registry
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn connecting(&self) -> MutexGuard<'_, Option<RpcStream>> {
        self.connecting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn link(&self) -> Result<Arc<Link>> {
        match self.lock().as_ref() {
            Some(conn) if conn.link.is_connected() => Ok(Arc::clone(&conn.link)),
            _ => Err(RpcError::NotConnected("client is not connected".to_string())),
        }
    }

    /// Connect over TCP using the configured connect timeout.
    ///
    /// Port 0 scans [`DEFAULT_PORT_RANGE`] and keeps the first target that
    /// completes the handshake.
    pub fn connect(&self, host: &str, port: u16) -> Result<()> {
        self.connect_timeout(host, port, self.config.connect_timeout)
    }

    pub fn connect_timeout(&self, host: &str, port: u16, timeout: Duration) -> Result<()> {
        if port != 0 {
            let stream = connect_tcp(host, port, timeout)?;
            return self.establish(stream, timeout);
        }

        for port in DEFAULT_PORT_RANGE {
            let attempt = connect_tcp(host, port, timeout)
                .map_err(RpcError::from)
                .and_then(|stream| self.establish(stream, timeout));
            match attempt {
                Ok(()) => return Ok(()),
                Err(err @ (RpcError::AlreadyConnected(_) | RpcError::Cancelled(_))) => {
                    return Err(err)
                }
                Err(err) => debug!(host, port, error = %err, "no target on port"),
            }
        }
        Err(RpcError::NotConnected(format!(
            "no Iris target found on {host} ports {}..{}",
            DEFAULT_PORT_RANGE.start, DEFAULT_PORT_RANGE.end
        )))
    }

    /// Run the handshake and start the runtime over an established stream.
    pub fn connect_stream(&self, stream: RpcStream) -> Result<()> {
        self.establish(stream, self.config.connect_timeout)
    }

    /// Neither the handshake nor the registration runs under the connection
    /// lock, so a forced disconnect can abort them.
    fn establish(&self, stream: RpcStream, timeout: Duration) -> Result<()> {
        let peer = stream.peer_label();
        {
            let mut guard = self.lock();
            if let Some(conn) = guard.as_ref() {
                if conn.link.is_connected() {
                    return Err(RpcError::AlreadyConnected(conn.link.peer.clone()));
                }
            }
            // The target went away earlier; reap the old threads first.
            if let Some(stale) = guard.take() {
                stale.shutdown(true);
            }

            let mut connecting = self.connecting();
            if connecting.is_some() {
                return Err(RpcError::AlreadyConnected(format!(
                    "{peer} (another connect is in progress)"
                )));
            }
            *connecting = Some(stream.try_clone()?);
        }

        let outcome = self.negotiate(stream, timeout);

        let mut guard = self.lock();
        let cancelled = self.connecting().take().is_none();
        match outcome {
            Ok(conn) if cancelled => {
                conn.shutdown(true);
                Err(RpcError::Cancelled(peer))
            }
            Ok(conn) => {
                info!(
                    peer = %conn.link.peer,
                    format = %conn.link.format,
                    inst_id = conn.link.instance_id(),
                    inst_name = conn.link.instance_name().unwrap_or_default(),
                    "connected"
                );
                *guard = Some(conn);
                Ok(())
            }
            Err(err) if cancelled => {
                debug!(peer = %peer, error = %err, "connect aborted");
                Err(RpcError::Cancelled(peer))
            }
            Err(err) => Err(err),
        }
    }

    /// Handshake, start the runtime threads, and register with the target.
    fn negotiate(&self, stream: RpcStream, timeout: Duration) -> Result<Connection> {
        let frame_config = FrameConfig {
            max_payload_size: self.config.max_payload_size,
        };
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        let mut read_half = stream.try_clone()?;
        let mut writer = FrameWriter::with_config(stream.try_clone()?, frame_config.clone());

        let handshake = handshake_client(
            &mut read_half,
            &mut writer,
            &HandshakeConfig {
                formats: self.config.formats.clone(),
                timeout,
                ..HandshakeConfig::default()
            },
        )?;
        debug!(format = %handshake.format, reply = %handshake.reply, "handshake complete");

        stream.set_read_timeout(Some(self.config.read_poll))?;
        stream.set_write_timeout(None)?;
        let reader = FrameReader::with_config(read_half, frame_config);
        let link = Arc::new(Link::new(
            handshake.format,
            writer,
            stream,
            Arc::clone(&self.registry),
            self.config.call_timeout,
        ));

        let conn = self.spawn_loops(link, reader)?;
        let (inst_id, inst_name) = match self.register_instance(&conn.link) {
            Ok(identity) => identity,
            Err(err) => {
                warn!(peer = %conn.link.peer, error = %err, "instance registration failed");
                conn.shutdown(true);
                return Err(err);
            }
        };

        conn.link.set_identity(inst_id, inst_name.clone());
        self.registry.set_property("instId", Value::UInt(inst_id));
        self.registry
            .set_property("instName", Value::from(inst_name.as_str()));
        self.registry
            .set_property("componentName", Value::from(COMPONENT_NAME));
        Ok(conn)
    }

    fn spawn_loops(&self, link: Arc<Link>, reader: FrameReader<RpcStream>) -> Result<Connection> {
        let name = &self.config.instance_name;
        let mut conn = Connection {
            link: Arc::clone(&link),
            receive: None,
            dispatch: None,
        };

        let receive_link = Arc::clone(&link);
        let spawned = thread::Builder::new()
            .name(format!("{name}.receive"))
            .spawn(move || receive_loop(receive_link, reader));
        match spawned {
            Ok(handle) => conn.receive = Some(handle),
            Err(err) => {
                conn.shutdown(true);
                return Err(TransportError::Io(err).into());
            }
        }

        let poll = self.config.dispatch_poll;
        let spawned = thread::Builder::new()
            .name(format!("{name}.dispatch"))
            .spawn(move || dispatch_loop(link, poll));
        match spawned {
            Ok(handle) => conn.dispatch = Some(handle),
            Err(err) => {
                conn.shutdown(true);
                return Err(TransportError::Io(err).into());
            }
        }
        Ok(conn)
    }

    /// Ask the target's instance registry for an id and a unique name.
    fn register_instance(&self, link: &Link) -> Result<(u64, String)> {
        if !self.config.register_instance {
            return Ok((0, self.config.instance_name.clone()));
        }

        let params: Object = [
            ("instName".to_string(), Value::from(self.config.instance_name.as_str())),
            ("uniquify".to_string(), Value::Bool(true)),
            ("instId".to_string(), Value::UInt(0)),
        ]
        .into_iter()
        .collect();
        let reply = link.call(
            "instanceRegistry_registerInstance",
            params,
            self.config.call_timeout,
        )?;

        let inst_id = reply
            .get("instId")
            .and_then(Value::as_u64)
            .filter(|id| *id <= u64::from(u32::MAX))
            .ok_or_else(|| {
                RpcError::Handshake(format!("instance registration returned no usable instId: {reply}"))
            })?;
        let inst_name = reply
            .get("instName")
            .and_then(Value::as_str)
            .unwrap_or(self.config.instance_name.as_str())
            .to_string();
        Ok((inst_id, inst_name))
    }

    /// Call `method` and wait up to the configured call timeout.
    pub fn call(&self, method: &str, params: Object) -> Result<Value> {
        self.call_with_timeout(method, params, self.config.call_timeout)
    }

    pub fn call_with_timeout(&self, method: &str, params: Object, timeout: Duration) -> Result<Value> {
        self.link()?.call(method, params, timeout)
    }

    /// Send a notification; no response is expected.
    pub fn notify(&self, method: &str, params: Object) -> Result<()> {
        self.link()?.notify(method, params)
    }

    /// Publish a function the target may call.
    pub fn register_handler<F>(&self, name: &str, info: FunctionInfo, handler: F) -> Result<()>
    where
        F: Fn(&CallContext<'_>, Object) -> HandlerResult + Send + Sync + 'static,
    {
        self.registry.register(name, info, handler)
    }

    /// Publish under `name` or the first free `name_N`; returns the name used.
    pub fn register_unique<F>(&self, name: &str, info: FunctionInfo, handler: F) -> Result<String>
    where
        F: Fn(&CallContext<'_>, Object) -> HandlerResult + Send + Sync + 'static,
    {
        self.registry.register_unique(name, info, handler)
    }

    /// Publish an event callback with the standard callback arguments
    /// (`esId`, `fields`, `time`, `sInstId`, optional `syncEc`).
    pub fn register_event_callback<F>(&self, name: &str, description: &str, handler: F) -> Result<()>
    where
        F: Fn(&CallContext<'_>, Object) -> HandlerResult + Send + Sync + 'static,
    {
        self.registry.register_event_callback(name, description, handler)
    }

    pub fn unregister_handler(&self, name: &str) -> bool {
        self.registry.unregister(name)
    }

    /// Serve the file at `path` to the target through `image_loadDataRead`.
    /// The returned tag identifies it in the target's `image_loadDataPull`.
    pub fn open_image(&self, path: impl AsRef<Path>) -> Result<u64> {
        self.registry.open_image(path)
    }

    /// Close the connection.
    ///
    /// A graceful disconnect serves every inbound call already received,
    /// then closes the write half and waits briefly for the target to close.
    /// A forced disconnect drops queued calls and closes both directions at
    /// once. Either way every waiting caller fails with `NotConnected`.
    /// Disconnecting an unconnected client does nothing. A forced
    /// disconnect also aborts a connect in progress, which then fails with
    /// [`RpcError::Cancelled`].
    pub fn disconnect(&self, force: bool) {
        if force {
            if let Some(stream) = self.connecting().take() {
                debug!(peer = %stream.peer_label(), "aborting connect in progress");
                if let Err(err) = stream.shutdown(Shutdown::Both) {
                    debug!(error = %err, "socket shutdown failed");
                }
            }
        }
        let conn = self.lock().take();
        if let Some(conn) = conn {
            conn.shutdown(force);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|conn| conn.link.is_connected())
    }

    /// Instance id assigned at registration.
    pub fn instance_id(&self) -> Option<u64> {
        self.lock().as_ref().map(|conn| conn.link.instance_id())
    }

    /// Instance name assigned at registration.
    pub fn instance_name(&self) -> Option<String> {
        self.lock()
            .as_ref()
            .and_then(|conn| conn.link.instance_name().map(str::to_string))
    }

    /// Message format negotiated in the handshake.
    pub fn format(&self) -> Option<FrameFormat> {
        self.lock().as_ref().map(|conn| conn.link.format)
    }

    pub fn peer(&self) -> Option<String> {
        self.lock().as_ref().map(|conn| conn.link.peer.clone())
    }

    /// Number of times the receive loop skipped unparseable bytes.
    pub fn resync_events(&self) -> u64 {
        self.lock()
            .as_ref()
            .map_or(0, |conn| conn.link.resync_events())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        let conn = self
            .connection
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(conn) = conn {
            conn.shutdown(true);
        }
    }
}

impl Connection {
    fn shutdown(mut self, force: bool) {
        let link = &self.link;
        let current = thread::current().id();
        let on_dispatch = self
            .dispatch
            .as_ref()
            .is_some_and(|handle| handle.thread().id() == current);

        if force {
            let dropped = link.inbound.clear();
            link.stop();
            link.close();
            info!(peer = %link.peer, dropped, "disconnected (forced)");
        } else {
            if !on_dispatch {
                link.inbound.wait_idle(None);
            }
            link.stop();
            link.half_close(CLOSE_LINGER);
            info!(peer = %link.peer, "disconnecting");
        }

        for (role, handle) in [("receive", self.receive.take()), ("dispatch", self.dispatch.take())] {
            let Some(handle) = handle else { continue };
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!(peer = %link.peer, role, "runtime thread panicked");
            }
        }
        if !force {
            link.close();
        }
    }
}
