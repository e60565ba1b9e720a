//! Per-connection runtime: the receive loop, the dispatch loop, and the
//! shared state both of them and every calling thread work on.

use std::any::Any;
use std::fmt;
use std::io::ErrorKind;
use std::net::Shutdown;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::{Duration, Instant};

use irisrpc_frame::{decode_message, Frame, FrameError, FrameFormat, FrameReader, FrameWriter};
use irisrpc_transport::RpcStream;
use irisrpc_u64json::{
    json, Message, Notification, Object, Request, Response, ResponsePayload, Value,
};
use tracing::{debug, info, trace, warn};

use crate::codes;
use crate::error::{RemoteError, Result, RpcError};
use crate::handler::{HandlerRegistry, Lookup};
use crate::pending::PendingCalls;
use crate::queue::InboundQueue;

/// What a handler returns: a result value or an error response.
pub type HandlerResult = std::result::Result<Value, RemoteError>;

/// Work handed from the receive loop to the dispatch loop.
#[derive(Debug)]
pub(crate) enum Inbound {
    Request(Request),
    Notification(Notification),
    /// A request that could not be decoded but whose id is known.
    Malformed { id: u64, reason: String },
}

/// State shared by the receive loop, the dispatch loop and callers.
pub(crate) struct Link {
    pub(crate) format: FrameFormat,
    pub(crate) peer: String,
    writer: Mutex<FrameWriter<RpcStream>>,
    /// Clone of the socket kept for shutdown.
    stream: RpcStream,
    pub(crate) pending: PendingCalls,
    pub(crate) inbound: InboundQueue<Inbound>,
    registry: Arc<HandlerRegistry>,
    inst_id: AtomicU64,
    inst_name: OnceLock<String>,
    next_seq: AtomicU64,
    call_timeout: Duration,
    running: AtomicBool,
    /// Once set, the receive loop gives up waiting for the peer's EOF at
    /// this instant.
    closing: Mutex<Option<Instant>>,
    resync_events: AtomicU64,
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("peer", &self.peer)
            .field("format", &self.format)
            .field("inst_id", &self.instance_id())
            .field("running", &self.is_running())
            .finish()
    }
}

impl Link {
    pub(crate) fn new(
        format: FrameFormat,
        writer: FrameWriter<RpcStream>,
        stream: RpcStream,
        registry: Arc<HandlerRegistry>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            format,
            peer: stream.peer_label(),
            writer: Mutex::new(writer),
            stream,
            pending: PendingCalls::new(),
            inbound: InboundQueue::new(),
            registry,
            inst_id: AtomicU64::new(0),
            inst_name: OnceLock::new(),
            next_seq: AtomicU64::new(0),
            call_timeout,
            running: AtomicBool::new(true),
            closing: Mutex::new(None),
            resync_events: AtomicU64::new(0),
        }
    }

    pub(crate) fn instance_id(&self) -> u64 {
        self.inst_id.load(Ordering::Acquire)
    }

    pub(crate) fn instance_name(&self) -> Option<&str> {
        self.inst_name.get().map(String::as_str)
    }

    pub(crate) fn set_identity(&self, inst_id: u64, inst_name: String) {
        self.inst_id.store(inst_id, Ordering::Release);
        let _ = self.inst_name.set(inst_name);
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.pending.is_connected()
    }

    pub(crate) fn resync_events(&self) -> u64 {
        self.resync_events.load(Ordering::Relaxed)
    }

    /// Request id: instance id in the high 32 bits, sequence in the low 32.
    fn next_id(&self) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed) & 0xffff_ffff;
        (self.instance_id() << 32) | seq
    }

    fn writer(&self) -> MutexGuard<'_, FrameWriter<RpcStream>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serialize one message onto the socket. One writer at a time.
    fn send(&self, message: &Message) -> Result<()> {
        self.writer()
            .send_message(self.format, message)
            .map_err(|err| match err {
                FrameError::ConnectionClosed => {
                    RpcError::NotConnected(format!("{} closed the connection", self.peer))
                }
                other => RpcError::Protocol(other),
            })
    }

    /// Send a request and block until its response, the deadline, or the
    /// end of the connection. Requests without `instId` go to instance 0.
    pub(crate) fn call(&self, method: &str, mut params: Object, timeout: Duration) -> Result<Value> {
        if !self.is_connected() {
            return Err(RpcError::NotConnected(format!(
                "cannot call {method}: connection to {} is closed",
                self.peer
            )));
        }
        params
            .entry("instId".to_string())
            .or_insert(Value::UInt(0));

        let id = self.next_id();
        self.pending.register(id)?;
        debug!(id = format_args!("{id:#x}"), method, "call");

        let request = Message::Request(Request {
            id,
            method: method.to_string(),
            params,
        });
        if let Err(err) = self.send(&request) {
            self.pending.cancel(id);
            return Err(err);
        }

        let response = self.pending.wait(id, timeout)?;
        match response.payload {
            ResponsePayload::Result(value) => {
                trace!(id = format_args!("{id:#x}"), result = %value, "response");
                Ok(value)
            }
            ResponsePayload::Error(err) => {
                debug!(id = format_args!("{id:#x}"), code = err.code, message = %err.message, "error response");
                Err(RpcError::Remote(err.into()))
            }
        }
    }

    /// Send a notification. Nothing waits for an answer.
    pub(crate) fn notify(&self, method: &str, mut params: Object) -> Result<()> {
        if !self.is_connected() {
            return Err(RpcError::NotConnected(format!(
                "cannot notify {method}: connection to {} is closed",
                self.peer
            )));
        }
        params
            .entry("instId".to_string())
            .or_insert(Value::UInt(0));
        debug!(method, "notify");
        self.send(&Message::Notification(Notification {
            method: method.to_string(),
            params,
        }))
    }

    fn handle_frame(&self, frame: Frame) {
        match decode_message(&frame) {
            Ok(Message::Response(response)) => {
                trace!(id = format_args!("{:#x}", response.id), "received response");
                self.pending.complete(response);
            }
            Ok(Message::Request(request)) => {
                trace!(id = format_args!("{:#x}", request.id), method = %request.method, "received request");
                self.inbound.push(Inbound::Request(request));
            }
            Ok(Message::Notification(notification)) => {
                trace!(method = %notification.method, "received notification");
                self.inbound.push(Inbound::Notification(notification));
            }
            Err(err) => match salvage_request_id(&frame) {
                Some(id) => {
                    warn!(id = format_args!("{id:#x}"), error = %err, "malformed request");
                    self.inbound.push(Inbound::Malformed {
                        id,
                        reason: err.to_string(),
                    });
                }
                None => warn!(error = %err, format = %frame.format, "dropping undecodable message"),
            },
        }
    }

    fn process(&self, item: Inbound) {
        match item {
            Inbound::Request(request) => {
                let outcome = self.invoke(&request.method, Some(request.id), request.params);
                self.reply(request.id, outcome);
            }
            Inbound::Notification(notification) => {
                if let Err(err) = self.invoke(&notification.method, None, notification.params) {
                    debug!(method = %notification.method, error = %err, "notification handler failed");
                }
            }
            Inbound::Malformed { id, reason } => {
                self.reply(
                    id,
                    Err(RemoteError::new(codes::E_MALFORMATTED_REQUEST, reason)),
                );
            }
        }
    }

    fn invoke(&self, method: &str, request_id: Option<u64>, mut params: Object) -> HandlerResult {
        params.shift_remove("instId");
        match self.registry.lookup(method) {
            Lookup::Builtin(builtin) => self.registry.call_builtin(builtin, &params),
            Lookup::Handler(handler) => {
                let ctx = CallContext {
                    link: self,
                    method,
                    request_id,
                };
                match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&ctx, params))) {
                    Ok(outcome) => outcome,
                    Err(payload) => {
                        let reason = panic_message(payload.as_ref());
                        warn!(method, %reason, "handler panicked");
                        Err(RemoteError::new(
                            codes::E_INTERNAL_ERROR,
                            format!("handler for {method} panicked: {reason}"),
                        ))
                    }
                }
            }
            Lookup::Missing => Err(RemoteError::new(
                codes::E_FUNCTION_NOT_SUPPORTED_BY_INSTANCE,
                format!(
                    "function {method} is not supported by instance {}",
                    self.instance_id()
                ),
            )),
        }
    }

    fn reply(&self, id: u64, outcome: HandlerResult) {
        let response = match outcome {
            Ok(value) => Response::result(id, value),
            Err(mut err) => {
                // Code 0 marks a result on the wire; the caller would never match it.
                if err.code == 0 {
                    err.code = codes::E_INTERNAL_ERROR;
                }
                Response::error(id, err.into())
            }
        };
        if let Err(err) = self.send(&Message::Response(response)) {
            warn!(id = format_args!("{id:#x}"), error = %err, "failed to send response");
        }
    }

    /// Stop accepting work and fail every waiting caller.
    pub(crate) fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.pending.disconnect();
        self.inbound.wake();
    }

    /// Close the write half and let the receive loop wait up to `linger`
    /// for the peer to finish. A linger too large for `Instant` waits for
    /// the peer indefinitely.
    pub(crate) fn half_close(&self, linger: Duration) {
        *self.closing.lock().unwrap_or_else(PoisonError::into_inner) =
            Instant::now().checked_add(linger);
        if let Err(err) = self.stream.shutdown(Shutdown::Write) {
            debug!(peer = %self.peer, error = %err, "shutdown of write half failed");
        }
    }

    /// Close both directions now.
    pub(crate) fn close(&self) {
        *self.closing.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
        if let Err(err) = self.stream.shutdown(Shutdown::Both) {
            debug!(peer = %self.peer, error = %err, "socket shutdown failed");
        }
    }

    fn linger_expired(&self) -> bool {
        self.closing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// Handle given to a handler for the duration of one inbound call.
///
/// Calls made through it are ordinary outbound calls; their responses are
/// read by the receive loop while the handler blocks.
pub struct CallContext<'a> {
    link: &'a Link,
    method: &'a str,
    request_id: Option<u64>,
}

impl fmt::Debug for CallContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("method", &self.method)
            .field("request_id", &self.request_id)
            .finish()
    }
}

impl CallContext<'_> {
    /// Name of the function being served.
    pub fn method(&self) -> &str {
        self.method
    }

    /// Id of the inbound request; `None` for a notification.
    pub fn request_id(&self) -> Option<u64> {
        self.request_id
    }

    pub fn is_notification(&self) -> bool {
        self.request_id.is_none()
    }

    /// Instance id assigned to this client.
    pub fn instance_id(&self) -> u64 {
        self.link.instance_id()
    }

    /// Nested outbound call using `timeout`.
    pub fn call_with_timeout(&self, method: &str, params: Object, timeout: Duration) -> Result<Value> {
        self.link.call(method, params, timeout)
    }

    /// Nested outbound call with the client's default timeout.
    pub fn call(&self, method: &str, params: Object) -> Result<Value> {
        self.link.call(method, params, self.link.call_timeout)
    }

    pub fn notify(&self, method: &str, params: Object) -> Result<()> {
        self.link.notify(method, params)
    }
}

/// Read frames until the peer closes, the socket fails, or the linger
/// deadline of a disconnect passes. Fails every waiter on exit.
pub(crate) fn receive_loop(link: Arc<Link>, mut reader: FrameReader<RpcStream>) {
    loop {
        match reader.read_frame() {
            Ok(frame) => {
                link.resync_events
                    .store(reader.resync_events(), Ordering::Relaxed);
                link.handle_frame(frame);
            }
            Err(FrameError::Io(err))
                if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                if link.linger_expired() {
                    debug!(peer = %link.peer, "gave up waiting for peer to close");
                    break;
                }
            }
            Err(FrameError::ConnectionClosed) => {
                if link.is_running() {
                    info!(peer = %link.peer, "target closed the connection");
                }
                break;
            }
            Err(err) => {
                if link.is_running() {
                    warn!(peer = %link.peer, error = %err, "receive failed, closing connection");
                }
                break;
            }
        }
    }

    link.resync_events
        .store(reader.resync_events(), Ordering::Relaxed);
    link.stop();
    debug!(
        peer = %link.peer,
        resync_events = reader.resync_events(),
        skipped_bytes = reader.skipped_bytes(),
        "receive loop stopped"
    );
}

/// Serve queued inbound calls in arrival order until stopped and drained.
pub(crate) fn dispatch_loop(link: Arc<Link>, poll: Duration) {
    loop {
        match link.inbound.pop_timeout(poll) {
            Some(item) => {
                link.process(item);
                link.inbound.task_done();
            }
            None if !link.is_running() => break,
            None => {}
        }
    }
    debug!(peer = %link.peer, "dispatch loop stopped");
}

/// Id of a request whose payload is not a valid message, if it has one.
fn salvage_request_id(frame: &Frame) -> Option<u64> {
    let value = match frame.format {
        FrameFormat::U64Json => irisrpc_u64json::from_slice(&frame.payload).ok(),
        FrameFormat::Json => std::str::from_utf8(&frame.payload)
            .ok()
            .and_then(|text| json::from_str(text).ok()),
    };
    if let Some(value) = value {
        return match (value.get("method"), value.get("id")) {
            (Some(_), Some(id)) => id.as_u64(),
            _ => None,
        };
    }

    // Envelope whose body is corrupt: the id still sits in word 1.
    if frame.format == FrameFormat::U64Json && frame.payload.len() >= 16 {
        let word = |i: usize| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&frame.payload[i * 8..i * 8 + 8]);
            u64::from_le_bytes(bytes)
        };
        if word(0) >> 56 == 0xe0 {
            return Some(word(1));
        }
    }
    None
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
