use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use irisrpc_client::{
    codes, handshake_server, CallContext, Client, ClientConfig, FunctionInfo, HandlerResult,
    HandshakeConfig, RemoteError, RpcError,
};
use irisrpc_frame::{FrameError, FrameFormat, FrameReader, FrameWriter};
use irisrpc_transport::RpcStream;
use irisrpc_u64json::{
    ErrorObject, Message, Notification, Object, Request, Response, ResponsePayload, Value,
};

const INST_ID: u64 = 5;
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

fn params(pairs: &[(&str, Value)]) -> Object {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn test_config() -> ClientConfig {
    ClientConfig {
        instance_name: "client.test".to_string(),
        call_timeout: TEST_TIMEOUT,
        connect_timeout: TEST_TIMEOUT,
        dispatch_poll: Duration::from_millis(20),
        read_poll: Duration::from_millis(20),
        ..ClientConfig::default()
    }
}

/// The target end of a connection, driven step by step by a test.
struct Target {
    reader: FrameReader<RpcStream>,
    writer: FrameWriter<RpcStream>,
    format: FrameFormat,
}

impl Target {
    /// Answer the handshake and, if asked, the instance registration.
    fn accept(stream: RpcStream, formats: Vec<FrameFormat>, register: bool) -> Target {
        stream
            .set_read_timeout(Some(TEST_TIMEOUT))
            .expect("read timeout");
        let mut read_half = stream.try_clone().expect("clone");
        let mut writer = FrameWriter::new(stream);
        let cfg = HandshakeConfig {
            formats,
            timeout: TEST_TIMEOUT,
            ..HandshakeConfig::default()
        };
        let format = handshake_server(&mut read_half, &mut writer, &cfg).expect("handshake");
        let mut target = Target {
            reader: FrameReader::new(read_half),
            writer,
            format,
        };

        if register {
            let request = target.recv_request();
            assert_eq!(request.id, 0);
            assert_eq!(request.method, "instanceRegistry_registerInstance");
            assert_eq!(request.params.get("instName"), Some(&Value::from("client.test")));
            assert_eq!(request.params.get("uniquify"), Some(&Value::Bool(true)));
            let reply: Value = [
                ("instId", Value::UInt(INST_ID)),
                ("instName", Value::from("client.test_0")),
            ]
            .into_iter()
            .collect();
            target.respond(request.id, reply);
        }
        target
    }

    fn recv(&mut self) -> Message {
        let frame = self.reader.read_frame().expect("frame from client");
        irisrpc_frame::decode_message(&frame).expect("message from client")
    }

    fn recv_request(&mut self) -> Request {
        match self.recv() {
            Message::Request(request) => request,
            other => panic!("expected request, got {other:?}"),
        }
    }

    fn recv_response(&mut self) -> Response {
        match self.recv() {
            Message::Response(response) => response,
            other => panic!("expected response, got {other:?}"),
        }
    }

    fn send(&mut self, message: impl Into<Message>) {
        self.writer
            .send_message(self.format, &message.into())
            .expect("send to client");
    }

    fn respond(&mut self, id: u64, result: Value) {
        self.send(Response::result(id, result));
    }

    fn request(&mut self, id: u64, method: &str, params: Object) {
        self.send(Request {
            id,
            method: method.to_string(),
            params,
        });
    }
}

/// Listen on an ephemeral port and accept a single client in the background.
fn spawn_target(formats: Vec<FrameFormat>) -> (u16, JoinHandle<Target>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept");
        Target::accept(RpcStream::from(stream), formats, true)
    });
    (port, handle)
}

fn connected(formats: Vec<FrameFormat>) -> (Arc<Client>, Target) {
    let (port, target) = spawn_target(formats);
    let client = Client::new(test_config());
    client.connect("127.0.0.1", port).expect("connect");
    (Arc::new(client), target.join().expect("target thread"))
}

#[test]
fn connect_registers_instance() {
    let (client, mut target) = connected(FrameFormat::ALL.to_vec());

    assert!(client.is_connected());
    assert_eq!(client.instance_id(), Some(INST_ID));
    assert_eq!(client.instance_name().as_deref(), Some("client.test_0"));
    assert_eq!(client.format(), Some(FrameFormat::U64Json));

    target.request(1, "instance_getProperties", params(&[("instId", Value::UInt(INST_ID))]));
    let response = target.recv_response();
    assert_eq!(response.id, 1);
    let ResponsePayload::Result(props) = response.payload else {
        panic!("expected result");
    };
    assert_eq!(props.get("instId"), Some(&Value::UInt(INST_ID)));
    assert_eq!(props.get("instName"), Some(&Value::from("client.test_0")));
    assert_eq!(props.get("componentName"), Some(&Value::from("irisrpc.Client")));
}

#[test]
fn concurrent_calls_complete_out_of_order() {
    let (client, mut target) = connected(FrameFormat::ALL.to_vec());

    let callers: Vec<_> = (0..8u64)
        .map(|n| {
            let client = Arc::clone(&client);
            thread::spawn(move || {
                let result = client
                    .call("resource_read", params(&[("n", Value::UInt(n))]))
                    .expect("call result");
                assert_eq!(result, Value::UInt(n * 10));
            })
        })
        .collect();

    let mut requests: Vec<Request> = (0..8).map(|_| target.recv_request()).collect();
    for request in &requests {
        assert_eq!(request.id >> 32, INST_ID);
        assert_eq!(request.params.get("instId"), Some(&Value::UInt(0)));
    }
    let mut ids: Vec<u64> = requests.iter().map(|r| r.id).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 8);

    requests.reverse();
    for request in requests {
        let n = request.params.get("n").and_then(Value::as_u64).expect("n");
        target.respond(request.id, Value::UInt(n * 10));
    }
    for caller in callers {
        caller.join().expect("caller thread");
    }
}

#[test]
fn notifications_get_no_response() {
    let (client, mut target) = connected(FrameFormat::ALL.to_vec());

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    client
        .register_handler(
            "ec_event",
            FunctionInfo::new("Event callback."),
            move |ctx: &CallContext<'_>, _params: Object| {
                assert!(ctx.is_notification());
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            },
        )
        .expect("register");

    target.send(Notification {
        method: "ec_event".to_string(),
        params: params(&[("instId", Value::UInt(INST_ID))]),
    });
    target.request(
        2,
        "instance_ping",
        params(&[("payload", Value::from("after notification"))]),
    );

    // The first message back is the ping response: the notification got none.
    let response = target.recv_response();
    assert_eq!(response.id, 2);
    assert_eq!(
        response.payload,
        ResponsePayload::Result(Value::from("after notification"))
    );
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    client
        .notify("simulation_step", params(&[("steps", Value::UInt(1))]))
        .expect("notify");
    match target.recv() {
        Message::Notification(notification) => {
            assert_eq!(notification.method, "simulation_step");
        }
        other => panic!("expected notification, got {other:?}"),
    }
}

#[test]
fn handler_can_make_nested_calls() {
    let (client, mut target) = connected(FrameFormat::ALL.to_vec());

    client
        .register_handler(
            "ec_step",
            FunctionInfo::new("Step callback.").returns("NumberU64", "Value read plus one."),
            |ctx: &CallContext<'_>, _params: Object| {
                let value = ctx.call("resource_read", Object::new())?;
                let value = value.as_u64().ok_or_else(|| {
                    RemoteError::new(codes::E_INTERNAL_ERROR, "resource_read returned no number")
                })?;
                Ok(Value::UInt(value + 1))
            },
        )
        .expect("register");

    target.request(100, "ec_step", params(&[("instId", Value::UInt(INST_ID))]));

    let nested = target.recv_request();
    assert_eq!(nested.method, "resource_read");
    target.respond(nested.id, Value::UInt(41));

    let response = target.recv_response();
    assert_eq!(response.id, 100);
    assert_eq!(response.payload, ResponsePayload::Result(Value::UInt(42)));
}

#[test]
fn forced_disconnect_fails_pending_calls() {
    let (client, mut target) = connected(FrameFormat::ALL.to_vec());

    let caller = {
        let client = Arc::clone(&client);
        thread::spawn(move || {
            client.call_with_timeout("simulation_run", Object::new(), Duration::from_secs(30))
        })
    };

    // The target sees the call but never answers it.
    let request = target.recv_request();
    assert_eq!(request.method, "simulation_run");

    client.disconnect(true);
    let err = caller.join().expect("caller thread").unwrap_err();
    assert!(matches!(err, RpcError::NotConnected(_)), "{err}");
    assert!(!client.is_connected());

    let err = client.call("instance_ping", Object::new()).unwrap_err();
    assert!(matches!(err, RpcError::NotConnected(_)));
}

#[test]
fn call_times_out_and_late_response_is_dropped() {
    let (client, mut target) = connected(FrameFormat::ALL.to_vec());

    let err = client
        .call_with_timeout("simulation_run", Object::new(), Duration::from_millis(50))
        .unwrap_err();
    let RpcError::Timeout { id, .. } = err else {
        panic!("expected timeout, got {err}");
    };
    assert_eq!(id >> 32, INST_ID);

    let late = target.recv_request();
    assert_eq!(late.id, id);
    target.respond(late.id, Value::Null);

    let caller = {
        let client = Arc::clone(&client);
        thread::spawn(move || client.call("simulation_getTime", Object::new()))
    };
    let request = target.recv_request();
    target.respond(request.id, Value::UInt(1000));
    assert_eq!(caller.join().expect("caller").expect("time"), Value::UInt(1000));
}

#[test]
fn remote_errors_are_surfaced() {
    let (client, mut target) = connected(FrameFormat::ALL.to_vec());

    let caller = {
        let client = Arc::clone(&client);
        thread::spawn(move || client.call("memory_read", Object::new()))
    };
    let request = target.recv_request();
    target.send(Response::error(
        request.id,
        ErrorObject::new(0x42, "address out of range").with_data(Value::UInt(0x1000)),
    ));

    let err = caller.join().expect("caller").unwrap_err();
    let RpcError::Remote(remote) = err else {
        panic!("expected remote error, got {err}");
    };
    assert_eq!(remote.code, 0x42);
    assert_eq!(remote.message, "address out of range");
    assert_eq!(remote.data, Some(Value::UInt(0x1000)));
}

#[test]
fn handler_failures_become_error_responses() {
    let (client, mut target) = connected(FrameFormat::ALL.to_vec());

    client
        .register_handler(
            "ec_panic",
            FunctionInfo::new("Always panics."),
            |_ctx: &CallContext<'_>, _params: Object| -> HandlerResult { panic!("callback bug") },
        )
        .expect("register");

    target.request(7, "ec_panic", Object::new());
    let response = target.recv_response();
    let ResponsePayload::Error(err) = response.payload else {
        panic!("expected error response");
    };
    assert_eq!(err.code, codes::E_INTERNAL_ERROR);
    assert!(err.message.contains("callback bug"));

    target.request(8, "no_such_function", Object::new());
    let response = target.recv_response();
    assert_eq!(response.id, 8);
    let ResponsePayload::Error(err) = response.payload else {
        panic!("expected error response");
    };
    assert_eq!(err.code, codes::E_FUNCTION_NOT_SUPPORTED_BY_INSTANCE);

    // The dispatch loop survived both.
    target.request(9, "instance_ping", params(&[("payload", Value::UInt(3))]));
    assert_eq!(
        target.recv_response().payload,
        ResponsePayload::Result(Value::UInt(3))
    );
}

#[test]
fn malformed_request_gets_error_response() {
    let (_client, mut target) = connected(FrameFormat::ALL.to_vec());

    let broken: Value = [
        ("jsonrpc", Value::from("2.0")),
        ("id", Value::UInt(0x42)),
        ("method", Value::from("ec_event")),
        ("params", Value::from("not an object")),
    ]
    .into_iter()
    .collect();
    let payload = irisrpc_u64json::to_vec(&broken).expect("encode");
    target
        .writer
        .send(FrameFormat::U64Json, &payload)
        .expect("send");

    let response = target.recv_response();
    assert_eq!(response.id, 0x42);
    let ResponsePayload::Error(err) = response.payload else {
        panic!("expected error response");
    };
    assert_eq!(err.code, codes::E_MALFORMATTED_REQUEST);
}

#[test]
fn garbage_on_the_wire_is_skipped() {
    let (client, mut target) = connected(FrameFormat::ALL.to_vec());

    target
        .writer
        .send_raw(b"\x00\x01garbage IrisU64 noise")
        .expect("send garbage");
    target.request(11, "instance_ping", params(&[("payload", Value::from("ok"))]));

    let response = target.recv_response();
    assert_eq!(response.id, 11);
    assert_eq!(response.payload, ResponsePayload::Result(Value::from("ok")));
    assert!(client.resync_events() >= 1);
    assert!(client.is_connected());
}

#[test]
fn json_format_is_negotiated_and_used() {
    let (client, mut target) = connected(vec![FrameFormat::Json]);
    assert_eq!(client.format(), Some(FrameFormat::Json));
    assert_eq!(target.format, FrameFormat::Json);

    let caller = {
        let client = Arc::clone(&client);
        thread::spawn(move || {
            client.call(
                "instance_getFunctionInfo",
                params(&[("instId", Value::UInt(3)), ("prefix", Value::from("pc_"))]),
            )
        })
    };
    let request = target.recv_request();
    assert_eq!(request.params.get("prefix"), Some(&Value::from("pc_")));
    target.respond(
        request.id,
        [("pc_read", Value::from("reads the PC"))].into_iter().collect(),
    );
    let info = caller.join().expect("caller").expect("info");
    assert_eq!(info.get("pc_read"), Some(&Value::from("reads the PC")));
}

#[test]
fn incompatible_target_is_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    let target = thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept");
        let stream = RpcStream::from(stream);
        let mut read_half = stream.try_clone().expect("clone");
        let mut writer = FrameWriter::new(stream);
        let cfg = HandshakeConfig {
            formats: vec![FrameFormat::Json],
            ..HandshakeConfig::default()
        };
        handshake_server(&mut read_half, &mut writer, &cfg).is_err()
    });

    let client = Client::new(test_config().with_format(FrameFormat::U64Json));
    let err = client.connect("127.0.0.1", port).unwrap_err();
    assert!(matches!(err, RpcError::Handshake(_)), "{err}");
    assert_eq!(err.code(), codes::E_NOT_COMPATIBLE);
    assert!(!client.is_connected());
    assert!(target.join().expect("target"));
}

#[test]
fn connect_stream_over_socket_pair() {
    let (local, remote) = irisrpc_transport::pair().expect("pair");
    let target = thread::spawn(move || Target::accept(remote, FrameFormat::ALL.to_vec(), false));

    let client = Client::new(ClientConfig {
        register_instance: false,
        ..test_config()
    });
    client.connect_stream(local).expect("connect stream");
    let mut target = target.join().expect("target");

    assert_eq!(client.instance_id(), Some(0));
    assert_eq!(client.instance_name().as_deref(), Some("client.test"));

    let (local2, _remote2) = irisrpc_transport::pair().expect("pair");
    let err = client.connect_stream(local2).unwrap_err();
    assert!(matches!(err, RpcError::AlreadyConnected(_)));

    let client = Arc::new(client);
    let caller = {
        let client = Arc::clone(&client);
        thread::spawn(move || client.call("instance_ping", params(&[("payload", Value::UInt(9))])))
    };
    let request = target.recv_request();
    assert_eq!(request.id, 0);
    target.respond(request.id, Value::UInt(9));
    assert_eq!(caller.join().expect("caller").expect("ping"), Value::UInt(9));
}

#[test]
fn graceful_disconnect_serves_queued_requests() {
    let (client, mut target) = connected(FrameFormat::ALL.to_vec());

    let served = Arc::new(Mutex::new(Vec::new()));
    let (started_tx, started_rx) = mpsc::channel();
    let started_tx = Mutex::new(started_tx);
    let log = Arc::clone(&served);
    client
        .register_handler(
            "ec_slow",
            FunctionInfo::new("Slow callback."),
            move |ctx: &CallContext<'_>, _params: Object| {
                let _ = started_tx.lock().expect("sender").send(());
                thread::sleep(Duration::from_millis(100));
                log.lock().expect("log").push(ctx.request_id());
                Ok(Value::Null)
            },
        )
        .expect("register");

    target.request(21, "ec_slow", Object::new());
    target.request(22, "ec_slow", Object::new());
    started_rx.recv_timeout(TEST_TIMEOUT).expect("first call started");
    thread::sleep(Duration::from_millis(20));

    let closer = {
        let client = Arc::clone(&client);
        thread::spawn(move || client.disconnect(false))
    };

    assert_eq!(target.recv_response().id, 21);
    assert_eq!(target.recv_response().id, 22);
    assert!(matches!(
        target.reader.read_frame(),
        Err(FrameError::ConnectionClosed)
    ));
    drop(target);

    closer.join().expect("closer");
    assert_eq!(*served.lock().expect("log"), vec![Some(21), Some(22)]);
    assert!(!client.is_connected());
}

#[test]
fn port_scan_without_target_fails() {
    let client = Client::new(ClientConfig {
        connect_timeout: Duration::from_millis(50),
        ..test_config()
    });
    let err = client.connect("127.0.0.1", 0).unwrap_err();
    assert!(matches!(err, RpcError::NotConnected(_)), "{err}");
    assert_eq!(err.code(), codes::E_NOT_CONNECTED);
}

#[test]
fn function_info_is_published() {
    let (client, mut target) = connected(FrameFormat::ALL.to_vec());

    let name = client
        .register_unique(
            "ec_cb",
            FunctionInfo::new("Callback.").arg("time", "NumberU64", "Time."),
            |_ctx: &CallContext<'_>, _params: Object| Ok(Value::Null),
        )
        .expect("register");
    assert_eq!(name, "ec_cb");

    target.request(31, "instance_getFunctionInfo", params(&[("prefix", Value::from("ec_"))]));
    let ResponsePayload::Result(info) = target.recv_response().payload else {
        panic!("expected result");
    };
    assert_eq!(info.len(), Some(1));
    assert!(info.get("ec_cb").and_then(|f| f.get("args")).and_then(|a| a.get("time")).is_some());

    let query: Value = vec![Value::from("ec_cb"), Value::from("instance_ping")].into();
    target.request(32, "instance_checkFunctionSupport", params(&[("functions", query)]));
    assert_eq!(
        target.recv_response().payload,
        ResponsePayload::Result(Value::Bool(true))
    );
}

#[test]
fn forced_disconnect_aborts_connect_in_progress() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    let (seen_tx, seen_rx) = mpsc::channel();
    let target = thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept");
        let mut target = Target::accept(RpcStream::from(stream), FrameFormat::ALL.to_vec(), false);
        let request = target.recv_request();
        seen_tx.send(request.method).expect("report registration");
        // Registration is never answered.
        target.reader.read_frame().map(|_| ())
    });

    let client = Arc::new(Client::new(ClientConfig {
        call_timeout: Duration::from_secs(60),
        ..test_config()
    }));
    let connector = {
        let client = Arc::clone(&client);
        thread::spawn(move || client.connect("127.0.0.1", port))
    };
    let method = seen_rx.recv_timeout(TEST_TIMEOUT).expect("registration request");
    assert_eq!(method, "instanceRegistry_registerInstance");

    let started = Instant::now();
    client.disconnect(true);
    let err = connector.join().expect("connector thread").unwrap_err();
    assert!(started.elapsed() < TEST_TIMEOUT);
    assert!(matches!(err, RpcError::Cancelled(_)), "{err}");
    assert_eq!(err.code(), codes::E_NOT_CONNECTED);
    assert!(!client.is_connected());
    assert!(matches!(
        target.join().expect("target thread"),
        Err(FrameError::ConnectionClosed)
    ));
}

#[test]
fn image_is_served_to_the_target() {
    let (client, mut target) = connected(FrameFormat::ALL.to_vec());
    let path = std::env::temp_dir().join(format!("irisrpc-served-{}.bin", std::process::id()));
    std::fs::write(&path, [1, 2, 3, 4, 5, 6, 7, 8, 9]).expect("write image");
    let tag = client.open_image(&path).expect("open image");

    let read = |end: bool| {
        let mut args = params(&[
            ("instId", Value::UInt(INST_ID)),
            ("tag", Value::UInt(tag)),
            ("position", Value::UInt(0)),
            ("size", Value::UInt(16)),
        ]);
        if end {
            args.insert("end".to_string(), Value::Bool(true));
        }
        args
    };

    target.request(41, "image_loadDataRead", read(true));
    let ResponsePayload::Result(result) = target.recv_response().payload else {
        panic!("expected result");
    };
    assert_eq!(result.get("size"), Some(&Value::UInt(9)));
    assert_eq!(
        result.get("data"),
        Some(&Value::U64Array(vec![0x0807_0605_0403_0201, 0x09]))
    );

    // `end` closed the image.
    target.request(42, "image_loadDataRead", read(false));
    let ResponsePayload::Error(err) = target.recv_response().payload else {
        panic!("expected error");
    };
    assert_eq!(err.code, codes::E_IO_ERROR);
    std::fs::remove_file(path).expect("remove image");
}

#[test]
fn event_callback_receives_events() {
    let (client, mut target) = connected(FrameFormat::ALL.to_vec());
    let (events_tx, events_rx) = mpsc::channel();
    let events_tx = Mutex::new(events_tx);
    client
        .register_event_callback(
            "ec_IRIS_SIMULATION_TIME_EVENT",
            "Simulation time events.",
            move |_ctx: &CallContext<'_>, params: Object| {
                let _ = events_tx.lock().expect("sender").send(params);
                Ok(Value::Null)
            },
        )
        .expect("register");

    let fields: Value = [("RUNNING", Value::Bool(false))].into_iter().collect();
    target.request(
        51,
        "ec_IRIS_SIMULATION_TIME_EVENT",
        params(&[
            ("instId", Value::UInt(INST_ID)),
            ("esId", Value::UInt(3)),
            ("fields", fields.clone()),
            ("time", Value::UInt(1000)),
            ("sInstId", Value::UInt(2)),
        ]),
    );
    assert_eq!(target.recv_response().payload, ResponsePayload::Result(Value::Null));

    let event = events_rx.recv_timeout(TEST_TIMEOUT).expect("event delivered");
    assert_eq!(event.get("esId"), Some(&Value::UInt(3)));
    assert_eq!(event.get("fields"), Some(&fields));
    assert!(event.get("instId").is_none());

    let query: Value = vec![[
        ("name", Value::from("ec_IRIS_SIMULATION_TIME_EVENT")),
        ("args", vec![Value::from("sInstId"), Value::from("syncEc")].into()),
    ]
    .into_iter()
    .collect::<Value>()]
    .into();
    target.request(52, "instance_checkFunctionSupport", params(&[("functions", query)]));
    assert_eq!(
        target.recv_response().payload,
        ResponsePayload::Result(Value::Bool(true))
    );
}
