//! JSON-RPC 2.0 envelopes on top of [`Value`].
//!
//! A message travels as an ordinary object (`jsonrpc`, `id`, `method`,
//! `params`, `result`, `error`). When the object passes
//! [`is_valid_message`] the encoder switches to the compact `0xE` layout:
//!
//! ```text
//! word 0  kind (E0 request, E1 notification, E2 response) | version 0x20 | total length
//! word 1  id (u64::MAX for notifications)
//! word 2  destination instance id
//! then    method, params                       (request / notification)
//!         error code (0), result               (result response)
//!         error code, message [, data]         (error response)
//! ```

use crate::error::{CodecError, Result};
use crate::value::{Object, Value};

/// Value of the `jsonrpc` member of every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Envelope kinds that have a compact encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MessageKind {
    Request,
    Notification,
    Response,
}

impl MessageKind {
    pub(crate) fn tag_byte(self) -> u8 {
        match self {
            MessageKind::Request => 0xe0,
            MessageKind::Notification => 0xe1,
            MessageKind::Response => 0xe2,
        }
    }

    pub(crate) fn from_tag_byte(tag: u8) -> Option<Self> {
        match tag {
            0xe0 => Some(MessageKind::Request),
            0xe1 => Some(MessageKind::Notification),
            0xe2 => Some(MessageKind::Response),
            _ => None,
        }
    }
}

/// True iff `value` is a well-formed request, notification or response.
pub fn is_valid_message(value: &Value) -> bool {
    value.as_object().and_then(classify).is_some()
}

/// Classify an object as a message envelope, or `None` if any member is
/// missing, unexpected, or of the wrong type.
pub(crate) fn classify(obj: &Object) -> Option<MessageKind> {
    classify_with(obj, false)
}

/// Like [`classify`], but with `zero_code_ok` an error object carrying
/// code 0 still counts. Such a response can't use the compact layout and
/// arrives as a plain object.
fn classify_with(obj: &Object, zero_code_ok: bool) -> Option<MessageKind> {
    if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return None;
    }
    if obj.contains_key("method") {
        classify_request(obj)
    } else {
        classify_response(obj, zero_code_ok)
    }
}

fn classify_request(obj: &Object) -> Option<MessageKind> {
    for (key, value) in obj {
        let ok = match key.as_str() {
            "jsonrpc" => true,
            "method" => value.as_str().is_some(),
            "params" => match value.as_object() {
                Some(params) => params.get("instId").is_none_or(Value::is_u64),
                None => false,
            },
            "id" => value.is_u64(),
            _ => false,
        };
        if !ok {
            return None;
        }
    }
    if obj.contains_key("id") {
        Some(MessageKind::Request)
    } else {
        Some(MessageKind::Notification)
    }
}

fn classify_response(obj: &Object, zero_code_ok: bool) -> Option<MessageKind> {
    if !obj.get("id").is_some_and(Value::is_u64) {
        return None;
    }
    if obj.contains_key("result") == obj.contains_key("error") {
        return None;
    }
    for (key, value) in obj {
        let ok = match key.as_str() {
            "jsonrpc" | "id" | "result" => true,
            "error" => value
                .as_object()
                .is_some_and(|err| is_valid_error(err, zero_code_ok)),
            _ => false,
        };
        if !ok {
            return None;
        }
    }
    Some(MessageKind::Response)
}

/// A zero code is the "result" marker on the wire, so it can't carry an error.
fn is_valid_error(error: &Object, zero_code_ok: bool) -> bool {
    let code_ok = error
        .get("code")
        .and_then(Value::as_i64)
        .is_some_and(|code| zero_code_ok || code != 0);
    let message_ok = error.get("message").is_some_and(|m| m.as_str().is_some());
    let members_ok = error
        .keys()
        .all(|k| matches!(k.as_str(), "code" | "message" | "data"));
    code_ok && message_ok && members_ok
}

/// Instance the message is addressed to: `params.instId` for requests,
/// the sender half of the id for responses.
pub(crate) fn destination(obj: &Object, id: Option<u64>) -> u64 {
    if let Some(params) = obj.get("params").and_then(Value::as_object) {
        return params.get("instId").and_then(Value::as_u64).unwrap_or(0);
    }
    if obj.contains_key("method") {
        return 0;
    }
    id.map_or(0, |id| id >> 32)
}

/// A call that expects a response.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: u64,
    pub method: String,
    pub params: Object,
}

/// A call that expects no response.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Object,
}

/// The error member of a failed response.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

impl ErrorObject {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Outcome carried by a response.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponsePayload {
    Result(Value),
    Error(ErrorObject),
}

/// Answer to a [`Request`], matched by id.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: u64,
    pub payload: ResponsePayload,
}

impl Response {
    pub fn result(id: u64, result: Value) -> Self {
        Self {
            id,
            payload: ResponsePayload::Result(result),
        }
    }

    pub fn error(id: u64, error: ErrorObject) -> Self {
        Self {
            id,
            payload: ResponsePayload::Error(error),
        }
    }
}

/// Any JSON-RPC message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Notification(Notification),
    Response(Response),
}

impl Message {
    /// Method name for requests and notifications.
    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request(req) => Some(&req.method),
            Message::Notification(note) => Some(&note.method),
            Message::Response(_) => None,
        }
    }

    /// Request or response id; notifications have none.
    pub fn id(&self) -> Option<u64> {
        match self {
            Message::Request(req) => Some(req.id),
            Message::Notification(_) => None,
            Message::Response(resp) => Some(resp.id),
        }
    }

    /// Build the object form of this message.
    pub fn to_value(&self) -> Value {
        let mut obj = Object::new();
        obj.insert("jsonrpc".to_string(), Value::from(JSONRPC_VERSION));
        match self {
            Message::Request(req) => {
                obj.insert("id".to_string(), Value::UInt(req.id));
                obj.insert("method".to_string(), Value::from(req.method.as_str()));
                obj.insert("params".to_string(), Value::Object(req.params.clone()));
            }
            Message::Notification(note) => {
                obj.insert("method".to_string(), Value::from(note.method.as_str()));
                obj.insert("params".to_string(), Value::Object(note.params.clone()));
            }
            Message::Response(resp) => {
                obj.insert("id".to_string(), Value::UInt(resp.id));
                match &resp.payload {
                    ResponsePayload::Result(result) => {
                        obj.insert("result".to_string(), result.clone());
                    }
                    ResponsePayload::Error(error) => {
                        let mut err = Object::new();
                        err.insert("code".to_string(), Value::Int(error.code));
                        err.insert("message".to_string(), Value::from(error.message.as_str()));
                        if let Some(data) = &error.data {
                            err.insert("data".to_string(), data.clone());
                        }
                        obj.insert("error".to_string(), Value::Object(err));
                    }
                }
            }
        }
        Value::Object(obj)
    }

    /// Interpret a decoded value as a message.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut obj) = value else {
            return Err(CodecError::InvalidMessage(format!(
                "expected object, got {}",
                value.type_name()
            )));
        };
        let kind = classify_with(&obj, true).ok_or_else(|| {
            CodecError::InvalidMessage("object is not a JSON-RPC envelope".to_string())
        })?;

        let id = obj.get("id").and_then(Value::as_u64);
        let method = match obj.shift_remove("method") {
            Some(Value::String(method)) => Some(method),
            _ => None,
        };
        let params = match obj.shift_remove("params") {
            Some(Value::Object(params)) => params,
            _ => Object::new(),
        };

        let message = match (kind, id, method) {
            (MessageKind::Request, Some(id), Some(method)) => {
                Message::Request(Request { id, method, params })
            }
            (MessageKind::Notification, _, Some(method)) => {
                Message::Notification(Notification { method, params })
            }
            (MessageKind::Response, Some(id), _) => {
                let payload = match obj.shift_remove("error") {
                    Some(Value::Object(mut err)) => ResponsePayload::Error(ErrorObject {
                        code: err.get("code").and_then(Value::as_i64).unwrap_or_default(),
                        message: match err.shift_remove("message") {
                            Some(Value::String(m)) => m,
                            _ => String::new(),
                        },
                        data: err.shift_remove("data"),
                    }),
                    _ => ResponsePayload::Result(
                        obj.shift_remove("result").unwrap_or(Value::Null),
                    ),
                };
                Message::Response(Response { id, payload })
            }
            _ => {
                return Err(CodecError::InvalidMessage(
                    "envelope members are inconsistent".to_string(),
                ))
            }
        };
        Ok(message)
    }

    /// Encode as U64Json bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        crate::encode::to_vec(&self.to_value())
    }

    /// Decode a message from U64Json bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_value(crate::decode::from_slice(bytes)?)
    }
}

impl From<Request> for Message {
    fn from(req: Request) -> Self {
        Message::Request(req)
    }
}

impl From<Notification> for Message {
    fn from(note: Notification) -> Self {
        Message::Notification(note)
    }
}

impl From<Response> for Message {
    fn from(resp: Response) -> Self {
        Message::Response(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::to_words;

    fn params(pairs: &[(&str, Value)]) -> Object {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn roundtrip(msg: &Message) -> Message {
        Message::from_bytes(&msg.to_bytes().unwrap()).unwrap()
    }

    #[test]
    fn request_roundtrip_uses_compact_envelope() {
        let msg = Message::Request(Request {
            id: (7 << 32) | 3,
            method: "resource_read".to_string(),
            params: params(&[("instId", Value::UInt(12)), ("rscIds", Value::U64Array(vec![1, 2]))]),
        });
        let words = to_words(&msg.to_value()).unwrap();
        assert_eq!(words[0] >> 56, 0xe0);
        assert_eq!((words[0] >> 48) & 0xff, 0x20);
        assert_eq!(words[0] & ((1 << 48) - 1), words.len() as u64);
        assert_eq!(words[1], (7 << 32) | 3);
        assert_eq!(words[2], 12);
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn notification_roundtrip() {
        let msg = Message::Notification(Notification {
            method: "ec_IRIS_SIMULATION_TIME_EVENT".to_string(),
            params: params(&[("instId", Value::UInt(5)), ("time", Value::UInt(1000))]),
        });
        let words = to_words(&msg.to_value()).unwrap();
        assert_eq!(words[0] >> 56, 0xe1);
        assert_eq!(words[1], u64::MAX);
        assert_eq!(words[2], 5);
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn result_response_roundtrip() {
        let msg = Message::Response(Response::result(
            (9 << 32) | 1,
            Value::from("ok"),
        ));
        let words = to_words(&msg.to_value()).unwrap();
        assert_eq!(words[0] >> 56, 0xe2);
        assert_eq!(words[2], 9);
        assert_eq!(words[3], 0);
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn error_response_roundtrip_with_and_without_data() {
        let plain = Message::Response(Response::error(4, ErrorObject::new(-32601, "no method")));
        assert_eq!(roundtrip(&plain), plain);

        let with_data = Message::Response(Response::error(
            4,
            ErrorObject::new(0x1002, "bad address").with_data(Value::U64Array(vec![0xdead])),
        ));
        let words = to_words(&with_data.to_value()).unwrap();
        assert_eq!(words[0] >> 56, 0xe2);
        assert_eq!(words[3], 0x1002);
        assert_eq!(roundtrip(&with_data), with_data);
    }

    #[test]
    fn response_with_null_result() {
        let msg = Message::Response(Response::result(1, Value::Null));
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn valid_message_rules() {
        let req: Value = [
            ("jsonrpc", Value::from("2.0")),
            ("method", Value::from("instance_ping")),
            ("id", Value::UInt(1)),
        ]
        .into_iter()
        .collect();
        assert!(is_valid_message(&req));

        let mut wrong_version = req.clone();
        wrong_version
            .as_object_mut()
            .unwrap()
            .insert("jsonrpc".to_string(), Value::from("1.0"));
        assert!(!is_valid_message(&wrong_version));

        let mut extra = req.clone();
        extra
            .as_object_mut()
            .unwrap()
            .insert("extra".to_string(), Value::Null);
        assert!(!is_valid_message(&extra));

        let mut negative_id = req.clone();
        negative_id
            .as_object_mut()
            .unwrap()
            .insert("id".to_string(), Value::Int(-1));
        assert!(!is_valid_message(&negative_id));

        let mut bad_inst: Value = req.clone();
        bad_inst.as_object_mut().unwrap().insert(
            "params".to_string(),
            [("instId", Value::from("x"))].into_iter().collect(),
        );
        assert!(!is_valid_message(&bad_inst));
    }

    #[test]
    fn response_needs_exactly_one_outcome() {
        let both: Value = [
            ("jsonrpc", Value::from("2.0")),
            ("id", Value::UInt(1)),
            ("result", Value::Null),
            (
                "error",
                [("code", Value::Int(5)), ("message", Value::from("x"))]
                    .into_iter()
                    .collect(),
            ),
        ]
        .into_iter()
        .collect();
        assert!(!is_valid_message(&both));

        let neither: Value = [("jsonrpc", Value::from("2.0")), ("id", Value::UInt(1))]
            .into_iter()
            .collect();
        assert!(!is_valid_message(&neither));
    }

    #[test]
    fn zero_error_code_falls_back_to_generic_object() {
        let msg = Message::Response(Response::error(1, ErrorObject::new(0, "odd")));
        let value = msg.to_value();
        assert!(!is_valid_message(&value));

        let words = to_words(&value).unwrap();
        assert_eq!(words[0] >> 60, 0xb);
        let decoded = crate::decode::from_words(&words).unwrap();
        assert_eq!(decoded, value);

        // Still readable as an error response, so the caller is answered.
        assert_eq!(Message::from_value(decoded).unwrap(), msg);
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn invalid_objects_still_roundtrip_generically() {
        let value: Value = [
            ("jsonrpc", Value::from("2.0")),
            ("method", Value::UInt(3)),
            ("id", Value::UInt(1)),
        ]
        .into_iter()
        .collect();
        let words = to_words(&value).unwrap();
        assert_eq!(words[0] >> 60, 0xb);
        assert_eq!(crate::decode::from_words(&words).unwrap(), value);
        assert!(Message::from_value(value).is_err());
    }

    #[test]
    fn request_without_params_targets_instance_zero() {
        let value: Value = [
            ("jsonrpc", Value::from("2.0")),
            ("method", Value::from("instanceRegistry_getList")),
            ("id", Value::UInt(0)),
        ]
        .into_iter()
        .collect();
        let words = to_words(&value).unwrap();
        assert_eq!(words[2], 0);
        let msg = Message::from_value(crate::decode::from_words(&words).unwrap()).unwrap();
        assert_eq!(
            msg,
            Message::Request(Request {
                id: 0,
                method: "instanceRegistry_getList".to_string(),
                params: Object::new(),
            })
        );
    }

    #[test]
    fn accessors() {
        let req = Message::from(Request {
            id: 2,
            method: "m".to_string(),
            params: Object::new(),
        });
        assert_eq!(req.method(), Some("m"));
        assert_eq!(req.id(), Some(2));
        let note = Message::from(Notification {
            method: "n".to_string(),
            params: Object::new(),
        });
        assert_eq!(note.id(), None);
    }
}
