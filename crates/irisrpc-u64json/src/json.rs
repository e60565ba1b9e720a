//! Bridge between [`Value`] and textual JSON, for the `IrisJson` wire format.
//!
//! Textual JSON has no byte arrays and no non-finite numbers: bytes are
//! written as arrays of numbers and NaN or infinities as `null`.

use serde_json::{Map, Number};

use crate::error::Result;
use crate::message::Message;
use crate::value::{Object, Value};

/// Convert a value into a `serde_json::Value`.
pub fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::UInt(v) => serde_json::Value::Number(Number::from(*v)),
        Value::Int(v) => serde_json::Value::Number(Number::from(*v)),
        Value::Float(v) => Number::from_f64(*v)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(bytes) => serde_json::Value::Array(
            bytes
                .iter()
                .map(|b| serde_json::Value::Number(Number::from(*b)))
                .collect(),
        ),
        Value::Array(items) => serde_json::Value::Array(items.iter().map(to_json).collect()),
        Value::U64Array(items) => serde_json::Value::Array(
            items
                .iter()
                .map(|v| serde_json::Value::Number(Number::from(*v)))
                .collect(),
        ),
        Value::Object(obj) => serde_json::Value::Object(
            obj.iter()
                .map(|(k, v)| (k.clone(), to_json(v)))
                .collect::<Map<String, serde_json::Value>>(),
        ),
    }
}

/// Convert a `serde_json::Value` into a value.
pub fn from_json(value: serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => {
            if let Some(v) = n.as_u64() {
                Value::UInt(v)
            } else if let Some(v) = n.as_i64() {
                Value::Int(v)
            } else {
                Value::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(items) => {
            Value::Array(items.into_iter().map(from_json).collect())
        }
        serde_json::Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, from_json(v)))
                .collect::<Object>(),
        ),
    }
}

/// Parse textual JSON.
pub fn from_str(text: &str) -> Result<Value> {
    Ok(from_json(serde_json::from_str(text)?))
}

/// Render compact textual JSON.
pub fn to_string(value: &Value) -> Result<String> {
    Ok(serde_json::to_string(&to_json(value))?)
}

/// Encode a message as compact textual JSON bytes.
pub fn message_to_json(message: &Message) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&to_json(&message.to_value()))?)
}

/// Decode a message from textual JSON bytes.
pub fn message_from_json(bytes: &[u8]) -> Result<Message> {
    let json: serde_json::Value = serde_json::from_slice(bytes)?;
    Message::from_value(from_json(json))
}
