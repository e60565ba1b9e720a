use bytes::BufMut;

use crate::error::{CodecError, Result};
use crate::message::{self, MessageKind};
use crate::value::{Object, Value};

/// Explicit-tag unsigned integer (second word holds the value).
pub const TAG_U64: u64 = 0xc0 << 56;
/// Explicit-tag signed integer (second word holds the value).
pub const TAG_S64: u64 = 0xc1 << 56;
/// IEEE-754 double (second word holds the bit pattern).
pub const TAG_F64: u64 = 0xca << 56;
/// Byte array; length in the low 56 bits.
pub const TAG_BYTES: u64 = 0xcb << 56;
/// Long string; length in the low 56 bits.
pub const TAG_LONG_STRING: u64 = 0xcc << 56;
pub const TAG_NULL: u64 = 0xcd << 56;
pub const TAG_FALSE: u64 = 0xce << 56;
pub const TAG_TRUE: u64 = 0xcf << 56;
/// Array of plain unsigned integers; count in the low 60 bits.
pub const TAG_U64_ARRAY: u64 = 0x8 << 60;
/// Generic array; total word length in the low 60 bits.
pub const TAG_ARRAY: u64 = 0xa << 60;
/// Generic object; total word length in the low 60 bits.
pub const TAG_OBJECT: u64 = 0xb << 60;
/// Placeholder for a container header that has not been patched yet.
pub const INVALID: u64 = 0xc9ff_ffff_ffff_ffff;

/// Version byte carried in bits 55..48 of every message header.
pub const MESSAGE_VERSION: u8 = 0x20;
/// Marker in the top byte of strings shorter than 7 bytes.
pub const SHORT_STRING_MARKER: u8 = 0x20;

/// Deepest container nesting accepted by the encoder and the decoder.
pub const MAX_DEPTH: usize = 512;

pub(crate) const LOW_60: u64 = (1 << 60) - 1;
pub(crate) const LOW_56: u64 = (1 << 56) - 1;
pub(crate) const LOW_48: u64 = (1 << 48) - 1;

/// Encode a value into U64Json words.
pub fn to_words(value: &Value) -> Result<Vec<u64>> {
    let mut words = Vec::new();
    encode(value, &mut words)?;
    Ok(words)
}

/// Encode a value into little-endian U64Json bytes.
pub fn to_vec(value: &Value) -> Result<Vec<u8>> {
    let words = to_words(value)?;
    let mut out = Vec::with_capacity(words.len() * 8);
    for word in words {
        out.put_u64_le(word);
    }
    Ok(out)
}

/// Append the encoding of `value` to `buf`.
///
/// Containers nested deeper than [`MAX_DEPTH`] are refused with
/// [`CodecError::TooDeep`].
pub fn encode(value: &Value, buf: &mut Vec<u64>) -> Result<()> {
    encode_nested(value, buf, 0)
}

fn encode_nested(value: &Value, buf: &mut Vec<u64>, depth: usize) -> Result<()> {
    match value {
        Value::Null => buf.push(TAG_NULL),
        Value::Bool(true) => buf.push(TAG_TRUE),
        Value::Bool(false) => buf.push(TAG_FALSE),
        Value::UInt(v) => encode_u64(*v, buf),
        Value::Int(v) => encode_i64(*v, buf),
        Value::Float(v) => buf.extend_from_slice(&[TAG_F64, v.to_bits()]),
        Value::String(s) => encode_str(s, buf)?,
        Value::Bytes(b) => {
            let len = checked_len(b.len(), 56)?;
            buf.push(TAG_BYTES | len);
            push_padded_bytes(b, buf);
        }
        Value::U64Array(items) if !items.is_empty() => {
            let count = checked_len(items.len(), 60)?;
            buf.push(TAG_U64_ARRAY | count);
            buf.extend_from_slice(items);
        }
        Value::U64Array(_) => encode_array(&[], buf, depth)?,
        Value::Array(items) => {
            if !items.is_empty() && items.iter().all(Value::is_u64) {
                let count = checked_len(items.len(), 60)?;
                buf.push(TAG_U64_ARRAY | count);
                buf.extend(items.iter().filter_map(Value::as_u64));
            } else {
                encode_array(items, buf, depth)?;
            }
        }
        Value::Object(obj) => match message::classify(obj) {
            Some(kind) => encode_message(obj, kind, buf, depth)?,
            None => encode_object(obj, buf, depth)?,
        },
    }
    Ok(())
}

fn encode_u64(v: u64, buf: &mut Vec<u64>) {
    let msb4 = v >> 60;
    if msb4 == 0x0 || msb4 == 0xf {
        buf.push(v);
    } else {
        buf.extend_from_slice(&[TAG_U64, v]);
    }
}

fn encode_i64(v: i64, buf: &mut Vec<u64>) {
    if v >= 0 {
        encode_u64(v.unsigned_abs(), buf);
        return;
    }
    let bits = v as u64;
    if bits >> 60 == 0xf {
        buf.push(bits & 0x1fff_ffff_ffff_ffff);
    } else {
        buf.extend_from_slice(&[TAG_S64, bits]);
    }
}

/// True if `s` is encoded inline with its length byte rather than as a
/// long string.
///
/// Strings of 7+ bytes put their seventh byte into the top byte of the first
/// word, so that byte must itself look like a short-string tag.
pub fn is_short_string(s: &[u8]) -> bool {
    s.len() < 7 || (s.len() <= 255 && (0x20..0x7f).contains(&s[6]))
}

fn encode_str(s: &str, buf: &mut Vec<u64>) -> Result<()> {
    let bytes = s.as_bytes();
    if is_short_string(bytes) {
        let mut raw = Vec::with_capacity(bytes.len() + 8);
        raw.push(bytes.len() as u8);
        raw.extend_from_slice(bytes);
        if bytes.len() < 7 {
            raw.resize(7, 0);
            raw.push(SHORT_STRING_MARKER);
        } else {
            raw.resize(raw.len().div_ceil(8) * 8, 0);
        }
        buf.extend(raw.chunks_exact(8).map(word_from_le));
    } else {
        let len = checked_len(bytes.len(), 56)?;
        buf.push(TAG_LONG_STRING | len);
        push_padded_bytes(bytes, buf);
    }
    Ok(())
}

/// Append `bytes` zero-padded to a whole number of words.
fn push_padded_bytes(bytes: &[u8], buf: &mut Vec<u64>) {
    let mut chunks = bytes.chunks_exact(8);
    buf.extend(chunks.by_ref().map(word_from_le));
    let rest = chunks.remainder();
    if !rest.is_empty() {
        let mut tail = [0u8; 8];
        tail[..rest.len()].copy_from_slice(rest);
        buf.push(u64::from_le_bytes(tail));
    }
}

fn encode_array(items: &[Value], buf: &mut Vec<u64>, depth: usize) -> Result<()> {
    let depth = descend(depth, buf.len())?;
    let head = reserve_header(buf);
    buf.push(items.len() as u64);
    for item in items {
        encode_nested(item, buf, depth)?;
    }
    patch_header(buf, head, TAG_ARRAY, 60)
}

fn encode_object(obj: &Object, buf: &mut Vec<u64>, depth: usize) -> Result<()> {
    let depth = descend(depth, buf.len())?;
    let head = reserve_header(buf);
    buf.push(obj.len() as u64);
    let mut keys: Vec<&String> = obj.keys().collect();
    keys.sort();
    for key in keys {
        encode_str(key, buf)?;
        encode_nested(&obj[key], buf, depth)?;
    }
    patch_header(buf, head, TAG_OBJECT, 60)
}

/// Inline the envelope fields of an object already classified as a message.
fn encode_message(obj: &Object, kind: MessageKind, buf: &mut Vec<u64>, depth: usize) -> Result<()> {
    let depth = descend(depth, buf.len())?;
    let head = reserve_header(buf);
    let id = obj.get("id").and_then(Value::as_u64);

    buf.push(id.unwrap_or(u64::MAX));
    buf.push(message::destination(obj, id));

    match kind {
        MessageKind::Request | MessageKind::Notification => {
            if let Some(method) = obj.get("method") {
                encode_nested(method, buf, depth)?;
            }
            match obj.get("params") {
                Some(params) => encode_nested(params, buf, depth)?,
                None => encode_object(&Object::new(), buf, depth)?,
            }
        }
        MessageKind::Response => match obj.get("error").and_then(Value::as_object) {
            Some(error) => {
                let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
                buf.push(code as u64);
                if let Some(message) = error.get("message") {
                    encode_nested(message, buf, depth)?;
                }
                if let Some(data) = error.get("data") {
                    encode_nested(data, buf, depth)?;
                }
            }
            None => {
                buf.push(0);
                encode_nested(obj.get("result").unwrap_or(&Value::Null), buf, depth)?;
            }
        },
    }

    let tag = (u64::from(kind.tag_byte()) << 56) | (u64::from(MESSAGE_VERSION) << 48);
    patch_header(buf, head, tag, 48)
}

/// Depth of the children of a container at `depth`.
pub(crate) fn descend(depth: usize, offset: usize) -> Result<usize> {
    if depth >= MAX_DEPTH {
        return Err(CodecError::TooDeep { offset });
    }
    Ok(depth + 1)
}

fn reserve_header(buf: &mut Vec<u64>) -> usize {
    buf.push(INVALID);
    buf.len() - 1
}

fn patch_header(buf: &mut [u64], head: usize, tag: u64, bits: u32) -> Result<()> {
    let len = checked_len(buf.len() - head, bits)?;
    buf[head] = tag | len;
    Ok(())
}

fn checked_len(len: usize, bits: u32) -> Result<u64> {
    let len64 = len as u64;
    if len64 >> bits != 0 {
        return Err(CodecError::LengthOverflow { len, bits });
    }
    Ok(len64)
}

fn word_from_le(chunk: &[u8]) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(chunk);
    u64::from_le_bytes(word)
}
