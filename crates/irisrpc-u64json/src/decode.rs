use bytes::Buf;

use crate::encode::{descend, LOW_48, LOW_56, LOW_60, MESSAGE_VERSION};
use crate::error::{CodecError, Result};
use crate::message::{MessageKind, JSONRPC_VERSION};
use crate::value::{Object, Value};

/// Decode the value at the start of a little-endian U64Json byte buffer.
pub fn from_slice(bytes: &[u8]) -> Result<Value> {
    if bytes.len() % 8 != 0 {
        return Err(CodecError::UnalignedPayload(bytes.len()));
    }
    let mut src = bytes;
    let mut words = Vec::with_capacity(bytes.len() / 8);
    while src.has_remaining() {
        words.push(src.get_u64_le());
    }
    from_words(&words)
}

/// Decode the value at the start of `words`. Trailing words are ignored.
pub fn from_words(words: &[u64]) -> Result<Value> {
    decode(words, 0).map(|(value, _)| value)
}

/// Decode the value starting at `offset`.
///
/// Returns the value and the number of words its encoding occupies, so the
/// caller can continue with the next sibling. Containers nested deeper than
/// [`MAX_DEPTH`](crate::encode::MAX_DEPTH) fail with [`CodecError::TooDeep`].
pub fn decode(words: &[u64], offset: usize) -> Result<(Value, usize)> {
    decode_nested(words, offset, 0)
}

fn decode_nested(words: &[u64], offset: usize, depth: usize) -> Result<(Value, usize)> {
    let head = word(words, offset)?;
    match head >> 60 {
        0x0 | 0xf => Ok((Value::UInt(head), 1)),
        0x1 => Ok((Value::Int((head | 0xf000_0000_0000_0000) as i64), 1)),
        0x2..=0x7 => {
            let len = (head & 0xff) as usize;
            let size = (len >> 3) + 1;
            let bytes = word_bytes(words, offset, size)?;
            let s = String::from_utf8(bytes[1..1 + len].to_vec())?;
            Ok((Value::String(s), size))
        }
        0x8 => {
            let count = to_usize(head & LOW_60)?;
            need(words, offset, count.saturating_add(1))?;
            let items = words[offset + 1..offset + 1 + count].to_vec();
            Ok((Value::U64Array(items), count + 1))
        }
        0xa => decode_array(words, offset, head, descend(depth, offset)?),
        0xb => decode_object(words, offset, head, descend(depth, offset)?),
        0xc => decode_tagged(words, offset, head),
        0xe => decode_message(words, offset, head, descend(depth, offset)?),
        _ => Err(CodecError::InvalidTag { tag: head, offset }),
    }
}

fn decode_array(words: &[u64], offset: usize, head: u64, depth: usize) -> Result<(Value, usize)> {
    let container_len = container_len(words, offset, head & LOW_60)?;
    let count = to_usize(words[offset + 1])?;
    let mut items = Vec::with_capacity(count.min(container_len));
    let mut pos = offset + 2;
    for _ in 0..count {
        let (item, size) = decode_nested(words, pos, depth)?;
        items.push(item);
        pos += size;
    }
    check_used(offset, container_len, pos)?;
    Ok((Value::Array(items), container_len))
}

fn decode_object(words: &[u64], offset: usize, head: u64, depth: usize) -> Result<(Value, usize)> {
    let container_len = container_len(words, offset, head & LOW_60)?;
    let count = to_usize(words[offset + 1])?;
    let mut obj = Object::with_capacity(count.min(container_len));
    let mut pos = offset + 2;
    for _ in 0..count {
        let (key, size) = decode_nested(words, pos, depth)?;
        let Value::String(key) = key else {
            return Err(CodecError::InvalidKey(pos));
        };
        pos += size;
        let (value, size) = decode_nested(words, pos, depth)?;
        pos += size;
        obj.insert(key, value);
    }
    check_used(offset, container_len, pos)?;
    Ok((Value::Object(obj), container_len))
}

fn decode_tagged(words: &[u64], offset: usize, head: u64) -> Result<(Value, usize)> {
    match head >> 56 {
        0xc0 => Ok((Value::UInt(word(words, offset + 1)?), 2)),
        0xc1 => Ok((Value::Int(word(words, offset + 1)? as i64), 2)),
        0xca => Ok((Value::Float(f64::from_bits(word(words, offset + 1)?)), 2)),
        0xcb => {
            let (bytes, size) = tagged_bytes(words, offset, head)?;
            Ok((Value::Bytes(bytes), size))
        }
        0xcc => {
            let (bytes, size) = tagged_bytes(words, offset, head)?;
            Ok((Value::String(String::from_utf8(bytes)?), size))
        }
        0xcd => Ok((Value::Null, 1)),
        0xce => Ok((Value::Bool(false), 1)),
        0xcf => Ok((Value::Bool(true), 1)),
        _ => Err(CodecError::InvalidTag { tag: head, offset }),
    }
}

/// Payload of a byte array or long string: length in the low 56 bits,
/// data in the following zero-padded words.
fn tagged_bytes(words: &[u64], offset: usize, head: u64) -> Result<(Vec<u8>, usize)> {
    let len = to_usize(head & LOW_56)?;
    let data_words = len.div_ceil(8);
    let mut bytes = word_bytes(words, offset + 1, data_words)?;
    bytes.truncate(len);
    Ok((bytes, data_words + 1))
}

fn decode_message(words: &[u64], offset: usize, head: u64, depth: usize) -> Result<(Value, usize)> {
    let version = ((head >> 48) & 0xff) as u8;
    if version != MESSAGE_VERSION {
        return Err(CodecError::InvalidMessageVersion(version));
    }
    let kind = MessageKind::from_tag_byte((head >> 56) as u8)
        .ok_or(CodecError::InvalidTag { tag: head, offset })?;
    let container_len = to_usize(head & LOW_48)?;
    if container_len < 4 {
        return Err(CodecError::ContainerLength {
            offset,
            declared: container_len,
            used: 4,
        });
    }
    need(words, offset, container_len)?;

    let id = words[offset + 1];
    // words[offset + 2] is the destination instance; it is routing data
    // derived from params or id, not a member of the message.
    let end = offset + container_len;
    let mut pos = offset + 3;

    let mut obj = Object::new();
    obj.insert("jsonrpc".to_string(), Value::from(JSONRPC_VERSION));

    match kind {
        MessageKind::Request | MessageKind::Notification => {
            let (method, size) = decode_nested(words, pos, depth)?;
            pos += size;
            let (params, size) = decode_nested(words, pos, depth)?;
            pos += size;
            obj.insert("method".to_string(), method);
            obj.insert("params".to_string(), params);
            if kind == MessageKind::Request {
                obj.insert("id".to_string(), Value::UInt(id));
            }
        }
        MessageKind::Response => {
            let code = words[pos] as i64;
            pos += 1;
            obj.insert("id".to_string(), Value::UInt(id));
            if code == 0 {
                let (result, size) = decode_nested(words, pos, depth)?;
                pos += size;
                obj.insert("result".to_string(), result);
            } else {
                let mut error = Object::new();
                error.insert("code".to_string(), Value::Int(code));
                let (message, size) = decode_nested(words, pos, depth)?;
                pos += size;
                error.insert("message".to_string(), message);
                if pos < end {
                    let (data, size) = decode_nested(words, pos, depth)?;
                    pos += size;
                    error.insert("data".to_string(), data);
                }
                obj.insert("error".to_string(), Value::Object(error));
            }
        }
    }

    check_used(offset, container_len, pos)?;
    Ok((Value::Object(obj), container_len))
}

/// Validate a generic container header and return its length in words.
fn container_len(words: &[u64], offset: usize, declared: u64) -> Result<usize> {
    let declared = to_usize(declared)?;
    if declared < 2 {
        return Err(CodecError::ContainerLength {
            offset,
            declared,
            used: 2,
        });
    }
    need(words, offset, declared)?;
    Ok(declared)
}

fn check_used(offset: usize, declared: usize, pos: usize) -> Result<()> {
    let used = pos - offset;
    if used > declared {
        return Err(CodecError::ContainerLength {
            offset,
            declared,
            used,
        });
    }
    Ok(())
}

fn word(words: &[u64], offset: usize) -> Result<u64> {
    words.get(offset).copied().ok_or(CodecError::Truncated {
        offset,
        needed: 1,
        available: words.len().saturating_sub(offset),
    })
}

fn need(words: &[u64], offset: usize, needed: usize) -> Result<()> {
    let available = words.len().saturating_sub(offset);
    if needed > available {
        return Err(CodecError::Truncated {
            offset,
            needed,
            available,
        });
    }
    Ok(())
}

fn word_bytes(words: &[u64], offset: usize, count: usize) -> Result<Vec<u8>> {
    need(words, offset, count)?;
    Ok(words[offset..offset + count]
        .iter()
        .flat_map(|w| w.to_le_bytes())
        .collect())
}

fn to_usize(v: u64) -> Result<usize> {
    usize::try_from(v).map_err(|_| CodecError::LengthOverflow {
        len: usize::MAX,
        bits: usize::BITS,
    })
}
