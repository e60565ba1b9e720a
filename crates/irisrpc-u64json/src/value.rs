use std::fmt;

use indexmap::IndexMap;

use crate::error::{CodecError, Result};

/// Object members. Lookup ignores member order; the encoder always emits
/// members sorted by key, the decoder keeps whatever order it read.
pub type Object = IndexMap<String, Value>;

/// A JSON-like value as carried by U64Json.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    /// Unsigned 64-bit integer.
    UInt(u64),
    /// Signed 64-bit integer. Non-negative values are encoded as `UInt`.
    Int(i64),
    Float(f64),
    String(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    /// Array of plain unsigned integers, e.g. register or memory contents.
    U64Array(Vec<u64>),
    Object(Object),
}

impl Value {
    /// Build an integer value from any integer in `[i64::MIN, u64::MAX]`.
    pub fn integer(value: i128) -> Result<Self> {
        if value >= 0 {
            u64::try_from(value)
                .map(Value::UInt)
                .map_err(|_| CodecError::IntegerOutOfRange(value))
        } else {
            i64::try_from(value)
                .map(Value::Int)
                .map_err(|_| CodecError::IntegerOutOfRange(value))
        }
    }

    /// An empty object.
    pub fn object() -> Self {
        Value::Object(Object::new())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// True if the value is an integer representable as `u64`.
    pub fn is_u64(&self) -> bool {
        self.as_u64().is_some()
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(v) => Some(*v),
            Value::Int(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// The integer value widened to `i128`, for range-independent comparison.
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            Value::UInt(v) => Some(i128::from(*v)),
            Value::Int(v) => Some(i128::from(*v)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut Object> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Array elements, with unsigned arrays expanded into `UInt` values.
    pub fn to_array(&self) -> Option<Vec<Value>> {
        match self {
            Value::Array(items) => Some(items.clone()),
            Value::U64Array(items) => Some(items.iter().copied().map(Value::UInt).collect()),
            _ => None,
        }
    }

    /// Look up an object member.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|obj| obj.get(key))
    }

    /// Number of elements or members; `None` for scalars.
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::Array(items) => Some(items.len()),
            Value::U64Array(items) => Some(items.len()),
            Value::Object(obj) => Some(obj.len()),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::UInt(_) => "uint64",
            Value::Int(_) => "int64",
            Value::Float(_) => "float64",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Array(_) | Value::U64Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}

/// Equality follows the wire, not the Rust variant: a non-negative `Int`
/// equals the same `UInt`, an all-unsigned `Array` equals the matching
/// `U64Array`, and floats compare by bit pattern (so NaN equals itself and
/// `0.0` differs from `-0.0`).
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::U64Array(a), Value::U64Array(b)) => a == b,
            (Value::Array(a), Value::U64Array(b)) | (Value::U64Array(b), Value::Array(a)) => {
                a.len() == b.len()
                    && a.iter().zip(b).all(|(x, y)| x.as_u64() == Some(*y))
            }
            (a, b) => match (a.as_i128(), b.as_i128()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt(u64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl From<Vec<u64>> for Value {
    fn from(v: Vec<u64>) -> Self {
        Value::U64Array(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<Object> for Value {
    fn from(v: Object) -> Self {
        Value::Object(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Value {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Value::Object(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Compact single-line rendering for logs: unquoted sorted keys, integers
/// of 10 and above also shown in hex.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::UInt(v) => fmt_unsigned(f, *v),
            Value::Int(v) if *v >= 0 => fmt_unsigned(f, v.unsigned_abs()),
            Value::Int(v) if *v > -10 => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v} (-0x{:x})", v.unsigned_abs()),
            Value::Float(v) => write!(f, "{v}"),
            Value::String(s) => write!(f, "\"{s}\""),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::U64Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    fmt_unsigned(f, *item)?;
                }
                f.write_str("]")
            }
            Value::Object(obj) => {
                let mut keys: Vec<&String> = obj.keys().collect();
                keys.sort();
                f.write_str("{")?;
                for (i, key) in keys.into_iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {}", obj[key])?;
                }
                f.write_str("}")
            }
        }
    }
}

fn fmt_unsigned(f: &mut fmt::Formatter<'_>, v: u64) -> fmt::Result {
    if v < 10 {
        write!(f, "{v}")
    } else {
        write!(f, "{v} (0x{v:x})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_constructor_picks_width() {
        assert!(matches!(Value::integer(5).unwrap(), Value::UInt(5)));
        assert!(matches!(Value::integer(-5).unwrap(), Value::Int(-5)));
        assert!(matches!(
            Value::integer(i128::from(u64::MAX)).unwrap(),
            Value::UInt(u64::MAX)
        ));
        assert!(matches!(
            Value::integer(i128::from(i64::MIN)).unwrap(),
            Value::Int(i64::MIN)
        ));
    }

    #[test]
    fn integer_constructor_rejects_out_of_range() {
        let too_big = i128::from(u64::MAX) + 1;
        let too_small = i128::from(i64::MIN) - 1;
        assert!(matches!(
            Value::integer(too_big),
            Err(CodecError::IntegerOutOfRange(v)) if v == too_big
        ));
        assert!(matches!(
            Value::integer(too_small),
            Err(CodecError::IntegerOutOfRange(_))
        ));
    }

    #[test]
    fn equality_ignores_integer_variant() {
        assert_eq!(Value::Int(7), Value::UInt(7));
        assert_ne!(Value::Int(-1), Value::UInt(u64::MAX));
        assert_ne!(Value::UInt(1), Value::Bool(true));
    }

    #[test]
    fn equality_of_unsigned_arrays() {
        let generic = Value::Array(vec![Value::UInt(1), Value::Int(2)]);
        let packed = Value::U64Array(vec![1, 2]);
        assert_eq!(generic, packed);
        assert_eq!(packed, generic);
        assert_ne!(Value::Array(vec![Value::Int(-1)]), Value::U64Array(vec![1]));
        assert_eq!(Value::Array(vec![]), Value::U64Array(vec![]));
    }

    #[test]
    fn float_equality_is_bitwise() {
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_ne!(Value::Float(0.0), Value::Float(-0.0));
    }

    #[test]
    fn object_equality_ignores_member_order() {
        let a: Value = [("x", 1u64), ("y", 2u64)].into_iter().collect();
        let b: Value = [("y", 2u64), ("x", 1u64)].into_iter().collect();
        assert_eq!(a, b);
    }

    #[test]
    fn display_is_compact() {
        let v: Value = [
            ("pc", Value::UInt(0x8000)),
            ("name", Value::from("core0")),
            ("n", Value::Int(-3)),
        ]
        .into_iter()
        .collect();
        assert_eq!(
            v.to_string(),
            "{n: -3, name: \"core0\", pc: 32768 (0x8000)}"
        );
        assert_eq!(Value::U64Array(vec![1, 16]).to_string(), "[1, 16 (0x10)]");
    }

    #[test]
    fn accessors() {
        let v: Value = [("instId", 3u64)].into_iter().collect();
        assert_eq!(v.get("instId").and_then(Value::as_u64), Some(3));
        assert_eq!(Value::Int(-1).as_u64(), None);
        assert_eq!(Value::UInt(u64::MAX).as_i64(), None);
        assert_eq!(Value::U64Array(vec![4]).to_array(), Some(vec![Value::UInt(4)]));
        assert_eq!(v.len(), Some(1));
        assert_eq!(Value::Null.len(), None);
    }
}
