//! U64Json: a word-oriented binary encoding for JSON-like values.
//!
//! Every encoded value occupies a whole number of little-endian 64-bit
//! words. The top bits of a value's first word select its kind:
//!
//! ```text
//! 0x0 / 0xF  plain unsigned integer (the word is the value)
//! 0x1        negative integer, sign-extended from 60 bits
//! 0x2..0x7   short string (length in the low byte)
//! 0x8        array of unsigned integers (count + raw words)
//! 0xA        generic array (total length, count, elements)
//! 0xB        generic object (total length, count, sorted key/value pairs)
//! 0xC        explicit-tag scalar (u64, i64, f64, bytes, long string, null, bool)
//! 0xE        JSON-RPC message envelope
//! ```
//!
//! Objects that form a valid JSON-RPC request, notification or response are
//! encoded with the compact `0xE` envelope; everything else falls back to
//! the generic object layout.

pub mod bitpattern;
pub mod decode;
pub mod encode;
pub mod error;
pub mod json;
pub mod message;
pub mod value;

pub use decode::{decode, from_slice, from_words};
pub use encode::{encode, to_vec, to_words, MAX_DEPTH};
pub use error::{CodecError, Result};
pub use message::{
    is_valid_message, ErrorObject, Message, Notification, Request, Response, ResponsePayload,
    JSONRPC_VERSION,
};
pub use value::{Object, Value};
