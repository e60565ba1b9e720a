//! Stream framing for Iris RPC messages.
//!
//! Two frame formats share one byte stream:
//! - `IrisU64Json:` + payload length (4 bytes LE) + U64Json payload + one pad byte
//! - `IrisJson:` + decimal payload length + `:` + JSON text + `\n`
//!
//! The reader recovers from garbage on the stream by scanning forward to the
//! next frame header. No partial reads, no buffer management in user code.

pub mod codec;
pub mod error;
pub mod message;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_frame, encode_frame, resync, Frame, FrameConfig, FrameFormat, DEFAULT_MAX_PAYLOAD,
    JSON_HEADER, U64JSON_HEADER,
};
pub use error::{FrameError, Result};
pub use message::{decode_message, encode_message};
pub use reader::FrameReader;
pub use writer::FrameWriter;
