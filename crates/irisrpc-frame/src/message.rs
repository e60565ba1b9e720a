//! Message payloads in either frame format.

use bytes::Bytes;
use irisrpc_u64json::{json, Message};

use crate::codec::{Frame, FrameFormat};
use crate::error::Result;

/// Serialize a message into a frame of the given format.
pub fn encode_message(format: FrameFormat, message: &Message) -> Result<Frame> {
    let payload = match format {
        FrameFormat::U64Json => message.to_bytes()?,
        FrameFormat::Json => json::message_to_json(message)?,
    };
    Ok(Frame::new(format, Bytes::from(payload)))
}

/// Parse the message carried by a frame.
pub fn decode_message(frame: &Frame) -> Result<Message> {
    let message = match frame.format {
        FrameFormat::U64Json => Message::from_bytes(&frame.payload)?,
        FrameFormat::Json => json::message_from_json(&frame.payload)?,
    };
    Ok(message)
}
