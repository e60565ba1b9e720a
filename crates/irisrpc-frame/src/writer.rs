use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use irisrpc_u64json::Message;

use crate::codec::{encode_frame, Frame, FrameConfig, FrameFormat};
use crate::error::{FrameError, Result};
use crate::message::encode_message;

/// Puts whole frames onto a byte stream.
///
/// A frame is assembled in an internal buffer and written out completely
/// before `send` returns. Callers sharing one writer behind a mutex
/// therefore never interleave bytes of two frames.
pub struct FrameWriter<T> {
    inner: T,
    scratch: BytesMut,
    max_payload: usize,
}

impl<T: Write> FrameWriter<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            scratch: BytesMut::new(),
            max_payload: config.max_payload_size,
        }
    }

    /// Encode `message` in `format` and send it as one frame.
    pub fn send_message(&mut self, format: FrameFormat, message: &Message) -> Result<()> {
        let frame = encode_message(format, message)?;
        self.write_frame(&frame)
    }

    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.send(frame.format, frame.payload.as_ref())
    }

    /// Frame `payload` and send it.
    pub fn send(&mut self, format: FrameFormat, payload: &[u8]) -> Result<()> {
        if payload.len() > self.max_payload {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_payload,
            });
        }

        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.clear();
        encode_frame(format, payload, &mut scratch)?;
        let written = self.write_all(&scratch);
        self.scratch = scratch;
        written
    }

    /// Send bytes as they are, outside any frame. Used for handshake lines.
    pub fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_all(bytes)
    }

    fn write_all(&mut self, mut bytes: &[u8]) -> Result<()> {
        while !bytes.is_empty() {
            match self.inner.write(bytes) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => bytes = &bytes[n..],
                Err(err) if retryable(&err) => {}
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if retryable(&err) => {}
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

fn retryable(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock)
}
