/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The buffer does not start with a well-formed frame header.
    #[error("stream out of sync: {0}")]
    Desync(String),

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The frame payload is not a valid message.
    #[error("invalid frame payload: {0}")]
    Codec(#[from] irisrpc_u64json::CodecError),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed.
    #[error("connection closed")]
    ConnectionClosed,
}

impl FrameError {
    /// True for errors the reader handles by scanning for the next header.
    pub fn is_desync(&self) -> bool {
        matches!(
            self,
            FrameError::Desync(_) | FrameError::PayloadTooLarge { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
