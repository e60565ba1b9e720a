/// Errors that can occur while encoding or decoding U64Json.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The buffer ended before the value it announces.
    #[error("truncated U64Json data: need {needed} words at offset {offset}, have {available}")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// The leading bits of a value do not name a known encoding.
    #[error("invalid U64Json tag 0x{tag:x} at offset {offset}")]
    InvalidTag { tag: u64, offset: usize },

    /// A message envelope carries an unsupported version byte.
    #[error("invalid U64Json message version 0x{0:02x}")]
    InvalidMessageVersion(u8),

    /// A container's declared length disagrees with its contents.
    #[error("inconsistent container length at offset {offset}: declared {declared}, used {used}")]
    ContainerLength {
        offset: usize,
        declared: usize,
        used: usize,
    },

    /// An object member name is not a string.
    #[error("object member name at offset {0} is not a string")]
    InvalidKey(usize),

    /// String data is not valid UTF-8.
    #[error("string is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// A length does not fit into the bits reserved for it.
    #[error("length {len} exceeds the {bits}-bit field of the encoding")]
    LengthOverflow { len: usize, bits: u32 },

    /// Containers are nested deeper than the codec accepts.
    #[error("containers nested too deeply at offset {offset}")]
    TooDeep { offset: usize },

    /// An integer lies outside both the unsigned and signed 64-bit ranges.
    #[error("integer {0} is out of range for U64Json")]
    IntegerOutOfRange(i128),

    /// A byte payload is not a whole number of 64-bit words.
    #[error("payload of {0} bytes is not a multiple of 8")]
    UnalignedPayload(usize),

    /// A value does not have the shape of a JSON-RPC message.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Textual JSON error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CodecError>;
