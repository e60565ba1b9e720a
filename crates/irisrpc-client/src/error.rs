use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use irisrpc_u64json::{ErrorObject, Value};

use crate::codes;

/// An error response: returned by the peer, or produced by a local handler.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

impl RemoteError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Symbolic name of the error code.
    pub fn code_name(&self) -> String {
        codes::describe(self.code)
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code_name())?;
        if let Some(data) = &self.data {
            write!(f, " {data}")?;
        }
        Ok(())
    }
}

impl std::error::Error for RemoteError {}

impl From<ErrorObject> for RemoteError {
    fn from(err: ErrorObject) -> Self {
        Self {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}

impl From<RemoteError> for ErrorObject {
    fn from(err: RemoteError) -> Self {
        ErrorObject {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}

/// Errors that can occur in client operations.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// Transport-level error (socket connect or I/O).
    #[error("transport error: {0}")]
    Transport(#[from] irisrpc_transport::TransportError),

    /// Frame-level or codec-level error.
    #[error("protocol error: {0}")]
    Protocol(#[from] irisrpc_frame::FrameError),

    /// The peer answered with an error response.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// No response arrived in time. The request stays in flight on the wire.
    #[error("no response to request {id:#x} within {after:?}")]
    Timeout { id: u64, after: Duration },

    /// The client is not connected, or the connection dropped.
    #[error("not connected: {0}")]
    NotConnected(String),

    /// A forced disconnect aborted a connect that was still in progress.
    #[error("connect to {0} cancelled by disconnect")]
    Cancelled(String),

    /// `connect` was called on a connected client.
    #[error("already connected to {0}")]
    AlreadyConnected(String),

    /// Format negotiation failed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// A file to be served as an image could not be opened.
    #[error("cannot open image {}: {source}", .path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A handler with this name is already registered.
    #[error("a function named {0} is already published")]
    HandlerExists(String),
}

impl RpcError {
    /// Error code equivalent, as reported to a remote caller.
    pub fn code(&self) -> i64 {
        match self {
            RpcError::Remote(err) => err.code,
            RpcError::Timeout { .. } => codes::E_NO_RESPONSE_YET,
            RpcError::NotConnected(_) | RpcError::Cancelled(_) => codes::E_NOT_CONNECTED,
            RpcError::AlreadyConnected(_) => codes::E_ALREADY_CONNECTED,
            RpcError::Handshake(_) => codes::E_NOT_COMPATIBLE,
            RpcError::Image { .. } => codes::E_IO_ERROR,
            RpcError::Transport(irisrpc_transport::TransportError::Connect { .. }) => {
                codes::E_CONNECTION_REFUSED
            }
            _ => codes::E_INTERNAL_ERROR,
        }
    }
}

/// Nested calls made from inside a handler surface as error responses.
impl From<RpcError> for RemoteError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Remote(remote) => remote,
            other => RemoteError::new(other.code(), other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;
