//! Byte-stream transports for the Iris RPC client.
//!
//! Provides a unified interface over the streams a debug target can be
//! reached on:
//! - TCP sockets (the usual `host:port` attachment)
//! - Unix domain sockets (a channel handed over by a launcher)
//!
//! This is the lowest layer of irisrpc. Everything else builds on top of
//! the [`RpcStream`] type provided here.

pub mod error;
pub mod stream;
pub mod tcp;

#[cfg(unix)]
pub mod unix;

pub use error::{Result, TransportError};
pub use stream::RpcStream;
pub use tcp::{connect_tcp, DEFAULT_PORT_RANGE};

#[cfg(unix)]
pub use unix::{connect_unix, pair};
