use std::os::unix::net::UnixStream;
use std::path::Path;

use tracing::debug;

use crate::error::{Result, TransportError};
use crate::stream::RpcStream;

/// Connect to a listening Unix domain socket (blocking).
pub fn connect_unix(path: impl AsRef<Path>) -> Result<RpcStream> {
    let path = path.as_ref();
    let stream = UnixStream::connect(path).map_err(|source| TransportError::Connect {
        addr: path.display().to_string(),
        source,
    })?;
    debug!(?path, "connected unix domain socket");
    Ok(RpcStream::from(stream))
}

/// Create a connected pair of local streams.
///
/// Used when a launcher hands one end of a socketpair to the simulator and
/// keeps the other for the client.
pub fn pair() -> Result<(RpcStream, RpcStream)> {
    let (left, right) = UnixStream::pair()?;
    Ok((RpcStream::from(left), RpcStream::from(right)))
}
