use std::net::{TcpStream, ToSocketAddrs};
use std::ops::Range;
use std::time::Duration;

use tracing::debug;

use crate::error::{Result, TransportError};
use crate::stream::RpcStream;

/// Ports scanned when a client is asked to connect to port 0.
pub const DEFAULT_PORT_RANGE: Range<u16> = 7100..7110;

/// Connect to a TCP target, trying every resolved address in turn.
///
/// Each attempt is bounded by `timeout`. Nagle is disabled because RPC
/// frames are small and latency-bound.
pub fn connect_tcp(host: &str, port: u16, timeout: Duration) -> Result<RpcStream> {
    let addr = format!("{host}:{port}");
    let candidates = (host, port)
        .to_socket_addrs()
        .map_err(|source| TransportError::Connect {
            addr: addr.clone(),
            source,
        })?;

    let mut last_err = None;
    for candidate in candidates {
        match TcpStream::connect_timeout(&candidate, timeout) {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                debug!(%candidate, "connected tcp stream");
                return Ok(RpcStream::from(stream));
            }
            Err(err) => {
                debug!(%candidate, error = %err, "tcp connect attempt failed");
                last_err = Some(err);
            }
        }
    }

    match last_err {
        Some(source) => Err(TransportError::Connect { addr, source }),
        None => Err(TransportError::Resolve(addr)),
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;

    use super::*;

    #[test]
    fn connects_to_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 5];
            stream.read_exact(&mut buf).unwrap();
            buf
        });

        let mut stream = connect_tcp("127.0.0.1", port, Duration::from_secs(1)).unwrap();
        stream.write_all(b"hello").unwrap();
        assert_eq!(&server.join().unwrap(), b"hello");
        assert!(stream.peer_label().contains(&port.to_string()));
    }

    #[test]
    fn refused_connection_is_a_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = connect_tcp("127.0.0.1", port, Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
    }
}
