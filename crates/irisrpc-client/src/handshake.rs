//! Message format negotiation.
//!
//! Before any frame is exchanged the client sends an HTTP-like block
//!
//! ```text
//! CONNECT / IrisRpc/1.0\r\n
//! Supported-Formats: IrisU64Json, IrisJson\r\n
//! \r\n
//! ```
//!
//! and the target answers with a header block, also terminated by an empty
//! line, that names the format it picked. The client uses the first of its
//! own formats that appears anywhere in the reply.

use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use irisrpc_frame::{FrameFormat, FrameWriter};
use irisrpc_transport::TransportError;

use crate::error::{Result, RpcError};

/// Protocol token of the CONNECT line.
pub const PROTOCOL: &str = "IrisRpc/1.0";

const TERMINATOR: &[u8] = b"\r\n\r\n";
const FORMATS_HEADER: &str = "supported-formats:";

/// Configuration for handshake negotiation.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Formats offered (client) or accepted (server), most preferred first.
    pub formats: Vec<FrameFormat>,
    /// Deadline for receiving the peer's header block.
    pub timeout: Duration,
    /// Largest header block accepted from the peer.
    pub max_header_size: usize,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            formats: FrameFormat::ALL.to_vec(),
            timeout: Duration::from_secs(1),
            max_header_size: 16 * 1024,
        }
    }
}

/// Result of a successful client handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResult {
    /// Format used for every frame this client sends.
    pub format: FrameFormat,
    /// The target's header block, without the terminating empty line.
    pub reply: String,
}

/// The CONNECT block offering `formats`.
pub fn connect_request(formats: &[FrameFormat]) -> String {
    let names: Vec<&str> = formats.iter().map(|f| f.name()).collect();
    format!(
        "CONNECT / {PROTOCOL}\r\nSupported-Formats: {}\r\n\r\n",
        names.join(", ")
    )
}

/// First of `formats` whose name occurs in `reply`.
pub fn choose_format(reply: &str, formats: &[FrameFormat]) -> Option<FrameFormat> {
    formats.iter().copied().find(|f| reply.contains(f.name()))
}

/// Perform the client side of the handshake.
///
/// Reads the reply one byte at a time so no frame bytes that follow the
/// header block are consumed.
pub fn handshake_client<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut FrameWriter<W>,
    config: &HandshakeConfig,
) -> Result<HandshakeResult> {
    if config.formats.is_empty() {
        return Err(RpcError::Handshake("no message formats offered".to_string()));
    }

    writer.send_raw(connect_request(&config.formats).as_bytes())?;

    let reply = read_header_block(reader, config)?;
    let format = choose_format(&reply, &config.formats).ok_or_else(|| {
        RpcError::Handshake(format!(
            "target is not compatible with formats {}",
            format_list(&config.formats)
        ))
    })?;

    Ok(HandshakeResult { format, reply })
}

/// Perform the target side of the handshake and return the chosen format.
///
/// The client's preference order wins among the formats in `config`. When
/// nothing matches, a reply naming no format is sent and the handshake fails.
pub fn handshake_server<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut FrameWriter<W>,
    config: &HandshakeConfig,
) -> Result<FrameFormat> {
    let request = read_header_block(reader, config)?;
    let mut lines = request.lines();

    let request_line = lines.next().unwrap_or_default();
    if request_line.trim() != format!("CONNECT / {PROTOCOL}") {
        writer.send_raw(format!("{PROTOCOL} 400 Bad Request\r\n\r\n").as_bytes())?;
        return Err(RpcError::Handshake(format!(
            "unexpected request line '{request_line}'"
        )));
    }

    let offered: Vec<FrameFormat> = lines
        .filter_map(|line| {
            let lower = line.to_ascii_lowercase();
            lower
                .starts_with(FORMATS_HEADER)
                .then(|| line[FORMATS_HEADER.len()..].to_string())
        })
        .flat_map(|csv| {
            csv.split(',')
                .filter_map(|name| name.trim().parse().ok())
                .collect::<Vec<FrameFormat>>()
        })
        .collect();

    match offered.into_iter().find(|f| config.formats.contains(f)) {
        Some(format) => {
            writer.send_raw(
                format!("{PROTOCOL} 101 Switching Protocols\r\nSelected-Format: {format}\r\n\r\n")
                    .as_bytes(),
            )?;
            Ok(format)
        }
        None => {
            writer.send_raw(format!("{PROTOCOL} 406 Not Acceptable\r\n\r\n").as_bytes())?;
            Err(RpcError::Handshake(format!(
                "client offers none of {}",
                format_list(&config.formats)
            )))
        }
    }
}

fn read_header_block<R: Read>(reader: &mut R, config: &HandshakeConfig) -> Result<String> {
    let deadline = Instant::now().checked_add(config.timeout);
    let mut block = Vec::with_capacity(256);
    let mut byte = [0u8; 1];

    loop {
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(RpcError::Handshake(format!(
                "no handshake reply within {:?}",
                config.timeout
            )));
        }

        match reader.read(&mut byte) {
            Ok(0) => {
                return Err(RpcError::NotConnected(
                    "connection closed during handshake".to_string(),
                ))
            }
            Ok(_) => {
                block.push(byte[0]);
                if block.ends_with(TERMINATOR) {
                    block.truncate(block.len() - TERMINATOR.len());
                    return Ok(String::from_utf8_lossy(&block).into_owned());
                }
                if block.len() > config.max_header_size {
                    return Err(RpcError::Handshake(format!(
                        "handshake header larger than {} bytes",
                        config.max_header_size
                    )));
                }
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut => {
                continue
            }
            Err(err) => return Err(RpcError::Transport(TransportError::Io(err))),
        }
    }
}

fn format_list(formats: &[FrameFormat]) -> String {
    formats
        .iter()
        .map(|f| f.name())
        .collect::<Vec<_>>()
        .join(", ")
}
