use std::fmt;
use std::str::FromStr;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Header token of a binary frame.
pub const U64JSON_HEADER: &[u8] = b"IrisU64Json:";

/// Header token of a textual frame.
pub const JSON_HEADER: &[u8] = b"IrisJson:";

/// Binary header: token (12) + length (4) = 16 bytes.
const U64JSON_PREFIX_SIZE: usize = U64JSON_HEADER.len() + 4;

/// Longest decimal length accepted in a textual header.
const MAX_LENGTH_DIGITS: usize = 20;

/// Byte written after every binary payload.
const PAD_BYTE: u8 = b'\n';

/// Default maximum payload size: 256 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 256 * 1024 * 1024;

/// Wire format of a frame, also the token negotiated during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameFormat {
    /// Binary U64Json payloads.
    U64Json,
    /// Textual JSON payloads.
    Json,
}

impl FrameFormat {
    /// All formats, most preferred first.
    pub const ALL: [FrameFormat; 2] = [FrameFormat::U64Json, FrameFormat::Json];

    /// Name used in the handshake.
    pub fn name(self) -> &'static str {
        match self {
            FrameFormat::U64Json => "IrisU64Json",
            FrameFormat::Json => "IrisJson",
        }
    }

    /// Header token that starts every frame of this format.
    pub fn header(self) -> &'static [u8] {
        match self {
            FrameFormat::U64Json => U64JSON_HEADER,
            FrameFormat::Json => JSON_HEADER,
        }
    }
}

impl fmt::Display for FrameFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FrameFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        FrameFormat::ALL
            .into_iter()
            .find(|format| format.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown frame format: {s}"))
    }
}

/// One framed message.
#[derive(Debug, Clone)]
pub struct Frame {
    /// The format the payload is encoded in.
    pub format: FrameFormat,
    /// The message payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(format: FrameFormat, payload: impl Into<Bytes>) -> Self {
        Self {
            format,
            payload: payload.into(),
        }
    }

    /// The total wire size of this frame (header + payload + trailer).
    pub fn wire_size(&self) -> usize {
        let len = self.payload.len();
        match self.format {
            FrameFormat::U64Json => U64JSON_PREFIX_SIZE + len + 1,
            FrameFormat::Json => JSON_HEADER.len() + len.to_string().len() + 1 + len + 1,
        }
    }
}

/// Encode a frame into the wire format.
///
/// Wire formats:
/// ```text
/// ┌──────────────┬────────────┬──────────────────┬──────────┐
/// │ IrisU64Json: │ Length     │ Payload          │ Pad (1B) │
/// │              │ (4B LE)    │ (Length bytes)   │ "\n"     │
/// └──────────────┴────────────┴──────────────────┴──────────┘
/// ┌──────────────┬────────────┬─────┬──────────────────┬──────┐
/// │ IrisJson:    │ Length     │ ":" │ Payload          │ "\n" │
/// │              │ (decimal)  │     │ (Length bytes)   │      │
/// └──────────────┴────────────┴─────┴──────────────────┴──────┘
/// ```
pub fn encode_frame(format: FrameFormat, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    match format {
        FrameFormat::U64Json => {
            if payload.len() > u32::MAX as usize {
                return Err(FrameError::PayloadTooLarge {
                    size: payload.len(),
                    max: u32::MAX as usize,
                });
            }
            dst.reserve(U64JSON_PREFIX_SIZE + payload.len() + 1);
            dst.put_slice(U64JSON_HEADER);
            dst.put_u32_le(payload.len() as u32);
            dst.put_slice(payload);
            dst.put_u8(PAD_BYTE);
        }
        FrameFormat::Json => {
            let len = payload.len().to_string();
            dst.reserve(JSON_HEADER.len() + len.len() + payload.len() + 2);
            dst.put_slice(JSON_HEADER);
            dst.put_slice(len.as_bytes());
            dst.put_u8(b':');
            dst.put_slice(payload);
            dst.put_u8(b'\n');
        }
    }
    Ok(())
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer. On
/// [`FrameError::Desync`] nothing is consumed; call [`resync`] to skip to
/// the next header.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    if src.is_empty() {
        return Ok(None);
    }
    if src.starts_with(U64JSON_HEADER) {
        return decode_u64json(src, max_payload);
    }
    if src.starts_with(JSON_HEADER) {
        return decode_json(src, max_payload);
    }
    if is_header_candidate(src) {
        return Ok(None); // Partial header
    }
    Err(FrameError::Desync(format!(
        "unexpected byte 0x{:02x} where a frame header should start",
        src[0]
    )))
}

fn decode_u64json(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    if src.len() < U64JSON_PREFIX_SIZE {
        return Ok(None);
    }
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&src[U64JSON_HEADER.len()..U64JSON_PREFIX_SIZE]);
    let payload_len = u32::from_le_bytes(len_bytes) as usize;

    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    let total = U64JSON_PREFIX_SIZE + payload_len + 1;
    if src.len() < total {
        return Ok(None);
    }

    src.advance(U64JSON_PREFIX_SIZE);
    let payload = src.split_to(payload_len).freeze();
    src.advance(1);

    Ok(Some(Frame::new(FrameFormat::U64Json, payload)))
}

fn decode_json(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    let digits_start = JSON_HEADER.len();
    let rest = &src[digits_start..];
    let Some(colon) = rest.iter().position(|b| !b.is_ascii_digit()) else {
        if rest.len() > MAX_LENGTH_DIGITS {
            return Err(FrameError::Desync("IrisJson length too long".to_string()));
        }
        return Ok(None);
    };
    if rest[colon] != b':' {
        return Err(FrameError::Desync(
            "garbage in IrisJson length field".to_string(),
        ));
    }
    if colon == 0 || colon > MAX_LENGTH_DIGITS {
        return Err(FrameError::Desync("invalid IrisJson length".to_string()));
    }

    let payload_len: usize = std::str::from_utf8(&rest[..colon])
        .ok()
        .and_then(|digits| digits.parse().ok())
        .ok_or_else(|| FrameError::Desync("invalid IrisJson length".to_string()))?;
    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    let prefix = digits_start + colon + 1;
    let total = prefix + payload_len + 1;
    if src.len() < total {
        return Ok(None);
    }
    if src[total - 1] != b'\n' {
        return Err(FrameError::Desync(
            "missing line feed after IrisJson payload".to_string(),
        ));
    }

    src.advance(prefix);
    let payload = src.split_to(payload_len).freeze();
    src.advance(1);

    Ok(Some(Frame::new(FrameFormat::Json, payload)))
}

/// Drop bytes up to the next plausible frame header.
///
/// Always discards at least one byte of a non-empty buffer. A trailing
/// partial header is kept so a header split across reads is not lost.
/// Returns the number of bytes discarded.
pub fn resync(src: &mut BytesMut) -> usize {
    let skip = (1..src.len())
        .find(|&i| is_header_candidate(&src[i..]))
        .unwrap_or(src.len());
    src.advance(skip);
    skip
}

/// True if `bytes` starts with a frame header or is a prefix of one.
fn is_header_candidate(bytes: &[u8]) -> bool {
    [U64JSON_HEADER, JSON_HEADER]
        .iter()
        .any(|header| bytes.starts_with(header) || header.starts_with(bytes))
}

/// Limits applied by [`FrameReader`](crate::FrameReader) and
/// [`FrameWriter`](crate::FrameWriter).
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Largest payload accepted or sent. Longer frames count as garbage.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u64json_roundtrip() {
        let mut buf = BytesMut::new();
        let payload = [5u8, 0, 0, 0, 0, 0, 0, 0];

        encode_frame(FrameFormat::U64Json, &payload, &mut buf).unwrap();

        assert_eq!(&buf[..12], b"IrisU64Json:");
        assert_eq!(&buf[12..16], &[8, 0, 0, 0]);
        assert_eq!(buf[buf.len() - 1], b'\n');
        assert_eq!(buf.len(), 16 + payload.len() + 1);

        let frame = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();

        assert_eq!(frame.format, FrameFormat::U64Json);
        assert_eq!(frame.payload.as_ref(), payload);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_json_roundtrip() {
        let mut buf = BytesMut::new();
        let payload = br#"{"id":1}"#;

        encode_frame(FrameFormat::Json, payload, &mut buf).unwrap();
        assert_eq!(buf.as_ref(), b"IrisJson:8:{\"id\":1}\n");

        let frame = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();
        assert_eq!(frame.format, FrameFormat::Json);
        assert_eq!(frame.payload.as_ref(), payload);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_incomplete_header() {
        for partial in [&b"Iri"[..], b"IrisU64Json:", b"IrisU64Json:\x08\x00", b"IrisJson:12"] {
            let mut buf = BytesMut::from(partial);
            assert!(decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().is_none());
            assert_eq!(buf.len(), partial.len());
        }
    }

    #[test]
    fn test_decode_incomplete_payload() {
        for format in FrameFormat::ALL {
            let mut buf = BytesMut::new();
            encode_frame(format, b"hello", &mut buf).unwrap();
            buf.truncate(buf.len() - 1); // Drop the trailer

            let result = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap();
            assert!(result.is_none());
        }
    }

    #[test]
    fn test_decode_garbage_is_desync() {
        let mut buf = BytesMut::from(&b"xxIrisJson:1:a\n"[..]);
        let result = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD);
        assert!(matches!(result, Err(FrameError::Desync(_))));
        assert_eq!(buf.len(), 15);
    }

    #[test]
    fn test_decode_bad_json_header() {
        for bad in [&b"IrisJson:12x:"[..], b"IrisJson::abc\n", b"IrisJson:3:abcX"] {
            let mut buf = BytesMut::from(bad);
            let result = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD);
            assert!(matches!(result, Err(FrameError::Desync(_))), "{bad:?}");
        }
    }

    #[test]
    fn test_decode_payload_too_large() {
        let mut buf = BytesMut::new();
        buf.put_slice(U64JSON_HEADER);
        buf.put_u32_le(1024 * 1024);

        let result = decode_frame(&mut buf, 1024);
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { .. })));

        let mut buf = BytesMut::from(&b"IrisJson:4096:"[..]);
        let result = decode_frame(&mut buf, 1024);
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { .. })));
    }

    #[test]
    fn test_multiple_frames_mixed_formats() {
        let mut buf = BytesMut::new();
        encode_frame(FrameFormat::U64Json, b"first\0\0\0", &mut buf).unwrap();
        encode_frame(FrameFormat::Json, b"\"second\"", &mut buf).unwrap();

        let f1 = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();
        assert_eq!(f1.format, FrameFormat::U64Json);
        assert_eq!(f1.payload.as_ref(), b"first\0\0\0");

        let f2 = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();
        assert_eq!(f2.format, FrameFormat::Json);
        assert_eq!(f2.payload.as_ref(), b"\"second\"");

        assert!(buf.is_empty());
    }

    #[test]
    fn test_empty_payload() {
        let mut buf = BytesMut::new();
        encode_frame(FrameFormat::U64Json, b"", &mut buf).unwrap();

        let frame = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();
        assert!(frame.payload.is_empty());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_resync_skips_to_next_header() {
        let mut buf = BytesMut::from(&b"garbage!IrisJson:1:a\n"[..]);
        assert_eq!(resync(&mut buf), 8);
        let frame = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();
        assert_eq!(frame.payload.as_ref(), b"a");
    }

    #[test]
    fn test_resync_skips_broken_header() {
        let mut buf = BytesMut::from(&b"IrisJson:zz:IrisJson:1:b\n"[..]);
        assert!(decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).is_err());
        resync(&mut buf);
        let frame = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();
        assert_eq!(frame.payload.as_ref(), b"b");
    }

    #[test]
    fn test_resync_keeps_partial_header() {
        let mut buf = BytesMut::from(&b"noise noise IrisU6"[..]);
        assert_eq!(resync(&mut buf), 12);
        assert_eq!(buf.as_ref(), b"IrisU6");

        let mut buf = BytesMut::from(&b"no header here"[..]);
        assert_eq!(resync(&mut buf), 14);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_frame_wire_size() {
        let frame = Frame::new(FrameFormat::U64Json, Bytes::from_static(b"testtest"));
        assert_eq!(frame.wire_size(), 16 + 8 + 1);
        let frame = Frame::new(FrameFormat::Json, Bytes::from_static(b"1234567890"));
        assert_eq!(frame.wire_size(), "IrisJson:10:1234567890\n".len());
    }

    #[test]
    fn test_format_names() {
        assert_eq!("IrisU64Json".parse::<FrameFormat>().unwrap(), FrameFormat::U64Json);
        assert_eq!("irisjson".parse::<FrameFormat>().unwrap(), FrameFormat::Json);
        assert!("IrisXml".parse::<FrameFormat>().is_err());
        assert_eq!(FrameFormat::Json.to_string(), "IrisJson");
    }
}
