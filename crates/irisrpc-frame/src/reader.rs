use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use tracing::{trace, warn};

use crate::codec::{decode_frame, resync, Frame, FrameConfig};
use crate::error::{FrameError, Result};

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Pulls frames of either format off a byte stream.
///
/// Bytes that cannot start a frame are discarded up to the next header
/// token; each such skip is one resync event. An I/O error (typically a
/// read timeout on a socket) leaves the partially received frame buffered,
/// so the next call carries on where this one stopped.
pub struct FrameReader<T> {
    inner: T,
    pending: BytesMut,
    max_payload: usize,
    resync_events: u64,
    skipped_bytes: u64,
}

impl<T: Read> FrameReader<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            pending: BytesMut::with_capacity(READ_CHUNK_SIZE),
            max_payload: config.max_payload_size,
            resync_events: 0,
            skipped_bytes: 0,
        }
    }

    /// Block until one whole frame is available.
    ///
    /// End of stream yields [`FrameError::ConnectionClosed`], also when it
    /// cuts a frame short.
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.take_buffered()? {
                return Ok(frame);
            }
            self.fill()?;
        }
    }

    /// Decode from what is already buffered, skipping garbage on the way.
    fn take_buffered(&mut self) -> Result<Option<Frame>> {
        loop {
            match decode_frame(&mut self.pending, self.max_payload) {
                Err(err) if err.is_desync() => {
                    let skipped = resync(&mut self.pending);
                    self.resync_events += 1;
                    self.skipped_bytes += skipped as u64;
                    warn!(error = %err, skipped, "skipping bytes up to the next frame header");
                }
                other => return other,
            }
        }
    }

    /// Append one read's worth of bytes to the buffer.
    fn fill(&mut self) -> Result<()> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let n = loop {
            match self.inner.read(&mut chunk) {
                Ok(n) => break n,
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(FrameError::Io(err)),
            }
        };
        if n == 0 {
            if !self.pending.is_empty() {
                trace!(buffered = self.pending.len(), "stream ended inside a frame");
            }
            return Err(FrameError::ConnectionClosed);
        }
        self.pending.extend_from_slice(&chunk[..n]);
        Ok(())
    }

    /// How many times garbage was skipped.
    pub fn resync_events(&self) -> u64 {
        self.resync_events
    }

    /// Total bytes discarded while resynchronizing.
    pub fn skipped_bytes(&self) -> u64 {
        self.skipped_bytes
    }

    /// Bytes received but not yet returned as part of a frame.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}
