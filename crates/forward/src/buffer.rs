use bytes::{Bytes, BytesMut};

/// Upper bound on bytes held for a client whose camera is not connected yet.
pub const PRE_CONNECT_CAP: usize = 32 * 1024;

/// How much of the newest data survives an overflow.
pub const PRE_CONNECT_KEEP: usize = 16 * 1024;

/// Client bytes received before the outbound connection exists.
///
/// RTSP clients send their first request immediately after connecting, often
/// before the relay has reached the camera. Those bytes are held here and
/// flushed ahead of anything else once the camera answers. When the buffer
/// exceeds [`PRE_CONNECT_CAP`], only the newest [`PRE_CONNECT_KEEP`] bytes
/// are kept.
#[derive(Debug, Default)]
pub struct PreConnectBuffer {
    buf: BytesMut,
    discarded: u64,
}

impl PreConnectBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `data`. Returns the number of old bytes discarded to stay under
    /// the cap (0 when nothing was dropped).
    pub fn push(&mut self, data: &[u8]) -> usize {
        self.buf.extend_from_slice(data);
        if self.buf.len() <= PRE_CONNECT_CAP {
            return 0;
        }
        let excess = self.buf.len() - PRE_CONNECT_KEEP;
        let _ = self.buf.split_to(excess);
        self.discarded += excess as u64;
        excess
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Total bytes dropped by overflows so far.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Hand over everything buffered, leaving the buffer empty.
    pub fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }
}
