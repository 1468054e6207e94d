//! Payload classification for diagnostic logging.
//!
//! The relay never interprets RTSP; it only peeks at the first bytes of a
//! read so the logs show which part of a stream handshake went where.

use std::borrow::Cow;

const RTSP_PREFIXES: &[&[u8]] = &[
    b"RTSP/",
    b"OPTIONS ",
    b"DESCRIBE ",
    b"SETUP ",
    b"PLAY ",
    b"PAUSE ",
    b"TEARDOWN ",
    b"RECORD ",
    b"ANNOUNCE ",
    b"REDIRECT ",
    b"GET_PARAMETER ",
    b"SET_PARAMETER ",
];

/// Longest RTSP excerpt written to the log.
pub const RTSP_PREVIEW_LEN: usize = 150;

/// Payloads of unknown type are only logged above this size.
pub const BINARY_LOG_THRESHOLD: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// An RTSP request or response line.
    Rtsp,
    /// RTP/RTCP interleaved in the RTSP connection (`$`, channel, u16 length).
    InterleavedRtp { channel: u8, length: u16 },
    Binary,
}

pub fn classify(data: &[u8]) -> PayloadKind {
    if RTSP_PREFIXES.iter().any(|prefix| data.starts_with(prefix)) {
        return PayloadKind::Rtsp;
    }
    if let [b'$', channel, hi, lo, ..] = data {
        return PayloadKind::InterleavedRtp {
            channel: *channel,
            length: u16::from_be_bytes([*hi, *lo]),
        };
    }
    PayloadKind::Binary
}

/// First [`RTSP_PREVIEW_LEN`] bytes as text with CR/LF made visible.
pub fn rtsp_preview(data: &[u8]) -> String {
    let end = data.len().min(RTSP_PREVIEW_LEN);
    let text: Cow<'_, str> = String::from_utf8_lossy(&data[..end]);
    text.replace('\r', "\\r").replace('\n', "\\n")
}
