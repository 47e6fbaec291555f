//! Server-to-client WebSocket frame encoding.
//!
//! Only the subset of RFC 6455 the reload server needs: a single unfragmented,
//! unmasked text frame. Client frames are never decoded.

use std::sync::Arc;

/// FIN=1, RSV1-3=0, opcode=0x1 (text).
const FIN_TEXT: u8 = 0b1000_0001;

/// Largest payload length that fits in the 7-bit length field.
const MAX_SHORT_LEN: usize = 125;

/// Marker for a 16-bit extended payload length.
const EXTENDED_16: u8 = 126;

/// Marker for a 64-bit extended payload length.
const EXTENDED_64: u8 = 127;

/// Payload sent to every client when a watched file changes.
pub const RELOAD_MESSAGE: &str = "RELOAD";

/// Encode `payload` as a single server-to-client text frame.
///
/// Server frames are never masked, so the result is the 2-byte header, an
/// optional 2- or 8-byte big-endian length extension, then the raw payload.
pub fn encode_text_frame(payload: &[u8]) -> Vec<u8> {
    let len = payload.len();
    let mut frame = Vec::with_capacity(header_len(len) + len);
    frame.push(FIN_TEXT);

    if len <= MAX_SHORT_LEN {
        // Fits in the 7-bit field after the check above.
        #[allow(clippy::cast_possible_truncation)]
        frame.push(len as u8);
    } else if let Ok(short) = u16::try_from(len) {
        frame.push(EXTENDED_16);
        frame.extend_from_slice(&short.to_be_bytes());
    } else {
        frame.push(EXTENDED_64);
        frame.extend_from_slice(&(len as u64).to_be_bytes());
    }

    frame.extend_from_slice(payload);
    frame
}

/// Header size in bytes for a payload of `len` bytes.
fn header_len(len: usize) -> usize {
    if len <= MAX_SHORT_LEN {
        2
    } else if len <= usize::from(u16::MAX) {
        4
    } else {
        10
    }
}

/// Precomputed frame carrying [`RELOAD_MESSAGE`].
///
/// Built once per server and shared by every broadcast; cloning only bumps a
/// reference count.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReloadFrame(Arc<[u8]>);

impl ReloadFrame {
    #[must_use]
    pub fn new() -> Self {
        Self(encode_text_frame(RELOAD_MESSAGE.as_bytes()).into())
    }

    /// Encoded frame bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Default for ReloadFrame {
    fn default() -> Self {
        Self::new()
    }
}
