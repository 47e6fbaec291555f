//! WebSocket opening handshake.
//!
//! Turns the raw bytes of an HTTP upgrade request into the `101 Switching
//! Protocols` response. Parsing is deliberately small: a request line whose
//! method is exactly `GET`, then `Name: value` header lines up to the first
//! blank line. Lines may end in `\r\n` or a bare `\n`. Anything outside that
//! shape is rejected rather than interpreted.

use std::collections::HashMap;

use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use sha1::{Digest, Sha1};

/// GUID appended to the client key before hashing (RFC 6455, section 1.3).
const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Upper bound on buffered request bytes before the headers must terminate.
pub const MAX_REQUEST_BYTES: usize = 8 * 1024;

const KEY_HEADER: &str = "sec-websocket-key";

/// Reasons a buffer did not produce a handshake response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    /// The bytes do not start with `GET`; they are client data, not an upgrade.
    #[error("not an upgrade request")]
    NotUpgrade,
    /// A `GET` request whose headers have not fully arrived yet.
    #[error("upgrade request is incomplete")]
    Incomplete,
    /// The request carries no `Sec-WebSocket-Key` header.
    #[error("missing Sec-WebSocket-Key header")]
    MissingKey,
    /// The request is not valid UTF-8, has a broken request line or header, or is too large.
    #[error("malformed upgrade request")]
    Malformed,
}

/// Parsed upgrade request.
#[derive(Debug)]
struct UpgradeRequest {
    /// Header names lowercased, values trimmed.
    headers: HashMap<String, String>,
}

impl UpgradeRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Process `raw` as an opening handshake and produce the response bytes.
///
/// # Errors
///
/// - [`HandshakeError::NotUpgrade`] when `raw` does not begin with `GET`
/// - [`HandshakeError::Incomplete`] when more bytes are needed
/// - [`HandshakeError::MissingKey`] when the key header is absent or empty
/// - [`HandshakeError::Malformed`] for anything else that is not a minimal request
pub fn try_handshake(raw: &[u8]) -> Result<Vec<u8>, HandshakeError> {
    let request = parse_request(raw)?;
    let key = request
        .header(KEY_HEADER)
        .filter(|key| !key.is_empty())
        .ok_or(HandshakeError::MissingKey)?;

    let accept = compute_accept_signature(key);
    Ok(format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\r\n"
    )
    .into_bytes())
}

/// Compute the `Sec-WebSocket-Accept` value for a client key.
pub fn compute_accept_signature(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.trim().as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    BASE64_STANDARD.encode(hasher.finalize())
}

/// Whether `raw` could still turn into a `GET` request.
fn starts_like_get(raw: &[u8]) -> bool {
    let prefix_len = raw.len().min(3);
    raw[..prefix_len] == b"GET"[..prefix_len]
}

/// Offset of the blank line that ends the header block, if it has arrived.
///
/// Lines end in `\r\n` or a bare `\n`; the returned offset excludes the final
/// line break of the last header.
fn header_end(raw: &[u8]) -> Option<usize> {
    raw.iter().enumerate().find_map(|(i, &b)| {
        if b != b'\n' {
            return None;
        }
        match &raw[i + 1..] {
            [b'\n', ..] | [b'\r', b'\n', ..] => Some(i),
            _ => None,
        }
    })
}

fn parse_request(raw: &[u8]) -> Result<UpgradeRequest, HandshakeError> {
    if !starts_like_get(raw) {
        return Err(HandshakeError::NotUpgrade);
    }

    let Some(end) = header_end(raw) else {
        return if raw.len() > MAX_REQUEST_BYTES {
            Err(HandshakeError::Malformed)
        } else {
            Err(HandshakeError::Incomplete)
        };
    };

    let head = std::str::from_utf8(&raw[..end]).map_err(|_| HandshakeError::Malformed)?;
    let mut lines = head
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line));

    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    if parts.next() != Some("GET") || parts.next().is_none() {
        return Err(HandshakeError::Malformed);
    }

    let mut headers = HashMap::new();
    for line in lines {
        let (name, value) = line.split_once(':').ok_or(HandshakeError::Malformed)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(HandshakeError::Malformed);
        }
        headers.insert(name.to_ascii_lowercase(), value.trim().to_owned());
    }

    Ok(UpgradeRequest { headers })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE_REQUEST: &str = "GET /chat HTTP/1.1\r\n\
        Host: server.example.com\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\r\n";

    #[test]
    fn test_accept_signature_reference_vector() {
        assert_eq!(
            compute_accept_signature("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_accept_signature_trims_key() {
        assert_eq!(
            compute_accept_signature("  dGhlIHNhbXBsZSBub25jZQ==\t"),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_response_is_byte_exact() {
        let response = try_handshake(SAMPLE_REQUEST.as_bytes()).unwrap();
        let expected = "HTTP/1.1 101 Switching Protocols\r\n\
            Upgrade: websocket\r\n\
            Connection: Upgrade\r\n\
            Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\r\n";
        assert_eq!(String::from_utf8(response).unwrap(), expected);
    }

    #[test]
    fn test_header_name_case_insensitive() {
        let request = "GET / HTTP/1.1\r\nsec-websocket-key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n";
        let response = try_handshake(request.as_bytes()).unwrap();
        assert!(
            String::from_utf8(response)
                .unwrap()
                .contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n")
        );
    }

    #[test]
    fn test_missing_key() {
        let request = "GET / HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\n\r\n";
        assert_eq!(
            try_handshake(request.as_bytes()),
            Err(HandshakeError::MissingKey)
        );
    }

    #[test]
    fn test_empty_key_is_missing() {
        let request = "GET / HTTP/1.1\r\nSec-WebSocket-Key:   \r\n\r\n";
        assert_eq!(
            try_handshake(request.as_bytes()),
            Err(HandshakeError::MissingKey)
        );
    }

    #[test]
    fn test_non_get_is_not_upgrade() {
        assert_eq!(
            try_handshake(b"POST / HTTP/1.1\r\n\r\n"),
            Err(HandshakeError::NotUpgrade)
        );
        assert_eq!(
            try_handshake(b"\x81\x85\x00\x00\x00\x00hello"),
            Err(HandshakeError::NotUpgrade)
        );
    }

    #[test]
    fn test_partial_request_is_incomplete() {
        assert_eq!(try_handshake(b"GE"), Err(HandshakeError::Incomplete));
        assert_eq!(
            try_handshake(b"GET / HTTP/1.1\r\nHost: localhost\r\n"),
            Err(HandshakeError::Incomplete)
        );
    }

    #[test]
    fn test_oversized_request_is_malformed() {
        let mut request = b"GET / HTTP/1.1\r\nX-Filler: ".to_vec();
        request.resize(MAX_REQUEST_BYTES + 1, b'a');
        assert_eq!(try_handshake(&request), Err(HandshakeError::Malformed));
    }

    #[test]
    fn test_header_without_colon_is_malformed() {
        let request = "GET / HTTP/1.1\r\nnot a header\r\n\r\n";
        assert_eq!(
            try_handshake(request.as_bytes()),
            Err(HandshakeError::Malformed)
        );
    }

    #[test]
    fn test_request_line_without_target_is_malformed() {
        let request = "GET\r\nSec-WebSocket-Key: abc\r\n\r\n";
        assert_eq!(
            try_handshake(request.as_bytes()),
            Err(HandshakeError::Malformed)
        );
    }

    #[test]
    fn test_bare_newline_request_completes() {
        let request = "GET / HTTP/1.1\nHost: x\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\n\n";
        let response = try_handshake(request.as_bytes()).unwrap();
        assert!(
            String::from_utf8(response)
                .unwrap()
                .contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n")
        );
    }

    #[test]
    fn test_mixed_line_endings_complete() {
        let request = "GET / HTTP/1.1\r\nHost: x\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\n";
        assert!(try_handshake(request.as_bytes()).is_ok());
    }

    #[test]
    fn test_bare_newline_partial_request_is_incomplete() {
        assert_eq!(
            try_handshake(b"GET / HTTP/1.1\nHost: x\n"),
            Err(HandshakeError::Incomplete)
        );
    }

    #[test]
    fn test_method_must_be_exactly_get() {
        let request = "GETX / HTTP/1.1\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n";
        assert_eq!(
            try_handshake(request.as_bytes()),
            Err(HandshakeError::Malformed)
        );
    }

    #[test]
    fn test_invalid_utf8_is_malformed() {
        let request = b"GET / HTTP/1.1\r\nX: \xff\xfe\r\n\r\n";
        assert_eq!(try_handshake(request), Err(HandshakeError::Malformed));
    }
}
