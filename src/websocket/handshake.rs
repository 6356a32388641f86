//! HTTP/1.1 Upgrade handshake
//!
//! Acceptance requires a `101` status line and an `Upgrade: websocket`
//! header. `Sec-WebSocket-Accept` is not verified.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;

use super::url::WsUrl;
use crate::errors::HandshakeError;

/// Upper bound on the response header block
pub const MAX_RESPONSE_HEADERS: usize = 16 * 1024;

/// Random base64 `Sec-WebSocket-Key` (16 bytes of entropy)
pub fn generate_key() -> String {
    let mut raw = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut raw);
    STANDARD.encode(raw)
}

pub fn build_request(url: &WsUrl, key: &str) -> String {
    format!(
        "GET {} HTTP/1.1\r\n\
         Host: {}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n",
        url.resource,
        url.host_header(),
        key
    )
}

/// Accepted upgrade response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    /// Bytes after the header block; already the start of the frame stream
    pub leftover: Vec<u8>,
}

impl HandshakeResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Try to parse the upgrade response out of `buf`
///
/// `Ok(None)` means the header block is not complete yet.
pub fn parse_response(buf: &[u8]) -> Result<Option<HandshakeResponse>, HandshakeError> {
    let Some(end) = find_header_end(buf) else {
        if buf.len() > MAX_RESPONSE_HEADERS {
            return Err(HandshakeError::TooLarge(MAX_RESPONSE_HEADERS));
        }
        return Ok(None);
    };

    let head = std::str::from_utf8(&buf[..end])
        .map_err(|_| HandshakeError::Malformed("non UTF-8 header block".to_string()))?;
    let mut lines = head.split("\r\n");

    let status_line = lines.next().unwrap_or_default();
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(HandshakeError::Malformed(status_line.to_string()));
    }
    let status: u16 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| HandshakeError::Malformed(status_line.to_string()))?;
    if status != 101 {
        return Err(HandshakeError::UnexpectedStatus {
            status,
            line: status_line.to_string(),
        });
    }

    let headers: Vec<(String, String)> = lines
        .filter(|l| !l.is_empty())
        .filter_map(|l| {
            l.split_once(':')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        })
        .collect();

    let upgraded = headers
        .iter()
        .any(|(k, v)| k.eq_ignore_ascii_case("upgrade") && v.eq_ignore_ascii_case("websocket"));
    if !upgraded {
        return Err(HandshakeError::MissingUpgrade);
    }

    Ok(Some(HandshakeResponse {
        status,
        headers,
        leftover: buf[end + 4..].to_vec(),
    }))
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let url = WsUrl::parse("wss://irc-ws.chat.twitch.tv:443/chat?x=1").unwrap();
        let key = generate_key();
        assert_eq!(STANDARD.decode(&key).unwrap().len(), 16);

        let req = build_request(&url, &key);
        assert!(req.starts_with("GET /chat?x=1 HTTP/1.1\r\n"));
        assert!(req.contains("Host: irc-ws.chat.twitch.tv\r\n"));
        assert!(req.contains(&format!("Sec-WebSocket-Key: {}\r\n", key)));
        assert!(req.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_accepts_101_with_leftover() {
        let mut raw = b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: WebSocket\r\nConnection: Upgrade\r\n\r\n".to_vec();
        raw.extend_from_slice(&[0x81, 0x00]);

        let resp = parse_response(&raw).unwrap().unwrap();
        assert_eq!(resp.status, 101);
        assert_eq!(resp.header("connection"), Some("Upgrade"));
        assert_eq!(resp.leftover, vec![0x81, 0x00]);
    }

    #[test]
    fn test_incomplete_waits() {
        assert_eq!(parse_response(b"HTTP/1.1 101 Switching").unwrap(), None);
    }

    #[test]
    fn test_rejects_bad_responses() {
        let err = parse_response(b"HTTP/1.1 403 Forbidden\r\n\r\n").unwrap_err();
        assert!(matches!(err, HandshakeError::UnexpectedStatus { status: 403, .. }));

        let err = parse_response(b"HTTP/1.1 101 OK\r\nConnection: Upgrade\r\n\r\n").unwrap_err();
        assert_eq!(err, HandshakeError::MissingUpgrade);

        let err = parse_response(b"garbage\r\n\r\n").unwrap_err();
        assert!(matches!(err, HandshakeError::Malformed(_)));
    }
}
