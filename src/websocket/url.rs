//! `ws://` / `wss://` endpoint parsing

use url::Url;

use crate::errors::{ChatError, ChatResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsUrl {
    pub secure: bool,
    pub host: String,
    pub port: u16,
    /// Request target: path plus optional query
    pub resource: String,
}

impl WsUrl {
    pub fn parse(raw: &str) -> ChatResult<Self> {
        let parsed = Url::parse(raw).map_err(|e| ChatError::invalid_url(raw, e.to_string()))?;

        let secure = match parsed.scheme() {
            "wss" => true,
            "ws" => false,
            other => {
                return Err(ChatError::invalid_url(
                    raw,
                    format!("unsupported scheme '{}'", other),
                ))
            }
        };

        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ChatError::invalid_url(raw, "missing host"))?
            .to_string();

        let port = parsed
            .port_or_known_default()
            .unwrap_or(if secure { 443 } else { 80 });

        let mut resource = parsed.path().to_string();
        if resource.is_empty() {
            resource.push('/');
        }
        if let Some(query) = parsed.query() {
            resource.push('?');
            resource.push_str(query);
        }

        Ok(Self {
            secure,
            host,
            port,
            resource,
        })
    }

    pub fn default_port(&self) -> u16 {
        if self.secure {
            443
        } else {
            80
        }
    }

    /// Value for the `Host` header; the port is omitted when it is the default
    pub fn host_header(&self) -> String {
        if self.port == self.default_port() {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ports() {
        let secure = WsUrl::parse("wss://irc-ws.chat.twitch.tv").unwrap();
        assert!(secure.secure);
        assert_eq!(secure.port, 443);
        assert_eq!(secure.resource, "/");

        let plain = WsUrl::parse("ws://127.0.0.1:8080/irc?v=2").unwrap();
        assert!(!plain.secure);
        assert_eq!(plain.port, 8080);
        assert_eq!(plain.resource, "/irc?v=2");
        assert_eq!(plain.host_header(), "127.0.0.1:8080");
    }

    #[test]
    fn test_rejects_other_schemes() {
        assert!(matches!(
            WsUrl::parse("https://example.com"),
            Err(ChatError::InvalidUrl { .. })
        ));
        assert!(WsUrl::parse("not a url").is_err());
    }
}
