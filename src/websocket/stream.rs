//! Transport stream: plain TCP or TLS over TCP

use std::sync::Arc;

use once_cell::sync::Lazy;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::rustls::{self, pki_types::ServerName};
use tokio_rustls::TlsConnector;

use super::url::WsUrl;
use crate::errors::{ChatError, ChatResult};
use crate::logger::{self, LogTag};

pub trait WsStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> WsStream for T {}

pub type BoxedStream = Box<dyn WsStream>;

static TLS_CONFIG: Lazy<Result<Arc<rustls::ClientConfig>, String>> = Lazy::new(|| {
    let roots = rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    rustls::ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .map(|builder| {
            Arc::new(
                builder
                    .with_root_certificates(roots)
                    .with_no_client_auth(),
            )
        })
        .map_err(|e| e.to_string())
});

/// Open the TCP connection and, for `wss://`, complete the TLS handshake
pub async fn open(url: &WsUrl) -> ChatResult<BoxedStream> {
    let tcp = TcpStream::connect(url.socket_addr()).await?;
    tcp.set_nodelay(true)?;

    if !url.secure {
        logger::debug(
            LogTag::WebSocket,
            &format!("TCP connected to {}", url.socket_addr()),
        );
        return Ok(Box::new(tcp));
    }

    let config = TLS_CONFIG.as_ref().map_err(|e| ChatError::Tls(e.clone()))?;
    let server_name = ServerName::try_from(url.host.clone())
        .map_err(|e| ChatError::Tls(format!("invalid server name '{}': {}", url.host, e)))?;

    let tls = TlsConnector::from(Arc::clone(config))
        .connect(server_name, tcp)
        .await
        .map_err(|e| ChatError::Tls(e.to_string()))?;

    logger::debug(
        LogTag::WebSocket,
        &format!("TLS established with {}", url.socket_addr()),
    );
    Ok(Box::new(tls))
}
