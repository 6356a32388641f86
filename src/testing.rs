//! In-process WebSocket peer for tests
//!
//! Completes the upgrade with a canned 101 response and speaks unmasked
//! server frames over a local `TcpListener`.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::events::EventReceiver;
use crate::websocket::frame::{self, Frame, Opcode};

const RESPONSE: &str = "HTTP/1.1 101 Switching Protocols\r\n\
                        Upgrade: websocket\r\n\
                        Connection: Upgrade\r\n\
                        Sec-WebSocket-Accept: dGVzdA==\r\n\r\n";

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct FakeServer {
    listener: TcpListener,
}

impl FakeServer {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self { listener }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/", self.listener.local_addr().unwrap())
    }

    /// URL of a local port with nothing listening on it
    pub async fn unused_url() -> String {
        let server = Self::bind().await;
        let url = server.url();
        drop(server);
        url
    }

    /// Accept one client and complete the upgrade
    pub async fn accept(&self) -> FakePeer {
        self.accept_with_response(RESPONSE).await
    }

    /// Accept one client and answer its upgrade request with `response`
    pub async fn accept_with_response(&self, response: &str) -> FakePeer {
        let mut peer = self.accept_without_reply().await;
        peer.stream.write_all(response.as_bytes()).await.unwrap();
        peer
    }

    /// Accept one client and read its upgrade request, answering nothing
    pub async fn accept_without_reply(&self) -> FakePeer {
        let (stream, _) = tokio::time::timeout(STEP_TIMEOUT, self.listener.accept())
            .await
            .expect("no client connected")
            .unwrap();
        let mut peer = FakePeer {
            stream,
            buf: Vec::new(),
            request: String::new(),
        };
        peer.read_request().await;
        peer
    }
}

pub struct FakePeer {
    stream: TcpStream,
    buf: Vec<u8>,
    pub request: String,
}

impl FakePeer {
    async fn read_request(&mut self) {
        loop {
            if let Some(end) = self.buf.windows(4).position(|w| w == b"\r\n\r\n") {
                self.request = String::from_utf8_lossy(&self.buf[..end]).to_string();
                self.buf.drain(..end + 4);
                return;
            }
            let n = self.stream.read_buf(&mut self.buf).await.unwrap();
            assert!(n > 0, "client closed during handshake");
        }
    }

    pub async fn send_bytes(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    pub async fn send_frame(&mut self, opcode: Opcode, payload: &[u8]) {
        let bytes = frame::encode_with_mask(opcode, payload, None);
        self.send_bytes(&bytes).await;
    }

    pub async fn send_text(&mut self, text: &str) {
        self.send_frame(Opcode::Text, text.as_bytes()).await;
    }

    pub async fn send_close(&mut self, code: u16, reason: &str) {
        self.send_frame(Opcode::Close, &frame::close_payload(code, reason))
            .await;
    }

    /// Next frame from the client, `None` once the socket closes
    pub async fn recv_frame(&mut self) -> Option<Frame> {
        loop {
            if let Some((frame, used)) = frame::decode(&self.buf, usize::MAX).unwrap() {
                self.buf.drain(..used);
                return Some(frame);
            }
            let read = tokio::time::timeout(STEP_TIMEOUT, self.stream.read_buf(&mut self.buf))
                .await
                .expect("timed out waiting for a frame");
            match read {
                Ok(0) | Err(_) => return None,
                Ok(_) => {}
            }
        }
    }

    /// Next text frame payload, skipping control frames
    pub async fn recv_text(&mut self) -> Option<String> {
        loop {
            let frame = self.recv_frame().await?;
            if frame.opcode == Opcode::Text {
                return Some(String::from_utf8(frame.payload).unwrap());
            }
        }
    }

    /// Text frames split into lines, until one satisfies `pred`
    pub async fn recv_line_matching(&mut self, pred: impl Fn(&str) -> bool) -> Option<String> {
        loop {
            let text = self.recv_text().await?;
            for line in text.split("\r\n").filter(|l| !l.is_empty()) {
                if pred(line) {
                    return Some(line.to_string());
                }
            }
        }
    }
}

/// Receive events until one matches, or give up after a few seconds
pub async fn next_matching<E>(
    events: &mut EventReceiver<E>,
    pred: impl Fn(&E) -> bool,
) -> Option<E> {
    let deadline = tokio::time::Instant::now() + STEP_TIMEOUT;
    loop {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Some(event)) if pred(&event) => return Some(event),
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => return None,
        }
    }
}
