//! WebSocket client actor
//!
//! One tokio task owns the socket, the outbound queue, the send limiter and
//! every timer of a connection. Callers hold a cloneable [`WebSocketHandle`]
//! and observe the connection through [`WsEvent`]s.
//!
//! Failure handling is uniform: connect errors, connect timeouts, handshake
//! rejections, fatal frames, pong timeouts and abnormal closes all tear the
//! connection down and schedule a retry after `reconnect_interval`, until
//! `max_reconnect_attempts` is reached. A successful connect resets the
//! counter. An explicit `close` never reconnects and ends the actor.

use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Interval, MissedTickBehavior, Sleep};

use super::frame::{self, Frame, Opcode, CLOSE_NORMAL};
use super::handshake;
use super::stream::{self, BoxedStream};
use super::url::WsUrl;
use crate::config::WebSocketConfig;
use crate::errors::{ChatError, ChatResult, FrameError, HandshakeError};
use crate::events::{EventReceiver, Subscribers};
use crate::logger::{self, LogTag};
use crate::rate_limiter::RateLimiter;

const COMMAND_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsMessage {
    Text(String),
    Binary(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum WsEvent {
    Open,
    Message(WsMessage),
    Pong { latency: Duration },
    Close { code: u16, reason: String },
    Error { error: String },
    Reconnecting { attempt: u32, delay: Duration },
    MaxReconnectAttempts { attempts: u32 },
}

enum Command {
    Send {
        text: String,
        reply: oneshot::Sender<ChatResult<()>>,
    },
    SendRaw {
        text: String,
        reply: oneshot::Sender<ChatResult<()>>,
    },
    Close {
        code: u16,
        reason: String,
        reply: oneshot::Sender<()>,
    },
    Reconnect {
        reply: oneshot::Sender<ChatResult<()>>,
    },
    Subscribe {
        reply: oneshot::Sender<EventReceiver<WsEvent>>,
    },
    State {
        reply: oneshot::Sender<ConnectionState>,
    },
    QueueLen {
        reply: oneshot::Sender<usize>,
    },
}

/// Cloneable handle to a running connection actor
#[derive(Clone)]
pub struct WebSocketHandle {
    url: String,
    commands: mpsc::Sender<Command>,
}

impl fmt::Debug for WebSocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketHandle")
            .field("url", &self.url)
            .finish()
    }
}

impl WebSocketHandle {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Queue a text message behind the send limiter
    ///
    /// Returns once the message is accepted into the queue; pacing never
    /// surfaces as an error. Once automatic reconnection is exhausted the
    /// message is refused with `ReconnectExhausted` until `reconnect`.
    pub async fn send(&self, text: impl Into<String>) -> ChatResult<()> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Send {
            text: text.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| ChatError::ActorGone)?
    }

    /// Write a text message immediately, bypassing the limiter
    pub async fn send_raw(&self, text: impl Into<String>) -> ChatResult<()> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::SendRaw {
            text: text.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| ChatError::ActorGone)?
    }

    /// Close gracefully and stop the actor; no reconnection follows
    pub async fn close(&self, code: u16, reason: impl Into<String>) -> ChatResult<()> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Close {
            code,
            reason: reason.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| ChatError::ActorGone)
    }

    /// Drop the current socket and connect again right away
    ///
    /// Resolves with the outcome of that single attempt. The attempt counter
    /// is reset first, so this also revives a connection that exhausted its
    /// automatic retries.
    pub async fn reconnect(&self) -> ChatResult<()> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Reconnect { reply }).await?;
        rx.await.map_err(|_| ChatError::ActorGone)?
    }

    pub async fn subscribe(&self) -> ChatResult<EventReceiver<WsEvent>> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Subscribe { reply }).await?;
        rx.await.map_err(|_| ChatError::ActorGone)
    }

    pub async fn state(&self) -> ChatResult<ConnectionState> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::State { reply }).await?;
        rx.await.map_err(|_| ChatError::ActorGone)
    }

    /// Messages waiting for the send limiter
    pub async fn queued(&self) -> ChatResult<usize> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::QueueLen { reply }).await?;
        rx.await.map_err(|_| ChatError::ActorGone)
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    async fn request(&self, command: Command) -> ChatResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ChatError::ActorGone)
    }
}

pub struct WebSocketClient;

impl WebSocketClient {
    /// Spawn a connection actor for `url`
    ///
    /// The URL is validated up front. The returned receiver is subscribed
    /// before the first connect attempt, so it observes the initial `Open`.
    pub fn connect(
        url: &str,
        config: WebSocketConfig,
    ) -> ChatResult<(WebSocketHandle, EventReceiver<WsEvent>)> {
        let parsed = WsUrl::parse(url)?;
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);

        let mut subscribers = Subscribers::new();
        let events = subscribers.subscribe();

        let actor = Actor::new(parsed, config, rx, subscribers);
        tokio::spawn(actor.run());

        Ok((
            WebSocketHandle {
                url: url.to_string(),
                commands: tx,
            },
            events,
        ))
    }
}

struct Connection {
    stream: BoxedStream,
    read_buf: Vec<u8>,
    /// Opcode and accumulated payload of an inbound fragmented message
    fragments: Option<(Opcode, Vec<u8>)>,
    ping_sent_at: Option<Instant>,
}

impl Connection {
    async fn write_frame(&mut self, opcode: Opcode, payload: &[u8]) -> ChatResult<()> {
        let bytes = frame::encode(opcode, payload);
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

type Timer = Option<Pin<Box<Sleep>>>;

fn arm(delay: Duration) -> Timer {
    Some(Box::pin(tokio::time::sleep(delay)))
}

async fn fire(timer: &mut Timer) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn read_some(conn: &mut Option<Connection>) -> std::io::Result<usize> {
    match conn {
        Some(c) => c.stream.read_buf(&mut c.read_buf).await,
        None => std::future::pending().await,
    }
}

struct Actor {
    url: WsUrl,
    config: WebSocketConfig,
    commands: mpsc::Receiver<Command>,
    subscribers: Subscribers<WsEvent>,

    state: ConnectionState,
    conn: Option<Connection>,
    queue: VecDeque<String>,
    limiter: RateLimiter,
    attempts: u32,
    /// Automatic reconnection gave up; cleared by a successful connect
    exhausted: bool,

    reconnect_timer: Timer,
    ping_timer: Timer,
    pong_deadline: Timer,
    drain: Interval,

    finished: bool,
}

impl Actor {
    fn new(
        url: WsUrl,
        config: WebSocketConfig,
        commands: mpsc::Receiver<Command>,
        subscribers: Subscribers<WsEvent>,
    ) -> Self {
        let limiter = RateLimiter::new(config.send_rate_limit, config.send_rate_window());
        let mut drain = tokio::time::interval(config.queue_drain_interval());
        drain.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self {
            url,
            config,
            commands,
            subscribers,
            state: ConnectionState::Closed,
            conn: None,
            queue: VecDeque::new(),
            limiter,
            attempts: 0,
            exhausted: false,
            reconnect_timer: None,
            ping_timer: None,
            pong_deadline: None,
            drain,
            finished: false,
        }
    }

    async fn run(mut self) {
        let _ = self.connect_now().await;

        while !self.finished {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.shutdown(CLOSE_NORMAL, "client dropped").await;
                    }
                },
                result = read_some(&mut self.conn) => self.on_read(result).await,
                _ = fire(&mut self.reconnect_timer) => {
                    self.reconnect_timer = None;
                    let _ = self.connect_now().await;
                }
                _ = fire(&mut self.ping_timer) => self.on_ping_tick().await,
                _ = fire(&mut self.pong_deadline) => {
                    self.pong_deadline = None;
                    let timeout_ms = self.config.pong_timeout_ms;
                    self.fail(ChatError::PongTimeout { timeout_ms }).await;
                }
                _ = self.drain.tick() => self.drain_queue().await,
            }
        }

        logger::debug(
            LogTag::WebSocket,
            &format!("Connection actor for {} stopped", self.url.socket_addr()),
        );
    }

    // =========================================================================
    // CONNECT / TEARDOWN
    // =========================================================================

    async fn connect_now(&mut self) -> ChatResult<()> {
        self.state = ConnectionState::Connecting;
        logger::info(
            LogTag::WebSocket,
            &format!(
                "Connecting to {}{} (attempt {})",
                self.url.socket_addr(),
                self.url.resource,
                self.attempts + 1
            ),
        );

        let timeout = self.config.connect_timeout();
        let outcome = match tokio::time::timeout(timeout, establish(&self.url)).await {
            Ok(result) => result,
            Err(_) => Err(ChatError::ConnectTimeout {
                timeout_ms: self.config.connect_timeout_ms,
            }),
        };

        match outcome {
            Ok((stream, leftover)) => {
                self.conn = Some(Connection {
                    stream,
                    read_buf: leftover,
                    fragments: None,
                    ping_sent_at: None,
                });
                self.state = ConnectionState::Open;
                self.attempts = 0;
                self.exhausted = false;
                self.ping_timer = arm(self.config.ping_interval());

                logger::info(
                    LogTag::WebSocket,
                    &format!("Connection open to {}", self.url.socket_addr()),
                );
                self.subscribers.emit(WsEvent::Open);

                self.process_buffer().await;
                self.drain_queue().await;
                Ok(())
            }
            Err(error) => {
                logger::warning(
                    LogTag::WebSocket,
                    &format!("Connect to {} failed: {}", self.url.socket_addr(), error),
                );
                self.state = ConnectionState::Closed;
                self.subscribers.emit(WsEvent::Error {
                    error: error.to_string(),
                });
                self.schedule_reconnect();
                Err(error)
            }
        }
    }

    /// Drop the socket and every connection-scoped timer
    fn cleanup(&mut self) {
        self.conn = None;
        self.ping_timer = None;
        self.pong_deadline = None;
        self.reconnect_timer = None;
    }

    /// Tear down after a fatal error and schedule the next attempt
    async fn fail(&mut self, error: ChatError) {
        logger::warning(
            LogTag::WebSocket,
            &format!("Connection to {} failed: {}", self.url.socket_addr(), error),
        );
        self.cleanup();
        self.state = ConnectionState::Closed;
        self.subscribers.emit(WsEvent::Error {
            error: error.to_string(),
        });
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        let max = self.config.max_reconnect_attempts;
        if self.attempts >= max {
            logger::error(
                LogTag::WebSocket,
                &format!(
                    "Giving up on {} after {} reconnect attempts",
                    self.url.socket_addr(),
                    self.attempts
                ),
            );
            self.exhausted = true;
            self.subscribers.emit(WsEvent::MaxReconnectAttempts {
                attempts: self.attempts,
            });
            return;
        }

        self.attempts += 1;
        let delay = self.config.reconnect_interval();
        logger::info(
            LogTag::WebSocket,
            &format!(
                "Reconnecting in {}ms (attempt {}/{})",
                delay.as_millis(),
                self.attempts,
                max
            ),
        );
        self.reconnect_timer = arm(delay);
        self.subscribers.emit(WsEvent::Reconnecting {
            attempt: self.attempts,
            delay,
        });
    }

    /// Graceful close: best-effort close frame, no reconnection, actor ends
    async fn shutdown(&mut self, code: u16, reason: &str) {
        self.state = ConnectionState::Closing;
        if let Some(conn) = self.conn.as_mut() {
            let payload = frame::close_payload(code, reason);
            if let Err(e) = conn.write_frame(Opcode::Close, &payload).await {
                logger::debug(
                    LogTag::WebSocket,
                    &format!("Close frame not delivered: {}", e),
                );
            }
        }
        self.cleanup();
        self.state = ConnectionState::Closed;
        self.finished = true;
        self.commands.close();

        logger::info(
            LogTag::WebSocket,
            &format!(
                "Closed connection to {} ({} {})",
                self.url.socket_addr(),
                code,
                reason
            ),
        );
        self.subscribers.emit(WsEvent::Close {
            code,
            reason: reason.to_string(),
        });
    }

    // =========================================================================
    // COMMANDS
    // =========================================================================

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Send { text, reply } => {
                if self.exhausted {
                    logger::debug(
                        LogTag::WebSocket,
                        &format!(
                            "Dropping outbound message, reconnection to {} exhausted",
                            self.url.socket_addr()
                        ),
                    );
                    let _ = reply.send(Err(ChatError::ReconnectExhausted {
                        attempts: self.attempts,
                    }));
                    return;
                }
                self.queue.push_back(text);
                let _ = reply.send(Ok(()));
                self.drain_queue().await;
            }
            Command::SendRaw { text, reply } => {
                let result = self.write_now(Opcode::Text, text.as_bytes()).await;
                let _ = reply.send(result);
            }
            Command::Close {
                code,
                reason,
                reply,
            } => {
                self.shutdown(code, &reason).await;
                let _ = reply.send(());
            }
            Command::Reconnect { reply } => {
                logger::info(
                    LogTag::WebSocket,
                    &format!("Forced reconnect to {}", self.url.socket_addr()),
                );
                self.cleanup();
                self.attempts = 0;
                self.exhausted = false;
                let result = self.connect_now().await;
                let _ = reply.send(result);
            }
            Command::Subscribe { reply } => {
                let _ = reply.send(self.subscribers.subscribe());
            }
            Command::State { reply } => {
                let _ = reply.send(self.state);
            }
            Command::QueueLen { reply } => {
                let _ = reply.send(self.queue.len());
            }
        }
    }

    async fn write_now(&mut self, opcode: Opcode, payload: &[u8]) -> ChatResult<()> {
        let conn = match self.conn.as_mut() {
            Some(conn) if self.state == ConnectionState::Open => conn,
            _ => return Err(ChatError::NotConnected),
        };
        if let Err(e) = conn.write_frame(opcode, payload).await {
            self.fail(e).await;
            return Err(ChatError::ConnectionClosed);
        }
        Ok(())
    }

    /// Send queued messages head first while the limiter admits them
    async fn drain_queue(&mut self) {
        if self.state != ConnectionState::Open {
            return;
        }

        while !self.queue.is_empty() {
            if !self.limiter.check() {
                logger::debug(
                    LogTag::RateLimit,
                    &format!(
                        "Send limit reached ({} per {}ms), {} queued",
                        self.limiter.limit(),
                        self.limiter.window().as_millis(),
                        self.queue.len()
                    ),
                );
                return;
            }

            let Some(text) = self.queue.pop_front() else {
                return;
            };
            self.limiter.add();
            if self.write_now(Opcode::Text, text.as_bytes()).await.is_err() {
                // Keep the message for the next connection
                self.queue.push_front(text);
                return;
            }
        }
    }

    // =========================================================================
    // HEARTBEAT
    // =========================================================================

    async fn on_ping_tick(&mut self) {
        self.ping_timer = arm(self.config.ping_interval());
        if self.pong_deadline.is_some() {
            return;
        }

        let Some(conn) = self.conn.as_mut() else {
            return;
        };
        conn.ping_sent_at = Some(Instant::now());
        let payload = chrono::Utc::now().timestamp_millis().to_be_bytes();
        if self.write_now(Opcode::Ping, &payload).await.is_ok() {
            logger::verbose(LogTag::WebSocket, "Heartbeat ping sent");
            self.pong_deadline = arm(self.config.pong_timeout());
        }
    }

    // =========================================================================
    // INBOUND
    // =========================================================================

    async fn on_read(&mut self, result: std::io::Result<usize>) {
        match result {
            Ok(0) => self.fail(ChatError::ConnectionClosed).await,
            Ok(_) => self.process_buffer().await,
            Err(e) => self.fail(ChatError::Io(e)).await,
        }
    }

    /// Decode and dispatch every complete frame in the read buffer, in order
    async fn process_buffer(&mut self) {
        let max = self.config.max_frame_size;
        loop {
            let Some(conn) = self.conn.as_mut() else {
                return;
            };
            match frame::decode(&conn.read_buf, max) {
                Ok(Some((frame, used))) => {
                    conn.read_buf.drain(..used);
                    if let Err(e) = self.handle_frame(frame).await {
                        // A failed write has already torn the connection down
                        if self.conn.is_some() {
                            self.fail(e).await;
                        }
                        return;
                    }
                }
                Ok(None) => return,
                Err(e) => {
                    self.fail(ChatError::Frame(e)).await;
                    return;
                }
            }
        }
    }

    async fn handle_frame(&mut self, frame: Frame) -> ChatResult<()> {
        match frame.opcode {
            Opcode::Text | Opcode::Binary => {
                let conn = self.conn.as_mut().ok_or(ChatError::NotConnected)?;
                if conn.fragments.is_some() {
                    return Err(FrameError::InterleavedMessage.into());
                }
                if frame.fin {
                    self.deliver(frame.opcode, frame.payload)
                } else {
                    conn.fragments = Some((frame.opcode, frame.payload));
                    Ok(())
                }
            }
            Opcode::Continuation => {
                let max = self.config.max_frame_size;
                let conn = self.conn.as_mut().ok_or(ChatError::NotConnected)?;
                let (opcode, mut data) = conn
                    .fragments
                    .take()
                    .ok_or(FrameError::UnexpectedContinuation)?;
                data.extend_from_slice(&frame.payload);
                if data.len() > max {
                    return Err(FrameError::PayloadTooLarge {
                        size: data.len() as u64,
                        limit: max,
                    }
                    .into());
                }
                if frame.fin {
                    self.deliver(opcode, data)
                } else {
                    conn.fragments = Some((opcode, data));
                    Ok(())
                }
            }
            Opcode::Ping => {
                logger::verbose(LogTag::WebSocket, "Ping received, answering with pong");
                self.write_now(Opcode::Pong, &frame.payload).await
            }
            Opcode::Pong => {
                let sent_at = self.conn.as_mut().and_then(|c| c.ping_sent_at.take());
                self.pong_deadline = None;
                let latency = sent_at.map(|t| t.elapsed()).unwrap_or_default();
                logger::verbose(
                    LogTag::WebSocket,
                    &format!("Pong received ({}ms)", latency.as_millis()),
                );
                self.subscribers.emit(WsEvent::Pong { latency });
                Ok(())
            }
            Opcode::Close => {
                self.on_close_frame(&frame.payload).await;
                Ok(())
            }
        }
    }

    fn deliver(&mut self, opcode: Opcode, payload: Vec<u8>) -> ChatResult<()> {
        let message = match opcode {
            Opcode::Text => {
                WsMessage::Text(String::from_utf8(payload).map_err(|_| FrameError::InvalidUtf8)?)
            }
            _ => WsMessage::Binary(payload),
        };
        self.subscribers.emit(WsEvent::Message(message));
        Ok(())
    }

    async fn on_close_frame(&mut self, payload: &[u8]) {
        let (code, reason) = match frame::parse_close_payload(payload) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.fail(ChatError::Frame(e)).await;
                return;
            }
        };

        self.state = ConnectionState::Closing;
        if let Some(conn) = self.conn.as_mut() {
            let echo = frame::close_payload(code, &reason);
            if let Err(e) = conn.write_frame(Opcode::Close, &echo).await {
                logger::debug(
                    LogTag::WebSocket,
                    &format!("Close echo not delivered: {}", e),
                );
            }
        }
        self.cleanup();
        self.state = ConnectionState::Closed;

        logger::info(
            LogTag::WebSocket,
            &format!("Server closed connection: {} {}", code, reason),
        );
        self.subscribers.emit(WsEvent::Close {
            code,
            reason: reason.clone(),
        });

        if code != CLOSE_NORMAL {
            self.schedule_reconnect();
        }
    }
}

/// Open the transport and run the upgrade handshake
///
/// Returns the stream plus any bytes read past the response headers.
async fn establish(url: &WsUrl) -> ChatResult<(BoxedStream, Vec<u8>)> {
    let mut stream = stream::open(url).await?;

    let key = handshake::generate_key();
    let request = handshake::build_request(url, &key);
    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;

    let mut buf = Vec::with_capacity(1024);
    loop {
        let n = stream.read_buf(&mut buf).await?;
        if n == 0 {
            return Err(HandshakeError::ConnectionClosed.into());
        }
        if let Some(response) = handshake::parse_response(&buf)? {
            logger::debug(
                LogTag::WebSocket,
                &format!("Handshake accepted ({})", response.status),
            );
            return Ok((stream, response.leftover));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{next_matching, FakeServer};

    fn fast_config() -> WebSocketConfig {
        WebSocketConfig {
            connect_timeout_ms: 1_000,
            reconnect_interval_ms: 20,
            max_reconnect_attempts: 3,
            ping_interval_ms: 60_000,
            queue_drain_interval_ms: 10,
            ..WebSocketConfig::default()
        }
    }

    #[tokio::test]
    async fn test_open_and_receive_text() {
        let server = FakeServer::bind().await;
        let (handle, mut events) = WebSocketClient::connect(&server.url(), fast_config()).unwrap();
        let mut peer = server.accept().await;

        assert_eq!(events.recv().await, Some(WsEvent::Open));
        peer.send_text("hello").await;
        assert_eq!(
            events.recv().await,
            Some(WsEvent::Message(WsMessage::Text("hello".to_string())))
        );

        handle.send("out").await.unwrap();
        assert_eq!(peer.recv_text().await.as_deref(), Some("out"));
    }

    #[tokio::test]
    async fn test_client_frames_are_masked() {
        let server = FakeServer::bind().await;
        let (handle, _events) = WebSocketClient::connect(&server.url(), fast_config()).unwrap();
        let mut peer = server.accept().await;

        handle.send_raw("PING").await.unwrap();
        let frame = peer.recv_frame().await.unwrap();
        assert!(frame.masked);
        assert_eq!(frame.payload, b"PING");
    }

    #[tokio::test]
    async fn test_ping_answered_with_identical_pong() {
        let server = FakeServer::bind().await;
        let (_handle, mut events) = WebSocketClient::connect(&server.url(), fast_config()).unwrap();
        let mut peer = server.accept().await;
        assert_eq!(events.recv().await, Some(WsEvent::Open));

        peer.send_frame(Opcode::Ping, b"abc").await;
        let pong = peer.recv_frame().await.unwrap();
        assert_eq!(pong.opcode, Opcode::Pong);
        assert_eq!(pong.payload, b"abc");
    }

    #[tokio::test]
    async fn test_fragmented_message_reassembled() {
        let server = FakeServer::bind().await;
        let (_handle, mut events) = WebSocketClient::connect(&server.url(), fast_config()).unwrap();
        let mut peer = server.accept().await;
        assert_eq!(events.recv().await, Some(WsEvent::Open));

        peer.send_bytes(&[0x01, 0x03, b'f', b'o', b'o']).await;
        peer.send_bytes(&[0x80, 0x03, b'b', b'a', b'r']).await;
        assert_eq!(
            events.recv().await,
            Some(WsEvent::Message(WsMessage::Text("foobar".to_string())))
        );
    }

    #[tokio::test]
    async fn test_heartbeat_pong_reports_latency() {
        let server = FakeServer::bind().await;
        let config = WebSocketConfig {
            ping_interval_ms: 30,
            ..fast_config()
        };
        let (_handle, mut events) = WebSocketClient::connect(&server.url(), config).unwrap();
        let mut peer = server.accept().await;

        let ping = peer.recv_frame().await.unwrap();
        assert_eq!(ping.opcode, Opcode::Ping);
        peer.send_frame(Opcode::Pong, &ping.payload).await;

        let pong = next_matching(&mut events, |e| matches!(e, WsEvent::Pong { .. })).await;
        assert!(pong.is_some());
    }

    #[tokio::test]
    async fn test_send_queue_respects_rate_limit() {
        let server = FakeServer::bind().await;
        let config = WebSocketConfig {
            send_rate_limit: 2,
            send_rate_window_ms: 200,
            ..fast_config()
        };
        let (handle, mut events) = WebSocketClient::connect(&server.url(), config).unwrap();
        let mut peer = server.accept().await;
        assert_eq!(events.recv().await, Some(WsEvent::Open));

        for text in ["one", "two", "three"] {
            handle.send(text).await.unwrap();
        }
        let started = Instant::now();
        assert_eq!(peer.recv_text().await.as_deref(), Some("one"));
        assert_eq!(peer.recv_text().await.as_deref(), Some("two"));
        assert_eq!(handle.queued().await.unwrap(), 1);

        assert_eq!(peer.recv_text().await.as_deref(), Some("three"));
        assert!(started.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn test_abnormal_close_reconnects() {
        let server = FakeServer::bind().await;
        let (_handle, mut events) = WebSocketClient::connect(&server.url(), fast_config()).unwrap();
        let mut peer = server.accept().await;
        assert_eq!(events.recv().await, Some(WsEvent::Open));

        peer.send_close(4000, "bye").await;
        let echo = peer.recv_frame().await.unwrap();
        assert_eq!(echo.opcode, Opcode::Close);
        assert_eq!(frame::parse_close_payload(&echo.payload).unwrap().0, 4000);

        assert_eq!(
            events.recv().await,
            Some(WsEvent::Close {
                code: 4000,
                reason: "bye".to_string()
            })
        );
        assert!(matches!(
            events.recv().await,
            Some(WsEvent::Reconnecting { attempt: 1, .. })
        ));

        let _again = server.accept().await;
        assert_eq!(events.recv().await, Some(WsEvent::Open));
    }

    #[tokio::test]
    async fn test_normal_close_does_not_reconnect() {
        let server = FakeServer::bind().await;
        let (_handle, mut events) = WebSocketClient::connect(&server.url(), fast_config()).unwrap();
        let mut peer = server.accept().await;
        assert_eq!(events.recv().await, Some(WsEvent::Open));

        peer.send_close(CLOSE_NORMAL, "").await;
        assert!(matches!(
            events.recv().await,
            Some(WsEvent::Close { code: 1000, .. })
        ));
        let next = tokio::time::timeout(Duration::from_millis(100), events.recv()).await;
        assert!(next.is_err(), "unexpected event after normal close");
    }

    #[tokio::test]
    async fn test_explicit_close() {
        let server = FakeServer::bind().await;
        let (handle, mut events) = WebSocketClient::connect(&server.url(), fast_config()).unwrap();
        let mut peer = server.accept().await;
        assert_eq!(events.recv().await, Some(WsEvent::Open));

        handle.close(CLOSE_NORMAL, "done").await.unwrap();
        assert_eq!(
            events.recv().await,
            Some(WsEvent::Close {
                code: 1000,
                reason: "done".to_string()
            })
        );

        let frame = peer.recv_frame().await.unwrap();
        assert_eq!(frame.opcode, Opcode::Close);
        assert_eq!(events.recv().await, None);
        assert!(handle.send("late").await.is_err());
    }

    #[tokio::test]
    async fn test_reconnect_attempts_are_bounded() {
        let url = FakeServer::unused_url().await;
        let (_handle, mut events) = WebSocketClient::connect(&url, fast_config()).unwrap();

        let mut attempts = Vec::new();
        loop {
            match events.recv().await {
                Some(WsEvent::Reconnecting { attempt, .. }) => attempts.push(attempt),
                Some(WsEvent::MaxReconnectAttempts { attempts: n }) => {
                    assert_eq!(n, 3);
                    break;
                }
                Some(WsEvent::Error { .. }) => {}
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(attempts, vec![1, 2, 3]);

        let next = tokio::time::timeout(Duration::from_millis(150), events.recv()).await;
        assert!(next.is_err(), "no further attempt after exhaustion");
    }

    #[tokio::test]
    async fn test_forced_reconnect_after_exhaustion() {
        let server = FakeServer::bind().await;
        let config = WebSocketConfig {
            max_reconnect_attempts: 0,
            ..fast_config()
        };
        let (handle, mut events) = WebSocketClient::connect(&server.url(), config).unwrap();
        let mut peer = server.accept().await;
        assert_eq!(events.recv().await, Some(WsEvent::Open));

        drop(peer);
        let exhausted = next_matching(&mut events, |e| {
            matches!(e, WsEvent::MaxReconnectAttempts { .. })
        })
        .await;
        assert!(exhausted.is_some());

        let accept = tokio::spawn(async move { server.accept().await });
        handle.reconnect().await.unwrap();
        let _peer = accept.await.unwrap();
        assert_eq!(handle.state().await.unwrap(), ConnectionState::Open);
    }

    #[tokio::test]
    async fn test_failed_pong_write_counts_one_failure() {
        let (stream, server_side) = tokio::io::duplex(64);
        drop(server_side);

        let (_tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let mut subscribers = Subscribers::new();
        let mut events = subscribers.subscribe();
        let url = WsUrl::parse("ws://127.0.0.1:9/").unwrap();
        let mut actor = Actor::new(url, fast_config(), rx, subscribers);
        actor.state = ConnectionState::Open;
        actor.conn = Some(Connection {
            stream: Box::new(stream),
            read_buf: frame::encode_with_mask(Opcode::Ping, b"hb", None),
            fragments: None,
            ping_sent_at: None,
        });

        actor.process_buffer().await;

        assert_eq!(actor.attempts, 1);
        assert!(actor.conn.is_none());
        assert!(matches!(events.try_recv(), Ok(WsEvent::Error { .. })));
        assert!(matches!(
            events.try_recv(),
            Ok(WsEvent::Reconnecting { attempt: 1, .. })
        ));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_rejected_handshake_schedules_reconnect() {
        let server = FakeServer::bind().await;
        let (_handle, mut events) = WebSocketClient::connect(&server.url(), fast_config()).unwrap();

        let _refused = server
            .accept_with_response("HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n")
            .await;
        assert!(matches!(events.recv().await, Some(WsEvent::Error { .. })));
        assert!(matches!(
            events.recv().await,
            Some(WsEvent::Reconnecting { attempt: 1, .. })
        ));

        let _no_upgrade = server
            .accept_with_response("HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\n\r\n")
            .await;
        assert!(matches!(events.recv().await, Some(WsEvent::Error { .. })));
        assert!(matches!(
            events.recv().await,
            Some(WsEvent::Reconnecting { attempt: 2, .. })
        ));

        let _peer = server.accept().await;
        assert_eq!(events.recv().await, Some(WsEvent::Open));
    }

    #[tokio::test]
    async fn test_handshake_timeout_schedules_reconnect() {
        let server = FakeServer::bind().await;
        let config = WebSocketConfig {
            connect_timeout_ms: 100,
            ..fast_config()
        };
        let (_handle, mut events) = WebSocketClient::connect(&server.url(), config).unwrap();

        let _silent = server.accept_without_reply().await;
        match events.recv().await {
            Some(WsEvent::Error { error }) => {
                assert_eq!(error, ChatError::ConnectTimeout { timeout_ms: 100 }.to_string())
            }
            other => panic!("expected timeout error, got {other:?}"),
        }
        assert!(matches!(
            events.recv().await,
            Some(WsEvent::Reconnecting { attempt: 1, .. })
        ));

        let _peer = server.accept().await;
        assert_eq!(events.recv().await, Some(WsEvent::Open));
    }

    #[tokio::test]
    async fn test_send_refused_after_exhaustion() {
        let url = FakeServer::unused_url().await;
        let config = WebSocketConfig {
            max_reconnect_attempts: 0,
            ..fast_config()
        };
        let (handle, mut events) = WebSocketClient::connect(&url, config).unwrap();

        let exhausted = next_matching(&mut events, |e| {
            matches!(e, WsEvent::MaxReconnectAttempts { .. })
        })
        .await;
        assert!(exhausted.is_some());

        assert!(matches!(
            handle.send("lost").await,
            Err(ChatError::ReconnectExhausted { attempts: 0 })
        ));
        assert_eq!(handle.queued().await.unwrap(), 0);
    }
}
