/// Structured error types for the chat transport
///
/// Every failure the transport can observe is one of these variants. Transient
/// networking problems are classified with `is_recoverable()` so the reconnect
/// drivers can decide whether to schedule another attempt.
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// FRAME ERRORS
// =============================================================================

/// Errors produced while decoding a WebSocket frame.
///
/// "Not enough bytes yet" is deliberately absent: the decoder reports that as
/// `Ok(None)` and the caller waits for more data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("unknown opcode 0x{0:x}")]
    UnknownOpcode(u8),

    #[error("reserved bits set without a negotiated extension (0x{0:x})")]
    ReservedBits(u8),

    #[error("control frame payload too large ({0} bytes)")]
    ControlFrameTooLarge(usize),

    #[error("fragmented control frame")]
    FragmentedControlFrame,

    #[error("frame payload of {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: u64, limit: usize },

    #[error("continuation frame without a message in progress")]
    UnexpectedContinuation,

    #[error("new data frame while a fragmented message is in progress")]
    InterleavedMessage,

    #[error("invalid UTF-8 in text payload")]
    InvalidUtf8,

    #[error("invalid close payload")]
    InvalidClosePayload,
}

// =============================================================================
// HANDSHAKE ERRORS
// =============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("unexpected status {status}: {line}")]
    UnexpectedStatus { status: u16, line: String },

    #[error("missing 'Upgrade: websocket' header")]
    MissingUpgrade,

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("response headers exceed {0} bytes")]
    TooLarge(usize),

    #[error("connection closed during handshake")]
    ConnectionClosed,
}

// =============================================================================
// CONFIGURATION ERRORS
// =============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {error}")]
    Read { path: String, error: String },

    #[error("Failed to parse config file '{path}': {error}")]
    Parse { path: String, error: String },

    #[error("Invalid config field '{field}': {reason}")]
    InvalidField { field: String, reason: String },
}

// =============================================================================
// CIRCUIT BREAKER ERRORS
// =============================================================================

/// Outcome of a call rejected or failed through a circuit breaker
#[derive(Error, Debug)]
pub enum CircuitBreakerError<E> {
    /// Breaker is open; the wrapped function was not invoked
    #[error("circuit '{name}' is open, retry in {retry_in:?}")]
    Open { name: String, retry_in: Duration },

    /// The call completed but took longer than the configured timeout
    #[error("call through circuit '{name}' exceeded {timeout:?} (took {elapsed:?})")]
    Timeout {
        name: String,
        timeout: Duration,
        elapsed: Duration,
    },

    /// The wrapped function itself failed
    #[error("{0}")]
    Inner(E),
}

impl<E> CircuitBreakerError<E> {
    pub fn is_rejection(&self) -> bool {
        matches!(self, CircuitBreakerError::Open { .. })
    }
}

// =============================================================================
// MAIN ERROR TYPE
// =============================================================================

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Connect timeout: no handshake within {timeout_ms}ms")]
    ConnectTimeout { timeout_ms: u64 },

    #[error("Handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Pong not received within {timeout_ms}ms")]
    PongTimeout { timeout_ms: u64 },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Connection is not open")]
    NotConnected,

    #[error("Session is not authenticated")]
    NotAuthenticated,

    #[error("Reconnect attempts exhausted after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("Circuit '{name}' is open, retry in {retry_in:?}")]
    CircuitOpen { name: String, retry_in: Duration },

    #[error("Operation timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    #[error("IRC parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Unknown connection: {0}")]
    UnknownConnection(String),

    #[error("Actor has shut down")]
    ActorGone,
}

impl ChatError {
    /// Whether the failure is transient and worth another reconnect attempt
    pub fn is_recoverable(&self) -> bool {
        match self {
            ChatError::Io(_) => true,
            ChatError::Tls(_) => true,
            ChatError::ConnectTimeout { .. } => true,
            ChatError::Handshake(_) => true,
            ChatError::Frame(_) => true,
            ChatError::PongTimeout { .. } => true,
            ChatError::ConnectionClosed => true,
            ChatError::NotConnected => true,
            ChatError::CircuitOpen { .. } => true,
            ChatError::Timeout { .. } => true,
            _ => false,
        }
    }

    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        ChatError::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }
}

impl<E: Into<ChatError>> From<CircuitBreakerError<E>> for ChatError {
    fn from(err: CircuitBreakerError<E>) -> Self {
        match err {
            CircuitBreakerError::Open { name, retry_in } => ChatError::CircuitOpen { name, retry_in },
            CircuitBreakerError::Timeout { elapsed, .. } => ChatError::Timeout { elapsed },
            CircuitBreakerError::Inner(e) => e.into(),
        }
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
