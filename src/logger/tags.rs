/// Log tags identify the subsystem a record comes from
///
/// Debug output is enabled per tag, using the lower-case key from
/// `to_debug_key()` (e.g. `debug_tags = ["websocket"]`).
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogTag {
    System,
    Config,
    WebSocket,
    Irc,
    Session,
    RateLimit,
    CircuitBreaker,
    Health,
    Test,
    Other(String),
}

impl LogTag {
    /// Key used in `debug_tags` and CLI `--debug` values
    pub fn to_debug_key(&self) -> String {
        match self {
            LogTag::System => "system".to_string(),
            LogTag::Config => "config".to_string(),
            LogTag::WebSocket => "websocket".to_string(),
            LogTag::Irc => "irc".to_string(),
            LogTag::Session => "session".to_string(),
            LogTag::RateLimit => "ratelimit".to_string(),
            LogTag::CircuitBreaker => "breaker".to_string(),
            LogTag::Health => "health".to_string(),
            LogTag::Test => "test".to_string(),
            LogTag::Other(s) => s.to_lowercase(),
        }
    }

    /// Short upper-case label used in console output
    pub fn to_plain_string(&self) -> String {
        match self {
            LogTag::System => "SYSTEM".to_string(),
            LogTag::Config => "CONFIG".to_string(),
            LogTag::WebSocket => "WS".to_string(),
            LogTag::Irc => "IRC".to_string(),
            LogTag::Session => "SESSION".to_string(),
            LogTag::RateLimit => "RATELIMIT".to_string(),
            LogTag::CircuitBreaker => "BREAKER".to_string(),
            LogTag::Health => "HEALTH".to_string(),
            LogTag::Test => "TEST".to_string(),
            LogTag::Other(s) => s.to_uppercase(),
        }
    }
}

impl std::fmt::Display for LogTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_plain_string())
    }
}
