/// Configuration schemas - every section declared once with its defaults
///
/// Durations are plain millisecond integers so the TOML file stays readable;
/// each section exposes `Duration` accessors for the code that consumes it.
use crate::config_struct;
use std::time::Duration;

// ============================================================================
// CONNECTION
// ============================================================================

config_struct! {
    /// Endpoint and credentials
    pub struct ConnectionConfig {
        /// IRC-over-WebSocket endpoint (ws:// or wss://)
        url: String = "wss://irc-ws.chat.twitch.tv:443".to_string(),
        /// Login nick; anonymous read-only logins use a justinfan nick
        nick: String = "justinfan12345".to_string(),
        /// OAuth token sent as PASS (empty = no PASS line)
        pass: String = String::new(),
        /// Channels joined automatically once authenticated
        channels: Vec<String> = Vec::new(),
    }
}

// ============================================================================
// WEBSOCKET TRANSPORT
// ============================================================================

config_struct! {
    /// WebSocket client timers, reconnection and outbound pacing
    pub struct WebSocketConfig {
        connect_timeout_ms: u64 = 10_000,
        reconnect_interval_ms: u64 = 5_000,
        max_reconnect_attempts: u32 = 10,

        // Heartbeat
        ping_interval_ms: u64 = 30_000,
        pong_timeout_ms: u64 = 10_000,

        // Outbound queue pacing
        send_rate_limit: usize = 100,
        send_rate_window_ms: u64 = 30_000,
        queue_drain_interval_ms: u64 = 100,

        /// Largest inbound frame payload accepted
        max_frame_size: usize = 16 * 1024 * 1024,
    }
}

impl WebSocketConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms)
    }

    pub fn send_rate_window(&self) -> Duration {
        Duration::from_millis(self.send_rate_window_ms)
    }

    pub fn queue_drain_interval(&self) -> Duration {
        Duration::from_millis(self.queue_drain_interval_ms)
    }
}

// ============================================================================
// IRC SESSION
// ============================================================================

config_struct! {
    /// Chat-level pacing and capability negotiation
    pub struct IrcConfig {
        // PRIVMSG pacing
        message_rate_limit: usize = 20,
        message_rate_window_ms: u64 = 30_000,

        // JOIN pacing
        join_rate_limit: usize = 50,
        join_rate_window_ms: u64 = 15_000,

        /// Period of the queue drain tick
        queue_drain_interval_ms: u64 = 1_000,

        /// Capabilities requested with CAP REQ
        capabilities: Vec<String> = vec![
            "twitch.tv/tags".to_string(),
            "twitch.tv/commands".to_string(),
            "twitch.tv/membership".to_string(),
        ],

        /// Rejoin previously joined channels after re-authentication
        rejoin_on_reconnect: bool = true,
    }
}

impl IrcConfig {
    pub fn message_rate_window(&self) -> Duration {
        Duration::from_millis(self.message_rate_window_ms)
    }

    pub fn join_rate_window(&self) -> Duration {
        Duration::from_millis(self.join_rate_window_ms)
    }

    pub fn queue_drain_interval(&self) -> Duration {
        Duration::from_millis(self.queue_drain_interval_ms)
    }
}

// ============================================================================
// CIRCUIT BREAKER
// ============================================================================

config_struct! {
    /// Thresholds for a named circuit breaker
    pub struct CircuitBreakerConfig {
        /// Consecutive failures that trip the circuit
        failure_threshold: u32 = 5,
        /// Time the circuit stays open before a probe is allowed
        recovery_timeout_ms: u64 = 60_000,
        /// Consecutive half-open successes needed to close
        success_threshold: u32 = 2,
        /// Calls slower than this count as failures
        timeout_ms: u64 = 10_000,
    }
}

impl CircuitBreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// ============================================================================
// HEALTH MONITOR
// ============================================================================

config_struct! {
    /// Liveness probing, quality scoring and recovery backoff
    pub struct HealthConfig {
        ping_interval_ms: u64 = 30_000,
        ping_timeout_ms: u64 = 10_000,
        max_missed_pings: u32 = 3,

        // Quality score inputs
        latency_threshold_ms: u64 = 1_000,
        quality_window_size: usize = 10,

        // Recovery backoff
        reconnect_interval_ms: u64 = 5_000,
        backoff_multiplier: f64 = 2.0,
        max_backoff_interval_ms: u64 = 300_000,
        max_reconnect_attempts: u32 = 10,
    }
}

impl HealthConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }
}

// ============================================================================
// LOGGING
// ============================================================================

config_struct! {
    /// Log filtering and output selection
    pub struct LoggingConfig {
        /// error | warning | info | debug | verbose
        min_level: String = "info".to_string(),
        /// Tags with debug output enabled (e.g. ["websocket", "irc"])
        debug_tags: Vec<String> = Vec::new(),
        /// Enable verbose output for every tag
        verbose: bool = false,
        /// console | log
        sink: String = "console".to_string(),
    }
}

// ============================================================================
// ROOT
// ============================================================================

config_struct! {
    /// Complete transport configuration
    pub struct Config {
        connection: ConnectionConfig = ConnectionConfig::default(),
        websocket: WebSocketConfig = WebSocketConfig::default(),
        irc: IrcConfig = IrcConfig::default(),
        circuit_breaker: CircuitBreakerConfig = CircuitBreakerConfig::default(),
        health: HealthConfig = HealthConfig::default(),
        logging: LoggingConfig = LoggingConfig::default(),
    }
}
