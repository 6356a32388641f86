//! Structured, tagged logging for the chat transport
//!
//! - Standard levels (Error/Warning/Info/Debug/Verbose)
//! - Per-subsystem debug control through `LogTag` keys
//! - Output through an injectable `LogSink`
//!
//! ## Usage
//!
//! ```rust
//! use chatwire::logger::{self, LogTag};
//!
//! logger::info(LogTag::WebSocket, "Connection open");
//! logger::debug(LogTag::Irc, "Raw line: ..."); // Only with debug enabled for "irc"
//! ```
//!
//! Call `logger::init()` once at startup with the `[logging]` section; tests
//! and embedders can swap the output with `logger::set_sink()`.

mod config;
mod core;
mod format;
mod levels;
mod sink;
mod tags;

use crate::config::LoggingConfig;
use std::sync::Arc;

pub use config::{get_logger_config, set_logger_config, update_logger_config, LoggerConfig};
pub use format::ConsoleSink;
pub use levels::LogLevel;
pub use sink::{set_sink, LogFacadeSink, LogRecord, LogSink, MemorySink};
pub use tags::LogTag;

/// Initialize filtering and the output sink from configuration
///
/// `sink = "log"` routes records through the `log` facade; with the `logging`
/// feature the facade is backed by `env_logger`.
pub fn init(cfg: &LoggingConfig) {
    set_logger_config(LoggerConfig::from_logging_config(cfg));

    if cfg.sink.eq_ignore_ascii_case("log") {
        #[cfg(feature = "logging")]
        {
            let _ = env_logger::Builder::from_default_env()
                .filter_level(log::LevelFilter::Trace)
                .try_init();
        }
        set_sink(Arc::new(LogFacadeSink));
    } else {
        set_sink(Arc::new(ConsoleSink));
    }
}

/// Log at ERROR level (always shown)
pub fn error(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Error, message);
}

/// Log at WARNING level
pub fn warning(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Warning, message);
}

/// Log at INFO level
pub fn info(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Info, message);
}

/// Log at DEBUG level, only when debug is enabled for `tag`
pub fn debug(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Debug, message);
}

/// Log at VERBOSE level, only in verbose mode
pub fn verbose(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Verbose, message);
}

/// Flush the installed sink
pub fn flush() {
    sink::current_sink().flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filtering_rules() {
        let base = LoggerConfig {
            min_level: LogLevel::Debug,
            debug_tags: ["irc".to_string()].into_iter().collect(),
            ..LoggerConfig::default()
        };
        set_logger_config(base);

        assert!(core::should_log(&LogTag::WebSocket, LogLevel::Error));
        assert!(core::should_log(&LogTag::WebSocket, LogLevel::Info));
        assert!(core::should_log(&LogTag::Irc, LogLevel::Debug));
        assert!(!core::should_log(&LogTag::WebSocket, LogLevel::Debug));
        assert!(!core::should_log(&LogTag::Irc, LogLevel::Verbose));

        set_logger_config(LoggerConfig::default());
    }

    #[test]
    fn test_from_logging_config_raises_threshold_for_debug_tags() {
        let cfg = LoggingConfig {
            debug_tags: vec!["WebSocket".to_string()],
            ..LoggingConfig::default()
        };
        let lc = LoggerConfig::from_logging_config(&cfg);
        assert_eq!(lc.min_level, LogLevel::Debug);
        assert!(lc.debug_tags.contains("websocket"));
    }
}
