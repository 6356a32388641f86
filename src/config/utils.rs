use super::schemas::Config;
/// Configuration utilities - loading, validation and persistence
///
/// The configuration is loaded once by the application root and handed to the
/// components that need it; nothing in the transport reads a global config.
use crate::errors::ConfigError;
use crate::logger::{self, LogTag};
use std::path::Path;

/// Default configuration file path
pub const CONFIG_FILE_PATH: &str = "data/config.toml";

/// Load configuration from the default path
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from_path(CONFIG_FILE_PATH)
}

/// Load configuration from a specific TOML file
///
/// A missing file is not an error: defaults from the schema definitions are
/// used instead. The loaded configuration is validated before it is returned.
pub fn load_config_from_path(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let display = path.display().to_string();

    let config = if path.exists() {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: display.clone(),
            error: e.to_string(),
        })?;
        parse_config(&contents).map_err(|e| match e {
            ConfigError::Parse { error, .. } => ConfigError::Parse {
                path: display.clone(),
                error,
            },
            other => other,
        })?
    } else {
        logger::warning(
            LogTag::Config,
            &format!("Config file '{}' not found, using default values", display),
        );
        Config::default()
    };

    config.validate()?;

    logger::debug(
        LogTag::Config,
        &format!(
            "Configuration loaded from '{}' (url={}, nick={})",
            display, config.connection.url, config.connection.nick
        ),
    );

    Ok(config)
}

/// Parse configuration from a TOML string without validating it
pub fn parse_config(contents: &str) -> Result<Config, ConfigError> {
    toml::from_str::<Config>(contents).map_err(|e| ConfigError::Parse {
        path: "<string>".to_string(),
        error: e.to_string(),
    })
}

/// Write the configuration to disk as pretty TOML
pub fn save_config(config: &Config, path: impl AsRef<Path>) -> Result<(), ConfigError> {
    let path = path.as_ref();
    let display = path.display().to_string();

    let contents = toml::to_string_pretty(config).map_err(|e| ConfigError::Parse {
        path: display.clone(),
        error: e.to_string(),
    })?;

    std::fs::write(path, contents).map_err(|e| ConfigError::Read {
        path: display,
        error: e.to_string(),
    })
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidField {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

impl Config {
    /// Reject values the transport cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = &self.connection.url;
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(invalid("connection.url", "must start with ws:// or wss://"));
        }
        if self.connection.nick.trim().is_empty() {
            return Err(invalid("connection.nick", "must not be empty"));
        }

        let ws = &self.websocket;
        if ws.send_rate_limit == 0 || ws.send_rate_window_ms == 0 {
            return Err(invalid("websocket.send_rate_limit", "limit and window must be non-zero"));
        }
        if ws.ping_interval_ms == 0 || ws.queue_drain_interval_ms == 0 {
            return Err(invalid("websocket", "intervals must be non-zero"));
        }

        let irc = &self.irc;
        if irc.message_rate_limit == 0 || irc.message_rate_window_ms == 0 {
            return Err(invalid("irc.message_rate_limit", "limit and window must be non-zero"));
        }
        if irc.join_rate_limit == 0 || irc.join_rate_window_ms == 0 {
            return Err(invalid("irc.join_rate_limit", "limit and window must be non-zero"));
        }
        if irc.queue_drain_interval_ms == 0 {
            return Err(invalid("irc.queue_drain_interval_ms", "must be non-zero"));
        }

        let cb = &self.circuit_breaker;
        if cb.failure_threshold == 0 || cb.success_threshold == 0 {
            return Err(invalid("circuit_breaker", "thresholds must be non-zero"));
        }

        let health = &self.health;
        if health.max_missed_pings == 0 {
            return Err(invalid("health.max_missed_pings", "must be non-zero"));
        }
        if health.ping_interval_ms == 0 || health.latency_threshold_ms == 0 {
            return Err(invalid("health", "ping interval and latency threshold must be non-zero"));
        }
        if health.quality_window_size == 0 {
            return Err(invalid("health.quality_window_size", "must be non-zero"));
        }
        if health.backoff_multiplier < 1.0 {
            return Err(invalid("health.backoff_multiplier", "must be >= 1.0"));
        }

        if logger::LogLevel::from_str(&self.logging.min_level).is_none() {
            return Err(invalid("logging.min_level", "unknown level"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from_path(dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.irc.message_rate_limit, 20);
        assert_eq!(cfg.irc.join_rate_window_ms, 15_000);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[connection]\nnick = \"somebot\"\nchannels = [\"#foo\"]\n\n[health]\nmax_missed_pings = 5\n"
        )
        .unwrap();

        let cfg = load_config_from_path(file.path()).unwrap();
        assert_eq!(cfg.connection.nick, "somebot");
        assert_eq!(cfg.connection.channels, vec!["#foo".to_string()]);
        assert_eq!(cfg.health.max_missed_pings, 5);
        assert_eq!(cfg.health.quality_window_size, 10);
        assert_eq!(cfg.websocket.reconnect_interval_ms, 5_000);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = parse_config("[irc]\nmessage_rate_limt = 3\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut cfg = Config::default();
        cfg.connection.url = "https://example.com".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.irc.join_rate_limit = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.logging.min_level = "loud".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut cfg = Config::default();
        cfg.circuit_breaker.failure_threshold = 7;
        save_config(&cfg, &path).unwrap();

        let loaded = load_config_from_path(&path).unwrap();
        assert_eq!(loaded.circuit_breaker.failure_threshold, 7);
    }
}
