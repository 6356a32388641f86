/// Logger configuration: level threshold and per-tag debug switches
use super::levels::LogLevel;
use super::tags::LogTag;
use crate::config::LoggingConfig;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Records above this level are dropped
    pub min_level: LogLevel,
    /// Tags (debug keys) with debug output enabled
    pub debug_tags: HashSet<String>,
    /// Tags with verbose output enabled
    pub verbose_tags: HashSet<String>,
    /// When non-empty, only these tags are logged below error level
    pub enabled_tags: HashSet<String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
            debug_tags: HashSet::new(),
            verbose_tags: HashSet::new(),
            enabled_tags: HashSet::new(),
        }
    }
}

impl LoggerConfig {
    /// Build from the `[logging]` config section
    pub fn from_logging_config(cfg: &LoggingConfig) -> Self {
        let mut min_level = LogLevel::from_str(&cfg.min_level).unwrap_or(LogLevel::Info);
        let debug_tags: HashSet<String> =
            cfg.debug_tags.iter().map(|t| t.to_lowercase()).collect();

        // Debug tags imply a debug threshold
        if !debug_tags.is_empty() && min_level < LogLevel::Debug {
            min_level = LogLevel::Debug;
        }
        if cfg.verbose {
            min_level = LogLevel::Verbose;
        }

        Self {
            min_level,
            debug_tags,
            ..Self::default()
        }
    }
}

static LOGGER_CONFIG: Lazy<RwLock<LoggerConfig>> =
    Lazy::new(|| RwLock::new(LoggerConfig::default()));

pub fn get_logger_config() -> LoggerConfig {
    LOGGER_CONFIG.read().clone()
}

pub fn set_logger_config(config: LoggerConfig) {
    *LOGGER_CONFIG.write() = config;
}

pub fn update_logger_config<F: FnOnce(&mut LoggerConfig)>(f: F) {
    f(&mut LOGGER_CONFIG.write());
}

pub fn is_debug_enabled_for_tag(tag: &LogTag) -> bool {
    let config = LOGGER_CONFIG.read();
    config.min_level == LogLevel::Verbose || config.debug_tags.contains(&tag.to_debug_key())
}

pub fn is_verbose_enabled_for_tag(tag: &LogTag) -> bool {
    LOGGER_CONFIG.read().verbose_tags.contains(&tag.to_debug_key())
}
