/// Core logging implementation with automatic filtering
///
/// Decides whether a record passes the configured rules, stamps it and hands
/// it to the installed sink.
use super::config::{get_logger_config, is_debug_enabled_for_tag, is_verbose_enabled_for_tag};
use super::levels::LogLevel;
use super::sink::{current_sink, LogRecord};
use super::tags::LogTag;
use chrono::Local;

/// Check if a record should be emitted
///
/// Filtering rules:
/// 1. Errors are always shown
/// 2. Check against minimum log level threshold
/// 3. Debug level requires debug mode for that tag
/// 4. Verbose level requires global verbose OR per-tag verbose
/// 5. If enabled_tags is non-empty, tag must be in the set
pub fn should_log(tag: &LogTag, level: LogLevel) -> bool {
    if level == LogLevel::Error {
        return true;
    }

    let config = get_logger_config();

    if level > config.min_level && !(level == LogLevel::Verbose && is_verbose_enabled_for_tag(tag))
    {
        return false;
    }

    if level == LogLevel::Debug {
        return is_debug_enabled_for_tag(tag);
    }

    if level == LogLevel::Verbose {
        return config.min_level == LogLevel::Verbose || is_verbose_enabled_for_tag(tag);
    }

    if !config.enabled_tags.is_empty() && !config.enabled_tags.contains(&tag.to_debug_key()) {
        return false;
    }

    true
}

pub fn log_internal(tag: LogTag, level: LogLevel, message: &str) {
    if !should_log(&tag, level) {
        return;
    }

    let record = LogRecord {
        timestamp: Local::now(),
        tag,
        level,
        message: message.to_string(),
    };
    current_sink().write(&record);
}
