/// Pluggable log output
///
/// The transport never decides where log records end up: it hands each
/// filtered record to the installed `LogSink`. The application root picks the
/// sink (console, the `log` facade, or an in-memory buffer for tests).
use super::format::ConsoleSink;
use super::levels::LogLevel;
use super::tags::LogTag;
use chrono::{DateTime, Local};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// One filtered log record
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub timestamp: DateTime<Local>,
    pub tag: LogTag,
    pub level: LogLevel,
    pub message: String,
}

/// Destination for log records
pub trait LogSink: Send + Sync {
    fn write(&self, record: &LogRecord);

    fn flush(&self) {}
}

static SINK: Lazy<RwLock<Arc<dyn LogSink>>> = Lazy::new(|| RwLock::new(Arc::new(ConsoleSink)));

/// Install the sink used by every subsequent log call
pub fn set_sink(sink: Arc<dyn LogSink>) {
    *SINK.write() = sink;
}

pub(crate) fn current_sink() -> Arc<dyn LogSink> {
    SINK.read().clone()
}

/// Forwards records to the `log` facade (target = tag debug key)
pub struct LogFacadeSink;

impl LogSink for LogFacadeSink {
    fn write(&self, record: &LogRecord) {
        let target = record.tag.to_debug_key();
        log::log!(
            target: target.as_str(),
            record.level.to_log_level(),
            "{}",
            record.message
        );
    }

    fn flush(&self) {
        log::logger().flush();
    }
}

/// Keeps records in memory; used by tests to assert on logging
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<LogRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    pub fn contains(&self, tag: &LogTag, needle: &str) -> bool {
        self.records
            .lock()
            .iter()
            .any(|r| &r.tag == tag && r.message.contains(needle))
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl LogSink for MemorySink {
    fn write(&self, record: &LogRecord) {
        self.records.lock().push(record.clone());
    }
}
