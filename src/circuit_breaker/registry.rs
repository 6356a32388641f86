//! Named circuit breakers shared across the transport
//!
//! Fetch-or-create is idempotent: every caller asking for "reconnection" gets
//! the same breaker, so failures observed by one monitor trip it for all.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::state::{CircuitBreaker, CircuitBreakerStatus, CircuitState};
use crate::config::CircuitBreakerConfig;
use crate::logger::{self, LogTag};

pub struct CircuitBreakerRegistry {
    default_config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            default_config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Get the named breaker, creating it with the default config
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        self.get_or_create_with(name, self.default_config.clone())
    }

    /// Get the named breaker, creating it with `config` if absent
    ///
    /// An existing breaker keeps its original config.
    pub fn get_or_create_with(&self, name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock();
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                logger::debug(
                    LogTag::CircuitBreaker,
                    &format!(
                        "Registered circuit '{}' (failure_threshold={}, recovery_timeout={}ms)",
                        name, config.failure_threshold, config.recovery_timeout_ms
                    ),
                );
                Arc::new(CircuitBreaker::new(name, config))
            })
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.lock().get(name).cloned()
    }

    pub fn remove(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.lock().remove(name)
    }

    /// Status of every registered breaker, sorted by name
    pub fn health_report(&self) -> Vec<CircuitBreakerStatus> {
        let mut report: Vec<CircuitBreakerStatus> =
            self.breakers.lock().values().map(|b| b.status()).collect();
        report.sort_by(|a, b| a.name.cmp(&b.name));
        report
    }

    /// True when no registered breaker is open or probing
    pub fn all_closed(&self) -> bool {
        self.breakers
            .lock()
            .values()
            .all(|b| b.state() == CircuitState::Closed)
    }

    pub fn len(&self) -> usize {
        self.breakers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.lock().is_empty()
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
