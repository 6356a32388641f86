//! Circuit breaker state machine

use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::time::{Duration, Instant};

use crate::config::CircuitBreakerConfig;
use crate::errors::CircuitBreakerError;
use crate::logger::{self, LogTag};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    /// Consecutive failures while closed
    failures: u32,
    /// Consecutive successes while half-open
    successes: u32,
    last_failure: Option<Instant>,
    total_opens: u64,
    last_error: Option<String>,
}

/// Named circuit breaker guarding one dependency
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: &str, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                last_failure: None,
                total_opens: 0,
                last_error: None,
            }),
        }
    }

    pub fn with_defaults(name: &str) -> Self {
        Self::new(name, CircuitBreakerConfig::default())
    }

    /// Run `f` through the breaker
    ///
    /// Rejected without invoking `f` while open. A call that returns `Ok` but
    /// took longer than `config.timeout` is recorded as a failure and reported
    /// as `Timeout`; the call itself is never cancelled.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        if let Err(retry_in) = self.can_execute() {
            logger::debug(
                LogTag::CircuitBreaker,
                &format!("Circuit '{}' open, rejecting call (retry in {:?})", self.name, retry_in),
            );
            return Err(CircuitBreakerError::Open {
                name: self.name.clone(),
                retry_in,
            });
        }

        let started = Instant::now();
        let result = f().await;
        let elapsed = started.elapsed();

        match result {
            Ok(_) if elapsed > self.config.timeout() => {
                self.record_failure(&format!("call took {:?}", elapsed));
                Err(CircuitBreakerError::Timeout {
                    name: self.name.clone(),
                    timeout: self.config.timeout(),
                    elapsed,
                })
            }
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure(&e.to_string());
                Err(CircuitBreakerError::Inner(e))
            }
        }
    }

    /// Check if the breaker admits a call
    ///
    /// Returns `Err` with the remaining cooldown while open. Once the recovery
    /// timeout has elapsed the breaker moves to half-open and admits the call.
    pub fn can_execute(&self) -> Result<(), Duration> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let recovery = self.config.recovery_timeout();
                let elapsed = inner
                    .last_failure
                    .map(|t| t.elapsed())
                    .unwrap_or(recovery);
                if elapsed >= recovery {
                    inner.state = CircuitState::HalfOpen;
                    inner.successes = 0;
                    logger::info(
                        LogTag::CircuitBreaker,
                        &format!("Circuit '{}' OPEN -> HALF_OPEN", self.name),
                    );
                    Ok(())
                } else {
                    Err(recovery - elapsed)
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.successes += 1;
                if inner.successes >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failures = 0;
                    inner.successes = 0;
                    inner.last_error = None;
                    logger::info(
                        LogTag::CircuitBreaker,
                        &format!("Circuit '{}' HALF_OPEN -> CLOSED", self.name),
                    );
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self, error: &str) {
        let mut inner = self.inner.lock();
        inner.last_error = Some(error.to_string());
        inner.last_failure = Some(Instant::now());

        match inner.state {
            CircuitState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.total_opens += 1;
                    logger::warning(
                        LogTag::CircuitBreaker,
                        &format!(
                            "Circuit '{}' CLOSED -> OPEN after {} consecutive failures (last: {})",
                            self.name, inner.failures, error
                        ),
                    );
                }
            }
            CircuitState::HalfOpen => {
                // Zero tolerance while probing
                inner.state = CircuitState::Open;
                inner.successes = 0;
                inner.total_opens += 1;
                logger::warning(
                    LogTag::CircuitBreaker,
                    &format!("Circuit '{}' HALF_OPEN -> OPEN: {}", self.name, error),
                );
            }
            CircuitState::Open => {}
        }
    }

    /// Force the circuit closed and clear counters
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.successes = 0;
        inner.last_failure = None;
        inner.last_error = None;
        logger::info(LogTag::CircuitBreaker, &format!("Circuit '{}' reset", self.name));
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failures
    }

    pub fn success_count(&self) -> u32 {
        self.inner.lock().successes
    }

    pub fn status(&self) -> CircuitBreakerStatus {
        let inner = self.inner.lock();
        let time_until_half_open = match inner.state {
            CircuitState::Open => inner.last_failure.map(|t| {
                self.config
                    .recovery_timeout()
                    .saturating_sub(t.elapsed())
            }),
            _ => None,
        };
        CircuitBreakerStatus {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failures,
            success_count: inner.successes,
            total_opens: inner.total_opens,
            last_error: inner.last_error.clone(),
            time_until_half_open_ms: time_until_half_open.map(|d| d.as_millis() as u64),
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &inner.state)
            .field("failures", &inner.failures)
            .field("successes", &inner.successes)
            .finish()
    }
}

/// Point-in-time view of a breaker for health reporting
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStatus {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub total_opens: u64,
    pub last_error: Option<String>,
    pub time_until_half_open_ms: Option<u64>,
}
