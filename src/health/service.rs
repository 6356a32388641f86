use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::monitor::{ConnectionMonitor, MonitoredConnection, RecoveryDecision};
use super::types::{HealthEvent, HealthSnapshot, HealthTransition};
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerRegistry, RECONNECTION_BREAKER};
use crate::config::HealthConfig;
use crate::errors::{ChatError, ChatResult};
use crate::events::{EventReceiver, Subscribers};
use crate::logger::{self, LogTag};

type SharedSubscribers = Arc<Mutex<Subscribers<HealthEvent>>>;

struct MonitorEntry {
    state: Arc<Mutex<ConnectionMonitor>>,
    connection: Arc<dyn MonitoredConnection>,
    task: JoinHandle<()>,
}

/// HealthMonitor - liveness probing and recovery for registered connections
///
/// Each registered connection gets its own ping loop task:
/// - every `ping_interval` a ping is sent and a `ping_timeout` is armed
/// - an unanswered ping counts as a miss; `max_missed_pings` in a row marks
///   the connection unhealthy
/// - while unhealthy, reconnects are attempted with exponential backoff
///   through the shared "reconnection" circuit breaker
///
/// Pongs and other liveness evidence are reported by the connection owner
/// through `record_pong` / `record_activity`.
pub struct HealthMonitor {
    config: HealthConfig,
    breakers: Arc<CircuitBreakerRegistry>,
    entries: Mutex<HashMap<String, MonitorEntry>>,
    subscribers: SharedSubscribers,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        Self {
            config,
            breakers,
            entries: Mutex::new(HashMap::new()),
            subscribers: Arc::new(Mutex::new(Subscribers::new())),
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    pub fn subscribe(&self) -> EventReceiver<HealthEvent> {
        self.subscribers.lock().subscribe()
    }

    /// Register `connection` under `id` and start its ping loop
    ///
    /// Registering an id again replaces the previous monitor.
    pub fn start_monitoring(&self, id: &str, connection: Arc<dyn MonitoredConnection>) {
        let state = Arc::new(Mutex::new(ConnectionMonitor::new(id, self.config.clone())));
        let breaker = self.breakers.get_or_create(RECONNECTION_BREAKER);

        let task = tokio::spawn(ping_loop(PingLoop {
            id: id.to_string(),
            config: self.config.clone(),
            state: Arc::clone(&state),
            connection: Arc::clone(&connection),
            breaker,
            subscribers: Arc::clone(&self.subscribers),
        }));

        let previous = self.entries.lock().insert(
            id.to_string(),
            MonitorEntry {
                state,
                connection,
                task,
            },
        );
        if let Some(previous) = previous {
            previous.task.abort();
        }

        logger::info(
            LogTag::Health,
            &format!(
                "Monitoring '{}' (ping every {}ms, timeout {}ms, max missed {})",
                id,
                self.config.ping_interval_ms,
                self.config.ping_timeout_ms,
                self.config.max_missed_pings
            ),
        );
    }

    /// Deregister `id` and stop its ping loop
    pub fn stop_monitoring(&self, id: &str) -> bool {
        match self.entries.lock().remove(id) {
            Some(entry) => {
                entry.task.abort();
                logger::info(LogTag::Health, &format!("Stopped monitoring '{}'", id));
                true
            }
            None => false,
        }
    }

    pub fn is_monitoring(&self, id: &str) -> bool {
        self.entries.lock().contains_key(id)
    }

    /// Report a pong for `id`; returns the measured round-trip time
    pub fn record_pong(&self, id: &str) -> Option<Duration> {
        let state = self.state(id)?;
        let (latency, edge) = state.lock().record_pong(Instant::now());
        if let Some(latency) = latency {
            logger::verbose(
                LogTag::Health,
                &format!("'{}' pong after {}ms", id, latency.as_millis()),
            );
        }
        self.apply_edge(&state, edge);
        latency
    }

    /// Report inbound traffic that proves `id` is alive
    pub fn record_activity(&self, id: &str) {
        if let Some(state) = self.state(id) {
            let edge = state.lock().record_activity();
            self.apply_edge(&state, edge);
        }
    }

    pub fn snapshot(&self, id: &str) -> Option<HealthSnapshot> {
        self.state(id).map(|s| s.lock().snapshot())
    }

    /// Snapshots of every monitored connection, sorted by id
    pub fn snapshots(&self) -> Vec<HealthSnapshot> {
        let mut all: Vec<HealthSnapshot> = self
            .entries
            .lock()
            .values()
            .map(|e| e.state.lock().snapshot())
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Reconnect `id` now, outside the backoff schedule
    ///
    /// Also re-enables automatic recovery after it halted. The call bypasses
    /// the reconnection breaker.
    pub async fn force_reconnect(&self, id: &str) -> ChatResult<()> {
        let (state, connection) = {
            let entries = self.entries.lock();
            let entry = entries
                .get(id)
                .ok_or_else(|| ChatError::UnknownConnection(id.to_string()))?;
            (Arc::clone(&entry.state), Arc::clone(&entry.connection))
        };

        logger::info(LogTag::Health, &format!("Forced reconnect of '{}'", id));
        state.lock().reset_recovery();

        connection.reconnect().await?;
        let edge = state.lock().record_recovered();
        self.apply_edge(&state, edge);
        Ok(())
    }

    fn state(&self, id: &str) -> Option<Arc<Mutex<ConnectionMonitor>>> {
        self.entries.lock().get(id).map(|e| Arc::clone(&e.state))
    }

    fn apply_edge(&self, state: &Mutex<ConnectionMonitor>, edge: Option<HealthTransition>) {
        emit_edge(&self.subscribers, state, edge);
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        for (_, entry) in self.entries.lock().drain() {
            entry.task.abort();
        }
    }
}

fn emit_edge(
    subscribers: &SharedSubscribers,
    state: &Mutex<ConnectionMonitor>,
    edge: Option<HealthTransition>,
) {
    let Some(edge) = edge else {
        return;
    };

    let event = {
        let monitor = state.lock();
        match edge {
            HealthTransition::BecameHealthy => {
                logger::info(
                    LogTag::Health,
                    &format!(
                        "'{}' is healthy again (quality {:.0})",
                        monitor.id(),
                        monitor.quality_score()
                    ),
                );
                HealthEvent::Healthy {
                    id: monitor.id().to_string(),
                    quality: monitor.quality_score(),
                }
            }
            HealthTransition::BecameUnhealthy => {
                logger::warning(
                    LogTag::Health,
                    &format!(
                        "'{}' is unhealthy ({} missed pings)",
                        monitor.id(),
                        monitor.consecutive_failures()
                    ),
                );
                HealthEvent::Unhealthy {
                    id: monitor.id().to_string(),
                    consecutive_failures: monitor.consecutive_failures(),
                }
            }
        }
    };
    subscribers.lock().emit(event);
}

struct PingLoop {
    id: String,
    config: HealthConfig,
    state: Arc<Mutex<ConnectionMonitor>>,
    connection: Arc<dyn MonitoredConnection>,
    breaker: Arc<CircuitBreaker>,
    subscribers: SharedSubscribers,
}

async fn ping_loop(ctx: PingLoop) {
    let mut ticker = tokio::time::interval(ctx.config.ping_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let seq = ctx.state.lock().record_ping_sent(Instant::now());
        if let Err(e) = ctx.connection.send_ping().await {
            logger::debug(
                LogTag::Health,
                &format!("'{}' ping not sent: {}", ctx.id, e),
            );
        }

        tokio::time::sleep(ctx.config.ping_timeout()).await;
        let missed = ctx.state.lock().record_missed_ping(seq);
        if let Some(edge) = missed {
            logger::debug(
                LogTag::Health,
                &format!("'{}' missed ping #{}", ctx.id, seq),
            );
            emit_edge(&ctx.subscribers, &ctx.state, edge);
        }

        attempt_recovery(&ctx).await;
    }
}

async fn attempt_recovery(ctx: &PingLoop) {
    let decision = ctx.state.lock().begin_recovery(Instant::now());
    match decision {
        RecoveryDecision::NotNeeded => {}
        RecoveryDecision::Wait { remaining } => {
            logger::debug(
                LogTag::Health,
                &format!(
                    "'{}' recovery backing off for another {}ms",
                    ctx.id,
                    remaining.as_millis()
                ),
            );
        }
        RecoveryDecision::Halted { first } => {
            if first {
                let attempts = ctx.state.lock().reconnect_attempts();
                logger::error(
                    LogTag::Health,
                    &format!(
                        "'{}' automatic recovery halted after {} attempts",
                        ctx.id, attempts
                    ),
                );
                ctx.subscribers.lock().emit(HealthEvent::RecoveryHalted {
                    id: ctx.id.clone(),
                    attempts,
                });
            }
        }
        RecoveryDecision::Attempt { attempt } => {
            logger::info(
                LogTag::Health,
                &format!(
                    "'{}' recovery attempt {}/{}",
                    ctx.id, attempt, ctx.config.max_reconnect_attempts
                ),
            );

            let connection = Arc::clone(&ctx.connection);
            match ctx.breaker.call(move || async move { connection.reconnect().await }).await {
                Ok(()) => {
                    let edge = ctx.state.lock().record_recovered();
                    emit_edge(&ctx.subscribers, &ctx.state, edge);
                }
                Err(e) if e.is_rejection() => {
                    logger::debug(
                        LogTag::Health,
                        &format!("'{}' recovery deferred: {}", ctx.id, e),
                    );
                }
                Err(e) => {
                    logger::warning(
                        LogTag::Health,
                        &format!("'{}' recovery attempt {} failed: {}", ctx.id, attempt, e),
                    );
                }
            }
        }
    }
}
