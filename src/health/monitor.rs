//! Per-connection liveness bookkeeping
//!
//! `ConnectionMonitor` holds no I/O: the ping loop in `service` feeds it ping
//! sends, pongs and timeouts, and reads back health edges and recovery
//! decisions.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::types::{HealthSnapshot, HealthTransition};
use crate::config::HealthConfig;
use crate::errors::ChatResult;

/// A connection the health monitor can probe and restart
#[async_trait]
pub trait MonitoredConnection: Send + Sync {
    /// Send one protocol-level ping; the pong is reported back through
    /// `HealthMonitor::record_pong`
    async fn send_ping(&self) -> ChatResult<()>;

    /// Tear down and re-establish the connection
    async fn reconnect(&self) -> ChatResult<()>;
}

/// Whether the ping loop should run a recovery attempt this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryDecision {
    Attempt { attempt: u32 },
    /// Backoff delay since the previous attempt has not elapsed
    Wait { remaining: Duration },
    /// Attempts exhausted; `first` is true only on the tick that halts
    Halted { first: bool },
    NotNeeded,
}

pub struct ConnectionMonitor {
    id: String,
    config: HealthConfig,

    is_healthy: bool,
    consecutive_failures: u32,
    latencies: VecDeque<Duration>,

    /// Sequence number and send time of the unanswered ping
    outstanding: Option<(u64, Instant)>,
    next_seq: u64,

    reconnect_attempts: u32,
    last_reconnect: Option<Instant>,
    recovery_halted: bool,

    last_ping_sent: Option<DateTime<Utc>>,
    last_pong: Option<DateTime<Utc>>,
    last_reconnect_at: Option<DateTime<Utc>>,
}

impl ConnectionMonitor {
    pub fn new(id: &str, config: HealthConfig) -> Self {
        Self {
            id: id.to_string(),
            latencies: VecDeque::with_capacity(config.quality_window_size),
            config,
            is_healthy: true,
            consecutive_failures: 0,
            outstanding: None,
            next_seq: 0,
            reconnect_attempts: 0,
            last_reconnect: None,
            recovery_halted: false,
            last_ping_sent: None,
            last_pong: None,
            last_reconnect_at: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_healthy(&self) -> bool {
        self.is_healthy
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// Record a ping send and return its sequence number
    pub fn record_ping_sent(&mut self, now: Instant) -> u64 {
        self.next_seq += 1;
        self.outstanding = Some((self.next_seq, now));
        self.last_ping_sent = Some(Utc::now());
        self.next_seq
    }

    /// Record a pong; returns the measured latency and any health edge
    ///
    /// A pong with no ping outstanding still proves liveness but adds no
    /// latency sample.
    pub fn record_pong(&mut self, now: Instant) -> (Option<Duration>, Option<HealthTransition>) {
        let latency = self
            .outstanding
            .take()
            .map(|(_, sent)| now.saturating_duration_since(sent));

        if let Some(latency) = latency {
            if self.latencies.len() >= self.config.quality_window_size {
                self.latencies.pop_front();
            }
            self.latencies.push_back(latency);
        }
        self.last_pong = Some(Utc::now());
        self.consecutive_failures = 0;
        (latency, self.update_health())
    }

    /// Count ping `seq` as missed if it is still the outstanding one
    ///
    /// Returns `None` for a stale timeout (already answered or superseded).
    pub fn record_missed_ping(&mut self, seq: u64) -> Option<Option<HealthTransition>> {
        match self.outstanding {
            Some((current, _)) if current == seq => {
                self.outstanding = None;
                self.consecutive_failures += 1;
                Some(self.update_health())
            }
            _ => None,
        }
    }

    /// Inbound traffic other than a pong that still proves the peer is alive
    pub fn record_activity(&mut self) -> Option<HealthTransition> {
        self.consecutive_failures = 0;
        self.update_health()
    }

    fn update_health(&mut self) -> Option<HealthTransition> {
        let healthy = self.consecutive_failures < self.config.max_missed_pings;
        if healthy == self.is_healthy {
            return None;
        }
        self.is_healthy = healthy;
        Some(if healthy {
            HealthTransition::BecameHealthy
        } else {
            HealthTransition::BecameUnhealthy
        })
    }

    pub fn average_latency(&self) -> Option<Duration> {
        if self.latencies.is_empty() {
            return None;
        }
        let total: Duration = self.latencies.iter().sum();
        Some(total / self.latencies.len() as u32)
    }

    /// `100 - failure_penalty - latency_penalty`, clamped to 0..=100
    pub fn quality_score(&self) -> f64 {
        let failure_penalty = (self.consecutive_failures as f64
            / self.config.max_missed_pings as f64)
            * 50.0;

        let latency_penalty = match self.average_latency() {
            Some(avg) => {
                let threshold = self.config.latency_threshold_ms as f64;
                ((avg.as_secs_f64() * 1000.0 / threshold) * 30.0).min(30.0)
            }
            None => 0.0,
        };

        (100.0 - failure_penalty - latency_penalty).clamp(0.0, 100.0)
    }

    /// `min(reconnect_interval * multiplier^attempts, max_backoff_interval)`
    pub fn backoff_delay(&self) -> Duration {
        let base = self.config.reconnect_interval_ms as f64;
        let factor = self
            .config
            .backoff_multiplier
            .powi(self.reconnect_attempts.min(i32::MAX as u32) as i32);
        let millis = (base * factor).min(self.config.max_backoff_interval_ms as f64);
        Duration::from_millis(millis as u64)
    }

    /// Decide whether to attempt recovery now; counts the attempt if so
    pub fn begin_recovery(&mut self, now: Instant) -> RecoveryDecision {
        if self.is_healthy {
            return RecoveryDecision::NotNeeded;
        }
        if self.reconnect_attempts >= self.config.max_reconnect_attempts {
            let first = !self.recovery_halted;
            self.recovery_halted = true;
            return RecoveryDecision::Halted { first };
        }
        if let Some(last) = self.last_reconnect {
            let delay = self.backoff_delay();
            let elapsed = now.saturating_duration_since(last);
            if elapsed < delay {
                return RecoveryDecision::Wait {
                    remaining: delay - elapsed,
                };
            }
        }

        self.reconnect_attempts += 1;
        self.last_reconnect = Some(now);
        self.last_reconnect_at = Some(Utc::now());
        RecoveryDecision::Attempt {
            attempt: self.reconnect_attempts,
        }
    }

    /// A reconnect succeeded: clear failures and the attempt counter
    pub fn record_recovered(&mut self) -> Option<HealthTransition> {
        self.consecutive_failures = 0;
        self.reconnect_attempts = 0;
        self.recovery_halted = false;
        self.outstanding = None;
        self.update_health()
    }

    /// Re-enable automatic recovery after it halted
    pub fn reset_recovery(&mut self) {
        self.reconnect_attempts = 0;
        self.recovery_halted = false;
        self.last_reconnect = None;
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            id: self.id.clone(),
            is_healthy: self.is_healthy,
            consecutive_failures: self.consecutive_failures,
            latency_samples_ms: self
                .latencies
                .iter()
                .map(|d| d.as_millis() as u64)
                .collect(),
            average_latency_ms: self.average_latency().map(|d| d.as_secs_f64() * 1000.0),
            quality_score: self.quality_score(),
            reconnect_attempts: self.reconnect_attempts,
            recovery_halted: self.recovery_halted,
            last_ping_sent: self.last_ping_sent,
            last_pong: self.last_pong,
            last_reconnect: self.last_reconnect_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> HealthConfig {
        HealthConfig {
            max_missed_pings: 3,
            latency_threshold_ms: 1_000,
            quality_window_size: 3,
            reconnect_interval_ms: 100,
            backoff_multiplier: 2.0,
            max_backoff_interval_ms: 350,
            max_reconnect_attempts: 2,
            ..HealthConfig::default()
        }
    }

    fn miss(monitor: &mut ConnectionMonitor) -> Option<HealthTransition> {
        let seq = monitor.record_ping_sent(Instant::now());
        monitor.record_missed_ping(seq).flatten()
    }

    #[test]
    fn test_unhealthy_edge_fires_once() {
        let mut monitor = ConnectionMonitor::new("c1", config());
        assert_eq!(miss(&mut monitor), None);
        assert_eq!(miss(&mut monitor), None);
        assert_eq!(miss(&mut monitor), Some(HealthTransition::BecameUnhealthy));
        assert!(!monitor.is_healthy());
        assert_eq!(miss(&mut monitor), None);
        assert_eq!(monitor.consecutive_failures(), 4);

        monitor.record_ping_sent(Instant::now());
        let (latency, edge) = monitor.record_pong(Instant::now());
        assert!(latency.is_some());
        assert_eq!(edge, Some(HealthTransition::BecameHealthy));
        assert_eq!(monitor.consecutive_failures(), 0);
    }

    #[test]
    fn test_stale_timeout_ignored() {
        let mut monitor = ConnectionMonitor::new("c1", config());
        let t0 = Instant::now();
        let seq = monitor.record_ping_sent(t0);
        monitor.record_pong(t0 + Duration::from_millis(5));
        assert_eq!(monitor.record_missed_ping(seq), None);

        let old = monitor.record_ping_sent(t0);
        let _new = monitor.record_ping_sent(t0);
        assert_eq!(monitor.record_missed_ping(old), None);
        assert_eq!(monitor.consecutive_failures(), 0);
    }

    #[test]
    fn test_quality_score() {
        let mut monitor = ConnectionMonitor::new("c1", config());
        assert_eq!(monitor.quality_score(), 100.0);

        let t0 = Instant::now();
        monitor.record_ping_sent(t0);
        monitor.record_pong(t0 + Duration::from_millis(500));
        // 500ms / 1000ms * 30 = 15
        assert!((monitor.quality_score() - 85.0).abs() < 1e-6);

        miss(&mut monitor);
        // + 1/3 * 50
        assert!((monitor.quality_score() - (85.0 - 50.0 / 3.0)).abs() < 1e-6);

        monitor.record_ping_sent(t0);
        monitor.record_pong(t0 + Duration::from_secs(10));
        // latency penalty is capped at 30
        assert!(monitor.quality_score() >= 70.0 - 1e-6);
    }

    #[test]
    fn test_latency_window_is_bounded() {
        let mut monitor = ConnectionMonitor::new("c1", config());
        let t0 = Instant::now();
        for ms in [10u64, 20, 30, 40] {
            monitor.record_ping_sent(t0);
            monitor.record_pong(t0 + Duration::from_millis(ms));
        }
        assert_eq!(monitor.snapshot().latency_samples_ms, vec![20, 30, 40]);
        assert_eq!(monitor.average_latency(), Some(Duration::from_millis(30)));
    }

    #[test]
    fn test_backoff_and_halt() {
        let mut monitor = ConnectionMonitor::new("c1", config());
        for _ in 0..3 {
            miss(&mut monitor);
        }
        let t0 = Instant::now();

        assert_eq!(monitor.backoff_delay(), Duration::from_millis(100));
        assert_eq!(monitor.begin_recovery(t0), RecoveryDecision::Attempt { attempt: 1 });

        // 100 * 2^1 = 200ms must pass before the next attempt
        assert!(matches!(
            monitor.begin_recovery(t0 + Duration::from_millis(150)),
            RecoveryDecision::Wait { .. }
        ));
        assert_eq!(
            monitor.begin_recovery(t0 + Duration::from_millis(200)),
            RecoveryDecision::Attempt { attempt: 2 }
        );

        // 100 * 2^2 = 400 is capped at 350, but attempts are exhausted first
        assert_eq!(monitor.backoff_delay(), Duration::from_millis(350));
        assert_eq!(
            monitor.begin_recovery(t0 + Duration::from_secs(5)),
            RecoveryDecision::Halted { first: true }
        );
        assert_eq!(
            monitor.begin_recovery(t0 + Duration::from_secs(6)),
            RecoveryDecision::Halted { first: false }
        );

        assert_eq!(monitor.record_recovered(), Some(HealthTransition::BecameHealthy));
        assert_eq!(monitor.reconnect_attempts(), 0);
        assert_eq!(monitor.begin_recovery(t0), RecoveryDecision::NotNeeded);
    }
}
