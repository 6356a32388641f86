use chrono::{DateTime, Utc};
use serde::Serialize;

/// Point-in-time view of one monitored connection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub id: String,
    pub is_healthy: bool,
    pub consecutive_failures: u32,
    /// Most recent round-trip samples, oldest first
    pub latency_samples_ms: Vec<u64>,
    pub average_latency_ms: Option<f64>,
    /// 0-100, higher is better
    pub quality_score: f64,
    pub reconnect_attempts: u32,
    pub recovery_halted: bool,
    pub last_ping_sent: Option<DateTime<Utc>>,
    pub last_pong: Option<DateTime<Utc>>,
    pub last_reconnect: Option<DateTime<Utc>>,
}

/// Edge-triggered health notifications
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HealthEvent {
    /// Crossed back to healthy
    Healthy { id: String, quality: f64 },
    /// Crossed to unhealthy after too many missed pings
    Unhealthy { id: String, consecutive_failures: u32 },
    /// Automatic recovery gave up; only `force_reconnect` resumes it
    RecoveryHalted { id: String, attempts: u32 },
}

impl HealthEvent {
    pub fn id(&self) -> &str {
        match self {
            HealthEvent::Healthy { id, .. }
            | HealthEvent::Unhealthy { id, .. }
            | HealthEvent::RecoveryHalted { id, .. } => id,
        }
    }
}

/// Health edge produced by a state update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    BecameHealthy,
    BecameUnhealthy,
}
