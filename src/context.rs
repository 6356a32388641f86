//! Shared transport state owned by the application root
//!
//! Holds the circuit breaker registry and the health monitor so several
//! sessions (or isolated tests) can each have their own.

use std::sync::Arc;

use crate::circuit_breaker::{CircuitBreakerRegistry, CircuitBreakerStatus};
use crate::config::Config;
use crate::health::{HealthMonitor, HealthSnapshot};

#[derive(Clone)]
pub struct TransportContext {
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub health: Arc<HealthMonitor>,
}

impl TransportContext {
    pub fn new(config: &Config) -> Self {
        let breakers = Arc::new(CircuitBreakerRegistry::new(config.circuit_breaker.clone()));
        let health = Arc::new(HealthMonitor::new(
            config.health.clone(),
            Arc::clone(&breakers),
        ));
        Self { breakers, health }
    }

    pub fn breaker_report(&self) -> Vec<CircuitBreakerStatus> {
        self.breakers.health_report()
    }

    pub fn health_report(&self) -> Vec<HealthSnapshot> {
        self.health.snapshots()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::RECONNECTION_BREAKER;

    #[tokio::test]
    async fn test_contexts_are_isolated() {
        let config = Config::default();
        let first = TransportContext::new(&config);
        let second = TransportContext::new(&config);

        first.breakers.get_or_create(RECONNECTION_BREAKER);
        assert_eq!(first.breaker_report().len(), 1);
        assert!(second.breaker_report().is_empty());

        let shared = first.clone();
        assert!(Arc::ptr_eq(&shared.health, &first.health));
        assert!(first.health_report().is_empty());
    }
}
