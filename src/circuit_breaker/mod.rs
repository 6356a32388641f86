//! Circuit breakers isolating repeatedly failing dependencies
//!
//! - `state`: the CLOSED / OPEN / HALF_OPEN state machine
//! - `registry`: named breakers shared through the transport context

pub mod registry;
pub mod state;

pub use registry::CircuitBreakerRegistry;
pub use state::{CircuitBreaker, CircuitBreakerStatus, CircuitState};

/// Breaker guarding reconnect attempts driven by the health monitor
pub const RECONNECTION_BREAKER: &str = "reconnection";
