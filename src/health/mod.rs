pub mod monitor;
pub mod service;
pub mod types;

pub use monitor::{ConnectionMonitor, MonitoredConnection, RecoveryDecision};
pub use service::HealthMonitor;
pub use types::{HealthEvent, HealthSnapshot, HealthTransition};
