//! Health tracking and circuit breaking for external sources.

pub mod monitor;
pub mod store;

pub use monitor::{CircuitState, GateError, HealthMonitor, HealthReport, HealthStatus, SystemHealth};
pub use store::{HealthSnapshot, HealthStore, SqliteHealthStore};
