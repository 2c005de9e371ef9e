pub mod backoff;
pub mod health;

pub use backoff::{BackoffController, MAX_RETRY_WAIT_SECS, RetryState, retry_delay};
pub use health::{ComponentHealth, ConnectionHealth, HealthConfig, HealthMonitor};
