use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the host loop groups incoming metrics into `write` calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSettings {
    pub batch_size: usize,
    #[serde(with = "super::serde_helpers")]
    pub flush_interval: Duration,
    /// Upper bound on metrics kept for re-delivery after a failed write.
    pub buffer_limit: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            flush_interval: Duration::from_secs(10),
            buffer_limit: 10_000,
        }
    }
}
