use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Upper bound for any cool-down window, in seconds.
pub const MAX_RETRY_WAIT_SECS: f64 = 60.0;

/// Quadratic slope divisor: 35 consecutive throttles reach the ceiling.
const BACKOFF_DIVISOR: f64 = 40.0;

/// Snapshot of the retry bookkeeping shared by every `write` on a client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    pub retry_count: u32,
    pub retry_not_before: Option<Instant>,
}

/// Cool-down length for the given (already incremented) retry count.
///
/// The larger of `retry_count² / 40` and the server's `Retry-After` hint wins,
/// capped at sixty seconds.
pub fn retry_delay(retry_count: u32, retry_after: Option<f64>) -> Duration {
    let backoff = f64::from(retry_count).powi(2) / BACKOFF_DIVISOR;
    let hinted = retry_after.unwrap_or(0.0);
    let seconds = backoff.max(hinted).min(MAX_RETRY_WAIT_SECS).max(0.0);
    Duration::from_secs_f64(seconds)
}

/// Gates sends while a throttle cool-down is in effect.
#[derive(Debug, Default)]
pub struct BackoffController {
    state: Mutex<RetryState>,
}

impl BackoffController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> RetryState {
        *self.state.lock()
    }

    /// Returns the remaining wait when the window is still open.
    pub fn check(&self) -> Result<(), Duration> {
        self.check_at(Instant::now())
    }

    pub fn check_at(&self, now: Instant) -> Result<(), Duration> {
        match self.state.lock().retry_not_before {
            Some(not_before) if not_before > now => Err(not_before - now),
            _ => Ok(()),
        }
    }

    /// Record a throttle response and install the next window.
    pub fn on_throttle(&self, retry_after: Option<f64>) -> Duration {
        self.on_throttle_at(retry_after, Instant::now())
    }

    pub fn on_throttle_at(&self, retry_after: Option<f64>, now: Instant) -> Duration {
        let mut state = self.state.lock();
        state.retry_count = state.retry_count.saturating_add(1);
        let delay = retry_delay(state.retry_count, retry_after);
        let candidate = now + delay;
        state.retry_not_before = Some(match state.retry_not_before {
            Some(existing) if existing > candidate => existing,
            _ => candidate,
        });
        delay
    }

    /// A delivered batch clears the counter. The window is left alone; it has
    /// already expired or the send would not have happened.
    pub fn on_success(&self) {
        self.state.lock().retry_count = 0;
    }
}
