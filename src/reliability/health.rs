use crate::sender::TransportError;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::time::Instant;

#[cfg(test)]
use mockall::automock;

/// Receives every raw transport failure so connection state can react.
///
/// Fire-and-forget: the delivery client never inspects anything in return.
#[cfg_attr(test, automock)]
pub trait ConnectionHealth: Send + Sync {
    fn on_client_error(&self, url: &str, error: &TransportError);

    fn on_client_success(&self, _url: &str) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentHealth {
    Healthy,
    Unhealthy(String), // reason
}

#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub unhealthy_threshold: u32,
    pub recovery_threshold: u32,
    pub history_len: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            unhealthy_threshold: 3, // 3 consecutive failures = unhealthy
            recovery_threshold: 2,  // 2 consecutive successes = recovered
            history_len: 100,
        }
    }
}

#[derive(Debug)]
struct ConnectionState {
    health: ComponentHealth,
    recent_checks: VecDeque<bool>,
    consecutive_failures: u32,
    consecutive_successes: u32,
    timeouts: u64,
    last_error: Option<String>,
    last_check: Option<Instant>,
}

/// Default [`ConnectionHealth`] implementation: tracks consecutive transport
/// failures and flips between healthy and unhealthy with hysteresis.
#[derive(Debug)]
pub struct HealthMonitor {
    config: HealthConfig,
    state: RwLock<ConnectionState>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        let history_len = config.history_len;
        Self {
            config,
            state: RwLock::new(ConnectionState {
                health: ComponentHealth::Healthy,
                recent_checks: VecDeque::with_capacity(history_len),
                consecutive_failures: 0,
                consecutive_successes: 0,
                timeouts: 0,
                last_error: None,
                last_check: None,
            }),
        }
    }

    pub fn health(&self) -> ComponentHealth {
        self.state.read().health.clone()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state.read().consecutive_failures
    }

    pub fn timeouts(&self) -> u64 {
        self.state.read().timeouts
    }

    pub fn last_error(&self) -> Option<String> {
        self.state.read().last_error.clone()
    }

    pub fn last_check(&self) -> Option<Instant> {
        self.state.read().last_check
    }

    pub fn history(&self) -> Vec<bool> {
        self.state.read().recent_checks.iter().copied().collect()
    }

    fn record(&self, url: &str, success: bool) {
        let mut state = self.state.write();

        state.recent_checks.push_back(success);
        if state.recent_checks.len() > self.config.history_len {
            state.recent_checks.pop_front();
        }
        state.last_check = Some(Instant::now());

        if success {
            state.consecutive_successes += 1;
            state.consecutive_failures = 0;
        } else {
            state.consecutive_failures += 1;
            state.consecutive_successes = 0;
        }

        let new_health = if state.consecutive_failures >= self.config.unhealthy_threshold {
            ComponentHealth::Unhealthy(format!(
                "{} consecutive transport failures",
                state.consecutive_failures
            ))
        } else if state.consecutive_successes >= self.config.recovery_threshold
            && matches!(state.health, ComponentHealth::Unhealthy(_))
        {
            ComponentHealth::Healthy
        } else {
            state.health.clone()
        };

        if new_health != state.health {
            tracing::info!(
                url,
                "Connection health changed from {:?} to {:?}",
                state.health,
                new_health
            );
            state.health = new_health;
        }
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}

impl ConnectionHealth for HealthMonitor {
    fn on_client_error(&self, url: &str, error: &TransportError) {
        tracing::debug!(url, error = %error, "transport failure reported");
        {
            let mut state = self.state.write();
            state.last_error = Some(error.to_string());
            if error.is_timeout() {
                state.timeouts += 1;
            }
        }
        self.record(url, false);
    }

    fn on_client_success(&self, url: &str) {
        self.record(url, true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn timeout_error() -> TransportError {
        TransportError::Timeout {
            url: "http://localhost:8086/api/v2/write".to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_becomes_unhealthy_after_threshold() {
        let monitor = HealthMonitor::default();
        for _ in 0..2 {
            monitor.on_client_error("u", &timeout_error());
        }
        assert_eq!(monitor.health(), ComponentHealth::Healthy);

        monitor.on_client_error("u", &timeout_error());
        assert!(matches!(monitor.health(), ComponentHealth::Unhealthy(_)));
        assert_eq!(monitor.consecutive_failures(), 3);
        assert_eq!(monitor.timeouts(), 3);
        assert!(monitor.last_error().unwrap().contains("timed out"));
    }

    #[test]
    fn test_recovers_after_successes() {
        let monitor = HealthMonitor::default();
        for _ in 0..3 {
            monitor.on_client_error("u", &timeout_error());
        }

        monitor.on_client_success("u");
        assert!(matches!(monitor.health(), ComponentHealth::Unhealthy(_)));
        monitor.on_client_success("u");
        assert_eq!(monitor.health(), ComponentHealth::Healthy);
        assert_eq!(monitor.history(), vec![false, false, false, true, true]);
    }

    #[test]
    fn test_history_is_bounded() {
        let monitor = HealthMonitor::new(HealthConfig {
            history_len: 4,
            ..HealthConfig::default()
        });
        for _ in 0..10 {
            monitor.on_client_success("u");
        }
        assert_eq!(monitor.history().len(), 4);
        assert!(monitor.last_check().is_some());
    }
}
