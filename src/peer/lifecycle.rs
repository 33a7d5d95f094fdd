//! ICE restart policy
//!
//! The connection repairs itself with ICE restarts when it reports
//! disconnected or failed. Probes are bounded: each consecutive restart backs
//! off exponentially from the configured base delay, and after
//! `max_restarts` consecutive failures the session parks in its failed phase
//! until explicit teardown. A successful reconnect resets the counter.

use crate::config::CallConfig;
use std::time::Duration;

/// Bounds on automatic ICE restarts
#[derive(Debug, Clone, Copy)]
pub struct RestartPolicy {
    /// Maximum consecutive restart attempts
    pub max_restarts: u32,
    /// Backoff multiplier applied per consecutive attempt
    pub backoff_multiplier: f64,
    /// Upper bound on a backed-off probe delay
    pub backoff_max: Duration,
}

impl RestartPolicy {
    pub fn from_config(config: &CallConfig) -> Self {
        Self {
            max_restarts: config.max_ice_restarts,
            backoff_multiplier: config.restart_backoff_multiplier,
            backoff_max: Duration::from_millis(config.restart_backoff_max_ms),
        }
    }

    /// The probe delay for the given consecutive attempt number (0-based),
    /// scaled up from `base` and clamped to the configured maximum
    pub fn probe_delay(&self, base: Duration, attempt: u32) -> Duration {
        let scaled = base.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let clamped = scaled.min(self.backoff_max.as_millis() as f64);
        Duration::from_millis(clamped as u64)
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::from_config(&CallConfig::default())
    }
}

/// Tracks consecutive restart attempts for one session
#[derive(Debug)]
pub struct RestartTracker {
    policy: RestartPolicy,
    attempts: u32,
}

impl RestartTracker {
    pub fn new(policy: RestartPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    /// Whether another restart is allowed
    pub fn should_restart(&self) -> bool {
        self.attempts < self.policy.max_restarts
    }

    /// The backed-off probe delay for the next attempt
    pub fn next_delay(&self, base: Duration) -> Duration {
        self.policy.probe_delay(base, self.attempts)
    }

    /// Record that a restart probe fired
    pub fn record_attempt(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }

    /// Record that the connection recovered; restarts become available again
    pub fn record_success(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RestartPolicy {
        RestartPolicy {
            max_restarts: 3,
            backoff_multiplier: 2.0,
            backoff_max: Duration::from_millis(10_000),
        }
    }

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let p = policy();
        let base = Duration::from_millis(1000);
        assert_eq!(p.probe_delay(base, 0), Duration::from_millis(1000));
        assert_eq!(p.probe_delay(base, 1), Duration::from_millis(2000));
        assert_eq!(p.probe_delay(base, 2), Duration::from_millis(4000));
    }

    #[test]
    fn test_backoff_clamped_at_max() {
        let p = policy();
        let base = Duration::from_millis(3000);
        assert_eq!(p.probe_delay(base, 5), p.backoff_max);
    }

    #[test]
    fn test_tracker_caps_attempts() {
        let mut tracker = RestartTracker::new(policy());
        for _ in 0..3 {
            assert!(tracker.should_restart());
            tracker.record_attempt();
        }
        assert!(!tracker.should_restart());
    }

    #[test]
    fn test_success_resets_tracker() {
        let mut tracker = RestartTracker::new(policy());
        tracker.record_attempt();
        tracker.record_attempt();
        assert_eq!(tracker.attempts(), 2);
        tracker.record_success();
        assert_eq!(tracker.attempts(), 0);
        assert!(tracker.should_restart());
    }
}
