//! Per-target health tracking.
//!
//! Counts consecutive health check results and flips a target between
//! healthy and unhealthy at configurable thresholds. Failing targets are
//! checked less often (exponential backoff up to a cap).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Outcome of one health check against a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The health check path answered with a success status.
    Healthy,
    /// The path answered, but not with success.
    Unhealthy,
    /// No answer (connection refused, timeout).
    Failed,
}

/// Health of a target as seen by its target group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetHealth {
    /// Registered, not yet checked. Not in rotation.
    Initial,
    Healthy,
    Unhealthy,
}

/// Thresholds and timing for a target group's health checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSettings {
    /// Consecutive failures before a target leaves rotation.
    pub unhealthy_threshold: u32,
    /// Consecutive successes before it returns.
    pub healthy_threshold: u32,
    pub interval: Duration,
    pub max_backoff: Duration,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            unhealthy_threshold: 2,
            healthy_threshold: 1,
            interval: Duration::from_secs(30),
            max_backoff: Duration::from_secs(300),
        }
    }
}

#[derive(Debug)]
pub struct HealthTracker {
    status: TargetHealth,
    consecutive_failures: u32,
    consecutive_successes: u32,
    settings: HealthSettings,
    current_backoff: Duration,
}

impl HealthTracker {
    pub fn new(settings: HealthSettings) -> Self {
        Self {
            status: TargetHealth::Initial,
            consecutive_failures: 0,
            consecutive_successes: 0,
            current_backoff: settings.interval,
            settings,
        }
    }

    /// Record a check result and return the resulting status.
    pub fn record(&mut self, result: ProbeResult) -> TargetHealth {
        match result {
            ProbeResult::Healthy => {
                self.consecutive_failures = 0;
                self.consecutive_successes += 1;
                self.current_backoff = self.settings.interval;

                if self.consecutive_successes >= self.settings.healthy_threshold {
                    self.status = TargetHealth::Healthy;
                }
            }
            ProbeResult::Unhealthy | ProbeResult::Failed => {
                self.consecutive_successes = 0;
                self.consecutive_failures += 1;
                self.current_backoff = (self.current_backoff * 2).min(self.settings.max_backoff);

                if self.consecutive_failures >= self.settings.unhealthy_threshold {
                    self.status = TargetHealth::Unhealthy;
                } else {
                    debug!(
                        failures = self.consecutive_failures,
                        threshold = self.settings.unhealthy_threshold,
                        "health check failed, below threshold"
                    );
                }
            }
        }
        self.status
    }

    pub fn status(&self) -> TargetHealth {
        self.status
    }

    pub fn is_healthy(&self) -> bool {
        self.status == TargetHealth::Healthy
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Delay before the next check of this target.
    pub fn next_interval(&self) -> Duration {
        self.current_backoff
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(unhealthy: u32, healthy: u32) -> HealthSettings {
        HealthSettings {
            unhealthy_threshold: unhealthy,
            healthy_threshold: healthy,
            interval: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }

    #[test]
    fn starts_initial_and_out_of_rotation() {
        let tracker = HealthTracker::new(HealthSettings::default());
        assert_eq!(tracker.status(), TargetHealth::Initial);
        assert!(!tracker.is_healthy());
    }

    #[test]
    fn single_success_admits() {
        let mut tracker = HealthTracker::new(HealthSettings::default());
        assert_eq!(tracker.record(ProbeResult::Healthy), TargetHealth::Healthy);
    }

    #[test]
    fn stays_healthy_under_threshold() {
        let mut tracker = HealthTracker::new(settings(3, 1));
        tracker.record(ProbeResult::Healthy);
        tracker.record(ProbeResult::Unhealthy);
        tracker.record(ProbeResult::Failed);
        assert_eq!(tracker.status(), TargetHealth::Healthy);
        assert_eq!(tracker.consecutive_failures(), 2);

        assert_eq!(tracker.record(ProbeResult::Failed), TargetHealth::Unhealthy);
    }

    #[test]
    fn recovery_needs_healthy_threshold() {
        let mut tracker = HealthTracker::new(settings(1, 2));
        tracker.record(ProbeResult::Failed);
        assert_eq!(tracker.status(), TargetHealth::Unhealthy);

        assert_eq!(tracker.record(ProbeResult::Healthy), TargetHealth::Unhealthy);
        assert_eq!(tracker.record(ProbeResult::Healthy), TargetHealth::Healthy);
    }

    #[test]
    fn backoff_doubles_caps_and_resets() {
        let mut tracker = HealthTracker::new(settings(100, 1));
        assert_eq!(tracker.next_interval(), Duration::from_secs(1));

        tracker.record(ProbeResult::Failed);
        tracker.record(ProbeResult::Failed);
        assert_eq!(tracker.next_interval(), Duration::from_secs(4));

        for _ in 0..10 {
            tracker.record(ProbeResult::Failed);
        }
        assert_eq!(tracker.next_interval(), Duration::from_secs(60));

        tracker.record(ProbeResult::Healthy);
        assert_eq!(tracker.next_interval(), Duration::from_secs(1));
    }
}
