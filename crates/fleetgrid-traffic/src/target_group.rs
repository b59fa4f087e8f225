//! Runtime target group: which task endpoints receive traffic.
//!
//! Only targets whose health checks pass are in rotation. Transitions in
//! and out of rotation come back as [`TargetEvent`]s and are logged; a
//! failing target is never an error.
//!
//! The group also counts routed requests. [`TargetGroup::take_sample`]
//! turns that count into the requests-per-target load signal and resets it,
//! so each evaluation tick sees only its own traffic.

use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::balancer::RoundRobinBalancer;
use crate::health::{HealthSettings, HealthTracker, ProbeResult, TargetHealth};

/// One task endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    pub ip: String,
    pub port: u16,
}

impl Target {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// Rotation change observed on a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TargetEvent {
    /// First passing check after registration.
    Admitted { target: String },
    /// Failed checks reached the threshold; out of rotation.
    Excluded { target: String, failures: u32 },
    /// Back in rotation after being excluded.
    Restored { target: String },
}

struct Entry {
    target: Target,
    tracker: HealthTracker,
}

pub struct TargetGroup {
    name: String,
    settings: HealthSettings,
    entries: RwLock<Vec<Entry>>,
    balancer: RoundRobinBalancer,
    requests: AtomicU64,
}

impl TargetGroup {
    pub fn new(name: &str, settings: HealthSettings) -> Self {
        Self {
            name: name.to_string(),
            settings,
            entries: RwLock::new(Vec::new()),
            balancer: RoundRobinBalancer::new(),
            requests: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a target. It joins rotation after its first passing check.
    ///
    /// Returns false if a target with the same id is already registered.
    pub fn register(&self, target: Target) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.iter().any(|e| e.target.id == target.id) {
            return false;
        }
        debug!(group = %self.name, target = %target.id, endpoint = %target.endpoint(), "target registered");
        entries.push(Entry {
            target,
            tracker: HealthTracker::new(self.settings),
        });
        true
    }

    pub fn deregister(&self, target_id: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|e| e.target.id != target_id);
        let removed = entries.len() != before;
        if removed {
            debug!(group = %self.name, target = target_id, "target deregistered");
        }
        removed
    }

    /// Feed one health check result for a target.
    ///
    /// Returns the rotation change it caused, if any. Unknown targets are
    /// ignored.
    pub fn record_check(&self, target_id: &str, result: ProbeResult) -> Option<TargetEvent> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let entry = entries.iter_mut().find(|e| e.target.id == target_id)?;

        let before = entry.tracker.status();
        let after = entry.tracker.record(result);
        let target = target_id.to_string();

        let event = match (before, after) {
            (TargetHealth::Initial, TargetHealth::Healthy) => TargetEvent::Admitted { target },
            (TargetHealth::Unhealthy, TargetHealth::Healthy) => TargetEvent::Restored { target },
            (TargetHealth::Initial | TargetHealth::Healthy, TargetHealth::Unhealthy) => {
                TargetEvent::Excluded {
                    target,
                    failures: entry.tracker.consecutive_failures(),
                }
            }
            _ => return None,
        };

        match &event {
            TargetEvent::Excluded { target, failures } => warn!(
                group = %self.name,
                target = %target,
                failures,
                "target failing health checks, excluded from rotation"
            ),
            TargetEvent::Admitted { target } | TargetEvent::Restored { target } => {
                info!(group = %self.name, target = %target, "target in rotation")
            }
        }
        Some(event)
    }

    /// Targets currently in rotation, in registration order.
    pub fn healthy_targets(&self) -> Vec<Target> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .filter(|e| e.tracker.is_healthy())
            .map(|e| e.target.clone())
            .collect()
    }

    pub fn healthy_count(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.iter().filter(|e| e.tracker.is_healthy()).count()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn health(&self, target_id: &str) -> Option<TargetHealth> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .find(|e| e.target.id == target_id)
            .map(|e| e.tracker.status())
    }

    /// When to check a target next. Failing targets back off.
    pub fn next_check_in(&self, target_id: &str) -> Option<Duration> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .find(|e| e.target.id == target_id)
            .map(|e| e.tracker.next_interval())
    }

    /// Route one request: pick the next healthy target and count it.
    pub fn route(&self) -> Option<Target> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let healthy: Vec<&Entry> = entries.iter().filter(|e| e.tracker.is_healthy()).collect();
        let idx = self.balancer.next(healthy.len())?;
        self.requests.fetch_add(1, Ordering::Relaxed);
        Some(healthy[idx].target.clone())
    }

    /// Count requests served outside [`route`](Self::route).
    pub fn record_requests(&self, count: u64) {
        self.requests.fetch_add(count, Ordering::Relaxed);
    }

    /// Requests per healthy target since the last sample; resets the count.
    ///
    /// With no healthy target the whole count is attributed to a single
    /// target, so pending load still reads as load.
    pub fn take_sample(&self) -> f64 {
        let requests = self.requests.swap(0, Ordering::Relaxed);
        let healthy = self.healthy_count().max(1);
        requests as f64 / healthy as f64
    }
}
