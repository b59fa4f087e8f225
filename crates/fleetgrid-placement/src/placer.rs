//! Placement engine: splits a service's tasks across capacity providers.
//!
//! The split is weighted round-robin: binding `i` starts from
//! `round(N * w_i / W)` tasks (halves round up). Rounding can leave the sum
//! a few tasks off `N`. A shortfall is made up one task at a time by the
//! highest-weight binding still below its exact share, lower ordinal first
//! on ties. An excess is taken back from the lowest-weight binding above its
//! exact share, higher ordinal first. Either way every count stays within
//! one task of `N * w_i / W`. Bindings with weight 0 never receive tasks.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use fleetgrid_state::{CapacityProviderBinding, Cluster};

use crate::error::PlacementError;

/// Task counts per capacity provider for one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementPlan {
    pub service_id: String,
    /// Provider name → number of tasks.
    pub assignments: BTreeMap<String, u32>,
}

impl PlacementPlan {
    pub fn total(&self) -> u32 {
        self.assignments.values().sum()
    }

    pub fn count(&self, provider: &str) -> u32 {
        self.assignments.get(provider).copied().unwrap_or(0)
    }
}

/// Changes that move a running distribution to a new desired count.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Reconciliation {
    /// Provider name → tasks to start.
    pub additions: BTreeMap<String, u32>,
    /// Provider name → tasks to stop.
    pub removals: BTreeMap<String, u32>,
    /// Distribution after applying the changes.
    pub result: BTreeMap<String, u32>,
}

impl Reconciliation {
    pub fn is_noop(&self) -> bool {
        self.additions.is_empty() && self.removals.is_empty()
    }
}

/// Split `tasks` across `bindings`.
///
/// Every binding appears in the plan, zero-weight ones with 0 tasks.
pub fn place(
    service_id: &str,
    bindings: &[CapacityProviderBinding],
    tasks: u32,
) -> Result<PlacementPlan, PlacementError> {
    let ideal = split(bindings, tasks)
        .ok_or_else(|| PlacementError::NoPlaceableBinding(service_id.to_string()))?;

    debug!(
        service = service_id,
        tasks,
        assignments = ?ideal,
        "placement computed"
    );

    Ok(PlacementPlan {
        service_id: service_id.to_string(),
        assignments: ideal,
    })
}

/// Place a service's tasks on a cluster's current bindings.
pub fn place_on(
    cluster: &Cluster,
    service_id: &str,
    tasks: u32,
) -> Result<PlacementPlan, PlacementError> {
    if !cluster.can_place() {
        warn!(cluster = %cluster.name, service = service_id, "no placeable capacity provider");
        return Err(PlacementError::NoPlaceableBinding(cluster.id.clone()));
    }
    place(service_id, cluster.bindings(), tasks)
}

/// Compute the task starts/stops that take `current` to `target` tasks.
///
/// Starts go only to positive-weight bindings, biggest shortfall against
/// the ideal split first. Stops take from the biggest surplus first, so
/// zero-weight bindings and providers no longer attached drain on scale-in.
/// Nothing moves when the total is unchanged.
pub fn reconcile(
    bindings: &[CapacityProviderBinding],
    current: &BTreeMap<String, u32>,
    target: u32,
) -> Result<Reconciliation, PlacementError> {
    let ideal = split(bindings, target)
        .ok_or_else(|| PlacementError::NoPlaceableBinding("reconcile".to_string()))?;

    let mut result: BTreeMap<String, u32> = ideal.keys().map(|k| (k.clone(), 0)).collect();
    for (name, &count) in current {
        *result.entry(name.clone()).or_insert(0) += count;
    }
    let running: u32 = result.values().sum();

    let weight_of = |name: &str| {
        bindings
            .iter()
            .find(|b| b.name == name)
            .map(|b| (b.weight, b.ordinal))
            .unwrap_or((0, u32::MAX))
    };
    let gap = |name: &str, assigned: u32| {
        i64::from(ideal.get(name).copied().unwrap_or(0)) - i64::from(assigned)
    };

    let mut plan = Reconciliation::default();

    if target > running {
        for _ in running..target {
            let pick = result
                .iter()
                .filter(|(name, _)| weight_of(name).0 > 0)
                .max_by_key(|(name, assigned)| {
                    let (weight, ordinal) = weight_of(name);
                    (gap(name, **assigned), weight, Reverse(ordinal))
                })
                .map(|(name, _)| name.clone());
            let Some(name) = pick else { break };
            *result.entry(name.clone()).or_insert(0) += 1;
            *plan.additions.entry(name).or_insert(0) += 1;
        }
    } else if target < running {
        for _ in target..running {
            let pick = result
                .iter()
                .filter(|(_, assigned)| **assigned > 0)
                .max_by_key(|(name, assigned)| {
                    let (weight, ordinal) = weight_of(name);
                    (-gap(name, **assigned), Reverse(weight), ordinal)
                })
                .map(|(name, _)| name.clone());
            let Some(name) = pick else { break };
            if let Some(count) = result.get_mut(&name) {
                *count -= 1;
            }
            *plan.removals.entry(name).or_insert(0) += 1;
        }
    }

    result.retain(|name, count| *count > 0 || ideal.contains_key(name));
    plan.result = result;
    Ok(plan)
}

/// Rounded weighted split of `tasks`. `None` if no weight is positive.
fn split(bindings: &[CapacityProviderBinding], tasks: u32) -> Option<BTreeMap<String, u32>> {
    let total_weight: u64 = bindings.iter().map(|b| u64::from(b.weight)).sum();
    if total_weight == 0 {
        return None;
    }

    let n = u64::from(tasks);
    // Exact share n*w/W is compared as the numerator n*w against count*W.
    let numerator = |b: &CapacityProviderBinding| n * u64::from(b.weight);

    let mut counts: BTreeMap<String, u32> = BTreeMap::new();
    let mut assigned: u64 = 0;
    for b in bindings {
        // floor(n*w/W + 1/2) <= n, so it fits in u32.
        let share = ((2 * numerator(b) + total_weight) / (2 * total_weight)) as u32;
        assigned += u64::from(share);
        counts.insert(b.name.clone(), share);
    }

    let mut order: Vec<&CapacityProviderBinding> =
        bindings.iter().filter(|b| b.weight > 0).collect();
    order.sort_by_key(|b| (Reverse(b.weight), b.ordinal));

    while assigned < n {
        let Some(b) = order
            .iter()
            .find(|b| u64::from(counts[&b.name]) * total_weight < numerator(b))
        else {
            break;
        };
        if let Some(count) = counts.get_mut(&b.name) {
            *count += 1;
        }
        assigned += 1;
    }
    while assigned > n {
        let Some(b) = order
            .iter()
            .rev()
            .find(|b| u64::from(counts[&b.name]) * total_weight > numerator(b))
        else {
            break;
        };
        if let Some(count) = counts.get_mut(&b.name) {
            *count -= 1;
        }
        assigned -= 1;
    }

    Some(counts)
}
