//! Descriptor diffing.

use serde::{Deserialize, Serialize};

use fleetgrid_state::{ResourceId, TopologyDescriptor};

/// How a new descriptor differs from a previously synthesized one.
///
/// `added`, `changed` and `unchanged` follow the new creation order;
/// `removed` follows the old one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorDiff {
    pub added: Vec<ResourceId>,
    pub removed: Vec<ResourceId>,
    pub changed: Vec<ResourceId>,
    pub unchanged: Vec<ResourceId>,
}

impl DescriptorDiff {
    /// True when re-synthesis would touch nothing.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Compare by id and record content. With no previous descriptor,
/// everything is added.
pub fn diff(old: Option<&TopologyDescriptor>, new: &TopologyDescriptor) -> DescriptorDiff {
    let mut out = DescriptorDiff::default();

    for id in &new.order {
        let Some(record) = new.records.get(id) else {
            continue;
        };
        match old.and_then(|o| o.records.get(id)) {
            None => out.added.push(id.clone()),
            Some(previous) if previous == record => out.unchanged.push(id.clone()),
            Some(_) => out.changed.push(id.clone()),
        }
    }

    if let Some(old) = old {
        out.removed = old
            .order
            .iter()
            .filter(|id| !new.records.contains_key(id.as_str()))
            .cloned()
            .collect();
    }

    out
}
