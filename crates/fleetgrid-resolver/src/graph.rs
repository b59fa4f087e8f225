//! Resource dependency graph and its synthesis order.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use fleetgrid_state::{ResourceId, ResourceRecord};

use crate::error::GraphError;

/// Records keyed by id, remembering declaration order for tie-breaks.
#[derive(Debug, Default)]
pub struct ResourceGraph {
    records: BTreeMap<ResourceId, ResourceRecord>,
    declared: Vec<ResourceId>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: ResourceRecord) -> Result<(), GraphError> {
        if self.records.contains_key(&record.id) {
            return Err(GraphError::DuplicateResource(record.id));
        }
        self.declared.push(record.id.clone());
        self.records.insert(record.id.clone(), record);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&ResourceRecord> {
        self.records.get(id)
    }

    /// Every dependency must exist and sit in the same or an earlier layer.
    pub fn validate(&self) -> Result<(), GraphError> {
        for id in &self.declared {
            let record = &self.records[id];
            for dep in &record.depends_on {
                let Some(target) = self.records.get(dep) else {
                    return Err(GraphError::DanglingDependency {
                        resource: id.clone(),
                        missing: dep.clone(),
                    });
                };
                if target.kind.layer() > record.kind.layer() {
                    return Err(GraphError::LayerViolation {
                        resource: id.clone(),
                        layer: record.kind.layer(),
                        dependency: dep.clone(),
                        dependency_layer: target.kind.layer(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Creation order: dependencies first, then lower layer, then
    /// declaration order.
    ///
    /// Fails with [`GraphError::DependencyCycle`] naming every resource
    /// that could not be ordered.
    pub fn topological_order(&self) -> Result<Vec<ResourceId>, GraphError> {
        self.validate()?;

        let position: BTreeMap<&str, usize> = self
            .declared
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();

        let mut indegree: BTreeMap<&str, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (id, record) in &self.records {
            let deps: BTreeSet<&str> = record.depends_on.iter().map(String::as_str).collect();
            indegree.insert(id.as_str(), deps.len());
            for dep in deps {
                dependents.entry(dep).or_default().push(id.as_str());
            }
        }

        let key = |id: &str| (self.records[id].kind.layer(), position[id]);
        let mut ready: BTreeSet<(u8, usize)> = indegree
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(id, _)| key(*id))
            .collect();

        let mut order = Vec::with_capacity(self.records.len());
        while let Some(next) = ready.pop_first() {
            let id = self.declared[next.1].as_str();
            order.push(id.to_string());
            for dependent in dependents.get(id).into_iter().flatten() {
                if let Some(n) = indegree.get_mut(dependent) {
                    *n -= 1;
                    if *n == 0 {
                        ready.insert(key(*dependent));
                    }
                }
            }
        }

        if order.len() != self.records.len() {
            let placed: BTreeSet<&str> = order.iter().map(String::as_str).collect();
            let stuck: Vec<ResourceId> = self
                .declared
                .iter()
                .filter(|id| !placed.contains(id.as_str()))
                .cloned()
                .collect();
            return Err(GraphError::DependencyCycle(stuck));
        }

        debug!(resources = order.len(), "dependency order resolved");
        Ok(order)
    }

    pub fn into_records(self) -> BTreeMap<ResourceId, ResourceRecord> {
        self.records
    }
}
