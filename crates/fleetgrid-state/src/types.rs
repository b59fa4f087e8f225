//! Domain types for fleetgrid.
//!
//! These types describe the resources a topology is made of and the
//! synthesized descriptor that records them. All types are serializable
//! to/from JSON for storage in redb tables and for content addressing.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use fleet_core::{Architecture, DeploymentTarget, EgressMode, RegistryCapability};

/// Content-addressed identifier of a synthesized resource.
pub type ResourceId = String;

// ── ResourcePool ──────────────────────────────────────────────────

/// One homogeneous group of container hosts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourcePool {
    pub id: ResourceId,
    pub name: String,
    pub architecture: Architecture,
    pub instance_shape: String,
    /// Machine image family, derived from the architecture.
    pub image_family: String,
    pub min_capacity: u32,
    pub max_capacity: u32,
    pub desired_capacity: u32,
    /// Opaque identity reference attached to the hosts.
    pub instance_role: String,
}

impl ResourcePool {
    /// `min <= desired <= max`.
    pub fn bounds_hold(&self) -> bool {
        self.min_capacity <= self.desired_capacity && self.desired_capacity <= self.max_capacity
    }
}

// ── Capacity providers ────────────────────────────────────────────

/// A weighted pointer from a cluster to a resource pool.
///
/// Weight 0 keeps the binding attached (existing tasks stay) but it never
/// receives new placements.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapacityProviderBinding {
    /// Capacity provider name.
    pub name: String,
    /// Registration order within the owning cluster; lower wins placement ties.
    pub ordinal: u32,
    pub resource_pool_id: ResourceId,
    pub weight: u32,
    pub managed_scaling_enabled: bool,
    pub termination_protection: bool,
}

// ── Cluster ───────────────────────────────────────────────────────

/// Opaque network the topology lives in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkContext {
    pub id: String,
    pub egress: EgressMode,
}

/// The scheduling domain. Owns its capacity provider bindings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cluster {
    pub id: ResourceId,
    pub name: String,
    pub network: NetworkContext,
    bindings: Vec<CapacityProviderBinding>,
}

impl Cluster {
    pub fn new(id: &str, name: &str, network: NetworkContext) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            network,
            bindings: Vec::new(),
        }
    }

    /// Attach a binding, assigning the next ordinal.
    ///
    /// Returns false (and leaves the cluster unchanged) if a binding with the
    /// same provider name is already attached.
    pub fn register_binding(&mut self, mut binding: CapacityProviderBinding) -> bool {
        if self.bindings.iter().any(|b| b.name == binding.name) {
            return false;
        }
        binding.ordinal = self.bindings.len() as u32;
        self.bindings.push(binding);
        true
    }

    pub fn bindings(&self) -> &[CapacityProviderBinding] {
        &self.bindings
    }

    pub fn binding(&self, name: &str) -> Option<&CapacityProviderBinding> {
        self.bindings.iter().find(|b| b.name == name)
    }

    /// Change a binding's weight. Returns false if no such binding.
    pub fn set_weight(&mut self, name: &str, weight: u32) -> bool {
        match self.bindings.iter_mut().find(|b| b.name == name) {
            Some(b) => {
                b.weight = weight;
                true
            }
            None => false,
        }
    }

    /// Bindings that may receive new placements.
    pub fn placeable_bindings(&self) -> impl Iterator<Item = &CapacityProviderBinding> {
        self.bindings.iter().filter(|b| b.weight > 0)
    }

    /// A service can only be placed once some binding has positive weight.
    pub fn can_place(&self) -> bool {
        self.placeable_bindings().next().is_some()
    }
}

// ── ServiceSpec ───────────────────────────────────────────────────

/// CPU/memory reserved per task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskReservation {
    pub cpu_units: u32,
    pub memory_reservation_mib: u32,
}

/// How task network interfaces are provisioned.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    /// Each task gets its own interface, so targets are registered by IP.
    #[default]
    AwsVpc,
}

/// One entry of the weighted-spread placement strategy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StrategyItem {
    pub capacity_provider: String,
    pub weight: u32,
}

/// A deployable unit scheduled onto a cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceSpec {
    pub id: ResourceId,
    pub name: String,
    pub cluster_id: ResourceId,
    /// Network the tasks' interfaces are placed in.
    pub network_id: String,
    /// Opaque image reference passed through to the task definition.
    pub image: String,
    pub execution_role: String,
    pub registry_capabilities: BTreeSet<RegistryCapability>,
    pub task: TaskReservation,
    pub network_mode: NetworkMode,
    pub container_name: String,
    pub container_port: u16,
    pub desired_count: u32,
    pub placement_strategy: Vec<StrategyItem>,
    pub environment: BTreeMap<String, String>,
    pub log_stream_prefix: String,
    pub assign_public_ip: bool,
}

// ── AutoscalingPolicy ─────────────────────────────────────────────

/// Load signal an autoscaling policy tracks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScalingMetric {
    RequestsPerTarget,
}

/// Target-tracking policy for one service. Refers to the service by id only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AutoscalingPolicy {
    pub service_id: ResourceId,
    pub metric: ScalingMetric,
    pub target_value: f64,
    pub min_capacity: u32,
    pub max_capacity: u32,
    pub scale_factor: f64,
    pub scale_in_cooldown_secs: u64,
    pub scale_out_cooldown_secs: u64,
    pub evaluation_interval_secs: u64,
}

// ── Resource records / descriptor ─────────────────────────────────

/// Kind of a synthesized resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    ResourcePool,
    CapacityProvider,
    Cluster,
    Service,
    TrafficRouter,
    AutoscalingPolicy,
}

impl ResourceKind {
    /// Synthesis layer. A resource may only depend on resources of the same
    /// or a lower layer.
    pub fn layer(&self) -> u8 {
        match self {
            ResourceKind::ResourcePool => 0,
            ResourceKind::CapacityProvider | ResourceKind::Cluster => 1,
            ResourceKind::Service => 2,
            ResourceKind::TrafficRouter => 3,
            ResourceKind::AutoscalingPolicy => 4,
        }
    }

    /// Short prefix used in resource ids.
    pub fn prefix(&self) -> &'static str {
        match self {
            ResourceKind::ResourcePool => "pool",
            ResourceKind::CapacityProvider => "cp",
            ResourceKind::Cluster => "cluster",
            ResourceKind::Service => "svc",
            ResourceKind::TrafficRouter => "lb",
            ResourceKind::AutoscalingPolicy => "scaling",
        }
    }
}

/// A resource with its resolved identity and configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceRecord {
    pub id: ResourceId,
    pub stack: String,
    pub kind: ResourceKind,
    pub logical_name: String,
    pub depends_on: Vec<ResourceId>,
    pub config: serde_json::Value,
}

impl ResourceRecord {
    /// Build the composite key for the records table.
    pub fn table_key(&self) -> String {
        record_key(&self.stack, &self.id)
    }
}

pub fn record_key(stack: &str, id: &str) -> String {
    format!("{stack}/{id}")
}

/// Stack-level bookkeeping persisted next to the records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StackSummary {
    pub stack: String,
    pub target: DeploymentTarget,
    /// Resource ids in creation order.
    pub order: Vec<ResourceId>,
    pub outputs: BTreeMap<String, String>,
}

/// The synthesized topology: resource id → resolved configuration, plus
/// creation order and stack outputs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopologyDescriptor {
    pub stack: String,
    pub target: DeploymentTarget,
    pub order: Vec<ResourceId>,
    pub records: BTreeMap<ResourceId, ResourceRecord>,
    pub outputs: BTreeMap<String, String>,
}

impl TopologyDescriptor {
    pub fn summary(&self) -> StackSummary {
        StackSummary {
            stack: self.stack.clone(),
            target: self.target.clone(),
            order: self.order.clone(),
            outputs: self.outputs.clone(),
        }
    }

    /// Records in creation order.
    pub fn ordered_records(&self) -> impl Iterator<Item = &ResourceRecord> {
        self.order.iter().filter_map(|id| self.records.get(id))
    }

    pub fn records_of_kind(&self, kind: ResourceKind) -> impl Iterator<Item = &ResourceRecord> {
        self.ordered_records().filter(move |r| r.kind == kind)
    }
}
