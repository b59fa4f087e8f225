//! fleet.toml configuration parser.
//!
//! One `[[stack]]` table per topology. Every stack is an instance of the
//! same template; the knobs below are the only axes it varies along.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::image::{ImageError, ImageRef};
use crate::types::{Architecture, DeploymentTarget, EgressMode, Exposure, RegistryCapability};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(rename = "stack")]
    pub stacks: Vec<TopologyConfig>,
}

/// Parameters of one topology template instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopologyConfig {
    pub name: String,
    pub target: DeploymentTarget,
    pub network: NetworkConfig,
    pub pools: Vec<PoolConfig>,
    pub service: ServiceConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub autoscaling: AutoscalingConfig,
    #[serde(default)]
    pub iam: IamConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    pub id: String,
    pub egress: EgressMode,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolConfig {
    pub name: String,
    pub architecture: Architecture,
    pub instance_shape: String,
    pub min_capacity: u32,
    pub max_capacity: u32,
    pub desired_capacity: u32,
    /// Capacity provider weight. Signed so a bad value is reported, not a parse error.
    #[serde(default = "default_weight")]
    pub weight: i64,
    #[serde(default = "default_true")]
    pub managed_scaling: bool,
    #[serde(default)]
    pub termination_protection: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub cpu_units: u32,
    #[serde(default = "default_memory_reservation")]
    pub memory_reservation_mib: u32,
    #[serde(default = "default_container_port")]
    pub container_port: u16,
    pub desired_count: u32,
    #[serde(default = "default_log_stream_prefix")]
    pub log_stream_prefix: String,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouterConfig {
    #[serde(default = "default_http_port")]
    pub listener_port: u16,
    #[serde(default)]
    pub exposure: Exposure,
    #[serde(default = "default_http_port")]
    pub target_port: u16,
    #[serde(default = "default_health_check_path")]
    pub health_check_path: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            listener_port: default_http_port(),
            exposure: Exposure::Public,
            target_port: default_http_port(),
            health_check_path: default_health_check_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AutoscalingConfig {
    #[serde(default = "default_requests_per_target")]
    pub target_requests_per_target: f64,
    #[serde(default = "default_min_tasks")]
    pub min_capacity: u32,
    #[serde(default = "default_max_tasks")]
    pub max_capacity: u32,
    #[serde(default = "default_scale_factor")]
    pub scale_factor: f64,
    #[serde(default = "default_scale_in_cooldown")]
    pub scale_in_cooldown_secs: u64,
    #[serde(default)]
    pub scale_out_cooldown_secs: u64,
    #[serde(default = "default_evaluation_interval")]
    pub evaluation_interval_secs: u64,
}

impl Default for AutoscalingConfig {
    fn default() -> Self {
        Self {
            target_requests_per_target: default_requests_per_target(),
            min_capacity: default_min_tasks(),
            max_capacity: default_max_tasks(),
            scale_factor: default_scale_factor(),
            scale_in_cooldown_secs: default_scale_in_cooldown(),
            scale_out_cooldown_secs: 0,
            evaluation_interval_secs: default_evaluation_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IamConfig {
    #[serde(default = "default_instance_role")]
    pub instance_role: String,
    #[serde(default = "default_execution_role")]
    pub execution_role: String,
    #[serde(default = "default_registry_caps")]
    pub registry: BTreeSet<RegistryCapability>,
}

impl Default for IamConfig {
    fn default() -> Self {
        Self {
            instance_role: default_instance_role(),
            execution_role: default_execution_role(),
            registry: default_registry_caps(),
        }
    }
}

fn default_weight() -> i64 {
    1
}
fn default_true() -> bool {
    true
}
fn default_memory_reservation() -> u32 {
    256
}
fn default_container_port() -> u16 {
    8080
}
fn default_log_stream_prefix() -> String {
    "ECSLogGroup".to_string()
}
fn default_http_port() -> u16 {
    80
}
fn default_health_check_path() -> String {
    "/".to_string()
}
fn default_requests_per_target() -> f64 {
    100.0
}
fn default_min_tasks() -> u32 {
    1
}
fn default_max_tasks() -> u32 {
    20
}
fn default_scale_factor() -> f64 {
    1.0
}
fn default_scale_in_cooldown() -> u64 {
    300
}
fn default_evaluation_interval() -> u64 {
    60
}
fn default_instance_role() -> String {
    "instance-role".to_string()
}
fn default_execution_role() -> String {
    "execution-role".to_string()
}
fn default_registry_caps() -> BTreeSet<RegistryCapability> {
    BTreeSet::from([RegistryCapability::ReadOnly])
}

/// Problems found by [`TopologyConfig::validate`].
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("stack name must not be empty")]
    EmptyName,
    #[error("stack name {0:?} must not contain '/'")]
    InvalidName(String),
    #[error("stack {stack}: at least one pool is required")]
    NoPools { stack: String },
    #[error("stack {stack}: duplicate pool name {pool}")]
    DuplicatePool { stack: String, pool: String },
    #[error("pool {pool}: capacity must satisfy min <= desired <= max (got {min}/{desired}/{max})")]
    PoolBounds {
        pool: String,
        min: u32,
        desired: u32,
        max: u32,
    },
    #[error("autoscaling bounds invalid: min {min} > max {max}")]
    AutoscalingBounds { min: u32, max: u32 },
    #[error("service desired count {desired} outside autoscaling bounds [{min}, {max}]")]
    DesiredOutsideBounds { desired: u32, min: u32, max: u32 },
    #[error("autoscaling {field} must be a positive finite number")]
    NonPositive { field: &'static str },
    #[error("image: {0}")]
    Image(String),
    #[error("image built for {0:?} but no pool runs that architecture")]
    AssetArchitecture(Architecture),
    #[error("registry capability set must include read-only")]
    RegistryCapabilities,
}

impl From<ImageError> for ConfigError {
    fn from(e: ImageError) -> Self {
        ConfigError::Image(e.to_string())
    }
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: FleetConfig = toml::from_str(content)?;
        for stack in &config.stacks {
            stack.validate()?;
        }
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

impl TopologyConfig {
    /// Check every bound the template relies on.
    ///
    /// Capacity-provider weights are deliberately left to the allocator so
    /// that a bad weight vector surfaces as an allocation error.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        // Record keys are `{stack}/{id}`.
        if self.name.contains('/') {
            return Err(ConfigError::InvalidName(self.name.clone()));
        }
        if self.pools.is_empty() {
            return Err(ConfigError::NoPools {
                stack: self.name.clone(),
            });
        }

        let mut seen = BTreeSet::new();
        for pool in &self.pools {
            if !seen.insert(pool.name.as_str()) {
                return Err(ConfigError::DuplicatePool {
                    stack: self.name.clone(),
                    pool: pool.name.clone(),
                });
            }
            if !(pool.min_capacity <= pool.desired_capacity
                && pool.desired_capacity <= pool.max_capacity)
            {
                return Err(ConfigError::PoolBounds {
                    pool: pool.name.clone(),
                    min: pool.min_capacity,
                    desired: pool.desired_capacity,
                    max: pool.max_capacity,
                });
            }
        }

        let scaling = &self.autoscaling;
        if scaling.min_capacity > scaling.max_capacity {
            return Err(ConfigError::AutoscalingBounds {
                min: scaling.min_capacity,
                max: scaling.max_capacity,
            });
        }
        let desired = self.service.desired_count;
        if desired < scaling.min_capacity || desired > scaling.max_capacity {
            return Err(ConfigError::DesiredOutsideBounds {
                desired,
                min: scaling.min_capacity,
                max: scaling.max_capacity,
            });
        }
        if !(scaling.target_requests_per_target.is_finite()
            && scaling.target_requests_per_target > 0.0)
        {
            return Err(ConfigError::NonPositive {
                field: "target_requests_per_target",
            });
        }
        if !(scaling.scale_factor.is_finite() && scaling.scale_factor > 0.0) {
            return Err(ConfigError::NonPositive {
                field: "scale_factor",
            });
        }

        if let ImageRef::LocalAsset {
            platform: Some(arch),
            ..
        } = ImageRef::parse(&self.service.image)?
            && !self.pools.iter().any(|p| p.architecture == arch)
        {
            return Err(ConfigError::AssetArchitecture(arch));
        }

        if !self.iam.registry.contains(&RegistryCapability::ReadOnly) {
            return Err(ConfigError::RegistryCapabilities);
        }

        Ok(())
    }

    /// Architectures present in the pool mix, in declaration order.
    pub fn architectures(&self) -> Vec<Architecture> {
        let mut out = Vec::new();
        for pool in &self.pools {
            if !out.contains(&pool.architecture) {
                out.push(pool.architecture);
            }
        }
        out
    }
}
