//! Shared types used across fleetgrid crates.

use serde::{Deserialize, Serialize};

/// CPU architecture of a compute pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    Arm64,
    #[serde(rename = "x86_64")]
    X86_64,
}

impl Architecture {
    /// Machine image family for container hosts of this architecture.
    pub fn image_family(&self) -> &'static str {
        match self {
            Architecture::Arm64 => "ecs-optimized-al2-arm64",
            Architecture::X86_64 => "ecs-optimized-al2-x86_64",
        }
    }

    /// Container platform string (`os/arch`).
    pub fn platform(&self) -> &'static str {
        match self {
            Architecture::Arm64 => "linux/arm64",
            Architecture::X86_64 => "linux/amd64",
        }
    }

    pub fn from_platform(platform: &str) -> Option<Self> {
        match platform {
            "linux/arm64" | "arm64" => Some(Architecture::Arm64),
            "linux/amd64" | "amd64" | "x86_64" => Some(Architecture::X86_64),
            _ => None,
        }
    }
}

/// Whether a load balancer is reachable from the internet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Exposure {
    #[default]
    Public,
    Private,
}

/// Egress capability of the network a topology is placed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EgressMode {
    Public,
    Private,
    Nat,
}

/// Registry permission granted to the task execution role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegistryCapability {
    ReadOnly,
    Push,
}

/// Explicit account/region a stack is synthesized for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentTarget {
    pub account: String,
    pub region: String,
}

impl DeploymentTarget {
    pub fn new(account: &str, region: &str) -> Self {
        Self {
            account: account.to_string(),
            region: region.to_string(),
        }
    }
}
