//! Resolver and synthesis error types.

use thiserror::Error;

use fleet_core::ConfigError;
use fleetgrid_placement::{AllocationError, PlacementError};
use fleetgrid_state::{ResourceId, StateError};
use fleetgrid_traffic::RouterError;

/// Problems in the resource graph itself.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("dependency cycle among {0:?}")]
    DependencyCycle(Vec<ResourceId>),

    #[error("{resource} depends on unknown resource {missing}")]
    DanglingDependency {
        resource: ResourceId,
        missing: ResourceId,
    },

    #[error("{resource} (layer {layer}) depends on {dependency} from later layer {dependency_layer}")]
    LayerViolation {
        resource: ResourceId,
        layer: u8,
        dependency: ResourceId,
        dependency_layer: u8,
    },

    #[error("resource {0} declared twice")]
    DuplicateResource(ResourceId),
}

/// Resolution failures. All are raised before any resource is provisioned.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid topology config: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid allocation: {0}")]
    Allocation(#[from] AllocationError),

    #[error(transparent)]
    Placement(#[from] PlacementError),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("serialize {resource}: {message}")]
    Serialize { resource: String, message: String },
}

pub type ResolveResult<T> = Result<T, ResolveError>;

/// Synthesis and teardown failures.
#[derive(Debug, Error)]
pub enum SynthesisError {
    /// Retries exhausted. Everything created before was rolled back.
    #[error("provisioning {resource} failed after {attempts} attempts: {last_error}")]
    ProvisioningTimeout {
        resource: ResourceId,
        attempts: u32,
        last_error: String,
    },

    #[error("synthesis of {stack} cancelled; {rolled_back} resources rolled back")]
    Cancelled { stack: String, rolled_back: usize },

    /// Rollback itself failed; these resources may still exist.
    #[error("rollback incomplete after {cause}; remaining: {remaining:?}")]
    RollbackIncomplete {
        cause: Box<SynthesisError>,
        remaining: Vec<ResourceId>,
    },

    #[error("stack {0} not found")]
    StackNotFound(String),

    #[error(transparent)]
    State(#[from] StateError),
}

pub type SynthesisResult<T> = Result<T, SynthesisError>;
