//! Allocation and placement error types.

use thiserror::Error;

/// A pool set / weight vector that cannot be turned into bindings.
///
/// Raised before anything is registered on the cluster; never retryable.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AllocationError {
    #[error("no pools to allocate")]
    Empty,

    #[error("{pools} pools but {weights} weights")]
    LengthMismatch { pools: usize, weights: usize },

    #[error("negative weight {weight} for pool {pool}")]
    NegativeWeight { pool: String, weight: i64 },

    #[error("weight {weight} for pool {pool} is out of range")]
    WeightOutOfRange { pool: String, weight: i64 },

    #[error("all capacity provider weights are zero")]
    AllZero,

    #[error("pool {0} violates min <= desired <= max")]
    PoolBounds(String),

    #[error("pool {0} listed more than once")]
    DuplicatePool(String),

    #[error("capacity provider {0} already attached to the cluster")]
    AlreadyAttached(String),
}

/// Placement onto a cluster that has nothing to place on.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlacementError {
    #[error("cluster {0} has no capacity provider with positive weight")]
    NoPlaceableBinding(String),
}
