//! fleetgrid capacity allocation: weighted providers and task placement.
//!
//! Turns resource pools into weighted capacity provider bindings on a
//! cluster and decides how many of a service's tasks land on each binding.
//! It does NOT grow or shrink the pools themselves; bindings with managed
//! scaling leave that to the infrastructure provider.
//!
//! # Components
//!
//! - **`allocator`**: `CapacityAllocator` (pools + weights → bindings)
//! - **`placer`**: Weighted round-robin split and scale reconciliation
//! - **`convert`**: Pool/provider construction from template config

pub mod allocator;
pub mod convert;
pub mod error;
pub mod placer;

pub use allocator::{CapacityAllocator, ProviderRequest};
pub use convert::{pool_from_config, request_from_config};
pub use error::{AllocationError, PlacementError};
pub use placer::{PlacementPlan, Reconciliation, place, place_on, reconcile};
