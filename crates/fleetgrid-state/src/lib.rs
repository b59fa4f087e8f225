//! fleetgrid-state: domain model and descriptor store for fleetgrid.
//!
//! Holds the resource types every other crate speaks (pools, capacity
//! provider bindings, clusters, services, autoscaling policies) plus the
//! synthesized topology descriptor, and persists descriptors in
//! [redb](https://docs.rs/redb).
//!
//! # Architecture
//!
//! Resource records are JSON-serialized into redb's `&[u8]` value columns
//! under `{stack}/{resource_id}` keys, so one stack's records are a prefix
//! scan. A stack summary (ordering and outputs) sits in its own table.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
