//! fleetgrid-traffic: binds load balancers to services and keeps their
//! target groups in rotation.
//!
//! A [`TrafficRouter`] is the declared listener + target group pair for one
//! service. A [`TargetGroup`] is its runtime side: the set of task
//! endpoints, which of them currently pass health checks, and how many
//! requests were routed to them.
//!
//! # Components
//!
//! - **`router`**: `bind()` and the router record
//! - **`target_group`**: health-driven rotation and the requests-per-target signal
//! - **`health`**: consecutive-result health tracking with backoff
//! - **`balancer`**: lock-free round-robin selection
//!
//! Targets failing health checks leave rotation with a
//! [`TargetEvent::Excluded`]; that is an observation, not an error.

pub mod balancer;
pub mod error;
pub mod health;
pub mod router;
pub mod target_group;

pub use balancer::RoundRobinBalancer;
pub use error::RouterError;
pub use health::{HealthSettings, HealthTracker, ProbeResult, TargetHealth};
pub use router::{Listener, Protocol, TargetGroupSpec, TargetType, TrafficRouter, bind};
pub use target_group::{Target, TargetEvent, TargetGroup};
