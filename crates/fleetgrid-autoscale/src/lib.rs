//! fleetgrid-autoscale: load-driven desired counts for services.
//!
//! # Architecture
//!
//! ```text
//! AutoscalingSupervisor
//!   ├── Per-service tokio task (one per AutoscalingPolicy)
//!   │   ├── AutoscalingController (state machine, cooldowns)
//!   │   ├── MetricsSource::sample() on every interval tick
//!   │   ├── mpsc samples pushed by callers
//!   │   └── watch::Sender<u32> desired count (sole writer)
//!   └── broadcast feed of ScaleEvents
//! ```
//!
//! Reaching a bound is reported as [`ScaleEvent::BoundReached`], never as
//! an error; the loop keeps running for the lifetime of the service.

pub mod controller;
pub mod error;
mod runner;
pub mod source;
pub mod supervisor;

pub use controller::{
    AutoscalingController, Bound, Direction, Evaluation, ScaleEvent, ScalingState,
};
pub use error::AutoscaleError;
pub use source::{MetricsSource, PushOnly};
pub use supervisor::{AutoscalingSupervisor, ServiceHandle};
