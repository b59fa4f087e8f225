//! fleetgrid-resolver: topology template resolution and synthesis.
//!
//! # Architecture
//!
//! ```text
//! TopologyConfig
//!   └── resolve()                      (sync, no side effects)
//!       ├── CapacityAllocator          pools → weighted providers on the cluster
//!       ├── ServiceSpec + placement    weighted spread over providers
//!       ├── bind()                     router in the cluster's network
//!       ├── AutoscalingPolicy          requests per target
//!       └── ResourceGraph              layer checks, cycle detection, order
//!           → TopologyDescriptor       content-addressed ids + DNS output
//!
//! Synthesizer
//!   ├── diff(stored, new)              what to create / delete
//!   ├── Provisioner::create()          timeout + retry with backoff
//!   ├── rollback in reverse order      on exhausted retries or cancel
//!   └── StateStore::put_descriptor()   only after full success
//! ```

pub mod diff;
pub mod error;
pub mod graph;
pub mod identity;
pub mod provisioner;
pub mod synth;
pub mod template;

pub use diff::{DescriptorDiff, diff};
pub use error::{GraphError, ResolveError, ResolveResult, SynthesisError, SynthesisResult};
pub use graph::ResourceGraph;
pub use identity::resource_id;
pub use provisioner::{BoxFuture, Provisioner, StoreProvisioner};
pub use synth::{SynthesisOptions, SynthesisReport, Synthesizer};
pub use template::{CONTAINER_NAME, OUTPUT_DNS, ResolvedTopology, resolve, resolve_fleet};
