//! ramses-knowledge: the knowledge model of the RAMSES managing loop.
//!
//! In-memory representation of the managed system: services, their
//! implementations and instances, QoS specifications and histories, and
//! the adaptation options exchanged between the Analyse, Plan and Execute
//! stages.
//!
//! # Architecture
//!
//! ```text
//! Service
//!   ├── dependencies (service ids, may form cycles)
//!   ├── qos_specifications (kind → weight + threshold)
//!   ├── load balancer (kind + instance weights)
//!   ├── qos (service-level QosHistory)
//!   └── possible implementations
//!       └── ServiceImplementation (score, benchmarks, preference)
//!           └── Instance (status + QosHistory)
//! ```
//!
//! The [`Knowledge`] trait is the narrow interface the Plan stage reads
//! snapshots from and commits decisions to. [`InMemoryKnowledge`] is the
//! process-local implementation.

pub mod architecture;
pub mod error;
pub mod knowledge;
pub mod options;
pub mod qos;
pub mod store;
pub mod types;

pub use architecture::SystemArchitecture;
pub use error::{KnowledgeError, KnowledgeResult};
pub use knowledge::{ChosenOptions, Knowledge, Module, OptionsByService};
pub use options::{AdaptationOption, OptionKind};
pub use qos::{epoch_secs, Direction, QosHistory, QosKind, QosSpecification, QosThreshold, QosValue};
pub use store::InMemoryKnowledge;
pub use types::*;
