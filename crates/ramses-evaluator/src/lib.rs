//! ramses-evaluator: comparative scoring of adaptation options.
//!
//! Projects each candidate option onto a whole-system QoS snapshot and
//! scores it with an absorbing Markov reward model of the application's
//! request flow, relative to the unmodified baseline.
//!
//! # Architecture
//!
//! ```text
//! Services ──► SystemSnapshot::baseline ─┐
//!    │                                   ├──► RewardEvaluator ──► relative cost
//!    └─ option ─► SystemSnapshot::project┘     ├── MarkovRewardEvaluator (in-process)
//!                                              └── PrismEvaluator (external binary)
//!
//! select_best_option: JoinSet of timed evaluations ──► rank by
//!     (cost, service id, position) ──► best if cost < 1.0
//! ```

pub mod config;
pub mod error;
pub mod evaluator;
pub mod markov;
pub mod selector;
pub mod snapshot;
pub mod topology;

pub use config::{EvaluationConfig, EvaluatorBackend};
pub use error::{EvalError, EvalResult};
pub use evaluator::{
    parse_prism_output, relative_cost, EvalFuture, MarkovRewardEvaluator, PrismEvaluator,
    RewardEvaluator, PRISM_PROPERTY,
};
pub use markov::AbsorbingChain;
pub use selector::{select_best_option, RankedCandidate, Selection, BASELINE_COST};
pub use snapshot::{QosWeights, SystemSnapshot};
pub use topology::{OrderingFlowTopology, TopologyConfig};
