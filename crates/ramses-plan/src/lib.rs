//! ramses-plan: the Plan stage of the RAMSES managing loop.
//!
//! Turns the adaptation options proposed by Analyse into the set of
//! options Execute applies, one iteration per trigger.
//!
//! # Iteration
//!
//! ```text
//! Knowledge ──► snapshot + proposed options
//!                 │
//!                 ├─ forced options ──► shutdowns, then ≤ 1 add-instance
//!                 │
//!                 └─ proposed options ──► parameters (optimizer, scoring)
//!                                          └─► select_best_option (≤ 1 system-wide)
//!                 │
//!                 ▼
//!   touched services ──► invalidation cascade ──► commit ──► Execute::start
//! ```
//!
//! Any error aborts the iteration before Execute is signalled and marks
//! the Plan module failed in Knowledge.

pub mod config;
pub mod error;
pub mod execute;
pub mod invalidation;
pub mod options;
pub mod planner;
pub mod runner;

pub use config::{OptimizerConfig, PlanConfig};
pub use error::{PlanError, PlanResult};
pub use execute::{ChannelExecute, ExecuteClient};
pub use invalidation::{cascade, invalidate_cascade};
pub use planner::{PlanOutcome, PlanPhase, Planner};
pub use runner::PlanRunner;
