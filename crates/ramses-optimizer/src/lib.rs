//! ramses-optimizer: load balancer weight optimization.
//!
//! Builds a mixed-integer linear program per service and solves it with a
//! deterministic branch-and-bound over a simplex relaxation.
//!
//! # Pipeline
//!
//! ```text
//! Service (weights P, instance and service QoS)
//!     │  WeightOptimizer::optimize
//!     ▼
//! LinearProgram ──► MipSolver (BranchAndBound ──► two-phase simplex)
//!     │
//!     ▼
//! Solution { status, values }
//!     │  status ∈ {Optimal, Feasible, Unbounded}?  otherwise Ok(None)
//!     ▼
//! WeightChange { weights (w > 0), instances_to_shutdown (w = 0) }
//! ```
//!
//! Adding or removing instances does not need the solver: the weight-mass
//! functions in [`weights`] rescale and redistribute the existing map.

pub mod error;
pub mod lp;
mod simplex;
pub mod solver;
pub mod weights;

pub use error::{OptimizerError, OptimizerResult};
pub use lp::{ConstraintId, LinearProgram, VariableId};
pub use solver::{BranchAndBound, MipSolver, Solution, SolveStatus};
pub use weights::{
    add_instance_weights, current_weights, new_instance_seed, reduce_weights_for_new_instances,
    redistribute_weight, remove_instances_under_threshold, uniform_weights, AddInstanceWeights,
    WeightChange, WeightOptimizer,
};
