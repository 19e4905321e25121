//! Error types for the Plan stage.

use ramses_knowledge::KnowledgeError;
use ramses_optimizer::OptimizerError;
use thiserror::Error;

/// Result type alias for planning operations.
pub type PlanResult<T> = Result<T, PlanError>;

/// Errors that abort a planning iteration. Per-candidate failures never
/// surface here; they are logged and the candidate is skipped.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("knowledge error: {0}")]
    Knowledge(#[from] KnowledgeError),

    #[error("optimizer error: {0}")]
    Optimizer(#[from] OptimizerError),

    #[error("service {service_id} has more than one forced AddInstance option")]
    MultipleForcedAddInstance { service_id: String },

    #[error("adaptation option for unknown service {0}")]
    UnknownService(String),

    #[error("execute handoff failed: {0:#}")]
    Execute(anyhow::Error),
}
