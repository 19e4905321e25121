//! Error types for the weight optimizer.

use ramses_knowledge::QosKind;
use thiserror::Error;

/// Result type alias for optimizer operations.
pub type OptimizerResult<T> = Result<T, OptimizerError>;

/// Errors raised while building a weight optimization problem.
///
/// A solver that finds no usable solution is not an error: the optimizer
/// returns `Ok(None)` and the caller skips the service.
#[derive(Debug, Error)]
pub enum OptimizerError {
    #[error("no current {kind} value for {subject}")]
    MissingMetric { subject: String, kind: QosKind },

    #[error("invalid {kind} value {value} for {subject}")]
    InvalidMetric {
        subject: String,
        kind: QosKind,
        value: f64,
    },

    #[error("service {0} has no instances")]
    NoInstances(String),

    #[error("service {service_id} has {weights} load balancer weights for {instances} instances")]
    WeightsMismatch {
        service_id: String,
        weights: usize,
        instances: usize,
    },
}

impl OptimizerError {
    /// Invariant violations abort the planning iteration; everything else
    /// only disqualifies the service being optimized.
    pub fn is_fatal(&self) -> bool {
        matches!(self, OptimizerError::WeightsMismatch { .. })
    }
}
