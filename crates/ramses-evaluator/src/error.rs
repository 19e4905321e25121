//! Error types for option evaluation.

use ramses_knowledge::QosKind;
use thiserror::Error;

/// Result type alias for evaluator operations.
pub type EvalResult<T> = Result<T, EvalError>;

/// Errors raised while projecting or scoring a candidate. Every variant
/// disqualifies only the candidate being evaluated.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("no {kind} value for service {service_id}")]
    MissingValue { service_id: String, kind: QosKind },

    #[error("unknown service: {0}")]
    UnknownService(String),

    #[error("{option} option for service {service_id} has no computed parameters")]
    UnresolvedOption {
        service_id: String,
        option: &'static str,
    },

    #[error("cannot project service {service_id}: {reason}")]
    Projection { service_id: String, reason: String },

    #[error("baseline visit cost of service {service_id} is zero")]
    DegenerateBaseline { service_id: String },

    #[error("invalid transition probabilities from state {state}: {reason}")]
    InvalidProbability { state: usize, reason: String },

    #[error("absorption is not certain from the initial state")]
    NotAbsorbing,

    #[error("model checker failed: {0}")]
    Process(String),

    #[error("unparsable model checker output: {0}")]
    Unparsable(String),

    #[error("evaluation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
