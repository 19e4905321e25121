//! Error types for the RAMSES knowledge model.

use thiserror::Error;

/// Result type alias for knowledge operations.
pub type KnowledgeResult<T> = Result<T, KnowledgeError>;

/// Errors that can occur while building or mutating the knowledge model.
#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("implementation scores of service {service_id} sum to {total}, expected 1.0")]
    ScoreSum { service_id: String, total: f64 },

    #[error("service not found: {0}")]
    UnknownService(String),

    #[error("implementation {implementation_id} not found for service {service_id}")]
    UnknownImplementation {
        service_id: String,
        implementation_id: String,
    },

    #[error("instance {instance_id} not found in service {service_id}")]
    UnknownInstance {
        service_id: String,
        instance_id: String,
    },

    #[error("invalid load balancer weights for service {service_id}: {reason}")]
    InvalidWeights { service_id: String, reason: String },

    #[error("instance {instance_id} cannot move from {from} to {to}")]
    InvalidTransition {
        instance_id: String,
        from: String,
        to: String,
    },

    #[error(
        "service {service_id} was modified concurrently (snapshot revision {expected}, stored revision {found})"
    )]
    ConcurrentModification {
        service_id: String,
        expected: u64,
        found: u64,
    },

    #[error("architecture parse error: {0}")]
    Parse(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
