//! Error types for the signup service.

use std::time::Duration;

use uuid::Uuid;

use crate::onboarding::state::OnboardingStep;

/// Errors surfaced by the verification engine, provisioner, and orchestrator.
///
/// Every variant is returned to the caller as-is; nothing in this crate
/// retries a user-facing call on its own.
#[derive(Debug, thiserror::Error)]
pub enum SignupError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Verification {id} expired")]
    Expired { id: Uuid },

    #[error("Verification {id} has no attempts left (max {max})")]
    AttemptsExhausted { id: Uuid, max: u32 },

    #[error("Invalid code for verification {id}, {remaining} attempts left")]
    InvalidCode { id: Uuid, remaining: u32 },

    #[error("Step {step} requires {missing}")]
    PrerequisiteMissing {
        step: OnboardingStep,
        missing: String,
    },

    #[error("Collaborator failure: {0}")]
    CollaboratorFailure(#[from] CollaboratorError),

    #[error("Concurrent update lost: {0}")]
    PersistenceConflict(String),

    #[error("Database error: {0}")]
    Database(DatabaseError),
}

impl SignupError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound { .. } => "not_found",
            Self::Expired { .. } => "expired",
            Self::AttemptsExhausted { .. } => "attempts_exhausted",
            Self::InvalidCode { .. } => "invalid_code",
            Self::PrerequisiteMissing { .. } => "prerequisite_missing",
            Self::CollaboratorFailure(_) => "collaborator_failure",
            Self::PersistenceConflict(_) => "persistence_conflict",
            Self::Database(_) => "internal_error",
        }
    }
}

impl From<DatabaseError> for SignupError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound { entity, id } => Self::NotFound { entity, id },
            DatabaseError::Constraint(msg) => Self::PersistenceConflict(msg),
            other => Self::Database(other),
        }
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DatabaseError {
    /// Classify a libSQL error raised by `op`, keeping constraint failures
    /// distinguishable so callers can report a lost race.
    pub fn from_libsql(op: &str, err: libsql::Error) -> Self {
        let message = err.to_string();
        if message.contains("UNIQUE constraint failed") || message.contains("CHECK constraint failed")
        {
            Self::Constraint(format!("{op}: {message}"))
        } else {
            Self::Query(format!("{op}: {message}"))
        }
    }
}

/// Failures talking to an external collaborator (delivery, registrar,
/// number provisioner, payment processor).
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("{collaborator} request failed: {reason}")]
    RequestFailed {
        collaborator: &'static str,
        reason: String,
    },

    #[error("{collaborator} rejected the request ({status}): {reason}")]
    Rejected {
        collaborator: &'static str,
        status: u16,
        reason: String,
    },

    #[error("Invalid response from {collaborator}: {reason}")]
    InvalidResponse {
        collaborator: &'static str,
        reason: String,
    },

    #[error("{collaborator} timed out after {timeout:?}")]
    Timeout {
        collaborator: &'static str,
        timeout: Duration,
    },
}

/// Result type alias for signup operations.
pub type Result<T> = std::result::Result<T, SignupError>;
