//! Error types for the loanflow worker.
//!
//! Every fallible operation in the crate returns [`Result`]. Variants map onto the
//! failure classes the worker reports back to the workflow engine: validation and
//! transition errors are terminal for a task attempt, transport and persistence
//! errors are transient and resolved by the engine's own redelivery.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoanflowError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Unknown task type: no handler registered for '{0}'")]
    UnknownTaskType(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error(
        "State conflict for application {application_id}: expected {expected}, found {actual}"
    )]
    StateConflict {
        application_id: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LoanflowError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn application_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "Loan application".to_string(),
            id: id.into(),
        }
    }

    pub fn workflow_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "Workflow".to_string(),
            id: id.into(),
        }
    }

    /// Transient failures that the engine may safely redeliver.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Persistence(_) | Self::StateConflict { .. }
        )
    }

    /// Stable label used in FAILED payloads and log fields.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound { .. } => "not_found",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::UnknownTaskType(_) => "unknown_task_type",
            Self::Transport(_) => "transport_error",
            Self::Persistence(_) => "persistence_error",
            Self::StateConflict { .. } => "state_conflict",
            Self::Configuration(_) => "configuration_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl From<serde_json::Error> for LoanflowError {
    fn from(error: serde_json::Error) -> Self {
        LoanflowError::Validation(format!("JSON serialization error: {error}"))
    }
}

impl From<sqlx::Error> for LoanflowError {
    fn from(error: sqlx::Error) -> Self {
        LoanflowError::Persistence(error.to_string())
    }
}

impl From<reqwest::Error> for LoanflowError {
    fn from(error: reqwest::Error) -> Self {
        LoanflowError::Transport(error.to_string())
    }
}

impl From<crate::config::ConfigurationError> for LoanflowError {
    fn from(error: crate::config::ConfigurationError) -> Self {
        LoanflowError::Configuration(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LoanflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(LoanflowError::Transport("connection reset".into()).is_retryable());
        assert!(LoanflowError::Persistence("pool timed out".into()).is_retryable());
        assert!(!LoanflowError::validation("missing applicationId").is_retryable());
        assert!(!LoanflowError::InvalidTransition {
            from: "initiated".into(),
            to: "funded".into()
        }
        .is_retryable());
        assert!(!LoanflowError::UnknownTaskType("mystery_ref".into()).is_retryable());
    }

    #[test]
    fn test_error_messages() {
        let err = LoanflowError::application_not_found("A1");
        assert_eq!(err.to_string(), "Loan application not found: A1");

        let err = LoanflowError::InvalidTransition {
            from: "underwriting".into(),
            to: "funded".into(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid state transition from underwriting to funded"
        );
        assert_eq!(err.error_kind(), "invalid_transition");
    }
}
