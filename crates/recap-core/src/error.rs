//! Error Types

use thiserror::Error;

use crate::job::JobStatus;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error types
#[derive(Error, Debug)]
pub enum CoreError {
    /// Record or blob does not exist
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Job state machine refused the transition
    #[error("Job {id} cannot {action} while {from}")]
    InvalidTransition {
        id: String,
        from: JobStatus,
        action: &'static str,
    },

    /// Malformed identifier or storage reference
    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    /// Backend storage failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// LLM provider error
    #[error("Provider error: {0}")]
    Provider(String),

    /// Provider unavailable or not responding
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    pub(crate) fn job_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "job",
            id: id.into(),
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::Storage(_) | CoreError::ProviderUnavailable(_) | CoreError::Io(_)
        )
    }

    /// Whether the error means "does not exist" rather than a transient failure
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::NotFound { .. })
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            CoreError::NotFound { kind, .. } => format!("The requested {kind} does not exist."),
            CoreError::InvalidTransition { .. } => {
                "This retrospective cannot be changed in its current state.".into()
            }
            CoreError::InvalidId(_) => "The identifier is not valid.".into(),
            CoreError::ProviderUnavailable(_) => {
                "The AI service is currently unavailable. Please try again.".into()
            }
            _ => "An unexpected error occurred.".into(),
        }
    }
}
