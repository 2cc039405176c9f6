//! Payment Error Types

use thiserror::Error;

use crate::event::Provider;

/// Result type alias
pub type Result<T> = std::result::Result<T, PaymentError>;

/// Payment-related errors
#[derive(Error, Debug)]
pub enum PaymentError {
    /// Missing secret or URL; fatal for the operation
    #[error("Configuration error: {0}")]
    Config(String),

    /// Bad checkout input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Webhook signature missing or wrong
    #[error("Webhook signature invalid: {0}")]
    Signature(String),

    /// Webhook body could not be parsed
    #[error("Webhook payload malformed: {0}")]
    Malformed(String),

    /// Provider API call failed
    #[error("{provider} API error: {message}")]
    Upstream { provider: Provider, message: String },

    /// Operation not offered by this provider
    #[error("{provider} does not support {operation}")]
    Unsupported {
        provider: Provider,
        operation: &'static str,
    },

    /// Provider has no configured gateway
    #[error("Payment provider not configured: {0}")]
    NotConfigured(String),
}

impl PaymentError {
    pub(crate) fn upstream(provider: Provider, message: impl Into<String>) -> Self {
        Self::Upstream {
            provider,
            message: message.into(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, PaymentError::Upstream { .. })
    }

    /// Get user-friendly message
    pub fn user_message(&self) -> &str {
        match self {
            PaymentError::Validation(_) => "The payment request is invalid.",
            PaymentError::Signature(_) => "Invalid signature.",
            PaymentError::Malformed(_) => "Invalid JSON payload.",
            PaymentError::Upstream { .. } => "Payment processing failed. Please try again.",
            PaymentError::Config(_) | PaymentError::NotConfigured(_) => {
                "Service configuration error."
            }
            PaymentError::Unsupported { .. } => "This operation is not available for the provider.",
        }
    }
}
