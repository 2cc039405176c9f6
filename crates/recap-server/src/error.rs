//! API Errors
//!
//! Every handler error becomes `{ "error", "code", "details"? }`. Details
//! carry the debug chain and are attached only in development (see
//! [`attach_error_details`]).

use axum::Json;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use recap_core::CoreError;
use recap_payments::PaymentError;
use recap_pipeline::PipelineError;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Payments not configured: {0}")]
    PaymentsDisabled(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Follow-up provider call failed while handling a webhook; the
    /// provider retries on 5xx
    #[error("Payment lookup failed: {0}")]
    WebhookUpstream(String),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Wire shape of an error response
#[derive(Clone, Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Debug chain kept aside for development responses
#[derive(Clone, Debug)]
struct ErrorDetails(String);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::PaymentsDisabled(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Config(_) | ApiError::WebhookUpstream(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Payment(e) => match e {
                PaymentError::Validation(_) | PaymentError::Malformed(_) => StatusCode::BAD_REQUEST,
                PaymentError::Signature(_) => StatusCode::UNAUTHORIZED,
                PaymentError::Upstream { .. } => StatusCode::BAD_GATEWAY,
                PaymentError::Unsupported { .. } => StatusCode::NOT_IMPLEMENTED,
                PaymentError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
                PaymentError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Pipeline(e) => match e {
                PipelineError::Validation(_) => StatusCode::BAD_REQUEST,
                PipelineError::CorruptArchive(_)
                | PipelineError::NoTranscript { .. }
                | PipelineError::EmptyTranscript(_) => StatusCode::UNPROCESSABLE_ENTITY,
                PipelineError::Download(_)
                | PipelineError::GenerationFormat { .. }
                | PipelineError::Provider(_) => StatusCode::BAD_GATEWAY,
                PipelineError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                PipelineError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
                PipelineError::Store(e) => core_status(e),
            },
            ApiError::Core(e) => core_status(e),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::PaymentsDisabled(_) => "PAYMENTS_DISABLED",
            ApiError::Config(_) => "CONFIG_ERROR",
            ApiError::WebhookUpstream(_) => "UPSTREAM_FETCH_FAILED",
            ApiError::Payment(e) => match e {
                PaymentError::Validation(_) => "VALIDATION_ERROR",
                PaymentError::Malformed(_) => "INVALID_BODY",
                PaymentError::Signature(_) => "INVALID_SIGNATURE",
                PaymentError::Upstream { .. } => "CHECKOUT_ERROR",
                PaymentError::Unsupported { .. } => "UNSUPPORTED",
                PaymentError::NotConfigured(_) => "PAYMENTS_DISABLED",
                PaymentError::Config(_) => "CONFIG_ERROR",
            },
            ApiError::Pipeline(e) => match e {
                PipelineError::Validation(_) => "VALIDATION_ERROR",
                PipelineError::Download(_) => "DOWNLOAD_ERROR",
                PipelineError::CorruptArchive(_) => "CORRUPT_ARCHIVE",
                PipelineError::NoTranscript { .. } => "NO_TRANSCRIPT",
                PipelineError::EmptyTranscript(_) => "EMPTY_TRANSCRIPT",
                PipelineError::GenerationFormat { .. } => "GENERATION_FORMAT",
                PipelineError::Provider(_) => "GENERATION_ERROR",
                PipelineError::Timeout { .. } => "TIMEOUT",
                PipelineError::Config(_) => "CONFIG_ERROR",
                PipelineError::Store(e) => core_code(e),
            },
            ApiError::Core(e) => core_code(e),
        }
    }

    /// Message safe to show a client
    fn public_message(&self) -> String {
        match self {
            ApiError::Payment(e) => match e {
                // Checkout input problems are the caller's to fix
                PaymentError::Validation(msg) => msg.clone(),
                other => other.user_message().to_string(),
            },
            ApiError::Pipeline(e) => match e {
                PipelineError::NoTranscript { .. } | PipelineError::Validation(_) => e.to_string(),
                other => other.user_message(),
            },
            ApiError::Core(e) => e.user_message(),
            ApiError::Config(_) => "Service configuration error.".into(),
            other => other.to_string(),
        }
    }
}

fn core_status(e: &CoreError) -> StatusCode {
    match e {
        CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        CoreError::InvalidTransition { .. } => StatusCode::CONFLICT,
        CoreError::InvalidId(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn core_code(e: &CoreError) -> &'static str {
    match e {
        CoreError::NotFound { .. } => "NOT_FOUND",
        CoreError::InvalidTransition { .. } => "CONFLICT",
        CoreError::InvalidId(_) => "INVALID_ID",
        _ => "STORE_ERROR",
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Request failed");
        } else {
            tracing::debug!(code = self.code(), error = %self, "Request rejected");
        }

        let body = ErrorBody {
            error: self.public_message(),
            code: self.code(),
            details: None,
        };
        let mut response = (status, Json(body.clone())).into_response();
        response.extensions_mut().insert(body);
        response
            .extensions_mut()
            .insert(ErrorDetails(format!("{self:?}")));
        response
    }
}

/// Re-render error bodies with their debug chain when running in development
pub async fn attach_error_details(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let response = next.run(request).await;
    if !state.config.development {
        return response;
    }

    let (Some(body), Some(ErrorDetails(details))) = (
        response.extensions().get::<ErrorBody>().cloned(),
        response.extensions().get::<ErrorDetails>().cloned(),
    ) else {
        return response;
    };

    let body = ErrorBody {
        details: Some(details),
        ..body
    };
    (response.status(), Json(body)).into_response()
}
