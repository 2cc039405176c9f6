//! Route Table

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::error::attach_error_details;
use crate::handlers::{
    create_job, get_credits, get_job, get_job_content, get_job_metadata, health_check,
    list_user_jobs, process_job,
};
use crate::state::AppState;
use crate::webhooks::{confirm_payment, create_checkout, payment_webhook};

/// Endpoint summary logged at startup
pub const ENDPOINTS: [(&str, &str, &str); 11] = [
    ("GET", "/health", "Health check"),
    ("POST", "/jobs", "Create a job (debits one credit or starts a free trial)"),
    ("GET", "/jobs/{id}", "Job status"),
    ("GET", "/jobs/{id}/metadata", "Photo references"),
    ("GET", "/jobs/{id}/content", "Generated retrospective"),
    ("POST", "/process", "Run the pipeline and wait"),
    ("GET", "/users/{user_id}/jobs", "Saved jobs"),
    ("GET", "/users/{user_id}/credits", "Credit balance"),
    ("POST", "/checkout/{provider}", "Create a provider checkout"),
    ("POST", "/webhooks/{provider}", "Provider payment notification"),
    ("POST", "/payments/{provider}/confirm", "Look up and apply a payment"),
];

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health
        .route("/health", get(health_check))
        // Jobs
        .route("/jobs", post(create_job))
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/metadata", get(get_job_metadata))
        .route("/jobs/{id}/content", get(get_job_content))
        .route("/process", post(process_job))
        // Users
        .route("/users/{user_id}/jobs", get(list_user_jobs))
        .route("/users/{user_id}/credits", get(get_credits))
        // Payments
        .route("/checkout/{provider}", post(create_checkout))
        .route("/webhooks/{provider}", post(payment_webhook))
        .route("/payments/{provider}/confirm", post(confirm_payment))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    attach_error_details,
                )),
        )
        .with_state(state)
}
