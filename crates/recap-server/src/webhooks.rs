//! Checkout, Webhook and Payment Confirmation Handlers
//!
//! One route per operation, parameterized by provider; the gateway chosen
//! from the registry owns every provider-specific detail.

use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State, rejection::JsonRejection},
    http::HeaderMap,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use recap_core::JobId;
use recap_payments::{
    Checkout, CheckoutRequest, PaymentError, PaymentEvent, PaymentGateway, PaymentMetadata,
    Provider, ReconcileOutcome, WebhookOutcome,
};

use crate::error::ApiError;
use crate::handlers::json_body;
use crate::state::AppState;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutBody {
    pub amount: Decimal,
    #[serde(default)]
    pub credits: Option<u64>,
    #[serde(default)]
    pub retrospective_id: Option<String>,
    pub user_id: String,
    #[serde(default)]
    pub user_email: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmBody {
    pub payment_id: String,
}

/// Webhook acknowledgement
#[derive(Debug, Serialize)]
pub struct WebhookAck<'a> {
    pub received: bool,
    pub applied: bool,
    #[serde(flatten)]
    pub outcome: &'a ReconcileOutcome,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmResponse<'a> {
    pub payment_id: String,
    pub status: &'static str,
    pub applied: bool,
    #[serde(flatten)]
    pub outcome: &'a ReconcileOutcome,
}

fn gateway(state: &AppState, provider: &str) -> Result<Arc<dyn PaymentGateway>, ApiError> {
    let provider: Provider = provider
        .parse()
        .map_err(|_| ApiError::NotFound(format!("Unknown payment provider: {provider}")))?;
    state
        .gateways
        .get(provider)
        .map_err(|_| ApiError::PaymentsDisabled(provider.to_string()))
}

impl CheckoutBody {
    /// Exactly one of `credits` / `retrospectiveId`
    fn metadata(&self) -> Result<(PaymentMetadata, String), ApiError> {
        let user_id = self.user_id.trim();
        if user_id.is_empty() {
            return Err(ApiError::Validation("userId is required".into()));
        }

        let retrospective_id = self
            .retrospective_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty());

        match (self.credits, retrospective_id) {
            (Some(0), None) => Err(ApiError::Validation("credits must be at least 1".into())),
            (Some(credits), None) => Ok((
                PaymentMetadata::credits(user_id, credits),
                format!("{credits} créditos Chat Recap"),
            )),
            (None, Some(id)) => Ok((
                PaymentMetadata::retrospective(user_id, id),
                "Retrospectiva Chat Recap".into(),
            )),
            _ => Err(ApiError::Validation(
                "Provide exactly one of credits or retrospectiveId".into(),
            )),
        }
    }
}

// ============================================================================
// Checkout
// ============================================================================

pub async fn create_checkout(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    payload: Result<Json<CheckoutBody>, JsonRejection>,
) -> Result<Json<Checkout>, ApiError> {
    let gateway = gateway(&state, &provider)?;
    let body = json_body(payload)?;
    let (metadata, description) = body.metadata()?;

    if let Some(id) = &metadata.retrospective_id {
        let job = state.jobs.get_job(&JobId::parse(id.as_str())?)?;
        if Some(job.user_id.as_str()) != metadata.user_id.as_deref() {
            return Err(ApiError::Validation(format!(
                "Retrospective {id} does not belong to this user"
            )));
        }
    }

    let config = &state.config;
    let request = CheckoutRequest {
        amount: body.amount,
        description,
        success_url: config.url("/payment-success"),
        failure_url: config.url("/payment-failure"),
        pending_url: Some(config.url("/payment-pending")),
        notification_url: Some(config.url(&format!("/webhooks/{}", gateway.provider()))),
        metadata,
        payer_email: body.user_email,
    };

    let checkout = gateway.create_checkout(&request).await?;
    tracing::info!(
        provider = %checkout.provider,
        external_id = checkout.external_id.as_deref().unwrap_or("-"),
        "Checkout created"
    );
    Ok(Json(checkout))
}

// ============================================================================
// Webhooks
// ============================================================================

/// Verify, normalize and reconcile a provider notification
pub async fn payment_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let gateway = gateway(&state, &provider)?;

    let outcome = gateway
        .parse_webhook(&body, &headers)
        .await
        .map_err(|e| match e {
            // Follow-up lookups are retried by the provider on 5xx
            PaymentError::Upstream { .. } => ApiError::WebhookUpstream(e.to_string()),
            other => other.into(),
        })?;

    let event = match outcome {
        WebhookOutcome::Event(event) => event,
        WebhookOutcome::Ignored(reason) => {
            tracing::info!(provider = %gateway.provider(), reason = %reason, "Webhook ignored");
            return Ok(Json(json!({
                "received": true,
                "applied": false,
                "ignored": reason,
            })));
        }
    };

    let outcome = reconcile(&state, &event);
    let ack = WebhookAck {
        received: true,
        applied: outcome.applied(),
        outcome: &outcome,
    };
    Ok(Json(serde_json::to_value(ack).map_err(|e| {
        ApiError::Config(format!("webhook acknowledgement: {e}"))
    })?))
}

fn reconcile(state: &AppState, event: &PaymentEvent) -> ReconcileOutcome {
    tracing::info!(
        provider = %event.provider,
        external_payment_id = event.external_payment_id.as_deref().unwrap_or("-"),
        status = %event.status,
        test = event.test,
        "Reconciling payment event"
    );
    state.reconciler.reconcile(event)
}

// ============================================================================
// Manual Confirmation
// ============================================================================

/// Look a payment up at the provider and reconcile it
pub async fn confirm_payment(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    payload: Result<Json<ConfirmBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let gateway = gateway(&state, &provider)?;
    let body = json_body(payload)?;
    let payment_id = body.payment_id.trim();
    if payment_id.is_empty() {
        return Err(ApiError::Validation("paymentId is required".into()));
    }

    let event = gateway.fetch_event(payment_id).await?;
    let outcome = reconcile(&state, &event);
    let response = ConfirmResponse {
        payment_id: payment_id.to_string(),
        status: event.status.as_str(),
        applied: outcome.applied(),
        outcome: &outcome,
    };
    Ok(Json(serde_json::to_value(response).map_err(|e| {
        ApiError::Config(format!("confirmation response: {e}"))
    })?))
}
