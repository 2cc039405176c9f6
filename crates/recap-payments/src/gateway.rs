//! Payment Gateway Interface
//!
//! One implementation per provider, selected by route. Each adapter owns
//! its signature scheme and its status vocabulary.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::error::{PaymentError, Result};
use crate::event::{PaymentEvent, PaymentMetadata, Provider};

/// Request to create a provider checkout
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    /// Amount in the currency's major unit (BRL reais)
    pub amount: Decimal,

    pub description: String,

    pub success_url: String,
    pub failure_url: String,

    #[serde(default)]
    pub pending_url: Option<String>,

    /// Webhook URL, for providers that take one per checkout
    #[serde(default)]
    pub notification_url: Option<String>,

    pub metadata: PaymentMetadata,

    #[serde(default)]
    pub payer_email: Option<String>,
}

impl CheckoutRequest {
    /// Reject non-positive amounts and non-absolute URLs before any
    /// provider call is made.
    pub fn validate(&self) -> Result<()> {
        if self.amount <= Decimal::ZERO {
            return Err(PaymentError::Validation(format!(
                "amount must be positive, got {}",
                self.amount
            )));
        }

        check_url("success_url", &self.success_url)?;
        check_url("failure_url", &self.failure_url)?;
        if let Some(url) = &self.pending_url {
            check_url("pending_url", url)?;
        }
        if let Some(url) = &self.notification_url {
            check_url("notification_url", url)?;
        }
        Ok(())
    }

    /// Pending URL, defaulting to the success URL
    pub fn pending_or_success(&self) -> &str {
        self.pending_url.as_deref().unwrap_or(&self.success_url)
    }

    /// Amount as a JSON number for providers that want decimals
    pub(crate) fn amount_json(&self) -> serde_json::Value {
        self.amount
            .round_dp(2)
            .to_f64()
            .and_then(serde_json::Number::from_f64)
            .map_or(serde_json::Value::Null, serde_json::Value::Number)
    }

    /// Amount in minor units (cents)
    pub(crate) fn amount_cents(&self) -> Result<i64> {
        (self.amount * Decimal::ONE_HUNDRED)
            .round()
            .to_i64()
            .ok_or_else(|| PaymentError::Validation(format!("amount out of range: {}", self.amount)))
    }
}

fn check_url(field: &str, value: &str) -> Result<()> {
    match reqwest::Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => Ok(()),
        _ => Err(PaymentError::Validation(format!(
            "{field} must be an absolute http(s) URL, got {value:?}"
        ))),
    }
}

/// Created checkout
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkout {
    pub provider: Provider,
    pub checkout_url: String,

    /// Provider-side id (preference, charge or session)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

/// Result of parsing an inbound webhook
#[derive(Clone, Debug)]
pub enum WebhookOutcome {
    /// A payment notification to reconcile
    Event(PaymentEvent),

    /// Valid delivery that carries nothing to act on
    Ignored(String),
}

/// Strategy trait for payment providers
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn provider(&self) -> Provider;

    /// Create a hosted checkout with `metadata` embedded in the provider's
    /// reference field
    async fn create_checkout(&self, request: &CheckoutRequest) -> Result<Checkout>;

    /// Verify and normalize a webhook delivery
    async fn parse_webhook(&self, body: &[u8], headers: &HeaderMap) -> Result<WebhookOutcome>;

    /// Look a payment up by id (manual confirmation)
    async fn fetch_event(&self, payment_id: &str) -> Result<PaymentEvent> {
        let _ = payment_id;
        Err(PaymentError::Unsupported {
            provider: self.provider(),
            operation: "payment lookup",
        })
    }
}

/// Configured gateways, keyed by provider
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: BTreeMap<Provider, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, gateway: Arc<dyn PaymentGateway>) {
        tracing::info!(provider = %gateway.provider(), "Payment gateway registered");
        self.gateways.insert(gateway.provider(), gateway);
    }

    pub fn with(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.register(gateway);
        self
    }

    pub fn get(&self, provider: Provider) -> Result<Arc<dyn PaymentGateway>> {
        self.gateways
            .get(&provider)
            .cloned()
            .ok_or_else(|| PaymentError::NotConfigured(provider.to_string()))
    }

    /// Configured providers, in stable order
    pub fn providers(&self) -> Vec<Provider> {
        self.gateways.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.gateways.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request() -> CheckoutRequest {
        CheckoutRequest {
            amount: dec!(7.00),
            description: "5 créditos".into(),
            success_url: "https://recap.example/payment-success".into(),
            failure_url: "https://recap.example/payment-failure".into(),
            pending_url: None,
            notification_url: None,
            metadata: PaymentMetadata::credits("U", 5),
            payer_email: None,
        }
    }

    #[test]
    fn test_valid_request() {
        assert!(request().validate().is_ok());
        assert_eq!(request().amount_cents().unwrap(), 700);
        assert_eq!(request().amount_json(), serde_json::json!(7.0));
    }

    #[test]
    fn test_rejects_non_positive_amount() {
        let mut req = request();
        req.amount = dec!(0);
        assert!(matches!(req.validate(), Err(PaymentError::Validation(_))));

        req.amount = dec!(-1.5);
        assert!(matches!(req.validate(), Err(PaymentError::Validation(_))));
    }

    #[test]
    fn test_rejects_relative_urls() {
        let mut req = request();
        req.success_url = "/payment-success".into();
        assert!(matches!(req.validate(), Err(PaymentError::Validation(_))));

        let mut req = request();
        req.failure_url = "ftp://recap.example/x".into();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_pending_defaults_to_success() {
        assert_eq!(
            request().pending_or_success(),
            "https://recap.example/payment-success"
        );
    }

    #[test]
    fn test_registry_lookup() {
        let registry = GatewayRegistry::new();
        assert!(matches!(
            registry.get(Provider::Asaas),
            Err(PaymentError::NotConfigured(_))
        ));
        assert!(registry.is_empty());
    }
}
