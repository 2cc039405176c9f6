//! AvocadoPay Gateway
//!
//! Hosted checkouts carrying metadata as a JSON object; webhooks signed
//! with a hex HMAC-SHA256 of the raw body.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde_json::{Value, json};

use crate::error::{PaymentError, Result};
use crate::event::{EventStatus, PaymentEvent, PaymentMetadata, Provider, id_string};
use crate::gateway::{Checkout, CheckoutRequest, PaymentGateway, WebhookOutcome};
use crate::signature::{first_header, redact, verify_hmac_hex};

const DEFAULT_API_URL: &str = "https://api.abacatepay.com/v1/checkouts";

const SIGNATURE_HEADERS: [&str; 4] = [
    "x-avocadopay-signature",
    "x-signature",
    "signature",
    "x-webhook-signature",
];

/// AvocadoPay configuration
#[derive(Clone, Debug)]
pub struct AvocadoPayConfig {
    pub api_key: String,
    pub webhook_secret: Option<String>,
    pub api_url: String,
    pub currency: String,
}

impl AvocadoPayConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            webhook_secret: None,
            api_url: DEFAULT_API_URL.into(),
            currency: "BRL".into(),
        }
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let key = lookup("AVOCADOPAY_API_KEY")
            .filter(|k| !k.is_empty())
            .ok_or_else(|| PaymentError::Config("AVOCADOPAY_API_KEY not set".into()))?;

        let mut config = Self::new(key);
        config.webhook_secret = lookup("AVOCADOPAY_WEBHOOK_SECRET").filter(|s| !s.is_empty());
        if let Some(url) = lookup("AVOCADOPAY_API_URL") {
            config.api_url = url;
        }
        Ok(config)
    }
}

/// AvocadoPay gateway
pub struct AvocadoPayGateway {
    http: reqwest::Client,
    config: AvocadoPayConfig,
}

impl AvocadoPayGateway {
    pub fn new(config: AvocadoPayConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    fn verify(&self, body: &[u8], headers: &HeaderMap) -> Result<()> {
        let Some(secret) = &self.config.webhook_secret else {
            tracing::warn!("AVOCADOPAY_WEBHOOK_SECRET not configured, skipping signature verification");
            return Ok(());
        };

        let signature = first_header(headers, &SIGNATURE_HEADERS)
            .ok_or_else(|| PaymentError::Signature("missing signature header".into()))?;
        let signature = signature.strip_prefix("sha256=").unwrap_or(signature);

        if verify_hmac_hex(secret, body, signature) {
            Ok(())
        } else {
            tracing::error!(signature = %redact(signature), "Invalid AvocadoPay signature");
            Err(PaymentError::Signature("signature mismatch".into()))
        }
    }
}

fn normalize(event: &str) -> EventStatus {
    match event {
        "billing.paid" | "payment.paid" | "checkout.paid" | "paid" => EventStatus::Approved,
        "billing.failed" | "payment.failed" | "failed" | "billing.expired" | "expired"
        | "billing.refunded" | "refunded" | "cancelled" | "canceled" => EventStatus::Rejected,
        _ => EventStatus::Unknown,
    }
}

/// Normalize a webhook payload. Metadata and ids appear either at the top
/// level or under `data`.
fn event_from_payload(payload: &Value) -> PaymentEvent {
    let data = &payload["data"];

    let kind = payload["event"]
        .as_str()
        .or_else(|| payload["type"].as_str())
        .unwrap_or_default();
    let status = payload["status"]
        .as_str()
        .or_else(|| data["status"].as_str())
        .unwrap_or_default();

    // Explicit event names win over bare statuses
    let normalized = match normalize(kind) {
        EventStatus::Unknown => normalize(status),
        known => known,
    };

    let metadata = [&payload["metadata"], &data["metadata"]]
        .into_iter()
        .find(|m| m.is_object())
        .map(PaymentMetadata::from_value)
        .unwrap_or_default();

    PaymentEvent {
        provider: Provider::AvocadoPay,
        external_payment_id: id_string(payload.get("id")).or_else(|| id_string(data.get("id"))),
        status: normalized,
        raw_status: (if kind.is_empty() { status } else { kind }).to_string(),
        metadata,
        test: payload["devMode"].as_bool() == Some(true) || data["devMode"].as_bool() == Some(true),
    }
}

#[async_trait]
impl PaymentGateway for AvocadoPayGateway {
    fn provider(&self) -> Provider {
        Provider::AvocadoPay
    }

    async fn create_checkout(&self, request: &CheckoutRequest) -> Result<Checkout> {
        request.validate()?;

        let metadata = serde_json::to_value(&request.metadata)
            .map_err(|e| PaymentError::Validation(e.to_string()))?;

        let response = self
            .http
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&json!({
                "amount": request.amount_json(),
                "currency": self.config.currency,
                "description": request.description,
                "success_url": request.success_url,
                "cancel_url": request.failure_url,
                "metadata": metadata,
            }))
            .send()
            .await
            .map_err(|e| PaymentError::upstream(Provider::AvocadoPay, e.to_string()))?;

        let status = response.status();
        let data: Value = response.json().await.map_err(|_| {
            PaymentError::upstream(Provider::AvocadoPay, format!("invalid response ({status})"))
        })?;

        if !status.is_success() {
            let message = data["error"].as_str().unwrap_or("unknown error");
            return Err(PaymentError::upstream(
                Provider::AvocadoPay,
                format!("{status}: {message}"),
            ));
        }

        let checkout_url = data["checkout_url"]
            .as_str()
            .or_else(|| data["url"].as_str())
            .ok_or_else(|| PaymentError::upstream(Provider::AvocadoPay, "no checkout URL returned"))?
            .to_string();

        Ok(Checkout {
            provider: Provider::AvocadoPay,
            checkout_url,
            external_id: id_string(data.get("id")),
        })
    }

    async fn parse_webhook(&self, body: &[u8], headers: &HeaderMap) -> Result<WebhookOutcome> {
        let payload: Value =
            serde_json::from_slice(body).map_err(|e| PaymentError::Malformed(e.to_string()))?;
        if !payload.is_object() {
            return Err(PaymentError::Malformed("expected a JSON object".into()));
        }

        // The body carries the whole payment, so devMode never waives the signature
        self.verify(body, headers)?;
        let event = event_from_payload(&payload);

        tracing::info!(
            event = %event.raw_status,
            status = %event.status,
            dev_mode = event.test,
            "AvocadoPay webhook parsed"
        );
        Ok(WebhookOutcome::Event(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::PaymentKind;
    use crate::signature::hmac_sha256_hex;
    use reqwest::header::HeaderValue;

    fn gateway(secret: Option<&str>) -> AvocadoPayGateway {
        let mut config = AvocadoPayConfig::new("key");
        config.webhook_secret = secret.map(Into::into);
        AvocadoPayGateway::new(config)
    }

    fn signed(secret: &str, body: &[u8]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-avocadopay-signature",
            HeaderValue::from_str(&hmac_sha256_hex(secret, body)).unwrap(),
        );
        headers
    }

    const PAID: &[u8] =
        br#"{"event":"billing.paid","id":"bill_1","metadata":{"type":"credits","userId":"U","credits":5}}"#;

    #[tokio::test]
    async fn test_signed_payment() {
        let outcome = gateway(Some("whsec"))
            .parse_webhook(PAID, &signed("whsec", PAID))
            .await
            .unwrap();
        let WebhookOutcome::Event(event) = outcome else {
            panic!("expected event");
        };

        assert_eq!(event.status, EventStatus::Approved);
        assert_eq!(event.external_payment_id.as_deref(), Some("bill_1"));
        assert_eq!(event.metadata.kind, Some(PaymentKind::Credits));
        assert_eq!(event.metadata.user_id.as_deref(), Some("U"));
    }

    #[tokio::test]
    async fn test_tampered_body() {
        let headers = signed("whsec", PAID);
        let tampered = br#"{"event":"billing.paid","id":"bill_1","metadata":{"type":"credits","userId":"U","credits":500}}"#;

        let err = gateway(Some("whsec"))
            .parse_webhook(tampered, &headers)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Signature(_)));
    }

    #[tokio::test]
    async fn test_dev_mode_still_requires_signature() {
        let body = br#"{"event":"billing.paid","devMode":true,"id":"forged_1","metadata":{"type":"credits","userId":"mallory","credits":1000}}"#;
        let err = gateway(Some("whsec"))
            .parse_webhook(body, &HeaderMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Signature(_)));
    }

    #[tokio::test]
    async fn test_signed_dev_mode_event() {
        let body = br#"{"event":"billing.paid","devMode":true,"data":{"id":"bill_2","metadata":{"type":"retrospective","userId":"U","retrospectiveId":"job_1"}}}"#;
        let outcome = gateway(Some("whsec"))
            .parse_webhook(body, &signed("whsec", body))
            .await
            .unwrap();
        let WebhookOutcome::Event(event) = outcome else {
            panic!("expected event");
        };

        assert!(event.test);
        assert_eq!(event.external_payment_id.as_deref(), Some("bill_2"));
        assert_eq!(event.metadata.retrospective_id.as_deref(), Some("job_1"));
    }

    #[test]
    fn test_status_fallback() {
        let event = event_from_payload(&json!({"status": "paid", "id": 7}));
        assert_eq!(event.status, EventStatus::Approved);
        assert_eq!(event.external_payment_id.as_deref(), Some("7"));

        let event = event_from_payload(&json!({"event": "billing.created", "status": "pending"}));
        assert_eq!(event.status, EventStatus::Unknown);

        let event = event_from_payload(&json!({"event": "billing.expired"}));
        assert_eq!(event.status, EventStatus::Rejected);
    }

    #[tokio::test]
    async fn test_non_object_body() {
        let err = gateway(None).parse_webhook(b"[1,2]", &HeaderMap::new()).await.unwrap_err();
        assert!(matches!(err, PaymentError::Malformed(_)));
    }
}
