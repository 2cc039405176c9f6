//! Asaas Gateway
//!
//! Charges (`POST /v3/payments`) with the metadata bag in
//! `externalReference`, and webhook deliveries authenticated by a shared
//! access token.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::header::HeaderMap;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::{PaymentError, Result};
use crate::event::{EventStatus, PaymentEvent, PaymentMetadata, Provider};
use crate::gateway::{Checkout, CheckoutRequest, PaymentGateway, WebhookOutcome};
use crate::signature::{first_header, redact, tokens_match};

const TOKEN_HEADERS: [&str; 3] = ["asaas-access-token", "x-asaas-signature", "access-token"];

/// Asaas configuration
#[derive(Clone, Debug)]
pub struct AsaasConfig {
    pub api_key: String,
    pub webhook_token: Option<String>,
    pub sandbox: bool,

    /// `PIX`, `BOLETO`, `CREDIT_CARD` or `UNDEFINED`
    pub billing_type: String,

    /// Override of the API base (tests)
    pub api_base: Option<String>,
}

impl AsaasConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            webhook_token: None,
            sandbox: false,
            billing_type: "PIX".into(),
            api_base: None,
        }
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let key = lookup("ASAAS_API_KEY")
            .filter(|k| !k.is_empty())
            .ok_or_else(|| PaymentError::Config("ASAAS_API_KEY not set".into()))?;

        let mut config = Self::new(key);
        config.webhook_token = lookup("ASAAS_WEBHOOK_TOKEN").filter(|t| !t.is_empty());
        config.sandbox = lookup("ASAAS_SANDBOX").is_some_and(|v| v == "true");
        if let Some(billing) = lookup("ASAAS_BILLING_TYPE") {
            config.billing_type = billing.to_ascii_uppercase();
        }
        config.api_base = lookup("ASAAS_API_BASE").map(|b| b.trim_end_matches('/').to_string());
        Ok(config)
    }

    fn api_base(&self) -> &str {
        match (&self.api_base, self.sandbox) {
            (Some(base), _) => base,
            (None, true) => "https://api-sandbox.asaas.com/v3",
            (None, false) => "https://api.asaas.com/v3",
        }
    }

    fn web_base(&self) -> &str {
        if self.sandbox {
            "https://sandbox.asaas.com"
        } else {
            "https://www.asaas.com"
        }
    }
}

/// Asaas gateway
pub struct AsaasGateway {
    http: reqwest::Client,
    config: AsaasConfig,
}

impl AsaasGateway {
    pub fn new(config: AsaasConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    fn charge_body(&self, request: &CheckoutRequest) -> Value {
        let due_date = (Utc::now() + Duration::days(3)).format("%Y-%m-%d").to_string();
        json!({
            "customer": request.payer_email.clone().unwrap_or_default(),
            "billingType": self.config.billing_type,
            "value": request.amount_json(),
            "dueDate": due_date,
            "description": request.description,
            "externalReference": request.metadata.to_reference(),
            "callback": {
                "successUrl": request.success_url,
                "autoRedirect": true,
            },
        })
    }

    fn verify(&self, headers: &HeaderMap) -> Result<()> {
        let Some(expected) = &self.config.webhook_token else {
            tracing::warn!("ASAAS_WEBHOOK_TOKEN not configured, skipping token verification");
            return Ok(());
        };

        let received = first_header(headers, &TOKEN_HEADERS)
            .ok_or_else(|| PaymentError::Signature("missing access token header".into()))?;

        if tokens_match(expected, received) {
            Ok(())
        } else {
            tracing::error!(token = %redact(received), "Invalid Asaas webhook token");
            Err(PaymentError::Signature("token mismatch".into()))
        }
    }
}

/// Event names and payment statuses that settle or void a charge
fn normalize(event: Option<&str>, status: Option<&str>) -> EventStatus {
    let approved_event = matches!(event, Some("PAYMENT_CONFIRMED" | "PAYMENT_RECEIVED"));
    let approved_status = matches!(status, Some("CONFIRMED" | "RECEIVED" | "RECEIVED_IN_CASH"));
    if approved_event || approved_status {
        return EventStatus::Approved;
    }

    let rejected_event = matches!(
        event,
        Some(
            "PAYMENT_OVERDUE"
                | "PAYMENT_DELETED"
                | "PAYMENT_REFUNDED"
                | "PAYMENT_REPROVED_BY_RISK_ANALYSIS"
                | "PAYMENT_CHARGEBACK_REQUESTED"
        )
    );
    let rejected_status = matches!(
        status,
        Some("OVERDUE" | "REFUNDED" | "REFUND_REQUESTED" | "CHARGEBACK_REQUESTED" | "DELETED")
    );
    if rejected_event || rejected_status {
        return EventStatus::Rejected;
    }

    // PENDING is a plain unpaid charge, not a settling transfer
    EventStatus::Unknown
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Charge {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    external_reference: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebhookPayload {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    payment: Option<Charge>,
    #[serde(default)]
    payment_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    external_reference: Option<String>,
}

impl WebhookPayload {
    fn into_event(self) -> PaymentEvent {
        let charge = self.payment.unwrap_or_default();
        let status = charge.status.or(self.status);
        let raw_status = self
            .event
            .clone()
            .or_else(|| status.clone())
            .unwrap_or_default();

        PaymentEvent {
            provider: Provider::Asaas,
            external_payment_id: charge.id.or(self.payment_id),
            status: normalize(self.event.as_deref(), status.as_deref()),
            raw_status,
            metadata: PaymentMetadata::from_reference(
                charge
                    .external_reference
                    .as_deref()
                    .or(self.external_reference.as_deref()),
            ),
            test: false,
        }
    }
}

#[async_trait]
impl PaymentGateway for AsaasGateway {
    fn provider(&self) -> Provider {
        Provider::Asaas
    }

    async fn create_checkout(&self, request: &CheckoutRequest) -> Result<Checkout> {
        request.validate()?;

        let response = self
            .http
            .post(format!("{}/payments", self.config.api_base()))
            .header("access_token", &self.config.api_key)
            .json(&self.charge_body(request))
            .send()
            .await
            .map_err(|e| PaymentError::upstream(Provider::Asaas, e.to_string()))?;

        let status = response.status();
        let data: Value = response.json().await.map_err(|_| {
            PaymentError::upstream(Provider::Asaas, format!("invalid response ({status})"))
        })?;

        if !status.is_success() {
            let message = data["errors"][0]["description"]
                .as_str()
                .unwrap_or("unknown error");
            return Err(PaymentError::upstream(
                Provider::Asaas,
                format!("{status}: {message}"),
            ));
        }

        let id = data["id"].as_str().map(str::to_string);
        let checkout_url = data["invoiceUrl"]
            .as_str()
            .or_else(|| data["bankSlipUrl"].as_str())
            .map(str::to_string)
            .or_else(|| id.as_ref().map(|id| format!("{}/c/{id}", self.config.web_base())))
            .ok_or_else(|| PaymentError::upstream(Provider::Asaas, "no payment URL returned"))?;

        tracing::info!(charge_id = ?id, billing_type = %self.config.billing_type, "Asaas charge created");

        Ok(Checkout {
            provider: Provider::Asaas,
            checkout_url,
            external_id: id,
        })
    }

    async fn parse_webhook(&self, body: &[u8], headers: &HeaderMap) -> Result<WebhookOutcome> {
        self.verify(headers)?;

        let payload: WebhookPayload = serde_json::from_slice(body)
            .map_err(|e| PaymentError::Malformed(e.to_string()))?;

        tracing::info!(event = ?payload.event, "Asaas webhook parsed");
        Ok(WebhookOutcome::Event(payload.into_event()))
    }

    async fn fetch_event(&self, payment_id: &str) -> Result<PaymentEvent> {
        let response = self
            .http
            .get(format!("{}/payments/{payment_id}", self.config.api_base()))
            .header("access_token", &self.config.api_key)
            .send()
            .await
            .map_err(|e| PaymentError::upstream(Provider::Asaas, e.to_string()))?;

        if !response.status().is_success() {
            return Err(PaymentError::upstream(
                Provider::Asaas,
                format!("payment lookup returned {}", response.status()),
            ));
        }

        let charge: Charge = response
            .json()
            .await
            .map_err(|e| PaymentError::upstream(Provider::Asaas, e.to_string()))?;

        Ok(PaymentEvent {
            provider: Provider::Asaas,
            external_payment_id: charge.id.or_else(|| Some(payment_id.into())),
            status: normalize(None, charge.status.as_deref()),
            raw_status: charge.status.unwrap_or_default(),
            metadata: PaymentMetadata::from_reference(charge.external_reference.as_deref()),
            test: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::PaymentKind;
    use reqwest::header::HeaderValue;

    fn gateway(token: Option<&str>) -> AsaasGateway {
        let mut config = AsaasConfig::new("key");
        config.webhook_token = token.map(Into::into);
        AsaasGateway::new(config)
    }

    fn headers(token: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("asaas-access-token", HeaderValue::from_static(token));
        headers
    }

    const CONFIRMED: &[u8] = br#"{
        "event": "PAYMENT_CONFIRMED",
        "payment": {
            "id": "pay_1",
            "status": "CONFIRMED",
            "externalReference": "{\"type\":\"credits\",\"userId\":\"U\",\"credits\":5}"
        }
    }"#;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Some("PAYMENT_RECEIVED"), None), EventStatus::Approved);
        assert_eq!(normalize(Some("PAYMENT_UPDATED"), Some("RECEIVED")), EventStatus::Approved);
        assert_eq!(normalize(Some("PAYMENT_OVERDUE"), Some("OVERDUE")), EventStatus::Rejected);
        assert_eq!(normalize(Some("PAYMENT_CREATED"), Some("PENDING")), EventStatus::Unknown);
    }

    #[tokio::test]
    async fn test_confirmed_payment() {
        let outcome = gateway(Some("tok")).parse_webhook(CONFIRMED, &headers("tok")).await.unwrap();
        let WebhookOutcome::Event(event) = outcome else {
            panic!("expected event");
        };

        assert_eq!(event.status, EventStatus::Approved);
        assert_eq!(event.external_payment_id.as_deref(), Some("pay_1"));
        assert_eq!(event.metadata.kind, Some(PaymentKind::Credits));
        assert_eq!(event.metadata.credits, Some(5));
    }

    #[tokio::test]
    async fn test_wrong_token() {
        let err = gateway(Some("tok"))
            .parse_webhook(CONFIRMED, &headers("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Signature(_)));

        let err = gateway(Some("tok"))
            .parse_webhook(CONFIRMED, &HeaderMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Signature(_)));
    }

    #[tokio::test]
    async fn test_unconfigured_token_skips_check() {
        let outcome = gateway(None).parse_webhook(CONFIRMED, &HeaderMap::new()).await;
        assert!(outcome.is_ok());
    }

    #[tokio::test]
    async fn test_top_level_fields() {
        let body = br#"{"event":"PAYMENT_RECEIVED","paymentId":"pay_9","externalReference":"job_7"}"#;
        let WebhookOutcome::Event(event) = gateway(None).parse_webhook(body, &HeaderMap::new()).await.unwrap() else {
            panic!("expected event");
        };
        assert_eq!(event.external_payment_id.as_deref(), Some("pay_9"));
        assert_eq!(event.metadata.retrospective_id.as_deref(), Some("job_7"));
    }

    #[test]
    fn test_charge_body() {
        let request = CheckoutRequest {
            amount: rust_decimal_macros::dec!(7),
            description: "Retrospectiva".into(),
            success_url: "https://recap.example/ok".into(),
            failure_url: "https://recap.example/fail".into(),
            pending_url: None,
            notification_url: None,
            metadata: PaymentMetadata::retrospective("U", "job_1"),
            payer_email: None,
        };
        let body = gateway(None).charge_body(&request);
        assert_eq!(body["billingType"], "PIX");
        assert_eq!(body["value"], 7.0);
        assert!(body["externalReference"].as_str().unwrap().contains("job_1"));
        assert_eq!(body["dueDate"].as_str().unwrap().len(), 10);
    }
}
