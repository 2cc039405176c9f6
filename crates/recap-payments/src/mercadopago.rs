//! Mercado Pago Gateway
//!
//! Checkout Pro preferences and payment notifications. Notifications are
//! thin pointers (`{type, data: {id}}`); the payment itself is fetched
//! from `/v1/payments/{id}`.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::{PaymentError, Result};
use crate::event::{EventStatus, PaymentEvent, PaymentMetadata, Provider, id_string};
use crate::gateway::{Checkout, CheckoutRequest, PaymentGateway, WebhookOutcome};
use crate::signature::{first_header, hmac_sha256_hex, redact, tokens_match, verify_hmac_hex};

const DEFAULT_API_BASE: &str = "https://api.mercadopago.com";
const TEST_PAYMENT_ID: &str = "123456";

/// Mercado Pago configuration
#[derive(Clone, Debug)]
pub struct MercadoPagoConfig {
    pub access_token: String,
    pub webhook_secret: Option<String>,

    /// Use `sandbox_init_point` checkout links
    pub sandbox: bool,

    pub api_base: String,
    pub statement_descriptor: String,
}

impl MercadoPagoConfig {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            webhook_secret: None,
            sandbox: false,
            api_base: DEFAULT_API_BASE.into(),
            statement_descriptor: "CHATRECAP".into(),
        }
    }

    /// `MERCADOPAGO_ACCESS_TOKEN` is required; `MERCADOPAGO_WEBHOOK_SECRET`,
    /// `MERCADOPAGO_SANDBOX` and `MERCADOPAGO_API_BASE` are optional.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let token = lookup("MERCADOPAGO_ACCESS_TOKEN")
            .filter(|t| !t.is_empty())
            .ok_or_else(|| PaymentError::Config("MERCADOPAGO_ACCESS_TOKEN not set".into()))?;

        let mut config = Self::new(token);
        config.webhook_secret = lookup("MERCADOPAGO_WEBHOOK_SECRET").filter(|s| !s.is_empty());
        config.sandbox = lookup("MERCADOPAGO_SANDBOX").is_some_and(|v| v == "true");
        if let Some(base) = lookup("MERCADOPAGO_API_BASE") {
            config.api_base = base.trim_end_matches('/').to_string();
        }

        if config.sandbox && !config.access_token.starts_with("TEST-") {
            tracing::warn!("Mercado Pago sandbox mode with a non-TEST access token");
        }
        Ok(config)
    }
}

/// Mercado Pago gateway
pub struct MercadoPagoGateway {
    http: reqwest::Client,
    config: MercadoPagoConfig,
}

impl MercadoPagoGateway {
    pub fn new(config: MercadoPagoConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    pub fn with_client(config: MercadoPagoConfig, http: reqwest::Client) -> Self {
        Self { http, config }
    }

    fn preference_body(&self, request: &CheckoutRequest, auto_return: bool) -> Value {
        let mut body = json!({
            "items": [{
                "title": request.description,
                "quantity": 1,
                "unit_price": request.amount_json(),
                "currency_id": "BRL",
            }],
            "back_urls": {
                "success": request.success_url,
                "failure": request.failure_url,
                "pending": request.pending_or_success(),
            },
            "external_reference": request.metadata.to_reference(),
            "statement_descriptor": self.config.statement_descriptor,
        });

        if auto_return {
            body["auto_return"] = json!("approved");
        }
        if let Some(url) = &request.notification_url {
            body["notification_url"] = json!(url);
        }
        if let Some(email) = &request.payer_email {
            body["payer"] = json!({ "email": email });
        }
        body
    }

    async fn post_preference(&self, body: &Value) -> Result<(reqwest::StatusCode, Value)> {
        let response = self
            .http
            .post(format!("{}/checkout/preferences", self.config.api_base))
            .bearer_auth(&self.config.access_token)
            .json(body)
            .send()
            .await
            .map_err(|e| PaymentError::upstream(Provider::MercadoPago, e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| PaymentError::upstream(Provider::MercadoPago, e.to_string()))?;
        let data = serde_json::from_str(&text).map_err(|_| {
            PaymentError::upstream(Provider::MercadoPago, format!("invalid response ({status})"))
        })?;
        Ok((status, data))
    }

    /// Fetch a payment and normalize it
    async fn fetch_payment(&self, payment_id: &str, test: bool) -> Result<PaymentEvent> {
        let response = self
            .http
            .get(format!("{}/v1/payments/{payment_id}", self.config.api_base))
            .bearer_auth(&self.config.access_token)
            .send()
            .await
            .map_err(|e| PaymentError::upstream(Provider::MercadoPago, e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(PaymentError::upstream(
                Provider::MercadoPago,
                format!("payment lookup returned {status}: {}", excerpt(&text)),
            ));
        }

        let payment: PaymentResource = response
            .json()
            .await
            .map_err(|e| PaymentError::upstream(Provider::MercadoPago, e.to_string()))?;

        let raw_status = payment.status.unwrap_or_default();
        tracing::info!(
            payment_id = %payment_id,
            status = %raw_status,
            status_detail = ?payment.status_detail,
            "Mercado Pago payment fetched"
        );

        Ok(PaymentEvent {
            provider: Provider::MercadoPago,
            external_payment_id: id_string(payment.id.as_ref()).or_else(|| Some(payment_id.into())),
            status: normalize_status(&raw_status),
            raw_status,
            metadata: PaymentMetadata::from_reference(payment.external_reference.as_deref()),
            test: test || payment.live_mode == Some(false),
        })
    }

    fn verify(&self, notification: &Notification, body: &[u8], headers: &HeaderMap) -> Result<()> {
        let Some(secret) = &self.config.webhook_secret else {
            tracing::warn!("MERCADOPAGO_WEBHOOK_SECRET not configured, skipping signature verification");
            return Ok(());
        };

        let signature = first_header(headers, &["x-signature"])
            .ok_or_else(|| PaymentError::Signature("missing x-signature header".into()))?;

        let valid = if let Some(hex) = signature.strip_prefix("sha256=") {
            verify_hmac_hex(secret, body, hex)
        } else {
            let request_id = first_header(headers, &["x-request-id"]);
            let data_id = notification.data_id();
            verify_manifest(secret, signature, data_id.as_deref(), request_id)
        };

        if valid {
            tracing::debug!("Mercado Pago signature verified");
            Ok(())
        } else {
            tracing::error!(signature = %redact(signature), "Invalid Mercado Pago signature");
            Err(PaymentError::Signature("signature mismatch".into()))
        }
    }
}

/// `ts=…,v1=…` form: HMAC over `id:{data.id};request-id:{x-request-id};ts:{ts};`
fn verify_manifest(
    secret: &str,
    signature: &str,
    data_id: Option<&str>,
    request_id: Option<&str>,
) -> bool {
    let mut ts = None;
    let mut v1 = None;
    for part in signature.split(',') {
        match part.trim().split_once('=') {
            Some(("ts", value)) => ts = Some(value.trim()),
            Some(("v1", value)) => v1 = Some(value.trim()),
            _ => {}
        }
    }
    let (Some(ts), Some(v1)) = (ts, v1) else {
        return false;
    };

    let manifest = manifest(data_id, request_id, ts);
    tokens_match(&hmac_sha256_hex(secret, manifest.as_bytes()), &v1.to_ascii_lowercase())
}

fn manifest(data_id: Option<&str>, request_id: Option<&str>, ts: &str) -> String {
    let mut manifest = String::new();
    if let Some(id) = data_id {
        // Alphanumeric ids are signed lowercased
        manifest.push_str(&format!("id:{};", id.to_ascii_lowercase()));
    }
    if let Some(request_id) = request_id {
        manifest.push_str(&format!("request-id:{request_id};"));
    }
    manifest.push_str(&format!("ts:{ts};"));
    manifest
}

/// Map Mercado Pago payment statuses
fn normalize_status(status: &str) -> EventStatus {
    match status {
        "approved" | "authorized" => EventStatus::Approved,
        "pending" => EventStatus::Pending,
        "rejected" | "cancelled" | "refunded" | "charged_back" => EventStatus::Rejected,
        _ => EventStatus::Unknown,
    }
}

fn excerpt(text: &str) -> String {
    text.chars().take(200).collect()
}

#[derive(Debug, Deserialize)]
struct Notification {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    live_mode: Option<bool>,
    #[serde(default)]
    data: Option<NotificationData>,
}

#[derive(Debug, Deserialize)]
struct NotificationData {
    #[serde(default)]
    id: Option<Value>,
}

impl Notification {
    fn data_id(&self) -> Option<String> {
        id_string(self.data.as_ref().and_then(|d| d.id.as_ref()))
    }

    /// Dashboard test deliveries carry sentinel ids or `live_mode: false`
    fn is_test(&self) -> bool {
        self.data_id().as_deref() == Some(TEST_PAYMENT_ID)
            || id_string(self.id.as_ref()).as_deref() == Some(TEST_PAYMENT_ID)
            || self.live_mode == Some(false)
    }
}

#[derive(Debug, Deserialize)]
struct PaymentResource {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    status_detail: Option<String>,
    #[serde(default)]
    external_reference: Option<String>,
    #[serde(default)]
    live_mode: Option<bool>,
}

#[async_trait]
impl PaymentGateway for MercadoPagoGateway {
    fn provider(&self) -> Provider {
        Provider::MercadoPago
    }

    async fn create_checkout(&self, request: &CheckoutRequest) -> Result<Checkout> {
        request.validate()?;

        let (mut status, mut data) = self.post_preference(&self.preference_body(request, true)).await?;

        // Some accounts refuse auto_return; retry once without it
        if status == reqwest::StatusCode::BAD_REQUEST && error_message(&data).contains("auto_return")
        {
            tracing::info!("Mercado Pago rejected auto_return, retrying without it");
            (status, data) = self
                .post_preference(&self.preference_body(request, false))
                .await?;
        }

        if !status.is_success() {
            let message = error_message(&data);
            return Err(match status.as_u16() {
                401 => PaymentError::Config(format!("Mercado Pago rejected the access token: {message}")),
                _ => PaymentError::upstream(Provider::MercadoPago, format!("{status}: {message}")),
            });
        }

        let field = if self.config.sandbox {
            "sandbox_init_point"
        } else {
            "init_point"
        };
        let checkout_url = data[field]
            .as_str()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| PaymentError::upstream(Provider::MercadoPago, "no checkout URL returned"))?
            .to_string();

        tracing::info!(preference_id = ?data["id"].as_str(), sandbox = self.config.sandbox, "Mercado Pago preference created");

        Ok(Checkout {
            provider: Provider::MercadoPago,
            checkout_url,
            external_id: id_string(data.get("id")),
        })
    }

    async fn parse_webhook(&self, body: &[u8], headers: &HeaderMap) -> Result<WebhookOutcome> {
        let notification: Notification = serde_json::from_slice(body)
            .map_err(|e| PaymentError::Malformed(e.to_string()))?;

        let test = notification.is_test();
        if test {
            tracing::info!("Mercado Pago test notification, skipping signature verification");
        } else {
            self.verify(&notification, body, headers)?;
        }

        let kind = notification.kind.as_deref().unwrap_or_default();
        if kind != "payment" {
            return Ok(WebhookOutcome::Ignored(format!("notification type {kind:?} not handled")));
        }

        let Some(payment_id) = notification.data_id() else {
            return Ok(WebhookOutcome::Ignored("payment id missing".into()));
        };

        match self.fetch_payment(&payment_id, test).await {
            Ok(event) => Ok(WebhookOutcome::Event(event)),
            Err(e) if test => {
                tracing::info!(payment_id = %payment_id, error = %e, "Test notification for unknown payment");
                Ok(WebhookOutcome::Ignored("test notification".into()))
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch_event(&self, payment_id: &str) -> Result<PaymentEvent> {
        self.fetch_payment(payment_id, false).await
    }
}

fn error_message(data: &Value) -> String {
    data["message"]
        .as_str()
        .or_else(|| data["cause"][0]["description"].as_str())
        .or_else(|| data["error"].as_str())
        .unwrap_or("unknown error")
        .to_string()
}
