//! Canonical Payment Events
//!
//! Provider-agnostic view of a payment notification. Adapters translate
//! their own payloads into [`PaymentEvent`]; the reconciler never sees a
//! provider's raw reference string.

use recap_core::IdempotencyKey;
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};

use crate::error::PaymentError;

/// Supported payment providers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    MercadoPago,
    Asaas,
    AvocadoPay,
    Stripe,
}

impl Provider {
    pub const ALL: [Provider; 4] = [
        Provider::MercadoPago,
        Provider::Asaas,
        Provider::AvocadoPay,
        Provider::Stripe,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::MercadoPago => "mercadopago",
            Provider::Asaas => "asaas",
            Provider::AvocadoPay => "avocadopay",
            Provider::Stripe => "stripe",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Provider {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mercadopago" | "mercado-pago" => Ok(Provider::MercadoPago),
            "asaas" => Ok(Provider::Asaas),
            "avocadopay" | "abacatepay" => Ok(Provider::AvocadoPay),
            "stripe" => Ok(Provider::Stripe),
            other => Err(PaymentError::NotConfigured(other.to_string())),
        }
    }
}

/// Normalized payment status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Approved,
    Pending,
    Rejected,
    Unknown,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Approved => "approved",
            EventStatus::Pending => "pending",
            EventStatus::Rejected => "rejected",
            EventStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a checkout paid for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentKind {
    Credits,
    Retrospective,
    #[serde(other)]
    Other,
}

/// Where the metadata bag came from
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MetadataOrigin {
    /// Structured metadata written by our own checkout
    Parsed,

    /// Unparseable reference string taken as both user and job id
    LegacyReference,

    /// Provider sent no reference at all
    #[default]
    Missing,
}

/// Correlation payload carried through the provider's reference field
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMetadata {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<PaymentKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(
        default,
        deserialize_with = "lenient_count",
        skip_serializing_if = "Option::is_none"
    )]
    pub credits: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrospective_id: Option<String>,

    #[serde(skip)]
    pub origin: MetadataOrigin,
}

/// Accept `5`, `"5"`, `5.0`; anything else is treated as absent.
fn lenient_count<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(parse_count))
}

fn parse_count(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 1.0 && f.fract() == 0.0)
                .map(|f| f as u64)
        }),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl PaymentMetadata {
    pub fn credits(user_id: impl Into<String>, credits: u64) -> Self {
        Self {
            kind: Some(PaymentKind::Credits),
            user_id: Some(user_id.into()),
            credits: Some(credits),
            retrospective_id: None,
            origin: MetadataOrigin::Parsed,
        }
    }

    pub fn retrospective(user_id: impl Into<String>, retrospective_id: impl Into<String>) -> Self {
        Self {
            kind: Some(PaymentKind::Retrospective),
            user_id: Some(user_id.into()),
            credits: None,
            retrospective_id: Some(retrospective_id.into()),
            origin: MetadataOrigin::Parsed,
        }
    }

    /// Serialize for a provider's free-text reference field
    pub fn to_reference(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".into())
    }

    /// Recover metadata from a provider reference string.
    ///
    /// A string that is not a JSON object is kept as a legacy reference:
    /// the raw value becomes both `userId` and `retrospectiveId`.
    pub fn from_reference(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
            return Self::default();
        };

        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(value @ serde_json::Value::Object(_)) => Self::from_value(&value),
            _ => {
                tracing::warn!(
                    reference_len = raw.len(),
                    "Reference is not JSON metadata, falling back to legacy interpretation"
                );
                Self {
                    kind: None,
                    user_id: Some(raw.to_string()),
                    credits: None,
                    retrospective_id: Some(raw.to_string()),
                    origin: MetadataOrigin::LegacyReference,
                }
            }
        }
    }

    /// Recover metadata from a JSON object (providers with a metadata map)
    pub fn from_value(value: &serde_json::Value) -> Self {
        match serde_json::from_value::<Self>(value.clone()) {
            Ok(mut meta) if value.is_object() => {
                meta.origin = MetadataOrigin::Parsed;
                meta
            }
            _ => Self::default(),
        }
    }

    /// Payment kind, inferring `retrospective` for legacy references
    pub fn resolved_kind(&self) -> Option<PaymentKind> {
        match (self.kind, self.origin) {
            (Some(kind), _) => Some(kind),
            (None, MetadataOrigin::LegacyReference) => Some(PaymentKind::Retrospective),
            (None, _) => None,
        }
    }

    /// Stable digest used when a provider omits its payment id
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.to_reference().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Canonical payment notification
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentEvent {
    pub provider: Provider,
    pub external_payment_id: Option<String>,
    pub status: EventStatus,

    /// Provider's own status string, for logs
    pub raw_status: String,

    pub metadata: PaymentMetadata,

    /// Provider test notification
    pub test: bool,
}

impl PaymentEvent {
    /// `provider:externalPaymentId`, or a metadata digest when the id is absent
    pub fn idempotency_key(&self) -> IdempotencyKey {
        match self.external_payment_id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => IdempotencyKey::new(format!("{}:{id}", self.provider)),
            None => IdempotencyKey::new(format!(
                "{}:meta:{}",
                self.provider,
                self.metadata.content_hash()
            )),
        }
    }
}

/// Read a JSON value that providers send either as a string or a number
pub(crate) fn id_string(value: Option<&serde_json::Value>) -> Option<String> {
    match value? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
