//! Server Configuration
//!
//! Read through a lookup function so tests never touch the process
//! environment; `main` passes `std::env::var`.

use std::sync::Arc;
use std::time::Duration;

use axum::http::Uri;
use recap_payments::{
    AsaasConfig, AsaasGateway, AvocadoPayConfig, AvocadoPayGateway, GatewayRegistry,
    MercadoPagoConfig, MercadoPagoGateway, PaymentGateway, Provider, ReconcilerConfig, StripeGateway,
};
use recap_pipeline::{PipelineConfig, SchemaPolicy};

use crate::error::ApiError;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_BASE_URL: &str = "http://localhost:3000";
const DEFAULT_CONTENT_DIR: &str = "./data/content";

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: String,

    /// Absolute base for redirect and notification URLs, no trailing slash
    pub public_base_url: String,

    /// Include error details in responses
    pub development: bool,

    pub content_dir: String,

    /// Model override for the configured LLM provider
    pub llm_model: Option<String>,

    pub pipeline: PipelineConfig,
    pub schema_policy: SchemaPolicy,
    pub reconciler: ReconcilerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.into(),
            public_base_url: DEFAULT_BASE_URL.into(),
            development: false,
            content_dir: DEFAULT_CONTENT_DIR.into(),
            llm_model: None,
            pipeline: PipelineConfig::default(),
            schema_policy: SchemaPolicy::default(),
            reconciler: ReconcilerConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ApiError> {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let public_base_url = get("PUBLIC_BASE_URL")
            .unwrap_or(defaults.public_base_url)
            .trim_end_matches('/')
            .to_string();
        check_base_url(&public_base_url)?;

        let pipeline = PipelineConfig {
            job_timeout: seconds(&get, "JOB_TIMEOUT_SECS", defaults.pipeline.job_timeout)?,
            download_timeout: seconds(
                &get,
                "DOWNLOAD_TIMEOUT_SECS",
                defaults.pipeline.download_timeout,
            )?,
            extraction_timeout: seconds(
                &get,
                "EXTRACTION_TIMEOUT_SECS",
                defaults.pipeline.extraction_timeout,
            )?,
            generation_timeout: seconds(
                &get,
                "GENERATION_TIMEOUT_SECS",
                defaults.pipeline.generation_timeout,
            )?,
        };

        let schema_policy = if flag(&get, "GENERATION_STRICT_SCHEMA")?.unwrap_or(false) {
            SchemaPolicy::Strict
        } else {
            SchemaPolicy::Lenient
        };

        let reconciler = ReconcilerConfig {
            legacy_reference_fallback: flag(&get, "LEGACY_REFERENCE_FALLBACK")?
                .unwrap_or(defaults.reconciler.legacy_reference_fallback),
        };

        Ok(Self {
            bind_addr: get("BIND_ADDR").unwrap_or(defaults.bind_addr),
            public_base_url,
            development: get("APP_ENV").is_some_and(|env| env.eq_ignore_ascii_case("development")),
            content_dir: get("CONTENT_DIR").unwrap_or(defaults.content_dir),
            llm_model: get("LLM_MODEL"),
            pipeline,
            schema_policy,
            reconciler,
        })
    }

    /// Absolute URL for a path on this server
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.public_base_url, path.trim_start_matches('/'))
    }
}

fn check_base_url(url: &str) -> Result<(), ApiError> {
    let uri: Uri = url
        .parse()
        .map_err(|e| ApiError::Config(format!("PUBLIC_BASE_URL {url:?}: {e}")))?;
    match (uri.scheme_str(), uri.host()) {
        (Some("http" | "https"), Some(_)) => Ok(()),
        _ => Err(ApiError::Config(format!(
            "PUBLIC_BASE_URL must be an absolute http(s) URL, got {url:?}"
        ))),
    }
}

fn seconds(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration, ApiError> {
    match get(key) {
        None => Ok(default),
        Some(raw) => match raw.trim().parse::<u64>() {
            Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
            _ => Err(ApiError::Config(format!(
                "{key} must be a positive number of seconds, got {raw:?}"
            ))),
        },
    }
}

fn flag(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<bool>, ApiError> {
    match get(key).map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        None => Ok(None),
        Some("true" | "1" | "yes") => Ok(Some(true)),
        Some("false" | "0" | "no") => Ok(Some(false)),
        Some(other) => Err(ApiError::Config(format!(
            "{key} must be true or false, got {other:?}"
        ))),
    }
}

/// Register every provider whose secrets are present
pub fn build_gateways(lookup: impl Fn(&str) -> Option<String>) -> GatewayRegistry {
    let mut registry = GatewayRegistry::new();

    for provider in Provider::ALL {
        let gateway = match provider {
            Provider::MercadoPago => {
                MercadoPagoConfig::from_lookup(&lookup).map(|c| shared(MercadoPagoGateway::new(c)))
            }
            Provider::Asaas => AsaasConfig::from_lookup(&lookup).map(|c| shared(AsaasGateway::new(c))),
            Provider::AvocadoPay => {
                AvocadoPayConfig::from_lookup(&lookup).map(|c| shared(AvocadoPayGateway::new(c)))
            }
            Provider::Stripe => StripeGateway::from_lookup(&lookup).map(shared),
        };

        match gateway {
            Ok(gateway) => registry.register(gateway),
            Err(e) => tracing::warn!(provider = %provider, reason = %e, "Payment provider disabled"),
        }
    }

    registry
}

fn shared(gateway: impl PaymentGateway + 'static) -> Arc<dyn PaymentGateway> {
    Arc::new(gateway)
}
