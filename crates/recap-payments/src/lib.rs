//! # recap-payments
//!
//! Payment gateways and webhook reconciliation for chat-recap.
//!
//! ## Flow
//!
//! ```text
//! ┌──────────┐  create_checkout   ┌──────────────┐
//! │  Client  │───────────────────▶│   Provider   │
//! └──────────┘   (metadata in     │ hosted page  │
//!                 reference)      └──────┬───────┘
//!                                        │ webhook
//!                                        ▼
//!                 ┌──────────────┐  PaymentEvent  ┌───────────────────┐
//!                 │ parse_webhook│───────────────▶│ WebhookReconciler │
//!                 │ (signature)  │                │ ledger / jobs     │
//!                 └──────────────┘                └───────────────────┘
//! ```
//!
//! Every provider embeds the same [`PaymentMetadata`] in its checkout and
//! gets it back in the webhook. The reconciler credits the ledger or marks
//! a job paid, once per `provider:externalPaymentId`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use recap_payments::{GatewayRegistry, MercadoPagoConfig, MercadoPagoGateway, Provider};
//!
//! let registry = GatewayRegistry::new()
//!     .with(Arc::new(MercadoPagoGateway::new(MercadoPagoConfig::new("APP_USR-xxx"))));
//!
//! let gateway = registry.get(Provider::MercadoPago)?;
//! let checkout = gateway.create_checkout(&request).await?;
//! // Redirect user to: checkout.checkout_url
//! ```

mod asaas;
mod avocadopay;
mod error;
mod event;
mod gateway;
mod mercadopago;
mod reconciler;
mod signature;
mod stripe_gateway;

pub use asaas::{AsaasConfig, AsaasGateway};
pub use avocadopay::{AvocadoPayConfig, AvocadoPayGateway};
pub use error::{PaymentError, Result};
pub use event::{
    EventStatus, MetadataOrigin, PaymentEvent, PaymentKind, PaymentMetadata, Provider,
};
pub use gateway::{Checkout, CheckoutRequest, GatewayRegistry, PaymentGateway, WebhookOutcome};
pub use mercadopago::{MercadoPagoConfig, MercadoPagoGateway};
pub use reconciler::{ReconcileOutcome, ReconcilerConfig, WebhookReconciler};
pub use signature::hmac_sha256_hex;
pub use stripe_gateway::StripeGateway;
