//! # recap-server
//!
//! HTTP surface of the chat-recap service: job creation and delivery,
//! provider checkouts, payment webhooks and the manual process trigger.
//!
//! ```text
//! POST /checkout/{p} ──▶ PaymentGateway ──▶ provider checkout URL
//! POST /webhooks/{p} ──▶ PaymentGateway ──▶ WebhookReconciler ──▶ ledger / jobs
//!                                                   │
//!                                                   ▼ trigger
//! POST /jobs ─────────────────────────────────▶ Pipeline ──▶ content store
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod router;
pub mod state;
pub mod webhooks;

pub use config::{ServerConfig, build_gateways};
pub use error::ApiError;
pub use router::{ENDPOINTS, router};
pub use state::{AppState, Services};
