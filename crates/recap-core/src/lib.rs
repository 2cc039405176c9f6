//! # recap-core
//!
//! Domain model and storage seams for the chat-recap service.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐
//! │ CreditLedger │   │   JobStore   │   │   ContentStore   │
//! │ (per user)   │   │ (state m/c)  │   │ (JSON documents) │
//! └──────────────┘   └──────────────┘   └──────────────────┘
//!         ▲                  ▲                    ▲
//!         └──── reconciler ──┴──── pipeline ──────┘
//! ```
//!
//! The `LlmProvider` trait lets the content generator run against Gemini,
//! Ollama, or a scripted model without changing pipeline code.

pub mod content;
pub mod error;
pub mod job;
pub mod ledger;
pub mod message;
pub mod provider;
pub mod store;
pub mod trigger;

pub use content::{ContentRef, ContentStore, FsContentStore, MemoryContentStore};
pub use error::{CoreError, Result};
pub use job::{Job, JobId, JobStatus, PaymentStatus, PhotoRefs};
pub use ledger::{CreditApplication, CreditLedger, IdempotencyKey, MemoryCreditLedger};
pub use message::{Message, Role};
pub use provider::{
    Completion, FinishReason, GenerationOptions, LlmProvider, ModelInfo, ProviderInfo, TokenUsage,
};
pub use store::{JobStore, MemoryJobStore};
pub use trigger::{JobTrigger, NoopTrigger};
