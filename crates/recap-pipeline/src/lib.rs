//! # recap-pipeline
//!
//! Turns an uploaded chat archive into a stored retrospective document.
//!
//! ```text
//! ┌───────────┐   ┌────────────────────┐   ┌──────────────────┐   ┌──────────────┐
//! │  Fetcher  │──▶│ extract_transcript │──▶│ ContentGenerator │──▶│ ContentStore │
//! │ (zip blob)│   │  _chat.txt / .txt  │   │ LLM + validation │   │ complete_job │
//! └───────────┘   └────────────────────┘   └──────────────────┘   └──────────────┘
//! ```
//!
//! The [`Pipeline`] runs synchronously for the manual process endpoint and
//! in the background (via [`BackgroundTrigger`]) when a payment or job
//! creation kicks it off. Either way a failure ends with the job `failed`.

pub mod archive;
pub mod error;
pub mod generator;
pub mod pipeline;
pub mod privacy;
pub mod prompt;

pub use archive::{
    ArchiveFetcher, CANONICAL_TRANSCRIPT, HttpArchiveFetcher, StaticFetcher, Transcript,
    extract_transcript,
};
pub use error::{PipelineError, Result};
pub use generator::{ContentGenerator, GeneratedContent, SchemaPolicy, strip_code_fence};
pub use pipeline::{BackgroundTrigger, Pipeline, PipelineConfig};
pub use privacy::PrivacyScrubber;
pub use prompt::{REQUIRED_KEYS, RETROSPECTIVE_PROMPT};
