//! Error Types for the Generation Pipeline

use recap_core::CoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Archive download failed: {0}")]
    Download(String),

    #[error("Corrupt archive: {0}")]
    CorruptArchive(String),

    #[error("No .txt transcript in archive; entries: {}", entries.join(", "))]
    NoTranscript { entries: Vec<String> },

    #[error("Transcript {0} is empty")]
    EmptyTranscript(String),

    #[error("Model returned unusable output: {message} (output starts with {excerpt:?})")]
    GenerationFormat { message: String, excerpt: String },

    #[error("{stage} timed out after {seconds}s")]
    Timeout { stage: &'static str, seconds: u64 },

    /// Model call failed
    #[error("Generation error: {0}")]
    Provider(CoreError),

    #[error(transparent)]
    Store(#[from] CoreError),
}

impl PipelineError {
    /// Whether running the job again may succeed without any other change
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Download(_) | PipelineError::Timeout { .. } => true,
            PipelineError::Provider(e) | PipelineError::Store(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Whether the error is confined to the archive stage
    pub fn is_archive_error(&self) -> bool {
        matches!(
            self,
            PipelineError::Download(_)
                | PipelineError::CorruptArchive(_)
                | PipelineError::NoTranscript { .. }
                | PipelineError::EmptyTranscript(_)
        )
    }

    pub fn user_message(&self) -> String {
        match self {
            PipelineError::Download(_) => {
                "The chat archive could not be downloaded. Please upload it again.".into()
            }
            PipelineError::CorruptArchive(_) => {
                "The uploaded file is not a valid zip archive.".into()
            }
            PipelineError::NoTranscript { .. } => {
                "No conversation (.txt) file was found inside the archive.".into()
            }
            PipelineError::EmptyTranscript(_) => "The conversation file is empty.".into(),
            PipelineError::GenerationFormat { .. } | PipelineError::Provider(_) => {
                "The retrospective could not be generated. Please try again.".into()
            }
            PipelineError::Timeout { .. } => {
                "Generating the retrospective took too long. Please try again.".into()
            }
            PipelineError::Validation(msg) => msg.clone(),
            PipelineError::Store(e) => e.user_message(),
            PipelineError::Config(_) => "The service is not configured correctly.".into(),
        }
    }
}

/// First characters of model output, for diagnostics
pub(crate) fn excerpt(text: &str) -> String {
    const LIMIT: usize = 200;
    let mut out: String = text.chars().take(LIMIT).collect();
    if text.chars().nth(LIMIT).is_some() {
        out.push('…');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_transcript_lists_entries() {
        let err = PipelineError::NoTranscript {
            entries: vec!["photo.jpg".into(), "media/".into()],
        };
        assert!(err.to_string().contains("photo.jpg, media/"));
        assert!(err.is_archive_error());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_excerpt_is_bounded() {
        let long = "x".repeat(500);
        assert_eq!(excerpt(&long).chars().count(), 201);
        assert_eq!(excerpt("short"), "short");
    }
}
