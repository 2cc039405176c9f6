//! # recap-runtime
//!
//! LLM providers for the chat-recap content generator.
//!
//! ## Providers
//!
//! - **Gemini** (default): hosted generation via the REST API
//! - **Ollama**: local inference, behind the `ollama` feature
//! - **Scripted**: replayed responses for tests and offline demos
//!
//! ## Usage
//!
//! ```rust,ignore
//! use recap_runtime::{GeminiProvider, provider_from_lookup};
//!
//! let provider = provider_from_lookup(|k| std::env::var(k).ok())?;
//! let completion = provider.complete(&messages, &options).await?;
//! ```

use std::sync::Arc;

pub mod gemini;
#[cfg(feature = "ollama")]
pub mod ollama;
pub mod scripted;

pub use gemini::{GeminiConfig, GeminiProvider};
#[cfg(feature = "ollama")]
pub use ollama::{OllamaConfig, OllamaProvider};
pub use scripted::ScriptedProvider;

// Re-export core types for convenience
pub use recap_core::{CoreError, GenerationOptions, LlmProvider, Message, Result, Role};

/// Select a provider from `LLM_PROVIDER` (`gemini`, `ollama`, `scripted`).
pub fn provider_from_lookup(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Arc<dyn LlmProvider>> {
    let name = lookup("LLM_PROVIDER").unwrap_or_else(|| "gemini".into());
    match name.to_ascii_lowercase().as_str() {
        "gemini" => Ok(Arc::new(GeminiProvider::new(GeminiConfig::from_lookup(
            lookup,
        )?)?)),
        #[cfg(feature = "ollama")]
        "ollama" => {
            let mut config = OllamaConfig::default();
            if let Some(host) = lookup("OLLAMA_HOST") {
                config.host = host;
            }
            if let Some(port) = lookup("OLLAMA_PORT").and_then(|p| p.parse().ok()) {
                config.port = port;
            }
            if let Some(model) = lookup("OLLAMA_MODEL") {
                config.model = model;
            }
            Ok(Arc::new(OllamaProvider::from_config(config)))
        }
        "scripted" => {
            let reply = lookup("SCRIPTED_RESPONSE").unwrap_or_else(|| "{}".into());
            Ok(Arc::new(ScriptedProvider::always(reply)))
        }
        other => Err(CoreError::Config(format!("unknown LLM_PROVIDER: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_provider_is_config_error() {
        let result = provider_from_lookup(|k| (k == "LLM_PROVIDER").then(|| "gpt".to_string()));
        assert!(matches!(result, Err(CoreError::Config(_))));
    }

    #[test]
    fn test_scripted_selection() {
        let provider =
            provider_from_lookup(|k| (k == "LLM_PROVIDER").then(|| "scripted".to_string())).unwrap();
        assert_eq!(provider.info().name, "Scripted");
    }

    #[test]
    fn test_gemini_needs_key() {
        assert!(provider_from_lookup(|_| None).is_err());
    }
}
