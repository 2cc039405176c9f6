//! Gemini LLM Provider
//!
//! `LlmProvider` over the Generative Language REST API
//! (`models/{model}:generateContent`).

use std::time::Duration;

use async_trait::async_trait;
use recap_core::{
    error::{CoreError, Result},
    message::{Message, Role, split_system},
    provider::{
        Completion, DEFAULT_MODEL, FinishReason, GenerationOptions, LlmProvider, ModelInfo,
        ProviderInfo, TokenUsage,
    },
};
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini provider configuration
#[derive(Clone, Debug)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,

    /// Per-request timeout
    pub timeout: Duration,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.into(),
            model: DEFAULT_MODEL.into(),
            timeout: Duration::from_secs(120),
        }
    }

    /// Build from a variable lookup (`GEMINI_API_KEY`, `GEMINI_MODEL`,
    /// `GEMINI_BASE_URL`, `GEMINI_TIMEOUT_SECS`).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_key = lookup("GEMINI_API_KEY")
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| CoreError::Config("GEMINI_API_KEY is not set".into()))?;

        let mut config = Self::new(api_key);
        if let Some(model) = lookup("GEMINI_MODEL") {
            config.model = model;
        }
        if let Some(url) = lookup("GEMINI_BASE_URL") {
            config.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(secs) = lookup("GEMINI_TIMEOUT_SECS") {
            let secs = secs
                .parse()
                .map_err(|_| CoreError::Config(format!("invalid GEMINI_TIMEOUT_SECS: {secs}")))?;
            config.timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }
}

/// Gemini LLM provider
pub struct GeminiProvider {
    http: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiProvider {
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CoreError::Config(e.to_string()))?;
        Ok(Self { http, config })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(GeminiConfig::from_env()?)
    }

    fn build_request(messages: &[Message], options: &GenerationOptions) -> GenerateRequest {
        let (system, rest) = split_system(messages);
        GenerateRequest {
            system_instruction: system.map(|text| Content {
                role: None,
                parts: vec![Part { text: Some(text) }],
            }),
            contents: rest
                .into_iter()
                .map(|m| Content {
                    role: Some(
                        match m.role {
                            Role::Assistant => "model",
                            _ => "user",
                        }
                        .into(),
                    ),
                    parts: vec![Part {
                        text: Some(m.content.clone()),
                    }],
                })
                .collect(),
            generation_config: GenerationConfig {
                temperature: options.temperature,
                max_output_tokens: options.max_tokens,
                response_mime_type: options.json_output.then(|| "application/json".into()),
            },
        }
    }

    fn convert_response(response: GenerateResponse, model: &str) -> Result<Completion> {
        if let Some(feedback) = response.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(CoreError::Provider(format!("prompt blocked: {feedback}")));
        }

        let candidate = response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::Provider("response has no candidates".into()))?;

        let content = candidate
            .content
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<String>()
            })
            .unwrap_or_default();

        let finish_reason = candidate.finish_reason.as_deref().map(|r| match r {
            "STOP" => FinishReason::Stop,
            "MAX_TOKENS" => FinishReason::Length,
            "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" => {
                FinishReason::ContentFilter
            }
            _ => FinishReason::Error,
        });

        Ok(Completion {
            content,
            model: model.to_string(),
            usage: response.usage_metadata.map(|u| TokenUsage {
                prompt_tokens: u.prompt_token_count,
                completion_tokens: u.candidates_token_count,
                total_tokens: u.total_token_count,
            }),
            finish_reason,
        })
    }

    async fn error_from(response: reqwest::Response) -> CoreError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let excerpt: String = body.chars().take(200).collect();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            CoreError::ProviderUnavailable(format!("Gemini returned {status}: {excerpt}"))
        } else {
            CoreError::Provider(format!("Gemini returned {status}: {excerpt}"))
        }
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "Gemini".into(),
            default_model: self.config.model.clone(),
            supports_json_output: true,
        }
    }

    async fn health_check(&self) -> Result<bool> {
        match self.list_models().await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!("Gemini health check failed: {}", e);
                Ok(false)
            }
        }
    }

    async fn complete(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<Completion> {
        let model = if options.model.is_empty() {
            self.config.model.as_str()
        } else {
            options.model.as_str()
        };
        let url = format!("{}/models/{model}:generateContent", self.config.base_url);

        tracing::debug!(model = %model, messages = messages.len(), "Calling Gemini");

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&Self::build_request(messages, options))
            .send()
            .await
            .map_err(|e| CoreError::ProviderUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| CoreError::Provider(format!("unreadable Gemini response: {e}")))?;

        Self::convert_response(body, model)
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let response = self
            .http
            .get(format!("{}/models", self.config.base_url))
            .header("x-goog-api-key", &self.config.api_key)
            .send()
            .await
            .map_err(|e| CoreError::ProviderUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let body: ModelList = response
            .json()
            .await
            .map_err(|e| CoreError::Provider(e.to_string()))?;

        Ok(body
            .models
            .into_iter()
            .map(|m| ModelInfo {
                id: m.name.trim_start_matches("models/").to_string(),
                name: m.display_name.unwrap_or(m.name),
                context_length: m.input_token_limit,
            })
            .collect())
    }
}

// Wire types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    models: Vec<RemoteModel>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteModel {
    name: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    input_token_limit: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_requires_api_key() {
        let err = GeminiConfig::from_lookup(|_| None).unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }

    #[test]
    fn test_config_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("GEMINI_API_KEY", "k"),
            ("GEMINI_BASE_URL", "http://127.0.0.1:9/v1beta/"),
            ("GEMINI_TIMEOUT_SECS", "5"),
        ]
        .into();
        let config = GeminiConfig::from_lookup(|k| vars.get(k).map(|v| (*v).to_string())).unwrap();

        assert_eq!(config.model, "gemini-2.5-flash");
        assert_eq!(config.base_url, "http://127.0.0.1:9/v1beta");
        assert_eq!(config.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_request_uses_system_instruction() {
        let messages = vec![Message::system("regras"), Message::user("conversa")];
        let request = GeminiProvider::build_request(&messages, &GenerationOptions::default());
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "regras");
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "conversa");
        assert_eq!(json["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 8192);
    }

    #[test]
    fn test_response_joins_parts() {
        let body: GenerateResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "{\"titulo\":"}, {"text": "\"A & B\"}"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 5, "totalTokenCount": 15}
        }))
        .unwrap();

        let completion = GeminiProvider::convert_response(body, "gemini-2.5-flash").unwrap();
        assert_eq!(completion.content, "{\"titulo\":\"A & B\"}");
        assert_eq!(completion.finish_reason, Some(FinishReason::Stop));
        assert_eq!(completion.usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn test_blocked_prompt_is_error() {
        let body: GenerateResponse = serde_json::from_value(serde_json::json!({
            "promptFeedback": {"blockReason": "SAFETY"}
        }))
        .unwrap();
        assert!(GeminiProvider::convert_response(body, "m").is_err());
    }

    #[test]
    fn test_truncated_response() {
        let body: GenerateResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "{"}]}, "finishReason": "MAX_TOKENS"}]
        }))
        .unwrap();
        assert!(GeminiProvider::convert_response(body, "m").unwrap().truncated());
    }
}
