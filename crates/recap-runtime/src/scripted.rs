//! Scripted LLM Provider
//!
//! Replays queued responses in order and records every prompt it was
//! given. Used by pipeline and server tests, and by `LLM_PROVIDER=scripted`
//! for offline demos.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use recap_core::{
    error::{CoreError, Result},
    message::Message,
    provider::{Completion, FinishReason, GenerationOptions, LlmProvider, ModelInfo, ProviderInfo},
};

enum Step {
    Reply(String),
    Fail(String),
}

/// Provider that returns pre-scripted completions
#[derive(Default)]
pub struct ScriptedProvider {
    steps: Mutex<VecDeque<Step>>,
    fallback: Option<String>,
    delay: Option<Duration>,
    prompts: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer with `reply` once the script is exhausted
    pub fn always(reply: impl Into<String>) -> Self {
        Self {
            fallback: Some(reply.into()),
            ..Self::default()
        }
    }

    pub fn then_reply(self, reply: impl Into<String>) -> Self {
        self.steps.lock().push_back(Step::Reply(reply.into()));
        self
    }

    pub fn then_fail(self, message: impl Into<String>) -> Self {
        self.steps.lock().push_back(Step::Fail(message.into()));
        self
    }

    /// Sleep before answering (timeout tests)
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Prompts received so far
    pub fn prompts(&self) -> Vec<Vec<Message>> {
        self.prompts.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().len()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "Scripted".into(),
            default_model: "scripted".into(),
            supports_json_output: true,
        }
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    async fn complete(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<Completion> {
        self.prompts.lock().push(messages.to_vec());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let step = self.steps.lock().pop_front();
        let content = match step {
            Some(Step::Reply(text)) => text,
            Some(Step::Fail(message)) => return Err(CoreError::Provider(message)),
            None => self
                .fallback
                .clone()
                .ok_or_else(|| CoreError::ProviderUnavailable("script exhausted".into()))?,
        };

        Ok(Completion {
            content,
            model: options.model.clone(),
            usage: None,
            finish_reason: Some(FinishReason::Stop),
        })
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        Ok(vec![ModelInfo {
            id: "scripted".into(),
            name: "Scripted".into(),
            context_length: None,
        }])
    }
}
