//! Content Generator
//!
//! Turns a transcript into the retrospective JSON document: one model call,
//! then fence stripping, parsing, schema checks and the privacy scrub.

use std::sync::Arc;

use recap_core::{GenerationOptions, LlmProvider};
use serde_json::Value;

use crate::error::{PipelineError, Result, excerpt};
use crate::privacy::PrivacyScrubber;
use crate::prompt::{REQUIRED_KEYS, build_messages};

const FALLBACK_TITLE: &str = "Retrospectiva";

/// How strictly generated documents are checked
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SchemaPolicy {
    /// Missing top-level keys are logged, nothing is rejected
    #[default]
    Lenient,

    /// Required keys, field types and item counts are enforced
    Strict,
}

/// A validated document ready for storage
#[derive(Clone, Debug)]
pub struct GeneratedContent {
    /// Pretty-printed JSON
    pub json: String,
    pub title: String,

    /// Schema problems tolerated under the lenient policy
    pub warnings: Vec<String>,

    /// Phone/CPF values masked by the privacy scrub
    pub redactions: usize,
}

pub struct ContentGenerator {
    provider: Arc<dyn LlmProvider>,
    options: GenerationOptions,
    policy: SchemaPolicy,
    scrubber: PrivacyScrubber,
}

impl ContentGenerator {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Result<Self> {
        Ok(Self {
            provider,
            options: GenerationOptions::default(),
            policy: SchemaPolicy::default(),
            scrubber: PrivacyScrubber::new()?,
        })
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_policy(mut self, policy: SchemaPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> SchemaPolicy {
        self.policy
    }

    /// Generate the retrospective for `transcript`
    pub async fn generate(&self, transcript: &str) -> Result<GeneratedContent> {
        if transcript.trim().is_empty() {
            return Err(PipelineError::Validation("transcript is empty".into()));
        }

        let provider = self.provider.info().name;
        tracing::info!(
            provider = %provider,
            model = %self.options.model,
            transcript_chars = transcript.chars().count(),
            "Generating retrospective"
        );

        let completion = self
            .provider
            .complete(&build_messages(transcript), &self.options)
            .await
            .map_err(PipelineError::Provider)?;

        if completion.truncated() {
            tracing::warn!(model = %completion.model, "Model output was cut off");
        }
        if let Some(usage) = completion.usage {
            tracing::debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "Model usage"
            );
        }

        let text = strip_code_fence(&completion.content);
        if text.is_empty() {
            return Err(PipelineError::GenerationFormat {
                message: "model returned an empty response".into(),
                excerpt: String::new(),
            });
        }

        let mut doc: Value = serde_json::from_str(text).map_err(|e| {
            tracing::error!(error = %e, raw = %excerpt(text), "Model returned invalid JSON");
            PipelineError::GenerationFormat {
                message: e.to_string(),
                excerpt: excerpt(text),
            }
        })?;
        if !doc.is_object() {
            return Err(PipelineError::GenerationFormat {
                message: "expected a JSON object".into(),
                excerpt: excerpt(text),
            });
        }

        let warnings = match self.policy {
            SchemaPolicy::Lenient => {
                let missing = missing_required_keys(&doc);
                if !missing.is_empty() {
                    tracing::warn!(missing = ?missing, "Generated document is missing required keys");
                }
                missing
            }
            SchemaPolicy::Strict => {
                let violations = schema_violations(&doc);
                if !violations.is_empty() {
                    return Err(PipelineError::GenerationFormat {
                        message: violations.join("; "),
                        excerpt: excerpt(text),
                    });
                }
                Vec::new()
            }
        };

        let redactions = self.scrubber.scrub_document(&mut doc);
        if redactions > 0 {
            tracing::warn!(redactions, "Masked personal data in generated document");
        }

        let title = doc["titulo"]
            .as_str()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(FALLBACK_TITLE)
            .to_string();

        let json = serde_json::to_string_pretty(&doc).map_err(|e| PipelineError::GenerationFormat {
            message: e.to_string(),
            excerpt: String::new(),
        })?;

        Ok(GeneratedContent {
            json,
            title,
            warnings,
            redactions,
        })
    }
}

/// Remove a surrounding markdown code fence (```` ```json ```` or bare ```` ``` ````)
pub fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_end();
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn missing_required_keys(doc: &Value) -> Vec<String> {
    REQUIRED_KEYS
        .iter()
        .filter(|key| doc.get(**key).is_none_or(Value::is_null))
        .map(|key| format!("missing {key}"))
        .collect()
}

/// Every way `doc` departs from the retrospective schema
fn schema_violations(doc: &Value) -> Vec<String> {
    let mut out = Vec::new();

    expect_string(doc, "titulo", &mut out);
    expect_fields(doc, "metricas_temporais", &["inicio", "fim", "constancia_conversa"], &mut out);

    if expect_fields(
        doc,
        "tipo_de_amizade",
        &["nome_criativo", "descricao", "por_que", "pilares"],
        &mut out,
    ) {
        expect_example(&doc["tipo_de_amizade"], "tipo_de_amizade.exemplo_real", &mut out);
    }

    expect_strings(doc, "melhores_momentos_eventos", 4, &mut out);

    let funny = &doc["momentos_engracados_piadas"];
    if funny.is_object() {
        expect_strings(funny, "itens", 4, &mut out);
        expect_example(funny, "momentos_engracados_piadas.exemplo_real", &mut out);
    } else {
        out.push("momentos_engracados_piadas must be an object".into());
    }

    expect_strings(doc, "expressoes_internas", 4, &mut out);
    expect_strings(doc, "metas_proximo_ano", 3, &mut out);
    expect_string(doc, "fechamento", &mut out);

    out
}

fn expect_string(parent: &Value, key: &str, out: &mut Vec<String>) {
    if !parent[key].as_str().is_some_and(|s| !s.trim().is_empty()) {
        out.push(format!("{key} must be a non-empty string"));
    }
}

/// Object at `key` with string `fields`; false when `key` is not an object
fn expect_fields(parent: &Value, key: &str, fields: &[&str], out: &mut Vec<String>) -> bool {
    let object = &parent[key];
    if !object.is_object() {
        out.push(format!("{key} must be an object"));
        return false;
    }
    for field in fields {
        if !object[*field].is_string() {
            out.push(format!("{key}.{field} must be a string"));
        }
    }
    true
}

fn expect_example(parent: &Value, path: &str, out: &mut Vec<String>) {
    let example = &parent["exemplo_real"];
    if !example.is_object() {
        out.push(format!("{path} must be an object"));
        return;
    }
    for field in ["autor", "message", "hour"] {
        if !example[field].is_string() {
            out.push(format!("{path}.{field} must be a string"));
        }
    }
}

fn expect_strings(parent: &Value, key: &str, count: usize, out: &mut Vec<String>) {
    match parent[key].as_array() {
        Some(items) if items.len() == count && items.iter().all(Value::is_string) => {}
        Some(items) => out.push(format!(
            "{key} must hold exactly {count} strings, got {}",
            items.len()
        )),
        None => out.push(format!("{key} must be an array")),
    }
}
