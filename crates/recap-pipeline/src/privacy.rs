//! Privacy Scrub
//!
//! Masks phone numbers and CPF-shaped identifiers in generated documents.
//! The prompt already asks the model to leave them out; this catches the
//! ones it leaks anyway.

use regex::Regex;
use serde_json::Value;

use crate::error::{PipelineError, Result};

const CPF_PATTERN: &str = r"\b\d{3}\.?\d{3}\.?\d{3}-?\d{2}\b";
// Bare digit runs are left alone; a phone needs a +55/area-code prefix or
// the dashed mobile form
const PHONE_PATTERN: &str = concat!(
    r"\+55\s?\(?\d{2}\)?\s?9?\d{4}[-\s]?\d{4}\b",
    r"|(?:\(\d{2}\)\s?|\b\d{2}\s)9?\d{4}[-\s]?\d{4}\b",
    r"|\b9\d{4}-\d{4}\b",
);

const CPF_MASK: &str = "[CPF removido]";
const PHONE_MASK: &str = "[telefone removido]";

pub struct PrivacyScrubber {
    cpf: Regex,
    phone: Regex,
}

impl PrivacyScrubber {
    pub fn new() -> Result<Self> {
        Ok(Self {
            cpf: compile(CPF_PATTERN)?,
            phone: compile(PHONE_PATTERN)?,
        })
    }

    /// Mask one string; returns the number of replacements
    pub fn scrub_text(&self, text: &str) -> (String, usize) {
        let cpfs = self.cpf.find_iter(text).count();
        let text = self.cpf.replace_all(text, CPF_MASK);
        let phones = self.phone.find_iter(&text).count();
        let text = self.phone.replace_all(&text, PHONE_MASK);
        (text.into_owned(), cpfs + phones)
    }

    /// Mask every string in a JSON document in place
    pub fn scrub_document(&self, doc: &mut Value) -> usize {
        match doc {
            Value::String(s) => {
                let (clean, count) = self.scrub_text(s);
                if count > 0 {
                    *s = clean;
                }
                count
            }
            Value::Array(items) => items.iter_mut().map(|v| self.scrub_document(v)).sum(),
            Value::Object(map) => map.values_mut().map(|v| self.scrub_document(v)).sum(),
            _ => 0,
        }
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| PipelineError::Config(format!("privacy pattern: {e}")))
}
