// Generator abstraction: translations, definitions and examples for one lemma

#[cfg(test)]
mod tests;

pub mod ollama;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Result, VocabError};

pub use ollama::OllamaGenerator;

/// Everything the generator needs to resolve one lemma in one sense.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub lemma: String,
    pub language: String,
    /// Language translations are produced in
    pub target_language: String,
    /// Sentence or phrase the lemma was seen in; may be empty
    pub context: String,
}

/// Decoded generator output. Construct through [`GeneratedContent::parse`] or
/// [`GeneratedContent::validated`] so the invariants below hold.
///
/// Translations and definitions are non-empty, every string is trimmed and
/// non-blank, and translations are unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeneratedContent {
    pub translations: Vec<String>,
    pub definitions: Vec<String>,
    #[serde(default)]
    pub examples: Vec<String>,
}

impl GeneratedContent {
    /// Strictly decode raw model output. Anything that does not match the
    /// schema is a generation failure, never a partial result.
    #[inline]
    pub fn parse(raw: &str) -> Result<Self> {
        let content: Self = serde_json::from_str(raw.trim()).map_err(|e| {
            VocabError::GenerationFailed(format!("Generator output does not match schema: {e}"))
        })?;
        content.validated()
    }

    #[inline]
    pub fn validated(self) -> Result<Self> {
        let mut translations: Vec<String> = Vec::with_capacity(self.translations.len());
        for translation in clean("translation", self.translations)? {
            if !translations
                .iter()
                .any(|t| t.to_lowercase() == translation.to_lowercase())
            {
                translations.push(translation);
            }
        }
        let definitions = clean("definition", self.definitions)?;
        let examples = clean("example", self.examples)?;

        if translations.is_empty() {
            return Err(VocabError::GenerationFailed(
                "Generator returned no translations".to_string(),
            ));
        }
        if definitions.is_empty() {
            return Err(VocabError::GenerationFailed(
                "Generator returned no definitions".to_string(),
            ));
        }

        Ok(Self {
            translations,
            definitions,
            examples,
        })
    }

    /// JSON schema handed to structured-output capable models.
    #[inline]
    pub fn json_schema() -> serde_json::Value {
        let string_list = serde_json::json!({
            "type": "array",
            "items": { "type": "string" }
        });

        serde_json::json!({
            "type": "object",
            "properties": {
                "translations": string_list,
                "definitions": string_list,
                "examples": string_list
            },
            "required": ["translations", "definitions", "examples"],
            "additionalProperties": false
        })
    }
}

fn clean(kind: &str, values: Vec<String>) -> Result<Vec<String>> {
    values
        .into_iter()
        .map(|value| {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                Err(VocabError::GenerationFailed(format!(
                    "Generator returned a blank {kind}"
                )))
            } else {
                Ok(trimmed.to_string())
            }
        })
        .collect()
}

/// Produces dictionary content for a lemma. Potentially slow and unreliable;
/// failures are reported as `VocabError::GenerationFailed`.
#[async_trait]
pub trait Generator: Send + Sync {
    fn model_id(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedContent>;
}

/// Display name for the language codes seeded into the store. Unknown codes
/// are returned unchanged.
#[inline]
pub fn language_name(code: &str) -> &str {
    match code {
        "en" => "English",
        "ru" => "Русский",
        "ko" => "한국어",
        "zh" => "中文",
        "ja" => "日本語",
        "es" => "Español",
        "fr" => "Français",
        "de" => "Deutsch",
        "it" => "Italiano",
        "pt" => "Português",
        other => other,
    }
}
