
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::OllamaConfig;
use crate::generation::{GeneratedContent, GenerationRequest, Generator, language_name};
use crate::ollama::OllamaClient;
use crate::{Result, VocabError};

const EXAMPLE_COUNT: usize = 3;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    format: serde_json::Value,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

/// Generator backed by Ollama's `/api/chat` endpoint with structured output.
#[derive(Debug, Clone)]
pub struct OllamaGenerator {
    client: OllamaClient,
    model: String,
    temperature: f32,
}

impl OllamaGenerator {
    #[inline]
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let client = OllamaClient::from_config(config)?;
        Ok(Self::with_client(
            client,
            config.generation_model.clone(),
            config.temperature,
        ))
    }

    #[inline]
    pub fn with_client(client: OllamaClient, model: String, temperature: f32) -> Self {
        Self {
            client,
            model,
            temperature,
        }
    }

    #[inline]
    pub fn client(&self) -> &OllamaClient {
        &self.client
    }

    /// One chat round-trip. Blocking.
    #[inline]
    pub fn generate_blocking(&self, request: &GenerationRequest) -> anyhow::Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: build_messages(request),
            format: GeneratedContent::json_schema(),
            stream: false,
            options: ChatOptions {
                temperature: self.temperature,
            },
        };

        let response_text = self
            .client
            .post_json("/api/chat", &body)
            .context("Failed to generate dictionary content")?;

        let response: ChatResponse =
            serde_json::from_str(&response_text).context("Failed to parse chat response")?;

        Ok(response.message.content)
    }
}

fn build_messages(request: &GenerationRequest) -> Vec<ChatMessage> {
    let source = language_name(&request.language);
    let target = language_name(&request.target_language);

    let system = format!(
        "You build entries for a learner's dictionary. For the {source} word given by the user, \
         return JSON with: \"translations\": its base-form translations into {target}, most common first; \
         \"definitions\": one short, clear definition in {source} matching the meaning in the given context; \
         \"examples\": {EXAMPLE_COUNT} simple, natural {source} sentences using that meaning. \
         Ignore other meanings. Return JSON only."
    );

    let user = if request.context.is_empty() {
        format!("Word: {}", request.lemma)
    } else {
        format!("Word: {}\nContext: {}", request.lemma, request.context)
    };

    vec![
        ChatMessage {
            role: "system".to_string(),
            content: system,
        },
        ChatMessage {
            role: "user".to_string(),
            content: user,
        },
    ]
}

#[async_trait]
impl Generator for OllamaGenerator {
    #[inline]
    fn model_id(&self) -> &str {
        &self.model
    }

    #[inline]
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedContent> {
        debug!(
            "Generating content for '{}' ({} -> {}) with {}",
            request.lemma, request.language, request.target_language, self.model
        );

        let this = self.clone();
        let owned = request.clone();
        let raw = tokio::task::spawn_blocking(move || this.generate_blocking(&owned))
            .await
            .map_err(|e| VocabError::GenerationFailed(format!("Generation task failed: {e}")))?
            .map_err(|e| VocabError::GenerationFailed(format!("{e:#}")))?;

        let content = GeneratedContent::parse(&raw)?;
        info!(
            "Generated {} translations, {} definitions, {} examples for '{}'",
            content.translations.len(),
            content.definitions.len(),
            content.examples.len(),
            request.lemma
        );
        Ok(content)
    }
}
