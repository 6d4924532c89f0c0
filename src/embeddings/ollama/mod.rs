
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::OllamaConfig;
use crate::embeddings::{Embedder, Embedding};
use crate::ollama::OllamaClient;
use crate::{Result, VocabError};

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embedder backed by Ollama's `/api/embed` endpoint.
#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    client: OllamaClient,
    model: String,
    dimension: usize,
    batch_size: usize,
}

impl OllamaEmbedder {
    #[inline]
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let client = OllamaClient::from_config(config)?;
        Ok(Self::with_client(
            client,
            config.embedding_model.clone(),
            config.embedding_dimension as usize,
            config.batch_size as usize,
        ))
    }

    #[inline]
    pub fn with_client(
        client: OllamaClient,
        model: String,
        dimension: usize,
        batch_size: usize,
    ) -> Self {
        Self {
            client,
            model,
            dimension,
            batch_size: batch_size.max(1),
        }
    }

    #[inline]
    pub fn client(&self) -> &OllamaClient {
        &self.client
    }

    /// Embed every text, `batch_size` inputs per request. Blocking.
    #[inline]
    pub fn embed_texts_blocking(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating embeddings for {} texts", texts.len());

        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            let batch = self
                .embed_single_batch(chunk)
                .with_context(|| format!("Failed to process batch of {} texts", chunk.len()))?;
            vectors.extend(batch);
        }

        debug!("Generated {} embeddings total", vectors.len());
        Ok(vectors)
    }

    fn embed_single_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let request = EmbedRequest {
            model: &self.model,
            input: texts,
        };

        let response_text = self
            .client
            .post_json("/api/embed", &request)
            .context("Failed to generate embeddings")?;

        let response: EmbedResponse = serde_json::from_str(&response_text)
            .context("Failed to parse embedding response")?;

        if response.embeddings.len() != texts.len() {
            anyhow::bail!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                response.embeddings.len()
            );
        }

        if let Some(bad) = response
            .embeddings
            .iter()
            .find(|v| v.len() != self.dimension)
        {
            anyhow::bail!(
                "Model {} returned a {}-dimensional vector, expected {}",
                self.model,
                bad.len(),
                self.dimension
            );
        }

        Ok(response.embeddings)
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    #[inline]
    fn model_id(&self) -> &str {
        &self.model
    }

    #[inline]
    fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    async fn embed(&self, text: &str) -> Result<Embedding> {
        self.embed_batch(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| VocabError::GenerationFailed("Ollama returned no embedding".to_string()))
    }

    #[inline]
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let this = self.clone();
        let owned = texts.to_vec();

        let vectors = tokio::task::spawn_blocking(move || this.embed_texts_blocking(&owned))
            .await
            .map_err(|e| VocabError::GenerationFailed(format!("Embedding task failed: {e}")))?
            .map_err(|e| VocabError::GenerationFailed(format!("{e:#}")))?;

        Ok(vectors
            .into_iter()
            .map(|vector| Embedding {
                vector,
                model: self.model.clone(),
            })
            .collect())
    }
}
