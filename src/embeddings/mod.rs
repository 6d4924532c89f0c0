// Embedder abstraction and its Ollama implementation

pub mod ollama;

use async_trait::async_trait;

use crate::Result;

pub use ollama::OllamaEmbedder;

/// A vector tagged with the model that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub model: String,
}

/// Produces fixed-length vectors for text. Deterministic for a fixed model.
///
/// Failures are reported as `VocabError::GenerationFailed`.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifier recorded alongside every stored vector.
    fn model_id(&self) -> &str;

    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Embedding>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }
}
