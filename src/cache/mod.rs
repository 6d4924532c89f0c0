// Semantic vocabulary cache: exact lookup, staleness policy, nearest-neighbour
// reuse and deduplicated generation, wired together from configuration.

pub mod coordinator;
pub mod resolver;
pub mod staleness;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::config::Config;
use crate::database::sqlite::Database;
use crate::database::sqlite::models::{Entry, EntryKey};
use crate::embeddings::{Embedder, OllamaEmbedder};
use crate::generation::{Generator, OllamaGenerator};
use crate::index::consistency::{ConsistencyReport, ConsistencyValidator};
use crate::index::{RebuildSummary, VectorIndex};
use crate::{Result, VocabError};

pub use coordinator::{
    CoordinatorSettings, CoordinatorStats, GenerationCoordinator, ResolveFailure,
};
pub use resolver::{LookupOptions, ResolverSettings, SimilarEntry, SimilarOptions, SimilarityResolver};
pub use staleness::{StalenessPolicy, Verdict};

/// Immutable per-request context threaded from the resolver into the
/// coordinator. Nothing about a request lives in shared state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub key: EntryKey,
    /// Whitespace-normalised sense context; may be empty
    pub context_text: String,
    pub target_language: String,
    pub requested_at: DateTime<Utc>,
}

impl RequestContext {
    #[inline]
    pub fn new(key: EntryKey, context_text: &str, target_language: &str) -> Self {
        Self {
            key,
            context_text: normalize_context(context_text),
            target_language: target_language.trim().to_lowercase(),
            requested_at: Utc::now(),
        }
    }

    #[inline]
    pub fn with_requested_at(mut self, requested_at: DateTime<Utc>) -> Self {
        self.requested_at = requested_at;
        self
    }
}

#[inline]
pub fn normalize_context(context: &str) -> String {
    context.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Text embedded for an entry and for a lookup, so both land in the same space.
#[inline]
pub fn embedding_text(lemma: &str, context: &str) -> String {
    if context.is_empty() {
        lemma.to_string()
    } else {
        format!("{lemma}: {context}")
    }
}

/// The assembled cache: store, index, coordinator and resolver.
pub struct VocabCache {
    config: Config,
    database: Database,
    index: Arc<VectorIndex>,
    coordinator: Arc<GenerationCoordinator>,
    resolver: SimilarityResolver,
}

impl VocabCache {
    /// Open the store under the config directory and talk to Ollama.
    #[inline]
    pub async fn open(config: Config) -> Result<Self> {
        let database = Database::initialize_from_config_dir(config.get_base_dir()).await?;
        let generator: Arc<dyn Generator> = Arc::new(OllamaGenerator::new(&config.ollama)?);
        let embedder: Arc<dyn Embedder> = Arc::new(OllamaEmbedder::new(&config.ollama)?);
        Self::with_backends(config, database, generator, embedder).await
    }

    /// Assemble the cache around explicit collaborators and rebuild the index
    /// from the store.
    #[inline]
    pub async fn with_backends(
        config: Config,
        database: Database,
        generator: Arc<dyn Generator>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| VocabError::Config(e.to_string()))?;

        if embedder.dimension() == 0 {
            return Err(VocabError::Config(format!(
                "Embedder {} reports a zero dimension",
                embedder.model_id()
            )));
        }

        let policy = StalenessPolicy::new(
            embedder.model_id(),
            config.cache.max_embedding_age(),
        );
        let index = Arc::new(VectorIndex::new(embedder.model_id(), embedder.dimension()));
        let mark = index.mark();
        index.rebuild(mark, &database.list_entry_embeddings().await?);

        let coordinator = Arc::new(GenerationCoordinator::new(
            database.clone(),
            Arc::clone(&index),
            generator,
            Arc::clone(&embedder),
            policy.clone(),
            CoordinatorSettings::from(&config.cache),
        ));

        let resolver = SimilarityResolver::new(
            database.clone(),
            Arc::clone(&index),
            embedder,
            Arc::clone(&coordinator),
            policy,
            ResolverSettings::from(&config.cache),
        );

        info!(
            "Vocabulary cache ready: {} entries indexed with model {}",
            index.len(),
            index.model()
        );

        Ok(Self {
            config,
            database,
            index,
            coordinator,
            resolver,
        })
    }

    #[inline]
    pub async fn lookup(
        &self,
        lemma: &str,
        language: &str,
        context: &str,
        options: &LookupOptions,
    ) -> Result<Entry> {
        self.resolver.lookup(lemma, language, context, options).await
    }

    #[inline]
    pub async fn find_similar(
        &self,
        lemma: &str,
        language: &str,
        context: &str,
        options: &SimilarOptions,
    ) -> Result<Vec<SimilarEntry>> {
        self.resolver
            .find_similar(lemma, language, context, options)
            .await
    }

    /// Full index rebuild from the store.
    #[inline]
    pub async fn reindex(&self) -> Result<RebuildSummary> {
        ConsistencyValidator::new(&self.database, &self.index)
            .repair()
            .await
    }

    #[inline]
    pub async fn check_consistency(&self) -> Result<ConsistencyReport> {
        ConsistencyValidator::new(&self.database, &self.index)
            .validate_consistency()
            .await
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn database(&self) -> &Database {
        &self.database
    }

    #[inline]
    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    #[inline]
    pub fn coordinator(&self) -> &GenerationCoordinator {
        &self.coordinator
    }

    #[inline]
    pub fn resolver(&self) -> &SimilarityResolver {
        &self.resolver
    }
}
