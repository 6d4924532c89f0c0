
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::cache::coordinator::with_deadline;
use crate::cache::{
    GenerationCoordinator, RequestContext, StalenessPolicy, Verdict, embedding_text,
    normalize_context,
};
use crate::config::CacheConfig;
use crate::database::sqlite::Database;
use crate::database::sqlite::models::{Entry, EntryKey};
use crate::embeddings::{Embedder, Embedding};
use crate::index::VectorIndex;
use crate::{Result, VocabError};

#[derive(Debug, Clone, PartialEq)]
pub struct ResolverSettings {
    /// Minimum cosine similarity for reusing a neighbour as the answer
    pub similarity_threshold: f32,
    /// Default floor for `find_similar`
    pub related_threshold: f32,
    pub neighbor_top_k: usize,
    /// Similarities this close to the best count as tied
    pub tie_epsilon: f32,
    pub semantic_reuse: bool,
    pub default_target_language: String,
    pub embedding_timeout: Duration,
}

impl From<&CacheConfig> for ResolverSettings {
    #[inline]
    fn from(config: &CacheConfig) -> Self {
        Self {
            similarity_threshold: config.similarity_threshold,
            related_threshold: config.related_threshold,
            neighbor_top_k: config.neighbor_top_k,
            tie_epsilon: config.tie_epsilon,
            semantic_reuse: config.semantic_reuse,
            default_target_language: config.default_target_language.clone(),
            embedding_timeout: config.embedding_timeout(),
        }
    }
}

impl Default for ResolverSettings {
    #[inline]
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

/// Per-call overrides for [`SimilarityResolver::lookup`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupOptions {
    pub target_language: Option<String>,
    pub semantic_reuse: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimilarOptions {
    pub top_k: usize,
    /// Only return entries in this learning profile's dictionary
    pub profile_id: Option<i64>,
    pub min_similarity: Option<f32>,
}

impl Default for SimilarOptions {
    #[inline]
    fn default() -> Self {
        Self {
            top_k: 10,
            profile_id: None,
            min_similarity: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimilarEntry {
    pub entry: Entry,
    pub similarity: f32,
}

/// Candidate neighbour that survived hydration and the staleness check.
#[derive(Debug, Clone)]
struct Candidate {
    entry: Entry,
    similarity: f32,
    verdict: Verdict,
}

/// Answers lookups: exact hit, then nearest neighbour, then generation.
pub struct SimilarityResolver {
    database: Database,
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    coordinator: Arc<GenerationCoordinator>,
    policy: StalenessPolicy,
    settings: ResolverSettings,
}

impl SimilarityResolver {
    #[inline]
    pub fn new(
        database: Database,
        index: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
        coordinator: Arc<GenerationCoordinator>,
        policy: StalenessPolicy,
        settings: ResolverSettings,
    ) -> Self {
        Self {
            database,
            index,
            embedder,
            coordinator,
            policy,
            settings,
        }
    }

    #[inline]
    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    /// Resolve `lemma` in `language` for the sense given by `context`.
    ///
    /// An exact entry that is still usable is returned without any external
    /// call, and an outdated one is regenerated in place. Otherwise the
    /// closest usable entry in the same language at or above the similarity
    /// threshold is returned and recorded as an alias. Failing both,
    /// generation runs through the coordinator.
    #[inline]
    pub async fn lookup(
        &self,
        lemma: &str,
        language: &str,
        context: &str,
        options: &LookupOptions,
    ) -> Result<Entry> {
        let key = EntryKey::new(lemma, language)?;
        let target_language = options
            .target_language
            .as_deref()
            .unwrap_or(&self.settings.default_target_language);
        let request = RequestContext::new(key, context, target_language);
        if request.target_language.is_empty() {
            return Err(VocabError::InvalidRequest(
                "target language cannot be empty".to_string(),
            ));
        }

        match self.database.get_entry(&request.key).await {
            Ok(entry) => match self.policy.decide(&entry, &request) {
                Verdict::Reuse => {
                    debug!("Exact hit for {}", request.key);
                    return Ok(entry);
                }
                Verdict::Refresh => {
                    debug!("Exact hit for {} with an aging embedding", request.key);
                    self.coordinator.schedule_refresh(&entry);
                    return Ok(entry);
                }
                Verdict::Regenerate => {
                    info!(
                        "Entry {} was embedded with {:?}; regenerating with {}",
                        entry.key,
                        entry.embedding_model(),
                        self.policy.current_model()
                    );
                    // An alias would stay shadowed by the key's own row, so
                    // the row is regenerated in place
                    if entry.key == request.key {
                        return self.coordinator.resolve(&request).await;
                    }
                }
            },
            Err(VocabError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let semantic_reuse = options
            .semantic_reuse
            .unwrap_or(self.settings.semantic_reuse);

        // Nothing to compare against in an empty index
        let query_embedding = if semantic_reuse && !self.index.is_empty() {
            let text = embedding_text(&request.key.lemma, &request.context_text);
            Some(with_deadline(self.settings.embedding_timeout, self.embedder.embed(&text)).await?)
        } else {
            None
        };

        if let Some(embedding) = &query_embedding {
            if let Some(entry) = self.reuse_neighbor(&request, embedding).await? {
                return Ok(entry);
            }
        }

        self.coordinator
            .resolve_with_embedding(&request, query_embedding)
            .await
    }

    /// Best usable neighbour at or above the similarity threshold, aliased to
    /// the request key.
    async fn reuse_neighbor(
        &self,
        request: &RequestContext,
        embedding: &Embedding,
    ) -> Result<Option<Entry>> {
        let language = &request.key.language;
        let neighbors = match self.index.query_where(
            &embedding.vector,
            self.settings.neighbor_top_k,
            self.settings.similarity_threshold,
            |key| key.language == *language && *key != request.key,
        ) {
            Ok(neighbors) => neighbors,
            Err(e) => {
                warn!("Neighbour search for {} failed: {}", request.key, e);
                return Ok(None);
            }
        };

        let mut candidates = Vec::with_capacity(neighbors.len());
        for neighbor in neighbors {
            let Some(entry) = self.hydrate(&neighbor.key).await? else {
                continue;
            };
            let verdict = self.policy.decide(&entry, request);
            if verdict == Verdict::Regenerate {
                debug!("Skipping neighbour {} with an outdated embedding", entry.key);
                continue;
            }
            candidates.push(Candidate {
                entry,
                similarity: neighbor.similarity,
                verdict,
            });
        }

        let Some(best) = pick_best(candidates, self.settings.tie_epsilon) else {
            return Ok(None);
        };

        info!(
            "Reusing {} for {} (similarity {:.3})",
            best.entry.key, request.key, best.similarity
        );

        if best.verdict == Verdict::Refresh {
            self.coordinator.schedule_refresh(&best.entry);
        }
        if let Err(e) = self
            .database
            .register_alias(&request.key, &best.entry.key)
            .await
        {
            warn!(
                "Could not alias {} to {}: {}",
                request.key, best.entry.key, e
            );
        }

        Ok(Some(best.entry))
    }

    /// Entries related to `lemma` in the same language, most similar first.
    /// Never generates.
    #[inline]
    pub async fn find_similar(
        &self,
        lemma: &str,
        language: &str,
        context: &str,
        options: &SimilarOptions,
    ) -> Result<Vec<SimilarEntry>> {
        let key = EntryKey::new(lemma, language)?;
        let min_similarity = options
            .min_similarity
            .unwrap_or(self.settings.related_threshold);
        if !(-1.0..=1.0).contains(&min_similarity) {
            return Err(VocabError::InvalidRequest(format!(
                "min similarity {min_similarity} is outside [-1, 1]"
            )));
        }
        if options.top_k == 0 || self.index.is_empty() {
            return Ok(Vec::new());
        }

        let profile_entries = match options.profile_id {
            Some(profile_id) => {
                self.database.get_learning_profile(profile_id).await?;
                Some(self.database.profile_entry_ids(profile_id).await?)
            }
            None => None,
        };

        let text = embedding_text(&key.lemma, &normalize_context(context));
        let embedding =
            with_deadline(self.settings.embedding_timeout, self.embedder.embed(&text)).await?;

        // Profile membership is checked after hydration, so search everything
        // and cut down afterwards
        let search_k = if profile_entries.is_some() {
            usize::MAX
        } else {
            options.top_k
        };
        let neighbors = self.index.query_where(
            &embedding.vector,
            search_k,
            min_similarity,
            |candidate| candidate.language == key.language && *candidate != key,
        )?;

        let hydrated = join_all(neighbors.iter().map(|neighbor| self.hydrate(&neighbor.key))).await;

        let mut similar = Vec::new();
        for (neighbor, entry) in neighbors.iter().zip(hydrated) {
            let Some(entry) = entry? else {
                continue;
            };
            if let Some(ids) = &profile_entries {
                if !ids.contains(&entry.id) {
                    continue;
                }
            }
            similar.push(SimilarEntry {
                entry,
                similarity: neighbor.similarity,
            });
            if similar.len() == options.top_k {
                break;
            }
        }

        Ok(similar)
    }

    /// Load the entry behind an index hit. A hit with no stored entry is
    /// dropped from the index.
    async fn hydrate(&self, key: &EntryKey) -> Result<Option<Entry>> {
        let entry = self.database.get_entry_exact(key).await?;
        if entry.is_none() {
            self.index.remove(key);
            self.coordinator.record_stale_hit();
            warn!("Index referenced {} which is no longer stored; removed it", key);
        }
        Ok(entry)
    }
}

/// Highest similarity wins; among candidates within `epsilon` of the best,
/// the most recently updated entry wins.
fn pick_best(mut candidates: Vec<Candidate>, epsilon: f32) -> Option<Candidate> {
    candidates.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    let top = candidates.first()?.similarity;

    let mut best: Option<Candidate> = None;
    for candidate in candidates
        .into_iter()
        .take_while(|c| top - c.similarity <= epsilon)
    {
        let newer = best
            .as_ref()
            .is_none_or(|b| updated_at(&candidate) > updated_at(b));
        if newer {
            best = Some(candidate);
        }
    }
    best
}

fn updated_at(candidate: &Candidate) -> DateTime<Utc> {
    candidate.entry.updated_at
}
