
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{RequestContext, StalenessPolicy, Verdict, embedding_text};
use crate::config::CacheConfig;
use crate::database::sqlite::Database;
use crate::database::sqlite::models::{
    ConflictReason, Entry, EntryKey, NewChild, NewEntry, StoredEmbedding,
};
use crate::embeddings::{Embedder, Embedding};
use crate::generation::{GeneratedContent, GenerationRequest, Generator};
use crate::index::VectorIndex;
use crate::{Result, VocabError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorSettings {
    pub generation_timeout: Duration,
    pub embedding_timeout: Duration,
    /// Also embed translations, definitions and examples
    pub embed_children: bool,
}

impl From<&CacheConfig> for CoordinatorSettings {
    #[inline]
    fn from(config: &CacheConfig) -> Self {
        Self {
            generation_timeout: config.generation_timeout(),
            embedding_timeout: config.embedding_timeout(),
            embed_children: config.embed_children,
        }
    }
}

impl Default for CoordinatorSettings {
    #[inline]
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

/// Failure shared by every caller attached to one ticket.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveFailure {
    #[error("generation failed: {0}")]
    GenerationFailed(String),
    #[error("external call timed out after {0:?}")]
    Timeout(Duration),
    #[error("conflict: {0}")]
    Conflict(ConflictReason),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("store error: {0}")]
    Store(String),
}

impl From<VocabError> for ResolveFailure {
    #[inline]
    fn from(error: VocabError) -> Self {
        match error {
            VocabError::GenerationFailed(message) => Self::GenerationFailed(message),
            VocabError::Timeout(deadline) => Self::Timeout(deadline),
            VocabError::Conflict(reason) => Self::Conflict(reason),
            VocabError::InvalidRequest(message) => Self::InvalidRequest(message),
            VocabError::Database(message) => Self::Store(message),
            other => Self::Store(other.to_string()),
        }
    }
}

impl From<ResolveFailure> for VocabError {
    #[inline]
    fn from(failure: ResolveFailure) -> Self {
        match failure {
            ResolveFailure::GenerationFailed(message) => Self::GenerationFailed(message),
            ResolveFailure::Timeout(deadline) => Self::Timeout(deadline),
            ResolveFailure::Conflict(reason) => Self::Conflict(reason),
            ResolveFailure::InvalidRequest(message) => Self::InvalidRequest(message),
            ResolveFailure::Store(message) => Self::Database(message),
        }
    }
}

type Outcome = std::result::Result<Entry, ResolveFailure>;
type Ticket = watch::Receiver<Option<Outcome>>;

/// Point-in-time copy of the coordinator counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub generations_started: u64,
    pub generations_failed: u64,
    pub waiters_attached: u64,
    pub refreshes_started: u64,
    pub stale_index_hits: u64,
}

#[derive(Debug, Default)]
struct Counters {
    generations_started: AtomicU64,
    generations_failed: AtomicU64,
    waiters_attached: AtomicU64,
    refreshes_started: AtomicU64,
    stale_index_hits: AtomicU64,
}

struct Shared {
    database: Database,
    index: Arc<VectorIndex>,
    generator: Arc<dyn Generator>,
    embedder: Arc<dyn Embedder>,
    policy: StalenessPolicy,
    settings: CoordinatorSettings,
    tickets: Mutex<HashMap<EntryKey, Ticket>>,
    refreshes: Mutex<HashSet<EntryKey>>,
    counters: Counters,
}

/// Guarantees at most one in-flight generation per key.
///
/// The first caller for a key opens a ticket and spawns the generation as
/// its own task; later callers attach to the ticket and receive the same
/// outcome. The entry is committed to the store and the index before the
/// ticket is closed, and nothing is committed on failure or timeout.
pub struct GenerationCoordinator {
    shared: Arc<Shared>,
}

impl GenerationCoordinator {
    #[inline]
    pub fn new(
        database: Database,
        index: Arc<VectorIndex>,
        generator: Arc<dyn Generator>,
        embedder: Arc<dyn Embedder>,
        policy: StalenessPolicy,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                database,
                index,
                generator,
                embedder,
                policy,
                settings,
                tickets: Mutex::new(HashMap::new()),
                refreshes: Mutex::new(HashSet::new()),
                counters: Counters::default(),
            }),
        }
    }

    #[inline]
    pub async fn resolve(&self, request: &RequestContext) -> Result<Entry> {
        self.resolve_with_embedding(request, None).await
    }

    /// Like [`resolve`](Self::resolve), reusing an embedding the caller already
    /// computed for `embedding_text(lemma, context)` if this call opens the ticket.
    #[inline]
    pub async fn resolve_with_embedding(
        &self,
        request: &RequestContext,
        query_embedding: Option<Embedding>,
    ) -> Result<Entry> {
        let mut ticket = self.ticket_for(request, query_embedding);

        let outcome: Option<Outcome> = ticket
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|value| (*value).clone());

        match outcome {
            Some(Ok(entry)) => Ok(entry),
            Some(Err(failure)) => Err(failure.into()),
            None => Err(VocabError::GenerationFailed(format!(
                "generation of {} ended without a result",
                request.key
            ))),
        }
    }

    /// Attach to the open ticket for the key, or open one and start generating.
    /// Check and insert happen under one lock.
    fn ticket_for(&self, request: &RequestContext, query_embedding: Option<Embedding>) -> Ticket {
        let (sender, ticket) = {
            let mut tickets = self
                .shared
                .tickets
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            if let Some(existing) = tickets.get(&request.key) {
                let existing = existing.clone();
                drop(tickets);
                self.shared
                    .counters
                    .waiters_attached
                    .fetch_add(1, Ordering::Relaxed);
                debug!("Attached to in-flight generation of {}", request.key);
                return existing;
            }

            let (sender, ticket) = watch::channel(None);
            tickets.insert(request.key.clone(), ticket.clone());
            (sender, ticket)
        };

        self.shared
            .counters
            .generations_started
            .fetch_add(1, Ordering::Relaxed);
        info!("Opened generation ticket for {}", request.key);

        let shared = Arc::clone(&self.shared);
        let request = request.clone();
        tokio::spawn(async move {
            let guard = TicketGuard {
                shared: Arc::clone(&shared),
                key: request.key.clone(),
            };

            let outcome = shared
                .generate_and_commit(&request, query_embedding)
                .await
                .map_err(ResolveFailure::from);

            if let Err(failure) = &outcome {
                shared
                    .counters
                    .generations_failed
                    .fetch_add(1, Ordering::Relaxed);
                warn!("Generation of {} failed: {}", request.key, failure);
            }

            // Close the ticket first so a caller arriving after a failure
            // starts a fresh attempt instead of attaching to a finished one
            drop(guard);
            sender.send_replace(Some(outcome));
        });

        ticket
    }

    /// Recompute the embedding of a usable entry in the background. At most
    /// one refresh per key runs at a time; returns `None` if one already is.
    #[inline]
    pub fn schedule_refresh(&self, entry: &Entry) -> Option<JoinHandle<()>> {
        let key = entry.key.clone();
        {
            let mut refreshes = self
                .shared
                .refreshes
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if !refreshes.insert(key.clone()) {
                debug!("Embedding refresh of {} already running", key);
                return None;
            }
        }

        self.shared
            .counters
            .refreshes_started
            .fetch_add(1, Ordering::Relaxed);
        debug!("Scheduled embedding refresh of {}", key);

        let shared = Arc::clone(&self.shared);
        let context_text = entry.context_text.clone();
        Some(tokio::spawn(async move {
            let _guard = RefreshGuard {
                shared: Arc::clone(&shared),
                key: key.clone(),
            };

            match shared.refresh_embedding(&key, &context_text).await {
                Ok(()) => info!("Refreshed embedding of {}", key),
                Err(e) => warn!("Embedding refresh of {} failed: {}", key, e),
            }
        }))
    }

    /// Count an index hit whose key is no longer in the store.
    #[inline]
    pub fn record_stale_hit(&self) {
        self.shared
            .counters
            .stale_index_hits
            .fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn stats(&self) -> CoordinatorStats {
        let counters = &self.shared.counters;
        CoordinatorStats {
            generations_started: counters.generations_started.load(Ordering::Relaxed),
            generations_failed: counters.generations_failed.load(Ordering::Relaxed),
            waiters_attached: counters.waiters_attached.load(Ordering::Relaxed),
            refreshes_started: counters.refreshes_started.load(Ordering::Relaxed),
            stale_index_hits: counters.stale_index_hits.load(Ordering::Relaxed),
        }
    }

    /// Number of open generation tickets.
    #[inline]
    pub fn in_flight(&self) -> usize {
        self.shared
            .tickets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[inline]
    pub fn refreshes_in_flight(&self) -> usize {
        self.shared
            .refreshes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[inline]
    pub fn settings(&self) -> CoordinatorSettings {
        self.shared.settings
    }
}

impl Shared {
    async fn generate_and_commit(
        &self,
        request: &RequestContext,
        query_embedding: Option<Embedding>,
    ) -> Result<Entry> {
        // A previous ticket may have committed this key after the caller's miss
        if let Some(entry) = self.database.get_entry_exact(&request.key).await? {
            if self.policy.decide(&entry, request) != Verdict::Regenerate {
                debug!("{} is already committed; skipping generation", request.key);
                return Ok(entry);
            }
        }

        // Both languages must exist before the generator is paid for
        self.database
            .require_languages(&[
                request.key.language.as_str(),
                request.target_language.as_str(),
            ])
            .await?;

        let generation = GenerationRequest {
            lemma: request.key.lemma.clone(),
            language: request.key.language.clone(),
            target_language: request.target_language.clone(),
            context: request.context_text.clone(),
        };

        debug!("Calling generator {} for {}", self.generator.model_id(), request.key);
        let content = with_deadline(
            self.settings.generation_timeout,
            self.generator.generate(&generation),
        )
        .await?;

        let embedding = match query_embedding.filter(|e| e.model == self.embedder.model_id()) {
            Some(embedding) => embedding,
            None => {
                let text = embedding_text(&request.key.lemma, &request.context_text);
                with_deadline(self.settings.embedding_timeout, self.embedder.embed(&text)).await?
            }
        };
        self.check_embedding(&embedding)?;

        let now = Utc::now();
        let mut new_entry = build_entry(request, content, &embedding, now);
        if self.settings.embed_children {
            self.embed_children(&mut new_entry, now).await?;
        }

        let entry = self.database.commit_generated(&new_entry).await?;
        if let Err(e) = self.index.upsert(&entry.key, &embedding.vector) {
            warn!("Committed {} but could not index it: {}", entry.key, e);
        }

        Ok(entry)
    }

    async fn embed_children(&self, entry: &mut NewEntry, now: DateTime<Utc>) -> Result<()> {
        let texts: Vec<String> = entry
            .translations
            .iter()
            .chain(&entry.definitions)
            .chain(&entry.examples)
            .map(|child| child.text.clone())
            .collect();
        if texts.is_empty() {
            return Ok(());
        }

        let embeddings = with_deadline(
            self.settings.embedding_timeout,
            self.embedder.embed_batch(&texts),
        )
        .await?;

        if embeddings.len() != texts.len() {
            return Err(VocabError::GenerationFailed(format!(
                "Embedder returned {} vectors for {} children",
                embeddings.len(),
                texts.len()
            )));
        }

        let children = entry
            .translations
            .iter_mut()
            .chain(entry.definitions.iter_mut())
            .chain(entry.examples.iter_mut());
        for (child, embedding) in children.zip(embeddings) {
            self.check_embedding(&embedding)?;
            child.embedding = Some(StoredEmbedding {
                vector: embedding.vector,
                model: embedding.model,
                updated_at: now,
            });
        }

        Ok(())
    }

    async fn refresh_embedding(&self, key: &EntryKey, context_text: &str) -> Result<()> {
        let text = embedding_text(&key.lemma, context_text);
        let embedding =
            with_deadline(self.settings.embedding_timeout, self.embedder.embed(&text)).await?;
        self.check_embedding(&embedding)?;

        self.database
            .update_embedding(key, &embedding.vector, &embedding.model, Utc::now())
            .await?;

        if let Err(e) = self.index.upsert(key, &embedding.vector) {
            warn!("Refreshed {} but could not index it: {}", key, e);
        }
        Ok(())
    }

    fn check_embedding(&self, embedding: &Embedding) -> Result<()> {
        if embedding.vector.len() != self.index.dimension() {
            return Err(VocabError::GenerationFailed(format!(
                "Embedder returned a {}-dimensional vector, expected {}",
                embedding.vector.len(),
                self.index.dimension()
            )));
        }
        if embedding.vector.iter().any(|v| !v.is_finite()) || embedding.vector.iter().all(|v| *v == 0.0)
        {
            return Err(VocabError::GenerationFailed(
                "Embedder returned a degenerate vector".to_string(),
            ));
        }
        Ok(())
    }
}

fn build_entry(
    request: &RequestContext,
    content: GeneratedContent,
    embedding: &Embedding,
    now: DateTime<Utc>,
) -> NewEntry {
    let children = |language: &str, texts: Vec<String>| -> Vec<NewChild> {
        texts
            .into_iter()
            .map(|text| NewChild::new(language, text))
            .collect()
    };

    NewEntry {
        key: request.key.clone(),
        context_text: request.context_text.clone(),
        embedding: Some(StoredEmbedding {
            vector: embedding.vector.clone(),
            model: embedding.model.clone(),
            updated_at: now,
        }),
        translations: children(&request.target_language, content.translations),
        definitions: children(&request.key.language, content.definitions),
        examples: children(&request.key.language, content.examples),
    }
}

/// Bound an external call by `deadline`, mapping expiry to `VocabError::Timeout`.
pub(crate) async fn with_deadline<T, F>(deadline: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(deadline, call)
        .await
        .map_err(|_| VocabError::Timeout(deadline))?
}

struct TicketGuard {
    shared: Arc<Shared>,
    key: EntryKey,
}

impl Drop for TicketGuard {
    fn drop(&mut self) {
        self.shared
            .tickets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

struct RefreshGuard {
    shared: Arc<Shared>,
    key: EntryKey,
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        self.shared
            .refreshes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}
