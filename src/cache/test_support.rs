// Scripted collaborators for cache tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempfile::TempDir;

use crate::cache::VocabCache;
use crate::config::Config;
use crate::database::sqlite::Database;
use crate::database::sqlite::models::{EntryKey, NewChild, NewEntry, StoredEmbedding};
use crate::embeddings::{Embedder, Embedding};
use crate::generation::{GeneratedContent, GenerationRequest, Generator};
use crate::{Result, VocabError};

pub const DIMENSION: usize = 16;
pub const MODEL: &str = "fake-embed-v1";

/// Axes below this are reserved for vectors a test assigns explicitly.
const SCRIPTED_AXES: usize = 4;

/// Embedder with scripted vectors. Unscripted texts get their own one-hot
/// axis, so they never look similar to anything else.
pub struct FakeEmbedder {
    model: String,
    vectors: Mutex<HashMap<String, Vec<f32>>>,
    next_axis: AtomicUsize,
    calls: AtomicUsize,
    delay: Duration,
    failing: AtomicBool,
}

impl FakeEmbedder {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            vectors: Mutex::new(HashMap::new()),
            next_axis: AtomicUsize::new(SCRIPTED_AXES),
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            failing: AtomicBool::new(false),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_vector(self, text: &str, vector: Vec<f32>) -> Self {
        self.set_vector(text, vector);
        self
    }

    pub fn set_vector(&self, text: &str, vector: Vec<f32>) {
        self.vectors
            .lock()
            .expect("vector map should not be poisoned")
            .insert(text.to_string(), vector);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut vectors = self.vectors.lock().expect("vector map should not be poisoned");
        vectors
            .entry(text.to_string())
            .or_insert_with(|| {
                let axis = self.next_axis.fetch_add(1, Ordering::SeqCst);
                assert!(axis < DIMENSION, "fake embedder ran out of axes");
                let mut vector = vec![0.0; DIMENSION];
                vector[axis] = 1.0;
                vector
            })
            .clone()
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(VocabError::GenerationFailed("fake embedder is down".to_string()));
        }
        Ok(Embedding {
            vector: self.vector_for(text),
            model: self.model.clone(),
        })
    }
}

/// Generator whose output is derived from the lemma.
pub struct FakeGenerator {
    calls: AtomicUsize,
    delay: Duration,
    failing: AtomicBool,
}

impl FakeGenerator {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            failing: AtomicBool::new(false),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for FakeGenerator {
    fn model_id(&self) -> &str {
        "fake-gen"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedContent> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(VocabError::GenerationFailed("fake generator is down".to_string()));
        }
        GeneratedContent {
            translations: vec![format!("{}-{}", request.lemma, request.target_language)],
            definitions: vec![format!("definition of {}", request.lemma)],
            examples: vec![format!("{} in a sentence", request.lemma)],
        }
        .validated()
    }
}

pub async fn create_test_database() -> (TempDir, Database) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let database = Database::initialize_from_config_dir(temp_dir.path())
        .await
        .expect("should open database");
    (temp_dir, database)
}

pub fn key(lemma: &str, language: &str) -> EntryKey {
    EntryKey::new(lemma, language).expect("should build key")
}

/// One-hot-ish vector on the scripted axes.
pub fn axis_vector(weights: &[f32]) -> Vec<f32> {
    let mut vector = vec![0.0; DIMENSION];
    vector[..weights.len()].copy_from_slice(weights);
    vector
}

pub fn stored_entry(
    key: EntryKey,
    context: &str,
    embedding: Option<(Vec<f32>, &str, DateTime<Utc>)>,
) -> NewEntry {
    NewEntry {
        context_text: context.to_string(),
        embedding: embedding.map(|(vector, model, updated_at)| StoredEmbedding {
            vector,
            model: model.to_string(),
            updated_at,
        }),
        translations: vec![NewChild::new("ru", format!("{}-ru", key.lemma))],
        definitions: vec![NewChild::new(&key.language, format!("stored {}", key.lemma))],
        examples: Vec::new(),
        key,
    }
}

pub struct Harness {
    pub cache: VocabCache,
    pub generator: Arc<FakeGenerator>,
    pub embedder: Arc<FakeEmbedder>,
    _temp_dir: TempDir,
}

/// Assemble a cache over a fresh store. `seed` runs against the store before
/// the index is built from it.
pub async fn harness<F, Fut>(
    generator: FakeGenerator,
    embedder: FakeEmbedder,
    configure: impl FnOnce(&mut Config),
    seed: F,
) -> Harness
where
    F: FnOnce(Database) -> Fut,
    Fut: Future<Output = ()>,
{
    let (temp_dir, database) = create_test_database().await;
    seed(database.clone()).await;

    let mut config = Config::with_base_dir(temp_dir.path());
    configure(&mut config);

    let generator = Arc::new(generator);
    let embedder = Arc::new(embedder);
    let cache = VocabCache::with_backends(
        config,
        database,
        Arc::clone(&generator) as Arc<dyn Generator>,
        Arc::clone(&embedder) as Arc<dyn Embedder>,
    )
    .await
    .expect("should assemble cache");

    Harness {
        cache,
        generator,
        embedder,
        _temp_dir: temp_dir,
    }
}

pub fn no_seed(_database: Database) -> std::future::Ready<()> {
    std::future::ready(())
}
