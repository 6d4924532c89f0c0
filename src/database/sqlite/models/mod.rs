#[cfg(test)]
mod tests;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;

use crate::{Result, VocabError};

/// Normalized cache key: one lemma per language.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryKey {
    pub lemma: String,
    pub language: String,
}

impl EntryKey {
    /// Build a key from raw caller input, case-folding and trimming both parts.
    #[inline]
    pub fn new(lemma: &str, language: &str) -> Result<Self> {
        let lemma = normalize_lemma(lemma);
        if lemma.is_empty() {
            return Err(VocabError::InvalidRequest(
                "lemma cannot be empty".to_string(),
            ));
        }

        let language = normalize_language(language);
        if language.is_empty() {
            return Err(VocabError::InvalidRequest(
                "language code cannot be empty".to_string(),
            ));
        }

        Ok(Self { lemma, language })
    }
}

impl std::fmt::Display for EntryKey {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.lemma, self.language)
    }
}

#[inline]
pub fn normalize_lemma(lemma: &str) -> String {
    lemma.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

#[inline]
pub fn normalize_language(code: &str) -> String {
    code.trim().to_lowercase()
}

/// An embedding vector together with the model that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEmbedding {
    pub vector: Vec<f32>,
    pub model: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChildKind {
    Translation,
    Definition,
    Example,
}

impl ChildKind {
    pub const ALL: [ChildKind; 3] = [
        ChildKind::Translation,
        ChildKind::Definition,
        ChildKind::Example,
    ];

    #[inline]
    pub fn table(self) -> &'static str {
        match self {
            ChildKind::Translation => "translations",
            ChildKind::Definition => "definitions",
            ChildKind::Example => "examples",
        }
    }
}

impl std::fmt::Display for ChildKind {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            ChildKind::Translation => write!(f, "translation"),
            ChildKind::Definition => write!(f, "definition"),
            ChildKind::Example => write!(f, "example"),
        }
    }
}

/// A translation, definition or example owned by exactly one entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildRecord {
    pub id: i64,
    pub entry_id: i64,
    pub language: String,
    pub position: i64,
    pub text: String,
    pub embedding: Option<StoredEmbedding>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: i64,
    pub key: EntryKey,
    /// Sense context the entry was generated for.
    pub context_text: String,
    pub embedding: Option<StoredEmbedding>,
    pub translations: Vec<ChildRecord>,
    pub definitions: Vec<ChildRecord>,
    pub examples: Vec<ChildRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entry {
    #[inline]
    pub fn embedding_model(&self) -> Option<&str> {
        self.embedding.as_ref().map(|e| e.model.as_str())
    }

    #[inline]
    pub fn embedding_updated_at(&self) -> Option<DateTime<Utc>> {
        self.embedding.as_ref().map(|e| e.updated_at)
    }

    #[inline]
    pub fn children(&self, kind: ChildKind) -> &[ChildRecord] {
        match kind {
            ChildKind::Translation => &self.translations,
            ChildKind::Definition => &self.definitions,
            ChildKind::Example => &self.examples,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewChild {
    pub language: String,
    pub text: String,
    pub embedding: Option<StoredEmbedding>,
}

impl NewChild {
    #[inline]
    pub fn new(language: &str, text: impl Into<String>) -> Self {
        Self {
            language: normalize_language(language),
            text: text.into(),
            embedding: None,
        }
    }
}

/// An entry and its first-class children, written in a single transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEntry {
    pub key: EntryKey,
    pub context_text: String,
    pub embedding: Option<StoredEmbedding>,
    pub translations: Vec<NewChild>,
    pub definitions: Vec<NewChild>,
    pub examples: Vec<NewChild>,
}

impl NewEntry {
    #[inline]
    pub fn children(&self, kind: ChildKind) -> &[NewChild] {
        match kind {
            ChildKind::Translation => &self.translations,
            ChildKind::Definition => &self.definitions,
            ChildKind::Example => &self.examples,
        }
    }
}

/// Embedding projection of one entry, used to (re)build the vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryVector {
    pub entry_id: i64,
    pub key: EntryKey,
    pub embedding: Option<StoredEmbedding>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Language {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLanguage {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct LearningProfile {
    pub id: i64,
    pub user_id: i64,
    pub primary_language: String,
    pub foreign_language: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLearningProfile {
    pub user_id: i64,
    pub primary_language: String,
    pub foreign_language: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct DictionaryMembership {
    pub id: i64,
    pub learning_profile_id: i64,
    pub entry_id: i64,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMembership {
    pub learning_profile_id: i64,
    pub entry_id: i64,
    pub notes: Option<String>,
}

/// Which uniqueness or integrity rule a write would have broken.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConflictReason {
    #[error("entry {0} already exists")]
    DuplicateEntry(EntryKey),
    #[error("entry {entry_id} is already in dictionary of profile {learning_profile_id}")]
    DuplicateMembership {
        learning_profile_id: i64,
        entry_id: i64,
    },
    #[error("user {user_id} already has a {primary}->{foreign} profile")]
    DuplicateProfile {
        user_id: i64,
        primary: String,
        foreign: String,
    },
    #[error("primary and foreign language must differ (both are '{0}')")]
    SameLanguagePair(String),
    #[error("unknown language '{0}'")]
    UnknownLanguage(String),
    #[error("language '{0}' already exists")]
    DuplicateLanguage(String),
    #[error("constraint violated: {0}")]
    Constraint(String),
}

// Raw rows. Languages are joined in so the rows carry codes, not ids.

#[derive(Debug, Clone, FromRow)]
pub(crate) struct EntryRow {
    pub id: i64,
    pub lemma: String,
    pub language_code: String,
    pub context_text: String,
    pub embedding: Option<Vec<u8>>,
    pub embedding_model: Option<String>,
    pub embedding_updated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct ChildRow {
    pub id: i64,
    pub entry_id: i64,
    pub language_code: String,
    pub position: i64,
    pub text: String,
    pub embedding: Option<Vec<u8>>,
    pub embedding_model: Option<String>,
    pub embedding_updated_at: Option<DateTime<Utc>>,
}

impl EntryRow {
    pub(crate) fn into_entry(
        self,
        translations: Vec<ChildRecord>,
        definitions: Vec<ChildRecord>,
        examples: Vec<ChildRecord>,
    ) -> Result<Entry> {
        let embedding = decode_embedding_columns(
            self.embedding,
            self.embedding_model,
            self.embedding_updated_at,
        )?;

        Ok(Entry {
            id: self.id,
            key: EntryKey {
                lemma: self.lemma,
                language: self.language_code,
            },
            context_text: self.context_text,
            embedding,
            translations,
            definitions,
            examples,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl TryFrom<ChildRow> for ChildRecord {
    type Error = VocabError;

    fn try_from(row: ChildRow) -> Result<Self> {
        let embedding =
            decode_embedding_columns(row.embedding, row.embedding_model, row.embedding_updated_at)?;

        Ok(ChildRecord {
            id: row.id,
            entry_id: row.entry_id,
            language: row.language_code,
            position: row.position,
            text: row.text,
            embedding,
        })
    }
}

pub(crate) fn decode_embedding_columns(
    blob: Option<Vec<u8>>,
    model: Option<String>,
    updated_at: Option<DateTime<Utc>>,
) -> Result<Option<StoredEmbedding>> {
    match (blob, model, updated_at) {
        (Some(blob), Some(model), Some(updated_at)) => Ok(Some(StoredEmbedding {
            vector: decode_vector(&blob)?,
            model,
            updated_at,
        })),
        // A vector without its model tag cannot be compared with anything
        _ => Ok(None),
    }
}

/// Little-endian f32 encoding used for the embedding BLOB columns.
#[inline]
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

#[inline]
pub fn decode_vector(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(VocabError::Database(format!(
            "Corrupt embedding blob of {} bytes",
            blob.len()
        )));
    }

    Ok(blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
