// In-memory nearest-neighbour index over entry embeddings.
// Derived from the entry store and rebuildable from it at any time.

#[cfg(test)]
mod tests;

pub mod consistency;

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::database::sqlite::models::{EntryKey, EntryVector};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    #[error("expected a {expected}-dimensional vector, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("cannot index a zero-length vector")]
    ZeroVector,
    #[error("vector contains NaN or infinite components")]
    NonFinite,
}

/// One query hit. Similarity is cosine, in `[-1.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub key: EntryKey,
    pub similarity: f32,
}

/// Outcome of a full rebuild from the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildSummary {
    pub indexed: usize,
    pub without_embedding: usize,
    pub other_model: usize,
    pub invalid: usize,
    /// Upserts and removals kept because they happened after the snapshot
    pub written_during_rebuild: usize,
}

/// Point in the index's write history. Taken before a store snapshot is read
/// so [`VectorIndex::rebuild`] can tell which writes the snapshot predates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct IndexMark(u64);

#[derive(Debug)]
struct Slot {
    key: EntryKey,
    vector: Vec<f32>,
    /// Version of the write that stored this vector; 0 for rebuilt slots
    written: u64,
}

#[derive(Debug, Default)]
struct IndexState {
    version: u64,
    next_seq: u64,
    // Ordered by first insertion; this ordering breaks similarity ties
    slots: BTreeMap<u64, Slot>,
    positions: HashMap<EntryKey, u64>,
    /// Version at which each key was last removed
    removed: HashMap<EntryKey, u64>,
}

impl IndexState {
    fn write(&mut self, key: &EntryKey, vector: Vec<f32>) {
        self.version += 1;
        let written = self.version;
        self.insert(key, vector, written);
    }

    fn insert(&mut self, key: &EntryKey, vector: Vec<f32>, written: u64) {
        self.removed.remove(key);
        if let Some(seq) = self.positions.get(key) {
            if let Some(slot) = self.slots.get_mut(seq) {
                slot.vector = vector;
                slot.written = written;
                return;
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.slots.insert(
            seq,
            Slot {
                key: key.clone(),
                vector,
                written,
            },
        );
        self.positions.insert(key.clone(), seq);
    }

    fn remove(&mut self, key: &EntryKey) -> bool {
        self.version += 1;
        self.removed.insert(key.clone(), self.version);
        self.detach(key)
    }

    fn detach(&mut self, key: &EntryKey) -> bool {
        match self.positions.remove(key) {
            Some(seq) => {
                self.slots.remove(&seq);
                true
            }
            None => false,
        }
    }
}

/// Exact cosine index bound to a single embedding model and dimension.
///
/// Vectors are L2-normalised on the way in, so a query is one dot product per
/// stored key. Vectors from different models never share an index.
#[derive(Debug)]
pub struct VectorIndex {
    model: String,
    dimension: usize,
    state: RwLock<IndexState>,
}

impl VectorIndex {
    #[inline]
    pub fn new(model: impl Into<String>, dimension: usize) -> Self {
        Self {
            model: model.into(),
            dimension,
            state: RwLock::new(IndexState::default()),
        }
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Insert or replace the vector for `key`. A replaced key keeps its original
    /// insertion position.
    #[inline]
    pub fn upsert(&self, key: &EntryKey, vector: &[f32]) -> Result<(), IndexError> {
        let normalized = self.normalize(vector)?;
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.write(key, normalized);
        Ok(())
    }

    /// Remove the vector for `key`. Returns whether anything was removed.
    #[inline]
    pub fn remove(&self, key: &EntryKey) -> bool {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    #[inline]
    pub fn contains(&self, key: &EntryKey) -> bool {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.positions.contains_key(key)
    }

    #[inline]
    pub fn len(&self) -> usize {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Indexed keys in insertion order.
    #[inline]
    pub fn keys(&self) -> Vec<EntryKey> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.slots.values().map(|slot| slot.key.clone()).collect()
    }

    #[inline]
    pub fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        min_similarity: f32,
    ) -> Result<Vec<Neighbor>, IndexError> {
        self.query_where(vector, top_k, min_similarity, |_| true)
    }

    /// Top-k neighbours with similarity at or above `min_similarity`, restricted
    /// to keys accepted by `filter`. Results are ordered by descending
    /// similarity; equal similarities keep insertion order.
    #[inline]
    pub fn query_where<F>(
        &self,
        vector: &[f32],
        top_k: usize,
        min_similarity: f32,
        filter: F,
    ) -> Result<Vec<Neighbor>, IndexError>
    where
        F: Fn(&EntryKey) -> bool,
    {
        let query = self.normalize(vector)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut hits: Vec<Neighbor> = state
            .slots
            .values()
            .filter(|slot| filter(&slot.key))
            .filter_map(|slot| {
                let similarity = dot(&query, &slot.vector).clamp(-1.0, 1.0);
                (similarity >= min_similarity).then(|| Neighbor {
                    key: slot.key.clone(),
                    similarity,
                })
            })
            .collect();
        drop(state);

        // sort_by is stable, so ties stay in insertion order
        hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        hits.truncate(top_k);
        Ok(hits)
    }

    /// Current write position, to be taken before reading the store snapshot
    /// passed to [`rebuild`](Self::rebuild).
    #[inline]
    pub fn mark(&self) -> IndexMark {
        IndexMark(
            self.state
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .version,
        )
    }

    /// Replace the whole index with the store's embeddings. Only vectors
    /// produced by this index's model are loaded.
    ///
    /// `vectors` must have been read after `mark` was taken. Upserts and
    /// removals made since `mark` are newer than the snapshot and win over it.
    #[inline]
    pub fn rebuild(&self, mark: IndexMark, vectors: &[EntryVector]) -> RebuildSummary {
        let mut summary = RebuildSummary::default();
        let mut fresh = IndexState::default();

        for entry in vectors {
            let Some(embedding) = &entry.embedding else {
                summary.without_embedding += 1;
                continue;
            };

            if embedding.model != self.model {
                summary.other_model += 1;
                continue;
            }

            match self.normalize(&embedding.vector) {
                Ok(normalized) => {
                    fresh.insert(&entry.key, normalized, 0);
                    summary.indexed += 1;
                }
                Err(e) => {
                    warn!("Skipping embedding of {} during rebuild: {}", entry.key, e);
                    summary.invalid += 1;
                }
            }
        }

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        for slot in state.slots.values().filter(|slot| slot.written > mark.0) {
            fresh.insert(&slot.key, slot.vector.clone(), slot.written);
            summary.written_during_rebuild += 1;
        }
        for (key, removed_at) in &state.removed {
            if *removed_at > mark.0 {
                fresh.detach(key);
                fresh.removed.insert(key.clone(), *removed_at);
                summary.written_during_rebuild += 1;
            }
        }
        fresh.version = state.version;
        *state = fresh;
        drop(state);

        info!(
            "Rebuilt vector index for model {}: {} indexed, {} without embedding, {} from other models, {} invalid, {} newer writes kept",
            self.model,
            summary.indexed,
            summary.without_embedding,
            summary.other_model,
            summary.invalid,
            summary.written_during_rebuild
        );
        summary
    }

    fn normalize(&self, vector: &[f32]) -> Result<Vec<f32>, IndexError> {
        if vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(IndexError::NonFinite);
        }

        let norm = dot(vector, vector).sqrt();
        if norm == 0.0 {
            debug!("Rejected zero vector");
            return Err(IndexError::ZeroVector);
        }

        Ok(vector.iter().map(|v| v / norm).collect())
    }
}

#[inline]
fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Cosine similarity of two raw vectors. Returns 0.0 when either is zero or
/// the lengths differ.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let norms = dot(a, a).sqrt() * dot(b, b).sqrt();
    if norms == 0.0 {
        return 0.0;
    }
    (dot(a, b) / norms).clamp(-1.0, 1.0)
}
