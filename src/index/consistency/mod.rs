// Consistency validation between the entry store and the vector index.
// The store always wins; repair rebuilds the index from it.


use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::Result;
use crate::database::sqlite::Database;
use crate::database::sqlite::models::EntryKey;
use crate::index::{RebuildSummary, VectorIndex};

/// Consistency check results between the store and the index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyReport {
    /// Number of entries in the store
    pub store_entries: usize,
    /// Number of vectors in the index
    pub indexed_vectors: usize,
    /// Keys with a current-model embedding in the store but no vector in the index
    pub missing_in_index: Vec<EntryKey>,
    /// Keys in the index with no current-model embedding in the store
    pub orphaned_in_index: Vec<EntryKey>,
    /// Entries whose embedding came from a different model and needs regeneration
    pub other_model: Vec<EntryKey>,
    /// Entries with no embedding at all
    pub without_embedding: Vec<EntryKey>,
    pub is_consistent: bool,
}

impl ConsistencyReport {
    #[inline]
    pub fn total_issues(&self) -> usize {
        self.missing_in_index.len() + self.orphaned_in_index.len()
    }

    #[inline]
    pub fn summary(&self) -> String {
        if self.is_consistent {
            format!(
                "Index is consistent: {} entries, {} indexed vectors ({} from other models, {} without embedding)",
                self.store_entries,
                self.indexed_vectors,
                self.other_model.len(),
                self.without_embedding.len()
            )
        } else {
            format!(
                "Index inconsistencies found: {} missing in index, {} orphaned in index ({} entries, {} indexed vectors)",
                self.missing_in_index.len(),
                self.orphaned_in_index.len(),
                self.store_entries,
                self.indexed_vectors
            )
        }
    }
}

pub struct ConsistencyValidator<'a> {
    database: &'a Database,
    index: &'a VectorIndex,
}

impl<'a> ConsistencyValidator<'a> {
    #[inline]
    pub fn new(database: &'a Database, index: &'a VectorIndex) -> Self {
        Self { database, index }
    }

    #[inline]
    pub async fn validate_consistency(&self) -> Result<ConsistencyReport> {
        info!("Starting store/index consistency validation");

        let vectors = self.database.list_entry_embeddings().await?;
        debug!("Found {} entries in the store", vectors.len());

        let mut expected: Vec<EntryKey> = Vec::new();
        let mut other_model = Vec::new();
        let mut without_embedding = Vec::new();

        for entry in &vectors {
            match &entry.embedding {
                Some(embedding) if embedding.model == self.index.model() => {
                    expected.push(entry.key.clone());
                }
                Some(_) => other_model.push(entry.key.clone()),
                None => without_embedding.push(entry.key.clone()),
            }
        }

        let indexed = self.index.keys();
        debug!("Found {} vectors in the index", indexed.len());

        let indexed_set: HashSet<&EntryKey> = indexed.iter().collect();
        let expected_set: HashSet<&EntryKey> = expected.iter().collect();

        let missing_in_index: Vec<EntryKey> = expected
            .iter()
            .filter(|k| !indexed_set.contains(k))
            .cloned()
            .collect();
        let orphaned_in_index: Vec<EntryKey> = indexed
            .iter()
            .filter(|k| !expected_set.contains(k))
            .cloned()
            .collect();

        let is_consistent = missing_in_index.is_empty() && orphaned_in_index.is_empty();

        let report = ConsistencyReport {
            store_entries: vectors.len(),
            indexed_vectors: indexed.len(),
            missing_in_index,
            orphaned_in_index,
            other_model,
            without_embedding,
            is_consistent,
        };

        if report.is_consistent {
            info!("Store/index consistency validation passed");
        } else {
            warn!("{}", report.summary());
            for key in &report.missing_in_index {
                debug!("Missing in index: {}", key);
            }
            for key in &report.orphaned_in_index {
                debug!("Orphaned in index: {}", key);
            }
        }

        Ok(report)
    }

    /// Rebuild the index from the store.
    #[inline]
    pub async fn repair(&self) -> Result<RebuildSummary> {
        info!("Repairing vector index by full rebuild");
        let mark = self.index.mark();
        let vectors = self.database.list_entry_embeddings().await?;
        Ok(self.index.rebuild(mark, &vectors))
    }
}
