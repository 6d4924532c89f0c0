
use chrono::Duration;

use crate::cache::RequestContext;
use crate::database::sqlite::models::Entry;

/// What to do with a cached entry for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    /// Serve as is, no external calls.
    Reuse,
    /// Serve now, recompute the embedding in the background.
    Refresh,
    /// Unusable for comparison; generate again.
    Regenerate,
}

/// Pure staleness decision over an entry's embedding metadata.
///
/// "Now" is the request's timestamp, so the same entry and request always
/// produce the same verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalenessPolicy {
    current_model: String,
    max_embedding_age: Option<Duration>,
}

impl StalenessPolicy {
    #[inline]
    pub fn new(current_model: impl Into<String>, max_embedding_age: Option<Duration>) -> Self {
        Self {
            current_model: current_model.into(),
            max_embedding_age,
        }
    }

    #[inline]
    pub fn current_model(&self) -> &str {
        &self.current_model
    }

    #[inline]
    pub fn max_embedding_age(&self) -> Option<Duration> {
        self.max_embedding_age
    }

    #[inline]
    pub fn decide(&self, entry: &Entry, request: &RequestContext) -> Verdict {
        let Some(embedding) = &entry.embedding else {
            // Content is usable; only the vector is missing
            return Verdict::Refresh;
        };

        if embedding.model != self.current_model {
            return Verdict::Regenerate;
        }

        match self.max_embedding_age {
            Some(max_age) if request.requested_at - embedding.updated_at > max_age => {
                Verdict::Refresh
            }
            _ => Verdict::Reuse,
        }
    }
}
