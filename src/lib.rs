use std::time::Duration;

use thiserror::Error;

use crate::database::sqlite::models::ConflictReason;
use crate::index::IndexError;

pub type Result<T> = std::result::Result<T, VocabError>;

#[derive(Error, Debug)]
pub enum VocabError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(ConflictReason),

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("External call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl VocabError {
    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, VocabError::NotFound(_))
    }
}

pub mod cache;
pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod generation;
pub mod index;
pub mod ollama;
