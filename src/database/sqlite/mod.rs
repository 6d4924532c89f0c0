use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite, Transaction};
use tracing::{debug, info, warn};

use crate::database::sqlite::models::{
    ConflictReason, DictionaryMembership, Entry, EntryKey, EntryVector, Language,
    LearningProfile, NewEntry, NewLanguage, NewLearningProfile, NewMembership,
};
use crate::database::sqlite::queries::{
    AliasQueries, EntryQueries, LanguageQueries, MembershipQueries, ProfileQueries,
};
use crate::{Result, VocabError};

#[cfg(test)]
mod tests;

pub mod models;
pub mod queries;

pub type DbPool = Pool<Sqlite>;

/// Map a sqlx error onto the crate taxonomy. Constraint violations are conflicts.
pub(crate) fn map_sqlx_error(error: sqlx::Error, context: &str) -> VocabError {
    if let sqlx::Error::Database(db_error) = &error {
        if db_error.is_unique_violation()
            || db_error.is_foreign_key_violation()
            || db_error.is_check_violation()
        {
            return VocabError::Conflict(ConflictReason::Constraint(format!(
                "{}: {}",
                context,
                db_error.message()
            )));
        }
    }
    VocabError::Database(format!("{context}: {error}"))
}

pub(crate) trait DbResultExt<T> {
    fn db_context(self, context: &str) -> Result<T>;
}

impl<T> DbResultExt<T> for std::result::Result<T, sqlx::Error> {
    #[inline]
    fn db_context(self, context: &str) -> Result<T> {
        self.map_err(|e| map_sqlx_error(e, context))
    }
}

/// The authoritative entry store. Every write that touches more than one row
/// runs inside a single transaction.
#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    #[inline]
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .db_context("Failed to create database connection pool")?;

        let database = Self { pool };
        database.run_migrations().await?;

        Ok(database)
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    #[inline]
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await
            .map_err(|e| VocabError::Database(format!("Failed to run schema migration: {e}")))?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    #[inline]
    pub async fn initialize_from_config_dir(config_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(config_dir)?;
        Self::new(config_dir.join("metadata.db")).await
    }

    /// Start a transaction that takes the write lock up front. A deferred
    /// transaction that reads before writing fails with `SQLITE_BUSY` instead
    /// of waiting when another connection commits in between.
    async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>> {
        self.pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .db_context("Failed to begin write transaction")
    }

    // Entry operations

    /// Look up an entry by key, following a registered alias when the key
    /// has no entry of its own.
    #[inline]
    pub async fn get_entry(&self, key: &EntryKey) -> Result<Entry> {
        let mut conn = self.pool.acquire().await.db_context("Failed to acquire connection")?;

        if let Some(entry) = EntryQueries::find_by_key(&mut conn, key).await? {
            return Ok(entry);
        }

        if let Some(entry_id) = AliasQueries::resolve(&mut conn, key).await? {
            if let Some(entry) = EntryQueries::find_by_id(&mut conn, entry_id).await? {
                debug!("Resolved {} through alias to {}", key, entry.key);
                return Ok(entry);
            }
        }

        Err(VocabError::NotFound(format!("entry {key}")))
    }

    #[inline]
    pub async fn get_entry_exact(&self, key: &EntryKey) -> Result<Option<Entry>> {
        let mut conn = self.pool.acquire().await.db_context("Failed to acquire connection")?;
        EntryQueries::find_by_key(&mut conn, key).await
    }

    #[inline]
    pub async fn get_entry_by_id(&self, id: i64) -> Result<Option<Entry>> {
        let mut conn = self.pool.acquire().await.db_context("Failed to acquire connection")?;
        EntryQueries::find_by_id(&mut conn, id).await
    }

    /// Insert a brand-new entry and its children. Fails with `Conflict` if the
    /// key is taken or any referenced language is unknown.
    #[inline]
    pub async fn put_entry(&self, new_entry: &NewEntry) -> Result<Entry> {
        let mut tx = self.begin_write().await?;
        let now = Utc::now();

        let entry_id = EntryQueries::insert(&mut tx, new_entry, now).await?;
        for kind in models::ChildKind::ALL {
            EntryQueries::insert_children(&mut tx, entry_id, kind, new_entry.children(kind), now)
                .await?;
        }
        AliasQueries::delete_for_key(&mut tx, &new_entry.key).await?;

        let entry = EntryQueries::find_by_id(&mut tx, entry_id)
            .await?
            .ok_or_else(|| VocabError::Database("Inserted entry vanished".to_string()))?;

        tx.commit().await.db_context("Failed to commit entry")?;
        info!("Stored entry {}", entry.key);
        Ok(entry)
    }

    /// Commit freshly generated content for a key. An existing entry keeps its
    /// id and creation time; its content and children are replaced.
    #[inline]
    pub async fn commit_generated(&self, new_entry: &NewEntry) -> Result<Entry> {
        let mut tx = self.begin_write().await?;
        let now = Utc::now();

        let entry_id = match EntryQueries::id_for_key(&mut tx, &new_entry.key).await? {
            Some(id) => {
                EntryQueries::replace_content(&mut tx, id, new_entry, now).await?;
                id
            }
            None => {
                let id = EntryQueries::insert(&mut tx, new_entry, now).await?;
                for kind in models::ChildKind::ALL {
                    EntryQueries::insert_children(&mut tx, id, kind, new_entry.children(kind), now)
                        .await?;
                }
                id
            }
        };
        AliasQueries::delete_for_key(&mut tx, &new_entry.key).await?;

        let entry = EntryQueries::find_by_id(&mut tx, entry_id)
            .await?
            .ok_or_else(|| VocabError::Database("Committed entry vanished".to_string()))?;

        tx.commit().await.db_context("Failed to commit generated entry")?;
        info!(
            "Committed generated entry {} ({} translations, {} definitions, {} examples)",
            entry.key,
            entry.translations.len(),
            entry.definitions.len(),
            entry.examples.len()
        );
        Ok(entry)
    }

    #[inline]
    pub async fn update_embedding(
        &self,
        key: &EntryKey,
        vector: &[f32],
        model: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut conn = self.pool.acquire().await.db_context("Failed to acquire connection")?;

        if !EntryQueries::update_embedding(&mut conn, key, vector, model, at).await? {
            return Err(VocabError::NotFound(format!("entry {key}")));
        }

        debug!("Updated embedding of {} with model {}", key, model);
        Ok(())
    }

    /// Point `alias` at the entry stored under `target`.
    #[inline]
    pub async fn register_alias(&self, alias: &EntryKey, target: &EntryKey) -> Result<()> {
        if alias == target {
            return Ok(());
        }

        let mut conn = self.pool.acquire().await.db_context("Failed to acquire connection")?;
        let target_id = EntryQueries::id_for_key(&mut conn, target)
            .await?
            .ok_or_else(|| VocabError::NotFound(format!("entry {target}")))?;

        AliasQueries::upsert(&mut conn, alias, target_id).await?;
        debug!("Registered alias {} -> {}", alias, target);
        Ok(())
    }

    #[inline]
    pub async fn delete_entry(&self, key: &EntryKey) -> Result<bool> {
        let mut conn = self.pool.acquire().await.db_context("Failed to acquire connection")?;
        let deleted = EntryQueries::delete(&mut conn, key).await?;
        if deleted {
            info!("Deleted entry {}", key);
        }
        Ok(deleted)
    }

    #[inline]
    pub async fn list_entry_embeddings(&self) -> Result<Vec<EntryVector>> {
        let mut conn = self.pool.acquire().await.db_context("Failed to acquire connection")?;
        EntryQueries::list_vectors(&mut conn).await
    }

    #[inline]
    pub async fn count_entries(&self) -> Result<i64> {
        let mut conn = self.pool.acquire().await.db_context("Failed to acquire connection")?;
        EntryQueries::count(&mut conn).await
    }

    // Language operations

    #[inline]
    pub async fn list_languages(&self) -> Result<Vec<Language>> {
        let mut conn = self.pool.acquire().await.db_context("Failed to acquire connection")?;
        LanguageQueries::list_all(&mut conn).await
    }

    #[inline]
    pub async fn get_language(&self, code: &str) -> Result<Option<Language>> {
        let mut conn = self.pool.acquire().await.db_context("Failed to acquire connection")?;
        LanguageQueries::get_by_code(&mut conn, &models::normalize_language(code)).await
    }

    #[inline]
    pub async fn create_language(&self, new_language: &NewLanguage) -> Result<Language> {
        let mut conn = self.pool.acquire().await.db_context("Failed to acquire connection")?;
        LanguageQueries::create(&mut conn, new_language).await
    }

    /// Fail with `Conflict(UnknownLanguage)` unless every code is a known language.
    #[inline]
    pub async fn require_languages(&self, codes: &[&str]) -> Result<()> {
        let mut conn = self.pool.acquire().await.db_context("Failed to acquire connection")?;
        for code in codes {
            LanguageQueries::require_id(&mut conn, &models::normalize_language(code)).await?;
        }
        Ok(())
    }

    // Learning profile operations

    #[inline]
    pub async fn create_learning_profile(
        &self,
        new_profile: &NewLearningProfile,
    ) -> Result<LearningProfile> {
        let mut conn = self.pool.acquire().await.db_context("Failed to acquire connection")?;
        let profile = ProfileQueries::create(&mut conn, new_profile).await?;
        info!(
            "Created learning profile {} ({} -> {}) for user {}",
            profile.id, profile.primary_language, profile.foreign_language, profile.user_id
        );
        Ok(profile)
    }

    #[inline]
    pub async fn get_learning_profile(&self, id: i64) -> Result<LearningProfile> {
        let mut conn = self.pool.acquire().await.db_context("Failed to acquire connection")?;
        ProfileQueries::get_by_id(&mut conn, id)
            .await?
            .ok_or_else(|| VocabError::NotFound(format!("learning profile {id}")))
    }

    #[inline]
    pub async fn list_learning_profiles(&self, user_id: i64) -> Result<Vec<LearningProfile>> {
        let mut conn = self.pool.acquire().await.db_context("Failed to acquire connection")?;
        ProfileQueries::list_for_user(&mut conn, user_id).await
    }

    // Dictionary operations

    #[inline]
    pub async fn add_to_dictionary(
        &self,
        new_membership: &NewMembership,
    ) -> Result<DictionaryMembership> {
        let mut conn = self.pool.acquire().await.db_context("Failed to acquire connection")?;

        if ProfileQueries::get_by_id(&mut conn, new_membership.learning_profile_id)
            .await?
            .is_none()
        {
            return Err(VocabError::NotFound(format!(
                "learning profile {}",
                new_membership.learning_profile_id
            )));
        }
        if EntryQueries::find_by_id(&mut conn, new_membership.entry_id)
            .await?
            .is_none()
        {
            return Err(VocabError::NotFound(format!(
                "entry id {}",
                new_membership.entry_id
            )));
        }

        MembershipQueries::create(&mut conn, new_membership).await
    }

    #[inline]
    pub async fn update_membership_notes(
        &self,
        membership_id: i64,
        notes: Option<&str>,
    ) -> Result<DictionaryMembership> {
        let mut conn = self.pool.acquire().await.db_context("Failed to acquire connection")?;
        MembershipQueries::update_notes(&mut conn, membership_id, notes)
            .await?
            .ok_or_else(|| VocabError::NotFound(format!("dictionary membership {membership_id}")))
    }

    #[inline]
    pub async fn remove_from_dictionary(&self, membership_id: i64) -> Result<()> {
        let mut conn = self.pool.acquire().await.db_context("Failed to acquire connection")?;
        if !MembershipQueries::delete(&mut conn, membership_id).await? {
            return Err(VocabError::NotFound(format!(
                "dictionary membership {membership_id}"
            )));
        }
        Ok(())
    }

    /// Entries of a profile's dictionary, oldest membership first.
    #[inline]
    pub async fn list_dictionary(&self, learning_profile_id: i64) -> Result<Vec<Entry>> {
        let mut conn = self.pool.acquire().await.db_context("Failed to acquire connection")?;
        let ids = MembershipQueries::entry_ids_for_profile(&mut conn, learning_profile_id).await?;

        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            match EntryQueries::find_by_id(&mut conn, id).await? {
                Some(entry) => entries.push(entry),
                None => warn!("Dictionary membership points at missing entry {}", id),
            }
        }
        Ok(entries)
    }

    #[inline]
    pub async fn profile_entry_ids(&self, learning_profile_id: i64) -> Result<HashSet<i64>> {
        let mut conn = self.pool.acquire().await.db_context("Failed to acquire connection")?;
        let ids = MembershipQueries::entry_ids_for_profile(&mut conn, learning_profile_id).await?;
        Ok(ids.into_iter().collect())
    }

    /// Optimize database performance by running VACUUM and ANALYZE
    #[inline]
    pub async fn optimize(&self) -> Result<()> {
        info!("Optimizing database performance");

        sqlx::query("VACUUM")
            .execute(&self.pool)
            .await
            .db_context("Failed to vacuum database")?;

        sqlx::query("ANALYZE")
            .execute(&self.pool)
            .await
            .db_context("Failed to analyze database")?;

        debug!("Database optimization completed");
        Ok(())
    }
}
