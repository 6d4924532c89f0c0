
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::debug;

use super::DbResultExt;
use super::models::*;
use crate::{Result, VocabError};

const SELECT_ENTRY: &str = r#"
    SELECT e.id,
           e.lemma,
           l.code AS language_code,
           e.context_text,
           e.embedding,
           e.embedding_model,
           e.embedding_updated_at,
           e.created_at,
           e.updated_at
    FROM entries e
    JOIN languages l ON l.id = e.language_id
"#;

const SELECT_PROFILE: &str = r#"
    SELECT p.id,
           p.user_id,
           pl.code AS primary_language,
           fl.code AS foreign_language,
           p.is_active,
           p.created_at,
           p.updated_at
    FROM learning_profiles p
    JOIN languages pl ON pl.id = p.primary_language_id
    JOIN languages fl ON fl.id = p.foreign_language_id
"#;

pub struct LanguageQueries;

impl LanguageQueries {
    #[inline]
    pub async fn id_for_code(conn: &mut SqliteConnection, code: &str) -> Result<Option<i64>> {
        sqlx::query_scalar::<_, i64>("SELECT id FROM languages WHERE code = ?")
            .bind(code)
            .fetch_optional(&mut *conn)
            .await
            .db_context("Failed to look up language id")
    }

    /// Resolve a language code, treating an unknown code as an integrity conflict.
    #[inline]
    pub async fn require_id(conn: &mut SqliteConnection, code: &str) -> Result<i64> {
        Self::id_for_code(conn, code)
            .await?
            .ok_or_else(|| VocabError::Conflict(ConflictReason::UnknownLanguage(code.to_string())))
    }

    #[inline]
    pub async fn get_by_code(conn: &mut SqliteConnection, code: &str) -> Result<Option<Language>> {
        sqlx::query_as::<_, Language>(
            "SELECT id, code, name, created_at FROM languages WHERE code = ?",
        )
        .bind(code)
        .fetch_optional(&mut *conn)
        .await
        .db_context("Failed to get language by code")
    }

    #[inline]
    pub async fn list_all(conn: &mut SqliteConnection) -> Result<Vec<Language>> {
        sqlx::query_as::<_, Language>(
            "SELECT id, code, name, created_at FROM languages ORDER BY code ASC",
        )
        .fetch_all(&mut *conn)
        .await
        .db_context("Failed to list languages")
    }

    #[inline]
    pub async fn create(conn: &mut SqliteConnection, new_language: &NewLanguage) -> Result<Language> {
        let code = normalize_language(&new_language.code);
        if Self::id_for_code(conn, &code).await?.is_some() {
            return Err(VocabError::Conflict(ConflictReason::DuplicateLanguage(code)));
        }

        sqlx::query("INSERT INTO languages (code, name, created_at) VALUES (?, ?, ?)")
            .bind(&code)
            .bind(new_language.name.trim())
            .bind(Utc::now())
            .execute(&mut *conn)
            .await
            .db_context("Failed to create language")?;

        Self::get_by_code(conn, &code)
            .await?
            .ok_or_else(|| VocabError::Database("Failed to retrieve created language".to_string()))
    }
}

pub struct EntryQueries;

impl EntryQueries {
    #[inline]
    pub async fn find_by_key(conn: &mut SqliteConnection, key: &EntryKey) -> Result<Option<Entry>> {
        let row = sqlx::query_as::<_, EntryRow>(&format!(
            "{SELECT_ENTRY} WHERE e.lemma = ? AND l.code = ?"
        ))
        .bind(&key.lemma)
        .bind(&key.language)
        .fetch_optional(&mut *conn)
        .await
        .db_context("Failed to get entry by key")?;

        match row {
            Some(row) => Ok(Some(Self::hydrate(conn, row).await?)),
            None => Ok(None),
        }
    }

    #[inline]
    pub async fn find_by_id(conn: &mut SqliteConnection, id: i64) -> Result<Option<Entry>> {
        let row = sqlx::query_as::<_, EntryRow>(&format!("{SELECT_ENTRY} WHERE e.id = ?"))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .db_context("Failed to get entry by id")?;

        match row {
            Some(row) => Ok(Some(Self::hydrate(conn, row).await?)),
            None => Ok(None),
        }
    }

    #[inline]
    pub async fn id_for_key(conn: &mut SqliteConnection, key: &EntryKey) -> Result<Option<i64>> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT e.id FROM entries e
            JOIN languages l ON l.id = e.language_id
            WHERE e.lemma = ? AND l.code = ?
            "#,
        )
        .bind(&key.lemma)
        .bind(&key.language)
        .fetch_optional(&mut *conn)
        .await
        .db_context("Failed to get entry id")
    }

    async fn hydrate(conn: &mut SqliteConnection, row: EntryRow) -> Result<Entry> {
        let translations = Self::load_children(conn, row.id, ChildKind::Translation).await?;
        let definitions = Self::load_children(conn, row.id, ChildKind::Definition).await?;
        let examples = Self::load_children(conn, row.id, ChildKind::Example).await?;
        row.into_entry(translations, definitions, examples)
    }

    #[inline]
    pub async fn load_children(
        conn: &mut SqliteConnection,
        entry_id: i64,
        kind: ChildKind,
    ) -> Result<Vec<ChildRecord>> {
        let rows = sqlx::query_as::<_, ChildRow>(&format!(
            r#"
            SELECT c.id,
                   c.entry_id,
                   l.code AS language_code,
                   c.position,
                   c.text,
                   c.embedding,
                   c.embedding_model,
                   c.embedding_updated_at
            FROM {} c
            JOIN languages l ON l.id = c.language_id
            WHERE c.entry_id = ?
            ORDER BY c.position ASC, c.id ASC
            "#,
            kind.table()
        ))
        .bind(entry_id)
        .fetch_all(&mut *conn)
        .await
        .db_context("Failed to load entry children")?;

        rows.into_iter().map(ChildRecord::try_from).collect()
    }

    /// Insert the entry row only. Children are written by the caller in the same transaction.
    #[inline]
    pub async fn insert(
        conn: &mut SqliteConnection,
        new_entry: &NewEntry,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let language_id = LanguageQueries::require_id(conn, &new_entry.key.language).await?;
        let (blob, model, embedded_at) = embedding_columns(new_entry.embedding.as_ref());

        let id = sqlx::query(
            r#"
            INSERT INTO entries (lemma, language_id, context_text, embedding, embedding_model,
                                 embedding_updated_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&new_entry.key.lemma)
        .bind(language_id)
        .bind(&new_entry.context_text)
        .bind(blob)
        .bind(model)
        .bind(embedded_at)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                VocabError::Conflict(ConflictReason::DuplicateEntry(new_entry.key.clone()))
            } else {
                super::map_sqlx_error(e, "Failed to insert entry")
            }
        })?
        .last_insert_rowid();

        debug!("Inserted entry {} with id {}", new_entry.key, id);
        Ok(id)
    }

    #[inline]
    pub async fn insert_children(
        conn: &mut SqliteConnection,
        entry_id: i64,
        kind: ChildKind,
        children: &[NewChild],
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut language_ids: HashMap<&str, i64> = HashMap::new();
        let sql = format!(
            r#"
            INSERT INTO {} (entry_id, language_id, position, text, embedding, embedding_model,
                            embedding_updated_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            kind.table()
        );

        for (position, child) in children.iter().enumerate() {
            let language_id = match language_ids.get(child.language.as_str()) {
                Some(id) => *id,
                None => {
                    let id = LanguageQueries::require_id(conn, &child.language).await?;
                    language_ids.insert(child.language.as_str(), id);
                    id
                }
            };
            let (blob, model, embedded_at) = embedding_columns(child.embedding.as_ref());

            sqlx::query(&sql)
                .bind(entry_id)
                .bind(language_id)
                .bind(position as i64)
                .bind(&child.text)
                .bind(blob)
                .bind(model)
                .bind(embedded_at)
                .bind(now)
                .execute(&mut *conn)
                .await
                .db_context("Failed to insert entry child")?;
        }

        Ok(())
    }

    #[inline]
    pub async fn delete_children(conn: &mut SqliteConnection, entry_id: i64) -> Result<()> {
        for kind in ChildKind::ALL {
            sqlx::query(&format!("DELETE FROM {} WHERE entry_id = ?", kind.table()))
                .bind(entry_id)
                .execute(&mut *conn)
                .await
                .db_context("Failed to delete entry children")?;
        }
        Ok(())
    }

    /// Overwrite the generated content of an existing entry, keeping its id and created_at.
    #[inline]
    pub async fn replace_content(
        conn: &mut SqliteConnection,
        entry_id: i64,
        new_entry: &NewEntry,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let (blob, model, embedded_at) = embedding_columns(new_entry.embedding.as_ref());

        sqlx::query(
            r#"
            UPDATE entries
            SET context_text = ?, embedding = ?, embedding_model = ?,
                embedding_updated_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&new_entry.context_text)
        .bind(blob)
        .bind(model)
        .bind(embedded_at)
        .bind(now)
        .bind(entry_id)
        .execute(&mut *conn)
        .await
        .db_context("Failed to replace entry content")?;

        Self::delete_children(conn, entry_id).await?;
        for kind in ChildKind::ALL {
            Self::insert_children(conn, entry_id, kind, new_entry.children(kind), now).await?;
        }

        Ok(())
    }

    #[inline]
    pub async fn update_embedding(
        conn: &mut SqliteConnection,
        key: &EntryKey,
        vector: &[f32],
        model: &str,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE entries
            SET embedding = ?, embedding_model = ?, embedding_updated_at = ?, updated_at = ?
            WHERE lemma = ? AND language_id = (SELECT id FROM languages WHERE code = ?)
            "#,
        )
        .bind(encode_vector(vector))
        .bind(model)
        .bind(at)
        .bind(at)
        .bind(&key.lemma)
        .bind(&key.language)
        .execute(&mut *conn)
        .await
        .db_context("Failed to update entry embedding")?;

        Ok(result.rows_affected() > 0)
    }

    #[inline]
    pub async fn delete(conn: &mut SqliteConnection, key: &EntryKey) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM entries
            WHERE lemma = ? AND language_id = (SELECT id FROM languages WHERE code = ?)
            "#,
        )
        .bind(&key.lemma)
        .bind(&key.language)
        .execute(&mut *conn)
        .await
        .db_context("Failed to delete entry")?;

        Ok(result.rows_affected() > 0)
    }

    /// All entry embeddings in insertion order.
    #[inline]
    pub async fn list_vectors(conn: &mut SqliteConnection) -> Result<Vec<EntryVector>> {
        let rows = sqlx::query_as::<_, EntryRow>(&format!("{SELECT_ENTRY} ORDER BY e.id ASC"))
            .fetch_all(&mut *conn)
            .await
            .db_context("Failed to list entry embeddings")?;

        rows.into_iter()
            .map(|row| {
                let embedding = decode_embedding_columns(
                    row.embedding,
                    row.embedding_model,
                    row.embedding_updated_at,
                )?;
                Ok(EntryVector {
                    entry_id: row.id,
                    key: EntryKey {
                        lemma: row.lemma,
                        language: row.language_code,
                    },
                    embedding,
                })
            })
            .collect()
    }

    #[inline]
    pub async fn count(conn: &mut SqliteConnection) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM entries")
            .fetch_one(&mut *conn)
            .await
            .db_context("Failed to count entries")
    }
}

pub struct AliasQueries;

impl AliasQueries {
    #[inline]
    pub async fn resolve(conn: &mut SqliteConnection, key: &EntryKey) -> Result<Option<i64>> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT a.entry_id FROM entry_aliases a
            JOIN languages l ON l.id = a.language_id
            WHERE a.alias_lemma = ? AND l.code = ?
            "#,
        )
        .bind(&key.lemma)
        .bind(&key.language)
        .fetch_optional(&mut *conn)
        .await
        .db_context("Failed to resolve alias")
    }

    #[inline]
    pub async fn upsert(conn: &mut SqliteConnection, alias: &EntryKey, entry_id: i64) -> Result<()> {
        let language_id = LanguageQueries::require_id(conn, &alias.language).await?;

        sqlx::query(
            r#"
            INSERT INTO entry_aliases (alias_lemma, language_id, entry_id, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(alias_lemma, language_id) DO UPDATE SET entry_id = excluded.entry_id
            "#,
        )
        .bind(&alias.lemma)
        .bind(language_id)
        .bind(entry_id)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await
        .db_context("Failed to register alias")?;

        Ok(())
    }

    #[inline]
    pub async fn delete_for_key(conn: &mut SqliteConnection, key: &EntryKey) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM entry_aliases
            WHERE alias_lemma = ? AND language_id = (SELECT id FROM languages WHERE code = ?)
            "#,
        )
        .bind(&key.lemma)
        .bind(&key.language)
        .execute(&mut *conn)
        .await
        .db_context("Failed to delete alias")?;

        Ok(result.rows_affected() > 0)
    }
}

pub struct ProfileQueries;

impl ProfileQueries {
    #[inline]
    pub async fn create(
        conn: &mut SqliteConnection,
        new_profile: &NewLearningProfile,
    ) -> Result<LearningProfile> {
        let primary = normalize_language(&new_profile.primary_language);
        let foreign = normalize_language(&new_profile.foreign_language);

        if primary == foreign {
            return Err(VocabError::Conflict(ConflictReason::SameLanguagePair(primary)));
        }

        let primary_id = LanguageQueries::require_id(conn, &primary).await?;
        let foreign_id = LanguageQueries::require_id(conn, &foreign).await?;
        let now = Utc::now();

        let id = sqlx::query(
            r#"
            INSERT INTO learning_profiles (user_id, primary_language_id, foreign_language_id,
                                           is_active, created_at, updated_at)
            VALUES (?, ?, ?, 1, ?, ?)
            "#,
        )
        .bind(new_profile.user_id)
        .bind(primary_id)
        .bind(foreign_id)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                VocabError::Conflict(ConflictReason::DuplicateProfile {
                    user_id: new_profile.user_id,
                    primary: primary.clone(),
                    foreign: foreign.clone(),
                })
            } else {
                super::map_sqlx_error(e, "Failed to create learning profile")
            }
        })?
        .last_insert_rowid();

        Self::get_by_id(conn, id)
            .await?
            .ok_or_else(|| VocabError::Database("Failed to retrieve created profile".to_string()))
    }

    #[inline]
    pub async fn get_by_id(conn: &mut SqliteConnection, id: i64) -> Result<Option<LearningProfile>> {
        sqlx::query_as::<_, LearningProfile>(&format!("{SELECT_PROFILE} WHERE p.id = ?"))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .db_context("Failed to get learning profile")
    }

    #[inline]
    pub async fn list_for_user(
        conn: &mut SqliteConnection,
        user_id: i64,
    ) -> Result<Vec<LearningProfile>> {
        sqlx::query_as::<_, LearningProfile>(&format!(
            "{SELECT_PROFILE} WHERE p.user_id = ? ORDER BY p.id ASC"
        ))
        .bind(user_id)
        .fetch_all(&mut *conn)
        .await
        .db_context("Failed to list learning profiles")
    }
}

pub struct MembershipQueries;

impl MembershipQueries {
    #[inline]
    pub async fn create(
        conn: &mut SqliteConnection,
        new_membership: &NewMembership,
    ) -> Result<DictionaryMembership> {
        let now = Utc::now();

        let id = sqlx::query(
            r#"
            INSERT INTO dictionary_memberships (learning_profile_id, entry_id, notes,
                                                created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(new_membership.learning_profile_id)
        .bind(new_membership.entry_id)
        .bind(new_membership.notes.as_deref())
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                VocabError::Conflict(ConflictReason::DuplicateMembership {
                    learning_profile_id: new_membership.learning_profile_id,
                    entry_id: new_membership.entry_id,
                })
            } else {
                super::map_sqlx_error(e, "Failed to add entry to dictionary")
            }
        })?
        .last_insert_rowid();

        Self::get_by_id(conn, id)
            .await?
            .ok_or_else(|| VocabError::Database("Failed to retrieve created membership".to_string()))
    }

    #[inline]
    pub async fn get_by_id(
        conn: &mut SqliteConnection,
        id: i64,
    ) -> Result<Option<DictionaryMembership>> {
        sqlx::query_as::<_, DictionaryMembership>(
            r#"
            SELECT id, learning_profile_id, entry_id, notes, created_at, updated_at
            FROM dictionary_memberships WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .db_context("Failed to get dictionary membership")
    }

    #[inline]
    pub async fn update_notes(
        conn: &mut SqliteConnection,
        id: i64,
        notes: Option<&str>,
    ) -> Result<Option<DictionaryMembership>> {
        sqlx::query("UPDATE dictionary_memberships SET notes = ?, updated_at = ? WHERE id = ?")
            .bind(notes)
            .bind(Utc::now())
            .bind(id)
            .execute(&mut *conn)
            .await
            .db_context("Failed to update membership notes")?;

        Self::get_by_id(conn, id).await
    }

    #[inline]
    pub async fn delete(conn: &mut SqliteConnection, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM dictionary_memberships WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await
            .db_context("Failed to remove dictionary membership")?;

        Ok(result.rows_affected() > 0)
    }

    #[inline]
    pub async fn entry_ids_for_profile(
        conn: &mut SqliteConnection,
        learning_profile_id: i64,
    ) -> Result<Vec<i64>> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT entry_id FROM dictionary_memberships
            WHERE learning_profile_id = ?
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(learning_profile_id)
        .fetch_all(&mut *conn)
        .await
        .db_context("Failed to list dictionary entries")
    }
}

fn embedding_columns(
    embedding: Option<&StoredEmbedding>,
) -> (Option<Vec<u8>>, Option<&str>, Option<DateTime<Utc>>) {
    match embedding {
        Some(e) => (
            Some(encode_vector(&e.vector)),
            Some(e.model.as_str()),
            Some(e.updated_at),
        ),
        None => (None, None, None),
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db_error) if db_error.is_unique_violation())
}
