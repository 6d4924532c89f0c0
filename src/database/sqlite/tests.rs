use super::models::{ChildKind, NewChild, StoredEmbedding};
use super::*;
use std::collections::HashSet;
use tempfile::TempDir;

async fn create_test_database() -> (TempDir, Database) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let database = Database::initialize_from_config_dir(temp_dir.path())
        .await
        .expect("should open database");
    (temp_dir, database)
}

fn key(lemma: &str, language: &str) -> EntryKey {
    EntryKey::new(lemma, language).expect("should build key")
}

fn embedding(vector: Vec<f32>, model: &str) -> StoredEmbedding {
    StoredEmbedding {
        vector,
        model: model.to_string(),
        updated_at: Utc::now(),
    }
}

fn sample_entry(lemma: &str) -> NewEntry {
    NewEntry {
        key: key(lemma, "en"),
        context_text: "moving fast on foot".to_string(),
        embedding: Some(embedding(vec![1.0, 0.0, 0.0], "m1")),
        translations: vec![NewChild::new("ru", "бежать"), NewChild::new("ru", "бегать")],
        definitions: vec![NewChild::new("en", "to move swiftly on foot")],
        examples: vec![NewChild::new("en", "I run every morning.")],
    }
}

#[tokio::test]
async fn schema_migration_creates_tables() {
    let (_temp_dir, database) = create_test_database().await;

    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name NOT LIKE '_sqlx%'",
    )
    .fetch_all(database.pool())
    .await
    .expect("should list tables");

    let expected: HashSet<&str> = [
        "languages",
        "entries",
        "translations",
        "definitions",
        "examples",
        "entry_aliases",
        "learning_profiles",
        "dictionary_memberships",
    ]
    .into_iter()
    .collect();
    let actual: HashSet<&str> = tables.iter().map(String::as_str).collect();
    assert_eq!(actual, expected);
}

#[tokio::test]
async fn languages_are_seeded() {
    let (_temp_dir, database) = create_test_database().await;

    let languages = database.list_languages().await.expect("should list");
    assert_eq!(languages.len(), 10);

    let english = database
        .get_language("EN")
        .await
        .expect("should query")
        .expect("english should exist");
    assert_eq!(english.name, "English");
}

#[tokio::test]
async fn put_and_get_entry_with_children() {
    let (_temp_dir, database) = create_test_database().await;

    let stored = database
        .put_entry(&sample_entry("run"))
        .await
        .expect("should store entry");

    let fetched = database.get_entry(&key("Run", "en")).await.expect("should fetch");
    assert_eq!(fetched.id, stored.id);
    assert_eq!(fetched.context_text, "moving fast on foot");
    assert_eq!(fetched.embedding_model(), Some("m1"));
    assert_eq!(
        fetched.embedding.as_ref().map(|e| e.vector.clone()),
        Some(vec![1.0, 0.0, 0.0])
    );

    let translations: Vec<&str> = fetched.translations.iter().map(|t| t.text.as_str()).collect();
    assert_eq!(translations, vec!["бежать", "бегать"]);
    assert!(fetched.translations.iter().all(|t| t.language == "ru"));
    assert!(fetched.translations.iter().all(|t| t.entry_id == stored.id));
    assert_eq!(fetched.children(ChildKind::Definition).len(), 1);
    assert_eq!(fetched.examples[0].text, "I run every morning.");
}

#[tokio::test]
async fn missing_entry_is_not_found() {
    let (_temp_dir, database) = create_test_database().await;

    let result = database.get_entry(&key("ghost", "en")).await;
    assert!(matches!(result, Err(VocabError::NotFound(_))));
}

#[tokio::test]
async fn duplicate_entry_is_conflict() {
    let (_temp_dir, database) = create_test_database().await;

    database
        .put_entry(&sample_entry("run"))
        .await
        .expect("first insert should succeed");

    let result = database.put_entry(&sample_entry("run")).await;
    assert!(matches!(
        result,
        Err(VocabError::Conflict(ConflictReason::DuplicateEntry(_)))
    ));
}

#[tokio::test]
async fn failed_child_insert_rolls_back_entry() {
    let (_temp_dir, database) = create_test_database().await;

    let mut entry = sample_entry("walk");
    entry.examples.push(NewChild::new("xx", "unknown language"));

    let result = database.put_entry(&entry).await;
    assert!(matches!(
        result,
        Err(VocabError::Conflict(ConflictReason::UnknownLanguage(ref code))) if code == "xx"
    ));

    let lookup = database.get_entry(&key("walk", "en")).await;
    assert!(matches!(lookup, Err(VocabError::NotFound(_))));
    assert_eq!(database.count_entries().await.expect("should count"), 0);
}

#[tokio::test]
async fn update_embedding_requires_existing_key() {
    let (_temp_dir, database) = create_test_database().await;

    let missing = database
        .update_embedding(&key("ghost", "en"), &[0.5, 0.5], "m2", Utc::now())
        .await;
    assert!(matches!(missing, Err(VocabError::NotFound(_))));

    database
        .put_entry(&sample_entry("run"))
        .await
        .expect("should store entry");
    database
        .update_embedding(&key("run", "en"), &[0.0, 1.0, 0.0], "m2", Utc::now())
        .await
        .expect("should update embedding");

    let entry = database.get_entry(&key("run", "en")).await.expect("should fetch");
    assert_eq!(entry.embedding_model(), Some("m2"));
    assert_eq!(
        entry.embedding.map(|e| e.vector),
        Some(vec![0.0, 1.0, 0.0])
    );
    assert_eq!(entry.translations.len(), 2);
}

#[tokio::test]
async fn alias_resolves_to_target_entry() {
    let (_temp_dir, database) = create_test_database().await;

    database
        .put_entry(&sample_entry("run"))
        .await
        .expect("should store entry");
    database
        .register_alias(&key("jog", "en"), &key("run", "en"))
        .await
        .expect("should register alias");

    let via_alias = database.get_entry(&key("jog", "en")).await.expect("should resolve");
    assert_eq!(via_alias.key, key("run", "en"));

    let exact = database
        .get_entry_exact(&key("jog", "en"))
        .await
        .expect("should query");
    assert!(exact.is_none());

    let missing_target = database
        .register_alias(&key("sprint", "en"), &key("ghost", "en"))
        .await;
    assert!(matches!(missing_target, Err(VocabError::NotFound(_))));
}

#[tokio::test]
async fn commit_generated_replaces_content_and_clears_alias() {
    let (_temp_dir, database) = create_test_database().await;

    let original = database
        .put_entry(&sample_entry("run"))
        .await
        .expect("should store entry");
    database
        .put_entry(&sample_entry("jog"))
        .await
        .expect("should store second entry");
    database
        .register_alias(&key("sprint", "en"), &key("run", "en"))
        .await
        .expect("should register alias");

    let mut regenerated = sample_entry("run");
    regenerated.embedding = Some(embedding(vec![0.0, 0.0, 1.0], "m2"));
    regenerated.translations = vec![NewChild::new("ru", "бег")];
    regenerated.examples.clear();

    let committed = database
        .commit_generated(&regenerated)
        .await
        .expect("should commit");
    assert_eq!(committed.id, original.id);
    assert_eq!(committed.created_at, original.created_at);
    assert_eq!(committed.embedding_model(), Some("m2"));
    assert_eq!(committed.translations.len(), 1);
    assert!(committed.examples.is_empty());

    let mut sprint = sample_entry("sprint");
    sprint.context_text = "short burst".to_string();
    let fresh = database
        .commit_generated(&sprint)
        .await
        .expect("should commit new key");
    assert_eq!(fresh.key, key("sprint", "en"));

    let resolved = database.get_entry(&key("sprint", "en")).await.expect("should fetch");
    assert_eq!(resolved.id, fresh.id);
    assert_eq!(database.count_entries().await.expect("should count"), 3);
}

#[tokio::test]
async fn list_entry_embeddings_in_insertion_order() {
    let (_temp_dir, database) = create_test_database().await;

    let mut bare = sample_entry("walk");
    bare.embedding = None;

    database.put_entry(&sample_entry("run")).await.expect("should store");
    database.put_entry(&bare).await.expect("should store");
    database.put_entry(&sample_entry("jog")).await.expect("should store");

    let vectors = database.list_entry_embeddings().await.expect("should list");
    let lemmas: Vec<&str> = vectors.iter().map(|v| v.key.lemma.as_str()).collect();
    assert_eq!(lemmas, vec!["run", "walk", "jog"]);
    assert!(vectors[1].embedding.is_none());
    assert_eq!(
        vectors[2].embedding.as_ref().map(|e| e.model.as_str()),
        Some("m1")
    );
}

#[tokio::test]
async fn learning_profile_rules() {
    let (_temp_dir, database) = create_test_database().await;

    let same = database
        .create_learning_profile(&NewLearningProfile {
            user_id: 1,
            primary_language: "en".to_string(),
            foreign_language: "EN".to_string(),
        })
        .await;
    assert!(matches!(
        same,
        Err(VocabError::Conflict(ConflictReason::SameLanguagePair(_)))
    ));

    let profile = database
        .create_learning_profile(&NewLearningProfile {
            user_id: 1,
            primary_language: "ru".to_string(),
            foreign_language: "en".to_string(),
        })
        .await
        .expect("should create profile");
    assert_eq!(profile.primary_language, "ru");
    assert_eq!(profile.foreign_language, "en");
    assert!(profile.is_active);

    let duplicate = database
        .create_learning_profile(&NewLearningProfile {
            user_id: 1,
            primary_language: "ru".to_string(),
            foreign_language: "en".to_string(),
        })
        .await;
    assert!(matches!(
        duplicate,
        Err(VocabError::Conflict(ConflictReason::DuplicateProfile { .. }))
    ));

    let unknown = database
        .create_learning_profile(&NewLearningProfile {
            user_id: 2,
            primary_language: "ru".to_string(),
            foreign_language: "tlh".to_string(),
        })
        .await;
    assert!(matches!(
        unknown,
        Err(VocabError::Conflict(ConflictReason::UnknownLanguage(_)))
    ));
}

#[tokio::test]
async fn dictionary_membership_lifecycle() {
    let (_temp_dir, database) = create_test_database().await;

    let profile = database
        .create_learning_profile(&NewLearningProfile {
            user_id: 7,
            primary_language: "ru".to_string(),
            foreign_language: "en".to_string(),
        })
        .await
        .expect("should create profile");
    let run = database.put_entry(&sample_entry("run")).await.expect("should store");
    let jog = database.put_entry(&sample_entry("jog")).await.expect("should store");

    let membership = database
        .add_to_dictionary(&NewMembership {
            learning_profile_id: profile.id,
            entry_id: run.id,
            notes: Some("irregular".to_string()),
        })
        .await
        .expect("should add to dictionary");
    database
        .add_to_dictionary(&NewMembership {
            learning_profile_id: profile.id,
            entry_id: jog.id,
            notes: None,
        })
        .await
        .expect("should add second word");

    let duplicate = database
        .add_to_dictionary(&NewMembership {
            learning_profile_id: profile.id,
            entry_id: run.id,
            notes: None,
        })
        .await;
    assert!(matches!(
        duplicate,
        Err(VocabError::Conflict(ConflictReason::DuplicateMembership { .. }))
    ));

    let updated = database
        .update_membership_notes(membership.id, Some("ran, run"))
        .await
        .expect("should update notes");
    assert_eq!(updated.notes.as_deref(), Some("ran, run"));

    let ids = database.profile_entry_ids(profile.id).await.expect("should list ids");
    assert_eq!(ids, HashSet::from([run.id, jog.id]));

    // Deleting an entry cascades to its memberships
    database.delete_entry(&key("jog", "en")).await.expect("should delete");
    let words = database.list_dictionary(profile.id).await.expect("should list");
    assert_eq!(words.len(), 1);
    assert_eq!(words[0].key.lemma, "run");

    database
        .remove_from_dictionary(membership.id)
        .await
        .expect("should remove");
    let gone = database.remove_from_dictionary(membership.id).await;
    assert!(matches!(gone, Err(VocabError::NotFound(_))));
}

#[tokio::test]
async fn add_to_dictionary_requires_existing_rows() {
    let (_temp_dir, database) = create_test_database().await;

    let result = database
        .add_to_dictionary(&NewMembership {
            learning_profile_id: 99,
            entry_id: 1,
            notes: None,
        })
        .await;
    assert!(matches!(result, Err(VocabError::NotFound(_))));
}

#[tokio::test]
async fn optimize_runs_on_populated_database() {
    let (_temp_dir, database) = create_test_database().await;

    database.put_entry(&sample_entry("run")).await.expect("should store");
    database.optimize().await.expect("should optimize");
    assert_eq!(database.count_entries().await.expect("should count"), 1);
}
