use super::*;
use crate::database::sqlite::models::StoredEmbedding;
use chrono::Utc;

fn key(lemma: &str) -> EntryKey {
    EntryKey::new(lemma, "en").expect("should build key")
}

fn stored(key: EntryKey, vector: Vec<f32>, model: &str) -> EntryVector {
    EntryVector {
        entry_id: 0,
        key,
        embedding: Some(StoredEmbedding {
            vector,
            model: model.to_string(),
            updated_at: Utc::now(),
        }),
    }
}

#[test]
fn identical_vector_ranks_first() {
    let index = VectorIndex::new("m1", 3);
    index.upsert(&key("walk"), &[0.0, 1.0, 0.0]).expect("should upsert");
    index.upsert(&key("run"), &[1.0, 0.2, 0.0]).expect("should upsert");
    index.upsert(&key("sit"), &[0.0, 0.0, 1.0]).expect("should upsert");

    let hits = index.query(&[1.0, 0.2, 0.0], 3, -1.0).expect("should query");
    assert_eq!(hits[0].key, key("run"));
    assert!((hits[0].similarity - 1.0).abs() < 1e-6);
    assert!(hits.windows(2).all(|w| w[0].similarity >= w[1].similarity));
}

#[test]
fn upsert_is_idempotent() {
    let index = VectorIndex::new("m1", 2);
    index.upsert(&key("run"), &[0.6, 0.8]).expect("should upsert");
    index.upsert(&key("jog"), &[0.8, 0.6]).expect("should upsert");
    let before = index.query(&[1.0, 0.0], 10, 0.0).expect("should query");

    index.upsert(&key("run"), &[0.6, 0.8]).expect("should upsert");
    let after = index.query(&[1.0, 0.0], 10, 0.0).expect("should query");

    assert_eq!(before, after);
    assert_eq!(index.len(), 2);
}

#[test]
fn ties_keep_insertion_order() {
    let index = VectorIndex::new("m1", 2);
    for lemma in ["c", "a", "b"] {
        index.upsert(&key(lemma), &[1.0, 1.0]).expect("should upsert");
    }

    let hits = index.query(&[1.0, 1.0], 3, 0.5).expect("should query");
    let order: Vec<&str> = hits.iter().map(|h| h.key.lemma.as_str()).collect();
    assert_eq!(order, vec!["c", "a", "b"]);
}

#[test]
fn replaced_vector_keeps_position() {
    let index = VectorIndex::new("m1", 2);
    index.upsert(&key("first"), &[0.0, 1.0]).expect("should upsert");
    index.upsert(&key("second"), &[1.0, 0.0]).expect("should upsert");
    index.upsert(&key("first"), &[1.0, 0.0]).expect("should upsert");

    let hits = index.query(&[1.0, 0.0], 2, 0.9).expect("should query");
    let order: Vec<&str> = hits.iter().map(|h| h.key.lemma.as_str()).collect();
    assert_eq!(order, vec!["first", "second"]);
    assert_eq!(index.keys(), vec![key("first"), key("second")]);
}

#[test]
fn threshold_and_top_k_are_applied() {
    let index = VectorIndex::new("m1", 2);
    index.upsert(&key("same"), &[1.0, 0.0]).expect("should upsert");
    index.upsert(&key("close"), &[0.95, 0.05]).expect("should upsert");
    index.upsert(&key("orthogonal"), &[0.0, 1.0]).expect("should upsert");
    index.upsert(&key("opposite"), &[-1.0, 0.0]).expect("should upsert");

    let above = index.query(&[1.0, 0.0], 10, 0.85).expect("should query");
    assert_eq!(above.len(), 2);
    assert!(above.iter().all(|h| h.similarity >= 0.85));

    let top_one = index.query(&[1.0, 0.0], 1, -1.0).expect("should query");
    assert_eq!(top_one.len(), 1);
    assert_eq!(top_one[0].key, key("same"));

    assert!(index.query(&[1.0, 0.0], 0, -1.0).expect("should query").is_empty());
}

#[test]
fn query_where_filters_keys() {
    let index = VectorIndex::new("m1", 2);
    let english = key("house");
    let spanish = EntryKey::new("casa", "es").expect("should build key");
    index.upsert(&english, &[1.0, 0.0]).expect("should upsert");
    index.upsert(&spanish, &[1.0, 0.0]).expect("should upsert");

    let hits = index
        .query_where(&[1.0, 0.0], 5, 0.0, |k| k.language == "es")
        .expect("should query");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].key, spanish);
}

#[test]
fn remove_is_noop_when_absent() {
    let index = VectorIndex::new("m1", 2);
    index.upsert(&key("run"), &[1.0, 0.0]).expect("should upsert");

    assert!(index.remove(&key("run")));
    assert!(!index.remove(&key("run")));
    assert!(!index.contains(&key("run")));
    assert!(index.is_empty());
}

#[test]
fn invalid_vectors_are_rejected() {
    let index = VectorIndex::new("m1", 3);

    assert_eq!(
        index.upsert(&key("run"), &[1.0, 0.0]),
        Err(IndexError::DimensionMismatch {
            expected: 3,
            actual: 2
        })
    );
    assert_eq!(
        index.upsert(&key("run"), &[0.0, 0.0, 0.0]),
        Err(IndexError::ZeroVector)
    );
    assert_eq!(
        index.upsert(&key("run"), &[f32::NAN, 1.0, 0.0]),
        Err(IndexError::NonFinite)
    );
    assert!(index.query(&[1.0], 5, 0.0).is_err());
    assert!(index.is_empty());
}

#[test]
fn rebuild_replaces_contents_and_skips_other_models() {
    let index = VectorIndex::new("m2", 2);
    index.upsert(&key("stale"), &[1.0, 0.0]).expect("should upsert");

    let vectors = vec![
        stored(key("run"), vec![1.0, 0.0], "m2"),
        stored(key("old"), vec![1.0, 0.0], "m1"),
        EntryVector {
            entry_id: 0,
            key: key("bare"),
            embedding: None,
        },
        stored(key("broken"), vec![1.0, 0.0, 0.0], "m2"),
        stored(key("jog"), vec![0.9, 0.1], "m2"),
    ];

    let summary = index.rebuild(index.mark(), &vectors);
    assert_eq!(
        summary,
        RebuildSummary {
            indexed: 2,
            without_embedding: 1,
            other_model: 1,
            invalid: 1,
            written_during_rebuild: 0,
        }
    );
    assert_eq!(index.keys(), vec![key("run"), key("jog")]);
    assert!(!index.contains(&key("stale")));
}

#[test]
fn rebuild_keeps_writes_made_after_the_snapshot() {
    let index = VectorIndex::new("m1", 2);
    index.upsert(&key("run"), &[1.0, 0.0]).expect("should upsert");
    index.upsert(&key("gone"), &[0.0, 1.0]).expect("should upsert");

    let mark = index.mark();
    // Store snapshot as read by a repair
    let snapshot = vec![
        stored(key("run"), vec![1.0, 0.0], "m1"),
        stored(key("gone"), vec![0.0, 1.0], "m1"),
    ];

    // A commit and a stale-hit removal land before the swap
    index.upsert(&key("jog"), &[0.9, 0.1]).expect("should upsert");
    index.upsert(&key("run"), &[0.6, 0.8]).expect("should upsert");
    assert!(index.remove(&key("gone")));

    let summary = index.rebuild(mark, &snapshot);
    assert_eq!(summary.indexed, 2);
    assert_eq!(summary.written_during_rebuild, 3);
    assert_eq!(index.keys(), vec![key("run"), key("jog")]);

    // run keeps the newer vector, not the snapshot's
    let hits = index.query(&[0.6, 0.8], 1, 0.0).expect("should query");
    assert_eq!(hits[0].key, key("run"));
    assert!((hits[0].similarity - 1.0).abs() < 1e-5);

    // The next rebuild starts from a fresh mark and drops nothing it shouldn't
    let later = index.rebuild(index.mark(), &[stored(key("run"), vec![1.0, 0.0], "m1")]);
    assert_eq!(later.written_during_rebuild, 0);
    assert_eq!(index.keys(), vec![key("run")]);
}

#[test]
fn cosine_similarity_of_raw_vectors() {
    assert!((cosine_similarity(&[2.0, 0.0], &[5.0, 0.0]) - 1.0).abs() < 1e-6);
    assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    assert!((cosine_similarity(&[0.0, 0.0], &[1.0, 0.0])).abs() < f32::EPSILON);
    assert!((cosine_similarity(&[1.0], &[1.0, 0.0])).abs() < f32::EPSILON);
}
