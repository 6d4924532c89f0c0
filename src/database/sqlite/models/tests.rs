use super::*;

#[test]
fn entry_key_normalization() {
    let key = EntryKey::new("  Run  ", " EN ").expect("should build key");
    assert_eq!(key.lemma, "run");
    assert_eq!(key.language, "en");

    let phrase = EntryKey::new("Give   UP", "en").expect("should build key");
    assert_eq!(phrase.lemma, "give up");
    assert_eq!(phrase.to_string(), "give up@en");
}

#[test]
fn entry_key_rejects_blank_input() {
    assert!(matches!(
        EntryKey::new("   ", "en"),
        Err(VocabError::InvalidRequest(_))
    ));
    assert!(matches!(
        EntryKey::new("run", ""),
        Err(VocabError::InvalidRequest(_))
    ));
}

#[test]
fn vector_blob_encoding() {
    let vector = vec![0.25_f32, -1.5, 3.0e-7, 42.0];
    let blob = encode_vector(&vector);
    assert_eq!(blob.len(), 16);
    assert_eq!(decode_vector(&blob).expect("should decode"), vector);

    assert!(decode_vector(&blob[..15]).is_err());
}

#[test]
fn embedding_columns_require_model_tag() {
    let now = Utc::now();
    let blob = encode_vector(&[1.0, 0.0]);

    let untagged = decode_embedding_columns(Some(blob.clone()), None, Some(now))
        .expect("should decode columns");
    assert!(untagged.is_none());

    let tagged = decode_embedding_columns(Some(blob), Some("m1".to_string()), Some(now))
        .expect("should decode columns")
        .expect("should have embedding");
    assert_eq!(tagged.model, "m1");
    assert_eq!(tagged.vector, vec![1.0, 0.0]);
}

#[test]
fn child_kind_tables() {
    let tables: Vec<&str> = ChildKind::ALL.iter().map(|k| k.table()).collect();
    assert_eq!(tables, vec!["translations", "definitions", "examples"]);
    assert_eq!(ChildKind::Definition.to_string(), "definition");
}
