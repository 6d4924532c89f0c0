use super::*;

#[test]
fn parses_well_formed_output() {
    let raw = r#"
        {
            "translations": [" бежать ", "бегать", "Бежать"],
            "definitions": ["to move swiftly on foot"],
            "examples": ["I run every morning."]
        }
    "#;

    let content = GeneratedContent::parse(raw).expect("should parse");
    assert_eq!(content.translations, vec!["бежать", "бегать"]);
    assert_eq!(content.definitions, vec!["to move swiftly on foot"]);
    assert_eq!(content.examples, vec!["I run every morning."]);
}

#[test]
fn examples_are_optional() {
    let content = GeneratedContent::parse(r#"{"translations":["casa"],"definitions":["a home"]}"#)
        .expect("should parse");
    assert!(content.examples.is_empty());
}

#[test]
fn rejects_schema_violations() {
    let cases = [
        "not json at all",
        r#"{"translations":["casa"]}"#,
        r#"{"translations":"casa","definitions":["a home"]}"#,
        r#"{"translations":["casa"],"definitions":["a home"],"notes":"extra"}"#,
        r#"{"translations":[],"definitions":["a home"]}"#,
        r#"{"translations":["casa"],"definitions":[]}"#,
        r#"{"translations":["casa","  "],"definitions":["a home"]}"#,
        r#"{"translations":["casa"],"definitions":["a home"],"examples":[""]}"#,
    ];

    for raw in cases {
        assert!(
            matches!(
                GeneratedContent::parse(raw),
                Err(VocabError::GenerationFailed(_))
            ),
            "should reject {raw}"
        );
    }
}

#[test]
fn schema_lists_every_field() {
    let schema = GeneratedContent::json_schema();
    let required: Vec<&str> = schema["required"]
        .as_array()
        .expect("required should be an array")
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    assert_eq!(required, vec!["translations", "definitions", "examples"]);
    assert_eq!(schema["additionalProperties"], serde_json::json!(false));
}

#[test]
fn language_names() {
    assert_eq!(language_name("ru"), "Русский");
    assert_eq!(language_name("pt"), "Português");
    assert_eq!(language_name("tlh"), "tlh");
}
