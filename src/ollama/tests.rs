use super::*;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> OllamaClient {
    let base_url = Url::parse(&server.uri()).expect("mock server uri should parse");
    OllamaClient::new(base_url)
        .with_timeout(Duration::from_secs(5))
        .with_backoff(Duration::from_millis(1))
}

fn tags_body() -> serde_json::Value {
    serde_json::json!({
        "models": [
            { "name": "all-minilm:latest", "size": 45_960_996_u64, "digest": "abc" },
            { "name": "gemma3n:e4b" }
        ]
    })
}

#[test]
fn client_from_config() {
    let config = OllamaConfig {
        host: "test-host".to_string(),
        port: 1234,
        retry_attempts: 4,
        ..OllamaConfig::default()
    };
    let client = OllamaClient::from_config(&config).expect("should create client");

    assert_eq!(client.base_url().host_str(), Some("test-host"));
    assert_eq!(client.base_url().port(), Some(1234));
    assert_eq!(client.retry_attempts, 4);

    let client = client.with_retry_attempts(0);
    assert_eq!(client.retry_attempts, 1);
}

#[test]
fn model_name_matching() {
    assert!(model_matches("all-minilm:latest", "all-minilm:latest"));
    assert!(model_matches("all-minilm:latest", "all-minilm"));
    assert!(!model_matches("gemma3n:e4b", "gemma3n"));
    assert!(!model_matches("all-minilm:latest", "all-minilm:v2"));
}

#[tokio::test]
async fn list_models_and_health_check() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(tags_body()))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let result = tokio::task::spawn_blocking(move || {
        let models = client.list_models()?;
        client.ping()?;
        client.health_check(&["all-minilm", "gemma3n:e4b"])?;
        let missing = client.health_check(&["llama3"]);
        Ok::<_, anyhow::Error>((models, missing))
    })
    .await
    .expect("blocking task should join");

    let (models, missing) = result.expect("requests should succeed");
    assert_eq!(models.len(), 2);
    assert_eq!(models[0].name, "all-minilm:latest");
    assert!(missing.is_err());
}

#[tokio::test]
async fn server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).with_retry_attempts(3);
    let body = tokio::task::spawn_blocking(move || {
        client.post_json("/api/embed", &serde_json::json!({ "input": ["x"] }))
    })
    .await
    .expect("blocking task should join")
    .expect("third attempt should succeed");

    assert_eq!(body, "ok");
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).with_retry_attempts(5);
    let result = tokio::task::spawn_blocking(move || {
        client.post_json("/api/chat", &serde_json::json!({}))
    })
    .await
    .expect("blocking task should join");

    let error = result.expect_err("404 should fail");
    assert!(format!("{error:#}").contains("HTTP 404"));
}

#[tokio::test]
async fn single_attempt_gives_up_after_one_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let result = tokio::task::spawn_blocking(move || {
        client.post_json("/api/chat", &serde_json::json!({}))
    })
    .await
    .expect("blocking task should join");

    assert!(result.is_err());
}
