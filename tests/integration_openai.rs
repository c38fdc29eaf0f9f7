#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

//! The OpenAI client wired into the full service, against a mock server

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use note_search::cache::{IndexCache, MemoryStore, SnapshotStore};
use note_search::config::{Config, OpenAiConfig};
use note_search::embeddings::{EmbeddingProvider, OpenAiClient};
use note_search::service::EmbeddingSearch;
use note_search::vault::{DocumentSource, FsVault};

fn test_config(server: &MockServer, api_key: &str) -> Config {
    Config {
        openai: OpenAiConfig {
            base_url: format!("{}/v1", server.uri()),
            api_key: api_key.to_string(),
            ..OpenAiConfig::default()
        },
        ..Config::default()
    }
}

fn service_for(config: &Config, vault: &tempfile::TempDir) -> (EmbeddingSearch, Arc<MemoryStore>) {
    let client = OpenAiClient::new(&config.openai).expect("Failed to create client");
    let store = Arc::new(MemoryStore::new());
    let service = EmbeddingSearch::new(
        Arc::new(client) as Arc<dyn EmbeddingProvider>,
        Arc::new(FsVault::new(vault.path()).expect("should open vault")) as Arc<dyn DocumentSource>,
        Arc::clone(&store) as Arc<dyn SnapshotStore>,
        Arc::new(IndexCache::new()),
        config,
    )
    .expect("Failed to create service");
    (service, store)
}

#[tokio::test]
async fn index_and_search_through_openai() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(body_partial_json(json!({ "input": ["note.md\nHello there"] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "index": 0, "embedding": [0.6, 0.8] }],
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(body_partial_json(json!({ "input": ["greeting"] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "index": 0, "embedding": [0.6, 0.8] }],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let vault = tempfile::TempDir::new().expect("should create temp dir");
    std::fs::write(vault.path().join("note.md"), "Hello there").expect("should write note");
    let (service, store) = service_for(&test_config(&server, "sk-test"), &vault);

    service
        .index_document("note.md")
        .await
        .expect("indexing should succeed");
    assert_eq!(store.save_count(), 1);
    let saved = store.latest().expect("snapshot saved");
    assert_eq!(saved.model, "text-embedding-ada-002");

    let results = service
        .search("greeting", 5)
        .await
        .expect("search should succeed");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].document_key, "note.md");
    assert!((results[0].similarity - 1.0).abs() < 1e-6);
}

#[tokio::test]
async fn service_failure_leaves_index_untouched() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": { "message": "Rate limit reached" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let vault = tempfile::TempDir::new().expect("should create temp dir");
    std::fs::write(vault.path().join("note.md"), "Hello there").expect("should write note");
    let (service, store) = service_for(&test_config(&server, "sk-test"), &vault);

    let error = service
        .index_document("note.md")
        .await
        .expect_err("rate limit should fail the index attempt");
    assert!(error.is_service_error());
    assert!(service.indexed_keys().is_empty());
    assert_eq!(store.save_count(), 0);
}

#[tokio::test]
async fn reconfigured_credential_is_used() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(header("Authorization", "Bearer sk-rotated"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "index": 0, "embedding": [1.0, 0.0] }],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let vault = tempfile::TempDir::new().expect("should create temp dir");
    let (service, _) = service_for(&test_config(&server, "sk-stale"), &vault);

    // The stale key matches no mock
    assert!(service.search("query", 5).await.is_err());

    service.reconfigure("sk-rotated");
    let results = service
        .search("query", 5)
        .await
        .expect("search should succeed");
    assert!(results.is_empty());
}
