//! Remote embedder tests against a mock OpenAI-compatible endpoint.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use strata_embeddings::config::RemoteConfig;
use strata_embeddings::{
    BackendKind, BackendSet, EmbeddingBackend, EmbeddingError, EmbeddingRequest,
    EmbeddingsConfig, EmbeddingsService, LocalEncoder, ModelDescriptor, RemoteEmbedder,
};

const MODEL: &str = "remote-small";

fn remote_config(server: &MockServer, timeout_secs: u64) -> RemoteConfig {
    RemoteConfig {
        base_url: format!("{}/v1", server.uri()),
        api_key: Some("secret".to_string()),
        timeout_secs,
    }
}

fn model() -> ModelDescriptor {
    ModelDescriptor::new(MODEL, 3, 512, BackendKind::RemoteEmbedder)
}

fn embed_body(texts: &[&str]) -> Value {
    json!({
        "input": texts,
        "model": MODEL,
        "encoding_format": "float"
    })
}

fn texts(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

async fn mount_models(server: &MockServer, ids: &[&str]) {
    let data: Vec<Value> = ids.iter().map(|id| json!({ "id": id })).collect();
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": data })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_batch_call_places_items_by_index() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(header("authorization", "Bearer secret"))
        .and(body_json(embed_body(&["first", "second"])))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                { "embedding": [0.0, 1.0, 0.0], "index": 1 },
                { "embedding": [1.0, 0.0, 0.0], "index": 0 }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let embedder = RemoteEmbedder::new(&remote_config(&server, 5)).unwrap();
    let output = embedder
        .embed(&texts(&["first", "second"]), &model())
        .await
        .unwrap();

    assert_eq!(output.vectors, vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]]);
    assert!(output.degraded.is_empty());
}

#[tokio::test]
async fn test_failed_batch_falls_back_per_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(body_json(embed_body(&["good", "bad"])))
        .respond_with(ResponseTemplate::new(500).set_body_string("batch rejected"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(body_json(embed_body(&["good"])))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "embedding": [0.5, 0.5, 0.0], "index": 0 }]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(body_json(embed_body(&["bad"])))
        .respond_with(ResponseTemplate::new(400).set_body_string("input rejected"))
        .expect(1)
        .mount(&server)
        .await;

    let embedder = RemoteEmbedder::new(&remote_config(&server, 5)).unwrap();
    let output = embedder
        .embed(&texts(&["good", "bad"]), &model())
        .await
        .unwrap();

    assert_eq!(output.vectors, vec![vec![0.5, 0.5, 0.0], vec![0.0, 0.0, 0.0]]);
    assert_eq!(output.degraded, vec![1]);
}

#[tokio::test]
async fn test_wrong_length_element_is_degraded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                { "embedding": [1.0, 0.0, 0.0], "index": 0 },
                { "embedding": [1.0, 0.0], "index": 1 }
            ]
        })))
        .mount(&server)
        .await;

    let embedder = RemoteEmbedder::new(&remote_config(&server, 5)).unwrap();
    let output = embedder
        .embed(&texts(&["a", "b"]), &model())
        .await
        .unwrap();

    assert_eq!(output.vectors[1], vec![0.0, 0.0, 0.0]);
    assert_eq!(output.degraded, vec![1]);
}

#[tokio::test]
async fn test_timeout_fails_whole_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(3))
                .set_body_json(json!({ "data": [] })),
        )
        .mount(&server)
        .await;

    let embedder = RemoteEmbedder::new(&remote_config(&server, 1)).unwrap();
    let result = embedder.embed(&texts(&["slow", "slower"]), &model()).await;

    assert!(matches!(
        result,
        Err(EmbeddingError::BackendTimeout { timeout_secs: 1 })
    ));
}

#[tokio::test]
async fn test_availability_follows_model_listing() {
    let server = MockServer::start().await;
    mount_models(&server, &["remote-small:latest", "something-else"]).await;

    let embedder = RemoteEmbedder::new(&remote_config(&server, 5)).unwrap();
    assert!(embedder.is_available(&model()).await);

    let absent = ModelDescriptor::new("absent", 3, 512, BackendKind::RemoteEmbedder);
    assert!(!embedder.is_available(&absent).await);
    assert!(matches!(
        embedder.load(&absent).await,
        Err(EmbeddingError::ModelUnavailable(_))
    ));
}

#[tokio::test]
async fn test_service_generates_through_remote_model() {
    let server = MockServer::start().await;
    mount_models(&server, &[MODEL]).await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(body_json(embed_body(&["remote text"])))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "embedding": [3.0, 4.0, 0.0], "index": 0 }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let remote = remote_config(&server, 5);
    let backends = BackendSet::new(
        Arc::new(LocalEncoder::new()),
        Arc::new(RemoteEmbedder::new(&remote).unwrap()),
    );
    let config = EmbeddingsConfig {
        remote,
        ..EmbeddingsConfig::default()
    }
    .with_model(model());
    let service = EmbeddingsService::with_backends(config, backends).unwrap();

    let request = EmbeddingRequest::new(["remote text"]).with_model(MODEL);
    let first = service.generate_embeddings(request.clone()).await.unwrap();
    let second = service.generate_embeddings(request).await.unwrap();

    assert_eq!(first.embeddings, vec![vec![0.6, 0.8, 0.0]]);
    assert_eq!(second.cache_hits, 1);

    let ids: Vec<String> = service
        .list_models()
        .await
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert!(ids.contains(&MODEL.to_string()));
    assert!(!ids.contains(&"nomic-embed-text".to_string()));
}
