//! Integration tests for embedding providers
//!
//! Tests:
//! - RemoteEmbedding against a mock OpenAI-compatible server
//! - Retry on rate limiting, failure on server errors
//! - Retries bounded by the caller's deadline
//! - Dimension checking of remote responses
//! - Service degradation when the remote provider is down
//! - HashedEmbedding similarity behavior

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use strata::ContextServiceBuilder;
use strata::StrataError;
use strata::config::{Config, EmbeddingConfig};
use strata::embedding::{EmbeddingProvider, HashedEmbedding, RemoteEmbedding};
use strata::memory::{RetrievalSource, SessionId};
use strata::storage::{DurableStoreClient, InMemoryDurableStore, cosine_similarity};
use strata::testing::interaction_batch;

fn remote_config(api_url: String) -> EmbeddingConfig {
    EmbeddingConfig {
        provider: "remote".to_string(),
        api_url,
        model: "text-embedding-3-small".to_string(),
        timeout_secs: 5,
        ..Default::default()
    }
}

fn remote(server: &MockServer, dimension: usize) -> RemoteEmbedding {
    RemoteEmbedding::with_api_key(&remote_config(server.uri()), "test-key", dimension)
        .unwrap()
        .with_backoff(Duration::from_millis(5))
}

fn embedding_body(vector: &[f32]) -> serde_json::Value {
    json!({
        "object": "list",
        "data": [{ "object": "embedding", "index": 0, "embedding": vector }],
        "model": "text-embedding-3-small"
    })
}

// =============================================================================
// Remote provider
// =============================================================================

mod remote_tests {
    use super::*;

    #[tokio::test]
    async fn test_embed_sends_model_input_and_bearer_key() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(header("Authorization", "Bearer test-key"))
            .and(body_partial_json(json!({
                "model": "text-embedding-3-small",
                "input": "hello world"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(embedding_body(&[
                0.1, 0.2, 0.3, 0.4,
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let embedder = remote(&server, 4);
        let vector = embedder.embed("hello world").await.unwrap();

        assert_eq!(vector, vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(embedder.dimension(), 4);
        assert_eq!(embedder.name(), "remote");
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(embedding_body(&[1.0, 0.0])))
            .mount(&server)
            .await;

        let vector = remote(&server, 2).embed("retry me").await.unwrap();
        assert_eq!(vector, vec![1.0, 0.0]);
    }

    #[tokio::test]
    async fn test_persistent_rate_limit_gives_up() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(429))
            .expect(3)
            .mount(&server)
            .await;

        let result = remote(&server, 2).embed("never").await;
        match result {
            Err(StrataError::EmbeddingService(msg)) => assert!(msg.contains("rate limited")),
            other => panic!("expected embedding error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rate_limits_retried_within_deadline() {
        let server = MockServer::start().await;
        let deadline = Duration::from_millis(600);

        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(2)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(embedding_body(&[0.0, 1.0])))
            .mount(&server)
            .await;

        let embedder =
            RemoteEmbedding::with_api_key(&remote_config(server.uri()), "test-key", 2)
                .unwrap()
                .within_deadline(deadline);

        let vector = tokio::time::timeout(deadline, embedder.embed("busy"))
            .await
            .expect("retries should finish inside the deadline")
            .unwrap();
        assert_eq!(vector, vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn test_stalled_server_fails_within_deadline() {
        let server = MockServer::start().await;
        let deadline = Duration::from_millis(1500);

        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(embedding_body(&[1.0, 0.0]))
                    .set_delay(Duration::from_secs(10)),
            )
            .mount(&server)
            .await;

        let embedder =
            RemoteEmbedding::with_api_key(&remote_config(server.uri()), "test-key", 2)
                .unwrap()
                .within_deadline(deadline);
        assert!(embedder.worst_case() < deadline);

        let result = tokio::time::timeout(deadline, embedder.embed("slow"))
            .await
            .expect("every attempt should time out before the deadline");
        match result {
            Err(StrataError::EmbeddingService(msg)) => assert!(msg.contains("3 attempts")),
            other => panic!("expected embedding error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_server_error_is_not_retried() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
            .expect(1)
            .mount(&server)
            .await;

        let err = remote(&server, 2).embed("boom").await.unwrap_err();
        assert!(matches!(err, StrataError::EmbeddingService(_)));
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn test_wrong_dimension_is_rejected() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(embedding_body(&[0.5, 0.5])))
            .mount(&server)
            .await;

        let err = remote(&server, 4).embed("short").await.unwrap_err();
        assert!(matches!(err, StrataError::EmbeddingService(_)));
    }

    #[tokio::test]
    async fn test_malformed_response_is_rejected() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
            .mount(&server)
            .await;

        let err = remote(&server, 4).embed("empty").await.unwrap_err();
        assert!(matches!(err, StrataError::EmbeddingService(_)));
    }
}

// =============================================================================
// Service with a remote provider
// =============================================================================

mod service_tests {
    use super::*;

    #[tokio::test]
    async fn test_remote_outage_degrades_to_recency() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let config = Config::default();
        let dimension = config.compression.embedding_dimension;
        let durable = Arc::new(InMemoryDurableStore::new());
        let s = SessionId::try_from("remote-down").unwrap();
        for turn in interaction_batch(&s, 120) {
            durable.save(&turn).await.unwrap();
        }

        let service = ContextServiceBuilder::new(config)
            .durable(durable)
            .embedder(Arc::new(remote(&server, dimension)))
            .build()
            .await
            .unwrap();
        service.initialize(&s, "user").await;

        assert!(service.compress(&s).await.is_deferred());

        let relevant = service.retrieve_relevant(&s, "project question").await;
        assert_eq!(relevant.source, RetrievalSource::Recency);
        assert_eq!(relevant.interactions.len(), 10);
    }
}

// =============================================================================
// Hashed provider
// =============================================================================

mod hashed_tests {
    use super::*;

    #[tokio::test]
    async fn test_related_text_scores_higher() {
        let embedder = HashedEmbedding::new(384);

        let anchor = embedder
            .embed("deploying the kubernetes cluster with helm")
            .await
            .unwrap();
        let related = embedder
            .embed("helm chart for the kubernetes cluster")
            .await
            .unwrap();
        let unrelated = embedder
            .embed("baking sourdough bread at home")
            .await
            .unwrap();

        assert!(cosine_similarity(&anchor, &related) > cosine_similarity(&anchor, &unrelated));
    }

    #[tokio::test]
    async fn test_same_text_same_vector() {
        let embedder = HashedEmbedding::new(64);
        let a = embedder.embed("stable output").await.unwrap();
        let b = embedder.embed("stable output").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }
}
