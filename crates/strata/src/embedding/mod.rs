//! Embedding providers for summary compression and relevance search
//!
//! Every provider produces vectors of one fixed dimension. The engine checks
//! that dimension against `compression.embedding_dimension` before a vector
//! reaches the index.

pub mod remote;

#[cfg(feature = "local-embeddings")]
pub mod local;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::config::EmbeddingConfig;
use crate::error::{Result, StrataError};

#[cfg(feature = "local-embeddings")]
pub use local::LocalEmbedding;
pub use remote::RemoteEmbedding;

/// Text to fixed-dimension vector
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Length of every vector this provider returns
    fn dimension(&self) -> usize;

    fn name(&self) -> &str;
}

/// Deterministic feature-hashed bag-of-words embedding
///
/// Each lowercase token is hashed into one of `dimension` buckets with a
/// hash-derived sign, and the result is L2-normalized. Texts that share
/// vocabulary land close together, which is enough for similarity search
/// without a model.
#[derive(Debug, Clone)]
pub struct HashedEmbedding {
    dimension: usize,
}

impl HashedEmbedding {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn vectorize(&self, text: &str) -> Option<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];
        let mut tokens = 0usize;

        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.to_lowercase().hash(&mut hasher);
            let hash = hasher.finish();

            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
            tokens += 1;
        }

        if tokens == 0 {
            return None;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            return None;
        }
        vector.iter_mut().for_each(|x| *x /= norm);
        Some(vector)
    }
}

#[async_trait]
impl EmbeddingProvider for HashedEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.vectorize(text).ok_or_else(|| {
            StrataError::EmbeddingService("Text contains no embeddable tokens".to_string())
        })
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hashed"
    }
}

/// Build the provider named by `config.provider`
///
/// `dimension` is the configured embedding dimension; providers that cannot
/// produce it are rejected here rather than at first use. `deadline` is the
/// bound the service puts on every embed call; remote retries are sized to
/// fit inside it.
pub fn build_provider(
    config: &EmbeddingConfig,
    dimension: usize,
    deadline: Duration,
) -> Result<Arc<dyn EmbeddingProvider>> {
    let provider: Arc<dyn EmbeddingProvider> = match config.provider.as_str() {
        "hashed" => Arc::new(HashedEmbedding::new(dimension)),
        "remote" => Arc::new(RemoteEmbedding::new(config, dimension)?.within_deadline(deadline)),
        #[cfg(feature = "local-embeddings")]
        "local" => Arc::new(LocalEmbedding::new(dimension)?),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => {
            return Err(StrataError::Configuration(
                "embedding.provider = \"local\" requires building with --features local-embeddings"
                    .to_string(),
            ));
        }
        other => {
            return Err(StrataError::Configuration(format!(
                "Unknown embedding provider: {other}"
            )));
        }
    };

    info!(
        provider = provider.name(),
        dimension = provider.dimension(),
        "Embedding provider ready"
    );
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::cosine_similarity;

    #[tokio::test]
    async fn test_hashed_dimension_and_norm() {
        let provider = HashedEmbedding::new(64);
        let vector = provider.embed("The borrow checker rejects this").await.unwrap();

        assert_eq!(vector.len(), 64);
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_hashed_is_deterministic_and_case_insensitive() {
        let provider = HashedEmbedding::new(128);
        let a = provider.embed("Tokio runtime").await.unwrap();
        let b = provider.embed("tokio RUNTIME").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_hashed_similarity_tracks_vocabulary() {
        let provider = HashedEmbedding::new(384);
        let base = provider
            .embed("how do lifetimes work with the borrow checker")
            .await
            .unwrap();
        let related = provider
            .embed("borrow checker lifetimes explained")
            .await
            .unwrap();
        let unrelated = provider
            .embed("recipe for sourdough bread starter")
            .await
            .unwrap();

        assert!(cosine_similarity(&base, &related) > cosine_similarity(&base, &unrelated));
    }

    #[tokio::test]
    async fn test_hashed_rejects_empty_text() {
        let provider = HashedEmbedding::new(16);
        let result = provider.embed("  ... !!").await;
        assert!(matches!(result, Err(StrataError::EmbeddingService(_))));
    }

    #[test]
    fn test_build_hashed_provider() {
        let provider =
            build_provider(&EmbeddingConfig::default(), 384, Duration::from_secs(3)).unwrap();
        assert_eq!(provider.name(), "hashed");
        assert_eq!(provider.dimension(), 384);
    }

    #[test]
    fn test_build_unknown_provider_fails() {
        let config = EmbeddingConfig {
            provider: "magic".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            build_provider(&config, 384, Duration::from_secs(3)),
            Err(StrataError::Configuration(_))
        ));
    }

    #[cfg(not(feature = "local-embeddings"))]
    #[test]
    fn test_local_provider_requires_feature() {
        let config = EmbeddingConfig {
            provider: "local".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            build_provider(&config, 384, Duration::from_secs(3)),
            Err(StrataError::Configuration(_))
        ));
    }
}
