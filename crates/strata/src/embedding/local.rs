//! On-device embeddings via fastembed
//!
//! The model runs on the blocking thread pool; inference takes `&mut`, so
//! calls are serialized through a mutex.

use std::sync::Arc;

use async_trait::async_trait;
use fastembed::{EmbeddingModel as FastEmbedModel, InitOptions, TextEmbedding};
use parking_lot::Mutex;
use tracing::info;

use crate::embedding::EmbeddingProvider;
use crate::error::{Result, StrataError};

/// Output dimension of the bundled model
pub const LOCAL_EMBEDDING_DIMENSION: usize = 384;

pub struct LocalEmbedding {
    model: Arc<Mutex<TextEmbedding>>,
}

impl std::fmt::Debug for LocalEmbedding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalEmbedding").finish_non_exhaustive()
    }
}

impl LocalEmbedding {
    /// Load the model; fails when `dimension` differs from what it produces
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension != LOCAL_EMBEDDING_DIMENSION {
            return Err(StrataError::Configuration(format!(
                "Local embeddings produce {LOCAL_EMBEDDING_DIMENSION} dimensions, \
                 compression.embedding_dimension is {dimension}"
            )));
        }

        let model = TextEmbedding::try_new(InitOptions::new(FastEmbedModel::MultilingualE5Small))
            .map_err(|e| StrataError::EmbeddingService(e.to_string()))?;
        info!("Local embedding model loaded");

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let model = Arc::clone(&self.model);
        let text = text.to_string();

        let embeddings = tokio::task::spawn_blocking(move || {
            model
                .lock()
                .embed(vec![text], None)
                .map_err(|e| StrataError::EmbeddingService(e.to_string()))
        })
        .await
        .map_err(|e| StrataError::EmbeddingService(format!("Embedding task failed: {e}")))??;

        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| StrataError::EmbeddingService("No embedding returned".to_string()))
    }

    fn dimension(&self) -> usize {
        LOCAL_EMBEDDING_DIMENSION
    }

    fn name(&self) -> &str {
        "local"
    }
}
