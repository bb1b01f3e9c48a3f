use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::embedding::{EmbeddingProvider, build_provider};
use crate::error::Result;
use crate::service::ContextService;
use crate::storage::{
    DistributedCacheClient, DurableStoreClient, InMemoryCache, InMemoryVectorIndex, JsonlStore,
    VectorIndex,
};

/// Wires a [`ContextService`] from [`Config`], filling in any collaborator
/// that was not supplied explicitly
///
/// Defaults: [`InMemoryCache`] sized by `stores.cache_capacity`,
/// [`JsonlStore`] under `stores.data_dir`, the provider named by
/// `embedding.provider`, and an [`InMemoryVectorIndex`].
#[derive(Default)]
pub struct ContextServiceBuilder {
    config: Config,
    cache: Option<Arc<dyn DistributedCacheClient>>,
    durable: Option<Arc<dyn DurableStoreClient>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    index: Option<Arc<dyn VectorIndex>>,
}

impl ContextServiceBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn cache(mut self, cache: Arc<dyn DistributedCacheClient>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn durable(mut self, durable: Arc<dyn DurableStoreClient>) -> Self {
        self.durable = Some(durable);
        self
    }

    pub fn embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub async fn build(self) -> Result<ContextService> {
        let config = self.config;
        config.validate()?;
        let dimension = config.compression.embedding_dimension;

        let cache: Arc<dyn DistributedCacheClient> = match self.cache {
            Some(cache) => cache,
            None => Arc::new(InMemoryCache::new(config.stores.cache_capacity)),
        };

        let durable: Arc<dyn DurableStoreClient> = match self.durable {
            Some(durable) => durable,
            None => {
                info!("Initializing storage at: {}", config.stores.data_dir.display());
                Arc::new(JsonlStore::connect(&config.stores.data_dir).await?)
            }
        };

        let embedder = match self.embedder {
            Some(embedder) => embedder,
            None => build_provider(&config.embedding, dimension, config.stores.timeout())?,
        };

        let index: Arc<dyn VectorIndex> = match self.index {
            Some(index) => index,
            None => Arc::new(InMemoryVectorIndex::new(dimension)),
        };

        ContextService::new(config, cache, durable, embedder, index)
    }
}
