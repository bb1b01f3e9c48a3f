pub mod cache;
pub mod durable;
pub mod tiers;
pub mod vector;

use std::future::Future;
use std::time::Duration;

use crate::error::{Result, StrataError};

pub use cache::{DEFAULT_CACHE_CAPACITY, DistributedCacheClient, InMemoryCache};
pub use durable::{DurableStoreClient, InMemoryDurableStore, JsonlStore};
pub use tiers::{HotTier, TierManager};
pub use vector::{InMemoryVectorIndex, VectorIndex, cosine_similarity};

/// Run a collaborator call under a deadline, mapping expiry through `on_timeout`
pub(crate) async fn bounded<T, F>(
    deadline: Duration,
    call: F,
    on_timeout: impl FnOnce(String) -> StrataError,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout(format!(
            "timed out after {}ms",
            deadline.as_millis()
        ))),
    }
}
