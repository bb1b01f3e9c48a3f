//! Integration tests for the durable and warm storage layers
//!
//! Tests:
//! - JsonlStore persistence across reopen
//! - Session isolation on disk
//! - A service rebuilt over the same data directory
//! - Warm cache TTL expiry

use std::sync::Arc;
use std::time::Duration;

use strata::ContextServiceBuilder;
use strata::config::Config;
use strata::memory::{SessionId, WarmSource};
use strata::storage::{DistributedCacheClient, DurableStoreClient, InMemoryCache, JsonlStore};
use strata::testing::interaction_batch;

fn session(id: &str) -> SessionId {
    SessionId::try_from(id).unwrap()
}

// =============================================================================
// JsonlStore
// =============================================================================

mod jsonl_tests {
    use super::*;

    #[tokio::test]
    async fn test_interactions_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let s = session("durable");
        let turns = interaction_batch(&s, 4);

        {
            let store = JsonlStore::connect(dir.path()).await.unwrap();
            for turn in &turns {
                store.save(turn).await.unwrap();
            }
        }

        let reopened = JsonlStore::connect(dir.path()).await.unwrap();
        let found = reopened.find_by_session(&s, 10).await.unwrap();

        let ids: Vec<_> = found.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![turns[3].id, turns[2].id, turns[1].id, turns[0].id]);
        assert_eq!(found[0], turns[3]);
        assert_eq!(reopened.count_by_session(&s).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlStore::connect(dir.path()).await.unwrap();
        let a = session("alpha");
        let b = session("beta");

        for turn in interaction_batch(&a, 3) {
            store.save(&turn).await.unwrap();
        }
        for turn in interaction_batch(&b, 2) {
            store.save(&turn).await.unwrap();
        }

        assert_eq!(store.count_by_session(&a).await.unwrap(), 3);
        assert_eq!(store.count_by_session(&b).await.unwrap(), 2);
        assert!(store.sessions_dir().join("alpha.jsonl").is_file());
        assert!(store.sessions_dir().join("beta.jsonl").is_file());
    }

    #[tokio::test]
    async fn test_concurrent_saves_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonlStore::connect(dir.path()).await.unwrap());
        let s = session("parallel");

        let mut tasks = Vec::new();
        for turn in interaction_batch(&s, 25) {
            let store = store.clone();
            tasks.push(tokio::spawn(async move { store.save(&turn).await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(store.count_by_session(&s).await.unwrap(), 25);
    }
}

// =============================================================================
// Service over persisted data
// =============================================================================

mod restart_tests {
    use super::*;

    #[tokio::test]
    async fn test_rebuilt_service_sees_persisted_history() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.stores.data_dir = dir.path().to_path_buf();
        let s = session("restart");
        let turns = interaction_batch(&s, 7);

        {
            let service = ContextServiceBuilder::new(config.clone())
                .build()
                .await
                .unwrap();
            service.initialize(&s, "user").await;
            for turn in &turns {
                service.add_interaction(&s, turn.clone()).await.unwrap();
            }
        }

        let service = ContextServiceBuilder::new(config).build().await.unwrap();
        let view = service.get_context(&s).await;

        assert!(view.hot.is_empty());
        assert_eq!(view.warm_source, Some(WarmSource::DurableFallback));
        assert_eq!(view.warm.len(), 7);
        assert_eq!(view.warm[0].id, turns[6].id);
        assert_eq!(view.total_interactions, 7);
        assert_eq!(
            service.get_context_summary(&s).await,
            "Session restart: 7 interactions, ~7.0 KB"
        );
    }
}

// =============================================================================
// Warm cache
// =============================================================================

mod cache_tests {
    use super::*;

    #[tokio::test]
    async fn test_entries_expire_after_ttl() {
        let cache = InMemoryCache::new(16);
        cache.set_with_ttl("short", b"v".to_vec(), 1).await.unwrap();
        cache.set_with_ttl("long", b"v".to_vec(), 3600).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert!(cache.get("short").await.unwrap().is_none());
        assert_eq!(cache.get("long").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_delete_missing_key_is_ok() {
        let cache = InMemoryCache::new(16);
        cache.delete("absent").await.unwrap();
        assert!(cache.get("absent").await.unwrap().is_none());
    }
}
