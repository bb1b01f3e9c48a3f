//! Test utilities for strata - deterministic and fault-injecting collaborators
//!
//! Each wrapper delegates to the shipped in-memory implementation and can be
//! switched into a failure mode at runtime, so tests can drive the service
//! through its degradation paths.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::embedding::EmbeddingProvider;
use crate::error::{Result, StrataError};
use crate::memory::{Interaction, ScoredSummary, SessionId, Summary};
use crate::storage::{
    DistributedCacheClient, DurableStoreClient, InMemoryCache, InMemoryDurableStore,
    InMemoryVectorIndex, VectorIndex,
};

/// Fixture timestamps start a day in the past
fn fixture_epoch() -> DateTime<Utc> {
    Utc::now() - Duration::days(1)
}

/// Interaction `n` of a session, one second after interaction `n - 1`
pub fn interaction_fixture(session: &SessionId, n: usize) -> Interaction {
    Interaction::new(
        session.clone(),
        "test-user",
        format!("Question {n} about the project."),
        format!("Answer {n} with some detail."),
    )
    .with_timestamp(fixture_epoch() + Duration::seconds(n as i64))
}

/// `count` consecutive fixtures starting at 1
pub fn interaction_batch(session: &SessionId, count: usize) -> Vec<Interaction> {
    let epoch = fixture_epoch();
    (1..=count)
        .map(|n| {
            interaction_fixture(session, n).with_timestamp(epoch + Duration::seconds(n as i64))
        })
        .collect()
}

/// Warm cache that can be made unavailable or unresponsive
#[derive(Debug, Default)]
pub struct FlakyCache {
    inner: InMemoryCache,
    unavailable: AtomicBool,
    stalled: AtomicBool,
    gets: AtomicUsize,
    sets: AtomicUsize,
    deletes: AtomicUsize,
}

impl FlakyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cache that fails every call from the start
    pub fn unavailable() -> Self {
        let cache = Self::default();
        cache.set_available(false);
        cache
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Make every call hang until the caller's deadline fires
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn set_count(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    async fn check(&self) -> Result<()> {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StrataError::CacheUnavailable(
                "connection refused".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl DistributedCacheClient for FlakyCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.check().await?;
        self.inner.get(key).await
    }

    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl_secs: u64) -> Result<()> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.check().await?;
        self.inner.set_with_ttl(key, value, ttl_secs).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.check().await?;
        self.inner.delete(key).await
    }
}

/// Durable store whose saves and reads can be made to fail
#[derive(Debug, Default)]
pub struct FailingDurableStore {
    inner: InMemoryDurableStore,
    fail_saves: AtomicBool,
    fail_reads: AtomicBool,
    save_attempts: AtomicUsize,
}

impl FailingDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that rejects every save from the start
    pub fn failing_saves() -> Self {
        let store = Self::default();
        store.set_fail_saves(true);
        store
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn save_attempts(&self) -> usize {
        self.save_attempts.load(Ordering::SeqCst)
    }

    /// Interactions actually committed, across all sessions
    pub fn committed(&self) -> usize {
        self.inner.total()
    }
}

#[async_trait]
impl DurableStoreClient for FailingDurableStore {
    async fn save(&self, interaction: &Interaction) -> Result<()> {
        self.save_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StrataError::Storage("disk full".to_string()));
        }
        self.inner.save(interaction).await
    }

    async fn find_by_session(&self, session: &SessionId, limit: usize) -> Result<Vec<Interaction>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StrataError::Storage("read failed".to_string()));
        }
        self.inner.find_by_session(session, limit).await
    }

    async fn count_by_session(&self, session: &SessionId) -> Result<usize> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StrataError::Storage("read failed".to_string()));
        }
        self.inner.count_by_session(session).await
    }
}

/// Embedding provider that always fails
#[derive(Debug)]
pub struct FailingEmbedding {
    dimension: usize,
    calls: AtomicUsize,
}

impl FailingEmbedding {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for FailingEmbedding {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StrataError::EmbeddingService(
            "embedding service unavailable".to_string(),
        ))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Vector index that records every accepted summary and can reject inserts
#[derive(Debug)]
pub struct RecordingVectorIndex {
    inner: InMemoryVectorIndex,
    inserted: Mutex<Vec<Summary>>,
    fail_inserts: AtomicBool,
}

impl RecordingVectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            inner: InMemoryVectorIndex::new(dimension),
            inserted: Mutex::new(Vec::new()),
            fail_inserts: AtomicBool::new(false),
        }
    }

    pub fn set_fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn inserted(&self) -> Vec<Summary> {
        self.inserted.lock().clone()
    }

    pub fn insert_count(&self) -> usize {
        self.inserted.lock().len()
    }
}

#[async_trait]
impl VectorIndex for RecordingVectorIndex {
    async fn insert(&self, summary: Summary) -> Result<()> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(StrataError::VectorIndex("index offline".to_string()));
        }
        self.inner.insert(summary.clone()).await?;
        self.inserted.lock().push(summary);
        Ok(())
    }

    async fn search_similar(
        &self,
        session: &SessionId,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredSummary>> {
        self.inner.search_similar(session, vector, top_k).await
    }

    async fn list(&self, session: &SessionId, limit: usize) -> Result<Vec<Summary>> {
        self.inner.list(session, limit).await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        self.inner.purge_expired(now).await
    }
}
