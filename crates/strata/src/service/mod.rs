//! Context service: the public contract of the engine
//!
//! Orchestrates the hot buffer, warm cache, durable store, compression and
//! metrics for every session. Mutating operations on one session are
//! serialized by that session's async mutex; reads take no session lock and
//! copy the hot buffer under its own brief read lock.
//!
//! Collaborator failures never escape except as
//! [`StrataError::Persistence`] from [`ContextService::add_interaction`], or
//! [`StrataError::SessionState`] for an interaction filed under the wrong
//! session and, when strict sessions are enabled, for writes to sessions
//! that are not active.
//!
//! A session's in-process state lives from its first use until a cleanup
//! that leaves nothing pending; after that the session reads as
//! `Uninitialized` again.

mod builder;

pub use builder::ContextServiceBuilder;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::RwLock;
use tokio::sync::{Mutex as TokioMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::compression::{CompressionEngine, CompressionOutcome};
use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::error::{Result, StrataError};
use crate::memory::{
    EnrichedView, Interaction, MemoryTier, RelevantContext, RetrievalSource, SessionId,
    SessionPhase, Summary, WarmSource,
};
use crate::metrics::{MetricsTracker, SessionMetrics};
use crate::storage::{
    DistributedCacheClient, DurableStoreClient, HotTier, TierManager, VectorIndex, bounded,
};

/// Upper bound on summaries attached to a context view
const MAX_VIEW_SUMMARIES: usize = 100;

/// Per-session coordination state
///
/// `writes` serializes mutating operations and guards the interactions
/// whose durable save has not succeeded yet. `phase` is readable without
/// waiting on in-flight writes.
#[derive(Debug, Default)]
struct SessionHandle {
    writes: Arc<TokioMutex<Vec<Interaction>>>,
    phase: RwLock<SessionPhase>,
}

impl SessionHandle {
    fn phase(&self) -> SessionPhase {
        *self.phase.read()
    }

    fn set_phase(&self, phase: SessionPhase) {
        *self.phase.write() = phase;
    }
}

/// Write lock on the handle currently registered for a session
struct SessionLock {
    handle: Arc<SessionHandle>,
    pending: OwnedMutexGuard<Vec<Interaction>>,
}

/// Tiered conversational-context store
///
/// `Send + Sync`; share it behind an [`Arc`] and call it from any task.
pub struct ContextService {
    config: Config,
    tiers: TierManager,
    hot: HotTier,
    cache: Arc<dyn DistributedCacheClient>,
    durable: Arc<dyn DurableStoreClient>,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    compression: CompressionEngine,
    metrics: MetricsTracker,
    sessions: DashMap<SessionId, Arc<SessionHandle>>,
    timeout: Duration,
}

impl std::fmt::Debug for ContextService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextService")
            .field("tiers", &self.tiers)
            .field("embedder", &self.embedder.name())
            .field("sessions", &self.sessions.len())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ContextService {
    /// Wire a service from explicit collaborators
    ///
    /// Fails with [`StrataError::Configuration`] when the config is invalid
    /// or the embedder's dimension differs from
    /// `compression.embedding_dimension`.
    pub fn new(
        config: Config,
        cache: Arc<dyn DistributedCacheClient>,
        durable: Arc<dyn DurableStoreClient>,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
    ) -> Result<Self> {
        config.validate()?;

        if embedder.dimension() != config.compression.embedding_dimension {
            return Err(StrataError::Configuration(format!(
                "Embedding provider '{}' produces {} dimensions, compression.embedding_dimension is {}",
                embedder.name(),
                embedder.dimension(),
                config.compression.embedding_dimension
            )));
        }

        let timeout = config.stores.timeout();
        let compression = CompressionEngine::new(
            Arc::clone(&durable),
            Arc::clone(&embedder),
            Arc::clone(&index),
            &config.tiers,
            config.compression.clone(),
            timeout,
        );

        Ok(Self {
            tiers: TierManager::from_config(&config.tiers),
            hot: HotTier::new(),
            metrics: MetricsTracker::new(&config.metrics),
            sessions: DashMap::new(),
            cache,
            durable,
            embedder,
            index,
            compression,
            timeout,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn handle(&self, session: &SessionId) -> Arc<SessionHandle> {
        Arc::clone(self.sessions.entry(session.clone()).or_default().value())
    }

    fn existing(&self, session: &SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.get(session).map(|h| Arc::clone(h.value()))
    }

    fn is_registered(&self, session: &SessionId, handle: &Arc<SessionHandle>) -> bool {
        self.sessions
            .get(session)
            .is_some_and(|h| Arc::ptr_eq(h.value(), handle))
    }

    /// Take the session's write lock, creating the handle when `create` is set
    ///
    /// A handle retired by cleanup while we waited is skipped and the lock
    /// is retaken on whatever handle is registered now. Returns `None` only
    /// when `create` is unset and the session has no handle.
    async fn lock_session(&self, session: &SessionId, create: bool) -> Option<SessionLock> {
        loop {
            let handle = if create {
                self.handle(session)
            } else {
                self.existing(session)?
            };
            let pending = Arc::clone(&handle.writes).lock_owned().await;
            if self.is_registered(session, &handle) {
                return Some(SessionLock { handle, pending });
            }
        }
    }

    /// Sessions currently holding in-process state
    pub fn resident_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Start (or restart) a session
    ///
    /// Resets metrics, drops any stale hot buffer and deletes the warm key.
    /// Calling it again is equivalent to calling it once.
    pub async fn initialize(&self, session: &SessionId, user_id: &str) {
        let Some(lock) = self.lock_session(session, true).await else {
            return;
        };

        self.reset_session(session, &lock.handle).await;
        info!(session = %session, user = user_id, "Session initialized");
    }

    /// Caller must hold the session's write lock
    async fn reset_session(&self, session: &SessionId, handle: &SessionHandle) {
        self.metrics.reset(session);

        let dropped = self.tiers.drop_session(&self.hot, session);
        if dropped > 0 {
            debug!(session = %session, dropped, "Dropped stale hot buffer");
        }

        if let Err(e) = self.cache_delete(session).await {
            warn!(session = %session, "Failed to delete warm key: {}", e);
        }

        handle.set_phase(SessionPhase::Active);
    }

    /// Append one turn to the session
    ///
    /// The turn enters the hot tier, anything it pushes out cascades into
    /// the warm tier, and it is written through to the durable store. When
    /// that write fails the call returns [`StrataError::Persistence`]; the
    /// hot append stands and the turn stays pending until a retry with the
    /// same id or [`ContextService::cleanup`] commits it. Resubmitting a
    /// turn that is already committed and still hot is a no-op.
    pub async fn add_interaction(
        &self,
        session: &SessionId,
        interaction: Interaction,
    ) -> Result<()> {
        if interaction.session_id != *session {
            return Err(StrataError::SessionState(format!(
                "Interaction {} belongs to session {}, not {}",
                interaction.id, interaction.session_id, session
            )));
        }

        let started = Instant::now();
        let strict = self.config.tiers.strict_sessions;
        let Some(SessionLock {
            handle,
            mut pending,
        }) = self.lock_session(session, !strict).await
        else {
            return Err(StrataError::SessionState(format!(
                "Session {} is {:?}; initialize it first",
                session,
                SessionPhase::Uninitialized
            )));
        };

        if handle.phase() != SessionPhase::Active {
            if strict {
                return Err(StrataError::SessionState(format!(
                    "Session {} is {:?}; initialize it first",
                    session,
                    handle.phase()
                )));
            }
            debug!(session = %session, "Auto-initializing session on write");
            self.reset_session(session, &handle).await;
        }

        let retry = pending.iter().any(|p| p.id == interaction.id);
        if !retry && self.tiers.contains(&self.hot, session, interaction.id) {
            debug!(
                session = %session,
                interaction = %interaction.id,
                "Interaction already stored"
            );
            return Ok(());
        }

        if !retry {
            let evicted = self.tiers.append(&self.hot, session, interaction.clone());
            if !evicted.is_empty() {
                self.cascade_to_warm(session, evicted).await;
            }
        }

        let saved = bounded(
            self.timeout,
            self.durable.save(&interaction),
            StrataError::Persistence,
        )
        .await;

        if let Err(e) = saved {
            if !retry {
                pending.push(interaction);
            }
            self.metrics.record_latency(session, elapsed_ms(started));
            warn!(session = %session, pending = pending.len(), "Durable write failed: {}", e);
            return Err(into_persistence(e));
        }

        pending.retain(|p| p.id != interaction.id);

        self.metrics.record_tokens(session, interaction.estimate_tokens());
        if !retry {
            let bytes = self
                .metrics
                .snapshot(session)
                .map(|m| m.memory_bytes)
                .unwrap_or(0)
                + self.config.metrics.bytes_per_interaction;
            self.metrics.record_memory_bytes(session, bytes);
        }
        self.metrics.record_latency(session, elapsed_ms(started));

        debug!(
            session = %session,
            interaction = %interaction.id,
            retry,
            "Interaction stored"
        );
        Ok(())
    }

    /// Merge evicted hot items into the warm value, newest-evicted first
    ///
    /// Skipped entirely when the current warm value cannot be read, so a
    /// flaky cache never has a partial value written over it.
    async fn cascade_to_warm(&self, session: &SessionId, evicted: Vec<Interaction>) {
        let key = session.warm_key();
        let count = evicted.len();

        let existing = match self.cache_get(&key).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<Vec<Interaction>>(&bytes) {
                Ok(items) => items,
                Err(e) => {
                    warn!(session = %session, "Discarding unreadable warm value: {}", e);
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(
                    session = %session,
                    evicted = count,
                    "Warm tier unavailable, skipping cascade: {}",
                    e
                );
                self.metrics.record_cache_outcome(session, false);
                return;
            }
        };

        let mut merged: Vec<Interaction> = evicted.into_iter().rev().collect();
        let mut seen: HashSet<Uuid> = merged.iter().map(|i| i.id).collect();
        merged.extend(existing.into_iter().filter(|i| seen.insert(i.id)));
        merged.truncate(self.config.tiers.warm_max);

        let bytes = match serde_json::to_vec(&merged) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(session = %session, "Failed to encode warm value: {}", e);
                return;
            }
        };

        let stored = bounded(
            self.timeout,
            self.cache
                .set_with_ttl(&key, bytes, self.config.tiers.warm_ttl_secs),
            StrataError::CacheUnavailable,
        )
        .await;

        match stored {
            Ok(()) => debug!(
                session = %session,
                evicted = count,
                warm = merged.len(),
                tier = %MemoryTier::Warm,
                "Cascaded hot overflow"
            ),
            Err(e) => warn!(session = %session, "Failed to write warm value: {}", e),
        }
    }

    /// Assemble a fresh view over every tier of the session
    pub async fn get_context(&self, session: &SessionId) -> EnrichedView {
        let started = Instant::now();
        self.ensure_active_for_read(session).await;

        let hot = self.tiers.read_hot(&self.hot, session);
        let (warm, warm_source) = self.read_warm(session, &hot).await;

        let cold = self
            .durable_find(session, self.config.tiers.cold_sample_limit)
            .await
            .unwrap_or_else(|e| {
                warn!(session = %session, "Cold sample unavailable: {}", e);
                Vec::new()
            });

        let summaries = self.list_summaries(session).await;

        let total_interactions = match bounded(
            self.timeout,
            self.durable.count_by_session(session),
            StrataError::Storage,
        )
        .await
        {
            Ok(count) => count,
            Err(e) => {
                warn!(session = %session, "Durable count unavailable: {}", e);
                distinct_count([&hot, &warm, &cold])
            }
        };

        let memory_bytes =
            total_interactions as u64 * self.config.metrics.bytes_per_interaction;
        let compression_ratio = compression_ratio(summaries.len(), total_interactions);

        self.metrics.record_memory_bytes(session, memory_bytes);
        self.metrics.record_latency(session, elapsed_ms(started));

        let view = EnrichedView {
            session_id: session.clone(),
            hot,
            warm,
            cold,
            summaries,
            total_interactions,
            memory_bytes,
            compression_ratio,
            warm_source,
        };
        debug!(
            session = %session,
            hot = view.tier_len(MemoryTier::Hot),
            warm = view.tier_len(MemoryTier::Warm),
            cold = view.tier_len(MemoryTier::Cold),
            archived = view.tier_len(MemoryTier::Archived),
            "Context assembled"
        );
        view
    }

    async fn ensure_active_for_read(&self, session: &SessionId) {
        if self.config.tiers.strict_sessions {
            return;
        }

        if self
            .existing(session)
            .is_some_and(|h| h.phase() == SessionPhase::Active)
        {
            return;
        }

        let Some(lock) = self.lock_session(session, true).await else {
            return;
        };
        if lock.handle.phase() != SessionPhase::Active {
            debug!(session = %session, "Auto-initializing session on read");
            self.reset_session(session, &lock.handle).await;
        }
    }

    /// Cache-aside warm read; misses fall back to durable without repopulating
    async fn read_warm(
        &self,
        session: &SessionId,
        hot: &[Interaction],
    ) -> (Vec<Interaction>, Option<WarmSource>) {
        let warm_max = self.config.tiers.warm_max;

        match self.cache_get(&session.warm_key()).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<Vec<Interaction>>(&bytes) {
                Ok(mut items) => {
                    self.metrics.record_cache_outcome(session, true);
                    items.truncate(warm_max);
                    return (items, Some(WarmSource::Cache));
                }
                Err(e) => warn!(session = %session, "Unreadable warm value: {}", e),
            },
            Ok(None) => debug!(session = %session, "Warm cache miss"),
            Err(e) => warn!(session = %session, "Warm cache unavailable: {}", e),
        }
        self.metrics.record_cache_outcome(session, false);

        let limit = self.config.tiers.hot_max + warm_max;
        match self.durable_find(session, limit).await {
            Ok(recent) => {
                let hot_ids: HashSet<Uuid> = hot.iter().map(|i| i.id).collect();
                let warm: Vec<Interaction> = recent
                    .into_iter()
                    .filter(|i| !hot_ids.contains(&i.id))
                    .take(warm_max)
                    .collect();
                (warm, Some(WarmSource::DurableFallback))
            }
            Err(e) => {
                warn!(session = %session, "Durable fallback for warm tier failed: {}", e);
                (Vec::new(), None)
            }
        }
    }

    async fn list_summaries(&self, session: &SessionId) -> Vec<Summary> {
        bounded(
            self.timeout,
            self.index.list(session, MAX_VIEW_SUMMARIES),
            StrataError::VectorIndex,
        )
        .await
        .unwrap_or_else(|e| {
            warn!(session = %session, "Summaries unavailable: {}", e);
            Vec::new()
        })
    }

    /// One-line digest: interaction count and approximate size
    pub async fn get_context_summary(&self, session: &SessionId) -> String {
        let view = self.get_context(session).await;
        format!(
            "Session {}: {} interactions, ~{}",
            session,
            view.total_interactions,
            format_bytes(view.memory_bytes)
        )
    }

    /// Run one best-effort compression pass for the session
    pub async fn compress(&self, session: &SessionId) -> CompressionOutcome {
        let started = Instant::now();
        let strict = self.config.tiers.strict_sessions;
        let Some(lock) = self.lock_session(session, !strict).await else {
            return CompressionOutcome::Deferred {
                reason: format!("session {} is {:?}", session, SessionPhase::Uninitialized),
            };
        };

        let phase = lock.handle.phase();
        if phase != SessionPhase::Active {
            if strict {
                return CompressionOutcome::Deferred {
                    reason: format!("session {} is {:?}", session, phase),
                };
            }
            self.reset_session(session, &lock.handle).await;
        }

        let outcome = self.compression.compress(session).await;
        if outcome.is_deferred() {
            self.metrics.record_compression_skip(session);
        }
        self.metrics.record_latency(session, elapsed_ms(started));
        outcome
    }

    /// Summaries similar to `query` plus the cold interactions they cover
    ///
    /// Falls back to the most recent cold interactions when the query
    /// cannot be embedded or nothing matches.
    pub async fn retrieve_relevant(&self, session: &SessionId, query: &str) -> RelevantContext {
        let started = Instant::now();

        let context = match self.semantic_matches(session, query).await {
            Some(context) => context,
            None => {
                let interactions = self
                    .durable_find(session, self.config.tiers.recency_fallback_limit)
                    .await
                    .unwrap_or_else(|e| {
                        warn!(session = %session, "Recency fallback unavailable: {}", e);
                        Vec::new()
                    });
                RelevantContext {
                    summaries: Vec::new(),
                    interactions,
                    source: RetrievalSource::Recency,
                }
            }
        };

        self.metrics.record_latency(session, elapsed_ms(started));
        context
    }

    async fn semantic_matches(&self, session: &SessionId, query: &str) -> Option<RelevantContext> {
        let vector = match bounded(
            self.timeout,
            self.embedder.embed(query),
            StrataError::EmbeddingService,
        )
        .await
        {
            Ok(vector) => vector,
            Err(e) => {
                warn!(session = %session, "Query embedding failed, using recency: {}", e);
                return None;
            }
        };

        let hits = match bounded(
            self.timeout,
            self.index
                .search_similar(session, &vector, self.config.embedding.top_k),
            StrataError::VectorIndex,
        )
        .await
        {
            Ok(hits) if !hits.is_empty() => hits,
            Ok(_) => {
                debug!(session = %session, "No summaries matched, using recency");
                return None;
            }
            Err(e) => {
                warn!(session = %session, "Similarity search failed, using recency: {}", e);
                return None;
            }
        };

        let interactions = match self
            .durable_find(session, self.config.compression.scan_limit)
            .await
        {
            Ok(cold) => cold
                .into_iter()
                .filter(|i| hits.iter().any(|hit| hit.summary.covers(i)))
                .take(self.config.tiers.cold_sample_limit)
                .collect(),
            Err(e) => {
                warn!(session = %session, "Covered interactions unavailable: {}", e);
                Vec::new()
            }
        };

        Some(RelevantContext {
            summaries: hits,
            interactions,
            source: RetrievalSource::Semantic,
        })
    }

    /// End the session
    ///
    /// Flushes pending writes, drops the hot buffer, deletes the warm key
    /// and discards metrics. Once nothing is pending the session's handle
    /// is released. Writes that still fail stay pending under a `Cleaned`
    /// handle; [`ContextService::pending_writes`] reports them and a repeat
    /// call retries only those. Cleaning a session with no state is a no-op.
    pub async fn cleanup(&self, session: &SessionId) {
        let Some(SessionLock {
            handle,
            mut pending,
        }) = self.lock_session(session, false).await
        else {
            debug!(session = %session, "No session state to clean up");
            return;
        };
        let already_cleaned = handle.phase() == SessionPhase::Cleaned;

        if !pending.is_empty() {
            self.flush_pending(session, &mut pending).await;
        }

        if !already_cleaned {
            let dropped = self.tiers.drop_session(&self.hot, session);
            if let Err(e) = self.cache_delete(session).await {
                warn!(session = %session, "Failed to delete warm key: {}", e);
            }
            self.metrics.discard(session);
            handle.set_phase(SessionPhase::Cleaned);
            info!(session = %session, dropped, "Session cleaned up");
        }

        if pending.is_empty() {
            self.sessions
                .remove_if(session, |_, registered| Arc::ptr_eq(registered, &handle));
        } else {
            warn!(
                session = %session,
                pending = pending.len(),
                "Session cleaned with unflushed writes"
            );
        }
    }

    async fn flush_pending(&self, session: &SessionId, pending: &mut Vec<Interaction>) {
        let attempts = pending.iter().map(|interaction| {
            bounded(
                self.timeout,
                self.durable.save(interaction),
                StrataError::Persistence,
            )
        });
        let results = join_all(attempts).await;

        let mut outcomes = results.into_iter();
        pending.retain(|_| outcomes.next().is_some_and(|r| r.is_err()));

        if pending.is_empty() {
            debug!(session = %session, "Pending writes flushed");
        } else {
            warn!(session = %session, remaining = pending.len(), "Pending writes still failing");
        }
    }

    /// Current lifecycle phase; sessions without state are `Uninitialized`
    pub fn session_phase(&self, session: &SessionId) -> SessionPhase {
        self.sessions
            .get(session)
            .map(|h| h.value().phase())
            .unwrap_or_default()
    }

    pub fn metrics(&self, session: &SessionId) -> Option<SessionMetrics> {
        self.metrics.snapshot(session)
    }

    /// Interactions whose durable write has not succeeded yet
    pub async fn pending_writes(&self, session: &SessionId) -> usize {
        let Some(handle) = self.existing(session) else {
            return 0;
        };
        let count = handle.writes.lock().await.len();
        count
    }

    /// Remove summaries past their TTL from the index
    pub async fn purge_expired_summaries(&self) -> usize {
        match bounded(
            self.timeout,
            self.index.purge_expired(Utc::now()),
            StrataError::VectorIndex,
        )
        .await
        {
            Ok(removed) => {
                if removed > 0 {
                    info!(removed, "Purged expired summaries");
                }
                removed
            }
            Err(e) => {
                warn!("Failed to purge expired summaries: {}", e);
                0
            }
        }
    }

    async fn cache_get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        bounded(
            self.timeout,
            self.cache.get(key),
            StrataError::CacheUnavailable,
        )
        .await
    }

    async fn cache_delete(&self, session: &SessionId) -> Result<()> {
        bounded(
            self.timeout,
            self.cache.delete(&session.warm_key()),
            StrataError::CacheUnavailable,
        )
        .await
    }

    async fn durable_find(&self, session: &SessionId, limit: usize) -> Result<Vec<Interaction>> {
        bounded(
            self.timeout,
            self.durable.find_by_session(session, limit),
            StrataError::Storage,
        )
        .await
    }
}

fn into_persistence(err: StrataError) -> StrataError {
    match err {
        StrataError::Persistence(msg) => StrataError::Persistence(msg),
        other => StrataError::Persistence(other.to_string()),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn distinct_count(sections: [&[Interaction]; 3]) -> usize {
    sections
        .iter()
        .flat_map(|section| section.iter().map(|i| i.id))
        .collect::<HashSet<_>>()
        .len()
}

/// `1 - summaries/total` in `[0, 1]`; zero without summaries or history
fn compression_ratio(summaries: usize, total: usize) -> f64 {
    if summaries == 0 || total == 0 {
        return 0.0;
    }
    (1.0 - summaries as f64 / total as f64).clamp(0.0, 1.0)
}

fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    let b = bytes as f64;
    if b >= GB {
        format!("{:.1} GB", b / GB)
    } else if b >= MB {
        format!("{:.1} MB", b / MB)
    } else if b >= KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{bytes} B")
    }
}
