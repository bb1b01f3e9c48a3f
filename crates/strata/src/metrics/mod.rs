//! Per-session accounting: latency, tokens, cache outcome, memory, cost
//!
//! Only [`MetricsTracker`] mutates [`SessionMetrics`]; callers always get a
//! copy back from [`MetricsTracker::snapshot`].

use dashmap::DashMap;
use serde::Serialize;

use crate::config::MetricsConfig;
use crate::memory::SessionId;

/// Counters kept for one session between initialize and cleanup
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionMetrics {
    pub tokens_used: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Estimated memory footprint at the last observation
    pub memory_bytes: u64,
    pub last_latency_ms: u64,
    /// Dollar estimate; stays zero unless cost tracking is enabled
    pub estimated_cost: f64,
    /// Compressions deferred because embedding or indexing failed
    pub compression_skips: u64,
    /// Timed operations recorded
    pub operations: u64,
}

impl SessionMetrics {
    /// Fraction of warm reads served from cache; zero before any read
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / total as f64
    }
}

/// Per-session metrics keyed by session ID
#[derive(Debug)]
pub struct MetricsTracker {
    sessions: DashMap<SessionId, SessionMetrics>,
    cost_tracking_enabled: bool,
    cost_per_million_tokens: f64,
}

impl MetricsTracker {
    pub fn new(config: &MetricsConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            cost_tracking_enabled: config.cost_tracking_enabled,
            cost_per_million_tokens: config.cost_per_million_tokens,
        }
    }

    /// Apply to a tracked session; sessions outside reset..discard are ignored
    fn update(&self, session: &SessionId, apply: impl FnOnce(&mut SessionMetrics)) {
        if let Some(mut entry) = self.sessions.get_mut(session) {
            apply(entry.value_mut());
        }
    }

    pub fn record_latency(&self, session: &SessionId, millis: u64) {
        self.update(session, |m| {
            m.last_latency_ms = millis;
            m.operations += 1;
        });
    }

    /// Add tokens and, when enabled, their estimated cost
    pub fn record_tokens(&self, session: &SessionId, count: u64) {
        let cost = if self.cost_tracking_enabled {
            (count as f64 / 1_000_000.0) * self.cost_per_million_tokens
        } else {
            0.0
        };
        self.update(session, |m| {
            m.tokens_used += count;
            m.estimated_cost += cost;
        });
    }

    pub fn record_cache_outcome(&self, session: &SessionId, hit: bool) {
        self.update(session, |m| {
            if hit {
                m.cache_hits += 1;
            } else {
                m.cache_misses += 1;
            }
        });
    }

    pub fn record_memory_bytes(&self, session: &SessionId, bytes: u64) {
        self.update(session, |m| m.memory_bytes = bytes);
    }

    pub fn record_compression_skip(&self, session: &SessionId) {
        self.update(session, |m| m.compression_skips += 1);
    }

    /// Start tracking the session with every counter at zero
    pub fn reset(&self, session: &SessionId) {
        self.sessions.insert(session.clone(), SessionMetrics::default());
    }

    /// Forget the session entirely
    pub fn discard(&self, session: &SessionId) {
        self.sessions.remove(session);
    }

    pub fn snapshot(&self, session: &SessionId) -> Option<SessionMetrics> {
        self.sessions.get(session).map(|m| m.value().clone())
    }

    pub fn tracked_sessions(&self) -> usize {
        self.sessions.len()
    }
}
