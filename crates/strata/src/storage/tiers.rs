//! Hot tier management for Strata
//!
//! The hot tier is a bounded FIFO buffer of the newest interactions per
//! session. Appending past capacity evicts the oldest items, which the
//! caller cascades into the warm tier.

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::config::TierConfig;
use crate::memory::{Interaction, SessionId};

type HotBuffer = Arc<RwLock<VecDeque<Interaction>>>;

/// In-process store of hot buffers, keyed by session
///
/// Owned by the context service and passed by reference into every
/// [`TierManager`] call. Each buffer carries its own lock, so sessions never
/// contend with each other.
#[derive(Debug, Default)]
pub struct HotTier {
    buffers: DashMap<SessionId, HotBuffer>,
}

impl HotTier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions that currently own a buffer
    pub fn session_count(&self) -> usize {
        self.buffers.len()
    }

    fn buffer(&self, session: &SessionId) -> Option<HotBuffer> {
        self.buffers.get(session).map(|entry| Arc::clone(entry.value()))
    }

    fn buffer_or_create(&self, session: &SessionId) -> HotBuffer {
        Arc::clone(self.buffers.entry(session.clone()).or_default().value())
    }
}

/// Enforces hot-tier capacity and FIFO cascade eviction
///
/// Pure in-memory; no operation can fail or block on I/O.
#[derive(Debug, Clone)]
pub struct TierManager {
    hot_max: usize,
}

impl TierManager {
    /// Create a manager with the given hot capacity (at least one item)
    pub fn new(hot_max: usize) -> Self {
        Self {
            hot_max: hot_max.max(1),
        }
    }

    pub fn from_config(config: &TierConfig) -> Self {
        Self::new(config.hot_max)
    }

    pub fn hot_max(&self) -> usize {
        self.hot_max
    }

    /// Insert at the tail of the session's hot buffer
    ///
    /// Returns the items evicted to keep the buffer within `hot_max`,
    /// oldest first. Returns an empty vector when nothing cascades.
    pub fn append(
        &self,
        store: &HotTier,
        session: &SessionId,
        interaction: Interaction,
    ) -> Vec<Interaction> {
        let buffer = store.buffer_or_create(session);
        let mut buffer = buffer.write();

        buffer.push_back(interaction);

        let overflow = buffer.len().saturating_sub(self.hot_max);
        let evicted: Vec<Interaction> = buffer.drain(..overflow).collect();
        evicted
    }

    /// Copy of the session's hot buffer, newest last
    pub fn read_hot(&self, store: &HotTier, session: &SessionId) -> Vec<Interaction> {
        let Some(buffer) = store.buffer(session) else {
            return Vec::new();
        };
        let snapshot: Vec<Interaction> = buffer.read().iter().cloned().collect();
        snapshot
    }

    /// Whether an interaction with the given id is currently hot
    pub fn contains(&self, store: &HotTier, session: &SessionId, id: Uuid) -> bool {
        let Some(buffer) = store.buffer(session) else {
            return false;
        };
        let found = buffer.read().iter().any(|i| i.id == id);
        found
    }

    pub fn len(&self, store: &HotTier, session: &SessionId) -> usize {
        let Some(buffer) = store.buffer(session) else {
            return 0;
        };
        let len = buffer.read().len();
        len
    }

    /// Remove the session's buffer, returning how many items it held
    pub fn drop_session(&self, store: &HotTier, session: &SessionId) -> usize {
        let Some((_, buffer)) = store.buffers.remove(session) else {
            return 0;
        };
        let dropped = buffer.read().len();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: &str) -> SessionId {
        SessionId::try_from(id).unwrap()
    }

    fn turn(session: &SessionId, n: usize) -> Interaction {
        Interaction::new(session.clone(), "user", format!("question {n}"), format!("answer {n}"))
    }

    #[test]
    fn test_append_within_capacity_evicts_nothing() {
        let store = HotTier::new();
        let manager = TierManager::new(5);
        let s = session("s1");

        for n in 0..5 {
            assert!(manager.append(&store, &s, turn(&s, n)).is_empty());
        }
        assert_eq!(manager.len(&store, &s), 5);
    }

    #[test]
    fn test_append_past_capacity_evicts_oldest() {
        let store = HotTier::new();
        let manager = TierManager::new(5);
        let s = session("s1");

        let turns: Vec<_> = (0..6).map(|n| turn(&s, n)).collect();
        let mut evicted = Vec::new();
        for t in turns.iter().cloned() {
            evicted.extend(manager.append(&store, &s, t));
        }

        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].id, turns[0].id);

        let hot = manager.read_hot(&store, &s);
        assert_eq!(hot.len(), 5);
        assert_eq!(hot.first().unwrap().id, turns[1].id);
        assert_eq!(hot.last().unwrap().id, turns[5].id);
    }

    #[test]
    fn test_capacity_never_exceeded() {
        let store = HotTier::new();
        let manager = TierManager::new(3);
        let s = session("s1");

        for n in 0..50 {
            manager.append(&store, &s, turn(&s, n));
            assert!(manager.len(&store, &s) <= 3);
        }
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let manager = TierManager::new(0);
        assert_eq!(manager.hot_max(), 1);
    }

    #[test]
    fn test_sessions_are_isolated() {
        let store = HotTier::new();
        let manager = TierManager::new(2);
        let a = session("a");
        let b = session("b");

        manager.append(&store, &a, turn(&a, 0));
        manager.append(&store, &b, turn(&b, 0));
        manager.append(&store, &b, turn(&b, 1));

        assert_eq!(manager.len(&store, &a), 1);
        assert_eq!(manager.len(&store, &b), 2);
        assert_eq!(store.session_count(), 2);
    }

    #[test]
    fn test_read_hot_unknown_session_is_empty() {
        let store = HotTier::new();
        let manager = TierManager::new(2);
        assert!(manager.read_hot(&store, &session("nobody")).is_empty());
    }

    #[test]
    fn test_contains() {
        let store = HotTier::new();
        let manager = TierManager::new(1);
        let s = session("s1");
        let first = turn(&s, 0);
        let second = turn(&s, 1);

        manager.append(&store, &s, first.clone());
        assert!(manager.contains(&store, &s, first.id));

        manager.append(&store, &s, second.clone());
        assert!(!manager.contains(&store, &s, first.id));
        assert!(manager.contains(&store, &s, second.id));
    }

    #[test]
    fn test_drop_session() {
        let store = HotTier::new();
        let manager = TierManager::new(5);
        let s = session("s1");

        manager.append(&store, &s, turn(&s, 0));
        manager.append(&store, &s, turn(&s, 1));

        assert_eq!(manager.drop_session(&store, &s), 2);
        assert!(manager.read_hot(&store, &s).is_empty());
        assert_eq!(manager.drop_session(&store, &s), 0);
    }
}
