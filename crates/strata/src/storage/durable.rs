//! Cold tier: authoritative append/query store for interaction history
//!
//! Every interaction is written through to the durable store regardless of
//! what happens in the hot or warm tiers. Queries return newest first.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex as TokioMutex;
use tracing::{debug, warn};

use crate::error::{Result, StrataError};
use crate::memory::{Interaction, SessionId};

/// Durable store consumed by the engine as the cold tier
#[async_trait]
pub trait DurableStoreClient: Send + Sync {
    /// Persist one interaction
    async fn save(&self, interaction: &Interaction) -> Result<()>;

    /// Up to `limit` interactions for the session, newest first
    async fn find_by_session(&self, session: &SessionId, limit: usize) -> Result<Vec<Interaction>>;

    /// Total interactions stored for the session
    async fn count_by_session(&self, session: &SessionId) -> Result<usize>;
}

/// Order interactions newest first, breaking timestamp ties by reverse insertion
fn newest_first(mut interactions: Vec<Interaction>, limit: usize) -> Vec<Interaction> {
    interactions.reverse();
    interactions.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    interactions.truncate(limit);
    interactions
}

/// Durable store held entirely in process memory
///
/// Not durable across restarts; intended for tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct InMemoryDurableStore {
    sessions: RwLock<HashMap<SessionId, Vec<Interaction>>>,
}

impl InMemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total interactions across all sessions
    pub fn total(&self) -> usize {
        self.sessions.read().values().map(Vec::len).sum()
    }
}

#[async_trait]
impl DurableStoreClient for InMemoryDurableStore {
    async fn save(&self, interaction: &Interaction) -> Result<()> {
        self.sessions
            .write()
            .entry(interaction.session_id.clone())
            .or_default()
            .push(interaction.clone());
        Ok(())
    }

    async fn find_by_session(&self, session: &SessionId, limit: usize) -> Result<Vec<Interaction>> {
        let stored = self.sessions.read().get(session).cloned().unwrap_or_default();
        Ok(newest_first(stored, limit))
    }

    async fn count_by_session(&self, session: &SessionId) -> Result<usize> {
        Ok(self.sessions.read().get(session).map(Vec::len).unwrap_or(0))
    }
}

/// File-backed durable store: one JSON-lines file per session
///
/// Layout: `<data_dir>/sessions/<session_id>.jsonl`. Appends are serialized
/// through a single writer lock; reads parse the whole file.
#[derive(Debug)]
pub struct JsonlStore {
    sessions_dir: PathBuf,
    write_lock: TokioMutex<()>,
}

impl JsonlStore {
    /// Open (creating if needed) a store rooted at `data_dir`
    pub async fn connect(data_dir: &Path) -> Result<Self> {
        let sessions_dir = data_dir.join("sessions");
        tokio::fs::create_dir_all(&sessions_dir).await.map_err(|e| {
            StrataError::Storage(format!(
                "Failed to create sessions directory {}: {}",
                sessions_dir.display(),
                e
            ))
        })?;

        debug!("JsonlStore opened at {}", sessions_dir.display());
        Ok(Self {
            sessions_dir,
            write_lock: TokioMutex::new(()),
        })
    }

    pub fn sessions_dir(&self) -> &Path {
        &self.sessions_dir
    }

    fn session_path(&self, session: &SessionId) -> PathBuf {
        self.sessions_dir.join(format!("{}.jsonl", session.as_str()))
    }

    async fn read_session(&self, session: &SessionId) -> Result<Vec<Interaction>> {
        let path = self.session_path(session);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StrataError::Io(e)),
        };

        let mut interactions = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Interaction>(line) {
                Ok(interaction) => interactions.push(interaction),
                Err(e) => warn!(
                    session = %session,
                    line = line_no + 1,
                    "Skipping unreadable interaction record: {}",
                    e
                ),
            }
        }
        Ok(interactions)
    }
}

#[async_trait]
impl DurableStoreClient for JsonlStore {
    async fn save(&self, interaction: &Interaction) -> Result<()> {
        let mut line = serde_json::to_string(interaction)?;
        line.push('\n');

        let path = self.session_path(&interaction.session_id);
        let _guard = self.write_lock.lock().await;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn find_by_session(&self, session: &SessionId, limit: usize) -> Result<Vec<Interaction>> {
        let stored = self.read_session(session).await?;
        Ok(newest_first(stored, limit))
    }

    async fn count_by_session(&self, session: &SessionId) -> Result<usize> {
        Ok(self.read_session(session).await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn session(id: &str) -> SessionId {
        SessionId::try_from(id).unwrap()
    }

    fn turns(session: &SessionId, count: usize) -> Vec<Interaction> {
        let base = Utc::now() - Duration::hours(1);
        (0..count)
            .map(|n| {
                Interaction::new(session.clone(), "u", format!("q{n}"), format!("a{n}"))
                    .with_timestamp(base + Duration::seconds(n as i64))
            })
            .collect()
    }

    #[tokio::test]
    async fn test_in_memory_newest_first_with_limit() {
        let store = InMemoryDurableStore::new();
        let s = session("s1");
        for t in turns(&s, 5) {
            store.save(&t).await.unwrap();
        }

        let found = store.find_by_session(&s, 3).await.unwrap();
        assert_eq!(found.len(), 3);
        assert_eq!(found[0].user_message, "q4");
        assert_eq!(found[2].user_message, "q2");
        assert_eq!(store.count_by_session(&s).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_equal_timestamps_keep_insertion_order_reversed() {
        let store = InMemoryDurableStore::new();
        let s = session("s1");
        let now = Utc::now();
        for n in 0..3 {
            let t = Interaction::new(s.clone(), "u", format!("q{n}"), "a").with_timestamp(now);
            store.save(&t).await.unwrap();
        }

        let found = store.find_by_session(&s, 10).await.unwrap();
        let order: Vec<_> = found.iter().map(|i| i.user_message.as_str()).collect();
        assert_eq!(order, vec!["q2", "q1", "q0"]);
    }

    #[tokio::test]
    async fn test_unknown_session_is_empty() {
        let store = InMemoryDurableStore::new();
        let s = session("none");
        assert!(store.find_by_session(&s, 10).await.unwrap().is_empty());
        assert_eq!(store.count_by_session(&s).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_jsonl_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlStore::connect(dir.path()).await.unwrap();
        let s = session("fresh");

        assert!(store.find_by_session(&s, 10).await.unwrap().is_empty());
        assert_eq!(store.count_by_session(&s).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_jsonl_skips_corrupt_lines() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlStore::connect(dir.path()).await.unwrap();
        let s = session("corrupt");

        for t in turns(&s, 2) {
            store.save(&t).await.unwrap();
        }
        let path = store.sessions_dir().join("corrupt.jsonl");
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("{not json\n");
        std::fs::write(&path, content).unwrap();

        assert_eq!(store.count_by_session(&s).await.unwrap(), 2);
    }
}
