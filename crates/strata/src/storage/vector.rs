//! Vector index holding compressed summaries
//!
//! Summaries are the archived representation of old cold-tier history.
//! Queries never return a summary past its TTL, whether or not it has been
//! purged yet.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::error::{Result, StrataError};
use crate::memory::{ScoredSummary, SessionId, Summary};

/// Similarity store for session summaries
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert a summary; the insert is atomic
    async fn insert(&self, summary: Summary) -> Result<()>;

    /// Up to `top_k` unexpired summaries of the session, most similar first
    async fn search_similar(
        &self,
        session: &SessionId,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredSummary>>;

    /// Up to `limit` unexpired summaries of the session, newest first
    async fn list(&self, session: &SessionId, limit: usize) -> Result<Vec<Summary>>;

    /// Delete every summary expired at `now`, returning how many were removed
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// Cosine similarity in `[-1, 1]`; zero for mismatched, empty or zero vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// Brute-force in-process vector index
///
/// Vectors must all share one dimension, fixed at construction.
#[derive(Debug)]
pub struct InMemoryVectorIndex {
    dimension: usize,
    summaries: RwLock<HashMap<SessionId, Vec<Summary>>>,
}

impl InMemoryVectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            summaries: RwLock::new(HashMap::new()),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Stored summaries across all sessions, including expired ones
    pub fn len(&self) -> usize {
        self.summaries.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live(&self, session: &SessionId, now: DateTime<Utc>) -> Vec<Summary> {
        let summaries = self.summaries.read();
        let live: Vec<Summary> = summaries
            .get(session)
            .map(|list| list.iter().filter(|s| !s.is_expired(now)).cloned().collect())
            .unwrap_or_default();
        live
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn insert(&self, summary: Summary) -> Result<()> {
        if summary.vector.len() != self.dimension {
            return Err(StrataError::VectorIndex(format!(
                "Summary vector has dimension {}, index expects {}",
                summary.vector.len(),
                self.dimension
            )));
        }

        self.summaries
            .write()
            .entry(summary.session_id.clone())
            .or_default()
            .push(summary);
        Ok(())
    }

    async fn search_similar(
        &self,
        session: &SessionId,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredSummary>> {
        if vector.len() != self.dimension {
            return Err(StrataError::VectorIndex(format!(
                "Query vector has dimension {}, index expects {}",
                vector.len(),
                self.dimension
            )));
        }

        let mut scored: Vec<ScoredSummary> = self
            .live(session, Utc::now())
            .into_iter()
            .map(|summary| {
                let score = cosine_similarity(vector, &summary.vector);
                ScoredSummary { summary, score }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn list(&self, session: &SessionId, limit: usize) -> Result<Vec<Summary>> {
        let mut summaries = self.live(session, Utc::now());
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries.truncate(limit);
        Ok(summaries)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut summaries = self.summaries.write();
        let mut removed = 0;

        for list in summaries.values_mut() {
            let before = list.len();
            list.retain(|s| !s.is_expired(now));
            removed += before - list.len();
        }
        summaries.retain(|_, list| !list.is_empty());

        Ok(removed)
    }
}
