//! Memory types for the Strata engine
//!
//! Defines the conversational turn that flows through the tiers, the
//! compressed summaries that replace old history, and the read-only view
//! assembled for callers.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::memory::session::SessionId;

/// One conversational turn.
///
/// Immutable once created; owned by whichever tier currently holds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    /// Unique identifier, stable across tiers and retries
    pub id: Uuid,
    pub session_id: SessionId,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub user_message: String,
    pub assistant_response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<InteractionMetadata>,
}

impl Interaction {
    /// Create a new interaction stamped with the current time
    pub fn new(
        session_id: SessionId,
        user_id: impl Into<String>,
        user_message: impl Into<String>,
        assistant_response: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            user_id: user_id.into(),
            timestamp: Utc::now(),
            user_message: user_message.into(),
            assistant_response: assistant_response.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: InteractionMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Estimate token count using chars/4 heuristic
    pub fn estimate_tokens(&self) -> u64 {
        ((self.user_message.len() + self.assistant_response.len()) / 4) as u64
    }
}

/// Optional classification attached to an interaction
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InteractionMetadata {
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub sentiment: Option<Sentiment>,
    /// Classifier confidence in `[0, 1]`
    #[serde(default)]
    pub confidence: Option<f32>,
}

impl InteractionMetadata {
    pub fn with_intent(mut self, intent: impl Into<String>) -> Self {
        self.intent = Some(intent.into());
        self
    }

    pub fn with_entities(mut self, entities: Vec<String>) -> Self {
        self.entities = entities;
        self
    }

    pub fn with_sentiment(mut self, sentiment: Sentiment) -> Self {
        self.sentiment = Some(sentiment);
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence.clamp(0.0, 1.0));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

/// Storage tier an interaction (or its compressed form) lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    /// In-process buffer of the newest turns
    Hot,
    /// TTL-bounded distributed cache of recently evicted turns
    Warm,
    /// Authoritative durable history
    Cold,
    /// Represented only by a summary in the vector index
    Archived,
}

impl MemoryTier {
    /// Every tier, hottest first
    pub const ALL: [MemoryTier; 4] = [
        MemoryTier::Hot,
        MemoryTier::Warm,
        MemoryTier::Cold,
        MemoryTier::Archived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryTier::Hot => "hot",
            MemoryTier::Warm => "warm",
            MemoryTier::Cold => "cold",
            MemoryTier::Archived => "archived",
        }
    }
}

impl std::fmt::Display for MemoryTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Embedding-backed compressed representation of a closed range of
/// cold-tier interactions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub id: Uuid,
    pub session_id: SessionId,
    pub vector: Vec<f32>,
    /// Condensed text of the covered interactions
    pub text: String,
    pub ttl_days: u32,
    pub created_at: DateTime<Utc>,
    /// Timestamp of the oldest covered interaction
    pub covers_from: DateTime<Utc>,
    /// Timestamp of the newest covered interaction
    pub covers_to: DateTime<Utc>,
    pub interaction_count: usize,
}

impl Summary {
    /// `None` when the TTL reaches past the representable date range
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        Duration::try_days(i64::from(self.ttl_days))
            .and_then(|ttl| self.created_at.checked_add_signed(ttl))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|at| now >= at)
    }

    /// Whether an interaction falls inside the range this summary covers
    pub fn covers(&self, interaction: &Interaction) -> bool {
        interaction.timestamp >= self.covers_from && interaction.timestamp <= self.covers_to
    }
}

/// A summary returned by similarity search
#[derive(Debug, Clone)]
pub struct ScoredSummary {
    pub summary: Summary,
    /// Cosine similarity to the query vector
    pub score: f32,
}

/// Where the warm section of a view was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmSource {
    Cache,
    DurableFallback,
}

/// Read-only aggregation of every tier for one session.
///
/// Built fresh on every read; never persisted.
#[derive(Debug, Clone)]
pub struct EnrichedView {
    pub session_id: SessionId,
    /// Hot tier, newest last
    pub hot: Vec<Interaction>,
    /// Warm tier, newest first
    pub warm: Vec<Interaction>,
    /// Bounded sample of cold tier, newest first
    pub cold: Vec<Interaction>,
    pub summaries: Vec<Summary>,
    pub total_interactions: usize,
    pub memory_bytes: u64,
    pub compression_ratio: f64,
    pub warm_source: Option<WarmSource>,
}

impl EnrichedView {
    /// Items held in a given tier section of this view
    pub fn tier_len(&self, tier: MemoryTier) -> usize {
        match tier {
            MemoryTier::Hot => self.hot.len(),
            MemoryTier::Warm => self.warm.len(),
            MemoryTier::Cold => self.cold.len(),
            MemoryTier::Archived => self.summaries.iter().map(|s| s.interaction_count).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hot.is_empty() && self.warm.is_empty() && self.cold.is_empty()
    }
}

/// Path a relevance query was answered by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalSource {
    /// Similarity search over summaries
    Semantic,
    /// Most recent cold-tier interactions
    Recency,
}

/// Result of a relevance query
#[derive(Debug, Clone)]
pub struct RelevantContext {
    pub summaries: Vec<ScoredSummary>,
    pub interactions: Vec<Interaction>,
    pub source: RetrievalSource,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> SessionId {
        SessionId::try_from("types-test").unwrap()
    }

    #[test]
    fn test_interaction_serialization() {
        let interaction = Interaction::new(session(), "u1", "What is Rust?", "A language.")
            .with_metadata(
                InteractionMetadata::default()
                    .with_intent("question")
                    .with_sentiment(Sentiment::Neutral)
                    .with_confidence(0.9),
            );

        let json = serde_json::to_string(&interaction).expect("Failed to serialize");
        let deserialized: Interaction = serde_json::from_str(&json).expect("Failed to deserialize");

        assert_eq!(interaction, deserialized);
    }

    #[test]
    fn test_metadata_confidence_clamped() {
        let meta = InteractionMetadata::default().with_confidence(1.7);
        assert_eq!(meta.confidence, Some(1.0));

        let meta = InteractionMetadata::default().with_confidence(-0.2);
        assert_eq!(meta.confidence, Some(0.0));
    }

    #[test]
    fn test_estimate_tokens() {
        let interaction = Interaction::new(session(), "u1", "a".repeat(40), "b".repeat(60));
        assert_eq!(interaction.estimate_tokens(), 25);
    }

    #[test]
    fn test_tier_names() {
        let names: Vec<_> = MemoryTier::ALL.iter().map(ToString::to_string).collect();
        assert_eq!(names, vec!["hot", "warm", "cold", "archived"]);
    }

    #[test]
    fn test_summary_expiry() {
        let now = Utc::now();
        let summary = Summary {
            id: Uuid::new_v4(),
            session_id: session(),
            vector: vec![0.0; 4],
            text: "condensed".to_string(),
            ttl_days: 30,
            created_at: now - Duration::days(31),
            covers_from: now - Duration::days(40),
            covers_to: now - Duration::days(35),
            interaction_count: 2,
        };

        assert!(summary.is_expired(now));
        assert!(!summary.is_expired(now - Duration::days(2)));
    }

    #[test]
    fn test_summary_covers_range() {
        let now = Utc::now();
        let inside = Interaction::new(session(), "u", "q", "a").with_timestamp(now - Duration::hours(2));
        let outside = Interaction::new(session(), "u", "q", "a").with_timestamp(now);
        let summary = Summary {
            id: Uuid::new_v4(),
            session_id: session(),
            vector: vec![],
            text: String::new(),
            ttl_days: 1,
            created_at: now,
            covers_from: now - Duration::hours(3),
            covers_to: now - Duration::hours(1),
            interaction_count: 1,
        };

        assert!(summary.covers(&inside));
        assert!(!summary.covers(&outside));
    }

    #[test]
    fn test_unrepresentable_ttl_never_expires() {
        let now = Utc::now();
        let summary = Summary {
            id: Uuid::new_v4(),
            session_id: session(),
            vector: vec![],
            text: String::new(),
            ttl_days: u32::MAX,
            created_at: now,
            covers_from: now,
            covers_to: now,
            interaction_count: 1,
        };

        assert_eq!(summary.expires_at(), None);
        assert!(!summary.is_expired(now + Duration::days(365 * 1000)));
    }

    #[test]
    fn test_view_tier_len() {
        let s = session();
        let turn = || Interaction::new(s.clone(), "u", "q", "a");
        let now = Utc::now();
        let view = EnrichedView {
            session_id: s.clone(),
            hot: vec![turn(), turn()],
            warm: vec![turn()],
            cold: vec![turn(), turn(), turn()],
            summaries: vec![Summary {
                id: Uuid::new_v4(),
                session_id: s.clone(),
                vector: vec![],
                text: String::new(),
                ttl_days: 1,
                created_at: now,
                covers_from: now,
                covers_to: now,
                interaction_count: 60,
            }],
            total_interactions: 6,
            memory_bytes: 0,
            compression_ratio: 0.0,
            warm_source: None,
        };

        let lens: Vec<_> = MemoryTier::ALL.iter().map(|t| view.tier_len(*t)).collect();
        assert_eq!(lens, vec![2, 1, 3, 60]);
    }
}
