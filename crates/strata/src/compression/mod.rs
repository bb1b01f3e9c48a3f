//! Cold-tier compression into embedding-backed summaries
//!
//! Once a session's durable history outgrows the hot and warm tiers
//! combined, the oldest half is condensed into a single [`Summary`] and
//! inserted into the vector index. Durable history is never deleted; the
//! summary only adds a searchable archived view of it.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{CompressionConfig, TierConfig};
use crate::embedding::EmbeddingProvider;
use crate::error::StrataError;
use crate::memory::{Interaction, SessionId, Summary};
use crate::storage::{DurableStoreClient, VectorIndex, bounded};

/// Minimum length of a word kept as a keyword
const KEYWORD_MIN_LEN: usize = 4;

/// Fallback length when a turn has no sentence terminators
const UNTERMINATED_PREFIX_CHARS: usize = 200;

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had", "do",
    "does", "did", "will", "would", "could", "should", "may", "might", "must", "this", "that",
    "these", "those", "it", "its", "they", "them", "their", "we", "you", "your", "our", "i",
    "me", "my", "he", "she", "his", "her", "not", "no", "yes", "what", "which", "who", "when",
    "where", "why", "how", "all", "each", "every", "both", "few", "more", "most", "other",
    "some", "such", "than", "too", "very", "just", "also", "only", "then", "there", "here",
    "now", "about", "into", "over", "after", "before", "between", "under", "again", "further",
    "once", "during", "user", "assistant",
];

/// Result of one compression pass
#[derive(Debug, Clone, PartialEq)]
pub enum CompressionOutcome {
    /// A summary covering `candidates` interactions was inserted
    Compressed { candidates: usize, summary_id: Uuid },
    /// History is within the threshold; nothing to do
    NotNeeded { interactions: usize },
    /// A collaborator failed; the next pass retries
    Deferred { reason: String },
}

impl CompressionOutcome {
    pub fn is_deferred(&self) -> bool {
        matches!(self, CompressionOutcome::Deferred { .. })
    }
}

/// Condenses old cold-tier history into summaries
pub struct CompressionEngine {
    durable: Arc<dyn DurableStoreClient>,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    threshold: usize,
    config: CompressionConfig,
    timeout: Duration,
}

impl std::fmt::Debug for CompressionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressionEngine")
            .field("embedder", &self.embedder.name())
            .field("threshold", &self.threshold)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CompressionEngine {
    pub fn new(
        durable: Arc<dyn DurableStoreClient>,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        tiers: &TierConfig,
        config: CompressionConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            durable,
            embedder,
            index,
            threshold: tiers.compression_threshold(),
            config,
            timeout,
        }
    }

    /// Run one compression pass for the session
    ///
    /// The pass only sees the newest `scan_limit` cold interactions. When
    /// the history is longer than that, the candidates are the oldest half
    /// of that window, not of the whole history; anything older was already
    /// eligible for an earlier pass.
    ///
    /// Never fails: collaborator errors come back as
    /// [`CompressionOutcome::Deferred`].
    pub async fn compress(&self, session: &SessionId) -> CompressionOutcome {
        let scanned = match bounded(
            self.timeout,
            self.durable.find_by_session(session, self.config.scan_limit),
            StrataError::Persistence,
        )
        .await
        {
            Ok(interactions) => interactions,
            Err(e) => return self.defer(session, format!("durable read failed: {e}")),
        };

        if scanned.len() == self.config.scan_limit {
            debug!(
                session = %session,
                scan_limit = self.config.scan_limit,
                "Scan window full; older history is outside this pass"
            );
        }

        if scanned.len() <= self.threshold {
            debug!(
                session = %session,
                interactions = scanned.len(),
                threshold = self.threshold,
                "Compression not needed"
            );
            return CompressionOutcome::NotNeeded {
                interactions: scanned.len(),
            };
        }

        let mut candidates = scanned;
        candidates.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        let take = candidates.len() / 2;
        candidates.truncate(take);

        let text = self.condense(&candidates);

        let vector = match bounded(
            self.timeout,
            self.embedder.embed(&text),
            StrataError::EmbeddingService,
        )
        .await
        {
            Ok(vector) => vector,
            Err(e) => return self.defer(session, format!("embedding failed: {e}")),
        };

        if vector.len() != self.config.embedding_dimension {
            return self.defer(
                session,
                format!(
                    "embedding has dimension {}, expected {}",
                    vector.len(),
                    self.config.embedding_dimension
                ),
            );
        }

        let (Some(first), Some(last)) = (candidates.first(), candidates.last()) else {
            return self.defer(session, "no candidates selected".to_string());
        };

        let summary = Summary {
            id: Uuid::new_v4(),
            session_id: session.clone(),
            vector,
            text,
            ttl_days: self.config.ttl_days,
            created_at: Utc::now(),
            covers_from: first.timestamp,
            covers_to: last.timestamp,
            interaction_count: candidates.len(),
        };
        let summary_id = summary.id;

        if let Err(e) = bounded(
            self.timeout,
            self.index.insert(summary),
            StrataError::VectorIndex,
        )
        .await
        {
            return self.defer(session, format!("index insert failed: {e}"));
        }

        info!(
            session = %session,
            candidates = candidates.len(),
            summary_id = %summary_id,
            "Compressed cold history into summary"
        );
        CompressionOutcome::Compressed {
            candidates: candidates.len(),
            summary_id,
        }
    }

    fn defer(&self, session: &SessionId, reason: String) -> CompressionOutcome {
        warn!(session = %session, "Compression deferred: {}", reason);
        CompressionOutcome::Deferred { reason }
    }

    /// Build the condensed text for a batch, oldest first
    ///
    /// The keyword line is always kept; turn lines fill whatever budget is
    /// left under `max_summary_chars`.
    pub fn condense(&self, interactions: &[Interaction]) -> String {
        let max_chars = self.config.max_summary_chars;
        let corpus: Vec<&str> = interactions
            .iter()
            .flat_map(|i| [i.user_message.as_str(), i.assistant_response.as_str()])
            .collect();

        let keywords = extract_keywords(&corpus, self.config.keywords_max_count);
        let keyword_line = if keywords.is_empty() {
            String::new()
        } else {
            format!("Keywords: {}", keywords.join(", "))
        };

        let mut text = String::new();
        let budget = max_chars.saturating_sub(keyword_line.chars().count() + 1);
        let mut used = 0usize;

        for interaction in interactions {
            let line = format!(
                "user: {} | assistant: {}",
                first_sentences(
                    &interaction.user_message,
                    self.config.summary_sentences_per_turn
                ),
                first_sentences(
                    &interaction.assistant_response,
                    self.config.summary_sentences_per_turn
                ),
            );
            let len = line.chars().count() + 1;
            if used + len > budget {
                break;
            }
            text.push_str(&line);
            text.push('\n');
            used += len;
        }

        text.push_str(&keyword_line);
        truncate_chars(text.trim_end(), max_chars)
    }
}

/// First `count` sentences of a turn, split on `.`, `!` or `?`
fn first_sentences(content: &str, count: usize) -> String {
    let sentences: Vec<&str> = content
        .split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .take(count.max(1))
        .collect();

    if sentences.is_empty() {
        return truncate_chars(content.trim(), UNTERMINATED_PREFIX_CHARS);
    }
    sentences.join(". ") + "."
}

/// Unique significant words in order of first appearance
fn extract_keywords(corpus: &[&str], max_count: usize) -> Vec<String> {
    let stop_words: HashSet<&str> = STOP_WORDS.iter().copied().collect();
    let mut seen = HashSet::new();

    corpus
        .iter()
        .flat_map(|text| text.split(|c: char| !c.is_alphanumeric()))
        .filter_map(|word| {
            let lower = word.to_lowercase();
            let keep = word.chars().count() >= KEYWORD_MIN_LEN
                && !stop_words.contains(lower.as_str())
                && seen.insert(lower.clone());
            keep.then_some(lower)
        })
        .take(max_count)
        .collect()
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
