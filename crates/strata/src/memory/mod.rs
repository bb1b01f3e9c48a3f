//! Memory types and session identity
//!
//! Defines the interaction, summary and view structures that move between
//! the hot, warm, cold and archived tiers.

pub mod session;
pub mod types;

pub use session::{SessionId, SessionIdError, SessionPhase};
pub use types::{
    EnrichedView, Interaction, InteractionMetadata, MemoryTier, RelevantContext,
    RetrievalSource, ScoredSummary, Sentiment, Summary, WarmSource,
};
