//! Strata - tiered conversational-context memory engine
//!
//! Keeps per-session conversation history in an in-process hot buffer, a
//! TTL-bounded warm cache and an authoritative durable store, and compresses
//! old history into embedding-backed summaries that stay searchable by
//! similarity.

pub mod compression;
pub mod config;
pub mod embedding;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod service;
pub mod storage;
pub mod testing;

pub use error::StrataError;
pub use service::{ContextService, ContextServiceBuilder};
