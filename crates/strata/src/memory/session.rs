//! Session identifiers and lifecycle phases
//!
//! Session IDs key every tier (hot buffer, warm cache key, durable files),
//! so they are restricted to alphanumerics, underscores and hyphens.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length for session IDs
const MAX_SESSION_ID_LEN: usize = 128;

/// Errors that can occur during session ID validation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionIdError {
    /// Session ID is empty
    #[error("Session ID cannot be empty")]
    Empty,

    /// Session ID contains invalid characters
    #[error("Session ID contains invalid characters: allowed are a-z, A-Z, 0-9, _, -")]
    InvalidChars,

    /// Session ID exceeds maximum length
    #[error("Session ID exceeds maximum length of {MAX_SESSION_ID_LEN} characters")]
    TooLong,
}

/// A validated session ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key of this session's warm-tier value in the distributed cache
    pub fn warm_key(&self) -> String {
        format!("strata:warm:{}", self.0)
    }

    fn validate(s: &str) -> Result<(), SessionIdError> {
        if s.is_empty() {
            return Err(SessionIdError::Empty);
        }

        if s.len() > MAX_SESSION_ID_LEN {
            return Err(SessionIdError::TooLong);
        }

        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(SessionIdError::InvalidChars);
        }

        Ok(())
    }
}

impl TryFrom<&str> for SessionId {
    type Error = SessionIdError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::validate(value)?;
        Ok(SessionId(value.to_string()))
    }
}

impl TryFrom<String> for SessionId {
    type Error = SessionIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::validate(&value)?;
        Ok(SessionId(value))
    }
}

impl From<SessionId> for String {
    fn from(session_id: SessionId) -> Self {
        session_id.0
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a session inside the context service
///
/// `Uninitialized → Active → Cleaned`. Writes and reads against a session
/// that is not `Active` re-initialize it unless strict sessions are enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Uninitialized,
    Active,
    Cleaned,
}
