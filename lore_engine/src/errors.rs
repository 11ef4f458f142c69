//! Error taxonomy.
//!
//! Only [`ActivationError`] ever reaches a caller of the engine. Keyword,
//! retrieval and log-write failures are contained at the smallest scope that
//! can absorb them.

use thiserror::Error;

/// Code reported for every activation failure.
pub const ACTIVATION_FAILED: &str = "ACTIVATION_FAILED";

/// Failure of a whole activation call.
///
/// Callers treat this as "no knowledge this turn" and continue sending the
/// chat message.
#[derive(Debug, Error)]
pub enum ActivationError {
    /// The initial entry fetch failed.
    #[error("failed to load knowledge entries: {0}")]
    EntryFetch(#[source] StoreError),

    /// A stored entry document could not be decoded.
    #[error("malformed knowledge entry {id}: {source}")]
    MalformedEntry {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    /// The conversation state store failed.
    #[error("conversation state unavailable: {0}")]
    State(#[source] StoreError),
}

impl ActivationError {
    /// Stable error code for callers and logs.
    pub fn code(&self) -> &'static str {
        ACTIVATION_FAILED
    }
}

/// Persistence failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("query on '{collection}' failed: {message}")]
    Query { collection: String, message: String },

    #[error("write to '{collection}' failed: {message}")]
    Write { collection: String, message: String },

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Vector path failures. Never fatal to an activation call.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("vector index query failed: {0}")]
    Index(String),

    #[error("vector services are not configured")]
    NotConfigured,
}

/// A keyword that could not be evaluated. Degrades that keyword to no-match.
#[derive(Debug, Error)]
pub enum KeywordMatchError {
    #[error("invalid keyword pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Engine configuration failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Result alias for activation calls.
pub type Result<T> = std::result::Result<T, ActivationError>;
