//! Error types for the conversation context manager

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, ContextError>;

/// Context management errors
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Tokenizer failure: {0}")]
    TokenizerFailure(String),

    /// Eviction was requested on an empty store. Indicates a budget
    /// enforcement bug rather than a recoverable condition.
    #[error("Cannot evict from an empty message store")]
    EmptyStore,

    #[error(
        "The message is {tokens} tokens, which is too long to process: \
         please reduce it to {limit} tokens or less"
    )]
    ContentTooLong { tokens: usize, limit: usize },

    #[error("Failed to parse structured service response: {0}")]
    ServiceParseFailure(String),

    #[error("Token budget of {budget} cannot hold a single turn of {smallest} tokens")]
    BudgetTooSmall { budget: usize, smallest: usize },

    #[error("Completion service error: {0}")]
    Completion(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ContextError {
    /// Whether the error is an expected outcome of background enrichment
    /// (unusable answer, oversized input) rather than a fault worth a warning.
    pub fn is_contained(&self) -> bool {
        matches!(
            self,
            ContextError::ContentTooLong { .. } | ContextError::ServiceParseFailure(_)
        )
    }
}

impl From<config::ConfigError> for ContextError {
    fn from(err: config::ConfigError) -> Self {
        ContextError::Configuration(err.to_string())
    }
}

impl From<serde_json::Error> for ContextError {
    fn from(err: serde_json::Error) -> Self {
        ContextError::ServiceParseFailure(err.to_string())
    }
}
