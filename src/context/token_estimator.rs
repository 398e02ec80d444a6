//! Token counting using tiktoken

use crate::error::{ContextError, Result};
use std::sync::Arc;
use tiktoken_rs::{get_bpe_from_model, CoreBPE};

/// Tokenizer seam: text in, token count out
pub trait TokenEstimator: Send + Sync {
    /// Count the tokens in the given text
    fn count(&self, text: &str) -> Result<usize>;
}

/// Tiktoken-based estimator using the encoding of a named model
pub struct TiktokenEstimator {
    bpe: Arc<CoreBPE>,
}

impl TiktokenEstimator {
    /// Create an estimator for the given model (`gpt-4` selects cl100k_base)
    pub fn for_model(model: &str) -> Result<Self> {
        let bpe = get_bpe_from_model(model)
            .map_err(|e| ContextError::TokenizerFailure(format!("{}: {}", model, e)))?;
        Ok(Self { bpe: Arc::new(bpe) })
    }
}

impl TokenEstimator for TiktokenEstimator {
    fn count(&self, text: &str) -> Result<usize> {
        Ok(self.bpe.encode_with_special_tokens(text).len())
    }
}

/// Word-based estimator. Deterministic and offline; one token per word at
/// a ratio of 1.0.
pub struct WordBasedEstimator {
    tokens_per_word: f64,
}

impl WordBasedEstimator {
    pub fn new(tokens_per_word: f64) -> Self {
        Self { tokens_per_word }
    }
}

impl Default for WordBasedEstimator {
    fn default() -> Self {
        Self::new(1.3)
    }
}

impl TokenEstimator for WordBasedEstimator {
    fn count(&self, text: &str) -> Result<usize> {
        let word_count = text.split_whitespace().count();
        Ok((word_count as f64 * self.tokens_per_word).ceil() as usize)
    }
}
