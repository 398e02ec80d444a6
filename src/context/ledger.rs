//! Running token totals for the live message store

use super::token_estimator::TokenEstimator;
use crate::error::Result;
use std::sync::Arc;

/// Incrementally maintained token total.
///
/// Every mutation of the store reports its delta here so `total()` is O(1)
/// and never re-tokenizes history.
#[derive(Clone)]
pub struct TokenLedger {
    estimator: Arc<dyn TokenEstimator>,
    total: usize,
}

impl TokenLedger {
    pub fn new(estimator: Arc<dyn TokenEstimator>) -> Self {
        Self { estimator, total: 0 }
    }

    /// Count tokens for a piece of text
    pub fn count(&self, text: &str) -> Result<usize> {
        self.estimator.count(text)
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub(crate) fn record_append(&mut self, tokens: usize) {
        self.total += tokens;
    }

    pub(crate) fn record_evict(&mut self, tokens: usize) {
        debug_assert!(tokens <= self.total, "ledger underflow");
        self.total = self.total.saturating_sub(tokens);
    }

    pub(crate) fn record_update(&mut self, old_tokens: usize, new_tokens: usize) {
        self.record_evict(old_tokens);
        self.record_append(new_tokens);
    }
}

impl std::fmt::Debug for TokenLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenLedger").field("total", &self.total).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::token_estimator::WordBasedEstimator;

    fn ledger() -> TokenLedger {
        TokenLedger::new(Arc::new(WordBasedEstimator::new(1.0)))
    }

    #[test]
    fn test_count_delegates_to_estimator() {
        assert_eq!(ledger().count("a b c").unwrap(), 3);
    }

    #[test]
    fn test_running_total() {
        let mut ledger = ledger();
        ledger.record_append(60);
        ledger.record_append(60);
        assert_eq!(ledger.total(), 120);

        ledger.record_update(60, 20);
        assert_eq!(ledger.total(), 80);

        ledger.record_evict(20);
        assert_eq!(ledger.total(), 60);
    }
}
