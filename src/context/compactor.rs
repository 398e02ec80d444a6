//! Background compaction of stored turns into shorter summaries
//!
//! Each appended turn may be handed to the compactor, which asks the
//! completion service for a summary and swaps it in only when it is strictly
//! cheaper. The swap is addressed by turn id, so a turn evicted while its
//! summary was in flight is simply skipped.

use super::models::{ChatMessage, TurnId};
use super::store::SharedStore;
use super::token_estimator::TokenEstimator;
use crate::completion::CompletionService;
use crate::config::CompactionConfig;
use crate::error::{ContextError, Result};
use crate::metrics::METRICS;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Result of one compaction attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompactionOutcome {
    /// Summary replaced the turn's content
    Applied { before: usize, after: usize },
    /// Summary was not smaller; the turn is unchanged
    Rejected { original: usize, candidate: usize },
    /// Turn left the store before the summary arrived
    TurnEvicted,
}

impl CompactionOutcome {
    fn label(&self) -> &'static str {
        match self {
            CompactionOutcome::Applied { .. } => "applied",
            CompactionOutcome::Rejected { .. } => "rejected",
            CompactionOutcome::TurnEvicted => "evicted",
        }
    }
}

/// LLM-backed turn compactor
#[derive(Clone)]
pub struct Compactor {
    service: Arc<dyn CompletionService>,
    estimator: Arc<dyn TokenEstimator>,
    store: SharedStore,
    config: CompactionConfig,
}

impl Compactor {
    pub fn new(
        service: Arc<dyn CompletionService>,
        estimator: Arc<dyn TokenEstimator>,
        store: SharedStore,
        config: CompactionConfig,
    ) -> Self {
        Self {
            service,
            estimator,
            store,
            config,
        }
    }

    /// Build the summarization prompt
    fn build_prompt(content: &str) -> String {
        format!(
            "Summarize the following message, cutting out any unnecessary details:\n\n{}",
            content
        )
    }

    /// Output budget for a summary of a turn of `token_count` tokens
    pub fn output_budget(&self, token_count: usize) -> usize {
        token_count.max(self.config.floor_tokens)
    }

    /// Summarize a turn and apply the summary if it is strictly smaller
    pub async fn compact(
        &self,
        id: TurnId,
        token_count: usize,
        content: &str,
    ) -> Result<CompactionOutcome> {
        let messages = [ChatMessage::system(Self::build_prompt(content))];
        let max_tokens = self.output_budget(token_count);

        let mut attempt = 0;
        let summary = loop {
            attempt += 1;
            let result = crate::time_operation!(
                METRICS.completion_duration,
                "compaction",
                self.service.complete(&messages, max_tokens).await
            );
            match result {
                Ok(summary) => break summary,
                Err(e) if attempt <= self.config.max_retries => {
                    debug!("Compaction attempt {} for turn {} failed: {}", attempt, id, e);
                }
                Err(e) => return Err(e),
            }
        };

        let summary = summary.trim();
        if summary.is_empty() {
            return Err(ContextError::ServiceParseFailure(
                "empty summary".to_string(),
            ));
        }

        let summary_tokens = self.estimator.count(summary)?;
        if summary_tokens >= token_count {
            debug!(
                "Summary for turn {} not smaller ({} >= {}), keeping original",
                id, summary_tokens, token_count
            );
            return Ok(CompactionOutcome::Rejected {
                original: token_count,
                candidate: summary_tokens,
            });
        }

        let applied = self.store.write().await.update_content_by_id(id, summary)?;
        if !applied {
            return Ok(CompactionOutcome::TurnEvicted);
        }

        debug!("Compacted turn {}: {} -> {} tokens", id, token_count, summary_tokens);
        Ok(CompactionOutcome::Applied {
            before: token_count,
            after: summary_tokens,
        })
    }

    /// Launch compaction in the background. Failures are logged and dropped;
    /// the turn keeps its original content.
    pub fn spawn(&self, id: TurnId, token_count: usize, content: String) -> JoinHandle<()> {
        let compactor = self.clone();
        tokio::spawn(async move {
            match compactor.compact(id, token_count, &content).await {
                Ok(outcome) => METRICS.record_compaction(outcome.label()),
                Err(e) if e.is_contained() => {
                    debug!("Compaction of turn {} skipped: {}", id, e);
                    METRICS.record_compaction("unusable");
                }
                Err(e) => {
                    warn!("Compaction of turn {} abandoned: {}", id, e);
                    METRICS.record_compaction("failed");
                }
            }
        })
    }
}
