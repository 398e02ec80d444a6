//! Selection of topics relevant to a new query

use super::models::ChatMessage;
use super::parse::parse_topic_list;
use super::token_estimator::TokenEstimator;
use crate::completion::CompletionService;
use crate::config::TopicsConfig;
use crate::error::Result;
use crate::metrics::METRICS;
use std::sync::Arc;
use tracing::{debug, warn};

/// Asks the completion service which known topics bear on a query
#[derive(Clone)]
pub struct RelevanceSelector {
    service: Arc<dyn CompletionService>,
    estimator: Arc<dyn TokenEstimator>,
    min_output_tokens: usize,
}

impl RelevanceSelector {
    pub fn new(
        service: Arc<dyn CompletionService>,
        estimator: Arc<dyn TokenEstimator>,
        config: &TopicsConfig,
    ) -> Self {
        Self {
            service,
            estimator,
            min_output_tokens: config.relevance_min_output_tokens,
        }
    }

    fn build_prompt(query: &str, topic_names: &[String]) -> String {
        format!(
            "Which of the following topics are relevant to the user's question? Give your answer \
            as a JSON array of strings, where each string is a topic. If none of the topics are \
            relevant, you can respond with an empty array. It is better to include more topics \
            than necessary than to exclude relevant topics.\n\n\
            Topics:\n\"{}\"\n\n\
            Question:\n\"{}\"",
            topic_names.join(", "),
            query
        )
    }

    /// Topic names the service considers relevant to `query`.
    ///
    /// No topics means no request. An unparseable answer degrades to an
    /// empty selection. Service and tokenizer errors are returned.
    pub async fn select_relevant(
        &self,
        query: &str,
        topic_names: &[String],
    ) -> Result<Vec<String>> {
        if topic_names.is_empty() {
            return Ok(Vec::new());
        }

        let listed = serde_json::to_string(topic_names)?;
        let max_tokens = (self.estimator.count(&listed)? * 2).max(self.min_output_tokens);
        let messages = [ChatMessage::system(Self::build_prompt(query, topic_names))];

        let response = crate::time_operation!(
            METRICS.completion_duration,
            "relevance",
            self.service.complete(&messages, max_tokens).await
        )?;

        match parse_topic_list(&response) {
            Ok(selected) => {
                debug!("Selected {} of {} topics", selected.len(), topic_names.len());
                METRICS.record_relevance("selected");
                Ok(selected)
            }
            Err(e) => {
                warn!("Failed to parse relevant topics: {}", e);
                METRICS.record_relevance("parse_failed");
                Ok(Vec::new())
            }
        }
    }
}
