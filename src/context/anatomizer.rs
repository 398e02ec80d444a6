//! Topic decomposition of turns into the topic index

use super::models::ChatMessage;
use super::parse::parse_topic_excerpts;
use super::topics::SharedTopicIndex;
use crate::completion::CompletionService;
use crate::config::TopicsConfig;
use crate::error::{ContextError, Result};
use crate::metrics::METRICS;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Result of one anatomization
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnatomizeOutcome {
    /// Parsed topics were merged into the index
    Merged { topics: usize, excerpts: usize },
    /// Every attempt returned an unparseable response
    GaveUp { attempts: usize },
}

/// Splits turn content into topic-labelled excerpts via the completion service
#[derive(Clone)]
pub struct Anatomizer {
    service: Arc<dyn CompletionService>,
    index: SharedTopicIndex,
    config: TopicsConfig,
}

impl Anatomizer {
    pub fn new(
        service: Arc<dyn CompletionService>,
        index: SharedTopicIndex,
        config: TopicsConfig,
    ) -> Self {
        Self {
            service,
            index,
            config,
        }
    }

    /// Largest turn that may be anatomized. The prompt, the content and the
    /// structured answer all have to fit the model's window.
    pub fn content_limit(&self) -> usize {
        self.config.model_limit / 3
    }

    fn build_prompt(content: &str, known_topics: &[String]) -> String {
        format!(
            "Go through the following message and split it into smaller parts based on the \
            different topics it covers. Your result should be a JSON object where the keys are \
            the topics and the values are an array of strings representing the corresponding \
            excerpts from the message. You can ignore any irrelevant details.\n\n\
            You can use the following topics as a reference: {}\n\n\
            Message:\n\"{}\"",
            known_topics.join(", "),
            content
        )
    }

    /// Decompose `content` into topics and merge them into the index.
    ///
    /// Unparseable answers are retried up to `max_parse_retries` times, then
    /// dropped. Service errors end the attempt immediately.
    pub async fn anatomize(&self, token_count: usize, content: &str) -> Result<AnatomizeOutcome> {
        let limit = self.content_limit();
        if token_count > limit {
            return Err(ContextError::ContentTooLong {
                tokens: token_count,
                limit,
            });
        }

        let max_tokens = (token_count * 2).max(self.config.min_output_tokens);
        let attempts = self.config.max_parse_retries + 1;

        for attempt in 1..=attempts {
            let known_topics = self.index.read().await.topic_names();
            let messages = [ChatMessage::system(Self::build_prompt(content, &known_topics))];

            let response = crate::time_operation!(
                METRICS.completion_duration,
                "anatomize",
                self.service.complete(&messages, max_tokens).await
            )?;

            match parse_topic_excerpts(&response) {
                Ok(parsed) => {
                    let topics = parsed.len();
                    let mut index = self.index.write().await;
                    let excerpts = index.merge(parsed);
                    METRICS.record_topic_excerpts(index.excerpt_count());
                    debug!(
                        "Merged {} excerpts across {} topics ({} topics known)",
                        excerpts,
                        topics,
                        index.topic_count()
                    );
                    return Ok(AnatomizeOutcome::Merged { topics, excerpts });
                }
                Err(e) => {
                    warn!(
                        "Failed to parse topic decomposition (attempt {}/{}): {}",
                        attempt, attempts, e
                    );
                }
            }
        }

        Ok(AnatomizeOutcome::GaveUp { attempts })
    }

    /// Launch anatomization in the background; failures are logged and dropped
    pub fn spawn(&self, token_count: usize, content: String) -> JoinHandle<()> {
        let anatomizer = self.clone();
        tokio::spawn(async move {
            match anatomizer.anatomize(token_count, &content).await {
                Ok(AnatomizeOutcome::Merged { .. }) => METRICS.record_anatomization("merged"),
                Ok(AnatomizeOutcome::GaveUp { .. }) => METRICS.record_anatomization("parse_failed"),
                Err(e) if e.is_contained() => {
                    warn!("Skipping topic decomposition: {}", e);
                    METRICS.record_anatomization("skipped");
                }
                Err(e) => {
                    warn!("Topic decomposition abandoned: {}", e);
                    METRICS.record_anatomization("failed");
                }
            }
        })
    }
}
