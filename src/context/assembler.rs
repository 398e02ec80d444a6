//! Outbound message list construction for each retention strategy

use super::models::ChatMessage;
use super::store::MessageStore;
use serde::{Deserialize, Serialize};

/// Leading instruction for retrieval-augmented requests; the gathered
/// excerpts follow it, joined with `"; "`.
pub const RETRIEVAL_PREAMBLE: &str =
    "You are a helpful AI assistant. Answer the user's questions based on the following excerpts: ";

/// How prior conversation is retained and presented
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    /// Full live store, trimmed only by budget eviction
    #[serde(rename = "raw")]
    RawWindow,
    /// Full live store, with turns compacted in the background
    #[default]
    #[serde(rename = "summarized")]
    SummarizedWindow,
    /// Retrieved topic excerpts plus the most recent turns
    #[serde(rename = "retrieval")]
    RetrievalAugmented,
}

impl Strategy {
    /// Whether appended turns are handed to the compactor
    pub fn compacts_turns(&self) -> bool {
        matches!(self, Strategy::SummarizedWindow)
    }

    /// Whether appended turns are decomposed into the topic index
    pub fn indexes_topics(&self) -> bool {
        matches!(self, Strategy::RetrievalAugmented)
    }
}

/// Builds the message list sent to the completion service
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    strategy: Strategy,
    recent_turns: usize,
}

impl ContextAssembler {
    pub fn new(strategy: Strategy, recent_turns: usize) -> Self {
        Self {
            strategy,
            recent_turns,
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Assemble the request. `excerpts` is only read by the retrieval
    /// strategy. Roles and chronological order of live turns are preserved.
    pub fn assemble(&self, store: &MessageStore, excerpts: &[String]) -> Vec<ChatMessage> {
        match self.strategy {
            Strategy::RawWindow | Strategy::SummarizedWindow => store.snapshot(),
            Strategy::RetrievalAugmented => {
                let mut messages = Vec::with_capacity(self.recent_turns + 1);
                messages.push(ChatMessage::system(format!(
                    "{}{}",
                    RETRIEVAL_PREAMBLE,
                    excerpts.join("; ")
                )));
                messages.extend(store.recent(self.recent_turns));
                messages
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::models::Role;
    use crate::context::token_estimator::WordBasedEstimator;
    use std::sync::Arc;

    fn store_with(turns: usize) -> MessageStore {
        let mut store = MessageStore::new(Arc::new(WordBasedEstimator::new(1.0)));
        for i in 0..turns {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            store.append(role, format!("turn {}", i)).unwrap();
        }
        store
    }

    #[test]
    fn test_window_strategies_send_full_store() {
        let store = store_with(4);
        for strategy in [Strategy::RawWindow, Strategy::SummarizedWindow] {
            let messages =
                ContextAssembler::new(strategy, 2).assemble(&store, &["ignored".to_string()]);
            assert_eq!(messages, store.snapshot());
        }
    }

    #[test]
    fn test_retrieval_prepends_excerpts_and_limits_history() {
        let store = store_with(14);
        let excerpts = vec!["parcel left depot".to_string(), "eta friday".to_string()];
        let messages =
            ContextAssembler::new(Strategy::RetrievalAugmented, 10).assemble(&store, &excerpts);

        assert_eq!(messages.len(), 11);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(
            messages[0].content,
            format!("{}parcel left depot; eta friday", RETRIEVAL_PREAMBLE)
        );
        assert_eq!(messages[1].content, "turn 4");
        assert_eq!(messages[1].role, Role::User);
        assert_eq!(messages[10].content, "turn 13");
        assert_eq!(messages[10].role, Role::Assistant);
    }

    #[test]
    fn test_retrieval_with_short_history() {
        let store = store_with(1);
        let messages =
            ContextAssembler::new(Strategy::RetrievalAugmented, 10).assemble(&store, &[]);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, RETRIEVAL_PREAMBLE);
    }

    #[test]
    fn test_strategy_background_work() {
        assert!(!Strategy::RawWindow.compacts_turns());
        assert!(!Strategy::RawWindow.indexes_topics());
        assert!(Strategy::SummarizedWindow.compacts_turns());
        assert!(Strategy::RetrievalAugmented.indexes_topics());
    }

    #[test]
    fn test_strategy_serde_names() {
        let strategy: Strategy = serde_json::from_str("\"retrieval\"").unwrap();
        assert_eq!(strategy, Strategy::RetrievalAugmented);
        assert_eq!(serde_json::to_string(&Strategy::RawWindow).unwrap(), "\"raw\"");
    }
}
