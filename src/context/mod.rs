//! Conversation working memory
//!
//! Turns live in a token-accounted [`MessageStore`] that is trimmed
//! oldest-first to a fixed budget. Depending on the [`Strategy`], appended
//! turns are compacted in the background or decomposed into a
//! [`TopicIndex`] that later requests retrieve excerpts from.

pub mod anatomizer;
pub mod assembler;
pub mod budget;
pub mod compactor;
pub mod ledger;
pub mod manager;
pub mod models;
pub mod parse;
pub mod relevance;
pub mod store;
pub mod token_estimator;
pub mod topics;

pub use anatomizer::{AnatomizeOutcome, Anatomizer};
pub use assembler::{ContextAssembler, Strategy, RETRIEVAL_PREAMBLE};
pub use budget::{BudgetEnforcer, EvictionReport, OverflowPolicy};
pub use compactor::{CompactionOutcome, Compactor};
pub use ledger::TokenLedger;
pub use manager::{ConversationManager, TurnReport};
pub use models::{ChatMessage, Role, Turn, TurnId};
pub use relevance::RelevanceSelector;
pub use store::{MessageStore, SharedStore};
pub use token_estimator::{TiktokenEstimator, TokenEstimator, WordBasedEstimator};
pub use topics::{SharedTopicIndex, TopicIndex};
