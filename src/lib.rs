//! Bounded working memory for multi-turn conversations with a chat
//! completion service.

pub mod completion;
pub mod config;
pub mod context;
pub mod error;
pub mod metrics;

pub use completion::{CompletionService, OpenAiCompletionClient, ScriptedCompletion};
pub use config::Config;
pub use context::{ConversationManager, Strategy, TurnReport};
pub use error::{ContextError, Result};
