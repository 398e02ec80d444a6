//! Completion service seam
//!
//! The context manager only ever hands the service role/content pairs and an
//! output token ceiling, and only ever reads plain text back. Structured
//! (JSON) answers are parsed by the caller.

pub mod openai;
pub mod scripted;

pub use openai::OpenAiCompletionClient;
pub use scripted::ScriptedCompletion;

use crate::context::models::ChatMessage;
use crate::error::Result;
use async_trait::async_trait;

/// Chat completion backend
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Request a full, non-streamed completion
    async fn complete(&self, messages: &[ChatMessage], max_output_tokens: usize) -> Result<String>;

    /// Request a streamed completion, invoking `on_chunk` for each text delta.
    /// Returns the concatenated text.
    async fn complete_stream(
        &self,
        messages: &[ChatMessage],
        max_output_tokens: usize,
        on_chunk: &mut (dyn for<'c> FnMut(&'c str) + Send),
    ) -> Result<String> {
        let text = self.complete(messages, max_output_tokens).await?;
        on_chunk(&text);
        Ok(text)
    }
}
