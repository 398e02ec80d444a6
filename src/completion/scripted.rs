//! In-process completion service with scripted answers
//!
//! Answers come from a FIFO queue first, then from a responder function.
//! Every request is recorded so callers can assert on what was sent.

use super::CompletionService;
use crate::context::models::ChatMessage;
use crate::error::{ContextError, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

type Responder = Box<dyn Fn(&[ChatMessage], usize) -> Result<String> + Send + Sync>;

/// A request observed by [`ScriptedCompletion`]
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<ChatMessage>,
    pub max_output_tokens: usize,
}

impl RecordedCall {
    /// Content of the first message, where all internal prompts live
    pub fn prompt(&self) -> &str {
        self.messages.first().map(|m| m.content.as_str()).unwrap_or_default()
    }
}

pub struct ScriptedCompletion {
    queue: Mutex<VecDeque<Result<String>>>,
    responder: Responder,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedCompletion {
    /// Service that answers every request with an empty string
    pub fn new() -> Self {
        Self::from_fn(|_, _| Ok(String::new()))
    }

    /// Service that answers from a fixed queue, then with empty strings
    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let service = Self::new();
        for response in responses {
            service.push_response(response);
        }
        service
    }

    /// Service that computes each answer from the request
    pub fn from_fn<F>(responder: F) -> Self
    where
        F: Fn(&[ChatMessage], usize) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            queue: Mutex::new(VecDeque::new()),
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push_response(&self, response: impl Into<String>) {
        lock(&self.queue).push_back(Ok(response.into()));
    }

    pub fn push_error(&self, message: impl Into<String>) {
        lock(&self.queue)
            .push_back(Err(ContextError::Completion(message.into())));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }
}

impl Default for ScriptedCompletion {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(&self, messages: &[ChatMessage], max_output_tokens: usize) -> Result<String> {
        lock(&self.calls).push(RecordedCall {
            messages: messages.to_vec(),
            max_output_tokens,
        });

        let queued = lock(&self.queue).pop_front();
        match queued {
            Some(answer) => answer,
            None => (self.responder)(messages, max_output_tokens),
        }
    }

    async fn complete_stream(
        &self,
        messages: &[ChatMessage],
        max_output_tokens: usize,
        on_chunk: &mut (dyn for<'c> FnMut(&'c str) + Send),
    ) -> Result<String> {
        let text = self.complete(messages, max_output_tokens).await?;
        for piece in text.split_inclusive(' ') {
            on_chunk(piece);
        }
        Ok(text)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
