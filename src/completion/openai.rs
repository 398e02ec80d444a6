//! OpenAI-compatible chat completions client with SSE streaming

use super::CompletionService;
use crate::config::CompletionConfig;
use crate::context::models::ChatMessage;
use crate::error::{ContextError, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

/// HTTP client for an OpenAI-compatible `/chat/completions` endpoint
pub struct OpenAiCompletionClient {
    http: Client,
    api_url: String,
    model: String,
    api_key: Option<SecretString>,
    organization: Option<String>,
}

impl OpenAiCompletionClient {
    /// Create a new client from configuration
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ContextError::Configuration(e.to_string()))?;

        if config.api_key.is_none() {
            warn!("No API key configured for completion service at {}", config.api_url);
        }

        Ok(Self {
            http,
            api_url: config.api_url.clone(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            organization: config.organization.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send(&self, body: &ChatCompletionRequest<'_>) -> Result<reqwest::Response> {
        let mut req = self.http.post(&self.api_url).json(body);

        if let Some(api_key) = &self.api_key {
            req = req.bearer_auth(api_key.expose_secret());
        }

        if let Some(org) = &self.organization {
            req = req.header("OpenAI-Organization", org);
        }

        let response = req
            .send()
            .await
            .map_err(|e| ContextError::Completion(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ContextError::Completion(format!(
                "HTTP {}: {}",
                status, error_text
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl CompletionService for OpenAiCompletionClient {
    async fn complete(&self, messages: &[ChatMessage], max_output_tokens: usize) -> Result<String> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages,
            max_tokens: max_output_tokens,
            stream: false,
        };

        debug!(
            "Requesting completion: {} messages, max_tokens={}",
            messages.len(),
            max_output_tokens
        );

        let response: ChatCompletionResponse = self
            .send(&body)
            .await?
            .json()
            .await
            .map_err(|e| ContextError::Completion(format!("invalid response body: {}", e)))?;

        Ok(response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }

    async fn complete_stream(
        &self,
        messages: &[ChatMessage],
        max_output_tokens: usize,
        on_chunk: &mut (dyn for<'c> FnMut(&'c str) + Send),
    ) -> Result<String> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages,
            max_tokens: max_output_tokens,
            stream: true,
        };

        debug!(
            "Requesting streamed completion: {} messages, max_tokens={}",
            messages.len(),
            max_output_tokens
        );

        let mut response = self.send(&body).await?;
        let mut lines = LineBuffer::default();
        let mut text = String::new();
        let mut done = false;

        'stream: while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ContextError::Completion(format!("failed to read stream: {}", e)))?
        {
            lines.push(&chunk);
            while let Some(line) = lines.next_line() {
                if handle_sse_line(line.trim(), &mut text, on_chunk) {
                    done = true;
                    break 'stream;
                }
            }
        }

        // Final line may arrive without a trailing newline
        if !done {
            handle_sse_line(lines.finish().trim(), &mut text, on_chunk);
        }

        debug!("Stream completed: {} chars", text.len());
        Ok(text)
    }
}

/// Raw stream bytes awaiting a line terminator.
///
/// Network chunks may end inside a multibyte character, so bytes are only
/// decoded once their whole line has arrived.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Next complete line, terminator included
    fn next_line(&mut self) -> Option<String> {
        let newline = self.pending.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.pending.drain(..=newline).collect();
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Unterminated remainder once the stream has ended
    fn finish(self) -> String {
        String::from_utf8_lossy(&self.pending).into_owned()
    }
}

/// Process one SSE line. Returns true on the terminating `[DONE]` marker.
fn handle_sse_line(
    line: &str,
    text: &mut String,
    on_chunk: &mut (dyn for<'c> FnMut(&'c str) + Send),
) -> bool {
    if line.is_empty() || line.starts_with(':') {
        return false;
    }

    let Some(data) = line.strip_prefix("data:").map(str::trim_start) else {
        return false;
    };

    if data == "[DONE]" {
        return true;
    }

    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => {
            let delta = chunk
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.delta)
                .and_then(|d| d.content);
            if let Some(content) = delta.filter(|c| !c.is_empty()) {
                on_chunk(&content);
                text.push_str(&content);
            }
        }
        Err(e) => trace!("Skipping unparseable stream chunk: {}", e),
    }

    false
}

// OpenAI-compatible API types
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: usize,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<StreamDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}
