//! Layered configuration: optional TOML file, then `CONVERSE__*` environment
//! variables, then the provider credential variables.

use crate::context::assembler::Strategy;
use crate::context::budget::OverflowPolicy;
use crate::error::{ContextError, Result};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment prefix for overrides, e.g. `CONVERSE__BUDGET__MAX_TOTAL=100`
pub const ENV_PREFIX: &str = "CONVERSE";

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub completion: CompletionConfig,

    #[serde(default)]
    pub tokenizer: TokenizerConfig,

    #[serde(default)]
    pub budget: BudgetConfig,

    #[serde(default)]
    pub compaction: CompactionConfig,

    #[serde(default)]
    pub topics: TopicsConfig,

    #[serde(default)]
    pub strategy: Strategy,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from an optional file plus environment overrides
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        let config = config.with_env_credentials();
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string (no environment layering)
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(contents, config::FileFormat::Toml))
            .build()?;
        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Fill in API credentials from the conventional provider variables
    pub fn with_env_credentials(mut self) -> Self {
        if self.completion.api_key.is_none() {
            self.completion.api_key = ["OPENAI_API_KEY", "OPEN_AI_KEY"]
                .iter()
                .find_map(|name| std::env::var(name).ok())
                .map(SecretString::new);
        }

        if self.completion.organization.is_none() {
            self.completion.organization = ["OPENAI_ORGANIZATION", "OPEN_AI_ORG"]
                .iter()
                .find_map(|name| std::env::var(name).ok());
        }

        self
    }

    /// Validate that the configuration is usable
    pub fn validate(&self) -> Result<()> {
        if self.budget.max_total == 0 {
            return Err(ContextError::Configuration(
                "budget.max_total must be greater than zero".to_string(),
            ));
        }

        if self.topics.model_limit == 0 {
            return Err(ContextError::Configuration(
                "topics.model_limit must be greater than zero".to_string(),
            ));
        }

        if self.topics.recent_turns == 0 {
            return Err(ContextError::Configuration(
                "topics.recent_turns must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// Completion service connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Read from `OPENAI_API_KEY` when not configured
    #[serde(default)]
    pub api_key: Option<SecretString>,

    #[serde(default)]
    pub organization: Option<String>,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Output ceiling for user-facing responses
    #[serde(default = "default_response_max_tokens")]
    pub response_max_tokens: usize,
}

fn default_api_url() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_model() -> String {
    "gpt-4".to_string()
}

fn default_timeout_ms() -> u64 {
    60_000
}

fn default_response_max_tokens() -> usize {
    300
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            model: default_model(),
            api_key: None,
            organization: None,
            timeout_ms: default_timeout_ms(),
            response_max_tokens: default_response_max_tokens(),
        }
    }
}

impl CompletionConfig {
    /// Get timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Tokenizer selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenizerConfig {
    /// Model name used to pick the BPE encoding
    #[serde(default = "default_model")]
    pub model: String,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
        }
    }
}

/// Token budget for the live message store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde(default = "default_max_total")]
    pub max_total: usize,

    #[serde(default)]
    pub overflow: OverflowPolicy,
}

fn default_max_total() -> usize {
    1000
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_total: default_max_total(),
            overflow: OverflowPolicy::default(),
        }
    }
}

/// Background compaction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Lower bound on the summary request's output budget
    #[serde(default = "default_floor_tokens")]
    pub floor_tokens: usize,

    /// Extra attempts after a failed summary request
    #[serde(default)]
    pub max_retries: usize,
}

fn default_floor_tokens() -> usize {
    100
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            floor_tokens: default_floor_tokens(),
            max_retries: 0,
        }
    }
}

/// Topic index, anatomization and retrieval settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicsConfig {
    /// Context window of the completion model; a third of it bounds the
    /// content that may be anatomized
    #[serde(default = "default_model_limit")]
    pub model_limit: usize,

    #[serde(default)]
    pub max_parse_retries: usize,

    #[serde(default = "default_min_output_tokens")]
    pub min_output_tokens: usize,

    #[serde(default = "default_relevance_min_output_tokens")]
    pub relevance_min_output_tokens: usize,

    /// Live turns sent alongside retrieved excerpts
    #[serde(default = "default_recent_turns")]
    pub recent_turns: usize,
}

fn default_model_limit() -> usize {
    8192
}

fn default_min_output_tokens() -> usize {
    300
}

fn default_relevance_min_output_tokens() -> usize {
    100
}

fn default_recent_turns() -> usize {
    10
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            model_limit: default_model_limit(),
            max_parse_retries: 0,
            min_output_tokens: default_min_output_tokens(),
            relevance_min_output_tokens: default_relevance_min_output_tokens(),
            recent_turns: default_recent_turns(),
        }
    }
}

/// Log output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.completion.model, "gpt-4");
        assert_eq!(config.completion.response_max_tokens, 300);
        assert_eq!(config.budget.max_total, 1000);
        assert_eq!(config.budget.overflow, OverflowPolicy::EvictAll);
        assert_eq!(config.compaction.floor_tokens, 100);
        assert_eq!(config.topics.model_limit, 8192);
        assert_eq!(config.topics.recent_turns, 10);
        assert_eq!(config.strategy, Strategy::SummarizedWindow);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_str() {
        let config = Config::from_toml_str(
            r#"
            strategy = "retrieval"

            [budget]
            max_total = 100
            overflow = "retain_newest"

            [topics]
            recent_turns = 4

            [logging]
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.strategy, Strategy::RetrievalAugmented);
        assert_eq!(config.budget.max_total, 100);
        assert_eq!(config.budget.overflow, OverflowPolicy::RetainNewest);
        assert_eq!(config.topics.recent_turns, 4);
        assert_eq!(config.topics.model_limit, 8192);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_zero_budget_rejected() {
        let result = Config::from_toml_str("[budget]\nmax_total = 0\n");
        assert!(matches!(result, Err(ContextError::Configuration(_))));
    }

    #[test]
    fn test_env_credentials() {
        std::env::set_var("OPENAI_API_KEY", "sk-test");
        std::env::set_var("OPENAI_ORGANIZATION", "org-test");

        let config = Config::default().with_env_credentials();
        assert_eq!(
            config.completion.api_key.as_ref().map(|k| k.expose_secret().as_str()),
            Some("sk-test")
        );
        assert_eq!(config.completion.organization.as_deref(), Some("org-test"));

        std::env::remove_var("OPENAI_API_KEY");
        std::env::remove_var("OPENAI_ORGANIZATION");
    }

    #[test]
    fn test_duration_conversion() {
        let config = CompletionConfig::default();
        assert_eq!(config.timeout(), Duration::from_secs(60));
    }
}
