//! LLM Provider Abstraction
//!
//! Responsibilities:
//! - Unified Provider trait for all LLM backends
//! - Common request/response types
//! - Token estimation

pub mod anthropic;
pub mod openai;
pub mod token_counter;

pub use anthropic::{AnthropicProvider, create_anthropic_config};
pub use openai::{OpenAiProvider, create_openai_config};
pub use token_counter::SimpleTokenCounter;

use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Provider-specific errors
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("API error: {message}")]
    Api {
        message: String,
        status_code: Option<u16>,
    },

    #[error("Rate limited, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    #[error("Authentication failed: {message}")]
    Auth { message: String },

    #[error("Context length exceeded: {length} > {max_length}")]
    ContextLengthExceeded { length: usize, max_length: usize },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Network error: {source}")]
    Network { source: reqwest::Error },

    #[error("Request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Empty response from model")]
    EmptyResponse,

    #[error("Invalid config: {message}")]
    InvalidConfig { message: String },
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageRole {
    #[serde(rename = "system")]
    System,
    #[serde(rename = "user")]
    User,
    #[serde(rename = "assistant")]
    Assistant,
}

/// A single message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    #[serde(default, deserialize_with = "deserialize_message_content")]
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

fn deserialize_message_content<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let content = Option::<String>::deserialize(deserializer)?;
    Ok(content.unwrap_or_default())
}

/// Complete request to LLM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub stop: Option<Vec<String>>,
}

/// Response from LLM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Option<Usage>,
}

impl CompletionResponse {
    /// Text of the first choice, if the model returned any.
    pub fn text(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }
}

/// Choice in response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: usize,
    pub message: Message,
    pub finish_reason: Option<String>,
}

/// Token usage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Provider configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub provider_type: ProviderType,
    pub api_key: String,
    pub base_url: Option<String>,
    pub organization: Option<String>,
    pub default_model: String,
    pub timeout_ms: u64,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let masked_key = if self.api_key.len() > 8 {
            format!("{}***", &self.api_key[..4])
        } else {
            "***".to_string()
        };
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("provider_type", &self.provider_type)
            .field("api_key", &masked_key)
            .field("base_url", &self.base_url)
            .field("organization", &self.organization)
            .field("default_model", &self.default_model)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderType {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "azure")]
    Azure,
    #[serde(rename = "ollama")]
    Ollama,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::OpenAi => "openai",
            ProviderType::Anthropic => "anthropic",
            ProviderType::Azure => "azure",
            ProviderType::Ollama => "ollama",
        }
    }
}

impl From<String> for ProviderType {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "openai" => ProviderType::OpenAi,
            "anthropic" => ProviderType::Anthropic,
            "azure" => ProviderType::Azure,
            "ollama" => ProviderType::Ollama,
            _ => ProviderType::OpenAi, // 默认使用 OpenAi
        }
    }
}

impl From<&str> for ProviderType {
    fn from(s: &str) -> Self {
        s.to_string().into()
    }
}

/// Token counter trait
pub trait TokenCounter: Send + Sync {
    fn count_messages(&self, messages: &[Message], model: &str) -> usize;
    fn count_text(&self, text: &str, model: &str) -> usize;
    fn get_max_tokens(&self, model: &str) -> usize;
}

/// LLM Provider trait
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Get provider type
    fn provider_type(&self) -> ProviderType;

    /// Get provider name
    fn name(&self) -> &str;

    /// Complete a request (non-streaming)
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError>;

    /// Get token usage for a request
    fn estimate_tokens(&self, request: &CompletionRequest) -> Usage;

    /// Get configuration
    fn config(&self) -> &ProviderConfig;
}

/// Convert provider error from external error
pub fn map_provider_error(error: reqwest::Error) -> ProviderError {
    if let Some(status) = error.status() {
        match status.as_u16() {
            401 => ProviderError::Auth {
                message: "Invalid API key".to_string(),
            },
            403 => ProviderError::Auth {
                message: "Access denied".to_string(),
            },
            404 => ProviderError::Api {
                message: "Resource not found".to_string(),
                status_code: Some(404),
            },
            429 => ProviderError::RateLimited { retry_after: 60 },
            500 | 502 | 503 | 504 => ProviderError::Api {
                message: "Server error".to_string(),
                status_code: Some(status.as_u16()),
            },
            _ => ProviderError::Api {
                message: error.to_string(),
                status_code: Some(status.as_u16()),
            },
        }
    } else if error.is_timeout() {
        ProviderError::Timeout { seconds: 0 }
    } else {
        ProviderError::Network { source: error }
    }
}

/// Build the shared HTTP client for a provider config.
pub(crate) fn build_http_client(config: &ProviderConfig) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_millis(config.timeout_ms))
        .build()
        .map_err(|e| ProviderError::InvalidConfig {
            message: format!("Failed to create HTTP client: {}", e),
        })
}
