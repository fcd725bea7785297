//! Anthropic Provider Implementation
//!
//! Supports:
//! - Claude API (Messages API)

use super::*;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderValue};
use std::sync::Arc;

/// Anthropic API version
const ANTHROPIC_API_VERSION: &str = "2023-06-01";

/// Anthropic Provider
#[derive(Clone)]
pub struct AnthropicProvider {
    config: ProviderConfig,
    client: Client,
    token_counter: Arc<dyn TokenCounter>,
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("name", &self.config.name)
            .field("default_model", &self.config.default_model)
            .finish_non_exhaustive()
    }
}

impl AnthropicProvider {
    /// Create a new Anthropic provider
    pub fn new(
        config: ProviderConfig,
        token_counter: Arc<dyn TokenCounter>,
    ) -> Result<Self, ProviderError> {
        let client = build_http_client(&config)?;

        Ok(Self {
            config,
            client,
            token_counter,
        })
    }

    /// Get base URL for API calls
    fn get_base_url(&self) -> String {
        match &self.config.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => "https://api.anthropic.com/v1".to_string(),
        }
    }

    fn get_headers(&self) -> Result<HeaderMap, ProviderError> {
        let invalid = |what: &str| ProviderError::InvalidConfig {
            message: format!("{} contains characters not allowed in a header", what),
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.config.api_key).map_err(|_| invalid("API key"))?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_API_VERSION),
        );
        if let Some(org) = &self.config.organization {
            headers.insert(
                "anthropic-organization",
                HeaderValue::from_str(org).map_err(|_| invalid("Organization"))?,
            );
        }
        Ok(headers)
    }

    /// System turns go into the top-level `system` field; the rest keep their order.
    fn build_body(&self, request: &CompletionRequest) -> serde_json::Value {
        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == MessageRole::System)
            .map(|m| m.content.as_str())
            .collect();

        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .map(|m| {
                serde_json::json!({
                    "role": match m.role {
                        MessageRole::Assistant => "assistant",
                        _ => "user",
                    },
                    "content": m.content,
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(1024),
            "temperature": request.temperature.unwrap_or(0.1),
        });

        if !system.is_empty() {
            body["system"] = serde_json::json!(system.join("\n\n"));
        }

        if let Some(stop) = &request.stop {
            body["stop_sequences"] = serde_json::json!(stop);
        }
        body
    }
}

#[async_trait::async_trait]
impl LlmProvider for AnthropicProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Anthropic
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let url = format!("{}/messages", self.get_base_url());

        let estimated = self.estimate_tokens(request).total_tokens as usize;
        let limit = self.token_counter.get_max_tokens(&request.model);
        if estimated > limit {
            return Err(ProviderError::ContextLengthExceeded {
                length: estimated,
                max_length: limit,
            });
        }

        let response = self
            .client
            .post(&url)
            .headers(self.get_headers()?)
            .json(&self.build_body(request))
            .send()
            .await
            .map_err(map_provider_error)?;

        if response.status() == reqwest::StatusCode::BAD_REQUEST {
            let error: serde_json::Value = response
                .json()
                .await
                .unwrap_or_else(|_| serde_json::json!({}));
            let message = error["error"]["message"]
                .as_str()
                .unwrap_or("Invalid request")
                .to_string();
            return Err(ProviderError::InvalidRequest { message });
        }

        let response = response.error_for_status().map_err(map_provider_error)?;

        let data: serde_json::Value = response.json().await.map_err(|e| ProviderError::Api {
            message: format!("Failed to parse response: {}", e),
            status_code: None,
        })?;

        parse_messages_response(&data, &request.model)
    }

    fn estimate_tokens(&self, request: &CompletionRequest) -> Usage {
        let prompt_tokens = self
            .token_counter
            .count_messages(&request.messages, &request.model);
        let completion_tokens = request.max_tokens.unwrap_or(1024) as usize;
        Usage {
            prompt_tokens: prompt_tokens as u32,
            completion_tokens: completion_tokens as u32,
            total_tokens: (prompt_tokens + completion_tokens) as u32,
        }
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }
}

/// Convert a Messages API payload into the common response shape.
fn parse_messages_response(
    data: &serde_json::Value,
    requested_model: &str,
) -> Result<CompletionResponse, ProviderError> {
    let text: String = data["content"]
        .as_array()
        .map(|blocks| {
            blocks
                .iter()
                .filter(|b| b["type"].as_str().unwrap_or("text") == "text")
                .filter_map(|b| b["text"].as_str())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.is_empty() {
        return Err(ProviderError::EmptyResponse);
    }

    let input = data["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32;
    let output = data["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32;

    Ok(CompletionResponse {
        id: data["id"].as_str().unwrap_or("").to_string(),
        model: data["model"].as_str().unwrap_or(requested_model).to_string(),
        choices: vec![Choice {
            index: 0,
            message: Message::assistant(text),
            finish_reason: data["stop_reason"].as_str().map(|s| s.to_string()),
        }],
        usage: Some(Usage {
            prompt_tokens: input,
            completion_tokens: output,
            total_tokens: input + output,
        }),
    })
}

/// Create a basic Anthropic configuration
pub fn create_anthropic_config(name: &str, api_key: &str, default_model: &str) -> ProviderConfig {
    ProviderConfig {
        name: name.to_string(),
        provider_type: ProviderType::Anthropic,
        api_key: api_key.to_string(),
        base_url: None,
        organization: None,
        default_model: default_model.to_string(),
        timeout_ms: 60000,
    }
}
