/// OpenAI-compatible chat completions client (raw HTTP via reqwest)
///
/// DeepSeek, Qwen (DashScope compatible mode) and most self-hosted gateways
/// all speak the same /chat/completions dialect, so one client covers every
/// provider the engine supports; the presets differ only in base URL and
/// default model.
use super::types::{ChatMessage, ChatRequest, ChatResponse, LlmError, MessageRole, Usage};
use super::{LlmClient, Provider};
use crate::logger::{self, LogTag};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

const ENDPOINT_CHAT: &str = "/chat/completions";
const TIMEOUT_SECS: u64 = 120;

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
    #[serde(default)]
    model: String,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize, Default)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

// ============================================================================
// CLIENT
// ============================================================================

/// Generic OpenAI-compatible client used by every provider preset
pub struct OpenAiCompatClient {
    provider: Provider,
    api_key: String,
    base_url: String,
    model: String,
    client: Client,
    timeout: Duration,
    enabled: bool,
}

impl OpenAiCompatClient {
    pub fn new(
        provider: Provider,
        api_key: String,
        base_url: String,
        model: String,
    ) -> Result<Self, String> {
        if api_key.trim().is_empty() {
            return Err(format!("{} API key cannot be empty", provider));
        }
        if base_url.trim().is_empty() {
            return Err(format!("{} base URL cannot be empty", provider));
        }

        Ok(Self {
            provider,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            client: Client::new(),
            timeout: Duration::from_secs(TIMEOUT_SECS),
            enabled: true,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_wire_request(&self, request: ChatRequest) -> WireRequest {
        let messages = request
            .messages
            .into_iter()
            .map(|msg: ChatMessage| WireMessage {
                role: match msg.role {
                    MessageRole::System => "system",
                    MessageRole::User => "user",
                    MessageRole::Assistant => "assistant",
                },
                content: msg.content,
            })
            .collect();

        WireRequest {
            model: if request.model.is_empty() {
                self.model.clone()
            } else {
                request.model
            },
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        }
    }

    async fn execute_request(&self, request: WireRequest) -> Result<(WireResponse, u64), LlmError> {
        if !self.enabled {
            return Err(LlmError::ProviderDisabled {
                provider: self.provider.to_string(),
            });
        }

        let url = format!("{}{}", self.base_url, ENDPOINT_CHAT);
        logger::debug(
            LogTag::Ai,
            &format!("[{}] POST {} model={}", self.provider, url, request.model),
        );

        let start = Instant::now();
        let response_result = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .timeout(self.timeout)
            .send()
            .await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let response = response_result.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout {
                    provider: self.provider.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                }
            } else {
                LlmError::NetworkError {
                    provider: self.provider.to_string(),
                    message: format!("Request failed: {}", e),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(|s| s * 1000);

            let error_body = response.text().await.unwrap_or_default();

            return Err(match status.as_u16() {
                401 | 403 => LlmError::AuthError {
                    provider: self.provider.to_string(),
                    message: "Invalid API key".to_string(),
                },
                429 => LlmError::RateLimited {
                    provider: self.provider.to_string(),
                    retry_after_ms: retry_after,
                },
                _ => LlmError::ApiError {
                    provider: self.provider.to_string(),
                    status_code: status.as_u16(),
                    message: error_body,
                },
            });
        }

        let wire_response =
            response
                .json::<WireResponse>()
                .await
                .map_err(|e| LlmError::ParseError {
                    provider: self.provider.to_string(),
                    message: format!("Failed to parse response: {}", e),
                })?;

        Ok((wire_response, elapsed_ms))
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn call(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let wire_request = self.build_wire_request(request);
        let (wire_response, latency_ms) = self.execute_request(wire_request).await?;

        let choice = wire_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse {
                provider: self.provider.to_string(),
                message: "No choices in response".to_string(),
            })?;

        let usage = wire_response.usage.unwrap_or_default();
        let model = if wire_response.model.is_empty() {
            self.model.clone()
        } else {
            wire_response.model
        };

        Ok(ChatResponse {
            content: choice.message.content,
            usage: Usage::new(usage.prompt_tokens, usage.completion_tokens),
            finish_reason: choice.finish_reason,
            model,
            latency_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_key_rejected() {
        let client = OpenAiCompatClient::new(
            Provider::DeepSeek,
            "".to_string(),
            "https://api.deepseek.com".to_string(),
            "deepseek-chat".to_string(),
        );
        assert!(client.is_err());
    }

    #[test]
    fn test_base_url_trailing_slash_stripped() {
        let client = OpenAiCompatClient::new(
            Provider::Custom,
            "sk-test".to_string(),
            "https://gateway.local/v1/".to_string(),
            "my-model".to_string(),
        )
        .unwrap();
        assert_eq!(client.base_url, "https://gateway.local/v1");
    }

    #[test]
    fn test_model_fallback_in_request() {
        let client = OpenAiCompatClient::new(
            Provider::DeepSeek,
            "sk-test".to_string(),
            "https://api.deepseek.com".to_string(),
            "deepseek-chat".to_string(),
        )
        .unwrap();
        let wire = client.build_wire_request(ChatRequest::new("", vec![ChatMessage::user("hi")]));
        assert_eq!(wire.model, "deepseek-chat");
    }
}
