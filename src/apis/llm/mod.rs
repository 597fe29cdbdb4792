/// LLM provider layer
///
/// Unified interface over the chat providers a trader can be configured with:
/// - DeepSeek
/// - Qwen (DashScope compatible mode)
/// - Custom OpenAI-compatible endpoints
///
/// All providers use raw HTTP via reqwest. A trader holds one `Arc<dyn
/// LlmClient>` and can hot-swap it when credentials are reloaded.
pub mod deepseek;
pub mod openai_compat;
pub mod qwen;
pub mod types;

pub use types::{ChatMessage, ChatRequest, ChatResponse, LlmError, MessageRole, Usage};

use crate::config::{AiModelConfig, AiProvider};
use async_trait::async_trait;
use std::sync::Arc;

// ============================================================================
// PROVIDER ENUM
// ============================================================================

/// Supported LLM providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    DeepSeek,
    Qwen,
    Custom,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::DeepSeek => "deepseek",
            Provider::Qwen => "qwen",
            Provider::Custom => "custom",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "deepseek" => Some(Provider::DeepSeek),
            "qwen" => Some(Provider::Qwen),
            "custom" => Some(Provider::Custom),
            _ => None,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// LLM CLIENT TRAIT
// ============================================================================

/// Unified interface for all LLM providers
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Provider name
    fn provider(&self) -> Provider;

    /// Check if client is enabled
    fn is_enabled(&self) -> bool;

    /// Make a chat completion request
    async fn call(&self, request: ChatRequest) -> Result<ChatResponse, LlmError>;
}

// ============================================================================
// FACTORY
// ============================================================================

/// Build a provider client from trader AI configuration
pub fn build_client(config: &AiModelConfig) -> Result<Arc<dyn LlmClient>, String> {
    let client = match config.provider {
        AiProvider::DeepSeek => deepseek::client(
            config.api_key.clone(),
            &config.base_url,
            &config.model_name,
        )?,
        AiProvider::Qwen => qwen::client(
            config.api_key.clone(),
            &config.base_url,
            &config.model_name,
        )?,
        AiProvider::Custom => {
            if config.base_url.is_empty() {
                return Err("custom provider requires a base_url".to_string());
            }
            if config.model_name.is_empty() {
                return Err("custom provider requires a model_name".to_string());
            }
            openai_compat::OpenAiCompatClient::new(
                Provider::Custom,
                config.api_key.clone(),
                config.base_url.clone(),
                config.model_name.clone(),
            )?
        }
    };
    Ok(Arc::new(client))
}

/// Create a request with system and user messages
pub fn system_user_request(
    model: impl Into<String>,
    system_prompt: impl Into<String>,
    user_prompt: impl Into<String>,
) -> ChatRequest {
    ChatRequest::new(
        model,
        vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(user_prompt),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_roundtrip() {
        assert_eq!(Provider::from_str("deepseek"), Some(Provider::DeepSeek));
        assert_eq!(Provider::from_str("QWEN"), Some(Provider::Qwen));
        assert_eq!(Provider::from_str("gpt"), None);
        assert_eq!(Provider::Custom.as_str(), "custom");
    }

    #[test]
    fn test_build_client_custom_requires_url() {
        let config = AiModelConfig {
            provider: AiProvider::Custom,
            api_key: "sk-test".to_string(),
            base_url: String::new(),
            model_name: "my-model".to_string(),
        };
        assert!(build_client(&config).is_err());
    }

    #[test]
    fn test_build_client_deepseek() {
        let config = AiModelConfig {
            provider: AiProvider::DeepSeek,
            api_key: "sk-test".to_string(),
            base_url: String::new(),
            model_name: String::new(),
        };
        let client = build_client(&config).unwrap();
        assert_eq!(client.provider(), Provider::DeepSeek);
    }

    #[test]
    fn test_system_user_request_shape() {
        let req = system_user_request("deepseek-chat", "rules", "state");
        assert_eq!(req.messages.len(), 2);
        assert_eq!(req.messages[0].role, MessageRole::System);
        assert_eq!(req.messages[1].role, MessageRole::User);
    }
}
