/// Shared request/response types for LLM providers
use serde::{Deserialize, Serialize};

// ============================================================================
// MESSAGES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
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

// ============================================================================
// REQUEST / RESPONSE
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub usage: Usage,
    pub finish_reason: Option<String>,
    pub model: String,
    pub latency_ms: u64,
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Clone)]
pub enum LlmError {
    ProviderDisabled {
        provider: String,
    },
    Timeout {
        provider: String,
        timeout_ms: u64,
    },
    NetworkError {
        provider: String,
        message: String,
    },
    AuthError {
        provider: String,
        message: String,
    },
    RateLimited {
        provider: String,
        retry_after_ms: Option<u64>,
    },
    ApiError {
        provider: String,
        status_code: u16,
        message: String,
    },
    ParseError {
        provider: String,
        message: String,
    },
    InvalidResponse {
        provider: String,
        message: String,
    },
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmError::ProviderDisabled { provider } => {
                write!(f, "[{}] provider disabled", provider)
            }
            LlmError::Timeout {
                provider,
                timeout_ms,
            } => write!(f, "[{}] request timed out after {}ms", provider, timeout_ms),
            LlmError::NetworkError { provider, message } => {
                write!(f, "[{}] network error: {}", provider, message)
            }
            LlmError::AuthError { provider, message } => {
                write!(f, "[{}] auth error: {}", provider, message)
            }
            LlmError::RateLimited {
                provider,
                retry_after_ms,
            } => match retry_after_ms {
                Some(ms) => write!(f, "[{}] rate limited, retry after {}ms", provider, ms),
                None => write!(f, "[{}] rate limited", provider),
            },
            LlmError::ApiError {
                provider,
                status_code,
                message,
            } => write!(f, "[{}] HTTP {}: {}", provider, status_code, message),
            LlmError::ParseError { provider, message } => {
                write!(f, "[{}] parse error: {}", provider, message)
            }
            LlmError::InvalidResponse { provider, message } => {
                write!(f, "[{}] invalid response: {}", provider, message)
            }
        }
    }
}

impl std::error::Error for LlmError {}
