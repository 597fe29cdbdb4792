/// DeepSeek provider preset
///
/// OpenAI-compatible format; Bearer token auth.
/// API Documentation: https://api-docs.deepseek.com/
use super::openai_compat::OpenAiCompatClient;
use super::Provider;

pub const DEFAULT_BASE_URL: &str = "https://api.deepseek.com";
pub const DEFAULT_MODEL: &str = "deepseek-chat";

/// Build a DeepSeek client. Empty overrides fall back to provider defaults.
pub fn client(
    api_key: String,
    base_url_override: &str,
    model_override: &str,
) -> Result<OpenAiCompatClient, String> {
    let base_url = if base_url_override.is_empty() {
        DEFAULT_BASE_URL.to_string()
    } else {
        base_url_override.to_string()
    };
    let model = if model_override.is_empty() {
        DEFAULT_MODEL.to_string()
    } else {
        model_override.to_string()
    };
    OpenAiCompatClient::new(Provider::DeepSeek, api_key, base_url, model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apis::llm::LlmClient;

    #[test]
    fn test_defaults() {
        let client = client("sk-test".to_string(), "", "").unwrap();
        assert_eq!(client.provider(), Provider::DeepSeek);
        assert_eq!(client.model(), DEFAULT_MODEL);
    }

    #[test]
    fn test_overrides() {
        let client = client("sk-test".to_string(), "", "deepseek-reasoner").unwrap();
        assert_eq!(client.model(), "deepseek-reasoner");
    }
}
