/// Qwen (Alibaba DashScope) provider preset
///
/// Uses the OpenAI-compatible mode endpoint.
use super::openai_compat::OpenAiCompatClient;
use super::Provider;

pub const DEFAULT_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";
pub const DEFAULT_MODEL: &str = "qwen-plus";

/// Build a Qwen client. Empty overrides fall back to provider defaults.
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
    OpenAiCompatClient::new(Provider::Qwen, api_key, base_url, model)
}
