//! Dispatch a round to the driver matching the resolved model's provider.

use serde_json::Value;
use thiserror::Error;

use smithers_types::{Message, ModelName, OutputLimits, Provider, ToolDefinition};

use crate::continuation::Continuation;
use crate::driver::{DriverError, StreamingState};
use crate::http::{http_client_with_timeout, read_capped_error_body};
use crate::retry::{send_with_retry, RetryConfig};
use crate::{claude, gemini, openai};

/// Timeout for the blocking, non-streaming summarization call - it
/// runs between turns, never inside a tick, so a generous timeout is fine.
const SUMMARIZATION_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum ApiConfigError {
    #[error("missing API key: set {0}")]
    MissingApiKey(&'static str),
}

/// Resolved API configuration for one provider, validated once at startup.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub model: ModelName,
    pub api_key: String,
}

impl ApiConfig {
    /// Resolve the API key for `model`'s provider from `resolve_env`
    /// (typically `std::env::var`), failing loudly rather than silently
    /// substituting a different provider's key.
    pub fn resolve(model: ModelName, resolve_env: impl Fn(&str) -> Option<String>) -> Result<Self, ApiConfigError> {
        let provider = model.provider();
        let api_key = resolve_env(provider.env_var())
            .or_else(|| {
                (provider == Provider::Gemini)
                    .then(|| resolve_env("GOOGLE_API_KEY"))
                    .flatten()
            })
            .ok_or(ApiConfigError::MissingApiKey(provider.env_var()))?;
        Ok(Self { model, api_key })
    }
}

/// Build the vendor request body and spawn the streaming driver task for
/// one round, dispatching on `config.model.provider()`.
pub fn start_round(
    config: &ApiConfig,
    messages: &[Message],
    limits: OutputLimits,
    system_prompt: Option<&str>,
    tools: Option<&[ToolDefinition]>,
    continuation: Option<&Continuation<'_>>,
) -> Result<StreamingState, DriverError> {
    match config.model.provider() {
        Provider::Claude => {
            let body = claude::build_request_body(config.model.model_id(), messages, limits, system_prompt, tools, continuation);
            claude::start(config.api_key.clone(), &config.model, body)
        }
        Provider::OpenAI => {
            let body = openai::build_request_body(config.model.model_id(), messages, limits, system_prompt, tools, continuation);
            openai::start(config.api_key.clone(), &config.model, body)
        }
        Provider::Gemini => {
            let body = gemini::build_request_body(messages, limits, system_prompt, tools, continuation);
            gemini::start(config.api_key.clone(), &config.model, body)
        }
    }
}

/// Build only the request body, without starting a round - used by callers
/// that want to inspect or log the outgoing payload (e.g. the blocking
/// summarization request in the Compaction Engine, which targets the same
/// vendor wire shape but posts synchronously rather than streaming).
#[must_use]
pub fn build_request_body(
    config: &ApiConfig,
    messages: &[Message],
    limits: OutputLimits,
    system_prompt: Option<&str>,
    tools: Option<&[ToolDefinition]>,
    continuation: Option<&Continuation<'_>>,
) -> Value {
    match config.model.provider() {
        Provider::Claude => claude::build_request_body(config.model.model_id(), messages, limits, system_prompt, tools, continuation),
        Provider::OpenAI => openai::build_request_body(config.model.model_id(), messages, limits, system_prompt, tools, continuation),
        Provider::Gemini => gemini::build_request_body(messages, limits, system_prompt, tools, continuation),
    }
}

/// Issue the summarization round as a single blocking, non-streaming
/// request. Returns the model's complete text
/// response.
pub async fn complete_once(
    config: &ApiConfig,
    messages: &[Message],
    limits: OutputLimits,
    system_prompt: Option<&str>,
) -> Result<String, DriverError> {
    let mut body = build_request_body(config, messages, limits, system_prompt, None, None);
    if let Some(stream_flag) = body.get_mut("stream") {
        *stream_flag = Value::Bool(false);
    }

    let client = http_client_with_timeout(SUMMARIZATION_TIMEOUT_SECS);
    let retry_config = RetryConfig::default();
    let api_key = config.api_key.clone();

    let response = match config.model.provider() {
        Provider::Claude => {
            send_with_retry(
                || {
                    client
                        .post(claude::API_URL)
                        .header("x-api-key", &api_key)
                        .header("anthropic-version", claude::API_VERSION)
                        .header("content-type", "application/json")
                        .json(&body)
                },
                &retry_config,
            )
            .await
        }
        Provider::OpenAI => {
            send_with_retry(
                || {
                    client
                        .post(openai::API_URL)
                        .bearer_auth(&api_key)
                        .header("content-type", "application/json")
                        .json(&body)
                },
                &retry_config,
            )
            .await
        }
        Provider::Gemini => {
            let url = gemini::generate_content_url(config.model.model_id(), &api_key);
            send_with_retry(move || client.post(&url).json(&body), &retry_config).await
        }
    }
    .map_err(|err| DriverError::StartFailed(err.to_string()))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = read_capped_error_body(response).await;
        return Err(DriverError::StartFailed(format!("API error {status}: {body}")));
    }

    let payload: Value = response
        .json()
        .await
        .map_err(|err| DriverError::StartFailed(format!("invalid response body: {err}")))?;

    extract_text(config.model.provider(), &payload)
        .ok_or_else(|| DriverError::StartFailed("response carried no text content".to_string()))
}

fn extract_text(provider: Provider, payload: &Value) -> Option<String> {
    match provider {
        Provider::Claude => payload
            .pointer("/content/0/text")
            .and_then(Value::as_str)
            .map(ToString::to_string),
        Provider::OpenAI => payload
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(ToString::to_string),
        Provider::Gemini => payload
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(Value::as_str)
            .map(ToString::to_string),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn resolve_fails_loudly_on_missing_key() {
        let model = ModelName::new(Provider::OpenAI, "gpt-4o");
        let err = ApiConfig::resolve(model, |_| None).unwrap_err();
        assert!(matches!(err, ApiConfigError::MissingApiKey("OPENAI_API_KEY")));
    }

    #[test]
    fn gemini_falls_back_to_google_api_key() {
        let model = ModelName::new(Provider::Gemini, "gemini-2.0-flash");
        let config = ApiConfig::resolve(model, |key| {
            (key == "GOOGLE_API_KEY").then(|| "secret".to_string())
        })
        .expect("should resolve via GOOGLE_API_KEY fallback");
        assert_eq!(config.api_key, "secret");
    }

    #[test]
    fn extracts_text_per_vendor_response_shape() {
        let claude_payload = json!({ "content": [{ "type": "text", "text": "hello" }] });
        assert_eq!(extract_text(Provider::Claude, &claude_payload).as_deref(), Some("hello"));

        let openai_payload = json!({ "choices": [{ "message": { "content": "hi" } }] });
        assert_eq!(extract_text(Provider::OpenAI, &openai_payload).as_deref(), Some("hi"));

        let gemini_payload = json!({ "candidates": [{ "content": { "parts": [{ "text": "hey" }] } }] });
        assert_eq!(extract_text(Provider::Gemini, &gemini_payload).as_deref(), Some("hey"));
    }

    #[test]
    fn dispatches_request_body_by_provider() {
        let config = ApiConfig {
            model: ModelName::new(Provider::OpenAI, "gpt-4o"),
            api_key: "k".to_string(),
        };
        let body = build_request_body(&config, &[], OutputLimits::default(), None, None, None);
        assert_eq!(body["model"], "gpt-4o");
        assert!(body["max_completion_tokens"].is_number());
    }
}
