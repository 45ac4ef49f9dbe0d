//! OpenAI-compatible chat completions invoker.
//!
//! The routed [`ModelConfig`] picks the model per call; one client serves
//! every tier.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{ModelInvoker, ModelResponse, ResponseTiming, TokenUsage};
use crate::config::LlmConfig;
use crate::constants::network;
use crate::routing::ModelConfig;
use crate::types::{ErrorCategory, ErrorClassifier, ForgeError, ModelError, Result};

const SYSTEM_PROMPT: &str = "You are a senior strategy consultant. Always respond with valid JSON.";

pub struct OpenAiInvoker {
    api_key: SecretString,
    api_base: String,
    temperature: f32,
    max_tokens: usize,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiInvoker")
            .field("api_key", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl OpenAiInvoker {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var(&config.api_key_env).ok())
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                ForgeError::Config(format!(
                    "API key not found. Set {} or llm.api_key in config",
                    config.api_key_env
                ))
            })?;

        let api_base = validate_endpoint(&config.api_base)?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(network::CONNECTION_TIMEOUT_SECS))
            .build()
            .map_err(|e| ForgeError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_key: SecretString::from(api_key),
            api_base,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            client,
        })
    }

    fn build_request(&self, model: &str, prompt: &str, schema: &Value) -> ChatCompletionRequest {
        let system_content = if schema.is_null() {
            SYSTEM_PROMPT.to_string()
        } else {
            let schema_str =
                serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string());
            format!(
                "{}\n\nYour JSON must match this schema:\n\n```json\n{}\n```\n\nRespond ONLY with JSON, no explanation.",
                SYSTEM_PROMPT, schema_str
            )
        };

        ChatCompletionRequest {
            model: model.to_string(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system_content,
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            temperature: self.temperature,
            max_tokens: Some(self.max_tokens),
            response_format: Some(ResponseFormat {
                format_type: "json_object".to_string(),
            }),
        }
    }
}

/// Only http/https endpoints are accepted. Trailing slashes are dropped.
fn validate_endpoint(endpoint: &str) -> Result<String> {
    let url = url::Url::parse(endpoint).map_err(|e| {
        ForgeError::Config(format!("Invalid API base URL '{}': {}", endpoint, e))
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ForgeError::Config(format!(
            "API base must use http or https scheme, got: {}",
            url.scheme()
        )));
    }
    if url.scheme() == "http"
        && let Some(host) = url.host_str()
        && !matches!(host, "localhost" | "127.0.0.1" | "::1")
    {
        warn!("API base {} is not using TLS", host);
    }

    Ok(url.as_str().trim_end_matches('/').to_string())
}

#[async_trait]
impl ModelInvoker for OpenAiInvoker {
    async fn invoke(
        &self,
        model: &ModelConfig,
        prompt: &str,
        schema: &Value,
    ) -> Result<ModelResponse> {
        let model_id = model.model_id.as_str();
        debug!(model = model_id, tier = %model.tier, "Sending chat completion request");

        let start_time = Instant::now();
        let request = self.build_request(model_id, prompt, schema);
        let url = format!("{}/chat/completions", self.api_base);

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                let category = if e.is_timeout() || e.is_connect() {
                    ErrorCategory::Network
                } else {
                    ErrorClassifier::classify(&e.to_string(), model_id).category
                };
                ModelError::new(category, format!("Request failed: {}", e)).model(model_id)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ErrorClassifier::classify_http_status(
                status.as_u16(),
                &format!("API error ({}): {}", status, body),
                model_id,
            )
            .into());
        }

        let body: ChatCompletionResponse = response.json().await.map_err(|e| {
            ModelError::new(
                ErrorCategory::ParseError,
                format!("Malformed completion response: {}", e),
            )
            .model(model_id)
        })?;

        let usage = body
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                ModelError::new(ErrorCategory::ParseError, "No content in completion response")
                    .model(model_id)
            })?;

        Ok(ModelResponse {
            content,
            usage,
            // The API does not report cost; stages estimate it from usage.
            cost_usd: None,
            timing: ResponseTiming::from_duration(start_time.elapsed()),
            model: body.model.unwrap_or_else(|| model_id.to_string()),
        })
    }

    fn name(&self) -> &str {
        "openai"
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<Choice>,
    usage: Option<UsageInfo>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageInfo {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> LlmConfig {
        LlmConfig {
            api_key: Some("sk-test".to_string()),
            api_base: "https://api.example.com/v1/".to_string(),
            ..LlmConfig::default()
        }
    }

    #[test]
    fn test_new_normalizes_base() {
        let invoker = OpenAiInvoker::new(&config()).unwrap();
        assert_eq!(invoker.api_base, "https://api.example.com/v1");
        assert!(!format!("{:?}", invoker).contains("sk-test"));
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let config = LlmConfig {
            api_key: None,
            api_key_env: "STRATFORGE_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..LlmConfig::default()
        };
        assert!(matches!(
            OpenAiInvoker::new(&config),
            Err(ForgeError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_non_http_scheme() {
        assert!(validate_endpoint("ftp://example.com").is_err());
        assert!(validate_endpoint("not a url").is_err());
        assert_eq!(
            validate_endpoint("http://localhost:8080/").unwrap(),
            "http://localhost:8080"
        );
    }

    #[test]
    fn test_request_embeds_schema_and_model() {
        let invoker = OpenAiInvoker::new(&config()).unwrap();
        let request = invoker.build_request(
            "gpt-4o-mini",
            "Analyze Acme",
            &json!({"type": "object", "required": ["gaps"]}),
        );
        assert_eq!(request.model, "gpt-4o-mini");
        assert!(request.messages[0].content.contains("\"gaps\""));
        assert_eq!(request.messages[1].content, "Analyze Acme");

        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["response_format"]["type"], "json_object");
    }

    #[test]
    fn test_response_parsing() {
        let raw = r#"{
            "model": "gpt-4o-mini-2024",
            "choices": [{"message": {"content": "{\"ok\": true}"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        }"#;
        let body: ChatCompletionResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(body.usage.unwrap().prompt_tokens, 12);
        assert_eq!(body.choices[0].message.content.as_deref(), Some("{\"ok\": true}"));
    }
}
