use async_trait::async_trait;
use serde_json::json;

use crate::{FinishReason, GenerationProvider, Request, Response, Usage};
use sleuth_types::SleuthError;

// ---------------------------------------------------------------------------
// OpenAiAdapter
// ---------------------------------------------------------------------------

/// Adapter for the OpenAI chat completions API and compatible endpoints.
#[derive(Debug)]
pub struct OpenAiAdapter {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
    default_model: String,
}

impl OpenAiAdapter {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
            base_url: "https://api.openai.com".to_string(),
            default_model: "gpt-4o-mini".to_string(),
        }
    }

    pub fn from_env() -> Result<Self, SleuthError> {
        let key = std::env::var("OPENAI_API_KEY").map_err(|_| SleuthError::AuthError {
            provider: "openai".into(),
        })?;
        Ok(Self::new(key))
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_default_model(mut self, model: String) -> Self {
        self.default_model = model;
        self
    }

    fn build_request_body(&self, request: &Request) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();

        let model = if request.model.is_empty() {
            self.default_model.as_str()
        } else {
            request.model.as_str()
        };

        let mut body = json!({
            "model": model,
            "messages": messages,
        });

        if let Some(temp) = request.temperature {
            body["temperature"] = json!(temp);
        }
        if !request.stop_sequences.is_empty() {
            body["stop"] = json!(request.stop_sequences);
        }
        if request.json_output {
            body["response_format"] = json!({ "type": "json_object" });
        }

        body
    }

    fn parse_response(&self, body: serde_json::Value) -> Result<Response, SleuthError> {
        let choice = body["choices"]
            .get(0)
            .ok_or_else(|| SleuthError::ProviderError {
                provider: "openai".into(),
                status: 200,
                message: "response contained no choices".into(),
                retryable: false,
            })?;

        let text = choice["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();

        let finish_reason = match choice["finish_reason"].as_str() {
            Some("length") => FinishReason::MaxTokens,
            Some("content_filter") => FinishReason::ContentFilter,
            Some("stop") if choice["stop_reason"].is_string() => FinishReason::StopSequence,
            _ => FinishReason::EndTurn,
        };

        let usage_obj = &body["usage"];
        let input_tokens = usage_obj["prompt_tokens"].as_u64().unwrap_or(0);
        let output_tokens = usage_obj["completion_tokens"].as_u64().unwrap_or(0);

        Ok(Response {
            id: body["id"].as_str().unwrap_or("").to_string(),
            text,
            usage: Usage {
                input_tokens,
                output_tokens,
                total_tokens: usage_obj["total_tokens"]
                    .as_u64()
                    .unwrap_or(input_tokens + output_tokens),
            },
            model: body["model"].as_str().unwrap_or("").to_string(),
            finish_reason,
        })
    }
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn map_error(status: reqwest::StatusCode, body: &str) -> SleuthError {
    let status_u16 = status.as_u16();
    match status_u16 {
        429 => {
            let retry_ms = serde_json::from_str::<serde_json::Value>(body)
                .ok()
                .and_then(|v| v["error"]["retry_after"].as_f64())
                .map(|s| (s * 1000.0) as u64)
                .unwrap_or(1000);
            SleuthError::RateLimited {
                provider: "openai".into(),
                retry_after_ms: retry_ms,
            }
        }
        401 | 403 => SleuthError::AuthError {
            provider: "openai".into(),
        },
        500 | 502 | 503 | 504 => SleuthError::ProviderError {
            provider: "openai".into(),
            status: status_u16,
            message: extract_error_message(body),
            retryable: true,
        },
        _ => SleuthError::ProviderError {
            provider: "openai".into(),
            status: status_u16,
            message: extract_error_message(body),
            retryable: false,
        },
    }
}

fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(String::from))
        .unwrap_or_else(|| body.to_string())
}

fn transport_error(e: reqwest::Error) -> SleuthError {
    SleuthError::ProviderError {
        provider: "openai".into(),
        status: 0,
        message: e.to_string(),
        retryable: true,
    }
}

// ---------------------------------------------------------------------------
// GenerationProvider implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl GenerationProvider for OpenAiAdapter {
    async fn complete(&self, request: &Request) -> Result<Response, SleuthError> {
        let body = self.build_request_body(request);
        tracing::debug!(model = %body["model"], json = request.json_output, "Sending chat completion");

        let resp = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        let response_body = resp.text().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(map_error(status, &response_body));
        }

        let json: serde_json::Value = serde_json::from_str(&response_body)?;
        self.parse_response(json)
    }

    fn name(&self) -> &str {
        "openai"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
