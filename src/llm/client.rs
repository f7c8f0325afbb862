use super::models::{Model, Usage};
use crate::error::PipelineError;
use crate::util::truncate_str;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Anthropic Messages API endpoint
pub(crate) const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Maximum length for error content in error messages
const MAX_ERROR_CONTENT_LEN: usize = 200;

pub(crate) const INITIAL_BACKOFF_MS: u64 = 2000; // 2 seconds
pub(crate) const BACKOFF_MULTIPLIER: u64 = 2; // Exponential backoff

/// Why the model stopped producing output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Complete,
    /// Output was cut off at the token budget; the text is likely truncated JSON
    MaxTokensReached,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub model: Model,
    pub model_id: String,
    pub max_output_tokens: u32,
    pub system_prompt: Option<String>,
    pub user_prompt: String,
}

#[derive(Debug, Clone)]
pub struct GenerationResponse {
    pub text: String,
    pub stop_reason: StopReason,
    pub usage: Option<Usage>,
}

impl GenerationResponse {
    pub fn truncated(&self) -> bool {
        self.stop_reason == StopReason::MaxTokensReached
    }
}

/// Anything that can turn a prompt into text.
///
/// The pipeline only ever sees this trait, so stages can be driven by the HTTP
/// client in production and by scripted responses in tests.
#[allow(async_fn_in_trait)]
pub trait TextGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, PipelineError>;
}

/// Sanitize API response content for error messages to prevent credential leakage.
fn sanitize_api_response(content: &str) -> String {
    const SECRET_PATTERNS: &[&str] = &[
        "api_key",
        "apikey",
        "x-api-key",
        "secret",
        "password",
        "credential",
        "bearer",
        "sk-ant-",
    ];

    let truncated = truncate_str(content, MAX_ERROR_CONTENT_LEN);

    let lower = truncated.to_lowercase();
    for pattern in SECRET_PATTERNS {
        if lower.contains(pattern) {
            return "(response details redacted - may contain sensitive data)".to_string();
        }
    }

    truncated.to_string()
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorEnvelope {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

pub(crate) fn backoff_secs(retry_count: u32) -> u64 {
    let factor = BACKOFF_MULTIPLIER.pow(retry_count.saturating_sub(1));
    let ms = INITIAL_BACKOFF_MS.saturating_mul(factor);
    let secs = ms / 1000;
    if secs == 0 {
        1
    } else {
        secs
    }
}

/// Turn a raw Messages API body into a response, or the error it carries.
fn parse_messages_body(text: &str) -> Result<GenerationResponse, PipelineError> {
    if let Ok(envelope) = serde_json::from_str::<ApiErrorEnvelope>(text) {
        return Err(PipelineError::Network(format!(
            "API error: {}",
            truncate_str(&envelope.error.message, MAX_ERROR_CONTENT_LEN)
        )));
    }

    let parsed: MessagesResponse = serde_json::from_str(text).map_err(|e| {
        PipelineError::Network(format!(
            "Failed to parse API response: {}\n{}",
            e,
            sanitize_api_response(text)
        ))
    })?;

    let content: String = parsed
        .content
        .iter()
        .filter(|block| block.block_type == "text")
        .filter_map(|block| block.text.as_deref())
        .collect::<Vec<_>>()
        .join("");

    if content.is_empty() {
        return Err(PipelineError::Network(
            "API returned empty response".to_string(),
        ));
    }

    let stop_reason = match parsed.stop_reason.as_deref() {
        Some("max_tokens") => StopReason::MaxTokensReached,
        _ => StopReason::Complete,
    };

    Ok(GenerationResponse {
        text: content,
        stop_reason,
        usage: parsed.usage,
    })
}

/// HTTP client for the Anthropic Messages API
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    url: String,
    max_retries: u32,
}

impl AnthropicClient {
    /// Every request is bounded by `timeout`; a hung call fails as a network error.
    pub fn new(api_key: String, timeout: Duration, max_retries: u32) -> Result<Self, PipelineError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            http,
            api_key,
            url: ANTHROPIC_URL.to_string(),
            max_retries,
        })
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Send a request, retrying rate limits and server errors up to `max_retries` times.
    async fn send_with_retry(&self, body: &MessagesRequest<'_>) -> Result<String, PipelineError> {
        let mut retry_count = 0;

        loop {
            let response = self
                .http
                .post(&self.url)
                .header("content-type", "application/json")
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(body)
                .send()
                .await?;

            let status = response.status();
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|secs| *secs > 0 && *secs < 300);
            let text = response.text().await?;

            if status.is_success() {
                return Ok(text);
            }

            let retryable = status.as_u16() == 429 || status.is_server_error();
            if retryable && retry_count < self.max_retries {
                retry_count += 1;
                let wait = retry_after.unwrap_or_else(|| backoff_secs(retry_count));
                log::warn!(
                    "API returned {}. Retrying in {}s (attempt {}/{})",
                    status,
                    wait,
                    retry_count,
                    self.max_retries
                );
                tokio::time::sleep(Duration::from_secs(wait)).await;
                continue;
            }

            let message = serde_json::from_str::<ApiErrorEnvelope>(&text)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| sanitize_api_response(&text));
            let error_msg = match status.as_u16() {
                401 => "Invalid API key. Run 'surgeon setup' or set ANTHROPIC_API_KEY.".to_string(),
                429 => format!("Rate limited (429): {}", truncate_str(&message, MAX_ERROR_CONTENT_LEN)),
                _ => format!("API {}: {}", status, truncate_str(&message, MAX_ERROR_CONTENT_LEN)),
            };
            return Err(PipelineError::Network(error_msg));
        }
    }
}

impl TextGenerator for AnthropicClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, PipelineError> {
        let body = MessagesRequest {
            model: &request.model_id,
            max_tokens: request.max_output_tokens,
            system: request.system_prompt.as_deref(),
            messages: vec![Message {
                role: "user",
                content: &request.user_prompt,
            }],
        };

        let text = self.send_with_retry(&body).await?;
        let response = parse_messages_body(&text)?;
        if let Some(usage) = &response.usage {
            log::info!(
                "{} call used {} tokens ({} in, {} out)",
                request.model.label(),
                usage.total(),
                usage.input_tokens,
                usage.output_tokens
            );
        }
        if response.truncated() {
            log::warn!(
                "{} response hit max_tokens ({}); will attempt truncation repair",
                request.model.label(),
                request.max_output_tokens
            );
        }
        Ok(response)
    }
}
