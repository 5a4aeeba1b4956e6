use super::models::{LlmResponse, Usage};
use axfix_adapters::config::LlmConfig;
use axfix_core::protocol::BoxFuture;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Maximum length for error content in error messages
const MAX_ERROR_CONTENT_LEN: usize = 200;

/// Rate limit retry configuration
pub(crate) const INITIAL_BACKOFF_MS: u64 = 2000;
pub(crate) const BACKOFF_MULTIPLIER: u64 = 2;

/// Sanitize API response content for error messages to prevent credential leakage.
pub(crate) fn sanitize_api_response(content: &str) -> String {
    const SECRET_PATTERNS: &[&str] = &[
        "api_key",
        "apikey",
        "secret",
        "password",
        "credential",
        "bearer",
        "sk-",
    ];

    let truncated = truncate_str(content, MAX_ERROR_CONTENT_LEN);
    let lower = truncated.to_lowercase();
    if SECRET_PATTERNS.iter().any(|pattern| lower.contains(pattern)) {
        return "(response details redacted - may contain sensitive data)".to_string();
    }
    truncated.to_string()
}

/// One chat completion: a system prompt, a user prompt, and sampling settings.
#[derive(Debug, Clone, Copy)]
pub struct ChatCall<'a> {
    pub system: &'a str,
    pub user: &'a str,
    pub temperature: f32,
    /// Ask the provider for a JSON object response
    pub json_mode: bool,
}

/// Anything that can answer a chat call. The oracle only sees this seam, so
/// tests can swap in canned responses.
pub trait ChatBackend: Send + Sync {
    fn complete<'a>(&'a self, call: ChatCall<'a>) -> BoxFuture<'a, anyhow::Result<LlmResponse>>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    /// Content can be null in some API responses (e.g., when refusal or error occurs)
    #[serde(default)]
    content: Option<String>,
    /// Refusal reason - set when content is blocked by content moderation
    #[serde(default)]
    refusal: Option<String>,
}

/// OpenRouter error response (can come with 200 status for upstream errors)
#[derive(Deserialize)]
struct OpenRouterError {
    error: OpenRouterApiError,
}

#[derive(Deserialize)]
struct OpenRouterApiError {
    message: String,
    #[serde(default)]
    code: Option<i32>,
}

/// Extract retry-after hint from an error body, e.g. "retry after 7 seconds".
fn parse_retry_after(text: &str) -> Option<u64> {
    let text_lower = text.to_lowercase();
    let pos = text_lower.find("retry")?;
    text_lower[pos..]
        .split_whitespace()
        .skip(1)
        .take(5)
        .filter_map(|word| {
            word.trim_matches(|c: char| !c.is_numeric())
                .parse::<u64>()
                .ok()
        })
        .find(|secs| *secs > 0 && *secs < 300)
}

pub(crate) fn backoff_secs(retry_count: u32) -> u64 {
    let factor = BACKOFF_MULTIPLIER.pow(retry_count.saturating_sub(1));
    let secs = INITIAL_BACKOFF_MS.saturating_mul(factor) / 1000;
    secs.max(1)
}

fn is_retryable_network_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

fn map_timeout_error(err: reqwest::Error) -> anyhow::Error {
    if err.is_timeout() {
        anyhow::anyhow!("LLM request timed out. Please try again.")
    } else if err.is_connect() {
        anyhow::anyhow!("Could not connect to the LLM provider. Check your network and try again.")
    } else {
        err.into()
    }
}

/// Truncate a string for display (Unicode-safe)
pub(crate) fn truncate_str(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &s[..byte_idx],
        None => s,
    }
}

/// Pull the message content out of a chat completion body.
pub(crate) fn parse_chat_response(text: &str) -> anyhow::Result<LlmResponse> {
    let parsed: ChatResponse = serde_json::from_str(text).map_err(|e| {
        anyhow::anyhow!(
            "Failed to parse LLM response: {}\n{}",
            e,
            sanitize_api_response(text)
        )
    })?;

    let choice = parsed.choices.into_iter().next();
    if let Some(refusal) = choice.as_ref().and_then(|c| c.message.refusal.as_deref()) {
        return Err(anyhow::anyhow!(
            "Request was refused: {}",
            truncate_str(refusal, 200)
        ));
    }

    let content = choice
        .and_then(|c| c.message.content)
        .unwrap_or_default();
    if content.trim().is_empty() {
        return Err(anyhow::anyhow!(
            "API returned empty response. The model may have been rate limited or failed to generate content."
        ));
    }

    Ok(LlmResponse {
        content,
        usage: parsed.usage,
    })
}

/// Chat client for OpenRouter (or any OpenAI-compatible endpoint).
pub struct OpenRouterClient {
    http: reqwest::Client,
    api_key: String,
    settings: LlmConfig,
}

impl OpenRouterClient {
    pub fn new(api_key: String, settings: LlmConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;
        Ok(Self {
            http,
            api_key,
            settings,
        })
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }

    fn request<'a>(&'a self, call: &ChatCall<'a>) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.settings.model,
            messages: vec![
                Message {
                    role: "system",
                    content: call.system,
                },
                Message {
                    role: "user",
                    content: call.user,
                },
            ],
            max_tokens: self.settings.max_tokens,
            temperature: call.temperature,
            stream: false,
            response_format: call.json_mode.then_some(ResponseFormat {
                format_type: "json_object",
            }),
        }
    }

    /// Send a request with automatic retry on transient failures.
    ///
    /// Handles:
    /// - Network errors (timeout, connection failures)
    /// - Rate limits (429)
    /// - Server errors (5xx)
    /// - OpenRouter's 200-with-error responses
    async fn send_with_retry<T: Serialize>(&self, request_body: &T) -> anyhow::Result<String> {
        let max_retries = self.settings.max_retries;
        let mut retry_count = 0;

        loop {
            let response = match self
                .http
                .post(&self.settings.base_url)
                .header("Content-Type", "application/json")
                .header("HTTP-Referer", "https://github.com/axfix/axfix")
                .header("X-Title", "axfix")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(request_body)
                .send()
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    if is_retryable_network_error(&err) && retry_count < max_retries {
                        retry_count += 1;
                        pause(retry_count, backoff_secs(retry_count), &err.to_string()).await;
                        continue;
                    }
                    return Err(map_timeout_error(err));
                }
            };

            let status = response.status();
            let text = match response.text().await {
                Ok(text) => text,
                Err(err) => {
                    if is_retryable_network_error(&err) && retry_count < max_retries {
                        retry_count += 1;
                        pause(retry_count, backoff_secs(retry_count), &err.to_string()).await;
                        continue;
                    }
                    return Err(map_timeout_error(err));
                }
            };

            if status.is_success() {
                // OpenRouter sometimes returns errors with 200 status (upstream provider issues)
                if let Ok(err_resp) = serde_json::from_str::<OpenRouterError>(&text) {
                    let is_retryable = err_resp
                        .error
                        .code
                        .map(|c| c >= 500 || c == 429)
                        .unwrap_or(true);
                    if is_retryable && retry_count < max_retries {
                        retry_count += 1;
                        pause(retry_count, backoff_secs(retry_count), &err_resp.error.message).await;
                        continue;
                    }
                    return Err(anyhow::anyhow!(
                        "LLM provider error: {}",
                        truncate_str(&err_resp.error.message, 200)
                    ));
                }
                return Ok(text);
            }

            if status.as_u16() == 429 && retry_count < max_retries {
                retry_count += 1;
                let wait = parse_retry_after(&text).unwrap_or_else(|| backoff_secs(retry_count));
                pause(retry_count, wait, "rate limited").await;
                continue;
            }

            if status.is_server_error() && retry_count < max_retries {
                retry_count += 1;
                pause(retry_count, backoff_secs(retry_count), status.as_str()).await;
                continue;
            }

            let error_msg = match status.as_u16() {
                401 => "Invalid API key. Check OPENROUTER_API_KEY.".to_string(),
                429 => format!("Rate limited after {} retries. Try again in a few minutes.", retry_count),
                500..=599 => format!(
                    "LLM provider server error ({}). The service may be temporarily unavailable.",
                    status
                ),
                _ => format!("API error {}: {}", status, sanitize_api_response(&text)),
            };
            return Err(anyhow::anyhow!("{}", error_msg));
        }
    }

    pub async fn chat(&self, call: ChatCall<'_>) -> anyhow::Result<LlmResponse> {
        let request = self.request(&call);
        let text = self.send_with_retry(&request).await?;
        let response = parse_chat_response(&text)?;
        if let Some(usage) = &response.usage {
            debug!(
                model = %self.settings.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "llm call finished"
            );
        }
        Ok(response)
    }
}

async fn pause(attempt: u32, secs: u64, cause: &str) {
    warn!(attempt, wait_secs = secs, cause = %truncate_str(cause, 120), "retrying LLM request");
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

impl ChatBackend for OpenRouterClient {
    fn complete<'a>(&'a self, call: ChatCall<'a>) -> BoxFuture<'a, anyhow::Result<LlmResponse>> {
        Box::pin(self.chat(call))
    }
}
