use std::time::Duration;

use async_trait::async_trait;
use critic_core::{CompletionResult, CriticError, PromptChunk, ReviewRequest};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const SYSTEM_PROMPT: &str = "\
You are an experienced software engineer reviewing a pull request. \
Be specific, reference the changed lines you are talking about, and skip \
praise or restating the diff.";

/// A message in a chat conversation with the LLM.
///
/// # Examples
///
/// ```
/// use critic_review::llm::{ChatMessage, Role};
///
/// let msg = ChatMessage {
///     role: Role::User,
///     content: "Review this code".into(),
/// };
/// assert!(matches!(msg.role, Role::User));
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    /// Role of the message sender.
    pub role: Role,
    /// Text content of the message.
    pub content: String,
}

/// Role in the chat conversation.
///
/// # Examples
///
/// ```
/// use critic_review::llm::Role;
///
/// let role = Role::System;
/// assert_eq!(serde_json::to_string(&role).unwrap(), "\"system\"");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System-level instructions.
    System,
    /// User input.
    User,
}

/// Parameters of a single completion call.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub prompt: &'a str,
    pub model: &'a str,
    pub temperature: f64,
    pub max_tokens: u32,
}

/// Why a completion call failed.
///
/// # Examples
///
/// ```
/// use critic_review::llm::CompletionFailure;
///
/// let err = CompletionFailure::transient("HTTP 429");
/// assert!(err.is_transient());
/// assert!(!CompletionFailure::Permanent("HTTP 401".into()).is_transient());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompletionFailure {
    /// Timeouts, connection resets, rate limiting, server errors.
    #[error("{message}")]
    Transient {
        message: String,
        /// Server-provided wait hint (`Retry-After`).
        retry_after: Option<Duration>,
    },
    /// Authentication failures, invalid requests, unusable responses.
    #[error("{0}")]
    Permanent(String),
}

impl CompletionFailure {
    /// A transient failure without a wait hint.
    pub fn transient(message: impl Into<String>) -> Self {
        CompletionFailure::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    /// Whether the call may succeed if retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, CompletionFailure::Transient { .. })
    }
}

/// The text-completion capability.
///
/// Implemented by [`LlmClient`] for real runs and by in-memory fakes in tests.
#[async_trait]
pub trait Completer: Send + Sync {
    /// Produce a completion for `request.prompt`.
    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, CompletionFailure>;
}

/// OpenAI-compatible chat completions client.
///
/// Works with any provider that exposes the `/v1/chat/completions` endpoint:
/// OpenAI, Azure-style proxies, Ollama, vLLM, LiteLLM, etc.
///
/// # Examples
///
/// ```
/// use critic_review::llm::LlmClient;
///
/// let client = LlmClient::new("https://api.openai.com", "sk-test").unwrap();
/// assert_eq!(client.endpoint(), "https://api.openai.com/v1/chat/completions");
/// ```
pub struct LlmClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl LlmClient {
    /// Create a new client for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`CriticError::Config`] if the HTTP client cannot be built.
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, CriticError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| CriticError::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/v1/chat/completions", base_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
        })
    }

    /// Full URL of the chat completions endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Completer for LlmClient {
    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, CompletionFailure> {
        let messages = vec![
            ChatMessage {
                role: Role::System,
                content: SYSTEM_PROMPT.to_string(),
            },
            ChatMessage {
                role: Role::User,
                content: request.prompt.to_string(),
            },
        ];
        let body = serde_json::json!({
            "model": request.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let body_text = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &body_text, retry_after));
        }

        let response_body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CompletionFailure::Permanent(format!("failed to parse response: {e}")))?;

        extract_content(&response_body)
    }
}

fn classify_transport_error(e: reqwest::Error) -> CompletionFailure {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        CompletionFailure::transient(format!("request failed: {e}"))
    } else {
        CompletionFailure::Permanent(format!("request failed: {e}"))
    }
}

fn classify_status(status: u16, body: &str, retry_after: Option<Duration>) -> CompletionFailure {
    let message = format!("LLM API error {status}: {}", truncate(body, 500));
    match status {
        408 | 409 | 429 | 500..=599 => CompletionFailure::Transient {
            message,
            retry_after,
        },
        _ => CompletionFailure::Permanent(message),
    }
}

fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<f64>().ok().filter(|s| *s >= 0.0).map(Duration::from_secs_f64)
}

fn extract_content(body: &serde_json::Value) -> Result<String, CompletionFailure> {
    let content = body
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| {
            CompletionFailure::Permanent(format!(
                "unexpected response structure: {}",
                truncate(&body.to_string(), 500)
            ))
        })?;

    if content.trim().is_empty() {
        return Err(CompletionFailure::Permanent("model returned an empty completion".into()));
    }
    Ok(content.trim().to_string())
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Bounded exponential backoff for transient completion failures.
///
/// The delay before retry `n` (zero-based) is `base_delay * 2^n`, capped at
/// `max_delay`. With `jitter` enabled up to half of that delay is added at
/// random, still within the cap. A server `Retry-After` hint replaces the
/// computed delay, also capped.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use critic_review::llm::RetryPolicy;
///
/// let policy = RetryPolicy {
///     max_attempts: 4,
///     base_delay: Duration::from_millis(100),
///     max_delay: Duration::from_millis(250),
///     jitter: false,
/// };
/// assert_eq!(policy.delay_for(0, None), Duration::from_millis(100));
/// assert_eq!(policy.delay_for(1, None), Duration::from_millis(200));
/// assert_eq!(policy.delay_for(2, None), Duration::from_millis(250));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first call.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: critic_core::DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Default delays with the attempt count taken from the run configuration.
    pub fn from_request(request: &ReviewRequest) -> Self {
        Self {
            max_attempts: request.max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Delay to wait after failed attempt number `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        if let Some(hint) = hint {
            return hint.min(self.max_delay);
        }
        let factor = 2u32.saturating_pow(attempt);
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let spread = (delay.as_millis() / 2) as u64;
        let extra = Duration::from_millis(rand::rng().random_range(0..=spread));
        (delay + extra).min(self.max_delay)
    }
}

/// Complete one chunk, retrying transient failures per `policy`.
///
/// Never returns an error: exhaustion and permanent failures are reported
/// as a [`CompletionResult`] with `success == false`.
pub async fn complete(
    completer: &dyn Completer,
    chunk: &PromptChunk,
    request: &ReviewRequest,
    policy: &RetryPolicy,
) -> CompletionResult {
    let call = CompletionRequest {
        prompt: &chunk.text,
        model: &request.model,
        temperature: request.temperature,
        max_tokens: request.max_tokens,
    };
    let attempts = policy.max_attempts.max(1);

    for attempt in 0..attempts {
        match completer.complete(&call).await {
            Ok(text) => {
                debug!(
                    unit = %chunk.unit_label,
                    chunk = %chunk.chunk,
                    attempt = attempt + 1,
                    "completion succeeded"
                );
                return CompletionResult::succeeded(chunk, text);
            }
            Err(CompletionFailure::Transient {
                message,
                retry_after,
            }) if attempt + 1 < attempts => {
                let delay = policy.delay_for(attempt, retry_after);
                warn!(
                    unit = %chunk.unit_label,
                    chunk = %chunk.chunk,
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %message,
                    "transient completion failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(failure) => {
                let error = CriticError::Completion(if failure.is_transient() {
                    format!("gave up after {attempts} attempts: {failure}")
                } else {
                    failure.to_string()
                })
                .to_string();
                warn!(
                    unit = %chunk.unit_label,
                    chunk = %chunk.chunk,
                    error = %error,
                    "completion failed"
                );
                return CompletionResult::failed(chunk, error);
            }
        }
    }

    // The final attempt always resolves in the match above.
    CompletionResult::failed(chunk, "no completion attempts were made")
}
