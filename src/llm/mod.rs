//! LLM chat client used by the ontology arbiter
//!
//! The client talks to an Ollama-compatible `/api/chat` endpoint. It is stateless: the
//! conversation history is owned by the caller ([`Conversation`]) and passed in on every
//! call, so the same client can serve independent arbitration sessions.
//!
//! Rate-limit responses (HTTP 429) are retried inside [`ChatOracle::chat`] with a fixed
//! pause; any other non-success status is returned to the caller as a fatal error.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::utils::retry::{with_retry_if, RetryConfig};

/// Transport errors of the chat endpoint
#[derive(Error, Debug)]
pub enum LlmError {
    /// Every attempt was answered with HTTP 429
    #[error("rate limited on all {attempts} attempts")]
    RateLimited { attempts: u32 },

    /// Non-success HTTP status other than 429
    #[error("endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Connection, timeout or decoding failure
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The endpoint answered without any message content
    #[error("endpoint returned an empty message")]
    EmptyResponse,

    /// The arbiter is switched off in configuration
    #[error("LLM arbiter is disabled")]
    Disabled,
}

impl LlmError {
    /// Check if a later run could succeed without changing inputs
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Status { status, .. } => *status >= 500,
            Self::EmptyResponse | Self::Disabled => false,
        }
    }

    /// HTTP 429 from a single attempt
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Status { status: 429, .. })
    }
}

/// Configuration for the LLM client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Ollama endpoint URL (default: http://localhost:11434)
    pub endpoint: String,

    /// Model name to use
    pub model: String,

    /// Request timeout in seconds; 0 keeps the HTTP client's default
    pub timeout_secs: u64,

    /// Temperature for generation (0.0 - 1.0)
    pub temperature: f32,

    /// Attempts per chat call when the endpoint answers 429
    pub max_attempts: u32,

    /// Pause between rate-limited attempts in milliseconds
    pub rate_limit_pause_ms: u64,

    /// Consult the arbiter at all
    pub enabled: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            model: "qwen2.5:7b".to_string(),
            timeout_secs: 0,
            temperature: 0.0,
            max_attempts: 5,
            rate_limit_pause_ms: 61_000,
            enabled: false,
        }
    }
}

impl LlmConfig {
    /// Retry policy applied to 429 responses
    pub fn retry_policy(&self) -> RetryConfig {
        RetryConfig::fixed(
            self.max_attempts.max(1),
            Duration::from_millis(self.rate_limit_pause_ms),
        )
    }
}

/// One message of a chat history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// A chat endpoint: full history in, assistant reply out
#[async_trait]
pub trait ChatOracle: Send + Sync {
    async fn chat(&self, history: &[ChatMessage]) -> Result<String, LlmError>;
}

/// Caller-held conversation state
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    /// Start a conversation with a system prompt
    pub fn with_system(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::system(prompt)],
        }
    }

    /// Send `prompt`, record both sides of the exchange and return the reply
    ///
    /// On failure the history is left unchanged.
    pub async fn ask(&mut self, oracle: &dyn ChatOracle, prompt: impl Into<String>) -> Result<String, LlmError> {
        self.messages.push(ChatMessage::user(prompt));
        match oracle.chat(&self.messages).await {
            Ok(reply) => {
                self.messages.push(ChatMessage::assistant(reply.clone()));
                Ok(reply)
            }
            Err(e) => {
                self.messages.pop();
                Err(e)
            }
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }
}

/// Ollama chat request
#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: OllamaOptions,
}

/// Ollama generation options
#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

/// Ollama chat response
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    message: Option<ChatMessage>,
}

/// HTTP client for an Ollama-compatible chat endpoint
pub struct LlmClient {
    client: Client,
    config: LlmConfig,
}

impl LlmClient {
    /// Create a new LLM client with custom config
    pub fn with_config(config: LlmConfig) -> Result<Self, LlmError> {
        let mut builder = Client::builder();
        if config.timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(config.timeout_secs));
        }
        let client = builder.build()?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// Check if the endpoint is reachable
    pub async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.config.endpoint.trim_end_matches('/'));
        self.client.get(&url).send().await.is_ok()
    }

    /// Single chat round-trip without retries
    async fn send_once(&self, history: &[ChatMessage]) -> Result<String, LlmError> {
        let url = format!("{}/api/chat", self.config.endpoint.trim_end_matches('/'));

        let request = OllamaChatRequest {
            model: &self.config.model,
            messages: history,
            stream: false,
            options: OllamaOptions {
                temperature: self.config.temperature,
            },
        };

        let response = self.client.post(&url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: OllamaChatResponse = response.json().await?;
        match parsed.message {
            Some(message) if !message.content.trim().is_empty() => Ok(message.content),
            _ => Err(LlmError::EmptyResponse),
        }
    }
}

#[async_trait]
impl ChatOracle for LlmClient {
    async fn chat(&self, history: &[ChatMessage]) -> Result<String, LlmError> {
        if !self.config.enabled {
            return Err(LlmError::Disabled);
        }

        let policy = self.config.retry_policy();
        debug!(
            model = %self.config.model,
            messages = history.len(),
            "Sending chat request"
        );

        with_retry_if(&policy, || self.send_once(history), LlmError::is_rate_limited)
            .await
            .map_err(|e| {
                if e.is_rate_limited() {
                    LlmError::RateLimited {
                        attempts: policy.max_attempts(),
                    }
                } else {
                    e
                }
            })
    }
}

/// Extract a JSON document from an LLM answer (fenced code block, else the outermost braces)
pub fn extract_json(text: &str) -> String {
    if let Some(start) = text.find("```json") {
        if let Some(end) = text[start + 7..].find("```") {
            return text[start + 7..start + 7 + end].trim().to_string();
        }
    }

    if let Some(start) = text.find("```") {
        let after_start = &text[start + 3..];
        // Skip language identifier if present
        let content_start = after_start.find('\n').map_or(0, |i| i + 1);
        if let Some(end) = after_start[content_start..].find("```") {
            return after_start[content_start..content_start + end]
                .trim()
                .to_string();
        }
    }

    if let Some(start) = text.find('{') {
        if let Some(end) = text.rfind('}') {
            if end > start {
                return text[start..=end].to_string();
            }
        }
    }

    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Echo {
        seen: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl ChatOracle for Echo {
        async fn chat(&self, history: &[ChatMessage]) -> Result<String, LlmError> {
            self.seen.lock().unwrap().push(history.len());
            let last = history.last().map(|m| m.content.clone()).unwrap_or_default();
            if last == "fail" {
                return Err(LlmError::EmptyResponse);
            }
            Ok(format!("echo: {last}"))
        }
    }

    #[test]
    fn test_config_default() {
        let config = LlmConfig::default();
        assert_eq!(config.endpoint, "http://localhost:11434");
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.rate_limit_pause_ms, 61_000);
        assert_eq!(config.retry_policy().max_attempts(), 5);
    }

    #[test]
    fn test_extract_json_from_code_block() {
        let text = "Here is my answer:\n```json\n{\"pick\": \"brick:Room\", \"confidence\": 0.9}\n```\n";
        assert_eq!(extract_json(text), r#"{"pick": "brick:Room", "confidence": 0.9}"#);
    }

    #[test]
    fn test_extract_json_raw() {
        assert_eq!(extract_json(r#"sure: {"pick": null} done"#), r#"{"pick": null}"#);
        assert_eq!(extract_json("no json here"), "no json here");
    }

    #[tokio::test]
    async fn test_conversation_keeps_history() {
        let oracle = Echo {
            seen: Mutex::new(Vec::new()),
        };
        let mut conversation = Conversation::with_system("You map IoT types to Brick.");

        let reply = conversation.ask(&oracle, "Room?").await.unwrap();
        assert_eq!(reply, "echo: Room?");
        conversation.ask(&oracle, "Sensor?").await.unwrap();

        assert_eq!(conversation.messages().len(), 5);
        assert_eq!(*oracle.seen.lock().unwrap(), vec![2, 4]);
    }

    #[tokio::test]
    async fn test_conversation_unchanged_on_failure() {
        let oracle = Echo {
            seen: Mutex::new(Vec::new()),
        };
        let mut conversation = Conversation::with_system("system");

        assert!(conversation.ask(&oracle, "fail").await.is_err());
        assert_eq!(conversation.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_client_refuses() {
        let client = LlmClient::with_config(LlmConfig::default()).unwrap();
        let err = client.chat(&[ChatMessage::user("hi")]).await.unwrap_err();
        assert!(matches!(err, LlmError::Disabled));
    }

    #[test]
    fn test_rate_limit_classification() {
        let err = LlmError::Status {
            status: 429,
            body: String::new(),
        };
        assert!(err.is_rate_limited());

        let err = LlmError::Status {
            status: 400,
            body: "bad".to_string(),
        };
        assert!(!err.is_rate_limited());
        assert!(!err.is_recoverable());
    }
}
