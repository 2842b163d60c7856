//! LLM API interaction with exponential backoff retry logic.
//!
//! This module provides the interface for talking to an OpenAI-compatible
//! chat-completions endpoint. Both the duplicate comparator and the
//! summarizer are built on top of it.
//!
//! # Architecture
//!
//! - [`AskAsync`]: Core trait defining async LLM interaction
//! - [`ChatClient`]: `reqwest` client for the `/chat/completions` route
//! - [`RetryAsk`]: Decorator that adds retry logic to any `AskAsync` implementation
//! - [`AiBackend`]: What the pipeline actually holds: a live retrying client,
//!   or a disabled stand-in when no API key is configured
//!
//! # Retry Strategy
//!
//! - Transient failures (unavailable, timeout) are retried up to `max_retries` times
//! - Malformed or rejected responses are returned immediately
//! - Exponential backoff with jitter, see [`crate::retry::Backoff`]

use crate::config::AiSettings;
use crate::error::AiError;
use crate::retry::Backoff;
use crate::utils::truncate_for_log;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, instrument, warn};

/// A system instruction plus the user message for one completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }
}

/// Trait for async LLM interaction.
///
/// Implementors send a prompt to a model and return the raw text of its reply.
pub trait AskAsync: Send + Sync {
    fn ask(&self, prompt: &Prompt) -> impl Future<Output = Result<String, AiError>> + Send;
}

/// Wrapper that adds exponential backoff retry logic to any [`AskAsync`] implementation.
pub struct RetryAsk<T> {
    inner: T,
    max_retries: usize,
    backoff: Backoff,
}

impl<T> RetryAsk<T>
where
    T: AskAsync,
{
    pub fn new(inner: T, max_retries: usize, base_delay: Duration) -> Self {
        Self {
            inner,
            max_retries,
            backoff: Backoff::new(base_delay),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

impl<T> fmt::Debug for RetryAsk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryAsk")
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .finish()
    }
}

impl<T> AskAsync for RetryAsk<T>
where
    T: AskAsync,
{
    #[instrument(level = "debug", skip_all)]
    async fn ask(&self, prompt: &Prompt) -> Result<String, AiError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.inner.ask(prompt).await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    attempt += 1;
                    let elapsed_ms_attempt = attempt_t0.elapsed().as_millis() as u64;
                    let elapsed_ms_total = total_t0.elapsed().as_millis() as u64;

                    if !e.is_transient() || attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_attempt,
                            elapsed_ms_total,
                            error = %e,
                            "ask() giving up"
                        );
                        return Err(e);
                    }

                    let delay = self.backoff.delay_for(attempt as u32);
                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt,
                        elapsed_ms_total,
                        ?delay,
                        error = %e,
                        "ask() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

/// Client for an OpenAI-compatible chat-completions endpoint.
pub struct ChatClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
}

impl fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("key_len", &self.api_key.len())
            .finish()
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl ChatClient {
    pub fn new(settings: &AiSettings, api_key: String) -> Result<Self, AiError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("daily_ai_news/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .timeout(settings.timeout())
            .build()
            .map_err(|e| AiError::Unavailable(format!("building HTTP client: {e}")))?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", settings.base_url.trim_end_matches('/')),
            api_key,
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            timeout: settings.timeout(),
        })
    }
}

impl AskAsync for ChatClient {
    #[instrument(level = "debug", skip_all, fields(model = %self.model))]
    async fn ask(&self, prompt: &Prompt) -> Result<String, AiError> {
        let t0 = Instant::now();
        let req = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AiError::Timeout(self.timeout)
                } else {
                    AiError::Unavailable(e.to_string())
                }
            })?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| {
            if e.is_timeout() {
                AiError::Timeout(self.timeout)
            } else {
                AiError::Unavailable(e.to_string())
            }
        })?;
        debug!(
            status = status.as_u16(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "chat completion returned"
        );

        if status.as_u16() == 429 || status.is_server_error() {
            return Err(AiError::Unavailable(format!(
                "HTTP {}: {}",
                status.as_u16(),
                truncate_for_log(&body, 200)
            )));
        }
        if !status.is_success() {
            return Err(AiError::Rejected {
                status: status.as_u16(),
                message: truncate_for_log(&body, 200),
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| AiError::Malformed(format!("chat envelope: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AiError::Malformed("empty completion".to_string()))
    }
}

/// The AI client handed to the pipeline stages.
#[derive(Debug)]
pub enum AiBackend {
    Live(RetryAsk<ChatClient>),
    /// Every call fails with [`AiError::Unavailable`] carrying this reason.
    Disabled(String),
}

impl AiBackend {
    /// Build a live client when an API key is configured, a disabled one otherwise.
    pub fn from_settings(settings: &AiSettings) -> Self {
        let Some(key) = settings.api_key.clone() else {
            warn!("No AI API key configured; summaries and semantic dedup will use fallbacks");
            return AiBackend::Disabled("no API key configured".to_string());
        };
        match ChatClient::new(settings, key) {
            Ok(client) => AiBackend::Live(
                RetryAsk::new(client, settings.max_retries, settings.retry_base_delay()),
            ),
            Err(e) => {
                error!(error = %e, "Could not build AI client; continuing with fallbacks");
                AiBackend::Disabled(e.to_string())
            }
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, AiBackend::Live(_))
    }
}

impl AskAsync for AiBackend {
    async fn ask(&self, prompt: &Prompt) -> Result<String, AiError> {
        match self {
            AiBackend::Live(client) => client.ask(prompt).await,
            AiBackend::Disabled(reason) => Err(AiError::Unavailable(reason.clone())),
        }
    }
}

/// Strip a surrounding markdown code fence (```json ... ```) from a model reply.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = match rest.find('\n') {
        Some(nl) => &rest[nl + 1..],
        None => rest,
    };
    rest.trim_end().trim_end_matches("```").trim()
}
