//! Shared HTTP plumbing composed into every source adapter.
//!
//! [`HttpSource`] owns a `reqwest` client with the per-request timeout, an
//! optional bearer token and the retry policy. Rate-limit style responses
//! (429, 503, GitHub's 403 with an exhausted quota) and transport errors are
//! retried with exponential backoff; every other non-success status fails
//! immediately.

use crate::config::FetchSettings;
use crate::error::AdapterError;
use crate::retry::Backoff;
use crate::utils::truncate_for_log;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::de::DeserializeOwned;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

pub struct HttpSource {
    source_id: &'static str,
    client: reqwest::Client,
    bearer: Option<String>,
    timeout: Duration,
    max_attempts: u32,
    backoff: Backoff,
}

impl HttpSource {
    pub fn new(
        source_id: &'static str,
        settings: &FetchSettings,
        bearer: Option<String>,
    ) -> Result<Self, AdapterError> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.as_str())
            .timeout(settings.timeout())
            .connect_timeout(settings.timeout().min(Duration::from_secs(10)))
            .build()
            .map_err(|e| AdapterError::Client {
                source_id: source_id.to_string(),
                message: e.to_string(),
            })?;
        Ok(Self {
            source_id,
            client,
            bearer,
            timeout: settings.timeout(),
            max_attempts: settings.max_attempts.max(1),
            backoff: Backoff::new(settings.retry_base_delay()),
        })
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn source_id(&self) -> &'static str {
        self.source_id
    }

    pub fn has_token(&self) -> bool {
        self.bearer.is_some()
    }

    /// GET `url` and return the body, retrying rate limits and transport errors.
    #[instrument(level = "debug", skip_all, fields(source = self.source_id, %url))]
    pub async fn get_text(&self, url: &str) -> Result<String, AdapterError> {
        let t0 = Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let (err, server_hint) = match self.send_once(url).await {
                Ok(Attempt::Body(body)) => {
                    debug!(
                        attempt,
                        bytes = body.len(),
                        elapsed_ms = t0.elapsed().as_millis() as u64,
                        "fetched"
                    );
                    return Ok(body);
                }
                Ok(Attempt::Retry { error, retry_after }) => (error, retry_after),
                Err(fatal) => return Err(fatal),
            };

            if attempt >= self.max_attempts {
                warn!(attempt, error = %err, "giving up after final attempt");
                return Err(err);
            }

            let mut delay = self.backoff.delay_for(attempt);
            if let Some(hint) = server_hint {
                delay = delay.max(hint.min(self.backoff.max_delay));
            }
            warn!(attempt, max = self.max_attempts, ?delay, error = %err, "request failed; backing off");
            sleep(delay).await;
        }
    }

    /// GET `url` and decode the body as JSON.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, AdapterError> {
        let body = self.get_text(url).await?;
        serde_json::from_str(&body).map_err(|e| {
            AdapterError::parse(
                self.source_id,
                format!("{e} (body starts with {})", truncate_for_log(&body, 120)),
            )
        })
    }

    async fn send_once(&self, url: &str) -> Result<Attempt, AdapterError> {
        let mut req = self.client.get(url);
        if let Some(token) = &self.bearer {
            req = req.bearer_auth(token);
        }

        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(e) => return Ok(Attempt::Retry { error: self.transport_error(e), retry_after: None }),
        };

        let status = resp.status();
        if status.is_success() {
            return match resp.text().await {
                Ok(body) => Ok(Attempt::Body(body)),
                Err(e) => Ok(Attempt::Retry { error: self.transport_error(e), retry_after: None }),
            };
        }

        let reason = retry_reason(status, resp.headers());
        let retry_after = retry_after(resp.headers());
        let body = resp.text().await.unwrap_or_default();
        let error = AdapterError::Http {
            source_id: self.source_id.to_string(),
            status: Some(status.as_u16()),
            message: match reason {
                Some(reason) => reason.to_string(),
                None => truncate_for_log(body.trim(), 160),
            },
        };
        match reason {
            Some(_) => Ok(Attempt::Retry { error, retry_after }),
            None => Err(error),
        }
    }

    fn transport_error(&self, e: reqwest::Error) -> AdapterError {
        if e.is_timeout() {
            AdapterError::Timeout {
                source_id: self.source_id.to_string(),
                after: self.timeout,
            }
        } else {
            AdapterError::Http {
                source_id: self.source_id.to_string(),
                status: None,
                message: e.to_string(),
            }
        }
    }
}

enum Attempt {
    Body(String),
    Retry {
        error: AdapterError,
        retry_after: Option<Duration>,
    },
}

/// Why a response is worth retrying, or `None` when it is not.
pub fn retry_reason(status: StatusCode, headers: &HeaderMap) -> Option<&'static str> {
    match status.as_u16() {
        429 => Some("rate limited"),
        503 => Some("service unavailable"),
        403 if headers
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.trim() == "0") =>
        {
            Some("rate limit exhausted")
        }
        _ => None,
    }
}

/// A `Retry-After` header expressed in whole seconds.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal loopback HTTP server replaying canned `(status, body)` responses
    /// in order, repeating the last one. Returns the base URL and a hit counter.
    pub(crate) async fn serve(responses: Vec<(u16, String)>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let (status, body) = responses
                    .get(n)
                    .or_else(|| responses.last())
                    .cloned()
                    .unwrap_or((200, String::new()));
                let mut buf = vec![0u8; 8192];
                let _ = socket.read(&mut buf).await;
                let resp = format!(
                    "HTTP/1.1 {status} X\r\nContent-Length: {}\r\nRetry-After: 0\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(resp.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        (format!("http://{addr}"), hits)
    }

    pub(crate) fn fast_settings() -> FetchSettings {
        FetchSettings {
            timeout_secs: 5,
            max_attempts: 3,
            retry_base_delay_ms: 1,
            ..FetchSettings::default()
        }
    }

    fn source() -> HttpSource {
        HttpSource::new("test", &fast_settings(), None)
            .unwrap()
            .with_backoff(Backoff::new(Duration::from_millis(1)).without_jitter())
    }

    #[test]
    fn test_retry_reason() {
        let empty = HeaderMap::new();
        assert_eq!(retry_reason(StatusCode::TOO_MANY_REQUESTS, &empty), Some("rate limited"));
        assert_eq!(retry_reason(StatusCode::SERVICE_UNAVAILABLE, &empty), Some("service unavailable"));
        assert_eq!(retry_reason(StatusCode::FORBIDDEN, &empty), None);
        assert_eq!(retry_reason(StatusCode::NOT_FOUND, &empty), None);

        let mut gh = HeaderMap::new();
        gh.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        assert_eq!(retry_reason(StatusCode::FORBIDDEN, &gh), Some("rate limit exhausted"));
    }

    #[test]
    fn test_retry_after_seconds() {
        let mut h = HeaderMap::new();
        h.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(retry_after(&h), Some(Duration::from_secs(7)));
        h.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(retry_after(&h), None);
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried_then_succeeds() {
        let (base, hits) = serve(vec![
            (429, String::new()),
            (503, String::new()),
            (200, "ok".to_string()),
        ])
        .await;
        let body = source().get_text(&base).await.unwrap();
        assert_eq!(body, "ok");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rate_limit_surfaces_after_max_attempts() {
        let (base, hits) = serve(vec![(429, String::new())]).await;
        let err = source().get_text(&base).await.unwrap_err();
        assert!(matches!(err, AdapterError::Http { status: Some(429), .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let (base, hits) = serve(vec![(404, "missing".to_string())]).await;
        let err = source().get_text(&base).await.unwrap_err();
        assert!(matches!(err, AdapterError::Http { status: Some(404), .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_json_reports_parse_errors() {
        let (base, _) = serve(vec![(200, "<html>".to_string())]).await;
        let err = source()
            .get_json::<serde_json::Value>(&base)
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Parse { .. }));
    }
}
