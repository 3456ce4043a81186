//! Browser-identifying HTTP client wrapper (C1, spec §4.1): retry with
//! exponential backoff, transient-error classification, and final-URL
//! tracking across redirects.

use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::FetchError;

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_retries: 2,
            retry_base_delay_ms: 1000,
        }
    }
}

/// A fully-buffered response: body text, status, content-type, and the URL
/// actually served (after following redirects), so callers can detect
/// same-origin redirects for C6's `RedirectEdge` bookkeeping.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: FetchStatus,
    pub final_url: String,
    pub content_type: Option<String>,
    pub headers: HeaderMap,
    pub body: String,
}

#[derive(Debug, Clone, Copy)]
pub struct FetchStatus(u16);

impl FetchStatus {
    pub fn code(&self) -> u16 {
        self.0
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.0)
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.0)
    }
}

impl From<StatusCode> for FetchStatus {
    fn from(value: StatusCode) -> Self {
        Self(value.as_u16())
    }
}

/// Thin wrapper over `reqwest::Client` applying this project's retry and
/// classification policy uniformly to every fetch site (bundle download,
/// source-map fetch/probe, static asset capture).
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    config: HttpConfig,
    cancel: Option<CancellationToken>,
}

impl HttpClient {
    pub fn new(config: HttpConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(10))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self { client, config, cancel: None })
    }

    /// Ties every fetch (including retry backoff sleeps) to a root
    /// cancellation signal, per spec §5.9: "HTTP (signal plumbed through
    /// retries)". Without this, a client never cancels on its own.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// GET with retry-on-transient-error and exponential backoff. Client
    /// errors (4xx) are never retried, matching the teacher's fail-fast rule.
    pub async fn get(&self, url: &str) -> Result<HttpResponse, FetchError> {
        let mut attempt = 0u32;

        loop {
            if let Some(cancel) = &self.cancel {
                if cancel.is_cancelled() {
                    return Err(FetchError::cancelled(url));
                }
            }

            let attempt_result = match &self.cancel {
                Some(cancel) => {
                    tokio::select! {
                        result = self.do_get(url) => result,
                        _ = cancel.cancelled() => Err(FetchError::cancelled(url)),
                    }
                }
                None => self.do_get(url).await,
            };

            match attempt_result {
                Ok(response) => return Ok(response),
                Err(err) => {
                    let should_retry = err.transient && attempt < self.config.max_retries;
                    if !should_retry {
                        if attempt > 0 {
                            warn!("fetch failed for {url} after {attempt} retries: {}", err.to_detailed_string());
                        } else {
                            debug!("fetch failed for {url}: {}", err.to_detailed_string());
                        }
                        return Err(err);
                    }
                    attempt += 1;
                    let delay = self.config.retry_base_delay_ms * 2u64.pow(attempt - 1);
                    trace!("retry {attempt} for {url} in {delay}ms");
                    match &self.cancel {
                        Some(cancel) => {
                            tokio::select! {
                                _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
                                _ = cancel.cancelled() => return Err(FetchError::cancelled(url)),
                            }
                        }
                        None => tokio::time::sleep(Duration::from_millis(delay)).await,
                    }
                }
            }
        }
    }

    async fn do_get(&self, url: &str) -> Result<HttpResponse, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::classify(url, e))?;

        let status: FetchStatus = response.status().into();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let headers = response.headers().clone();

        if status.is_client_error() && !status.is_success() {
            // Still read the body for diagnostics, but treat it as a
            // non-transient terminal failure one level up if the caller
            // checks `status`.
        }

        let body = response.text().await.map_err(|e| FetchError::classify(url, e))?;

        Ok(HttpResponse {
            status,
            final_url,
            content_type,
            headers,
            body,
        })
    }
}
