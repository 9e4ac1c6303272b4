//! Shared outbound HTTP: bounded concurrency, per-host limits and capped retries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info_span, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(400),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

/// Upstream HTTP proxy with credentials, e.g. a residential proxy gateway.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub url: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub per_host_concurrency: usize,
    pub backoff: BackoffPolicy,
    pub proxy: Option<ProxyConfig>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            global_concurrency: 8,
            per_host_concurrency: 2,
            backoff: BackoffPolicy::default(),
            proxy: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}: {body}")]
    HttpStatus { status: u16, url: String, body: String },
    #[error("invalid proxy configuration: {0}")]
    Proxy(String),
    #[error("http client is shutting down")]
    Closed,
    #[error("retries exhausted for {0}")]
    Exhausted(String),
}

impl FetchError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            Self::Request(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_auth_error(&self) -> bool {
        matches!(self.status(), Some(401 | 403))
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json(&self) -> Result<JsonValue, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// One outbound call. Rebuilt into a fresh `reqwest` request on every attempt.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub basic_auth: Option<(String, String)>,
    pub json: Option<JsonValue>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: Vec::new(),
            basic_auth: None,
            json: None,
        }
    }

    pub fn post_json(url: impl Into<String>, body: JsonValue) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            headers: Vec::new(),
            basic_auth: None,
            json: Some(body),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic_auth = Some((username.into(), password.into()));
        self
    }

    fn host_key(&self) -> String {
        reqwest::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// Collapses whitespace and cuts to `max` chars, for logging upstream error bodies.
pub fn snip_body(text: &str, max: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max {
        collapsed
    } else {
        let mut out = collapsed.chars().take(max).collect::<String>();
        out.push('…');
        out
    }
}

pub const ERROR_BODY_SNIPPET: usize = 200;

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
    per_host_limit: usize,
    per_host: Mutex<HashMap<String, Arc<Semaphore>>>,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder().timeout(config.timeout);
        if let Some(ua) = &config.user_agent {
            builder = builder.user_agent(ua.clone());
        }
        if let Some(proxy) = &config.proxy {
            let proxy = reqwest::Proxy::all(&proxy.url)
                .map_err(|err| FetchError::Proxy(err.to_string()))?
                .basic_auth(&proxy.username, &proxy.password);
            builder = builder.proxy(proxy);
        }
        let client = builder.build()?;

        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            per_host_limit: config.per_host_concurrency.max(1),
            per_host: Mutex::new(HashMap::new()),
            backoff: config.backoff,
        })
    }

    async fn per_host_semaphore(&self, host: &str) -> Arc<Semaphore> {
        let mut map = self.per_host.lock().await;
        map.entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_host_limit)))
            .clone()
    }

    fn build(&self, request: &HttpRequest) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(request.method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some((user, pass)) = &request.basic_auth {
            builder = builder.basic_auth(user, Some(pass));
        }
        if let Some(body) = &request.json {
            builder = builder.json(body);
        }
        builder
    }

    pub async fn fetch_bytes(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        self.execute(&HttpRequest::get(url)).await
    }

    pub async fn execute(&self, request: &HttpRequest) -> Result<FetchedResponse, FetchError> {
        let host = request.host_key();
        let _global = self
            .global_limit
            .acquire()
            .await
            .map_err(|_| FetchError::Closed)?;
        let per_host = self.per_host_semaphore(&host).await;
        let _host = per_host.acquire().await.map_err(|_| FetchError::Closed)?;

        let span = info_span!("http_fetch", method = %request.method, host = %host);
        self.execute_with_retries(request).instrument(span).await
    }

    async fn execute_with_retries(&self, request: &HttpRequest) -> Result<FetchedResponse, FetchError> {
        let mut last_request_error: Option<reqwest::Error> = None;

        for attempt in 0..=self.backoff.max_retries {
            match self.build(request).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status.is_success() {
                        let body = resp.bytes().await?.to_vec();
                        return Ok(FetchedResponse {
                            status,
                            final_url,
                            body,
                        });
                    }

                    let disposition = classify_status(status);
                    if disposition == RetryDisposition::Retryable && attempt < self.backoff.max_retries
                    {
                        debug!(status = status.as_u16(), attempt, "retrying after http status");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }

                    let body = resp.text().await.unwrap_or_default();
                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                        body: snip_body(&body, ERROR_BODY_SNIPPET),
                    });
                }
                Err(err) => {
                    let disposition = classify_reqwest_error(&err);
                    if disposition == RetryDisposition::Retryable && attempt < self.backoff.max_retries
                    {
                        debug!(error = %err, attempt, "retrying after request error");
                        last_request_error = Some(err);
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }

        match last_request_error {
            Some(err) => Err(FetchError::Request(err)),
            None => Err(FetchError::Exhausted(request.url.clone())),
        }
    }
}
