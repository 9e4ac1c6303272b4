//! Decodo scraper API and residential proxy fetchers.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value as JsonValue};
use tracing::{debug, warn};
use wizardlab_core::reddit_url::reddit_json_url;
use wizardlab_storage::{snip_body, HttpClientConfig, HttpFetcher, HttpRequest, ProxyConfig};

use crate::post::{normalize_post, post_from_listing, RedditPost};
use crate::{AdapterError, RedditFetcher};

pub const DECODO_ENDPOINT: &str = "https://scraper-api.decodo.com/v2/scrape";
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScraperCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyCredentials {
    pub host: String,
    pub port: String,
    pub username: String,
    pub password: String,
}

impl ProxyCredentials {
    pub fn proxy_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct DecodoConfig {
    pub scraper: Option<ScraperCredentials>,
    pub proxy: Option<ProxyCredentials>,
    pub timeout: Duration,
    pub user_agent: String,
}

fn env_trimmed(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl DecodoConfig {
    pub fn from_env() -> Self {
        let scraper = match (
            env_trimmed("DECODO_SCRAPER_USERNAME"),
            env_trimmed("DECODO_SCRAPER_PASSWORD"),
        ) {
            (Some(username), Some(password)) => Some(ScraperCredentials { username, password }),
            _ => None,
        };
        let proxy = match (
            env_trimmed("DECODO_PROXY_HOST"),
            env_trimmed("DECODO_PROXY_PORT"),
            env_trimmed("DECODO_PROXY_USERNAME"),
            env_trimmed("DECODO_PROXY_PASSWORD"),
        ) {
            (Some(host), Some(port), Some(username), Some(password)) => Some(ProxyCredentials {
                host,
                port,
                username,
                password,
            }),
            _ => None,
        };

        Self {
            scraper,
            proxy,
            timeout: Duration::from_secs(
                env_trimmed("WIZARDLAB_HTTP_TIMEOUT_SECS")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30),
            ),
            user_agent: env_trimmed("WIZARDLAB_USER_AGENT")
                .unwrap_or_else(|| "WizardLabBot/0.1 (+https://wizardfolio.com)".to_string()),
        }
    }
}

/// Scraper responses wrap the post under `data`, `result` or `post`, sometimes one level deeper.
pub fn extract_post_candidate(payload: &JsonValue) -> Option<Map<String, JsonValue>> {
    let root = payload.as_object()?;
    let candidate = ["data", "result", "post"]
        .iter()
        .find_map(|key| root.get(*key).filter(|v| !v.is_null()))
        .unwrap_or(payload)
        .as_object()?;

    match candidate.get("data") {
        Some(JsonValue::Object(inner)) => Some(inner.clone()),
        _ => Some(candidate.clone()),
    }
}

pub struct DecodoScraperFetcher {
    http: HttpFetcher,
    credentials: ScraperCredentials,
    endpoint: String,
}

impl DecodoScraperFetcher {
    pub fn new(credentials: ScraperCredentials, timeout: Duration) -> Result<Self, AdapterError> {
        let http = HttpFetcher::new(HttpClientConfig {
            timeout,
            user_agent: Some(BROWSER_USER_AGENT.to_string()),
            ..Default::default()
        })?;
        Ok(Self {
            http,
            credentials,
            endpoint: DECODO_ENDPOINT.to_string(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl RedditFetcher for DecodoScraperFetcher {
    fn name(&self) -> &'static str {
        "scraper"
    }

    async fn fetch_post(&self, post_url: &str) -> Result<RedditPost, AdapterError> {
        let request = HttpRequest::post_json(
            &self.endpoint,
            json!({ "target": "reddit_post", "url": post_url }),
        )
        .header("accept", "application/json")
        .basic_auth(&self.credentials.username, &self.credentials.password);

        let response = self.http.execute(&request).await?;
        let text = response.text();
        let payload = serde_json::from_str::<JsonValue>(&text)
            .unwrap_or_else(|_| json!({ "message": text }));

        let candidate = extract_post_candidate(&payload).ok_or_else(|| {
            AdapterError::UnexpectedShape(format!(
                "scraper returned no reddit_post data: {}",
                snip_body(&text, 200)
            ))
        })?;
        debug!(post_url, "scraper returned post payload");
        Ok(normalize_post(&candidate, post_url))
    }
}

pub struct DecodoProxyFetcher {
    http: HttpFetcher,
}

impl DecodoProxyFetcher {
    pub fn new(credentials: &ProxyCredentials, timeout: Duration) -> Result<Self, AdapterError> {
        let http = HttpFetcher::new(HttpClientConfig {
            timeout,
            user_agent: Some(BROWSER_USER_AGENT.to_string()),
            proxy: Some(ProxyConfig {
                url: credentials.proxy_url(),
                username: credentials.username.clone(),
                password: credentials.password.clone(),
            }),
            ..Default::default()
        })?;
        Ok(Self { http })
    }
}

#[async_trait]
impl RedditFetcher for DecodoProxyFetcher {
    fn name(&self) -> &'static str {
        "proxy"
    }

    async fn fetch_post(&self, post_url: &str) -> Result<RedditPost, AdapterError> {
        let json_url = reddit_json_url(post_url)
            .ok_or_else(|| AdapterError::Unsupported(post_url.to_string()))?;
        let request = HttpRequest::get(json_url)
            .header("accept", "application/json")
            .header("accept-language", "en-US,en;q=0.9");

        let response = self.http.execute(&request).await?;
        let payload = response
            .json()
            .map_err(|err| AdapterError::UnexpectedShape(format!("invalid JSON via proxy: {err}")))?;
        let post = post_from_listing(&payload)
            .ok_or_else(|| AdapterError::UnexpectedShape("unexpected Reddit JSON via proxy".into()))?;
        Ok(normalize_post(&post, post_url))
    }
}

/// Scraper first; proxy on any non-auth scraper failure when proxy credentials exist.
pub struct FallbackFetcher {
    primary: Box<dyn RedditFetcher>,
    fallback: Option<Box<dyn RedditFetcher>>,
}

impl FallbackFetcher {
    pub fn new(primary: Box<dyn RedditFetcher>, fallback: Option<Box<dyn RedditFetcher>>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl RedditFetcher for FallbackFetcher {
    fn name(&self) -> &'static str {
        self.primary.name()
    }

    async fn fetch_post(&self, post_url: &str) -> Result<RedditPost, AdapterError> {
        match self.primary.fetch_post(post_url).await {
            Ok(post) => Ok(post),
            Err(err) if err.is_auth_error() => Err(err),
            Err(err) => match &self.fallback {
                Some(fallback) => {
                    warn!(
                        from = self.primary.name(),
                        to = fallback.name(),
                        status = err.status(),
                        "reddit fetch failed, falling back"
                    );
                    fallback.fetch_post(post_url).await
                }
                None => Err(err),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wizardlab_storage::FetchError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Scripted {
        name: &'static str,
        result: fn() -> Result<RedditPost, AdapterError>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RedditFetcher for Scripted {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn fetch_post(&self, _post_url: &str) -> Result<RedditPost, AdapterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.result)()
        }
    }

    fn post() -> Result<RedditPost, AdapterError> {
        let raw = json!({"title": "from proxy", "author": "alice"});
        Ok(normalize_post(raw.as_object().unwrap(), "https://www.reddit.com/comments/x/"))
    }

    fn status(code: u16) -> AdapterError {
        AdapterError::Fetch(FetchError::HttpStatus {
            status: code,
            url: DECODO_ENDPOINT.into(),
            body: String::new(),
        })
    }

    fn chain(
        primary: fn() -> Result<RedditPost, AdapterError>,
    ) -> (FallbackFetcher, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = FallbackFetcher::new(
            Box::new(Scripted { name: "scraper", result: primary, calls: Arc::new(AtomicUsize::new(0)) }),
            Some(Box::new(Scripted { name: "proxy", result: post, calls: calls.clone() })),
        );
        (fetcher, calls)
    }

    #[tokio::test]
    async fn auth_failures_never_fall_back() {
        let (fetcher, proxy_calls) = chain(|| Err(status(401)));
        let err = fetcher.fetch_post("https://www.reddit.com/comments/x/").await.unwrap_err();
        assert!(err.is_auth_error());
        assert_eq!(proxy_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn other_failures_use_the_proxy() {
        let (fetcher, proxy_calls) = chain(|| Err(status(502)));
        let post = fetcher.fetch_post("https://www.reddit.com/comments/x/").await.unwrap();
        assert_eq!(post.title, "from proxy");
        assert_eq!(proxy_calls.load(Ordering::SeqCst), 1);

        let (fetcher, proxy_calls) =
            chain(|| Err(AdapterError::UnexpectedShape("no reddit_post data".into())));
        assert!(fetcher.fetch_post("https://www.reddit.com/comments/x/").await.is_ok());
        assert_eq!(proxy_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn scraper_candidate_unwraps_nested_data() {
        let payload = json!({"data": {"data": {"title": "nested"}}});
        assert_eq!(extract_post_candidate(&payload).unwrap()["title"], "nested");
        let payload = json!({"result": {"title": "result"}});
        assert_eq!(extract_post_candidate(&payload).unwrap()["title"], "result");
        let payload = json!({"title": "root"});
        assert_eq!(extract_post_candidate(&payload).unwrap()["title"], "root");
        assert!(extract_post_candidate(&json!({"data": "nope"})).is_none());
        assert!(extract_post_candidate(&json!([1])).is_none());
    }

    #[test]
    fn proxy_url_keeps_credentials_out() {
        let creds = ProxyCredentials {
            host: "gate.decodo.com".into(),
            port: "7000".into(),
            username: "user".into(),
            password: "secret".into(),
        };
        assert_eq!(creds.proxy_url(), "http://gate.decodo.com:7000");
    }
}
