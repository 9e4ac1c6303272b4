//! Reddit post fetchers: Decodo scraper API, Decodo residential proxy, and direct public endpoints.

pub mod decodo;
pub mod direct;
pub mod post;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;
use wizardlab_storage::FetchError;

pub use decodo::{
    DecodoConfig, DecodoProxyFetcher, DecodoScraperFetcher, FallbackFetcher, ProxyCredentials,
    ScraperCredentials,
};
pub use direct::DirectRedditFetcher;
pub use post::{extract_image_urls, html_to_text, normalize_post, RedditComment, RedditPost};

pub const CRATE_NAME: &str = "wizardlab-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("unsupported Reddit URL: {0}")]
    Unsupported(String),
    #[error("reddit post not accessible ({status}): {url}")]
    NotAccessible { status: u16, url: String },
    #[error("{0}")]
    UnexpectedShape(String),
}

impl AdapterError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Fetch(err) => err.status(),
            Self::NotAccessible { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_auth_error(&self) -> bool {
        matches!(self, Self::Fetch(err) if err.is_auth_error())
    }
}

#[async_trait]
pub trait RedditFetcher: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch_post(&self, post_url: &str) -> Result<RedditPost, AdapterError>;
}

/// Picks the fetch path from whichever credentials are configured.
pub fn fetcher_from_config(config: &DecodoConfig) -> Result<Box<dyn RedditFetcher>, AdapterError> {
    let proxy = config
        .proxy
        .as_ref()
        .map(|creds| DecodoProxyFetcher::new(creds, config.timeout))
        .transpose()?;

    match (&config.scraper, proxy) {
        (Some(creds), proxy) => {
            info!(proxy_fallback = proxy.is_some(), "using decodo scraper api");
            let scraper = DecodoScraperFetcher::new(creds.clone(), config.timeout)?;
            Ok(Box::new(FallbackFetcher::new(
                Box::new(scraper),
                proxy.map(|p| Box::new(p) as Box<dyn RedditFetcher>),
            )))
        }
        (None, Some(proxy)) => {
            info!("using decodo residential proxy");
            Ok(Box::new(proxy))
        }
        (None, None) => {
            info!("no decodo credentials, fetching reddit directly");
            Ok(Box::new(DirectRedditFetcher::new(&config.user_agent, config.timeout)?))
        }
    }
}
