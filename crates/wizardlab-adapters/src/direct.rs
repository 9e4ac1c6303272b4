//! Public Reddit endpoints without a proxy: `.json` first, page metadata when blocked.

use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};
use serde_json::{json, Value as JsonValue};
use tracing::warn;
use wizardlab_core::reddit_url::{extract_reddit_post_id, reddit_json_url, subreddit_from_url};
use wizardlab_storage::{HttpClientConfig, HttpFetcher, HttpRequest};

use crate::post::{html_to_text, normalize_post, post_from_listing, RedditPost};
use crate::{AdapterError, RedditFetcher};

pub struct DirectRedditFetcher {
    http: HttpFetcher,
}

impl DirectRedditFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, AdapterError> {
        let http = HttpFetcher::new(HttpClientConfig {
            timeout,
            user_agent: Some(user_agent.to_string()),
            ..Default::default()
        })?;
        Ok(Self { http })
    }

    async fn fetch_html(&self, post_url: &str) -> Result<RedditPost, AdapterError> {
        let request = HttpRequest::get(post_url).header(
            "accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        );
        let response = match self.http.execute(&request).await {
            Ok(response) => response,
            Err(err) if matches!(err.status(), Some(403 | 404)) => {
                return Err(AdapterError::NotAccessible {
                    status: err.status().unwrap_or_default(),
                    url: post_url.to_string(),
                })
            }
            Err(err) => return Err(err.into()),
        };
        post_from_html(&response.text(), post_url)
    }
}

fn selector(css: &str) -> Result<Selector, AdapterError> {
    Selector::parse(css).map_err(|e| AdapterError::Message(e.to_string()))
}

fn first_attr(document: &Html, css: &str, attr: &str) -> Result<Option<String>, AdapterError> {
    let sel = selector(css)?;
    Ok(document
        .select(&sel)
        .filter_map(|n| n.value().attr(attr))
        .map(html_to_text)
        .find(|s| !s.is_empty()))
}

fn first_text(document: &Html, css: &str) -> Result<Option<String>, AdapterError> {
    let sel = selector(css)?;
    Ok(document
        .select(&sel)
        .map(|n| n.text().collect::<Vec<_>>().join(" "))
        .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
        .find(|s| !s.is_empty()))
}

/// Title and body from page metadata, for when the JSON endpoint is blocked.
pub fn post_from_html(html: &str, post_url: &str) -> Result<RedditPost, AdapterError> {
    let document = Html::parse_document(html);

    let mut title = None;
    for (css, attr) in [
        (r#"meta[property="og:title"]"#, Some("content")),
        (r#"meta[name="twitter:title"]"#, Some("content")),
        ("title", None),
        ("h1", None),
    ] {
        title = match attr {
            Some(attr) => first_attr(&document, css, attr)?,
            None => first_text(&document, css)?,
        };
        if title.is_some() {
            break;
        }
    }
    let title = title.ok_or_else(|| {
        AdapterError::UnexpectedShape(format!("could not extract a title from {post_url}"))
    })?;

    let mut body = None;
    for (css, attr) in [
        (r#"meta[property="og:description"]"#, Some("content")),
        (r#"meta[name="description"]"#, Some("content")),
        (r#"div[data-click-id="text"]"#, None),
    ] {
        body = match attr {
            Some(attr) => first_attr(&document, css, attr)?,
            None => first_text(&document, css)?,
        };
        if body.is_some() {
            break;
        }
    }

    let raw = json!({
        "title": title,
        "subreddit": subreddit_from_url(post_url),
        "id": extract_reddit_post_id(post_url),
        "post_url": post_url,
        "content_html": body,
    });
    let object = raw.as_object().cloned().unwrap_or_default();
    Ok(normalize_post(&object, post_url))
}

#[async_trait]
impl RedditFetcher for DirectRedditFetcher {
    fn name(&self) -> &'static str {
        "direct"
    }

    async fn fetch_post(&self, post_url: &str) -> Result<RedditPost, AdapterError> {
        let json_url = reddit_json_url(post_url)
            .ok_or_else(|| AdapterError::Unsupported(post_url.to_string()))?;

        match self.http.execute(&HttpRequest::get(json_url)).await {
            Ok(response) => {
                let payload: JsonValue = response.json().map_err(|err| {
                    AdapterError::UnexpectedShape(format!("invalid Reddit JSON: {err}"))
                })?;
                let post = post_from_listing(&payload).ok_or_else(|| {
                    AdapterError::UnexpectedShape("unexpected Reddit response structure".into())
                })?;
                Ok(normalize_post(&post, post_url))
            }
            Err(err) if matches!(err.status(), Some(403 | 404)) => {
                warn!(status = err.status(), post_url, "reddit json blocked, reading page metadata");
                self.fetch_html(post_url).await
            }
            Err(err) => Err(err.into()),
        }
    }
}
