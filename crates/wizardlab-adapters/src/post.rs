//! Normalized Reddit post shape and the JSON/HTML helpers that build it.

use chrono::{DateTime, TimeZone, Utc};
use scraper::Html;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use wizardlab_core::reddit_url::absolutize_permalink;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedditComment {
    pub author: String,
    pub content_html: Option<String>,
    pub karma: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedditPost {
    pub title: String,
    pub subreddit: String,
    pub author: String,
    pub post_url: String,
    pub content_html: Option<String>,
    /// Plain text derived from `content_html`.
    pub body_text: String,
    pub karma: Option<i64>,
    pub external_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub comments: Vec<RedditComment>,
    pub images: Vec<String>,
}

impl RedditPost {
    pub fn is_empty(&self) -> bool {
        self.title.trim().is_empty() && self.body_text.trim().is_empty()
    }
}

pub(crate) fn ensure_string(value: Option<&JsonValue>) -> String {
    match value {
        Some(JsonValue::String(s)) => s.trim().to_string(),
        Some(JsonValue::Number(n)) => n.to_string(),
        Some(JsonValue::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

fn ensure_number(value: Option<&JsonValue>) -> Option<i64> {
    match value? {
        JsonValue::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        JsonValue::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64),
        _ => None,
    }
}

fn first_present<'a>(raw: &'a Map<String, JsonValue>, keys: &[&str]) -> Option<&'a JsonValue> {
    keys.iter()
        .filter_map(|key| raw.get(*key))
        .find(|value| !value.is_null())
}

fn non_empty(value: String) -> Option<String> {
    (!value.trim().is_empty()).then(|| value.trim().to_string())
}

/// Decodes the handful of entities Reddit escapes inside JSON string fields.
pub fn unescape_entities(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

fn fragment_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    fragment
        .root_element()
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Plain text for an HTML body. Handles Reddit's double-escaped `selftext_html`.
pub fn html_to_text(html: &str) -> String {
    let once = fragment_text(html);
    if once.contains('<') && once.contains('>') {
        fragment_text(&once)
    } else {
        once
    }
}

fn looks_like_image(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
    [".jpg", ".jpeg", ".png", ".gif", ".webp"]
        .iter()
        .any(|ext| path.ends_with(ext))
        || path.starts_with("https://i.redd.it/")
}

fn push_unique(out: &mut Vec<String>, raw: &str) {
    let url = unescape_entities(raw.trim());
    if !url.is_empty() && !out.contains(&url) {
        out.push(url);
    }
}

fn media_source_url(entry: &JsonValue) -> Option<&str> {
    let source = entry.get("s")?;
    source
        .get("u")
        .and_then(JsonValue::as_str)
        .or_else(|| source.get("gif").and_then(JsonValue::as_str))
        .or_else(|| source.pointer("/gif/u").and_then(JsonValue::as_str))
}

/// Image URLs from a Reddit post object: gallery media, the link target, then previews.
pub fn extract_image_urls(post: &JsonValue) -> Vec<String> {
    let mut out = Vec::new();

    if let Some(metadata) = post.get("media_metadata").and_then(JsonValue::as_object) {
        let gallery_ids = post
            .pointer("/gallery_data/items")
            .and_then(JsonValue::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get("media_id").and_then(JsonValue::as_str))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        if gallery_ids.is_empty() {
            for entry in metadata.values() {
                if let Some(url) = media_source_url(entry) {
                    push_unique(&mut out, url);
                }
            }
        } else {
            for id in gallery_ids {
                if let Some(url) = metadata.get(id).and_then(media_source_url) {
                    push_unique(&mut out, url);
                }
            }
        }
    }

    if let Some(url) = post.get("url_overridden_by_dest").and_then(JsonValue::as_str) {
        if looks_like_image(url) {
            push_unique(&mut out, url);
        }
    }

    if let Some(images) = post.pointer("/preview/images").and_then(JsonValue::as_array) {
        for image in images {
            if let Some(url) = image.pointer("/source/url").and_then(JsonValue::as_str) {
                push_unique(&mut out, url);
            }
        }
    }

    out
}

fn normalize_comments(raw: Option<&JsonValue>) -> Vec<RedditComment> {
    let Some(JsonValue::Array(items)) = raw else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(JsonValue::as_object)
        .map(|c| RedditComment {
            author: ensure_string(c.get("author")),
            content_html: non_empty(ensure_string(first_present(
                c,
                &["content_html", "body_html", "selftext_html", "selftext", "body"],
            ))),
            karma: ensure_number(first_present(c, &["ups", "score"])),
        })
        .filter(|c| !c.author.is_empty())
        .collect()
}

fn created_from_epoch(value: Option<&JsonValue>) -> Option<DateTime<Utc>> {
    let secs = value?.as_f64()?;
    Utc.timestamp_opt(secs as i64, 0).single()
}

/// Builds a `RedditPost` from any of the object shapes the fetchers see.
pub fn normalize_post(raw: &Map<String, JsonValue>, fallback_url: &str) -> RedditPost {
    let post_url = non_empty(ensure_string(first_present(raw, &["post_url"])))
        .or_else(|| {
            raw.get("permalink")
                .and_then(JsonValue::as_str)
                .and_then(absolutize_permalink)
        })
        .or_else(|| non_empty(ensure_string(raw.get("url"))))
        .unwrap_or_else(|| fallback_url.to_string());

    let content_html = non_empty(ensure_string(first_present(
        raw,
        &["content_html", "body", "selftext_html", "selftext"],
    )));
    let body_text = content_html.as_deref().map(html_to_text).unwrap_or_default();
    let raw_value = JsonValue::Object(raw.clone());

    RedditPost {
        title: unescape_entities(&ensure_string(raw.get("title"))),
        subreddit: ensure_string(raw.get("subreddit")),
        author: ensure_string(raw.get("author")),
        post_url,
        content_html,
        body_text,
        karma: ensure_number(first_present(raw, &["karma", "score", "upvotes", "ups"])),
        external_id: non_empty(ensure_string(raw.get("id"))),
        created_at: created_from_epoch(raw.get("created_utc")),
        comments: normalize_comments(raw.get("comments")),
        images: extract_image_urls(&raw_value),
    }
}

/// Post object inside a Reddit `.json` listing pair, with the comment children folded in.
pub fn post_from_listing(payload: &JsonValue) -> Option<Map<String, JsonValue>> {
    let listings = payload.as_array().filter(|items| items.len() >= 2)?;
    let mut post = listings[0]
        .pointer("/data/children/0/data")
        .and_then(JsonValue::as_object)?
        .clone();

    let comments = listings[1]
        .pointer("/data/children")
        .and_then(JsonValue::as_array)
        .map(|children| {
            children
                .iter()
                .filter_map(|child| child.get("data").cloned())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    post.insert("comments".to_string(), JsonValue::Array(comments));
    Some(post)
}
