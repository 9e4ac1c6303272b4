//! Pure Reddit URL handling shared by payload normalization and the fetchers.

use url::Url;

pub const REDDIT_BASE: &str = "https://www.reddit.com";

/// Hosts we accept as Reddit links (`reddit.com`, any subdomain, and the `redd.it` shortener).
pub fn is_allowed_host(host: &str) -> bool {
    let lower = host.to_ascii_lowercase();
    lower == "reddit.com" || lower.ends_with(".reddit.com") || is_short_host(&lower)
}

fn is_short_host(lower: &str) -> bool {
    lower == "redd.it" || lower == "www.redd.it"
}

fn path_segments(url: &Url) -> Vec<String> {
    url.path()
        .split('/')
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn canonical_from_parts(parts: &[&str]) -> String {
    format!("{REDDIT_BASE}/{}/", parts.join("/"))
}

/// Canonical `https://www.reddit.com/.../` form of a post URL.
///
/// Comment permalinks and `/c/` share suffixes collapse to the parent post;
/// query strings and fragments are dropped.
pub fn normalize_reddit_post_url(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    let host = url.host_str()?.to_ascii_lowercase();
    let segments = path_segments(&url);

    if is_short_host(&host) {
        let post_id = segments.first()?;
        return Some(canonical_from_parts(&["comments", post_id]));
    }
    if !is_allowed_host(&host) {
        return None;
    }

    let cut = segments
        .iter()
        .position(|s| s == "c")
        .unwrap_or(segments.len());
    let segments = &segments[..cut];

    match segments {
        [r, sub, comments, post_id, rest @ ..]
            if r.eq_ignore_ascii_case("r") && comments.eq_ignore_ascii_case("comments") =>
        {
            let mut parts = vec!["r", sub.as_str(), "comments", post_id.as_str()];
            if let Some(slug) = rest.first() {
                parts.push(slug.as_str());
            }
            Some(canonical_from_parts(&parts))
        }
        [comments, post_id, rest @ ..] if comments.eq_ignore_ascii_case("comments") => {
            let mut parts = vec!["comments", post_id.as_str()];
            if let Some(slug) = rest.first() {
                parts.push(slug.as_str());
            }
            Some(canonical_from_parts(&parts))
        }
        _ => None,
    }
}

/// Post id from a post URL. Links that point at a specific comment yield `None`.
pub fn extract_reddit_post_id(permalink: &str) -> Option<String> {
    let url = Url::parse(permalink.trim()).ok()?;
    let host = url.host_str()?.to_ascii_lowercase();
    if !matches!(
        host.as_str(),
        "reddit.com" | "www.reddit.com" | "old.reddit.com" | "redd.it" | "www.redd.it"
    ) {
        return None;
    }
    let segments = path_segments(&url);

    if is_short_host(&host) {
        return segments.first().cloned();
    }

    match segments.as_slice() {
        [r, _, comments, post_id, ..] if r == "r" && comments == "comments" => {
            (segments.len() < 6).then(|| post_id.clone())
        }
        [comments, post_id, ..] if comments == "comments" => {
            (segments.len() < 4).then(|| post_id.clone())
        }
        _ => None,
    }
}

/// Subreddit name embedded in a `/r/<sub>/...` URL.
pub fn subreddit_from_url(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    match path_segments(&url).as_slice() {
        [r, sub, ..] if r.eq_ignore_ascii_case("r") => Some(sub.clone()),
        _ => None,
    }
}

/// Public JSON endpoint for a post: path with `.json` appended, query and fragment removed.
pub fn reddit_json_url(post_url: &str) -> Option<String> {
    let mut url = Url::parse(post_url.trim()).ok()?;
    let path = url.path().trim_end_matches('/').to_string();
    if !path.ends_with(".json") {
        url.set_path(&format!("{path}.json"));
    }
    url.set_query(None);
    url.set_fragment(None);
    Some(url.to_string())
}

/// Absolute URL for a Reddit `permalink` field, which is usually site-relative.
pub fn absolutize_permalink(permalink: &str) -> Option<String> {
    let trimmed = permalink.trim();
    if trimmed.is_empty() {
        return None;
    }
    let base = Url::parse(REDDIT_BASE).ok()?;
    let joined = base.join(trimmed).ok()?;
    let mut out = joined.to_string();
    if !out.ends_with('/') {
        out.push('/');
    }
    Some(out)
}
