//! Webhook/manual ingest payload normalization.
//!
//! Accepted shape is `{ platform, url, source?, external_id?, ... }`; every other
//! key is carried into `extra` so downstream code stays platform-agnostic.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;
use url::Url;

use crate::reddit_url::normalize_reddit_post_url;
use crate::PLATFORM_REDDIT;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedIngestPayload {
    pub platform: String,
    pub raw_source_url: String,
    pub permalink: String,
    pub source: Option<String>,
    pub external_id: Option<String>,
    pub extra: Map<String, JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("Payload must be a JSON object.")]
    NotAnObject,
    #[error("Missing or invalid {0}.")]
    MissingField(&'static str),
    #[error("Malformed {0}.")]
    Malformed(&'static str),
}

fn required_string(value: Option<&JsonValue>, field: &'static str) -> Result<String, PayloadError> {
    match value {
        Some(JsonValue::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        _ => Err(PayloadError::MissingField(field)),
    }
}

fn optional_string(value: Option<&JsonValue>) -> Option<String> {
    match value {
        Some(JsonValue::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

pub fn normalize_ingest_payload(payload: &JsonValue) -> Result<NormalizedIngestPayload, PayloadError> {
    let object = payload.as_object().ok_or(PayloadError::NotAnObject)?;

    let platform = required_string(object.get("platform"), "platform")?.to_ascii_lowercase();
    let raw_url = required_string(object.get("url"), "url")?;
    Url::parse(&raw_url).map_err(|_| PayloadError::Malformed("url"))?;

    let permalink = if platform == PLATFORM_REDDIT {
        normalize_reddit_post_url(&raw_url).unwrap_or_else(|| raw_url.clone())
    } else {
        raw_url.clone()
    };

    let extra = object
        .iter()
        .filter(|(key, _)| !matches!(key.as_str(), "platform" | "url" | "source" | "external_id"))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    Ok(NormalizedIngestPayload {
        platform,
        raw_source_url: raw_url,
        permalink,
        source: optional_string(object.get("source")),
        external_id: optional_string(object.get("external_id")),
        extra,
    })
}
