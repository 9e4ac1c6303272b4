//! `social_engage` rows and the AI decision fields stored on them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

use crate::payload::NormalizedIngestPayload;
use crate::status::SocialStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocialEngageRow {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub platform: String,
    pub external_post_id: Option<String>,
    pub permalink: Option<String>,
    pub raw_source_url: Option<String>,
    pub author_handle: Option<String>,
    pub channel: Option<String>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub status: SocialStatus,
    pub source: Option<String>,
    pub ai_should_reply: Option<bool>,
    pub ai_reply_draft: Option<String>,
    pub ai_category: Option<String>,
    pub ai_priority: Option<String>,
    pub ai_reason: Option<String>,
    pub ai_post_summary: Option<String>,
    pub ai_risk_flags: Option<RiskFlags>,
    pub ai_parse_ok: Option<bool>,
    pub posted_at: Option<DateTime<Utc>>,
    pub posted_by: Option<String>,
    pub extra: JsonValue,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
}

impl SocialEngageRow {
    /// String field from `extra`, trimmed; `None` when absent or blank.
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra
            .get(key)
            .and_then(JsonValue::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .or(self.permalink.as_deref())
            .unwrap_or("(untitled)")
    }
}

/// Insert shape for a freshly ingested row; always lands in `pending`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSocialEngage {
    pub platform: String,
    pub permalink: String,
    pub raw_source_url: String,
    pub external_post_id: Option<String>,
    pub source: Option<String>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub extra: JsonValue,
}

impl From<NormalizedIngestPayload> for NewSocialEngage {
    fn from(payload: NormalizedIngestPayload) -> Self {
        Self {
            platform: payload.platform,
            permalink: payload.permalink,
            raw_source_url: payload.raw_source_url,
            external_post_id: payload.external_id,
            source: payload.source,
            title: None,
            body: None,
            extra: JsonValue::Object(payload.extra),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RiskFlags {
    pub is_personal_advice: bool,
    pub mentions_leverage: bool,
    pub mentions_options: bool,
    pub mentions_crypto: bool,
}

impl RiskFlags {
    pub fn any(&self) -> bool {
        self.is_personal_advice || self.mentions_leverage || self.mentions_options || self.mentions_crypto
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyCategory {
    PortfolioConstruction,
    EtfSelection,
    AssetAllocation,
    StockPicking,
    OffTopic,
    Other,
}

impl ReplyCategory {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "portfolio_construction" => Some(Self::PortfolioConstruction),
            "etf_selection" => Some(Self::EtfSelection),
            "asset_allocation" => Some(Self::AssetAllocation),
            "stock_picking" => Some(Self::StockPicking),
            "off_topic" => Some(Self::OffTopic),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PortfolioConstruction => "portfolio_construction",
            Self::EtfSelection => "etf_selection",
            Self::AssetAllocation => "asset_allocation",
            Self::StockPicking => "stock_picking",
            Self::OffTopic => "off_topic",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyPriority {
    Low,
    Medium,
    High,
}

impl ReplyPriority {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Bookkeeping written to `extra.ai_metadata` after every enrichment attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiMetadata {
    pub last_run_at: DateTime<Utc>,
    pub status: SocialStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ocr_fragments: Vec<String>,
}

impl AiMetadata {
    pub fn new(status: SocialStatus) -> Self {
        Self {
            last_run_at: Utc::now(),
            status,
            note: None,
            ocr_fragments: Vec::new(),
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Returns `extra` as an object (anything else is replaced) with `key` set.
pub fn merge_extra(extra: &JsonValue, key: &str, value: JsonValue) -> JsonValue {
    let mut object = match extra {
        JsonValue::Object(map) => map.clone(),
        _ => Map::new(),
    };
    object.insert(key.to_string(), value);
    JsonValue::Object(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_extra_preserves_existing_keys_and_repairs_non_objects() {
        let merged = merge_extra(&json!({"f5bot_subject": "hi"}), "ai_metadata", json!({"status": "ready"}));
        assert_eq!(merged["f5bot_subject"], "hi");
        assert_eq!(merged["ai_metadata"]["status"], "ready");

        let repaired = merge_extra(&json!([1, 2]), "k", json!(true));
        assert_eq!(repaired, json!({"k": true}));
    }

    #[test]
    fn category_and_priority_parse_loosely() {
        assert_eq!(ReplyCategory::parse(" ETF_Selection "), Some(ReplyCategory::EtfSelection));
        assert_eq!(ReplyCategory::parse("memes"), None);
        assert_eq!(ReplyPriority::parse("HIGH"), Some(ReplyPriority::High));
        assert!(ReplyPriority::High > ReplyPriority::Low);
    }

    #[test]
    fn ai_metadata_omits_empty_fields() {
        let meta = AiMetadata::new(SocialStatus::Error).with_note("Missing permalink");
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["note"], "Missing permalink");
        assert!(value.get("ocr_fragments").is_none());
    }
}
