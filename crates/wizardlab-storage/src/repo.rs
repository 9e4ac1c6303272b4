//! Store traits shared by the Postgres repository and the in-memory test store.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;
use wizardlab_core::{
    AdminUserRow, EtfHolding, MixEvent, NewSocialEngage, RiskFlags, SocialEngageRow, SocialStatus,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("could not decode column {column}: {message}")]
    Decode { column: &'static str, message: String },
}

/// Everything one enrichment attempt writes back.
///
/// Hydrated fields (`title` through `permalink`) left as `None` keep whatever
/// the row already holds. AI fields are written as given.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnrichmentUpdate {
    pub status: Option<SocialStatus>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub author_handle: Option<String>,
    pub channel: Option<String>,
    pub external_post_id: Option<String>,
    pub permalink: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub ai_should_reply: Option<bool>,
    pub ai_reply_draft: Option<String>,
    pub ai_category: Option<String>,
    pub ai_priority: Option<String>,
    pub ai_reason: Option<String>,
    pub ai_post_summary: Option<String>,
    pub ai_risk_flags: Option<RiskFlags>,
    pub ai_parse_ok: Option<bool>,
    pub extra: JsonValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingCandidate {
    pub id: Uuid,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SocialCounters {
    pub total_rows: i64,
    pub total_unique_posts: i64,
    pub pending_count: i64,
    pub ready_count: i64,
    pub posted_count: i64,
    pub ai_should_reply_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyMetric {
    pub bucket_date: NaiveDate,
    pub status: SocialStatus,
    pub total_count: i64,
    pub ready_count: i64,
    pub posted_count: i64,
    pub should_reply_count: i64,
}

#[async_trait]
pub trait SocialEngageStore: Send + Sync {
    async fn find_by_permalink(
        &self,
        platform: &str,
        permalink: &str,
    ) -> Result<Option<SocialEngageRow>, StoreError>;

    async fn insert_pending(&self, row: NewSocialEngage) -> Result<SocialEngageRow, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<SocialEngageRow>, StoreError>;

    /// Oldest first.
    async fn fetch_pending(&self, platform: &str, limit: usize) -> Result<Vec<SocialEngageRow>, StoreError>;

    /// Applies only while the row is still `pending`; `false` means someone else moved it.
    async fn save_enrichment(&self, id: Uuid, update: &EnrichmentUpdate) -> Result<bool, StoreError>;

    /// Returns `false` when the row is missing or already posted.
    async fn set_status(&self, id: Uuid, status: SocialStatus) -> Result<bool, StoreError>;

    /// Returns `false` when the row is missing or already posted.
    async fn mark_posted(&self, id: Uuid, posted_by: &str, at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Rows by the same author on the same platform with a stored embedding.
    async fn semantic_candidates(
        &self,
        platform: &str,
        author_handle: &str,
        exclude_id: Uuid,
    ) -> Result<Vec<EmbeddingCandidate>, StoreError>;

    async fn list_recent(
        &self,
        status: Option<SocialStatus>,
        limit: usize,
    ) -> Result<Vec<SocialEngageRow>, StoreError>;

    async fn counters(&self) -> Result<SocialCounters, StoreError>;

    async fn daily_metrics(&self) -> Result<Vec<DailyMetric>, StoreError>;
}

#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    async fn count_mix_events(&self, since: Option<DateTime<Utc>>) -> Result<i64, StoreError>;

    /// Newest first.
    async fn mix_events(
        &self,
        since: Option<DateTime<Utc>>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MixEvent>, StoreError>;

    /// Case-insensitive prefix filters, ETF ascending then weight descending.
    async fn etf_holdings(
        &self,
        etf_prefix: Option<&str>,
        holding_prefix: Option<&str>,
        limit: usize,
    ) -> Result<Vec<EtfHolding>, StoreError>;

    async fn recent_users(&self, limit: usize) -> Result<Vec<AdminUserRow>, StoreError>;

    async fn count_users(&self) -> Result<i64, StoreError>;
}

pub const MIX_EVENT_PAGE_SIZE: usize = 1000;
pub const MIX_EVENT_MAX_PAGES: usize = 20;

/// Pages through the mix events of a window, stopping at a short page or the page cap.
pub async fn collect_mix_events(
    store: &dyn AnalyticsStore,
    since: Option<DateTime<Utc>>,
) -> Result<Vec<MixEvent>, StoreError> {
    let mut out = Vec::new();
    for page in 0..MIX_EVENT_MAX_PAGES {
        let batch = store
            .mix_events(since, MIX_EVENT_PAGE_SIZE, page * MIX_EVENT_PAGE_SIZE)
            .await?;
        let short = batch.len() < MIX_EVENT_PAGE_SIZE;
        out.extend(batch);
        if short {
            break;
        }
    }
    Ok(out)
}

/// Cosine similarity of two vectors; `None` for mismatched lengths or zero norms.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0f64, 0f64, 0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a.sqrt() * norm_b.sqrt()))
}
