//! In-memory store for tests of the pipeline and web layers.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;
use wizardlab_core::{
    AdminUserRow, EtfHolding, MixEvent, NewSocialEngage, SocialEngageRow, SocialStatus,
};

use crate::repo::{
    AnalyticsStore, DailyMetric, EmbeddingCandidate, EnrichmentUpdate, SocialCounters,
    SocialEngageStore, StoreError,
};

#[derive(Debug, Default)]
struct MemoryState {
    engage: Vec<SocialEngageRow>,
    mix_events: Vec<MixEvent>,
    holdings: Vec<EtfHolding>,
    users: Vec<AdminUserRow>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push_row(&self, row: SocialEngageRow) {
        self.state.lock().await.engage.push(row);
    }

    pub async fn push_mix_event(&self, event: MixEvent) {
        self.state.lock().await.mix_events.push(event);
    }

    pub async fn push_holding(&self, holding: EtfHolding) {
        self.state.lock().await.holdings.push(holding);
    }

    pub async fn push_user(&self, id: Uuid, created_at: DateTime<Utc>, email: Option<&str>) {
        let row = AdminUserRow::from_email(id, created_at, email);
        self.state.lock().await.users.push(row);
    }

    pub async fn rows(&self) -> Vec<SocialEngageRow> {
        self.state.lock().await.engage.clone()
    }
}

/// Blank `SocialEngageRow` in `pending`, handy for seeding tests.
pub fn blank_row(platform: &str, permalink: &str) -> SocialEngageRow {
    SocialEngageRow {
        id: Uuid::new_v4(),
        created_at: Utc::now(),
        updated_at: None,
        platform: platform.to_string(),
        external_post_id: None,
        permalink: Some(permalink.to_string()),
        raw_source_url: Some(permalink.to_string()),
        author_handle: None,
        channel: None,
        title: None,
        body: None,
        status: SocialStatus::Pending,
        source: None,
        ai_should_reply: None,
        ai_reply_draft: None,
        ai_category: None,
        ai_priority: None,
        ai_reason: None,
        ai_post_summary: None,
        ai_risk_flags: None,
        ai_parse_ok: None,
        posted_at: None,
        posted_by: None,
        extra: serde_json::json!({}),
        embedding: None,
    }
}

fn starts_with_ci(value: Option<&str>, prefix: Option<&str>) -> bool {
    match prefix {
        None => true,
        Some(prefix) => value.is_some_and(|v| v.to_uppercase().starts_with(&prefix.to_uppercase())),
    }
}

#[async_trait]
impl SocialEngageStore for MemoryStore {
    async fn find_by_permalink(
        &self,
        platform: &str,
        permalink: &str,
    ) -> Result<Option<SocialEngageRow>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .engage
            .iter()
            .find(|r| r.platform == platform && r.permalink.as_deref() == Some(permalink))
            .cloned())
    }

    async fn insert_pending(&self, row: NewSocialEngage) -> Result<SocialEngageRow, StoreError> {
        let mut inserted = blank_row(&row.platform, &row.permalink);
        inserted.raw_source_url = Some(row.raw_source_url);
        inserted.external_post_id = row.external_post_id;
        inserted.source = row.source;
        inserted.title = row.title;
        inserted.body = row.body;
        inserted.extra = row.extra;
        self.state.lock().await.engage.push(inserted.clone());
        Ok(inserted)
    }

    async fn get(&self, id: Uuid) -> Result<Option<SocialEngageRow>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.engage.iter().find(|r| r.id == id).cloned())
    }

    async fn fetch_pending(&self, platform: &str, limit: usize) -> Result<Vec<SocialEngageRow>, StoreError> {
        let state = self.state.lock().await;
        let mut rows = state
            .engage
            .iter()
            .filter(|r| r.status == SocialStatus::Pending && r.platform == platform)
            .cloned()
            .collect::<Vec<_>>();
        rows.sort_by_key(|r| r.created_at);
        rows.truncate(limit);
        Ok(rows)
    }

    async fn save_enrichment(&self, id: Uuid, update: &EnrichmentUpdate) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let Some(row) = state
            .engage
            .iter_mut()
            .find(|r| r.id == id && r.status == SocialStatus::Pending)
        else {
            return Ok(false);
        };
        if let Some(status) = update.status {
            row.status = status;
        }
        fn keep_or_set(slot: &mut Option<String>, value: &Option<String>) {
            if value.is_some() {
                slot.clone_from(value);
            }
        }
        keep_or_set(&mut row.title, &update.title);
        keep_or_set(&mut row.body, &update.body);
        keep_or_set(&mut row.author_handle, &update.author_handle);
        keep_or_set(&mut row.channel, &update.channel);
        keep_or_set(&mut row.external_post_id, &update.external_post_id);
        keep_or_set(&mut row.permalink, &update.permalink);
        if update.embedding.is_some() {
            row.embedding.clone_from(&update.embedding);
        }
        row.ai_should_reply = update.ai_should_reply;
        row.ai_reply_draft.clone_from(&update.ai_reply_draft);
        row.ai_category.clone_from(&update.ai_category);
        row.ai_priority.clone_from(&update.ai_priority);
        row.ai_reason.clone_from(&update.ai_reason);
        row.ai_post_summary.clone_from(&update.ai_post_summary);
        row.ai_risk_flags = update.ai_risk_flags;
        row.ai_parse_ok = update.ai_parse_ok;
        row.extra = update.extra.clone();
        row.updated_at = Some(Utc::now());
        Ok(true)
    }

    async fn set_status(&self, id: Uuid, status: SocialStatus) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        match state
            .engage
            .iter_mut()
            .find(|r| r.id == id && r.status != SocialStatus::Posted)
        {
            Some(row) => {
                row.status = status;
                row.updated_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_posted(&self, id: Uuid, posted_by: &str, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        match state
            .engage
            .iter_mut()
            .find(|r| r.id == id && r.status != SocialStatus::Posted)
        {
            Some(row) => {
                row.status = SocialStatus::Posted;
                row.posted_at = Some(at);
                row.posted_by = Some(posted_by.to_string());
                row.updated_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn semantic_candidates(
        &self,
        platform: &str,
        author_handle: &str,
        exclude_id: Uuid,
    ) -> Result<Vec<EmbeddingCandidate>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .engage
            .iter()
            .filter(|r| {
                r.id != exclude_id
                    && r.platform == platform
                    && r.author_handle.as_deref() == Some(author_handle)
            })
            .filter_map(|r| {
                r.embedding.clone().map(|embedding| EmbeddingCandidate { id: r.id, embedding })
            })
            .collect())
    }

    async fn list_recent(
        &self,
        status: Option<SocialStatus>,
        limit: usize,
    ) -> Result<Vec<SocialEngageRow>, StoreError> {
        let state = self.state.lock().await;
        let mut rows = state
            .engage
            .iter()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect::<Vec<_>>();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn counters(&self) -> Result<SocialCounters, StoreError> {
        let state = self.state.lock().await;
        let count = |status: SocialStatus| state.engage.iter().filter(|r| r.status == status).count() as i64;
        let unique = state
            .engage
            .iter()
            .filter_map(|r| r.permalink.as_deref().or(r.raw_source_url.as_deref()))
            .collect::<HashSet<_>>()
            .len();
        Ok(SocialCounters {
            total_rows: state.engage.len() as i64,
            total_unique_posts: unique as i64,
            pending_count: count(SocialStatus::Pending),
            ready_count: count(SocialStatus::Ready),
            posted_count: count(SocialStatus::Posted),
            ai_should_reply_count: state
                .engage
                .iter()
                .filter(|r| r.ai_should_reply == Some(true))
                .count() as i64,
        })
    }

    async fn daily_metrics(&self) -> Result<Vec<DailyMetric>, StoreError> {
        let state = self.state.lock().await;
        let mut grouped: BTreeMap<(chrono::NaiveDate, &'static str), DailyMetric> = BTreeMap::new();
        for row in &state.engage {
            let date = row.created_at.date_naive();
            let metric = grouped
                .entry((date, row.status.as_str()))
                .or_insert_with(|| DailyMetric {
                    bucket_date: date,
                    status: row.status,
                    total_count: 0,
                    ready_count: 0,
                    posted_count: 0,
                    should_reply_count: 0,
                });
            metric.total_count += 1;
            metric.ready_count += i64::from(row.status == SocialStatus::Ready);
            metric.posted_count += i64::from(row.status == SocialStatus::Posted);
            metric.should_reply_count += i64::from(row.ai_should_reply == Some(true));
        }
        let mut out = grouped.into_values().collect::<Vec<_>>();
        out.sort_by(|a, b| {
            b.bucket_date
                .cmp(&a.bucket_date)
                .then_with(|| a.status.as_str().cmp(b.status.as_str()))
        });
        Ok(out)
    }
}

#[async_trait]
impl AnalyticsStore for MemoryStore {
    async fn count_mix_events(&self, since: Option<DateTime<Utc>>) -> Result<i64, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .mix_events
            .iter()
            .filter(|e| since.map_or(true, |s| e.created_at >= s))
            .count() as i64)
    }

    async fn mix_events(
        &self,
        since: Option<DateTime<Utc>>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MixEvent>, StoreError> {
        let state = self.state.lock().await;
        let mut events = state
            .mix_events
            .iter()
            .filter(|e| since.map_or(true, |s| e.created_at >= s))
            .cloned()
            .collect::<Vec<_>>();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(events.into_iter().skip(offset).take(limit).collect())
    }

    async fn etf_holdings(
        &self,
        etf_prefix: Option<&str>,
        holding_prefix: Option<&str>,
        limit: usize,
    ) -> Result<Vec<EtfHolding>, StoreError> {
        let state = self.state.lock().await;
        let mut rows = state
            .holdings
            .iter()
            .filter(|h| starts_with_ci(Some(&h.etf_symbol), etf_prefix))
            .filter(|h| starts_with_ci(h.holding_symbol.as_deref(), holding_prefix))
            .cloned()
            .collect::<Vec<_>>();
        rows.sort_by(|a, b| {
            a.etf_symbol.cmp(&b.etf_symbol).then_with(|| {
                let wa = a.weight_pct.unwrap_or(f64::NEG_INFINITY);
                let wb = b.weight_pct.unwrap_or(f64::NEG_INFINITY);
                wb.total_cmp(&wa)
            })
        });
        rows.truncate(limit);
        Ok(rows)
    }

    async fn recent_users(&self, limit: usize) -> Result<Vec<AdminUserRow>, StoreError> {
        let state = self.state.lock().await;
        let mut rows = state.users.clone();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn count_users(&self) -> Result<i64, StoreError> {
        Ok(self.state.lock().await.users.len() as i64)
    }
}
