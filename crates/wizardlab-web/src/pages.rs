//! Server-rendered admin pages.

use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
    Form,
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;
use wizardlab_core::{
    build_etf_summary, compute_insight_data, compute_mix_insights, normalize_symbol_filter,
    summarize_positions, summary_boundaries, RangeOption, SocialEngageRow, SocialStatus, TopItem,
    PLATFORM_REDDIT,
};
use wizardlab_storage::collect_mix_events;

use crate::api::{ingest_payload, IngestFailure, IngestOutcome};
use crate::{render_html, server_error, AppState};

const MIX_TABLE_ROWS: usize = 200;
const HOLDINGS_ROWS: usize = 200;
const USERS_ROWS: usize = 500;
const SOCIAL_ROWS: usize = 100;
const MANUAL_SOURCE: &str = "manual";

fn fmt_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M UTC").to_string()
}

fn or_dash(value: Option<&str>) -> String {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("—")
        .to_string()
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate {
    total_rows: i64,
    ready_count: i64,
    pending_count: i64,
    mixes_today: i64,
    total_users: i64,
}

pub(crate) async fn index_handler(State(state): State<Arc<AppState>>) -> Response {
    let loaded = async {
        let counters = state.engage.counters().await?;
        let mixes_today = state
            .analytics
            .count_mix_events(Some(summary_boundaries(Utc::now())[0]))
            .await?;
        let total_users = state.analytics.count_users().await?;
        anyhow::Ok(IndexTemplate {
            total_rows: counters.total_rows,
            ready_count: counters.ready_count,
            pending_count: counters.pending_count,
            mixes_today,
            total_users,
        })
    }
    .await;
    match loaded {
        Ok(tpl) => render_html(tpl),
        Err(err) => server_error(err),
    }
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct MixEventsQuery {
    range: Option<String>,
}

struct StatCard {
    label: &'static str,
    count: i64,
}

struct RangeLink {
    value: &'static str,
    label: &'static str,
    active: bool,
}

struct MixEventView {
    created_at: String,
    source: String,
    template_key: String,
    benchmark_symbol: String,
    anon_id: String,
    positions: String,
}

#[derive(Template)]
#[template(path = "mix_events.html")]
struct MixEventsTemplate {
    stats: Vec<StatCard>,
    ranges: Vec<RangeLink>,
    range_total: usize,
    top_etfs: Vec<TopItem>,
    top_combinations: Vec<TopItem>,
    events: Vec<MixEventView>,
}

pub(crate) async fn mix_events_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MixEventsQuery>,
) -> Response {
    let range = RangeOption::parse(query.range.as_deref());
    let now = Utc::now();
    let loaded = async {
        let [today, two_days, three_days, week] = summary_boundaries(now);
        let mut stats = Vec::with_capacity(5);
        for (label, since) in [
            ("Today", Some(today)),
            ("Last 2 days", Some(two_days)),
            ("Last 3 days", Some(three_days)),
            ("Last 7 days", Some(week)),
            ("All time", None),
        ] {
            stats.push(StatCard { label, count: state.analytics.count_mix_events(since).await? });
        }

        let since = range.start(now);
        let in_range = collect_mix_events(state.analytics.as_ref(), since).await?;
        let insights = compute_mix_insights(&in_range, in_range.len());
        let events = in_range
            .iter()
            .take(MIX_TABLE_ROWS)
            .map(|e| MixEventView {
                created_at: fmt_time(e.created_at),
                source: or_dash(e.source.as_deref()),
                template_key: or_dash(e.template_key.as_deref()),
                benchmark_symbol: or_dash(e.benchmark_symbol.as_deref()),
                anon_id: or_dash(e.anon_id.as_deref()),
                positions: summarize_positions(&e.positions),
            })
            .collect();

        let ranges = [
            (RangeOption::Today, "Today"),
            (RangeOption::TwoDays, "Last 2 days"),
            (RangeOption::All, "All time"),
        ]
        .into_iter()
        .map(|(option, label)| RangeLink { value: option.as_str(), label, active: option == range })
        .collect();

        anyhow::Ok(MixEventsTemplate {
            stats,
            ranges,
            range_total: in_range.len(),
            top_etfs: insights.top_etfs,
            top_combinations: insights.top_combinations,
            events,
        })
    }
    .await;
    match loaded {
        Ok(tpl) => render_html(tpl),
        Err(err) => server_error(err),
    }
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct HoldingsQuery {
    etf_symbol: Option<String>,
    holding_symbol: Option<String>,
}

struct HoldingView {
    etf_symbol: String,
    holding_symbol: String,
    holding_name: String,
    weight: String,
    country: String,
    sector: String,
    asset_class: String,
    nav_date: String,
    provider: String,
}

struct EtfSummaryView {
    etf_symbol: String,
    holdings: usize,
    total_weight: String,
}

#[derive(Template)]
#[template(path = "etf_holdings.html")]
struct EtfHoldingsTemplate {
    etf_filter: String,
    holding_filter: String,
    summary: Vec<EtfSummaryView>,
    holdings: Vec<HoldingView>,
}

pub(crate) async fn etf_holdings_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HoldingsQuery>,
) -> Response {
    let etf_filter = normalize_symbol_filter(query.etf_symbol.as_deref());
    let holding_filter = normalize_symbol_filter(query.holding_symbol.as_deref());
    let rows = match state
        .analytics
        .etf_holdings(etf_filter.as_deref(), holding_filter.as_deref(), HOLDINGS_ROWS)
        .await
    {
        Ok(rows) => rows,
        Err(err) => return server_error(err.into()),
    };

    let summary = build_etf_summary(&rows)
        .into_iter()
        .map(|s| EtfSummaryView {
            etf_symbol: s.etf_symbol,
            holdings: s.holdings,
            total_weight: format!("{:.2}%", s.total_weight_pct),
        })
        .collect();
    let holdings = rows
        .into_iter()
        .map(|h| HoldingView {
            weight: h
                .weight_pct
                .filter(|w| w.is_finite())
                .map(|w| format!("{w:.2}%"))
                .unwrap_or_else(|| "—".into()),
            nav_date: h.nav_date.map(|d| d.to_string()).unwrap_or_else(|| "—".into()),
            holding_symbol: or_dash(h.holding_symbol.as_deref()),
            holding_name: or_dash(h.holding_name.as_deref()),
            country: or_dash(h.country.as_deref()),
            sector: or_dash(h.sector.as_deref()),
            asset_class: or_dash(h.asset_class.as_deref()),
            provider: or_dash(h.provider.as_deref()),
            etf_symbol: h.etf_symbol,
        })
        .collect();

    render_html(EtfHoldingsTemplate {
        etf_filter: etf_filter.unwrap_or_default(),
        holding_filter: holding_filter.unwrap_or_default(),
        summary,
        holdings,
    })
}

struct UserView {
    id: String,
    created_at: String,
    email_domain: String,
}

#[derive(Template)]
#[template(path = "users.html")]
struct UsersTemplate {
    total_users: i64,
    users: Vec<UserView>,
}

pub(crate) async fn users_handler(State(state): State<Arc<AppState>>) -> Response {
    let loaded = async {
        let total_users = state.analytics.count_users().await?;
        let users = state
            .analytics
            .recent_users(USERS_ROWS)
            .await?
            .into_iter()
            .map(|u| UserView {
                id: u.id.to_string(),
                created_at: fmt_time(u.created_at),
                email_domain: or_dash(u.email_domain.as_deref()),
            })
            .collect();
        anyhow::Ok(UsersTemplate { total_users, users })
    }
    .await;
    match loaded {
        Ok(tpl) => render_html(tpl),
        Err(err) => server_error(err),
    }
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct SocialMetricsQuery {
    status: Option<String>,
    notice: Option<String>,
}

struct StatusLink {
    value: &'static str,
    label: &'static str,
    active: bool,
}

struct DailyMetricView {
    date: String,
    status: &'static str,
    total: i64,
    ready: i64,
    posted: i64,
    should_reply: i64,
}

struct EngageRowView {
    id: String,
    created_at: String,
    status: &'static str,
    status_label: &'static str,
    title: String,
    url: String,
    author: String,
    channel: String,
    source: String,
    category: String,
    priority: String,
    should_reply: &'static str,
    reason: String,
    reply_draft: String,
    can_post: bool,
}

impl From<&SocialEngageRow> for EngageRowView {
    fn from(row: &SocialEngageRow) -> Self {
        Self {
            id: row.id.to_string(),
            created_at: fmt_time(row.created_at),
            status: row.status.as_str(),
            status_label: row.status.label(),
            title: row.display_title().to_string(),
            url: row
                .permalink
                .clone()
                .or_else(|| row.raw_source_url.clone())
                .unwrap_or_default(),
            author: or_dash(row.author_handle.as_deref()),
            channel: or_dash(row.channel.as_deref()),
            source: or_dash(row.source.as_deref()),
            category: or_dash(row.ai_category.as_deref()),
            priority: or_dash(row.ai_priority.as_deref()),
            should_reply: match row.ai_should_reply {
                Some(true) => "yes",
                Some(false) => "no",
                None => "—",
            },
            reason: row.ai_reason.clone().unwrap_or_default(),
            reply_draft: row.ai_reply_draft.clone().unwrap_or_default(),
            can_post: row.status.can_transition_to(SocialStatus::Posted),
        }
    }
}

#[derive(Template)]
#[template(path = "social_metrics.html")]
struct SocialMetricsTemplate {
    notice: String,
    total_rows: i64,
    total_unique_posts: i64,
    pending_count: i64,
    ready_count: i64,
    posted_count: i64,
    ai_should_reply_count: i64,
    filters: Vec<StatusLink>,
    daily: Vec<DailyMetricView>,
    rows: Vec<EngageRowView>,
}

fn notice_text(code: Option<&str>) -> String {
    match code {
        Some("queued") => "Post queued for enrichment.",
        Some("duplicate") => "That post is already tracked.",
        Some("invalid") => "That URL could not be ingested.",
        Some("error") => "Ingest failed, check the server logs.",
        _ => "",
    }
    .to_string()
}

pub(crate) async fn social_metrics_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SocialMetricsQuery>,
) -> Response {
    let status = query.status.as_deref().and_then(SocialStatus::parse);
    let loaded = async {
        let counters = state.engage.counters().await?;
        let daily = state
            .engage
            .daily_metrics()
            .await?
            .into_iter()
            .map(|m| DailyMetricView {
                date: m.bucket_date.to_string(),
                status: m.status.label(),
                total: m.total_count,
                ready: m.ready_count,
                posted: m.posted_count,
                should_reply: m.should_reply_count,
            })
            .collect();
        let rows = state
            .engage
            .list_recent(status, SOCIAL_ROWS)
            .await?
            .iter()
            .map(EngageRowView::from)
            .collect();

        let mut filters = vec![StatusLink { value: "", label: "All", active: status.is_none() }];
        filters.extend(SocialStatus::sequence().iter().map(|s| StatusLink {
            value: s.as_str(),
            label: s.label(),
            active: status == Some(*s),
        }));

        anyhow::Ok(SocialMetricsTemplate {
            notice: notice_text(query.notice.as_deref()),
            total_rows: counters.total_rows,
            total_unique_posts: counters.total_unique_posts,
            pending_count: counters.pending_count,
            ready_count: counters.ready_count,
            posted_count: counters.posted_count,
            ai_should_reply_count: counters.ai_should_reply_count,
            filters,
            daily,
            rows,
        })
    }
    .await;
    match loaded {
        Ok(tpl) => render_html(tpl),
        Err(err) => server_error(err),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ManualIngestForm {
    url: String,
}

/// Dashboard form; same path as the webhook but tagged `source = "manual"`.
pub(crate) async fn manual_ingest_handler(
    State(state): State<Arc<AppState>>,
    Form(form): Form<ManualIngestForm>,
) -> Response {
    let payload = json!({ "platform": PLATFORM_REDDIT, "url": form.url.trim(), "source": MANUAL_SOURCE });
    let code = match ingest_payload(&state, &payload).await {
        Ok(IngestOutcome::Created { .. }) => "queued",
        Ok(IngestOutcome::Duplicate { .. }) => "duplicate",
        Err(IngestFailure::Invalid(_)) => "invalid",
        Err(IngestFailure::Store(err)) => {
            warn!(error = %err, "manual ingest failed");
            "error"
        }
    };
    Redirect::to(&format!("/admin/social-metrics?notice={code}")).into_response()
}

struct SourceEngagementView {
    source: String,
    total_count: usize,
    unique_users: usize,
    avg_mixes_per_user: String,
}

struct PowerUserView {
    anon_id: String,
    total_mixes: usize,
    scratch_mixes: usize,
    template_mixes: usize,
    first_seen_at: String,
    last_seen_at: String,
}

struct TemplateEngagementView {
    template_key: String,
    total_count: usize,
    unique_users: usize,
}

#[derive(Template)]
#[template(path = "insight.html")]
struct InsightTemplate {
    total_mixes: usize,
    unique_mixers: usize,
    repeat_mixers: usize,
    scratch_mixes: usize,
    template_mixes: usize,
    sources: Vec<SourceEngagementView>,
    power_users: Vec<PowerUserView>,
    templates: Vec<TemplateEngagementView>,
}

pub(crate) async fn insight_handler(State(state): State<Arc<AppState>>) -> Response {
    let now = Utc::now();
    let events = match collect_mix_events(state.analytics.as_ref(), Some(now - Duration::days(7))).await {
        Ok(events) => events,
        Err(err) => return server_error(err.into()),
    };
    let data = compute_insight_data(&events, now);

    render_html(InsightTemplate {
        total_mixes: data.summary.total_mixes_last7d,
        unique_mixers: data.summary.unique_mixers_last7d,
        repeat_mixers: data.summary.repeat_mixers_last7d,
        scratch_mixes: data.summary.scratch_mixes_last7d,
        template_mixes: data.summary.template_mixes_last7d,
        sources: data
            .source_engagement
            .into_iter()
            .map(|s| SourceEngagementView {
                source: s.source,
                total_count: s.total_count,
                unique_users: s.unique_users,
                avg_mixes_per_user: format!("{:.2}", s.avg_mixes_per_user),
            })
            .collect(),
        power_users: data
            .power_users
            .into_iter()
            .map(|p| PowerUserView {
                anon_id: p.anon_id,
                total_mixes: p.total_mixes,
                scratch_mixes: p.scratch_mixes,
                template_mixes: p.template_mixes,
                first_seen_at: fmt_time(p.first_seen_at),
                last_seen_at: fmt_time(p.last_seen_at),
            })
            .collect(),
        templates: data
            .template_engagement
            .into_iter()
            .map(|t| TemplateEngagementView {
                template_key: t.template_key.unwrap_or_else(|| "(scratch)".into()),
                total_count: t.total_count,
                unique_users: t.unique_users,
            })
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use chrono::NaiveDate;
    use uuid::Uuid;
    use wizardlab_core::{EtfHolding, MixEvent};
    use wizardlab_storage::memory::blank_row;
    use wizardlab_storage::MemoryStore;

    use super::*;
    use crate::app;
    use crate::test_support::*;

    #[tokio::test]
    async fn every_page_renders_on_an_empty_store() {
        let store = Arc::new(MemoryStore::new());
        for uri in [
            "/",
            "/admin/mix-events",
            "/admin/etf-holdings",
            "/admin/users",
            "/admin/social-metrics",
            "/admin/insight",
        ] {
            let (status, body) = send(app(state(store.clone())), get(uri)).await;
            assert_eq!(status, axum::http::StatusCode::OK, "{uri}");
            assert!(body.contains("WizardLab"), "{uri}");
        }
    }

    #[tokio::test]
    async fn mix_events_page_summarizes_positions_and_top_items() {
        let store = Arc::new(MemoryStore::new());
        store
            .push_mix_event(MixEvent {
                id: Uuid::new_v4(),
                created_at: Utc::now(),
                source: Some("template".into()),
                template_key: Some("three-fund".into()),
                benchmark_symbol: Some("SPY".into()),
                referrer: None,
                anon_id: Some("anon-7".into()),
                positions: json!([{ "symbol": "vti", "weight": 0.6 }, { "symbol": "VXUS", "weight": 0.4 }]),
            })
            .await;

        let (status, body) = send(app(state(store)), get("/admin/mix-events?range=all")).await;
        assert_eq!(status, axum::http::StatusCode::OK);
        assert!(body.contains("VTI 60% · VXUS 40%"));
        assert!(body.contains("VTI + VXUS"));
        assert!(body.contains("anon-7"));
    }

    #[tokio::test]
    async fn holdings_filters_are_applied_upper_cased() {
        let store = Arc::new(MemoryStore::new());
        for (etf, symbol, weight) in [("VTI", "AAPL", 6.25), ("QQQ", "MSFT", 8.5)] {
            store
                .push_holding(EtfHolding {
                    id: Uuid::new_v4(),
                    etf_symbol: etf.into(),
                    holding_symbol: Some(symbol.into()),
                    holding_name: Some(format!("{symbol} Inc")),
                    weight_pct: Some(weight),
                    country: None,
                    sector: None,
                    asset_class: None,
                    nav_date: NaiveDate::from_ymd_opt(2026, 9, 30),
                    provider: None,
                    fund_url: None,
                    created_at: Utc::now(),
                })
                .await;
        }

        let (status, body) = send(app(state(store)), get("/admin/etf-holdings?etf_symbol=vt")).await;
        assert_eq!(status, axum::http::StatusCode::OK);
        assert!(body.contains("AAPL Inc"));
        assert!(body.contains("6.25%"));
        assert!(!body.contains("MSFT Inc"));
        assert!(body.contains(r#"value="VT""#));
    }

    #[tokio::test]
    async fn users_page_shows_domains_only() {
        let store = Arc::new(MemoryStore::new());
        store.push_user(Uuid::new_v4(), Utc::now(), Some("someone@example.com")).await;

        let (_, body) = send(app(state(store)), get("/admin/users")).await;
        assert!(body.contains("example.com"));
        assert!(!body.contains("someone@"));
    }

    #[tokio::test]
    async fn social_metrics_filters_by_status() {
        let store = Arc::new(MemoryStore::new());
        let mut ready = blank_row("reddit", "https://www.reddit.com/r/ETFs/comments/1aaaaa/ready/");
        ready.status = SocialStatus::Ready;
        ready.title = Some("Ready post".into());
        ready.ai_reply_draft = Some("Try a three-fund mix.".into());
        let mut ignored = blank_row("reddit", "https://www.reddit.com/r/ETFs/comments/1bbbbb/ignored/");
        ignored.status = SocialStatus::Ignored;
        ignored.title = Some("Ignored post".into());
        store.push_row(ready).await;
        store.push_row(ignored).await;

        let (_, body) = send(app(state(store.clone())), get("/admin/social-metrics")).await;
        assert!(body.contains("Ready post"));
        assert!(body.contains("Ignored post"));

        let (_, body) = send(app(state(store)), get("/admin/social-metrics?status=ready")).await;
        assert!(body.contains("Ready post"));
        assert!(body.contains("Try a three-fund mix."));
        assert!(!body.contains("Ignored post"));
    }

    #[tokio::test]
    async fn manual_ingest_form_queues_a_manual_row() {
        let store = Arc::new(MemoryStore::new());
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/admin/social-metrics/ingest")
            .header(axum::http::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(
                "url=https%3A%2F%2Fwww.reddit.com%2Fr%2FETFs%2Fcomments%2F1ccccc%2Fhelp%2F",
            ))
            .unwrap();

        let (status, _) = send(app(state(store.clone())), request).await;
        assert_eq!(status, axum::http::StatusCode::SEE_OTHER);
        let rows = store.rows().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].source.as_deref(), Some("manual"));
        assert_eq!(rows[0].status, SocialStatus::Pending);
    }

    #[tokio::test]
    async fn manual_ingest_rejects_garbage() {
        let store = Arc::new(MemoryStore::new());
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/admin/social-metrics/ingest")
            .header(axum::http::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("url=not+a+url"))
            .unwrap();
        let resp = tower::ServiceExt::oneshot(app(state(store.clone())), request).await.unwrap();
        assert_eq!(
            resp.headers()[axum::http::header::LOCATION].to_str().unwrap(),
            "/admin/social-metrics?notice=invalid"
        );
        assert!(store.rows().await.is_empty());
    }
}
