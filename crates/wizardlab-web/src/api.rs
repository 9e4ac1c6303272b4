//! JSON routes: ingest webhook, moderation actions, insights and the cron trigger.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::{info, warn};
use uuid::Uuid;
use wizardlab_core::{
    compute_mix_insights, normalize_ingest_payload, NewSocialEngage, PayloadError, SocialStatus,
    TimeFilter,
};
use wizardlab_storage::{collect_mix_events, StoreError};

use crate::{json_error, AppState, POSTED_BY_DASHBOARD, WEBHOOK_TOKEN_HEADER};

#[derive(Debug, Deserialize, Default)]
pub(crate) struct InsightsQuery {
    #[serde(rename = "timeFilter")]
    time_filter: Option<String>,
}

pub(crate) async fn insights_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<InsightsQuery>,
) -> Response {
    let filter = TimeFilter::parse(query.time_filter.as_deref());
    let since = filter.from_boundary(Utc::now());
    let loaded = async {
        let total = state.analytics.count_mix_events(since).await?;
        let events = collect_mix_events(state.analytics.as_ref(), since).await?;
        Ok::<_, StoreError>((total, events))
    }
    .await;
    match loaded {
        Ok((total, events)) => {
            let total = usize::try_from(total).unwrap_or(events.len());
            Json(compute_mix_insights(&events, total)).into_response()
        }
        Err(err) => {
            warn!(error = %err, filter = ?filter, "insights query failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
    }
}

#[derive(Debug)]
pub(crate) enum IngestOutcome {
    Created { id: Uuid },
    Duplicate { id: Uuid, status: SocialStatus },
}

#[derive(Debug)]
pub(crate) enum IngestFailure {
    Invalid(PayloadError),
    Store(StoreError),
}

/// Normalizes and stores one payload, answering duplicates with the existing row.
pub(crate) async fn ingest_payload(
    state: &AppState,
    payload: &JsonValue,
) -> Result<IngestOutcome, IngestFailure> {
    let normalized = normalize_ingest_payload(payload).map_err(IngestFailure::Invalid)?;
    let (platform, permalink) = (normalized.platform.clone(), normalized.permalink.clone());

    let existing = state
        .engage
        .find_by_permalink(&platform, &permalink)
        .await
        .map_err(IngestFailure::Store)?;
    if let Some(row) = existing {
        return Ok(IngestOutcome::Duplicate { id: row.id, status: row.status });
    }

    match state.engage.insert_pending(NewSocialEngage::from(normalized)).await {
        Ok(row) => {
            info!(id = %row.id, platform = %platform, permalink = %permalink, "queued social post");
            Ok(IngestOutcome::Created { id: row.id })
        }
        Err(err) => {
            // A concurrent insert of the same permalink loses the unique index race.
            match state.engage.find_by_permalink(&platform, &permalink).await {
                Ok(Some(row)) => Ok(IngestOutcome::Duplicate { id: row.id, status: row.status }),
                _ => Err(IngestFailure::Store(err)),
            }
        }
    }
}

pub(crate) async fn ingest_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(secret) = state.webhook_secret.as_deref() else {
        return json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Webhook secret not configured (WEBHOOK_SECRET missing).",
        );
    };
    let token = headers
        .get(WEBHOOK_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if token != secret {
        return json_error(StatusCode::UNAUTHORIZED, "Unauthorized");
    }

    let Ok(payload) = serde_json::from_slice::<JsonValue>(&body) else {
        return json_error(StatusCode::BAD_REQUEST, "Invalid JSON body.");
    };

    match ingest_payload(&state, &payload).await {
        Ok(IngestOutcome::Created { id }) => (
            StatusCode::CREATED,
            Json(json!({ "id": id, "status": SocialStatus::Pending })),
        )
            .into_response(),
        Ok(IngestOutcome::Duplicate { id, status }) => {
            Json(json!({ "duplicate": true, "id": id, "status": status })).into_response()
        }
        Err(IngestFailure::Invalid(err)) => json_error(StatusCode::BAD_REQUEST, err.to_string()),
        Err(IngestFailure::Store(err)) => {
            warn!(error = %err, "ingest insert failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to store post.")
        }
    }
}

fn parse_id(payload: &JsonValue) -> Option<Uuid> {
    payload
        .get("id")
        .and_then(JsonValue::as_str)
        .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
}

pub(crate) async fn mark_posted_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let Ok(payload) = serde_json::from_slice::<JsonValue>(&body) else {
        return json_error(StatusCode::BAD_REQUEST, "Invalid JSON");
    };
    let Some(id) = parse_id(&payload) else {
        return json_error(StatusCode::BAD_REQUEST, "Missing id");
    };

    let row = match state.engage.get(id).await {
        Ok(Some(row)) => row,
        Ok(None) => return json_error(StatusCode::NOT_FOUND, "Not found"),
        Err(err) => {
            warn!(error = %err, %id, "mark-posted lookup failed");
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal error");
        }
    };
    if let Err(err) = row.status.transition(SocialStatus::Posted) {
        return json_error(StatusCode::CONFLICT, err.to_string());
    }

    match state.engage.mark_posted(id, POSTED_BY_DASHBOARD, Utc::now()).await {
        Ok(true) => {
            info!(%id, "marked posted");
            Json(json!({ "success": true })).into_response()
        }
        Ok(false) => json_error(StatusCode::CONFLICT, "Already posted"),
        Err(err) => {
            warn!(error = %err, %id, "mark-posted update failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
    }
}

pub(crate) async fn engage_status_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let parsed = serde_json::from_slice::<JsonValue>(&body).ok().and_then(|payload| {
        let id = parse_id(&payload)?;
        let status = payload.get("status").and_then(JsonValue::as_str).and_then(SocialStatus::parse)?;
        Some((id, status))
    });
    let Some((id, next)) = parsed else {
        return json_error(StatusCode::BAD_REQUEST, "Invalid payload");
    };

    let row = match state.engage.get(id).await {
        Ok(Some(row)) => row,
        Ok(None) => return json_error(StatusCode::NOT_FOUND, "Not found"),
        Err(err) => {
            warn!(error = %err, %id, "status lookup failed");
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal error");
        }
    };
    if let Err(err) = row.status.manual_override(next) {
        return json_error(StatusCode::CONFLICT, err.to_string());
    }

    match state.engage.set_status(id, next).await {
        Ok(true) => {
            info!(%id, from = %row.status, to = %next, "status overridden");
            Json(json!({ "ok": true })).into_response()
        }
        Ok(false) => json_error(StatusCode::CONFLICT, "Already posted"),
        Err(err) => {
            warn!(error = %err, %id, "status update failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
    }
}

pub(crate) async fn cron_handler(State(state): State<Arc<AppState>>) -> Response {
    let Some(runner) = state.runner.as_ref() else {
        return json_error(StatusCode::SERVICE_UNAVAILABLE, "Enrichment is not configured.");
    };
    match runner.run_batch().await {
        Ok(summary) => Json(json!({
            "processed": summary.processed,
            "ready": summary.ready,
            "ignored": summary.ignored,
            "duplicates": summary.duplicates,
            "errors": summary.errors,
            "skipped": summary.skipped,
        }))
        .into_response(),
        Err(err) => {
            warn!(error = %format!("{err:#}"), "on-demand enrichment failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use axum::body::Body;
    use chrono::Duration;
    use wizardlab_core::MixEvent;
    use wizardlab_ingest::{BatchRunner, EnrichRunSummary};
    use wizardlab_storage::memory::blank_row;
    use wizardlab_storage::MemoryStore;

    use super::*;
    use crate::app;
    use crate::test_support::*;

    const POST_URL: &str = "https://www.reddit.com/r/ETFs/comments/1abcde/mix_check/";

    fn ingest_request(token: Option<&str>, body: &str) -> axum::http::Request<Body> {
        let mut builder = axum::http::Request::builder()
            .method("POST")
            .uri("/api/social/ingest")
            .header(axum::http::header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(WEBHOOK_TOKEN_HEADER, token);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn ingest_requires_a_configured_secret_and_matching_token() {
        let store = Arc::new(MemoryStore::new());
        let body = json!({ "platform": "reddit", "url": POST_URL }).to_string();

        let unconfigured = app(AppState::new(store.clone()));
        let (status, text) = send(unconfigured, ingest_request(Some(SECRET), &body)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(text.contains("WEBHOOK_SECRET missing"));

        let (status, _) = send(app(state(store.clone())), ingest_request(Some("nope"), &body)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = send(app(state(store.clone())), ingest_request(None, &body)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(store.rows().await.is_empty());
    }

    #[tokio::test]
    async fn ingest_validates_the_body() {
        let store = Arc::new(MemoryStore::new());
        let (status, text) = send(app(state(store.clone())), ingest_request(Some(SECRET), "{nope")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(text.contains("Invalid JSON body."));

        let body = json!({ "url": POST_URL }).to_string();
        let (status, text) = send(app(state(store)), ingest_request(Some(SECRET), &body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(text.contains("platform"));
    }

    #[tokio::test]
    async fn ingest_creates_then_reports_duplicates() {
        let store = Arc::new(MemoryStore::new());
        let body = json!({
            "platform": "reddit",
            "url": "https://old.reddit.com/r/ETFs/comments/1abcde/mix_check/?utm_source=f5bot",
            "source": "gmail-f5bot",
            "f5bot_subject": "F5Bot found something!",
        })
        .to_string();

        let (status, text) = send(app(state(store.clone())), ingest_request(Some(SECRET), &body)).await;
        assert_eq!(status, StatusCode::CREATED);
        let created: JsonValue = serde_json::from_str(&text).unwrap();
        assert_eq!(created["status"], "pending");

        let rows = store.rows().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].permalink.as_deref(), Some(POST_URL));
        assert_eq!(rows[0].source.as_deref(), Some("gmail-f5bot"));
        assert_eq!(rows[0].extra["f5bot_subject"], "F5Bot found something!");

        let (status, text) = send(app(state(store.clone())), ingest_request(Some(SECRET), &body)).await;
        assert_eq!(status, StatusCode::OK);
        let dup: JsonValue = serde_json::from_str(&text).unwrap();
        assert_eq!(dup["duplicate"], true);
        assert_eq!(dup["id"], created["id"]);
        assert_eq!(dup["status"], "pending");
        assert_eq!(store.rows().await.len(), 1);
    }

    async fn seeded(status: SocialStatus) -> (Arc<MemoryStore>, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let mut row = blank_row("reddit", POST_URL);
        row.status = status;
        let id = row.id;
        store.push_row(row).await;
        (store, id)
    }

    #[tokio::test]
    async fn mark_posted_moves_ready_rows_once() {
        let (store, id) = seeded(SocialStatus::Ready).await;
        let body = json!({ "id": id }).to_string();

        let (status, text) = send(app(state(store.clone())), post_json("/api/social/mark-posted", &body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(text, r#"{"success":true}"#);
        let row = store.rows().await.remove(0);
        assert_eq!(row.status, SocialStatus::Posted);
        assert_eq!(row.posted_by.as_deref(), Some(POSTED_BY_DASHBOARD));
        assert!(row.posted_at.is_some());

        let (status, _) = send(app(state(store)), post_json("/api/social/mark-posted", &body)).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn mark_posted_rejects_bad_requests() {
        let (store, _) = seeded(SocialStatus::Ready).await;
        let cases = [
            ("not json", StatusCode::BAD_REQUEST),
            ("{}", StatusCode::BAD_REQUEST),
            (r#"{"id":"not-a-uuid"}"#, StatusCode::BAD_REQUEST),
        ];
        for (body, expected) in cases {
            let (status, _) = send(app(state(store.clone())), post_json("/api/social/mark-posted", body)).await;
            assert_eq!(status, expected, "body {body}");
        }
        let unknown = json!({ "id": Uuid::new_v4() }).to_string();
        let (status, _) = send(app(state(store)), post_json("/api/social/mark-posted", &unknown)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn status_override_allows_requeue_but_not_posting() {
        let (store, id) = seeded(SocialStatus::Ignored).await;

        let body = json!({ "id": id, "status": "ready" }).to_string();
        let (status, text) = send(app(state(store.clone())), post_json("/api/social/engage/status", &body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(text, r#"{"ok":true}"#);
        assert_eq!(store.rows().await[0].status, SocialStatus::Ready);

        let body = json!({ "id": id, "status": "posted" }).to_string();
        let (status, _) = send(app(state(store.clone())), post_json("/api/social/engage/status", &body)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let body = json!({ "id": id, "status": "bogus" }).to_string();
        let (status, text) = send(app(state(store)), post_json("/api/social/engage/status", &body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(text.contains("Invalid payload"));
    }

    #[tokio::test]
    async fn posted_rows_are_frozen() {
        let (store, id) = seeded(SocialStatus::Posted).await;
        let body = json!({ "id": id, "status": "pending" }).to_string();
        let (status, _) = send(app(state(store.clone())), post_json("/api/social/engage/status", &body)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(store.rows().await[0].status, SocialStatus::Posted);
    }

    struct CountingRunner {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BatchRunner for CountingRunner {
        async fn run_batch(&self) -> anyhow::Result<EnrichRunSummary> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = Utc::now();
            Ok(EnrichRunSummary {
                run_id: Uuid::new_v4(),
                started_at: now,
                finished_at: now,
                processed: 3,
                ready: 1,
                ignored: 1,
                duplicates: 0,
                errors: 1,
                skipped: 0,
            })
        }
    }

    #[tokio::test]
    async fn cron_runs_a_batch_or_reports_unavailable() {
        let store = Arc::new(MemoryStore::new());
        let (status, _) = send(app(state(store.clone())), get("/api/social/cron")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let runner = Arc::new(CountingRunner { calls: AtomicUsize::new(0) });
        let router = app(state(store).with_runner(runner.clone()));
        let (status, text) = send(router.clone(), get("/api/social/cron")).await;
        assert_eq!(status, StatusCode::OK);
        let body: JsonValue = serde_json::from_str(&text).unwrap();
        assert_eq!(body["processed"], 3);
        assert_eq!(body["skipped"], 0);

        let (status, _) = send(router, post_json("/api/social/cron", "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 2);
    }

    fn mix_event(hours_ago: i64, positions: JsonValue, template_key: Option<&str>) -> MixEvent {
        MixEvent {
            id: Uuid::new_v4(),
            created_at: Utc::now() - Duration::hours(hours_ago),
            source: Some("scratch".into()),
            template_key: template_key.map(str::to_string),
            benchmark_symbol: None,
            referrer: None,
            anon_id: Some("anon-1".into()),
            positions,
        }
    }

    #[tokio::test]
    async fn insights_respect_the_time_filter() {
        let store = Arc::new(MemoryStore::new());
        store.push_mix_event(mix_event(0, json!(["VTI", "VXUS"]), Some("three-fund"))).await;
        store.push_mix_event(mix_event(0, json!(["vxus", "VTI"]), None)).await;
        store.push_mix_event(mix_event(24 * 5, json!(["QQQ"]), None)).await;

        let (status, text) = send(app(state(store.clone())), get("/api/admin/insights?timeFilter=last2d")).await;
        assert_eq!(status, StatusCode::OK);
        let body: JsonValue = serde_json::from_str(&text).unwrap();
        assert_eq!(body["topCombinations"][0], json!({ "key": "VTI + VXUS", "count": 2 }));
        assert_eq!(body["topEtfs"].as_array().unwrap().len(), 2);
        assert_eq!(body["topCards"][0]["templateKey"], "three-fund");
        assert_eq!(body["topCards"][0]["percentage"], 50.0);

        let (_, text) = send(app(state(store)), get("/api/admin/insights?timeFilter=all")).await;
        let body: JsonValue = serde_json::from_str(&text).unwrap();
        assert_eq!(body["topEtfs"].as_array().unwrap().len(), 3);
    }
}
