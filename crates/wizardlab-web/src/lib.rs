//! Axum + Askama admin dashboard and social API for WizardLab.

mod api;
mod pages;

use std::sync::Arc;

use anyhow::Context;
use askama::Template;
use axum::{
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{info, warn};
use wizardlab_ingest::{BatchRunner, EnrichmentPipeline};
use wizardlab_storage::{AnalyticsStore, PgStore, SocialEngageStore};

pub const CRATE_NAME: &str = "wizardlab-web";
pub const WEBHOOK_TOKEN_HEADER: &str = "x-wizardlab-token";
pub const POSTED_BY_DASHBOARD: &str = "lab-dashboard";

#[derive(Debug, Clone)]
pub struct WebConfig {
    pub port: u16,
    pub database_url: Option<String>,
    pub webhook_secret: Option<String>,
}

impl WebConfig {
    pub fn from_env() -> Self {
        Self {
            port: std::env::var("WIZARDLAB_WEB_PORT")
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(8000),
            database_url: std::env::var("DATABASE_URL").ok().filter(|v| !v.trim().is_empty()),
            webhook_secret: std::env::var("WEBHOOK_SECRET").ok().filter(|v| !v.is_empty()),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub engage: Arc<dyn SocialEngageStore>,
    pub analytics: Arc<dyn AnalyticsStore>,
    /// `None` when enrichment is not configured; the cron route then answers 503.
    pub runner: Option<Arc<dyn BatchRunner>>,
    pub webhook_secret: Option<String>,
}

impl AppState {
    pub fn new<S>(store: Arc<S>) -> Self
    where
        S: SocialEngageStore + AnalyticsStore + 'static,
    {
        Self {
            engage: store.clone(),
            analytics: store,
            runner: None,
            webhook_secret: None,
        }
    }

    pub fn with_runner(mut self, runner: Arc<dyn BatchRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn with_webhook_secret(mut self, secret: Option<String>) -> Self {
        self.webhook_secret = secret;
        self
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(pages::index_handler))
        .route("/admin/mix-events", get(pages::mix_events_handler))
        .route("/admin/etf-holdings", get(pages::etf_holdings_handler))
        .route("/admin/users", get(pages::users_handler))
        .route("/admin/social-metrics", get(pages::social_metrics_handler))
        .route("/admin/social-metrics/ingest", post(pages::manual_ingest_handler))
        .route("/admin/insight", get(pages::insight_handler))
        .route("/api/admin/insights", get(api::insights_handler))
        .route("/api/social/ingest", post(api::ingest_handler))
        .route("/api/social/mark-posted", post(api::mark_posted_handler))
        .route("/api/social/engage/status", post(api::engage_status_handler))
        .route("/api/social/cron", get(api::cron_handler).post(api::cron_handler))
        .route("/healthz", get(healthz_handler))
        .route("/assets/app.css", get(app_css_handler))
        .with_state(Arc::new(state))
}

/// Postgres-backed server; enrichment (and its scheduler) only when OpenAI is configured.
pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = WebConfig::from_env();
    let database_url = config.database_url.clone().context("DATABASE_URL is not set")?;
    let store = Arc::new(
        PgStore::connect(&database_url)
            .await
            .context("connecting to postgres")?,
    );

    let mut state = AppState::new(store.clone()).with_webhook_secret(config.webhook_secret.clone());
    if state.webhook_secret.is_none() {
        warn!("WEBHOOK_SECRET is not set; /api/social/ingest will answer 500");
    }

    let mut scheduler = None;
    match EnrichmentPipeline::from_env(store) {
        Ok(pipeline) => {
            let pipeline = Arc::new(pipeline);
            if let Some(sched) = pipeline.maybe_build_scheduler().await? {
                sched.start().await.context("starting enrichment scheduler")?;
                scheduler = Some(sched);
            }
            state = state.with_runner(pipeline);
        }
        Err(err) => warn!(error = %format!("{err:#}"), "enrichment disabled"),
    }

    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(port = config.port, scheduler = scheduler.is_some(), "wizardlab web listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn healthz_handler() -> Response {
    Json(json!({ "ok": true })).into_response()
}

const APP_CSS: &str = include_str!("../assets/app.css");

async fn app_css_handler() -> Response {
    ([(header::CONTENT_TYPE, "text/css; charset=utf-8")], APP_CSS).into_response()
}

fn render_html<T: Template>(tpl: T) -> Response {
    match tpl.render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => server_error(anyhow::anyhow!(err.to_string())),
    }
}

fn server_error(err: anyhow::Error) -> Response {
    warn!(error = %format!("{err:#}"), "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(format!("Server error: {}", err)),
    )
        .into_response()
}

fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}
