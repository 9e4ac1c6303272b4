//! Enrichment of pending social_engage rows: fetch, OCR, dedupe, classify.

pub mod dedupe;
pub mod ocr;
pub mod redact;

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;
use wizardlab_adapters::{fetcher_from_config, DecodoConfig, RedditFetcher, RedditPost};
use wizardlab_ai::{AiError, Embedder, ImageOcr, OpenAiModels, ReplyClassifier, ReplyInput};
use wizardlab_core::reddit_url::{extract_reddit_post_id, normalize_reddit_post_url};
use wizardlab_core::{merge_extra, AiMetadata, SocialEngageRow, SocialStatus, PLATFORM_REDDIT};
use wizardlab_storage::{EnrichmentUpdate, PgStore, SocialEngageStore};

pub use dedupe::{DuplicateMatch, SemanticDedupe, DEFAULT_DUPLICATE_THRESHOLD};
pub use ocr::{build_enriched_input, compose_enriched_text, EnrichedInput, OCR_SECTION_HEADER};
pub use redact::redact_secrets;

pub const CRATE_NAME: &str = "wizardlab-ingest";

#[derive(Debug, Clone, PartialEq)]
pub struct IngestConfig {
    pub batch_size: usize,
    pub duplicate_threshold: f64,
    pub scheduler_enabled: bool,
    /// Six-field cron (seconds first).
    pub cron: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            duplicate_threshold: DEFAULT_DUPLICATE_THRESHOLD,
            scheduler_enabled: false,
            cron: "0 */5 * * * *".to_string(),
        }
    }
}

impl IngestConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            batch_size: std::env::var("SOCIAL_INGEST_BATCH_SIZE")
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.batch_size),
            duplicate_threshold: std::env::var("SOCIAL_SEMANTIC_DUPLICATE_THRESHOLD")
                .ok()
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|t| t.is_finite() && *t > 0.0 && *t <= 1.0)
                .unwrap_or(defaults.duplicate_threshold),
            scheduler_enabled: std::env::var("SOCIAL_INGEST_SCHEDULER_ENABLED")
                .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            cron: std::env::var("SOCIAL_INGEST_CRON")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.cron),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrichRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub processed: usize,
    pub ready: usize,
    pub ignored: usize,
    pub duplicates: usize,
    pub errors: usize,
    /// Rows a moderator moved out of `pending` while the batch was working on them.
    pub skipped: usize,
}

/// One enrichment batch on demand; lets the web layer trigger runs without owning the pipeline.
#[async_trait]
pub trait BatchRunner: Send + Sync {
    async fn run_batch(&self) -> Result<EnrichRunSummary>;
}

pub struct EnrichmentPipeline {
    config: IngestConfig,
    store: Arc<dyn SocialEngageStore>,
    fetcher: Box<dyn RedditFetcher>,
    classifier: Arc<dyn ReplyClassifier>,
    embedder: Arc<dyn Embedder>,
    ocr: Option<Arc<dyn ImageOcr>>,
    ocr_max_images: usize,
    dedupe: SemanticDedupe,
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Writes for fields the fetched post knows about; `None` keeps what the row has.
fn hydrated_fields(post: &RedditPost, canonical: &str) -> EnrichmentUpdate {
    EnrichmentUpdate {
        title: non_empty(&post.title),
        body: non_empty(&post.body_text),
        author_handle: non_empty(&post.author),
        channel: non_empty(&post.subreddit),
        external_post_id: post
            .external_id
            .clone()
            .or_else(|| extract_reddit_post_id(canonical)),
        permalink: Some(canonical.to_string()),
        ..Default::default()
    }
}

impl EnrichmentPipeline {
    pub fn new(
        config: IngestConfig,
        store: Arc<dyn SocialEngageStore>,
        fetcher: Box<dyn RedditFetcher>,
        classifier: Arc<dyn ReplyClassifier>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        let dedupe = SemanticDedupe::new(config.duplicate_threshold);
        Self {
            config,
            store,
            fetcher,
            classifier,
            embedder,
            ocr: None,
            ocr_max_images: 1,
            dedupe,
        }
    }

    pub fn with_ocr(mut self, ocr: Option<Arc<dyn ImageOcr>>, max_images: usize) -> Self {
        self.ocr = ocr;
        self.ocr_max_images = max_images.max(1);
        self
    }

    /// Store, Decodo and OpenAI settings all come from the environment.
    pub fn from_env(store: Arc<dyn SocialEngageStore>) -> Result<Self> {
        let config = IngestConfig::from_env();
        let fetcher = fetcher_from_config(&DecodoConfig::from_env()).context("building reddit fetcher")?;
        let models = OpenAiModels::from_env().context("configuring openai")?;
        Ok(Self::new(config, store, fetcher, models.classifier, models.embedder)
            .with_ocr(models.ocr, models.ocr_max_images))
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub async fn run_once(&self) -> Result<EnrichRunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let span = info_span!("enrich_run", %run_id);

        async move {
            let rows = self
                .store
                .fetch_pending(PLATFORM_REDDIT, self.config.batch_size)
                .await
                .context("fetching pending reddit rows")?;
            info!(rows = rows.len(), fetcher = self.fetcher.name(), "enrichment batch started");

            let mut summary = EnrichRunSummary {
                run_id,
                started_at,
                finished_at: started_at,
                processed: rows.len(),
                ready: 0,
                ignored: 0,
                duplicates: 0,
                errors: 0,
                skipped: 0,
            };

            for row in &rows {
                let outcome = self
                    .process_row(row)
                    .instrument(info_span!("enrich_row", row_id = %row.id))
                    .await;
                match outcome {
                    Ok(Some(SocialStatus::Ready)) => summary.ready += 1,
                    Ok(Some(SocialStatus::Ignored)) => summary.ignored += 1,
                    Ok(Some(SocialStatus::DuplicateSemantic)) => summary.duplicates += 1,
                    Ok(Some(_)) => summary.errors += 1,
                    Ok(None) => summary.skipped += 1,
                    Err(err) => {
                        let note = redact_secrets(&format!("Store write failed: {err:#}"));
                        error!(row_id = %row.id, error = %note, "failed to persist enrichment");
                        self.record_store_failure(row, note).await;
                        summary.errors += 1;
                    }
                }
            }

            summary.finished_at = Utc::now();
            info!(
                processed = summary.processed,
                ready = summary.ready,
                ignored = summary.ignored,
                duplicates = summary.duplicates,
                errors = summary.errors,
                skipped = summary.skipped,
                "enrichment batch finished"
            );
            Ok(summary)
        }
        .instrument(span)
        .await
    }

    /// Final status of the row, `None` when it left `pending` mid-run.
    /// `Err` covers store failures, which `run_once` records separately.
    async fn process_row(&self, row: &SocialEngageRow) -> Result<Option<SocialStatus>> {
        let Some(permalink) = row.permalink.as_deref().and_then(non_empty) else {
            warn!("row has no permalink");
            return self.fail(row, EnrichmentUpdate::default(), "Missing permalink", Vec::new()).await;
        };
        let Some(canonical) = normalize_reddit_post_url(&permalink) else {
            let note = format!("Unsupported Reddit URL: {permalink}");
            warn!(%permalink, "unsupported reddit url");
            return self.fail(row, EnrichmentUpdate::default(), &note, Vec::new()).await;
        };

        let post = match self.fetcher.fetch_post(&canonical).await {
            Ok(post) => post,
            Err(err) => {
                let note = redact_secrets(&format!("Reddit fetch failed: {err}"));
                warn!(url = %canonical, status = err.status(), error = %note, "reddit fetch failed");
                return self.fail(row, EnrichmentUpdate::default(), &note, Vec::new()).await;
            }
        };
        let mut update = hydrated_fields(&post, &canonical);

        let enriched = build_enriched_input(&post, self.ocr.as_deref(), self.ocr_max_images).await;
        let fragments = enriched.ocr_fragments;
        let title = update.title.clone().or_else(|| row.title.as_deref().and_then(non_empty));
        let body = non_empty(&enriched.text).or_else(|| row.body.as_deref().and_then(non_empty));
        if title.is_none() && body.is_none() {
            return self.fail(row, update, "Fetched post has no title or post text", fragments).await;
        }

        let embed_text = format!(
            "{}\n\n{}",
            title.as_deref().unwrap_or_default(),
            body.as_deref().unwrap_or_default()
        );
        let embedding = match self.embedder.embed(embed_text.trim()).await {
            Ok(embedding) => embedding,
            Err(err) => {
                let note = redact_secrets(&format!("Embedding failed: {err}"));
                warn!(error = %note, "embedding failed");
                return self.fail(row, update, &note, fragments).await;
            }
        };

        let author = update.author_handle.clone().or_else(|| row.author_handle.clone());
        let duplicate = self
            .dedupe
            .find_duplicate(self.store.as_ref(), &row.platform, author.as_deref(), &embedding, row.id)
            .await
            .context("looking up semantic duplicates")?;
        update.embedding = Some(embedding);

        if let Some(found) = duplicate {
            info!(duplicate_of = %found.id, similarity = found.similarity, "semantic duplicate");
            let extra = merge_extra(&row.extra, "duplicate_of", json!(found.id.to_string()));
            update.extra = merge_extra(&extra, "duplicate_similarity", json!(found.similarity));
            let note = format!("Semantic duplicate of {} ({:.3})", found.id, found.similarity);
            return self
                .finish(row, update, SocialStatus::DuplicateSemantic, Some(note), fragments)
                .await;
        }

        let input = ReplyInput {
            post_title: title,
            post_body: body,
            url: canonical.clone(),
            subject: row.extra_str("f5bot_subject").or_else(|| row.extra_str("subject")).map(String::from),
            snippet: row.extra_str("f5bot_snippet").or_else(|| row.extra_str("snippet")).map(String::from),
        };
        match self.classifier.classify(&input).await {
            Ok(decision) => {
                let status = if decision.should_reply { SocialStatus::Ready } else { SocialStatus::Ignored };
                info!(
                    should_reply = decision.should_reply,
                    category = decision.category.as_str(),
                    priority = decision.priority.as_str(),
                    "reply decision"
                );
                update.ai_should_reply = Some(decision.should_reply);
                update.ai_reply_draft = Some(decision.reply_draft);
                update.ai_category = Some(decision.category.as_str().to_string());
                update.ai_priority = Some(decision.priority.as_str().to_string());
                update.ai_reason = Some(decision.reason);
                update.ai_post_summary = Some(decision.post_summary);
                update.ai_risk_flags = Some(decision.risk_flags);
                update.ai_parse_ok = Some(true);
                self.finish(row, update, status, None, fragments).await
            }
            Err(err) => {
                let note = redact_secrets(&format!("Reply classification failed: {err}"));
                warn!(error = %note, "reply classification failed");
                if matches!(err, AiError::InvalidDecision(_)) {
                    update.ai_parse_ok = Some(false);
                }
                self.fail(row, update, &note, fragments).await
            }
        }
    }

    async fn fail(
        &self,
        row: &SocialEngageRow,
        update: EnrichmentUpdate,
        note: &str,
        fragments: Vec<String>,
    ) -> Result<Option<SocialStatus>> {
        self.finish(row, update, SocialStatus::Error, Some(note.to_string()), fragments)
            .await
    }

    /// Persists the outcome with `extra.ai_metadata` merged over the row's existing `extra`.
    async fn finish(
        &self,
        row: &SocialEngageRow,
        mut update: EnrichmentUpdate,
        status: SocialStatus,
        note: Option<String>,
        fragments: Vec<String>,
    ) -> Result<Option<SocialStatus>> {
        let status = row.status.transition(status)?;
        let mut metadata = AiMetadata::new(status);
        metadata.note = note;
        metadata.ocr_fragments = fragments;

        let base = if update.extra.is_object() { update.extra.clone() } else { row.extra.clone() };
        let metadata = serde_json::to_value(&metadata).context("serializing ai_metadata")?;
        update.extra = merge_extra(&base, "ai_metadata", metadata);
        update.status = Some(status);

        let saved = self
            .store
            .save_enrichment(row.id, &update)
            .await
            .with_context(|| format!("saving enrichment for {}", row.id))?;
        if !saved {
            warn!(status = status.as_str(), "row left pending during enrichment; result dropped");
            return Ok(None);
        }
        info!(status = status.as_str(), "row enriched");
        Ok(Some(status))
    }

    /// Moves a row whose enrichment could not be stored to `error` so the next batch skips it.
    /// Hydrated fields are left out so a conflicting write cannot fail twice.
    async fn record_store_failure(&self, row: &SocialEngageRow, note: String) {
        let metadata = serde_json::to_value(AiMetadata::new(SocialStatus::Error).with_note(note.clone()))
            .unwrap_or(JsonValue::Null);
        let extra = merge_extra(&row.extra, "ai_error_reason", json!(note));
        let update = EnrichmentUpdate {
            status: Some(SocialStatus::Error),
            extra: merge_extra(&extra, "ai_metadata", metadata),
            ..Default::default()
        };
        match self.store.save_enrichment(row.id, &update).await {
            Ok(true) => warn!(row_id = %row.id, "row marked error after store failure"),
            Ok(false) => {}
            Err(err) => error!(row_id = %row.id, error = %err, "could not mark row as error; it stays pending"),
        }
    }

    /// Cron job running `run_once`, or `None` when scheduling is disabled.
    pub async fn maybe_build_scheduler(self: &Arc<Self>) -> Result<Option<JobScheduler>> {
        if !self.config.scheduler_enabled {
            return Ok(None);
        }

        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let pipeline = Arc::clone(self);
        let cron = self.config.cron.clone();
        let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
            let pipeline = Arc::clone(&pipeline);
            Box::pin(async move {
                if let Err(err) = pipeline.run_once().await {
                    error!(error = %redact_secrets(&format!("{err:#}")), "scheduled enrichment failed");
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
        info!(%cron, "enrichment scheduler configured");
        Ok(Some(sched))
    }
}

#[async_trait]
impl BatchRunner for EnrichmentPipeline {
    async fn run_batch(&self) -> Result<EnrichRunSummary> {
        self.run_once().await
    }
}

pub async fn run_enrichment_once_from_env() -> Result<EnrichRunSummary> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
    let store = PgStore::connect(&database_url)
        .await
        .context("connecting to postgres")?;
    let pipeline = EnrichmentPipeline::from_env(Arc::new(store))?;
    pipeline.run_once().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wizardlab_adapters::AdapterError;
    use wizardlab_ai::ReplyDecision;
    use wizardlab_core::{ReplyCategory, ReplyPriority, RiskFlags};
    use wizardlab_core::NewSocialEngage;
    use wizardlab_storage::memory::blank_row;
    use wizardlab_storage::{
        DailyMetric, EmbeddingCandidate, MemoryStore, SocialCounters, StoreError,
    };

    const POST_A: &str = "https://www.reddit.com/r/ETFs/comments/1abcde/three_fund/";
    const POST_B: &str = "https://www.reddit.com/r/ETFs/comments/2fghij/bogleheads/";

    struct StubFetcher {
        posts: HashMap<String, RedditPost>,
    }

    #[async_trait]
    impl RedditFetcher for StubFetcher {
        fn name(&self) -> &'static str {
            "stub"
        }

        async fn fetch_post(&self, post_url: &str) -> Result<RedditPost, AdapterError> {
            self.posts.get(post_url).cloned().ok_or_else(|| AdapterError::NotAccessible {
                status: 404,
                url: post_url.to_string(),
            })
        }
    }

    struct StubClassifier {
        should_reply: bool,
        fail: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ReplyClassifier for StubClassifier {
        async fn classify(&self, input: &ReplyInput) -> Result<ReplyDecision, AiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AiError::InvalidDecision("missing boolean should_reply".into()));
            }
            Ok(ReplyDecision {
                should_reply: self.should_reply,
                reason: format!("about {}", input.post_title.clone().unwrap_or_default()),
                post_summary: "three fund question".into(),
                category: ReplyCategory::PortfolioConstruction,
                priority: ReplyPriority::Medium,
                reply_draft: if self.should_reply { "Looks balanced.".into() } else { String::new() },
                risk_flags: RiskFlags::default(),
            })
        }
    }

    /// Same vector for every text, so any two posts by one author collide.
    struct ConstantEmbedder;

    #[async_trait]
    impl Embedder for ConstantEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, AiError> {
            if text.trim().is_empty() {
                return Err(AiError::EmptyInput);
            }
            Ok(vec![1.0, 0.0, 0.0])
        }
    }

    struct StubOcr;

    #[async_trait]
    impl ImageOcr for StubOcr {
        async fn extract_text(&self, image_url: &str) -> Result<String, AiError> {
            if image_url.contains("broken") {
                return Err(AiError::Api { status: 400, body: "invalid image".into() });
            }
            Ok(format!("text from {image_url}"))
        }
    }

    /// Delegates to a `MemoryStore`, optionally failing dedupe reads or
    /// moderating every row right after the batch claims it.
    struct ScriptedStore {
        inner: Arc<MemoryStore>,
        broken_candidates: bool,
        moderate_on_fetch: Option<SocialStatus>,
    }

    #[async_trait]
    impl SocialEngageStore for ScriptedStore {
        async fn find_by_permalink(
            &self,
            platform: &str,
            permalink: &str,
        ) -> Result<Option<SocialEngageRow>, StoreError> {
            self.inner.find_by_permalink(platform, permalink).await
        }

        async fn insert_pending(&self, row: NewSocialEngage) -> Result<SocialEngageRow, StoreError> {
            self.inner.insert_pending(row).await
        }

        async fn get(&self, id: Uuid) -> Result<Option<SocialEngageRow>, StoreError> {
            self.inner.get(id).await
        }

        async fn fetch_pending(&self, platform: &str, limit: usize) -> Result<Vec<SocialEngageRow>, StoreError> {
            let rows = self.inner.fetch_pending(platform, limit).await?;
            if let Some(status) = self.moderate_on_fetch {
                for row in &rows {
                    self.inner.set_status(row.id, status).await?;
                }
            }
            Ok(rows)
        }

        async fn save_enrichment(&self, id: Uuid, update: &EnrichmentUpdate) -> Result<bool, StoreError> {
            self.inner.save_enrichment(id, update).await
        }

        async fn set_status(&self, id: Uuid, status: SocialStatus) -> Result<bool, StoreError> {
            self.inner.set_status(id, status).await
        }

        async fn mark_posted(&self, id: Uuid, posted_by: &str, at: DateTime<Utc>) -> Result<bool, StoreError> {
            self.inner.mark_posted(id, posted_by, at).await
        }

        async fn semantic_candidates(
            &self,
            platform: &str,
            author_handle: &str,
            exclude_id: Uuid,
        ) -> Result<Vec<EmbeddingCandidate>, StoreError> {
            if self.broken_candidates {
                return Err(StoreError::Decode {
                    column: "embedding",
                    message: "expected float4[]".into(),
                });
            }
            self.inner.semantic_candidates(platform, author_handle, exclude_id).await
        }

        async fn list_recent(
            &self,
            status: Option<SocialStatus>,
            limit: usize,
        ) -> Result<Vec<SocialEngageRow>, StoreError> {
            self.inner.list_recent(status, limit).await
        }

        async fn counters(&self) -> Result<SocialCounters, StoreError> {
            self.inner.counters().await
        }

        async fn daily_metrics(&self) -> Result<Vec<DailyMetric>, StoreError> {
            self.inner.daily_metrics().await
        }
    }

    fn post(url: &str, title: &str, author: &str, body: &str) -> RedditPost {
        RedditPost {
            title: title.into(),
            subreddit: "ETFs".into(),
            author: author.into(),
            post_url: url.into(),
            content_html: Some(format!("<p>{body}</p>")),
            body_text: body.into(),
            karma: Some(10),
            external_id: None,
            created_at: None,
            comments: Vec::new(),
            images: Vec::new(),
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        classifier: Arc<StubClassifier>,
        pipeline: EnrichmentPipeline,
    }

    fn harness(posts: Vec<RedditPost>, should_reply: bool, fail: bool) -> Harness {
        harness_over(posts, should_reply, fail, |store| store as Arc<dyn SocialEngageStore>)
    }

    fn harness_over<F>(posts: Vec<RedditPost>, should_reply: bool, fail: bool, wrap: F) -> Harness
    where
        F: FnOnce(Arc<MemoryStore>) -> Arc<dyn SocialEngageStore>,
    {
        let store = Arc::new(MemoryStore::new());
        let classifier = Arc::new(StubClassifier { should_reply, fail, calls: AtomicUsize::new(0) });
        let fetcher = StubFetcher {
            posts: posts.into_iter().map(|p| (p.post_url.clone(), p)).collect(),
        };
        let pipeline = EnrichmentPipeline::new(
            IngestConfig::default(),
            wrap(store.clone()),
            Box::new(fetcher),
            classifier.clone(),
            Arc::new(ConstantEmbedder),
        );
        Harness { store, classifier, pipeline }
    }

    async fn seed(store: &MemoryStore, permalink: Option<&str>) -> Uuid {
        let mut row = blank_row(PLATFORM_REDDIT, permalink.unwrap_or_default());
        row.permalink = permalink.map(String::from);
        row.extra = json!({"f5bot_subject": "F5Bot found something", "keep": 1});
        let id = row.id;
        store.push_row(row).await;
        id
    }

    async fn row(store: &MemoryStore, id: Uuid) -> SocialEngageRow {
        store.get(id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn should_reply_marks_ready_and_hydrates() {
        let h = harness(vec![post(POST_A, "Three fund check", "alice", "VTI VXUS BND")], true, false);
        let id = seed(&h.store, Some("https://old.reddit.com/r/ETFs/comments/1abcde/three_fund/?utm=x")).await;

        let summary = h.pipeline.run_once().await.unwrap();
        assert_eq!((summary.processed, summary.ready, summary.errors), (1, 1, 0));

        let stored = row(&h.store, id).await;
        assert_eq!(stored.status, SocialStatus::Ready);
        assert_eq!(stored.permalink.as_deref(), Some(POST_A));
        assert_eq!(stored.title.as_deref(), Some("Three fund check"));
        assert_eq!(stored.author_handle.as_deref(), Some("alice"));
        assert_eq!(stored.channel.as_deref(), Some("ETFs"));
        assert_eq!(stored.external_post_id.as_deref(), Some("1abcde"));
        assert_eq!(stored.ai_should_reply, Some(true));
        assert_eq!(stored.ai_reply_draft.as_deref(), Some("Looks balanced."));
        assert_eq!(stored.ai_category.as_deref(), Some("portfolio_construction"));
        assert_eq!(stored.ai_parse_ok, Some(true));
        assert!(stored.embedding.is_some());
        assert_eq!(stored.extra["keep"], 1);
        assert_eq!(stored.extra["ai_metadata"]["status"], "ready");
    }

    #[tokio::test]
    async fn stored_permalink_is_the_canonical_request_url() {
        let mut fetched = post(POST_A, "Three fund check", "alice", "VTI VXUS BND");
        fetched.post_url = "https://www.reddit.com/r/ETFs/comments/1abcde/renamed_slug/".into();
        let store = Arc::new(MemoryStore::new());
        let pipeline = EnrichmentPipeline::new(
            IngestConfig::default(),
            store.clone(),
            Box::new(StubFetcher { posts: HashMap::from([(POST_A.to_string(), fetched)]) }),
            Arc::new(StubClassifier { should_reply: true, fail: false, calls: AtomicUsize::new(0) }),
            Arc::new(ConstantEmbedder),
        );
        let id = seed(&store, Some("https://reddit.com/r/ETFs/comments/1abcde/three_fund")).await;

        pipeline.run_once().await.unwrap();
        let stored = row(&store, id).await;
        assert_eq!(stored.status, SocialStatus::Ready);
        assert_eq!(stored.permalink.as_deref(), Some(POST_A));
    }

    #[tokio::test]
    async fn declined_posts_are_ignored() {
        let h = harness(vec![post(POST_A, "Meme", "alice", "lol")], false, false);
        let id = seed(&h.store, Some(POST_A)).await;
        let summary = h.pipeline.run_once().await.unwrap();
        assert_eq!(summary.ignored, 1);
        let stored = row(&h.store, id).await;
        assert_eq!(stored.status, SocialStatus::Ignored);
        assert_eq!(stored.ai_reply_draft.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn row_failures_do_not_abort_the_batch() {
        let h = harness(vec![post(POST_B, "Bogleheads", "bob", "VT and chill")], true, false);
        let missing = seed(&h.store, None).await;
        let unreachable = seed(&h.store, Some(POST_A)).await;
        let good = seed(&h.store, Some(POST_B)).await;

        let summary = h.pipeline.run_once().await.unwrap();
        assert_eq!((summary.processed, summary.ready, summary.errors), (3, 1, 2));

        let stored = row(&h.store, missing).await;
        assert_eq!(stored.status, SocialStatus::Error);
        assert_eq!(stored.extra["ai_metadata"]["note"], "Missing permalink");

        let stored = row(&h.store, unreachable).await;
        assert_eq!(stored.status, SocialStatus::Error);
        let note = stored.extra["ai_metadata"]["note"].as_str().unwrap();
        assert!(note.starts_with("Reddit fetch failed"), "{note}");

        assert_eq!(row(&h.store, good).await.status, SocialStatus::Ready);
    }

    #[tokio::test]
    async fn same_author_repost_is_a_semantic_duplicate() {
        let h = harness(vec![post(POST_B, "Same question again", "alice", "VTI VXUS BND")], true, false);
        let mut earlier = blank_row(PLATFORM_REDDIT, POST_A);
        earlier.status = SocialStatus::Ready;
        earlier.author_handle = Some("alice".into());
        earlier.embedding = Some(vec![1.0, 0.0, 0.0]);
        let earlier_id = earlier.id;
        h.store.push_row(earlier).await;
        let id = seed(&h.store, Some(POST_B)).await;

        let summary = h.pipeline.run_once().await.unwrap();
        assert_eq!(summary.duplicates, 1);
        assert_eq!(h.classifier.calls.load(Ordering::SeqCst), 0);

        let stored = row(&h.store, id).await;
        assert_eq!(stored.status, SocialStatus::DuplicateSemantic);
        assert_eq!(stored.extra["duplicate_of"], earlier_id.to_string());
        assert!(stored.extra["duplicate_similarity"].as_f64().unwrap() > 0.99);
        assert_eq!(stored.extra["keep"], 1);
        assert!(stored.embedding.is_some());
    }

    #[tokio::test]
    async fn unknown_author_skips_semantic_dedupe() {
        let h = harness(vec![post(POST_B, "Anonymous question", "", "VTI VXUS BND")], true, false);
        let mut earlier = blank_row(PLATFORM_REDDIT, POST_A);
        earlier.status = SocialStatus::Ready;
        earlier.embedding = Some(vec![1.0, 0.0, 0.0]);
        h.store.push_row(earlier).await;
        let id = seed(&h.store, Some(POST_B)).await;

        h.pipeline.run_once().await.unwrap();
        assert_eq!(row(&h.store, id).await.status, SocialStatus::Ready);
        assert_eq!(h.classifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_posts_and_classifier_failures_become_errors() {
        let h = harness(vec![post(POST_A, "  ", "alice", "")], true, false);
        let id = seed(&h.store, Some(POST_A)).await;
        h.pipeline.run_once().await.unwrap();
        let stored = row(&h.store, id).await;
        assert_eq!(stored.status, SocialStatus::Error);
        assert_eq!(stored.extra["ai_metadata"]["note"], "Fetched post has no title or post text");

        let h = harness(vec![post(POST_A, "Three fund", "alice", "VTI")], true, true);
        let id = seed(&h.store, Some(POST_A)).await;
        let summary = h.pipeline.run_once().await.unwrap();
        assert_eq!(summary.errors, 1);
        let stored = row(&h.store, id).await;
        assert_eq!(stored.status, SocialStatus::Error);
        assert_eq!(stored.ai_parse_ok, Some(false));
        assert_eq!(stored.title.as_deref(), Some("Three fund"));
    }

    #[tokio::test]
    async fn store_failure_moves_row_to_error_instead_of_retrying_forever() {
        let h = harness_over(vec![post(POST_A, "Three fund", "alice", "VTI VXUS BND")], true, false, |inner| {
            Arc::new(ScriptedStore { inner, broken_candidates: true, moderate_on_fetch: None }) as Arc<dyn SocialEngageStore>
        });
        let id = seed(&h.store, Some(POST_A)).await;

        let summary = h.pipeline.run_once().await.unwrap();
        assert_eq!((summary.processed, summary.errors, summary.skipped), (1, 1, 0));
        assert_eq!(h.classifier.calls.load(Ordering::SeqCst), 0);

        let stored = row(&h.store, id).await;
        assert_eq!(stored.status, SocialStatus::Error);
        let reason = stored.extra["ai_error_reason"].as_str().unwrap();
        assert!(reason.starts_with("Store write failed"), "{reason}");
        assert!(reason.contains("semantic duplicates"), "{reason}");
        assert_eq!(stored.extra["ai_metadata"]["status"], "error");
        assert_eq!(stored.extra["ai_metadata"]["note"], reason);
        assert_eq!(stored.extra["keep"], 1);

        let again = h.pipeline.run_once().await.unwrap();
        assert_eq!(again.processed, 0);
    }

    #[tokio::test]
    async fn moderator_decision_made_mid_run_is_not_overwritten() {
        let h = harness_over(vec![post(POST_A, "Three fund", "alice", "VTI VXUS BND")], true, false, |inner| {
            Arc::new(ScriptedStore { inner, broken_candidates: false, moderate_on_fetch: Some(SocialStatus::Ignored) }) as Arc<dyn SocialEngageStore>
        });
        let id = seed(&h.store, Some(POST_A)).await;

        let summary = h.pipeline.run_once().await.unwrap();
        assert_eq!((summary.processed, summary.ready, summary.errors, summary.skipped), (1, 0, 0, 1));
        assert_eq!(h.classifier.calls.load(Ordering::SeqCst), 1);

        let stored = row(&h.store, id).await;
        assert_eq!(stored.status, SocialStatus::Ignored);
        assert_eq!(stored.ai_should_reply, None);
        assert_eq!(stored.title, None);
        assert!(stored.extra.get("ai_metadata").is_none());
    }

    #[tokio::test]
    async fn ocr_fragments_are_recorded_and_capped() {
        let mut with_images = post(POST_A, "Rate my allocation", "alice", "");
        with_images.images = vec![
            "https://i.redd.it/broken.png".into(),
            "https://i.redd.it/second.png".into(),
            "https://i.redd.it/third.png".into(),
        ];
        let mut h = harness(vec![with_images], true, false);
        h.pipeline = h.pipeline.with_ocr(Some(Arc::new(StubOcr)), 2);
        let id = seed(&h.store, Some(POST_A)).await;

        h.pipeline.run_once().await.unwrap();
        let stored = row(&h.store, id).await;
        assert_eq!(stored.status, SocialStatus::Ready);
        assert_eq!(
            stored.extra["ai_metadata"]["ocr_fragments"],
            json!(["text from https://i.redd.it/second.png"])
        );
    }

    #[tokio::test]
    async fn scheduler_is_off_by_default() {
        let h = harness(Vec::new(), true, false);
        let pipeline = Arc::new(h.pipeline);
        assert!(pipeline.maybe_build_scheduler().await.unwrap().is_none());
        let summary = pipeline.run_batch().await.unwrap();
        assert_eq!(summary.processed, 0);
    }

    #[test]
    fn config_defaults() {
        let config = IngestConfig::default();
        assert_eq!(config.batch_size, 5);
        assert!((config.duplicate_threshold - 0.92).abs() < f64::EPSILON);
        assert!(!config.scheduler_enabled);
    }
}
