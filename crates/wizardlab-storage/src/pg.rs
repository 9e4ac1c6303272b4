use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;
use wizardlab_core::{
    AdminUserRow, EtfHolding, MixEvent, NewSocialEngage, RiskFlags, SocialEngageRow, SocialStatus,
};

use crate::repo::{
    AnalyticsStore, DailyMetric, EmbeddingCandidate, EnrichmentUpdate, SocialCounters,
    SocialEngageStore, StoreError,
};

const ENGAGE_COLUMNS: &str = r#"
    id, created_at, updated_at, platform, external_post_id, permalink, raw_source_url,
    author_handle, channel, title, body, status, source, ai_should_reply, ai_reply_draft,
    ai_category, ai_priority, ai_reason, ai_post_summary, ai_risk_flags, ai_parse_ok,
    posted_at, posted_by, extra, embedding
"#;

/// Stored spellings older deployments wrote, with the status they mean today.
const LEGACY_STATUS_ALIASES: &[(&str, SocialStatus)] = &[
    ("duplicate", SocialStatus::DuplicateSemantic),
    ("unresolvable", SocialStatus::Error),
];

/// SQL expression folding legacy and mis-cased `status` values onto current names.
fn normalized_status_sql() -> String {
    let mut sql = String::from("CASE lower(btrim(status))");
    for (alias, status) in LEGACY_STATUS_ALIASES {
        sql.push_str(&format!(" WHEN '{alias}' THEN '{}'", status.as_str()));
    }
    sql.push_str(" ELSE lower(btrim(status)) END");
    sql
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("database migrations applied");
        Ok(())
    }
}

fn parse_status(raw: &str) -> Result<SocialStatus, StoreError> {
    SocialStatus::parse(raw).ok_or_else(|| StoreError::Decode {
        column: "status",
        message: format!("unknown status {raw:?}"),
    })
}

fn engage_from_row(row: &PgRow) -> Result<SocialEngageRow, StoreError> {
    let status: String = row.try_get("status")?;
    let risk_flags: Option<JsonValue> = row.try_get("ai_risk_flags")?;
    let ai_risk_flags = match risk_flags {
        Some(JsonValue::Null) | None => None,
        Some(value) => Some(serde_json::from_value::<RiskFlags>(value).map_err(|err| {
            StoreError::Decode {
                column: "ai_risk_flags",
                message: err.to_string(),
            }
        })?),
    };
    let extra: Option<JsonValue> = row.try_get("extra")?;

    Ok(SocialEngageRow {
        id: row.try_get("id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        platform: row.try_get("platform")?,
        external_post_id: row.try_get("external_post_id")?,
        permalink: row.try_get("permalink")?,
        raw_source_url: row.try_get("raw_source_url")?,
        author_handle: row.try_get("author_handle")?,
        channel: row.try_get("channel")?,
        title: row.try_get("title")?,
        body: row.try_get("body")?,
        status: parse_status(&status)?,
        source: row.try_get("source")?,
        ai_should_reply: row.try_get("ai_should_reply")?,
        ai_reply_draft: row.try_get("ai_reply_draft")?,
        ai_category: row.try_get("ai_category")?,
        ai_priority: row.try_get("ai_priority")?,
        ai_reason: row.try_get("ai_reason")?,
        ai_post_summary: row.try_get("ai_post_summary")?,
        ai_risk_flags,
        ai_parse_ok: row.try_get("ai_parse_ok")?,
        posted_at: row.try_get("posted_at")?,
        posted_by: row.try_get("posted_by")?,
        extra: extra.unwrap_or_else(|| JsonValue::Object(Default::default())),
        embedding: row.try_get("embedding")?,
    })
}

fn mix_event_from_row(row: &PgRow) -> Result<MixEvent, StoreError> {
    let positions: Option<JsonValue> = row.try_get("positions")?;
    Ok(MixEvent {
        id: row.try_get("id")?,
        created_at: row.try_get("created_at")?,
        source: row.try_get("source")?,
        template_key: row.try_get("template_key")?,
        benchmark_symbol: row.try_get("benchmark_symbol")?,
        referrer: row.try_get("referrer")?,
        anon_id: row.try_get("anon_id")?,
        positions: positions.unwrap_or(JsonValue::Null),
    })
}

fn risk_flags_json(flags: Option<RiskFlags>) -> Option<JsonValue> {
    flags.and_then(|f| serde_json::to_value(f).ok())
}

fn like_prefix(prefix: Option<&str>) -> Option<String> {
    prefix.map(|p| {
        let escaped = p.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
        format!("{escaped}%")
    })
}

#[async_trait]
impl SocialEngageStore for PgStore {
    async fn find_by_permalink(
        &self,
        platform: &str,
        permalink: &str,
    ) -> Result<Option<SocialEngageRow>, StoreError> {
        let sql = format!(
            "SELECT {ENGAGE_COLUMNS} FROM social_engage WHERE platform = $1 AND permalink = $2 LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(platform)
            .bind(permalink)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(engage_from_row).transpose()
    }

    async fn insert_pending(&self, row: NewSocialEngage) -> Result<SocialEngageRow, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO social_engage
                (id, platform, permalink, raw_source_url, external_post_id, source, title, body, status, extra)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending', $9)
            RETURNING {ENGAGE_COLUMNS}
            "#
        );
        let inserted = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(&row.platform)
            .bind(&row.permalink)
            .bind(&row.raw_source_url)
            .bind(&row.external_post_id)
            .bind(&row.source)
            .bind(&row.title)
            .bind(&row.body)
            .bind(&row.extra)
            .fetch_one(&self.pool)
            .await?;
        engage_from_row(&inserted)
    }

    async fn get(&self, id: Uuid) -> Result<Option<SocialEngageRow>, StoreError> {
        let sql = format!("SELECT {ENGAGE_COLUMNS} FROM social_engage WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(engage_from_row).transpose()
    }

    async fn fetch_pending(&self, platform: &str, limit: usize) -> Result<Vec<SocialEngageRow>, StoreError> {
        let sql = format!(
            r#"
            SELECT {ENGAGE_COLUMNS}
              FROM social_engage
             WHERE status = 'pending' AND platform = $1
             ORDER BY created_at ASC
             LIMIT $2
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(platform)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(engage_from_row).collect()
    }

    async fn save_enrichment(&self, id: Uuid, update: &EnrichmentUpdate) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE social_engage
               SET status = COALESCE($2, status),
                   title = COALESCE($3, title),
                   body = COALESCE($4, body),
                   author_handle = COALESCE($5, author_handle),
                   channel = COALESCE($6, channel),
                   external_post_id = COALESCE($7, external_post_id),
                   permalink = COALESCE($8, permalink),
                   embedding = COALESCE($9, embedding),
                   ai_should_reply = $10,
                   ai_reply_draft = $11,
                   ai_category = $12,
                   ai_priority = $13,
                   ai_reason = $14,
                   ai_post_summary = $15,
                   ai_risk_flags = $16,
                   ai_parse_ok = $17,
                   extra = $18,
                   updated_at = NOW()
             WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(update.status.map(SocialStatus::as_str))
        .bind(&update.title)
        .bind(&update.body)
        .bind(&update.author_handle)
        .bind(&update.channel)
        .bind(&update.external_post_id)
        .bind(&update.permalink)
        .bind(&update.embedding)
        .bind(update.ai_should_reply)
        .bind(&update.ai_reply_draft)
        .bind(&update.ai_category)
        .bind(&update.ai_priority)
        .bind(&update.ai_reason)
        .bind(&update.ai_post_summary)
        .bind(risk_flags_json(update.ai_risk_flags))
        .bind(update.ai_parse_ok)
        .bind(&update.extra)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_status(&self, id: Uuid, status: SocialStatus) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE social_engage
               SET status = $2, updated_at = NOW()
             WHERE id = $1 AND status <> 'posted'
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_posted(&self, id: Uuid, posted_by: &str, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE social_engage
               SET status = 'posted', posted_at = $2, posted_by = $3, updated_at = NOW()
             WHERE id = $1 AND status <> 'posted'
            "#,
        )
        .bind(id)
        .bind(at)
        .bind(posted_by)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn semantic_candidates(
        &self,
        platform: &str,
        author_handle: &str,
        exclude_id: Uuid,
    ) -> Result<Vec<EmbeddingCandidate>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, embedding
              FROM social_engage
             WHERE platform = $1
               AND author_handle = $2
               AND id <> $3
               AND embedding IS NOT NULL
            "#,
        )
        .bind(platform)
        .bind(author_handle)
        .bind(exclude_id)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(EmbeddingCandidate {
                id: row.try_get("id")?,
                embedding: row.try_get("embedding")?,
            });
        }
        Ok(out)
    }

    async fn list_recent(
        &self,
        status: Option<SocialStatus>,
        limit: usize,
    ) -> Result<Vec<SocialEngageRow>, StoreError> {
        let status_sql = normalized_status_sql();
        let sql = format!(
            r#"
            SELECT {ENGAGE_COLUMNS}
              FROM social_engage
             WHERE ($1::text IS NULL OR {status_sql} = $1)
             ORDER BY created_at DESC
             LIMIT $2
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(status.map(SocialStatus::as_str))
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(engage_from_row).collect()
    }

    async fn counters(&self) -> Result<SocialCounters, StoreError> {
        let status_sql = normalized_status_sql();
        let sql = format!(
            r#"
            SELECT COUNT(*) AS total_rows,
                   COUNT(DISTINCT COALESCE(permalink, raw_source_url)) AS total_unique_posts,
                   COUNT(*) FILTER (WHERE {status_sql} = 'pending') AS pending_count,
                   COUNT(*) FILTER (WHERE {status_sql} = 'ready') AS ready_count,
                   COUNT(*) FILTER (WHERE {status_sql} = 'posted') AS posted_count,
                   COUNT(*) FILTER (WHERE ai_should_reply IS TRUE) AS ai_should_reply_count
              FROM social_engage
            "#
        );
        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;

        Ok(SocialCounters {
            total_rows: row.try_get("total_rows")?,
            total_unique_posts: row.try_get("total_unique_posts")?,
            pending_count: row.try_get("pending_count")?,
            ready_count: row.try_get("ready_count")?,
            posted_count: row.try_get("posted_count")?,
            ai_should_reply_count: row.try_get("ai_should_reply_count")?,
        })
    }

    async fn daily_metrics(&self) -> Result<Vec<DailyMetric>, StoreError> {
        let status_sql = normalized_status_sql();
        let sql = format!(
            r#"
            SELECT (created_at AT TIME ZONE 'UTC')::date AS bucket_date,
                   {status_sql} AS status,
                   COUNT(*) AS total_count,
                   COUNT(*) FILTER (WHERE {status_sql} = 'ready') AS ready_count,
                   COUNT(*) FILTER (WHERE {status_sql} = 'posted') AS posted_count,
                   COUNT(*) FILTER (WHERE ai_should_reply IS TRUE) AS should_reply_count
              FROM social_engage
             GROUP BY 1, 2
             ORDER BY 1 DESC, 2 ASC
             LIMIT 200
            "#
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let status: String = row.try_get("status")?;
            let bucket_date: NaiveDate = row.try_get("bucket_date")?;
            out.push(DailyMetric {
                bucket_date,
                status: parse_status(&status)?,
                total_count: row.try_get("total_count")?,
                ready_count: row.try_get("ready_count")?,
                posted_count: row.try_get("posted_count")?,
                should_reply_count: row.try_get("should_reply_count")?,
            });
        }
        Ok(out)
    }
}

#[async_trait]
impl AnalyticsStore for PgStore {
    async fn count_mix_events(&self, since: Option<DateTime<Utc>>) -> Result<i64, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM mix_events WHERE ($1::timestamptz IS NULL OR created_at >= $1)",
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("n")?)
    }

    async fn mix_events(
        &self,
        since: Option<DateTime<Utc>>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MixEvent>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, created_at, source, template_key, benchmark_symbol, referrer, anon_id, positions
              FROM mix_events
             WHERE ($1::timestamptz IS NULL OR created_at >= $1)
             ORDER BY created_at DESC, id
             LIMIT $2 OFFSET $3
            "#,
        )
        .bind(since)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(mix_event_from_row).collect()
    }

    async fn etf_holdings(
        &self,
        etf_prefix: Option<&str>,
        holding_prefix: Option<&str>,
        limit: usize,
    ) -> Result<Vec<EtfHolding>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, etf_symbol, holding_symbol, holding_name, weight_pct, country, sector,
                   asset_class, nav_date, provider, fund_url, created_at
              FROM etf_holdings
             WHERE ($1::text IS NULL OR etf_symbol ILIKE $1)
               AND ($2::text IS NULL OR holding_symbol ILIKE $2)
             ORDER BY etf_symbol ASC, weight_pct DESC NULLS LAST
             LIMIT $3
            "#,
        )
        .bind(like_prefix(etf_prefix))
        .bind(like_prefix(holding_prefix))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(EtfHolding {
                id: row.try_get("id")?,
                etf_symbol: row.try_get("etf_symbol")?,
                holding_symbol: row.try_get("holding_symbol")?,
                holding_name: row.try_get("holding_name")?,
                weight_pct: row.try_get("weight_pct")?,
                country: row.try_get("country")?,
                sector: row.try_get("sector")?,
                asset_class: row.try_get("asset_class")?,
                nav_date: row.try_get("nav_date")?,
                provider: row.try_get("provider")?,
                fund_url: row.try_get("fund_url")?,
                created_at: row.try_get("created_at")?,
            });
        }
        Ok(out)
    }

    async fn recent_users(&self, limit: usize) -> Result<Vec<AdminUserRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, email, created_at
              FROM auth.users
             ORDER BY created_at DESC
             LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let email: Option<String> = row.try_get("email")?;
            out.push(AdminUserRow::from_email(
                row.try_get("id")?,
                row.try_get("created_at")?,
                email.as_deref(),
            ));
        }
        Ok(out)
    }

    async fn count_users(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM auth.users")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }
}
