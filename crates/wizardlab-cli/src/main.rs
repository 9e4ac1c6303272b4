use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use wizardlab_adapters::{fetcher_from_config, DecodoConfig};
use wizardlab_core::reddit_url::normalize_reddit_post_url;
use wizardlab_ingest::EnrichmentPipeline;
use wizardlab_storage::PgStore;

#[derive(Debug, Parser)]
#[command(name = "wizardlab-cli")]
#[command(about = "WizardLab dashboard, Reddit ingest and enrichment")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the admin dashboard and API.
    Serve,
    /// Enrich one batch of pending social posts.
    Enrich,
    /// Run enrichment on SOCIAL_INGEST_CRON until interrupted.
    Schedule,
    /// Apply database migrations.
    Migrate,
    /// Fetch one Reddit post through the configured fetcher and print it.
    Resolve { url: String },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,sqlx=warn".into());
    let json = std::env::var("WIZARDLAB_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_target(true)))
        .init();
}

async fn connect_store() -> Result<PgStore> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
    PgStore::connect(&database_url)
        .await
        .context("connecting to postgres")
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => wizardlab_web::serve_from_env().await?,
        Commands::Enrich => {
            let summary = wizardlab_ingest::run_enrichment_once_from_env().await?;
            println!(
                "enrich complete: run_id={} processed={} ready={} ignored={} duplicates={} errors={} skipped={}",
                summary.run_id,
                summary.processed,
                summary.ready,
                summary.ignored,
                summary.duplicates,
                summary.errors,
                summary.skipped
            );
        }
        Commands::Schedule => {
            let store = connect_store().await?;
            let pipeline = Arc::new(EnrichmentPipeline::from_env(Arc::new(store))?);
            let Some(mut sched) = pipeline.maybe_build_scheduler().await? else {
                bail!("scheduler is disabled; set SOCIAL_INGEST_SCHEDULER_ENABLED=true");
            };
            sched.start().await.context("starting scheduler")?;
            info!(cron = %pipeline.config().cron, "scheduler running, ctrl-c to stop");
            tokio::signal::ctrl_c().await?;
            sched.shutdown().await.context("stopping scheduler")?;
        }
        Commands::Migrate => {
            connect_store().await?.migrate().await?;
            println!("migrations applied");
        }
        Commands::Resolve { url } => {
            let Some(post_url) = normalize_reddit_post_url(&url) else {
                bail!("unsupported Reddit URL: {url}");
            };
            let fetcher = fetcher_from_config(&DecodoConfig::from_env())?;
            let post = fetcher.fetch_post(&post_url).await?;
            println!("{}", serde_json::to_string_pretty(&post)?);
        }
    }

    Ok(())
}
