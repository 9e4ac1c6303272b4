//! Core domain model for WizardLab: engagement lifecycle, ingest payloads and analytics math.

pub mod analytics;
pub mod engage;
pub mod holdings;
pub mod payload;
pub mod reddit_url;
pub mod status;
pub mod users;

pub use analytics::{
    compute_insight_data, compute_mix_insights, extract_symbols_from_positions,
    summarize_positions, summary_boundaries, top_items, InsightData, InsightSummaryMetrics,
    MixEvent, MixInsights, PowerUserRow, RangeOption, SourceEngagementRow,
    TemplateEngagementRow, TimeFilter, TopCard, TopItem,
};
pub use engage::{
    merge_extra, AiMetadata, NewSocialEngage, ReplyCategory, ReplyPriority, RiskFlags,
    SocialEngageRow,
};
pub use holdings::{build_etf_summary, normalize_symbol_filter, EtfHolding, EtfSummaryRow};
pub use payload::{normalize_ingest_payload, NormalizedIngestPayload, PayloadError};
pub use status::{SocialStatus, TransitionError};
pub use users::{email_domain, AdminUserRow};

pub const CRATE_NAME: &str = "wizardlab-core";

/// Platform key used for Reddit rows throughout the pipeline.
pub const PLATFORM_REDDIT: &str = "reddit";
