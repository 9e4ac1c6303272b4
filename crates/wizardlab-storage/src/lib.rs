//! Persistence and outbound HTTP for WizardLab.

pub mod http;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod pg;
pub mod repo;

pub use http::{
    classify_reqwest_error, classify_status, snip_body, BackoffPolicy, FetchError,
    FetchedResponse, HttpClientConfig, HttpFetcher, HttpRequest, ProxyConfig, RetryDisposition,
};
#[cfg(any(test, feature = "testing"))]
pub use memory::MemoryStore;
pub use pg::PgStore;
pub use repo::{
    collect_mix_events, cosine_similarity, AnalyticsStore, DailyMetric, EmbeddingCandidate,
    EnrichmentUpdate, SocialCounters, SocialEngageStore, StoreError,
};

pub const CRATE_NAME: &str = "wizardlab-storage";
