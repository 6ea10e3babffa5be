use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod analysis;
pub mod cache;
pub mod config_file;
pub mod engine;
pub mod fetch;
pub mod matching;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod overview;
pub mod providers;
#[cfg(test)]
pub(crate) mod testing;

// Re-export for convenience
pub use analysis::{DepartmentAnalysis, FacultyPerformance, PublicationFilter, SortField};
pub use cache::{DEFAULT_PERSISTED_TTL, DEFAULT_SESSION_TTL, ResultCache};
pub use engine::MetricsEngine;
pub use fetch::{
    DEFAULT_REQUEST_SPACING, FetchError, Fetcher, HttpTransport, RequestPacer, RetryPolicy,
    Transport,
};
pub use models::{
    AggregatedMetrics, AuthorProfile, ContributorSummary, FacultyRecord, GroupCount,
    InstitutionOverview, InstitutionProfile, MonthStat, OpenAccessStats, Provider, Publication,
    QueryOutcome, QueryScope, ScopeMode, SearchOutcome, YearStat,
};
pub use orchestrator::{BATCH_SIZE, BatchOrchestrator, FOUNDING_YEAR};

/// Everything that can go wrong answering one scoped query.
///
/// An empty result set is *not* an error; it aggregates to an all-zero
/// outcome. Batch-level failures are handled inside the orchestrator and
/// never surface here.
#[derive(Error, Debug)]
pub enum QueryError {
    /// The rows in scope carry no identifier for the chosen provider.
    #[error("no identifiers to query for this scope")]
    NoIdentifiers,
    #[error("fetch error: {0}")]
    Fetch(#[from] fetch::FetchError),
    #[error("malformed provider response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Progress events emitted during a batched query or an overview run.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A batch of identifiers started fetching.
    BatchStarted { index: usize, total: usize },
    /// A batch finished and contributed `kept` publications.
    BatchCompleted {
        index: usize,
        total: usize,
        kept: usize,
    },
    /// A batch failed and was skipped.
    BatchFailed {
        index: usize,
        total: usize,
        message: String,
    },
    /// One page of a year-iterated all-time query arrived.
    PageFetched {
        year: i32,
        page: usize,
        records: usize,
    },
    /// Month-window queries found nothing; the run switched to year-wide
    /// queries with local month filtering for the rest of the batches.
    MonthFallback,
    /// One section of the institution overview finished loading.
    SectionLoaded { name: &'static str },
    /// The answer came straight from the result cache.
    CacheHit,
}

/// Configuration for the metrics engine.
#[derive(Clone)]
pub struct Config {
    /// Elsevier API key; Scopus queries fail with HTTP 401 without one.
    pub scopus_api_key: Option<String>,
    /// Contact address advertised to OpenAlex (their polite pool).
    pub openalex_mailto: Option<String>,
    /// OpenAlex institution id used by the overview endpoints.
    pub institution_id: String,
    /// Minimum spacing between any two requests to one provider.
    pub request_spacing_ms: u64,
    pub retry: RetryPolicy,
    /// Injected result cache; when `None`, one is built from `cache_path`
    /// and the TTLs below.
    pub result_cache: Option<Arc<ResultCache>>,
    /// Path to the persistent SQLite result cache (optional).
    pub cache_path: Option<PathBuf>,
    /// TTL in seconds for in-memory entries. Default: 5 minutes.
    pub cache_session_ttl_secs: u64,
    /// TTL in seconds for persisted entries. Default: 30 minutes.
    pub cache_persisted_ttl_secs: u64,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field(
                "scopus_api_key",
                &self.scopus_api_key.as_ref().map(|_| "***"),
            )
            .field(
                "openalex_mailto",
                &self.openalex_mailto.as_ref().map(|_| "***"),
            )
            .field("institution_id", &self.institution_id)
            .field("request_spacing_ms", &self.request_spacing_ms)
            .field("retry", &self.retry)
            .field(
                "result_cache",
                &self.result_cache.as_ref().map(|c| format!("{c:?}")),
            )
            .field("cache_path", &self.cache_path)
            .field("cache_session_ttl_secs", &self.cache_session_ttl_secs)
            .field("cache_persisted_ttl_secs", &self.cache_persisted_ttl_secs)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scopus_api_key: None,
            openalex_mailto: None,
            institution_id: providers::openalex::DEFAULT_INSTITUTION_ID.to_string(),
            request_spacing_ms: DEFAULT_REQUEST_SPACING.as_millis() as u64,
            retry: RetryPolicy::default(),
            result_cache: Some(Arc::new(ResultCache::default())),
            cache_path: None,
            cache_session_ttl_secs: DEFAULT_SESSION_TTL.as_secs(),
            cache_persisted_ttl_secs: DEFAULT_PERSISTED_TTL.as_secs(),
        }
    }
}

/// Build a [`ResultCache`] from configuration.
///
/// If `cache_path` is set, opens a persistent SQLite-backed cache.
/// Otherwise, returns an in-memory-only cache.
pub fn build_result_cache(
    cache_path: Option<&std::path::Path>,
    session_ttl_secs: u64,
    persisted_ttl_secs: u64,
) -> Arc<ResultCache> {
    let session_ttl = Duration::from_secs(session_ttl_secs);
    let persisted_ttl = Duration::from_secs(persisted_ttl_secs);
    if let Some(path) = cache_path {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match ResultCache::open(path, session_ttl, persisted_ttl) {
            Ok(cache) => {
                tracing::info!(path = %path.display(), "opened persistent result cache");
                return Arc::new(cache);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to open cache, falling back to in-memory");
            }
        }
    }
    Arc::new(ResultCache::new(session_ttl, persisted_ttl))
}
