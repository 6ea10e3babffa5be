//! Cache-first entry points: one engine owning a fetcher per provider, the
//! shared result cache, and the orchestration glue between them.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::cache::ResultCache;
use crate::fetch::{Fetcher, HttpTransport, RequestPacer};
use crate::metrics::{self, RollupSpan};
use crate::models::{AuthorProfile, InstitutionOverview, Provider, QueryOutcome, QueryScope};
use crate::orchestrator::{self, BatchOrchestrator};
use crate::overview;
use crate::providers::scopus;
use crate::{Config, ProgressEvent, QueryError};

/// Most roster author profiles fetched per run.
pub const MAX_AUTHOR_PROFILES: usize = 10;

/// The query pipeline behind every CLI subcommand: check the cache, run the
/// batched search, aggregate, fetch author profiles, cache the outcome.
pub struct MetricsEngine {
    config: Config,
    cache: Arc<ResultCache>,
    scopus_fetcher: Arc<Fetcher>,
    openalex_fetcher: Arc<Fetcher>,
}

impl MetricsEngine {
    /// Build an engine from configuration: one fetcher per provider, each
    /// with its own pacer so one provider's slowdowns never throttle the
    /// other. A missing Scopus key is not an error here; the provider
    /// answers 401 when it is actually queried.
    pub fn new(config: Config) -> Result<Self, QueryError> {
        let spacing = Duration::from_millis(config.request_spacing_ms);

        let scopus_key = config.scopus_api_key.clone().unwrap_or_default();
        let scopus_transport = Arc::new(HttpTransport::scopus(&scopus_key)?);
        let scopus_fetcher = Arc::new(Fetcher::new(
            scopus_transport,
            RequestPacer::new(spacing),
            config.retry.clone(),
        ));

        let openalex_transport = Arc::new(HttpTransport::openalex(
            config.openalex_mailto.as_deref(),
        )?);
        let openalex_fetcher = Arc::new(Fetcher::new(
            openalex_transport,
            RequestPacer::new(spacing),
            config.retry.clone(),
        ));

        let cache = config.result_cache.clone().unwrap_or_else(|| {
            crate::build_result_cache(
                config.cache_path.as_deref(),
                config.cache_session_ttl_secs,
                config.cache_persisted_ttl_secs,
            )
        });

        Ok(Self {
            config,
            cache,
            scopus_fetcher,
            openalex_fetcher,
        })
    }

    /// Assemble an engine from already-built parts (custom transports,
    /// shared caches).
    pub fn with_parts(
        config: Config,
        scopus_fetcher: Arc<Fetcher>,
        openalex_fetcher: Arc<Fetcher>,
        cache: Arc<ResultCache>,
    ) -> Self {
        Self {
            config,
            cache,
            scopus_fetcher,
            openalex_fetcher,
        }
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// Requests issued across both providers since the engine was built.
    pub fn requests_issued(&self) -> u64 {
        self.scopus_fetcher.request_count() + self.openalex_fetcher.request_count()
    }

    fn fetcher_for(&self, provider: Provider) -> &Arc<Fetcher> {
        match provider {
            Provider::Scopus => &self.scopus_fetcher,
            Provider::OpenAlex => &self.openalex_fetcher,
        }
    }

    /// Answer one scoped query, cache-first.
    ///
    /// A cache hit short-circuits the whole fetch pipeline. Otherwise the
    /// batched search runs, the metrics are aggregated, Scopus author
    /// profiles are attached, and the outcome is cached, unless the run
    /// was cancelled part-way, which must never poison the cache.
    pub async fn scoped_metrics(
        &self,
        scope: &QueryScope,
        progress: &(dyn Fn(ProgressEvent) + Send + Sync),
        cancel: &CancellationToken,
    ) -> Result<QueryOutcome, QueryError> {
        if scope.identifiers.is_empty() {
            return Err(QueryError::NoIdentifiers);
        }

        let fingerprint = scope.fingerprint();
        if let Some(outcome) = self.cache.get(&fingerprint) {
            tracing::info!(%fingerprint, "serving scoped query from cache");
            progress(ProgressEvent::CacheHit);
            return Ok(outcome);
        }

        tracing::info!(
            provider = %scope.provider,
            identifiers = scope.identifiers.len(),
            year = ?scope.year,
            "running scoped query"
        );
        let orchestrator = BatchOrchestrator::new(self.fetcher_for(scope.provider).clone());
        let search = orchestrator.run(scope, progress, cancel).await;

        let span = rollup_span(scope);
        let metrics = metrics::aggregate(&search.publications, &span);

        let author_profiles = if scope.provider == Provider::Scopus {
            self.author_profiles(scope, cancel).await
        } else {
            Vec::new()
        };
        let average_h_index = metrics::average_h_index(&author_profiles);

        let outcome = QueryOutcome {
            provider: Some(scope.provider),
            total_count: search.total_count,
            publications: search.publications,
            metrics,
            author_profiles,
            average_h_index,
        };

        if cancel.is_cancelled() {
            tracing::debug!("query cancelled, skipping cache write");
        } else {
            self.cache.insert(&fingerprint, &outcome);
        }
        Ok(outcome)
    }

    /// Scopus author-retrieval lookups for the first identifiers in scope.
    /// A failed lookup is logged and skipped, never fatal.
    async fn author_profiles(
        &self,
        scope: &QueryScope,
        cancel: &CancellationToken,
    ) -> Vec<AuthorProfile> {
        let fetcher = self.fetcher_for(Provider::Scopus);
        let mut profiles = Vec::new();
        for author_id in scope.identifiers.iter().take(MAX_AUTHOR_PROFILES) {
            if cancel.is_cancelled() {
                break;
            }
            match fetch_author_profile(fetcher, author_id).await {
                Ok(Some(profile)) => profiles.push(profile),
                Ok(None) => {
                    tracing::debug!(author_id, "author profile absent from response");
                }
                Err(error) => {
                    tracing::warn!(author_id, %error, "author profile lookup failed, skipping");
                }
            }
        }
        profiles
    }

    /// Institution-wide OpenAlex overview for the configured institution.
    pub async fn institution_overview(
        &self,
        progress: &(dyn Fn(ProgressEvent) + Send + Sync),
        cancel: &CancellationToken,
    ) -> Result<InstitutionOverview, QueryError> {
        overview::institution_overview(
            &self.openalex_fetcher,
            &self.config.institution_id,
            progress,
            cancel,
        )
        .await
    }
}

fn rollup_span(scope: &QueryScope) -> RollupSpan {
    match scope.year {
        Some(year) => RollupSpan {
            start_year: year,
            end_year: year,
            months: (!scope.is_full_year()).then_some((scope.start_month, scope.end_month)),
        },
        None => RollupSpan::years(orchestrator::FOUNDING_YEAR, orchestrator::current_year()),
    }
}

async fn fetch_author_profile(
    fetcher: &Fetcher,
    author_id: &str,
) -> Result<Option<AuthorProfile>, QueryError> {
    let url = scopus::author_profile_url(author_id);
    let body = fetcher.fetch_text(&url).await?;
    let response: scopus::AuthorRetrievalResponse = serde_json::from_str(&body)?;
    Ok(scopus::parse_author_profile(response, author_id))
}
