//! Batch orchestration of scoped provider queries.
//!
//! Identifier sets are partitioned into fixed-size batches to stay inside the
//! providers' query-complexity limits, and the batches run *sequentially* with
//! a fixed inter-batch delay: deliberate pacing, not a fan-out. A failing
//! batch is logged and skipped; whatever the other batches gathered is still
//! returned. Cancellation is honored between batches and between pages, never
//! mid-request.
//!
//! Month windows are pushed down to the provider where its date-range grammar
//! allows; if the first month-scoped batch comes back empty, the run assumes
//! the grammar is not honored for this account tier and switches to year-wide
//! queries with a local month filter, sticky for the rest of the run.

use std::sync::Arc;
use std::time::Duration;

use chrono::Datelike;
use tokio_util::sync::CancellationToken;

use crate::fetch::Fetcher;
use crate::models::{Provider, Publication, QueryScope, SearchOutcome};
use crate::providers::{self, openalex, scopus};
use crate::{ProgressEvent, QueryError};

/// Identifiers per batch query.
pub const BATCH_SIZE: usize = 10;

/// Pause between consecutive batch queries.
pub const INTER_BATCH_DELAY: Duration = Duration::from_millis(200);

/// First year covered by all-time queries.
pub const FOUNDING_YEAR: i32 = 2008;

pub(crate) fn current_year() -> i32 {
    chrono::Utc::now().year()
}

/// Runs one scoped query end to end: partitions the identifier set, issues
/// the batch queries through the shared [`Fetcher`], normalizes the raw
/// entries, and applies any month filtering the provider could not do
/// server-side.
pub struct BatchOrchestrator {
    fetcher: Arc<Fetcher>,
    batch_size: usize,
    inter_batch_delay: Duration,
}

impl BatchOrchestrator {
    pub fn new(fetcher: Arc<Fetcher>) -> Self {
        Self {
            fetcher,
            batch_size: BATCH_SIZE,
            inter_batch_delay: INTER_BATCH_DELAY,
        }
    }

    /// Override the partition size and inter-batch pause.
    pub fn with_pacing(mut self, batch_size: usize, inter_batch_delay: Duration) -> Self {
        self.batch_size = batch_size.max(1);
        self.inter_batch_delay = inter_batch_delay;
        self
    }

    /// Run the scoped query across every batch of the scope's identifiers.
    ///
    /// Never fails: batch errors are logged (`warn!`) and the batch skipped,
    /// and `total_count` reflects the entries actually kept.
    pub async fn run(
        &self,
        scope: &QueryScope,
        progress: &(dyn Fn(ProgressEvent) + Send + Sync),
        cancel: &CancellationToken,
    ) -> SearchOutcome {
        let batches: Vec<&[String]> = scope.identifiers.chunks(self.batch_size).collect();
        let total = batches.len();
        tracing::debug!(
            provider = %scope.provider,
            identifiers = scope.identifiers.len(),
            batches = total,
            "starting batched query"
        );

        // The month window is pushed to the provider only for in-year windows
        // on a concrete year; wrapped windows (e.g. Aug-May) and all-time
        // scopes are fetched year-wide and filtered here.
        let server_window = if scope.year.is_some() && !scope.is_full_year() && !scope.wraps_year()
        {
            Some((scope.start_month, scope.end_month))
        } else {
            None
        };
        // Sticky for the rest of the run once set.
        let mut month_fallback = false;

        let mut publications: Vec<Publication> = Vec::new();
        for (index, ids) in batches.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::debug!(done = index, total, "query cancelled between batches");
                break;
            }
            if index > 0 {
                tokio::time::sleep(self.inter_batch_delay).await;
            }
            progress(ProgressEvent::BatchStarted { index, total });

            let window = if month_fallback { None } else { server_window };
            let mut fetched = self
                .fetch_batch(ids, scope, window, publications.len(), progress, cancel)
                .await;

            // First batch empty under a month window: assume the date-range
            // grammar found nothing it ever will, go year-wide and keep the
            // month restriction client-side from here on.
            if index == 0
                && window.is_some()
                && matches!(fetched, Ok(ref pubs) if pubs.is_empty())
            {
                month_fallback = true;
                progress(ProgressEvent::MonthFallback);
                tracing::debug!("month-scoped query empty, re-running batch year-wide");
                fetched = self
                    .fetch_batch(ids, scope, None, publications.len(), progress, cancel)
                    .await;
            }

            match fetched {
                Ok(mut batch_pubs) => {
                    // Anything fetched year-wide (wrap, all-time, fallback)
                    // still owes the scope its month restriction.
                    if window.is_none() || month_fallback {
                        apply_month_window(scope, &mut batch_pubs);
                    }
                    progress(ProgressEvent::BatchCompleted {
                        index,
                        total,
                        kept: batch_pubs.len(),
                    });
                    publications.extend(batch_pubs);
                }
                Err(error) => {
                    tracing::warn!(batch = index + 1, total, %error, "batch query failed, skipping");
                    progress(ProgressEvent::BatchFailed {
                        index,
                        total,
                        message: error.to_string(),
                    });
                }
            }
        }

        tracing::debug!(kept = publications.len(), "batched query finished");
        SearchOutcome {
            total_count: publications.len(),
            publications,
        }
    }

    /// Fetch one batch for the scope's year, or iterate the full year range
    /// when the scope is all-time.
    async fn fetch_batch(
        &self,
        ids: &[String],
        scope: &QueryScope,
        month_window: Option<(u8, u8)>,
        index_base: usize,
        progress: &(dyn Fn(ProgressEvent) + Send + Sync),
        cancel: &CancellationToken,
    ) -> Result<Vec<Publication>, QueryError> {
        if let Some(year) = scope.year {
            let (pubs, _) = self
                .fetch_page(scope.provider, ids, year, month_window, 0, index_base)
                .await?;
            return Ok(pubs);
        }

        // All-time: one year at a time, paginating until a short page.
        let mut all = Vec::new();
        let page_size = match scope.provider {
            Provider::Scopus => scopus::PAGE_SIZE,
            Provider::OpenAlex => openalex::PAGE_SIZE,
        };
        'years: for year in FOUNDING_YEAR..=current_year() {
            let mut page = 0;
            loop {
                if cancel.is_cancelled() {
                    break 'years;
                }
                let (pubs, raw_len) = self
                    .fetch_page(scope.provider, ids, year, None, page, index_base + all.len())
                    .await?;
                progress(ProgressEvent::PageFetched {
                    year,
                    page,
                    records: raw_len,
                });
                all.extend(pubs);
                if raw_len < page_size {
                    break;
                }
                page += 1;
            }
        }
        Ok(all)
    }

    /// One provider request: build the URL, fetch, decode, normalize.
    /// Returns the kept publications and the raw entry count (pagination
    /// stops on a short raw page, not on how many entries survived).
    async fn fetch_page(
        &self,
        provider: Provider,
        ids: &[String],
        year: i32,
        month_window: Option<(u8, u8)>,
        page: usize,
        index_base: usize,
    ) -> Result<(Vec<Publication>, usize), QueryError> {
        let url = match provider {
            Provider::Scopus => {
                let query = scopus::search_query(ids, Some(year), month_window);
                scopus::search_url(&query, page * scopus::PAGE_SIZE)
            }
            Provider::OpenAlex => {
                openalex::scoped_works_url(ids, Some(year), month_window, page + 1)
            }
        };
        let body = self.fetcher.fetch_text(&url).await?;

        let records: Vec<providers::RawRecord> = match provider {
            Provider::Scopus => {
                let response: scopus::ScopusSearchResponse = serde_json::from_str(&body)?;
                response
                    .entries()
                    .into_iter()
                    .map(providers::RawRecord::Scopus)
                    .collect()
            }
            Provider::OpenAlex => {
                let list: openalex::OpenAlexList<openalex::OpenAlexWork> =
                    serde_json::from_str(&body)?;
                list.results
                    .into_iter()
                    .map(providers::RawRecord::OpenAlex)
                    .collect()
            }
        };
        let raw_len = records.len();
        let publications = records
            .iter()
            .enumerate()
            .filter_map(|(i, record)| record.normalize(index_base + i))
            .collect();
        Ok((publications, raw_len))
    }
}

/// Keep only publications inside the scope's month window. Records whose
/// date never parsed (`year == 0`) cannot be placed in a month and are
/// dropped, matching a window filter on the raw cover date.
fn apply_month_window(scope: &QueryScope, publications: &mut Vec<Publication>) {
    if scope.is_full_year() {
        return;
    }
    publications.retain(|p| p.year != 0 && scope.month_in_window(p.month));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{RequestPacer, RetryPolicy};
    use crate::models::ScopeMode;
    use crate::testing::MockTransport;
    use std::sync::Mutex;

    fn quick_fetcher(transport: Arc<MockTransport>) -> Arc<Fetcher> {
        let pacer = RequestPacer::new(Duration::from_millis(1));
        let policy = RetryPolicy {
            jitter: false,
            ..RetryPolicy::default()
        };
        Arc::new(Fetcher::new(transport, pacer, policy))
    }

    fn scopus_body(dates_and_titles: &[(&str, &str)]) -> String {
        let entries: Vec<serde_json::Value> = dates_and_titles
            .iter()
            .enumerate()
            .map(|(i, (date, title))| {
                serde_json::json!({
                    "dc:identifier": format!("SCOPUS_ID:{i}"),
                    "dc:title": title,
                    "prism:coverDate": date,
                    "citedby-count": "3"
                })
            })
            .collect();
        serde_json::json!({
            "search-results": {
                "opensearch:totalResults": entries.len().to_string(),
                "entry": entries
            }
        })
        .to_string()
    }

    fn empty_scopus_body() -> String {
        serde_json::json!({
            "search-results": {
                "opensearch:totalResults": "0",
                "entry": [{"error": "Result set was empty"}]
            }
        })
        .to_string()
    }

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("70000{i:04}")).collect()
    }

    fn no_progress() -> impl Fn(ProgressEvent) + Send + Sync {
        |_| {}
    }

    // ── batching ──────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn splits_identifiers_into_batches_and_combines_results() {
        let transport = Arc::new(MockTransport::with_fallback(
            vec![],
            MockTransport::ok(&scopus_body(&[("2023-03-01", "A"), ("2023-07-12", "B")])),
        ));
        let orchestrator = BatchOrchestrator::new(quick_fetcher(transport.clone()));

        let mut scope = QueryScope::new(ids(23), Provider::Scopus, ScopeMode::Individual);
        scope.year = Some(2023);
        let cancel = CancellationToken::new();
        let outcome = orchestrator.run(&scope, &no_progress(), &cancel).await;

        assert_eq!(transport.call_count(), 3); // 23 ids → batches of 10, 10, 3
        assert_eq!(outcome.total_count, 6);
        assert_eq!(outcome.publications.len(), 6);
        for url in transport.calls() {
            assert!(url.contains("PUBYEAR"));
            assert!(!url.contains("PUBDATETXT"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn openalex_scope_builds_works_filter() {
        let body = serde_json::json!({
            "meta": {"count": 1},
            "results": [{
                "id": "https://openalex.org/W1",
                "title": "Graph Sampling",
                "publication_year": 2023,
                "publication_date": "2023-04-02",
                "cited_by_count": 9
            }]
        })
        .to_string();
        let transport = Arc::new(MockTransport::with_fallback(
            vec![],
            MockTransport::ok(&body),
        ));
        let orchestrator = BatchOrchestrator::new(quick_fetcher(transport.clone()));

        let mut scope = QueryScope::new(
            vec!["A5017898742".into()],
            Provider::OpenAlex,
            ScopeMode::Individual,
        );
        scope.year = Some(2023);
        let cancel = CancellationToken::new();
        let outcome = orchestrator.run(&scope, &no_progress(), &cancel).await;

        assert_eq!(outcome.total_count, 1);
        assert_eq!(outcome.publications[0].title, "Graph Sampling");
        let calls = transport.calls();
        assert!(calls[0].contains("/works?filter=author.id:A5017898742"));
        assert!(calls[0].contains("publication_year:2023"));
    }

    // ── month window and sticky fallback ──────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn month_window_pushed_to_provider_when_supported() {
        let transport = Arc::new(MockTransport::with_fallback(
            vec![],
            MockTransport::ok(&scopus_body(&[("2023-02-10", "In Window")])),
        ));
        let orchestrator = BatchOrchestrator::new(quick_fetcher(transport.clone()));

        let mut scope = QueryScope::new(ids(1), Provider::Scopus, ScopeMode::Individual);
        scope.year = Some(2023);
        scope.start_month = 2;
        scope.end_month = 4;
        let cancel = CancellationToken::new();
        let outcome = orchestrator.run(&scope, &no_progress(), &cancel).await;

        assert_eq!(outcome.total_count, 1);
        assert!(transport.calls()[0].contains("PUBDATETXT"));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_month_query_falls_back_to_year_and_sticks() {
        let responses = vec![
            // batch 1, month-scoped: nothing
            MockTransport::ok(&empty_scopus_body()),
            // batch 1 again, year-wide: one in-window, one out-of-window
            MockTransport::ok(&scopus_body(&[
                ("2023-02-15", "Kept"),
                ("2023-07-01", "Dropped"),
            ])),
            // batch 2 must already be year-wide
            MockTransport::ok(&scopus_body(&[("2023-03-20", "Also Kept")])),
        ];
        let transport = Arc::new(MockTransport::new(responses));
        let orchestrator = BatchOrchestrator::new(quick_fetcher(transport.clone()));

        let mut scope = QueryScope::new(ids(12), Provider::Scopus, ScopeMode::Department);
        scope.year = Some(2023);
        scope.start_month = 2;
        scope.end_month = 4;

        let fallback_events = Arc::new(Mutex::new(0usize));
        let seen = fallback_events.clone();
        let cancel = CancellationToken::new();
        let outcome = orchestrator
            .run(
                &scope,
                &move |event| {
                    if matches!(event, ProgressEvent::MonthFallback) {
                        *seen.lock().unwrap() += 1;
                    }
                },
                &cancel,
            )
            .await;

        let calls = transport.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[0].contains("PUBDATETXT"));
        // Once the fallback trips, no later call uses the date-range grammar.
        assert!(!calls[1].contains("PUBDATETXT"));
        assert!(!calls[2].contains("PUBDATETXT"));

        let titles: Vec<&str> = outcome
            .publications
            .iter()
            .map(|p| p.title.as_str())
            .collect();
        assert_eq!(titles, vec!["Kept", "Also Kept"]);
        assert_eq!(outcome.total_count, 2);
        assert_eq!(*fallback_events.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn wrapped_window_fetches_year_wide_and_filters_locally() {
        let transport = Arc::new(MockTransport::with_fallback(
            vec![],
            MockTransport::ok(&scopus_body(&[
                ("2023-11-05", "Autumn"),
                ("2023-02-10", "Winter"),
                ("2023-06-01", "Summer"),
            ])),
        ));
        let orchestrator = BatchOrchestrator::new(quick_fetcher(transport.clone()));

        // Academic-year style window: Aug through May.
        let mut scope = QueryScope::new(ids(1), Provider::Scopus, ScopeMode::Individual);
        scope.year = Some(2023);
        scope.start_month = 8;
        scope.end_month = 5;
        let cancel = CancellationToken::new();
        let outcome = orchestrator.run(&scope, &no_progress(), &cancel).await;

        assert!(!transport.calls()[0].contains("PUBDATETXT"));
        let titles: Vec<&str> = outcome
            .publications
            .iter()
            .map(|p| p.title.as_str())
            .collect();
        assert_eq!(titles, vec!["Autumn", "Winter"]);
    }

    // ── failure and cancellation ──────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn failed_batch_is_skipped_and_others_survive() {
        let responses = vec![
            MockTransport::ok(&scopus_body(&[("2023-01-05", "First")])),
            MockTransport::status(500, "server error"),
            MockTransport::ok(&scopus_body(&[("2023-05-05", "Third")])),
        ];
        let transport = Arc::new(MockTransport::new(responses));
        let orchestrator = BatchOrchestrator::new(quick_fetcher(transport.clone()));

        let mut scope = QueryScope::new(ids(25), Provider::Scopus, ScopeMode::Department);
        scope.year = Some(2023);

        let failed = Arc::new(Mutex::new(Vec::new()));
        let failed_seen = failed.clone();
        let cancel = CancellationToken::new();
        let outcome = orchestrator
            .run(
                &scope,
                &move |event| {
                    if let ProgressEvent::BatchFailed { index, .. } = event {
                        failed_seen.lock().unwrap().push(index);
                    }
                },
                &cancel,
            )
            .await;

        assert_eq!(outcome.total_count, 2);
        let titles: Vec<&str> = outcome
            .publications
            .iter()
            .map(|p| p.title.as_str())
            .collect();
        assert_eq!(titles, vec!["First", "Third"]);
        assert_eq!(*failed.lock().unwrap(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_between_batches() {
        let transport = Arc::new(MockTransport::with_fallback(
            vec![],
            MockTransport::ok(&scopus_body(&[("2023-01-05", "Only")])),
        ));
        let orchestrator = BatchOrchestrator::new(quick_fetcher(transport.clone()));

        let mut scope = QueryScope::new(ids(30), Provider::Scopus, ScopeMode::Department);
        scope.year = Some(2023);

        let cancel = CancellationToken::new();
        let cancel_inside = cancel.clone();
        let outcome = orchestrator
            .run(
                &scope,
                &move |event| {
                    if matches!(event, ProgressEvent::BatchCompleted { index: 0, .. }) {
                        cancel_inside.cancel();
                    }
                },
                &cancel,
            )
            .await;

        // Batches 2 and 3 never ran, but batch 1's publications are kept.
        assert_eq!(transport.call_count(), 1);
        assert_eq!(outcome.total_count, 1);
    }

    // ── all-time year iteration ───────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn all_time_iterates_years_and_paginates_until_short_page() {
        // First year: a full page (forces a second page), then a short page.
        // Every later year: empty via the fallback response.
        let full_page: Vec<(String, String)> = (0..scopus::PAGE_SIZE)
            .map(|i| ("2008-03-01".to_string(), format!("Paper {i}")))
            .collect();
        let full_refs: Vec<(&str, &str)> = full_page
            .iter()
            .map(|(d, t)| (d.as_str(), t.as_str()))
            .collect();
        let responses = vec![
            MockTransport::ok(&scopus_body(&full_refs)),
            MockTransport::ok(&scopus_body(&[("2008-09-01", "Tail")])),
        ];
        let transport = Arc::new(MockTransport::with_fallback(
            responses,
            MockTransport::ok(&empty_scopus_body()),
        ));
        let orchestrator = BatchOrchestrator::new(quick_fetcher(transport.clone()));

        let scope = QueryScope::new(ids(1), Provider::Scopus, ScopeMode::Individual);
        assert!(scope.year.is_none());
        let cancel = CancellationToken::new();
        let outcome = orchestrator.run(&scope, &no_progress(), &cancel).await;

        let years = (FOUNDING_YEAR..=current_year()).count();
        // Two pages for the founding year, one for each remaining year.
        assert_eq!(transport.call_count(), years + 1);
        assert_eq!(outcome.total_count, scopus::PAGE_SIZE + 1);

        let calls = transport.calls();
        assert!(calls[0].contains("start=0"));
        assert!(calls[1].contains(&format!("start={}", scopus::PAGE_SIZE)));
        assert!(calls[0].contains(&format!("PUBYEAR%20%3D%20{FOUNDING_YEAR}")));
    }
}
