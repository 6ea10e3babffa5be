//! OpenAlex institution overview: a dashboard's worth of independent
//! aggregates, fetched in small concurrent groups with a pause between
//! groups. The shared pacer spaces the actual wire traffic, so "concurrent"
//! here means issued-and-awaited-jointly, not parallel hammering.
//!
//! Any failing section fails the whole overview; the one exception is
//! publisher display-name resolution, which falls back to the name the
//! group bucket itself carried.

use std::time::Duration;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::fetch::Fetcher;
use crate::models::{GroupCount, InstitutionOverview, Publication};
use crate::orchestrator::current_year;
use crate::providers::openalex::{
    self, GroupBucket, OpenAlexAuthor, OpenAlexInstitution, OpenAlexList, OpenAlexPublisher,
    OpenAlexWork,
};
use crate::{ProgressEvent, QueryError};

/// Pause between overview fetch groups.
pub const INTER_GROUP_DELAY: Duration = Duration::from_secs(3);

/// Publisher display-name lookups in flight at once.
const PUBLISHER_DETAIL_CONCURRENCY: usize = 4;

/// Fetch the full institution dashboard. Cancellation between groups
/// returns whatever sections were already assembled.
pub async fn institution_overview(
    fetcher: &Fetcher,
    institution_id: &str,
    progress: &(dyn Fn(ProgressEvent) + Send + Sync),
    cancel: &CancellationToken,
) -> Result<InstitutionOverview, QueryError> {
    tracing::info!(institution_id, "loading institution overview");
    let mut overview = InstitutionOverview::default();

    // Group 1: identity, output history, recency, people.
    let (institution, open_access_works, latest, authors) = futures_util::try_join!(
        fetch_institution(fetcher, institution_id),
        fetch_open_access_count(fetcher, institution_id),
        fetch_works(fetcher, openalex::latest_publications_url(institution_id)),
        fetch_authors(fetcher, institution_id),
    )?;
    overview.profile = openalex::institution_profile(&institution);
    progress(ProgressEvent::SectionLoaded { name: "profile" });
    overview.yearly_output =
        openalex::yearly_from_counts(&institution.counts_by_year, current_year());
    progress(ProgressEvent::SectionLoaded { name: "yearly_output" });
    overview.open_access_works = open_access_works;
    progress(ProgressEvent::SectionLoaded { name: "open_access" });
    overview.latest_publications = latest;
    progress(ProgressEvent::SectionLoaded { name: "latest_publications" });
    overview.top_contributors = openalex::top_contributors(authors, institution_id);
    progress(ProgressEvent::SectionLoaded { name: "contributors" });

    if cancel.is_cancelled() {
        return Ok(overview);
    }
    tokio::time::sleep(INTER_GROUP_DELAY).await;

    // Group 2: citations and distributions.
    let (top_cited, subjects, countries, work_types) = futures_util::try_join!(
        fetch_works(fetcher, openalex::top_citations_url(institution_id)),
        fetch_groups(
            fetcher,
            openalex::subject_distribution_url(institution_id, current_year()),
        ),
        fetch_groups(fetcher, openalex::collaborator_countries_url(institution_id)),
        fetch_groups(fetcher, openalex::work_types_url(institution_id)),
    )?;
    overview.top_cited = top_cited;
    progress(ProgressEvent::SectionLoaded { name: "top_cited" });
    overview.subjects = top_n(subjects, 10);
    progress(ProgressEvent::SectionLoaded { name: "subjects" });
    overview.collaborating_countries = top_n(countries, 10);
    progress(ProgressEvent::SectionLoaded { name: "countries" });
    overview.work_types = work_types;
    progress(ProgressEvent::SectionLoaded { name: "work_types" });

    if cancel.is_cancelled() {
        return Ok(overview);
    }
    tokio::time::sleep(INTER_GROUP_DELAY).await;

    // Group 3: publishers and funding.
    let (publishers, funders) = futures_util::try_join!(
        fetch_publishers(fetcher, institution_id),
        fetch_groups(fetcher, openalex::funding_agencies_url(institution_id)),
    )?;
    overview.publishers = publishers;
    progress(ProgressEvent::SectionLoaded { name: "publishers" });
    overview.funders = top_n(funders, 10);
    progress(ProgressEvent::SectionLoaded { name: "funders" });

    Ok(overview)
}

fn top_n(mut groups: Vec<GroupCount>, n: usize) -> Vec<GroupCount> {
    groups.truncate(n);
    groups
}

async fn fetch_institution(
    fetcher: &Fetcher,
    institution_id: &str,
) -> Result<OpenAlexInstitution, QueryError> {
    let body = fetcher
        .fetch_text(&openalex::institution_url(institution_id))
        .await?;
    Ok(serde_json::from_str(&body)?)
}

/// Count of open-access works: the `group_by=open_access.is_oa` bucket
/// keyed `"true"`.
async fn fetch_open_access_count(
    fetcher: &Fetcher,
    institution_id: &str,
) -> Result<u64, QueryError> {
    let body = fetcher
        .fetch_text(&openalex::open_access_group_url(institution_id))
        .await?;
    let list: OpenAlexList<OpenAlexWork> = serde_json::from_str(&body)?;
    Ok(list
        .group_by
        .iter()
        .find(|bucket| bucket.key.as_deref() == Some("true"))
        .map(|bucket| bucket.count)
        .unwrap_or(0))
}

async fn fetch_works(fetcher: &Fetcher, url: String) -> Result<Vec<Publication>, QueryError> {
    let body = fetcher.fetch_text(&url).await?;
    let list: OpenAlexList<OpenAlexWork> = serde_json::from_str(&body)?;
    Ok(list
        .results
        .iter()
        .enumerate()
        .filter_map(|(i, work)| openalex::normalize_work(work, i))
        .collect())
}

async fn fetch_groups(fetcher: &Fetcher, url: String) -> Result<Vec<GroupCount>, QueryError> {
    let body = fetcher.fetch_text(&url).await?;
    let list: OpenAlexList<OpenAlexWork> = serde_json::from_str(&body)?;
    Ok(openalex::buckets_to_groups(&list.group_by))
}

async fn fetch_authors(
    fetcher: &Fetcher,
    institution_id: &str,
) -> Result<Vec<OpenAlexAuthor>, QueryError> {
    let body = fetcher
        .fetch_text(&openalex::top_authors_url(institution_id))
        .await?;
    let list: OpenAlexList<OpenAlexAuthor> = serde_json::from_str(&body)?;
    Ok(list.results)
}

/// Publisher lineage buckets with display names resolved through the
/// publisher detail endpoint, a few lookups at a time.
async fn fetch_publishers(
    fetcher: &Fetcher,
    institution_id: &str,
) -> Result<Vec<GroupCount>, QueryError> {
    let body = fetcher
        .fetch_text(&openalex::publishers_group_url(institution_id))
        .await?;
    let list: OpenAlexList<OpenAlexWork> = serde_json::from_str(&body)?;

    let lookups: Vec<_> = list
        .group_by
        .iter()
        .map(|bucket| async move {
            GroupCount {
                key: resolve_publisher_name(fetcher, bucket).await,
                count: bucket.count as u32,
            }
        })
        .collect();
    let resolved: Vec<GroupCount> = futures_util::stream::iter(lookups)
        .buffered(PUBLISHER_DETAIL_CONCURRENCY)
        .collect()
        .await;
    Ok(resolved)
}

async fn resolve_publisher_name(fetcher: &Fetcher, bucket: &GroupBucket) -> String {
    if let Some(id) = bucket.key.as_deref() {
        let url = openalex::publisher_detail_url(id);
        match fetcher.fetch_text(&url).await {
            Ok(body) => {
                if let Ok(publisher) = serde_json::from_str::<OpenAlexPublisher>(&body)
                    && let Some(name) = publisher.display_name
                {
                    return name;
                }
            }
            Err(error) => {
                tracing::debug!(publisher = id, %error, "publisher detail lookup failed");
            }
        }
    }
    bucket
        .key_display_name
        .clone()
        .or_else(|| bucket.key.clone())
        .unwrap_or_else(|| "Unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{RequestPacer, RetryPolicy};
    use crate::testing::MockTransport;
    use std::sync::Arc;

    fn quick_fetcher(transport: Arc<MockTransport>) -> Fetcher {
        let pacer = RequestPacer::new(Duration::from_millis(1));
        let policy = RetryPolicy {
            jitter: false,
            ..RetryPolicy::default()
        };
        Fetcher::new(transport, pacer, policy)
    }

    /// One body that satisfies every section's decode: institution fields,
    /// a work in `results`, and a `"true"` group bucket.
    fn omnibus_body() -> String {
        serde_json::json!({
            "display_name": "Example Institute of Technology",
            "works_count": 1234,
            "cited_by_count": 56789,
            "summary_stats": {"h_index": 150, "i10_index": 900},
            "counts_by_year": [
                {"year": current_year(), "works_count": 40, "cited_by_count": 800}
            ],
            "meta": {"count": 1},
            "results": [{
                "id": "https://openalex.org/W777",
                "title": "Campus-Scale Energy Modeling",
                "publication_year": 2024,
                "publication_date": "2024-05-01",
                "cited_by_count": 42
            }],
            "group_by": [
                {"key": "true", "key_display_name": "Open", "count": 7}
            ]
        })
        .to_string()
    }

    #[tokio::test(start_paused = true)]
    async fn assembles_every_section_from_responses() {
        let transport = Arc::new(MockTransport::with_fallback(
            vec![],
            MockTransport::ok(&omnibus_body()),
        ));
        let fetcher = quick_fetcher(transport.clone());

        let cancel = CancellationToken::new();
        let overview = institution_overview(&fetcher, "i65181880", &|_| {}, &cancel)
            .await
            .unwrap();

        assert_eq!(overview.profile.display_name, "Example Institute of Technology");
        assert_eq!(overview.profile.works_count, 1234);
        assert_eq!(overview.profile.h_index, 150);
        assert_eq!(overview.open_access_works, 7);
        assert_eq!(overview.latest_publications.len(), 1);
        assert_eq!(
            overview.latest_publications[0].title,
            "Campus-Scale Energy Modeling"
        );
        assert_eq!(overview.top_cited.len(), 1);
        assert_eq!(overview.yearly_output.len(), 10);
        assert_eq!(overview.yearly_output[9].count, 40);
        assert_eq!(overview.subjects.len(), 1);
        assert_eq!(overview.work_types.len(), 1);
        assert_eq!(overview.funders.len(), 1);
        // The lone publisher bucket resolves through the detail endpoint,
        // whose (shared) body carries the institution display name.
        assert_eq!(overview.publishers.len(), 1);
        assert_eq!(
            overview.publishers[0].key,
            "Example Institute of Technology"
        );

        // 10 section requests plus 1 publisher detail lookup.
        assert_eq!(transport.call_count(), 11);
        let calls = transport.calls().join("\n");
        assert!(calls.contains("/institutions/i65181880"));
        assert!(calls.contains("group_by=open_access.is_oa"));
        assert!(calls.contains("sort=publication_year:desc"));
        assert!(calls.contains("/authors?filter=affiliations.institution.id:i65181880"));
        assert!(calls.contains("cited_by_count:500-10000"));
        assert!(calls.contains("group_by=primary_topic.field.id"));
        assert!(calls.contains("group_by=authorships.countries"));
        assert!(calls.contains("group_by=type"));
        assert!(calls.contains("group_by=primary_location.source.publisher_lineage"));
        assert!(calls.contains("group_by=grants.funder"));
    }

    #[tokio::test(start_paused = true)]
    async fn section_failure_fails_the_overview() {
        let transport = Arc::new(MockTransport::with_fallback(
            vec![MockTransport::status(500, "openalex down")],
            MockTransport::ok(&omnibus_body()),
        ));
        let fetcher = quick_fetcher(transport);

        let cancel = CancellationToken::new();
        let result = institution_overview(&fetcher, "i65181880", &|_| {}, &cancel).await;
        assert!(matches!(
            result,
            Err(QueryError::Fetch(crate::fetch::FetchError::Http {
                status: 500,
                ..
            }))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_after_first_group_returns_partial_overview() {
        let transport = Arc::new(MockTransport::with_fallback(
            vec![],
            MockTransport::ok(&omnibus_body()),
        ));
        let fetcher = quick_fetcher(transport.clone());

        let cancel = CancellationToken::new();
        let cancel_inside = cancel.clone();
        let overview = institution_overview(
            &fetcher,
            "i65181880",
            &move |event| {
                if matches!(event, ProgressEvent::SectionLoaded { name: "contributors" }) {
                    cancel_inside.cancel();
                }
            },
            &cancel,
        )
        .await
        .unwrap();

        // Group 1 landed, groups 2 and 3 never ran.
        assert_eq!(transport.call_count(), 4);
        assert_eq!(overview.profile.works_count, 1234);
        assert!(overview.top_cited.is_empty());
        assert!(overview.publishers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn publisher_detail_failure_falls_back_to_bucket_name() {
        let group_body = serde_json::json!({
            "group_by": [{
                "key": "https://openalex.org/P4310319965",
                "key_display_name": "Springer Nature",
                "count": 120
            }]
        })
        .to_string();
        let transport = Arc::new(MockTransport::new(vec![
            MockTransport::ok(&group_body),
            MockTransport::status(500, "nope"),
        ]));
        let fetcher = quick_fetcher(transport.clone());

        let publishers = fetch_publishers(&fetcher, "i65181880").await.unwrap();
        assert_eq!(publishers.len(), 1);
        assert_eq!(publishers[0].key, "Springer Nature");
        assert_eq!(publishers[0].count, 120);
        assert!(transport.calls()[1].contains("/publishers/P4310319965"));
    }
}
