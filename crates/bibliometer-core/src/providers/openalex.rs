//! OpenAlex API shapes, filter grammar, and normalization.
//!
//! OpenAlex is politely rate-limited and fully open; requests carry a
//! `mailto` User-Agent (set on the transport) instead of an API key. All
//! list endpoints share one envelope with `results` and optional
//! `group_by` buckets.

use crate::models::{
    ContributorSummary, InstitutionProfile, Publication, UNKNOWN_AUTHORS, UNKNOWN_JOURNAL,
    YearStat,
};
use serde::Deserialize;

pub const BASE_URL: &str = "https://api.openalex.org";

/// Default institution pinned by the dashboard.
pub const DEFAULT_INSTITUTION_ID: &str = "i65181880";

/// Page size for scoped works pagination.
pub const PAGE_SIZE: usize = 200;

/// Strip the resolver prefix OpenAlex puts on entity ids.
pub fn short_id(id: &str) -> &str {
    id.trim_start_matches("https://openalex.org/")
}

// ---------------------------------------------------------------------------
// Response shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAlexList<T> {
    pub meta: Option<OpenAlexMeta>,
    #[serde(default)]
    pub results: Vec<T>,
    #[serde(default)]
    pub group_by: Vec<GroupBucket>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAlexMeta {
    pub count: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupBucket {
    pub key: Option<String>,
    pub key_display_name: Option<String>,
    #[serde(default)]
    pub count: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenAlexWork {
    pub id: Option<String>,
    pub title: Option<String>,
    pub display_name: Option<String>,
    pub publication_year: Option<i32>,
    pub publication_date: Option<String>,
    pub cited_by_count: Option<u32>,
    pub doi: Option<String>,
    #[serde(rename = "type")]
    pub work_type: Option<String>,
    pub open_access: Option<OpenAccessInfo>,
    pub primary_location: Option<WorkLocation>,
    #[serde(default)]
    pub authorships: Vec<Authorship>,
    pub primary_topic: Option<Topic>,
    #[serde(default)]
    pub grants: Vec<Grant>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAccessInfo {
    #[serde(default)]
    pub is_oa: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkLocation {
    pub source: Option<WorkSource>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkSource {
    pub display_name: Option<String>,
    pub host_organization_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Authorship {
    pub author: Option<AuthorRef>,
    #[serde(default)]
    pub countries: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorRef {
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Topic {
    pub display_name: Option<String>,
    pub field: Option<TopicField>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopicField {
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Grant {
    pub funder_display_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAlexInstitution {
    pub display_name: Option<String>,
    pub works_count: Option<u64>,
    pub cited_by_count: Option<u64>,
    pub summary_stats: Option<SummaryStats>,
    #[serde(default)]
    pub counts_by_year: Vec<CountsByYear>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SummaryStats {
    pub h_index: Option<u32>,
    pub i10_index: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CountsByYear {
    pub year: i32,
    pub works_count: Option<u64>,
    pub cited_by_count: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenAlexAuthor {
    pub id: Option<String>,
    pub display_name: Option<String>,
    pub works_count: Option<u64>,
    pub cited_by_count: Option<u64>,
    pub summary_stats: Option<SummaryStats>,
    #[serde(default)]
    pub affiliations: Vec<AuthorAffiliation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorAffiliation {
    pub institution: Option<InstitutionRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstitutionRef {
    pub id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAlexPublisher {
    pub display_name: Option<String>,
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Map one OpenAlex work onto the canonical record; titleless works become
/// `None`.
pub fn normalize_work(work: &OpenAlexWork, fallback_index: usize) -> Option<Publication> {
    let title = work
        .title
        .as_deref()
        .or(work.display_name.as_deref())
        .filter(|t| !t.is_empty())?;

    let id = work
        .id
        .as_deref()
        .map(|i| short_id(i).to_string())
        .unwrap_or_else(|| fallback_index.to_string());

    let authors: Vec<&str> = work
        .authorships
        .iter()
        .take(3)
        .filter_map(|a| a.author.as_ref().and_then(|r| r.display_name.as_deref()))
        .collect();

    let month = work
        .publication_date
        .as_deref()
        .and_then(|d| d.get(5..7))
        .and_then(|m| m.parse::<u8>().ok())
        .filter(|m| (1..=12).contains(m))
        .unwrap_or(1);

    let doi = work
        .doi
        .as_deref()
        .map(|d| d.trim_start_matches("https://doi.org/").to_string())
        .filter(|d| !d.is_empty());
    let canonical_url = match (&doi, &work.id) {
        (Some(doi), _) => format!("https://doi.org/{doi}"),
        (None, Some(id)) => id.clone(),
        (None, None) => format!("{BASE_URL}/works/{fallback_index}"),
    };

    let mut countries: Vec<String> = Vec::new();
    for authorship in &work.authorships {
        for country in &authorship.countries {
            if !countries.iter().any(|c| c == country) {
                countries.push(country.clone());
            }
        }
    }

    Some(Publication {
        id,
        title: title.to_string(),
        authors_display: if authors.is_empty() {
            UNKNOWN_AUTHORS.to_string()
        } else {
            authors.join(", ")
        },
        journal_name: work
            .primary_location
            .as_ref()
            .and_then(|l| l.source.as_ref())
            .and_then(|s| s.display_name.clone())
            .unwrap_or_else(|| UNKNOWN_JOURNAL.to_string()),
        year: work.publication_year.unwrap_or(0),
        month,
        citation_count: work.cited_by_count.unwrap_or(0),
        is_open_access: work.open_access.as_ref().is_some_and(|oa| oa.is_oa),
        doi,
        canonical_url,
        document_type: work
            .work_type
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "article".to_string()),
        keywords: None,
        abstract_excerpt: None,
        publisher: work
            .primary_location
            .as_ref()
            .and_then(|l| l.source.as_ref())
            .and_then(|s| s.host_organization_name.clone()),
        funders: work
            .grants
            .iter()
            .filter_map(|g| g.funder_display_name.clone())
            .collect(),
        countries,
        subject: work
            .primary_topic
            .as_ref()
            .and_then(|t| t.field.as_ref())
            .and_then(|f| f.display_name.clone()),
    })
}

/// Headline numbers from the institution record.
pub fn institution_profile(institution: &OpenAlexInstitution) -> InstitutionProfile {
    InstitutionProfile {
        display_name: institution.display_name.clone().unwrap_or_default(),
        works_count: institution.works_count.unwrap_or(0),
        cited_by_count: institution.cited_by_count.unwrap_or(0),
        h_index: institution
            .summary_stats
            .as_ref()
            .and_then(|s| s.h_index)
            .unwrap_or(0),
        i10_index: institution
            .summary_stats
            .as_ref()
            .and_then(|s| s.i10_index)
            .unwrap_or(0),
    }
}

/// Last ten calendar years of institutional output, zero-filled and
/// oldest-first, from the profile's `counts_by_year`.
pub fn yearly_from_counts(counts: &[CountsByYear], current_year: i32) -> Vec<YearStat> {
    (0..10)
        .rev()
        .map(|offset| {
            let year = current_year - offset;
            let found = counts.iter().find(|c| c.year == year);
            YearStat {
                year,
                count: found.and_then(|c| c.works_count).unwrap_or(0) as u32,
                citations: found.and_then(|c| c.cited_by_count).unwrap_or(0),
            }
        })
        .collect()
}

/// Keep authors with a verified affiliation to `institution_id`, rank by
/// works count, and take the top ten. The server-side filter already
/// narrows by affiliation; this re-check drops entries that only matched a
/// historical lineage.
pub fn top_contributors(
    authors: Vec<OpenAlexAuthor>,
    institution_id: &str,
) -> Vec<ContributorSummary> {
    let wanted = short_id(institution_id);
    let mut affiliated: Vec<OpenAlexAuthor> = authors
        .into_iter()
        .filter(|author| {
            author.affiliations.iter().any(|affiliation| {
                affiliation
                    .institution
                    .as_ref()
                    .and_then(|i| i.id.as_deref())
                    .is_some_and(|id| short_id(id).eq_ignore_ascii_case(wanted))
            })
        })
        .collect();
    affiliated.sort_by(|a, b| b.works_count.unwrap_or(0).cmp(&a.works_count.unwrap_or(0)));
    affiliated
        .into_iter()
        .take(10)
        .map(|author| ContributorSummary {
            id: author.id.as_deref().map(|i| short_id(i).to_string()).unwrap_or_default(),
            name: author.display_name.unwrap_or_else(|| "Unknown".to_string()),
            works_count: author.works_count.unwrap_or(0),
            cited_by_count: author.cited_by_count.unwrap_or(0),
            h_index: author
                .summary_stats
                .as_ref()
                .and_then(|s| s.h_index)
                .unwrap_or(0),
        })
        .collect()
}

/// Group buckets → `{key, count}` rows, preferring the display name.
pub fn buckets_to_groups(buckets: &[GroupBucket]) -> Vec<crate::models::GroupCount> {
    buckets
        .iter()
        .map(|bucket| crate::models::GroupCount {
            key: bucket
                .key_display_name
                .clone()
                .or_else(|| bucket.key.clone())
                .unwrap_or_else(|| "Unknown".to_string()),
            count: bucket.count as u32,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// URL builders
// ---------------------------------------------------------------------------

fn last_day_of_month(year: i32, month: u8) -> u8 {
    match month {
        4 | 6 | 9 | 11 => 30,
        2 => {
            if chrono::NaiveDate::from_ymd_opt(year, 2, 29).is_some() {
                29
            } else {
                28
            }
        }
        _ => 31,
    }
}

/// Works listing for one identifier batch, optionally year- or
/// month-window-restricted. Month windows must not wrap the year boundary
/// here; wrapped windows are fetched year-scoped and filtered client-side.
pub fn scoped_works_url(
    author_ids: &[String],
    year: Option<i32>,
    month_window: Option<(u8, u8)>,
    page: usize,
) -> String {
    let ids: Vec<&str> = author_ids.iter().map(|id| short_id(id)).collect();
    let mut filter = format!("author.id:{}", ids.join("|"));
    if let Some(year) = year {
        match month_window {
            Some((start, end)) => {
                filter.push_str(&format!(
                    ",from_publication_date:{year}-{start:02}-01,to_publication_date:{year}-{end:02}-{:02}",
                    last_day_of_month(year, end)
                ));
            }
            None => filter.push_str(&format!(",publication_year:{year}")),
        }
    }
    format!(
        "{BASE_URL}/works?filter={filter}&sort=cited_by_count:desc&per_page={PAGE_SIZE}&page={page}"
    )
}

pub fn institution_url(institution_id: &str) -> String {
    format!("{BASE_URL}/institutions/{}", short_id(institution_id))
}

pub fn open_access_group_url(institution_id: &str) -> String {
    format!(
        "{BASE_URL}/works?group_by=open_access.is_oa&per_page=200&filter=authorships.institutions.lineage:{}",
        short_id(institution_id)
    )
}

pub fn top_authors_url(institution_id: &str) -> String {
    format!(
        "{BASE_URL}/authors?filter=affiliations.institution.id:{}&sort=works_count:desc&per_page=200",
        short_id(institution_id)
    )
}

/// Highly cited works, bounded below and above so one mega-collaboration
/// paper does not drown the list.
pub fn top_citations_url(institution_id: &str) -> String {
    format!(
        "{BASE_URL}/works?page=1&filter=authorships.institutions.lineage:{},cited_by_count:500-10000&per_page=10",
        short_id(institution_id)
    )
}

pub fn subject_distribution_url(institution_id: &str, year: i32) -> String {
    format!(
        "{BASE_URL}/works?group_by=primary_topic.field.id&per_page=200&filter=authorships.institutions.lineage:{},publication_year:{year}",
        short_id(institution_id)
    )
}

pub fn collaborator_countries_url(institution_id: &str) -> String {
    format!(
        "{BASE_URL}/works?group_by=authorships.countries&per_page=200&filter=authorships.countries:countries/in,authorships.institutions.lineage:{}",
        short_id(institution_id)
    )
}

pub fn work_types_url(institution_id: &str) -> String {
    format!(
        "{BASE_URL}/works?group_by=type&per_page=200&filter=authorships.institutions.lineage:{}",
        short_id(institution_id)
    )
}

pub fn latest_publications_url(institution_id: &str) -> String {
    format!(
        "{BASE_URL}/works?filter=institutions.id:{}&sort=publication_year:desc&per_page=30",
        short_id(institution_id)
    )
}

pub fn publishers_group_url(institution_id: &str) -> String {
    format!(
        "{BASE_URL}/works?group_by=primary_location.source.publisher_lineage&per_page=25&filter=authorships.institutions.lineage:{}",
        short_id(institution_id)
    )
}

pub fn funding_agencies_url(institution_id: &str) -> String {
    format!(
        "{BASE_URL}/works?group_by=grants.funder&per_page=200&filter=authorships.institutions.lineage:{}",
        short_id(institution_id)
    )
}

pub fn publisher_detail_url(publisher_id: &str) -> String {
    format!("{BASE_URL}/publishers/{}", short_id(publisher_id))
}
