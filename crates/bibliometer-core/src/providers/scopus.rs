//! Scopus Search API shapes and query grammar.
//!
//! Scopus responses are stringly typed (counts arrive as `"12"`, flags as
//! `"1"` or `1`, creators as strings or `{"$": name}` objects), so the raw
//! structs lean on permissive untagged enums and the normalizer applies the
//! documented defaults.

use crate::models::{Publication, UNKNOWN_AUTHORS, UNKNOWN_JOURNAL};
use serde::Deserialize;

pub const SEARCH_URL: &str = "https://api.elsevier.com/content/search/scopus";
pub const AUTHOR_URL: &str = "https://api.elsevier.com/content/author/author_id";

/// Institutional affiliation id appended to every search query.
pub const AFFILIATION_ID: &str = "60103917";

/// Page size used for year-scoped pagination.
pub const PAGE_SIZE: usize = 200;

const SEARCH_FIELDS: &str = "dc:identifier,dc:title,dc:creator,prism:publicationName,prism:coverDate,citedby-count,openaccess";

/// A JSON value that may arrive as a string or a number.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Num(i64),
    Text(String),
}

impl Scalar {
    fn as_u32(&self) -> u32 {
        match self {
            Scalar::Num(n) => u32::try_from(*n).unwrap_or(0),
            Scalar::Text(s) => s.trim().parse().unwrap_or(0),
        }
    }

    fn is_one(&self) -> bool {
        match self {
            Scalar::Num(n) => *n == 1,
            Scalar::Text(s) => s == "1",
        }
    }
}

/// `dc:creator` in any of the shapes Scopus emits.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CreatorField {
    Many(Vec<CreatorEntry>),
    One(String),
    Other(serde_json::Value),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CreatorEntry {
    Named {
        #[serde(rename = "$")]
        name: String,
    },
    Plain(String),
}

impl CreatorEntry {
    fn name(&self) -> &str {
        match self {
            CreatorEntry::Named { name } => name,
            CreatorEntry::Plain(name) => name,
        }
    }
}

impl CreatorField {
    fn display(&self) -> Option<String> {
        match self {
            CreatorField::Many(entries) => {
                let joined = entries
                    .iter()
                    .map(CreatorEntry::name)
                    .filter(|n| !n.is_empty())
                    .collect::<Vec<_>>()
                    .join(", ");
                (!joined.is_empty()).then_some(joined)
            }
            CreatorField::One(name) if !name.is_empty() => Some(name.clone()),
            _ => None,
        }
    }
}

/// One entry of a Scopus search response. Empty result sets surface as a
/// single pseudo-entry carrying only `error`, which the normalizer drops
/// along with anything else titleless.
#[derive(Debug, Clone, Deserialize)]
pub struct ScopusEntry {
    #[serde(rename = "dc:identifier")]
    pub identifier: Option<String>,
    #[serde(rename = "dc:title")]
    pub title: Option<String>,
    #[serde(rename = "dc:creator")]
    pub creator: Option<CreatorField>,
    #[serde(rename = "prism:publicationName")]
    pub publication_name: Option<String>,
    #[serde(rename = "prism:coverDate")]
    pub cover_date: Option<String>,
    #[serde(rename = "prism:doi")]
    pub doi: Option<String>,
    #[serde(rename = "citedby-count")]
    pub citedby_count: Option<Scalar>,
    pub openaccess: Option<Scalar>,
    #[serde(rename = "dc:description")]
    pub description: Option<String>,
    #[serde(rename = "subtypeDescription")]
    pub subtype_description: Option<String>,
    pub authkeywords: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScopusSearchResponse {
    #[serde(rename = "search-results")]
    pub results: Option<ScopusSearchResults>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScopusSearchResults {
    #[serde(rename = "opensearch:totalResults")]
    pub total_results: Option<Scalar>,
    #[serde(default)]
    pub entry: Vec<ScopusEntry>,
}

impl ScopusSearchResponse {
    pub fn entries(self) -> Vec<ScopusEntry> {
        self.results.map(|r| r.entry).unwrap_or_default()
    }
}

fn parse_cover_date(date: &str) -> (i32, u8) {
    let mut parts = date.split('-');
    let year = parts
        .next()
        .and_then(|y| y.parse::<i32>().ok())
        .unwrap_or(0);
    let month = parts
        .next()
        .and_then(|m| m.parse::<u8>().ok())
        .filter(|m| (1..=12).contains(m))
        .unwrap_or(1);
    (year, month)
}

fn excerpt(text: &str) -> String {
    let head: String = text.chars().take(200).collect();
    format!("{head}...")
}

/// Map one raw Scopus entry onto the canonical record. Titleless entries
/// (including the "Result set was empty" pseudo-entry) become `None`.
pub fn normalize_entry(entry: &ScopusEntry, fallback_index: usize) -> Option<Publication> {
    if entry.error.is_some() {
        return None;
    }
    let title = entry.title.as_deref().filter(|t| !t.is_empty())?;

    let id = entry
        .identifier
        .as_deref()
        .map(|i| i.strip_prefix("SCOPUS_ID:").unwrap_or(i).to_string())
        .unwrap_or_else(|| fallback_index.to_string());

    let (year, month) = entry
        .cover_date
        .as_deref()
        .map(parse_cover_date)
        .unwrap_or((0, 1));

    let doi = entry.doi.as_deref().filter(|d| !d.is_empty());
    let canonical_url = match doi {
        Some(doi) => format!("https://doi.org/{doi}"),
        None => format!("https://www.scopus.com/record/display.uri?eid=2-s2.0-{id}"),
    };

    Some(Publication {
        id,
        title: title.to_string(),
        authors_display: entry
            .creator
            .as_ref()
            .and_then(CreatorField::display)
            .unwrap_or_else(|| UNKNOWN_AUTHORS.to_string()),
        journal_name: entry
            .publication_name
            .clone()
            .filter(|j| !j.is_empty())
            .unwrap_or_else(|| UNKNOWN_JOURNAL.to_string()),
        year,
        month,
        citation_count: entry.citedby_count.as_ref().map_or(0, Scalar::as_u32),
        is_open_access: entry.openaccess.as_ref().is_some_and(Scalar::is_one),
        doi: doi.map(str::to_string),
        canonical_url,
        document_type: entry
            .subtype_description
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Article".to_string()),
        keywords: entry.authkeywords.clone(),
        abstract_excerpt: entry.description.as_deref().map(excerpt),
        publisher: None,
        funders: Vec::new(),
        countries: Vec::new(),
        subject: None,
    })
}

/// `(AU-ID(a) OR AU-ID(b) OR ...)` for one identifier batch.
pub fn author_clause(author_ids: &[String]) -> String {
    let ids: Vec<String> = author_ids.iter().map(|id| format!("AU-ID({id})")).collect();
    format!("({})", ids.join(" OR "))
}

/// Full search query for one batch: author clause, affiliation pin, and
/// the optional year / month-window restrictions. A month window must not
/// wrap the year boundary here; wrapped windows are fetched year-scoped
/// and filtered client-side.
pub fn search_query(
    author_ids: &[String],
    year: Option<i32>,
    month_window: Option<(u8, u8)>,
) -> String {
    let mut query = format!("{} AND AFFILORG({})", author_clause(author_ids), AFFILIATION_ID);
    if let Some(year) = year {
        query.push_str(&format!(" AND PUBYEAR = {year}"));
        if let Some((start, end)) = month_window {
            query.push_str(&format!(
                " AND PUBDATETXT({year}{start:02}01-{year}{end:02}31)"
            ));
        }
    }
    query
}

/// Search URL for one page of one batch query.
pub fn search_url(query: &str, start: usize) -> String {
    format!(
        "{SEARCH_URL}?query={}&count={PAGE_SIZE}&start={start}&sort=citedby-count&field={}&view=STANDARD",
        urlencoding::encode(query),
        urlencoding::encode(SEARCH_FIELDS),
    )
}

/// Author-retrieval URL for one roster author id.
pub fn author_profile_url(author_id: &str) -> String {
    format!(
        "{AUTHOR_URL}/{author_id}?field=h-index,document-count,cited-by-count,given-name,surname,affiliation-current"
    )
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorRetrievalResponse {
    #[serde(rename = "author-retrieval-response")]
    pub entries: Option<Vec<AuthorRetrievalEntry>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorRetrievalEntry {
    #[serde(rename = "h-index")]
    pub h_index: Option<Scalar>,
    pub coredata: Option<AuthorCoredata>,
    #[serde(rename = "preferred-name")]
    pub preferred_name: Option<PreferredName>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorCoredata {
    #[serde(rename = "document-count")]
    pub document_count: Option<Scalar>,
    #[serde(rename = "cited-by-count")]
    pub cited_by_count: Option<Scalar>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreferredName {
    #[serde(rename = "given-name")]
    pub given_name: Option<String>,
    pub surname: Option<String>,
}

/// Flatten an author-retrieval payload into a profile row. `None` when the
/// response carries no author entry at all.
pub fn parse_author_profile(
    response: AuthorRetrievalResponse,
    author_id: &str,
) -> Option<crate::models::AuthorProfile> {
    let entry = response.entries?.into_iter().next()?;
    let name = entry
        .preferred_name
        .map(|n| {
            let given = n.given_name.unwrap_or_default();
            let surname = n.surname.unwrap_or_default();
            format!("{given} {surname}").trim().to_string()
        })
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| author_id.to_string());
    Some(crate::models::AuthorProfile {
        id: author_id.to_string(),
        name,
        h_index: entry.h_index.as_ref().map_or(0, Scalar::as_u32),
        document_count: entry
            .coredata
            .as_ref()
            .and_then(|c| c.document_count.as_ref())
            .map_or(0, Scalar::as_u32),
        cited_by_count: entry
            .coredata
            .as_ref()
            .and_then(|c| c.cited_by_count.as_ref())
            .map_or(0, Scalar::as_u32) as u64,
    })
}
