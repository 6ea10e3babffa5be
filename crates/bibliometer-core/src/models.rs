//! Canonical records shared across the engine: normalized publications,
//! roster entries, query scopes, and the aggregated outputs returned to
//! callers and round-tripped through the result cache.

use serde::{Deserialize, Serialize};

/// Which upstream bibliographic provider a query is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Scopus,
    OpenAlex,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::Scopus => write!(f, "scopus"),
            Provider::OpenAlex => write!(f, "openalex"),
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "scopus" => Ok(Provider::Scopus),
            "openalex" => Ok(Provider::OpenAlex),
            other => Err(format!("unknown provider '{other}' (expected scopus or openalex)")),
        }
    }
}

/// One publication after normalization, regardless of which provider it
/// came from. Missing fields carry the documented defaults rather than
/// options so downstream aggregation never branches on absence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Publication {
    /// Provider record id, else a synthetic per-response index.
    pub id: String,
    pub title: String,
    /// Display string, comma-joined ("A. Author, B. Author").
    pub authors_display: String,
    pub journal_name: String,
    pub year: i32,
    /// 1-12; defaults to 1 when the provider gives no month.
    pub month: u8,
    pub citation_count: u32,
    pub is_open_access: bool,
    pub doi: Option<String>,
    /// DOI resolver link when a DOI exists, else the provider landing page.
    pub canonical_url: String,
    pub document_type: String,
    pub keywords: Option<String>,
    /// First 200 chars of the abstract with a trailing ellipsis.
    pub abstract_excerpt: Option<String>,
    pub publisher: Option<String>,
    pub funders: Vec<String>,
    pub countries: Vec<String>,
    pub subject: Option<String>,
}

impl Default for Publication {
    fn default() -> Self {
        Publication {
            id: String::new(),
            title: String::new(),
            authors_display: UNKNOWN_AUTHORS.to_string(),
            journal_name: UNKNOWN_JOURNAL.to_string(),
            year: 0,
            month: 1,
            citation_count: 0,
            is_open_access: false,
            doi: None,
            canonical_url: String::new(),
            document_type: "Article".to_string(),
            keywords: None,
            abstract_excerpt: None,
            publisher: None,
            funders: Vec::new(),
            countries: Vec::new(),
            subject: None,
        }
    }
}

/// Placeholder used when no author information is present.
pub const UNKNOWN_AUTHORS: &str = "Unknown Authors";
/// Placeholder used when no journal/source name is present. Excluded from
/// journal grouping so the placeholder never tops the ranking.
pub const UNKNOWN_JOURNAL: &str = "Unknown Journal";

/// A roster entry. Loaded once from the roster file, never mutated. The two
/// providers use disjoint author-id namespaces, so each gets its own slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacultyRecord {
    pub name: String,
    #[serde(default)]
    pub scopus_id: Option<String>,
    #[serde(default)]
    pub openalex_id: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
}

impl FacultyRecord {
    /// The roster id for the given provider, if this entry has one.
    pub fn id_for(&self, provider: Provider) -> Option<&str> {
        match provider {
            Provider::Scopus => self.scopus_id.as_deref(),
            Provider::OpenAlex => self.openalex_id.as_deref(),
        }
    }
}

/// What level of the institution a query covers. Only affects cache keying
/// and display; the pipeline treats all three identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeMode {
    Institution,
    Department,
    Individual,
}

impl std::fmt::Display for ScopeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScopeMode::Institution => write!(f, "institution"),
            ScopeMode::Department => write!(f, "department"),
            ScopeMode::Individual => write!(f, "individual"),
        }
    }
}

/// The full description of one metrics query: whose publications, which
/// provider, and what time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryScope {
    /// Provider author ids to query for. Order does not matter.
    pub identifiers: Vec<String>,
    /// `None` means all-time (queried year by year, see the orchestrator).
    pub year: Option<i32>,
    /// 1-12. `start_month > end_month` denotes a window that wraps the
    /// year boundary (academic calendars).
    pub start_month: u8,
    pub end_month: u8,
    pub mode: ScopeMode,
    pub provider: Provider,
}

impl QueryScope {
    pub fn new(identifiers: Vec<String>, provider: Provider, mode: ScopeMode) -> Self {
        QueryScope {
            identifiers,
            year: None,
            start_month: 1,
            end_month: 12,
            mode,
            provider,
        }
    }

    /// True when the month window covers the whole calendar year, in which
    /// case no date-range filter is sent and no client-side month filtering
    /// happens.
    pub fn is_full_year(&self) -> bool {
        self.start_month <= 1 && self.end_month >= 12
    }

    /// True when the window wraps the year boundary (e.g. Aug-May).
    pub fn wraps_year(&self) -> bool {
        self.start_month > self.end_month
    }

    /// Whether a publication month falls inside the requested window,
    /// accounting for wrap-around windows.
    pub fn month_in_window(&self, month: u8) -> bool {
        if self.is_full_year() {
            true
        } else if self.wraps_year() {
            month >= self.start_month || month <= self.end_month
        } else {
            (self.start_month..=self.end_month).contains(&month)
        }
    }

    /// Deterministic cache key. Identifiers are sorted and deduplicated so
    /// the same roster in a different order fingerprints identically, and
    /// every scope dimension is included so distinct queries never collide.
    pub fn fingerprint(&self) -> String {
        let mut ids = self.identifiers.clone();
        ids.sort();
        ids.dedup();
        let year = match self.year {
            Some(y) => y.to_string(),
            None => "all".to_string(),
        };
        format!(
            "{}:{}:{}:{:02}-{:02}:{}",
            self.provider,
            self.mode,
            year,
            self.start_month,
            self.end_month,
            ids.join("+")
        )
    }
}

/// Raw result of one orchestrated search before metric computation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchOutcome {
    /// Count of entries actually kept after normalization and month
    /// filtering, not the provider-reported total.
    pub total_count: usize,
    pub publications: Vec<Publication>,
}

/// Open-access share of a publication set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenAccessStats {
    pub count: u32,
    pub total: u32,
    /// Rounded to the nearest integer percent; 0 when `total` is 0.
    pub percentage: u32,
}

/// One bucket of a grouped count (journal, publisher, funder, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCount {
    pub key: String,
    pub count: u32,
}

/// Publication and citation totals for one calendar year.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearStat {
    pub year: i32,
    pub count: u32,
    pub citations: u64,
}

/// Publication and citation totals for one month of one year.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthStat {
    pub year: i32,
    pub month: u8,
    pub count: u32,
    pub citations: u64,
}

/// Grouped counts across the six grouping dimensions. Full groupings,
/// sorted count-descending then key-ascending; top-N truncation is left to
/// the presentation layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupedCounts {
    pub journals: Vec<GroupCount>,
    pub publishers: Vec<GroupCount>,
    pub funders: Vec<GroupCount>,
    pub countries: Vec<GroupCount>,
    pub subjects: Vec<GroupCount>,
    pub document_types: Vec<GroupCount>,
}

/// Everything derived from a publication set. Recomputed on every query,
/// persisted only inside cached outcomes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatedMetrics {
    pub publication_count: u32,
    pub total_citations: u64,
    pub h_index: u32,
    pub open_access: OpenAccessStats,
    pub yearly_rollup: Vec<YearStat>,
    /// Present only when the scope asked for monthly granularity.
    pub monthly_rollup: Option<Vec<MonthStat>>,
    pub groups: GroupedCounts,
}

/// Citation profile of one roster author, from the provider's author
/// retrieval endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorProfile {
    pub id: String,
    pub name: String,
    pub h_index: u32,
    pub document_count: u32,
    pub cited_by_count: u64,
}

/// The full answer to one scoped query: the publication list, the derived
/// metrics, and any author profiles fetched alongside. This is the unit the
/// result cache stores.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOutcome {
    pub provider: Option<Provider>,
    pub total_count: usize,
    pub publications: Vec<Publication>,
    pub metrics: AggregatedMetrics,
    pub author_profiles: Vec<AuthorProfile>,
    /// Rounded mean of the profiles' H-indexes; 0 when none were fetched.
    pub average_h_index: u32,
}

/// Institution-level headline numbers from the provider profile record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstitutionProfile {
    pub display_name: String,
    pub works_count: u64,
    pub cited_by_count: u64,
    pub h_index: u32,
    pub i10_index: u32,
}

/// One ranked contributor on the institution overview.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContributorSummary {
    pub id: String,
    pub name: String,
    pub works_count: u64,
    pub cited_by_count: u64,
    pub h_index: u32,
}

/// The institution dashboard: profile numbers plus the ranked panels, all
/// gathered in one paced pass over the OpenAlex API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InstitutionOverview {
    pub profile: InstitutionProfile,
    pub open_access_works: u64,
    pub latest_publications: Vec<Publication>,
    pub top_cited: Vec<Publication>,
    pub top_contributors: Vec<ContributorSummary>,
    /// Last ten years, zero-filled, oldest first.
    pub yearly_output: Vec<YearStat>,
    /// Current-year subject distribution, top ten.
    pub subjects: Vec<GroupCount>,
    pub collaborating_countries: Vec<GroupCount>,
    pub work_types: Vec<GroupCount>,
    pub publishers: Vec<GroupCount>,
    pub funders: Vec<GroupCount>,
}
