//! Roster-level analysis over a returned publication set: per-faculty
//! breakdowns, co-authorship pairs, and presentation-side filtering. All
//! pure; the engine never calls these, callers run them on query results.

use crate::matching::{MatchOptions, author_matches};
use crate::models::{FacultyRecord, Publication};
use serde::{Deserialize, Serialize};

/// One roster member's slice of a publication set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FacultyPerformance {
    pub name: String,
    pub department: Option<String>,
    pub publication_count: u32,
    pub citation_count: u64,
    pub open_access_count: u32,
    /// The member's most-cited publication in the set, if any matched.
    pub top_publication: Option<Publication>,
}

/// Two roster members and how many publications list both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollaborationPair {
    pub first: String,
    pub second: String,
    pub joint_count: u32,
}

/// Faculty performance plus collaboration counts for one roster slice.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DepartmentAnalysis {
    pub performance: Vec<FacultyPerformance>,
    pub collaborations: Vec<CollaborationPair>,
}

/// Per-member totals over `publications`, sorted most-published first
/// (ties by name). Members matching nothing still appear with zeros so a
/// department table shows its whole roster.
pub fn faculty_performance(
    roster: &[FacultyRecord],
    publications: &[Publication],
    opts: &MatchOptions,
) -> Vec<FacultyPerformance> {
    let mut rows: Vec<FacultyPerformance> = roster
        .iter()
        .map(|member| {
            let mut row = FacultyPerformance {
                name: member.name.clone(),
                department: member.department.clone(),
                ..FacultyPerformance::default()
            };
            for publication in publications {
                if !author_matches(&member.name, &publication.authors_display, opts) {
                    continue;
                }
                row.publication_count += 1;
                row.citation_count += publication.citation_count as u64;
                if publication.is_open_access {
                    row.open_access_count += 1;
                }
                let beats_current = row
                    .top_publication
                    .as_ref()
                    .is_none_or(|top| publication.citation_count > top.citation_count);
                if beats_current {
                    row.top_publication = Some(publication.clone());
                }
            }
            row
        })
        .collect();
    rows.sort_by(|a, b| {
        b.publication_count
            .cmp(&a.publication_count)
            .then_with(|| a.name.cmp(&b.name))
    });
    rows
}

/// Roster co-authorship counts: every pair of members that share at least
/// one publication, most frequent first. Pair order follows the roster.
pub fn collaboration_pairs(
    roster: &[FacultyRecord],
    publications: &[Publication],
    opts: &MatchOptions,
) -> Vec<CollaborationPair> {
    let mut counts = vec![vec![0u32; roster.len()]; roster.len()];
    for publication in publications {
        let matched: Vec<usize> = roster
            .iter()
            .enumerate()
            .filter(|(_, member)| author_matches(&member.name, &publication.authors_display, opts))
            .map(|(i, _)| i)
            .collect();
        for (a, &i) in matched.iter().enumerate() {
            for &j in &matched[a + 1..] {
                counts[i][j] += 1;
            }
        }
    }

    let mut pairs = Vec::new();
    for i in 0..roster.len() {
        for j in (i + 1)..roster.len() {
            if counts[i][j] > 0 {
                pairs.push(CollaborationPair {
                    first: roster[i].name.clone(),
                    second: roster[j].name.clone(),
                    joint_count: counts[i][j],
                });
            }
        }
    }
    pairs.sort_by(|a, b| {
        b.joint_count
            .cmp(&a.joint_count)
            .then_with(|| a.first.cmp(&b.first))
            .then_with(|| a.second.cmp(&b.second))
    });
    pairs
}

/// Run both analyses for one roster slice.
pub fn analyze_department(
    roster: &[FacultyRecord],
    publications: &[Publication],
    opts: &MatchOptions,
) -> DepartmentAnalysis {
    DepartmentAnalysis {
        performance: faculty_performance(roster, publications, opts),
        collaborations: collaboration_pairs(roster, publications, opts),
    }
}

/// Which field a filtered listing is ordered by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortField {
    #[default]
    Date,
    Citations,
    Title,
}

/// Presentation-side narrowing and ordering of a publication list.
#[derive(Debug, Clone, Default)]
pub struct PublicationFilter {
    pub min_citations: Option<u32>,
    pub max_citations: Option<u32>,
    pub open_access_only: bool,
    /// Case-insensitive needle tested against title, keywords, and the
    /// abstract excerpt.
    pub keyword: Option<String>,
    pub sort: SortField,
    pub ascending: bool,
}

impl PublicationFilter {
    pub fn apply(&self, publications: &[Publication]) -> Vec<Publication> {
        let needle = self.keyword.as_ref().map(|k| k.to_lowercase());
        let mut kept: Vec<Publication> = publications
            .iter()
            .filter(|p| {
                if let Some(min) = self.min_citations
                    && p.citation_count < min
                {
                    return false;
                }
                if let Some(max) = self.max_citations
                    && p.citation_count > max
                {
                    return false;
                }
                if self.open_access_only && !p.is_open_access {
                    return false;
                }
                if let Some(ref needle) = needle {
                    let in_title = p.title.to_lowercase().contains(needle);
                    let in_keywords = p
                        .keywords
                        .as_ref()
                        .is_some_and(|k| k.to_lowercase().contains(needle));
                    let in_abstract = p
                        .abstract_excerpt
                        .as_ref()
                        .is_some_and(|a| a.to_lowercase().contains(needle));
                    if !(in_title || in_keywords || in_abstract) {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect();

        kept.sort_by(|a, b| {
            let ordering = match self.sort {
                SortField::Date => (a.year, a.month).cmp(&(b.year, b.month)),
                SortField::Citations => a.citation_count.cmp(&b.citation_count),
                SortField::Title => a.title.to_lowercase().cmp(&b.title.to_lowercase()),
            };
            if self.ascending {
                ordering
            } else {
                ordering.reverse()
            }
        });
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(name: &str, department: &str) -> FacultyRecord {
        FacultyRecord {
            name: name.into(),
            scopus_id: None,
            openalex_id: None,
            department: Some(department.into()),
        }
    }

    fn publication(title: &str, authors: &str, citations: u32, open: bool) -> Publication {
        Publication {
            id: title.into(),
            title: title.into(),
            authors_display: authors.into(),
            citation_count: citations,
            is_open_access: open,
            year: 2024,
            ..Publication::default()
        }
    }

    #[test]
    fn test_faculty_performance_totals_and_top_publication() {
        let roster = vec![member("Rajesh Kumar", "CSE"), member("Anita Singh", "CSE")];
        let pubs = vec![
            publication("Deep Learning Survey", "Kumar, R.; Singh, A.", 40, true),
            publication("Edge Computing", "Kumar, R.", 10, false),
            publication("Unrelated Work", "Verma, P.", 99, false),
        ];
        let rows = faculty_performance(&roster, &pubs, &MatchOptions::default());

        assert_eq!(rows[0].name, "Rajesh Kumar");
        assert_eq!(rows[0].publication_count, 2);
        assert_eq!(rows[0].citation_count, 50);
        assert_eq!(rows[0].open_access_count, 1);
        assert_eq!(
            rows[0].top_publication.as_ref().map(|p| p.title.as_str()),
            Some("Deep Learning Survey")
        );

        assert_eq!(rows[1].name, "Anita Singh");
        assert_eq!(rows[1].publication_count, 1);
    }

    #[test]
    fn test_faculty_performance_keeps_zero_rows() {
        let roster = vec![member("Silent Scholar", "EE")];
        let rows = faculty_performance(&roster, &[], &MatchOptions::default());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].publication_count, 0);
        assert!(rows[0].top_publication.is_none());
    }

    #[test]
    fn test_collaboration_pairs_count_shared_publications() {
        let roster = vec![
            member("Rajesh Kumar", "CSE"),
            member("Anita Singh", "CSE"),
            member("Priya Venkataraman", "EE"),
        ];
        let pubs = vec![
            publication("Joint Work A", "Kumar, R.; Singh, A.", 5, false),
            publication("Joint Work B", "Singh, A.; Kumar, R.", 3, false),
            publication("Solo Work", "Venkataraman, P.", 1, false),
        ];
        let pairs = collaboration_pairs(&roster, &pubs, &MatchOptions::default());
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].first, "Rajesh Kumar");
        assert_eq!(pairs[0].second, "Anita Singh");
        assert_eq!(pairs[0].joint_count, 2);
    }

    #[test]
    fn test_filter_citation_bounds_and_open_access() {
        let pubs = vec![
            publication("A", "X", 5, true),
            publication("B", "X", 50, false),
            publication("C", "X", 500, true),
        ];
        let filter = PublicationFilter {
            min_citations: Some(10),
            open_access_only: true,
            ..PublicationFilter::default()
        };
        let kept = filter.apply(&pubs);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].title, "C");
    }

    #[test]
    fn test_filter_keyword_searches_title_and_abstract() {
        let mut with_abstract = publication("Plain Title", "X", 0, false);
        with_abstract.abstract_excerpt = Some("We study perovskite cells...".into());
        let pubs = vec![publication("Graphene Advances", "X", 0, false), with_abstract];

        let filter = PublicationFilter {
            keyword: Some("PEROVSKITE".into()),
            ..PublicationFilter::default()
        };
        let kept = filter.apply(&pubs);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].title, "Plain Title");
    }

    #[test]
    fn test_filter_sorts_by_citations_descending_by_default() {
        let pubs = vec![
            publication("Low", "X", 1, false),
            publication("High", "X", 100, false),
            publication("Mid", "X", 10, false),
        ];
        let filter = PublicationFilter {
            sort: SortField::Citations,
            ..PublicationFilter::default()
        };
        let titles: Vec<String> = filter.apply(&pubs).into_iter().map(|p| p.title).collect();
        assert_eq!(titles, vec!["High", "Mid", "Low"]);
    }

    #[test]
    fn test_filter_title_sort_ascending() {
        let pubs = vec![
            publication("beta", "X", 0, false),
            publication("Alpha", "X", 0, false),
        ];
        let filter = PublicationFilter {
            sort: SortField::Title,
            ascending: true,
            ..PublicationFilter::default()
        };
        let titles: Vec<String> = filter.apply(&pubs).into_iter().map(|p| p.title).collect();
        assert_eq!(titles, vec!["Alpha", "beta"]);
    }
}
