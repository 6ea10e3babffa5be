//! Pure metric computation over normalized publication lists. Everything in
//! here is deterministic, total, and free of I/O; empty input produces
//! all-zero metrics rather than errors.

use crate::models::{
    AggregatedMetrics, AuthorProfile, GroupCount, GroupedCounts, MonthStat, OpenAccessStats,
    Publication, UNKNOWN_JOURNAL, YearStat,
};
use std::collections::HashMap;

/// Which years (and optionally which months) the rollups should cover.
/// Rollups are zero-filled across the whole span so chart axes stay stable
/// even when a year produced nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollupSpan {
    pub start_year: i32,
    pub end_year: i32,
    /// `Some((start, end))` requests a monthly rollup in window order;
    /// `start > end` is a window that wraps the year boundary.
    pub months: Option<(u8, u8)>,
}

impl RollupSpan {
    pub fn single_year(year: i32) -> Self {
        RollupSpan {
            start_year: year,
            end_year: year,
            months: None,
        }
    }

    pub fn years(start_year: i32, end_year: i32) -> Self {
        RollupSpan {
            start_year,
            end_year,
            months: None,
        }
    }
}

/// H-index of a citation multiset: the largest `k` such that at least `k`
/// entries have at least `k` citations each.
pub fn h_index(citations: &[u32]) -> u32 {
    let mut sorted = citations.to_vec();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    for k in (1..=sorted.len()).rev() {
        if sorted[k - 1] as usize >= k {
            return k as u32;
        }
    }
    0
}

/// Open-access share, rounded to the nearest whole percent. A zero-sized
/// input yields 0% rather than a division error.
pub fn open_access_stats(publications: &[Publication]) -> OpenAccessStats {
    let total = publications.len() as u32;
    let count = publications.iter().filter(|p| p.is_open_access).count() as u32;
    let percentage = if total == 0 {
        0
    } else {
        (count as f64 / total as f64 * 100.0).round() as u32
    };
    OpenAccessStats {
        count,
        total,
        percentage,
    }
}

/// Rounded mean H-index over fetched author profiles; 0 when none exist.
pub fn average_h_index(profiles: &[AuthorProfile]) -> u32 {
    if profiles.is_empty() {
        return 0;
    }
    let sum: u64 = profiles.iter().map(|p| p.h_index as u64).sum();
    (sum as f64 / profiles.len() as f64).round() as u32
}

fn count_into_buckets<I>(keys: I) -> Vec<GroupCount>
where
    I: IntoIterator<Item = String>,
{
    let mut counts: HashMap<String, u32> = HashMap::new();
    for key in keys {
        *counts.entry(key).or_insert(0) += 1;
    }
    let mut buckets: Vec<GroupCount> = counts
        .into_iter()
        .map(|(key, count)| GroupCount { key, count })
        .collect();
    // Count-descending, ties broken by key so repeated runs agree.
    buckets.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
    buckets
}

/// Full grouped counts across all six dimensions. No truncation happens
/// here; callers take the top N they want to show.
pub fn grouped_counts(publications: &[Publication]) -> GroupedCounts {
    GroupedCounts {
        journals: count_into_buckets(
            publications
                .iter()
                .filter(|p| p.journal_name != UNKNOWN_JOURNAL)
                .map(|p| p.journal_name.clone()),
        ),
        publishers: count_into_buckets(publications.iter().filter_map(|p| p.publisher.clone())),
        funders: count_into_buckets(publications.iter().flat_map(|p| p.funders.iter().cloned())),
        countries: count_into_buckets(publications.iter().flat_map(|p| p.countries.iter().cloned())),
        subjects: count_into_buckets(publications.iter().filter_map(|p| p.subject.clone())),
        document_types: count_into_buckets(publications.iter().map(|p| p.document_type.clone())),
    }
}

/// One entry per year in `start_year..=end_year`, zero-filled. Publications
/// outside the span are ignored.
pub fn yearly_rollup(publications: &[Publication], start_year: i32, end_year: i32) -> Vec<YearStat> {
    let mut stats: Vec<YearStat> = (start_year..=end_year)
        .map(|year| YearStat {
            year,
            count: 0,
            citations: 0,
        })
        .collect();
    for publication in publications {
        if publication.year < start_year || publication.year > end_year {
            continue;
        }
        let slot = (publication.year - start_year) as usize;
        stats[slot].count += 1;
        stats[slot].citations += publication.citation_count as u64;
    }
    stats
}

/// Iterate the months of a window in display order, wrapping through
/// December when `start > end`.
fn window_months(start: u8, end: u8) -> Vec<u8> {
    if start <= end {
        (start..=end).collect()
    } else {
        (start..=12).chain(1..=end).collect()
    }
}

/// One entry per month of the window for `year`, zero-filled and in window
/// order (a wrapped Aug-May window lists 8..12 then 1..5).
pub fn monthly_rollup(
    publications: &[Publication],
    year: i32,
    start_month: u8,
    end_month: u8,
) -> Vec<MonthStat> {
    let mut stats: Vec<MonthStat> = window_months(start_month, end_month)
        .into_iter()
        .map(|month| MonthStat {
            year,
            month,
            count: 0,
            citations: 0,
        })
        .collect();
    for publication in publications {
        if publication.year != year {
            continue;
        }
        if let Some(slot) = stats.iter_mut().find(|s| s.month == publication.month) {
            slot.count += 1;
            slot.citations += publication.citation_count as u64;
        }
    }
    stats
}

/// Compute the whole derived-metrics bundle for one publication set.
pub fn aggregate(publications: &[Publication], span: &RollupSpan) -> AggregatedMetrics {
    let citations: Vec<u32> = publications.iter().map(|p| p.citation_count).collect();
    AggregatedMetrics {
        publication_count: publications.len() as u32,
        total_citations: citations.iter().map(|&c| c as u64).sum(),
        h_index: h_index(&citations),
        open_access: open_access_stats(publications),
        yearly_rollup: yearly_rollup(publications, span.start_year, span.end_year),
        monthly_rollup: span
            .months
            .map(|(start, end)| monthly_rollup(publications, span.start_year, start, end)),
        groups: grouped_counts(publications),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publication(year: i32, month: u8, citations: u32, open: bool) -> Publication {
        Publication {
            id: format!("{year}-{month}-{citations}"),
            title: "A Study".into(),
            year,
            month,
            citation_count: citations,
            is_open_access: open,
            ..Publication::default()
        }
    }

    // =========================================================================
    // H-index
    // =========================================================================

    #[test]
    fn test_h_index_textbook_case() {
        assert_eq!(h_index(&[10, 8, 5, 4, 3]), 4);
    }

    #[test]
    fn test_h_index_empty() {
        assert_eq!(h_index(&[]), 0);
    }

    #[test]
    fn test_h_index_all_zero() {
        assert_eq!(h_index(&[0, 0, 0]), 0);
    }

    #[test]
    fn test_h_index_single_highly_cited() {
        assert_eq!(h_index(&[250]), 1);
    }

    #[test]
    fn test_h_index_unsorted_input() {
        assert_eq!(h_index(&[3, 10, 4, 8, 5]), 4);
    }

    // =========================================================================
    // Open access
    // =========================================================================

    #[test]
    fn test_open_access_three_of_ten() {
        let mut pubs: Vec<Publication> = (0..7).map(|i| publication(2024, 1, i, false)).collect();
        pubs.extend((0..3).map(|i| publication(2024, 2, i, true)));
        let stats = open_access_stats(&pubs);
        assert_eq!(stats.count, 3);
        assert_eq!(stats.total, 10);
        assert_eq!(stats.percentage, 30);
    }

    #[test]
    fn test_open_access_empty_set_is_zero_percent() {
        let stats = open_access_stats(&[]);
        assert_eq!(stats.percentage, 0);
        assert_eq!(stats.total, 0);
    }

    #[test]
    fn test_open_access_rounds_to_nearest() {
        let pubs = vec![
            publication(2024, 1, 0, true),
            publication(2024, 1, 1, false),
            publication(2024, 1, 2, false),
        ];
        // 1/3 → 33.33… → 33
        assert_eq!(open_access_stats(&pubs).percentage, 33);
    }

    // =========================================================================
    // Rollups
    // =========================================================================

    #[test]
    fn test_yearly_rollup_zero_fills_span() {
        let pubs = vec![publication(2009, 3, 5, false), publication(2009, 7, 2, true)];
        let rollup = yearly_rollup(&pubs, 2008, 2010);
        assert_eq!(rollup.len(), 3);
        assert_eq!(rollup[0], YearStat { year: 2008, count: 0, citations: 0 });
        assert_eq!(rollup[1], YearStat { year: 2009, count: 2, citations: 7 });
        assert_eq!(rollup[2], YearStat { year: 2010, count: 0, citations: 0 });
    }

    #[test]
    fn test_yearly_rollup_ignores_out_of_span_years() {
        let pubs = vec![publication(1999, 1, 9, false)];
        let rollup = yearly_rollup(&pubs, 2008, 2009);
        assert!(rollup.iter().all(|s| s.count == 0));
    }

    #[test]
    fn test_monthly_rollup_window_order() {
        let pubs = vec![publication(2024, 2, 1, false), publication(2024, 4, 3, false)];
        let rollup = monthly_rollup(&pubs, 2024, 1, 4);
        assert_eq!(rollup.len(), 4);
        assert_eq!(rollup[1].count, 1);
        assert_eq!(rollup[3].citations, 3);
    }

    #[test]
    fn test_monthly_rollup_wraps_year_boundary() {
        let pubs = vec![publication(2024, 12, 2, false), publication(2024, 1, 1, false)];
        let rollup = monthly_rollup(&pubs, 2024, 11, 2);
        let months: Vec<u8> = rollup.iter().map(|s| s.month).collect();
        assert_eq!(months, vec![11, 12, 1, 2]);
        assert_eq!(rollup[1].count, 1);
        assert_eq!(rollup[2].count, 1);
    }

    // =========================================================================
    // Grouping
    // =========================================================================

    #[test]
    fn test_grouping_excludes_unknown_journal() {
        let mut named = publication(2024, 1, 0, false);
        named.journal_name = "Nature".into();
        let unnamed = publication(2024, 1, 0, false); // defaults to the placeholder
        let groups = grouped_counts(&[named, unnamed]);
        assert_eq!(groups.journals.len(), 1);
        assert_eq!(groups.journals[0].key, "Nature");
    }

    #[test]
    fn test_grouping_sorts_by_count_then_key() {
        let mut pubs = Vec::new();
        for journal in ["B Journal", "A Journal", "C Journal", "C Journal"] {
            let mut p = publication(2024, 1, 0, false);
            p.journal_name = journal.into();
            pubs.push(p);
        }
        let groups = grouped_counts(&pubs);
        let keys: Vec<&str> = groups.journals.iter().map(|g| g.key.as_str()).collect();
        assert_eq!(keys, vec!["C Journal", "A Journal", "B Journal"]);
    }

    #[test]
    fn test_grouping_flattens_multi_valued_fields() {
        let mut p1 = publication(2024, 1, 0, false);
        p1.funders = vec!["DST".into(), "SERB".into()];
        p1.countries = vec!["IN".into(), "US".into()];
        let mut p2 = publication(2024, 2, 0, false);
        p2.funders = vec!["DST".into()];
        let groups = grouped_counts(&[p1, p2]);
        assert_eq!(groups.funders[0], GroupCount { key: "DST".into(), count: 2 });
        assert_eq!(groups.countries.len(), 2);
    }

    // =========================================================================
    // Whole-bundle aggregation
    // =========================================================================

    #[test]
    fn test_aggregate_empty_input_is_all_zero() {
        let metrics = aggregate(&[], &RollupSpan::single_year(2024));
        assert_eq!(metrics.publication_count, 0);
        assert_eq!(metrics.total_citations, 0);
        assert_eq!(metrics.h_index, 0);
        assert_eq!(metrics.open_access.percentage, 0);
        assert_eq!(metrics.yearly_rollup.len(), 1);
        assert!(metrics.groups.journals.is_empty());
    }

    #[test]
    fn test_aggregate_requests_monthly_rollup_only_when_asked() {
        let pubs = vec![publication(2024, 3, 4, true)];
        let without = aggregate(&pubs, &RollupSpan::single_year(2024));
        assert!(without.monthly_rollup.is_none());

        let span = RollupSpan {
            start_year: 2024,
            end_year: 2024,
            months: Some((1, 6)),
        };
        let with = aggregate(&pubs, &span);
        assert_eq!(with.monthly_rollup.as_ref().map(|m| m.len()), Some(6));
    }

    #[test]
    fn test_average_h_index_rounds() {
        let profiles = vec![
            AuthorProfile { h_index: 10, ..AuthorProfile::default() },
            AuthorProfile { h_index: 5, ..AuthorProfile::default() },
        ];
        // 7.5 rounds up
        assert_eq!(average_h_index(&profiles), 8);
        assert_eq!(average_h_index(&[]), 0);
    }
}
