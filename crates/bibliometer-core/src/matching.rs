//! Fuzzy matching of roster names against free-text author strings.
//!
//! Provider author strings come in many shapes ("Rajesh Kumar",
//! "Kumar, R.", "Kumar R.; Singh A."), so matching is heuristic: both sides
//! are folded to bare ASCII words, then a cascade of rules runs until one
//! fires. The cascade is deliberately cheap; per-publication matching runs
//! over the whole roster in the analysis layer.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Tolerance knobs for the matcher cascade.
#[derive(Debug, Clone)]
pub struct MatchOptions {
    /// Name parts must be strictly longer than this to participate in the
    /// substring rule; keeps single letters and two-letter initials from
    /// matching everywhere.
    pub min_part_len: usize,
    /// Enables the "surname ... first-initial" fallback for names whose
    /// parts are all short (handles "Surname, F." author styles).
    pub use_initial_rule: bool,
    /// When set, a third rule compares the whole normalized name against
    /// each author segment with rapidfuzz and accepts at this similarity.
    /// Off by default; the substring + initial rules reproduce the
    /// long-standing dashboard behavior.
    pub fuzzy_threshold: Option<f64>,
}

impl Default for MatchOptions {
    fn default() -> Self {
        MatchOptions {
            min_part_len: 2,
            use_initial_rule: true,
            fuzzy_threshold: None,
        }
    }
}

/// Fold a name to lowercase ASCII words: NFKD-decompose and drop combining
/// marks ("García" → "garcia"), remove periods and commas, collapse runs of
/// whitespace.
pub fn normalize_name(name: &str) -> String {
    let folded: String = name.nfkd().filter(|c| c.is_ascii()).collect();
    let stripped = folded.to_lowercase().replace(['.', ','], "");
    WHITESPACE_RE
        .replace_all(stripped.trim(), " ")
        .to_string()
}

/// Does `faculty_name` appear in the `authors` display string?
///
/// Rules, first hit wins:
/// 1. any sufficiently long word of the faculty name is a substring of the
///    normalized author string;
/// 2. a regex `"<surname>.*<first initial>"` built from the faculty name's
///    last and first parts matches (catches "Kumar, R." styles);
/// 3. optionally, rapidfuzz similarity of the full name against each
///    `;`/`,`-separated author segment meets the configured threshold.
///
/// A publication may match zero, one, or several roster names; this
/// function carries no score, only a yes/no.
pub fn author_matches(faculty_name: &str, authors: &str, opts: &MatchOptions) -> bool {
    let name = normalize_name(faculty_name);
    let haystack = normalize_name(authors);
    if name.is_empty() || haystack.is_empty() {
        return false;
    }

    let parts: Vec<&str> = name.split(' ').collect();

    for part in &parts {
        if part.len() > opts.min_part_len && haystack.contains(part) {
            return true;
        }
    }

    if opts.use_initial_rule
        && let (Some(first), Some(last)) = (parts.first(), parts.last())
        && let Some(initial) = first.chars().next()
    {
        let pattern = format!("{}.*{}", regex::escape(last), initial);
        if let Ok(re) = Regex::new(&pattern)
            && re.is_match(&haystack)
        {
            return true;
        }
    }

    if let Some(threshold) = opts.fuzzy_threshold {
        for segment in haystack.split(';') {
            for candidate in segment.split(',') {
                let candidate = candidate.trim();
                if candidate.is_empty() {
                    continue;
                }
                let score = rapidfuzz::fuzz::ratio(name.chars(), candidate.chars());
                if score >= threshold {
                    return true;
                }
            }
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Normalization
    // =========================================================================

    #[test]
    fn test_normalize_name_strips_punctuation() {
        assert_eq!(normalize_name("Kumar, R."), "kumar r");
    }

    #[test]
    fn test_normalize_name_collapses_whitespace() {
        assert_eq!(normalize_name("  Rajesh   Kumar "), "rajesh kumar");
    }

    #[test]
    fn test_normalize_name_folds_diacritics() {
        assert_eq!(normalize_name("García Márquez"), "garcia marquez");
    }

    // =========================================================================
    // Substring rule
    // =========================================================================

    #[test]
    fn test_full_name_matches_initials_style() {
        let opts = MatchOptions::default();
        assert!(author_matches("Rajesh Kumar", "Kumar, R.; Singh, A.", &opts));
    }

    #[test]
    fn test_surname_in_joined_author_list() {
        let opts = MatchOptions::default();
        assert!(author_matches(
            "Priya Venkataraman",
            "S. Iyer, P. Venkataraman, T. Das",
            &opts
        ));
    }

    #[test]
    fn test_unrelated_name_does_not_match() {
        let opts = MatchOptions::default();
        assert!(!author_matches("Rajesh Kumar", "Sharma, V.; Gupta, N.", &opts));
    }

    #[test]
    fn test_diacritics_fold_before_comparison() {
        let opts = MatchOptions::default();
        assert!(author_matches("José García", "Garcia J., Lopez M.", &opts));
    }

    #[test]
    fn test_short_parts_skip_substring_rule() {
        // Both parts are ≤ 2 chars; only the initial rule may fire, and
        // here the surname order is wrong for it.
        let opts = MatchOptions::default();
        assert!(!author_matches("Y. Wu", "Wui Zhang, B. Li", &opts));
    }

    // =========================================================================
    // Initial rule
    // =========================================================================

    #[test]
    fn test_initials_only_name_uses_regex_rule() {
        let opts = MatchOptions::default();
        // All parts too short for the substring rule; "wu.*y" must carry it.
        assert!(author_matches("Y. Wu", "Wu, Y.; Chen, L.", &opts));
    }

    #[test]
    fn test_initial_rule_can_be_disabled() {
        let opts = MatchOptions {
            use_initial_rule: false,
            ..MatchOptions::default()
        };
        assert!(!author_matches("Y. Wu", "Wu, Y.; Chen, L.", &opts));
    }

    // =========================================================================
    // Fuzzy rule (opt-in)
    // =========================================================================

    #[test]
    fn test_fuzzy_rule_off_by_default() {
        let opts = MatchOptions::default();
        // One transposition inside the surname defeats rules 1 and 2.
        assert!(!author_matches("Anand Raghunathan", "A. Raghunathna", &opts));
    }

    #[test]
    fn test_fuzzy_rule_catches_transposition_when_enabled() {
        let opts = MatchOptions {
            fuzzy_threshold: Some(0.75),
            ..MatchOptions::default()
        };
        assert!(author_matches("Anand Raghunathan", "A. Raghunathna", &opts));
    }

    #[test]
    fn test_empty_inputs_never_match() {
        let opts = MatchOptions::default();
        assert!(!author_matches("", "Kumar, R.", &opts));
        assert!(!author_matches("Rajesh Kumar", "", &opts));
    }
}
