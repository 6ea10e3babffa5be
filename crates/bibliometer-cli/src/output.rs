use std::io::Write;
use std::path::Path;

use bibliometer_core::analysis::DepartmentAnalysis;
use bibliometer_core::{GroupCount, InstitutionOverview, Publication, QueryOutcome, ResultCache};
use owo_colors::OwoColorize;

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

/// Terminal sections cap their rankings; exports carry the full lists.
const TOP_ROWS: usize = 10;

/// Print a scoped query outcome as a terminal dashboard.
pub fn print_outcome(
    w: &mut dyn Write,
    outcome: &QueryOutcome,
    analysis: Option<&DepartmentAnalysis>,
    color: ColorMode,
) -> std::io::Result<()> {
    let m = &outcome.metrics;
    let sep = "=".repeat(60);
    if color.enabled() {
        writeln!(w, "{}", sep.bold())?;
        writeln!(w, "{}", "PUBLICATION METRICS".bold())?;
        writeln!(w, "{}", sep.bold())?;
    } else {
        writeln!(w, "{}", sep)?;
        writeln!(w, "PUBLICATION METRICS")?;
        writeln!(w, "{}", sep)?;
    }

    if let Some(provider) = outcome.provider {
        if color.enabled() {
            writeln!(w, "  {} {}", "Provider:".dimmed(), provider)?;
        } else {
            writeln!(w, "  Provider: {}", provider)?;
        }
    }
    let stats = format!(
        "{} publications | {} citations | h-index {} | {}% open access",
        m.publication_count, m.total_citations, m.h_index, m.open_access.percentage,
    );
    if color.enabled() {
        writeln!(w, "  {}", stats.bold())?;
    } else {
        writeln!(w, "  {}", stats)?;
    }

    if !m.yearly_rollup.is_empty() {
        section(w, "Yearly output", color)?;
        for y in &m.yearly_rollup {
            writeln!(
                w,
                "  {}  {:>5} publications  {:>8} citations",
                y.year, y.count, y.citations
            )?;
        }
    }
    if let Some(months) = &m.monthly_rollup {
        section(w, "Monthly output", color)?;
        for mo in months {
            writeln!(
                w,
                "  {}-{:02}  {:>5} publications  {:>8} citations",
                mo.year, mo.month, mo.count, mo.citations
            )?;
        }
    }

    group_section(w, "Top journals", &m.groups.journals, color)?;
    group_section(w, "Top publishers", &m.groups.publishers, color)?;
    group_section(w, "Funding agencies", &m.groups.funders, color)?;
    group_section(w, "Collaborating countries", &m.groups.countries, color)?;
    group_section(w, "Subject areas", &m.groups.subjects, color)?;
    group_section(w, "Document types", &m.groups.document_types, color)?;

    if !outcome.author_profiles.is_empty() {
        section(w, "Author profiles", color)?;
        for a in &outcome.author_profiles {
            writeln!(
                w,
                "  {}  h-index {}, {} documents, {} citations",
                a.name, a.h_index, a.document_count, a.cited_by_count,
            )?;
        }
        let avg = format!("Average h-index: {}", outcome.average_h_index);
        if color.enabled() {
            writeln!(w, "  {}", avg.bold())?;
        } else {
            writeln!(w, "  {}", avg)?;
        }
    }

    if let Some(analysis) = analysis {
        if !analysis.performance.is_empty() {
            section(w, "Faculty performance", color)?;
            for row in &analysis.performance {
                writeln!(
                    w,
                    "  {}  {} publications, {} citations, {} open access",
                    row.name, row.publication_count, row.citation_count, row.open_access_count,
                )?;
                if let Some(top) = &row.top_publication {
                    let line = format!("      top: {}", truncate(&top.title, 64));
                    if color.enabled() {
                        writeln!(w, "{}", line.dimmed())?;
                    } else {
                        writeln!(w, "{}", line)?;
                    }
                }
            }
        }
        if !analysis.collaborations.is_empty() {
            section(w, "Collaboration pairs", color)?;
            for pair in &analysis.collaborations {
                writeln!(
                    w,
                    "  {} + {}  {} joint",
                    pair.first, pair.second, pair.joint_count,
                )?;
            }
        }
    }

    if !outcome.publications.is_empty() {
        section(w, "Publications", color)?;
        publication_lines(w, &outcome.publications, color)?;
    }
    writeln!(w)?;
    Ok(())
}

/// Print the institution overview as a terminal dashboard.
pub fn print_overview(
    w: &mut dyn Write,
    overview: &InstitutionOverview,
    color: ColorMode,
) -> std::io::Result<()> {
    let p = &overview.profile;
    let sep = "=".repeat(60);
    if color.enabled() {
        writeln!(w, "{}", sep.bold())?;
        writeln!(w, "{}", "INSTITUTION OVERVIEW".bold())?;
        writeln!(w, "{}", sep.bold())?;
    } else {
        writeln!(w, "{}", sep)?;
        writeln!(w, "INSTITUTION OVERVIEW")?;
        writeln!(w, "{}", sep)?;
    }

    if !p.display_name.is_empty() {
        if color.enabled() {
            writeln!(w, "  {}", p.display_name.bold())?;
        } else {
            writeln!(w, "  {}", p.display_name)?;
        }
    }
    writeln!(
        w,
        "  {} works | {} citations | h-index {} | i10-index {} | {} open access",
        p.works_count, p.cited_by_count, p.h_index, p.i10_index, overview.open_access_works,
    )?;

    if !overview.yearly_output.is_empty() {
        section(w, "Yearly output", color)?;
        for y in &overview.yearly_output {
            writeln!(
                w,
                "  {}  {:>5} publications  {:>8} citations",
                y.year, y.count, y.citations
            )?;
        }
    }

    if !overview.top_contributors.is_empty() {
        section(w, "Top contributors", color)?;
        for (i, c) in overview.top_contributors.iter().take(TOP_ROWS).enumerate() {
            writeln!(
                w,
                "  {:>2}. {}  {} works, {} citations, h-index {}",
                i + 1,
                c.name,
                c.works_count,
                c.cited_by_count,
                c.h_index,
            )?;
        }
    }

    if !overview.latest_publications.is_empty() {
        section(w, "Latest publications", color)?;
        publication_lines(w, &overview.latest_publications, color)?;
    }
    if !overview.top_cited.is_empty() {
        section(w, "Top cited", color)?;
        publication_lines(w, &overview.top_cited, color)?;
    }

    group_section(w, "Subject areas", &overview.subjects, color)?;
    group_section(
        w,
        "Collaborating countries",
        &overview.collaborating_countries,
        color,
    )?;
    group_section(w, "Work types", &overview.work_types, color)?;
    group_section(w, "Top publishers", &overview.publishers, color)?;
    group_section(w, "Funding agencies", &overview.funders, color)?;
    writeln!(w)?;
    Ok(())
}

/// Print result-cache counters and TTLs.
pub fn print_cache_stats(
    w: &mut dyn Write,
    cache: &ResultCache,
    path: Option<&Path>,
    color: ColorMode,
) -> std::io::Result<()> {
    if color.enabled() {
        writeln!(w, "{}", "Result cache".bold())?;
    } else {
        writeln!(w, "Result cache")?;
    }
    writeln!(w, "  Session entries:   {}", cache.len())?;
    if cache.has_persistence() {
        writeln!(w, "  Persisted entries: {}", cache.disk_len())?;
        if let Some(path) = path {
            writeln!(w, "  Cache file:        {}", path.display())?;
        }
    } else if color.enabled() {
        writeln!(w, "  {}", "Persistence disabled (in-memory only)".dimmed())?;
    } else {
        writeln!(w, "  Persistence disabled (in-memory only)")?;
    }
    writeln!(
        w,
        "  Hits: {} | Misses: {} | Average lookup: {:.2} ms",
        cache.hits(),
        cache.misses(),
        cache.avg_lookup_ms(),
    )?;
    writeln!(
        w,
        "  Session TTL: {} s | Persisted TTL: {} s",
        cache.session_ttl().as_secs(),
        cache.persisted_ttl().as_secs(),
    )?;
    Ok(())
}

fn section(w: &mut dyn Write, title: &str, color: ColorMode) -> std::io::Result<()> {
    writeln!(w)?;
    if color.enabled() {
        writeln!(w, "{}", title.bold())?;
    } else {
        writeln!(w, "{}", title)?;
    }
    Ok(())
}

fn group_section(
    w: &mut dyn Write,
    title: &str,
    groups: &[GroupCount],
    color: ColorMode,
) -> std::io::Result<()> {
    if groups.is_empty() {
        return Ok(());
    }
    section(w, title, color)?;
    for (i, g) in groups.iter().take(TOP_ROWS).enumerate() {
        if color.enabled() {
            writeln!(
                w,
                "  {:>2}. {} {}",
                i + 1,
                truncate(&g.key, 48),
                format!("({})", g.count).dimmed()
            )?;
        } else {
            writeln!(w, "  {:>2}. {} ({})", i + 1, truncate(&g.key, 48), g.count)?;
        }
    }
    Ok(())
}

fn publication_lines(
    w: &mut dyn Write,
    publications: &[Publication],
    color: ColorMode,
) -> std::io::Result<()> {
    for p in publications.iter().take(TOP_ROWS) {
        let title = truncate(&p.title, 70);
        let tail = format!("({}, {} citations)", p.year, p.citation_count);
        if p.is_open_access {
            if color.enabled() {
                writeln!(w, "  - {} {} {}", title, tail.dimmed(), "[OA]".green())?;
            } else {
                writeln!(w, "  - {} {} [OA]", title, tail)?;
            }
        } else if color.enabled() {
            writeln!(w, "  - {} {}", title, tail.dimmed())?;
        } else {
            writeln!(w, "  - {} {}", title, tail)?;
        }
    }
    let rest = publications.len().saturating_sub(TOP_ROWS);
    if rest > 0 {
        let note = format!("  ... and {} more (use --output to export the full list)", rest);
        if color.enabled() {
            writeln!(w, "{}", note.dimmed())?;
        } else {
            writeln!(w, "{}", note)?;
        }
    }
    Ok(())
}

// Titles routinely carry accented names; cut on a char boundary.
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let cut: String = s.chars().take(max).collect();
        format!("{}...", cut)
    } else {
        s.to_string()
    }
}
