use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use bibliometer_core::{
    DepartmentAnalysis, GroupCount, InstitutionOverview, Publication, QueryOutcome,
};

/// Ranking depth per report section. Publisher rankings run deeper than the
/// rest; every other grouped panel shows its top ten.
const TOP_JOURNALS: usize = 10;
const TOP_PUBLISHERS: usize = 25;
const TOP_OTHER: usize = 10;

/// How many of the overview's publication lists make it into a report.
const TOP_WORKS: usize = 10;

/// Output format for exported reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
    Markdown,
    Text,
}

impl ExportFormat {
    pub fn all() -> [ExportFormat; 4] {
        [
            ExportFormat::Json,
            ExportFormat::Csv,
            ExportFormat::Markdown,
            ExportFormat::Text,
        ]
    }

    pub fn label(&self) -> &'static str {
        match self {
            ExportFormat::Json => "JSON",
            ExportFormat::Csv => "CSV",
            ExportFormat::Markdown => "Markdown",
            ExportFormat::Text => "Plain text",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
            ExportFormat::Markdown => "md",
            ExportFormat::Text => "txt",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            "markdown" | "md" => Ok(ExportFormat::Markdown),
            "text" | "txt" => Ok(ExportFormat::Text),
            other => Err(format!(
                "unknown format '{}' (expected json, csv, markdown, or text)",
                other
            )),
        }
    }
}

/// Render a query outcome and write it to `path`.
pub fn export_outcome(
    outcome: &QueryOutcome,
    analysis: Option<&DepartmentAnalysis>,
    format: ExportFormat,
    path: &Path,
) -> Result<(), String> {
    let content = render_outcome(outcome, analysis, format)?;
    write_report(path, &content)
}

/// Render an institution overview and write it to `path`.
pub fn export_overview(
    overview: &InstitutionOverview,
    format: ExportFormat,
    path: &Path,
) -> Result<(), String> {
    let content = render_overview(overview, format)?;
    write_report(path, &content)
}

fn write_report(path: &Path, content: &str) -> Result<(), String> {
    let mut file =
        std::fs::File::create(path).map_err(|e| format!("Failed to create file: {}", e))?;
    file.write_all(content.as_bytes())
        .map_err(|e| format!("Failed to write: {}", e))?;
    Ok(())
}

/// Render a query outcome in the given format. The JSON rendering carries
/// the full data set; the readable formats truncate grouped rankings.
pub fn render_outcome(
    outcome: &QueryOutcome,
    analysis: Option<&DepartmentAnalysis>,
    format: ExportFormat,
) -> Result<String, String> {
    Ok(match format {
        ExportFormat::Json => outcome_json(outcome, analysis)?,
        ExportFormat::Csv => outcome_csv(outcome),
        ExportFormat::Markdown => outcome_markdown(outcome, analysis),
        ExportFormat::Text => outcome_text(outcome, analysis),
    })
}

/// Render an institution overview in the given format.
pub fn render_overview(
    overview: &InstitutionOverview,
    format: ExportFormat,
) -> Result<String, String> {
    Ok(match format {
        ExportFormat::Json => overview_json(overview)?,
        ExportFormat::Csv => overview_csv(overview),
        ExportFormat::Markdown => overview_markdown(overview),
        ExportFormat::Text => overview_text(overview),
    })
}

fn top(groups: &[GroupCount], n: usize) -> &[GroupCount] {
    &groups[..groups.len().min(n)]
}

// ── JSON ─────────────────────────────────────────────────────────────

fn outcome_json(
    outcome: &QueryOutcome,
    analysis: Option<&DepartmentAnalysis>,
) -> Result<String, String> {
    let mut doc = serde_json::to_value(outcome)
        .map_err(|e| format!("Failed to serialize results: {}", e))?;
    if let (Some(analysis), Some(object)) = (analysis, doc.as_object_mut()) {
        let value = serde_json::to_value(analysis)
            .map_err(|e| format!("Failed to serialize analysis: {}", e))?;
        object.insert("analysis".to_string(), value);
    }
    let mut out = serde_json::to_string_pretty(&doc)
        .map_err(|e| format!("Failed to serialize results: {}", e))?;
    out.push('\n');
    Ok(out)
}

fn overview_json(overview: &InstitutionOverview) -> Result<String, String> {
    let mut out = serde_json::to_string_pretty(overview)
        .map_err(|e| format!("Failed to serialize overview: {}", e))?;
    out.push('\n');
    Ok(out)
}

// ── CSV ──────────────────────────────────────────────────────────────

fn csv_escape(s: &str) -> String {
    if s.contains('"') || s.contains(',') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn csv_publication_row(out: &mut String, p: &Publication) {
    out.push_str(&format!(
        "{},{},{},{},{},{},{},{},{},{}\n",
        csv_escape(&p.title),
        csv_escape(&p.authors_display),
        csv_escape(&p.journal_name),
        p.year,
        p.month,
        p.citation_count,
        p.is_open_access,
        csv_escape(&p.document_type),
        csv_escape(p.doi.as_deref().unwrap_or("")),
        csv_escape(&p.canonical_url),
    ));
}

const CSV_HEADER: &str =
    "Title,Authors,Journal,Year,Month,Citations,OpenAccess,DocumentType,DOI,URL\n";

/// One row per publication. The summary panels have no tabular shape, so the
/// CSV rendering is the publication list alone.
fn outcome_csv(outcome: &QueryOutcome) -> String {
    let mut out = String::from(CSV_HEADER);
    for p in &outcome.publications {
        csv_publication_row(&mut out, p);
    }
    out
}

fn overview_csv(overview: &InstitutionOverview) -> String {
    let mut out = String::from(CSV_HEADER);
    for p in overview.latest_publications.iter().take(TOP_WORKS) {
        csv_publication_row(&mut out, p);
    }
    for p in overview.top_cited.iter().take(TOP_WORKS) {
        csv_publication_row(&mut out, p);
    }
    out
}

// ── Markdown ─────────────────────────────────────────────────────────

fn md_escape(s: &str) -> String {
    s.replace('|', "\\|")
}

fn md_group_table(out: &mut String, heading: &str, groups: &[GroupCount], depth: usize) {
    if groups.is_empty() {
        return;
    }
    out.push_str(&format!("## {}\n\n", heading));
    out.push_str("| # | Name | Publications |\n");
    out.push_str("|---|------|-------------|\n");
    for (i, g) in top(groups, depth).iter().enumerate() {
        out.push_str(&format!("| {} | {} | {} |\n", i + 1, md_escape(&g.key), g.count));
    }
    out.push('\n');
}

fn md_publication_table(out: &mut String, heading: &str, publications: &[Publication]) {
    if publications.is_empty() {
        return;
    }
    out.push_str(&format!("## {}\n\n", heading));
    out.push_str("| # | Title | Journal | Year | Citations | OA |\n");
    out.push_str("|---|-------|---------|------|-----------|----|\n");
    for (i, p) in publications.iter().enumerate() {
        let title = if p.canonical_url.is_empty() {
            md_escape(&p.title)
        } else {
            format!("[{}]({})", md_escape(&p.title), p.canonical_url)
        };
        let oa = if p.is_open_access { "\u{2713}" } else { "" };
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} |\n",
            i + 1,
            title,
            md_escape(&p.journal_name),
            p.year,
            p.citation_count,
            oa,
        ));
    }
    out.push('\n');
}

fn outcome_markdown(outcome: &QueryOutcome, analysis: Option<&DepartmentAnalysis>) -> String {
    let m = &outcome.metrics;
    let mut out = String::from("# Publication Metrics\n\n");

    out.push_str(&format!(
        "**{}** publications | **{}** citations | **{}** h-index | **{}%** open access ({}/{})\n\n",
        m.publication_count,
        m.total_citations,
        m.h_index,
        m.open_access.percentage,
        m.open_access.count,
        m.open_access.total,
    ));

    if !m.yearly_rollup.is_empty() {
        out.push_str("## Yearly Output\n\n");
        out.push_str("| Year | Publications | Citations |\n");
        out.push_str("|------|-------------|-----------|\n");
        for y in &m.yearly_rollup {
            out.push_str(&format!("| {} | {} | {} |\n", y.year, y.count, y.citations));
        }
        out.push('\n');
    }

    if let Some(months) = &m.monthly_rollup {
        out.push_str("## Monthly Output\n\n");
        out.push_str("| Year | Month | Publications | Citations |\n");
        out.push_str("|------|-------|-------------|-----------|\n");
        for mo in months {
            out.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                mo.year, mo.month, mo.count, mo.citations
            ));
        }
        out.push('\n');
    }

    md_group_table(&mut out, "Top Journals", &m.groups.journals, TOP_JOURNALS);
    md_group_table(&mut out, "Top Publishers", &m.groups.publishers, TOP_PUBLISHERS);
    md_group_table(&mut out, "Funding Agencies", &m.groups.funders, TOP_OTHER);
    md_group_table(&mut out, "Collaborating Countries", &m.groups.countries, TOP_OTHER);
    md_group_table(&mut out, "Subject Areas", &m.groups.subjects, TOP_OTHER);
    md_group_table(&mut out, "Document Types", &m.groups.document_types, TOP_OTHER);

    if !outcome.author_profiles.is_empty() {
        out.push_str("## Author Profiles\n\n");
        out.push_str("| Author | H-index | Documents | Citations |\n");
        out.push_str("|--------|---------|-----------|-----------|\n");
        for a in &outcome.author_profiles {
            out.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                md_escape(&a.name),
                a.h_index,
                a.document_count,
                a.cited_by_count,
            ));
        }
        out.push_str(&format!(
            "\nAverage H-index: **{}**\n\n",
            outcome.average_h_index
        ));
    }

    if let Some(analysis) = analysis {
        if !analysis.performance.is_empty() {
            out.push_str("## Faculty Performance\n\n");
            out.push_str("| Faculty | Publications | Citations | Open Access | Top Publication |\n");
            out.push_str("|---------|-------------|-----------|-------------|----------------|\n");
            for row in &analysis.performance {
                let top_pub = row
                    .top_publication
                    .as_ref()
                    .map(|p| md_escape(&p.title))
                    .unwrap_or_else(|| "\u{2014}".to_string());
                out.push_str(&format!(
                    "| {} | {} | {} | {} | {} |\n",
                    md_escape(&row.name),
                    row.publication_count,
                    row.citation_count,
                    row.open_access_count,
                    top_pub,
                ));
            }
            out.push('\n');
        }
        if !analysis.collaborations.is_empty() {
            out.push_str("## Collaboration Pairs\n\n");
            out.push_str("| Faculty | Faculty | Joint Publications |\n");
            out.push_str("|---------|---------|--------------------|\n");
            for pair in &analysis.collaborations {
                out.push_str(&format!(
                    "| {} | {} | {} |\n",
                    md_escape(&pair.first),
                    md_escape(&pair.second),
                    pair.joint_count,
                ));
            }
            out.push('\n');
        }
    }

    md_publication_table(&mut out, "Publications", &outcome.publications);
    out
}

fn overview_markdown(overview: &InstitutionOverview) -> String {
    let p = &overview.profile;
    let mut out = String::from("# Institution Overview\n\n");
    if !p.display_name.is_empty() {
        out.push_str(&format!("## {}\n\n", p.display_name));
    }
    out.push_str(&format!(
        "**{}** works | **{}** citations | **{}** h-index | **{}** i10-index | **{}** open-access works\n\n",
        p.works_count, p.cited_by_count, p.h_index, p.i10_index, overview.open_access_works,
    ));

    if !overview.yearly_output.is_empty() {
        out.push_str("## Yearly Output\n\n");
        out.push_str("| Year | Publications | Citations |\n");
        out.push_str("|------|-------------|-----------|\n");
        for y in &overview.yearly_output {
            out.push_str(&format!("| {} | {} | {} |\n", y.year, y.count, y.citations));
        }
        out.push('\n');
    }

    if !overview.top_contributors.is_empty() {
        out.push_str("## Top Contributors\n\n");
        out.push_str("| # | Name | Works | Citations | H-index |\n");
        out.push_str("|---|------|-------|-----------|--------|\n");
        for (i, c) in overview.top_contributors.iter().enumerate() {
            out.push_str(&format!(
                "| {} | {} | {} | {} | {} |\n",
                i + 1,
                md_escape(&c.name),
                c.works_count,
                c.cited_by_count,
                c.h_index,
            ));
        }
        out.push('\n');
    }

    md_publication_table(
        &mut out,
        "Latest Publications",
        &overview.latest_publications[..overview.latest_publications.len().min(TOP_WORKS)],
    );
    md_publication_table(
        &mut out,
        "Top Cited",
        &overview.top_cited[..overview.top_cited.len().min(TOP_WORKS)],
    );

    md_group_table(&mut out, "Subject Areas", &overview.subjects, TOP_OTHER);
    md_group_table(
        &mut out,
        "Collaborating Countries",
        &overview.collaborating_countries,
        TOP_OTHER,
    );
    md_group_table(&mut out, "Work Types", &overview.work_types, TOP_OTHER);
    md_group_table(&mut out, "Top Publishers", &overview.publishers, TOP_PUBLISHERS);
    md_group_table(&mut out, "Funding Agencies", &overview.funders, TOP_OTHER);
    out
}

// ── Plain text ───────────────────────────────────────────────────────

fn text_section(out: &mut String, title: &str) {
    out.push_str(&format!("\n{}\n", title));
    out.push_str(&"-".repeat(title.len()));
    out.push('\n');
}

fn text_group_section(out: &mut String, title: &str, groups: &[GroupCount], depth: usize) {
    if groups.is_empty() {
        return;
    }
    text_section(out, title);
    for (i, g) in top(groups, depth).iter().enumerate() {
        out.push_str(&format!("  {:>2}. {} ({})\n", i + 1, g.key, g.count));
    }
}

fn text_publication_lines(out: &mut String, publications: &[Publication]) {
    for (i, p) in publications.iter().enumerate() {
        let oa = if p.is_open_access { " [OA]" } else { "" };
        out.push_str(&format!(
            "  [{}] {} - {} ({}, {} citations){}\n",
            i + 1,
            p.title,
            p.journal_name,
            p.year,
            p.citation_count,
            oa,
        ));
        if !p.authors_display.is_empty() {
            out.push_str(&format!("       Authors: {}\n", p.authors_display));
        }
        if let Some(doi) = &p.doi {
            out.push_str(&format!("       DOI: {}\n", doi));
        }
    }
}

fn outcome_text(outcome: &QueryOutcome, analysis: Option<&DepartmentAnalysis>) -> String {
    let m = &outcome.metrics;
    let mut out = String::from("Publication Metrics\n");
    out.push_str(&"=".repeat(60));
    out.push('\n');
    out.push_str(&format!(
        "  {} publications | {} citations | h-index {} | {}% open access\n",
        m.publication_count, m.total_citations, m.h_index, m.open_access.percentage,
    ));

    if !m.yearly_rollup.is_empty() {
        text_section(&mut out, "Yearly output");
        for y in &m.yearly_rollup {
            out.push_str(&format!(
                "  {}  {:>5} publications  {:>8} citations\n",
                y.year, y.count, y.citations
            ));
        }
    }

    if let Some(months) = &m.monthly_rollup {
        text_section(&mut out, "Monthly output");
        for mo in months {
            out.push_str(&format!(
                "  {}-{:02}  {:>5} publications  {:>8} citations\n",
                mo.year, mo.month, mo.count, mo.citations
            ));
        }
    }

    text_group_section(&mut out, "Top journals", &m.groups.journals, TOP_JOURNALS);
    text_group_section(&mut out, "Top publishers", &m.groups.publishers, TOP_PUBLISHERS);
    text_group_section(&mut out, "Funding agencies", &m.groups.funders, TOP_OTHER);
    text_group_section(&mut out, "Collaborating countries", &m.groups.countries, TOP_OTHER);
    text_group_section(&mut out, "Subject areas", &m.groups.subjects, TOP_OTHER);
    text_group_section(&mut out, "Document types", &m.groups.document_types, TOP_OTHER);

    if !outcome.author_profiles.is_empty() {
        text_section(&mut out, "Author profiles");
        for a in &outcome.author_profiles {
            out.push_str(&format!(
                "  {} - h-index {}, {} documents, {} citations\n",
                a.name, a.h_index, a.document_count, a.cited_by_count,
            ));
        }
        out.push_str(&format!("  Average h-index: {}\n", outcome.average_h_index));
    }

    if let Some(analysis) = analysis {
        if !analysis.performance.is_empty() {
            text_section(&mut out, "Faculty performance");
            for row in &analysis.performance {
                out.push_str(&format!(
                    "  {} - {} publications, {} citations, {} open access\n",
                    row.name, row.publication_count, row.citation_count, row.open_access_count,
                ));
            }
        }
        if !analysis.collaborations.is_empty() {
            text_section(&mut out, "Collaboration pairs");
            for pair in &analysis.collaborations {
                out.push_str(&format!(
                    "  {} + {} - {} joint\n",
                    pair.first, pair.second, pair.joint_count,
                ));
            }
        }
    }

    if !outcome.publications.is_empty() {
        text_section(&mut out, "Publications");
        text_publication_lines(&mut out, &outcome.publications);
    }
    out
}

fn overview_text(overview: &InstitutionOverview) -> String {
    let p = &overview.profile;
    let mut out = String::from("Institution Overview\n");
    out.push_str(&"=".repeat(60));
    out.push('\n');
    if !p.display_name.is_empty() {
        out.push_str(&format!("  {}\n", p.display_name));
    }
    out.push_str(&format!(
        "  {} works | {} citations | h-index {} | i10-index {} | {} open access\n",
        p.works_count, p.cited_by_count, p.h_index, p.i10_index, overview.open_access_works,
    ));

    if !overview.yearly_output.is_empty() {
        text_section(&mut out, "Yearly output");
        for y in &overview.yearly_output {
            out.push_str(&format!(
                "  {}  {:>5} publications  {:>8} citations\n",
                y.year, y.count, y.citations
            ));
        }
    }

    if !overview.top_contributors.is_empty() {
        text_section(&mut out, "Top contributors");
        for (i, c) in overview.top_contributors.iter().enumerate() {
            out.push_str(&format!(
                "  {:>2}. {} - {} works, {} citations, h-index {}\n",
                i + 1,
                c.name,
                c.works_count,
                c.cited_by_count,
                c.h_index,
            ));
        }
    }

    if !overview.latest_publications.is_empty() {
        text_section(&mut out, "Latest publications");
        text_publication_lines(
            &mut out,
            &overview.latest_publications[..overview.latest_publications.len().min(TOP_WORKS)],
        );
    }
    if !overview.top_cited.is_empty() {
        text_section(&mut out, "Top cited");
        text_publication_lines(
            &mut out,
            &overview.top_cited[..overview.top_cited.len().min(TOP_WORKS)],
        );
    }

    text_group_section(&mut out, "Subject areas", &overview.subjects, TOP_OTHER);
    text_group_section(
        &mut out,
        "Collaborating countries",
        &overview.collaborating_countries,
        TOP_OTHER,
    );
    text_group_section(&mut out, "Work types", &overview.work_types, TOP_OTHER);
    text_group_section(&mut out, "Top publishers", &overview.publishers, TOP_PUBLISHERS);
    text_group_section(&mut out, "Funding agencies", &overview.funders, TOP_OTHER);
    out
}
