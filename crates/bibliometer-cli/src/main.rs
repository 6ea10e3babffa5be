use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use bibliometer_core::analysis::{DepartmentAnalysis, analyze_department};
use bibliometer_core::config_file::{self, ConfigFile};
use bibliometer_core::matching::MatchOptions;
use bibliometer_core::{
    DEFAULT_PERSISTED_TTL, DEFAULT_SESSION_TTL, FacultyRecord, MetricsEngine, ProgressEvent,
    Provider, QueryOutcome, QueryScope, ResultCache, ScopeMode, build_result_cache,
};
use bibliometer_reporting::ExportFormat;

mod output;

use output::ColorMode;

/// Institutional publication metrics from Scopus and OpenAlex
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to a TOML config file (instead of the platform config)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to a TOML roster file with [[faculty]] tables
    #[arg(long, global = true)]
    roster: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Metrics for one department's roster members
    Department {
        /// Department name as listed in the roster
        name: String,

        #[command(flatten)]
        query: QueryArgs,
    },

    /// Metrics for a single researcher (roster name, or a provider author id)
    Faculty {
        /// Roster name; anything not in the roster is taken as an author id
        name: String,

        #[command(flatten)]
        query: QueryArgs,
    },

    /// Metrics for every roster member together
    Institution {
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Institution-wide OpenAlex dashboard
    Overview {
        /// Report format (json, csv, markdown, text)
        #[arg(long, value_parser = ExportFormat::from_str)]
        format: Option<ExportFormat>,

        /// Write the report to this file instead of the terminal
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Result cache maintenance
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// Show cached entry counts and counters
    Stats,
    /// Remove every cached result
    Clear,
}

/// Scope and output flags shared by the three query subcommands.
#[derive(Args, Debug, Clone)]
struct QueryArgs {
    /// Restrict to one calendar year (default: all years since 2008)
    #[arg(long)]
    year: Option<i32>,

    /// First month of the window, 1-12; start > end wraps the year boundary
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=12), default_value_t = 1)]
    start_month: u8,

    /// Last month of the window, 1-12
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=12), default_value_t = 12)]
    end_month: u8,

    /// Data provider to query (scopus or openalex)
    #[arg(long, value_parser = Provider::from_str)]
    provider: Option<Provider>,

    /// Report format (json, csv, markdown, text)
    #[arg(long, value_parser = ExportFormat::from_str)]
    format: Option<ExportFormat>,

    /// Write the report to this file instead of the terminal
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Skip the result cache for this run
    #[arg(long)]
    no_cache: bool,

    /// Clear cached results before running
    #[arg(long)]
    refresh: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();
    let file = load_config_file(cli.config.as_deref(), cli.roster.as_deref())?;
    let color = ColorMode(!cli.no_color);

    match cli.command {
        Command::Department { name, query } => {
            run_query(Target::Department(name), query, file, color).await
        }
        Command::Faculty { name, query } => {
            run_query(Target::Faculty(name), query, file, color).await
        }
        Command::Institution { query } => run_query(Target::Institution, query, file, color).await,
        Command::Overview { format, output } => run_overview(format, output, file, color).await,
        Command::Cache { action } => cache_command(action, &file, color),
    }
}

/// Load the effective config: `--config` replaces the platform cascade, and
/// `--roster` tables overlay whatever the config carried.
fn load_config_file(config: Option<&Path>, roster: Option<&Path>) -> anyhow::Result<ConfigFile> {
    let mut file = match config {
        Some(path) => config_file::load_from_path(&path.to_path_buf())
            .ok_or_else(|| anyhow::anyhow!("Could not read config file: {}", path.display()))?,
        None => config_file::load_config(),
    };
    if let Some(path) = roster {
        let roster_file = config_file::load_from_path(&path.to_path_buf())
            .ok_or_else(|| anyhow::anyhow!("Could not read roster file: {}", path.display()))?;
        file = config_file::merge(file, roster_file);
    }
    Ok(file)
}

/// Who a query subcommand is about.
enum Target {
    Department(String),
    Faculty(String),
    Institution,
}

fn resolve_provider(flag: Option<Provider>, file: &ConfigFile) -> Provider {
    if let Some(provider) = flag {
        return provider;
    }
    file.query
        .as_ref()
        .and_then(|q| q.provider.as_deref())
        .and_then(|s| Provider::from_str(s).ok())
        .unwrap_or(Provider::Scopus)
}

/// Resolve a target to provider ids plus the roster rows the analysis tables
/// should cover. A faculty name that is not in the roster is passed through
/// as a raw author id with no analysis.
fn resolve_scope(
    target: &Target,
    file: &ConfigFile,
    provider: Provider,
) -> anyhow::Result<(QueryScope, Vec<FacultyRecord>)> {
    match target {
        Target::Department(name) => {
            let members: Vec<FacultyRecord> = file
                .department_members(name)
                .into_iter()
                .cloned()
                .collect();
            if members.is_empty() {
                anyhow::bail!(
                    "No roster entries for department '{}'. Add them to the roster file or pass --roster.",
                    name
                );
            }
            let ids = file.department_ids(name, provider);
            if ids.is_empty() {
                anyhow::bail!(
                    "No {} ids in the roster for department '{}'",
                    provider,
                    name
                );
            }
            Ok((
                QueryScope::new(ids, provider, ScopeMode::Department),
                members,
            ))
        }
        Target::Faculty(name) => {
            if let Some(row) = file.find_faculty(name) {
                let id = row.id_for(provider).ok_or_else(|| {
                    anyhow::anyhow!("Roster entry '{}' has no {} id", row.name, provider)
                })?;
                Ok((
                    QueryScope::new(vec![id.to_string()], provider, ScopeMode::Individual),
                    vec![row.clone()],
                ))
            } else {
                Ok((
                    QueryScope::new(vec![name.clone()], provider, ScopeMode::Individual),
                    Vec::new(),
                ))
            }
        }
        Target::Institution => {
            let ids: Vec<String> = file
                .faculty
                .iter()
                .filter_map(|f| f.id_for(provider))
                .map(str::to_owned)
                .collect();
            if ids.is_empty() {
                anyhow::bail!(
                    "The roster has no {} ids. Provide a roster with --roster or in the config file.",
                    provider
                );
            }
            Ok((
                QueryScope::new(ids, provider, ScopeMode::Institution),
                file.faculty.clone(),
            ))
        }
    }
}

/// Engine configuration resolved as: environment > config file > defaults.
fn engine_config(file: &ConfigFile, no_cache: bool) -> bibliometer_core::Config {
    let defaults = bibliometer_core::Config::default();

    let session_ttl_secs = file
        .cache
        .as_ref()
        .and_then(|c| c.session_ttl_secs)
        .unwrap_or(defaults.cache_session_ttl_secs);
    let persisted_ttl_secs = file
        .cache
        .as_ref()
        .and_then(|c| c.persisted_ttl_secs)
        .unwrap_or(defaults.cache_persisted_ttl_secs);

    let (cache_path, result_cache) = if no_cache {
        // Fresh in-memory cache: nothing to hit, nothing persisted.
        let cache = ResultCache::new(
            Duration::from_secs(session_ttl_secs),
            Duration::from_secs(persisted_ttl_secs),
        );
        (None, Some(Arc::new(cache)))
    } else {
        let path = cache_path_from(file);
        let cache = build_result_cache(path.as_deref(), session_ttl_secs, persisted_ttl_secs);
        (path, Some(cache))
    };

    bibliometer_core::Config {
        scopus_api_key: std::env::var("SCOPUS_API_KEY")
            .ok()
            .or_else(|| file.api.as_ref().and_then(|a| a.scopus_api_key.clone())),
        openalex_mailto: std::env::var("OPENALEX_MAILTO")
            .ok()
            .or_else(|| file.api.as_ref().and_then(|a| a.openalex_mailto.clone())),
        institution_id: file
            .query
            .as_ref()
            .and_then(|q| q.institution_id.clone())
            .unwrap_or(defaults.institution_id),
        request_spacing_ms: file
            .query
            .as_ref()
            .and_then(|q| q.request_spacing_ms)
            .unwrap_or(defaults.request_spacing_ms),
        retry: defaults.retry,
        result_cache,
        cache_path,
        cache_session_ttl_secs: session_ttl_secs,
        cache_persisted_ttl_secs: persisted_ttl_secs,
    }
}

fn cache_path_from(file: &ConfigFile) -> Option<PathBuf> {
    std::env::var("BIBLIOMETER_CACHE")
        .ok()
        .map(PathBuf::from)
        .or_else(|| {
            file.cache
                .as_ref()
                .and_then(|c| c.path.clone())
                .map(PathBuf::from)
        })
}

async fn run_query(
    target: Target,
    query: QueryArgs,
    file: ConfigFile,
    color: ColorMode,
) -> anyhow::Result<()> {
    let provider = resolve_provider(query.provider, &file);
    let (mut scope, roster) = resolve_scope(&target, &file, provider)?;
    scope.year = query.year;
    scope.start_month = query.start_month;
    scope.end_month = query.end_month;

    let engine = MetricsEngine::new(engine_config(&file, query.no_cache))?;
    if query.refresh {
        engine.cache().clear();
    }

    let cancel = CancellationToken::new();
    let cancel_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_signal.cancel();
        }
    });

    let bar = progress_bar();
    let progress = query_progress(bar.clone());
    let outcome = engine.scoped_metrics(&scope, &progress, &cancel).await?;
    bar.finish_and_clear();

    if cancel.is_cancelled() {
        eprintln!("Cancelled; showing what was gathered so far.");
    }

    let analysis = (!roster.is_empty()).then(|| {
        analyze_department(&roster, &outcome.publications, &MatchOptions::default())
    });

    emit_outcome(&outcome, analysis.as_ref(), &query, color)
}

async fn run_overview(
    format: Option<ExportFormat>,
    output: Option<PathBuf>,
    file: ConfigFile,
    color: ColorMode,
) -> anyhow::Result<()> {
    let engine = MetricsEngine::new(engine_config(&file, false))?;

    let cancel = CancellationToken::new();
    let cancel_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_signal.cancel();
        }
    });

    let bar = progress_bar();
    let progress = query_progress(bar.clone());
    let overview = engine.institution_overview(&progress, &cancel).await?;
    bar.finish_and_clear();

    if cancel.is_cancelled() {
        eprintln!("Cancelled; showing the sections loaded so far.");
    }

    if let Some(path) = &output {
        let format = format.unwrap_or(ExportFormat::Text);
        bibliometer_reporting::export_overview(&overview, format, path)
            .map_err(|e| anyhow::anyhow!(e))?;
        println!("Report written to {}", path.display());
        return Ok(());
    }
    if let Some(format) = format {
        let content = bibliometer_reporting::render_overview(&overview, format)
            .map_err(|e| anyhow::anyhow!(e))?;
        print!("{}", content);
        return Ok(());
    }
    let mut stdout = std::io::stdout();
    output::print_overview(&mut stdout, &overview, color)?;
    Ok(())
}

fn emit_outcome(
    outcome: &QueryOutcome,
    analysis: Option<&DepartmentAnalysis>,
    query: &QueryArgs,
    color: ColorMode,
) -> anyhow::Result<()> {
    if let Some(path) = &query.output {
        let format = query.format.unwrap_or(ExportFormat::Text);
        bibliometer_reporting::export_outcome(outcome, analysis, format, path)
            .map_err(|e| anyhow::anyhow!(e))?;
        println!("Report written to {}", path.display());
        return Ok(());
    }
    if let Some(format) = query.format {
        let content = bibliometer_reporting::render_outcome(outcome, analysis, format)
            .map_err(|e| anyhow::anyhow!(e))?;
        print!("{}", content);
        return Ok(());
    }
    let mut stdout = std::io::stdout();
    output::print_outcome(&mut stdout, outcome, analysis, color)?;
    Ok(())
}

fn cache_command(action: CacheAction, file: &ConfigFile, color: ColorMode) -> anyhow::Result<()> {
    let session_ttl = file
        .cache
        .as_ref()
        .and_then(|c| c.session_ttl_secs)
        .unwrap_or(DEFAULT_SESSION_TTL.as_secs());
    let persisted_ttl = file
        .cache
        .as_ref()
        .and_then(|c| c.persisted_ttl_secs)
        .unwrap_or(DEFAULT_PERSISTED_TTL.as_secs());
    let path = cache_path_from(file);
    let cache = build_result_cache(path.as_deref(), session_ttl, persisted_ttl);

    match action {
        CacheAction::Stats => {
            let mut stdout = std::io::stdout();
            output::print_cache_stats(&mut stdout, &cache, path.as_deref(), color)?;
        }
        CacheAction::Clear => {
            if path.is_none() {
                println!("No persistent cache configured; nothing to clear.");
                println!("Set [cache].path in the config file or the BIBLIOMETER_CACHE variable.");
                return Ok(());
            }
            let removed = cache.disk_len();
            cache.clear();
            println!("Cache cleared ({} persisted entries removed)", removed);
        }
    }
    Ok(())
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(ProgressStyle::with_template("{spinner:.cyan} {msg}").unwrap());
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

fn query_progress(bar: ProgressBar) -> impl Fn(ProgressEvent) + Send + Sync {
    move |event| match event {
        ProgressEvent::BatchStarted { index, total } => {
            bar.set_message(format!("Querying batch {}/{}", index + 1, total));
        }
        ProgressEvent::BatchCompleted { index, total, kept } => {
            bar.set_message(format!(
                "Batch {}/{} done ({} publications)",
                index + 1,
                total,
                kept
            ));
        }
        ProgressEvent::BatchFailed {
            index,
            total,
            message,
        } => {
            bar.println(format!("Batch {}/{} failed: {}", index + 1, total, message));
        }
        ProgressEvent::PageFetched {
            year,
            page,
            records,
        } => {
            bar.set_message(format!("Year {}: page {} ({} records)", year, page + 1, records));
        }
        ProgressEvent::MonthFallback => {
            bar.println("No month-scoped results; retrying with year-wide queries");
        }
        ProgressEvent::SectionLoaded { name } => {
            bar.set_message(format!("Loaded {}", name));
        }
        ProgressEvent::CacheHit => {
            bar.set_message("Answered from cache");
        }
    }
}
