//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use noticeharvest_collector::CollectorCommand;
use noticeharvest_orchestrator::{
    ProgressReporter, RunConfig, RunSummary, SourceFilter, run as run_batch, save_failed_units,
};
use noticeharvest_registry::{KeyOptions, Registry};
use noticeharvest_shared::{AppConfig, UnitReport, UnitState, init_config, load_config};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// noticeharvest — collect and deduplicate government announcements.
#[derive(Parser)]
#[command(
    name = "noticeharvest",
    version,
    about = "Batch-run per-site announcement collectors with deduplication and auditing.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run collectors for one date across the site tree.
    Collect {
        /// Collection date (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        date: Option<String>,

        /// Source family to run: all, portal, regional, municipal, scraper.
        #[arg(long, default_value = "all")]
        source: String,

        /// Concurrent collector processes (overrides config).
        #[arg(long)]
        workers: Option<usize>,

        /// Ignore completion markers and re-run finished units.
        #[arg(long)]
        force: bool,

        /// Only re-run units listed in the previous failed-units file.
        #[arg(long)]
        retry_failed: bool,

        /// Per-unit timeout in seconds (overrides config).
        #[arg(long)]
        timeout: Option<u64>,

        /// Enumerate the units without invoking anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Reconcile item folders on disk against the artifact store.
    Audit {
        /// Lookback window in days (overrides config).
        #[arg(long)]
        days_back: Option<u32>,

        /// Source family to audit.
        #[arg(long, default_value = "all")]
        source: String,

        /// Write the full report as JSON to this path.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Inspect and administer the dedup registry.
    Registry {
        #[command(subcommand)]
        action: RegistryAction,
    },

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Registry subcommands.
#[derive(Subcommand)]
pub(crate) enum RegistryAction {
    /// Aggregate statistics for one site.
    Stats {
        /// Site code.
        site: String,
    },
    /// Most recent entries for one site.
    Recent {
        /// Site code.
        site: String,

        /// Maximum entries to show.
        #[arg(long, default_value = "20")]
        limit: u32,

        /// Only entries first seen today.
        #[arg(long)]
        today: bool,
    },
    /// Activate or deactivate one registry entry.
    SetStatus {
        /// Site code.
        site: String,

        /// Identity key of the entry.
        key: String,

        /// Deactivate instead of activate.
        #[arg(long)]
        deactivate: bool,

        /// Optional status note.
        #[arg(long)]
        note: Option<String>,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "noticeharvest=info",
        1 => "noticeharvest=debug",
        _ => "noticeharvest=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Collect {
            date,
            source,
            workers,
            force,
            retry_failed,
            timeout,
            dry_run,
        } => {
            cmd_collect(
                date.as_deref(),
                &source,
                workers,
                force,
                retry_failed,
                timeout,
                dry_run,
            )
            .await
        }
        Command::Audit {
            days_back,
            source,
            out,
        } => cmd_audit(days_back, &source, out.as_deref()).await,
        Command::Registry { action } => match action {
            RegistryAction::Stats { site } => cmd_registry_stats(&site).await,
            RegistryAction::Recent { site, limit, today } => {
                cmd_registry_recent(&site, limit, today).await
            }
            RegistryAction::SetStatus {
                site,
                key,
                deactivate,
                note,
            } => cmd_registry_set_status(&site, &key, !deactivate, note.as_deref()).await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Expand a leading `~/` against the user's home directory.
fn expand_path(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}

fn parse_date(raw: Option<&str>) -> Result<NaiveDate> {
    match raw {
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map_err(|e| eyre!("invalid date '{s}': {e} (expected YYYY-MM-DD)")),
        None => Ok(Local::now().date_naive()),
    }
}

fn parse_source(raw: &str) -> Result<SourceFilter> {
    raw.parse::<SourceFilter>().map_err(|e| eyre!(e))
}

async fn open_registry(config: &AppConfig) -> Result<Registry> {
    let db_path = expand_path(&config.defaults.db_path);
    let mut registry = Registry::open(&db_path).await?;
    registry.set_key_options(KeyOptions {
        sort_query: config.identity.sort_query,
    });
    Ok(registry)
}

// ---------------------------------------------------------------------------
// collect
// ---------------------------------------------------------------------------

async fn cmd_collect(
    date: Option<&str>,
    source: &str,
    workers: Option<usize>,
    force: bool,
    retry_failed: bool,
    timeout: Option<u64>,
    dry_run: bool,
) -> Result<()> {
    let config = load_config()?;
    let date = parse_date(date)?;
    let source = parse_source(source)?;

    let run_config = RunConfig {
        data_root: expand_path(&config.defaults.data_root),
        date,
        source,
        max_workers: workers.unwrap_or(config.defaults.workers),
        force,
        retry_failed,
        dry_run,
        results_dir: expand_path(&config.defaults.results_dir),
        collector: CollectorCommand {
            program: config.collector.program.clone(),
            args: config.collector.args.clone(),
        },
        timeout: Duration::from_secs(timeout.unwrap_or(config.collector.timeout_secs)),
        grace: Duration::from_secs(config.collector.grace_secs),
        min_free_mb: config.collector.min_free_mb,
    };

    info!(date = %date, workers = run_config.max_workers, "starting collection");

    let registry = open_registry(&config).await?;
    let reporter = CliProgress::new();
    let summary = run_batch(&run_config, &registry, &reporter).await?;

    print_summary(&summary);

    if summary.has_failures() {
        println!("  Retry the failed units with:");
        println!("    {}", summary.retry_command());
        println!();
        std::process::exit(1);
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("  Collection run for {}", summary.date.format("%Y-%m-%d"));
    println!("  Success:    {}", summary.success);
    println!("  Failed:     {}", summary.failed);
    println!("  Timed out:  {}", summary.timed_out);
    println!("  Skipped:    {}", summary.skipped);
    println!("  New items:  {}", summary.new_items);
    println!("  Duplicates: {}", summary.duplicate_items);
    if summary.error_items > 0 {
        println!("  Errors:     {}", summary.error_items);
    }
    println!("  Time:       {:.1}s", summary.duration_secs);
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Per-unit progress on an indicatif spinner, one status line per finish.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap()
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn unit_started(&self, unit_name: &str) {
        self.spinner.set_message(format!("Collecting {unit_name}"));
    }

    fn unit_finished(&self, report: &UnitReport) {
        let line = match report.state {
            UnitState::Success => format!(
                "  ok      {} (+{} new, {} dup, {:.1}s)",
                report.unit_name,
                report.new_items,
                report.duplicate_items,
                report.elapsed.as_secs_f64()
            ),
            UnitState::Skipped => format!(
                "  skip    {} ({})",
                report.unit_name,
                report.message.as_deref().unwrap_or("skipped")
            ),
            UnitState::Failed => format!(
                "  FAIL    {} ({})",
                report.unit_name,
                report.message.as_deref().unwrap_or("failed")
            ),
            UnitState::TimedOut => format!("  TIMEOUT {}", report.unit_name),
        };
        self.spinner.println(line);
    }

    fn done(&self, _summary: &RunSummary) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// audit
// ---------------------------------------------------------------------------

async fn cmd_audit(days_back: Option<u32>, source: &str, out: Option<&std::path::Path>) -> Result<()> {
    let config = load_config()?;
    let source = parse_source(source)?;
    let days_back = days_back.unwrap_or(config.audit.days_back);
    let data_root = expand_path(&config.defaults.data_root);

    let registry = open_registry(&config).await?;
    let report = noticeharvest_audit::scan(
        &data_root,
        source,
        Local::now().date_naive(),
        days_back,
        &registry,
    )
    .await?;

    println!();
    println!("  Reconciliation audit, last {days_back} day(s)");
    for day in &report.days {
        println!(
            "  {}  disk {:>5}  store {:>5}  gap {:>4}",
            day.date.format("%Y-%m-%d"),
            day.folder_total,
            day.store_total,
            day.gap_total
        );
        for site in day.sites.iter().filter(|s| s.gap != 0) {
            println!(
                "      {:<30} disk {:>4}  store {:>4}  gap {:>+4}",
                site.unit_name, site.folder_count, site.store_count, site.gap
            );
        }
    }
    println!("  Total gap: {}", report.total_gap());
    println!();

    if let Some(path) = out {
        report.write(path)?;
        println!("  Report written to {}", path.display());
    }

    // Gapped days become failed-units files, so the printed command
    // re-collects exactly the lagging units and nothing else.
    if report.has_gaps() {
        let results_dir = expand_path(&config.defaults.results_dir);
        println!("  Re-collect the lagging units with:");
        for day in report.days.iter().filter(|d| d.gap_total > 0) {
            save_failed_units(&results_dir, &day.remediation())?;
            println!(
                "    noticeharvest collect --date {} --retry-failed",
                day.date.format("%Y-%m-%d")
            );
        }
        println!();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// registry
// ---------------------------------------------------------------------------

async fn cmd_registry_stats(site: &str) -> Result<()> {
    let config = load_config()?;
    let registry = open_registry(&config).await?;
    let stats = registry.site_stats(site).await?;

    println!();
    println!("  Registry stats for {site}");
    println!("  Distinct keys:         {}", stats.total_keys);
    println!("  Distinct domains:      {}", stats.distinct_domains);
    println!("  Total collections:     {}", stats.total_collections);
    println!("  Duplicate collections: {}", stats.duplicate_collections);
    if let Some(first) = &stats.first_collected_at {
        println!("  First collected:       {first}");
    }
    if let Some(last) = &stats.last_collected_at {
        println!("  Last collected:        {last}");
    }
    println!();
    Ok(())
}

async fn cmd_registry_recent(site: &str, limit: u32, today: bool) -> Result<()> {
    let config = load_config()?;
    let registry = open_registry(&config).await?;
    let entries = registry.recent(site, limit, today).await?;

    if entries.is_empty() {
        println!("No entries for site '{site}'.");
        return Ok(());
    }

    for entry in entries {
        let active = if entry.is_active { "" } else { " [inactive]" };
        println!(
            "{}  x{}  {}{}",
            entry.last_seen_at, entry.collection_count, entry.identity_key, active
        );
        println!("    {}", entry.origin_url);
    }
    Ok(())
}

async fn cmd_registry_set_status(
    site: &str,
    key: &str,
    active: bool,
    note: Option<&str>,
) -> Result<()> {
    let config = load_config()?;
    let registry = open_registry(&config).await?;

    let updated = registry.set_status(site, key, active, note).await?;
    if !updated {
        return Err(eyre!("no registry entry for site '{site}' with key '{key}'"));
    }
    println!(
        "Entry {key} for {site} is now {}.",
        if active { "active" } else { "inactive" }
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
