//! The batch run: bounded worker pool plus a single owning fold loop.
//!
//! Workers only invoke the collector and hand back an immutable outcome.
//! Every mutation — registry writes, artifact rows, completion markers,
//! run files — happens in one fold loop that owns the registry handle, so
//! no counter or database write is ever contended between workers.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use noticeharvest_collector::{CollectorCommand, InvokeOutcome, InvokeStatus, Invoker,
    wait_for_headroom};
use noticeharvest_registry::Registry;
use noticeharvest_shared::{Result, UnitReport, UnitState, WorkUnit};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::marker;
use crate::results::{self, FailedUnitsFile};
use crate::units::{SourceFilter, enumerate_units};

/// Upper bound on the memory-gate delay before a unit dispatches anyway.
const HEADROOM_MAX_WAIT: Duration = Duration::from_secs(120);

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Everything one batch run needs to know.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Root of the date-partitioned input tree.
    pub data_root: PathBuf,
    /// Collection date to process.
    pub date: NaiveDate,
    /// Source families to include.
    pub source: SourceFilter,
    /// Maximum concurrent collector processes.
    pub max_workers: usize,
    /// Ignore completion markers and re-run everything.
    pub force: bool,
    /// Only run units named in the previous failed-units file.
    pub retry_failed: bool,
    /// Enumerate and report without invoking anything.
    pub dry_run: bool,
    /// Directory for run results and the failed-units file.
    pub results_dir: PathBuf,
    /// How to launch the external collector.
    pub collector: CollectorCommand,
    /// Hard per-unit timeout.
    pub timeout: Duration,
    /// SIGTERM-to-SIGKILL grace when a timeout fires.
    pub grace: Duration,
    /// Minimum host memory headroom before dispatching a unit; 0 disables.
    pub min_free_mb: u64,
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

/// Aggregate result of one batch run, persisted as `run_{date}.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub date: NaiveDate,
    pub success: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub skipped: u64,
    pub new_items: u64,
    pub duplicate_items: u64,
    pub error_items: u64,
    /// Wall-clock seconds for the whole run.
    pub duration_secs: f64,
    pub reports: Vec<UnitReport>,
}

impl RunSummary {
    fn new(date: NaiveDate) -> Self {
        Self {
            date,
            success: 0,
            failed: 0,
            timed_out: 0,
            skipped: 0,
            new_items: 0,
            duplicate_items: 0,
            error_items: 0,
            duration_secs: 0.0,
            reports: Vec::new(),
        }
    }

    /// Whether any unit ended in a retry-worthy state.
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.timed_out > 0
    }

    /// The exact command an operator should run to retry the failures.
    pub fn retry_command(&self) -> String {
        format!(
            "noticeharvest collect --date {} --retry-failed",
            self.date.format("%Y-%m-%d")
        )
    }

    fn absorb(&mut self, report: UnitReport) {
        match report.state {
            UnitState::Success => self.success += 1,
            UnitState::Failed => self.failed += 1,
            UnitState::TimedOut => self.timed_out += 1,
            UnitState::Skipped => self.skipped += 1,
        }
        self.new_items += report.new_items;
        self.duplicate_items += report.duplicate_items;
        self.error_items += report.error_items;
        self.reports.push(report);
    }
}

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Hook for surfacing per-unit progress; the CLI attaches a spinner here.
pub trait ProgressReporter: Send + Sync {
    fn unit_started(&self, unit_name: &str);
    fn unit_finished(&self, report: &UnitReport);
    fn done(&self, summary: &RunSummary);
}

/// Reporter that says nothing. Used by tests and scripted runs.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn unit_started(&self, _unit_name: &str) {}
    fn unit_finished(&self, _report: &UnitReport) {}
    fn done(&self, _summary: &RunSummary) {}
}

// ---------------------------------------------------------------------------
// The run
// ---------------------------------------------------------------------------

/// Execute one batch run.
///
/// Individual unit failures never abort the run; they surface in the
/// summary and the failed-units file. Only infrastructure problems
/// (unreadable tree, unwritable results directory) return `Err`.
#[tracing::instrument(skip_all, fields(date = %config.date))]
pub async fn run(
    config: &RunConfig,
    registry: &Registry,
    progress: &dyn ProgressReporter,
) -> Result<RunSummary> {
    let started = Instant::now();
    let mut summary = RunSummary::new(config.date);

    let all_units = enumerate_units(&config.data_root, config.source, config.date)?;
    info!(
        date = %config.date,
        units = all_units.len(),
        workers = config.max_workers,
        "starting batch run"
    );

    // --retry-failed narrows the run to the previous run's failure list.
    let retry_filter: Option<Vec<String>> = if config.retry_failed {
        match results::load_failed_units(&config.results_dir, config.date)? {
            Some(file) => Some(file.units),
            None => {
                warn!(date = %config.date, "retry requested but no failed-units file exists");
                Some(Vec::new())
            }
        }
    } else {
        None
    };

    let mut pending = Vec::new();
    for unit in all_units {
        let name = unit.unit_name();

        if let Some(wanted) = &retry_filter {
            if !wanted.contains(&name) {
                continue;
            }
        }

        if !config.force && marker::is_fresh(&unit) {
            let report = skip_report(&unit, "completion marker is fresh");
            progress.unit_finished(&report);
            summary.absorb(report);
            continue;
        }

        pending.push(unit);
    }

    if config.dry_run {
        for unit in pending {
            let report = skip_report(&unit, "dry run");
            progress.unit_finished(&report);
            summary.absorb(report);
        }
        summary.duration_secs = started.elapsed().as_secs_f64();
        progress.done(&summary);
        return Ok(summary);
    }

    // Dispatch: a semaphore bounds concurrency, each worker returns its
    // outcome untouched. The permit is acquired here, before the start
    // callback, so "started" means dispatched into the pool rather than
    // merely queued. Joining in spawn order keeps the fold deterministic.
    let semaphore = Arc::new(Semaphore::new(config.max_workers.max(1)));
    let invoker = Invoker::new(config.timeout, config.grace);
    let mut handles = Vec::with_capacity(pending.len());

    for unit in pending {
        // The semaphore is never closed; hold whatever comes back.
        let permit = Arc::clone(&semaphore).acquire_owned().await.ok();
        progress.unit_started(&unit.unit_name());

        let unit_name = unit.unit_name();
        let site_code = unit.site_code.clone();
        let invoker = invoker.clone();
        let template = config.collector.clone();
        let min_free_mb = config.min_free_mb;
        let task = tokio::spawn(async move {
            let _permit = permit;
            wait_for_headroom(min_free_mb, HEADROOM_MAX_WAIT).await;
            let outcome = invoker.run(&template, &unit).await;
            (unit, outcome)
        });
        handles.push((unit_name, site_code, task));
    }

    // Fold loop: the only writer of registry rows, markers, and counters.
    for (unit_name, site_code, task) in handles {
        let report = match task.await {
            Ok((unit, outcome)) => settle_unit(registry, &unit, outcome).await,
            Err(e) => {
                error!(unit = %unit_name, error = %e, "worker task died before producing an outcome");
                crash_report(unit_name, site_code, &e.to_string())
            }
        };

        progress.unit_finished(&report);
        summary.absorb(report);
    }

    summary.duration_secs = started.elapsed().as_secs_f64();
    persist_run(config, &summary)?;

    info!(
        success = summary.success,
        failed = summary.failed,
        timed_out = summary.timed_out,
        skipped = summary.skipped,
        new_items = summary.new_items,
        duplicate_items = summary.duplicate_items,
        error_items = summary.error_items,
        duration_secs = summary.duration_secs,
        "batch run finished"
    );
    progress.done(&summary);
    Ok(summary)
}

fn skip_report(unit: &WorkUnit, message: &str) -> UnitReport {
    UnitReport {
        unit_name: unit.unit_name(),
        site_code: unit.site_code.clone(),
        state: UnitState::Skipped,
        new_items: 0,
        duplicate_items: 0,
        error_items: 0,
        parsed_via_fallback: false,
        elapsed: Duration::ZERO,
        message: Some(message.to_string()),
    }
}

/// Report for a worker task that died (panic or cancellation) without
/// handing back an outcome. Failed, so the unit lands on the retry list.
fn crash_report(unit_name: String, site_code: String, detail: &str) -> UnitReport {
    UnitReport {
        unit_name,
        site_code,
        state: UnitState::Failed,
        new_items: 0,
        duplicate_items: 0,
        error_items: 0,
        parsed_via_fallback: false,
        elapsed: Duration::ZERO,
        message: Some(format!("worker task failed: {detail}")),
    }
}

/// Turn one invocation outcome into a unit report, performing all the
/// registry and marker writes that outcome implies.
async fn settle_unit(registry: &Registry, unit: &WorkUnit, outcome: InvokeOutcome) -> UnitReport {
    let mut report = UnitReport {
        unit_name: unit.unit_name(),
        site_code: unit.site_code.clone(),
        state: UnitState::Failed,
        new_items: 0,
        duplicate_items: 0,
        error_items: 0,
        parsed_via_fallback: outcome.parsed_via_fallback,
        elapsed: outcome.elapsed,
        message: None,
    };

    match outcome.status {
        InvokeStatus::Failed { exit_code } => {
            warn!(unit = %report.unit_name, exit_code, "collector failed");
            report.message = Some(format!("collector exited with code {exit_code}"));
            return report;
        }
        InvokeStatus::Error { message } => {
            warn!(unit = %report.unit_name, error = %message, "collector could not be supervised");
            report.message = Some(message);
            return report;
        }
        InvokeStatus::TimedOut => {
            report.state = UnitState::TimedOut;
            report.message = Some(format!(
                "timed out after {}s, process group terminated",
                outcome.elapsed.as_secs()
            ));
            return report;
        }
        InvokeStatus::Success => {}
    }

    // Exit zero with nothing to show for it: a quiet site, not a failure.
    // The marker is still written so the unit is not relaunched today.
    let counters_empty = outcome
        .counters
        .as_ref()
        .is_none_or(|c| c.new_items == 0 && c.duplicate_items == 0);
    if outcome.items.is_empty() && counters_empty {
        report.state = UnitState::Skipped;
        report.message = Some("collector reported no items".into());
        if let Err(e) = marker::write(unit) {
            warn!(unit = %report.unit_name, error = %e, "failed to write completion marker");
        }
        return report;
    }

    if outcome.items.is_empty() {
        // Fallback counters only: trust the collector's own numbers, with
        // no per-item registration to back them.
        if let Some(counters) = &outcome.counters {
            report.new_items = counters.new_items;
            report.duplicate_items = counters.duplicate_items;
        }
    } else {
        for (idx, item) in outcome.items.iter().enumerate() {
            match registry.register(&unit.site_code, &item.origin_url, None).await {
                Ok(result) => {
                    if result.is_duplicate {
                        report.duplicate_items += 1;
                    } else {
                        report.new_items += 1;
                    }
                }
                Err(e) => {
                    warn!(
                        unit = %report.unit_name,
                        item = idx,
                        error = %e,
                        "item could not be registered"
                    );
                    report.error_items += 1;
                    continue;
                }
            }

            let folder_name = format!(
                "{}_{}_{:03}",
                unit.date.format("%Y%m%d"),
                unit.site_code,
                idx + 1
            );
            if let Err(e) = registry
                .upsert_artifact(
                    &folder_name,
                    &unit.site_code,
                    unit.source.dir_name(),
                    Some(&item.origin_url),
                    item.title.as_deref(),
                    item.content.as_deref(),
                    Some("success"),
                )
                .await
            {
                warn!(unit = %report.unit_name, error = %e, "artifact row write failed");
            }
        }
    }

    report.state = UnitState::Success;
    if let Err(e) = marker::write(unit) {
        warn!(unit = %report.unit_name, error = %e, "failed to write completion marker");
    }
    report
}

/// Persist `run_{date}.json` and the failed-units file. The failed-units
/// file is written even when empty.
fn persist_run(config: &RunConfig, summary: &RunSummary) -> Result<()> {
    results::write_json(
        &results::run_results_path(&config.results_dir, config.date),
        summary,
    )?;

    let mut failed: Vec<String> = summary
        .reports
        .iter()
        .filter(|r| r.state.needs_retry())
        .map(|r| r.unit_name.clone())
        .collect();
    failed.sort();

    results::save_failed_units(
        &config.results_dir,
        &FailedUnitsFile {
            date: config.date,
            units: failed,
        },
    )
}
