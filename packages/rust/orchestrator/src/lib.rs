//! Batch orchestration of per-site collection work units.
//!
//! One run enumerates the work units for a date, pushes them through a
//! bounded pool of collector invocations, registers every emitted item
//! against the dedup registry, and persists run artifacts (results file,
//! failed-units file) that the retry path and the reconciliation auditor
//! consume.
//!
//! Re-running the same date is safe: completion markers skip finished
//! units coarsely, and the registry deduplicates per item finely. The two
//! mechanisms are deliberate defense in depth.

pub mod marker;
pub mod results;
pub mod run;
pub mod units;

pub use results::{
    FailedUnitsFile, failed_units_path, load_failed_units, run_results_path, save_failed_units,
};
pub use run::{ProgressReporter, RunConfig, RunSummary, SilentProgress, run};
pub use units::{SourceFilter, enumerate_units};
