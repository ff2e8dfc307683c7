//! Run artifacts on disk: per-run results and the failed-units file.
//!
//! Both are plain JSON under the results directory, named by collection
//! date. The failed-units file is the contract between a run and its
//! `--retry-failed` follow-up; it is written on every run, even when
//! empty, so a successful retry visibly clears the previous list.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use noticeharvest_shared::{HarvestError, Result};
use serde::{Deserialize, Serialize};

/// Units that ended a run in a retry-worthy state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedUnitsFile {
    /// Collection date the run covered.
    pub date: NaiveDate,
    /// `source/date/site` unit names, sorted.
    pub units: Vec<String>,
}

/// `run_{date}.json` under the results directory.
pub fn run_results_path(results_dir: &Path, date: NaiveDate) -> PathBuf {
    results_dir.join(format!("run_{}.json", date.format("%Y-%m-%d")))
}

/// `failed_units_{date}.json` under the results directory.
pub fn failed_units_path(results_dir: &Path, date: NaiveDate) -> PathBuf {
    results_dir.join(format!("failed_units_{}.json", date.format("%Y-%m-%d")))
}

/// Load the failed-units file for a date, or `None` when no run has
/// produced one yet.
pub fn load_failed_units(results_dir: &Path, date: NaiveDate) -> Result<Option<FailedUnitsFile>> {
    let path = failed_units_path(results_dir, date);
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(HarvestError::io(&path, e)),
    };
    let file: FailedUnitsFile = serde_json::from_str(&content)
        .map_err(|e| HarvestError::validation(format!("malformed {}: {e}", path.display())))?;
    Ok(Some(file))
}

/// Write the failed-units file, replacing any previous one.
pub fn save_failed_units(results_dir: &Path, file: &FailedUnitsFile) -> Result<()> {
    write_json(&failed_units_path(results_dir, file.date), file)
}

/// Serialize `value` as pretty JSON at `path`, creating parent directories.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| HarvestError::io(parent, e))?;
    }
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| HarvestError::validation(format!("serialize {}: {e}", path.display())))?;
    std::fs::write(path, json).map_err(|e| HarvestError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("nh_results_{}", Uuid::now_v7()))
    }

    #[test]
    fn failed_units_roundtrip() {
        let dir = temp_dir();
        let date = NaiveDate::from_ymd_opt(2026, 8, 30).unwrap();

        assert!(load_failed_units(&dir, date).expect("absent").is_none());

        let file = FailedUnitsFile {
            date,
            units: vec![
                "portal/2026-08-30/a01".into(),
                "regional/2026-08-30/gyeonggi".into(),
            ],
        };
        save_failed_units(&dir, &file).expect("save");

        let loaded = load_failed_units(&dir, date).expect("load").expect("present");
        assert_eq!(loaded.units, file.units);

        // An empty list persists as a real file, distinct from "never ran".
        let empty = FailedUnitsFile { date, units: Vec::new() };
        save_failed_units(&dir, &empty).expect("save empty");
        let loaded = load_failed_units(&dir, date).expect("load").expect("present");
        assert!(loaded.units.is_empty());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn malformed_file_is_a_validation_error() {
        let dir = temp_dir();
        let date = NaiveDate::from_ymd_opt(2026, 8, 30).unwrap();
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(failed_units_path(&dir, date), "{not json").unwrap();

        assert!(load_failed_units(&dir, date).is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn paths_are_date_stamped() {
        let date = NaiveDate::from_ymd_opt(2026, 8, 30).unwrap();
        let dir = PathBuf::from("/tmp/results");
        assert_eq!(
            run_results_path(&dir, date),
            PathBuf::from("/tmp/results/run_2026-08-30.json")
        );
        assert_eq!(
            failed_units_path(&dir, date),
            PathBuf::from("/tmp/results/failed_units_2026-08-30.json")
        );
    }
}
