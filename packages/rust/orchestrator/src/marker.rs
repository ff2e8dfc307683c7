//! Completion markers.
//!
//! A `.collect.done` file in a unit's directory records that the unit
//! finished during some run. A marker only skips the unit while it is
//! fresh — written on the current local calendar date — so yesterday's
//! marker never suppresses today's collection of the same site directory.
//! Fine-grained idempotence is the registry's job; the marker just avoids
//! relaunching collector processes that already ran today.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use noticeharvest_shared::{HarvestError, Result, WorkUnit};
use tracing::debug;

/// Marker file name inside a unit directory.
pub const MARKER_FILE: &str = ".collect.done";

/// Path of the completion marker for a unit directory.
pub fn marker_path(unit_dir: &Path) -> PathBuf {
    unit_dir.join(MARKER_FILE)
}

/// Whether the unit carries a marker written on today's local date.
///
/// An unreadable or unparseable marker counts as stale: the unit runs
/// again and the marker is rewritten on success.
pub fn is_fresh(unit: &WorkUnit) -> bool {
    let path = marker_path(&unit.dir);
    let Ok(content) = std::fs::read_to_string(&path) else {
        return false;
    };
    let Ok(written) = DateTime::parse_from_rfc3339(content.trim()) else {
        debug!(path = %path.display(), "marker content unparseable, treating as stale");
        return false;
    };
    written.with_timezone(&Local).date_naive() == Local::now().date_naive()
}

/// Write (or refresh) the marker with the current timestamp.
pub fn write(unit: &WorkUnit) -> Result<()> {
    let path = marker_path(&unit.dir);
    std::fs::write(&path, Local::now().to_rfc3339()).map_err(|e| HarvestError::io(&path, e))
}

/// Remove the marker if present. Used by forced re-runs.
pub fn clear(unit: &WorkUnit) -> Result<()> {
    let path = marker_path(&unit.dir);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(HarvestError::io(&path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use noticeharvest_shared::SourceKind;
    use uuid::Uuid;

    fn temp_unit() -> WorkUnit {
        let dir = std::env::temp_dir().join(format!("nh_marker_{}", Uuid::now_v7()));
        std::fs::create_dir_all(&dir).expect("create unit dir");
        WorkUnit {
            source: SourceKind::FederatedPortal,
            date: NaiveDate::from_ymd_opt(2026, 8, 30).unwrap(),
            site_code: "a01".into(),
            dir,
        }
    }

    #[test]
    fn fresh_after_write_stale_after_clear() {
        let unit = temp_unit();
        assert!(!is_fresh(&unit));

        write(&unit).expect("write marker");
        assert!(is_fresh(&unit));

        clear(&unit).expect("clear marker");
        assert!(!is_fresh(&unit));
        // Clearing an absent marker is not an error.
        clear(&unit).expect("clear again");

        let _ = std::fs::remove_dir_all(&unit.dir);
    }

    #[test]
    fn yesterdays_marker_is_stale() {
        let unit = temp_unit();
        let yesterday = Local::now() - Duration::days(1);
        std::fs::write(marker_path(&unit.dir), yesterday.to_rfc3339()).unwrap();
        assert!(!is_fresh(&unit));
        let _ = std::fs::remove_dir_all(&unit.dir);
    }

    #[test]
    fn garbage_marker_is_stale() {
        let unit = temp_unit();
        std::fs::write(marker_path(&unit.dir), "done").unwrap();
        assert!(!is_fresh(&unit));
        let _ = std::fs::remove_dir_all(&unit.dir);
    }
}
