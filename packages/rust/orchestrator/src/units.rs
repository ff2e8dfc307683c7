//! Work-unit enumeration from the date-partitioned input tree.
//!
//! Layout contract: `{data_root}/{source}/{date}/{site_code}/...` where the
//! date directory is either `YYYY-MM-DD` or `YYYYMMDD` — both forms exist
//! in the field, so both are accepted.

use std::path::Path;

use chrono::NaiveDate;
use noticeharvest_shared::{HarvestError, Result, SourceKind, WorkUnit, normalize_site_code};
use tracing::debug;

/// Which source families a run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFilter {
    All,
    One(SourceKind),
}

impl SourceFilter {
    /// Source kinds selected by this filter, in processing order.
    pub fn kinds(&self) -> Vec<SourceKind> {
        match self {
            SourceFilter::All => SourceKind::ALL.to_vec(),
            SourceFilter::One(kind) => vec![*kind],
        }
    }
}

impl std::str::FromStr for SourceFilter {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("all") {
            return Ok(SourceFilter::All);
        }
        s.parse::<SourceKind>().map(SourceFilter::One)
    }
}

/// Enumerate work units for `date` under `data_root`.
///
/// Site codes are NFC-normalized; hidden directories are ignored. Units
/// come back sorted by name so runs are deterministic. A missing date
/// directory simply yields no units for that source.
pub fn enumerate_units(
    data_root: &Path,
    filter: SourceFilter,
    date: NaiveDate,
) -> Result<Vec<WorkUnit>> {
    let date_names = [
        date.format("%Y-%m-%d").to_string(),
        date.format("%Y%m%d").to_string(),
    ];

    let mut units = Vec::new();
    for source in filter.kinds() {
        for name in &date_names {
            let date_dir = data_root.join(source.dir_name()).join(name);
            if !date_dir.is_dir() {
                continue;
            }

            let entries =
                std::fs::read_dir(&date_dir).map_err(|e| HarvestError::io(&date_dir, e))?;
            for entry in entries {
                let entry = entry.map_err(|e| HarvestError::io(&date_dir, e))?;
                let path = entry.path();
                if !path.is_dir() {
                    continue;
                }
                let raw_name = entry.file_name();
                let raw_name = raw_name.to_string_lossy();
                if raw_name.starts_with('.') {
                    continue;
                }

                units.push(WorkUnit {
                    source,
                    date,
                    site_code: normalize_site_code(&raw_name),
                    dir: path,
                });
            }
        }
    }

    units.sort_by_key(WorkUnit::unit_name);
    units.dedup_by_key(|u| u.unit_name());

    debug!(count = units.len(), date = %date, "enumerated work units");
    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_root() -> std::path::PathBuf {
        let root = std::env::temp_dir().join(format!("nh_units_{}", Uuid::now_v7()));
        std::fs::create_dir_all(&root).expect("create temp root");
        root
    }

    #[test]
    fn enumerates_both_date_forms() {
        let root = temp_root();
        let date = NaiveDate::from_ymd_opt(2026, 8, 30).unwrap();

        std::fs::create_dir_all(root.join("portal/2026-08-30/a01")).unwrap();
        std::fs::create_dir_all(root.join("portal/20260830/b02")).unwrap();
        std::fs::create_dir_all(root.join("regional/2026-08-30/gyeonggi")).unwrap();
        // Noise: hidden dir, plain file, wrong date.
        std::fs::create_dir_all(root.join("portal/2026-08-30/.tmp")).unwrap();
        std::fs::write(root.join("portal/2026-08-30/readme.txt"), "x").unwrap();
        std::fs::create_dir_all(root.join("portal/2026-08-29/old")).unwrap();

        let units = enumerate_units(&root, SourceFilter::All, date).expect("enumerate");
        let names: Vec<String> = units.iter().map(WorkUnit::unit_name).collect();
        assert_eq!(
            names,
            vec![
                "portal/2026-08-30/a01",
                "portal/2026-08-30/b02",
                "regional/2026-08-30/gyeonggi",
            ]
        );

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn source_filter_restricts() {
        let root = temp_root();
        let date = NaiveDate::from_ymd_opt(2026, 8, 30).unwrap();
        std::fs::create_dir_all(root.join("portal/2026-08-30/a01")).unwrap();
        std::fs::create_dir_all(root.join("municipal/2026-08-30/seongnam")).unwrap();

        let units = enumerate_units(
            &root,
            SourceFilter::One(SourceKind::MunicipalNotice),
            date,
        )
        .expect("enumerate");
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].site_code, "seongnam");

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn site_codes_are_nfc_normalized() {
        let root = temp_root();
        let date = NaiveDate::from_ymd_opt(2026, 8, 30).unwrap();
        // Decomposed Hangul directory name, as macOS-created trees produce.
        let decomposed = "\u{1109}\u{1165}\u{110B}\u{116E}\u{11AF}";
        std::fs::create_dir_all(root.join("regional/2026-08-30").join(decomposed)).unwrap();

        let units = enumerate_units(&root, SourceFilter::All, date).expect("enumerate");
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].site_code, "서울");

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn missing_tree_is_empty_not_error() {
        let root = temp_root();
        let date = NaiveDate::from_ymd_opt(2026, 8, 30).unwrap();
        let units = enumerate_units(&root, SourceFilter::All, date).expect("enumerate");
        assert!(units.is_empty());
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn filter_parses() {
        assert_eq!("all".parse::<SourceFilter>().unwrap(), SourceFilter::All);
        assert_eq!(
            "portal".parse::<SourceFilter>().unwrap(),
            SourceFilter::One(SourceKind::FederatedPortal)
        );
        assert!("bogus".parse::<SourceFilter>().is_err());
    }
}
