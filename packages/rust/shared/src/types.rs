//! Core domain types for the collection pipeline.

use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

// ---------------------------------------------------------------------------
// SourceKind
// ---------------------------------------------------------------------------

/// The family of sites a work unit belongs to. Each kind has its own
/// subtree under the data root and its own external collector behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// Announcements syndicated through the national federated portal.
    FederatedPortal,
    /// Regional government homepages with their own notice boards.
    RegionalHomepage,
    /// Municipal notice systems (city / county / district level).
    MunicipalNotice,
    /// Everything else handled by bespoke scrapers.
    OtherScraper,
}

impl SourceKind {
    /// All kinds, in the order they are processed.
    pub const ALL: [SourceKind; 4] = [
        SourceKind::FederatedPortal,
        SourceKind::RegionalHomepage,
        SourceKind::MunicipalNotice,
        SourceKind::OtherScraper,
    ];

    /// Directory name under the data root for this source kind.
    pub fn dir_name(&self) -> &'static str {
        match self {
            SourceKind::FederatedPortal => "portal",
            SourceKind::RegionalHomepage => "regional",
            SourceKind::MunicipalNotice => "municipal",
            SourceKind::OtherScraper => "scraper",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl std::str::FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "portal" => Ok(SourceKind::FederatedPortal),
            "regional" => Ok(SourceKind::RegionalHomepage),
            "municipal" => Ok(SourceKind::MunicipalNotice),
            "scraper" => Ok(SourceKind::OtherScraper),
            other => Err(format!(
                "unknown source '{other}': expected portal, regional, municipal, or scraper"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Site code normalization
// ---------------------------------------------------------------------------

/// Normalize a site code to NFC and trim surrounding whitespace.
///
/// Site codes come from directory names created by many different systems;
/// macOS-originated trees in particular arrive in NFD, which would make the
/// same site look like two distinct registry partitions.
pub fn normalize_site_code(raw: &str) -> String {
    raw.trim().nfc().collect()
}

// ---------------------------------------------------------------------------
// WorkUnit
// ---------------------------------------------------------------------------

/// One (source, date, site) slice of collection work.
///
/// Materialized by enumerating subdirectories of the date-partitioned tree;
/// never persisted beyond a run except via its completion marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    /// Which source family this unit belongs to.
    pub source: SourceKind,
    /// Calendar date being collected.
    pub date: NaiveDate,
    /// Site code, NFC-normalized.
    pub site_code: String,
    /// Filesystem root for this unit's candidate artifacts.
    pub dir: PathBuf,
}

impl WorkUnit {
    /// Stable name used in markers, failed-units files, and logs.
    pub fn unit_name(&self) -> String {
        format!("{}/{}/{}", self.source, self.date.format("%Y-%m-%d"), self.site_code)
    }
}

// ---------------------------------------------------------------------------
// CandidateItem
// ---------------------------------------------------------------------------

/// One announcement discovered by a collector run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandidateItem {
    /// Origin URL of the announcement. Required; an item without one is
    /// unprocessable and counted as an error at registration time.
    #[serde(default)]
    pub origin_url: String,
    /// Announcement title as the collector extracted it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Posting date, free-text — collectors see many locale formats.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posted: Option<String>,
    /// Downloaded detail-page body, when the collector captured one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Attachment references (URLs or relative file names).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
}

// ---------------------------------------------------------------------------
// Unit outcomes
// ---------------------------------------------------------------------------

/// Terminal state of one work unit within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    /// Marker was fresh, unit was filtered out, or the collector found nothing.
    Skipped,
    /// Collector exited zero and its items were registered.
    Success,
    /// Collector exited non-zero or could not be launched.
    Failed,
    /// Collector exceeded the timeout and its process group was terminated.
    TimedOut,
}

impl UnitState {
    /// Whether this state should land the unit on the retry list.
    pub fn needs_retry(&self) -> bool {
        matches!(self, UnitState::Failed | UnitState::TimedOut)
    }
}

/// Immutable per-unit result record returned by a worker.
///
/// Workers never touch shared counters; a single owning loop folds these
/// into the run summary, so the records must carry everything it needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitReport {
    /// `source/date/site` name of the unit.
    pub unit_name: String,
    /// Site code of the unit.
    pub site_code: String,
    /// Terminal state.
    pub state: UnitState,
    /// Items registered as new.
    pub new_items: u64,
    /// Items recognized as already-known duplicates.
    pub duplicate_items: u64,
    /// Items that could not be registered (empty URL, registry write failure).
    pub error_items: u64,
    /// True when counters came from the lossy text-pattern fallback rather
    /// than the structured output block.
    pub parsed_via_fallback: bool,
    /// Wall-clock time spent on the unit.
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
    /// Human-readable detail (exit status, timeout note, launch error).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Serialize `Duration` as fractional seconds in run artifacts.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_kind_roundtrip() {
        for kind in SourceKind::ALL {
            let parsed: SourceKind = kind.dir_name().parse().expect("parse source kind");
            assert_eq!(parsed, kind);
        }
        assert!("federated".parse::<SourceKind>().is_err());
    }

    #[test]
    fn site_code_nfc_normalization() {
        // "서울" in NFD (decomposed jamo) must match the NFC form.
        let decomposed = "\u{1109}\u{1165}\u{110B}\u{116E}\u{11AF}";
        let composed = "서울";
        assert_ne!(decomposed, composed);
        assert_eq!(normalize_site_code(decomposed), composed);
        assert_eq!(normalize_site_code("  a01  "), "a01");
    }

    #[test]
    fn unit_name_format() {
        let unit = WorkUnit {
            source: SourceKind::RegionalHomepage,
            date: NaiveDate::from_ymd_opt(2026, 8, 30).unwrap(),
            site_code: "gyeonggi".into(),
            dir: PathBuf::from("/data/regional/2026-08-30/gyeonggi"),
        };
        assert_eq!(unit.unit_name(), "regional/2026-08-30/gyeonggi");
    }

    #[test]
    fn unit_report_serialization() {
        let report = UnitReport {
            unit_name: "portal/2026-08-30/a01".into(),
            site_code: "a01".into(),
            state: UnitState::TimedOut,
            new_items: 0,
            duplicate_items: 0,
            error_items: 0,
            parsed_via_fallback: false,
            elapsed: Duration::from_millis(1500),
            message: Some("timed out after 600s".into()),
        };
        let json = serde_json::to_string(&report).expect("serialize");
        assert!(json.contains("\"timed_out\""));
        let parsed: UnitReport = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.state, UnitState::TimedOut);
        assert!(parsed.state.needs_retry());
    }
}
