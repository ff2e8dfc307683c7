//! Reconciliation auditor: filesystem truth versus store truth.
//!
//! A collector can write item folders to disk and then die before the run
//! registers them, or rows can exist for folders an operator has cleaned
//! up. The auditor walks the lookback window and compares, per site and
//! date, the number of item folders on disk against the artifact rows the
//! store holds for that date. Positive gaps (disk ahead of store) are the
//! actionable kind; the report turns them into a retry list the batch
//! runner can consume directly.

use std::collections::HashMap;
use std::path::Path;

use chrono::{NaiveDate, Utc};
use noticeharvest_orchestrator::{FailedUnitsFile, SourceFilter, enumerate_units};
use noticeharvest_registry::Registry;
use noticeharvest_shared::{HarvestError, Result, WorkUnit};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

/// One site's disk-versus-store comparison for one date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteGap {
    /// `source/date/site` name, as the batch runner expects it.
    pub unit_name: String,
    pub site_code: String,
    /// Item folders on disk holding a content payload.
    pub folder_count: i64,
    /// Artifact rows the store attributes to this site and date.
    pub store_count: i64,
    /// `folder_count - store_count`; positive means the store is behind.
    pub gap: i64,
}

/// All sites audited for one date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayAudit {
    pub date: NaiveDate,
    pub folder_total: i64,
    pub store_total: i64,
    /// Sum of positive per-site gaps only; surpluses do not cancel deficits.
    pub gap_total: i64,
    /// Per-site breakdown, worst gap first.
    pub sites: Vec<SiteGap>,
}

impl DayAudit {
    /// Units whose store count lags disk, in the failed-units file shape
    /// the batch runner's retry mode consumes.
    pub fn remediation(&self) -> FailedUnitsFile {
        FailedUnitsFile {
            date: self.date,
            units: self
                .sites
                .iter()
                .filter(|s| s.gap > 0)
                .map(|s| s.unit_name.clone())
                .collect(),
        }
    }
}

/// Full audit over the lookback window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    /// RFC3339 timestamp of the scan.
    pub generated_at: String,
    pub days: Vec<DayAudit>,
}

impl AuditReport {
    /// Sum of positive gaps across the whole window.
    pub fn total_gap(&self) -> i64 {
        self.days.iter().map(|d| d.gap_total).sum()
    }

    pub fn has_gaps(&self) -> bool {
        self.total_gap() > 0
    }

    /// Write the report as pretty JSON.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| HarvestError::io(parent, e))?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| HarvestError::validation(format!("serialize audit report: {e}")))?;
        std::fs::write(path, json).map_err(|e| HarvestError::io(path, e))
    }
}

// ---------------------------------------------------------------------------
// Scan
// ---------------------------------------------------------------------------

/// Audit the `days_back` dates ending at `end_date`, inclusive.
#[tracing::instrument(skip_all, fields(end_date = %end_date, days_back))]
pub async fn scan(
    data_root: &Path,
    filter: SourceFilter,
    end_date: NaiveDate,
    days_back: u32,
    registry: &Registry,
) -> Result<AuditReport> {
    let mut days = Vec::new();

    for offset in 0..days_back.max(1) {
        let date = end_date - chrono::Duration::days(offset as i64);
        days.push(scan_day(data_root, filter, date, registry).await?);
    }

    let report = AuditReport {
        generated_at: Utc::now().to_rfc3339(),
        days,
    };
    info!(
        days = report.days.len(),
        total_gap = report.total_gap(),
        "reconciliation scan finished"
    );
    Ok(report)
}

async fn scan_day(
    data_root: &Path,
    filter: SourceFilter,
    date: NaiveDate,
    registry: &Registry,
) -> Result<DayAudit> {
    let units = enumerate_units(data_root, filter, date)?;
    // Keyed by (source, site): the same site code under two sources is two
    // independent reconciliation lines, and a source filter must not let
    // another source's rows stand in for the filtered one's.
    let store_counts: HashMap<(String, String), i64> = registry
        .artifact_site_counts(date)
        .await?
        .into_iter()
        .map(|(source, site, count)| ((source, site), count))
        .collect();

    let mut sites = Vec::with_capacity(units.len());
    let mut folder_total = 0;
    let mut store_total = 0;
    let mut gap_total = 0;

    for unit in &units {
        let folder_count = count_item_folders(unit)?;
        let store_count = store_counts
            .get(&(unit.source.dir_name().to_string(), unit.site_code.clone()))
            .copied()
            .unwrap_or(0);
        let gap = folder_count - store_count;

        folder_total += folder_count;
        store_total += store_count;
        if gap > 0 {
            gap_total += gap;
        }
        if folder_count == 0 && store_count == 0 {
            continue;
        }

        debug!(
            unit = %unit.unit_name(),
            folder_count, store_count, gap,
            "site audited"
        );
        sites.push(SiteGap {
            unit_name: unit.unit_name(),
            site_code: unit.site_code.clone(),
            folder_count,
            store_count,
            gap,
        });
    }

    // Store rows for (source, site) pairs with no directory on disk at
    // all, restricted to the sources the filter covers.
    for ((source, site_code), store_count) in &store_counts {
        let in_filter = filter
            .kinds()
            .iter()
            .any(|kind| kind.dir_name() == source);
        if !in_filter {
            continue;
        }
        if units
            .iter()
            .any(|u| u.source.dir_name() == source && &u.site_code == site_code)
        {
            continue;
        }
        store_total += store_count;
        sites.push(SiteGap {
            unit_name: format!("{source}/{}/{site_code}", date.format("%Y-%m-%d")),
            site_code: site_code.clone(),
            folder_count: 0,
            store_count: *store_count,
            gap: -store_count,
        });
    }

    sites.sort_by(|a, b| b.gap.cmp(&a.gap).then(a.site_code.cmp(&b.site_code)));

    Ok(DayAudit {
        date,
        folder_total,
        store_total,
        gap_total,
        sites,
    })
}

/// Count item folders under a unit directory.
///
/// An item folder is a non-hidden subdirectory containing at least one
/// `content.*` file; empty shells left by a crashed collector do not count,
/// matching the store side's non-null-content condition.
pub fn count_item_folders(unit: &WorkUnit) -> Result<i64> {
    let entries = std::fs::read_dir(&unit.dir).map_err(|e| HarvestError::io(&unit.dir, e))?;

    let mut count = 0;
    for entry in entries {
        let entry = entry.map_err(|e| HarvestError::io(&unit.dir, e))?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        if has_content_file(&path)? {
            count += 1;
        }
    }
    Ok(count)
}

fn has_content_file(dir: &Path) -> Result<bool> {
    let entries = std::fs::read_dir(dir).map_err(|e| HarvestError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| HarvestError::io(dir, e))?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("content.") && entry.path().is_file() {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use uuid::Uuid;

    struct Fixture {
        root: PathBuf,
        date: NaiveDate,
    }

    impl Fixture {
        fn new() -> Self {
            let root = std::env::temp_dir().join(format!("nh_audit_{}", Uuid::now_v7()));
            std::fs::create_dir_all(&root).expect("create fixture root");
            Self {
                root,
                date: NaiveDate::from_ymd_opt(2026, 8, 30).unwrap(),
            }
        }

        fn data_root(&self) -> PathBuf {
            self.root.join("data")
        }

        /// Create a site directory with `items` content-bearing folders and
        /// `shells` empty ones.
        fn add_site(&self, site: &str, items: usize, shells: usize) {
            let dir = self
                .data_root()
                .join("portal")
                .join(self.date.format("%Y-%m-%d").to_string())
                .join(site);
            std::fs::create_dir_all(&dir).unwrap();
            for i in 0..items {
                let item = dir.join(format!("item_{i:03}"));
                std::fs::create_dir_all(&item).unwrap();
                std::fs::write(item.join("content.md"), "body").unwrap();
            }
            for i in 0..shells {
                std::fs::create_dir_all(dir.join(format!("shell_{i:03}"))).unwrap();
            }
        }

        async fn registry(&self) -> Registry {
            Registry::open(&self.root.join("registry.db"))
                .await
                .expect("open registry")
        }

        /// Insert `n` artifact rows for a (source, site), dated by folder
        /// prefix.
        async fn seed_store(&self, registry: &Registry, source: &str, site: &str, n: usize) {
            let prefix = self.date.format("%Y%m%d").to_string();
            for i in 0..n {
                registry
                    .upsert_artifact(
                        &format!("{prefix}_{source}_{site}_{:03}", i + 1),
                        site,
                        source,
                        None,
                        None,
                        Some("body"),
                        Some("success"),
                    )
                    .await
                    .expect("seed artifact");
            }
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.root);
        }
    }

    #[tokio::test]
    async fn balanced_site_has_zero_gap() {
        let fx = Fixture::new();
        fx.add_site("a01", 3, 0);
        let registry = fx.registry().await;
        fx.seed_store(&registry, "portal", "a01", 3).await;

        let report = scan(&fx.data_root(), SourceFilter::All, fx.date, 1, &registry)
            .await
            .expect("scan");
        assert!(!report.has_gaps());
        assert_eq!(report.days.len(), 1);
        let day = &report.days[0];
        assert_eq!(day.folder_total, 3);
        assert_eq!(day.store_total, 3);
        assert_eq!(day.sites[0].gap, 0);
    }

    #[tokio::test]
    async fn gaps_sort_worst_first_and_feed_remediation() {
        let fx = Fixture::new();
        fx.add_site("a01", 5, 0); // store has 2 → gap 3
        fx.add_site("b02", 4, 0); // store has 3 → gap 1
        fx.add_site("c03", 2, 0); // balanced
        let registry = fx.registry().await;
        fx.seed_store(&registry, "portal", "a01", 2).await;
        fx.seed_store(&registry, "portal", "b02", 3).await;
        fx.seed_store(&registry, "portal", "c03", 2).await;

        let report = scan(&fx.data_root(), SourceFilter::All, fx.date, 1, &registry)
            .await
            .expect("scan");
        assert_eq!(report.total_gap(), 4);

        let day = &report.days[0];
        let gaps: Vec<(&str, i64)> = day
            .sites
            .iter()
            .map(|s| (s.site_code.as_str(), s.gap))
            .collect();
        assert_eq!(gaps, vec![("a01", 3), ("b02", 1), ("c03", 0)]);

        let retry = day.remediation();
        assert_eq!(retry.date, fx.date);
        assert_eq!(
            retry.units,
            vec!["portal/2026-08-30/a01", "portal/2026-08-30/b02"]
        );
    }

    #[tokio::test]
    async fn empty_shells_do_not_count() {
        let fx = Fixture::new();
        fx.add_site("a01", 2, 3);
        let registry = fx.registry().await;
        fx.seed_store(&registry, "portal", "a01", 2).await;

        let report = scan(&fx.data_root(), SourceFilter::All, fx.date, 1, &registry)
            .await
            .expect("scan");
        assert_eq!(report.days[0].folder_total, 2);
        assert!(!report.has_gaps());
    }

    #[tokio::test]
    async fn store_only_site_shows_negative_gap() {
        let fx = Fixture::new();
        // No directory on disk at all, but the store has rows.
        let registry = fx.registry().await;
        fx.seed_store(&registry, "portal", "ghost", 2).await;

        let report = scan(&fx.data_root(), SourceFilter::All, fx.date, 1, &registry)
            .await
            .expect("scan");
        let day = &report.days[0];
        assert_eq!(day.gap_total, 0); // negative gaps are not actionable
        assert_eq!(day.sites.len(), 1);
        assert_eq!(day.sites[0].gap, -2);
        assert!(day.remediation().units.is_empty());
    }

    #[tokio::test]
    async fn lookback_window_spans_multiple_days() {
        let fx = Fixture::new();
        fx.add_site("a01", 1, 0);
        let registry = fx.registry().await;

        let report = scan(&fx.data_root(), SourceFilter::All, fx.date, 3, &registry)
            .await
            .expect("scan");
        assert_eq!(report.days.len(), 3);
        assert_eq!(report.days[0].date, fx.date);
        assert_eq!(report.days[2].date, fx.date - chrono::Duration::days(2));
        // Only the end date has data; earlier days are empty, not errors.
        assert_eq!(report.days[0].folder_total, 1);
        assert_eq!(report.days[1].folder_total, 0);
    }

    #[tokio::test]
    async fn rows_from_another_source_do_not_cover_a_gap() {
        use noticeharvest_shared::SourceKind;

        let fx = Fixture::new();
        // Three portal item folders on disk, but every store row for the
        // site belongs to a different source.
        fx.add_site("a01", 3, 0);
        let registry = fx.registry().await;
        fx.seed_store(&registry, "scraper", "a01", 3).await;

        let report = scan(
            &fx.data_root(),
            SourceFilter::One(SourceKind::FederatedPortal),
            fx.date,
            1,
            &registry,
        )
        .await
        .expect("scan");

        let day = &report.days[0];
        assert_eq!(day.gap_total, 3);
        assert_eq!(day.sites.len(), 1);
        assert_eq!(day.sites[0].unit_name, "portal/2026-08-30/a01");
        assert_eq!(day.sites[0].store_count, 0);
        assert_eq!(day.remediation().units, vec!["portal/2026-08-30/a01"]);

        // Unfiltered, the scraper rows surface as their own store-only line
        // instead of netting against the portal deficit.
        let report = scan(&fx.data_root(), SourceFilter::All, fx.date, 1, &registry)
            .await
            .expect("scan all");
        let day = &report.days[0];
        assert_eq!(day.gap_total, 3);
        let scraper_line = day
            .sites
            .iter()
            .find(|s| s.unit_name.starts_with("scraper/"))
            .expect("store-only line");
        assert_eq!(scraper_line.gap, -3);
    }

    /// Full loop: a batch run that writes item folders and registers them,
    /// then a scan that confirms disk and store agree.
    #[tokio::test]
    async fn collect_then_audit_has_zero_gap() {
        use noticeharvest_collector::CollectorCommand;
        use noticeharvest_orchestrator::{RunConfig, SilentProgress, run};
        use std::os::unix::fs::PermissionsExt;
        use std::time::Duration;

        let fx = Fixture::new();
        fx.add_site("a01", 0, 0);
        fx.add_site("b02", 0, 0);
        let registry = fx.registry().await;

        // Stub collector: writes two item folders into its --out directory
        // and reports the same two items on stdout.
        let script = fx.root.join("stub.sh");
        std::fs::write(
            &script,
            concat!(
                "#!/bin/sh\n",
                "out=$8\n",
                "for i in 1 2; do\n",
                "  mkdir -p \"$out/item_$i\"\n",
                "  echo body > \"$out/item_$i/content.md\"\n",
                "done\n",
                "echo '---COLLECT-RESULT-BEGIN---'\n",
                "printf '{\"new\": 2, \"duplicate\": 0, \"items\": [",
                "{\"origin_url\": \"https://%s.example.go.kr/view?nttId=1\", \"content\": \"body\"}, ",
                "{\"origin_url\": \"https://%s.example.go.kr/view?nttId=2\", \"content\": \"body\"}",
                "]}\\n' \"$4\" \"$4\"\n",
                "echo '---COLLECT-RESULT-END---'\n",
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let run_config = RunConfig {
            data_root: fx.data_root(),
            date: fx.date,
            source: SourceFilter::All,
            max_workers: 2,
            force: false,
            retry_failed: false,
            dry_run: false,
            results_dir: fx.root.join("results"),
            collector: CollectorCommand {
                program: script.to_string_lossy().into_owned(),
                args: Vec::new(),
            },
            timeout: Duration::from_secs(5),
            grace: Duration::from_millis(300),
            min_free_mb: 0,
        };

        let summary = run(&run_config, &registry, &SilentProgress).await.expect("run");
        assert_eq!(summary.success, 2);
        assert_eq!(summary.new_items, 4);

        let report = scan(&fx.data_root(), SourceFilter::All, fx.date, 1, &registry)
            .await
            .expect("scan");
        assert!(!report.has_gaps());
        let day = &report.days[0];
        assert_eq!(day.folder_total, 4);
        assert_eq!(day.store_total, 4);
    }

    /// A saved remediation file must be directly consumable by the batch
    /// runner's retry mode: only the gapped unit runs.
    #[tokio::test]
    async fn remediation_file_drives_a_retry_run() {
        use noticeharvest_collector::CollectorCommand;
        use noticeharvest_orchestrator::{RunConfig, SilentProgress, run, save_failed_units};
        use std::os::unix::fs::PermissionsExt;
        use std::time::Duration;

        let fx = Fixture::new();
        fx.add_site("a01", 2, 0); // store empty → gap 2
        fx.add_site("b02", 1, 0); // balanced
        let registry = fx.registry().await;
        fx.seed_store(&registry, "portal", "b02", 1).await;

        let report = scan(&fx.data_root(), SourceFilter::All, fx.date, 1, &registry)
            .await
            .expect("scan");
        let remediation = report.days[0].remediation();
        assert_eq!(remediation.units, vec!["portal/2026-08-30/a01"]);

        let results_dir = fx.root.join("results");
        save_failed_units(&results_dir, &remediation).expect("save remediation");

        let script = fx.root.join("stub.sh");
        std::fs::write(
            &script,
            concat!(
                "#!/bin/sh\n",
                "echo '---COLLECT-RESULT-BEGIN---'\n",
                "printf '{\"new\": 2, \"duplicate\": 0, \"items\": [",
                "{\"origin_url\": \"https://%s.example.go.kr/view?nttId=1\", \"content\": \"body\"}, ",
                "{\"origin_url\": \"https://%s.example.go.kr/view?nttId=2\", \"content\": \"body\"}",
                "]}\\n' \"$4\" \"$4\"\n",
                "echo '---COLLECT-RESULT-END---'\n",
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let run_config = RunConfig {
            data_root: fx.data_root(),
            date: fx.date,
            source: SourceFilter::All,
            max_workers: 2,
            force: false,
            retry_failed: true,
            dry_run: false,
            results_dir,
            collector: CollectorCommand {
                program: script.to_string_lossy().into_owned(),
                args: Vec::new(),
            },
            timeout: Duration::from_secs(5),
            grace: Duration::from_millis(300),
            min_free_mb: 0,
        };

        let summary = run(&run_config, &registry, &SilentProgress)
            .await
            .expect("retry run");
        // b02 is untouched: not in the remediation list.
        assert_eq!(summary.reports.len(), 1);
        assert_eq!(summary.reports[0].unit_name, "portal/2026-08-30/a01");
        assert_eq!(summary.success, 1);

        let report = scan(&fx.data_root(), SourceFilter::All, fx.date, 1, &registry)
            .await
            .expect("rescan");
        assert!(!report.has_gaps());
    }

    #[tokio::test]
    async fn report_writes_as_json() {
        let fx = Fixture::new();
        fx.add_site("a01", 1, 0);
        let registry = fx.registry().await;

        let report = scan(&fx.data_root(), SourceFilter::All, fx.date, 1, &registry)
            .await
            .expect("scan");
        let out = fx.root.join("reports/audit.json");
        report.write(&out).expect("write report");

        let parsed: AuditReport =
            serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).expect("parse");
        assert_eq!(parsed.days.len(), 1);
    }
}
