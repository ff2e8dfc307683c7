//! libSQL-backed deduplication registry and artifact store.
//!
//! The [`Registry`] struct wraps a local libSQL database holding two logical
//! tables: the dedup registry (one row per `(site_code, identity_key)`,
//! enforced unique) and the pre-processing artifact table the reconciliation
//! auditor counts against.
//!
//! Concurrent registration correctness rests entirely on the store's
//! uniqueness constraint: [`Registry::register`] is a single conditional
//! upsert, never a read-then-write.

mod migrations;

use std::path::Path;

use chrono::{NaiveDate, Utc};
use libsql::{Connection, Database, params};
use noticeharvest_identity::{decompose, identity_key_with};
use noticeharvest_shared::{HarvestError, Result};

pub use noticeharvest_identity::KeyOptions;

/// Primary registry handle wrapping a libSQL database.
pub struct Registry {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    key_opts: KeyOptions,
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// Outcome of a registration attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterOutcome {
    /// True when the (site, key) pair existed before this call.
    pub is_duplicate: bool,
    /// The derived identity key.
    pub key: String,
    /// Collection count after this observation (1 for a first sighting).
    pub collection_count: i64,
}

/// One durable dedup record.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub site_code: String,
    pub identity_key: String,
    pub origin_url: String,
    pub domain: String,
    pub param_type: String,
    pub param_value: Option<String>,
    pub first_seen_at: String,
    pub last_seen_at: String,
    pub collection_count: i64,
    pub downstream_id: Option<String>,
    pub is_active: bool,
    pub status_note: Option<String>,
}

/// Per-site aggregate statistics.
#[derive(Debug, Clone, Default)]
pub struct SiteStats {
    /// Distinct identity keys registered for the site.
    pub total_keys: i64,
    /// Distinct domains observed for the site.
    pub distinct_domains: i64,
    /// Sum of collection counts (every observation, new or repeat).
    pub total_collections: i64,
    /// Repeat observations only (`total_collections - total_keys`).
    pub duplicate_collections: i64,
    /// Earliest first-seen timestamp.
    pub first_collected_at: Option<String>,
    /// Latest last-seen timestamp.
    pub last_collected_at: Option<String>,
}

impl Registry {
    /// Open or create a registry database at `path`, applying migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| HarvestError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| HarvestError::Storage(e.to_string()))?;

        let registry = Self {
            db,
            conn,
            key_opts: KeyOptions::default(),
        };
        registry.run_migrations().await?;
        Ok(registry)
    }

    /// Override identity-key derivation behavior (from the `[identity]`
    /// config section). Must stay constant for the lifetime of a database,
    /// or previously registered keys stop matching.
    pub fn set_key_options(&mut self, opts: KeyOptions) {
        self.key_opts = opts;
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    HarvestError::Storage(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Register one observation of `origin_url` under `site_code`.
    ///
    /// First sighting inserts a row with `collection_count = 1`; every later
    /// sighting bumps the count and refreshes `last_seen_at`, leaving
    /// `first_seen_at` intact. A supplied `downstream_id` only fills a
    /// previously NULL slot. The whole operation is one statement, so two
    /// workers racing on the same key can never create two rows, and the
    /// returned count reflects the true prior state.
    ///
    /// An empty URL is refused with a `Validation` error and no write.
    pub async fn register(
        &self,
        site_code: &str,
        origin_url: &str,
        downstream_id: Option<&str>,
    ) -> Result<RegisterOutcome> {
        let key = identity_key_with(origin_url, &self.key_opts).ok_or_else(|| {
            HarvestError::validation(format!("empty origin URL for site {site_code}"))
        })?;

        let parts = decompose(&key);
        let now = Utc::now().to_rfc3339();

        let mut rows = self
            .conn
            .query(
                "INSERT INTO dedup_registry
                   (site_code, identity_key, origin_url, domain, param_type, param_value,
                    first_seen_at, last_seen_at, collection_count, downstream_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, 1, ?8)
                 ON CONFLICT(site_code, identity_key) DO UPDATE SET
                   last_seen_at = excluded.last_seen_at,
                   collection_count = dedup_registry.collection_count + 1,
                   downstream_id = COALESCE(dedup_registry.downstream_id, excluded.downstream_id)
                 RETURNING collection_count",
                params![
                    site_code,
                    key.as_str(),
                    origin_url,
                    parts.domain.as_str(),
                    parts.param_type.as_str(),
                    parts.param_value.as_str(),
                    now.as_str(),
                    downstream_id,
                ],
            )
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;

        let collection_count: i64 = match rows.next().await {
            Ok(Some(row)) => row
                .get(0)
                .map_err(|e| HarvestError::Storage(e.to_string()))?,
            Ok(None) => {
                return Err(HarvestError::Storage(
                    "upsert returned no row".into(),
                ));
            }
            Err(e) => return Err(HarvestError::Storage(e.to_string())),
        };

        Ok(RegisterOutcome {
            is_duplicate: collection_count > 1,
            key,
            collection_count,
        })
    }

    /// Check whether a (site, key) pair exists, without mutating anything.
    pub async fn exists(&self, site_code: &str, key: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM dedup_registry WHERE site_code = ?1 AND identity_key = ?2",
                params![site_code, key],
            )
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(opt) => Ok(opt.is_some()),
            Err(e) => Err(HarvestError::Storage(e.to_string())),
        }
    }

    /// Aggregate statistics for one site.
    pub async fn site_stats(&self, site_code: &str) -> Result<SiteStats> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*),
                        COUNT(DISTINCT domain),
                        COALESCE(SUM(collection_count), 0),
                        MIN(first_seen_at),
                        MAX(last_seen_at)
                 FROM dedup_registry WHERE site_code = ?1",
                params![site_code],
            )
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let total_keys: i64 = row
                    .get(0)
                    .map_err(|e| HarvestError::Storage(e.to_string()))?;
                let distinct_domains: i64 = row
                    .get(1)
                    .map_err(|e| HarvestError::Storage(e.to_string()))?;
                let total_collections: i64 = row
                    .get(2)
                    .map_err(|e| HarvestError::Storage(e.to_string()))?;
                Ok(SiteStats {
                    total_keys,
                    distinct_domains,
                    total_collections,
                    duplicate_collections: total_collections - total_keys,
                    first_collected_at: row.get::<String>(3).ok(),
                    last_collected_at: row.get::<String>(4).ok(),
                })
            }
            Ok(None) => Ok(SiteStats::default()),
            Err(e) => Err(HarvestError::Storage(e.to_string())),
        }
    }

    /// Most recent entries for a site, newest last-seen first.
    /// With `today_only`, restricted to keys first seen today.
    pub async fn recent(
        &self,
        site_code: &str,
        limit: u32,
        today_only: bool,
    ) -> Result<Vec<RegistryEntry>> {
        let sql = if today_only {
            "SELECT site_code, identity_key, origin_url, domain, param_type, param_value,
                    first_seen_at, last_seen_at, collection_count, downstream_id,
                    is_active, status_note
             FROM dedup_registry
             WHERE site_code = ?1 AND date(first_seen_at) = date('now')
             ORDER BY last_seen_at DESC LIMIT ?2"
        } else {
            "SELECT site_code, identity_key, origin_url, domain, param_type, param_value,
                    first_seen_at, last_seen_at, collection_count, downstream_id,
                    is_active, status_note
             FROM dedup_registry
             WHERE site_code = ?1
             ORDER BY last_seen_at DESC LIMIT ?2"
        };

        let mut rows = self
            .conn
            .query(sql, params![site_code, limit])
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_entry(&row)?);
        }
        Ok(results)
    }

    /// Administrative status update for one (site, key) pair.
    /// Entries are deactivated here, never hard-deleted.
    pub async fn set_status(
        &self,
        site_code: &str,
        key: &str,
        active: bool,
        note: Option<&str>,
    ) -> Result<bool> {
        let affected = self
            .conn
            .execute(
                "UPDATE dedup_registry
                 SET is_active = ?3, status_note = ?4
                 WHERE site_code = ?1 AND identity_key = ?2",
                params![site_code, key, active as i64, note],
            )
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;
        Ok(affected > 0)
    }

    // -----------------------------------------------------------------------
    // Artifact operations
    // -----------------------------------------------------------------------

    /// Insert or refresh one artifact row keyed by folder name.
    #[allow(clippy::too_many_arguments)]
    pub async fn upsert_artifact(
        &self,
        folder_name: &str,
        site_code: &str,
        source: &str,
        origin_url: Option<&str>,
        title: Option<&str>,
        content: Option<&str>,
        status: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO artifacts
                   (folder_name, site_code, source, origin_url, title, content, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(folder_name) DO UPDATE SET
                   origin_url = excluded.origin_url,
                   title = excluded.title,
                   content = COALESCE(excluded.content, artifacts.content),
                   status = COALESCE(excluded.status, artifacts.status)",
                params![folder_name, site_code, source, origin_url, title, content, status, now.as_str()],
            )
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Count artifact rows per (source, site) for one collection date.
    ///
    /// The source dimension matters: the same site code can legitimately
    /// appear under two sources, and the auditor compares each source's
    /// disk tree against that source's rows only. A row counts when its
    /// content payload is non-null AND it matches the date either by
    /// creation timestamp or by the `YYYYMMDD_` folder prefix —
    /// re-registration shifts `created_at` away from the date the artifact
    /// was actually collected, so neither condition alone is enough.
    pub async fn artifact_site_counts(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<(String, String, i64)>> {
        let iso = date.format("%Y-%m-%d").to_string();
        let prefix = format!("{}\\_%", date.format("%Y%m%d"));

        let mut rows = self
            .conn
            .query(
                "SELECT source, site_code, COUNT(*)
                 FROM artifacts
                 WHERE content IS NOT NULL
                   AND (date(created_at) = ?1 OR folder_name LIKE ?2 ESCAPE '\\')
                 GROUP BY source, site_code",
                params![iso.as_str(), prefix.as_str()],
            )
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let source: String = row
                .get(0)
                .map_err(|e| HarvestError::Storage(e.to_string()))?;
            let site: String = row
                .get(1)
                .map_err(|e| HarvestError::Storage(e.to_string()))?;
            let count: i64 = row
                .get(2)
                .map_err(|e| HarvestError::Storage(e.to_string()))?;
            results.push((source, site, count));
        }
        Ok(results)
    }
}

/// Convert a database row to a [`RegistryEntry`].
fn row_to_entry(row: &libsql::Row) -> Result<RegistryEntry> {
    Ok(RegistryEntry {
        site_code: row
            .get::<String>(0)
            .map_err(|e| HarvestError::Storage(e.to_string()))?,
        identity_key: row
            .get::<String>(1)
            .map_err(|e| HarvestError::Storage(e.to_string()))?,
        origin_url: row
            .get::<String>(2)
            .map_err(|e| HarvestError::Storage(e.to_string()))?,
        domain: row
            .get::<String>(3)
            .map_err(|e| HarvestError::Storage(e.to_string()))?,
        param_type: row
            .get::<String>(4)
            .map_err(|e| HarvestError::Storage(e.to_string()))?,
        param_value: row.get::<String>(5).ok(),
        first_seen_at: row
            .get::<String>(6)
            .map_err(|e| HarvestError::Storage(e.to_string()))?,
        last_seen_at: row
            .get::<String>(7)
            .map_err(|e| HarvestError::Storage(e.to_string()))?,
        collection_count: row
            .get::<i64>(8)
            .map_err(|e| HarvestError::Storage(e.to_string()))?,
        downstream_id: row.get::<String>(9).ok(),
        is_active: row.get::<i64>(10).unwrap_or(1) != 0,
        status_note: row.get::<String>(11).ok(),
    })
}
