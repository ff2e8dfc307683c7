//! SQL migration definitions for the registry database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed as a batch.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: dedup_registry, artifacts",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Deduplication registry: one row per (site, identity key), never two.
-- The UNIQUE constraint is the sole correctness mechanism for concurrent
-- registration; all writes go through a single conditional upsert.
CREATE TABLE IF NOT EXISTS dedup_registry (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    site_code        TEXT NOT NULL,
    identity_key     TEXT NOT NULL,
    origin_url       TEXT NOT NULL,
    domain           TEXT NOT NULL,
    param_type       TEXT NOT NULL,
    param_value      TEXT,
    first_seen_at    TEXT NOT NULL,
    last_seen_at     TEXT NOT NULL,
    collection_count INTEGER NOT NULL DEFAULT 1,
    downstream_id    TEXT,
    is_active        INTEGER NOT NULL DEFAULT 1,
    status_note      TEXT,
    UNIQUE(site_code, identity_key)
);

CREATE INDEX IF NOT EXISTS idx_registry_site      ON dedup_registry(site_code);
CREATE INDEX IF NOT EXISTS idx_registry_domain    ON dedup_registry(domain);
CREATE INDEX IF NOT EXISTS idx_registry_first_seen ON dedup_registry(first_seen_at);

-- Pre-processing artifact rows, one per collected item folder.
-- `content` stays NULL until the item body lands; the auditor counts only
-- rows with non-null content.
CREATE TABLE IF NOT EXISTS artifacts (
    folder_name TEXT PRIMARY KEY,
    site_code   TEXT NOT NULL,
    source      TEXT NOT NULL,
    origin_url  TEXT,
    title       TEXT,
    content     TEXT,
    status      TEXT CHECK (status IN ('success', 'excluded') OR status IS NULL),
    created_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_artifacts_site    ON artifacts(site_code);
CREATE INDEX IF NOT EXISTS idx_artifacts_created ON artifacts(created_at);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
