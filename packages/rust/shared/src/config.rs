//! Application configuration for noticeharvest.
//!
//! User config lives at `~/.noticeharvest/noticeharvest.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HarvestError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "noticeharvest.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".noticeharvest";

// ---------------------------------------------------------------------------
// Config structs (matching noticeharvest.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Collector subprocess settings.
    #[serde(default)]
    pub collector: CollectorDefaults,

    /// Identity-key derivation settings.
    #[serde(default)]
    pub identity: IdentityDefaults,

    /// Reconciliation audit settings.
    #[serde(default)]
    pub audit: AuditDefaults,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Root of the date-partitioned input tree.
    #[serde(default = "default_data_root")]
    pub data_root: String,

    /// Path to the registry database.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Directory for run results and failed-units files.
    #[serde(default = "default_results_dir")]
    pub results_dir: String,

    /// Default concurrent work units.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            db_path: default_db_path(),
            results_dir: default_results_dir(),
            workers: default_workers(),
        }
    }
}

fn default_data_root() -> String {
    "~/noticeharvest-data".into()
}
fn default_db_path() -> String {
    "~/noticeharvest-data/registry.db".into()
}
fn default_results_dir() -> String {
    "~/noticeharvest-data/runs".into()
}
fn default_workers() -> usize {
    3
}

/// `[collector]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorDefaults {
    /// Program invoked once per work unit.
    #[serde(default = "default_collector_program")]
    pub program: String,

    /// Extra arguments prepended before the per-unit arguments.
    #[serde(default)]
    pub args: Vec<String>,

    /// Hard per-unit timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Grace period between group SIGTERM and SIGKILL.
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,

    /// Minimum free host memory (MB) before a unit is dispatched.
    /// Zero disables the check.
    #[serde(default = "default_min_free_mb")]
    pub min_free_mb: u64,
}

impl Default for CollectorDefaults {
    fn default() -> Self {
        Self {
            program: default_collector_program(),
            args: Vec::new(),
            timeout_secs: default_timeout_secs(),
            grace_secs: default_grace_secs(),
            min_free_mb: default_min_free_mb(),
        }
    }
}

fn default_collector_program() -> String {
    "notice-collector".into()
}
fn default_timeout_secs() -> u64 {
    600
}
fn default_grace_secs() -> u64 {
    5
}
fn default_min_free_mb() -> u64 {
    512
}

/// `[identity]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityDefaults {
    /// Sort query parameters before keying raw query strings.
    ///
    /// Off by default: two URLs differing only in parameter order keep
    /// distinct keys, which over-collects rather than over-merges.
    #[serde(default)]
    pub sort_query: bool,
}

#[allow(clippy::derivable_impls)]
impl Default for IdentityDefaults {
    fn default() -> Self {
        Self { sort_query: false }
    }
}

/// `[audit]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditDefaults {
    /// How many days back the reconciliation scan looks.
    #[serde(default = "default_days_back")]
    pub days_back: u32,
}

impl Default for AuditDefaults {
    fn default() -> Self {
        Self {
            days_back: default_days_back(),
        }
    }
}

fn default_days_back() -> u32 {
    7
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.noticeharvest/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| HarvestError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.noticeharvest/noticeharvest.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| HarvestError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| HarvestError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| HarvestError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| HarvestError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| HarvestError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("data_root"));
        assert!(toml_str.contains("notice-collector"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.defaults.workers, 3);
        assert_eq!(parsed.collector.timeout_secs, 600);
        assert!(!parsed.identity.sort_query);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[defaults]
data_root = "/srv/notices"
workers = 5

[collector]
program = "/opt/collectors/run.sh"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.defaults.data_root, "/srv/notices");
        assert_eq!(config.defaults.workers, 5);
        assert_eq!(config.collector.program, "/opt/collectors/run.sh");
        // Unspecified values come from the default functions.
        assert_eq!(config.collector.grace_secs, 5);
        assert_eq!(config.audit.days_back, 7);
    }

    #[test]
    fn missing_file_is_defaults() {
        let path = Path::new("/nonexistent/noticeharvest.toml");
        assert!(load_config_from(path).is_err());
    }
}
