//! Shared types, error model, and configuration for noticeharvest.
//!
//! This crate is the foundation depended on by all other noticeharvest crates.
//! It provides:
//! - [`HarvestError`] — the unified error type
//! - Domain types ([`WorkUnit`], [`CandidateItem`], [`SourceKind`], [`UnitReport`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, AuditDefaults, CollectorDefaults, DefaultsConfig, IdentityDefaults, config_dir,
    config_file_path, init_config, load_config, load_config_from,
};
pub use error::{HarvestError, Result};
pub use types::{
    CandidateItem, SourceKind, UnitReport, UnitState, WorkUnit, normalize_site_code,
};
