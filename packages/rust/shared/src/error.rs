//! Error types for noticeharvest.
//!
//! Library crates use [`HarvestError`] via `thiserror`.
//! The CLI app wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all noticeharvest operations.
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Database or registry layer error.
    #[error("registry error: {0}")]
    Storage(String),

    /// Collector subprocess launch or supervision error.
    #[error("collector error: {0}")]
    Collector(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (empty URL, malformed unit name, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, HarvestError>;

impl HarvestError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True when this is the "empty origin URL" registration refusal.
    pub fn is_empty_url(&self) -> bool {
        matches!(self, Self::Validation { message } if message.contains("empty origin URL"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = HarvestError::config("missing data_root");
        assert_eq!(err.to_string(), "config error: missing data_root");

        let err = HarvestError::validation("empty origin URL for site a01");
        assert!(err.is_empty_url());
        assert!(err.to_string().contains("empty origin URL"));
    }
}
