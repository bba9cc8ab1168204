//! Custom error types for the sentra scan pipeline.
//!
//! Provides a structured error hierarchy for better error handling
//! and more informative error messages. Per-provider and per-predictor
//! failures are NOT represented here: those are recovered locally with
//! neutral defaults and never surface to the caller.

use std::path::PathBuf;

/// The main error type for sentra operations.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// I/O error (config file read, etc.)
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: Option<PathBuf>,
        #[source]
        source: std::io::Error,
    },

    /// Regex compilation error
    #[error("Invalid regex pattern '{pattern}': {source}")]
    Regex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A threshold set whose breakpoints are not strictly increasing
    #[error("Threshold set for branch '{branch}' is not strictly monotonic")]
    NonMonotonicThresholds { branch: String },

    /// Ensemble weights that do not sum to 1
    #[error("{stage} ensemble weights sum to {sum}, expected 1.0")]
    WeightSum { stage: String, sum: f64 },

    /// A numeric config knob outside its valid range
    #[error("Config value '{field}' = {value} is out of range")]
    InvalidConfigValue { field: String, value: f64 },

    /// Two enabled policy rules sharing a priority value
    #[error("Duplicate priority {priority} among enabled policy rules")]
    DuplicateRulePriority { priority: i32 },

    /// Scan cancelled by the caller
    #[error("Scan cancelled by caller")]
    Cancelled,

    /// Tokio task join error
    #[error("Async task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    /// Generic error for external collaborator failures
    #[error("{context}: {message}")]
    External { context: String, message: String },
}

/// Result type alias using ScanError
pub type ScanResult<T> = Result<T, ScanError>;

impl ScanError {
    /// Create an I/O error with path context
    pub fn io(source: std::io::Error, path: impl Into<Option<PathBuf>>) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a regex error with pattern context
    pub fn regex(source: regex::Error, pattern: impl Into<String>) -> Self {
        Self::Regex {
            pattern: pattern.into(),
            source,
        }
    }

    /// Create an external error with context
    pub fn external(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::External {
            context: context.into(),
            message: message.into(),
        }
    }

    /// True for errors that must be fixed in configuration before any scan runs
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::NonMonotonicThresholds { .. }
                | Self::WeightSum { .. }
                | Self::InvalidConfigValue { .. }
                | Self::DuplicateRulePriority { .. }
        )
    }
}

/// Convert from raw I/O errors (without path context)
impl From<std::io::Error> for ScanError {
    fn from(source: std::io::Error) -> Self {
        Self::Io { path: None, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_display() {
        let err = ScanError::io(
            std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
            Some(PathBuf::from("/etc/sentra/snapshot.json")),
        );
        assert!(err.to_string().contains("snapshot.json"));
    }

    #[test]
    fn test_monotonicity_error_display() {
        let err = ScanError::NonMonotonicThresholds {
            branch: "parked".to_string(),
        };
        assert!(err.to_string().contains("parked"));
    }

    #[test]
    fn test_config_error_classification() {
        assert!(ScanError::DuplicateRulePriority { priority: 10 }.is_config_error());
        assert!(ScanError::WeightSum {
            stage: "stage1".into(),
            sum: 0.9
        }
        .is_config_error());
        assert!(!ScanError::Cancelled.is_config_error());
    }
}
