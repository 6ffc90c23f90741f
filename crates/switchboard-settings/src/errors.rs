//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from loading or validating settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The file is not JSON, or a field has the wrong shape.
    #[error("{} is not valid settings JSON: {source}", path.display())]
    Parse {
        /// File that was being parsed.
        path: PathBuf,
        /// Underlying parse failure.
        #[source]
        source: serde_json::Error,
    },

    /// Compiled defaults could not be turned into JSON for merging.
    #[error("failed to encode default settings: {0}")]
    Defaults(#[from] serde_json::Error),

    /// A value parsed but is out of range for the hub.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// camelCase path of the offending field, e.g. `hub.maxBatch`.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl SettingsError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
