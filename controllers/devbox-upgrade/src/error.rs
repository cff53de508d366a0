//! Upgrade error types.
//!
//! Errors raised by the upgrade phases that are not covered by the store or
//! conversion errors they wrap.

use devbox_crds::{ConversionError, SchemaError};
use resource_store::StoreError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during an upgrade run.
#[derive(Debug, Error)]
pub enum UpgradeError {
    /// Resource store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Object could not be converted between versions
    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),

    /// Schema definition could not be built
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// A bounded wait ran out
    #[error("Timed out after {elapsed:?} waiting for {what}")]
    Timeout { what: String, elapsed: Duration },

    /// Backup directory or file error
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Cluster is not in a state the phase can act on
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Batch-state file holds nothing for the requested operation
    #[error("No backup states found for operation {0}")]
    NoBackupStates(String),

    /// Restore finished with per-resource failures (force mode)
    #[error("{failed} of {total} resource(s) failed to restore")]
    RestoreIncomplete { failed: usize, total: usize },

    /// Run was cancelled before the requested phases finished
    #[error("Upgrade cancelled")]
    Cancelled,
}

impl UpgradeError {
    /// Whether a retry may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, UpgradeError::Store(err) if err.is_retryable())
    }
}

/// Wrap an I/O error with the path it concerns
pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> UpgradeError {
    UpgradeError::Io {
        path: path.into(),
        source,
    }
}
