//! Error types of the reconciliation core

use crate::types::Subsystem;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure reading host state through a provider
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The host API for this subsystem cannot be reached
    #[error("{subsystem} provider unavailable: {reason}")]
    Unavailable { subsystem: Subsystem, reason: String },

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("failed to read '{resource_id}': {reason}")]
    Read { resource_id: String, reason: String },

    #[error("invalid snapshot payload: {0}")]
    Payload(String),
}

/// Failure applying one operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    /// Worth retrying (locked file, busy service database, ...)
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("{0}")]
    Permanent(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("cancelled")]
    Cancelled,
}

impl ApplyError {
    /// Only transient failures are retried
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Failure capturing, persisting or loading a snapshot
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("cannot read {subsystem} resource '{resource_id}': {source}")]
    Read {
        subsystem: Subsystem,
        resource_id: String,
        #[source]
        source: ProviderError,
    },

    #[error("cannot encode {subsystem} snapshot: {source}")]
    Encode {
        subsystem: Subsystem,
        #[source]
        source: ProviderError,
    },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid backup data: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("snapshot not found: {0}")]
    NotFound(String),

    #[error("backup run not found: {0}")]
    RunNotFound(String),
}

impl SnapshotError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors the engine raises instead of reporting
#[derive(Debug, Error)]
pub enum EngineError {
    /// A structural invariant was violated (provider defect, missing provider)
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// The backup store could not be prepared for the run
    #[error(transparent)]
    Backup(#[from] SnapshotError),
}
