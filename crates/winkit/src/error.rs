//! Error types for host operations.
//!
//! Errors are categorized so callers can decide whether to retry and how
//! to report a failure. PowerShell failures are classified from the
//! script's stderr.

use crate::backend::Opaque;
use crate::types::RecordKind;
use std::time::Duration;
use thiserror::Error;

/// Categories of host errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Lock contention, busy services, sharing violations (retryable)
    Transient,
    /// The addressed object does not exist
    NotFound,
    /// The process lacks the rights for the change
    AccessDenied,
    /// The host rejected a value
    InvalidValue,
    /// The host API or tool cannot be reached
    Unavailable,
    /// A host call exceeded its time budget
    Timeout,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Transient => "Temporary host failure",
            Self::NotFound => "Object not found",
            Self::AccessDenied => "Access denied",
            Self::InvalidValue => "Invalid value",
            Self::Unavailable => "Host API unavailable",
            Self::Timeout => "Timed out",
            Self::Other => "Unexpected error",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Transient => "Try again once the object is no longer in use",
            Self::NotFound => "Check the identifier in the document",
            Self::AccessDenied => "Run from an elevated (Administrator) shell",
            Self::InvalidValue => "Check the value against the document schema",
            Self::Unavailable => "Make sure PowerShell is installed and on PATH",
            Self::Timeout => "Raise the subsystem timeout in config.toml",
            Self::Other => "Check the error details for more information",
        }
    }
}

/// Errors that can occur while reading or changing the host.
#[derive(Debug, Error)]
pub enum Error {
    /// Temporary failure (object busy, locked, service pending)
    #[error("transient host error: {message}")]
    Transient {
        /// Host message
        message: String,
    },

    /// The addressed object does not exist
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Kind of the missing object
        kind: RecordKind,
        /// Identifier of the missing object
        id: String,
    },

    /// Access denied
    #[error("access denied: {message}")]
    AccessDenied {
        /// Details about what access was denied
        message: String,
    },

    /// The host rejected a value, or a record is malformed
    #[error("invalid value: {message}")]
    InvalidValue {
        /// What was wrong
        message: String,
    },

    /// Objects asked for by name exist but cannot be modelled faithfully
    #[error("cannot represent {}", describe(.0))]
    Unrepresentable(Vec<Opaque>),

    /// PowerShell (or the subsystem API) is not reachable
    #[error("host unavailable: {message}")]
    Unavailable {
        /// Why the host cannot be reached
        message: String,
    },

    /// A host call ran past its deadline and was killed
    #[error("host call timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// Command execution failed
    #[error("command failed: {message}")]
    CommandFailed {
        /// Description of what command failed
        message: String,
        /// Standard error output from the failed command
        stderr: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Get the error category for retry logic.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Transient { .. } => ErrorCategory::Transient,
            Error::NotFound { .. } => ErrorCategory::NotFound,
            Error::AccessDenied { .. } => ErrorCategory::AccessDenied,
            Error::InvalidValue { .. } | Error::Unrepresentable(_) | Error::Json(_) => {
                ErrorCategory::InvalidValue
            }
            Error::Unavailable { .. } => ErrorCategory::Unavailable,
            Error::Timeout(_) => ErrorCategory::Timeout,
            Error::CommandFailed { .. } | Error::Io(_) => ErrorCategory::Other,
        }
    }

    /// Whether this error is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidValue {
            message: message.into(),
        }
    }

    /// Create an error from the stderr of a failed host script.
    ///
    /// Scripts print the exception message followed by PowerShell's
    /// fully-qualified error id; both feed the classification.
    pub fn from_host_output(stderr: &str, kind: RecordKind, id: Option<&str>) -> Self {
        let lower = stderr.to_lowercase();
        let message = stderr.trim().to_string();

        if lower.contains("access is denied")
            || lower.contains("unauthorizedaccess")
            || lower.contains("permissiondenied")
            || lower.contains("requested registry access is not allowed")
            || lower.contains("requires elevation")
        {
            return Error::AccessDenied { message };
        }

        if lower.contains("being used by another process")
            || lower.contains("sharing violation")
            || lower.contains("cannot accept control messages")
            || lower.contains("pending")
            || lower.contains("another installation is in progress")
            || lower.contains("try again")
        {
            return Error::Transient { message };
        }

        if lower.contains("cannot find")
            || lower.contains("does not exist")
            || lower.contains("objectnotfound")
            || lower.contains("_notfound")
            || lower.contains("no msft_")
            || lower.contains("no installed package found")
            || lower.contains("was not found")
        {
            return Error::NotFound {
                kind,
                id: id.unwrap_or("unknown").to_string(),
            };
        }

        if lower.contains("cannot convert")
            || lower.contains("parameterbindingvalidation")
            || lower.contains("invalidargument")
            || lower.contains("is not valid")
            || lower.contains("invalid parameter")
        {
            return Error::InvalidValue { message };
        }

        if lower.contains("is not recognized as") || lower.contains("commandnotfound") {
            return Error::Unavailable { message };
        }

        Error::CommandFailed {
            message: format!(
                "{kind} script failed{}",
                id.map(|n| format!(" for {n}")).unwrap_or_default()
            ),
            stderr: message,
        }
    }
}

fn describe(objects: &[Opaque]) -> String {
    objects
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for host operations.
pub type Result<T> = std::result::Result<T, Error>;
