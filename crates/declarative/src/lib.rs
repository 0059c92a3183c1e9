//! # Declarative
//!
//! Host reconciliation: validate a desired-state document, diff it against
//! what a host actually has, and apply the difference with snapshots and
//! rollback.
//!
//! ## Core Concepts
//!
//! - **ConfigDocument**: validated desired state, one [`Section`] per subsystem
//! - **Provider**: reads, diffs and mutates one subsystem of the host
//! - **DiffOp**: a single CREATE, UPDATE, DELETE or NOOP
//! - **BackupStore**: snapshots prior state and journals every change of a run
//! - **Engine**: walks providers in dependency order and produces a [`Report`]
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{BackupStore, CancelToken, Engine, FailurePolicy, ProviderRegistry};
//!
//! let providers = ProviderRegistry::new().with(Box::new(MyFirewall::connect()?));
//! let backups = BackupStore::open("/var/lib/winconf/backups")?;
//!
//! let raw: serde_json::Value = serde_json::from_str(&text)?;
//! let report = Engine::new(&providers, &backups)
//!     .reconcile_raw(&raw, FailurePolicy::FailFast, &CancelToken::new())?;
//! std::process::exit(report.status().exit_code());
//! ```
//!
//! ## Seams
//!
//! - [`Provider`]: one per subsystem, supplied by the host integration
//! - [`PrivilegeCheck`]: decides which subsystems the process may manage
//! - [`RunObserver`]: receives phase changes and per-op transitions
//!
//! Nothing here talks to a real host; that lives behind [`Provider`].

pub mod backup;
pub mod context;
pub mod diff;
pub mod engine;
pub mod error;
pub mod format;
pub mod provider;
pub mod report;
pub mod retry;
pub mod schema;
pub mod types;
pub mod validate;

#[cfg(test)]
mod testing;

// Re-export main types at crate root
pub use backup::{BackupStore, JournalEntry, RunId, RunSummary, Snapshot};
pub use context::{
    AllowAll, CancelToken, LogObserver, NoObserver, OpEvent, OpTransition, PrivilegeCheck,
    RunObserver, RunPhase,
};
pub use diff::{DiffKind, DiffOp, DiffSummary, compute_diff};
pub use engine::{Engine, PlannedSection, RunOptions};
pub use error::{ApplyError, EngineError, ProviderError, SnapshotError};
pub use format::{DocumentFormat, FormatError};
pub use provider::{ApplyContext, Applied, Provider, ProviderRegistry, Scope, apply_with_retry};
pub use report::{
    ApplyResult, ApplyStatus, OpCounts, ProviderSection, Report, RollbackRecord, RunStatus,
    SectionOutcome,
};
pub use retry::{RetryCallback, RetryConfig};
pub use schema::{DocumentSchema, SchemaNode, document_schema};
pub use types::{
    Attributes, ConfigDocument, FailurePolicy, IdCase, LiveResourceState, ResourceDescriptor,
    Section, Subsystem,
};
pub use validate::{ValidationError, ValidationErrors, validate};
