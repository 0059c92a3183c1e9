//! Reconciliation report - the structured outcome of a run

use crate::backup::RunId;
use crate::diff::{DiffKind, DiffOp, DiffSummary};
use crate::types::{FailurePolicy, Subsystem};
use crate::validate::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Overall outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    AllOk,
    Partial,
    Aborted,
    ValidationFailed,
}

impl RunStatus {
    /// Process exit code for this status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::AllOk => 0,
            Self::ValidationFailed => 2,
            Self::Partial => 3,
            Self::Aborted => 4,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AllOk => "ALL_OK",
            Self::Partial => "PARTIAL",
            Self::Aborted => "ABORTED",
            Self::ValidationFailed => "VALIDATION_FAILED",
        })
    }
}

/// Outcome of one op
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplyStatus {
    Succeeded,
    Failed { reason: String },
    Skipped { reason: String },
    /// Never attempted (cancellation or fail-fast abort)
    Aborted { reason: String },
}

impl ApplyStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Succeeded => None,
            Self::Failed { reason } | Self::Skipped { reason } | Self::Aborted { reason } => {
                Some(reason)
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Succeeded => "SUCCEEDED",
            Self::Failed { .. } => "FAILED",
            Self::Skipped { .. } => "SKIPPED",
            Self::Aborted { .. } => "ABORTED",
        }
    }
}

/// Result of applying (or not applying) one op
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyResult {
    pub resource_id: String,
    pub kind: DiffKind,
    pub outcome: ApplyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
    #[serde(default)]
    pub attempts: u32,
    /// Whether the host was actually changed
    #[serde(default)]
    pub changed: bool,
}

impl ApplyResult {
    pub fn new(resource_id: impl Into<String>, kind: DiffKind, outcome: ApplyStatus) -> Self {
        Self {
            resource_id: resource_id.into(),
            kind,
            outcome,
            snapshot_id: None,
            attempts: 0,
            changed: false,
        }
    }

    pub fn succeeded(op: &DiffOp, changed: bool, attempts: u32) -> Self {
        Self {
            attempts,
            changed,
            ..Self::new(&op.resource_id, op.kind, ApplyStatus::Succeeded)
        }
    }

    pub fn failed(op: &DiffOp, reason: impl Into<String>, attempts: u32) -> Self {
        Self {
            attempts,
            ..Self::new(
                &op.resource_id,
                op.kind,
                ApplyStatus::Failed {
                    reason: reason.into(),
                },
            )
        }
    }

    pub fn skipped(op: &DiffOp, reason: impl Into<String>) -> Self {
        Self::new(
            &op.resource_id,
            op.kind,
            ApplyStatus::Skipped {
                reason: reason.into(),
            },
        )
    }

    pub fn aborted(op: &DiffOp, reason: impl Into<String>) -> Self {
        Self::new(
            &op.resource_id,
            op.kind,
            ApplyStatus::Aborted {
                reason: reason.into(),
            },
        )
    }

    pub fn with_snapshot(mut self, snapshot_id: Option<String>) -> Self {
        self.snapshot_id = snapshot_id;
        self
    }
}

/// Counts of ops by kind and by outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpCounts {
    #[serde(flatten)]
    pub kinds: DiffSummary,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub aborted: usize,
}

impl OpCounts {
    fn add(&mut self, result: &ApplyResult) {
        self.kinds.add(result.kind);
        match result.outcome {
            ApplyStatus::Succeeded => self.succeeded += 1,
            ApplyStatus::Failed { .. } => self.failed += 1,
            ApplyStatus::Skipped { .. } => self.skipped += 1,
            ApplyStatus::Aborted { .. } => self.aborted += 1,
        }
    }

    pub fn merge(&mut self, other: &Self) {
        self.kinds.merge(&other.kinds);
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.aborted += other.aborted;
    }

    /// Any op that did not succeed
    pub fn has_problems(&self) -> bool {
        self.failed + self.skipped + self.aborted > 0
    }
}

/// How far a provider got
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SectionOutcome {
    Completed,
    /// The live read failed; nothing was applied
    Unavailable { reason: String },
    PermissionDenied { reason: String },
    /// Skipped because the run was aborted or cancelled earlier
    NotAttempted { reason: String },
}

/// Per-provider part of a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSection {
    pub subsystem: Subsystem,
    pub outcome: SectionOutcome,
    pub counts: OpCounts,
    pub ops: Vec<DiffOp>,
    pub results: Vec<ApplyResult>,
}

impl ProviderSection {
    pub fn new(subsystem: Subsystem, ops: Vec<DiffOp>) -> Self {
        Self {
            subsystem,
            outcome: SectionOutcome::Completed,
            counts: OpCounts::default(),
            ops,
            results: Vec::new(),
        }
    }

    /// A section that never got to diff
    pub fn without_ops(subsystem: Subsystem, outcome: SectionOutcome) -> Self {
        Self {
            outcome,
            ..Self::new(subsystem, Vec::new())
        }
    }

    pub fn push(&mut self, result: ApplyResult) {
        self.counts.add(&result);
        self.results.push(result);
    }
}

/// What rollback did for one journal entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackRecord {
    pub subsystem: Subsystem,
    pub resource_id: String,
    /// Snapshot restored, or none when a created resource was removed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
    pub result: ApplyResult,
}

/// The structured outcome of a reconciliation run.
///
/// Append-only while a run is in progress: sections, results and rollback
/// records are pushed, never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    run_id: Option<RunId>,
    policy: FailurePolicy,
    status: RunStatus,
    started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    cancelled: bool,
    #[serde(default)]
    counts: OpCounts,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    validation_errors: Vec<ValidationError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    missing_privileges: Vec<Subsystem>,
    #[serde(default)]
    sections: Vec<ProviderSection>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    rollback: Vec<RollbackRecord>,
}

impl Report {
    pub fn new(run_id: RunId, policy: FailurePolicy) -> Self {
        Self {
            run_id: Some(run_id),
            policy,
            status: RunStatus::AllOk,
            started_at: Utc::now(),
            finished_at: None,
            cancelled: false,
            counts: OpCounts::default(),
            validation_errors: Vec::new(),
            missing_privileges: Vec::new(),
            sections: Vec::new(),
            rollback: Vec::new(),
        }
    }

    /// Report for a document that never reached the providers
    pub fn validation_failed(errors: Vec<ValidationError>, policy: FailurePolicy) -> Self {
        let now = Utc::now();
        Self {
            run_id: None,
            policy,
            status: RunStatus::ValidationFailed,
            started_at: now,
            finished_at: Some(now),
            cancelled: false,
            counts: OpCounts::default(),
            validation_errors: errors,
            missing_privileges: Vec::new(),
            sections: Vec::new(),
            rollback: Vec::new(),
        }
    }

    pub fn push_missing_privilege(&mut self, subsystem: Subsystem) {
        self.missing_privileges.push(subsystem);
    }

    pub fn push_section(&mut self, section: ProviderSection) {
        self.counts.merge(&section.counts);
        self.sections.push(section);
    }

    pub fn push_rollback(&mut self, record: RollbackRecord) {
        self.rollback.push(record);
    }

    pub fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    /// Close the report and compute its status.
    ///
    /// `aborted` is set when fail-fast stopped the run.
    pub fn finish(mut self, aborted: bool) -> Self {
        self.finished_at = Some(Utc::now());
        self.status = if !self.validation_errors.is_empty() {
            RunStatus::ValidationFailed
        } else if aborted {
            RunStatus::Aborted
        } else if self.counts.has_problems()
            || !self.missing_privileges.is_empty()
            || self
                .sections
                .iter()
                .any(|s| s.outcome != SectionOutcome::Completed)
        {
            RunStatus::Partial
        } else {
            RunStatus::AllOk
        };
        self
    }

    pub fn run_id(&self) -> Option<&RunId> {
        self.run_id.as_ref()
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn counts(&self) -> &OpCounts {
        &self.counts
    }

    pub fn validation_errors(&self) -> &[ValidationError] {
        &self.validation_errors
    }

    pub fn missing_privileges(&self) -> &[Subsystem] {
        &self.missing_privileges
    }

    pub fn sections(&self) -> &[ProviderSection] {
        &self.sections
    }

    pub fn section(&self, subsystem: Subsystem) -> Option<&ProviderSection> {
        self.sections.iter().find(|s| s.subsystem == subsystem)
    }

    pub fn rollback(&self) -> &[RollbackRecord] {
        &self.rollback
    }

    /// Every result that did not succeed, with its subsystem
    pub fn problems(&self) -> impl Iterator<Item = (Subsystem, &ApplyResult)> {
        self.sections.iter().flat_map(|s| {
            s.results
                .iter()
                .filter(|r| !r.outcome.is_success())
                .map(move |r| (s.subsystem, r))
        })
    }
}
