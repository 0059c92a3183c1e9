//! Collaborators injected into a reconciliation run
//!
//! The engine has no hard dependency on a UI, an elevation mechanism or a
//! signal handler; callers plug those in through these traits.

use crate::diff::DiffKind;
use crate::types::Subsystem;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

// ============================================================================
// Cancellation
// ============================================================================

/// Shared cancellation flag, raised from a signal handler or another thread
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, waking early on cancellation.
    ///
    /// Returns `false` if the token was raised before the time elapsed.
    pub fn sleep(&self, duration: Duration) -> bool {
        const SLICE: Duration = Duration::from_millis(25);
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(SLICE.min(deadline - now));
        }
    }
}

// ============================================================================
// Privileges
// ============================================================================

/// Answers whether the current process may manage a subsystem
pub trait PrivilegeCheck: Sync {
    fn has_required_privilege(&self, subsystem: Subsystem) -> bool;
}

/// Grants every subsystem (tests, simulated hosts)
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PrivilegeCheck for AllowAll {
    fn has_required_privilege(&self, _subsystem: Subsystem) -> bool {
        true
    }
}

// ============================================================================
// Observation
// ============================================================================

/// Stage of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "subsystem", rename_all = "snake_case")]
pub enum RunPhase {
    Validating,
    ValidationFailed,
    Reconciling,
    Diffing(Subsystem),
    Snapshotting(Subsystem),
    Applying(Subsystem),
    RollingBack,
    Reported,
}

/// Lifecycle transition of one op
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transition", rename_all = "snake_case")]
pub enum OpTransition {
    Planned,
    Snapshotted { snapshot_id: String },
    Applying { attempt: u32 },
    Retrying { attempt: u32, delay_ms: u64, reason: String },
    Succeeded { changed: bool },
    Failed { reason: String },
    Skipped { reason: String },
    Aborted { reason: String },
    RolledBack { succeeded: bool },
}

/// Structured event for one op transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpEvent {
    pub subsystem: Subsystem,
    pub resource_id: String,
    pub kind: DiffKind,
    #[serde(flatten)]
    pub transition: OpTransition,
}

/// Receives run progress.
///
/// Called from worker threads when a provider's ops run in parallel.
/// Observers must not affect the outcome of a run.
pub trait RunObserver: Sync {
    fn on_phase(&self, _phase: RunPhase) {}
    fn on_op(&self, _event: &OpEvent) {}
}

/// Ignores every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoObserver;

impl RunObserver for NoObserver {}

/// Forwards events to the `log` facade
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl RunObserver for LogObserver {
    fn on_phase(&self, phase: RunPhase) {
        log::debug!("phase: {phase:?}");
    }

    fn on_op(&self, event: &OpEvent) {
        let target = format!("{} {} {}", event.kind, event.subsystem, event.resource_id);
        match &event.transition {
            OpTransition::Planned => log::trace!("planned {target}"),
            OpTransition::Snapshotted { snapshot_id } => {
                log::debug!("snapshot {snapshot_id} taken before {target}");
            }
            OpTransition::Applying { attempt } => log::debug!("applying {target} (attempt {attempt})"),
            OpTransition::Retrying {
                attempt,
                delay_ms,
                reason,
            } => log::info!("retrying {target} after attempt {attempt} in {delay_ms}ms: {reason}"),
            OpTransition::Succeeded { changed: true } => log::info!("{target}: done"),
            OpTransition::Succeeded { changed: false } => log::debug!("{target}: already converged"),
            OpTransition::Failed { reason } => log::warn!("{target} failed: {reason}"),
            OpTransition::Skipped { reason } => log::warn!("{target} skipped: {reason}"),
            OpTransition::Aborted { reason } => log::debug!("{target} aborted: {reason}"),
            OpTransition::RolledBack { succeeded: true } => log::info!("rolled back {target}"),
            OpTransition::RolledBack { succeeded: false } => log::warn!("rollback of {target} failed"),
        }
    }
}
