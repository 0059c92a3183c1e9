//! Backup store - per-run snapshots and the rollback journal
//!
//! Layout under the backup root:
//!
//! ```text
//! <root>/<run_id>/journal.json
//! <root>/<run_id>/<subsystem>/<snapshot_id>.json
//! ```
//!
//! Every file is written atomically (temp file, then rename) and writes
//! touching the same (subsystem, resource) key are serialized.

use crate::context::{CancelToken, OpEvent, OpTransition, RunObserver};
use crate::diff::{DiffKind, DiffOp};
use crate::engine::RunOptions;
use crate::error::SnapshotError;
use crate::provider::{ApplyContext, Applied, Provider, ProviderRegistry, apply_with_retry};
use crate::report::{ApplyResult, ApplyStatus, RollbackRecord};
use crate::retry::RetryConfig;
use crate::types::{LiveResourceState, Subsystem};
use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

const RUN_ID_FORMAT: &str = "%Y%m%dT%H%M%S%.3fZ";
const JOURNAL_FILE: &str = "journal.json";

/// Identifier of a reconciliation run; sorts chronologically
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn from_time(time: DateTime<Utc>) -> Self {
        Self(time.format(RUN_ID_FORMAT).to_string())
    }

    /// Start time encoded in the id, if it is a generated one
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        NaiveDateTime::parse_from_str(&self.0, RUN_ID_FORMAT)
            .ok()
            .map(|t| t.and_utc())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Prior state of one resource, captured before a destructive op
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub subsystem: Subsystem,
    pub resource_id: String,
    pub run_id: RunId,
    pub taken_at: DateTime<Utc>,
    pub existed: bool,
    /// Provider-encoded state, opaque to the store
    pub payload: Value,
}

/// One rollback action, in the order changes were made
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
pub enum JournalEntry {
    /// Restore this snapshot
    Snapshot {
        snapshot_id: String,
        subsystem: Subsystem,
        resource_id: String,
    },
    /// Remove a resource the run created
    Created {
        subsystem: Subsystem,
        resource_id: String,
    },
}

impl JournalEntry {
    pub fn subsystem(&self) -> Subsystem {
        match self {
            Self::Snapshot { subsystem, .. } | Self::Created { subsystem, .. } => *subsystem,
        }
    }

    pub fn resource_id(&self) -> &str {
        match self {
            Self::Snapshot { resource_id, .. } | Self::Created { resource_id, .. } => resource_id,
        }
    }
}

/// Summary of a stored run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub started_at: Option<DateTime<Utc>>,
    pub snapshots: usize,
    pub journal_entries: usize,
}

/// Content address of a snapshot: BLAKE3 over (subsystem, resource key, run)
pub fn snapshot_id(subsystem: Subsystem, resource_id: &str, run: &RunId) -> String {
    let key = subsystem.id_case().key(resource_id);
    let mut hasher = blake3::Hasher::new();
    hasher.update(subsystem.as_str().as_bytes());
    hasher.update(&[0]);
    hasher.update(key.as_bytes());
    hasher.update(&[0]);
    hasher.update(run.as_str().as_bytes());
    hasher.finalize().to_hex()[..32].to_string()
}

/// Durable snapshot storage rooted at one directory
#[derive(Debug)]
pub struct BackupStore {
    root: PathBuf,
    key_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    last_run: Mutex<Option<RunId>>,
}

impl BackupStore {
    /// Open (creating if needed) a store at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, SnapshotError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| SnapshotError::io(&root, e))?;
        log::debug!("Backup store at {}", root.display());
        Ok(Self {
            root,
            key_locks: Mutex::new(HashMap::new()),
            last_run: Mutex::new(None),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocate a run id later than every run already stored or issued
    pub fn next_run_id(&self) -> Result<RunId, SnapshotError> {
        let mut last = self.last_run.lock().unwrap_or_else(PoisonError::into_inner);
        let newest_stored = self.run_ids()?.into_iter().max();
        let floor = last.clone().max(newest_stored);

        let mut candidate = RunId::from_time(Utc::now());
        if let Some(floor) = floor
            && candidate <= floor
        {
            let base = floor.timestamp().unwrap_or_else(Utc::now);
            candidate = RunId::from_time(base + TimeDelta::milliseconds(1));
        }

        fs::create_dir_all(self.run_dir(&candidate))
            .map_err(|e| SnapshotError::io(self.run_dir(&candidate), e))?;
        *last = Some(candidate.clone());
        Ok(candidate)
    }

    /// Capture the current state of `resource_id` for `run`.
    ///
    /// A failed read is an error, never an empty snapshot. Within one run
    /// the first capture of a resource is kept.
    pub fn snapshot(
        &self,
        provider: &dyn Provider,
        resource_id: &str,
        run: &RunId,
    ) -> Result<Snapshot, SnapshotError> {
        let subsystem = provider.subsystem();
        let lock = self.lock_for(subsystem, resource_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let id = snapshot_id(subsystem, resource_id, run);
        let path = self.snapshot_path(run, subsystem, &id);
        if path.exists() {
            return read_json(&path);
        }

        let state = provider
            .read_one(resource_id)
            .map_err(|source| SnapshotError::Read {
                subsystem,
                resource_id: resource_id.to_string(),
                source,
            })?;
        let payload = provider
            .encode_snapshot(&state)
            .map_err(|source| SnapshotError::Encode { subsystem, source })?;

        let snapshot = Snapshot {
            id,
            subsystem,
            resource_id: resource_id.to_string(),
            run_id: run.clone(),
            taken_at: Utc::now(),
            existed: state.exists,
            payload,
        };
        write_json_atomic(&path, &snapshot)?;
        log::debug!("Snapshot {} of {subsystem} '{resource_id}'", snapshot.id);
        Ok(snapshot)
    }

    /// Append an entry to the run's rollback journal
    pub fn record(&self, run: &RunId, entry: JournalEntry) -> Result<(), SnapshotError> {
        let lock = self.journal_lock(run);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let path = self.run_dir(run).join(JOURNAL_FILE);
        let mut entries: Vec<JournalEntry> = if path.exists() {
            read_json(&path)?
        } else {
            Vec::new()
        };
        entries.push(entry);
        write_json_atomic(&path, &entries)
    }

    /// Journal of a run, oldest entry first
    pub fn journal(&self, run: &RunId) -> Result<Vec<JournalEntry>, SnapshotError> {
        let dir = self.existing_run_dir(run)?;
        let path = dir.join(JOURNAL_FILE);
        if path.exists() {
            read_json(&path)
        } else {
            Ok(Vec::new())
        }
    }

    /// Find a snapshot by id in any run
    pub fn load(&self, snapshot_id: &str) -> Result<Snapshot, SnapshotError> {
        for run in self.run_ids()?.into_iter().rev() {
            for subsystem in Subsystem::DEPENDENCY_ORDER {
                let path = self.snapshot_path(&run, subsystem, snapshot_id);
                if path.exists() {
                    return read_json(&path);
                }
            }
        }
        Err(SnapshotError::NotFound(snapshot_id.to_string()))
    }

    pub fn load_in_run(
        &self,
        run: &RunId,
        subsystem: Subsystem,
        snapshot_id: &str,
    ) -> Result<Snapshot, SnapshotError> {
        let path = self.snapshot_path(run, subsystem, snapshot_id);
        if !path.exists() {
            return Err(SnapshotError::NotFound(snapshot_id.to_string()));
        }
        read_json(&path)
    }

    /// Stored runs, oldest first
    pub fn list_runs(&self) -> Result<Vec<RunSummary>, SnapshotError> {
        let mut out = Vec::new();
        for run_id in self.run_ids()? {
            let snapshots = self.list_snapshots(&run_id)?.len();
            let journal_entries = self.journal(&run_id)?.len();
            out.push(RunSummary {
                started_at: run_id.timestamp(),
                run_id,
                snapshots,
                journal_entries,
            });
        }
        Ok(out)
    }

    /// Snapshots of one run, ordered by capture time
    pub fn list_snapshots(&self, run: &RunId) -> Result<Vec<Snapshot>, SnapshotError> {
        let dir = self.existing_run_dir(run)?;
        let mut snapshots = Vec::new();
        for subsystem in Subsystem::DEPENDENCY_ORDER {
            let sub_dir = dir.join(subsystem.as_str());
            if !sub_dir.is_dir() {
                continue;
            }
            let entries = fs::read_dir(&sub_dir).map_err(|e| SnapshotError::io(&sub_dir, e))?;
            for entry in entries {
                let path = entry.map_err(|e| SnapshotError::io(&sub_dir, e))?.path();
                if path.extension().is_some_and(|ext| ext == "json") {
                    snapshots.push(read_json::<Snapshot>(&path)?);
                }
            }
        }
        snapshots.sort_by(|a, b| a.taken_at.cmp(&b.taken_at));
        Ok(snapshots)
    }

    /// Return a resource to the state captured in `snapshot`.
    ///
    /// Reads the current state and applies whichever create, update or
    /// delete gets there.
    pub fn restore(
        &self,
        snapshot: &Snapshot,
        provider: &dyn Provider,
        ctx: &ApplyContext<'_>,
        retry: &RetryConfig,
    ) -> ApplyResult {
        let lock = self.lock_for(snapshot.subsystem, &snapshot.resource_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let with_id = |r: ApplyResult| r.with_snapshot(Some(snapshot.id.clone()));

        let prior = match provider.decode_snapshot(&snapshot.payload) {
            Ok(prior) => prior,
            Err(e) => {
                return with_id(ApplyResult::new(
                    &snapshot.resource_id,
                    DiffKind::Noop,
                    ApplyStatus::Failed {
                        reason: e.to_string(),
                    },
                ));
            }
        };
        let current = match provider.read_one(&snapshot.resource_id) {
            Ok(current) => current,
            Err(e) => {
                return with_id(ApplyResult::new(
                    &snapshot.resource_id,
                    DiffKind::Noop,
                    ApplyStatus::Failed {
                        reason: e.to_string(),
                    },
                ));
            }
        };

        let op = restore_op(snapshot.subsystem, &snapshot.resource_id, prior, current);
        with_id(run_restore_op(provider, &op, ctx, retry))
    }

    /// Remove a resource a run created, if it still exists
    pub fn remove_created(
        &self,
        provider: &dyn Provider,
        resource_id: &str,
        ctx: &ApplyContext<'_>,
        retry: &RetryConfig,
    ) -> ApplyResult {
        let lock = self.lock_for(provider.subsystem(), resource_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let current = match provider.read_one(resource_id) {
            Ok(current) => current,
            Err(e) => {
                return ApplyResult::new(
                    resource_id,
                    DiffKind::Delete,
                    ApplyStatus::Failed {
                        reason: e.to_string(),
                    },
                );
            }
        };
        let op = DiffOp {
            subsystem: provider.subsystem(),
            resource_id: resource_id.to_string(),
            kind: if current.exists {
                DiffKind::Delete
            } else {
                DiffKind::Noop
            },
            before: current.exists.then_some(current.attributes),
            after: None,
        };
        run_restore_op(provider, &op, ctx, retry)
    }

    /// Undo journaled changes, newest first.
    ///
    /// Rollback ignores the run's cancellation token so that it always
    /// completes.
    pub fn rollback_entries(
        &self,
        run: &RunId,
        entries: &[JournalEntry],
        providers: &ProviderRegistry,
        options: &RunOptions,
        observer: &dyn RunObserver,
    ) -> Vec<RollbackRecord> {
        let never = CancelToken::new();
        let mut records = Vec::with_capacity(entries.len());

        for entry in entries.iter().rev() {
            let subsystem = entry.subsystem();
            let resource_id = entry.resource_id().to_string();
            let ctx = ApplyContext::new(run, options.timeout_for(subsystem), &never);

            let (snapshot_id, result) = match providers.get(subsystem) {
                None => (
                    None,
                    ApplyResult::new(
                        &resource_id,
                        DiffKind::Noop,
                        ApplyStatus::Failed {
                            reason: format!("no provider registered for {subsystem}"),
                        },
                    ),
                ),
                Some(provider) => match entry {
                    JournalEntry::Snapshot { snapshot_id, .. } => {
                        let result = match self.load_in_run(run, subsystem, snapshot_id) {
                            Ok(snapshot) => self.restore(&snapshot, provider, &ctx, &options.retry),
                            Err(e) => ApplyResult::new(
                                &resource_id,
                                DiffKind::Noop,
                                ApplyStatus::Failed {
                                    reason: e.to_string(),
                                },
                            ),
                        };
                        (Some(snapshot_id.clone()), result)
                    }
                    JournalEntry::Created { .. } => (
                        None,
                        self.remove_created(provider, &resource_id, &ctx, &options.retry),
                    ),
                },
            };

            observer.on_op(&OpEvent {
                subsystem,
                resource_id: resource_id.clone(),
                kind: result.kind,
                transition: OpTransition::RolledBack {
                    succeeded: result.outcome.is_success(),
                },
            });
            records.push(RollbackRecord {
                subsystem,
                resource_id,
                snapshot_id,
                result,
            });
        }
        records
    }

    /// Undo a stored run using its journal
    pub fn rollback_run(
        &self,
        run: &RunId,
        providers: &ProviderRegistry,
        options: &RunOptions,
        observer: &dyn RunObserver,
    ) -> Result<Vec<RollbackRecord>, SnapshotError> {
        let entries = self.journal(run)?;
        log::info!("Rolling back run {run} ({} journal entries)", entries.len());
        Ok(self.rollback_entries(run, &entries, providers, options, observer))
    }

    /// Delete a run and all its snapshots
    pub fn prune(&self, run: &RunId) -> Result<(), SnapshotError> {
        let dir = self.existing_run_dir(run)?;
        fs::remove_dir_all(&dir).map_err(|e| SnapshotError::io(&dir, e))?;
        log::debug!("Pruned backup run {run}");
        Ok(())
    }

    /// Keep the newest `keep` runs, delete the rest; returns deleted runs
    pub fn prune_keep_latest(&self, keep: usize) -> Result<Vec<RunId>, SnapshotError> {
        let runs = self.run_ids()?;
        let excess = runs.len().saturating_sub(keep);
        let doomed: Vec<RunId> = runs.into_iter().take(excess).collect();
        for run in &doomed {
            self.prune(run)?;
        }
        Ok(doomed)
    }

    // ------------------------------------------------------------------------

    fn run_dir(&self, run: &RunId) -> PathBuf {
        self.root.join(run.as_str())
    }

    fn existing_run_dir(&self, run: &RunId) -> Result<PathBuf, SnapshotError> {
        let dir = self.run_dir(run);
        if dir.is_dir() {
            Ok(dir)
        } else {
            Err(SnapshotError::RunNotFound(run.to_string()))
        }
    }

    fn snapshot_path(&self, run: &RunId, subsystem: Subsystem, id: &str) -> PathBuf {
        self.run_dir(run)
            .join(subsystem.as_str())
            .join(format!("{id}.json"))
    }

    /// Run ids stored on disk, oldest first
    fn run_ids(&self) -> Result<Vec<RunId>, SnapshotError> {
        let entries = fs::read_dir(&self.root).map_err(|e| SnapshotError::io(&self.root, e))?;
        let mut runs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| SnapshotError::io(&self.root, e))?;
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                let run = RunId::new(name);
                if run.timestamp().is_some() {
                    runs.push(run);
                }
            }
        }
        runs.sort();
        Ok(runs)
    }

    fn lock_for(&self, subsystem: Subsystem, resource_id: &str) -> Arc<Mutex<()>> {
        let key = format!("{subsystem}/{}", subsystem.id_case().key(resource_id));
        self.lock_key(key)
    }

    fn journal_lock(&self, run: &RunId) -> Arc<Mutex<()>> {
        self.lock_key(format!("journal/{run}"))
    }

    fn lock_key(&self, key: String) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(key).or_default())
    }
}

/// The op that takes `current` back to `prior`
fn restore_op(
    subsystem: Subsystem,
    resource_id: &str,
    prior: LiveResourceState,
    current: LiveResourceState,
) -> DiffOp {
    let kind = match (prior.exists, current.exists) {
        (true, true) if prior.attributes == current.attributes => DiffKind::Noop,
        (true, true) => DiffKind::Update,
        (true, false) => DiffKind::Create,
        (false, true) => DiffKind::Delete,
        (false, false) => DiffKind::Noop,
    };
    DiffOp {
        subsystem,
        resource_id: resource_id.to_string(),
        kind,
        before: current.exists.then_some(current.attributes),
        after: prior.exists.then_some(prior.attributes),
    }
}

fn run_restore_op(
    provider: &dyn Provider,
    op: &DiffOp,
    ctx: &ApplyContext<'_>,
    retry: &RetryConfig,
) -> ApplyResult {
    if op.kind == DiffKind::Noop {
        return ApplyResult::succeeded(op, false, 0);
    }
    let attempted = apply_with_retry(provider, op, ctx, retry, None);
    match attempted.result {
        Ok(applied) => ApplyResult::succeeded(op, applied == Applied::Changed, attempted.attempts),
        Err(e) => ApplyResult::failed(op, e.to_string(), attempted.attempts),
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, SnapshotError> {
    let content = fs::read_to_string(path).map_err(|e| SnapshotError::io(path, e))?;
    Ok(serde_json::from_str(&content)?)
}

/// Write JSON atomically: temp file in the same directory, then rename
fn write_json_atomic<T: Serialize>(path: &Path, data: &T) -> Result<(), SnapshotError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| SnapshotError::io(parent, e))?;
    }
    let temp = path.with_extension("json.tmp");
    let content = serde_json::to_vec_pretty(data)?;
    fs::write(&temp, content).map_err(|e| SnapshotError::io(&temp, e))?;
    fs::rename(&temp, path).map_err(|e| SnapshotError::io(path, e))
}
