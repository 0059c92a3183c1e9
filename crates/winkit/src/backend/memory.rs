//! In-memory host backend.
//!
//! Holds records in a vector, optionally loaded from and saved to a JSON
//! state file. Faults can be injected per record to exercise retry and
//! failure handling.

use crate::backend::{Backend, ListFilter, Opaque, screen};
use crate::error::{Error, Result};
use crate::types::{Record, RecordKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Persisted shape of a simulated host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostState {
    /// Whether the simulated process is elevated
    #[serde(default = "elevated")]
    pub elevated: bool,
    /// Every record on the host
    #[serde(default)]
    pub records: Vec<Record>,
    /// Objects the host holds that have no record form
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub opaque: Vec<Opaque>,
}

impl Default for HostState {
    fn default() -> Self {
        Self {
            elevated: true,
            records: Vec::new(),
            opaque: Vec::new(),
        }
    }
}

fn elevated() -> bool {
    true
}

/// Injected failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Retryable failure
    Transient,
    /// Access denied
    AccessDenied,
    /// Value rejected
    InvalidValue,
    /// Call exceeded its deadline
    Timeout,
    /// The write lands, then the call reports a timeout
    TimeoutAfterWrite,
}

#[derive(Debug)]
struct Fault {
    kind: RecordKind,
    id: String,
    fault: FaultKind,
    remaining: u32,
}

/// Backend that keeps the host in memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<HostState>,
    faults: Mutex<Vec<Fault>>,
    unavailable: Mutex<HashSet<RecordKind>>,
    mutations: Mutex<Vec<String>>,
}

impl MemoryBackend {
    /// Create an empty, elevated host.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a host from a state.
    pub fn from_state(state: HostState) -> Self {
        Self {
            state: Mutex::new(state),
            ..Self::default()
        }
    }

    /// Load a host from a JSON state file; a missing file is an empty host.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = fs::read_to_string(path)?;
        Ok(Self::from_state(serde_json::from_str(&content)?))
    }

    /// Write the host to a JSON state file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&*self.lock_state())?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp = path.with_extension("json.tmp");
        fs::write(&temp, json)?;
        fs::rename(&temp, path)?;
        Ok(())
    }

    /// Add or replace a record.
    pub fn insert(&self, record: Record) {
        let mut state = self.lock_state();
        upsert(&mut state.records, record);
    }

    /// Add an object the host holds but cannot report as a record.
    pub fn insert_opaque(&self, kind: RecordKind, id: &str, reason: &str) {
        self.lock_state().opaque.push(Opaque {
            kind,
            id: id.to_string(),
            reason: reason.to_string(),
        });
    }

    /// Identifiers of the opaque objects of one kind.
    pub fn opaque_ids(&self, kind: RecordKind) -> Vec<String> {
        self.lock_state()
            .opaque
            .iter()
            .filter(|o| o.kind == kind)
            .map(|o| o.id.clone())
            .collect()
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with_record(self, record: Record) -> Self {
        self.insert(record);
        self
    }

    /// Set whether the simulated process is elevated.
    pub fn set_elevated(&self, elevated: bool) {
        self.lock_state().elevated = elevated;
    }

    /// Fail the next `times` writes touching (`kind`, `id`).
    pub fn fail(&self, kind: RecordKind, id: &str, fault: FaultKind, times: u32) {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Fault {
                kind,
                id: id.to_string(),
                fault,
                remaining: times,
            });
    }

    /// Make every call for `kind` fail as unavailable.
    pub fn set_unavailable(&self, kind: RecordKind) {
        self.unavailable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind);
    }

    /// Records of one kind, in insertion order.
    pub fn records(&self, kind: RecordKind) -> Vec<Record> {
        self.lock_state()
            .records
            .iter()
            .filter(|r| r.kind() == kind)
            .cloned()
            .collect()
    }

    /// Every successful write, as `PUT kind id` / `REMOVE kind id`.
    pub fn mutations(&self) -> Vec<String> {
        self.mutations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn lock_state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self, kind: RecordKind) -> Result<()> {
        if self.is_available(kind) {
            Ok(())
        } else {
            Err(Error::Unavailable {
                message: format!("{kind} API not reachable"),
            })
        }
    }

    /// Consume the next pending fault for (`kind`, `id`).
    fn take_fault(&self, kind: RecordKind, id: &str) -> Option<FaultKind> {
        let mut faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
        let fault = faults
            .iter_mut()
            .find(|f| f.kind == kind && f.remaining > 0 && kind.ids_equal(&f.id, id))?;
        fault.remaining -= 1;
        Some(fault.fault)
    }

    /// Fail a write up front, or hand back a fault to raise once it landed.
    fn before_write(
        &self,
        kind: RecordKind,
        id: &str,
        timeout: Duration,
    ) -> Result<Option<Error>> {
        let Some(fault) = self.take_fault(kind, id) else {
            return Ok(None);
        };
        let message = format!("injected fault for {kind} '{id}'");
        Err(match fault {
            FaultKind::Transient => Error::Transient { message },
            FaultKind::AccessDenied => Error::AccessDenied { message },
            FaultKind::InvalidValue => Error::InvalidValue { message },
            FaultKind::Timeout => Error::Timeout(timeout),
            FaultKind::TimeoutAfterWrite => return Ok(Some(Error::Timeout(timeout))),
        })
    }

    fn log(&self, verb: &str, kind: RecordKind, id: &str) {
        self.mutations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(format!("{verb} {kind} {id}"));
    }
}

fn upsert(records: &mut Vec<Record>, record: Record) {
    let kind = record.kind();
    match records
        .iter_mut()
        .find(|r| r.kind() == kind && kind.ids_equal(r.id(), record.id()))
    {
        Some(existing) => *existing = record,
        None => records.push(record),
    }
}

impl Backend for MemoryBackend {
    fn is_available(&self, kind: RecordKind) -> bool {
        !self
            .unavailable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&kind)
    }

    fn is_elevated(&self) -> bool {
        self.lock_state().elevated
    }

    fn list(&self, kind: RecordKind, filter: &ListFilter) -> Result<Vec<Record>> {
        self.check_available(kind)?;
        let state = self.lock_state();
        screen(kind, filter, state.records.clone(), state.opaque.clone())
    }

    fn put(&self, record: &Record, timeout: Duration) -> Result<()> {
        let kind = record.kind();
        self.check_available(kind)?;
        let late = self.before_write(kind, record.id(), timeout)?;
        {
            let mut state = self.lock_state();
            state
                .opaque
                .retain(|o| !(o.kind == kind && kind.ids_equal(&o.id, record.id())));
            upsert(&mut state.records, record.clone());
        }
        self.log("PUT", kind, record.id());
        late.map_or(Ok(()), Err)
    }

    fn remove(&self, kind: RecordKind, id: &str, timeout: Duration) -> Result<()> {
        self.check_available(kind)?;
        let late = self.before_write(kind, id, timeout)?;
        let mut state = self.lock_state();
        let before = state.records.len() + state.opaque.len();
        state
            .records
            .retain(|r| !(r.kind() == kind && kind.ids_equal(r.id(), id)));
        state
            .opaque
            .retain(|o| !(o.kind == kind && kind.ids_equal(&o.id, id)));
        if state.records.len() + state.opaque.len() == before {
            return Err(Error::NotFound {
                kind,
                id: id.to_string(),
            });
        }
        drop(state);
        self.log("REMOVE", kind, id);
        late.map_or(Ok(()), Err)
    }
}
