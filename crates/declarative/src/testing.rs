//! In-memory provider used by the crate's tests

use crate::diff::{DiffKind, DiffOp};
use crate::error::{ApplyError, ProviderError};
use crate::provider::{ApplyContext, Applied, Provider, Scope};
use crate::types::{Attributes, LiveResourceState, Subsystem};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Mutation log shared by several fake providers
pub type MutationLog = Arc<Mutex<Vec<String>>>;

pub fn attrs(value: Value) -> Attributes {
    value.as_object().cloned().unwrap_or_default()
}

pub struct FakeProvider {
    subsystem: Subsystem,
    state: Mutex<Vec<LiveResourceState>>,
    faults: Mutex<HashMap<String, (ApplyError, u32)>>,
    read_failures: Mutex<HashSet<String>>,
    hidden: Mutex<HashSet<String>>,
    late_faults: Mutex<HashMap<String, ApplyError>>,
    unavailable: bool,
    concurrent: bool,
    log: MutationLog,
}

impl FakeProvider {
    pub fn new(subsystem: Subsystem, log: &MutationLog) -> Self {
        Self {
            subsystem,
            state: Mutex::new(Vec::new()),
            faults: Mutex::new(HashMap::new()),
            read_failures: Mutex::new(HashSet::new()),
            hidden: Mutex::new(HashSet::new()),
            late_faults: Mutex::new(HashMap::new()),
            unavailable: false,
            concurrent: false,
            log: Arc::clone(log),
        }
    }

    pub fn with_resource(self, id: &str, value: Value) -> Self {
        self.state
            .lock()
            .unwrap()
            .push(LiveResourceState::present(id, attrs(value)));
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    pub fn concurrent(mut self) -> Self {
        self.concurrent = true;
        self
    }

    /// Fail the next `times` applies touching `id`
    pub fn fail_apply(&self, id: &str, error: ApplyError, times: u32) {
        self.faults
            .lock()
            .unwrap()
            .insert(id.to_string(), (error, times));
    }

    pub fn fail_read(&self, id: &str) {
        self.read_failures.lock().unwrap().insert(id.to_string());
    }

    /// Leave `id` out of bulk reads; `read_one` still sees it
    pub fn hide(&self, id: &str) {
        self.hidden.lock().unwrap().insert(id.to_string());
    }

    /// Make the next apply of `id` take effect and then report `error`
    pub fn fail_after_apply(&self, id: &str, error: ApplyError) {
        self.late_faults
            .lock()
            .unwrap()
            .insert(id.to_string(), error);
    }

    pub fn get(&self, id: &str) -> Option<Attributes> {
        let case = self.subsystem.id_case();
        self.state
            .lock()
            .unwrap()
            .iter()
            .find(|s| case.matches(&s.id, id))
            .map(|s| s.attributes.clone())
    }

    pub fn ids(&self) -> Vec<String> {
        self.state.lock().unwrap().iter().map(|s| s.id.clone()).collect()
    }
}

impl Provider for FakeProvider {
    fn subsystem(&self) -> Subsystem {
        self.subsystem
    }

    fn read_live(&self, scope: &Scope) -> Result<Vec<LiveResourceState>, ProviderError> {
        if self.unavailable {
            return Err(ProviderError::Unavailable {
                subsystem: self.subsystem,
                reason: "host API not reachable".into(),
            });
        }
        let case = self.subsystem.id_case();
        let hidden = self.hidden.lock().unwrap();
        Ok(self
            .state
            .lock()
            .unwrap()
            .iter()
            .filter(|s| !hidden.contains(&s.id))
            .filter(|s| scope.enumerate || scope.ids.iter().any(|id| case.matches(id, &s.id)))
            .cloned()
            .collect())
    }

    fn read_one(&self, id: &str) -> Result<LiveResourceState, ProviderError> {
        if self.read_failures.lock().unwrap().contains(id) {
            return Err(ProviderError::Read {
                resource_id: id.to_string(),
                reason: "read refused".into(),
            });
        }
        Ok(self
            .get(id)
            .map_or_else(|| LiveResourceState::absent(id), |a| LiveResourceState::present(id, a)))
    }

    fn apply(&self, op: &DiffOp, _ctx: &ApplyContext<'_>) -> Result<Applied, ApplyError> {
        if let Some((error, remaining)) = self.faults.lock().unwrap().get_mut(&op.resource_id)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(error.clone());
        }

        let case = self.subsystem.id_case();
        let mut state = self.state.lock().unwrap();
        let position = state.iter().position(|s| case.matches(&s.id, &op.resource_id));

        let applied = match op.kind {
            DiffKind::Noop => Applied::Unchanged,
            DiffKind::Create | DiffKind::Update => {
                let target = op.after.clone().unwrap_or_default();
                match position {
                    Some(i) if state[i].attributes == target => Applied::Unchanged,
                    Some(i) => {
                        state[i].attributes = target;
                        Applied::Changed
                    }
                    None => {
                        state.push(LiveResourceState::present(&op.resource_id, target));
                        Applied::Changed
                    }
                }
            }
            DiffKind::Delete => match position {
                Some(i) => {
                    state.remove(i);
                    Applied::Changed
                }
                None => Applied::Unchanged,
            },
        };

        if applied == Applied::Changed {
            self.log
                .lock()
                .unwrap()
                .push(format!("{} {} {}", op.kind, self.subsystem, op.resource_id));
        }
        if let Some(error) = self.late_faults.lock().unwrap().remove(&op.resource_id) {
            return Err(error);
        }
        Ok(applied)
    }

    fn concurrent_safe(&self) -> bool {
        self.concurrent
    }
}
