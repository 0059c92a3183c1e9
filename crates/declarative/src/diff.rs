//! Diff computation - compare desired and live state

use crate::types::{Attributes, LiveResourceState, Section, Subsystem};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// What an operation does to a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiffKind {
    Create,
    Update,
    Delete,
    Noop,
}

impl DiffKind {
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Self::Noop)
    }

    /// Ops that overwrite or remove existing state need a snapshot first
    pub fn is_destructive(&self) -> bool {
        matches!(self, Self::Update | Self::Delete)
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Create => "+",
            Self::Update => "~",
            Self::Delete => "-",
            Self::Noop => "=",
        }
    }
}

impl fmt::Display for DiffKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Noop => "NOOP",
        })
    }
}

/// One planned change to one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffOp {
    pub subsystem: Subsystem,
    pub resource_id: String,
    pub kind: DiffKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Attributes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Attributes>,
}

impl DiffOp {
    /// Attributes whose value differs between `before` and `after`
    pub fn changed_attributes(&self) -> Vec<String> {
        match (&self.before, &self.after) {
            (Some(before), Some(after)) => after
                .iter()
                .filter(|(k, v)| before.get(*k) != Some(*v))
                .map(|(k, _)| k.clone())
                .collect(),
            (None, Some(after)) => after.keys().cloned().collect(),
            (Some(before), None) => before.keys().cloned().collect(),
            (None, None) => Vec::new(),
        }
    }
}

/// Compute the ops converging `live` towards `desired`.
///
/// Only attributes declared in the desired descriptor are compared; an
/// UPDATE keeps live-only attributes in its target state. Order is the
/// declared order, then live-only resources in enumeration order.
pub fn compute_diff(desired: &Section, live: &[LiveResourceState]) -> Vec<DiffOp> {
    let subsystem = desired.subsystem;
    let case = subsystem.id_case();

    let mut live_by_key: HashMap<String, &LiveResourceState> = HashMap::new();
    for state in live.iter().filter(|s| s.exists) {
        live_by_key.entry(case.key(&state.id)).or_insert(state);
    }

    let mut ops = Vec::with_capacity(desired.resources.len());
    let mut declared = HashSet::new();

    for resource in &desired.resources {
        let key = case.key(&resource.id);
        declared.insert(key.clone());

        let op = match live_by_key.get(&key) {
            None => DiffOp {
                subsystem,
                resource_id: resource.id.clone(),
                kind: DiffKind::Create,
                before: None,
                after: Some(resource.attributes.clone()),
            },
            Some(current) => {
                let differs = resource
                    .attributes
                    .iter()
                    .any(|(k, v)| current.attributes.get(k) != Some(v));
                if differs {
                    let mut target = current.attributes.clone();
                    for (k, v) in &resource.attributes {
                        target.insert(k.clone(), v.clone());
                    }
                    DiffOp {
                        subsystem,
                        resource_id: resource.id.clone(),
                        kind: DiffKind::Update,
                        before: Some(current.attributes.clone()),
                        after: Some(target),
                    }
                } else {
                    DiffOp {
                        subsystem,
                        resource_id: resource.id.clone(),
                        kind: DiffKind::Noop,
                        before: Some(current.attributes.clone()),
                        after: Some(current.attributes.clone()),
                    }
                }
            }
        };
        ops.push(op);
    }

    for state in live.iter().filter(|s| s.exists) {
        let key = case.key(&state.id);
        if !declared.insert(key) {
            continue;
        }
        let kind = if desired.authoritative {
            DiffKind::Delete
        } else {
            DiffKind::Noop
        };
        ops.push(DiffOp {
            subsystem,
            resource_id: state.id.clone(),
            kind,
            before: Some(state.attributes.clone()),
            after: (kind == DiffKind::Noop).then(|| state.attributes.clone()),
        });
    }

    ops
}

/// Op counts by kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub create: usize,
    pub update: usize,
    pub delete: usize,
    pub noop: usize,
}

impl DiffSummary {
    pub fn from_ops<'a>(ops: impl IntoIterator<Item = &'a DiffOp>) -> Self {
        let mut summary = Self::default();
        for op in ops {
            summary.add(op.kind);
        }
        summary
    }

    pub fn add(&mut self, kind: DiffKind) {
        match kind {
            DiffKind::Create => self.create += 1,
            DiffKind::Update => self.update += 1,
            DiffKind::Delete => self.delete += 1,
            DiffKind::Noop => self.noop += 1,
        }
    }

    pub fn merge(&mut self, other: &Self) {
        self.create += other.create;
        self.update += other.update;
        self.delete += other.delete;
        self.noop += other.noop;
    }

    /// Number of ops that change something
    pub fn changes(&self) -> usize {
        self.create + self.update + self.delete
    }

    pub fn has_changes(&self) -> bool {
        self.changes() > 0
    }
}
