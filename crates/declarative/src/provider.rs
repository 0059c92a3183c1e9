//! Provider trait - the per-subsystem capability set the engine drives

use crate::backup::RunId;
use crate::context::CancelToken;
use crate::diff::{DiffOp, compute_diff};
use crate::error::{ApplyError, ProviderError};
use crate::retry::{Attempted, RetryCallback, RetryConfig, with_retry};
use crate::types::{LiveResourceState, Section, Subsystem};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// The part of a subsystem a live read must cover
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    /// Declared identifiers
    pub ids: Vec<String>,
    /// Also enumerate the provider's managed portion, so undeclared
    /// resources can be deleted
    pub enumerate: bool,
}

impl Scope {
    pub fn of(section: &Section) -> Self {
        Self {
            ids: section.ids(),
            enumerate: section.authoritative,
        }
    }
}

/// Per-call settings handed to [`Provider::apply`]
#[derive(Debug, Clone, Copy)]
pub struct ApplyContext<'a> {
    pub run_id: &'a RunId,
    /// Upper bound for one host call
    pub timeout: Duration,
    pub cancel: &'a CancelToken,
    /// 1-indexed attempt number
    pub attempt: u32,
}

impl<'a> ApplyContext<'a> {
    pub fn new(run_id: &'a RunId, timeout: Duration, cancel: &'a CancelToken) -> Self {
        Self {
            run_id,
            timeout,
            cancel,
            attempt: 1,
        }
    }

    pub fn with_attempt(self, attempt: u32) -> Self {
        Self { attempt, ..self }
    }
}

/// What an apply did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Changed,
    /// The host already matched (idempotent CREATE/DELETE)
    Unchanged,
}

/// A subsystem provider.
///
/// Implementations must be safe to share across threads; the engine may
/// apply ops of a [`concurrent_safe`](Provider::concurrent_safe) provider in
/// parallel.
pub trait Provider: Send + Sync {
    fn subsystem(&self) -> Subsystem;

    /// Read the live state of the portion of the subsystem covered by `scope`.
    ///
    /// Declared ids that do not exist may be omitted or returned as absent.
    fn read_live(&self, scope: &Scope) -> Result<Vec<LiveResourceState>, ProviderError>;

    /// Read one resource, for snapshots and restores
    fn read_one(&self, id: &str) -> Result<LiveResourceState, ProviderError>;

    /// Pure diff of desired against live state
    fn diff(&self, desired: &Section, live: &[LiveResourceState]) -> Vec<DiffOp> {
        compute_diff(desired, live)
    }

    /// Perform exactly one create, update or delete
    fn apply(&self, op: &DiffOp, ctx: &ApplyContext<'_>) -> Result<Applied, ApplyError>;

    /// Encode a live state as an opaque snapshot payload
    fn encode_snapshot(&self, state: &LiveResourceState) -> Result<Value, ProviderError> {
        serde_json::to_value(state).map_err(|e| ProviderError::Payload(e.to_string()))
    }

    fn decode_snapshot(&self, payload: &Value) -> Result<LiveResourceState, ProviderError> {
        serde_json::from_value(payload.clone()).map_err(|e| ProviderError::Payload(e.to_string()))
    }

    /// Whether ops may be applied in parallel
    fn concurrent_safe(&self) -> bool {
        false
    }
}

/// Apply one op, retrying transient failures
pub fn apply_with_retry(
    provider: &dyn Provider,
    op: &DiffOp,
    ctx: &ApplyContext<'_>,
    retry: &RetryConfig,
    callback: Option<&dyn RetryCallback>,
) -> Attempted<Applied> {
    with_retry(retry, ctx.cancel, callback, |attempt| {
        provider.apply(op, &ctx.with_attempt(attempt))
    })
}

/// Providers by subsystem
#[derive(Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<Subsystem, Box<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider, replacing any earlier one for its subsystem
    pub fn register(&mut self, provider: Box<dyn Provider>) {
        self.providers.insert(provider.subsystem(), provider);
    }

    pub fn with(mut self, provider: Box<dyn Provider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, subsystem: Subsystem) -> Option<&dyn Provider> {
        self.providers.get(&subsystem).map(|p| &**p)
    }

    pub fn subsystems(&self) -> Vec<Subsystem> {
        self.providers.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("subsystems", &self.subsystems())
            .finish()
    }
}
