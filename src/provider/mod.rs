//! Host providers - one per subsystem, all backed by a winkit [`Backend`]
//!
//! Every subsystem shares the same read/diff/apply machinery in
//! [`HostProvider`]; what differs per subsystem lives in a small
//! [`SubsystemRules`] implementation:
//! - which winkit record kind it manages
//! - how live and declared attributes are normalized before comparison
//! - preconditions and defaults applied to a target state before writing
//! - whether its ops may run in parallel

mod environment;
mod firewall;
mod permissions;
mod registry;
mod services;
mod software;
mod startup;
mod users;

pub use environment::EnvironmentRules;
pub use firewall::FirewallRules;
pub use permissions::PermissionRules;
pub use registry::RegistryRules;
pub use services::ServiceRules;
pub use software::SoftwareRules;
pub use startup::StartupRules;
pub use users::UserRules;

use declarative::{
    ApplyContext, ApplyError, Applied, Attributes, DiffKind, DiffOp, LiveResourceState, Provider,
    ProviderError, ProviderRegistry, Scope, Section, Subsystem, compute_diff,
};
use serde_json::{Value, json};
use std::marker::PhantomData;
use std::sync::Arc;
use winkit::{Backend, ListFilter, Record, RecordKind};

/// What makes one subsystem different from the others
pub trait SubsystemRules: Send + Sync + 'static {
    const SUBSYSTEM: Subsystem;
    const KIND: RecordKind;

    /// Ops touch independent host objects and may run in parallel
    const CONCURRENT_SAFE: bool = false;

    /// Bring attributes into canonical form; applied to live and declared
    /// attributes alike so that equal configurations compare equal.
    fn normalize(_attributes: &mut Attributes) {}

    /// Check and complete a target state before it is written
    fn prepare(_kind: DiffKind, _id: &str, _target: &mut Attributes) -> Result<(), ApplyError> {
        Ok(())
    }
}

/// Provider for one subsystem over a shared host backend
pub struct HostProvider<R> {
    backend: Arc<dyn Backend>,
    rules: PhantomData<R>,
}

impl<R: SubsystemRules> HostProvider<R> {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            rules: PhantomData,
        }
    }

    fn live_state(record: &Record) -> LiveResourceState {
        let mut attributes = record.to_attributes();
        R::normalize(&mut attributes);
        LiveResourceState::present(record.id(), attributes)
    }

    fn target_record(&self, op: &DiffOp) -> Result<Record, ApplyError> {
        let mut target = op.after.clone().ok_or_else(|| {
            ApplyError::Permanent(format!("{} has no target state", op.resource_id))
        })?;
        R::prepare(op.kind, &op.resource_id, &mut target)?;
        Record::from_attributes(R::KIND, &op.resource_id, &target).map_err(apply_error)
    }

    fn write(&self, op: &DiffOp, ctx: &ApplyContext<'_>) -> Result<Applied, ApplyError> {
        let record = self.target_record(op)?;
        let current = self
            .backend
            .get(R::KIND, &op.resource_id)
            .map_err(apply_error)?;
        if current.as_ref() == Some(&record) {
            log::debug!("{} {}: already converged", R::SUBSYSTEM, op.resource_id);
            return Ok(Applied::Unchanged);
        }
        self.backend
            .put(&record, ctx.timeout)
            .map_err(apply_error)?;
        Ok(Applied::Changed)
    }

    fn delete(&self, op: &DiffOp, ctx: &ApplyContext<'_>) -> Result<Applied, ApplyError> {
        match self.backend.remove(R::KIND, &op.resource_id, ctx.timeout) {
            Ok(()) => Ok(Applied::Changed),
            Err(winkit::Error::NotFound { .. }) => Ok(Applied::Unchanged),
            Err(e) => Err(apply_error(e)),
        }
    }
}

impl<R: SubsystemRules> Provider for HostProvider<R> {
    fn subsystem(&self) -> Subsystem {
        R::SUBSYSTEM
    }

    /// Declared resources the host holds in a form that cannot be modelled
    /// are left out with a warning; `read_one` keeps failing for them.
    fn read_live(&self, scope: &Scope) -> Result<Vec<LiveResourceState>, ProviderError> {
        let mut filter = ListFilter {
            ids: scope.ids.clone(),
            enumerate: scope.enumerate,
        };
        let records = match self.backend.list(R::KIND, &filter) {
            Err(winkit::Error::Unrepresentable(objects)) => {
                for object in &objects {
                    log::warn!("{}: leaving out {object}", R::SUBSYSTEM);
                }
                filter
                    .ids
                    .retain(|id| !objects.iter().any(|o| R::KIND.ids_equal(&o.id, id)));
                self.backend.list(R::KIND, &filter)
            }
            listed => listed,
        }
        .map_err(|e| provider_error(R::SUBSYSTEM, "*", e))?;
        log::debug!("{}: {} live records", R::SUBSYSTEM, records.len());
        Ok(records.iter().map(Self::live_state).collect())
    }

    fn read_one(&self, id: &str) -> Result<LiveResourceState, ProviderError> {
        match self.backend.get(R::KIND, id) {
            Ok(Some(record)) => Ok(Self::live_state(&record)),
            Ok(None) => Ok(LiveResourceState::absent(id)),
            Err(e) => Err(provider_error(R::SUBSYSTEM, id, e)),
        }
    }

    fn diff(&self, desired: &Section, live: &[LiveResourceState]) -> Vec<DiffOp> {
        let mut desired = desired.clone();
        for resource in &mut desired.resources {
            R::normalize(&mut resource.attributes);
        }
        compute_diff(&desired, live)
    }

    fn apply(&self, op: &DiffOp, ctx: &ApplyContext<'_>) -> Result<Applied, ApplyError> {
        if ctx.cancel.is_cancelled() {
            return Err(ApplyError::Cancelled);
        }
        match op.kind {
            DiffKind::Create | DiffKind::Update => self.write(op, ctx),
            DiffKind::Delete => self.delete(op, ctx),
            DiffKind::Noop => Ok(Applied::Unchanged),
        }
    }

    /// Snapshots carry the typed host record, so a payload that no longer
    /// parses is caught before anything is written back.
    fn encode_snapshot(&self, state: &LiveResourceState) -> Result<Value, ProviderError> {
        if !state.exists {
            return Ok(json!({ "absent": state.id }));
        }
        let record = Record::from_attributes(R::KIND, &state.id, &state.attributes)
            .map_err(|e| ProviderError::Payload(e.to_string()))?;
        serde_json::to_value(record).map_err(|e| ProviderError::Payload(e.to_string()))
    }

    fn decode_snapshot(&self, payload: &Value) -> Result<LiveResourceState, ProviderError> {
        if let Some(id) = payload.get("absent").and_then(Value::as_str) {
            return Ok(LiveResourceState::absent(id));
        }
        let record: Record = serde_json::from_value(payload.clone())
            .map_err(|e| ProviderError::Payload(e.to_string()))?;
        if record.kind() != R::KIND {
            return Err(ProviderError::Payload(format!(
                "expected a {} snapshot, found a {}",
                R::KIND,
                record.kind()
            )));
        }
        Ok(Self::live_state(&record))
    }

    fn concurrent_safe(&self) -> bool {
        R::CONCURRENT_SAFE
    }
}

/// Register a provider for every subsystem over one backend
pub fn build_registry(backend: Arc<dyn Backend>) -> ProviderRegistry {
    ProviderRegistry::new()
        .with(Box::new(HostProvider::<UserRules>::new(backend.clone())))
        .with(Box::new(HostProvider::<EnvironmentRules>::new(backend.clone())))
        .with(Box::new(HostProvider::<RegistryRules>::new(backend.clone())))
        .with(Box::new(HostProvider::<PermissionRules>::new(backend.clone())))
        .with(Box::new(HostProvider::<SoftwareRules>::new(backend.clone())))
        .with(Box::new(HostProvider::<ServiceRules>::new(backend.clone())))
        .with(Box::new(HostProvider::<FirewallRules>::new(backend.clone())))
        .with(Box::new(HostProvider::<StartupRules>::new(backend)))
}

/// Map a host error onto the retry classification of the engine
fn apply_error(error: winkit::Error) -> ApplyError {
    match error {
        winkit::Error::Transient { message } => ApplyError::Transient(message),
        winkit::Error::AccessDenied { message } => ApplyError::AccessDenied(message),
        winkit::Error::Timeout(after) => ApplyError::Timeout(after),
        other => ApplyError::Permanent(other.to_string()),
    }
}

fn provider_error(subsystem: Subsystem, id: &str, error: winkit::Error) -> ProviderError {
    match error {
        winkit::Error::Unavailable { message } => ProviderError::Unavailable {
            subsystem,
            reason: message,
        },
        winkit::Error::AccessDenied { message } => ProviderError::AccessDenied(message),
        other => ProviderError::Read {
            resource_id: id.to_string(),
            reason: other.to_string(),
        },
    }
}

/// Set `key` unless the target already has a non-null value for it
fn default_attribute(target: &mut Attributes, key: &str, value: Value) {
    if target.get(key).is_none_or(Value::is_null) {
        target.insert(key.to_string(), value);
    }
}
