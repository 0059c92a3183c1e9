//! Reconciliation engine - drives providers in dependency order
//!
//! A run moves through `Validating -> Reconciling -> (Diffing ->
//! Snapshotting -> Applying) per provider -> [RollingBack] -> Reported`.
//! Providers always run one after another; ops of a concurrent-safe provider
//! may be spread over a bounded rayon pool under best-effort runs.

use crate::backup::{BackupStore, JournalEntry, RunId};
use crate::context::{
    AllowAll, CancelToken, NoObserver, OpEvent, OpTransition, PrivilegeCheck, RunObserver,
    RunPhase,
};
use crate::diff::{DiffKind, DiffOp, DiffSummary};
use crate::error::{ApplyError, EngineError, SnapshotError};
use crate::provider::{ApplyContext, Applied, Provider, ProviderRegistry, Scope, apply_with_retry};
use crate::report::{ApplyResult, ProviderSection, Report, SectionOutcome};
use crate::retry::{RetryCallback, RetryConfig};
use crate::schema::document_schema;
use crate::types::{ConfigDocument, FailurePolicy, Section, Subsystem};
use crate::validate::validate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Tuning shared by every run of an engine
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub retry: RetryConfig,
    /// Per-call timeout for subsystems without an override
    pub default_timeout: Duration,
    pub timeouts: BTreeMap<Subsystem, Duration>,
    /// Worker threads for concurrent-safe providers (1 = sequential)
    pub jobs: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        let timeouts = BTreeMap::from([
            (Subsystem::Software, Duration::from_secs(600)),
            (Subsystem::Services, Duration::from_secs(120)),
        ]);
        Self {
            retry: RetryConfig::default(),
            default_timeout: Duration::from_secs(60),
            timeouts,
            jobs: 1,
        }
    }
}

impl RunOptions {
    pub fn timeout_for(&self, subsystem: Subsystem) -> Duration {
        self.timeouts
            .get(&subsystem)
            .copied()
            .unwrap_or(self.default_timeout)
    }
}

/// Diff-only preview of one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedSection {
    pub subsystem: Subsystem,
    pub ops: Vec<DiffOp>,
    /// Live read failure, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PlannedSection {
    pub fn summary(&self) -> DiffSummary {
        DiffSummary::from_ops(&self.ops)
    }
}

/// Why the rest of a run is not attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Halt {
    Failed,
    Cancelled,
    MissingPrivileges,
}

impl Halt {
    fn reason(self) -> &'static str {
        match self {
            Self::Failed => "run aborted after an earlier failure",
            Self::Cancelled => "run cancelled",
            Self::MissingPrivileges => "run aborted: missing privileges",
        }
    }
}

/// Mutable state of one run
struct RunState {
    run_id: RunId,
    policy: FailurePolicy,
    journal: Mutex<Vec<JournalEntry>>,
    /// Set once any mutating op has been attempted
    mutated: AtomicBool,
    halt: Option<Halt>,
}

/// Drives one reconciliation at a time over a set of providers
pub struct Engine<'a> {
    providers: &'a ProviderRegistry,
    backups: &'a BackupStore,
    privileges: &'a dyn PrivilegeCheck,
    observer: &'a dyn RunObserver,
    options: RunOptions,
}

impl<'a> Engine<'a> {
    pub fn new(providers: &'a ProviderRegistry, backups: &'a BackupStore) -> Self {
        Self {
            providers,
            backups,
            privileges: &AllowAll,
            observer: &NoObserver,
            options: RunOptions::default(),
        }
    }

    pub fn with_privileges(mut self, privileges: &'a dyn PrivilegeCheck) -> Self {
        self.privileges = privileges;
        self
    }

    pub fn with_observer(mut self, observer: &'a dyn RunObserver) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Validate a raw document, then reconcile it.
    ///
    /// Validation failures are reported (`VALIDATION_FAILED`), not raised;
    /// no provider is touched.
    pub fn reconcile_raw(
        &self,
        raw: &Value,
        policy: FailurePolicy,
        cancel: &CancelToken,
    ) -> Result<Report, EngineError> {
        self.observer.on_phase(RunPhase::Validating);
        match validate(raw) {
            Ok(document) => self.reconcile(&document, policy, cancel),
            Err(errors) => {
                log::warn!("Document rejected: {errors}");
                self.observer.on_phase(RunPhase::ValidationFailed);
                let report = Report::validation_failed(errors.into_vec(), policy);
                self.observer.on_phase(RunPhase::Reported);
                Ok(report)
            }
        }
    }

    /// Converge the host towards a validated document
    pub fn reconcile(
        &self,
        document: &ConfigDocument,
        policy: FailurePolicy,
        cancel: &CancelToken,
    ) -> Result<Report, EngineError> {
        self.check_providers(document)?;
        self.observer.on_phase(RunPhase::Reconciling);

        let run_id = self.backups.next_run_id()?;
        log::info!(
            "Run {run_id}: {} resource(s) in {} section(s), {policy}",
            document.resource_count(),
            document.sections().len()
        );

        let mut report = Report::new(run_id.clone(), policy);
        let mut run = RunState {
            run_id,
            policy,
            journal: Mutex::new(Vec::new()),
            mutated: AtomicBool::new(false),
            halt: None,
        };

        let missing: Vec<Subsystem> = document
            .subsystems()
            .into_iter()
            .filter(|s| !self.privileges.has_required_privilege(*s))
            .collect();
        for subsystem in &missing {
            log::warn!("Missing privilege to manage {subsystem}");
            report.push_missing_privilege(*subsystem);
        }
        if policy == FailurePolicy::FailFast && !missing.is_empty() {
            run.halt = Some(Halt::MissingPrivileges);
        }

        for section in document.ordered_sections() {
            let subsystem = section.subsystem;
            if missing.contains(&subsystem) {
                report.push_section(ProviderSection::without_ops(
                    subsystem,
                    SectionOutcome::PermissionDenied {
                        reason: format!("missing privilege to manage {subsystem}"),
                    },
                ));
                continue;
            }
            if run.halt.is_none() && cancel.is_cancelled() {
                run.halt = Some(Halt::Cancelled);
            }
            if let Some(halt) = run.halt {
                report.push_section(ProviderSection::without_ops(
                    subsystem,
                    SectionOutcome::NotAttempted {
                        reason: halt.reason().to_string(),
                    },
                ));
                continue;
            }

            let provider = self.provider(subsystem)?;
            report.push_section(self.reconcile_section(provider, section, &mut run, cancel)?);
        }

        if run.halt == Some(Halt::Cancelled) {
            report.mark_cancelled();
        }

        let roll_back = policy == FailurePolicy::FailFast
            && match run.halt {
                Some(Halt::Failed) => true,
                Some(Halt::Cancelled) => run.mutated.load(Ordering::SeqCst),
                _ => false,
            };

        if roll_back {
            self.observer.on_phase(RunPhase::RollingBack);
            let entries = run
                .journal
                .into_inner()
                .unwrap_or_else(PoisonError::into_inner);
            log::warn!("Rolling back {} change(s) of run {}", entries.len(), run.run_id);
            for record in self.backups.rollback_entries(
                &run.run_id,
                &entries,
                self.providers,
                &self.options,
                self.observer,
            ) {
                report.push_rollback(record);
            }
        }

        let aborted = roll_back || run.halt == Some(Halt::MissingPrivileges);
        let report = report.finish(aborted);
        log::info!("Run finished: {}", report.status());
        self.observer.on_phase(RunPhase::Reported);
        Ok(report)
    }

    /// Diff every section without snapshotting or applying.
    ///
    /// Live reads of distinct subsystems run in parallel.
    pub fn plan(&self, document: &ConfigDocument) -> Result<Vec<PlannedSection>, EngineError> {
        self.check_providers(document)?;
        document
            .ordered_sections()
            .par_iter()
            .map(|section| {
                let subsystem = section.subsystem;
                let provider = self.provider(subsystem)?;
                match provider.read_live(&Scope::of(section)) {
                    Ok(live) => {
                        let ops = provider.diff(section, &live);
                        check_ops(section, &ops)?;
                        Ok(PlannedSection {
                            subsystem,
                            ops,
                            error: None,
                        })
                    }
                    Err(e) => Ok(PlannedSection {
                        subsystem,
                        ops: Vec::new(),
                        error: Some(e.to_string()),
                    }),
                }
            })
            .collect()
    }

    // ------------------------------------------------------------------------

    fn provider(&self, subsystem: Subsystem) -> Result<&'a dyn Provider, EngineError> {
        self.providers
            .get(subsystem)
            .ok_or_else(|| EngineError::Invariant(format!("no provider registered for {subsystem}")))
    }

    fn check_providers(&self, document: &ConfigDocument) -> Result<(), EngineError> {
        for subsystem in document.subsystems() {
            self.provider(subsystem)?;
        }
        Ok(())
    }

    fn reconcile_section(
        &self,
        provider: &dyn Provider,
        section: &Section,
        run: &mut RunState,
        cancel: &CancelToken,
    ) -> Result<ProviderSection, EngineError> {
        let subsystem = section.subsystem;
        self.observer.on_phase(RunPhase::Diffing(subsystem));

        let live = match provider.read_live(&Scope::of(section)) {
            Ok(live) => live,
            Err(e) => {
                log::warn!("{subsystem}: {e}");
                if run.policy == FailurePolicy::FailFast {
                    run.halt = Some(Halt::Failed);
                }
                return Ok(ProviderSection::without_ops(
                    subsystem,
                    SectionOutcome::Unavailable {
                        reason: e.to_string(),
                    },
                ));
            }
        };

        let ops = provider.diff(section, &live);
        check_ops(section, &ops)?;
        for op in &ops {
            self.emit(op, OpTransition::Planned);
        }
        log::debug!("{subsystem}: {:?}", DiffSummary::from_ops(&ops));

        if ops.iter().any(|op| op.kind.is_destructive()) {
            self.observer.on_phase(RunPhase::Snapshotting(subsystem));
        }
        self.observer.on_phase(RunPhase::Applying(subsystem));

        let mutating = ops.iter().filter(|op| op.kind.is_mutating()).count();
        let parallel = provider.concurrent_safe()
            && run.policy == FailurePolicy::BestEffort
            && self.options.jobs > 1
            && mutating > 1;

        let results = if parallel {
            self.apply_parallel(provider, &ops, run, cancel)
        } else {
            self.apply_sequential(provider, &ops, run, cancel)
        };

        let mut out = ProviderSection::new(subsystem, ops);
        for result in results {
            out.push(result);
        }
        Ok(out)
    }

    fn apply_sequential(
        &self,
        provider: &dyn Provider,
        ops: &[DiffOp],
        run: &mut RunState,
        cancel: &CancelToken,
    ) -> Vec<ApplyResult> {
        let mut results = Vec::with_capacity(ops.len());
        for op in ops {
            if run.halt.is_none() && cancel.is_cancelled() {
                log::warn!("Cancellation requested; stopping after the current op");
                run.halt = Some(Halt::Cancelled);
            }
            if let Some(halt) = run.halt {
                results.push(self.abort(op, halt));
                continue;
            }

            let result = self.apply_op(provider, op, run, cancel);
            if result.outcome.is_failed() && run.policy == FailurePolicy::FailFast {
                run.halt = Some(Halt::Failed);
            }
            results.push(result);
        }
        results
    }

    fn apply_parallel(
        &self,
        provider: &dyn Provider,
        ops: &[DiffOp],
        run: &mut RunState,
        cancel: &CancelToken,
    ) -> Vec<ApplyResult> {
        let shared: &RunState = run;
        let work = || {
            ops.par_iter()
                .map(|op| {
                    if cancel.is_cancelled() {
                        self.abort(op, Halt::Cancelled)
                    } else {
                        self.apply_op(provider, op, shared, cancel)
                    }
                })
                .collect::<Vec<_>>()
        };

        let results = match rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.jobs)
            .build()
        {
            Ok(pool) => pool.install(work),
            Err(e) => {
                log::warn!("Failed to build thread pool ({e}); using the global pool");
                work()
            }
        };

        if cancel.is_cancelled() && run.halt.is_none() {
            run.halt = Some(Halt::Cancelled);
        }
        results
    }

    /// Snapshot (if destructive), apply with retry, journal
    fn apply_op(
        &self,
        provider: &dyn Provider,
        op: &DiffOp,
        run: &RunState,
        cancel: &CancelToken,
    ) -> ApplyResult {
        if !op.kind.is_mutating() {
            self.emit(op, OpTransition::Succeeded { changed: false });
            return ApplyResult::succeeded(op, false, 0);
        }

        let snapshot_id = match self.prepare_undo(provider, op, run) {
            Ok(snapshot_id) => {
                if let Some(id) = &snapshot_id {
                    self.emit(
                        op,
                        OpTransition::Snapshotted {
                            snapshot_id: id.clone(),
                        },
                    );
                }
                snapshot_id
            }
            Err(reason) => {
                self.emit(
                    op,
                    OpTransition::Skipped {
                        reason: reason.clone(),
                    },
                );
                return ApplyResult::skipped(op, reason);
            }
        };

        run.mutated.store(true, Ordering::SeqCst);
        let ctx = ApplyContext::new(&run.run_id, self.options.timeout_for(op.subsystem), cancel);
        self.emit(op, OpTransition::Applying { attempt: 1 });
        let retries = RetryEvents { engine: self, op };
        let attempted = apply_with_retry(provider, op, &ctx, &self.options.retry, Some(&retries));

        let result = match attempted.result {
            Ok(applied) => {
                let changed = applied == Applied::Changed;
                self.emit(op, OpTransition::Succeeded { changed });
                ApplyResult::succeeded(op, changed, attempted.attempts)
            }
            Err(e) => {
                let reason = e.to_string();
                self.emit(
                    op,
                    OpTransition::Failed {
                        reason: reason.clone(),
                    },
                );
                ApplyResult::failed(op, reason, attempted.attempts)
            }
        };
        result.with_snapshot(snapshot_id)
    }

    /// Journal how to undo `op` before it runs; the error is the skip reason.
    ///
    /// Destructive ops snapshot the prior state. A CREATE re-reads the
    /// resource: still absent, it is journaled as created up front; present
    /// after all (the live read missed it), it is snapshotted like an update.
    fn prepare_undo(
        &self,
        provider: &dyn Provider,
        op: &DiffOp,
        run: &RunState,
    ) -> Result<Option<String>, String> {
        if op.kind.is_destructive() {
            return self.take_snapshot(provider, op, run).map(Some);
        }
        let current = provider
            .read_one(&op.resource_id)
            .map_err(|e| format!("could not confirm it is absent: {e}"))?;
        if current.exists {
            log::warn!(
                "{} '{}' exists although the live read did not report it",
                op.subsystem,
                op.resource_id
            );
            return self.take_snapshot(provider, op, run).map(Some);
        }
        self.journal(
            run,
            JournalEntry::Created {
                subsystem: op.subsystem,
                resource_id: op.resource_id.clone(),
            },
        )
        .map_err(|e| format!("backup failed: {e}"))?;
        Ok(None)
    }

    /// Capture and journal the prior state; the error is the skip reason
    fn take_snapshot(&self, provider: &dyn Provider, op: &DiffOp, run: &RunState) -> Result<String, String> {
        let snapshot = self
            .backups
            .snapshot(provider, &op.resource_id, &run.run_id)
            .map_err(|e| format!("backup failed: {e}"))?;
        self.journal(
            run,
            JournalEntry::Snapshot {
                snapshot_id: snapshot.id.clone(),
                subsystem: snapshot.subsystem,
                resource_id: snapshot.resource_id.clone(),
            },
        )
        .map_err(|e| format!("backup failed: {e}"))?;
        Ok(snapshot.id)
    }

    fn journal(&self, run: &RunState, entry: JournalEntry) -> Result<(), SnapshotError> {
        let mut journal = run.journal.lock().unwrap_or_else(PoisonError::into_inner);
        self.backups.record(&run.run_id, entry.clone())?;
        journal.push(entry);
        Ok(())
    }

    fn abort(&self, op: &DiffOp, halt: Halt) -> ApplyResult {
        self.emit(
            op,
            OpTransition::Aborted {
                reason: halt.reason().to_string(),
            },
        );
        ApplyResult::aborted(op, halt.reason())
    }

    fn emit(&self, op: &DiffOp, transition: OpTransition) {
        self.observer.on_op(&OpEvent {
            subsystem: op.subsystem,
            resource_id: op.resource_id.clone(),
            kind: op.kind,
            transition,
        });
    }
}

/// Structural checks on a provider's diff output
fn check_ops(section: &Section, ops: &[DiffOp]) -> Result<(), EngineError> {
    let schema = document_schema();
    for op in ops {
        if op.subsystem != section.subsystem {
            return Err(EngineError::Invariant(format!(
                "{} provider produced an op for {}",
                section.subsystem, op.subsystem
            )));
        }
        if !schema.is_valid_id(op.subsystem, &op.resource_id) {
            return Err(EngineError::Invariant(format!(
                "{} op references invalid id '{}'",
                op.subsystem, op.resource_id
            )));
        }
        if op.kind == DiffKind::Delete && !section.authoritative {
            return Err(EngineError::Invariant(format!(
                "DELETE of {} '{}' in a non-authoritative section",
                op.subsystem, op.resource_id
            )));
        }
        if matches!(op.kind, DiffKind::Create | DiffKind::Update) && op.after.is_none() {
            return Err(EngineError::Invariant(format!(
                "{} of {} '{}' has no target state",
                op.kind, op.subsystem, op.resource_id
            )));
        }
    }
    Ok(())
}

/// Turns retries into observer events
struct RetryEvents<'e, 'a> {
    engine: &'e Engine<'a>,
    op: &'e DiffOp,
}

impl RetryCallback for RetryEvents<'_, '_> {
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &ApplyError, delay: Duration) {
        log::debug!(
            "{} '{}': attempt {attempt}/{max_attempts} failed: {error}",
            self.op.subsystem,
            self.op.resource_id
        );
        self.engine.emit(
            self.op,
            OpTransition::Retrying {
                attempt,
                delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                reason: error.to_string(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::report::{ApplyStatus, RunStatus};
    use crate::testing::{FakeProvider, MutationLog, attrs};
    use crate::types::LiveResourceState;
    use serde_json::json;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        backups: BackupStore,
        log: MutationLog,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let backups = BackupStore::open(dir.path().join("backups")).unwrap();
            Self {
                _dir: dir,
                backups,
                log: MutationLog::default(),
            }
        }

        fn provider(&self, subsystem: Subsystem) -> FakeProvider {
            FakeProvider::new(subsystem, &self.log)
        }

        fn mutations(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    fn fast_options() -> RunOptions {
        RunOptions {
            retry: RetryConfig {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                backoff_factor: 1.0,
                max_delay: Duration::from_millis(2),
            },
            ..RunOptions::default()
        }
    }

    fn doc(raw: Value) -> ConfigDocument {
        validate(&raw).unwrap()
    }

    /// Provider that is handed back to the test after registration
    struct Shared(std::sync::Arc<FakeProvider>);

    impl Provider for Shared {
        fn subsystem(&self) -> Subsystem {
            self.0.subsystem()
        }
        fn read_live(&self, scope: &Scope) -> Result<Vec<LiveResourceState>, ProviderError> {
            self.0.read_live(scope)
        }
        fn read_one(&self, id: &str) -> Result<LiveResourceState, ProviderError> {
            self.0.read_one(id)
        }
        fn apply(&self, op: &DiffOp, ctx: &ApplyContext<'_>) -> Result<Applied, ApplyError> {
            self.0.apply(op, ctx)
        }
        fn concurrent_safe(&self) -> bool {
            self.0.concurrent_safe()
        }
    }

    fn register(registry: &mut ProviderRegistry, provider: FakeProvider) -> std::sync::Arc<FakeProvider> {
        let shared = std::sync::Arc::new(provider);
        registry.register(Box::new(Shared(std::sync::Arc::clone(&shared))));
        shared
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<OpEvent>>,
        phases: Mutex<Vec<RunPhase>>,
        cancel_on_success: Option<CancelToken>,
    }

    impl RunObserver for Recorder {
        fn on_phase(&self, phase: RunPhase) {
            self.phases.lock().unwrap().push(phase);
        }
        fn on_op(&self, event: &OpEvent) {
            if let (Some(token), OpTransition::Succeeded { changed: true }) =
                (&self.cancel_on_success, &event.transition)
            {
                token.cancel();
            }
            self.events.lock().unwrap().push(event.clone());
        }
    }

    fn firewall_rule(id: &str, port: u16) -> Value {
        json!({"id": id, "direction": "inbound", "action": "allow", "port": port})
    }

    #[test]
    fn test_firewall_create_scenario() {
        let fx = Fixture::new();
        let mut registry = ProviderRegistry::new();
        let firewall = register(&mut registry, fx.provider(Subsystem::Firewall));

        let document = doc(json!({"firewall": {"resources": [firewall_rule("allow-http", 8080)]}}));
        let report = Engine::new(&registry, &fx.backups)
            .with_options(fast_options())
            .reconcile(&document, FailurePolicy::FailFast, &CancelToken::new())
            .unwrap();

        assert_eq!(report.status(), RunStatus::AllOk);
        let section = report.section(Subsystem::Firewall).unwrap();
        assert_eq!(section.counts.kinds.create, 1);
        assert_eq!(section.results[0].outcome, ApplyStatus::Succeeded);
        assert!(section.results[0].snapshot_id.is_none());
        assert_eq!(firewall.get("allow-http").unwrap()["port"], 8080);

        let run = report.run_id().unwrap();
        assert_eq!(
            fx.backups.journal(run).unwrap(),
            vec![JournalEntry::Created {
                subsystem: Subsystem::Firewall,
                resource_id: "allow-http".into()
            }]
        );
        assert!(fx.backups.list_snapshots(run).unwrap().is_empty());
    }

    #[test]
    fn test_authoritative_delete_then_restore() {
        let fx = Fixture::new();
        let mut registry = ProviderRegistry::new();
        let firewall = register(
            &mut registry,
            fx.provider(Subsystem::Firewall)
                .with_resource("allow-http", json!({"direction": "inbound", "action": "allow", "protocol": "tcp", "port": 8080, "enabled": true}))
                .with_resource("legacy-5000", json!({"direction": "inbound", "action": "allow", "protocol": "tcp", "port": 5000, "enabled": true})),
        );

        let document = doc(json!({"firewall": {"authoritative": true, "resources": [firewall_rule("allow-http", 8080)]}}));
        let engine = Engine::new(&registry, &fx.backups).with_options(fast_options());
        let report = engine
            .reconcile(&document, FailurePolicy::FailFast, &CancelToken::new())
            .unwrap();

        assert_eq!(report.status(), RunStatus::AllOk);
        let section = report.section(Subsystem::Firewall).unwrap();
        let delete = section
            .results
            .iter()
            .find(|r| r.kind == DiffKind::Delete)
            .unwrap();
        assert_eq!(delete.resource_id, "legacy-5000");
        let snapshot_id = delete.snapshot_id.clone().unwrap();
        assert!(firewall.get("legacy-5000").is_none());

        let snapshot = fx.backups.load(&snapshot_id).unwrap();
        assert!(snapshot.existed);
        let run = report.run_id().unwrap();
        let cancel = CancelToken::new();
        let ctx = ApplyContext::new(run, Duration::from_secs(5), &cancel);
        let restored = fx
            .backups
            .restore(&snapshot, registry.get(Subsystem::Firewall).unwrap(), &ctx, &engine.options().retry);
        assert!(restored.outcome.is_success());
        assert_eq!(firewall.get("legacy-5000").unwrap()["port"], 5000);
    }

    #[test]
    fn test_invalid_document_touches_no_provider() {
        let fx = Fixture::new();
        let mut registry = ProviderRegistry::new();
        register(&mut registry, fx.provider(Subsystem::Environment).unavailable());

        let report = Engine::new(&registry, &fx.backups)
            .reconcile_raw(
                &json!({"environment": {"resources": [{"id": "system:PATH", "value": ["a"]}]}}),
                FailurePolicy::FailFast,
                &CancelToken::new(),
            )
            .unwrap();

        assert_eq!(report.status(), RunStatus::ValidationFailed);
        assert_eq!(report.validation_errors()[0].path, "environment.resources[0].value");
        assert!(report.sections().is_empty());
        assert!(report.run_id().is_none());
        assert!(fx.backups.list_runs().unwrap().is_empty());
    }

    #[test]
    fn test_converged_host_yields_only_noops() {
        let fx = Fixture::new();
        let mut registry = ProviderRegistry::new();
        register(
            &mut registry,
            fx.provider(Subsystem::Environment)
                .with_resource("user:EDITOR", json!({"value": "vim", "expand": false})),
        );

        let document = doc(json!({"environment": {"resources": [{"id": "user:EDITOR", "value": "vim"}]}}));
        let report = Engine::new(&registry, &fx.backups)
            .reconcile(&document, FailurePolicy::FailFast, &CancelToken::new())
            .unwrap();

        assert_eq!(report.status(), RunStatus::AllOk);
        assert_eq!(report.counts().kinds.noop, 1);
        assert!(!report.counts().kinds.has_changes());
        assert!(fx.mutations().is_empty());
    }

    #[test]
    fn test_fail_fast_rolls_back_in_reverse_order() {
        let fx = Fixture::new();
        let mut registry = ProviderRegistry::new();
        let users = register(&mut registry, fx.provider(Subsystem::Users));
        let registry_provider = register(
            &mut registry,
            fx.provider(Subsystem::Registry)
                .with_resource("HKLM\\Software\\Acme\\A", json!({"type": "dword", "data": 1})),
        );
        let firewall = register(&mut registry, fx.provider(Subsystem::Firewall));
        registry_provider.fail_apply(
            "HKLM\\Software\\Acme\\C",
            ApplyError::AccessDenied("HKLM\\Software\\Acme".into()),
            1,
        );

        let document = doc(json!({
            "firewall": {"resources": [firewall_rule("allow-http", 8080)]},
            "registry": {"resources": [
                {"id": "HKLM\\Software\\Acme\\A", "type": "dword", "data": 2},
                {"id": "HKLM\\Software\\Acme\\B", "data": "x"},
                {"id": "HKLM\\Software\\Acme\\C", "data": "y"},
                {"id": "HKLM\\Software\\Acme\\D", "data": "z"}
            ]},
            "users": {"resources": [{"id": "svc-backup"}]}
        }));
        let report = Engine::new(&registry, &fx.backups)
            .with_options(fast_options())
            .reconcile(&document, FailurePolicy::FailFast, &CancelToken::new())
            .unwrap();

        assert_eq!(report.status(), RunStatus::Aborted);
        let section = report.section(Subsystem::Registry).unwrap();
        let statuses: Vec<&str> = section.results.iter().map(|r| r.outcome.label()).collect();
        assert_eq!(statuses, vec!["SUCCEEDED", "SUCCEEDED", "FAILED", "ABORTED"]);
        assert_eq!(section.results[2].attempts, 1);
        assert!(matches!(
            report.section(Subsystem::Firewall).unwrap().outcome,
            SectionOutcome::NotAttempted { .. }
        ));

        let rolled: Vec<&str> = report.rollback().iter().map(|r| r.resource_id.as_str()).collect();
        assert_eq!(
            rolled,
            vec![
                "HKLM\\Software\\Acme\\C",
                "HKLM\\Software\\Acme\\B",
                "HKLM\\Software\\Acme\\A",
                "svc-backup"
            ]
        );
        assert!(report.rollback().iter().all(|r| r.result.outcome.is_success()));

        // host is back where it started
        assert_eq!(registry_provider.get("HKLM\\Software\\Acme\\A").unwrap()["data"], 1);
        assert!(registry_provider.get("HKLM\\Software\\Acme\\B").is_none());
        assert!(users.ids().is_empty());
        assert!(firewall.ids().is_empty());
        assert_eq!(
            fx.mutations(),
            vec![
                "CREATE users svc-backup",
                "UPDATE registry HKLM\\Software\\Acme\\A",
                "CREATE registry HKLM\\Software\\Acme\\B",
                "DELETE registry HKLM\\Software\\Acme\\B",
                "UPDATE registry HKLM\\Software\\Acme\\A",
                "DELETE users svc-backup",
            ]
        );
    }

    #[test]
    fn test_best_effort_continues_past_failures() {
        let fx = Fixture::new();
        let mut registry = ProviderRegistry::new();
        let reg = register(&mut registry, fx.provider(Subsystem::Registry));
        let firewall = register(&mut registry, fx.provider(Subsystem::Firewall));
        reg.fail_apply(
            "HKCU\\Software\\Acme\\A",
            ApplyError::Permanent("invalid value".into()),
            1,
        );

        let document = doc(json!({
            "registry": {"resources": [
                {"id": "HKCU\\Software\\Acme\\A", "data": 1},
                {"id": "HKCU\\Software\\Acme\\B", "data": 2}
            ]},
            "firewall": {"resources": [firewall_rule("allow-http", 8080)]}
        }));
        let report = Engine::new(&registry, &fx.backups)
            .with_options(fast_options())
            .reconcile(&document, FailurePolicy::BestEffort, &CancelToken::new())
            .unwrap();

        assert_eq!(report.status(), RunStatus::Partial);
        assert!(report.rollback().is_empty());
        assert!(reg.get("HKCU\\Software\\Acme\\B").is_some());
        assert!(firewall.get("allow-http").is_some());
        let problems: Vec<_> = report.problems().collect();
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].1.outcome.reason(), Some("invalid value"));
    }

    #[test]
    fn test_failed_backup_skips_destructive_op() {
        let fx = Fixture::new();
        let mut registry = ProviderRegistry::new();
        let services = register(
            &mut registry,
            fx.provider(Subsystem::Services)
                .with_resource("Spooler", json!({"start_type": "automatic"})),
        );
        services.fail_read("Spooler");

        let document = doc(json!({"services": {"resources": [{"id": "Spooler", "start_type": "disabled"}]}}));
        let report = Engine::new(&registry, &fx.backups)
            .reconcile(&document, FailurePolicy::BestEffort, &CancelToken::new())
            .unwrap();

        let result = &report.section(Subsystem::Services).unwrap().results[0];
        assert!(matches!(&result.outcome, ApplyStatus::Skipped { reason } if reason.starts_with("backup failed:")));
        assert_eq!(services.get("Spooler").unwrap()["start_type"], "automatic");
        assert_eq!(report.status(), RunStatus::Partial);
    }

    #[test]
    fn test_create_over_unlisted_resource_is_backed_up() {
        let fx = Fixture::new();
        let mut registry = ProviderRegistry::new();
        let reg = register(
            &mut registry,
            fx.provider(Subsystem::Registry)
                .with_resource("HKCU\\Software\\Acme\\Legacy", json!({"type": "string", "data": "ORIGINAL"})),
        );
        reg.hide("HKCU\\Software\\Acme\\Legacy");
        reg.fail_apply(
            "HKCU\\Software\\Acme\\B",
            ApplyError::Permanent("invalid value".into()),
            1,
        );

        let document = doc(json!({"registry": {"resources": [
            {"id": "HKCU\\Software\\Acme\\Legacy", "data": "NEW"},
            {"id": "HKCU\\Software\\Acme\\B", "data": "x"}
        ]}}));
        let report = Engine::new(&registry, &fx.backups)
            .with_options(fast_options())
            .reconcile(&document, FailurePolicy::FailFast, &CancelToken::new())
            .unwrap();

        assert_eq!(report.status(), RunStatus::Aborted);
        let first = &report.section(Subsystem::Registry).unwrap().results[0];
        assert_eq!(first.kind, DiffKind::Create);
        assert!(first.snapshot_id.is_some());
        assert!(report.rollback().iter().all(|r| r.result.outcome.is_success()));
        assert_eq!(reg.get("HKCU\\Software\\Acme\\Legacy").unwrap()["data"], "ORIGINAL");
    }

    #[test]
    fn test_create_that_cannot_be_confirmed_absent_is_skipped() {
        let fx = Fixture::new();
        let mut registry = ProviderRegistry::new();
        let reg = register(
            &mut registry,
            fx.provider(Subsystem::Registry)
                .with_resource("HKCU\\Software\\Acme\\Legacy", json!({"type": "string", "data": "ORIGINAL"})),
        );
        reg.hide("HKCU\\Software\\Acme\\Legacy");
        reg.fail_read("HKCU\\Software\\Acme\\Legacy");

        let document = doc(json!({"registry": {"resources": [
            {"id": "HKCU\\Software\\Acme\\Legacy", "data": "NEW"}
        ]}}));
        let report = Engine::new(&registry, &fx.backups)
            .reconcile(&document, FailurePolicy::BestEffort, &CancelToken::new())
            .unwrap();

        let result = &report.section(Subsystem::Registry).unwrap().results[0];
        assert!(matches!(&result.outcome, ApplyStatus::Skipped { reason } if reason.starts_with("could not confirm")));
        assert_eq!(reg.get("HKCU\\Software\\Acme\\Legacy").unwrap()["data"], "ORIGINAL");
        assert!(fx.mutations().is_empty());
    }

    #[test]
    fn test_failed_create_is_rolled_back() {
        let fx = Fixture::new();
        let mut registry = ProviderRegistry::new();
        let env = register(&mut registry, fx.provider(Subsystem::Environment));
        env.fail_after_apply("user:B", ApplyError::Timeout(Duration::from_secs(60)));

        let document = doc(json!({"environment": {"resources": [
            {"id": "user:A", "value": "1"},
            {"id": "user:B", "value": "2"}
        ]}}));
        let report = Engine::new(&registry, &fx.backups)
            .with_options(fast_options())
            .reconcile(&document, FailurePolicy::FailFast, &CancelToken::new())
            .unwrap();

        assert_eq!(report.status(), RunStatus::Aborted);
        assert!(report.sections()[0].results[1].outcome.is_failed());
        let rolled: Vec<&str> = report.rollback().iter().map(|r| r.resource_id.as_str()).collect();
        assert_eq!(rolled, vec!["user:B", "user:A"]);
        assert!(env.ids().is_empty());
    }

    #[test]
    fn test_transient_failure_is_retried() {
        let fx = Fixture::new();
        let mut registry = ProviderRegistry::new();
        let startup = register(&mut registry, fx.provider(Subsystem::Startup));
        startup.fail_apply("Sync", ApplyError::Transient("file in use".into()), 2);
        let recorder = Recorder::default();

        let document = doc(json!({"startup": {"resources": [{"id": "Sync", "command": "C:\\sync.exe"}]}}));
        let report = Engine::new(&registry, &fx.backups)
            .with_options(fast_options())
            .with_observer(&recorder)
            .reconcile(&document, FailurePolicy::FailFast, &CancelToken::new())
            .unwrap();

        assert_eq!(report.status(), RunStatus::AllOk);
        assert_eq!(report.sections()[0].results[0].attempts, 3);
        let retries = recorder
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e.transition, OpTransition::Retrying { .. }))
            .count();
        assert_eq!(retries, 2);
    }

    #[test]
    fn test_timeout_fails_without_retry() {
        let fx = Fixture::new();
        let mut registry = ProviderRegistry::new();
        let software = register(&mut registry, fx.provider(Subsystem::Software));
        software.fail_apply("Git.Git", ApplyError::Timeout(Duration::from_secs(600)), 5);

        let document = doc(json!({"software": {"resources": [{"id": "Git.Git"}]}}));
        let report = Engine::new(&registry, &fx.backups)
            .with_options(fast_options())
            .reconcile(&document, FailurePolicy::BestEffort, &CancelToken::new())
            .unwrap();

        let result = &report.sections()[0].results[0];
        assert!(result.outcome.is_failed());
        assert_eq!(result.attempts, 1);
        assert_eq!(result.outcome.reason(), Some("timed out after 600s"));
    }

    #[test]
    fn test_unavailable_provider_under_best_effort() {
        let fx = Fixture::new();
        let mut registry = ProviderRegistry::new();
        register(&mut registry, fx.provider(Subsystem::Firewall).unavailable());
        let startup = register(&mut registry, fx.provider(Subsystem::Startup));

        let document = doc(json!({
            "firewall": {"resources": [firewall_rule("allow-http", 8080)]},
            "startup": {"resources": [{"id": "Sync", "command": "C:\\sync.exe"}]}
        }));
        let report = Engine::new(&registry, &fx.backups)
            .reconcile(&document, FailurePolicy::BestEffort, &CancelToken::new())
            .unwrap();

        assert_eq!(report.status(), RunStatus::Partial);
        assert!(matches!(
            report.section(Subsystem::Firewall).unwrap().outcome,
            SectionOutcome::Unavailable { .. }
        ));
        assert!(startup.get("Sync").is_some());
    }

    #[test]
    fn test_missing_privileges() {
        struct NoFirewall;
        impl PrivilegeCheck for NoFirewall {
            fn has_required_privilege(&self, subsystem: Subsystem) -> bool {
                subsystem != Subsystem::Firewall
            }
        }

        let document = doc(json!({
            "environment": {"resources": [{"id": "user:EDITOR", "value": "vim"}]},
            "firewall": {"resources": [firewall_rule("allow-http", 8080)]}
        }));

        // fail-fast: nothing is mutated
        let fx = Fixture::new();
        let mut registry = ProviderRegistry::new();
        register(&mut registry, fx.provider(Subsystem::Environment));
        register(&mut registry, fx.provider(Subsystem::Firewall));
        let report = Engine::new(&registry, &fx.backups)
            .with_privileges(&NoFirewall)
            .reconcile(&document, FailurePolicy::FailFast, &CancelToken::new())
            .unwrap();
        assert_eq!(report.status(), RunStatus::Aborted);
        assert_eq!(report.missing_privileges(), &[Subsystem::Firewall]);
        assert!(fx.mutations().is_empty());

        // best-effort: only the firewall is skipped
        let fx = Fixture::new();
        let mut registry = ProviderRegistry::new();
        let env = register(&mut registry, fx.provider(Subsystem::Environment));
        register(&mut registry, fx.provider(Subsystem::Firewall));
        let report = Engine::new(&registry, &fx.backups)
            .with_privileges(&NoFirewall)
            .reconcile(&document, FailurePolicy::BestEffort, &CancelToken::new())
            .unwrap();
        assert_eq!(report.status(), RunStatus::Partial);
        assert!(matches!(
            report.section(Subsystem::Firewall).unwrap().outcome,
            SectionOutcome::PermissionDenied { .. }
        ));
        assert!(env.get("user:EDITOR").is_some());
    }

    #[test]
    fn test_cancel_before_start_marks_everything_aborted() {
        let fx = Fixture::new();
        let mut registry = ProviderRegistry::new();
        let env = register(&mut registry, fx.provider(Subsystem::Environment));
        let cancel = CancelToken::new();
        cancel.cancel();

        let document = doc(json!({"environment": {"resources": [{"id": "user:EDITOR", "value": "vim"}]}}));
        let report = Engine::new(&registry, &fx.backups)
            .reconcile(&document, FailurePolicy::FailFast, &cancel)
            .unwrap();

        assert_eq!(report.status(), RunStatus::Partial);
        assert!(report.cancelled());
        assert!(report.rollback().is_empty());
        assert!(env.ids().is_empty());
    }

    #[test]
    fn test_cancel_mid_run_fail_fast_rolls_back() {
        let fx = Fixture::new();
        let mut registry = ProviderRegistry::new();
        let env = register(&mut registry, fx.provider(Subsystem::Environment));
        let cancel = CancelToken::new();
        let recorder = Recorder {
            cancel_on_success: Some(cancel.clone()),
            ..Recorder::default()
        };

        let document = doc(json!({"environment": {"resources": [
            {"id": "user:A", "value": "1"},
            {"id": "user:B", "value": "2"}
        ]}}));
        let report = Engine::new(&registry, &fx.backups)
            .with_observer(&recorder)
            .reconcile(&document, FailurePolicy::FailFast, &cancel)
            .unwrap();

        assert_eq!(report.status(), RunStatus::Aborted);
        assert!(report.cancelled());
        let results = &report.sections()[0].results;
        assert!(results[0].outcome.is_success());
        assert_eq!(results[1].outcome.label(), "ABORTED");
        assert_eq!(report.rollback().len(), 1);
        assert!(env.ids().is_empty());
        assert!(recorder.phases.lock().unwrap().contains(&RunPhase::RollingBack));
    }

    #[test]
    fn test_cancel_mid_run_best_effort_is_partial() {
        let fx = Fixture::new();
        let mut registry = ProviderRegistry::new();
        let env = register(&mut registry, fx.provider(Subsystem::Environment));
        let cancel = CancelToken::new();
        let recorder = Recorder {
            cancel_on_success: Some(cancel.clone()),
            ..Recorder::default()
        };

        let document = doc(json!({"environment": {"resources": [
            {"id": "user:A", "value": "1"},
            {"id": "user:B", "value": "2"}
        ]}}));
        let report = Engine::new(&registry, &fx.backups)
            .with_observer(&recorder)
            .reconcile(&document, FailurePolicy::BestEffort, &cancel)
            .unwrap();

        assert_eq!(report.status(), RunStatus::Partial);
        assert!(report.rollback().is_empty());
        assert_eq!(env.ids(), vec!["user:A"]);
    }

    #[test]
    fn test_concurrent_provider_keeps_diff_order() {
        let fx = Fixture::new();
        let mut registry = ProviderRegistry::new();
        let reg = register(&mut registry, fx.provider(Subsystem::Registry).concurrent());

        let resources: Vec<Value> = (0..16)
            .map(|i| json!({"id": format!("HKCU\\Software\\Acme\\V{i:02}"), "type": "dword", "data": i}))
            .collect();
        let document = doc(json!({"registry": {"resources": resources}}));
        let report = Engine::new(&registry, &fx.backups)
            .with_options(RunOptions {
                jobs: 4,
                ..fast_options()
            })
            .reconcile(&document, FailurePolicy::BestEffort, &CancelToken::new())
            .unwrap();

        assert_eq!(report.status(), RunStatus::AllOk);
        let ids: Vec<&str> = report.sections()[0]
            .results
            .iter()
            .map(|r| r.resource_id.as_str())
            .collect();
        let expected: Vec<String> = (0..16).map(|i| format!("HKCU\\Software\\Acme\\V{i:02}")).collect();
        assert_eq!(ids, expected.iter().map(String::as_str).collect::<Vec<_>>());
        assert_eq!(reg.ids().len(), 16);
    }

    #[test]
    fn test_rogue_delete_is_an_invariant_violation() {
        struct Rogue(FakeProvider);
        impl Provider for Rogue {
            fn subsystem(&self) -> Subsystem {
                self.0.subsystem()
            }
            fn read_live(&self, scope: &Scope) -> Result<Vec<LiveResourceState>, ProviderError> {
                self.0.read_live(scope)
            }
            fn read_one(&self, id: &str) -> Result<LiveResourceState, ProviderError> {
                self.0.read_one(id)
            }
            fn diff(&self, desired: &Section, _live: &[LiveResourceState]) -> Vec<DiffOp> {
                vec![DiffOp {
                    subsystem: desired.subsystem,
                    resource_id: "Spooler".into(),
                    kind: DiffKind::Delete,
                    before: Some(attrs(json!({}))),
                    after: None,
                }]
            }
            fn apply(&self, op: &DiffOp, ctx: &ApplyContext<'_>) -> Result<Applied, ApplyError> {
                self.0.apply(op, ctx)
            }
        }

        let fx = Fixture::new();
        let registry = ProviderRegistry::new().with(Box::new(Rogue(fx.provider(Subsystem::Services))));
        let document = doc(json!({"services": {"resources": [{"id": "W32Time", "start_type": "manual"}]}}));
        let err = Engine::new(&registry, &fx.backups)
            .reconcile(&document, FailurePolicy::BestEffort, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::Invariant(_)));
    }

    #[test]
    fn test_missing_provider_is_an_invariant_violation() {
        let fx = Fixture::new();
        let registry = ProviderRegistry::new();
        let document = doc(json!({"startup": {"resources": [{"id": "Sync", "command": "a.exe"}]}}));
        let err = Engine::new(&registry, &fx.backups)
            .reconcile(&document, FailurePolicy::FailFast, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::Invariant(_)));
    }

    #[test]
    fn test_plan_does_not_mutate() {
        let fx = Fixture::new();
        let mut registry = ProviderRegistry::new();
        register(
            &mut registry,
            fx.provider(Subsystem::Services)
                .with_resource("Spooler", json!({"start_type": "automatic"})),
        );
        register(&mut registry, fx.provider(Subsystem::Firewall).unavailable());

        let document = doc(json!({
            "services": {"resources": [{"id": "Spooler", "start_type": "disabled"}]},
            "firewall": {"resources": [firewall_rule("allow-http", 8080)]}
        }));
        let plan = Engine::new(&registry, &fx.backups).plan(&document).unwrap();

        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].subsystem, Subsystem::Services);
        assert_eq!(plan[0].summary().update, 1);
        assert!(plan[1].error.is_some());
        assert!(fx.mutations().is_empty());
        assert!(fx.backups.list_runs().unwrap().is_empty());
    }

    #[test]
    fn test_update_preserves_live_only_attributes() {
        let fx = Fixture::new();
        let mut registry = ProviderRegistry::new();
        let services = register(
            &mut registry,
            fx.provider(Subsystem::Services).with_resource(
                "Spooler",
                json!({"start_type": "automatic", "display_name": "Print Spooler"}),
            ),
        );
        let document = doc(json!({"services": {"resources": [{"id": "Spooler", "start_type": "disabled"}]}}));
        let report = Engine::new(&registry, &fx.backups)
            .reconcile(&document, FailurePolicy::FailFast, &CancelToken::new())
            .unwrap();

        assert_eq!(report.status(), RunStatus::AllOk);
        let live = services.get("Spooler").unwrap();
        assert_eq!(live["start_type"], "disabled");
        assert_eq!(live["display_name"], "Print Spooler");
        assert!(report.sections()[0].results[0].snapshot_id.is_some());
    }
}
