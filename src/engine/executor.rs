//! Apply a document: plan, confirm, reconcile, report

use anyhow::Result;
use colored::Colorize;
use declarative::{
    ApplyStatus, CancelToken, ConfigDocument, Engine, FailurePolicy, PrivilegeCheck, Report,
    RollbackRecord, RunStatus, SectionOutcome, Subsystem, ValidationError,
};

use super::differ::{display_plan, display_privilege_boundary, subsystem_title};
use crate::host::Host;
use crate::progress::ProgressObserver;
use crate::ui;

/// Options for one apply
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    pub policy: FailurePolicy,
    /// Skip confirmation prompts
    pub yes: bool,
    pub verbose: bool,
    pub quiet: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            policy: FailurePolicy::FailFast,
            yes: false,
            verbose: false,
            quiet: false,
        }
    }
}

/// Reconcile `document` against the host.
///
/// Returns `None` when the user declines the plan.
pub fn execute(
    host: &Host,
    document: &ConfigDocument,
    opts: &ExecuteOptions,
    cancel: &CancelToken,
) -> Result<Option<Report>> {
    let privileges = host.privileges();
    let observer = if opts.quiet {
        ProgressObserver::hidden()
    } else {
        ProgressObserver::new(opts.verbose)
    };
    let engine = Engine::new(host.providers(), host.backups())
        .with_privileges(&privileges)
        .with_observer(&observer)
        .with_options(host.options().clone());

    // 1. Show what would change
    let plan = engine.plan(document)?;
    let changes: usize = plan.iter().map(|s| s.summary().changes()).sum();
    if !opts.quiet {
        if host.is_simulated() {
            ui::dim("Simulated host: nothing on this machine will change");
        }
        display_plan(&plan, opts.verbose);
        let missing: Vec<Subsystem> = document
            .subsystems()
            .into_iter()
            .filter(|s| !privileges.has_required_privilege(*s))
            .collect();
        display_privilege_boundary(&missing);
    }

    // 2. Confirm (unless --yes or nothing to do)
    if changes > 0 && !opts.yes && !confirm_proceed()? {
        println!();
        println!("  {} Aborted", "✗".red());
        return Ok(None);
    }

    // 3. Reconcile
    if !opts.quiet && changes > 0 {
        println!();
        println!(
            "  {} Applying {} ({})...",
            "→".cyan(),
            ui::plural(changes, "change"),
            opts.policy
        );
    }
    let report = engine.reconcile(document, opts.policy, cancel);
    observer.finish();
    let report = report?;

    if !opts.quiet {
        print_report(&report, opts.verbose);
    }
    Ok(Some(report))
}

/// Confirm with user
pub fn confirm_proceed() -> Result<bool> {
    use dialoguer::Confirm;

    let confirmed = Confirm::new()
        .with_prompt("Continue?")
        .default(true)
        .interact()?;

    Ok(confirmed)
}

/// Print a finished run
pub fn print_report(report: &Report, verbose: bool) {
    if report.status() == RunStatus::ValidationFailed {
        print_validation_errors(report.validation_errors());
        return;
    }

    println!();
    for section in report.sections() {
        let title = subsystem_title(section.subsystem);
        match &section.outcome {
            SectionOutcome::Completed => {
                let counts = &section.counts;
                if counts.kinds.has_changes() || counts.has_problems() || verbose {
                    println!(
                        "  {} {}: {} applied, {} unchanged",
                        if counts.has_problems() {
                            "⚠".yellow()
                        } else {
                            "✓".green()
                        },
                        title.bold(),
                        counts.succeeded.saturating_sub(counts.kinds.noop),
                        counts.kinds.noop
                    );
                }
            }
            SectionOutcome::Unavailable { reason } => {
                println!("  {} {}: unavailable ({reason})", "✗".red(), title.bold());
            }
            SectionOutcome::PermissionDenied { reason } => {
                println!("  {} {}: {reason}", "⊘".yellow(), title.bold());
            }
            SectionOutcome::NotAttempted { reason } => {
                println!("  {} {}: not attempted ({reason})", "○".dimmed(), title.bold());
            }
        }
    }

    let problems: Vec<_> = report.problems().collect();
    if !problems.is_empty() {
        println!();
        println!("  {}", "Problems:".bold());
        for (subsystem, result) in problems {
            println!(
                "    {} {} {}: {}",
                ui::outcome_symbol(&result.outcome),
                subsystem,
                result.resource_id,
                result.outcome.reason().unwrap_or_default()
            );
        }
    }

    if !report.rollback().is_empty() {
        print_rollback(report.rollback());
    }

    print_summary(report);
}

/// Print the records of a rollback
pub fn print_rollback(records: &[RollbackRecord]) {
    let restored = records.iter().filter(|r| r.result.outcome.is_success()).count();
    println!();
    println!(
        "  {} Rolled back {} of {}",
        "↺".yellow(),
        restored,
        ui::plural(records.len(), "change")
    );
    for record in records {
        let detail = match &record.result.outcome {
            ApplyStatus::Succeeded => record
                .snapshot_id
                .as_deref()
                .map_or_else(|| "removed".to_string(), |id| format!("restored from {id}")),
            other => other.reason().unwrap_or_default().to_string(),
        };
        println!(
            "    {} {} {}: {}",
            ui::outcome_symbol(&record.result.outcome),
            record.subsystem,
            record.resource_id,
            detail.dimmed()
        );
    }
}

/// Print every problem found in a rejected document
pub fn print_validation_errors(errors: &[ValidationError]) {
    println!();
    println!(
        "  {} Document rejected ({})",
        "✗".red().bold(),
        ui::plural(errors.len(), "error")
    );
    for error in errors {
        println!("    • {}: {}", error.path.bold(), error.reason);
    }
}

/// Print final summary
fn print_summary(report: &Report) {
    let counts = report.counts();
    println!();
    match report.status() {
        RunStatus::AllOk => {
            println!("  {} Configuration applied successfully!", "✓".green().bold());
        }
        RunStatus::Partial if report.cancelled() => {
            println!("  {} Run cancelled; remaining changes not applied", "⚠".yellow().bold());
        }
        RunStatus::Partial => {
            println!("  {} Configuration applied with errors", "⚠".yellow().bold());
        }
        RunStatus::Aborted if report.cancelled() => {
            println!("  {} Run cancelled and rolled back", "✗".red().bold());
        }
        RunStatus::Aborted => println!("  {} Run aborted", "✗".red().bold()),
        RunStatus::ValidationFailed => {}
    }

    if counts.kinds.create > 0 {
        println!("    • {} created", ui::plural(counts.kinds.create, "resource"));
    }
    if counts.kinds.update > 0 {
        println!("    • {} updated", ui::plural(counts.kinds.update, "resource"));
    }
    if counts.kinds.delete > 0 {
        println!("    • {} removed", ui::plural(counts.kinds.delete, "resource"));
    }
    if counts.skipped > 0 {
        println!("    • {} skipped", ui::plural(counts.skipped, "resource"));
    }
    if counts.aborted > 0 {
        println!("    • {} not applied", ui::plural(counts.aborted, "resource"));
    }
    if counts.failed > 0 {
        println!("    • {} {} failed", counts.failed, "resources".red());
    }
    if !report.missing_privileges().is_empty() {
        let names: Vec<&str> = report.missing_privileges().iter().map(|s| s.as_str()).collect();
        println!("    • needs elevation: {}", names.join(", "));
    }
    if let Some(run) = report.run_id() {
        println!("    • run {}", run.as_str().dimmed());
    }
    println!("  Status: {}", ui::status_label(report.status()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::host::tests::config_in;
    use declarative::validate;
    use serde_json::json;
    use tempfile::TempDir;

    fn document() -> ConfigDocument {
        validate(&json!({
            "environment": {
                "resources": [{"id": "user:EDITOR", "value": "vim"}]
            }
        }))
        .unwrap()
    }

    fn quiet_yes() -> ExecuteOptions {
        ExecuteOptions {
            yes: true,
            quiet: true,
            ..ExecuteOptions::default()
        }
    }

    fn simulated(dir: &TempDir) -> (AppConfig, std::path::PathBuf) {
        (config_in(dir), dir.path().join("host.json"))
    }

    #[test]
    fn test_execute_applies_and_second_run_is_noop() {
        let dir = TempDir::new().unwrap();
        let (config, state) = simulated(&dir);
        let host = Host::connect(&config, Some(&state)).unwrap();

        let report = execute(&host, &document(), &quiet_yes(), &CancelToken::new())
            .unwrap()
            .unwrap();
        assert_eq!(report.status(), RunStatus::AllOk);
        assert_eq!(report.counts().kinds.create, 1);

        let again = execute(&host, &document(), &quiet_yes(), &CancelToken::new())
            .unwrap()
            .unwrap();
        assert_eq!(again.status(), RunStatus::AllOk);
        assert_eq!(again.counts().kinds.changes(), 0);
        assert_eq!(again.counts().kinds.noop, 1);
    }

    #[test]
    fn test_cancelled_before_start_applies_nothing() {
        let dir = TempDir::new().unwrap();
        let (config, state) = simulated(&dir);
        let host = Host::connect(&config, Some(&state)).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();

        let report = execute(&host, &document(), &quiet_yes(), &cancel)
            .unwrap()
            .unwrap();
        assert!(report.cancelled());
        assert_eq!(report.status(), RunStatus::Partial);
        assert_eq!(report.counts().succeeded, 0);
    }
}
