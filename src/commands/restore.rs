//! `winconf restore` and `winconf rollback` - put backed-up state back

use anyhow::{Context as AnyhowContext, Result};
use colored::Colorize;
use declarative::{ApplyContext, CancelToken, LogObserver, PrivilegeCheck, RunId, RunStatus};

use crate::Context;
use crate::cli::HostArgs;
use crate::config::AppConfig;
use crate::engine::{confirm_proceed, print_rollback};
use crate::host::Host;
use crate::ui;

/// Restore one resource from a snapshot
pub fn restore(
    ctx: &Context,
    config: &AppConfig,
    snapshot_id: &str,
    host_args: &HostArgs,
) -> Result<i32> {
    let host = Host::connect(config, host_args.simulate.as_deref())?;
    let snapshot = host.backups().load(snapshot_id)?;
    let subsystem = snapshot.subsystem;

    if !host.privileges().has_required_privilege(subsystem) {
        ui::error(&format!(
            "Restoring {subsystem} needs an elevated (Administrator) shell"
        ));
        return Ok(RunStatus::Aborted.exit_code());
    }
    let provider = host
        .providers()
        .get(subsystem)
        .with_context(|| format!("No provider registered for {subsystem}"))?;

    // A restore always runs to completion
    let never = CancelToken::new();
    let apply = ApplyContext::new(
        &snapshot.run_id,
        host.options().timeout_for(subsystem),
        &never,
    );
    let result = host
        .backups()
        .restore(&snapshot, provider, &apply, &host.options().retry);
    host.save()?;

    if let Some(reason) = result.outcome.reason() {
        ui::error(&format!(
            "Could not restore {subsystem} {}: {reason}",
            snapshot.resource_id
        ));
        return Ok(RunStatus::Partial.exit_code());
    }
    if !ctx.quiet {
        let what = if result.changed {
            "Restored"
        } else {
            "Already matches"
        };
        ui::success(&format!(
            "{what} {subsystem} {} from {}",
            snapshot.resource_id,
            snapshot.id.dimmed()
        ));
    }
    Ok(0)
}

/// Undo a whole run, newest change first
pub fn rollback(
    ctx: &Context,
    config: &AppConfig,
    run: &str,
    yes: bool,
    host_args: &HostArgs,
) -> Result<i32> {
    let host = Host::connect(config, host_args.simulate.as_deref())?;
    let run = RunId::new(run);
    let journal = host.backups().journal(&run)?;

    if journal.is_empty() {
        ui::info(&format!("Run {run} made no changes"));
        return Ok(0);
    }
    if !ctx.quiet {
        ui::header(&format!(
            "Rolling back run {run} ({})",
            ui::plural(journal.len(), "change")
        ));
        for entry in journal.iter().rev() {
            ui::dim(&format!("{} {}", entry.subsystem(), entry.resource_id()));
        }
        println!();
    }
    if !yes && !confirm_proceed()? {
        println!();
        println!("  {} Aborted", "✗".red());
        return Ok(0);
    }

    let records = host
        .backups()
        .rollback_run(&run, host.providers(), host.options(), &LogObserver)?;
    host.save()?;

    if !ctx.quiet {
        print_rollback(&records);
    }
    if records.iter().all(|r| r.result.outcome.is_success()) {
        Ok(0)
    } else {
        Ok(RunStatus::Partial.exit_code())
    }
}
