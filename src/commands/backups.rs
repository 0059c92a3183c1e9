//! `winconf backups` - inspect and prune the backup store

use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use colored::Colorize;
use declarative::{BackupStore, JournalEntry, RunId};

use crate::Context;
use crate::cli::BackupsCommand;
use crate::config::AppConfig;
use crate::host::open_backups;
use crate::ui;

pub fn run(ctx: &Context, config: &AppConfig, cmd: BackupsCommand) -> Result<i32> {
    let store = open_backups(config)?;
    match cmd {
        BackupsCommand::List => list(&store)?,
        BackupsCommand::Show { run } => show(&store, &RunId::new(run))?,
        BackupsCommand::Prune { keep, run } => match run {
            Some(run) => {
                let run = RunId::new(run);
                store.prune(&run)?;
                if !ctx.quiet {
                    ui::success(&format!("Deleted run {run}"));
                }
            }
            None => prune(ctx, &store, keep.unwrap_or_else(|| config.keep_runs()))?,
        },
    }
    Ok(0)
}

fn local_time(time: DateTime<Utc>) -> String {
    time.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

fn list(store: &BackupStore) -> Result<()> {
    let runs = store.list_runs()?;
    if runs.is_empty() {
        ui::info(&format!("No backups in {}", store.root().display()));
        return Ok(());
    }

    ui::header(&format!("Backup runs ({})", runs.len()));
    for run in &runs {
        let started = run
            .started_at
            .map_or_else(|| "unknown".to_string(), local_time);
        println!(
            "  {}  {}  {}, {}",
            run.run_id.as_str().bold(),
            started.dimmed(),
            ui::plural(run.snapshots, "snapshot"),
            ui::plural(run.journal_entries, "change")
        );
    }
    println!();
    ui::dim(&format!("Stored in {}", store.root().display()));
    Ok(())
}

fn show(store: &BackupStore, run: &RunId) -> Result<()> {
    let snapshots = store.list_snapshots(run)?;
    let journal = store.journal(run)?;

    ui::header(&format!("Run {run}"));
    if let Some(started) = run.timestamp() {
        ui::kv("Started", &local_time(started));
    }

    println!();
    println!("  {}", "Snapshots:".bold());
    if snapshots.is_empty() {
        ui::dim("none");
    }
    for snapshot in &snapshots {
        let prior = if snapshot.existed { "" } else { " (did not exist)" };
        println!(
            "    {} {} {}{}",
            snapshot.id.dimmed(),
            snapshot.subsystem,
            snapshot.resource_id,
            prior.dimmed()
        );
    }

    println!();
    println!("  {}", "Journal (rollback undoes bottom to top):".bold());
    if journal.is_empty() {
        ui::dim("none");
    }
    for entry in &journal {
        match entry {
            JournalEntry::Snapshot {
                snapshot_id,
                subsystem,
                resource_id,
            } => println!(
                "    {} {subsystem} {resource_id} {}",
                "~".yellow(),
                format!("(snapshot {snapshot_id})").dimmed()
            ),
            JournalEntry::Created {
                subsystem,
                resource_id,
            } => println!(
                "    {} {subsystem} {resource_id} {}",
                "+".green(),
                "(created)".dimmed()
            ),
        }
    }
    Ok(())
}

fn prune(ctx: &Context, store: &BackupStore, keep: usize) -> Result<()> {
    let removed = store.prune_keep_latest(keep)?;
    if ctx.quiet {
        return Ok(());
    }
    if removed.is_empty() {
        ui::info(&format!("Nothing to prune (keeping {})", ui::plural(keep, "run")));
    } else {
        for run in &removed {
            ui::dim(&format!("deleted {run}"));
        }
        ui::success(&format!(
            "Pruned {}, kept the newest {keep}",
            ui::plural(removed.len(), "run")
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::tests::config_in;
    use tempfile::TempDir;

    fn quiet() -> Context {
        Context {
            verbose: 0,
            quiet: true,
        }
    }

    #[test]
    fn test_prune_keeps_newest_runs() {
        let dir = TempDir::new().unwrap();
        let store = open_backups(&config_in(&dir)).unwrap();
        let runs: Vec<RunId> = (0..3).map(|_| store.next_run_id().unwrap()).collect();

        prune(&quiet(), &store, 1).unwrap();

        let left: Vec<RunId> = store.list_runs().unwrap().into_iter().map(|r| r.run_id).collect();
        assert_eq!(left, vec![runs[2].clone()]);
    }

    #[test]
    fn test_show_unknown_run_fails() {
        let dir = TempDir::new().unwrap();
        let store = open_backups(&config_in(&dir)).unwrap();
        assert!(show(&store, &RunId::new("20200101T000000Z")).is_err());
    }
}
