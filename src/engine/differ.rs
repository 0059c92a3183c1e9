//! Plan display - what a reconciliation would change

use crate::privilege::requires_admin;
use crate::ui;
use colored::Colorize;
use declarative::{DiffKind, DiffOp, DiffSummary, PlannedSection, Subsystem};
use serde_json::Value;

const MAX_VALUE_LEN: usize = 40;

/// Section heading for a subsystem
pub fn subsystem_title(subsystem: Subsystem) -> &'static str {
    match subsystem {
        Subsystem::Users => "Users & groups",
        Subsystem::Environment => "Environment variables",
        Subsystem::Registry => "Registry",
        Subsystem::Permissions => "Permissions",
        Subsystem::Software => "Software",
        Subsystem::Services => "Services",
        Subsystem::Firewall => "Firewall rules",
        Subsystem::Startup => "Startup entries",
    }
}

fn short(value: &Value) -> String {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    ui::truncate_start(&text, MAX_VALUE_LEN)
}

/// One-line description of what an op changes
pub fn describe_op(op: &DiffOp) -> String {
    match op.kind {
        DiffKind::Create => "(new)".to_string(),
        DiffKind::Delete => "(will remove)".to_string(),
        DiffKind::Noop => "(unchanged)".to_string(),
        DiffKind::Update => {
            let empty = serde_json::Map::new();
            let before = op.before.as_ref().unwrap_or(&empty);
            let after = op.after.as_ref().unwrap_or(&empty);
            op.changed_attributes()
                .iter()
                .map(|key| {
                    let from = before.get(key).map_or_else(|| "unset".to_string(), short);
                    let to = after.get(key).map_or_else(|| "unset".to_string(), short);
                    format!("{key}: {from} → {to}")
                })
                .collect::<Vec<_>>()
                .join(", ")
        }
    }
}

/// Display a plan in a user-friendly format
pub fn display_plan(plan: &[PlannedSection], verbose: bool) {
    let mut total = DiffSummary::default();
    for section in plan {
        total.merge(&section.summary());
    }
    let failed_reads = plan.iter().filter(|s| s.error.is_some()).count();

    if !total.has_changes() && failed_reads == 0 {
        println!();
        println!("  {} No changes needed", "✓".green());
        return;
    }

    println!();
    println!(
        "┌─ {} ─────────────────────────────────────────┐",
        "Configuration Diff".bold()
    );
    println!("│");

    for section in plan {
        let summary = section.summary();
        if !summary.has_changes() && section.error.is_none() && !verbose {
            continue;
        }
        let admin = if requires_admin(section.subsystem) {
            " [admin]".red().to_string()
        } else {
            String::new()
        };
        println!("│ {}{}", subsystem_title(section.subsystem).bold(), admin);

        if let Some(error) = &section.error {
            println!("│   {} {}", "✗".red(), error.red());
        }
        for op in &section.ops {
            if op.kind == DiffKind::Noop && !verbose {
                continue;
            }
            println!(
                "│   {} {:<30} {}",
                ui::kind_symbol(op.kind),
                op.resource_id,
                describe_op(op).dimmed()
            );
        }
        if summary.noop > 0 && !verbose {
            println!("│   {}", format!("{} unchanged", summary.noop).dimmed());
        }
        println!("│");
    }

    println!("├─────────────────────────────────────────────────────┤");
    println!(
        "│ Summary: {} ({} create, {} update, {} delete)",
        ui::plural(total.changes(), "change").bold(),
        total.create.to_string().green(),
        total.update.to_string().yellow(),
        total.delete.to_string().red()
    );
    if failed_reads > 0 {
        println!(
            "│ {} could not be read",
            ui::plural(failed_reads, "subsystem").red()
        );
    }
    println!("└─────────────────────────────────────────────────────┘");
}

/// Warn about subsystems the current process may not manage
pub fn display_privilege_boundary(missing: &[Subsystem]) {
    if missing.is_empty() {
        return;
    }

    println!();
    println!(
        "┌─ {} ─────────────────────────────────────────┐",
        "Privilege Boundary".yellow().bold()
    );
    println!("│");
    println!(
        "│  {}  {} need an elevated (Administrator) shell:",
        "⚠".yellow(),
        ui::plural(missing.len(), "subsystem")
    );
    println!("│");
    for subsystem in missing {
        println!("│  • {}", subsystem_title(*subsystem));
    }
    println!("│");
    println!("│  These sections will not be applied from this shell.");
    println!("│");
    println!("└─────────────────────────────────────────────────────────────┘");
}
