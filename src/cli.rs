use crate::config::PolicyArg;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "winconf")]
#[command(version)]
#[command(about = "Converge a Windows host towards a declared configuration", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Check a configuration document and list every problem
    Validate {
        /// Document to check (.toml or .json)
        file: PathBuf,
    },

    /// Preview what apply would change
    Diff(DiffArgs),

    /// Make the host match a configuration document
    Apply(ApplyArgs),

    /// Inspect and prune stored backups
    #[command(subcommand)]
    Backups(BackupsCommand),

    /// Restore one resource from a snapshot
    Restore {
        /// Snapshot id, as shown by `backups show`
        snapshot_id: String,

        #[command(flatten)]
        host: HostArgs,
    },

    /// Undo every change a run made, newest first
    Rollback {
        /// Run id, as shown by `backups list`
        run: String,

        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,

        #[command(flatten)]
        host: HostArgs,
    },

    /// Print the document schema as JSON
    Schema,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(clap::Args, Clone, Default)]
pub struct HostArgs {
    /// Run against a simulated host kept in a JSON state file
    #[arg(long, value_name = "STATE_JSON")]
    pub simulate: Option<PathBuf>,
}

// ============================================================================
// Diff / Apply
// ============================================================================

#[derive(clap::Args)]
pub struct DiffArgs {
    /// Document to compare against the host
    pub file: PathBuf,

    #[command(flatten)]
    pub host: HostArgs,
}

#[derive(clap::Args)]
pub struct ApplyArgs {
    /// Document to apply
    pub file: PathBuf,

    /// What to do when an operation fails (default from config.toml)
    #[arg(long, value_enum)]
    pub policy: Option<PolicyArg>,

    /// Worker threads for subsystems whose operations may run in parallel
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Write the report to a file (`-` for stdout); format follows the
    /// extension, else the document's format
    #[arg(long, value_name = "OUT")]
    pub report: Option<PathBuf>,

    #[command(flatten)]
    pub host: HostArgs,
}

// ============================================================================
// Backups Commands
// ============================================================================

#[derive(Subcommand)]
pub enum BackupsCommand {
    /// List stored runs, oldest first
    List,

    /// Show the snapshots and journal of one run
    Show {
        /// Run id
        run: String,
    },

    /// Delete old runs
    Prune {
        /// Number of newest runs to keep (default from config.toml)
        #[arg(short, long)]
        keep: Option<usize>,

        /// Delete this run only
        #[arg(long, conflicts_with = "keep")]
        run: Option<String>,
    },
}
