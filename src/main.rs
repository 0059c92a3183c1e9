mod cli;
mod commands;
mod config;
mod engine;
mod host;
mod interrupt;
mod paths;
mod privilege;
mod progress;
mod provider;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use config::AppConfig;
use std::io;
use std::process;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
    };

    let code = match run(&ctx, cli.command) {
        Ok(code) => code,
        Err(e) => {
            ui::error(&format!("{e:#}"));
            1
        }
    };
    process::exit(code);
}

fn run(ctx: &Context, command: Command) -> Result<i32> {
    match command {
        Command::Validate { file } => commands::validate::run(ctx, &file),
        Command::Diff(args) => commands::diff::run(ctx, &AppConfig::load()?, &args),
        Command::Apply(args) => commands::apply::run(ctx, &AppConfig::load()?, &args),
        Command::Backups(cmd) => commands::backups::run(ctx, &AppConfig::load()?, cmd),
        Command::Restore { snapshot_id, host } => {
            commands::restore::restore(ctx, &AppConfig::load()?, &snapshot_id, &host)
        }
        Command::Rollback { run, yes, host } => {
            commands::restore::rollback(ctx, &AppConfig::load()?, &run, yes, &host)
        }
        Command::Schema => commands::schema::run(),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "winconf", &mut io::stdout());
            Ok(0)
        }
    }
}
