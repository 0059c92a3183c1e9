//! `winconf apply` - full reconciliation

use anyhow::{Context as AnyhowContext, Result, bail};
use declarative::{DocumentFormat, FailurePolicy, Report};
use std::fs;
use std::path::Path;

use super::Document;
use crate::Context;
use crate::cli::ApplyArgs;
use crate::config::AppConfig;
use crate::engine::{self, ExecuteOptions, print_report};
use crate::host::Host;
use crate::interrupt;

pub fn run(ctx: &Context, config: &AppConfig, args: &ApplyArgs) -> Result<i32> {
    let mut config = config.clone();
    if let Some(jobs) = args.jobs {
        if jobs == 0 {
            bail!("--jobs must be at least 1");
        }
        config.jobs = Some(jobs);
    }
    let policy: FailurePolicy = args.policy.unwrap_or(config.default_policy).into();

    let document = Document::read(&args.file)?;
    let report = match document.validate() {
        Ok(validated) => {
            let host = Host::connect(&config, args.host.simulate.as_deref())?;
            let cancel = interrupt::set_up_cancel_handler()?;
            let opts = ExecuteOptions {
                policy,
                yes: args.yes,
                verbose: ctx.verbose > 0,
                quiet: ctx.quiet,
            };
            let outcome = engine::execute(&host, &validated, &opts, &cancel);
            host.save()?;
            match outcome? {
                Some(report) => report,
                None => return Ok(0),
            }
        }
        Err(errors) => {
            let report = Report::validation_failed(errors, policy);
            print_report(&report, false);
            report
        }
    };

    if let Some(out) = &args.report {
        write_report(&report, out, document.format)?;
    }
    Ok(report.status().exit_code())
}

/// Write `report` to `out` (`-` for stdout), in the format its extension
/// names or else `fallback`
fn write_report(report: &Report, out: &Path, fallback: DocumentFormat) -> Result<()> {
    let format = DocumentFormat::from_path(out).unwrap_or(fallback);
    let text = format.render(report).context("Could not render report")?;
    if out == Path::new("-") {
        println!("{text}");
        return Ok(());
    }
    fs::write(out, text).with_context(|| format!("Could not write {}", out.display()))?;
    log::info!("Report written to {}", out.display());
    Ok(())
}
