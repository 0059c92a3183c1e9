//! `winconf diff` - plan preview, nothing is applied

use anyhow::Result;
use declarative::{Engine, PrivilegeCheck, RunStatus, Subsystem};

use super::Document;
use crate::Context;
use crate::cli::DiffArgs;
use crate::config::AppConfig;
use crate::engine::differ::{display_plan, display_privilege_boundary};
use crate::engine::print_validation_errors;
use crate::host::Host;

pub fn run(ctx: &Context, config: &AppConfig, args: &DiffArgs) -> Result<i32> {
    let document = match Document::read(&args.file)?.validate() {
        Ok(document) => document,
        Err(errors) => {
            print_validation_errors(&errors);
            return Ok(RunStatus::ValidationFailed.exit_code());
        }
    };

    let host = Host::connect(config, args.host.simulate.as_deref())?;
    let privileges = host.privileges();
    let plan = Engine::new(host.providers(), host.backups())
        .with_privileges(&privileges)
        .with_options(host.options().clone())
        .plan(&document)?;

    display_plan(&plan, ctx.verbose > 0);
    let missing: Vec<Subsystem> = document
        .subsystems()
        .into_iter()
        .filter(|s| !privileges.has_required_privilege(*s))
        .collect();
    display_privilege_boundary(&missing);
    Ok(0)
}
