//! `winconf validate` - check a document without touching the host

use anyhow::Result;
use colored::Colorize;
use declarative::RunStatus;
use std::path::Path;

use super::Document;
use crate::Context;
use crate::engine::differ::subsystem_title;
use crate::engine::print_validation_errors;
use crate::ui;

pub fn run(ctx: &Context, file: &Path) -> Result<i32> {
    let document = Document::read(file)?;
    match document.validate() {
        Ok(config) => {
            if !ctx.quiet {
                ui::success(&format!(
                    "{} is valid: {} in {}",
                    file.display(),
                    ui::plural(config.resource_count(), "resource"),
                    ui::plural(config.sections().len(), "section")
                ));
                if ctx.verbose > 0 {
                    for section in config.ordered_sections() {
                        let mode = if section.authoritative {
                            " (authoritative)".yellow().to_string()
                        } else {
                            String::new()
                        };
                        ui::dim(&format!(
                            "{}: {}{mode}",
                            subsystem_title(section.subsystem),
                            ui::plural(section.resources.len(), "resource")
                        ));
                    }
                }
            }
            Ok(0)
        }
        Err(errors) => {
            print_validation_errors(&errors);
            Ok(RunStatus::ValidationFailed.exit_code())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn ctx() -> Context {
        Context {
            verbose: 0,
            quiet: true,
        }
    }

    #[test]
    fn test_valid_document_exits_zero() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("host.json");
        fs::write(
            &path,
            r#"{"services": {"resources": [{"id": "Spooler", "start_type": "disabled"}]}}"#,
        )
        .unwrap();
        assert_eq!(run(&ctx(), &path).unwrap(), 0);
    }

    #[test]
    fn test_invalid_document_exits_two() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("host.json");
        fs::write(&path, r#"{"dns": {"resources": []}}"#).unwrap();
        assert_eq!(run(&ctx(), &path).unwrap(), 2);
    }
}
