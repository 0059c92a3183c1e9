//! Progress bar that follows a run through the engine's observer seam

use crate::engine::differ::subsystem_title;
use colored::Colorize;
use declarative::{DiffKind, OpEvent, OpTransition, RunObserver, RunPhase};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

const TEMPLATE: &str = "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}";

/// Counts mutating ops as they finish.
///
/// The bar's length grows as each section is diffed, since the total is
/// not known until every provider has been read.
pub struct ProgressObserver {
    bar: ProgressBar,
    verbose: bool,
}

impl ProgressObserver {
    pub fn new(verbose: bool) -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template(TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        Self { bar, verbose }
    }

    /// An observer that draws nothing (`--quiet`)
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::hidden()),
            verbose: false,
        }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }

    fn line(&self, text: String) {
        if !self.bar.is_hidden() {
            self.bar.println(text);
        }
    }
}

impl RunObserver for ProgressObserver {
    fn on_phase(&self, phase: RunPhase) {
        match phase {
            RunPhase::Applying(subsystem) => {
                self.bar.set_message(subsystem_title(subsystem).to_string());
            }
            RunPhase::RollingBack => {
                self.bar.set_message("rolling back");
                self.line(format!("  {} Rolling back this run's changes", "↺".yellow()));
            }
            RunPhase::Reported => self.finish(),
            _ => {}
        }
    }

    fn on_op(&self, event: &OpEvent) {
        if event.kind == DiffKind::Noop {
            return;
        }
        let target = format!("{} {}", event.subsystem, event.resource_id);
        match &event.transition {
            OpTransition::Planned => self.bar.inc_length(1),
            OpTransition::Retrying {
                attempt, reason, ..
            } if self.verbose => {
                self.line(format!(
                    "  {} {target}: attempt {attempt} failed ({reason}), retrying",
                    "↻".yellow()
                ));
            }
            OpTransition::Succeeded { .. } => {
                self.bar.set_message(target);
                self.bar.inc(1);
            }
            OpTransition::Failed { reason } => {
                self.line(format!("  {} {target}: {}", "✗".red(), reason.red()));
                self.bar.inc(1);
            }
            OpTransition::Skipped { reason } => {
                self.line(format!("  {} {target}: {reason}", "⊘".yellow()));
                self.bar.inc(1);
            }
            OpTransition::Aborted { .. } => self.bar.inc(1),
            OpTransition::RolledBack { succeeded: false } => {
                self.line(format!("  {} could not roll back {target}", "✗".red()));
            }
            _ => {}
        }
    }
}
