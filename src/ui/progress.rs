use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::errors::SetupError;
use crate::orchestrator::{PipelineReport, StepObserver, StepOutcome, StepPhase};
use crate::step::Action;
use crate::ui::icons::{CHECK, CROSS, REVIEW, RUNNING, SKIP, SPARKLE, WARN};

/// Terminal UI for a setup run, rendered with a single `indicatif` spinner.
///
/// The spinner shows the step being worked on; finished steps are printed
/// above it as permanent lines. Prompts must run inside
/// [`ProgressBar::suspend`] on [`Self::spinner`] so they are not drawn over.
pub struct SetupUI {
    spinner: ProgressBar,
    verbose: bool,
}

impl SetupUI {
    pub fn new(verbose: bool) -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        Self { spinner, verbose }
    }

    /// Handle to the spinner, for suspending it around prompts.
    pub fn spinner(&self) -> ProgressBar {
        self.spinner.clone()
    }

    /// Print a line above the spinner, falling back to `eprintln!` if it cannot be drawn.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.spinner.is_hidden() || self.spinner.is_finished() {
            eprintln!("{}", msg.as_ref());
        } else {
            self.spinner.println(msg.as_ref());
        }
    }

    pub fn print_welcome(&self, text: &str) {
        self.print_line(format!("{}", style(text).bold()));
        self.print_line("");
    }

    pub fn warn(&self, msg: &str) {
        self.print_line(format!("{} {}", WARN, style(msg).yellow()));
    }

    /// Final tally once every segment finished.
    pub fn print_summary(&self, report: &PipelineReport) {
        self.spinner.finish_and_clear();
        self.print_line("");
        self.print_line(format!(
            "{} {} ({} changed, {} already in place)",
            SPARKLE,
            style("Setup complete").green().bold(),
            style(report.resolved()).cyan(),
            report.already_done(),
        ));
    }
}

impl StepObserver for SetupUI {
    fn phase_changed(&mut self, action: &dyn Action, phase: StepPhase) {
        let (icon, label) = match phase {
            StepPhase::Checking => (REVIEW, "checking"),
            StepPhase::Running => (RUNNING, "applying"),
            StepPhase::Rechecking => (REVIEW, "verifying"),
        };
        self.spinner.set_message(format!(
            "{}{} {}",
            icon,
            action.description(),
            style(format!("({})", label)).dim()
        ));
        self.spinner.enable_steady_tick(Duration::from_millis(100));
    }

    fn step_completed(&mut self, action: &dyn Action, outcome: StepOutcome) {
        self.spinner.disable_steady_tick();
        match outcome {
            StepOutcome::Resolved => {
                self.print_line(format!("{}{}", CHECK, action.description()));
            }
            StepOutcome::AlreadyDone => {
                if self.verbose {
                    self.print_line(format!(
                        "{}{} {}",
                        SKIP,
                        style(action.description()).dim(),
                        style("(no changes needed)").dim()
                    ));
                } else {
                    self.print_line(format!("{}{}", CHECK, style(action.description()).dim()));
                }
            }
        }
    }

    fn step_failed(&mut self, action: &dyn Action, error: &SetupError) {
        self.spinner.disable_steady_tick();
        self.print_line(format!(
            "{}{}: {}",
            CROSS,
            action.description(),
            style(error).red()
        ));
    }
}
