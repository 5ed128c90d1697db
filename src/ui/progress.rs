//! Progress indicators with CI fallback

use super::context::UiContext;
use crate::builder::BuildStep;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

/// A task spinner with CI fallback
pub struct TaskSpinner {
    spinner: Option<cliclack::ProgressBar>,
    interactive: bool,
}

impl TaskSpinner {
    /// Create a new spinner (shows immediately in interactive mode)
    pub fn new(ctx: &UiContext) -> Self {
        Self {
            spinner: None,
            interactive: ctx.use_fancy_output(),
        }
    }

    /// Start the spinner with a message
    pub fn start(&mut self, message: &str) {
        if self.interactive {
            let spinner = cliclack::spinner();
            spinner.start(message);
            self.spinner = Some(spinner);
        } else {
            // Plain output for CI
            println!("{} {}", style("...").dim(), message);
        }
    }

    /// Stop with success message
    pub fn stop(&mut self, message: &str) {
        if let Some(spinner) = self.spinner.take() {
            spinner.stop(message);
        } else if self.interactive {
            // Fallback if spinner wasn't started
            println!("{} {}", style("✓").green(), message);
        } else {
            println!("{} {}", style("[OK]").green(), message);
        }
    }

    /// Stop with error message
    pub fn stop_error(&mut self, message: &str) {
        if let Some(spinner) = self.spinner.take() {
            spinner.error(message);
        } else if self.interactive {
            println!("{} {}", style("✗").red(), message);
        } else {
            println!("{} {}", style("[FAIL]").red(), message);
        }
    }

    /// Clear the spinner without any message
    pub fn clear(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.clear();
        }
    }
}

/// Progress bar over the four build steps.
///
/// Displays an indicatif bar in interactive mode, or one line per step in
/// CI. Clones share the same bar, so a clone can be handed to the builder's
/// step observer.
#[derive(Clone)]
pub struct BuildProgress {
    bar: Option<ProgressBar>,
}

impl BuildProgress {
    /// Total number of pipeline steps
    const STEPS: u64 = 4;

    /// Create a build progress indicator for an image on `base`.
    pub fn new(ctx: &UiContext, base: &str) -> Self {
        let bar = if ctx.use_fancy_output() {
            let bar = ProgressBar::new(Self::STEPS);
            let style = ProgressStyle::default_bar()
                .template("  {spinner:.cyan} Building on {prefix}  {bar:20.cyan/dim} {pos}/{len} {msg:.dim}  {elapsed:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
                .progress_chars("━╸─");
            bar.set_style(style);
            bar.set_prefix(base.to_string());
            bar.enable_steady_tick(std::time::Duration::from_millis(120));
            Some(bar)
        } else {
            println!("Building on {}...", base);
            None
        };
        Self { bar }
    }

    /// Report that a step has started.
    pub fn on_step(&self, step: BuildStep) {
        let n = step_number(step);
        if let Some(ref bar) = self.bar {
            bar.set_position(n - 1);
            bar.set_message(step.label());
        } else {
            println!("  STEP {}/{}: {}", n, Self::STEPS, step.label());
        }
    }

    /// Finish and clear the progress bar.
    pub fn finish(&self) {
        if let Some(ref bar) = self.bar {
            bar.disable_steady_tick();
            bar.finish_and_clear();
        }
    }
}

/// 1-based position of a step in the pipeline
fn step_number(step: BuildStep) -> u64 {
    match step {
        BuildStep::ResolveBase => 1,
        BuildStep::InstallDependencies => 2,
        BuildStep::CopySource => 3,
        BuildStep::Finalize => 4,
    }
}
