//! Progress bar for apply runs

use colored::Colorize;
use declarative::{Action, Outcome, ProgressCallback, ProviderError};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

const TEMPLATE: &str = "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}";

/// Shows one bar for the whole run and prints a line per retry and failure
pub struct ApplyProgress {
    pb: ProgressBar,
    quiet: bool,
}

impl ApplyProgress {
    pub fn new(quiet: bool) -> Self {
        let pb = ProgressBar::with_draw_target(Some(0), draw_target(quiet));
        pb.set_style(
            ProgressStyle::default_bar()
                .template(TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        Self { pb, quiet }
    }

    fn line(&self, text: String) {
        if !self.quiet {
            self.pb.println(text);
        }
    }
}

fn draw_target(quiet: bool) -> ProgressDrawTarget {
    if quiet {
        ProgressDrawTarget::hidden()
    } else {
        ProgressDrawTarget::stderr()
    }
}

impl ProgressCallback for ApplyProgress {
    fn on_start(&mut self, total: usize) {
        self.pb.set_length(total as u64);
        self.pb.enable_steady_tick(Duration::from_millis(120));
    }

    fn on_action_start(&mut self, action: &Action) {
        self.pb.set_message(action.describe());
    }

    fn on_retry(&mut self, action: &Action, attempt: u32, error: &ProviderError, delay: Duration) {
        self.line(format!(
            "  {} {} attempt {attempt} failed: {error}; retrying in {}ms",
            "↻".yellow(),
            action.name,
            delay.as_millis()
        ));
    }

    fn on_action_complete(&mut self, action: &Action, outcome: &Outcome) {
        match outcome {
            Outcome::Succeeded => self.line(format!("  {} {}", "✓".green(), action.describe())),
            Outcome::Failed { reason } => {
                self.line(format!("  {} {}: {reason}", "✗".red(), action.describe()));
            }
            Outcome::Skipped { .. } => {}
        }
        self.pb.inc(1);
    }

    fn on_finish(&mut self) {
        self.pb.finish_and_clear();
    }
}
