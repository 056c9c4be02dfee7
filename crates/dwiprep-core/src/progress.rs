//! Progress reporting for TTY and non-TTY environments.
//!
//! TTY: one spinner per in-flight subject showing its current stage, plus an
//! overall bar for batch runs. Non-TTY: hidden bars, logs carry progress.

use std::io::IsTerminal;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Width reserved for the subject prefix
const PREFIX_WIDTH: usize = 14;

/// Central progress context managing multi-progress bars.
pub struct ProgressContext {
    multi: MultiProgress,
    is_tty: bool,
}

impl ProgressContext {
    /// Create new context, detecting TTY automatically.
    pub fn new() -> Self {
        let is_tty = std::io::stderr().is_terminal();
        Self {
            multi: MultiProgress::new(),
            is_tty,
        }
    }

    /// Context that never draws anything (tests, `--quiet` runs).
    pub fn hidden() -> Self {
        Self {
            multi: MultiProgress::new(),
            is_tty: false,
        }
    }

    /// Spinner line for one subject. Update with `pb.set_message(stage)`.
    pub fn subject_line(&self, subject: &str) -> ProgressBar {
        if !self.is_tty {
            return ProgressBar::hidden();
        }
        let pb = self.multi.add(ProgressBar::new(0));
        pb.set_style(
            ProgressStyle::with_template("{spinner:.green} {prefix:<14.cyan.bold} {elapsed:>5} {wide_msg}")
                .expect("invalid template"),
        );
        pb.set_prefix(truncate(subject, PREFIX_WIDTH).to_string());
        pb.enable_steady_tick(Duration::from_millis(120));
        pb
    }

    /// Overall bar counting finished subjects in a batch.
    pub fn batch_bar(&self, total: usize) -> ProgressBar {
        if !self.is_tty {
            return ProgressBar::hidden();
        }
        let pb = self.multi.add(ProgressBar::new(total as u64));
        pb.set_style(
            ProgressStyle::with_template(
                "{prefix:<14.dim} [{bar:30.green/dim}] {pos}/{len} subjects {wide_msg:.dim}",
            )
            .expect("invalid template")
            .progress_chars("=> "),
        );
        pb.set_prefix("batch");
        pb
    }

    /// Whether running in TTY mode.
    pub fn is_tty(&self) -> bool {
        self.is_tty
    }

    /// Get reference to `MultiProgress` for log bridge.
    pub fn multi(&self) -> &MultiProgress {
        &self.multi
    }
}

impl Default for ProgressContext {
    fn default() -> Self {
        Self::new()
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_short_untouched() {
        assert_eq!(truncate("sub-01", 14), "sub-01");
    }

    #[test]
    fn truncate_long() {
        assert_eq!(truncate("sub-0123456789abcdef", 6), "sub-01");
    }

    #[test]
    fn hidden_context_returns_hidden_bars() {
        let ctx = ProgressContext::hidden();
        assert!(!ctx.is_tty());
        assert!(ctx.subject_line("sub-01").is_hidden());
        assert!(ctx.batch_bar(3).is_hidden());
    }
}
