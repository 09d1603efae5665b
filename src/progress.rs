use std::io::{self, Write};
use std::time::Duration;

use crossterm::style::Stylize;
use indicatif::{ProgressBar, ProgressState, ProgressStyle};

/// A simple spinner for long-running stages.
pub struct Spinner {
    bar: ProgressBar,
}

impl Spinner {
    pub fn new(message: impl Into<String>) -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(spinner_style());
        bar.set_message(message.into());
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }

    pub fn set_message(&self, message: impl Into<String>) {
        self.bar.set_message(message.into());
    }

    /// Switch to a byte counter, with a bar when the total is known.
    pub fn track_bytes(&self, total: Option<u64>) {
        self.bar.set_position(0);
        match total.filter(|&t| t > 0) {
            Some(total) => {
                self.bar.set_length(total);
                self.bar.set_style(
                    ProgressStyle::with_template(
                        "{spinner:.dim} {msg} [{bar:20}] {bytes}/{total_bytes} ({elapsed_precise:.>5})",
                    )
                    .map(|s| s.with_key("elapsed_precise", elapsed_secs).progress_chars("━╸░"))
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
                );
            }
            None => {
                self.bar.set_style(
                    ProgressStyle::with_template("{spinner:.dim} {msg} {bytes} ({elapsed_precise:.>5})")
                        .map(|s| s.with_key("elapsed_precise", elapsed_secs))
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
            }
        }
    }

    pub fn inc(&self, bytes: u64) {
        self.bar.inc(bytes);
    }

    /// Clear the spinner and print a `✔ message` line to stderr.
    pub fn finish(self, message: impl Into<String>) {
        self.bar.finish_and_clear();
        eprintln!("{} {}", "✔".green(), message.into());
    }

    /// Print a status line above the spinner without disturbing it.
    pub fn println(&self, message: impl AsRef<str>) {
        self.bar.suspend(|| eprintln!("{}", message.as_ref()));
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.dim} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn elapsed_secs(state: &ProgressState, w: &mut dyn std::fmt::Write) {
    let _ = write!(w, "{}s", state.elapsed().as_secs());
}

/// `! message` in yellow on stderr.
pub fn warn(message: impl AsRef<str>) {
    let _ = writeln!(io::stderr(), "{} {}", "!".yellow().bold(), message.as_ref());
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    for unit in UNITS {
        if size < 1024.0 {
            return if size.fract() < 0.05 {
                format!("{:.0} {unit}", size)
            } else {
                format!("{:.1} {unit}", size)
            };
        }
        size /= 1024.0;
    }
    format!("{:.1} TB", size)
}
