//! Output formatting and progress indicators
//!
//! This module provides utilities for displaying progress spinners,
//! run summaries and formatted error messages to the user.

use indicatif::{ProgressBar, ProgressStyle};

use crate::core::runner::{ProductOutcome, RunReport};

/// Global output settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputConfig {
    /// Only errors are printed
    pub quiet: bool,
    /// Verbosity level from repeated `-v`
    pub verbose: u8,
}

impl OutputConfig {
    /// Create an output configuration
    pub fn new(quiet: bool, verbose: u8) -> Self {
        Self { quiet, verbose }
    }

    /// Minimum log level for the tracing subscriber
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            return tracing::Level::ERROR;
        }
        match self.verbose {
            0 => tracing::Level::WARN,
            1 => tracing::Level::INFO,
            _ => tracing::Level::DEBUG,
        }
    }

    /// Whether a spinner should be drawn
    pub fn show_progress(&self) -> bool {
        !self.quiet && self.verbose == 0
    }
}

/// Create a spinner for operations with unknown duration
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner()
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
        .template("{spinner:.blue} {msg}")
    {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(80));
    pb
}

/// One summary line per product
pub fn report_lines(report: &RunReport) -> Vec<String> {
    report
        .products
        .iter()
        .map(|p| match &p.outcome {
            ProductOutcome::Reused(source) => {
                format!("{} {} reused ({source})", status::SUCCESS, p.product)
            }
            ProductOutcome::Rebuilt => format!("{} {} rebuilt", status::SUCCESS, p.product),
            ProductOutcome::Failed(e) => format!("{} {} failed: {e}", status::ERROR, p.product),
            ProductOutcome::Skipped => format!("{} {} skipped", status::SKIPPED, p.product),
        })
        .collect()
}

/// Print the run summary
pub fn print_report(report: &RunReport, config: OutputConfig) {
    if config.quiet {
        for p in &report.products {
            if let ProductOutcome::Failed(e) = &p.outcome {
                eprintln!("{} {} failed: {e}", status::ERROR, p.product);
            }
        }
        return;
    }

    for line in report_lines(report) {
        println!("{line}");
    }
    println!(
        "\n{} rebuilt, {} reused, {} failed, {} skipped",
        report.rebuilt(),
        report.reused(),
        report.failed(),
        report.skipped()
    );
}

/// Print an error and its causes to stderr
pub fn display_error(error: &anyhow::Error) {
    eprintln!("{} Error: {error}", status::ERROR);
    for cause in error.chain().skip(1) {
        eprintln!("  Caused by: {cause}");
    }
}

/// Status message prefixes
pub mod status {
    /// Success prefix (green checkmark)
    pub const SUCCESS: &str = "✓";

    /// Error prefix (red X)
    pub const ERROR: &str = "✗";

    /// Skipped prefix
    pub const SKIPPED: &str = "-";

    /// Warning prefix (yellow triangle)
    pub const WARNING: &str = "⚠";
}
