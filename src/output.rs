//! Console reporting
//!
//! Inline per-bag lines as the batch runs (failures are printed the
//! moment they happen, never buffered) plus an end-of-batch summary.

use std::path::Path;
use std::time::Duration;

use crate::cli::VerbosityLevel;
use crate::error::NormalizeError;
use crate::pipeline::BatchResults;

/// Simple output formatter for human-readable progress and results
pub struct Output {
    verbosity: VerbosityLevel,
    show_colors: bool,
}

impl Output {
    pub fn new(verbosity: VerbosityLevel) -> Self {
        Self {
            verbosity,
            show_colors: atty::is(atty::Stream::Stdout),
        }
    }

    fn colorize(&self, text: &str, color: &str) -> String {
        if self.show_colors {
            format!("\x1b[{}m{}\x1b[0m", color, text)
        } else {
            text.to_string()
        }
    }

    pub fn banner(&self, output_dir: &Path) {
        if self.verbosity == VerbosityLevel::Quiet {
            return;
        }
        println!(
            "{}",
            self.colorize(
                &format!(
                    "Conversion has started. The output directory is {}",
                    output_dir.display()
                ),
                "33"
            )
        );
        println!(
            "{}",
            self.colorize(
                &format!(
                    "Please refer to {} for a mapping of bags to their converted FOXML files.",
                    output_dir.join("map.csv").display()
                ),
                "33"
            )
        );
    }

    pub fn bag_managed(&self, bag_name: &str) {
        if self.verbosity == VerbosityLevel::Quiet {
            return;
        }
        println!(
            "{}",
            self.colorize(
                &format!(
                    "{} contains a managed FOXML file. Making it inline.",
                    bag_name
                ),
                "32"
            )
        );
    }

    pub fn bag_inline(&self, bag_name: &str) {
        if self.verbosity == VerbosityLevel::Quiet {
            return;
        }
        println!(
            "{}",
            self.colorize(
                &format!(
                    "{} contains an inline FOXML file. This will simply beautify it.",
                    bag_name
                ),
                "32"
            )
        );
    }

    pub fn bag_failed(&self, bag_name: &str, error: &NormalizeError) {
        eprintln!(
            "{}",
            self.colorize(
                &format!("{} failed and will be skipped: {}", bag_name, error),
                "31"
            )
        );
    }

    pub fn archive_failed(&self, archive: &Path, error: &NormalizeError) {
        eprintln!(
            "{}",
            self.colorize(
                &format!("{} failed and will be skipped: {}", archive.display(), error),
                "31"
            )
        );
    }

    pub fn progress(&self, completed: usize, total: usize) {
        if self.verbosity == VerbosityLevel::Quiet {
            return;
        }
        eprintln!("[{}/{}] archives processed", completed, total);
    }

    pub fn format_summary(&self, results: &BatchResults) -> String {
        let mut output = String::new();

        if self.verbosity == VerbosityLevel::Quiet {
            if results.has_failures() {
                output.push_str(&format!(
                    "Failed bags: {} Failed archives: {}\n",
                    results.failed_bags, results.failed_archives
                ));
            }
            return output;
        }

        output.push_str("Conversion Summary:\n");
        output.push_str(&format!("  Archives: {}\n", results.total_archives));
        output.push_str(&format!("  Bags: {}\n", results.total_bags));
        output.push_str(&format!(
            "  {} {}\n",
            self.colorize("Made inline:", "32"),
            results.inlined_bags
        ));
        output.push_str(&format!(
            "  {} {}\n",
            self.colorize("Already inline:", "32"),
            results.already_inline_bags
        ));
        if results.failed_bags > 0 {
            output.push_str(&format!(
                "  {} {}\n",
                self.colorize("Failed bags:", "31"),
                results.failed_bags
            ));
        }
        if results.failed_archives > 0 {
            output.push_str(&format!(
                "  {} {}\n",
                self.colorize("Failed archives:", "31"),
                results.failed_archives
            ));
        }
        output.push_str(&format!(
            "  Duration: {}\n",
            format_duration(results.total_duration)
        ));
        output
    }
}

fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs_f64();
    if total_secs < 1.0 {
        format!("{:.0}ms", duration.as_millis())
    } else if total_secs < 60.0 {
        format!("{:.2}s", total_secs)
    } else {
        let mins = (total_secs / 60.0) as u64;
        let secs = total_secs % 60.0;
        format!("{}m{:.1}s", mins, secs)
    }
}
