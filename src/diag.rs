//! Warning output.
//!
//! Warnings go to stderr and never affect the exit code; fatal errors are
//! `anyhow` errors that propagate out of the pipeline. Keeping the warning
//! path in one function keeps that split honest.

use owo_colors::OwoColorize;

/// Print a warning to stderr with the standard prefix.
pub fn warn(msg: &str) {
    eprintln!("{} {}", "warning:".yellow().bold(), msg);
}

/// Print a warning with a `file:line:` location prefix, the way the
/// partition-file loader reports structural oddities.
pub fn warn_at(file: &str, line: usize, msg: &str) {
    eprintln!(
        "{}:{}: {} {}",
        file,
        line,
        "warning:".yellow().bold(),
        msg
    );
}
