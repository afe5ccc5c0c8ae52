//! Status lines for terminal output.
//!
//! These are for user-facing progress (server address, build results).
//! Diagnostics go through `tracing`.

use owo_colors::OwoColorize;
use std::sync::atomic::{AtomicBool, Ordering};

static COLORS: AtomicBool = AtomicBool::new(true);

/// Decide once whether status lines are coloured.
///
/// Colours are off when `--no-color` is passed or `NO_COLOR` is set.
pub fn init_colors(no_color: bool) {
    let enabled = !no_color && std::env::var_os("NO_COLOR").is_none();
    COLORS.store(enabled, Ordering::Relaxed);
}

fn colors() -> bool {
    COLORS.load(Ordering::Relaxed)
}

/// Print a success message to stderr.
pub fn success(message: &str) {
    if colors() {
        eprintln!("{} {}", "✓".green().bold(), message);
    } else {
        eprintln!("✓ {}", message);
    }
}

/// Print an info message to stderr.
pub fn info(message: &str) {
    if colors() {
        eprintln!("{} {}", "ℹ".blue().bold(), message);
    } else {
        eprintln!("ℹ {}", message);
    }
}

/// Print a warning message to stderr.
pub fn warning(message: &str) {
    if colors() {
        eprintln!("{} {}", "⚠".yellow().bold(), message.yellow());
    } else {
        eprintln!("⚠ {}", message);
    }
}

/// Print an error message to stderr.
pub fn error(message: &str) {
    if colors() {
        eprintln!("{} {}", "✗".red().bold(), message.red());
    } else {
        eprintln!("✗ {}", message);
    }
}

/// Format a duration in milliseconds for display.
pub fn format_duration(duration_ms: u64) -> String {
    if duration_ms < 1000 {
        format!("{}ms", duration_ms)
    } else {
        format!("{:.2}s", duration_ms as f64 / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(42), "42ms");
        assert_eq!(format_duration(1500), "1.50s");
    }
}
