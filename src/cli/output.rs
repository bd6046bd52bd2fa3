//! CLI output formatting utilities.

use crate::session::{Session, SessionReport, TopicOutcome};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

/// Output helper for CLI formatting.
pub struct Output;

impl Output {
    /// Print an info message.
    pub fn info(msg: &str) {
        println!("{} {}", style(">>").cyan().bold(), msg);
    }

    /// Print a success message.
    pub fn success(msg: &str) {
        println!("{} {}", style(">>").green().bold(), msg);
    }

    /// Print a warning message.
    pub fn warning(msg: &str) {
        eprintln!("{} {}", style(">>").yellow().bold(), msg);
    }

    /// Print an error message.
    pub fn error(msg: &str) {
        eprintln!("{} {}", style(">>").red().bold(), msg);
    }

    /// Print a header.
    pub fn header(msg: &str) {
        println!("\n{}", style(msg).bold().underlined());
    }

    /// Print a key-value pair.
    pub fn kv(key: &str, value: &str) {
        println!("  {}: {}", style(key).dim(), value);
    }

    /// Print a session report with per-topic lines.
    pub fn report(report: &SessionReport) {
        let headline = report.headline();
        match &report.outcome {
            crate::session::SessionOutcome::Completed { .. } => Self::success(&headline),
            crate::session::SessionOutcome::InProgress { .. } => Self::info(&headline),
            _ => Self::error(&headline),
        }

        for line in &report.topics {
            match &line.outcome {
                TopicOutcome::Narrated { audio_ref } => println!(
                    "  {} {} {}",
                    style("✓").green(),
                    style(&line.topic).bold(),
                    style(audio_ref).dim()
                ),
                TopicOutcome::Failed { step, cause } => println!(
                    "  {} {} ({} broke: {})",
                    style("✗").red(),
                    style(&line.topic).bold(),
                    step,
                    cause
                ),
                TopicOutcome::Pending => println!(
                    "  {} {} {}",
                    style("…").yellow(),
                    style(&line.topic).bold(),
                    style("pending").dim()
                ),
            }
        }
    }

    /// One summary line for a session in a listing.
    pub fn session_line(session: &Session) {
        println!(
            "  {} {} [{}] {} ({}/{} narrated)",
            style("*").cyan(),
            style(session.id.as_str()).bold(),
            session.status,
            style(session.created_at.format("%Y-%m-%d %H:%M").to_string()).dim(),
            session.narrated_count(),
            session.topics.len()
        );
    }

    /// Create a spinner.
    pub fn spinner(msg: &str) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        if let Ok(spinner_style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            pb.set_style(spinner_style);
        }
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        pb
    }
}

/// Format a byte count in human-readable form.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(500), "500 B");
        assert_eq!(format_size(1024), "1.0 KB");
        assert_eq!(format_size(1024 * 1024), "1.0 MB");
        assert_eq!(format_size(1024 * 1024 * 1024), "1.0 GB");
    }
}
