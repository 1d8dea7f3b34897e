//! Compact output rendering helpers for CLI surfaces.
//!
//! Keeps command result output bounded and readable while preserving signal.

/// Collapse newlines/extra whitespace and bound length for terminal display.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    let preview: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", preview)
    } else {
        preview
    }
}

/// Human-friendly "N min/hours/days ago" rendering for activity columns.
pub fn relative_age(then: chrono::DateTime<chrono::Utc>) -> String {
    let delta = chrono::Utc::now().signed_duration_since(then);
    if delta.num_minutes() < 1 {
        "just now".to_string()
    } else if delta.num_hours() < 1 {
        format!("{} min ago", delta.num_minutes())
    } else if delta.num_days() < 1 {
        format!("{} hours ago", delta.num_hours())
    } else {
        format!("{} days ago", delta.num_days())
    }
}

/// Print a warning-level diagnostic to stderr.
pub fn warn(msg: &str) {
    use colored::Colorize;
    eprintln!("{} {}", "warning:".yellow().bold(), msg);
}
