use chrono::{DateTime, Local, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;

pub fn create_spinner(message: String) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner()
        .tick_strings(&["-", "\\", "|", "/"])
        .template("{msg} {spinner}")
    {
        spinner.set_style(style);
    }
    spinner.set_message(message);
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));
    spinner
}

/// A UTC instant in the user's local time, e.g. `2025-03-20 15:00`.
pub fn local_time(time: DateTime<Utc>) -> String {
    time.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

/// A lead time the way it was typed, e.g. `10m` or `1h 30m`.
pub fn lead_time(offset: chrono::Duration) -> String {
    match offset.to_std() {
        Ok(d) => humantime::format_duration(d).to_string(),
        Err(_) => format!("-{}", lead_time(-offset)),
    }
}

pub fn render_summary(summary: &icalsync_core::SweepSummary) -> String {
    let mut line = format!(
        "Synced {} calendar{} ({} events, {} alarms)",
        summary.synced,
        if summary.synced == 1 { "" } else { "s" },
        summary.events,
        summary.alarms
    );
    if summary.failed > 0 {
        line.push_str(&format!(", {}", format!("{} failed", summary.failed).red()));
    }
    if summary.skipped > 0 {
        line.push_str(&format!(", {}", format!("{} busy", summary.skipped).yellow()));
    }
    line
}
