use std::time::Duration;

use anyhow::Result;
use icalsync_core::fetch::feed_request_url;
use icalsync_core::{NewCalendar, ReminderMode, SyncConfig};
use owo_colors::OwoColorize;

use crate::utils::tui::{lead_time, local_time};

pub fn add(
    config: &SyncConfig,
    url: String,
    mode: ReminderMode,
    reminders: Vec<Duration>,
) -> Result<()> {
    // Refuse URLs the fetcher would never be able to request
    feed_request_url(&url)?;

    let default_reminders = reminders
        .into_iter()
        .map(chrono::Duration::from_std)
        .collect::<Result<Vec<_>, _>>()?;

    let store = super::open_store(config)?;
    let calendar = store.create_calendar(&NewCalendar {
        feed_url: url,
        reminder_mode: mode,
        default_reminders,
    })?;

    println!("{} {}", "Added".green(), calendar.feed_url);
    println!("  id: {}", calendar.id.dimmed());
    println!("\nIt will be picked up by the next `icalsync sync`.");

    Ok(())
}

pub fn list(config: &SyncConfig) -> Result<()> {
    let store = super::open_store(config)?;
    let calendars = store.list_calendars()?;

    if calendars.is_empty() {
        println!("No calendars yet.\n\nSubscribe to one with:\n  icalsync calendars add <url>");
        return Ok(());
    }

    for (i, calendar) in calendars.iter().enumerate() {
        println!("{}", calendar.feed_url.bold());
        println!("  id:        {}", calendar.id.dimmed());

        let reminders = if calendar.default_reminders.is_empty() {
            "none".to_string()
        } else {
            calendar
                .default_reminders
                .iter()
                .map(|offset| lead_time(*offset))
                .collect::<Vec<_>>()
                .join(", ")
        };
        println!("  reminders: {} ({})", reminders, calendar.reminder_mode);

        let events = store.calendar_events(&calendar.id)?.len();
        match calendar.last_sync_time {
            Some(time) => println!("  synced:    {} ({} events)", local_time(time), events),
            None => println!("  synced:    {}", "never".yellow()),
        }

        if let Some(ref error) = calendar.last_sync_error {
            println!(
                "  {} {} ({})",
                "error:".red(),
                error.message.red(),
                local_time(error.occurred_at)
            );
        }

        if i < calendars.len() - 1 {
            println!();
        }
    }

    Ok(())
}
