use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use icalsync_core::SyncConfig;
use icalsync_core::ics::parse_feed;
use owo_colors::OwoColorize;

use crate::utils::tui::local_time;

pub fn run(config: &SyncConfig, within: Duration) -> Result<()> {
    let store = super::open_store(config)?;
    let until = Utc::now() + chrono::Duration::from_std(within)?;
    let alarms = store.due_alarms(until)?;

    if alarms.is_empty() {
        println!("No alarms in the next {}", humantime::format_duration(within));
        return Ok(());
    }

    for alarm in alarms {
        let title = parse_feed(&alarm.data)
            .ok()
            .and_then(|events| events.into_iter().next())
            .and_then(|event| event.summary)
            .unwrap_or_else(|| "(untitled)".to_string());

        println!(
            "{}  {}  {}",
            local_time(alarm.alarm_time).bold(),
            title,
            format!("starts {}", local_time(alarm.event_time)).dimmed()
        );
    }

    Ok(())
}
