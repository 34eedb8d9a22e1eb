#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use icalsync_core::{NewCalendar, ReminderMode, Store};
use tempfile::TempDir;

pub struct TestStore {
    // Keeps the database directory alive for the test
    pub dir: TempDir,
    pub store: Store,
}

impl TestStore {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("icalsync.db")).unwrap();
        TestStore { dir, store }
    }

    pub fn db_path(&self) -> std::path::PathBuf {
        self.dir.path().join("icalsync.db")
    }

    /// A raw connection for poking at the database behind the store's back.
    pub fn raw(&self) -> rusqlite::Connection {
        rusqlite::Connection::open(self.db_path()).unwrap()
    }
}

pub fn new_calendar(feed_url: &str, mode: ReminderMode, defaults: &[Duration]) -> NewCalendar {
    NewCalendar {
        feed_url: feed_url.to_string(),
        reminder_mode: mode,
        default_reminders: defaults.to_vec(),
    }
}

pub fn ics_time(time: DateTime<Utc>) -> String {
    time.format("%Y%m%dT%H%M%SZ").to_string()
}

/// A VEVENT block with an optional embedded `TRIGGER` value and extra raw lines.
pub fn vevent(uid: &str, start: DateTime<Utc>, trigger: Option<&str>, extra: &[&str]) -> String {
    let mut lines = vec![
        "BEGIN:VEVENT".to_string(),
        format!("UID:{uid}"),
        format!("SUMMARY:{uid}"),
        format!("DTSTART:{}", ics_time(start)),
        format!("DTEND:{}", ics_time(start + Duration::hours(1))),
    ];
    lines.extend(extra.iter().map(|l| l.to_string()));
    if let Some(trigger) = trigger {
        lines.push("BEGIN:VALARM".to_string());
        lines.push("ACTION:DISPLAY".to_string());
        lines.push("DESCRIPTION:Reminder".to_string());
        lines.push(format!("TRIGGER:{trigger}"));
        lines.push("END:VALARM".to_string());
    }
    lines.push("END:VEVENT".to_string());
    lines.join("\r\n")
}

pub fn feed(events: &[String]) -> String {
    let mut out = String::from("BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//test//EN\r\n");
    for event in events {
        out.push_str(event);
        out.push_str("\r\n");
    }
    out.push_str("END:VCALENDAR\r\n");
    out
}
