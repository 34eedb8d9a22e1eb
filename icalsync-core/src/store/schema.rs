pub(super) const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS calendars (
    id TEXT PRIMARY KEY NOT NULL,
    feed_url TEXT NOT NULL,
    last_sync_time INTEGER,
    last_sync_error TEXT,
    default_reminder_mode TEXT NOT NULL DEFAULT 'UNSET_ONLY'
);

CREATE INDEX IF NOT EXISTS idx_calendars_last_sync_time
    ON calendars(last_sync_time);

CREATE TABLE IF NOT EXISTS calendar_default_reminders (
    id TEXT PRIMARY KEY NOT NULL,
    calendar_id TEXT NOT NULL REFERENCES calendars(id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    offset_seconds INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_calendar_default_reminders_calendar
    ON calendar_default_reminders(calendar_id, position);

CREATE TABLE IF NOT EXISTS calendar_events (
    id TEXT PRIMARY KEY NOT NULL,
    calendar_id TEXT NOT NULL REFERENCES calendars(id) ON DELETE CASCADE,
    data TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_calendar_events_calendar
    ON calendar_events(calendar_id);

CREATE TABLE IF NOT EXISTS calendar_event_alarms (
    event_id TEXT NOT NULL REFERENCES calendar_events(id) ON DELETE CASCADE,
    alarm_time INTEGER NOT NULL,
    event_time INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_calendar_event_alarms_alarm_time
    ON calendar_event_alarms(alarm_time);

CREATE INDEX IF NOT EXISTS idx_calendar_event_alarms_event
    ON calendar_event_alarms(event_id);

CREATE TABLE IF NOT EXISTS calendar_sync_leases (
    calendar_id TEXT PRIMARY KEY NOT NULL REFERENCES calendars(id) ON DELETE CASCADE,
    token TEXT NOT NULL,
    expires_at INTEGER NOT NULL
);
";
