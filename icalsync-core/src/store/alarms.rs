//! Read side used by notification dispatch.

use chrono::{DateTime, Utc};
use rusqlite::params;

use super::{Store, from_unix, to_unix};
use crate::error::IcalSyncResult;

/// A stored alarm joined with the event it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct DueAlarm {
    pub event_id: String,
    pub calendar_id: String,
    pub alarm_time: DateTime<Utc>,
    pub event_time: DateTime<Utc>,
    /// Encoded single-event VCALENDAR
    pub data: String,
}

/// A materialized event row.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub id: String,
    pub calendar_id: String,
    pub data: String,
}

impl Store {
    /// Alarms with a trigger time at or before `until`, earliest first.
    pub fn due_alarms(&self, until: DateTime<Utc>) -> IcalSyncResult<Vec<DueAlarm>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare_cached(
            "SELECT a.event_id, e.calendar_id, a.alarm_time, a.event_time, e.data
             FROM calendar_event_alarms a
             JOIN calendar_events e ON e.id = a.event_id
             WHERE a.alarm_time <= ?1
             ORDER BY a.alarm_time, a.event_time, a.event_id",
        )?;

        let rows = stmt
            .query_map(params![to_unix(until)], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(event_id, calendar_id, alarm_time, event_time, data)| {
                Ok(DueAlarm {
                    event_id,
                    calendar_id,
                    alarm_time: from_unix(alarm_time)?,
                    event_time: from_unix(event_time)?,
                    data,
                })
            })
            .collect()
    }

    /// The events currently materialized for a calendar.
    pub fn calendar_events(&self, calendar_id: &str) -> IcalSyncResult<Vec<StoredEvent>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare_cached(
            "SELECT id, calendar_id, data FROM calendar_events WHERE calendar_id = ?1 ORDER BY id",
        )?;

        let events = stmt
            .query_map(params![calendar_id], |row| {
                Ok(StoredEvent {
                    id: row.get(0)?,
                    calendar_id: row.get(1)?,
                    data: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(events)
    }
}
