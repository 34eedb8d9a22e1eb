use chrono::{DateTime, Duration, Utc};
use rusqlite::{OptionalExtension, Row, params};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{Store, from_unix, to_unix};
use crate::calendar::{Calendar, NewCalendar, PageToken, SyncErrorRecord, SyncStateUpdate};
use crate::error::{IcalSyncError, IcalSyncResult};

const CALENDAR_COLUMNS: &str =
    "id, feed_url, last_sync_time, last_sync_error, default_reminder_mode";

/// A `calendars` row before its reminders are attached.
struct CalendarRow {
    id: String,
    feed_url: String,
    last_sync_time: Option<i64>,
    last_sync_error: Option<String>,
    reminder_mode: String,
}

impl CalendarRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(CalendarRow {
            id: row.get(0)?,
            feed_url: row.get(1)?,
            last_sync_time: row.get(2)?,
            last_sync_error: row.get(3)?,
            reminder_mode: row.get(4)?,
        })
    }

    fn into_calendar(self, conn: &rusqlite::Connection) -> IcalSyncResult<Calendar> {
        let default_reminders = load_default_reminders(conn, &self.id)?;

        let last_sync_error = self
            .last_sync_error
            .map(|json| serde_json::from_str::<SyncErrorRecord>(&json))
            .transpose()
            .map_err(|e| {
                IcalSyncError::StorageFailed(format!(
                    "corrupt last_sync_error for calendar {}: {e}",
                    self.id
                ))
            })?;

        let reminder_mode = self.reminder_mode.parse().map_err(|_| {
            IcalSyncError::StorageFailed(format!(
                "unknown reminder mode '{}' for calendar {}",
                self.reminder_mode, self.id
            ))
        })?;

        Ok(Calendar {
            last_sync_time: self.last_sync_time.map(from_unix).transpose()?,
            id: self.id,
            feed_url: self.feed_url,
            last_sync_error,
            reminder_mode,
            default_reminders,
        })
    }
}

fn load_default_reminders(
    conn: &rusqlite::Connection,
    calendar_id: &str,
) -> IcalSyncResult<Vec<Duration>> {
    let mut stmt = conn.prepare_cached(
        "SELECT offset_seconds FROM calendar_default_reminders
         WHERE calendar_id = ?1
         ORDER BY position",
    )?;

    let offsets = stmt
        .query_map(params![calendar_id], |row| row.get::<_, i64>(0))?
        .map(|secs| secs.map(Duration::seconds))
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(offsets)
}

impl Store {
    /// Register a feed. Returns the stored calendar with its fresh id.
    #[instrument(skip(self, new), fields(feed_url = %new.feed_url))]
    pub fn create_calendar(&self, new: &NewCalendar) -> IcalSyncResult<Calendar> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO calendars (id, feed_url, default_reminder_mode) VALUES (?1, ?2, ?3)",
            params![id, new.feed_url, new.reminder_mode.as_str()],
        )?;

        for (position, offset) in new.default_reminders.iter().enumerate() {
            tx.execute(
                "INSERT INTO calendar_default_reminders (id, calendar_id, position, offset_seconds)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    Uuid::new_v4().to_string(),
                    id,
                    position as i64,
                    offset.num_seconds()
                ],
            )?;
        }

        tx.commit()?;
        debug!(calendar_id = %id, "Created calendar");

        Ok(Calendar {
            id,
            feed_url: new.feed_url.clone(),
            last_sync_time: None,
            last_sync_error: None,
            reminder_mode: new.reminder_mode,
            default_reminders: new.default_reminders.clone(),
        })
    }

    pub fn get_calendar(&self, id: &str) -> IcalSyncResult<Option<Calendar>> {
        let conn = self.conn()?;

        let row = conn
            .query_row(
                &format!("SELECT {CALENDAR_COLUMNS} FROM calendars WHERE id = ?1"),
                params![id],
                CalendarRow::from_row,
            )
            .optional()?;

        row.map(|row| row.into_calendar(&conn)).transpose()
    }

    /// Every calendar, ordered by id.
    pub fn list_calendars(&self) -> IcalSyncResult<Vec<Calendar>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {CALENDAR_COLUMNS} FROM calendars ORDER BY id"
        ))?;
        let rows = stmt
            .query_map([], CalendarRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter().map(|row| row.into_calendar(&conn)).collect()
    }

    /// One page of calendars due for a sync.
    ///
    /// A calendar is due when it never synced or last synced before
    /// `stale_before`. Pages are ordered by id; the returned token resumes
    /// after the last row and is only present when the page came back full.
    #[instrument(skip(self, page_token))]
    pub fn list_due_calendars(
        &self,
        page_size: usize,
        page_token: Option<&PageToken>,
        stale_before: DateTime<Utc>,
    ) -> IcalSyncResult<(Vec<Calendar>, Option<PageToken>)> {
        let conn = self.conn()?;
        let after_id = page_token.map(PageToken::last_id).unwrap_or("");

        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {CALENDAR_COLUMNS} FROM calendars
             WHERE (last_sync_time IS NULL OR last_sync_time < ?1)
               AND id > ?2
             ORDER BY id
             LIMIT ?3"
        ))?;
        let rows = stmt
            .query_map(
                params![to_unix(stale_before), after_id, page_size as i64],
                CalendarRow::from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let calendars = rows
            .into_iter()
            .map(|row| row.into_calendar(&conn))
            .collect::<IcalSyncResult<Vec<_>>>()?;

        let next = if page_size > 0 && calendars.len() == page_size {
            calendars.last().map(|c| PageToken::after(c.id.clone()))
        } else {
            None
        };

        debug!(count = calendars.len(), has_next = next.is_some(), "Listed due calendars");
        Ok((calendars, next))
    }

    /// Apply the fields present in `update`; the rest are left as they are.
    #[instrument(skip(self, update))]
    pub fn update_sync_state(&self, calendar_id: &str, update: &SyncStateUpdate) -> IcalSyncResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM calendars WHERE id = ?1)",
            params![calendar_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(IcalSyncError::StorageFailed(format!(
                "calendar {calendar_id} not found"
            )));
        }

        if let Some(time) = update.last_sync_time {
            tx.execute(
                "UPDATE calendars SET last_sync_time = ?1 WHERE id = ?2",
                params![to_unix(time), calendar_id],
            )?;
        }

        if let Some(ref error) = update.last_sync_error {
            let json = error
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| IcalSyncError::StorageFailed(e.to_string()))?;
            tx.execute(
                "UPDATE calendars SET last_sync_error = ?1 WHERE id = ?2",
                params![json, calendar_id],
            )?;
        }

        tx.commit()?;
        Ok(())
    }
}
