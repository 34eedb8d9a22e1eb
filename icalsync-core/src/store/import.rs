//! Per-calendar sync leases and the all-or-nothing import transaction.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::{Connection, Store, to_unix};
use crate::alarm::{PlannedAlarm, plan_alarms};
use crate::calendar::Calendar;
use crate::error::{IcalSyncError, IcalSyncResult};
use crate::event::FeedEvent;
use crate::ics::encode_event;

/// Exclusive right to import one calendar until `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncLease {
    calendar_id: String,
    token: String,
    expires_at: DateTime<Utc>,
}

impl SyncLease {
    pub fn calendar_id(&self) -> &str {
        &self.calendar_id
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

impl Store {
    /// Take the calendar's lease, or `None` while another holder's lease is live.
    #[instrument(skip(self))]
    pub fn acquire_lease(
        &self,
        calendar_id: &str,
        ttl: std::time::Duration,
    ) -> IcalSyncResult<Option<SyncLease>> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| IcalSyncError::Config(format!("lease ttl out of range: {e}")))?;
        let lease = SyncLease {
            calendar_id: calendar_id.to_string(),
            token: Uuid::new_v4().to_string(),
            expires_at: now + ttl,
        };

        let conn = self.conn()?;
        let changed = conn.execute(
            "INSERT INTO calendar_sync_leases (calendar_id, token, expires_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(calendar_id) DO UPDATE SET
                 token = excluded.token,
                 expires_at = excluded.expires_at
             WHERE calendar_sync_leases.expires_at <= ?4",
            params![
                lease.calendar_id,
                lease.token,
                to_unix(lease.expires_at),
                to_unix(now)
            ],
        )?;

        if changed == 1 {
            Ok(Some(lease))
        } else {
            debug!("Lease is held elsewhere");
            Ok(None)
        }
    }

    /// Give a lease back. Releasing a lease that was already taken over is a no-op.
    pub fn release_lease(&self, lease: &SyncLease) -> IcalSyncResult<()> {
        let conn = self.conn()?;
        release_on(&conn, lease)
    }

    /// Begin replacing a calendar's events.
    ///
    /// The calendar's existing events and alarms are deleted inside a write
    /// transaction that stays open until [`Import::close`]. Readers keep
    /// seeing the previous set until then. On failure the lease is released.
    #[instrument(skip(self, lease, now), fields(calendar_id = %lease.calendar_id))]
    pub fn start_import(&self, lease: SyncLease, now: DateTime<Utc>) -> IcalSyncResult<Import> {
        let conn = self.conn()?;

        match begin_import(&conn, &lease) {
            Ok(()) => Ok(Import {
                conn: Some(conn),
                lease,
                now,
                events: 0,
                alarms: 0,
            }),
            Err(e) => {
                if let Err(release_err) = release_on(&conn, &lease) {
                    warn!(error = %release_err, "Could not release sync lease");
                }
                Err(e)
            }
        }
    }
}

fn release_on(conn: &rusqlite::Connection, lease: &SyncLease) -> IcalSyncResult<()> {
    conn.execute(
        "DELETE FROM calendar_sync_leases WHERE calendar_id = ?1 AND token = ?2",
        params![lease.calendar_id, lease.token],
    )?;
    Ok(())
}

fn begin_import(conn: &rusqlite::Connection, lease: &SyncLease) -> IcalSyncResult<()> {
    conn.execute_batch("BEGIN IMMEDIATE")?;

    let result = clear_previous(conn, lease);
    if result.is_err() {
        if let Err(e) = conn.execute_batch("ROLLBACK") {
            warn!(error = %e, "Rollback failed");
        }
    }
    result
}

fn clear_previous(conn: &rusqlite::Connection, lease: &SyncLease) -> IcalSyncResult<()> {
    let held = conn
        .query_row(
            "SELECT 1 FROM calendar_sync_leases WHERE calendar_id = ?1 AND token = ?2",
            params![lease.calendar_id, lease.token],
            |_| Ok(()),
        )
        .optional()?
        .is_some();

    if !held {
        return Err(IcalSyncError::StorageFailed(format!(
            "sync lease for calendar {} is no longer held",
            lease.calendar_id
        )));
    }

    let deleted = conn.execute(
        "DELETE FROM calendar_events WHERE calendar_id = ?1",
        params![lease.calendar_id],
    )?;
    debug!(deleted, "Cleared previous events");
    Ok(())
}

/// An event with its alarms planned and its blob encoded, ready to write.
///
/// Planning expands recurrences, so it is done before the import takes the
/// database write lock.
#[derive(Debug, Clone)]
pub struct PreparedEvent {
    calendar_id: String,
    event_id: String,
    data: String,
    alarms: Vec<PlannedAlarm>,
}

impl PreparedEvent {
    /// `None` when the event has no alarm left to fire as of `now`.
    pub fn plan(
        calendar: &Calendar,
        event: &FeedEvent,
        overridden: &HashSet<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> IcalSyncResult<Option<Self>> {
        let alarms = plan_alarms(calendar, event, overridden, now)?;
        if alarms.is_empty() {
            return Ok(None);
        }

        let event_id = Uuid::new_v4().to_string();
        let data = encode_event(&event_id, event)?;

        Ok(Some(PreparedEvent {
            calendar_id: calendar.id.clone(),
            event_id,
            data,
            alarms,
        }))
    }
}

/// Counts of what a committed import wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub events: usize,
    pub alarms: usize,
}

/// An open import for one calendar. Must be finished with [`Import::close`];
/// dropping it unclosed rolls back.
pub struct Import {
    conn: Option<Connection>,
    lease: SyncLease,
    now: DateTime<Utc>,
    events: usize,
    alarms: usize,
}

impl Import {
    pub fn calendar_id(&self) -> &str {
        &self.lease.calendar_id
    }

    /// The instant alarms are planned against.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    fn conn(&self) -> IcalSyncResult<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| IcalSyncError::StorageFailed("import already closed".into()))
    }

    /// Materialize `event` if it has alarms left to fire. Returns how many alarms were written.
    ///
    /// `overridden` holds occurrence starts of this event that the feed replaces
    /// with RECURRENCE-ID instances.
    pub fn create_event(
        &mut self,
        calendar: &Calendar,
        event: &FeedEvent,
        overridden: &HashSet<DateTime<Utc>>,
    ) -> IcalSyncResult<usize> {
        match PreparedEvent::plan(calendar, event, overridden, self.now)? {
            Some(prepared) => self.write_prepared(&prepared),
            None => Ok(0),
        }
    }

    /// Write an event planned ahead of the transaction.
    pub fn write_prepared(&mut self, prepared: &PreparedEvent) -> IcalSyncResult<usize> {
        if prepared.calendar_id != self.lease.calendar_id {
            return Err(IcalSyncError::StorageFailed(format!(
                "event for calendar {} written to import of {}",
                prepared.calendar_id, self.lease.calendar_id
            )));
        }

        write_event(
            self.conn()?,
            &prepared.calendar_id,
            &prepared.event_id,
            &prepared.data,
            &prepared.alarms,
        )?;

        self.events += 1;
        self.alarms += prepared.alarms.len();
        Ok(prepared.alarms.len())
    }

    /// Finish the import.
    ///
    /// With `Ok`, stamps `last_sync_time`, clears `last_sync_error` and commits.
    /// With `Err`, rolls back and hands the error back. The lease is released
    /// either way.
    pub fn close(mut self, result: IcalSyncResult<()>) -> IcalSyncResult<ImportStats> {
        let Some(conn) = self.conn.take() else {
            return Err(IcalSyncError::StorageFailed("import already closed".into()));
        };

        if let Err(e) = result {
            rollback_and_release(&conn, &self.lease);
            return Err(e);
        }

        match commit(&conn, &self.lease, self.now) {
            Ok(()) => {
                debug!(
                    calendar_id = %self.lease.calendar_id,
                    events = self.events,
                    alarms = self.alarms,
                    "Import committed"
                );
                Ok(ImportStats {
                    events: self.events,
                    alarms: self.alarms,
                })
            }
            Err(e) => {
                rollback_and_release(&conn, &self.lease);
                Err(e)
            }
        }
    }
}

fn write_event(
    conn: &rusqlite::Connection,
    calendar_id: &str,
    event_id: &str,
    data: &str,
    alarms: &[PlannedAlarm],
) -> IcalSyncResult<()> {
    conn.execute(
        "INSERT INTO calendar_events (id, calendar_id, data) VALUES (?1, ?2, ?3)",
        params![event_id, calendar_id, data],
    )?;

    let mut stmt = conn.prepare_cached(
        "INSERT INTO calendar_event_alarms (event_id, alarm_time, event_time) VALUES (?1, ?2, ?3)",
    )?;
    for alarm in alarms {
        stmt.execute(params![
            event_id,
            to_unix(alarm.alarm_time),
            to_unix(alarm.event_time)
        ])?;
    }
    Ok(())
}

fn commit(conn: &rusqlite::Connection, lease: &SyncLease, now: DateTime<Utc>) -> IcalSyncResult<()> {
    conn.execute(
        "UPDATE calendars SET last_sync_time = ?1, last_sync_error = NULL WHERE id = ?2",
        params![to_unix(now), lease.calendar_id],
    )?;
    release_on(conn, lease)?;
    conn.execute_batch("COMMIT")?;
    Ok(())
}

fn rollback_and_release(conn: &rusqlite::Connection, lease: &SyncLease) {
    if let Err(e) = conn.execute_batch("ROLLBACK") {
        warn!(calendar_id = %lease.calendar_id, error = %e, "Rollback failed");
    }
    if let Err(e) = release_on(conn, lease) {
        warn!(calendar_id = %lease.calendar_id, error = %e, "Could not release sync lease");
    }
}

impl Drop for Import {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            warn!(calendar_id = %self.lease.calendar_id, "Import dropped without close, rolling back");
            rollback_and_release(&conn, &self.lease);
        }
    }
}
