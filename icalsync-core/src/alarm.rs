//! Reminder merging and alarm planning.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};

use crate::calendar::{Calendar, ReminderMode};
use crate::error::IcalSyncResult;
use crate::event::{AlarmRelation, FeedEvent};
use crate::recurrence::{MAX_FUTURE_OCCURRENCES, Occurrence, event_span, upcoming_occurrences};

/// An alarm ready to be written: when it fires and which occurrence it guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedAlarm {
    pub alarm_time: DateTime<Utc>,
    pub event_time: DateTime<Utc>,
}

/// Combine an event's own lead times with the calendar defaults.
pub fn effective_offsets(
    mode: ReminderMode,
    embedded: &[Duration],
    defaults: &[Duration],
) -> Vec<Duration> {
    match mode {
        ReminderMode::UnsetOnly if embedded.is_empty() => defaults.to_vec(),
        ReminderMode::UnsetOnly => embedded.to_vec(),
        ReminderMode::Add => embedded.iter().chain(defaults).copied().collect(),
        ReminderMode::Replace => defaults.to_vec(),
    }
}

/// Plan every alarm `event` should carry as of `now`.
///
/// `overridden` holds occurrence starts replaced by RECURRENCE-ID instances
/// elsewhere in the feed. An empty result means the event is not worth storing.
/// An event without a resolvable start and end fails even when no offsets apply.
pub fn plan_alarms(
    calendar: &Calendar,
    event: &FeedEvent,
    overridden: &HashSet<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> IcalSyncResult<Vec<PlannedAlarm>> {
    let span = event_span(event)?;
    let embedded = embedded_offsets(event, &span);
    let offsets = effective_offsets(calendar.reminder_mode, &embedded, &calendar.default_reminders);
    if offsets.is_empty() {
        return Ok(Vec::new());
    }

    let occurrences = upcoming_occurrences(event, now, overridden, MAX_FUTURE_OCCURRENCES)?;

    Ok(occurrences
        .iter()
        .flat_map(|occurrence| {
            offsets.iter().map(move |offset| PlannedAlarm {
                alarm_time: occurrence.start - *offset,
                event_time: occurrence.start,
            })
        })
        .collect())
}

/// Embedded reminders as lead times before the occurrence start.
fn embedded_offsets(event: &FeedEvent, span: &Occurrence) -> Vec<Duration> {
    // End-anchored triggers need the event length to become start-relative
    let length = span.end - span.start;

    event
        .reminders
        .iter()
        .map(|r| match r.related {
            AlarmRelation::Start => r.before,
            AlarmRelation::End => r.before - length,
        })
        .collect()
}
