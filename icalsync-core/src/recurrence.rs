//! Bounded look-ahead occurrence expansion.
//!
//! Rather than enumerating a whole series, only the next few occurrences that
//! have not started yet are produced. That is all the alarm calculator needs.

use std::collections::HashSet;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use rrule::RRuleSet;

use crate::error::{IcalSyncError, IcalSyncResult};
use crate::event::{EventTime, FeedEvent, Recurrence};

/// How many future occurrences of a recurring event are materialized.
pub const MAX_FUTURE_OCCURRENCES: usize = 10;

/// One concrete start/end instance of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occurrence {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Resolved start/end of an event, before expansion.
pub(crate) fn event_span(event: &FeedEvent) -> IcalSyncResult<Occurrence> {
    let label = event.uid.as_deref().unwrap_or("<no uid>");

    let start = event
        .start
        .as_ref()
        .ok_or_else(|| failed(format!("event '{label}' has no valid DTSTART")))?;
    let start = start
        .to_utc()
        .ok_or_else(|| failed(format!("event '{label}' has an unresolvable DTSTART ({start})")))?;

    let end = event
        .effective_end()
        .ok_or_else(|| failed(format!("event '{label}' has neither DTEND nor DURATION")))?;
    let end = end
        .to_utc()
        .ok_or_else(|| failed(format!("event '{label}' has an unresolvable DTEND ({end})")))?;

    Ok(Occurrence { start, end })
}

/// Occurrences of `event` that still deserve alarms as of `now`.
///
/// - Non-recurring: the event itself, unless it already ended.
/// - Recurring: the first `limit` occurrences starting at or after `now`,
///   skipping EXDATEs and any start listed in `overridden`.
pub fn upcoming_occurrences(
    event: &FeedEvent,
    now: DateTime<Utc>,
    overridden: &HashSet<DateTime<Utc>>,
    limit: usize,
) -> IcalSyncResult<Vec<Occurrence>> {
    let span = event_span(event)?;

    let (Some(recurrence), Some(start)) = (&event.recurrence, &event.start) else {
        if span.end < now {
            return Ok(Vec::new());
        }
        return Ok(vec![span]);
    };

    let rrule_str = build_rrule_string(start, recurrence);
    let rrule_set: RRuleSet = rrule_str.parse().map_err(|e| {
        failed(format!(
            "invalid RRULE for event '{}': {}",
            event.uid.as_deref().unwrap_or("<no uid>"),
            e
        ))
    })?;

    // `after` is exclusive, so step back a second to keep an occurrence starting right now
    let tz: rrule::Tz = Utc.into();
    let after = (now - Duration::seconds(1)).with_timezone(&tz);
    let fetch = u16::try_from(limit + overridden.len()).unwrap_or(u16::MAX);
    let result = rrule_set.after(after).all(fetch);

    let duration = span.end - span.start;

    Ok(result
        .dates
        .iter()
        .map(|dt| dt.with_timezone(&Utc))
        .filter(|start| *start >= now && !overridden.contains(start))
        .take(limit)
        .map(|start| Occurrence {
            start,
            end: start + duration,
        })
        .collect())
}

fn failed(message: String) -> IcalSyncError {
    IcalSyncError::OccurrenceComputationFailed(message)
}

/// Build an iCalendar-format RRULE string for the rrule crate parser.
fn build_rrule_string(start: &EventTime, recurrence: &Recurrence) -> String {
    let mut lines = Vec::new();

    // The rrule crate needs a datetime, so all-day dates become midnight UTC
    lines.push(format!("DTSTART{}", ics_time_suffix(start)));

    lines.push(format!("RRULE:{}", normalize_until(&recurrence.rrule, start)));

    for exdate in &recurrence.exdates {
        lines.push(format!("EXDATE{}", ics_time_suffix(exdate)));
    }

    lines.join("\n")
}

/// `;TZID=...:value` or `:value` for a DTSTART/EXDATE line.
fn ics_time_suffix(time: &EventTime) -> String {
    match time {
        EventTime::Date(d) => format!(":{}T000000Z", d.format("%Y%m%d")),
        EventTime::DateTimeUtc(dt) => format!(":{}", dt.format("%Y%m%dT%H%M%SZ")),
        EventTime::DateTimeFloating(dt) => format!(":{}Z", dt.format("%Y%m%dT%H%M%S")),
        EventTime::DateTimeZoned { datetime, tzid } => {
            format!(";TZID={}:{}", tzid, datetime.format("%Y%m%dT%H%M%S"))
        }
    }
}

/// Rewrite UNTIL as a UTC instant, the only form the rrule crate accepts.
///
/// Feeds commonly pair a start with a date-only or floating UNTIL. Both are
/// read in the start's own timezone (UTC for all-day and floating starts),
/// and a date-only UNTIL covers that whole local day.
fn normalize_until(rrule: &str, anchor: &EventTime) -> String {
    rrule
        .split(';')
        .map(|part| match part.split_once('=') {
            Some((key, value)) if key.eq_ignore_ascii_case("UNTIL") => {
                match until_as_utc(value, anchor) {
                    Some(until) => format!("UNTIL={}", until.format("%Y%m%dT%H%M%SZ")),
                    None => part.to_string(),
                }
            }
            _ => part.to_string(),
        })
        .collect::<Vec<_>>()
        .join(";")
}

/// `None` leaves the value for the rrule crate to accept or reject.
fn until_as_utc(value: &str, anchor: &EventTime) -> Option<DateTime<Utc>> {
    if value.ends_with('Z') {
        return None;
    }

    let local = if value.len() == 8 {
        NaiveDate::parse_from_str(value, "%Y%m%d")
            .ok()?
            .and_hms_opt(23, 59, 59)?
    } else {
        NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S").ok()?
    };

    match anchor {
        EventTime::DateTimeZoned { tzid, .. } => Tz::from_str(tzid)
            .ok()?
            .from_local_datetime(&local)
            .latest()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => Some(local.and_utc()),
    }
}
