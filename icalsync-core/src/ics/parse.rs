//! Feed decoding using the icalendar crate's parser.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use icalendar::{
    CalendarDateTime, DatePerhapsTime,
    parser::{Component, Property, read_calendar, unfold},
};

use crate::error::{IcalSyncError, IcalSyncResult};
use crate::event::{
    AlarmRelation, Attendee, EventStatus, EventTime, FeedEvent, ParticipationStatus, Recurrence,
    Reminder, Transparency,
};

/// Decode a whole feed into its events.
///
/// VEVENTs are collected at any depth. Missing start/end times are left as
/// `None` for the alarm calculator to reject.
pub fn parse_feed(content: &str) -> IcalSyncResult<Vec<FeedEvent>> {
    let unfolded = unfold(content);
    let calendar = read_calendar(&unfolded).map_err(IcalSyncError::DecodeFailed)?;

    let mut events = Vec::new();
    collect_events(&calendar.components, &mut events);
    Ok(events)
}

/// Decode raw feed bytes, rejecting anything that is not UTF-8.
pub fn parse_feed_bytes(bytes: &[u8]) -> IcalSyncResult<Vec<FeedEvent>> {
    let content = std::str::from_utf8(bytes)
        .map_err(|e| IcalSyncError::DecodeFailed(format!("feed is not valid UTF-8: {e}")))?;
    parse_feed(content)
}

fn collect_events(components: &[Component<'_>], events: &mut Vec<FeedEvent>) {
    for component in components {
        if component.name == "VEVENT" {
            events.push(parse_vevent(component));
        } else {
            collect_events(&component.components, events);
        }
    }
}

fn parse_vevent(vevent: &Component<'_>) -> FeedEvent {
    let text = |name: &str| vevent.find_prop(name).map(|p| p.val.to_string());

    let start = vevent
        .find_prop("DTSTART")
        .and_then(|p| DatePerhapsTime::try_from(p).ok())
        .map(to_event_time);
    let end = vevent
        .find_prop("DTEND")
        .and_then(|p| DatePerhapsTime::try_from(p).ok())
        .map(to_event_time);
    let duration = vevent
        .find_prop("DURATION")
        .and_then(|p| parse_signed_duration(p.val.as_ref()));

    let status = vevent
        .find_prop("STATUS")
        .map(|p| match p.val.as_ref() {
            "TENTATIVE" => EventStatus::Tentative,
            "CANCELLED" => EventStatus::Cancelled,
            _ => EventStatus::Confirmed,
        })
        .unwrap_or(EventStatus::Confirmed);

    let transparency = vevent
        .find_prop("TRANSP")
        .map(|p| {
            if p.val == "TRANSPARENT" {
                Transparency::Transparent
            } else {
                Transparency::Opaque
            }
        })
        .unwrap_or(Transparency::Opaque);

    // Recurrence (RRULE, EXDATE)
    let exdates: Vec<EventTime> = vevent
        .properties
        .iter()
        .filter(|p| p.name == "EXDATE")
        .flat_map(parse_exdate_property)
        .collect();
    let recurrence = text("RRULE").map(|rrule| Recurrence { rrule, exdates });

    let recurrence_id = vevent
        .find_prop("RECURRENCE-ID")
        .and_then(|p| DatePerhapsTime::try_from(p).ok())
        .map(to_event_time);

    let organizer = vevent.find_prop("ORGANIZER").map(parse_attendee);
    let attendees = vevent
        .properties
        .iter()
        .filter(|p| p.name == "ATTENDEE")
        .map(parse_attendee)
        .collect();

    let reminders = vevent
        .components
        .iter()
        .filter(|c| c.name == "VALARM")
        .filter_map(|alarm| parse_trigger(alarm.find_prop("TRIGGER")?))
        .collect();

    let custom_properties = vevent
        .properties
        .iter()
        .filter(|p| p.name.as_ref().starts_with("X-"))
        .map(|p| (p.name.to_string(), p.val.to_string()))
        .collect();

    FeedEvent {
        uid: text("UID"),
        summary: text("SUMMARY"),
        description: text("DESCRIPTION"),
        location: text("LOCATION"),
        start,
        end,
        duration,
        status,
        transparency,
        recurrence,
        recurrence_id,
        reminders,
        organizer,
        attendees,
        url: text("URL"),
        sequence: text("SEQUENCE").and_then(|s| s.parse().ok()),
        custom_properties,
    }
}

/// Convert icalendar's DatePerhapsTime to our EventTime, preserving timezone info
fn to_event_time(dpt: DatePerhapsTime) -> EventTime {
    match dpt {
        DatePerhapsTime::Date(d) => EventTime::Date(d),
        DatePerhapsTime::DateTime(cal_dt) => match cal_dt {
            CalendarDateTime::Utc(dt) => EventTime::DateTimeUtc(dt),
            CalendarDateTime::Floating(naive) => EventTime::DateTimeFloating(naive),
            CalendarDateTime::WithTimezone { date_time, tzid } => EventTime::DateTimeZoned {
                datetime: date_time,
                tzid,
            },
        },
    }
}

fn param<'a>(prop: &'a Property<'_>, key: &str) -> Option<&'a str> {
    prop.params
        .iter()
        .find(|p| p.key == key)
        .and_then(|p| p.val.as_ref().map(|v| v.as_ref()))
}

/// Parse an EXDATE property into a list of EventTime values.
///
/// Handles TZID and VALUE=DATE parameters, UTC and floating values, and
/// comma-separated lists.
fn parse_exdate_property(prop: &Property<'_>) -> Vec<EventTime> {
    let tzid = param(prop, "TZID");
    let is_date = param(prop, "VALUE") == Some("DATE");

    prop.val
        .as_ref()
        .split(',')
        .filter_map(|s| {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            if is_date {
                NaiveDate::parse_from_str(s, "%Y%m%d")
                    .ok()
                    .map(EventTime::Date)
            } else if let Some(tz) = tzid {
                NaiveDateTime::parse_from_str(s, "%Y%m%dT%H%M%S")
                    .ok()
                    .map(|dt| EventTime::DateTimeZoned {
                        datetime: dt,
                        tzid: tz.to_string(),
                    })
            } else if let Some(utc) = s.strip_suffix('Z') {
                NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S")
                    .ok()
                    .map(|dt| EventTime::DateTimeUtc(dt.and_utc()))
            } else {
                NaiveDateTime::parse_from_str(s, "%Y%m%dT%H%M%S")
                    .ok()
                    .map(EventTime::DateTimeFloating)
            }
        })
        .collect()
}

/// Parse ATTENDEE/ORGANIZER property
fn parse_attendee(prop: &Property<'_>) -> Attendee {
    let value = prop.val.as_ref();
    let email = value.strip_prefix("mailto:").unwrap_or(value).to_string();

    Attendee {
        name: param(prop, "CN").map(str::to_string),
        email,
        response_status: param(prop, "PARTSTAT").and_then(ParticipationStatus::from_ics_str),
    }
}

/// Parse a VALARM TRIGGER into a reminder.
///
/// Absolute triggers (VALUE=DATE-TIME) and malformed durations are skipped.
fn parse_trigger(prop: &Property<'_>) -> Option<Reminder> {
    if param(prop, "VALUE") == Some("DATE-TIME") {
        return None;
    }

    let related = match param(prop, "RELATED") {
        Some("END") => AlarmRelation::End,
        _ => AlarmRelation::Start,
    };

    // TRIGGER:-PT30M fires 30 minutes before, so the lead time is the negation
    let offset = parse_signed_duration(prop.val.as_ref())?;
    Some(Reminder {
        before: -offset,
        related,
    })
}

/// Parse an RFC 5545 duration such as `-PT15M`, `+P1D` or `P1W`.
fn parse_signed_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    let (negative, unsigned) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value.strip_prefix('+').unwrap_or(value)),
    };

    let parsed = iso8601::duration(unsigned).ok()?;
    let std_duration: std::time::Duration = parsed.into();
    let duration = Duration::from_std(std_duration).ok()?;

    Some(if negative { -duration } else { duration })
}
