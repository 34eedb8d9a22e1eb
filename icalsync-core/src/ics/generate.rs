//! Single-event ICS re-encoding.

use chrono::Duration;
use icalendar::{Alarm, Calendar, Component, EventLike, Property, Trigger, ValueType};

use crate::error::IcalSyncResult;
use crate::event::{AlarmRelation, EventStatus, EventTime, FeedEvent, Transparency};

/// Encode one feed event as a self-contained VCALENDAR.
///
/// `PRODID` carries `event_id` and `VERSION` is always `2.0`, so the stored
/// blob identifies itself without the surrounding feed.
pub fn encode_event(event_id: &str, event: &FeedEvent) -> IcalSyncResult<String> {
    let mut cal = Calendar::new();

    let mut ics_event = icalendar::Event::new();
    ics_event.uid(event.uid.as_deref().unwrap_or(event_id));

    if let Some(ref summary) = event.summary {
        ics_event.summary(summary);
    }

    // DTSTAMP - required by RFC 5545
    let dtstamp = chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
    ics_event.add_property("DTSTAMP", &dtstamp);

    if let Some(seq) = event.sequence {
        ics_event.add_property("SEQUENCE", seq.to_string());
    }

    if let Some(ref start) = event.start {
        add_datetime_property(&mut ics_event, "DTSTART", start);
    }
    match (&event.end, event.duration) {
        (Some(end), _) => add_datetime_property(&mut ics_event, "DTEND", end),
        (None, Some(duration)) => {
            ics_event.add_property("DURATION", format_duration(duration));
        }
        (None, None) => {}
    }

    if let Some(ref desc) = event.description {
        ics_event.description(desc);
    }

    if let Some(ref loc) = event.location {
        ics_event.location(loc);
    }

    // Status - only emit if not CONFIRMED (the implied default)
    match event.status {
        EventStatus::Confirmed => {}
        EventStatus::Tentative => {
            ics_event.add_property("STATUS", "TENTATIVE");
        }
        EventStatus::Cancelled => {
            ics_event.add_property("STATUS", "CANCELLED");
        }
    }

    if let Some(ref recurrence) = event.recurrence {
        ics_event.add_property("RRULE", &recurrence.rrule);
        for exdate in &recurrence.exdates {
            add_exdate_property(&mut ics_event, exdate);
        }
    }

    if let Some(ref recurrence_id) = event.recurrence_id {
        add_datetime_property(&mut ics_event, "RECURRENCE-ID", recurrence_id);
    }

    if event.transparency == Transparency::Transparent {
        ics_event.add_property("TRANSP", "TRANSPARENT");
    }

    for reminder in &event.reminders {
        let trigger = match reminder.related {
            AlarmRelation::Start => Trigger::before_start(reminder.before),
            AlarmRelation::End => Trigger::before_end(reminder.before),
        };
        ics_event.alarm(Alarm::display("Reminder", trigger));
    }

    if let Some(ref org) = event.organizer {
        let mut prop = Property::new("ORGANIZER", format!("mailto:{}", org.email));
        if let Some(ref name) = org.name {
            prop.add_parameter("CN", name);
        }
        ics_event.append_property(prop);
    }

    for attendee in &event.attendees {
        let mut prop = Property::new("ATTENDEE", format!("mailto:{}", attendee.email));
        if let Some(ref name) = attendee.name {
            prop.add_parameter("CN", name);
        }
        if let Some(partstat) = attendee.response_status {
            prop.add_parameter("PARTSTAT", partstat.as_ics_str());
        }
        ics_event.append_multi_property(prop);
    }

    if let Some(ref url) = event.url {
        ics_event.add_property("URL", url);
    }

    for (key, value) in &event.custom_properties {
        ics_event.append_multi_property(Property::new(key, value));
    }

    cal.push(ics_event.done());
    let cal = cal.done();

    Ok(strip_ics_bloat(&cal.to_string(), event_id))
}

/// Clean up ICS output from the icalendar crate
/// - Replace PRODID with the stored event identity
/// - Remove CALSCALE:GREGORIAN (it's the default)
/// - Remove DTSTAMP and UID inside VALARM sections (not required by RFC 5545)
fn strip_ics_bloat(ics: &str, event_id: &str) -> String {
    let mut result = String::with_capacity(ics.len());
    let mut in_valarm = false;

    for line in ics.lines() {
        if line.starts_with("PRODID:") {
            result.push_str("PRODID:");
            result.push_str(event_id);
            result.push_str("\r\n");
            continue;
        }

        if line == "CALSCALE:GREGORIAN" {
            continue;
        }

        if line == "BEGIN:VALARM" {
            in_valarm = true;
        } else if line == "END:VALARM" {
            in_valarm = false;
        }

        if in_valarm && (line.starts_with("DTSTAMP:") || line.starts_with("UID:")) {
            continue;
        }

        result.push_str(line);
        result.push_str("\r\n");
    }

    result
}

/// Format a duration as an RFC 5545 DURATION value (e.g. `PT1H30M`, `-P1D`).
fn format_duration(duration: Duration) -> String {
    let sign = if duration < Duration::zero() { "-" } else { "" };
    let mut secs = duration.num_seconds().abs();

    let days = secs / 86_400;
    secs %= 86_400;
    let hours = secs / 3_600;
    secs %= 3_600;
    let minutes = secs / 60;
    secs %= 60;

    let mut out = format!("{sign}P");
    if days > 0 {
        out.push_str(&format!("{days}D"));
    }
    if hours > 0 || minutes > 0 || secs > 0 || days == 0 {
        out.push('T');
        if hours > 0 {
            out.push_str(&format!("{hours}H"));
        }
        if minutes > 0 {
            out.push_str(&format!("{minutes}M"));
        }
        if secs > 0 || (hours == 0 && minutes == 0) {
            out.push_str(&format!("{secs}S"));
        }
    }
    out
}

/// Add a datetime property with proper formatting based on EventTime variant
fn add_datetime_property(ics_event: &mut icalendar::Event, name: &str, time: &EventTime) {
    match time {
        EventTime::Date(d) => {
            let mut prop = Property::new(name, d.format("%Y%m%d").to_string());
            prop.append_parameter(ValueType::Date);
            ics_event.append_property(prop);
        }
        EventTime::DateTimeUtc(dt) => {
            ics_event.add_property(name, dt.format("%Y%m%dT%H%M%SZ").to_string());
        }
        EventTime::DateTimeFloating(dt) => {
            ics_event.add_property(name, dt.format("%Y%m%dT%H%M%S").to_string());
        }
        EventTime::DateTimeZoned { datetime, tzid } => {
            let mut prop = Property::new(name, datetime.format("%Y%m%dT%H%M%S").to_string());
            prop.add_parameter("TZID", tzid);
            ics_event.append_property(prop);
        }
    }
}

/// Add an EXDATE property for a single exception date
fn add_exdate_property(ics_event: &mut icalendar::Event, time: &EventTime) {
    let prop = match time {
        EventTime::Date(d) => {
            let mut prop = Property::new("EXDATE", d.format("%Y%m%d").to_string());
            prop.append_parameter(ValueType::Date);
            prop
        }
        EventTime::DateTimeUtc(dt) => {
            Property::new("EXDATE", dt.format("%Y%m%dT%H%M%SZ").to_string())
        }
        EventTime::DateTimeFloating(dt) => {
            Property::new("EXDATE", dt.format("%Y%m%dT%H%M%S").to_string())
        }
        EventTime::DateTimeZoned { datetime, tzid } => {
            let mut prop = Property::new("EXDATE", datetime.format("%Y%m%dT%H%M%S").to_string());
            prop.add_parameter("TZID", tzid);
            prop
        }
    };
    ics_event.append_multi_property(prop);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Recurrence, Reminder};
    use crate::ics::parse_feed;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn make_test_event() -> FeedEvent {
        let mut event = FeedEvent::new(
            "planning@example.com",
            EventTime::DateTimeUtc(Utc.with_ymd_and_hms(2025, 3, 20, 15, 0, 0).unwrap()),
            EventTime::DateTimeUtc(Utc.with_ymd_and_hms(2025, 3, 20, 16, 0, 0).unwrap()),
        );
        event.summary = Some("Planning".to_string());
        event
    }

    #[test]
    fn test_encode_sets_identity_and_version() {
        let ics = encode_event("4b1f0c1e-event", &make_test_event()).unwrap();

        assert!(ics.contains("PRODID:4b1f0c1e-event\r\n"), "ICS:\n{}", ics);
        assert!(ics.contains("VERSION:2.0"), "ICS:\n{}", ics);
        assert!(!ics.contains("CALSCALE"), "ICS:\n{}", ics);
    }

    #[test]
    fn test_encoded_event_parses_back() {
        let mut event = make_test_event();
        event.recurrence = Some(Recurrence {
            rrule: "FREQ=WEEKLY;BYDAY=TH".to_string(),
            exdates: vec![EventTime::DateTimeUtc(
                Utc.with_ymd_and_hms(2025, 3, 27, 15, 0, 0).unwrap(),
            )],
        });
        event.reminders = vec![Reminder::before_start(Duration::minutes(30))];

        let ics = encode_event("id-1", &event).unwrap();
        let parsed = parse_feed(&ics).expect("Should parse encoded event");

        assert_eq!(parsed.len(), 1);
        let reparsed = &parsed[0];
        assert_eq!(reparsed.uid, event.uid);
        assert_eq!(reparsed.summary, event.summary);
        assert_eq!(reparsed.start, event.start);
        assert_eq!(reparsed.end, event.end);
        assert_eq!(reparsed.recurrence, event.recurrence);
        assert_eq!(reparsed.reminders, event.reminders);
    }

    #[test]
    fn test_all_day_event_has_value_date() {
        let mut event = make_test_event();
        event.start = Some(EventTime::Date(NaiveDate::from_ymd_opt(2025, 3, 20).unwrap()));
        event.end = Some(EventTime::Date(NaiveDate::from_ymd_opt(2025, 3, 21).unwrap()));

        let ics = encode_event("id-1", &event).unwrap();

        assert!(ics.contains("DTSTART;VALUE=DATE:20250320"), "ICS:\n{}", ics);
        assert!(ics.contains("DTEND;VALUE=DATE:20250321"), "ICS:\n{}", ics);
    }

    #[test]
    fn test_alarm_is_minimal() {
        let mut event = make_test_event();
        event.reminders = vec![Reminder::before_start(Duration::minutes(30))];

        let ics = encode_event("id-1", &event).unwrap();

        let valarm_section = ics
            .split("BEGIN:VALARM")
            .nth(1)
            .and_then(|rest| rest.split("END:VALARM").next())
            .expect("Should have VALARM");
        assert!(valarm_section.contains("TRIGGER"));
        assert!(!valarm_section.contains("UID:"), "Got:\n{}", valarm_section);
        assert!(!valarm_section.contains("DTSTAMP:"), "Got:\n{}", valarm_section);
    }

    #[test]
    fn test_duration_used_when_dtend_missing() {
        let mut event = make_test_event();
        event.end = None;
        event.duration = Some(Duration::minutes(90));

        let ics = encode_event("id-1", &event).unwrap();

        assert!(ics.contains("DURATION:PT1H30M"), "ICS:\n{}", ics);
        assert!(!ics.contains("DTEND"), "ICS:\n{}", ics);
    }

    #[test]
    fn test_repeated_custom_properties_are_kept() {
        let mut event = make_test_event();
        event.custom_properties = vec![
            ("X-TAG".to_string(), "team".to_string()),
            ("X-TAG".to_string(), "planning".to_string()),
        ];

        let ics = encode_event("id-1", &event).unwrap();

        assert!(ics.contains("X-TAG:team\r\n"), "ICS:\n{}", ics);
        assert!(ics.contains("X-TAG:planning\r\n"), "ICS:\n{}", ics);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::days(1) + Duration::hours(2)), "P1DT2H");
        assert_eq!(format_duration(Duration::days(2)), "P2D");
        assert_eq!(format_duration(Duration::minutes(-15)), "-PT15M");
        assert_eq!(format_duration(Duration::zero()), "PT0S");
    }
}
