//! Decoded feed event types.
//!
//! A `FeedEvent` is one `VEVENT` as it appeared in a calendar feed. The alarm
//! calculator works on these, and the import transaction re-encodes them for
//! later display.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// A calendar event decoded from a feed.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEvent {
    pub uid: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    /// `None` when DTSTART is missing or unparseable
    pub start: Option<EventTime>,
    /// `None` when DTEND is missing or unparseable
    pub end: Option<EventTime>,
    /// DURATION, used when DTEND is absent
    pub duration: Option<Duration>,
    pub status: EventStatus,
    pub transparency: Transparency,

    // Recurrence fields
    /// RRULE and EXDATE values for master events
    pub recurrence: Option<Recurrence>,
    /// Original start of the instance this event overrides (RECURRENCE-ID)
    pub recurrence_id: Option<EventTime>,

    /// Reminders embedded in the event as VALARM components
    pub reminders: Vec<Reminder>,

    pub organizer: Option<Attendee>,
    pub attendees: Vec<Attendee>,
    pub url: Option<String>,
    pub sequence: Option<i64>,

    /// Custom X- properties, kept so re-encoded events display like the original
    pub custom_properties: Vec<(String, String)>,
}

impl FeedEvent {
    /// An event with only a UID and a time span; everything else empty.
    pub fn new(uid: impl Into<String>, start: EventTime, end: EventTime) -> Self {
        FeedEvent {
            uid: Some(uid.into()),
            summary: None,
            description: None,
            location: None,
            start: Some(start),
            end: Some(end),
            duration: None,
            status: EventStatus::Confirmed,
            transparency: Transparency::Opaque,
            recurrence: None,
            recurrence_id: None,
            reminders: Vec::new(),
            organizer: None,
            attendees: Vec::new(),
            url: None,
            sequence: None,
            custom_properties: Vec::new(),
        }
    }

    /// Effective end: DTEND, or DTSTART + DURATION when DTEND is absent.
    pub fn effective_end(&self) -> Option<EventTime> {
        match (&self.end, &self.start, self.duration) {
            (Some(end), _, _) => Some(end.clone()),
            (None, Some(start), Some(duration)) => Some(start.shifted(duration)),
            _ => None,
        }
    }
}

/// RRULE plus the EXDATEs that remove instances from it.
#[derive(Debug, Clone, PartialEq)]
pub struct Recurrence {
    pub rrule: String,
    pub exdates: Vec<EventTime>,
}

/// A reminder embedded in a feed event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reminder {
    /// Lead time before the anchor; negative when the alarm fires after it
    pub before: Duration,
    pub related: AlarmRelation,
}

impl Reminder {
    pub fn before_start(before: Duration) -> Self {
        Reminder {
            before,
            related: AlarmRelation::Start,
        }
    }
}

/// Which edge of the event a VALARM trigger is anchored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmRelation {
    Start,
    End,
}

/// An event attendee (also used for organizer)
#[derive(Debug, Clone, PartialEq)]
pub struct Attendee {
    pub name: Option<String>,
    pub email: String,
    pub response_status: Option<ParticipationStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipationStatus {
    NeedsAction,
    Accepted,
    Declined,
    Tentative,
}

impl ParticipationStatus {
    pub fn from_ics_str(s: &str) -> Option<Self> {
        match s {
            "NEEDS-ACTION" => Some(ParticipationStatus::NeedsAction),
            "ACCEPTED" => Some(ParticipationStatus::Accepted),
            "DECLINED" => Some(ParticipationStatus::Declined),
            "TENTATIVE" => Some(ParticipationStatus::Tentative),
            _ => None,
        }
    }

    pub fn as_ics_str(&self) -> &'static str {
        match self {
            ParticipationStatus::NeedsAction => "NEEDS-ACTION",
            ParticipationStatus::Accepted => "ACCEPTED",
            ParticipationStatus::Declined => "DECLINED",
            ParticipationStatus::Tentative => "TENTATIVE",
        }
    }
}

/// Event transparency (busy/free status)
#[derive(Debug, Clone, PartialEq)]
pub enum Transparency {
    Opaque,
    Transparent,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventStatus {
    Confirmed,
    Tentative,
    Cancelled,
}

/// A DTSTART/DTEND-style value, keeping the form it had in the feed.
#[derive(Debug, Clone, PartialEq)]
pub enum EventTime {
    Date(NaiveDate),
    DateTimeUtc(DateTime<Utc>),
    DateTimeFloating(NaiveDateTime),
    DateTimeZoned { datetime: NaiveDateTime, tzid: String },
}

impl EventTime {
    /// Resolve to an absolute instant.
    ///
    /// All-day and floating values are read as UTC. Returns `None` for an
    /// unknown TZID or a local time that does not exist in that zone.
    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            EventTime::Date(d) => Some(d.and_hms_opt(0, 0, 0)?.and_utc()),
            EventTime::DateTimeUtc(dt) => Some(*dt),
            EventTime::DateTimeFloating(dt) => Some(dt.and_utc()),
            EventTime::DateTimeZoned { datetime, tzid } => Tz::from_str(tzid)
                .ok()?
                .from_local_datetime(datetime)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }

    /// Same variant, moved by `by`. Dates move by whole days.
    pub fn shifted(&self, by: Duration) -> EventTime {
        match self {
            EventTime::Date(d) => EventTime::Date(*d + Duration::days(by.num_days())),
            EventTime::DateTimeUtc(dt) => EventTime::DateTimeUtc(*dt + by),
            EventTime::DateTimeFloating(dt) => EventTime::DateTimeFloating(*dt + by),
            EventTime::DateTimeZoned { datetime, tzid } => EventTime::DateTimeZoned {
                datetime: *datetime + by,
                tzid: tzid.clone(),
            },
        }
    }
}

impl fmt::Display for EventTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventTime::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            EventTime::DateTimeUtc(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M UTC")),
            EventTime::DateTimeFloating(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M")),
            EventTime::DateTimeZoned { datetime, tzid } => {
                write!(f, "{} {}", datetime.format("%Y-%m-%d %H:%M"), tzid)
            }
        }
    }
}
