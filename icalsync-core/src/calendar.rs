//! Calendar records as seen by the sync engine.

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{IcalSyncError, IcalSyncResult};

/// A subscribed calendar feed and its reminder policy.
#[derive(Debug, Clone, PartialEq)]
pub struct Calendar {
    pub id: String,
    pub feed_url: String,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub last_sync_error: Option<SyncErrorRecord>,
    pub reminder_mode: ReminderMode,
    /// Ordered lead times applied according to `reminder_mode`
    pub default_reminders: Vec<Duration>,
}

impl fmt::Display for Calendar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.feed_url)
    }
}

/// Fields needed to register a calendar.
#[derive(Debug, Clone)]
pub struct NewCalendar {
    pub feed_url: String,
    pub reminder_mode: ReminderMode,
    pub default_reminders: Vec<Duration>,
}

/// How a calendar's default reminders combine with reminders embedded in events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReminderMode {
    /// Defaults only apply to events without reminders of their own
    #[default]
    UnsetOnly,
    /// Defaults are appended to the event's reminders
    Add,
    /// Defaults replace the event's reminders
    Replace,
}

impl ReminderMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderMode::UnsetOnly => "UNSET_ONLY",
            ReminderMode::Add => "ADD",
            ReminderMode::Replace => "REPLACE",
        }
    }
}

impl fmt::Display for ReminderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReminderMode {
    type Err = IcalSyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "UNSET_ONLY" => Ok(ReminderMode::UnsetOnly),
            "ADD" => Ok(ReminderMode::Add),
            "REPLACE" => Ok(ReminderMode::Replace),
            other => Err(IcalSyncError::Config(format!(
                "Unknown reminder mode '{other}'. Expected UNSET_ONLY, ADD or REPLACE"
            ))),
        }
    }
}

/// Why the last sync of a calendar failed, stored as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncErrorRecord {
    pub kind: String,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl SyncErrorRecord {
    pub fn from_error(error: &IcalSyncError, occurred_at: DateTime<Utc>) -> Self {
        SyncErrorRecord {
            kind: error.kind().to_string(),
            message: error.to_string(),
            occurred_at,
        }
    }
}

/// Partial update of a calendar's sync bookkeeping. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct SyncStateUpdate {
    pub last_sync_time: Option<DateTime<Utc>>,
    /// `Some(None)` clears the stored error
    pub last_sync_error: Option<Option<SyncErrorRecord>>,
}

/// Resumption cursor for due-calendar scans.
///
/// Callers treat the encoded form as opaque and pass it back verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageToken {
    last_id: String,
}

impl PageToken {
    pub fn after(last_id: impl Into<String>) -> Self {
        PageToken {
            last_id: last_id.into(),
        }
    }

    pub fn last_id(&self) -> &str {
        &self.last_id
    }

    pub fn encode(&self) -> String {
        // Serializing a struct with one String field cannot fail
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(token: &str) -> IcalSyncResult<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| IcalSyncError::InvalidPageToken)?;
        serde_json::from_slice(&bytes).map_err(|_| IcalSyncError::InvalidPageToken)
    }
}
