//! Core of icalsync: keeps a store of upcoming calendar alarms in step with
//! subscribed ICS feeds.
//!
//! - `sync` walks due calendars page by page and imports each one
//! - `fetch` downloads a feed under a timeout and a size cap
//! - `recurrence` and `alarm` turn a decoded event into alarm trigger times
//! - `store` holds calendars, materialized events and alarms in SQLite

pub mod alarm;
pub mod calendar;
pub mod config;
pub mod error;
pub mod event;
pub mod fetch;
pub mod ics;
pub mod recurrence;
pub mod store;
pub mod sync;

pub use calendar::{Calendar, NewCalendar, PageToken, ReminderMode, SyncErrorRecord, SyncStateUpdate};
pub use config::SyncConfig;
pub use error::{IcalSyncError, IcalSyncResult};
pub use fetch::FeedFetcher;
pub use store::Store;
pub use sync::{SweepSummary, SyncDriver, SyncOptions};
