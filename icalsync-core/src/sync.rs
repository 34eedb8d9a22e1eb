//! The sync driver: one sweep over every due calendar.
//!
//! Due calendars are listed a page at a time. Each page fans out to at most
//! `concurrency` imports at once, and the next page is only listed once every
//! import of the current one has finished. A failing calendar is logged and
//! recorded on its row; it never stops the sweep.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::calendar::{Calendar, PageToken, SyncErrorRecord, SyncStateUpdate};
use crate::error::{IcalSyncError, IcalSyncResult};
use crate::event::FeedEvent;
use crate::fetch::FeedFetcher;
use crate::ics::parse_feed_bytes;
use crate::store::{ImportStats, PreparedEvent, Store, SyncLease};

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub page_size: usize,
    pub concurrency: usize,
    /// A calendar synced more recently than this is not due
    pub staleness: Duration,
    pub lease_ttl: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions {
            page_size: 100,
            concurrency: 8,
            staleness: Duration::from_secs(5 * 60),
            lease_ttl: Duration::from_secs(10 * 60),
        }
    }
}

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub pages: usize,
    pub synced: usize,
    pub failed: usize,
    /// Calendars whose lease was held by another sweep
    pub skipped: usize,
    pub events: usize,
    pub alarms: usize,
}

impl SweepSummary {
    fn record(&mut self, outcome: CalendarOutcome) {
        match outcome {
            CalendarOutcome::Synced(stats) => {
                self.synced += 1;
                self.events += stats.events;
                self.alarms += stats.alarms;
            }
            CalendarOutcome::Skipped => self.skipped += 1,
            CalendarOutcome::Failed => self.failed += 1,
        }
    }
}

enum CalendarOutcome {
    Synced(ImportStats),
    Skipped,
    Failed,
}

pub struct SyncDriver {
    store: Store,
    fetcher: FeedFetcher,
    options: SyncOptions,
}

impl SyncDriver {
    pub fn new(store: Store, fetcher: FeedFetcher, options: SyncOptions) -> Self {
        SyncDriver {
            store,
            fetcher,
            options,
        }
    }

    /// Sync every due calendar once, then return.
    ///
    /// Fails only when listing a page fails or a worker task cannot be joined.
    pub async fn run(&self, cancel: &CancellationToken) -> IcalSyncResult<SweepSummary> {
        let page_size = self.options.page_size.max(1);
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let staleness = chrono::Duration::from_std(self.options.staleness)
            .map_err(|e| IcalSyncError::Config(format!("staleness out of range: {e}")))?;

        let mut summary = SweepSummary::default();
        let mut page_token: Option<PageToken> = None;

        info!(page_size, concurrency = self.options.concurrency, "Starting sync sweep");

        loop {
            if cancel.is_cancelled() {
                info!("Sweep cancelled");
                break;
            }

            let stale_before = Utc::now() - staleness;
            let token = page_token.take();
            let (calendars, next) = blocking(&self.store, move |store| {
                store.list_due_calendars(page_size, token.as_ref(), stale_before)
            })
            .await?;
            summary.pages += 1;

            debug!(page = summary.pages, calendars = calendars.len(), "Processing page");

            let mut workers = JoinSet::new();
            for calendar in calendars {
                let permit = tokio::select! {
                    _ = cancel.cancelled() => break,
                    permit = Arc::clone(&semaphore).acquire_owned() => permit
                        .map_err(|e| IcalSyncError::TaskFailed(e.to_string()))?,
                };

                let store = self.store.clone();
                let fetcher = self.fetcher.clone();
                let lease_ttl = self.options.lease_ttl;
                let cancel = cancel.clone();

                workers.spawn(async move {
                    let outcome = sync_calendar(&store, &fetcher, calendar, lease_ttl, &cancel).await;
                    drop(permit);
                    outcome
                });
            }

            // The page boundary is a barrier
            while let Some(joined) = workers.join_next().await {
                let outcome = joined.map_err(|e| {
                    error!(error = %e, "Sync worker failed");
                    IcalSyncError::TaskFailed(e.to_string())
                })?;
                summary.record(outcome);
            }

            match next {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        info!(
            pages = summary.pages,
            synced = summary.synced,
            failed = summary.failed,
            skipped = summary.skipped,
            events = summary.events,
            alarms = summary.alarms,
            "Sync sweep finished"
        );

        Ok(summary)
    }
}

async fn sync_calendar(
    store: &Store,
    fetcher: &FeedFetcher,
    calendar: Calendar,
    lease_ttl: Duration,
    cancel: &CancellationToken,
) -> CalendarOutcome {
    let calendar_id = calendar.id.clone();
    let lease = blocking(store, move |store| store.acquire_lease(&calendar_id, lease_ttl)).await;

    let result = match lease {
        Ok(Some(lease)) => import_calendar(store, fetcher, &calendar, lease, cancel).await,
        Ok(None) => {
            debug!(calendar_id = %calendar.id, "Calendar is already being synced, skipping");
            return CalendarOutcome::Skipped;
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(stats) => {
            info!(
                calendar_id = %calendar.id,
                events = stats.events,
                alarms = stats.alarms,
                "Synced calendar"
            );
            CalendarOutcome::Synced(stats)
        }
        Err(e) => {
            error!(
                calendar_id = %calendar.id,
                feed_url = %calendar.feed_url,
                error = %e,
                "Calendar sync failed"
            );
            record_failure(store, &calendar.id, &e).await;
            CalendarOutcome::Failed
        }
    }
}

async fn import_calendar(
    store: &Store,
    fetcher: &FeedFetcher,
    calendar: &Calendar,
    lease: SyncLease,
    cancel: &CancellationToken,
) -> IcalSyncResult<ImportStats> {
    let body = match fetcher.fetch(&calendar.feed_url, cancel).await {
        Ok(body) => body,
        Err(e) => {
            blocking(store, move |store| {
                release_quietly(&store, &lease);
                Ok(())
            })
            .await?;
            return Err(e);
        }
    };

    let calendar = calendar.clone();
    let now = Utc::now();

    blocking(store, move |store| {
        let events = match parse_feed_bytes(&body) {
            Ok(events) => events,
            Err(e) => {
                release_quietly(&store, &lease);
                return Err(e);
            }
        };

        let prepared = match prepare_events(&calendar, &events, now) {
            Ok(prepared) => prepared,
            Err(e) => {
                release_quietly(&store, &lease);
                return Err(e);
            }
        };

        let mut import = store.start_import(lease, now)?;
        let result = prepared
            .iter()
            .try_for_each(|event| import.write_prepared(event).map(|_| ()));
        import.close(result)
    })
    .await
}

/// Plan every event of the feed, keeping those with alarms left to fire.
fn prepare_events(
    calendar: &Calendar,
    events: &[FeedEvent],
    now: DateTime<Utc>,
) -> IcalSyncResult<Vec<PreparedEvent>> {
    let overrides = overridden_starts(events);
    let no_overrides = HashSet::new();

    let mut prepared = Vec::new();
    for event in events {
        let overridden = match (&event.uid, &event.recurrence) {
            (Some(uid), Some(_)) => overrides.get(uid.as_str()).unwrap_or(&no_overrides),
            _ => &no_overrides,
        };
        if let Some(event) = PreparedEvent::plan(calendar, event, overridden, now)? {
            prepared.push(event);
        }
    }

    Ok(prepared)
}

/// Occurrence starts replaced by RECURRENCE-ID instances, per UID.
fn overridden_starts(events: &[FeedEvent]) -> HashMap<&str, HashSet<DateTime<Utc>>> {
    let mut overrides: HashMap<&str, HashSet<DateTime<Utc>>> = HashMap::new();

    for event in events {
        let (Some(uid), Some(recurrence_id)) = (&event.uid, &event.recurrence_id) else {
            continue;
        };
        if let Some(start) = recurrence_id.to_utc() {
            overrides.entry(uid.as_str()).or_default().insert(start);
        }
    }

    overrides
}

fn release_quietly(store: &Store, lease: &SyncLease) {
    if let Err(e) = store.release_lease(lease) {
        warn!(calendar_id = %lease.calendar_id(), error = %e, "Could not release sync lease");
    }
}

async fn record_failure(store: &Store, calendar_id: &str, error: &IcalSyncError) {
    let update = SyncStateUpdate {
        last_sync_error: Some(Some(SyncErrorRecord::from_error(error, Utc::now()))),
        ..Default::default()
    };
    let id = calendar_id.to_string();

    if let Err(e) = blocking(store, move |store| store.update_sync_state(&id, &update)).await {
        warn!(calendar_id, error = %e, "Could not record sync error");
    }
}

/// Run blocking store work off the async runtime.
async fn blocking<T, F>(store: &Store, work: F) -> IcalSyncResult<T>
where
    F: FnOnce(Store) -> IcalSyncResult<T> + Send + 'static,
    T: Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || work(store))
        .await
        .map_err(|e| IcalSyncError::TaskFailed(e.to_string()))?
}
