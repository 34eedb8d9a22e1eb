pub mod alarms;
pub mod calendars;
pub mod config;
pub mod sync;
pub mod watch;

use anyhow::Result;
use icalsync_core::{FeedFetcher, Store, SyncConfig, SyncDriver};

pub fn open_store(config: &SyncConfig) -> Result<Store> {
    Ok(Store::open(&config.database_path())?)
}

pub fn build_driver(config: &SyncConfig) -> Result<SyncDriver> {
    let store = open_store(config)?;
    let fetcher = FeedFetcher::new(config.request_timeout, config.max_feed_bytes)?;
    Ok(SyncDriver::new(store, fetcher, config.sync_options()))
}
