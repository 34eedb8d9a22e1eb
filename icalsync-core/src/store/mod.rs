//! SQLite persistence for calendars, materialized events and their alarms.
//!
//! All methods are blocking; async callers run them on
//! `tokio::task::spawn_blocking`.

mod alarms;
mod calendars;
mod import;
mod schema;

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use tracing::{debug, info, instrument};

use crate::error::{IcalSyncError, IcalSyncResult};

pub use alarms::{DueAlarm, StoredEvent};
pub use import::{Import, ImportStats, PreparedEvent, SyncLease};

const POOL_SIZE: u32 = 16;
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

type Connection = PooledConnection<SqliteConnectionManager>;

/// Handle to the sync database. Cheap to clone; clones share one pool.
#[derive(Clone, Debug)]
pub struct Store {
    pool: Pool<SqliteConnectionManager>,
}

impl Store {
    /// Open (creating if needed) the database at `path` and bring its schema up to date.
    #[instrument(fields(db_path = ?path))]
    pub fn open(path: &Path) -> IcalSyncResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    IcalSyncError::StorageFailed(format!(
                        "Could not create database directory: {e}"
                    ))
                })?;
            }
        }

        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode=WAL;\nPRAGMA synchronous=NORMAL;\nPRAGMA foreign_keys=ON;\n",
            )?;
            conn.busy_timeout(BUSY_TIMEOUT)
        });

        let pool = Pool::builder()
            .max_size(POOL_SIZE)
            .connection_timeout(BUSY_TIMEOUT)
            .build(manager)?;

        let store = Store { pool };
        store.migrate()?;

        info!("Opened calendar store");
        Ok(store)
    }

    /// Create any missing tables and indexes. Safe to run repeatedly.
    pub fn migrate(&self) -> IcalSyncResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(schema::SCHEMA)?;
        debug!("Schema is up to date");
        Ok(())
    }

    fn conn(&self) -> IcalSyncResult<Connection> {
        Ok(self.pool.get()?)
    }
}

pub(crate) fn to_unix(time: DateTime<Utc>) -> i64 {
    time.timestamp()
}

pub(crate) fn from_unix(secs: i64) -> IcalSyncResult<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| IcalSyncError::StorageFailed(format!("timestamp out of range: {secs}")))
}
