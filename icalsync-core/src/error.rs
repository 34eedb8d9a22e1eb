//! Error types for the icalsync engine.

use thiserror::Error;

/// Errors that can occur while syncing calendar feeds.
#[derive(Error, Debug)]
pub enum IcalSyncError {
    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    #[error("Unexpected HTTP status code: {0}")]
    UnexpectedStatusCode(u16),

    #[error("ICS feed exceeded the maximum allowed size of {limit} bytes")]
    IcalSizeExceeded { limit: u64 },

    #[error("ICS decode error: {0}")]
    DecodeFailed(String),

    #[error("Could not compute occurrences: {0}")]
    OccurrenceComputationFailed(String),

    #[error("Storage error: {0}")]
    StorageFailed(String),

    #[error("Invalid page token")]
    InvalidPageToken,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Sync task failed: {0}")]
    TaskFailed(String),
}

impl IcalSyncError {
    /// Stable name of the error kind, persisted in `last_sync_error`.
    pub fn kind(&self) -> &'static str {
        match self {
            IcalSyncError::FetchFailed(_) => "FetchFailed",
            IcalSyncError::UnexpectedStatusCode(_) => "UnexpectedStatusCode",
            IcalSyncError::IcalSizeExceeded { .. } => "IcalSizeExceeded",
            IcalSyncError::DecodeFailed(_) => "DecodeFailed",
            IcalSyncError::OccurrenceComputationFailed(_) => "OccurrenceComputationFailed",
            IcalSyncError::StorageFailed(_) => "StorageFailed",
            IcalSyncError::InvalidPageToken => "InvalidPageToken",
            IcalSyncError::Config(_) => "Config",
            IcalSyncError::TaskFailed(_) => "TaskFailed",
        }
    }
}

impl From<rusqlite::Error> for IcalSyncError {
    fn from(e: rusqlite::Error) -> Self {
        IcalSyncError::StorageFailed(e.to_string())
    }
}

impl From<r2d2::Error> for IcalSyncError {
    fn from(e: r2d2::Error) -> Self {
        IcalSyncError::StorageFailed(format!("connection pool: {e}"))
    }
}

impl From<reqwest::Error> for IcalSyncError {
    fn from(e: reqwest::Error) -> Self {
        IcalSyncError::FetchFailed(e.to_string())
    }
}

/// Result type alias for icalsync operations.
pub type IcalSyncResult<T> = Result<T, IcalSyncError>;
