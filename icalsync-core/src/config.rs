//! Engine configuration at ~/.config/icalsync/config.toml
//!
//! Every field has a default, and any field can be overridden with an
//! `ICALSYNC_<FIELD>` environment variable (e.g. `ICALSYNC_CONCURRENCY=4`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{IcalSyncError, IcalSyncResult};
use crate::fetch::DEFAULT_MAX_FEED_BYTES;
use crate::sync::SyncOptions;

static DEFAULT_DATABASE_PATH: &str = "~/.local/share/icalsync/icalsync.db";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// SQLite database holding calendars, events and alarms
    pub database_path: PathBuf,

    #[serde(with = "humantime_str")]
    pub request_timeout: Duration,

    pub max_feed_bytes: u64,

    /// Due calendars listed per page
    pub page_size: usize,

    /// Imports running at once within a page
    pub concurrency: usize,

    /// How long a successful sync keeps a calendar from being due again
    #[serde(with = "humantime_str")]
    pub staleness: Duration,

    /// How long an import may hold its calendar before another sweep can take over
    #[serde(with = "humantime_str")]
    pub lease_ttl: Duration,

    /// Pause between sweeps in `icalsync watch`
    #[serde(with = "humantime_str")]
    pub sync_interval: Duration,

    /// Default tracing filter, overridden by RUST_LOG
    pub log: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            request_timeout: Duration::from_secs(30),
            max_feed_bytes: DEFAULT_MAX_FEED_BYTES,
            page_size: 100,
            concurrency: 8,
            staleness: Duration::from_secs(5 * 60),
            lease_ttl: Duration::from_secs(10 * 60),
            sync_interval: Duration::from_secs(60),
            log: "info".to_string(),
        }
    }
}

impl SyncConfig {
    pub fn config_path() -> IcalSyncResult<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| IcalSyncError::Config("Could not determine config directory".into()))?
            .join("icalsync");

        Ok(config_dir.join("config.toml"))
    }

    /// Load from the default config path, creating a commented template on first run.
    pub fn load() -> IcalSyncResult<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            Self::create_default_config(&config_path)?;
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> IcalSyncResult<Self> {
        let config: SyncConfig = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(Environment::with_prefix("ICALSYNC").try_parsing(true))
            .build()
            .map_err(|e| IcalSyncError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| IcalSyncError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> IcalSyncResult<()> {
        if self.page_size == 0 {
            return Err(IcalSyncError::Config("page_size must be at least 1".into()));
        }
        if self.concurrency == 0 {
            return Err(IcalSyncError::Config("concurrency must be at least 1".into()));
        }
        if self.max_feed_bytes == 0 {
            return Err(IcalSyncError::Config("max_feed_bytes must be at least 1".into()));
        }
        Ok(())
    }

    /// Database path with `~` expanded.
    pub fn database_path(&self) -> PathBuf {
        let full_path_str =
            shellexpand::tilde(&self.database_path.to_string_lossy()).into_owned();

        PathBuf::from(full_path_str)
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            page_size: self.page_size,
            concurrency: self.concurrency,
            staleness: self.staleness,
            lease_ttl: self.lease_ttl,
        }
    }

    /// Effective configuration rendered as TOML.
    pub fn to_toml(&self) -> IcalSyncResult<String> {
        toml::to_string_pretty(self).map_err(|e| IcalSyncError::Config(e.to_string()))
    }

    /// Create a default config file with all options commented out.
    pub fn create_default_config(path: &Path) -> IcalSyncResult<()> {
        let contents = format!(
            "\
# icalsync configuration

# Where calendars, events and alarms are stored:
# database_path = \"{DEFAULT_DATABASE_PATH}\"

# Feed download limits:
# request_timeout = \"30s\"
# max_feed_bytes = {DEFAULT_MAX_FEED_BYTES}

# Sweep tuning:
# page_size = 100
# concurrency = 8
# staleness = \"5m\"
# lease_ttl = \"10m\"

# Pause between sweeps for `icalsync watch`:
# sync_interval = \"1m\"

# Log filter (RUST_LOG takes precedence):
# log = \"info\"
"
        );

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                IcalSyncError::Config(format!("Could not create config directory: {e}"))
            })?;
        }

        std::fs::write(path, contents)
            .map_err(|e| IcalSyncError::Config(format!("Could not write config file: {e}")))?;

        Ok(())
    }
}

/// Durations written the human way (`30s`, `5m`, `1h 30m`).
mod humantime_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
