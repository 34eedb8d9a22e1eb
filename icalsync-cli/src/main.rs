mod commands;
mod utils;

use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use icalsync_core::{ReminderMode, SyncConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "icalsync")]
#[command(about = "Sync subscribed ICS feeds into a store of upcoming alarms")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync every due calendar once
    Sync,
    /// Sync due calendars on an interval until interrupted
    Watch,
    /// Manage subscribed calendars
    Calendars {
        #[command(subcommand)]
        command: CalendarCommands,
    },
    /// List alarms firing soon
    Alarms {
        /// How far ahead to look (e.g. "30m", "1h", "2days")
        #[arg(long, default_value = "1h", value_parser = humantime::parse_duration)]
        within: Duration,
    },
    /// Show paths and effective configuration
    Config,
}

#[derive(Subcommand)]
enum CalendarCommands {
    /// Subscribe to a feed (http, https, webcal or webcals URL)
    Add {
        url: String,

        /// How default reminders combine with the feed's own (unset-only, add, replace)
        #[arg(short, long, default_value = "unset-only")]
        mode: ReminderMode,

        /// Default reminder lead time, repeatable (e.g. -r 10m -r 1h)
        #[arg(short, long = "reminder", value_parser = humantime::parse_duration)]
        reminders: Vec<Duration>,
    },
    /// List subscribed calendars and their sync state
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = SyncConfig::load()?;
    init_tracing(&config.log);

    match cli.command {
        Commands::Sync => commands::sync::run(&config).await,
        Commands::Watch => commands::watch::run(&config).await,
        Commands::Calendars { command } => match command {
            CalendarCommands::Add {
                url,
                mode,
                reminders,
            } => commands::calendars::add(&config, url, mode, reminders),
            CalendarCommands::List => commands::calendars::list(&config),
        },
        Commands::Alarms { within } => commands::alarms::run(&config, within),
        Commands::Config => commands::config::run(&config),
    }
}

/// Logs go to stderr so command output stays clean. RUST_LOG wins over the config.
fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
