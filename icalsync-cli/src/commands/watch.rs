use anyhow::Result;
use icalsync_core::SyncConfig;
use owo_colors::OwoColorize;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::utils::tui::{local_time, render_summary};

/// Run a sweep every `sync_interval` until Ctrl-C.
///
/// A sweep that fails as a whole is logged and retried on the next tick.
pub async fn run(config: &SyncConfig) -> Result<()> {
    let driver = super::build_driver(config)?;

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    println!(
        "Syncing every {} {}",
        humantime::format_duration(config.sync_interval),
        "(Ctrl-C to stop)".dimmed()
    );

    loop {
        match driver.run(&cancel).await {
            Ok(summary) => println!(
                "{} {}",
                local_time(chrono::Utc::now()).dimmed(),
                render_summary(&summary)
            ),
            Err(e) => error!(error = %e, "Sync sweep failed"),
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(config.sync_interval) => {}
        }
    }

    println!("Stopped");
    Ok(())
}
