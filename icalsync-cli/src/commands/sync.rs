use anyhow::Result;
use icalsync_core::SyncConfig;
use tokio_util::sync::CancellationToken;

use crate::utils::tui::{create_spinner, render_summary};

pub async fn run(config: &SyncConfig) -> Result<()> {
    let driver = super::build_driver(config)?;

    let spinner = create_spinner("Syncing due calendars".to_string());
    let result = driver.run(&CancellationToken::new()).await;
    spinner.finish_and_clear();

    println!("{}", render_summary(&result?));
    Ok(())
}
