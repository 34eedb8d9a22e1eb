use anyhow::Result;
use icalsync_core::SyncConfig;
use owo_colors::OwoColorize;

pub fn run(config: &SyncConfig) -> Result<()> {
    let config_path = SyncConfig::config_path()?;

    println!("{}", "Paths".bold());
    println!("  Config:    {}", config_path.display());
    println!("  Database:  {}", config.database_path().display());

    println!("\n{}", "Settings".bold());
    for line in config.to_toml()?.lines() {
        println!("  {}", line);
    }

    Ok(())
}
