//! `filter` subcommand

use anyhow::{Context, Result};
use std::path::Path;

use bms_can::{run_filter, FilterConfig};

pub fn run(config_path: &Path) -> Result<()> {
    log::info!("Loading filter configuration: {:?}", config_path);
    let config = FilterConfig::load(config_path)?;
    log::debug!("Allowed ids: {:X?}", config.ids);

    let stats = run_filter(&config).context("Filtering failed")?;
    log::info!(
        "Kept {} of {} lines",
        stats.lines_written,
        stats.lines_read
    );
    Ok(())
}
