//! `table` subcommand

use anyhow::{Context, Result};
use std::path::Path;

use bms_can::table::run_table;
use bms_can::TableConfig;

pub fn run(data: &Path, config_path: &Path, output: &Path) -> Result<()> {
    log::info!("Loading table configuration: {:?}", config_path);
    let config = TableConfig::load(config_path)?;

    let written = run_table(data, &config, output)
        .with_context(|| format!("Could not build tables from {}", data.display()))?;
    for path in written {
        println!("{}", path.display());
    }
    Ok(())
}
