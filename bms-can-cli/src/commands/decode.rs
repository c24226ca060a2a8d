//! `decode` subcommand

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use bms_can::{run_decoder, DecoderConfig};

pub fn run(config_path: &Path, output: Option<PathBuf>) -> Result<()> {
    log::info!("Loading decoder configuration: {:?}", config_path);
    let config = DecoderConfig::load(config_path)?.with_output(output);
    if let Some(dir) = &config.output {
        log::info!("Writing decoded messages to {:?}", dir);
    }

    run_decoder(&config).context("Decoding failed")?;
    Ok(())
}
