//! Loads and validates the single TOML run configuration file.

use std::path::Path;

use emap_core::config::RunConfig;

use crate::error::Result;

pub fn load_run_config(path: &Path) -> Result<RunConfig> {
    let text = std::fs::read_to_string(path)?;
    let config: RunConfig = toml::from_str(&text)?;
    Ok(config)
}
