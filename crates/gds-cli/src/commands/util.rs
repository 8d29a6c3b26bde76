use anyhow::Result;
use gds_core::ExperimentConfig;
use std::path::Path;

/// Load and validate `path`, then apply command-line overrides.
pub fn load_config(path: &Path, seed: Option<u64>) -> Result<ExperimentConfig> {
    let mut config = ExperimentConfig::load(path)?;
    if seed.is_some() {
        config.seed = seed;
    }
    Ok(config)
}
