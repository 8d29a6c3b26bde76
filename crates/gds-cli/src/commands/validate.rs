use anyhow::Result;
use std::path::Path;

use crate::commands::util::load_config;

pub fn handle(path: &Path, seed: Option<u64>) -> Result<()> {
    let config = load_config(path, seed)?;
    let inverse = config.inverse_positive_share()?;
    if let Some(window) = config.fixed_window()? {
        println!("Fixed window: {} .. {}", window.start(), window.end());
    }
    println!(
        "Experiment config valid: dataset '{}', {} trials per grid, 1 positive per {} samples",
        config.dataset_name(),
        config.trials_per_grid,
        inverse
    );
    Ok(())
}
