use anyhow::{bail, Result};
use gds_batch::generate_all;
use gds_core::SyntheticProvider;
use std::path::Path;

use crate::commands::util::load_config;

pub fn handle(path: &Path, seed: Option<u64>, grid_threads: Option<usize>) -> Result<()> {
    let mut config = load_config(path, seed)?;
    if let Some(threads) = grid_threads {
        config.grid_threads = threads;
    }
    println!(
        "Generating '{}' from {}",
        config.dataset_name(),
        config.data_folder.display()
    );
    let summary = generate_all(&SyntheticProvider, &config)?;
    for grid in &summary.grids {
        match &grid.error {
            None => println!(
                "  ✓ {} - {} runs from run #{}",
                grid.grid, grid.runs_written, grid.first_run
            ),
            Some(err) => println!("  ✗ {} - {err}", grid.grid),
        }
    }
    println!(
        "Grids: {} ok, {} failed; manifest {}",
        summary.success,
        summary.failure,
        summary.manifest_path.display()
    );
    if summary.failure > 0 {
        bail!("{} of {} grids failed", summary.failure, summary.grids.len());
    }
    Ok(())
}
