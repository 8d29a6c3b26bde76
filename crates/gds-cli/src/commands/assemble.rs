use anyhow::Result;
use gds_dataset::assemble_dataset;
use std::path::Path;

use crate::commands::util::load_config;

pub fn handle(path: &Path, seed: Option<u64>) -> Result<()> {
    let config = load_config(path, seed)?;
    println!("Assembling '{}'", config.dataset_name());
    let (output, report) = assemble_dataset(&config)?;
    println!(
        "Dataset written to {}: {} positive, {} negative samples from {} runs ({} duplicates skipped)",
        output.display(),
        report.positives,
        report.negatives,
        report.runs_used,
        report.duplicates
    );
    Ok(())
}
