use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::fs::File;
use std::path::Path;

pub const MANIFEST_FILE: &str = "generation_manifest.json";

/// Outcome of one grid's trial loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridRecord {
    pub grid: String,
    pub status: String,
    pub first_run: usize,
    pub runs_written: usize,
    pub error: Option<String>,
    pub output: String,
}

impl GridRecord {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationManifest {
    pub created_at: DateTime<Utc>,
    pub dataset_name: String,
    pub num_grids: usize,
    pub success: usize,
    pub failure: usize,
    pub grids: Vec<GridRecord>,
}

impl GenerationManifest {
    pub fn new(dataset_name: &str, grids: Vec<GridRecord>) -> Self {
        let success = grids.iter().filter(|g| g.is_ok()).count();
        Self {
            created_at: Utc::now(),
            dataset_name: dataset_name.to_string(),
            num_grids: grids.len(),
            success,
            failure: grids.len() - success,
            grids,
        }
    }
}

pub fn write_generation_manifest(path: &Path, manifest: &GenerationManifest) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating manifest directory '{}'", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(manifest)
        .context("serializing generation manifest to JSON")?;
    fs::write(path, json)
        .with_context(|| format!("writing generation manifest '{}'", path.display()))?;
    Ok(())
}

pub fn load_generation_manifest(path: &Path) -> Result<GenerationManifest> {
    let file = File::open(path)
        .with_context(|| format!("opening generation manifest '{}'", path.display()))?;
    serde_json::from_reader(file)
        .with_context(|| format!("parsing generation manifest '{}'", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn manifest_counts_and_reads_back() {
        let grids = vec![
            GridRecord {
                grid: "grid_a".into(),
                status: "ok".into(),
                first_run: 0,
                runs_written: 10,
                error: None,
                output: "results/x/_raw_data/grid_a".into(),
            },
            GridRecord {
                grid: "grid_b".into(),
                status: "error".into(),
                first_run: 2,
                runs_written: 1,
                error: Some("engine crashed".into()),
                output: "results/x/_raw_data/grid_b".into(),
            },
        ];
        let manifest = GenerationManifest::new("x", grids);
        assert_eq!((manifest.success, manifest.failure), (1, 1));

        let tmp = NamedTempFile::new().unwrap();
        write_generation_manifest(tmp.path(), &manifest).unwrap();
        let parsed = load_generation_manifest(tmp.path()).unwrap();
        assert_eq!(parsed.dataset_name, "x");
        assert_eq!(parsed.grids[1].error.as_deref(), Some("engine crashed"));
    }
}
