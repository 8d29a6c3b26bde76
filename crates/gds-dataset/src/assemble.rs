//! Assembly of persisted runs into one labeled, deduplicated dataset.

use anyhow::{anyhow, bail, Context, Result};
use gds_batch::{parse_run_number, RunRecord, RunStore};
use gds_core::{DatasetKind, ExperimentConfig, GdsError};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::registry::{CombinationKey, CombinationRegistry};

const TERMINAL_CLASS: &str = "ElmTerm";
const STAGE: &str = "assemble";

/// One labeled series of the sample variable at one terminal.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// `<grid>/run#<n>/<terminal>`
    pub id: String,
    pub label: u8,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssemblyReport {
    pub grids: usize,
    pub runs_used: usize,
    pub duplicates: usize,
    pub length_mismatches: usize,
    pub positives: usize,
    pub negatives: usize,
}

/// Samples side by side, one column each, all of the same length.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub name: String,
    pub kind: DatasetKind,
    pub sample_variable: String,
    pub steps: usize,
    pub samples: Vec<Sample>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn positives(&self) -> usize {
        self.samples.iter().filter(|s| s.label == 1).count()
    }

    fn facts(&self) -> Vec<String> {
        vec![
            format!("dataset: {}", self.name),
            format!("kind: {}", kind_name(self.kind)),
            format!("sample variable: {}", self.sample_variable),
            format!("samples: {}", self.samples.len()),
            format!("positive samples: {}", self.positives()),
        ]
    }

    /// Write as `;` delimited CSV: a header of sample ids, a label row, then
    /// one row per step. The last column carries the dataset facts.
    pub fn write(&self, path: &Path, float_decimal: usize) -> Result<()> {
        let facts = self.facts();
        let rows = self.steps + 1;
        if facts.len() > rows {
            bail!(
                "dataset '{}' has {rows} rows, too few for {} metainfo entries",
                self.name,
                facts.len()
            );
        }
        let mut cells = facts;
        cells.resize(rows, String::new());

        let mut writer = csv::WriterBuilder::new()
            .delimiter(b';')
            .from_path(path)
            .with_context(|| format!("creating dataset file '{}'", path.display()))?;
        let mut header = vec!["step".to_string()];
        header.extend(self.samples.iter().map(|s| s.id.clone()));
        header.push("metainfo".to_string());
        writer.write_record(&header)?;

        let mut labels = vec!["label".to_string()];
        labels.extend(self.samples.iter().map(|s| s.label.to_string()));
        labels.push(cells[0].clone());
        writer.write_record(&labels)?;

        for step in 0..self.steps {
            let mut fields = Vec::with_capacity(self.samples.len() + 2);
            fields.push(step.to_string());
            for sample in &self.samples {
                fields.push(format!("{:.*}", float_decimal, sample.values[step]));
            }
            fields.push(cells[step + 1].clone());
            writer.write_record(&fields)?;
        }
        writer
            .flush()
            .with_context(|| format!("flushing dataset file '{}'", path.display()))?;
        Ok(())
    }

    /// Read a file produced by [`Dataset::write`].
    pub fn read(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b';')
            .from_path(path)
            .with_context(|| format!("opening dataset file '{}'", path.display()))?;
        let header = reader.headers()?.clone();
        let width = header.len();
        if width < 2 || header.get(width - 1) != Some("metainfo") {
            bail!("dataset file '{}' does not end with the metainfo column", path.display());
        }
        let mut samples: Vec<Sample> = (1..width - 1)
            .map(|i| Sample {
                id: header.get(i).unwrap_or_default().to_string(),
                label: 0,
                values: Vec::new(),
            })
            .collect();

        let mut records = reader.records();
        let labels = records
            .next()
            .ok_or_else(|| anyhow!("dataset file '{}' has no label row", path.display()))??;
        if labels.get(0) != Some("label") {
            bail!("second row of '{}' should be the label row", path.display());
        }
        let mut facts = vec![labels.get(width - 1).unwrap_or_default().to_string()];
        for (i, sample) in samples.iter_mut().enumerate() {
            let cell = labels.get(i + 1).unwrap_or_default();
            sample.label = cell
                .parse()
                .with_context(|| format!("parsing label '{cell}' of '{}'", sample.id))?;
        }

        let mut steps = 0;
        for record in records {
            let record = record
                .with_context(|| format!("reading step {steps} of '{}'", path.display()))?;
            for (i, sample) in samples.iter_mut().enumerate() {
                let cell = record.get(i + 1).unwrap_or_default();
                sample.values.push(cell.parse().with_context(|| {
                    format!("parsing '{cell}' of sample '{}'", sample.id)
                })?);
            }
            facts.push(record.get(width - 1).unwrap_or_default().to_string());
            steps += 1;
        }

        let fact = |key: &str| {
            facts
                .iter()
                .find_map(|f| f.strip_prefix(key).and_then(|rest| rest.strip_prefix(": ")))
                .map(str::to_string)
                .ok_or_else(|| anyhow!("dataset file '{}' lacks '{key}'", path.display()))
        };
        let kind = match fact("kind")?.as_str() {
            "malfunctions_in_lv_grid" => DatasetKind::MalfunctionsInLvGrid,
            "pv_no_pv" => DatasetKind::PvNoPv,
            other => bail!("unknown dataset kind '{other}'"),
        };
        Ok(Self {
            name: fact("dataset")?,
            kind,
            sample_variable: fact("sample variable")?,
            steps,
            samples,
        })
    }
}

fn kind_name(kind: DatasetKind) -> &'static str {
    match kind {
        DatasetKind::MalfunctionsInLvGrid => "malfunctions_in_lv_grid",
        DatasetKind::PvNoPv => "pv_no_pv",
    }
}

/// Collects samples from the raw run corpus of one experiment.
pub struct DatasetAssembler<'c> {
    config: &'c ExperimentConfig,
    inverse_share: usize,
}

impl<'c> DatasetAssembler<'c> {
    /// Fails with [`GdsError::Config`] unless `1 / share_of_positive_samples`
    /// is an integer.
    pub fn new(config: &'c ExperimentConfig) -> Result<Self, GdsError> {
        Ok(Self {
            config,
            inverse_share: config.inverse_positive_share()?,
        })
    }

    /// Negatives drawn per positive.
    pub fn negatives_per_positive(&self) -> usize {
        self.inverse_share - 1
    }

    pub fn assemble<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<(Dataset, AssemblyReport)> {
        let raw_dir = self.config.raw_data_dir();
        let mut grids = Vec::new();
        for entry in fs::read_dir(&raw_dir)
            .with_context(|| format!("listing raw data directory '{}'", raw_dir.display()))?
        {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                grids.push(entry.path());
            }
        }
        grids.sort();

        let mut dataset = Dataset {
            name: self.config.dataset_name().to_string(),
            kind: self.config.dataset_kind,
            sample_variable: self.config.sample_variable.clone(),
            steps: 0,
            samples: Vec::new(),
        };
        let mut report = AssemblyReport::default();
        let mut registry = CombinationRegistry::new();
        let mut expected_rows = None;

        'grids: for grid_dir in &grids {
            let grid = grid_dir
                .file_name()
                .and_then(OsStr::to_str)
                .unwrap_or_default()
                .to_string();
            report.grids += 1;
            for (run, path) in self.run_files(grid_dir)? {
                if dataset.samples.len() >= self.config.number_of_samples {
                    break 'grids;
                }
                let record = RunStore::read(&path)?;
                let key = CombinationKey::from_metadata(&grid, self.config.dataset_kind, &record.metadata)
                    .with_context(|| format!("deriving combination of '{}'", path.display()))?;
                if registry.contains(&key) {
                    registry.register(key.clone());
                    debug!(grid = %grid, run, %key, "combination already used, run skipped");
                    continue;
                }
                let rows = *expected_rows.get_or_insert(record.rows());
                if record.rows() != rows {
                    warn!(
                        grid = %grid,
                        run,
                        rows = record.rows(),
                        expected = rows,
                        "run length differs from dataset, skipped"
                    );
                    report.length_mismatches += 1;
                    continue;
                }
                let samples = self.extract(&grid, run, &record, rng);
                for sample in &samples {
                    if sample.label == 1 {
                        report.positives += 1;
                    } else {
                        report.negatives += 1;
                    }
                }
                dataset.samples.extend(samples);
                registry.register(key);
                report.runs_used += 1;
            }
        }
        if dataset.samples.len() < self.config.number_of_samples {
            warn!(
                samples = dataset.samples.len(),
                target = self.config.number_of_samples,
                "raw data exhausted before the sample target"
            );
        }
        dataset.steps = expected_rows.unwrap_or(0);
        report.duplicates = registry.duplicates();
        info!(
            runs = report.runs_used,
            duplicates = report.duplicates,
            positives = report.positives,
            negatives = report.negatives,
            "dataset assembled"
        );
        Ok((dataset, report))
    }

    /// The first `trials_per_grid` run files of a grid, by run number.
    fn run_files(&self, grid_dir: &Path) -> Result<Vec<(usize, PathBuf)>> {
        let mut runs = Vec::new();
        for entry in fs::read_dir(grid_dir)
            .with_context(|| format!("listing grid runs in '{}'", grid_dir.display()))?
        {
            let entry = entry?;
            if let Some(run) = entry.file_name().to_str().and_then(parse_run_number) {
                runs.push((run, entry.path()));
            }
        }
        runs.sort();
        runs.truncate(self.config.trials_per_grid);
        Ok(runs)
    }

    fn extract<R: Rng + ?Sized>(
        &self,
        grid: &str,
        run: usize,
        record: &RunRecord,
        rng: &mut R,
    ) -> Vec<Sample> {
        let positives: BTreeSet<&str> = match self.config.dataset_kind {
            DatasetKind::MalfunctionsInLvGrid => record
                .metadata
                .malfunction
                .iter()
                .flat_map(|m| m.terminals.iter().map(String::as_str))
                .collect(),
            DatasetKind::PvNoPv => record.metadata.pv_terminals.iter().map(String::as_str).collect(),
        };
        let sample = |terminal: &str, values: &[f64], label: u8| Sample {
            id: format!("{grid}/run#{run}/{terminal}"),
            label,
            values: values.to_vec(),
        };

        let mut samples = Vec::new();
        let mut others = Vec::new();
        for column in record.columns_for(TERMINAL_CLASS, &self.config.sample_variable) {
            if positives.contains(column.key.object.as_str()) {
                samples.push(sample(&column.key.object, &column.values, 1));
            } else {
                others.push(column);
            }
        }
        if samples.len() < positives.len() {
            warn!(
                grid,
                run,
                expected = positives.len(),
                found = samples.len(),
                "positive terminals missing from run columns"
            );
        }

        let wanted = (samples.len() * self.negatives_per_positive()).min(others.len());
        for i in index::sample(rng, others.len(), wanted).into_iter() {
            let column = others[i];
            samples.push(sample(&column.key.object, &column.values, 0));
        }
        samples
    }
}

/// Assemble the configured dataset and write it to `config.dataset_path()`.
pub fn assemble_dataset(config: &ExperimentConfig) -> Result<(PathBuf, AssemblyReport)> {
    let assembler = DatasetAssembler::new(config)?;
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let (dataset, report) = assembler.assemble(&mut rng)?;
    let output = config.dataset_path();
    write_staged(&dataset, &output, config.float_decimal)?;
    info!(
        path = %output.display(),
        samples = dataset.len(),
        "dataset written"
    );
    Ok((output, report))
}

/// Write into `<parent>/assemble/<file>` first, then move into place.
fn write_staged(dataset: &Dataset, output: &Path, float_decimal: usize) -> Result<()> {
    let staged = staged_output_path(output);
    if let Some(parent) = staged.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating staging directory '{}'", parent.display()))?;
    }
    dataset.write(&staged, float_decimal)?;
    fs::rename(&staged, output)
        .with_context(|| format!("moving {} to {}", staged.display(), output.display()))?;
    Ok(())
}

fn staged_output_path(output: &Path) -> PathBuf {
    let parent = output.parent().unwrap_or_else(|| Path::new("."));
    let file_name = output.file_name().unwrap_or_else(|| OsStr::new("dataset.csv"));
    parent.join(STAGE).join(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn dataset() -> Dataset {
        Dataset {
            name: "d".into(),
            kind: DatasetKind::PvNoPv,
            sample_variable: "m:u".into(),
            steps: 6,
            samples: vec![
                Sample {
                    id: "g/run#0/T1".into(),
                    label: 1,
                    values: vec![1.0, 1.01, 1.02, 1.03, 1.04, 1.05],
                },
                Sample {
                    id: "g/run#0/T2".into(),
                    label: 0,
                    values: vec![0.99; 6],
                },
            ],
        }
    }

    #[test]
    fn non_integer_inverse_share_is_rejected() {
        let config = ExperimentConfig {
            share_of_positive_samples: 0.3,
            ..ExperimentConfig::default()
        };
        assert!(matches!(
            DatasetAssembler::new(&config),
            Err(GdsError::Config(_))
        ));
        let config = ExperimentConfig {
            share_of_positive_samples: 0.25,
            ..ExperimentConfig::default()
        };
        assert_eq!(
            DatasetAssembler::new(&config).unwrap().negatives_per_positive(),
            3
        );
    }

    #[test]
    fn written_dataset_reads_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("d.csv");
        dataset().write(&path, 3).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap(), "step;g/run#0/T1;g/run#0/T2;metainfo");
        assert_eq!(lines.next().unwrap(), "label;1;0;dataset: d");
        assert_eq!(lines.next().unwrap(), "0;1.000;0.990;kind: pv_no_pv");
        assert_eq!(Dataset::read(&path).unwrap(), dataset());
    }

    #[test]
    fn short_dataset_cannot_hold_its_facts() {
        let mut short = dataset();
        short.steps = 2;
        for sample in &mut short.samples {
            sample.values.truncate(2);
        }
        let dir = tempdir().unwrap();
        assert!(short.write(&dir.path().join("d.csv"), 3).is_err());
    }

    #[test]
    fn staged_path_sits_next_to_output() {
        let staged = staged_output_path(Path::new("/r/set.csv"));
        assert_eq!(staged, PathBuf::from("/r/assemble/set.csv"));
    }
}
