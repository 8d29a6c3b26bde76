//! Flat-file storage of run records, one `;`-delimited CSV per trial.
//!
//! Layout: `<results>/<dataset>/_raw_data/<grid>/result_run#<n>.csv`. The
//! first three rows name object, element class and variable of each column;
//! the first column holds the timestamp and the last the metainfo facts.

use anyhow::{anyhow, bail, Context, Result};
use gds_core::{ColumnKey, ExperimentConfig};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

use crate::postprocess::{RecordColumn, RunMetadata, RunRecord};

const RUN_PREFIX: &str = "result_run#";
const RUN_SUFFIX: &str = ".csv";
const HEADER_LABELS: [&str; 3] = ["object", "class", "variable"];

/// `result_run#<n>.csv` → `n`.
pub fn parse_run_number(file_name: &str) -> Option<usize> {
    file_name
        .strip_prefix(RUN_PREFIX)?
        .strip_suffix(RUN_SUFFIX)?
        .parse()
        .ok()
}

pub fn run_file_name(run: usize) -> String {
    format!("{RUN_PREFIX}{run}{RUN_SUFFIX}")
}

#[derive(Debug, Clone)]
pub struct RunStore {
    dir: PathBuf,
    float_decimal: usize,
}

impl RunStore {
    pub fn new(dir: impl Into<PathBuf>, float_decimal: usize) -> Self {
        Self {
            dir: dir.into(),
            float_decimal,
        }
    }

    pub fn for_grid(config: &ExperimentConfig, grid: &str) -> Self {
        Self::new(config.raw_data_dir().join(grid), config.float_decimal)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn run_path(&self, run: usize) -> PathBuf {
        self.dir.join(run_file_name(run))
    }

    /// Run numbers present on disk, ascending.
    pub fn run_numbers(&self) -> Result<Vec<usize>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut runs = Vec::new();
        for entry in fs::read_dir(&self.dir)
            .with_context(|| format!("listing run directory '{}'", self.dir.display()))?
        {
            let entry = entry?;
            if let Some(run) = entry.file_name().to_str().and_then(parse_run_number) {
                runs.push(run);
            }
        }
        runs.sort_unstable();
        Ok(runs)
    }

    /// Number of run files already written.
    pub fn existing_runs(&self) -> Result<usize> {
        Ok(self.run_numbers()?.len())
    }

    /// First run number after every persisted run; 0 for an empty store.
    pub fn next_run(&self) -> Result<usize> {
        let runs = self.run_numbers()?;
        let next = runs.last().map_or(0, |last| last + 1);
        if next != runs.len() {
            warn!(
                dir = %self.dir.display(),
                existing = runs.len(),
                next,
                "run numbers are not contiguous; continuing after the highest"
            );
        }
        Ok(next)
    }

    /// Write `record` as run `run`, atomically: a temporary file in the same
    /// directory is linked into place. An existing run file is never replaced.
    pub fn write(&self, run: usize, record: &RunRecord) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating run directory '{}'", self.dir.display()))?;
        let target = self.run_path(run);
        if target.exists() {
            bail!("run file '{}' already exists", target.display());
        }
        let temp = self
            .dir
            .join(format!(".{}.{}.tmp", run_file_name(run), Uuid::new_v4()));
        let written = self.write_csv(&temp, record);
        if let Err(err) = written {
            let _ = fs::remove_file(&temp);
            return Err(err);
        }
        let linked = fs::hard_link(&temp, &target).with_context(|| {
            format!(
                "moving '{}' into place at '{}'",
                temp.display(),
                target.display()
            )
        });
        let _ = fs::remove_file(&temp);
        linked?;
        Ok(target)
    }

    fn write_csv(&self, path: &Path, record: &RunRecord) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b';')
            .from_path(path)
            .with_context(|| format!("creating run file '{}'", path.display()))?;
        let metainfo = ColumnKey::metainfo();
        for (row, label) in HEADER_LABELS.iter().enumerate() {
            let mut fields = vec![label.to_string()];
            for column in &record.columns {
                fields.push(header_cell(&column.key, row).to_string());
            }
            fields.push(header_cell(&metainfo, row).to_string());
            writer.write_record(&fields)?;
        }
        let cells = record.metainfo_cells();
        for (row, time) in record.index.iter().enumerate() {
            let mut fields = Vec::with_capacity(record.columns.len() + 2);
            fields.push(time.clone());
            for column in &record.columns {
                fields.push(self.format_value(column, row));
            }
            fields.push(cells[row].clone());
            writer.write_record(&fields)?;
        }
        writer
            .flush()
            .with_context(|| format!("flushing run file '{}'", path.display()))?;
        Ok(())
    }

    fn format_value(&self, column: &RecordColumn, row: usize) -> String {
        let value = column.values[row];
        if column.integral {
            format!("{}", value as i64)
        } else {
            format!("{value:.*}", self.float_decimal)
        }
    }

    /// Read back a run file written by [`RunStore::write`].
    pub fn read(path: &Path) -> Result<RunRecord> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b';')
            .has_headers(false)
            .from_path(path)
            .with_context(|| format!("opening run file '{}'", path.display()))?;
        let mut rows = reader.records();
        let mut header = Vec::with_capacity(3);
        for label in HEADER_LABELS {
            let record = rows
                .next()
                .ok_or_else(|| anyhow!("run file '{}' ends inside its header", path.display()))??;
            if record.get(0) != Some(label) {
                bail!(
                    "run file '{}' header row should start with '{label}'",
                    path.display()
                );
            }
            header.push(record);
        }
        let width = header[0].len();
        if width < 2 {
            bail!("run file '{}' has no metainfo column", path.display());
        }
        let keys: Vec<ColumnKey> = (1..width)
            .map(|i| {
                ColumnKey::new(
                    header[0].get(i).unwrap_or_default(),
                    header[1].get(i).unwrap_or_default(),
                    header[2].get(i).unwrap_or_default(),
                )
            })
            .collect();
        let Some((last, data_keys)) = keys.split_last() else {
            bail!("run file '{}' has no columns", path.display());
        };
        if !last.is_metainfo() {
            bail!("run file '{}' does not end with the metainfo column", path.display());
        }

        let mut index = Vec::new();
        let mut values = vec![Vec::new(); data_keys.len()];
        let mut integral = vec![true; data_keys.len()];
        let mut facts = Vec::new();
        for (row, record) in rows.enumerate() {
            let record = record.with_context(|| {
                format!("reading row {} of '{}'", row + 1, path.display())
            })?;
            index.push(record.get(0).unwrap_or_default().to_string());
            for (col, series) in values.iter_mut().enumerate() {
                let cell = record.get(col + 1).unwrap_or_default();
                if cell.contains('.') {
                    integral[col] = false;
                }
                series.push(cell.parse::<f64>().with_context(|| {
                    format!(
                        "parsing '{cell}' in column {} of '{}'",
                        data_keys[col],
                        path.display()
                    )
                })?);
            }
            let fact = record.get(width - 1).unwrap_or_default();
            if !fact.is_empty() {
                facts.push(fact.to_string());
            }
        }
        let metadata = RunMetadata::parse(&facts)
            .with_context(|| format!("reading metadata of '{}'", path.display()))?;
        let columns = data_keys
            .iter()
            .cloned()
            .zip(values)
            .zip(integral)
            .map(|((key, values), integral)| RecordColumn {
                key,
                values,
                integral,
            })
            .collect();
        Ok(RunRecord {
            index,
            columns,
            metadata,
        })
    }
}

fn header_cell(key: &ColumnKey, row: usize) -> &str {
    match row {
        0 => &key.object,
        1 => &key.class,
        _ => &key.variable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gds_core::ControlCurveVariant;
    use crate::postprocess::MalfunctionFacts;
    use tempfile::tempdir;

    fn record(rows: usize) -> RunRecord {
        RunRecord {
            index: (0..rows)
                .map(|i| format!("2024-01-01T{:02}:00:00+00:00", i))
                .collect(),
            columns: vec![
                RecordColumn {
                    key: ColumnKey::new("Terminal 1", "ElmTerm", "m:u"),
                    values: vec![1.0123456; rows],
                    integral: false,
                },
                RecordColumn {
                    key: ColumnKey::new("Terminal 1", "ElmTerm", "m:Pgen"),
                    values: vec![1_999_900.0; rows],
                    integral: true,
                },
            ],
            metadata: RunMetadata {
                run: 0,
                step_minutes: 60,
                start: "2024-01-01T00:00:00+00:00".into(),
                end: "2024-01-01T23:00:00+00:00".into(),
                malfunction: Some(MalfunctionFacts {
                    terminals: vec!["Terminal 1".into()],
                    curve: ControlCurveVariant::InvertedQP,
                    time: "2024-01-01T03:12:00+00:00".into(),
                }),
                pv_terminals: vec!["Terminal 1".into()],
                terminals: None,
            },
        }
    }

    #[test]
    fn run_numbers_come_from_file_names() {
        assert_eq!(parse_run_number("result_run#12.csv"), Some(12));
        assert_eq!(parse_run_number("result_run#x.csv"), None);
        assert_eq!(parse_run_number(".result_run#1.csv.abc.tmp"), None);
        assert_eq!(run_file_name(4), "result_run#4.csv");
    }

    #[test]
    fn written_file_reads_back_at_fixed_precision() {
        let dir = tempdir().unwrap();
        let store = RunStore::new(dir.path().join("grid"), 3);
        let path = store.write(0, &record(24)).unwrap();
        assert_eq!(path, store.run_path(0));

        let text = fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap(), "object;Terminal 1;Terminal 1;metainfo");
        assert_eq!(lines.next().unwrap(), "class;ElmTerm;ElmTerm;in the first");
        assert_eq!(lines.next().unwrap(), "variable;m:u;m:Pgen;few indices");
        assert_eq!(
            lines.next().unwrap(),
            "2024-01-01T00:00:00+00:00;1.012;1999900;simulation#0"
        );

        let back = RunStore::read(&path).unwrap();
        assert_eq!(back.rows(), 24);
        assert_eq!(back.metadata, record(24).metadata);
        assert_eq!(back.columns[1].values[0], 1_999_900.0);
        assert!(back.columns[1].integral);
        assert!(!back.columns[0].integral);
    }

    #[test]
    fn existing_run_file_is_never_replaced() {
        let dir = tempdir().unwrap();
        let store = RunStore::new(dir.path(), 3);
        store.write(3, &record(12)).unwrap();
        let before = fs::read_to_string(store.run_path(3)).unwrap();

        let mut changed = record(12);
        changed.columns[0].values = vec![2.0; 12];
        assert!(store.write(3, &changed).is_err());
        assert_eq!(fs::read_to_string(store.run_path(3)).unwrap(), before);
        assert_eq!(store.run_numbers().unwrap(), vec![3]);
    }

    #[test]
    fn next_run_continues_after_a_gap() {
        let dir = tempdir().unwrap();
        let store = RunStore::new(dir.path(), 3);
        assert_eq!(store.next_run().unwrap(), 0);
        for run in [0, 1, 3] {
            store.write(run, &record(12)).unwrap();
        }
        assert_eq!(store.existing_runs().unwrap(), 3);
        assert_eq!(store.next_run().unwrap(), 4);
    }

    #[test]
    fn existing_runs_ignore_foreign_files() {
        let dir = tempdir().unwrap();
        let store = RunStore::new(dir.path(), 5);
        assert_eq!(store.existing_runs().unwrap(), 0);
        store.write(0, &record(12)).unwrap();
        store.write(1, &record(12)).unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();
        assert_eq!(store.run_numbers().unwrap(), vec![0, 1]);
        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .ends_with(".tmp")
            })
            .count();
        assert_eq!(leftovers, 0);
    }
}
