//! Historical load / generation profiles of a grid.
//!
//! Each grid directory holds `LoadProfile.csv` and `RESProfile.csv`: `;`
//! delimited, a `time` index column, one column per profile. The load profile
//! defines the valid simulation range `[T0, T1]`.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use std::path::{Path, PathBuf};

pub const LOAD_PROFILE_FILE: &str = "LoadProfile.csv";
pub const GENERATION_PROFILE_FILE: &str = "RESProfile.csv";
const TIME_COLUMN: &str = "time";

/// One profile file, column-major.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileTable {
    pub path: PathBuf,
    pub times: Vec<DateTime<Utc>>,
    pub columns: Vec<String>,
    pub values: Vec<Vec<f64>>,
}

impl ProfileTable {
    pub fn read(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b';')
            .trim(csv::Trim::All)
            .from_path(path)
            .with_context(|| format!("opening profile '{}'", path.display()))?;
        let headers = reader
            .headers()
            .with_context(|| format!("reading profile header of '{}'", path.display()))?
            .clone();
        let time_idx = headers
            .iter()
            .position(|h| h == TIME_COLUMN)
            .ok_or_else(|| anyhow!("profile '{}' has no '{TIME_COLUMN}' column", path.display()))?;
        let columns: Vec<String> = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != time_idx)
            .map(|(_, h)| h.to_string())
            .collect();

        let mut times = Vec::new();
        let mut values = vec![Vec::new(); columns.len()];
        for (row, record) in reader.records().enumerate() {
            let record = record
                .with_context(|| format!("reading row {} of '{}'", row + 1, path.display()))?;
            let raw_time = record.get(time_idx).unwrap_or_default();
            times.push(
                parse_timestamp(raw_time)
                    .with_context(|| format!("row {} of '{}'", row + 1, path.display()))?,
            );
            let mut col = 0;
            for (i, field) in record.iter().enumerate() {
                if i == time_idx {
                    continue;
                }
                let value = field.parse::<f64>().with_context(|| {
                    format!(
                        "parsing value '{field}' in column '{}' of '{}'",
                        columns[col],
                        path.display()
                    )
                })?;
                values[col].push(value);
                col += 1;
            }
        }
        if times.is_empty() {
            return Err(anyhow!("profile '{}' has no rows", path.display()));
        }
        Ok(Self {
            path: path.to_path_buf(),
            times,
            columns,
            values,
        })
    }

    pub fn first_time(&self) -> DateTime<Utc> {
        self.times[0]
    }

    pub fn last_time(&self) -> DateTime<Utc> {
        self.times[self.times.len() - 1]
    }

    pub fn series(&self, column: &str) -> Option<&[f64]> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|idx| self.values[idx].as_slice())
    }

    /// Value in effect at `at` (last sample at or before it; first sample before the range).
    pub fn value_at(&self, column: &str, at: DateTime<Utc>) -> Option<f64> {
        let series = self.series(column)?;
        let idx = self.times.partition_point(|t| *t <= at);
        series.get(idx.saturating_sub(1)).copied()
    }
}

/// Both profiles of one grid.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileData {
    pub load: ProfileTable,
    pub generation: ProfileTable,
}

impl ProfileData {
    pub fn load(grid_dir: &Path) -> Result<Self> {
        Ok(Self {
            load: ProfileTable::read(&grid_dir.join(LOAD_PROFILE_FILE))?,
            generation: ProfileTable::read(&grid_dir.join(GENERATION_PROFILE_FILE))?,
        })
    }

    /// Flat hourly profiles over `hours` hours from `start`.
    pub fn constant(
        start: DateTime<Utc>,
        hours: i64,
        load_columns: &[&str],
        generation_columns: &[&str],
        value: f64,
    ) -> Self {
        let times: Vec<DateTime<Utc>> = (0..=hours).map(|h| start + Duration::hours(h)).collect();
        let table = |file: &str, columns: &[&str]| ProfileTable {
            path: PathBuf::from(file),
            times: times.clone(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            values: vec![vec![value; times.len()]; columns.len()],
        };
        Self {
            load: table(LOAD_PROFILE_FILE, load_columns),
            generation: table(GENERATION_PROFILE_FILE, generation_columns),
        }
    }

    /// Valid simulation range `[T0, T1]`.
    pub fn bounds(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (self.load.first_time(), self.load.last_time())
    }

    /// Every profile column with the file that carries it.
    pub fn sources(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.load
            .columns
            .iter()
            .map(|c| (c.as_str(), self.load.path.as_path()))
            .chain(
                self.generation
                    .columns
                    .iter()
                    .map(|c| (c.as_str(), self.generation.path.as_path())),
            )
    }
}

/// RFC3339, or a naive `%Y-%m-%d %H:%M:%S` interpreted as UTC.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S"))
        .with_context(|| format!("parsing timestamp '{value}'; use RFC3339"))?;
    Ok(Utc.from_utc_datetime(&naive))
}
