//! Experiment configuration.
//!
//! One immutable [`ExperimentConfig`] is loaded per invocation and passed by
//! reference into every stage. It is usually stored as TOML; YAML and JSON are
//! accepted by extension. Unspecified fields fall back to the defaults below.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::curves::ControlCurveVariant;
use crate::engine::EngineZone;
use crate::error::{GdsError, GdsResult};
use crate::model::TimeWindow;
use crate::profile::parse_timestamp;

/// Which labeled dataset the experiment produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    /// Malfunctioning PV controllers; positives are terminals with a malfunction
    MalfunctionsInLvGrid,
    /// PV presence; positives are terminals with an installed PV
    PvNoPv,
}

impl DatasetKind {
    pub fn default_name(&self) -> &'static str {
        match self {
            DatasetKind::MalfunctionsInLvGrid => "malfunctions_in_LV_grid_dataset",
            DatasetKind::PvNoPv => "PV_noPV",
        }
    }

    pub fn injects_disturbance(&self) -> bool {
        matches!(self, DatasetKind::MalfunctionsInLvGrid)
    }
}

/// What to do with a randomly drawn window that overruns the profile range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum WindowPolicy {
    /// Draw again, up to `max_draws` candidates in total
    Retry { max_draws: usize },
    /// Fall back to the latest window that fits
    Clamp,
    /// Fail the trial
    Abort,
}

impl Default for WindowPolicy {
    fn default() -> Self {
        WindowPolicy::Retry { max_draws: 1000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Window length in days; `None` simulates the full profile range.
    pub length_days: Option<u32>,
    /// Fixed window start (RFC3339); must be set together with `fixed_end`.
    pub fixed_start: Option<String>,
    pub fixed_end: Option<String>,
    pub policy: WindowPolicy,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            length_days: Some(1),
            fixed_start: None,
            fixed_end: None,
            policy: WindowPolicy::default(),
        }
    }
}

/// Full experiment settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Directory with one subdirectory (profiles + topology) per grid.
    pub data_folder: PathBuf,

    /// Root for raw run files and the assembled dataset.
    pub results_folder: PathBuf,

    pub dataset_kind: DatasetKind,

    /// Overrides the kind's default dataset name.
    pub dataset_name: Option<String>,

    pub window: WindowConfig,

    /// Quasi-dynamic step size in minutes.
    pub step_minutes: u32,

    /// Share of candidate PV units installed per trial, in percent.
    pub activation_percentage: f64,

    /// Malfunctioning devices per trial.
    pub malfunction_count: usize,

    /// Control law of the regular PV fleet.
    pub control_curve: ControlCurveVariant,

    /// Control law injected into malfunctioning shadow devices.
    pub broken_control_curve: ControlCurveVariant,

    /// Trials per grid.
    pub trials_per_grid: usize,

    /// Malfunction active for the whole window instead of from a random instant.
    pub whole_window: bool,

    /// Truncate power columns to integer watts.
    pub reduce_result_file_size: bool,

    /// Decimal places of floating values in written tables.
    pub float_decimal: usize,

    /// Ask the engine to parallelise its own run step.
    pub parallel_computing: bool,
    pub cores: usize,

    /// Record terminal voltages only.
    pub voltages_only: bool,

    /// Continue numbering after existing run files instead of starting at 0.
    pub resume: bool,

    /// Fraction of positive samples in the assembled dataset; its inverse must be an integer.
    pub share_of_positive_samples: f64,

    /// Target number of samples in the assembled dataset.
    pub number_of_samples: usize,

    /// Terminal variable extracted as sample series.
    pub sample_variable: String,

    /// UTC offset of the engine's local time (`+01:00`).
    pub engine_utc_offset: String,

    pub seed: Option<u64>,

    /// Grids generated concurrently (0 = one per CPU, 1 = sequential).
    pub grid_threads: usize,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            data_folder: PathBuf::from("data"),
            results_folder: PathBuf::from("results"),
            dataset_kind: DatasetKind::MalfunctionsInLvGrid,
            dataset_name: None,
            window: WindowConfig::default(),
            step_minutes: 15,
            activation_percentage: 50.0,
            malfunction_count: 1,
            control_curve: ControlCurveVariant::CosPhiP,
            broken_control_curve: ControlCurveVariant::BrokenFlatQP,
            trials_per_grid: 10,
            whole_window: false,
            reduce_result_file_size: true,
            float_decimal: 5,
            parallel_computing: false,
            cores: 1,
            voltages_only: false,
            resume: true,
            share_of_positive_samples: 0.5,
            number_of_samples: 1000,
            sample_variable: "m:u".to_string(),
            engine_utc_offset: "+00:00".to_string(),
            seed: None,
            grid_threads: 1,
        }
    }
}

impl ExperimentConfig {
    /// Load from TOML, YAML or JSON (by extension; TOML otherwise) and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading experiment config '{}'", path.display()))?;
        let config: ExperimentConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                serde_yaml::from_str(&data).context("parsing experiment config yaml")?
            }
            Some(ext) if ext.eq_ignore_ascii_case("json") => {
                serde_json::from_str(&data).context("parsing experiment config json")?
            }
            _ => toml::from_str(&data).context("parsing experiment config toml")?,
        };
        config
            .validate()
            .with_context(|| format!("validating experiment config '{}'", path.display()))?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("serializing experiment config")?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating config directory '{}'", parent.display()))?;
        }
        fs::write(path, content)
            .with_context(|| format!("writing experiment config '{}'", path.display()))
    }

    pub fn validate(&self) -> GdsResult<()> {
        if !(self.activation_percentage > 0.0 && self.activation_percentage <= 100.0) {
            return Err(GdsError::Config(format!(
                "activation_percentage {} must be in (0, 100]",
                self.activation_percentage
            )));
        }
        if self.dataset_kind.injects_disturbance() && self.malfunction_count == 0 {
            return Err(GdsError::Config(
                "malfunction_count must be at least 1 for the malfunction dataset".into(),
            ));
        }
        if self.step_minutes == 0 {
            return Err(GdsError::Config("step_minutes must be positive".into()));
        }
        if self.trials_per_grid == 0 {
            return Err(GdsError::Config("trials_per_grid must be positive".into()));
        }
        if self.float_decimal > 12 {
            return Err(GdsError::Config("float_decimal must be at most 12".into()));
        }
        if self.parallel_computing && self.cores == 0 {
            return Err(GdsError::Config(
                "cores must be at least 1 when parallel_computing is on".into(),
            ));
        }
        if !(self.share_of_positive_samples > 0.0 && self.share_of_positive_samples <= 1.0) {
            return Err(GdsError::Config(format!(
                "share_of_positive_samples {} must be in (0, 1]",
                self.share_of_positive_samples
            )));
        }
        if let WindowPolicy::Retry { max_draws: 0 } = self.window.policy {
            return Err(GdsError::Config("window retry needs max_draws >= 1".into()));
        }
        if self.window.length_days == Some(0) {
            return Err(GdsError::Config("window length_days must be positive".into()));
        }
        self.engine_zone()?;
        self.fixed_window()?;
        Ok(())
    }

    pub fn dataset_name(&self) -> &str {
        self.dataset_name
            .as_deref()
            .unwrap_or_else(|| self.dataset_kind.default_name())
    }

    /// `<results>/<dataset_name>/_raw_data`
    pub fn raw_data_dir(&self) -> PathBuf {
        self.results_folder.join(self.dataset_name()).join("_raw_data")
    }

    /// `<results>/<dataset_name>.csv`
    pub fn dataset_path(&self) -> PathBuf {
        self.results_folder
            .join(format!("{}.csv", self.dataset_name()))
    }

    pub fn engine_zone(&self) -> GdsResult<EngineZone> {
        EngineZone::parse(&self.engine_utc_offset)
    }

    /// The explicitly configured window, if any.
    pub fn fixed_window(&self) -> GdsResult<Option<TimeWindow>> {
        match (&self.window.fixed_start, &self.window.fixed_end) {
            (None, None) => Ok(None),
            (Some(start), Some(end)) => {
                let start = parse_config_time(start)?;
                let end = parse_config_time(end)?;
                TimeWindow::new(start, end).map(Some)
            }
            _ => Err(GdsError::Config(
                "window fixed_start and fixed_end must be set together".into(),
            )),
        }
    }

    /// `1 / share_of_positive_samples` as an integer.
    pub fn inverse_positive_share(&self) -> GdsResult<usize> {
        inverse_share(self.share_of_positive_samples)
    }
}

pub fn inverse_share(share: f64) -> GdsResult<usize> {
    if !(share > 0.0 && share <= 1.0) {
        return Err(GdsError::Config(format!(
            "share of positive samples {share} must be in (0, 1]"
        )));
    }
    let inverse = 1.0 / share;
    let rounded = inverse.round();
    if (inverse - rounded).abs() > 1e-9 {
        return Err(GdsError::Config(format!(
            "share of positive samples {share} has non-integer inverse {inverse}; choose e.g. 0.25 or 0.5"
        )));
    }
    Ok(rounded as usize)
}

fn parse_config_time(value: &str) -> GdsResult<DateTime<Utc>> {
    parse_timestamp(value).map_err(|err| GdsError::Config(format!("{err:#}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_validate() {
        ExperimentConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("exp.toml");
        fs::write(
            &path,
            r#"
dataset_kind = "pv_no_pv"
trials_per_grid = 3
broken_control_curve = "inverted_qp"

[window]
length_days = 7
policy = { mode = "clamp" }
"#,
        )
        .unwrap();
        let config = ExperimentConfig::load(&path).unwrap();
        assert_eq!(config.dataset_kind, DatasetKind::PvNoPv);
        assert_eq!(config.trials_per_grid, 3);
        assert_eq!(config.window.length_days, Some(7));
        assert_eq!(config.window.policy, WindowPolicy::Clamp);
        assert_eq!(config.broken_control_curve, ControlCurveVariant::InvertedQP);
        assert_eq!(config.step_minutes, 15);
        assert_eq!(config.dataset_name(), "PV_noPV");
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("exp.toml");
        let mut config = ExperimentConfig::default();
        config.seed = Some(7);
        config.save(&path).unwrap();
        assert_eq!(ExperimentConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn inverse_share_must_be_integer() {
        assert_eq!(inverse_share(0.5).unwrap(), 2);
        assert_eq!(inverse_share(0.25).unwrap(), 4);
        assert_eq!(inverse_share(1.0).unwrap(), 1);
        assert!(matches!(inverse_share(0.3), Err(GdsError::Config(_))));
        assert!(inverse_share(0.0).is_err());
    }

    #[test]
    fn fixed_window_needs_both_bounds() {
        let mut config = ExperimentConfig::default();
        config.window.fixed_start = Some("2024-01-01T00:00:00Z".into());
        assert!(config.validate().is_err());
        config.window.fixed_end = Some("2024-01-02T00:00:00Z".into());
        let window = config.fixed_window().unwrap().unwrap();
        assert_eq!(window.duration_seconds(), 86_400);
    }

    #[test]
    fn paths_follow_dataset_name() {
        let mut config = ExperimentConfig::default();
        config.results_folder = PathBuf::from("out");
        assert_eq!(
            config.raw_data_dir(),
            PathBuf::from("out/malfunctions_in_LV_grid_dataset/_raw_data")
        );
        config.dataset_name = Some("mlf_1day".into());
        assert_eq!(config.dataset_path(), PathBuf::from("out/mlf_1day.csv"));
    }

    #[test]
    fn rejects_out_of_range_percentage() {
        let mut config = ExperimentConfig::default();
        config.activation_percentage = 0.0;
        assert!(matches!(config.validate(), Err(GdsError::Config(_))));
    }
}
