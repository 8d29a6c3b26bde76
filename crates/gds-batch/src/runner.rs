use anyhow::{anyhow, Context, Result};
use gds_core::{
    Device, EngineProvider, EngineZone, EventSchedule, ExperimentConfig, ProfileData,
    SimulationEngine, TimeWindow,
};
use gds_scenarios::{
    discover_candidates, prepare_grid, ActiveSet, DisturbanceInjector, Malfunction,
    MalfunctionSettings, ScenarioSampler, TrialLedger, WindowSelector,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::driver::{RunDriver, RunSettings};
use crate::manifest::{write_generation_manifest, GenerationManifest, GridRecord, MANIFEST_FILE};
use crate::postprocess::{MalfunctionFacts, ResultPostProcessor, RunMetadata};
use crate::store::RunStore;

/// What one grid's trial loop produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridRunSummary {
    pub grid: String,
    pub first_run: usize,
    pub runs_written: usize,
    pub output: PathBuf,
}

/// Runs the trials of one grid against one engine handle.
pub struct RunLoopController<'c> {
    config: &'c ExperimentConfig,
    grid: String,
    zone: EngineZone,
    selector: WindowSelector,
    sampler: ScenarioSampler,
    injector: Option<DisturbanceInjector>,
    settings: RunSettings,
    postprocessor: ResultPostProcessor,
    store: RunStore,
}

impl<'c> RunLoopController<'c> {
    pub fn new(config: &'c ExperimentConfig, grid: &str, profiles: &ProfileData) -> Result<Self> {
        let injector = config.dataset_kind.injects_disturbance().then(|| {
            DisturbanceInjector::new(MalfunctionSettings {
                count: config.malfunction_count,
                broken_curve: config.broken_control_curve,
                whole_window: config.whole_window,
            })
        });
        Ok(Self {
            config,
            grid: grid.to_string(),
            zone: config.engine_zone()?,
            selector: WindowSelector::from_config(config, profiles)
                .with_context(|| format!("setting up time windows for grid '{grid}'"))?,
            sampler: ScenarioSampler::new(config.activation_percentage)?,
            injector,
            settings: RunSettings::from_config(config),
            postprocessor: ResultPostProcessor::new(config.reduce_result_file_size),
            store: RunStore::for_grid(config, grid),
        })
    }

    pub fn store(&self) -> &RunStore {
        &self.store
    }

    /// First run number: one past the highest persisted run when resuming, else 0.
    pub fn start_run(&self) -> Result<usize> {
        if self.config.resume {
            self.store.next_run()
        } else {
            Ok(0)
        }
    }

    /// Run trials `start_run()..trials_per_grid`.
    ///
    /// Every trial is reset exactly once, after its record is persisted or
    /// after it failed. A failed trial ends the loop with its error.
    pub fn run<E, R>(&self, engine: &mut E, rng: &mut R) -> Result<GridRunSummary>
    where
        E: SimulationEngine,
        R: Rng + ?Sized,
    {
        let first_run = self.start_run()?;
        let total = self.config.trials_per_grid;
        if first_run >= total {
            info!(grid = %self.grid, existing = first_run, "grid already complete");
        }
        let candidates = discover_candidates(engine)
            .with_context(|| format!("listing PV candidates of grid '{}'", self.grid))?;
        info!(
            grid = %self.grid,
            candidates = candidates.len(),
            first_run,
            total,
            "starting trial loop"
        );

        let mut runs_written = 0;
        for run in first_run..total {
            let mut ledger = TrialLedger::new();
            let mut driver = RunDriver::new(&mut *engine, self.zone);
            let outcome = self.run_trial(&mut driver, &candidates, run, &mut ledger, rng);
            let reset = driver.reset(&mut ledger);
            if let (Err(_), Err(reset_err)) = (&outcome, &reset) {
                warn!(grid = %self.grid, run, "reset after failed run also failed: {reset_err}");
            }
            let path = outcome.with_context(|| format!("run {run} of grid '{}'", self.grid))?;
            reset.with_context(|| format!("resetting grid '{}' after run {run}", self.grid))?;
            runs_written += 1;
            info!(grid = %self.grid, run, path = %path.display(), "run persisted");
        }

        Ok(GridRunSummary {
            grid: self.grid.clone(),
            first_run,
            runs_written,
            output: self.store.dir().to_path_buf(),
        })
    }

    fn run_trial<E, R>(
        &self,
        driver: &mut RunDriver<'_, E>,
        candidates: &[Device],
        run: usize,
        ledger: &mut TrialLedger,
        rng: &mut R,
    ) -> Result<PathBuf>
    where
        E: SimulationEngine,
        R: Rng + ?Sized,
    {
        let active = self
            .sampler
            .sample(driver.engine_mut(), candidates, ledger, rng)?;
        let window = self.selector.select(rng)?;
        let mut schedule = EventSchedule::new();
        let malfunction = match &self.injector {
            Some(injector) => Some(injector.inject(
                driver.engine_mut(),
                &active,
                &window,
                ledger,
                &mut schedule,
                rng,
            )?),
            None => None,
        };

        driver.configure(&window, &self.settings)?;
        driver.arm(&schedule)?;
        driver.execute()?;
        let raw = driver.harvest()?;

        let metadata = self.metadata(run, &window, &active, malfunction.as_ref(), candidates);
        let record = self.postprocessor.process(raw, metadata, &self.zone)?;
        self.store.write(run, &record)
    }

    fn metadata(
        &self,
        run: usize,
        window: &TimeWindow,
        active: &ActiveSet,
        malfunction: Option<&Malfunction>,
        candidates: &[Device],
    ) -> RunMetadata {
        let terminals = (!self.config.dataset_kind.injects_disturbance()).then(|| {
            candidates
                .iter()
                .map(|d| d.terminal.clone())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        });
        RunMetadata {
            run,
            step_minutes: self.settings.step_minutes,
            start: self.zone.localize(window.start()).to_rfc3339(),
            end: self.zone.localize(window.end()).to_rfc3339(),
            malfunction: malfunction.map(|m| MalfunctionFacts {
                terminals: m.terminals.clone(),
                curve: m.curve,
                time: m.fault_time_in(&self.zone),
            }),
            pv_terminals: active.terminals.clone(),
            terminals,
        }
    }
}

/// Open, prepare and run one grid.
pub fn generate_for_grid<P, R>(
    provider: &P,
    config: &ExperimentConfig,
    grid: &str,
    grid_dir: &Path,
    rng: &mut R,
) -> Result<GridRunSummary>
where
    P: EngineProvider,
    R: Rng + ?Sized,
{
    let profiles = ProfileData::load(grid_dir)
        .with_context(|| format!("loading profiles of grid '{grid}'"))?;
    let mut engine = provider
        .open(grid, grid_dir)
        .with_context(|| format!("opening engine for grid '{grid}'"))?;
    prepare_grid(&mut engine, &profiles, config.control_curve)
        .with_context(|| format!("preparing grid '{grid}'"))?;
    let controller = RunLoopController::new(config, grid, &profiles)?;
    controller.run(&mut engine, rng)
}

/// Summary returned after all grids ran.
pub struct GenerationSummary {
    pub success: usize,
    pub failure: usize,
    pub manifest_path: PathBuf,
    pub grids: Vec<GridRecord>,
}

/// Grid directories below the data folder, sorted by name.
pub fn list_grids(data_folder: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut grids = Vec::new();
    for entry in fs::read_dir(data_folder)
        .with_context(|| format!("listing data folder '{}'", data_folder.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry
            .file_name()
            .into_string()
            .map_err(|name| anyhow!("grid directory name {name:?} is not valid unicode"))?;
        grids.push((name, entry.path()));
    }
    grids.sort();
    Ok(grids)
}

fn grid_rng(seed: Option<u64>, index: usize) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(index as u64)),
        None => StdRng::from_entropy(),
    }
}

fn run_grid<P: EngineProvider>(
    provider: &P,
    config: &ExperimentConfig,
    index: usize,
    grid: &str,
    grid_dir: &Path,
) -> GridRecord {
    let store = RunStore::for_grid(config, grid);
    let first_run = if config.resume {
        store.next_run().unwrap_or(0)
    } else {
        0
    };
    let mut rng = grid_rng(config.seed, index);
    match generate_for_grid(provider, config, grid, grid_dir, &mut rng) {
        Ok(summary) => GridRecord {
            grid: grid.to_string(),
            status: "ok".to_string(),
            first_run: summary.first_run,
            runs_written: summary.runs_written,
            error: None,
            output: summary.output.display().to_string(),
        },
        Err(err) => {
            error!(grid, "grid generation failed: {err:#}");
            let runs_written = store
                .run_numbers()
                .unwrap_or_default()
                .into_iter()
                .filter(|run| *run >= first_run)
                .count();
            GridRecord {
                grid: grid.to_string(),
                status: "error".to_string(),
                first_run,
                runs_written,
                error: Some(format!("{err:#}")),
                output: store.dir().display().to_string(),
            }
        }
    }
}

/// Generate runs for every grid in the data folder and write
/// `generation_manifest.json` next to the raw data.
///
/// Grids run sequentially unless `grid_threads` asks for more than one
/// thread (0 = one per CPU); each grid opens its own engine.
pub fn generate_all<P>(provider: &P, config: &ExperimentConfig) -> Result<GenerationSummary>
where
    P: EngineProvider + Sync,
{
    let grids = list_grids(&config.data_folder)?;
    if grids.is_empty() {
        warn!(folder = %config.data_folder.display(), "no grid directories found");
    }

    let thread_count = if config.grid_threads == 0 {
        num_cpus::get()
    } else {
        config.grid_threads
    };
    let records: Vec<GridRecord> = if thread_count > 1 {
        let pool = ThreadPoolBuilder::new()
            .num_threads(thread_count)
            .build()
            .context("building Rayon thread pool for grid generation")?;
        pool.install(|| {
            grids
                .par_iter()
                .enumerate()
                .map(|(index, (grid, dir))| run_grid(provider, config, index, grid, dir))
                .collect()
        })
    } else {
        grids
            .iter()
            .enumerate()
            .map(|(index, (grid, dir))| run_grid(provider, config, index, grid, dir))
            .collect()
    };

    let manifest = GenerationManifest::new(config.dataset_name(), records);
    let manifest_path = config
        .results_folder
        .join(config.dataset_name())
        .join(MANIFEST_FILE);
    write_generation_manifest(&manifest_path, &manifest)?;
    info!(
        success = manifest.success,
        failure = manifest.failure,
        manifest = %manifest_path.display(),
        "generation finished"
    );
    Ok(GenerationSummary {
        success: manifest.success,
        failure: manifest.failure,
        manifest_path,
        grids: manifest.grids,
    })
}
