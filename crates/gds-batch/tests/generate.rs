use chrono::{Duration, TimeZone, Utc};
use gds_batch::{
    generate_all, load_generation_manifest, RunLoopController, RunStore, MANIFEST_FILE,
};
use gds_core::profile::{GENERATION_PROFILE_FILE, LOAD_PROFILE_FILE};
use gds_core::{
    ColumnKey, DatasetKind, ExperimentConfig, GdsError, ProfileData, SimulationEngine,
    SyntheticEngine, SyntheticProvider,
};
use gds_scenarios::prepare_grid;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn write_grid(dir: &Path, loads: usize, days: i64) {
    fs::create_dir_all(dir).unwrap();
    let t0 = Utc.with_ymd_and_hms(2023, 7, 1, 0, 0, 0).unwrap();
    let mut load = String::from("time");
    for i in 0..loads {
        write!(load, ";H{i}").unwrap();
    }
    load.push('\n');
    let mut generation = String::from("time;PV\n");
    for h in 0..=days * 24 {
        let at = (t0 + Duration::hours(h)).format("%Y-%m-%d %H:%M:%S");
        write!(load, "{at}").unwrap();
        for i in 0..loads {
            write!(load, ";{:.3}", 0.3 + 0.05 * i as f64 + 0.01 * (h % 24) as f64).unwrap();
        }
        load.push('\n');
        let sun = ((h % 24) as f64 - 12.0).abs();
        writeln!(generation, "{at};{:.3}", (1.0 - sun / 12.0).max(0.0)).unwrap();
    }
    fs::write(dir.join(LOAD_PROFILE_FILE), load).unwrap();
    fs::write(dir.join(GENERATION_PROFILE_FILE), generation).unwrap();
}

fn config(root: &Path) -> ExperimentConfig {
    ExperimentConfig {
        data_folder: root.join("data"),
        results_folder: root.join("results"),
        trials_per_grid: 3,
        seed: Some(17),
        step_minutes: 60,
        ..ExperimentConfig::default()
    }
}

#[test]
fn ten_device_grid_end_to_end() {
    let root = tempdir().unwrap();
    let config = config(root.path());
    write_grid(&config.data_folder.join("grid_a"), 10, 5);

    let summary = generate_all(&SyntheticProvider, &config).unwrap();
    assert_eq!((summary.success, summary.failure), (1, 0));
    assert_eq!(
        summary.manifest_path,
        config.results_folder.join(config.dataset_name()).join(MANIFEST_FILE)
    );
    let manifest = load_generation_manifest(&summary.manifest_path).unwrap();
    assert_eq!(manifest.grids[0].runs_written, 3);

    let store = RunStore::for_grid(&config, "grid_a");
    assert_eq!(store.run_numbers().unwrap(), vec![0, 1, 2]);
    for run in 0..3 {
        let record = RunStore::read(&store.run_path(run)).unwrap();
        let meta = &record.metadata;
        assert_eq!(meta.run, run);
        assert_eq!(meta.pv_terminals.len(), 5);
        let malfunction = meta.malfunction.as_ref().unwrap();
        assert_eq!(malfunction.terminals.len(), 1);
        assert!(meta.pv_terminals.contains(&malfunction.terminals[0]));
        assert!(malfunction.time > meta.start && malfunction.time < meta.end);
        assert_eq!(record.rows(), 25);
        assert_eq!(record.columns_for("ElmTerm", "m:u").count(), 10);
        let pgen = record
            .column(&ColumnKey::new(&malfunction.terminals[0], "ElmTerm", "m:Pgen"))
            .unwrap();
        assert!(pgen.integral);
    }
}

#[test]
fn resume_continues_numbering() {
    let root = tempdir().unwrap();
    let mut config = config(root.path());
    write_grid(&config.data_folder.join("grid_a"), 4, 3);
    config.trials_per_grid = 2;
    generate_all(&SyntheticProvider, &config).unwrap();

    config.trials_per_grid = 5;
    let summary = generate_all(&SyntheticProvider, &config).unwrap();
    assert_eq!(summary.grids[0].first_run, 2);
    assert_eq!(summary.grids[0].runs_written, 3);
    let store = RunStore::for_grid(&config, "grid_a");
    assert_eq!(store.run_numbers().unwrap(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn resume_after_a_gap_keeps_persisted_runs() {
    let root = tempdir().unwrap();
    let mut config = config(root.path());
    write_grid(&config.data_folder.join("grid_a"), 4, 3);
    config.trials_per_grid = 4;
    generate_all(&SyntheticProvider, &config).unwrap();
    let store = RunStore::for_grid(&config, "grid_a");
    fs::remove_file(store.run_path(2)).unwrap();
    let run_3 = fs::read_to_string(store.run_path(3)).unwrap();

    config.trials_per_grid = 6;
    let summary = generate_all(&SyntheticProvider, &config).unwrap();
    assert_eq!(summary.grids[0].first_run, 4);
    assert_eq!(summary.grids[0].runs_written, 2);
    assert_eq!(store.run_numbers().unwrap(), vec![0, 1, 3, 4, 5]);
    assert_eq!(fs::read_to_string(store.run_path(3)).unwrap(), run_3);
}

#[test]
fn fresh_numbering_refuses_to_replace_runs() {
    let root = tempdir().unwrap();
    let mut config = config(root.path());
    write_grid(&config.data_folder.join("grid_a"), 4, 3);
    config.trials_per_grid = 1;
    generate_all(&SyntheticProvider, &config).unwrap();
    let store = RunStore::for_grid(&config, "grid_a");
    let run_0 = fs::read_to_string(store.run_path(0)).unwrap();

    config.resume = false;
    config.seed = Some(99);
    let summary = generate_all(&SyntheticProvider, &config).unwrap();
    assert_eq!(summary.failure, 1);
    assert!(summary.grids[0].error.as_deref().unwrap().contains("already exists"));
    assert_eq!(fs::read_to_string(store.run_path(0)).unwrap(), run_0);
}

#[test]
fn failing_grid_is_recorded_and_others_continue() {
    let root = tempdir().unwrap();
    let mut config = config(root.path());
    config.grid_threads = 2;
    write_grid(&config.data_folder.join("grid_a"), 4, 3);
    fs::create_dir_all(config.data_folder.join("grid_b")).unwrap();

    let summary = generate_all(&SyntheticProvider, &config).unwrap();
    assert_eq!((summary.success, summary.failure), (1, 1));
    assert_eq!(summary.grids[0].grid, "grid_a");
    assert!(summary.grids[1].error.as_deref().unwrap().contains("grid_b"));
}

fn prepared_engine(config: &ExperimentConfig) -> (SyntheticEngine, ProfileData) {
    write_grid(&config.data_folder.join("grid_a"), 6, 3);
    let profiles = ProfileData::load(&config.data_folder.join("grid_a")).unwrap();
    let mut engine = SyntheticEngine::from_profiles("grid_a", profiles.clone());
    prepare_grid(&mut engine, &profiles, config.control_curve).unwrap();
    (engine, profiles)
}

fn resets(engine: &SyntheticEngine) -> usize {
    engine
        .journal()
        .iter()
        .filter(|call| call.as_str() == "clear_events")
        .count()
}

#[test]
fn every_trial_is_reset_exactly_once() {
    let root = tempdir().unwrap();
    let config = config(root.path());
    let (mut engine, profiles) = prepared_engine(&config);
    let controller = RunLoopController::new(&config, "grid_a", &profiles).unwrap();
    let mut rng = StdRng::seed_from_u64(3);
    let summary = controller.run(&mut engine, &mut rng).unwrap();
    assert_eq!(summary.runs_written, 3);
    assert_eq!(resets(&engine), 3);
    assert!(engine.devices().unwrap().iter().all(|d| !d.in_service));
    assert!(engine.scheduled_events().is_empty());
}

#[test]
fn engine_failure_resets_then_aborts_grid() {
    let root = tempdir().unwrap();
    let config = config(root.path());
    let (mut engine, profiles) = prepared_engine(&config);
    let devices_before = engine.devices().unwrap();
    engine.fail_next_execute("license server unreachable");

    let controller = RunLoopController::new(&config, "grid_a", &profiles).unwrap();
    let mut rng = StdRng::seed_from_u64(3);
    let err = controller.run(&mut engine, &mut rng).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<GdsError>(),
        Some(GdsError::Engine(_))
    ));
    assert_eq!(resets(&engine), 1);
    assert_eq!(engine.devices().unwrap(), devices_before);
    assert_eq!(controller.store().existing_runs().unwrap(), 0);
}

#[test]
fn failed_run_with_failed_reset_reports_the_run_error() {
    let root = tempdir().unwrap();
    let config = config(root.path());
    let (mut engine, profiles) = prepared_engine(&config);
    engine.fail_next_execute("license server unreachable");
    engine.fail_next_clear_events("event list locked");

    let controller = RunLoopController::new(&config, "grid_a", &profiles).unwrap();
    let err = controller
        .run(&mut engine, &mut StdRng::seed_from_u64(3))
        .unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("license server unreachable"));
    assert!(!message.contains("event list locked"));
    assert_eq!(resets(&engine), 1);
    assert_eq!(controller.store().existing_runs().unwrap(), 0);
}

#[test]
fn pv_presence_runs_list_every_terminal() {
    let root = tempdir().unwrap();
    let mut config = config(root.path());
    config.dataset_kind = DatasetKind::PvNoPv;
    config.trials_per_grid = 1;
    let (mut engine, profiles) = prepared_engine(&config);
    let controller = RunLoopController::new(&config, "grid_a", &profiles).unwrap();
    controller
        .run(&mut engine, &mut StdRng::seed_from_u64(8))
        .unwrap();
    let record = RunStore::read(&controller.store().run_path(0)).unwrap();
    assert!(record.metadata.malfunction.is_none());
    assert_eq!(record.metadata.terminals.as_ref().map(Vec::len), Some(6));
    assert_eq!(record.metadata.pv_terminals.len(), 3);
    assert_eq!(resets(&engine), 1);
}
