//! Trial execution: drive the engine through each trial, turn its output
//! into run records and persist them, one grid at a time.

pub mod driver;
pub mod manifest;
pub mod postprocess;
pub mod runner;
pub mod store;

pub use driver::{RunDriver, RunPhase, RunSettings};
pub use manifest::{
    load_generation_manifest, write_generation_manifest, GenerationManifest, GridRecord,
    MANIFEST_FILE,
};
pub use postprocess::{
    is_power_variable, MalfunctionFacts, RecordColumn, ResultPostProcessor, RunMetadata,
    RunRecord, POWER_VARIABLES,
};
pub use runner::{
    generate_all, generate_for_grid, list_grids, GenerationSummary, GridRunSummary,
    RunLoopController,
};
pub use store::{parse_run_number, run_file_name, RunStore};
