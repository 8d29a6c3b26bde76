//! # gds-core: shared model of the disturbance-dataset pipeline
//!
//! Types every stage agrees on: devices and events, the simulation engine
//! capability trait, control curves, profile data, unit newtypes, errors and
//! the experiment configuration.
//!
//! The engine is an external, stateful, single-threaded process. Everything
//! here talks to it through [`SimulationEngine`]; [`synthetic`] provides an
//! in-memory implementation for offline runs and tests.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gds_core::{EngineProvider, ExperimentConfig, SyntheticProvider};
//! use std::path::Path;
//!
//! let config = ExperimentConfig::load(Path::new("experiment.toml"))?;
//! let engine = SyntheticProvider.open("grid_a", &config.data_folder.join("grid_a"))?;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod config;
pub mod curves;
pub mod engine;
pub mod error;
pub mod model;
pub mod profile;
pub mod synthetic;
pub mod units;

pub use config::{DatasetKind, ExperimentConfig, WindowConfig, WindowPolicy};
pub use curves::{ControlCurve, ControlCurveVariant};
pub use engine::{
    DeviceSpec, EngineEvent, EngineProvider, EngineZone, GeneratorSpec, NetworkMode, Parallelism,
    ResultVariables, SimulationEngine, SimulationSettings,
};
pub use error::{EngineError, EngineResult, GdsError, GdsResult};
pub use model::{
    ColumnKey, Device, DeviceCategory, DeviceId, EventAction, EventRole, EventSchedule, Load,
    RawColumn, RawResultTable, ScheduledEvent, TimeWindow,
};
pub use profile::{ProfileData, ProfileTable};
pub use synthetic::{SyntheticEngine, SyntheticProvider};
pub use units::{MegavoltAmperes, Megavars, Megawatts, PerUnit, Watts};
