//! Trial construction: time windows, active device subsets, injected
//! malfunctions and one-off grid preparation.
//!
//! Everything here mutates the engine only through
//! [`gds_core::SimulationEngine`] and records what it changed in a
//! [`TrialLedger`] so the trial can be undone.

pub mod disturbance;
pub mod ledger;
pub mod prepare;
pub mod sampler;
pub mod window;

pub use disturbance::{DisturbanceInjector, Malfunction, MalfunctionSettings};
pub use ledger::TrialLedger;
pub use prepare::{canonical_name, canonicalize_names, prepare_grid, PreparationReport};
pub use sampler::{discover_candidates, ActiveSet, Scenario, ScenarioSampler};
pub use window::WindowSelector;
