//! Dataset assembly for `gds`.
//!
//! Reads the per-run CSV files written by `gds-batch`, skips runs whose
//! combination (malfunction location and type, or PV placement) was already
//! used, and labels one series per terminal: positives at the affected
//! terminals, negatives drawn from the rest at a fixed ratio.

pub mod assemble;
pub mod registry;

pub use assemble::{assemble_dataset, AssemblyReport, Dataset, DatasetAssembler, Sample};
pub use registry::{CombinationKey, CombinationRegistry};
