use clap::{Parser, Subcommand, ValueHint};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Synthetic grid disturbance datasets", long_about = None)]
pub struct Cli {
    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    /// Override the configured random seed
    #[arg(long, global = true)]
    pub seed: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Simulate every grid of the data folder and persist one file per run
    Generate {
        /// Experiment configuration (TOML, YAML or JSON)
        #[arg(long, value_hint = ValueHint::FilePath)]
        config: PathBuf,
        /// Grids simulated concurrently (0 = one per CPU)
        #[arg(long)]
        grid_threads: Option<usize>,
    },
    /// Build the labeled dataset from persisted runs
    Assemble {
        /// Experiment configuration (TOML, YAML or JSON)
        #[arg(long, value_hint = ValueHint::FilePath)]
        config: PathBuf,
    },
    /// Check an experiment configuration without running anything
    Validate {
        /// Experiment configuration (TOML, YAML or JSON)
        #[arg(long, value_hint = ValueHint::FilePath)]
        config: PathBuf,
    },
}
