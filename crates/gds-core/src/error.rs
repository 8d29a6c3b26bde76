//! Unified error types for the dataset pipeline.
//!
//! [`GdsError`] covers the failure classes every stage can produce. Engine
//! calls fail with the narrower [`EngineError`], which converts into
//! `GdsError::Engine` at the orchestration boundary.
//!
//! # Example
//!
//! ```ignore
//! use gds_core::{GdsError, GdsResult};
//!
//! fn check_share(share: f64) -> GdsResult<()> {
//!     if share <= 0.0 {
//!         return Err(GdsError::Config("share must be positive".into()));
//!     }
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// Unified error type for pipeline operations.
#[derive(Error, Debug)]
pub enum GdsError {
    /// I/O errors (profile files, run artifacts, dataset output)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parsing/deserialization errors
    #[error("Parse error: {0}")]
    Parse(String),

    /// Configuration errors (invalid or inconsistent experiment settings)
    #[error("Configuration error: {0}")]
    Config(String),

    /// No valid time window could be produced under the configured policy
    #[error("Time window error: {0}")]
    Window(String),

    /// Scenario cannot be built from the available devices
    #[error("Scenario error: {0}")]
    Scenario(String),

    /// Run lifecycle called out of order
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// Failure reported by the simulation engine
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Raw or persisted run data does not have the expected shape
    #[error("Result error: {0}")]
    Result(String),

    /// Generic errors (for wrapping external errors)
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Results using GdsError.
pub type GdsResult<T> = Result<T, GdsError>;

/// Failure of a single call into the simulation engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("engine call '{call}' failed: {message}")]
    Call { call: &'static str, message: String },

    #[error("engine object '{0}' not found")]
    NotFound(String),

    #[error("engine rejected object '{name}': {reason}")]
    Rejected { name: String, reason: String },
}

impl EngineError {
    pub fn call(call: &'static str, message: impl Into<String>) -> Self {
        EngineError::Call {
            call,
            message: message.into(),
        }
    }
}

/// Result alias for engine calls.
pub type EngineResult<T> = Result<T, EngineError>;

impl From<anyhow::Error> for GdsError {
    fn from(err: anyhow::Error) -> Self {
        GdsError::Other(format!("{err:#}"))
    }
}

impl From<String> for GdsError {
    fn from(s: String) -> Self {
        GdsError::Other(s)
    }
}

impl From<&str> for GdsError {
    fn from(s: &str) -> Self {
        GdsError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for GdsError {
    fn from(err: serde_json::Error) -> Self {
        GdsError::Parse(err.to_string())
    }
}

impl From<csv::Error> for GdsError {
    fn from(err: csv::Error) -> Self {
        GdsError::Parse(err.to_string())
    }
}

impl From<chrono::ParseError> for GdsError {
    fn from(err: chrono::ParseError) -> Self {
        GdsError::Parse(err.to_string())
    }
}
