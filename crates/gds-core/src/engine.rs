//! Capability interface of the external quasi-dynamic simulation engine.
//!
//! The engine holds exactly one mutable network per handle. Every method is
//! synchronous and order dependent; callers own the handle exclusively for the
//! duration of a grid's trial loop.

use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::curves::{ControlCurve, ControlCurveVariant};
use crate::error::{EngineResult, GdsError, GdsResult};
use crate::model::{Device, DeviceCategory, DeviceId, EventAction, Load, RawResultTable};
use crate::units::{MegavoltAmperes, Megawatts};

/// Load-flow formulation used for each quasi-dynamic step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkMode {
    /// AC load flow, balanced, positive sequence
    AcBalanced,
}

/// Result variables to record, per element class.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResultVariables(pub BTreeMap<String, Vec<String>>);

impl ResultVariables {
    /// Terminal voltages, plus generated P/Q unless `voltages_only`.
    pub fn terminals(voltages_only: bool) -> Self {
        let mut variables = vec!["m:u".to_string()];
        if !voltages_only {
            variables.push("m:Pgen".to_string());
            variables.push("m:Qgen".to_string());
        }
        let mut map = BTreeMap::new();
        map.insert("ElmTerm".to_string(), variables);
        Self(map)
    }

    pub fn for_class(&self, class: &str) -> &[String] {
        self.0.get(class).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parallelism {
    pub cores: usize,
}

/// Everything pushed into the engine's quasi-dynamic command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSettings {
    pub network_mode: NetworkMode,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub step_minutes: u32,
    pub result_variables: ResultVariables,
    pub parallelism: Option<Parallelism>,
}

/// Attributes of a static generator to create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorSpec {
    pub name: String,
    pub cubicle: DeviceId,
    pub category: DeviceCategory,
    pub rated_power: MegavoltAmperes,
    pub setpoint: Megawatts,
    pub control_curve: ControlCurveVariant,
    pub profile: Option<String>,
    pub in_service: bool,
}

/// Objects this pipeline may create inside the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeviceSpec {
    /// Connection point on a terminal
    Cubicle { name: String, terminal: String },
    /// Static generator attached to a cubicle
    StaticGenerator(GeneratorSpec),
}

impl DeviceSpec {
    pub fn name(&self) -> &str {
        match self {
            DeviceSpec::Cubicle { name, .. } => name,
            DeviceSpec::StaticGenerator(spec) => &spec.name,
        }
    }
}

/// Event as submitted to the engine, already in the engine's zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineEvent {
    pub name: String,
    pub at: DateTime<FixedOffset>,
    pub target: DeviceId,
    pub action: EventAction,
}

/// The engine's local time zone. The only place UTC instants are converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineZone(FixedOffset);

impl EngineZone {
    pub fn new(offset: FixedOffset) -> Self {
        Self(offset)
    }

    pub fn utc() -> Self {
        Self(Utc.fix())
    }

    /// Parse `+HH:MM` / `-HH:MM` / `Z`.
    pub fn parse(value: &str) -> GdsResult<Self> {
        let trimmed = value.trim();
        if trimmed.eq_ignore_ascii_case("z") || trimmed.eq_ignore_ascii_case("utc") {
            return Ok(Self::utc());
        }
        trimmed.parse::<FixedOffset>().map(Self).map_err(|err| {
            GdsError::Config(format!(
                "engine utc offset '{value}' must look like +01:00: {err}"
            ))
        })
    }

    pub fn offset(&self) -> FixedOffset {
        self.0
    }

    pub fn localize(&self, at: DateTime<Utc>) -> DateTime<FixedOffset> {
        at.with_timezone(&self.0)
    }
}

/// Operations the pipeline needs from the simulation engine.
pub trait SimulationEngine {
    /// Push time range, step, result selection and parallelism.
    fn configure(&mut self, settings: &SimulationSettings) -> EngineResult<()>;

    fn create_device(&mut self, spec: &DeviceSpec) -> EngineResult<DeviceId>;

    fn delete_device(&mut self, id: &DeviceId) -> EngineResult<()>;

    fn schedule_event(&mut self, event: &EngineEvent) -> EngineResult<()>;

    fn clear_events(&mut self) -> EngineResult<()>;

    /// Run the configured simulation. Blocks until the run finishes.
    fn execute(&mut self) -> EngineResult<RawResultTable>;

    fn set_in_service(&mut self, id: &DeviceId, in_service: bool) -> EngineResult<()>;

    /// Static generators currently in the network.
    fn devices(&self) -> EngineResult<Vec<Device>>;

    fn loads(&self) -> EngineResult<Vec<Load>>;

    /// Every network element name, for name canonicalisation.
    fn element_names(&self) -> EngineResult<Vec<DeviceId>>;

    fn rename_device(&mut self, id: &DeviceId, new_name: &str) -> EngineResult<DeviceId>;

    /// Replace (or create) the curve object for `curve.variant`.
    fn install_control_curve(&mut self, curve: &ControlCurve) -> EngineResult<()>;

    /// Point a time characteristic at its profile file.
    fn bind_profile_source(&mut self, profile: &str, source: &Path) -> EngineResult<()>;
}

/// Opens one engine handle per grid.
pub trait EngineProvider {
    type Engine: SimulationEngine;

    fn open(&self, grid: &str, grid_dir: &Path) -> GdsResult<Self::Engine>;
}
