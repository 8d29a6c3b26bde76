//! Shared data model: devices, time windows, event schedules and raw results.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::curves::ControlCurveVariant;
use crate::error::{GdsError, GdsResult};
use crate::units::{MegavoltAmperes, Megawatts};

/// Engine-side object identifier. Engine objects are addressed by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    #[inline]
    pub fn new(value: impl Into<String>) -> Self {
        DeviceId(value.into())
    }
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceCategory {
    Photovoltaic,
    Storage,
    Other,
}

/// A static generator as seen through the engine object model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub category: DeviceCategory,
    /// Rated apparent power
    pub rated_power: MegavoltAmperes,
    /// Active power set-point the profile is scaled against
    pub setpoint: Megawatts,
    /// Terminal (bus) the device connects to
    pub terminal: String,
    /// Cubicle linking the device to its terminal
    pub cubicle: DeviceId,
    pub in_service: bool,
    pub control_curve: Option<ControlCurveVariant>,
    /// Active power profile (time characteristic) reference
    pub profile: Option<String>,
}

/// A consumer, used during grid preparation to place PV units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Load {
    pub id: DeviceId,
    pub terminal: String,
    /// Nominal active power demand
    pub active_power: Megawatts,
}

/// Simulation interval, always held in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> GdsResult<Self> {
        if end <= start {
            return Err(GdsError::Window(format!(
                "window end {end} must be after start {start}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn duration_seconds(&self) -> i64 {
        self.duration().num_seconds()
    }

    /// True when `at` lies inside the window, excluding both bounds.
    pub fn contains_strictly(&self, at: DateTime<Utc>) -> bool {
        self.start < at && at < self.end
    }

    /// Sample instants from start to end inclusive at the given step.
    pub fn steps(&self, step_minutes: u32) -> Vec<DateTime<Utc>> {
        let step = Duration::minutes(i64::from(step_minutes.max(1)));
        let mut instants = Vec::new();
        let mut at = self.start;
        while at <= self.end {
            instants.push(at);
            at += step;
        }
        instants
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} .. {}]", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    /// Take the target out of service
    Outage,
    /// Put the target back in service
    Restore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventRole {
    /// Boundary event placing devices in their initial state
    Arm,
    /// Fault onset
    Fault,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledEvent {
    pub name: String,
    pub at: DateTime<Utc>,
    pub target: DeviceId,
    pub action: EventAction,
    pub role: EventRole,
}

/// Time-ordered events for one trial.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSchedule {
    events: Vec<ScheduledEvent>,
}

impl EventSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert keeping time order; events at the same instant keep insertion order.
    pub fn push(&mut self, event: ScheduledEvent) {
        let idx = self.events.partition_point(|e| e.at <= event.at);
        self.events.insert(idx, event);
    }

    pub fn events(&self) -> &[ScheduledEvent] {
        &self.events
    }

    pub fn arm_events(&self) -> impl Iterator<Item = &ScheduledEvent> {
        self.events.iter().filter(|e| e.role == EventRole::Arm)
    }

    pub fn fault_events(&self) -> impl Iterator<Item = &ScheduledEvent> {
        self.events.iter().filter(|e| e.role == EventRole::Fault)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

/// Column identity in result tables: (object, element class, variable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnKey {
    pub object: String,
    pub class: String,
    pub variable: String,
}

impl ColumnKey {
    pub fn new(
        object: impl Into<String>,
        class: impl Into<String>,
        variable: impl Into<String>,
    ) -> Self {
        Self {
            object: object.into(),
            class: class.into(),
            variable: variable.into(),
        }
    }

    /// Sentinel key of the metadata pseudo-column.
    pub fn metainfo() -> Self {
        Self::new("metainfo", "in the first", "few indices")
    }

    pub fn is_metainfo(&self) -> bool {
        self.object == "metainfo" && self.class == "in the first" && self.variable == "few indices"
    }
}

impl fmt::Display for ColumnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.object, self.class, self.variable)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawColumn {
    pub key: ColumnKey,
    pub values: Vec<f64>,
}

/// Raw quasi-dynamic output as returned by the engine (native units).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawResultTable {
    pub timestamps: Vec<DateTime<Utc>>,
    pub columns: Vec<RawColumn>,
}

impl RawResultTable {
    pub fn rows(&self) -> usize {
        self.timestamps.len()
    }

    pub fn column(&self, key: &ColumnKey) -> Option<&RawColumn> {
        self.columns.iter().find(|c| &c.key == key)
    }

    /// Check every column is as long as the time index and the table is non-empty.
    pub fn validate(&self) -> GdsResult<()> {
        if self.timestamps.is_empty() {
            return Err(GdsError::Result("result table has no rows".into()));
        }
        if self.columns.is_empty() {
            return Err(GdsError::Result("result table has no columns".into()));
        }
        for column in &self.columns {
            if column.key.is_metainfo() {
                return Err(GdsError::Result(
                    "engine output uses the reserved metainfo column key".into(),
                ));
            }
            if column.values.len() != self.timestamps.len() {
                return Err(GdsError::Result(format!(
                    "column {} has {} values for {} timestamps",
                    column.key,
                    column.values.len(),
                    self.timestamps.len()
                )));
            }
        }
        Ok(())
    }
}
