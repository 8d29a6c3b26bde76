//! In-memory stand-in for the quasi-dynamic engine.
//!
//! [`SyntheticEngine`] implements [`SimulationEngine`] over a small radial LV
//! feeder derived from a grid's profile data: one terminal per load profile
//! column, a load on each terminal, one template PV unit and one storage unit.
//! Its output is deterministic. Voltages follow net injection at each terminal
//! and reactive power follows each unit's control curve, so malfunctions are
//! visible in the recorded series. It is not a load-flow solver.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::curves::{ControlCurve, ControlCurveVariant};
use crate::engine::{
    DeviceSpec, EngineEvent, EngineProvider, SimulationEngine, SimulationSettings,
};
use crate::error::{EngineError, EngineResult, GdsResult};
use crate::model::{
    ColumnKey, Device, DeviceCategory, DeviceId, EventAction, Load, RawColumn, RawResultTable,
    TimeWindow,
};
use crate::profile::ProfileData;
use crate::units::{MegavoltAmperes, Megawatts, PerUnit};

/// Voltage sensitivity to net active injection (pu per MW).
const DV_DP: f64 = 0.4;
/// Voltage sensitivity to reactive injection (pu per Mvar).
const DV_DQ: f64 = 0.8;

const TERMINAL_CLASS: &str = "ElmTerm";

#[derive(Debug, Clone)]
struct SyntheticLoad {
    load: Load,
    profile: String,
}

/// Deterministic in-memory engine.
#[derive(Debug, Clone)]
pub struct SyntheticEngine {
    grid: String,
    profiles: ProfileData,
    terminals: BTreeSet<String>,
    loads: Vec<SyntheticLoad>,
    cubicles: BTreeMap<DeviceId, String>,
    generators: BTreeMap<DeviceId, Device>,
    curves: BTreeMap<String, ControlCurve>,
    bound_profiles: BTreeMap<String, PathBuf>,
    settings: Option<SimulationSettings>,
    events: Vec<EngineEvent>,
    pending_failure: Option<String>,
    pending_clear_failure: Option<String>,
    journal: Vec<String>,
}

impl SyntheticEngine {
    /// Build a feeder with one terminal and load per load-profile column.
    pub fn from_profiles(grid: &str, profiles: ProfileData) -> Self {
        let mut engine = Self {
            grid: grid.to_string(),
            profiles,
            terminals: BTreeSet::new(),
            loads: Vec::new(),
            cubicles: BTreeMap::new(),
            generators: BTreeMap::new(),
            curves: BTreeMap::new(),
            bound_profiles: BTreeMap::new(),
            settings: None,
            events: Vec::new(),
            pending_failure: None,
            pending_clear_failure: None,
            journal: Vec::new(),
        };
        let columns = engine.profiles.load.columns.clone();
        for (idx, column) in columns.iter().enumerate() {
            let terminal = format!("Terminal {}", idx + 1);
            engine.terminals.insert(terminal.clone());
            let cubicle = DeviceId::new(format!("Cubicle_{column} Load {}", idx + 1));
            engine.cubicles.insert(cubicle, terminal.clone());
            engine.loads.push(SyntheticLoad {
                load: Load {
                    id: DeviceId::new(format!("{column} Load {}", idx + 1)),
                    terminal,
                    active_power: Megawatts(0.004),
                },
                profile: column.clone(),
            });
        }
        let generation_profile = engine.profiles.generation.columns.first().cloned();
        if let Some(first) = engine.terminals.iter().next().cloned() {
            engine.add_template_unit(
                "PV Template",
                DeviceCategory::Photovoltaic,
                &first,
                generation_profile,
            );
            engine.add_template_unit("Battery Template", DeviceCategory::Storage, &first, None);
        }
        engine
    }

    fn add_template_unit(
        &mut self,
        name: &str,
        category: DeviceCategory,
        terminal: &str,
        profile: Option<String>,
    ) {
        let cubicle = DeviceId::new(format!("Cubicle_{name}"));
        self.cubicles.insert(cubicle.clone(), terminal.to_string());
        let id = DeviceId::new(name);
        self.generators.insert(
            id.clone(),
            Device {
                id,
                category,
                rated_power: MegavoltAmperes(0.01),
                setpoint: Megawatts(0.009),
                terminal: terminal.to_string(),
                cubicle,
                in_service: true,
                control_curve: None,
                profile,
            },
        );
    }

    /// Rename a terminal before any preparation; used to seed non-canonical names.
    pub fn with_terminal_name(mut self, old: &str, new: &str) -> Self {
        if self.terminals.remove(old) {
            self.terminals.insert(new.to_string());
            self.retarget_terminal(old, new);
        }
        self
    }

    /// Make the next `execute` fail with `message`.
    pub fn fail_next_execute(&mut self, message: impl Into<String>) {
        self.pending_failure = Some(message.into());
    }

    /// Make the next `clear_events` fail with `message`.
    pub fn fail_next_clear_events(&mut self, message: impl Into<String>) {
        self.pending_clear_failure = Some(message.into());
    }

    /// Names of the calls received so far, in order.
    pub fn journal(&self) -> &[String] {
        &self.journal
    }

    pub fn grid(&self) -> &str {
        &self.grid
    }

    pub fn scheduled_events(&self) -> &[EngineEvent] {
        &self.events
    }

    pub fn settings(&self) -> Option<&SimulationSettings> {
        self.settings.as_ref()
    }

    pub fn terminals(&self) -> impl Iterator<Item = &str> {
        self.terminals.iter().map(String::as_str)
    }

    pub fn bound_profile(&self, profile: &str) -> Option<&Path> {
        self.bound_profiles.get(profile).map(PathBuf::as_path)
    }

    pub fn has_curve(&self, variant: ControlCurveVariant) -> bool {
        self.curves.contains_key(variant.engine_name())
    }

    fn retarget_terminal(&mut self, old: &str, new: &str) {
        for load in &mut self.loads {
            if load.load.terminal == old {
                load.load.terminal = new.to_string();
            }
        }
        for terminal in self.cubicles.values_mut() {
            if terminal == old {
                *terminal = new.to_string();
            }
        }
        for device in self.generators.values_mut() {
            if device.terminal == old {
                device.terminal = new.to_string();
            }
        }
    }

    fn name_taken(&self, name: &str) -> bool {
        let id = DeviceId::new(name);
        self.terminals.contains(name)
            || self.cubicles.contains_key(&id)
            || self.generators.contains_key(&id)
            || self.loads.iter().any(|l| l.load.id == id)
    }

    fn record(&mut self, entry: impl Into<String>) {
        self.journal.push(entry.into());
    }

    fn generator_output(&self, device: &Device, at: DateTime<Utc>) -> (f64, f64) {
        let factor = device
            .profile
            .as_deref()
            .and_then(|p| self.profiles.generation.value_at(p, at))
            .unwrap_or(1.0);
        let p = (device.setpoint * factor).value();
        let q = match device.control_curve {
            Some(variant) if device.rated_power.value() > 0.0 => {
                let curve = self
                    .curves
                    .get(variant.engine_name())
                    .cloned()
                    .unwrap_or_else(|| ControlCurve::canonical(variant));
                let p_pu = PerUnit(p / device.rated_power.value());
                device.rated_power.reactive_at(curve.q_at(p_pu)).value()
            }
            _ => 0.0,
        };
        (p, q)
    }
}

impl SimulationEngine for SyntheticEngine {
    fn configure(&mut self, settings: &SimulationSettings) -> EngineResult<()> {
        if settings.end <= settings.start {
            return Err(EngineError::call("configure", "end must be after start"));
        }
        if settings.step_minutes == 0 {
            return Err(EngineError::call("configure", "step size must be positive"));
        }
        self.record("configure");
        self.settings = Some(settings.clone());
        Ok(())
    }

    fn create_device(&mut self, spec: &DeviceSpec) -> EngineResult<DeviceId> {
        if self.name_taken(spec.name()) {
            return Err(EngineError::Rejected {
                name: spec.name().to_string(),
                reason: "name already in use".into(),
            });
        }
        let id = DeviceId::new(spec.name());
        match spec {
            DeviceSpec::Cubicle { terminal, .. } => {
                if !self.terminals.contains(terminal) {
                    return Err(EngineError::NotFound(terminal.clone()));
                }
                self.cubicles.insert(id.clone(), terminal.clone());
            }
            DeviceSpec::StaticGenerator(gen) => {
                let terminal = self
                    .cubicles
                    .get(&gen.cubicle)
                    .cloned()
                    .ok_or_else(|| EngineError::NotFound(gen.cubicle.to_string()))?;
                self.generators.insert(
                    id.clone(),
                    Device {
                        id: id.clone(),
                        category: gen.category,
                        rated_power: gen.rated_power,
                        setpoint: gen.setpoint,
                        terminal,
                        cubicle: gen.cubicle.clone(),
                        in_service: gen.in_service,
                        control_curve: Some(gen.control_curve),
                        profile: gen.profile.clone(),
                    },
                );
            }
        }
        self.record(format!("create_device:{id}"));
        Ok(id)
    }

    fn delete_device(&mut self, id: &DeviceId) -> EngineResult<()> {
        let removed =
            self.generators.remove(id).is_some() || self.cubicles.remove(id).is_some();
        if !removed {
            return Err(EngineError::NotFound(id.to_string()));
        }
        self.record(format!("delete_device:{id}"));
        Ok(())
    }

    fn schedule_event(&mut self, event: &EngineEvent) -> EngineResult<()> {
        if !self.generators.contains_key(&event.target) {
            return Err(EngineError::NotFound(event.target.to_string()));
        }
        self.record(format!("schedule_event:{}", event.name));
        self.events.push(event.clone());
        Ok(())
    }

    fn clear_events(&mut self) -> EngineResult<()> {
        self.record("clear_events");
        if let Some(message) = self.pending_clear_failure.take() {
            return Err(EngineError::call("clear_events", message));
        }
        self.events.clear();
        Ok(())
    }

    fn execute(&mut self) -> EngineResult<RawResultTable> {
        self.record("execute");
        if let Some(message) = self.pending_failure.take() {
            return Err(EngineError::call("execute", message));
        }
        let settings = self
            .settings
            .clone()
            .ok_or_else(|| EngineError::call("execute", "simulation not configured"))?;
        let window = TimeWindow::new(
            settings.start.with_timezone(&Utc),
            settings.end.with_timezone(&Utc),
        )
        .map_err(|err| EngineError::call("execute", err.to_string()))?;
        let timestamps = window.steps(settings.step_minutes);

        let mut events: Vec<(DateTime<Utc>, &EngineEvent)> = self
            .events
            .iter()
            .map(|e| (e.at.with_timezone(&Utc), e))
            .collect();
        events.sort_by_key(|(at, _)| *at);

        let variables = settings.result_variables.for_class(TERMINAL_CLASS).to_vec();
        let terminals: Vec<String> = self.terminals.iter().cloned().collect();
        let mut series: BTreeMap<(usize, usize), Vec<f64>> = BTreeMap::new();
        let mut in_service: BTreeMap<DeviceId, bool> = self
            .generators
            .iter()
            .map(|(id, d)| (id.clone(), d.in_service))
            .collect();
        let mut next_event = 0;

        for at in &timestamps {
            while next_event < events.len() && events[next_event].0 <= *at {
                let event = events[next_event].1;
                in_service.insert(event.target.clone(), event.action == EventAction::Restore);
                next_event += 1;
            }
            for (t_idx, terminal) in terminals.iter().enumerate() {
                let mut p_gen = 0.0;
                let mut q_gen = 0.0;
                for device in self.generators.values() {
                    if &device.terminal != terminal || !in_service[&device.id] {
                        continue;
                    }
                    let (p, q) = self.generator_output(device, *at);
                    p_gen += p;
                    q_gen += q;
                }
                let p_load: f64 = self
                    .loads
                    .iter()
                    .filter(|l| &l.load.terminal == terminal)
                    .map(|l| {
                        l.load.active_power.value()
                            * self.profiles.load.value_at(&l.profile, *at).unwrap_or(1.0)
                    })
                    .sum();
                let u = 1.0 + DV_DP * (p_gen - p_load) + DV_DQ * q_gen;
                for (v_idx, variable) in variables.iter().enumerate() {
                    let value = match variable.as_str() {
                        "m:u" => u,
                        "m:Pgen" => p_gen,
                        "m:Qgen" => q_gen,
                        _ => 0.0,
                    };
                    series.entry((t_idx, v_idx)).or_default().push(value);
                }
            }
        }

        let columns = series
            .into_iter()
            .map(|((t_idx, v_idx), values)| RawColumn {
                key: ColumnKey::new(&terminals[t_idx], TERMINAL_CLASS, &variables[v_idx]),
                values,
            })
            .collect();
        Ok(RawResultTable {
            timestamps,
            columns,
        })
    }

    fn set_in_service(&mut self, id: &DeviceId, in_service: bool) -> EngineResult<()> {
        let device = self
            .generators
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        device.in_service = in_service;
        self.record(format!("set_in_service:{id}:{in_service}"));
        Ok(())
    }

    fn devices(&self) -> EngineResult<Vec<Device>> {
        Ok(self.generators.values().cloned().collect())
    }

    fn loads(&self) -> EngineResult<Vec<Load>> {
        Ok(self.loads.iter().map(|l| l.load.clone()).collect())
    }

    fn element_names(&self) -> EngineResult<Vec<DeviceId>> {
        let mut names: Vec<DeviceId> = self.terminals.iter().map(DeviceId::new).collect();
        names.extend(self.cubicles.keys().cloned());
        names.extend(self.generators.keys().cloned());
        names.extend(self.loads.iter().map(|l| l.load.id.clone()));
        Ok(names)
    }

    fn rename_device(&mut self, id: &DeviceId, new_name: &str) -> EngineResult<DeviceId> {
        if self.name_taken(new_name) {
            return Err(EngineError::Rejected {
                name: new_name.to_string(),
                reason: "name already in use".into(),
            });
        }
        let new_id = DeviceId::new(new_name);
        if self.terminals.remove(id.as_str()) {
            self.terminals.insert(new_name.to_string());
            self.retarget_terminal(id.as_str(), new_name);
        } else if let Some(terminal) = self.cubicles.remove(id) {
            self.cubicles.insert(new_id.clone(), terminal);
            for device in self.generators.values_mut() {
                if &device.cubicle == id {
                    device.cubicle = new_id.clone();
                }
            }
        } else if let Some(mut device) = self.generators.remove(id) {
            device.id = new_id.clone();
            self.generators.insert(new_id.clone(), device);
        } else if let Some(load) = self.loads.iter_mut().find(|l| &l.load.id == id) {
            load.load.id = new_id.clone();
        } else {
            return Err(EngineError::NotFound(id.to_string()));
        }
        self.record(format!("rename_device:{id}"));
        Ok(new_id)
    }

    fn install_control_curve(&mut self, curve: &ControlCurve) -> EngineResult<()> {
        if curve.p_pu.len() != curve.q_pu.len() || curve.p_pu.is_empty() {
            return Err(EngineError::Rejected {
                name: curve.variant.engine_name().to_string(),
                reason: "curve point tables differ in length".into(),
            });
        }
        self.curves
            .insert(curve.variant.engine_name().to_string(), curve.clone());
        Ok(())
    }

    fn bind_profile_source(&mut self, profile: &str, source: &Path) -> EngineResult<()> {
        self.bound_profiles
            .insert(profile.to_string(), source.to_path_buf());
        Ok(())
    }
}

/// Opens a [`SyntheticEngine`] from each grid directory's profiles.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntheticProvider;

impl EngineProvider for SyntheticProvider {
    type Engine = SyntheticEngine;

    fn open(&self, grid: &str, grid_dir: &Path) -> GdsResult<Self::Engine> {
        let profiles = ProfileData::load(grid_dir)?;
        Ok(SyntheticEngine::from_profiles(grid, profiles))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineZone, NetworkMode, ResultVariables};
    use chrono::{Duration, TimeZone};

    fn profiles(loads: usize) -> ProfileData {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let columns: Vec<String> = (0..loads).map(|i| format!("H{i}")).collect();
        let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
        ProfileData::constant(t0, 48, &columns, &["PV"], 0.5)
    }

    fn settings(voltages_only: bool) -> SimulationSettings {
        let zone = EngineZone::utc();
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        SimulationSettings {
            network_mode: NetworkMode::AcBalanced,
            start: zone.localize(start),
            end: zone.localize(start + Duration::hours(2)),
            step_minutes: 30,
            result_variables: ResultVariables::terminals(voltages_only),
            parallelism: None,
        }
    }

    #[test]
    fn builds_one_terminal_per_load_column() {
        let engine = SyntheticEngine::from_profiles("g", profiles(3));
        assert_eq!(engine.terminals().count(), 3);
        assert_eq!(engine.loads().unwrap().len(), 3);
        let devices = engine.devices().unwrap();
        assert!(devices.iter().any(|d| d.category == DeviceCategory::Storage));
        assert!(devices.iter().any(|d| d.category == DeviceCategory::Photovoltaic));
    }

    #[test]
    fn execute_requires_configuration() {
        let mut engine = SyntheticEngine::from_profiles("g", profiles(2));
        assert!(engine.execute().is_err());
        engine.configure(&settings(true)).unwrap();
        let table = engine.execute().unwrap();
        table.validate().unwrap();
        assert_eq!(table.rows(), 5);
        assert_eq!(table.columns.len(), 2);
    }

    #[test]
    fn outage_event_changes_generation() {
        let mut engine = SyntheticEngine::from_profiles("g", profiles(1));
        engine.configure(&settings(false)).unwrap();
        let zone = EngineZone::utc();
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 1, 0, 0).unwrap();
        engine
            .schedule_event(&EngineEvent {
                name: "out".into(),
                at: zone.localize(at),
                target: DeviceId::new("PV Template"),
                action: EventAction::Outage,
            })
            .unwrap();
        let table = engine.execute().unwrap();
        let pgen = table
            .column(&ColumnKey::new("Terminal 1", "ElmTerm", "m:Pgen"))
            .unwrap();
        assert!(pgen.values[0] > 0.0);
        assert_eq!(pgen.values[2], 0.0);
    }

    #[test]
    fn injected_failure_is_one_shot() {
        let mut engine = SyntheticEngine::from_profiles("g", profiles(1));
        engine.configure(&settings(true)).unwrap();
        engine.fail_next_execute("license lost");
        assert!(engine.execute().is_err());
        assert!(engine.execute().is_ok());
    }

    #[test]
    fn rename_retargets_terminal_references() {
        let mut engine = SyntheticEngine::from_profiles("g", profiles(1));
        let new_id = engine
            .rename_device(&DeviceId::new("Terminal 1"), "T_1")
            .unwrap();
        assert_eq!(new_id.as_str(), "T_1");
        assert!(engine.loads().unwrap().iter().all(|l| l.terminal == "T_1"));
        assert!(engine.devices().unwrap().iter().all(|d| d.terminal == "T_1"));
    }
}
