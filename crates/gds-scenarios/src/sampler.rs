//! Per-trial choice of which PV units are installed.

use gds_core::{Device, DeviceCategory, EngineResult, GdsError, GdsResult, SimulationEngine, TimeWindow};
use rand::seq::index;
use rand::Rng;
use std::collections::BTreeSet;

use crate::disturbance::{Malfunction, SHADOW_SUFFIX};
use crate::ledger::TrialLedger;

/// Candidate PV units of a grid: every photovoltaic generator except shadows
/// left over from malfunction injection.
pub fn discover_candidates<E: SimulationEngine>(engine: &E) -> EngineResult<Vec<Device>> {
    Ok(engine
        .devices()?
        .into_iter()
        .filter(|d| d.category == DeviceCategory::Photovoltaic)
        .filter(|d| !d.id.as_str().ends_with(SHADOW_SUFFIX))
        .collect())
}

/// Devices installed for one trial.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveSet {
    pub devices: Vec<Device>,
    /// Terminals of `devices`, sorted and deduplicated.
    pub terminals: Vec<String>,
}

impl ActiveSet {
    pub fn new(devices: Vec<Device>) -> Self {
        let terminals = devices
            .iter()
            .map(|d| d.terminal.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        Self { devices, terminals }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// Draws the active subset of candidates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScenarioSampler {
    activation_percentage: f64,
}

impl ScenarioSampler {
    pub fn new(activation_percentage: f64) -> GdsResult<Self> {
        if !(0.0..=100.0).contains(&activation_percentage) {
            return Err(GdsError::Config(format!(
                "activation percentage {activation_percentage} must be within 0..=100"
            )));
        }
        Ok(Self {
            activation_percentage,
        })
    }

    /// `floor(candidates * p / 100)`.
    pub fn active_count(&self, candidates: usize) -> usize {
        (candidates as f64 * self.activation_percentage / 100.0).floor() as usize
    }

    /// Pick the active subset uniformly without replacement and apply it:
    /// selected candidates in service, all others out of service.
    pub fn sample<E, R>(
        &self,
        engine: &mut E,
        candidates: &[Device],
        ledger: &mut TrialLedger,
        rng: &mut R,
    ) -> GdsResult<ActiveSet>
    where
        E: SimulationEngine,
        R: Rng + ?Sized,
    {
        let amount = self.active_count(candidates.len());
        let mut chosen = index::sample(rng, candidates.len(), amount).into_vec();
        chosen.sort_unstable();

        let mut devices = Vec::with_capacity(amount);
        for (idx, candidate) in candidates.iter().enumerate() {
            let active = chosen.binary_search(&idx).is_ok();
            engine.set_in_service(&candidate.id, active)?;
            if active {
                ledger.record_switched_on(candidate.id.clone());
                let mut device = candidate.clone();
                device.in_service = true;
                devices.push(device);
            }
        }
        Ok(ActiveSet::new(devices))
    }
}

/// Complete specification of one trial.
#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    pub window: TimeWindow,
    pub active: ActiveSet,
    pub malfunction: Option<Malfunction>,
}

impl Scenario {
    pub fn new(window: TimeWindow, active: ActiveSet) -> Self {
        Self {
            window,
            active,
            malfunction: None,
        }
    }

    pub fn with_malfunction(mut self, malfunction: Malfunction) -> Self {
        self.malfunction = Some(malfunction);
        self
    }
}
