use gds_core::{DeviceId, GdsError, GdsResult, SimulationEngine};
use tracing::debug;

/// Engine mutations made during one trial.
///
/// Devices switched into service and objects created for the trial are
/// recorded as they happen, so a trial that fails halfway still knows what
/// to undo.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrialLedger {
    switched_on: Vec<DeviceId>,
    created: Vec<DeviceId>,
}

impl TrialLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_switched_on(&mut self, id: DeviceId) {
        if !self.switched_on.contains(&id) {
            self.switched_on.push(id);
        }
    }

    pub fn record_created(&mut self, id: DeviceId) {
        self.created.push(id);
    }

    pub fn switched_on(&self) -> &[DeviceId] {
        &self.switched_on
    }

    pub fn created(&self) -> &[DeviceId] {
        &self.created
    }

    pub fn is_empty(&self) -> bool {
        self.switched_on.is_empty() && self.created.is_empty()
    }

    /// Undo every recorded mutation and clear scheduled events.
    ///
    /// Switched-on devices go back out of service, created objects are
    /// deleted newest first (a shadow generator before its cubicle). Every
    /// step runs even if an earlier one fails; the first failure is returned.
    pub fn undo<E: SimulationEngine>(&mut self, engine: &mut E) -> GdsResult<()> {
        let mut first_error: Option<GdsError> = None;
        let created: Vec<DeviceId> = self.created.drain(..).rev().collect();
        let switched_on: Vec<DeviceId> = self.switched_on.drain(..).collect();

        for id in switched_on.iter().filter(|id| !created.contains(id)) {
            if let Err(err) = engine.set_in_service(id, false) {
                first_error.get_or_insert(err.into());
            }
        }
        for id in &created {
            if let Err(err) = engine.delete_device(id) {
                first_error.get_or_insert(err.into());
            }
        }
        if let Err(err) = engine.clear_events() {
            first_error.get_or_insert(err.into());
        }
        debug!(
            switched_off = switched_on.len(),
            deleted = created.len(),
            "trial state reverted"
        );
        first_error.map_or(Ok(()), Err)
    }
}
