//! Malfunction injection.
//!
//! A malfunctioning PV unit is modelled by a shadow twin carrying the broken
//! control curve. The twin and the original trade places by outage events:
//!
//! * whole-window mode: at the arm instant the shadow is (re)activated and
//!   the original taken out, so the malfunction spans the whole run.
//! * point-fault mode: the shadow is taken out at the arm instant and the
//!   swap happens at a random fault instant strictly inside the window.
//!
//! The engine only considers objects that are in service at the start of the
//! run, which is why shadows are created in service and disarmed by event.

use chrono::{DateTime, Duration, Utc};
use gds_core::{
    ControlCurveVariant, Device, DeviceCategory, DeviceId, DeviceSpec, EngineZone, EventAction,
    EventRole, EventSchedule, GdsError, GdsResult, GeneratorSpec, ScheduledEvent,
    SimulationEngine, TimeWindow,
};
use rand::seq::index;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

use crate::ledger::TrialLedger;
use crate::sampler::ActiveSet;

/// Name suffix of shadow generators.
pub const SHADOW_SUFFIX: &str = " broken";
/// Name suffix of shadow cubicles.
pub const SHADOW_CUBICLE_SUFFIX: &str = " PVbroken";

/// Offset of arm events from the window start.
pub const ARM_OFFSET_SECS: i64 = 1;
/// Earliest fault offset; keeps the fault strictly after every arm event.
pub const MIN_FAULT_OFFSET_SECS: i64 = ARM_OFFSET_SECS + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MalfunctionSettings {
    pub count: usize,
    pub broken_curve: ControlCurveVariant,
    pub whole_window: bool,
}

/// Record of one injected malfunction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Malfunction {
    pub devices: Vec<DeviceId>,
    pub shadows: Vec<DeviceId>,
    /// Terminals of `devices`, sorted and deduplicated.
    pub terminals: Vec<String>,
    pub curve: ControlCurveVariant,
    /// Instant the broken curve takes over (UTC).
    pub fault_time: DateTime<Utc>,
}

impl Malfunction {
    /// Fault time as the engine renders it, RFC3339 in the engine zone.
    pub fn fault_time_in(&self, zone: &EngineZone) -> String {
        zone.localize(self.fault_time).to_rfc3339()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisturbanceInjector {
    settings: MalfunctionSettings,
}

impl DisturbanceInjector {
    pub fn new(settings: MalfunctionSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &MalfunctionSettings {
        &self.settings
    }

    /// Pick `count` active devices, create their shadows and schedule the
    /// swap events.
    ///
    /// Created objects go into `ledger` as soon as the engine confirms them.
    pub fn inject<E, R>(
        &self,
        engine: &mut E,
        active: &ActiveSet,
        window: &TimeWindow,
        ledger: &mut TrialLedger,
        schedule: &mut EventSchedule,
        rng: &mut R,
    ) -> GdsResult<Malfunction>
    where
        E: SimulationEngine,
        R: Rng + ?Sized,
    {
        let count = self.settings.count;
        if count > active.len() {
            return Err(GdsError::Scenario(format!(
                "cannot break {count} devices with only {} active",
                active.len()
            )));
        }
        let arm_at = window.start() + Duration::seconds(ARM_OFFSET_SECS);
        let fault_at = if self.settings.whole_window {
            arm_at
        } else {
            draw_fault_time(window, rng)?
        };

        let picked: Vec<&Device> = index::sample(rng, active.len(), count)
            .into_iter()
            .map(|i| &active.devices[i])
            .collect();

        let mut devices = Vec::with_capacity(count);
        let mut shadows = Vec::with_capacity(count);
        let mut terminals = BTreeSet::new();
        for original in picked {
            let shadow = self.create_shadow(engine, original, ledger)?;
            self.schedule_swap(schedule, original, &shadow, arm_at, fault_at);
            debug!(device = %original.id, shadow = %shadow, "malfunction injected");
            devices.push(original.id.clone());
            shadows.push(shadow);
            terminals.insert(original.terminal.clone());
        }

        Ok(Malfunction {
            devices,
            shadows,
            terminals: terminals.into_iter().collect(),
            curve: self.settings.broken_curve,
            fault_time: fault_at,
        })
    }

    fn create_shadow<E: SimulationEngine>(
        &self,
        engine: &mut E,
        original: &Device,
        ledger: &mut TrialLedger,
    ) -> GdsResult<DeviceId> {
        let cubicle = engine.create_device(&DeviceSpec::Cubicle {
            name: format!("{}{SHADOW_CUBICLE_SUFFIX}", original.cubicle),
            terminal: original.terminal.clone(),
        })?;
        ledger.record_created(cubicle.clone());
        let shadow = engine.create_device(&DeviceSpec::StaticGenerator(GeneratorSpec {
            name: format!("{}{SHADOW_SUFFIX}", original.id),
            cubicle,
            category: DeviceCategory::Photovoltaic,
            rated_power: original.rated_power,
            setpoint: original.setpoint,
            control_curve: self.settings.broken_curve,
            profile: original.profile.clone(),
            in_service: true,
        }))?;
        ledger.record_created(shadow.clone());
        Ok(shadow)
    }

    fn schedule_swap(
        &self,
        schedule: &mut EventSchedule,
        original: &Device,
        shadow: &DeviceId,
        arm_at: DateTime<Utc>,
        fault_at: DateTime<Utc>,
    ) {
        if self.settings.whole_window {
            schedule.push(event(
                format!("{} PVbrokenin", original.id),
                arm_at,
                shadow,
                EventAction::Restore,
                EventRole::Arm,
            ));
            schedule.push(event(
                format!("{} PVout", original.id),
                arm_at,
                &original.id,
                EventAction::Outage,
                EventRole::Arm,
            ));
            return;
        }
        schedule.push(event(
            format!("{} PVbrokenout", original.id),
            arm_at,
            shadow,
            EventAction::Outage,
            EventRole::Arm,
        ));
        schedule.push(event(
            format!("{} PVout", original.id),
            fault_at,
            &original.id,
            EventAction::Outage,
            EventRole::Fault,
        ));
        schedule.push(event(
            format!("{} PVbrokenin", original.id),
            fault_at,
            shadow,
            EventAction::Restore,
            EventRole::Fault,
        ));
    }
}

fn event(
    name: String,
    at: DateTime<Utc>,
    target: &DeviceId,
    action: EventAction,
    role: EventRole,
) -> ScheduledEvent {
    ScheduledEvent {
        name,
        at,
        target: target.clone(),
        action,
        role,
    }
}

/// Fault instant `start + s`, `s` uniform over `[2, duration_seconds)`.
fn draw_fault_time<R: Rng + ?Sized>(window: &TimeWindow, rng: &mut R) -> GdsResult<DateTime<Utc>> {
    let duration = window.duration_seconds();
    if duration <= MIN_FAULT_OFFSET_SECS {
        return Err(GdsError::Window(format!(
            "window {window} is too short to place a fault after the arm events"
        )));
    }
    let offset = rng.gen_range(MIN_FAULT_OFFSET_SECS..duration);
    Ok(window.start() + Duration::seconds(offset))
}
