//! Ordered interaction with the engine for a single trial.
//!
//! A [`RunDriver`] walks one trial through
//! `Idle → Configured → Armed → Executed → Harvested → Reset`. Calls out of
//! that order fail with [`GdsError::Lifecycle`]; `reset` is accepted from any
//! phase except `Reset` itself, so cleanup is always reachable.

use gds_core::{
    EngineEvent, EngineZone, EventSchedule, ExperimentConfig, GdsError, GdsResult, NetworkMode,
    Parallelism, RawResultTable, ResultVariables, SimulationEngine, SimulationSettings,
    TimeWindow,
};
use gds_scenarios::TrialLedger;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Configured,
    Armed,
    Executed,
    Harvested,
    Reset,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Idle => "idle",
            RunPhase::Configured => "configured",
            RunPhase::Armed => "armed",
            RunPhase::Executed => "executed",
            RunPhase::Harvested => "harvested",
            RunPhase::Reset => "reset",
        };
        f.write_str(name)
    }
}

/// Per-experiment part of the engine settings; the window varies per trial.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub step_minutes: u32,
    pub result_variables: ResultVariables,
    pub parallelism: Option<Parallelism>,
}

impl RunSettings {
    pub fn from_config(config: &ExperimentConfig) -> Self {
        Self {
            step_minutes: config.step_minutes,
            result_variables: ResultVariables::terminals(config.voltages_only),
            parallelism: config.parallel_computing.then_some(Parallelism {
                cores: config.cores,
            }),
        }
    }
}

pub struct RunDriver<'e, E: SimulationEngine> {
    engine: &'e mut E,
    zone: EngineZone,
    phase: RunPhase,
    raw: Option<RawResultTable>,
}

impl<'e, E: SimulationEngine> RunDriver<'e, E> {
    pub fn new(engine: &'e mut E, zone: EngineZone) -> Self {
        Self {
            engine,
            zone,
            phase: RunPhase::Idle,
            raw: None,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn zone(&self) -> &EngineZone {
        &self.zone
    }

    /// The engine, for trial setup before `configure`.
    pub fn engine_mut(&mut self) -> &mut E {
        &mut *self.engine
    }

    fn expect_phase(&self, expected: RunPhase, call: &str) -> GdsResult<()> {
        if self.phase != expected {
            return Err(GdsError::Lifecycle(format!(
                "{call} called in phase {}, expected {expected}",
                self.phase
            )));
        }
        Ok(())
    }

    pub fn configure(&mut self, window: &TimeWindow, settings: &RunSettings) -> GdsResult<()> {
        self.expect_phase(RunPhase::Idle, "configure")?;
        let settings = SimulationSettings {
            network_mode: NetworkMode::AcBalanced,
            start: self.zone.localize(window.start()),
            end: self.zone.localize(window.end()),
            step_minutes: settings.step_minutes,
            result_variables: settings.result_variables.clone(),
            parallelism: settings.parallelism,
        };
        self.engine.configure(&settings)?;
        self.phase = RunPhase::Configured;
        Ok(())
    }

    pub fn arm(&mut self, schedule: &EventSchedule) -> GdsResult<()> {
        self.expect_phase(RunPhase::Configured, "arm")?;
        for event in schedule.events() {
            self.engine.schedule_event(&EngineEvent {
                name: event.name.clone(),
                at: self.zone.localize(event.at),
                target: event.target.clone(),
                action: event.action,
            })?;
        }
        debug!(events = schedule.len(), "events armed");
        self.phase = RunPhase::Armed;
        Ok(())
    }

    /// Run the simulation. Not retried on failure.
    pub fn execute(&mut self) -> GdsResult<()> {
        self.expect_phase(RunPhase::Armed, "execute")?;
        let raw = self.engine.execute()?;
        self.raw = Some(raw);
        self.phase = RunPhase::Executed;
        Ok(())
    }

    pub fn harvest(&mut self) -> GdsResult<RawResultTable> {
        self.expect_phase(RunPhase::Executed, "harvest")?;
        let raw = self
            .raw
            .take()
            .ok_or_else(|| GdsError::Lifecycle("no result table to harvest".into()))?;
        raw.validate()?;
        self.phase = RunPhase::Harvested;
        Ok(raw)
    }

    /// Revert every mutation in `ledger` and clear events.
    pub fn reset(&mut self, ledger: &mut TrialLedger) -> GdsResult<()> {
        if self.phase == RunPhase::Reset {
            return Err(GdsError::Lifecycle("trial already reset".into()));
        }
        self.phase = RunPhase::Reset;
        self.raw = None;
        ledger.undo(&mut *self.engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use gds_core::{ProfileData, SyntheticEngine};

    fn engine() -> SyntheticEngine {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        SyntheticEngine::from_profiles(
            "g",
            ProfileData::constant(start, 24, &["H0", "H1"], &["PV"], 1.0),
        )
    }

    fn window() -> TimeWindow {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        TimeWindow::new(start, start + Duration::hours(6)).unwrap()
    }

    fn settings() -> RunSettings {
        RunSettings::from_config(&ExperimentConfig::default())
    }

    #[test]
    fn walks_every_phase_in_order() {
        let mut engine = engine();
        let mut driver = RunDriver::new(&mut engine, EngineZone::utc());
        driver.configure(&window(), &settings()).unwrap();
        driver.arm(&EventSchedule::new()).unwrap();
        driver.execute().unwrap();
        let raw = driver.harvest().unwrap();
        assert_eq!(raw.rows(), 25);
        driver.reset(&mut TrialLedger::new()).unwrap();
        assert_eq!(driver.phase(), RunPhase::Reset);
    }

    #[test]
    fn out_of_order_calls_are_lifecycle_errors() {
        let mut engine = engine();
        let mut driver = RunDriver::new(&mut engine, EngineZone::utc());
        assert!(matches!(driver.execute(), Err(GdsError::Lifecycle(_))));
        assert!(matches!(
            driver.arm(&EventSchedule::new()),
            Err(GdsError::Lifecycle(_))
        ));
        driver.configure(&window(), &settings()).unwrap();
        assert!(matches!(
            driver.configure(&window(), &settings()),
            Err(GdsError::Lifecycle(_))
        ));
        assert!(matches!(driver.harvest(), Err(GdsError::Lifecycle(_))));
    }

    #[test]
    fn reset_is_accepted_once_from_any_phase() {
        let mut engine = engine();
        let mut driver = RunDriver::new(&mut engine, EngineZone::utc());
        driver.configure(&window(), &settings()).unwrap();
        let mut ledger = TrialLedger::new();
        driver.reset(&mut ledger).unwrap();
        assert!(matches!(
            driver.reset(&mut ledger),
            Err(GdsError::Lifecycle(_))
        ));
    }

    #[test]
    fn configure_converts_window_to_engine_zone() {
        let mut engine = engine();
        let zone = EngineZone::parse("+01:00").unwrap();
        let mut driver = RunDriver::new(&mut engine, zone);
        driver.configure(&window(), &settings()).unwrap();
        let pushed = engine.settings().unwrap();
        assert_eq!(pushed.start.to_rfc3339(), "2024-01-01T01:00:00+01:00");
        assert_eq!(pushed.start.with_timezone(&Utc), window().start());
    }

    #[test]
    fn execute_failure_leaves_driver_resettable() {
        let mut engine = engine();
        engine.fail_next_execute("engine crashed");
        let mut driver = RunDriver::new(&mut engine, EngineZone::utc());
        driver.configure(&window(), &settings()).unwrap();
        driver.arm(&EventSchedule::new()).unwrap();
        assert!(matches!(driver.execute(), Err(GdsError::Engine(_))));
        assert_eq!(driver.phase(), RunPhase::Armed);
        driver.reset(&mut TrialLedger::new()).unwrap();
    }
}
