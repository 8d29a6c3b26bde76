//! One-off preparation of a freshly opened grid before its trial loop.

use gds_core::{
    ControlCurve, ControlCurveVariant, DeviceCategory, DeviceSpec, GdsError, GdsResult,
    GeneratorSpec, Load, Megawatts, ProfileData, SimulationEngine,
};
use serde::Serialize;
use tracing::{info, warn};

/// Nominal load demand that maps to a 90 % PV set-point.
const REFERENCE_LOAD_MW: f64 = 0.004;
const SETPOINT_SHARE: f64 = 0.9;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PreparationReport {
    pub profiles_bound: usize,
    pub storage_disabled: usize,
    pub pvs_removed: usize,
    pub pvs_placed: usize,
    pub names_canonicalized: usize,
}

/// Bring a grid into the state the trial loop expects.
///
/// 1. bind every profile column to its CSV file,
/// 2. install the canonical control curves,
/// 3. take storage units out of service,
/// 4. replace the grid's PV units by one out-of-service PV per load,
/// 5. canonicalise element names.
pub fn prepare_grid<E: SimulationEngine>(
    engine: &mut E,
    profiles: &ProfileData,
    control_curve: ControlCurveVariant,
) -> GdsResult<PreparationReport> {
    let mut report = PreparationReport::default();

    for (profile, source) in profiles.sources() {
        engine.bind_profile_source(profile, source)?;
        report.profiles_bound += 1;
    }
    for curve in ControlCurve::canonical_set() {
        engine.install_control_curve(&curve)?;
    }

    let mut template = None;
    for device in engine.devices()? {
        match device.category {
            DeviceCategory::Storage => {
                engine.set_in_service(&device.id, false)?;
                report.storage_disabled += 1;
            }
            DeviceCategory::Photovoltaic => {
                engine.delete_device(&device.id)?;
                report.pvs_removed += 1;
                template = Some(device);
            }
            DeviceCategory::Other => {}
        }
    }
    if report.pvs_removed > 1 {
        warn!(
            count = report.pvs_removed,
            "several PV units found; the last one sets rating and profile"
        );
    }
    let template = template.ok_or_else(|| {
        GdsError::Scenario("grid has no PV unit to take rating and profile from".into())
    })?;

    for load in engine.loads()? {
        let name = pv_name_for(&load);
        let setpoint = (template.rated_power
            * (SETPOINT_SHARE * load.active_power.value() / REFERENCE_LOAD_MW))
            .value();
        let cubicle = engine.create_device(&DeviceSpec::Cubicle {
            name: format!("Cubicle_{name}"),
            terminal: load.terminal.clone(),
        })?;
        engine.create_device(&DeviceSpec::StaticGenerator(GeneratorSpec {
            name,
            cubicle,
            category: DeviceCategory::Photovoltaic,
            rated_power: template.rated_power,
            setpoint: Megawatts(setpoint),
            control_curve,
            profile: template.profile.clone(),
            in_service: false,
        }))?;
        report.pvs_placed += 1;
    }

    report.names_canonicalized = canonicalize_names(engine)?;
    info!(
        profiles = report.profiles_bound,
        storage_disabled = report.storage_disabled,
        pvs = report.pvs_placed,
        renamed = report.names_canonicalized,
        "grid prepared"
    );
    Ok(report)
}

/// `"<prefix> Load <suffix>"` becomes `"<prefix> SGen <suffix>"`.
fn pv_name_for(load: &Load) -> String {
    let parts: Vec<&str> = load.id.as_str().split(' ').collect();
    match parts.as_slice() {
        [prefix, _, suffix, ..] => format!("{prefix} SGen {suffix}"),
        _ => format!("{} SGen", load.id),
    }
}

/// `name` with every non-ASCII character replaced by `_`, or `None` if it
/// already is ASCII.
pub fn canonical_name(name: &str) -> Option<String> {
    if name.is_ascii() {
        return None;
    }
    Some(
        name.chars()
            .map(|c| if c.is_ascii() { c } else { '_' })
            .collect(),
    )
}

/// Rename every element whose name is not plain ASCII. Returns the count.
pub fn canonicalize_names<E: SimulationEngine>(engine: &mut E) -> GdsResult<usize> {
    let mut renamed = 0;
    for id in engine.element_names()? {
        if let Some(name) = canonical_name(id.as_str()) {
            engine.rename_device(&id, &name)?;
            renamed += 1;
        }
    }
    info!(renamed, "element names canonicalised");
    Ok(renamed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use gds_core::{DeviceId, SyntheticEngine};

    fn engine(loads: &[&str]) -> (SyntheticEngine, ProfileData) {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let profiles = ProfileData::constant(start, 48, loads, &["PV"], 1.0);
        (SyntheticEngine::from_profiles("g", profiles.clone()), profiles)
    }

    #[test]
    fn canonical_name_replaces_each_non_ascii_char() {
        assert_eq!(canonical_name("Knoten Süd"), Some("Knoten S_d".to_string()));
        assert_eq!(canonical_name("Straße 5"), Some("Stra_e 5".to_string()));
        assert_eq!(canonical_name("plain"), None);
    }

    #[test]
    fn places_one_disabled_pv_per_load() {
        let (mut engine, profiles) = engine(&["H0", "G1", "L2"]);
        let report = prepare_grid(&mut engine, &profiles, ControlCurveVariant::QP).unwrap();
        assert_eq!(report.profiles_bound, 4);
        assert_eq!(report.storage_disabled, 1);
        assert_eq!(report.pvs_removed, 1);
        assert_eq!(report.pvs_placed, 3);

        let devices = engine.devices().unwrap();
        let pvs: Vec<_> = devices
            .iter()
            .filter(|d| d.category == DeviceCategory::Photovoltaic)
            .collect();
        assert_eq!(pvs.len(), 3);
        assert!(pvs.iter().all(|d| !d.in_service));
        assert!(pvs.iter().all(|d| d.control_curve == Some(ControlCurveVariant::QP)));
        assert!(pvs.iter().any(|d| d.id == DeviceId::new("G1 SGen 2")));
        assert!((pvs[0].setpoint.value() - 0.009).abs() < 1e-12);
        assert!(devices
            .iter()
            .filter(|d| d.category == DeviceCategory::Storage)
            .all(|d| !d.in_service));
        for variant in ControlCurveVariant::ALL {
            assert!(engine.has_curve(variant));
        }
    }

    #[test]
    fn renames_non_ascii_terminals() {
        let (engine, profiles) = engine(&["H0"]);
        let mut engine = engine.with_terminal_name("Terminal 1", "Gärten 1");
        let report = prepare_grid(&mut engine, &profiles, ControlCurveVariant::CosPhiP).unwrap();
        assert_eq!(report.names_canonicalized, 1);
        assert!(engine.terminals().any(|t| t == "G_rten 1"));
        assert!(engine.loads().unwrap().iter().all(|l| l.terminal == "G_rten 1"));
    }

    #[test]
    fn grid_without_pv_template_fails() {
        let (mut engine, profiles) = engine(&["H0"]);
        engine.delete_device(&DeviceId::new("PV Template")).unwrap();
        let err = prepare_grid(&mut engine, &profiles, ControlCurveVariant::CosPhiP).unwrap_err();
        assert!(matches!(err, GdsError::Scenario(_)));
    }
}
