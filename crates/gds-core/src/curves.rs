//! Reactive power control curves (Q as a function of P, both per unit of
//! rated power).
//!
//! Four canonical variants exist. Two are healthy control laws used for the
//! regular PV fleet; all four can be injected as the degraded law of a
//! malfunctioning shadow device.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{GdsError, GdsResult};
use crate::units::PerUnit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlCurveVariant {
    /// Q(P) table shaped to act as a cos(phi)(P) characteristic
    CosPhiP,
    /// Linear Q(P) droop beyond half load
    QP,
    /// Flat curve: no reactive power at all
    BrokenFlatQP,
    /// cos(phi)(P) with inverted sign
    InvertedQP,
}

impl ControlCurveVariant {
    pub const ALL: [ControlCurveVariant; 4] = [
        ControlCurveVariant::CosPhiP,
        ControlCurveVariant::QP,
        ControlCurveVariant::BrokenFlatQP,
        ControlCurveVariant::InvertedQP,
    ];

    /// Variant by its historical numeric choice (0..=3).
    pub fn from_index(index: usize) -> GdsResult<Self> {
        Self::ALL.get(index).copied().ok_or_else(|| {
            GdsError::Config(format!("control curve choice {index} is not in 0..=3"))
        })
    }

    /// Name of the curve object inside the engine.
    pub fn engine_name(&self) -> &'static str {
        match self {
            ControlCurveVariant::CosPhiP => "QP acting as cosphi(P) char",
            ControlCurveVariant::QP => "General PQ char",
            ControlCurveVariant::BrokenFlatQP => "Broken PQ char",
            ControlCurveVariant::InvertedQP => "Wrong QP acting as cosphi(P) char",
        }
    }

    /// Malfunction type label used in run metadata and combination keys.
    pub fn label(&self) -> &'static str {
        match self {
            ControlCurveVariant::CosPhiP => "cos(phi)(P)",
            ControlCurveVariant::QP => "Q(P)",
            ControlCurveVariant::BrokenFlatQP => "broken Q(P) (flat curve)",
            ControlCurveVariant::InvertedQP => "wrong Q(P) (inversed curve)",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.label() == label)
    }
}

impl fmt::Display for ControlCurveVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Reactive output above half load for the cos(phi)(P) table, P = 0.51 ..= 1.00.
const COS_PHI_UPPER_Q: [f64; 50] = [
    0.0633406, 0.08971208, 0.11004031, 0.12725592, 0.14249228, 0.15632983, 0.1691129,
    0.18106551, 0.19234309, 0.20305866, 0.21329743, 0.22312553, 0.23259549, 0.24174985,
    0.25062362, 0.25924607, 0.26764189, 0.2758322, 0.28383518, 0.29166667, 0.2993405,
    0.3068689, 0.31426269, 0.32153154, 0.32868411, 0.33572819, 0.34267085, 0.34951849,
    0.35627693, 0.36295153, 0.36954718, 0.37606838, 0.38251928, 0.38890373, 0.39522529,
    0.40148728, 0.40769277, 0.41384466, 0.41994564, 0.42599822, 0.43200477, 0.43796754,
    0.44388861, 0.44976996, 0.45561346, 0.46142089, 0.46719391, 0.47293413, 0.47864305,
    0.4843221,
];

/// Point table of a control curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlCurve {
    pub variant: ControlCurveVariant,
    pub p_pu: Vec<f64>,
    pub q_pu: Vec<f64>,
}

impl ControlCurve {
    pub fn canonical(variant: ControlCurveVariant) -> Self {
        let (p_pu, q_pu) = match variant {
            ControlCurveVariant::CosPhiP => cos_phi_table(1.0),
            ControlCurveVariant::InvertedQP => cos_phi_table(-1.0),
            ControlCurveVariant::QP => (vec![0.0, 0.5, 1.0], vec![0.0, 0.0, -0.338]),
            ControlCurveVariant::BrokenFlatQP => (vec![0.0, 0.5, 1.0], vec![0.0, 0.0, 0.0]),
        };
        Self {
            variant,
            p_pu,
            q_pu,
        }
    }

    pub fn canonical_set() -> Vec<Self> {
        ControlCurveVariant::ALL
            .into_iter()
            .map(Self::canonical)
            .collect()
    }

    /// Linear interpolation, clamped to the table's end points.
    pub fn q_at(&self, p: PerUnit) -> PerUnit {
        let p = p.value();
        let (first, last) = match (self.p_pu.first(), self.p_pu.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => return PerUnit(0.0),
        };
        if p <= first {
            return PerUnit(self.q_pu[0]);
        }
        if p >= last {
            return PerUnit(self.q_pu[self.q_pu.len() - 1]);
        }
        let upper = self.p_pu.partition_point(|x| *x < p);
        let (p0, p1) = (self.p_pu[upper - 1], self.p_pu[upper]);
        let (q0, q1) = (self.q_pu[upper - 1], self.q_pu[upper]);
        if (p1 - p0).abs() < f64::EPSILON {
            return PerUnit(q1);
        }
        PerUnit(q0 + (q1 - q0) * (p - p0) / (p1 - p0))
    }
}

fn cos_phi_table(sign: f64) -> (Vec<f64>, Vec<f64>) {
    let p_pu: Vec<f64> = (0..=100).map(|i| f64::from(i) / 100.0).collect();
    let q_pu = std::iter::repeat(0.0)
        .take(51)
        .chain(COS_PHI_UPPER_Q.iter().map(|q| sign * q))
        .collect();
    (p_pu, q_pu)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_tables_are_aligned() {
        for curve in ControlCurve::canonical_set() {
            assert_eq!(curve.p_pu.len(), curve.q_pu.len(), "{}", curve.variant);
        }
        assert_eq!(ControlCurve::canonical(ControlCurveVariant::CosPhiP).p_pu.len(), 101);
    }

    #[test]
    fn inverted_curve_mirrors_cos_phi() {
        let healthy = ControlCurve::canonical(ControlCurveVariant::CosPhiP);
        let inverted = ControlCurve::canonical(ControlCurveVariant::InvertedQP);
        for (a, b) in healthy.q_pu.iter().zip(&inverted.q_pu) {
            assert_eq!(*a, -*b);
        }
    }

    #[test]
    fn q_at_interpolates_and_clamps() {
        let qp = ControlCurve::canonical(ControlCurveVariant::QP);
        assert_eq!(qp.q_at(PerUnit(0.25)).value(), 0.0);
        assert!((qp.q_at(PerUnit(0.75)).value() + 0.169).abs() < 1e-12);
        assert_eq!(qp.q_at(PerUnit(1.5)).value(), -0.338);
        assert_eq!(qp.q_at(PerUnit(-1.0)).value(), 0.0);
    }

    #[test]
    fn flat_curve_never_produces_reactive_power() {
        let flat = ControlCurve::canonical(ControlCurveVariant::BrokenFlatQP);
        for p in [0.0, 0.3, 0.7, 1.0] {
            assert_eq!(flat.q_at(PerUnit(p)).value(), 0.0);
        }
    }

    #[test]
    fn variant_index_and_labels_round_trip() {
        assert_eq!(
            ControlCurveVariant::from_index(2).unwrap(),
            ControlCurveVariant::BrokenFlatQP
        );
        assert!(ControlCurveVariant::from_index(4).is_err());
        for variant in ControlCurveVariant::ALL {
            assert_eq!(ControlCurveVariant::from_label(variant.label()), Some(variant));
        }
    }
}
