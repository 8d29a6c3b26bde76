//! Unit newtypes for the quantities that cross the engine boundary.
//!
//! The simulation engine reports powers in megawatts / megavars while the
//! persisted run artifacts carry watts. Keeping the two apart as types makes
//! the single conversion point in the post-processing stage explicit.
//!
//! # Usage
//!
//! ```
//! use gds_core::units::{Megawatts, Watts};
//!
//! let p = Megawatts(1.9999);
//! assert_eq!(p.to_watts(), Watts(1_999_900.0));
//! assert_eq!(p.to_watts().truncated(), 1_999_900);
//! ```

use serde::{Deserialize, Serialize};
use std::ops::Mul;

/// Constructor, accessor and scalar scaling for a unit newtype.
macro_rules! impl_unit_ops {
    ($type:ty) => {
        impl Mul<f64> for $type {
            type Output = Self;
            fn mul(self, rhs: f64) -> Self::Output {
                Self(self.0 * rhs)
            }
        }

        impl $type {
            #[inline]
            pub const fn new(value: f64) -> Self {
                Self(value)
            }

            #[inline]
            pub const fn value(self) -> f64 {
                self.0
            }
        }
    };
}

// =============================================================================
// Power Units
// =============================================================================

/// Active power in megawatts (MW), the engine's native unit.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Megawatts(pub f64);

impl_unit_ops!(Megawatts);

/// Reactive power in megavolt-amperes reactive (Mvar)
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Megavars(pub f64);

impl_unit_ops!(Megavars);

/// Apparent power in megavolt-amperes (MVA); device ratings use this unit.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct MegavoltAmperes(pub f64);

impl_unit_ops!(MegavoltAmperes);

// Power relationships
impl Megawatts {
    /// Convert to watts.
    ///
    /// A product within floating-point error of a whole watt is snapped to
    /// it, so decimal inputs convert exactly (`1.9999 MW` is `1 999 900 W`,
    /// not `1 999 899.999…`). Anything farther away is left untouched.
    #[inline]
    pub fn to_watts(self) -> Watts {
        Watts(snap_to_whole_watt(self.0 * WATTS_PER_MEGAWATT))
    }
}

impl MegavoltAmperes {
    /// Reactive power at the given per-unit reactive ratio: Q = S × q_pu
    #[inline]
    pub fn reactive_at(self, q_pu: PerUnit) -> Megavars {
        Megavars(self.0 * q_pu.value())
    }
}

/// Power in watts (W), the unit of every persisted power column.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Watts(pub f64);

impl_unit_ops!(Watts);

impl Watts {
    /// Drop the fractional part (towards zero, never rounded).
    #[inline]
    pub fn truncated(self) -> i64 {
        self.0.trunc() as i64
    }
}

/// Number of watts in one megawatt.
pub const WATTS_PER_MEGAWATT: f64 = 1_000_000.0;

/// Relative distance to a whole watt still treated as rounding noise.
const SNAP_TOLERANCE: f64 = 1e-12;

fn snap_to_whole_watt(watts: f64) -> f64 {
    let whole = watts.round();
    if watts.is_finite() && (watts - whole).abs() <= watts.abs() * SNAP_TOLERANCE {
        whole
    } else {
        watts
    }
}

// =============================================================================
// Per-unit quantities
// =============================================================================

/// Per-unit value (voltage magnitude, or a P/Q ratio against rated power)
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct PerUnit(pub f64);

impl_unit_ops!(PerUnit);
