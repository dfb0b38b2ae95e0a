//! Reporting utilities: distribution content and formatted terminal output.

pub mod format;

pub use format::*;

use std::f64::consts::PI;

use crate::domain::{MergedDistribution, Moments, PhysicalProperties};

/// Integrate number, surface, volume and mass over the valued bins.
///
/// Per bin `dN = dN/dlog10D · log10(upper/lower)`; surface and volume use the
/// bin diameter as a sphere. Mass is `ρ_p · V`, and 1 µm³ cm⁻³ at 1 g cm⁻³ is
/// 1 µg m⁻³.
pub fn moments(merged: &MergedDistribution, props: &PhysicalProperties) -> Moments {
    let mut out = Moments {
        number: 0.0,
        surface: 0.0,
        volume: 0.0,
        mass: 0.0,
    };
    for b in &merged.bins {
        let Some(v) = b.dndlogd else {
            continue;
        };
        let dn = v * (b.upper / b.lower).log10();
        let d = b.diameter;
        out.number += dn;
        out.surface += PI * d * d * dn;
        out.volume += PI / 6.0 * d * d * d * dn;
    }
    out.mass = props.density * out.volume;
    out
}
