//! Diameter-metric harmonization.
//!
//! Each instrument infers diameter from a different physical principle. Before
//! two instruments can be combined their axes are converted to the
//! volume-equivalent diameter `d_ve`:
//!
//! - mobility:             `χ d_ve / Cc(d_ve) = d_m / Cc(d_m)`
//! - aerodynamic:          `ρ_p d_ve² Cc(d_ve) / χ = ρ₀ d_a² Cc(d_a)`
//! - vacuum aerodynamic:   `d_ve = d_va χ ρ₀ / ρ_p`
//!
//! Both implicit relations have a left-hand side that is strictly increasing in
//! `d_ve`, so they are solved by bisection in log-diameter. Concentrations are
//! re-expressed per unit log of the new diameter using the converted bin edges,
//! which keeps the per-bin number `dN` unchanged.

pub mod slip;

use crate::domain::{DiameterMetric, PhysicalProperties, SizeBin, SizeDistribution};
use crate::error::{PsdError, Result};

pub use slip::{REFERENCE_DENSITY, mean_free_path, slip_correction};

/// Iteration ceiling for the bracketed root solve.
const MAX_BISECTIONS: usize = 200;
/// Bracket expansions (factor 10 each) before giving up.
const MAX_EXPANSIONS: usize = 12;
/// Relative tolerance on the converted diameter.
const REL_TOL: f64 = 1e-12;

/// Convert a distribution to the volume-equivalent diameter metric.
///
/// Pure: the input is left untouched and a new distribution is returned.
pub fn normalize(dist: &SizeDistribution, props: &PhysicalProperties) -> Result<SizeDistribution> {
    props.validate()?;

    let metric = dist.metric();
    if metric == DiameterMetric::VolumeEquivalent {
        return Ok(dist.clone());
    }

    let converter = Converter::new(metric, props);
    let mut bins = Vec::with_capacity(dist.len());
    for b in dist.bins() {
        let diameter = converter.convert(b.diameter)?;
        let lower = converter.convert(b.lower)?;
        let upper = converter.convert(b.upper)?;

        let dndlogd = if b.is_valued() {
            // Jacobian of the coordinate change, from the converted edges.
            b.dndlogd * b.log_width() / (upper / lower).log10()
        } else {
            b.dndlogd
        };
        bins.push(SizeBin::new(diameter, lower, upper, dndlogd));
    }

    let increasing = bins.windows(2).all(|w| {
        w[1].diameter > w[0].diameter && w[1].lower > w[0].lower && w[1].upper > w[0].upper
    });
    if !increasing || bins.iter().any(|b| !(b.lower < b.upper)) {
        return Err(PsdError::ConversionFailed(format!(
            "{}: converted diameter axis is not strictly increasing",
            dist.instrument().display_name()
        )));
    }

    Ok(dist.with_bins(DiameterMetric::VolumeEquivalent, bins))
}

/// Convert a single diameter (µm) from `metric` to volume-equivalent.
pub fn to_volume_equivalent(d: f64, metric: DiameterMetric, props: &PhysicalProperties) -> Result<f64> {
    props.validate()?;
    Converter::new(metric, props).convert(d)
}

struct Converter {
    metric: DiameterMetric,
    density: f64,
    shape_factor: f64,
    mfp: f64,
}

impl Converter {
    fn new(metric: DiameterMetric, props: &PhysicalProperties) -> Self {
        Self {
            metric,
            density: props.density,
            shape_factor: props.shape_factor,
            mfp: mean_free_path(props.temperature_k, props.pressure_hpa),
        }
    }

    fn convert(&self, d: f64) -> Result<f64> {
        if !(d.is_finite() && d > 0.0) {
            return Err(PsdError::ConversionFailed(format!("diameter must be > 0, got {d}")));
        }
        let chi = self.shape_factor;
        let cc = |x: f64| slip_correction(x, self.mfp);

        let out = match self.metric {
            DiameterMetric::VolumeEquivalent => Some(d),
            DiameterMetric::VacuumAerodynamic => Some(d * chi * REFERENCE_DENSITY / self.density),
            DiameterMetric::Mobility => {
                let target = d / cc(d);
                solve_increasing(|x| chi * x / cc(x), target, d / chi)
            }
            DiameterMetric::Aerodynamic => {
                let target = REFERENCE_DENSITY * d * d * cc(d);
                let guess = d * (chi * REFERENCE_DENSITY / self.density).sqrt();
                solve_increasing(|x| self.density * x * x * cc(x) / chi, target, guess)
            }
        };

        out.filter(|v| v.is_finite() && *v > 0.0).ok_or_else(|| {
            PsdError::ConversionFailed(format!("no volume-equivalent diameter for {d} µm ({:?})", self.metric))
        })
    }
}

/// Solve `f(x) = target` for a strictly increasing `f` on `x > 0`.
fn solve_increasing(f: impl Fn(f64) -> f64, target: f64, guess: f64) -> Option<f64> {
    if !(target.is_finite() && guess.is_finite() && guess > 0.0) {
        return None;
    }

    let mut lo = guess / 10.0;
    let mut hi = guess * 10.0;
    let mut expansions = 0;
    while f(lo) > target {
        lo /= 10.0;
        expansions += 1;
        if expansions > MAX_EXPANSIONS {
            return None;
        }
    }
    while f(hi) < target {
        hi *= 10.0;
        expansions += 1;
        if expansions > MAX_EXPANSIONS {
            return None;
        }
    }

    let (mut a, mut b) = (lo.ln(), hi.ln());
    for _ in 0..MAX_BISECTIONS {
        if b - a <= REL_TOL {
            return Some((0.5 * (a + b)).exp());
        }
        let mid = 0.5 * (a + b);
        if f(mid.exp()) < target {
            a = mid;
        } else {
            b = mid;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Instrument;
    use crate::math::{bin_boundaries, log_space};
    use chrono::NaiveDate;

    fn aps_distribution() -> SizeDistribution {
        let ts = NaiveDate::from_ymd_opt(2021, 4, 28)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let bins = log_space(0.5, 15.0, 40)
            .unwrap()
            .into_iter()
            .enumerate()
            .map(|(i, d)| {
                let (lo, hi) = bin_boundaries(d, 32.0);
                SizeBin::new(d, lo, hi, 10.0 + i as f64)
            })
            .collect();
        SizeDistribution::new(ts, Instrument::Aps, DiameterMetric::Aerodynamic, bins).unwrap()
    }

    #[test]
    fn unit_density_sphere_is_identity() {
        let props = PhysicalProperties::new(1.0, 1.0);
        for metric in [DiameterMetric::Aerodynamic, DiameterMetric::Mobility] {
            for &d in &[0.02, 0.3, 5.0] {
                let ve = to_volume_equivalent(d, metric, &props).unwrap();
                assert!((ve - d).abs() / d < 1e-10, "{metric:?} {d} -> {ve}");
            }
        }
    }

    #[test]
    fn dense_particles_are_smaller_than_aerodynamic_size() {
        let props = PhysicalProperties::new(2.5, 1.0);
        let ve = to_volume_equivalent(5.0, DiameterMetric::Aerodynamic, &props).unwrap();
        // Continuum limit: d_ve ≈ d_a / sqrt(ρ_p).
        assert!((ve - 5.0 / 2.5f64.sqrt()).abs() / ve < 0.02);
    }

    #[test]
    fn nonspherical_particles_are_smaller_than_mobility_size() {
        let props = PhysicalProperties::new(1.8, 1.3);
        let ve = to_volume_equivalent(0.2, DiameterMetric::Mobility, &props).unwrap();
        assert!(ve < 0.2);
    }

    #[test]
    fn normalization_conserves_total_number() {
        let dist = aps_distribution();
        let props = PhysicalProperties::new(2.0, 1.2);
        let out = normalize(&dist, &props).unwrap();

        assert_eq!(out.metric(), DiameterMetric::VolumeEquivalent);
        assert_eq!(out.len(), dist.len());
        let before = dist.total_number();
        let after = out.total_number();
        assert!((before - after).abs() / before < 1e-6);
        // Input untouched.
        assert_eq!(dist.metric(), DiameterMetric::Aerodynamic);
    }

    #[test]
    fn invalid_properties_fail() {
        let dist = aps_distribution();
        let err = normalize(&dist, &PhysicalProperties::new(-1.0, 1.0));
        assert!(matches!(err, Err(PsdError::InvalidPhysicalProperties(_))));
        let err = normalize(&dist, &PhysicalProperties::new(1.0, 0.5));
        assert!(matches!(err, Err(PsdError::InvalidPhysicalProperties(_))));
    }
}
