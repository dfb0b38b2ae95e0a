//! Model evaluation for a sum of log-normal modes.
//!
//! The fitter relies on two primitive operations:
//! - predict dN/dlog10(D) at a log-diameter given packed parameters
//! - fill a Jacobian row at a log-diameter (for the damped least-squares step)
//!
//! Packed parameters are `[N, log10 µ, log10 σ_g]` repeated once per mode.

use crate::domain::ModeParams;
use crate::math::{lognormal, lognormal_log, lognormal_log_gradient};

/// Free parameters per mode.
pub const PARAMS_PER_MODE: usize = 3;

/// Evaluate the model at diameter `d` (µm).
pub fn predict(modes: &[ModeParams], d: f64) -> f64 {
    modes
        .iter()
        .map(|m| lognormal(d, m.total, m.gmd, m.gsd))
        .sum()
}

/// Evaluate the model at `x = log10 d` from packed parameters.
pub fn predict_packed(params: &[f64], x: f64) -> f64 {
    params
        .chunks_exact(PARAMS_PER_MODE)
        .map(|p| lognormal_log(x, p[0], p[1], p[2]))
        .sum()
}

/// Fill one Jacobian row (d model / d params) at `x = log10 d`.
///
/// # Panics
/// Panics if `out.len() != params.len()`. Callers size the row from the packed
/// parameter vector.
pub fn fill_jacobian_row(params: &[f64], x: f64, out: &mut [f64]) {
    assert_eq!(out.len(), params.len());
    for (p, row) in params
        .chunks_exact(PARAMS_PER_MODE)
        .zip(out.chunks_exact_mut(PARAMS_PER_MODE))
    {
        row.copy_from_slice(&lognormal_log_gradient(x, p[0], p[1], p[2]));
    }
}

/// Modes to packed parameters.
pub fn pack(modes: &[ModeParams]) -> Vec<f64> {
    modes
        .iter()
        .flat_map(|m| [m.total, m.gmd.log10(), m.gsd.log10()])
        .collect()
}

/// Packed parameters to modes, sorted by geometric mean diameter.
pub fn unpack(params: &[f64]) -> Vec<ModeParams> {
    let mut modes: Vec<ModeParams> = params
        .chunks_exact(PARAMS_PER_MODE)
        .map(|p| ModeParams::new(p[0], 10f64.powf(p[1]), 10f64.powf(p[2])))
        .collect();
    modes.sort_by(|a, b| a.gmd.partial_cmp(&b.gmd).unwrap_or(std::cmp::Ordering::Equal));
    modes
}
