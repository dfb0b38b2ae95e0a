//! Bin geometry on a logarithmic diameter axis.
//!
//! Instruments report channels evenly spaced in log-diameter, characterized by
//! their channel resolution (bins per decade). Everything here works in log10.

use crate::error::{PsdError, Result};

/// Generate `steps` log-spaced points between `min` and `max` (inclusive).
pub fn log_space(min: f64, max: f64, steps: usize) -> Result<Vec<f64>> {
    if !(min.is_finite() && max.is_finite() && min > 0.0 && max > 0.0 && max > min) {
        return Err(PsdError::InvalidConfig(format!(
            "Invalid log range: min={min}, max={max} (must be finite, >0, and max>min)."
        )));
    }
    if steps < 2 {
        return Err(PsdError::InvalidConfig("Log grid steps must be >= 2.".into()));
    }

    let ln_min = min.ln();
    let ln_max = max.ln();
    let step = (ln_max - ln_min) / (steps as f64 - 1.0);

    let mut out = Vec::with_capacity(steps);
    for i in 0..steps {
        out.push((ln_min + step * i as f64).exp());
    }
    Ok(out)
}

/// Lower and upper bin edges for a channel with mean diameter `d`.
///
/// Derived from `dN/dlogD = dN * channel_res`: the edges are a factor
/// `10^(1/res)` apart and `d` is their arithmetic mean, so adjacent channels of a
/// regular grid share their edges.
pub fn bin_boundaries(d: f64, channel_res: f64) -> (f64, f64) {
    let k = 10f64.powf(1.0 / channel_res);
    let lower = 2.0 * d / (k + 1.0);
    let upper = 2.0 * d / (1.0 / k + 1.0);
    (lower, upper)
}

/// Average channel resolution (bins per decade) of sorted diameters.
pub fn channel_resolution(diameters: &[f64]) -> Option<f64> {
    let (first, last) = (diameters.first()?, diameters.last()?);
    if diameters.len() < 2 || *first <= 0.0 {
        return None;
    }
    let decades = (last / first).log10();
    (decades > 0.0).then(|| (diameters.len() - 1) as f64 / decades)
}

/// Bins `(diameter, lower, upper)` tiling `[start, end]` at `res` bins per decade.
///
/// At least one bin is produced for a non-empty interval; diameters are the
/// geometric centres of their edges.
pub fn tile_interval(start: f64, end: f64, res: f64) -> Vec<(f64, f64, f64)> {
    if !(start > 0.0 && end > start && res > 0.0) {
        return Vec::new();
    }
    let decades = (end / start).log10();
    let n = ((res * decades).round() as usize).max(1);
    let step = decades / n as f64;
    let log_start = start.log10();

    (0..n)
        .map(|i| {
            let lower = 10f64.powf(log_start + step * i as f64);
            let upper = if i + 1 == n {
                end
            } else {
                10f64.powf(log_start + step * (i + 1) as f64)
            };
            ((lower * upper).sqrt(), lower, upper)
        })
        .collect()
}

/// Linear interpolation in log10 of the abscissa between two points.
pub fn lerp_log(a: (f64, f64), b: (f64, f64), x: f64) -> f64 {
    let (x0, y0) = a;
    let (x1, y1) = b;
    let span = (x1 / x0).log10();
    if span.abs() < 1e-15 {
        return y0;
    }
    let u = (x / x0).log10() / span;
    y0 + u * (y1 - y0)
}
