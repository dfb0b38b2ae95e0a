//! Partial smoothing over designated diameter sub-ranges.

use crate::domain::MergedDistribution;
use crate::error::{PsdError, Result};

/// Smooth the valued bins whose diameter lies in any of `ranges`.
///
/// Each selected bin becomes the triangular-kernel average, in log10 diameter,
/// of the unsmoothed valued bins within `window` decades. Weights are
/// `1 − |Δlog10 d| / window`, so the result is a convex combination of
/// non-negative values. Axis and valueless bins are untouched.
pub fn smooth(merged: &MergedDistribution, ranges: &[(f64, f64)], window: f64) -> Result<MergedDistribution> {
    if !(window.is_finite() && window > 0.0) {
        return Err(PsdError::InvalidConfig(format!(
            "smoothing window must be > 0 decades, got {window}"
        )));
    }
    for &(lo, hi) in ranges {
        if !(lo.is_finite() && hi.is_finite() && lo > 0.0 && hi > lo) {
            return Err(PsdError::InvalidConfig(format!(
                "smoothing range must satisfy 0 < lo < hi, got ({lo}, {hi})"
            )));
        }
    }

    let mut out = merged.clone();
    if ranges.is_empty() {
        return Ok(out);
    }

    let points: Vec<(f64, f64)> = merged
        .bins
        .iter()
        .filter_map(|b| b.dndlogd.map(|v| (b.diameter.log10(), v)))
        .collect();

    for bin in out.bins.iter_mut() {
        if bin.dndlogd.is_none() {
            continue;
        }
        let d = bin.diameter;
        if !ranges.iter().any(|&(lo, hi)| d >= lo && d <= hi) {
            continue;
        }

        let x = d.log10();
        let (sum, weight) = points
            .iter()
            .map(|&(xj, vj)| (1.0 - (xj - x).abs() / window, vj))
            .filter(|&(w, _)| w > 0.0)
            .fold((0.0, 0.0), |(s, ws), (w, v)| (s + w * v, ws + w));

        if weight > 0.0 {
            bin.dndlogd = Some(sum / weight);
            bin.provenance.smoothed = true;
        }
    }
    Ok(out)
}
