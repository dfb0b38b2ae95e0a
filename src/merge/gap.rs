//! Filling valueless runs of a merged distribution.

use crate::domain::{MergedDistribution, Origin};
use crate::error::{PsdError, Result};
use crate::math::lerp_log;

/// Fill each interior run of valueless bins by log-linear interpolation.
///
/// Each side of a run is anchored at its nearest valued bin, with the value
/// replaced by the mean of up to `edge_window` valued bins on that side. Runs
/// touching either end of the axis are left empty.
pub fn interpolate_gaps(merged: &MergedDistribution, edge_window: usize) -> Result<MergedDistribution> {
    if edge_window == 0 {
        return Err(PsdError::InvalidConfig("gap_edge_window must be >= 1".into()));
    }

    let mut out = merged.clone();
    let n = merged.bins.len();

    for run in merged.empty_runs() {
        if run.start == 0 || run.end == n {
            continue;
        }
        let left = &merged.bins[..run.start];
        let right = &merged.bins[run.end..];

        let Some(left_anchor) = left.last().map(|b| b.diameter) else {
            continue;
        };
        let Some(right_anchor) = right.first().map(|b| b.diameter) else {
            continue;
        };
        let left_value = edge_mean(left.iter().rev().filter_map(|b| b.dndlogd), edge_window);
        let right_value = edge_mean(right.iter().filter_map(|b| b.dndlogd), edge_window);

        for bin in &mut out.bins[run] {
            let v = lerp_log((left_anchor, left_value), (right_anchor, right_value), bin.diameter);
            bin.dndlogd = Some(v.max(0.0));
            bin.provenance.origin = Origin::Interpolated;
        }
    }

    log::trace!(
        "interpolated {} bins",
        out.count_origin(Origin::Interpolated) - merged.count_origin(Origin::Interpolated)
    );
    Ok(out)
}

fn edge_mean(values: impl Iterator<Item = f64>, window: usize) -> f64 {
    let (sum, count) = values
        .take(window)
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    sum / count.max(1) as f64
}
