//! Starting points for the optimizer.
//!
//! Auto guesses come from the data alone: locate the strongest peaks of a
//! lightly smoothed copy of the distribution, split the axis at the minimum
//! between neighbouring peaks, and take moment statistics of each segment.

use crate::domain::ModeParams;
use crate::fit::fitter::{Bounds, FitData};
use crate::models::pack;

/// Half-width (points) of the moving average used for peak finding.
const PEAK_SMOOTHING: usize = 1;
const DEFAULT_LOG_GSD: f64 = 0.2;
/// Peaks closer than this (decades) count as one.
const MIN_PEAK_SEPARATION: f64 = 0.3;

/// Packed starting point for `modes` modes derived from the data.
pub fn auto_guess(data: &FitData, modes: usize, bounds: &Bounds) -> Vec<f64> {
    let segments = split_segments(data, modes.max(1));
    let mut params: Vec<f64> = segments
        .into_iter()
        .flat_map(|range| segment_moments(data, range))
        .collect();
    bounds.project(&mut params);
    params
}

/// Packed caller guess, clamped into the bounds.
pub fn caller_guess(modes: &[ModeParams], bounds: &Bounds) -> Vec<f64> {
    let mut params = pack(modes);
    bounds.project(&mut params);
    params
}

/// Index ranges, one per mode, covering the data.
fn split_segments(data: &FitData, modes: usize) -> Vec<std::ops::Range<usize>> {
    let n = data.len();
    if modes == 1 || n < 2 * modes {
        return even_split(n, modes);
    }

    let smoothed = moving_average(&data.y, PEAK_SMOOTHING);
    let mut peaks: Vec<usize> = (0..n)
        .filter(|&i| {
            let left = i == 0 || smoothed[i] > smoothed[i - 1];
            let right = i + 1 == n || smoothed[i] >= smoothed[i + 1];
            left && right && smoothed[i] > 0.0
        })
        .collect();
    peaks.sort_by(|&a, &b| smoothed[b].partial_cmp(&smoothed[a]).unwrap_or(std::cmp::Ordering::Equal));
    let mut chosen: Vec<usize> = Vec::with_capacity(modes);
    for i in peaks {
        if chosen.len() == modes {
            break;
        }
        if chosen.iter().all(|&j| (data.x[i] - data.x[j]).abs() >= MIN_PEAK_SEPARATION) {
            chosen.push(i);
        }
    }
    let mut peaks = chosen;
    peaks.sort_unstable();

    if peaks.len() < modes {
        return even_split(n, modes);
    }

    let mut cuts = Vec::with_capacity(modes - 1);
    for w in peaks.windows(2) {
        let valley = (w[0]..=w[1])
            .min_by(|&a, &b| smoothed[a].partial_cmp(&smoothed[b]).unwrap_or(std::cmp::Ordering::Equal))
            .unwrap_or(w[0]);
        cuts.push(valley.max(w[0] + 1));
    }

    let mut ranges = Vec::with_capacity(modes);
    let mut start = 0;
    for cut in cuts {
        ranges.push(start..cut);
        start = cut;
    }
    ranges.push(start..n);
    ranges
}

/// Equal shares of the log-diameter axis by point count.
fn even_split(n: usize, modes: usize) -> Vec<std::ops::Range<usize>> {
    (0..modes)
        .map(|k| (k * n / modes)..((k + 1) * n / modes))
        .collect()
}

/// Centred moving average with a shrinking window at the ends.
fn moving_average(y: &[f64], half: usize) -> Vec<f64> {
    (0..y.len())
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(y.len());
            y[lo..hi].iter().sum::<f64>() / (hi - lo) as f64
        })
        .collect()
}

/// `[N, log10 µ, log10 σ_g]` from the density-weighted moments of a segment.
fn segment_moments(data: &FitData, range: std::ops::Range<usize>) -> [f64; 3] {
    let x = &data.x;
    let n = x.len();
    let width = |i: usize| {
        let lo = if i == 0 { x[0] } else { 0.5 * (x[i - 1] + x[i]) };
        let hi = if i + 1 == n { x[n - 1] } else { 0.5 * (x[i] + x[i + 1]) };
        (hi - lo).max(0.0)
    };

    let (mut total, mut sx, mut sxx) = (0.0, 0.0, 0.0);
    for i in range.clone() {
        let w = data.y[i] * width(i);
        total += w;
        sx += w * x[i];
        sxx += w * x[i] * x[i];
    }

    if !(total > 0.0) {
        let centre = if range.is_empty() {
            x.first().copied().unwrap_or(0.0)
        } else {
            0.5 * (x[range.start] + x[range.end - 1])
        };
        return [0.0, centre, DEFAULT_LOG_GSD];
    }

    let mean = sx / total;
    let var = (sxx / total - mean * mean).max(0.0);
    let spread = if var > 0.0 { var.sqrt() } else { DEFAULT_LOG_GSD };
    [total, mean, spread]
}
