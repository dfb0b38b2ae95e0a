//! Combining two normalized instruments into one distribution.
//!
//! Layout of a merged distribution (by diameter):
//!
//! ```text
//! | low instrument only | overlap (combined) | high instrument only |
//! | low instrument only | gap placeholders   | high instrument only |
//! ```
//!
//! Below the overlap interval only the low instrument contributes and above it
//! only the high one, even when the instruments' raw ranges extend further.
//! Inside the interval every diameter reported by either instrument yields one
//! bin, valued by the configured [`MergeRule`].
//!
//! Post-processing stages that act on a merged distribution live in the
//! submodules: [`gap`] (interpolation) and [`smooth`] (partial smoothing).

pub mod gap;
pub mod smooth;

use crate::domain::{
    MergeRule, MergedBin, MergedDistribution, Origin, PipelineConfig, Provenance, SizeBin,
    SizeDistribution,
};
use crate::error::{PsdError, Result};
use crate::math::tile_interval;

pub use gap::interpolate_gaps;
pub use smooth::smooth;

/// Gap grid resolution when neither instrument has a usable one.
const FALLBACK_RESOLUTION: f64 = 32.0;
/// Relative tolerance under which two diameters are the same channel.
const SAME_DIAMETER_RTOL: f64 = 1e-9;

/// Merge two normalized distributions.
pub fn merge(
    a: &SizeDistribution,
    b: &SizeDistribution,
    config: &PipelineConfig,
) -> Result<MergedDistribution> {
    let (low, high) = order_by_range(a, b)?;
    let overlap = overlap_for(low, high, config)?;

    let low_bins = low.bins();
    let high_bins = high.bins();
    let mut bins: Vec<MergedBin> = Vec::with_capacity(low_bins.len() + high_bins.len());

    let low_only = Provenance::new(Origin::Instrument(low.instrument()));
    let high_only = Provenance::new(Origin::Instrument(high.instrument()));

    match overlap {
        Some((lo, hi)) => {
            bins.extend(low_bins.iter().filter(|b| b.diameter < lo).map(|b| verbatim(b, low_only)));
            bins.extend(overlap_bins(low, high, lo, hi, config)?);
            bins.extend(high_bins.iter().filter(|b| b.diameter > hi).map(|b| verbatim(b, high_only)));
        }
        None => {
            bins.extend(low_bins.iter().map(|b| verbatim(b, low_only)));
            bins.extend(high_bins.iter().map(|b| verbatim(b, high_only)));
        }
    }

    // A true coverage gap between the instruments becomes a run of placeholders.
    if let (Some((_, low_top)), Some((high_bottom, _))) = (low.edge_range(), high.edge_range()) {
        if low_top < high_bottom {
            let res = config.gap_resolution.unwrap_or_else(|| gap_resolution(low, high));
            bins.extend(
                tile_interval(low_top, high_bottom, res)
                    .into_iter()
                    .map(|(diameter, lower, upper)| MergedBin {
                        diameter,
                        lower,
                        upper,
                        dndlogd: None,
                        provenance: Provenance::new(Origin::Gap),
                    }),
            );
        }
    }

    bins.sort_by(|x, y| x.diameter.partial_cmp(&y.diameter).unwrap_or(std::cmp::Ordering::Equal));
    reconcile_edges(&mut bins);

    Ok(MergedDistribution {
        timestamp: low.timestamp(),
        bins,
        overlap,
    })
}

/// Resolve the overlap interval for a pair of distributions.
///
/// Configured bounds are checked against the instruments' actual ranges; without
/// configured bounds the interval is the intersection of the two diameter ranges,
/// or `None` when the instruments do not overlap.
pub fn resolve_overlap(
    a: &SizeDistribution,
    b: &SizeDistribution,
    config: &PipelineConfig,
) -> Result<Option<(f64, f64)>> {
    let (low, high) = order_by_range(a, b)?;
    overlap_for(low, high, config)
}

fn overlap_for(
    low: &SizeDistribution,
    high: &SizeDistribution,
    config: &PipelineConfig,
) -> Result<Option<(f64, f64)>> {
    let empty = |d: &SizeDistribution| PsdError::EmptyDistribution(d.instrument().display_name().into());
    let (low_bottom, low_top) = low.edge_range().ok_or_else(|| empty(low))?;
    let (high_bottom, high_top) = high.edge_range().ok_or_else(|| empty(high))?;

    let overlap = match config.overlap_bounds {
        Some((lo, hi)) => {
            if !(lo.is_finite() && hi.is_finite() && lo > 0.0 && hi > lo) {
                return Err(PsdError::MergeRangeError(format!(
                    "overlap bounds must satisfy 0 < lo < hi, got ({lo}, {hi})"
                )));
            }
            if lo < low_bottom || hi > high_top {
                return Err(PsdError::MergeRangeError(format!(
                    "overlap bounds ({lo}, {hi}) extend beyond the combined range ({low_bottom:.4}, {high_top:.4})"
                )));
            }
            if low_top < high_bottom {
                return Err(PsdError::MergeRangeError(format!(
                    "overlap bounds ({lo}, {hi}) configured, but {} ends at {low_top:.4} and {} starts at {high_bottom:.4}",
                    low.instrument().display_name(),
                    high.instrument().display_name(),
                )));
            }
            if lo >= low_top || hi <= high_bottom {
                return Err(PsdError::MergeRangeError(format!(
                    "overlap bounds ({lo}, {hi}) do not intersect both ranges: {} ({low_bottom:.4}, {low_top:.4}), {} ({high_bottom:.4}, {high_top:.4})",
                    low.instrument().display_name(),
                    high.instrument().display_name(),
                )));
            }
            Some((lo, hi))
        }
        None => {
            let lo = high.bins()[0].diameter;
            let hi = low.bins()[low.len() - 1].diameter;
            (lo <= hi).then_some((lo, hi))
        }
    };

    if let (Some((lo, hi)), Some(dx)) = (overlap, config.crossover_diameter) {
        if config.merge_rule == MergeRule::Crossover && !(dx >= lo && dx <= hi) {
            return Err(PsdError::MergeRangeError(format!(
                "crossover diameter {dx} outside overlap interval ({lo:.4}, {hi:.4})"
            )));
        }
    }

    Ok(overlap)
}

fn order_by_range<'a>(
    a: &'a SizeDistribution,
    b: &'a SizeDistribution,
) -> Result<(&'a SizeDistribution, &'a SizeDistribution)> {
    for d in [a, b] {
        if d.is_empty() {
            return Err(PsdError::EmptyDistribution(d.instrument().display_name().into()));
        }
    }
    if a.bins()[0].diameter <= b.bins()[0].diameter {
        Ok((a, b))
    } else {
        Ok((b, a))
    }
}

fn verbatim(b: &SizeBin, provenance: Provenance) -> MergedBin {
    MergedBin {
        diameter: b.diameter,
        lower: b.lower,
        upper: b.upper,
        dndlogd: reported(b),
        provenance,
    }
}

/// A diameter inside the overlap and the source bins reporting it.
struct Channel<'a> {
    /// Geometry of the channel; the low instrument's bin when both report it.
    bin: &'a SizeBin,
    low: Option<&'a SizeBin>,
    high: Option<&'a SizeBin>,
}

fn overlap_bins(
    low: &SizeDistribution,
    high: &SizeDistribution,
    lo: f64,
    hi: f64,
    config: &PipelineConfig,
) -> Result<Vec<MergedBin>> {
    let inside = |b: &&SizeBin| b.diameter >= lo && b.diameter <= hi;
    let mut channels: Vec<Channel> = low
        .bins()
        .iter()
        .filter(inside)
        .map(|bin| Channel {
            bin,
            low: Some(bin),
            high: None,
        })
        .collect();
    for bin in high.bins().iter().filter(inside) {
        match channels
            .iter_mut()
            .find(|c| (c.bin.diameter - bin.diameter).abs() <= SAME_DIAMETER_RTOL * bin.diameter)
        {
            Some(c) => c.high = Some(bin),
            None => channels.push(Channel {
                bin,
                low: None,
                high: Some(bin),
            }),
        }
    }
    channels.sort_by(|x, y| {
        x.bin
            .diameter
            .partial_cmp(&y.bin.diameter)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let provenance = Provenance::new(Origin::Overlap);
    let span = (hi / lo).log10();

    let out = match config.merge_rule {
        MergeRule::Blend => channels
            .iter()
            .map(|c| {
                let bin = c.bin;
                let d = bin.diameter;
                // A single shared channel weighs both instruments equally.
                let w = if span > 0.0 {
                    ((d / lo).log10() / span).clamp(0.0, 1.0)
                } else {
                    0.5
                };
                MergedBin {
                    diameter: d,
                    lower: bin.lower,
                    upper: bin.upper,
                    dndlogd: blend(source_value(low, c.low, d), source_value(high, c.high, d), w),
                    provenance,
                }
            })
            .collect(),
        MergeRule::Crossover => {
            let dx = config.crossover_diameter.unwrap_or_else(|| (lo * hi).sqrt());
            channels
                .iter()
                .filter_map(|c| {
                    let d = c.bin.diameter;
                    let (own, other, other_bin) = if d < dx {
                        (c.low?, high, c.high)
                    } else {
                        (c.high?, low, c.low)
                    };
                    Some(MergedBin {
                        diameter: own.diameter,
                        lower: own.lower,
                        upper: own.upper,
                        dndlogd: prefer_valid(reported(own), source_value(other, other_bin, d)),
                        provenance,
                    })
                })
                .collect()
        }
    };
    Ok(out)
}

/// A bin's own value; dropouts report nothing.
fn reported(bin: &SizeBin) -> Option<f64> {
    bin.is_valued().then_some(bin.dndlogd)
}

/// Value of `dist` at `d`: its own channel when it reports one, otherwise
/// interpolated between its bracketing channels.
fn source_value(dist: &SizeDistribution, own: Option<&SizeBin>, d: f64) -> Option<f64> {
    match own {
        Some(bin) => reported(bin),
        None => dist.value_at(d),
    }
}

/// Strictly positive values count as valid measurements.
fn valid(v: Option<f64>) -> Option<f64> {
    v.filter(|x| *x > 0.0)
}

/// `(1 − w)·low + w·high`, falling back to whichever side is valid.
fn blend(low: Option<f64>, high: Option<f64>, w: f64) -> Option<f64> {
    match (valid(low), valid(high)) {
        (Some(l), Some(h)) => Some((1.0 - w) * l + w * h),
        (Some(l), None) => Some(l),
        (None, Some(h)) => Some(h),
        (None, None) => low.or(high),
    }
}

fn prefer_valid(primary: Option<f64>, other: Option<f64>) -> Option<f64> {
    valid(primary).or(valid(other)).or(primary)
}

fn gap_resolution(low: &SizeDistribution, high: &SizeDistribution) -> f64 {
    match (low.channel_resolution(), high.channel_resolution()) {
        (Some(a), Some(b)) => (a + b) / 2.0,
        (Some(r), None) | (None, Some(r)) => r,
        (None, None) => FALLBACK_RESOLUTION,
    }
}

/// Make edges strictly increasing: where neighbouring bins overlap, both share
/// the geometric mean of their diameters as the common edge.
fn reconcile_edges(bins: &mut [MergedBin]) {
    for i in 1..bins.len() {
        if bins[i - 1].upper > bins[i].lower {
            let edge = (bins[i - 1].diameter * bins[i].diameter).sqrt();
            bins[i - 1].upper = edge;
            bins[i].lower = edge;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DiameterMetric, Instrument};
    use crate::math::{bin_boundaries, log_space};
    use chrono::{NaiveDate, NaiveDateTime};

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2021, 4, 28)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn dist(instrument: Instrument, min: f64, max: f64, steps: usize, value: impl Fn(f64) -> f64) -> SizeDistribution {
        let grid = log_space(min, max, steps).unwrap();
        let res = crate::math::channel_resolution(&grid).unwrap();
        let bins = grid
            .into_iter()
            .map(|d| {
                let (lo, hi) = bin_boundaries(d, res);
                SizeBin::new(d, lo, hi, value(d))
            })
            .collect();
        SizeDistribution::new(ts(), instrument, DiameterMetric::VolumeEquivalent, bins).unwrap()
    }

    fn assert_axis_invariants(m: &MergedDistribution) {
        for w in m.bins.windows(2) {
            assert!(w[1].diameter > w[0].diameter);
            assert!(w[1].lower > w[0].lower);
            assert!(w[1].upper > w[0].upper);
            assert!(w[0].upper <= w[1].lower + 1e-12);
        }
        for b in &m.bins {
            assert!(b.lower <= b.diameter && b.diameter <= b.upper);
        }
    }

    #[test]
    fn blend_is_continuous_at_overlap_boundaries() {
        let smps = dist(Instrument::Smps, 0.01, 0.8, 60, |_| 100.0);
        let aps = dist(Instrument::Aps, 0.5, 10.0, 40, |_| 60.0);
        let merged = merge(&smps, &aps, &PipelineConfig::default()).unwrap();
        let (lo, hi) = merged.overlap.unwrap();

        let at = |d: f64| {
            merged
                .bins
                .iter()
                .find(|b| (b.diameter - d).abs() < 1e-12)
                .and_then(|b| b.dndlogd)
                .unwrap()
        };
        assert_eq!(at(lo), smps.value_at(lo).unwrap());
        assert_eq!(at(hi), aps.value_at(hi).unwrap());
        assert_axis_invariants(&merged);
    }

    #[test]
    fn input_order_does_not_matter() {
        let smps = dist(Instrument::Smps, 0.01, 0.8, 60, |d| 100.0 * d);
        let aps = dist(Instrument::Aps, 0.5, 10.0, 40, |_| 60.0);
        let config = PipelineConfig::default();
        let ab = merge(&smps, &aps, &config).unwrap();
        let ba = merge(&aps, &smps, &config).unwrap();
        assert_eq!(ab.bins, ba.bins);
    }

    #[test]
    fn provenance_runs_are_contiguous() {
        let smps = dist(Instrument::Smps, 0.01, 0.8, 60, |_| 100.0);
        let aps = dist(Instrument::Aps, 0.5, 10.0, 40, |_| 60.0);
        let merged = merge(&smps, &aps, &PipelineConfig::default()).unwrap();

        let mut runs: Vec<Origin> = Vec::new();
        for b in &merged.bins {
            if runs.last() != Some(&b.provenance.origin) {
                runs.push(b.provenance.origin);
            }
        }
        assert_eq!(
            runs,
            vec![
                Origin::Instrument(Instrument::Smps),
                Origin::Overlap,
                Origin::Instrument(Instrument::Aps)
            ]
        );
    }

    #[test]
    fn missing_value_uses_other_instrument() {
        // SMPS reports nothing above 0.6 µm.
        let smps = dist(Instrument::Smps, 0.01, 0.8, 60, |d| if d > 0.6 { f64::NAN } else { 100.0 });
        let aps = dist(Instrument::Aps, 0.5, 10.0, 40, |_| 60.0);
        let merged = merge(&smps, &aps, &PipelineConfig::default()).unwrap();
        for b in merged.bins.iter().filter(|b| b.provenance.origin == Origin::Overlap && b.diameter > 0.6) {
            assert_eq!(b.dndlogd, Some(60.0));
        }
    }

    #[test]
    fn interior_dropout_defers_to_other_instrument() {
        let smps = dist(Instrument::Smps, 0.01, 0.8, 60, |_| 100.0);
        // Knock out one SMPS channel well inside the overlap.
        let dropout = smps
            .bins()
            .iter()
            .map(|b| b.diameter)
            .find(|&d| d > 0.6 && d < 0.7)
            .unwrap();
        let bins: Vec<SizeBin> = smps
            .bins()
            .iter()
            .map(|b| if b.diameter == dropout { SizeBin { dndlogd: f64::NAN, ..*b } } else { *b })
            .collect();
        let smps = SizeDistribution::new(ts(), Instrument::Smps, DiameterMetric::VolumeEquivalent, bins).unwrap();
        let aps = dist(Instrument::Aps, 0.5, 10.0, 40, |_| 60.0);

        let merged = merge(&smps, &aps, &PipelineConfig::default()).unwrap();
        let bin = merged.bins.iter().find(|b| b.diameter == dropout).unwrap();
        assert_eq!(bin.provenance.origin, Origin::Overlap);
        assert_eq!(bin.dndlogd, Some(60.0));

        // APS channels bracketed by the dropout do not see an interpolated SMPS value either.
        let (below, above) = smps
            .bins()
            .windows(3)
            .find(|w| w[1].diameter == dropout)
            .map(|w| (w[0].diameter, w[2].diameter))
            .unwrap();
        for b in merged
            .bins
            .iter()
            .filter(|b| b.diameter > below && b.diameter < above && b.diameter != dropout)
        {
            assert_eq!(b.dndlogd, Some(60.0), "d = {}", b.diameter);
        }
    }

    #[test]
    fn shared_boundary_channel_is_merged_once() {
        let res = 1.0 / 2f64.log10();
        let build = |instrument, diameters: &[f64], value: f64| {
            let bins = diameters
                .iter()
                .map(|&d| {
                    let (lo, hi) = bin_boundaries(d, res);
                    SizeBin::new(d, lo, hi, value)
                })
                .collect();
            SizeDistribution::new(ts(), instrument, DiameterMetric::VolumeEquivalent, bins).unwrap()
        };
        let smps = build(Instrument::Smps, &[0.1, 0.2, 0.4], 100.0);
        let aps = build(Instrument::Aps, &[0.4, 0.8, 1.6], 60.0);

        let merged = merge(&smps, &aps, &PipelineConfig::default()).unwrap();
        assert_eq!(merged.overlap, Some((0.4, 0.4)));
        assert_eq!(merged.diameters(), vec![0.1, 0.2, 0.4, 0.8, 1.6]);
        assert_eq!(merged.bins[2].provenance.origin, Origin::Overlap);
        assert_eq!(merged.bins[2].dndlogd, Some(80.0));
        assert_eq!(merged.count_origin(Origin::Gap), 0);
        assert_axis_invariants(&merged);
    }

    #[test]
    fn disjoint_ranges_produce_gap_placeholders() {
        let smps = dist(Instrument::Smps, 0.01, 0.4, 40, |_| 100.0);
        let aps = dist(Instrument::Aps, 0.8, 10.0, 30, |_| 60.0);
        let merged = merge(&smps, &aps, &PipelineConfig::default()).unwrap();

        assert!(merged.overlap.is_none());
        let gaps = merged.count_origin(Origin::Gap);
        assert!(gaps > 0);
        assert_eq!(merged.empty_runs().len(), 1);
        assert_eq!(merged.empty_runs()[0].len(), gaps);
        assert_axis_invariants(&merged);
    }

    #[test]
    fn crossover_takes_each_side_verbatim() {
        let smps = dist(Instrument::Smps, 0.01, 0.8, 60, |_| 100.0);
        let aps = dist(Instrument::Aps, 0.5, 10.0, 40, |_| 60.0);
        let config = PipelineConfig {
            merge_rule: MergeRule::Crossover,
            crossover_diameter: Some(0.6),
            ..PipelineConfig::default()
        };
        let merged = merge(&smps, &aps, &config).unwrap();
        for b in &merged.bins {
            let expected = if b.diameter < 0.6 { 100.0 } else { 60.0 };
            assert_eq!(b.dndlogd, Some(expected), "d = {}", b.diameter);
        }
        assert_axis_invariants(&merged);
    }

    #[test]
    fn overlap_bounds_outside_ranges_fail() {
        let smps = dist(Instrument::Smps, 0.01, 0.8, 60, |_| 100.0);
        let aps = dist(Instrument::Aps, 0.5, 10.0, 40, |_| 60.0);
        let config = PipelineConfig {
            overlap_bounds: Some((20.0, 30.0)),
            ..PipelineConfig::default()
        };
        assert!(matches!(merge(&smps, &aps, &config), Err(PsdError::MergeRangeError(_))));

        let config = PipelineConfig {
            overlap_bounds: Some((0.85, 0.95)),
            ..PipelineConfig::default()
        };
        assert!(matches!(merge(&smps, &aps, &config), Err(PsdError::MergeRangeError(_))));
    }

    #[test]
    fn configured_bounds_on_disjoint_instruments_fail() {
        let smps = dist(Instrument::Smps, 0.01, 0.4, 40, |_| 100.0);
        let aps = dist(Instrument::Aps, 0.8, 10.0, 30, |_| 60.0);
        let config = PipelineConfig {
            overlap_bounds: Some((0.3, 1.0)),
            ..PipelineConfig::default()
        };
        assert!(matches!(merge(&smps, &aps, &config), Err(PsdError::MergeRangeError(_))));
        assert!(matches!(resolve_overlap(&smps, &aps, &config), Err(PsdError::MergeRangeError(_))));
    }

    #[test]
    fn empty_distribution_is_rejected() {
        let smps = SizeDistribution::new(ts(), Instrument::Smps, DiameterMetric::VolumeEquivalent, vec![]).unwrap();
        let aps = dist(Instrument::Aps, 0.5, 10.0, 40, |_| 60.0);
        assert!(matches!(
            merge(&smps, &aps, &PipelineConfig::default()),
            Err(PsdError::EmptyDistribution(_))
        ));
    }
}
