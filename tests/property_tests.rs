//! Property-based tests for the normalizer and the merged-distribution stages.
//!
//! - Test ordering and conservation invariants of the unit conversion
//! - Test shape invariants of smoothing and gap filling
//! - Run with ProptestConfig::with_cases(64)

use chrono::{NaiveDate, NaiveDateTime};
use proptest::prelude::*;

use psd_merge::domain::{
    DiameterMetric, Instrument, MergedBin, MergedDistribution, Origin, PhysicalProperties, Provenance, SizeBin,
    SizeDistribution,
};
use psd_merge::math::bin_boundaries;
use psd_merge::merge::{interpolate_gaps, smooth};
use psd_merge::normalize::normalize;

const RES: f64 = 32.0;

fn ts() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2021, 4, 28)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn diameter(start: f64, i: usize) -> f64 {
    start * 10f64.powf(i as f64 / RES)
}

// ============================================================================
// Strategies
// ============================================================================

fn arb_metric() -> impl Strategy<Value = DiameterMetric> {
    prop_oneof![
        Just(DiameterMetric::Mobility),
        Just(DiameterMetric::Aerodynamic),
        Just(DiameterMetric::VacuumAerodynamic),
    ]
}

fn arb_properties() -> impl Strategy<Value = PhysicalProperties> {
    (0.5f64..3.0, 1.0f64..2.0, 250.0f64..320.0, 700.0f64..1100.0).prop_map(|(density, chi, t, p)| {
        PhysicalProperties {
            density,
            shape_factor: chi,
            temperature_k: t,
            pressure_hpa: p,
        }
    })
}

/// Native-metric distribution on a 32-per-decade grid with occasional dropouts.
fn arb_distribution() -> impl Strategy<Value = SizeDistribution> {
    (
        0.005f64..1.0,
        proptest::collection::vec(prop_oneof![9 => 0.0f64..5000.0, 1 => Just(f64::NAN)], 2..60),
        arb_metric(),
    )
        .prop_map(|(start, values, metric)| {
            let bins = values
                .iter()
                .enumerate()
                .map(|(i, &v)| {
                    let d = diameter(start, i);
                    let (lower, upper) = bin_boundaries(d, RES);
                    SizeBin::new(d, lower, upper, v)
                })
                .collect();
            SizeDistribution::new(ts(), Instrument::Aps, metric, bins).unwrap()
        })
}

/// Merged distribution with optional values on a contiguous grid.
fn arb_merged() -> impl Strategy<Value = MergedDistribution> {
    proptest::collection::vec(proptest::option::weighted(0.8, 0.0f64..5000.0), 3..80).prop_map(|values| {
        let bins = values
            .into_iter()
            .enumerate()
            .map(|(i, v)| {
                let d = diameter(0.01, i);
                let (lower, upper) = bin_boundaries(d, RES);
                let origin = if v.is_some() { Origin::Instrument(Instrument::Smps) } else { Origin::Gap };
                MergedBin {
                    diameter: d,
                    lower,
                    upper,
                    dndlogd: v,
                    provenance: Provenance::new(origin),
                }
            })
            .collect();
        MergedDistribution {
            timestamp: ts(),
            bins,
            overlap: None,
        }
    })
}

fn arb_range() -> impl Strategy<Value = (f64, f64)> {
    (0.005f64..1.0, 1.1f64..50.0).prop_map(|(lo, factor)| (lo, lo * factor))
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: conversion keeps diameters and edges strictly increasing
    #[test]
    fn prop_normalize_preserves_ordering(dist in arb_distribution(), props in arb_properties()) {
        let out = normalize(&dist, &props).unwrap();
        prop_assert_eq!(out.len(), dist.len());
        prop_assert_eq!(out.metric(), DiameterMetric::VolumeEquivalent);
        for w in out.bins().windows(2) {
            prop_assert!(w[1].diameter > w[0].diameter);
            prop_assert!(w[1].lower > w[0].lower && w[1].upper > w[0].upper);
        }
        for b in out.bins() {
            prop_assert!(b.lower < b.diameter && b.diameter < b.upper);
        }
    }

    /// Property: conversion conserves the number concentration
    #[test]
    fn prop_normalize_conserves_number(dist in arb_distribution(), props in arb_properties()) {
        let out = normalize(&dist, &props).unwrap();
        let before = dist.total_number();
        let after = out.total_number();
        prop_assert!((after - before).abs() <= 1e-6 * before.max(1e-12), "{} vs {}", before, after);
        for (a, b) in dist.bins().iter().zip(out.bins()) {
            prop_assert_eq!(a.is_valued(), b.is_valued());
        }
    }

    /// Property: smoothing keeps the axis and never goes negative
    #[test]
    fn prop_smooth_keeps_axis_and_sign(
        merged in arb_merged(),
        range in arb_range(),
        window in 0.02f64..0.5
    ) {
        let out = smooth(&merged, &[range], window).unwrap();
        prop_assert_eq!(out.len(), merged.len());
        for (a, b) in merged.bins.iter().zip(&out.bins) {
            prop_assert_eq!(a.diameter, b.diameter);
            prop_assert_eq!(a.lower, b.lower);
            prop_assert_eq!(a.upper, b.upper);
            prop_assert_eq!(a.dndlogd.is_some(), b.dndlogd.is_some());
            prop_assert_eq!(a.provenance.origin, b.provenance.origin);
            if let Some(v) = b.dndlogd {
                prop_assert!(v >= 0.0);
            }
            if a.diameter < range.0 || a.diameter > range.1 {
                prop_assert_eq!(a.dndlogd, b.dndlogd);
            }
        }
    }

    /// Property: gap filling never extrapolates past the outermost valued bins
    #[test]
    fn prop_interpolation_never_extrapolates(merged in arb_merged(), window in 1usize..4) {
        let out = interpolate_gaps(&merged, window).unwrap();
        let first = merged.bins.iter().position(|b| b.dndlogd.is_some());
        let last = merged.bins.iter().rposition(|b| b.dndlogd.is_some());

        for (i, (a, b)) in merged.bins.iter().zip(&out.bins).enumerate() {
            let interior = matches!((first, last), (Some(f), Some(l)) if i > f && i < l);
            match a.dndlogd {
                Some(v) => prop_assert_eq!(b.dndlogd, Some(v)),
                None if interior => {
                    prop_assert!(b.dndlogd.is_some_and(|v| v >= 0.0));
                    prop_assert_eq!(b.provenance.origin, Origin::Interpolated);
                }
                None => {
                    prop_assert!(b.dndlogd.is_none());
                    prop_assert_eq!(b.provenance.origin, Origin::Gap);
                }
            }
        }
    }
}
