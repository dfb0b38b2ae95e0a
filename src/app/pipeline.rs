//! Shared campaign pipeline used by the CLI and the tests.
//!
//! Per snapshot:
//! normalize (both instruments) -> merge -> interpolate gaps -> smooth -> fit -> moments
//!
//! Run-level problems (bad properties, bad overlap bounds, bad settings) are
//! detected before any snapshot is merged or fitted and abort the run. Anything
//! that only affects one snapshot ends up in that snapshot's status.

use chrono::NaiveDateTime;
use rayon::prelude::*;

use crate::domain::{
    CampaignResult, Instrument, MergedDistribution, Moments, PhysicalProperties, PipelineConfig, SizeDistribution,
    Snapshot, SnapshotResult, SnapshotStatus,
};
use crate::error::{PsdError, Result};
use crate::fit::fit_distribution;
use crate::merge::{interpolate_gaps, merge, resolve_overlap, smooth};
use crate::normalize::normalize;

type NormalizedPair = Result<(SizeDistribution, SizeDistribution)>;

/// Pair SMPS and APS sequences by index. Timestamps come from the SMPS side.
pub fn pair_snapshots(smps: Vec<SizeDistribution>, aps: Vec<SizeDistribution>) -> Result<Vec<Snapshot>> {
    if smps.len() != aps.len() {
        return Err(PsdError::InvalidConfig(format!(
            "SMPS and APS sequences differ in length ({} vs {})",
            smps.len(),
            aps.len()
        )));
    }
    smps.into_iter()
        .zip(aps)
        .enumerate()
        .map(|(i, (smps, aps))| {
            if smps.instrument() != Instrument::Smps || aps.instrument() != Instrument::Aps {
                return Err(PsdError::InvalidConfig(format!(
                    "snapshot {i}: expected an SMPS/APS pair, got {}/{}",
                    smps.instrument().display_name(),
                    aps.instrument().display_name()
                )));
            }
            Ok(Snapshot {
                timestamp: smps.timestamp(),
                smps,
                aps,
            })
        })
        .collect()
}

/// Run the full pipeline over a campaign.
///
/// Returns one result per snapshot in input order, or the first run-level error.
pub fn process_campaign(
    snapshots: &[Snapshot],
    props: &PhysicalProperties,
    config: &PipelineConfig,
) -> Result<CampaignResult> {
    props.validate()?;
    config.validate()?;
    log::info!(
        "processing {} snapshots (merge={:?}, modes={:?}, parallel={})",
        snapshots.len(),
        config.merge_rule,
        config.mode_count,
        config.parallel
    );

    let normalized: Vec<NormalizedPair> = map_snapshots(snapshots, config.parallel, |s| normalize_pair(s, props));

    // Overlap configuration must hold for every snapshot before any is merged.
    for (snapshot, pair) in snapshots.iter().zip(&normalized) {
        if let Ok((smps, aps)) = pair {
            if let Err(err) = resolve_overlap(smps, aps, config) {
                if err.is_run_level() {
                    log::error!("{}: {err}", snapshot.timestamp);
                    return Err(err);
                }
            }
        }
    }

    let staged: Vec<(NaiveDateTime, NormalizedPair)> = snapshots
        .iter()
        .map(|s| s.timestamp)
        .zip(normalized)
        .collect();
    let results: Vec<Result<SnapshotResult>> = map_snapshots(&staged, config.parallel, |(timestamp, pair)| {
        finish_snapshot(*timestamp, pair, props, config)
    });
    let snapshots = results.into_iter().collect::<Result<Vec<_>>>()?;

    let campaign = CampaignResult { snapshots };
    log::info!(
        "campaign done: {}",
        SnapshotStatus::ALL
            .iter()
            .map(|s| format!("{}={}", s.label(), campaign.count(*s)))
            .collect::<Vec<_>>()
            .join(" ")
    );
    Ok(campaign)
}

/// Run the pipeline for a single snapshot.
///
/// Run-level errors are returned as `Err`; per-snapshot failures become a status.
pub fn process_snapshot(
    snapshot: &Snapshot,
    props: &PhysicalProperties,
    config: &PipelineConfig,
) -> Result<SnapshotResult> {
    props.validate()?;
    config.validate()?;
    let pair = normalize_pair(snapshot, props);
    finish_snapshot(snapshot.timestamp, &pair, props, config)
}

/// Merge plus the optional post-processing stages, in pipeline order.
pub fn merge_stage(
    smps: &SizeDistribution,
    aps: &SizeDistribution,
    config: &PipelineConfig,
) -> Result<MergedDistribution> {
    let mut merged = merge(smps, aps, config)?;
    if config.interpolate_gaps {
        merged = interpolate_gaps(&merged, config.gap_edge_window)?;
    }
    if !config.smoothing_ranges.is_empty() {
        merged = smooth(&merged, &config.smoothing_ranges, config.smoothing_window)?;
    }
    Ok(merged)
}

fn map_snapshots<T, R, F>(items: &[T], parallel: bool, f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync + Send,
{
    if parallel {
        items.par_iter().map(f).collect()
    } else {
        items.iter().map(f).collect()
    }
}

fn normalize_pair(snapshot: &Snapshot, props: &PhysicalProperties) -> NormalizedPair {
    Ok((normalize(&snapshot.smps, props)?, normalize(&snapshot.aps, props)?))
}

fn finish_snapshot(
    timestamp: NaiveDateTime,
    pair: &NormalizedPair,
    props: &PhysicalProperties,
    config: &PipelineConfig,
) -> Result<SnapshotResult> {
    let (smps, aps) = match pair {
        Ok(pair) => pair,
        Err(err) => return failure(timestamp, err.clone(), None, None),
    };

    let mut merged = match merge_stage(smps, aps, config) {
        Ok(m) => m,
        Err(err) => return failure(timestamp, err, None, None),
    };
    merged.timestamp = timestamp;
    log::debug!("{timestamp}: merged {} bins ({} valued)", merged.len(), merged.valued_count());
    let moments = crate::report::moments(&merged, props);

    match fit_distribution(&merged, config) {
        Ok(fit) => {
            log::debug!(
                "{timestamp}: ok ({} modes, rmse={:.3}, {} iterations)",
                fit.modes.len(),
                fit.rmse,
                fit.iterations
            );
            let message = fit
                .fallback_used
                .then(|| "caller guess did not converge; auto guess used".to_string());
            if message.is_some() {
                log::warn!("{timestamp}: fit fell back to the auto guess");
            }
            Ok(SnapshotResult {
                timestamp,
                status: SnapshotStatus::Ok,
                merged: Some(merged),
                fit: Some(fit),
                moments: Some(moments),
                message,
            })
        }
        Err(err) => failure(timestamp, err, Some(merged), Some(moments)),
    }
}

fn failure(
    timestamp: NaiveDateTime,
    err: PsdError,
    merged: Option<MergedDistribution>,
    moments: Option<Moments>,
) -> Result<SnapshotResult> {
    if err.is_run_level() {
        return Err(err);
    }

    let status = match &err {
        PsdError::ConversionFailed(_) => SnapshotStatus::InvalidProperties,
        PsdError::FitNonConvergence { .. } | PsdError::InsufficientData { .. } => SnapshotStatus::FitNonConvergent,
        _ => SnapshotStatus::MergeError,
    };
    log::warn!("{timestamp}: {} ({err})", status.label());

    let message = Some(err.to_string());
    let fit = match err {
        PsdError::FitNonConvergence { last } => Some(*last),
        _ => None,
    };
    Ok(SnapshotResult {
        timestamp,
        status,
        merged,
        fit,
        moments,
        message,
    })
}
