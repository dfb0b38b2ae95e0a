//! Synthetic SMPS/APS campaign generation from known log-normal modes.
//!
//! The true distribution is defined on the volume-equivalent axis. Each
//! instrument reports it on its own native grid: channel diameters and edges are
//! mapped to volume-equivalent size with the run's physical properties, the
//! density is re-expressed per unit log of the native diameter, then perturbed
//! with multiplicative noise and occasional dropouts. Normalizing a generated
//! distribution therefore recovers the truth up to noise.

use chrono::{Duration, NaiveDateTime};
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::domain::{Instrument, ModeParams, PhysicalProperties, SizeBin, SizeDistribution, Snapshot};
use crate::error::{PsdError, Result};
use crate::math::{bin_boundaries, log_space};
use crate::models::predict;
use crate::normalize::to_volume_equivalent;

/// One instrument's native channel layout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelLayout {
    /// First and last channel diameter in the native metric (µm).
    pub range: (f64, f64),
    /// Channels per decade.
    pub resolution: f64,
}

impl ChannelLayout {
    fn diameters(&self) -> Result<Vec<f64>> {
        let decades = (self.range.1 / self.range.0).log10();
        let steps = (decades * self.resolution).round() as usize + 1;
        log_space(self.range.0, self.range.1, steps)
    }
}

/// Settings for a synthetic campaign.
#[derive(Debug, Clone, PartialEq)]
pub struct CampaignSpec {
    pub snapshots: usize,
    pub seed: u64,
    pub start: NaiveDateTime,
    /// Minutes between snapshots.
    pub interval_minutes: i64,
    /// True modes on the volume-equivalent axis.
    pub modes: Vec<ModeParams>,
    /// Relative standard deviation of the per-bin multiplicative noise.
    pub noise: f64,
    /// Relative standard deviation of the per-snapshot concentration drift.
    pub drift: f64,
    /// Probability that a channel reports nothing.
    pub dropout_prob: f64,
    pub smps: ChannelLayout,
    pub aps: ChannelLayout,
}

impl Default for CampaignSpec {
    fn default() -> Self {
        Self {
            snapshots: 24,
            seed: 42,
            start: chrono::NaiveDate::from_ymd_opt(2021, 4, 28)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap_or_default(),
            interval_minutes: 60,
            modes: vec![ModeParams::new(2000.0, 0.06, 1.6), ModeParams::new(300.0, 0.8, 1.5)],
            noise: 0.05,
            drift: 0.1,
            dropout_prob: 0.01,
            smps: ChannelLayout {
                range: (0.0146, 0.6612),
                resolution: 64.0,
            },
            aps: ChannelLayout {
                range: (0.542, 19.81),
                resolution: 32.0,
            },
        }
    }
}

/// Generated snapshots plus the truth they were drawn from.
#[derive(Debug, Clone)]
pub struct SampleCampaign {
    pub snapshots: Vec<Snapshot>,
    pub truth: Vec<ModeParams>,
}

pub fn generate_campaign(spec: &CampaignSpec, props: &PhysicalProperties) -> Result<SampleCampaign> {
    if spec.snapshots == 0 {
        return Err(PsdError::InvalidConfig("Sample snapshot count must be > 0.".into()));
    }
    if spec.modes.is_empty() {
        return Err(PsdError::InvalidConfig("Sample needs at least one mode.".into()));
    }
    if !(spec.noise.is_finite() && spec.noise >= 0.0 && spec.drift.is_finite() && spec.drift >= 0.0) {
        return Err(PsdError::InvalidConfig("Invalid noise settings for sample generation.".into()));
    }
    if !(0.0..1.0).contains(&spec.dropout_prob) {
        return Err(PsdError::InvalidConfig("Dropout probability must be in [0, 1).".into()));
    }
    for layout in [&spec.smps, &spec.aps] {
        let (lo, hi) = layout.range;
        if !(lo > 0.0 && hi > lo && layout.resolution > 0.0) {
            return Err(PsdError::InvalidConfig(format!(
                "Invalid channel layout: range=({lo}, {hi}), resolution={}",
                layout.resolution
            )));
        }
    }
    props.validate()?;

    let mut rng = StdRng::seed_from_u64(spec.seed);
    let normal =
        Normal::new(0.0, 1.0).map_err(|e| PsdError::InvalidConfig(format!("Noise distribution error: {e}")))?;

    let smps_grid = native_grid(Instrument::Smps, &spec.smps, props)?;
    let aps_grid = native_grid(Instrument::Aps, &spec.aps, props)?;

    let mut snapshots = Vec::with_capacity(spec.snapshots);
    for i in 0..spec.snapshots {
        let timestamp = spec.start + Duration::minutes(spec.interval_minutes * i as i64);

        // Concentration drift shared by both instruments at one timestamp.
        let modes: Vec<ModeParams> = spec
            .modes
            .iter()
            .map(|m| {
                let factor = (spec.drift * normal.sample(&mut rng)).exp();
                ModeParams::new(m.total * factor, m.gmd, m.gsd)
            })
            .collect();

        let smps = sample_instrument(timestamp, Instrument::Smps, &smps_grid, &modes, spec, &normal, &mut rng)?;
        let aps = sample_instrument(timestamp, Instrument::Aps, &aps_grid, &modes, spec, &normal, &mut rng)?;
        snapshots.push(Snapshot { timestamp, smps, aps });
    }

    Ok(SampleCampaign {
        snapshots,
        truth: spec.modes.clone(),
    })
}

/// A native channel and its volume-equivalent image.
#[derive(Debug, Clone, Copy)]
struct NativeChannel {
    native: SizeBin,
    /// Volume-equivalent diameter of the channel centre.
    ve_diameter: f64,
    /// log10 width of the channel on the volume-equivalent axis.
    ve_log_width: f64,
}

fn native_grid(instrument: Instrument, layout: &ChannelLayout, props: &PhysicalProperties) -> Result<Vec<NativeChannel>> {
    let metric = instrument.native_metric();
    layout
        .diameters()?
        .into_iter()
        .map(|d| {
            let (lower, upper) = bin_boundaries(d, layout.resolution);
            let ve_lower = to_volume_equivalent(lower, metric, props)?;
            let ve_upper = to_volume_equivalent(upper, metric, props)?;
            Ok(NativeChannel {
                native: SizeBin::new(d, lower, upper, 0.0),
                ve_diameter: to_volume_equivalent(d, metric, props)?,
                ve_log_width: (ve_upper / ve_lower).log10(),
            })
        })
        .collect()
}

fn sample_instrument(
    timestamp: NaiveDateTime,
    instrument: Instrument,
    grid: &[NativeChannel],
    modes: &[ModeParams],
    spec: &CampaignSpec,
    normal: &Normal<f64>,
    rng: &mut StdRng,
) -> Result<SizeDistribution> {
    let bins = grid
        .iter()
        .map(|c| {
            let roll: f64 = rng.r#gen();
            let dndlogd = if roll < spec.dropout_prob {
                f64::NAN
            } else {
                let truth = predict(modes, c.ve_diameter) * c.ve_log_width / c.native.log_width();
                (truth * (1.0 + spec.noise * normal.sample(rng))).max(0.0)
            };
            SizeBin { dndlogd, ..c.native }
        })
        .collect();
    SizeDistribution::new(timestamp, instrument, instrument.native_metric(), bins)
}
