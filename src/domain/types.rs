//! Shared domain types.
//!
//! These types are kept lightweight and serializable so they can be:
//!
//! - consumed read-only from the ingestion side (`SizeDistribution`)
//! - produced by the pipeline and handed to export/plotting (`MergedDistribution`,
//!   `FitResult`, `CampaignResult`)
//!
//! Units: diameters in µm, concentration densities as dN/dlog10(D) in cm⁻³.

use chrono::NaiveDateTime;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{PsdError, Result};
use crate::math::{bin_boundaries, channel_resolution, lerp_log};

/// Which instrument produced a distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Instrument {
    /// Scanning mobility particle sizer (sub-micrometre range).
    Smps,
    /// Aerodynamic particle sizer (micrometre range).
    Aps,
}

impl Instrument {
    pub fn display_name(self) -> &'static str {
        match self {
            Instrument::Smps => "SMPS",
            Instrument::Aps => "APS",
        }
    }

    /// The diameter metric the instrument reports natively.
    pub fn native_metric(self) -> DiameterMetric {
        match self {
            Instrument::Smps => DiameterMetric::Mobility,
            Instrument::Aps => DiameterMetric::Aerodynamic,
        }
    }
}

/// The physical principle a diameter was inferred from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiameterMetric {
    /// Electrical mobility diameter.
    Mobility,
    /// Aerodynamic diameter (continuum/transition regime, slip corrected).
    Aerodynamic,
    /// Vacuum aerodynamic diameter (free-molecular regime).
    VacuumAerodynamic,
    /// Volume-equivalent diameter; the common reference axis.
    VolumeEquivalent,
}

/// One size channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SizeBin {
    /// Mean diameter (µm).
    pub diameter: f64,
    /// Lower bin edge (µm).
    pub lower: f64,
    /// Upper bin edge (µm).
    pub upper: f64,
    /// dN/dlog10(D) in cm⁻³. Non-finite marks a dropout.
    pub dndlogd: f64,
}

impl SizeBin {
    pub fn new(diameter: f64, lower: f64, upper: f64, dndlogd: f64) -> Self {
        Self {
            diameter,
            lower,
            upper,
            dndlogd,
        }
    }

    /// Whether the bin carries a usable concentration.
    pub fn is_valued(&self) -> bool {
        self.dndlogd.is_finite() && self.dndlogd >= 0.0
    }

    /// Bin width in decades.
    pub fn log_width(&self) -> f64 {
        (self.upper / self.lower).log10()
    }

    /// Number concentration in the bin (dN), if valued.
    pub fn number(&self) -> Option<f64> {
        self.is_valued().then(|| self.dndlogd * self.log_width())
    }
}

/// An instrument's size distribution at one timestamp.
///
/// Immutable once built; the constructor enforces the bin invariants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizeDistribution {
    timestamp: NaiveDateTime,
    instrument: Instrument,
    metric: DiameterMetric,
    bins: Vec<SizeBin>,
}

impl SizeDistribution {
    /// Build a distribution, checking ordering and edge invariants.
    pub fn new(
        timestamp: NaiveDateTime,
        instrument: Instrument,
        metric: DiameterMetric,
        bins: Vec<SizeBin>,
    ) -> Result<Self> {
        validate_bins(instrument, &bins)?;
        Ok(Self {
            timestamp,
            instrument,
            metric,
            bins,
        })
    }

    /// Build a distribution from raw per-channel counts.
    ///
    /// `counts / efficiency` gives dN per channel; bin edges follow from the
    /// mean diameter and the channel resolution (bins per decade), and
    /// `dN/dlogD = dN * channel_resolution`. Channels with a non-positive
    /// efficiency are reported as dropouts.
    pub fn from_channel_counts(
        timestamp: NaiveDateTime,
        instrument: Instrument,
        diameters: &[f64],
        counts: &[f64],
        efficiencies: &[f64],
        channel_res: f64,
    ) -> Result<Self> {
        if diameters.len() != counts.len() || diameters.len() != efficiencies.len() {
            return Err(PsdError::InvalidDistribution(format!(
                "{}: channel arrays differ in length ({} diameters, {} counts, {} efficiencies)",
                instrument.display_name(),
                diameters.len(),
                counts.len(),
                efficiencies.len()
            )));
        }
        if !(channel_res.is_finite() && channel_res > 0.0) {
            return Err(PsdError::InvalidDistribution(format!(
                "{}: channel resolution must be > 0, got {channel_res}",
                instrument.display_name()
            )));
        }

        let bins = diameters
            .iter()
            .zip(counts)
            .zip(efficiencies)
            .map(|((&d, &count), &eff)| {
                let (lower, upper) = bin_boundaries(d, channel_res);
                let dndlogd = if eff > 0.0 {
                    count / eff * channel_res
                } else {
                    f64::NAN
                };
                SizeBin::new(d, lower, upper, dndlogd)
            })
            .collect();

        Self::new(timestamp, instrument, instrument.native_metric(), bins)
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    pub fn instrument(&self) -> Instrument {
        self.instrument
    }

    pub fn metric(&self) -> DiameterMetric {
        self.metric
    }

    pub fn bins(&self) -> &[SizeBin] {
        &self.bins
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Lowest lower edge and highest upper edge.
    pub fn edge_range(&self) -> Option<(f64, f64)> {
        Some((self.bins.first()?.lower, self.bins.last()?.upper))
    }

    /// Average channel resolution in bins per decade.
    pub fn channel_resolution(&self) -> Option<f64> {
        let diameters: Vec<f64> = self.bins.iter().map(|b| b.diameter).collect();
        channel_resolution(&diameters)
    }

    /// Concentration at `d`.
    ///
    /// A channel diameter gives that channel's own value; anything else is
    /// interpolated log-linearly between the two channels bracketing it. `None`
    /// outside the channel range, or when a contributing channel is a dropout.
    pub fn value_at(&self, d: f64) -> Option<f64> {
        let own = |b: &SizeBin| b.is_valued().then_some(b.dndlogd);
        let hi = self.bins.partition_point(|b| b.diameter < d);
        let upper = self.bins.get(hi)?;
        if upper.diameter == d {
            return own(upper);
        }
        let lower = self.bins.get(hi.checked_sub(1)?)?;
        Some(lerp_log((lower.diameter, own(lower)?), (upper.diameter, own(upper)?), d))
    }

    /// Total number concentration (cm⁻³) over valued bins.
    pub fn total_number(&self) -> f64 {
        self.bins.iter().filter_map(SizeBin::number).sum()
    }

    /// Copy with a new metric and bin set. Callers keep the invariants.
    pub(crate) fn with_bins(&self, metric: DiameterMetric, bins: Vec<SizeBin>) -> Self {
        Self {
            timestamp: self.timestamp,
            instrument: self.instrument,
            metric,
            bins,
        }
    }
}

fn validate_bins(instrument: Instrument, bins: &[SizeBin]) -> Result<()> {
    let name = instrument.display_name();
    for (i, b) in bins.iter().enumerate() {
        let finite = b.diameter.is_finite() && b.lower.is_finite() && b.upper.is_finite();
        if !finite || b.lower <= 0.0 || b.lower >= b.upper {
            return Err(PsdError::InvalidDistribution(format!(
                "{name} bin {i}: invalid edges [{}, {}]",
                b.lower, b.upper
            )));
        }
        if b.diameter < b.lower || b.diameter > b.upper {
            return Err(PsdError::InvalidDistribution(format!(
                "{name} bin {i}: diameter {} outside its edges [{}, {}]",
                b.diameter, b.lower, b.upper
            )));
        }
        if b.dndlogd.is_finite() && b.dndlogd < 0.0 {
            return Err(PsdError::InvalidDistribution(format!(
                "{name} bin {i}: negative concentration {}",
                b.dndlogd
            )));
        }
    }
    for (i, w) in bins.windows(2).enumerate() {
        if !(w[1].diameter > w[0].diameter && w[1].lower > w[0].lower && w[1].upper > w[0].upper) {
            return Err(PsdError::InvalidDistribution(format!(
                "{name} bins {i}/{}: diameters and edges must be strictly increasing",
                i + 1
            )));
        }
    }
    Ok(())
}

/// Particle and carrier-gas properties for one analysis run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicalProperties {
    /// Particle material density (g/cm³).
    pub density: f64,
    /// Dynamic shape factor χ (1 = sphere).
    pub shape_factor: f64,
    /// Gas temperature (K) for the mean free path.
    pub temperature_k: f64,
    /// Gas pressure (hPa) for the mean free path.
    pub pressure_hpa: f64,
}

impl Default for PhysicalProperties {
    fn default() -> Self {
        Self {
            density: 1.0,
            shape_factor: 1.0,
            temperature_k: 293.15,
            pressure_hpa: 1013.25,
        }
    }
}

impl PhysicalProperties {
    /// Properties at room temperature and standard pressure.
    pub fn new(density: f64, shape_factor: f64) -> Self {
        Self {
            density,
            shape_factor,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.density.is_finite() && self.density > 0.0) {
            return Err(PsdError::InvalidPhysicalProperties(format!(
                "particle density must be > 0, got {}",
                self.density
            )));
        }
        if !(self.shape_factor.is_finite() && self.shape_factor >= 1.0) {
            return Err(PsdError::InvalidPhysicalProperties(format!(
                "dynamic shape factor must be >= 1, got {}",
                self.shape_factor
            )));
        }
        if !(self.temperature_k.is_finite() && self.temperature_k > 0.0) {
            return Err(PsdError::InvalidPhysicalProperties(format!(
                "gas temperature must be > 0 K, got {}",
                self.temperature_k
            )));
        }
        if !(self.pressure_hpa.is_finite() && self.pressure_hpa > 0.0) {
            return Err(PsdError::InvalidPhysicalProperties(format!(
                "gas pressure must be > 0 hPa, got {}",
                self.pressure_hpa
            )));
        }
        Ok(())
    }
}

/// Where a merged bin's value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Origin {
    /// Taken verbatim from a single instrument.
    Instrument(Instrument),
    /// Combined inside the overlap interval.
    Overlap,
    /// Placeholder in a coverage gap; carries no value.
    Gap,
    /// Filled by the gap interpolator.
    Interpolated,
}

/// Per-bin provenance. `smoothed` augments the origin rather than replacing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub origin: Origin,
    pub smoothed: bool,
}

impl Provenance {
    pub fn new(origin: Origin) -> Self {
        Self {
            origin,
            smoothed: false,
        }
    }

    pub fn label(&self) -> String {
        let base = match self.origin {
            Origin::Instrument(i) => i.display_name().to_lowercase(),
            Origin::Overlap => "overlap".to_string(),
            Origin::Gap => "gap".to_string(),
            Origin::Interpolated => "interpolated".to_string(),
        };
        if self.smoothed {
            format!("{base}+smoothed")
        } else {
            base
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MergedBin {
    pub diameter: f64,
    pub lower: f64,
    pub upper: f64,
    /// dN/dlog10(D); `None` for gaps and dropouts.
    pub dndlogd: Option<f64>,
    pub provenance: Provenance,
}

/// Result of combining two instruments on the volume-equivalent axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedDistribution {
    pub timestamp: NaiveDateTime,
    pub bins: Vec<MergedBin>,
    /// Overlap interval actually used, if the instruments overlap.
    pub overlap: Option<(f64, f64)>,
}

impl MergedDistribution {
    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    pub fn diameters(&self) -> Vec<f64> {
        self.bins.iter().map(|b| b.diameter).collect()
    }

    /// Diameters and values of the valued bins.
    pub fn valued_points(&self) -> (Vec<f64>, Vec<f64>) {
        self.bins
            .iter()
            .filter_map(|b| b.dndlogd.map(|v| (b.diameter, v)))
            .unzip()
    }

    pub fn valued_count(&self) -> usize {
        self.bins.iter().filter(|b| b.dndlogd.is_some()).count()
    }

    /// Index ranges of consecutive valueless bins.
    pub fn empty_runs(&self) -> Vec<std::ops::Range<usize>> {
        let mut runs = Vec::new();
        let mut start: Option<usize> = None;
        for (i, b) in self.bins.iter().enumerate() {
            match (b.dndlogd.is_none(), start) {
                (true, None) => start = Some(i),
                (false, Some(s)) => {
                    runs.push(s..i);
                    start = None;
                }
                _ => {}
            }
        }
        if let Some(s) = start {
            runs.push(s..self.bins.len());
        }
        runs
    }

    pub fn count_origin(&self, origin: Origin) -> usize {
        self.bins
            .iter()
            .filter(|b| b.provenance.origin == origin)
            .count()
    }
}

/// Parameters of one log-normal mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModeParams {
    /// Total number concentration N (cm⁻³).
    pub total: f64,
    /// Geometric mean (median) diameter µ (µm).
    pub gmd: f64,
    /// Geometric standard deviation σ_g (> 1).
    pub gsd: f64,
}

impl ModeParams {
    pub fn new(total: f64, gmd: f64, gsd: f64) -> Self {
        Self { total, gmd, gsd }
    }
}

/// How many log-normal modes to fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ModeCount {
    One,
    Two,
    /// Fit one and two modes; keep the better by BIC.
    Auto,
}

impl ModeCount {
    /// Number of modes, or `None` for `Auto`.
    pub fn modes(self) -> Option<usize> {
        match self {
            ModeCount::One => Some(1),
            ModeCount::Two => Some(2),
            ModeCount::Auto => None,
        }
    }
}

/// Which starting point produced a reported fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuessSource {
    Caller,
    Auto,
}

/// Fitted modes plus diagnostics for one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    /// Modes sorted by geometric mean diameter.
    pub modes: Vec<ModeParams>,
    pub sse: f64,
    pub rmse: f64,
    pub bic: f64,
    pub n_points: usize,
    pub iterations: usize,
    pub converged: bool,
    pub guess_source: GuessSource,
    /// True when the caller's guess failed and the auto guess was used.
    pub fallback_used: bool,
}

/// Optimizer limits and parameter bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitSettings {
    pub max_iterations: usize,
    /// Relative SSE decrease that counts as converged.
    pub ftol: f64,
    /// Relative step size that counts as converged.
    pub xtol: f64,
    pub gsd_min: f64,
    pub gsd_max: f64,
}

impl Default for FitSettings {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            ftol: 1e-10,
            xtol: 1e-10,
            gsd_min: 1.05,
            gsd_max: 5.0,
        }
    }
}

/// How overlapping instrument data is combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MergeRule {
    /// Weights shift linearly in log-diameter across the overlap.
    Blend,
    /// Hard switch at a single threshold diameter.
    Crossover,
}

/// Campaign-wide, read-only pipeline options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub merge_rule: MergeRule,
    /// Overlap interval (µm); derived from the data when unset.
    pub overlap_bounds: Option<(f64, f64)>,
    /// Crossover threshold (µm); geometric mean of the overlap when unset.
    pub crossover_diameter: Option<f64>,
    pub interpolate_gaps: bool,
    /// Valued bins averaged on each side of a gap for the bracketing values.
    pub gap_edge_window: usize,
    /// Bins per decade for gap placeholders; mean instrument resolution when unset.
    pub gap_resolution: Option<f64>,
    /// Sub-ranges (µm) to smooth; empty disables smoothing.
    pub smoothing_ranges: Vec<(f64, f64)>,
    /// Smoothing kernel half-width in decades.
    pub smoothing_window: f64,
    pub mode_count: ModeCount,
    pub initial_guess: Option<Vec<ModeParams>>,
    pub fit: FitSettings,
    /// Process snapshots on the rayon pool.
    pub parallel: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            merge_rule: MergeRule::Blend,
            overlap_bounds: None,
            crossover_diameter: None,
            interpolate_gaps: false,
            gap_edge_window: 3,
            gap_resolution: None,
            smoothing_ranges: Vec::new(),
            smoothing_window: 0.1,
            mode_count: ModeCount::Two,
            initial_guess: None,
            fit: FitSettings::default(),
            parallel: true,
        }
    }
}

impl PipelineConfig {
    /// Checks that do not depend on the data. Run before any snapshot.
    pub fn validate(&self) -> Result<()> {
        if let Some((lo, hi)) = self.overlap_bounds {
            if !(lo.is_finite() && hi.is_finite() && lo > 0.0 && hi > lo) {
                return Err(PsdError::MergeRangeError(format!(
                    "overlap bounds must satisfy 0 < lo < hi, got ({lo}, {hi})"
                )));
            }
            if let Some(dx) = self.crossover_diameter {
                if !(dx >= lo && dx <= hi) {
                    return Err(PsdError::MergeRangeError(format!(
                        "crossover diameter {dx} outside overlap bounds ({lo}, {hi})"
                    )));
                }
            }
        }
        if let Some(dx) = self.crossover_diameter {
            if !(dx.is_finite() && dx > 0.0) {
                return Err(PsdError::MergeRangeError(format!(
                    "crossover diameter must be > 0, got {dx}"
                )));
            }
        }
        if self.gap_edge_window == 0 {
            return Err(PsdError::InvalidConfig("gap_edge_window must be >= 1".into()));
        }
        if let Some(res) = self.gap_resolution {
            if !(res.is_finite() && res > 0.0) {
                return Err(PsdError::InvalidConfig(format!(
                    "gap_resolution must be > 0 bins per decade, got {res}"
                )));
            }
        }
        if !(self.smoothing_window.is_finite() && self.smoothing_window > 0.0) {
            return Err(PsdError::InvalidConfig(format!(
                "smoothing_window must be > 0 decades, got {}",
                self.smoothing_window
            )));
        }
        for &(lo, hi) in &self.smoothing_ranges {
            if !(lo.is_finite() && hi.is_finite() && lo > 0.0 && hi > lo) {
                return Err(PsdError::InvalidConfig(format!(
                    "smoothing range must satisfy 0 < lo < hi, got ({lo}, {hi})"
                )));
            }
        }

        let fit = &self.fit;
        if fit.max_iterations == 0 {
            return Err(PsdError::InvalidConfig("fit.max_iterations must be >= 1".into()));
        }
        if !(fit.ftol.is_finite() && fit.ftol > 0.0 && fit.xtol.is_finite() && fit.xtol > 0.0) {
            return Err(PsdError::InvalidConfig("fit tolerances must be > 0".into()));
        }
        if !(fit.gsd_min.is_finite() && fit.gsd_min > 1.0 && fit.gsd_max > fit.gsd_min) {
            return Err(PsdError::InvalidConfig(format!(
                "fit GSD bounds must satisfy 1 < min < max, got ({}, {})",
                fit.gsd_min, fit.gsd_max
            )));
        }

        if let Some(guess) = &self.initial_guess {
            if let Some(n) = self.mode_count.modes() {
                if guess.len() != n {
                    return Err(PsdError::InvalidConfig(format!(
                        "initial_guess has {} modes, mode_count needs {n}",
                        guess.len()
                    )));
                }
            } else if !(1..=2).contains(&guess.len()) {
                return Err(PsdError::InvalidConfig(
                    "initial_guess must have 1 or 2 modes".into(),
                ));
            }
            for m in guess {
                let ok = m.total.is_finite()
                    && m.total >= 0.0
                    && m.gmd.is_finite()
                    && m.gmd > 0.0
                    && m.gsd.is_finite()
                    && m.gsd > 1.0;
                if !ok {
                    return Err(PsdError::InvalidConfig(format!(
                        "initial guess out of range: N={}, GMD={}, GSD={}",
                        m.total, m.gmd, m.gsd
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Both instruments' distributions for one timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: NaiveDateTime,
    pub smps: SizeDistribution,
    pub aps: SizeDistribution,
}

/// Per-snapshot processing outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SnapshotStatus {
    Ok,
    FitNonConvergent,
    MergeError,
    InvalidProperties,
}

impl SnapshotStatus {
    pub const ALL: [SnapshotStatus; 4] = [
        SnapshotStatus::Ok,
        SnapshotStatus::FitNonConvergent,
        SnapshotStatus::MergeError,
        SnapshotStatus::InvalidProperties,
    ];

    pub fn label(self) -> &'static str {
        match self {
            SnapshotStatus::Ok => "ok",
            SnapshotStatus::FitNonConvergent => "fit-non-convergent",
            SnapshotStatus::MergeError => "merge-error",
            SnapshotStatus::InvalidProperties => "invalid-properties",
        }
    }
}

/// Integrated content of a merged distribution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Moments {
    /// Number concentration (cm⁻³).
    pub number: f64,
    /// Surface concentration (µm² cm⁻³).
    pub surface: f64,
    /// Volume concentration (µm³ cm⁻³).
    pub volume: f64,
    /// Mass concentration (µg m⁻³).
    pub mass: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotResult {
    pub timestamp: NaiveDateTime,
    pub status: SnapshotStatus,
    pub merged: Option<MergedDistribution>,
    pub fit: Option<FitResult>,
    pub moments: Option<Moments>,
    pub message: Option<String>,
}

/// One result per input snapshot, in input order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignResult {
    pub snapshots: Vec<SnapshotResult>,
}

impl CampaignResult {
    pub fn count(&self, status: SnapshotStatus) -> usize {
        self.snapshots.iter().filter(|s| s.status == status).count()
    }
}
