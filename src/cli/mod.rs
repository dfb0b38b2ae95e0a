//! Command-line parsing for the SMPS/APS merge-and-fit tool.
//!
//! The goal of this module is to keep **argument parsing** separate from the
//! physics and fitting code; `app` maps these arguments onto the library
//! configuration types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::{MergeRule, ModeCount};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "psd", version, about = "SMPS/APS size-distribution merge and log-normal fitting")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the pipeline on a synthetic campaign and print a summary.
    Demo(DemoArgs),
    /// Print the effective pipeline configuration as JSON.
    Config(PipelineArgs),
}

/// Options for the synthetic demo campaign.
#[derive(Debug, Args, Clone)]
pub struct DemoArgs {
    /// Number of snapshots to generate.
    #[arg(short = 'n', long, default_value_t = 24)]
    pub snapshots: usize,

    /// Random seed for sample generation.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Per-bin relative noise of the synthetic instruments.
    #[arg(long, default_value_t = 0.05)]
    pub noise: f64,

    /// Probability that a synthetic channel drops out.
    #[arg(long, default_value_t = 0.01)]
    pub dropout: f64,

    /// Print one row per snapshot.
    #[arg(long)]
    pub table: bool,

    #[command(flatten)]
    pub physics: PhysicsArgs,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

/// Particle and carrier-gas properties.
#[derive(Debug, Args, Clone)]
pub struct PhysicsArgs {
    /// Particle density (g/cm³).
    #[arg(long, default_value_t = 1.6)]
    pub density: f64,

    /// Dynamic shape factor (1 = sphere).
    #[arg(long, default_value_t = 1.0)]
    pub shape_factor: f64,

    /// Gas temperature (K).
    #[arg(long, default_value_t = 293.15)]
    pub temperature: f64,

    /// Gas pressure (hPa).
    #[arg(long, default_value_t = 1013.25)]
    pub pressure: f64,
}

/// Pipeline options. Unset options keep the value from `--config` (or the default).
#[derive(Debug, Args, Clone, Default)]
pub struct PipelineArgs {
    /// JSON file with a full or partial pipeline configuration.
    #[arg(long, value_name = "JSON")]
    pub config: Option<PathBuf>,

    /// How overlapping instrument data is combined.
    #[arg(long, value_enum)]
    pub merge_rule: Option<MergeRule>,

    /// Overlap interval in µm, as `LO:HI`.
    #[arg(long, value_parser = parse_range)]
    pub overlap: Option<(f64, f64)>,

    /// Crossover diameter in µm.
    #[arg(long)]
    pub crossover: Option<f64>,

    /// Fill coverage gaps and dropouts by log-linear interpolation.
    #[arg(long)]
    pub interpolate_gaps: bool,

    /// Valued bins averaged on each side of a gap.
    #[arg(long)]
    pub gap_edge_window: Option<usize>,

    /// Bins per decade for gap placeholders.
    #[arg(long)]
    pub gap_resolution: Option<f64>,

    /// Diameter range to smooth, as `LO:HI` (repeatable).
    #[arg(long = "smooth", value_parser = parse_range)]
    pub smoothing_ranges: Vec<(f64, f64)>,

    /// Smoothing kernel width in decades.
    #[arg(long)]
    pub smoothing_window: Option<f64>,

    /// Number of log-normal modes to fit.
    #[arg(long, value_enum)]
    pub modes: Option<ModeCount>,

    /// Optimizer iteration limit per attempt.
    #[arg(long)]
    pub max_iterations: Option<usize>,

    /// Process snapshots one at a time.
    #[arg(long)]
    pub sequential: bool,
}

/// Parse `LO:HI` into a diameter pair.
pub fn parse_range(s: &str) -> Result<(f64, f64), String> {
    let (lo, hi) = s
        .split_once(':')
        .ok_or_else(|| format!("expected LO:HI, got '{s}'"))?;
    let lo: f64 = lo.trim().parse().map_err(|e| format!("invalid LO '{lo}': {e}"))?;
    let hi: f64 = hi.trim().parse().map_err(|e| format!("invalid HI '{hi}': {e}"))?;
    Ok((lo, hi))
}
