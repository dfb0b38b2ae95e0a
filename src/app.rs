//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - initializes logging
//! - parses CLI arguments
//! - builds the pipeline configuration (file + flags)
//! - runs the pipeline on a synthetic campaign
//! - prints reports

use clap::Parser;

use crate::cli::{Command, DemoArgs, PhysicsArgs, PipelineArgs};
use crate::data::{CampaignSpec, generate_campaign};
use crate::domain::{PhysicalProperties, PipelineConfig};
use crate::error::AppError;

pub mod pipeline;

/// Entry point for the `psd` binary.
pub fn run() -> Result<(), AppError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = crate::cli::Cli::parse();
    match cli.command {
        Command::Demo(args) => handle_demo(args),
        Command::Config(args) => handle_config(args),
    }
}

fn handle_demo(args: DemoArgs) -> Result<(), AppError> {
    let config = pipeline_config_from_args(&args.pipeline)?;
    let props = physical_properties_from_args(&args.physics);

    let spec = CampaignSpec {
        snapshots: args.snapshots,
        seed: args.seed,
        noise: args.noise,
        dropout_prob: args.dropout,
        ..CampaignSpec::default()
    };
    let sample = generate_campaign(&spec, &props)?;
    let campaign = pipeline::process_campaign(&sample.snapshots, &props, &config)?;

    println!(
        "{}",
        crate::report::format_campaign_summary(&campaign, &config, &props, Some(sample.truth.as_slice()))
    );
    if args.table {
        println!("{}", crate::report::format_snapshot_table(&campaign));
    }
    Ok(())
}

fn handle_config(args: PipelineArgs) -> Result<(), AppError> {
    let config = pipeline_config_from_args(&args)?;
    config.validate()?;
    let json = serde_json::to_string_pretty(&config)
        .map_err(|e| AppError::new(5, format!("Failed to serialize configuration: {e}")))?;
    println!("{json}");
    Ok(())
}

/// Build the pipeline configuration: `--config` file (or defaults), then flags.
pub fn pipeline_config_from_args(args: &PipelineArgs) -> Result<PipelineConfig, AppError> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| AppError::new(2, format!("Failed to read config {}: {e}", path.display())))?;
            serde_json::from_str::<PipelineConfig>(&text)
                .map_err(|e| AppError::new(2, format!("Invalid config {}: {e}", path.display())))?
        }
        None => PipelineConfig::default(),
    };

    if let Some(rule) = args.merge_rule {
        config.merge_rule = rule;
    }
    if let Some(bounds) = args.overlap {
        config.overlap_bounds = Some(bounds);
    }
    if let Some(d) = args.crossover {
        config.crossover_diameter = Some(d);
    }
    if args.interpolate_gaps {
        config.interpolate_gaps = true;
    }
    if let Some(w) = args.gap_edge_window {
        config.gap_edge_window = w;
    }
    if let Some(r) = args.gap_resolution {
        config.gap_resolution = Some(r);
    }
    if !args.smoothing_ranges.is_empty() {
        config.smoothing_ranges = args.smoothing_ranges.clone();
    }
    if let Some(w) = args.smoothing_window {
        config.smoothing_window = w;
    }
    if let Some(modes) = args.modes {
        config.mode_count = modes;
    }
    if let Some(n) = args.max_iterations {
        config.fit.max_iterations = n;
    }
    if args.sequential {
        config.parallel = false;
    }
    Ok(config)
}

pub fn physical_properties_from_args(args: &PhysicsArgs) -> PhysicalProperties {
    PhysicalProperties {
        density: args.density,
        shape_factor: args.shape_factor,
        temperature_k: args.temperature,
        pressure_hpa: args.pressure,
    }
}
