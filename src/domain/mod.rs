//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - instrument inputs (`SizeBin`, `SizeDistribution`, `Instrument`, `DiameterMetric`)
//! - run inputs (`PhysicalProperties`, `PipelineConfig`, `Snapshot`)
//! - pipeline outputs (`MergedDistribution`, `FitResult`, `CampaignResult`, etc.)

pub mod types;

pub use types::*;
