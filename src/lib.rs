//! `psd-merge` library crate.
//!
//! Reconciles SMPS and APS particle size distributions onto a common
//! volume-equivalent diameter axis and fits log-normal modes to the result.
//!
//! The binary (`psd`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - the pipeline can be driven from other front ends (notebooks, daemons)

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod math;
pub mod merge;
pub mod models;
pub mod normalize;
pub mod report;
