//! Data sources for the pipeline.
//!
//! Ingestion of instrument files lives outside this crate; the only built-in
//! source is the seeded synthetic campaign used by `psd demo` and the tests.

pub mod sample;

pub use sample::*;
