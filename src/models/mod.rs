//! Multi-mode log-normal model.
//!
//! The model is implemented as small, pure functions so that the fitter can
//! stay generic over the number of modes.

pub mod model;

pub use model::*;
