//! Mathematical utilities: log-normal kernel, bin geometry, least squares.

pub mod grid;
pub mod lognormal;
pub mod ols;

pub use grid::*;
pub use lognormal::*;
pub use ols::*;
