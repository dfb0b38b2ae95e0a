//! Log-normal mode fitting.
//!
//! Responsibilities:
//!
//! - bounded Levenberg–Marquardt on a sum of modes (`fitter`)
//! - data-driven starting points (`guess`)
//! - caller → auto fallback and BIC mode-count selection (`selection`)

pub mod fitter;
pub mod guess;
pub mod selection;

pub use fitter::*;
pub use guess::*;
pub use selection::*;
