//! Error types.
//!
//! The library reports failures through [`PsdError`]. Run-level variants
//! (bad physical properties, bad overlap configuration, bad settings) abort a
//! campaign before any snapshot is processed; the remaining variants are
//! per-snapshot and end up in that snapshot's status instead.
//!
//! The binary converts everything into [`AppError`] (exit code + message).

use thiserror::Error;

use crate::domain::FitResult;

/// Library result alias.
pub type Result<T> = std::result::Result<T, PsdError>;

#[derive(Error, Debug, Clone)]
pub enum PsdError {
    /// Particle density / shape factor / gas state out of range.
    #[error("Invalid physical properties: {0}")]
    InvalidPhysicalProperties(String),

    /// Overlap bounds or crossover threshold inconsistent with the instruments.
    #[error("Merge range error: {0}")]
    MergeRangeError(String),

    /// Any other pipeline setting that cannot be honoured.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A distribution with no bins (or no usable bins) reached the merger.
    #[error("Empty size distribution from {0}")]
    EmptyDistribution(String),

    /// Bins violate ordering or edge invariants.
    #[error("Invalid size distribution: {0}")]
    InvalidDistribution(String),

    /// Diameter conversion could not be solved for a bin.
    #[error("Diameter conversion failed: {0}")]
    ConversionFailed(String),

    /// Too few valued bins for the requested number of modes.
    #[error("Insufficient data: {points} valued bins, {required} required")]
    InsufficientData { points: usize, required: usize },

    /// Every fit attempt ended without convergence. `last` is the final attempt.
    #[error("Fit did not converge after {} iterations (SSE={:.6e})", .last.iterations, .last.sse)]
    FitNonConvergence { last: Box<FitResult> },
}

impl PsdError {
    /// Whether this error aborts the whole campaign.
    pub fn is_run_level(&self) -> bool {
        matches!(
            self,
            PsdError::InvalidPhysicalProperties(_)
                | PsdError::MergeRangeError(_)
                | PsdError::InvalidConfig(_)
        )
    }

    /// Process exit code used by the binary.
    pub fn exit_code(&self) -> u8 {
        match self {
            PsdError::InvalidConfig(_) => 2,
            PsdError::InvalidPhysicalProperties(_) => 3,
            PsdError::MergeRangeError(_) => 4,
            _ => 5,
        }
    }
}

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl From<PsdError> for AppError {
    fn from(err: PsdError) -> Self {
        AppError::new(err.exit_code(), err.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}
