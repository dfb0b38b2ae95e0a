//! Fit orchestration: attempt fallback and mode-count selection.
//!
//! For a fixed mode count the attempts run in order:
//! 1. the caller's guess (if any), clamped into bounds
//! 2. the auto guess derived from the data
//!
//! The first converged attempt wins. With `ModeCount::Auto` one and two modes
//! are fitted and compared by
//! - BIC = n * ln(SSE/n) + k * ln(n)
//!
//! choosing the minimum BIC unless a simpler fit is within ΔBIC < 2.

use rayon::prelude::*;

use crate::domain::{FitResult, FitSettings, GuessSource, MergedDistribution, ModeParams, PipelineConfig};
use crate::error::{PsdError, Result};
use crate::fit::fitter::{Bounds, FitData, LmOutcome, levenberg_marquardt};
use crate::fit::guess::{auto_guess, caller_guess};
use crate::models::{PARAMS_PER_MODE, unpack};

/// Mode counts tried by `ModeCount::Auto`.
const AUTO_MODE_COUNTS: [usize; 2] = [1, 2];
/// BIC difference below which the simpler model is preferred.
const BIC_SIMPLICITY_MARGIN: f64 = 2.0;

/// Fit a merged distribution according to the pipeline configuration.
pub fn fit_distribution(merged: &MergedDistribution, config: &PipelineConfig) -> Result<FitResult> {
    let data = FitData::from_merged(merged);
    let guess = config.initial_guess.as_deref();

    match config.mode_count.modes() {
        Some(k) => fit_with_fallback(&data, k, guess, &config.fit),
        None => fit_auto(&data, guess, &config.fit),
    }
}

/// Minimum number of valued points for `modes` modes.
pub fn required_points(modes: usize) -> usize {
    PARAMS_PER_MODE * modes + 1
}

/// Fit `modes` modes, falling back from the caller's guess to the auto guess.
pub fn fit_with_fallback(
    data: &FitData,
    modes: usize,
    guess: Option<&[ModeParams]>,
    settings: &FitSettings,
) -> Result<FitResult> {
    let required = required_points(modes);
    if data.len() < required {
        return Err(PsdError::InsufficientData {
            points: data.len(),
            required,
        });
    }

    let bounds = Bounds::new(data, settings);
    let caller = guess.filter(|g| g.len() == modes);

    let mut attempts: Vec<(GuessSource, Vec<f64>)> = Vec::with_capacity(2);
    if let Some(g) = caller {
        attempts.push((GuessSource::Caller, caller_guess(g, &bounds)));
    }
    attempts.push((GuessSource::Auto, auto_guess(data, modes, &bounds)));

    let mut last: Option<FitResult> = None;
    for (source, start) in attempts {
        let outcome = levenberg_marquardt(data, &start, &bounds, settings);
        let result = to_fit_result(&outcome, data.len(), source, caller.is_some() && source == GuessSource::Auto);
        if result.converged {
            return Ok(result);
        }
        log::warn!(
            "{modes}-mode fit from {source:?} guess did not converge ({:?} after {} iterations)",
            outcome.termination,
            outcome.iterations
        );
        last = Some(result);
    }

    match last {
        Some(last) => Err(PsdError::FitNonConvergence { last: Box::new(last) }),
        None => Err(PsdError::InsufficientData {
            points: data.len(),
            required,
        }),
    }
}

/// Fit one and two modes and keep the better by BIC.
pub fn fit_auto(data: &FitData, guess: Option<&[ModeParams]>, settings: &FitSettings) -> Result<FitResult> {
    let outcomes: Vec<Result<FitResult>> = AUTO_MODE_COUNTS
        .par_iter()
        .map(|&k| fit_with_fallback(data, k, guess, settings))
        .collect();

    let fits: Vec<FitResult> = outcomes.iter().filter_map(|r| r.as_ref().ok().cloned()).collect();
    if !fits.is_empty() {
        return Ok(select_by_bic(&fits));
    }

    // Prefer reporting a non-converged fit over a data shortage.
    let mut errors = outcomes.into_iter().filter_map(|r| r.err());
    let first = errors.next();
    let non_converged = errors.find(|e| matches!(e, PsdError::FitNonConvergence { .. }));
    match (first, non_converged) {
        (Some(e @ PsdError::FitNonConvergence { .. }), _) => Err(e),
        (_, Some(e)) => Err(e),
        (Some(e), None) => Err(e),
        (None, None) => Err(PsdError::InsufficientData {
            points: data.len(),
            required: required_points(1),
        }),
    }
}

fn to_fit_result(outcome: &LmOutcome, n: usize, source: GuessSource, fallback_used: bool) -> FitResult {
    let k = outcome.params.len();
    FitResult {
        modes: unpack(&outcome.params),
        sse: outcome.sse,
        rmse: (outcome.sse / n as f64).sqrt(),
        bic: bic(n, outcome.sse, k),
        n_points: n,
        iterations: outcome.iterations,
        converged: outcome.converged() && outcome.sse.is_finite(),
        guess_source: source,
        fallback_used,
    }
}

fn bic(n: usize, sse: f64, k: usize) -> f64 {
    let n_f = n as f64;
    let sse_per = (sse / n_f).max(1e-12);
    n_f * sse_per.ln() + (k as f64) * n_f.ln()
}

/// Minimum-BIC fit, or the simplest fit within the margin of it.
pub fn select_by_bic(fits: &[FitResult]) -> FitResult {
    let mut best = &fits[0];
    for f in &fits[1..] {
        if f.bic < best.bic {
            best = f;
        }
    }
    let best_bic = best.bic;

    // Increasing complexity; first fit close enough to the best wins.
    let mut by_complexity: Vec<&FitResult> = fits.iter().collect();
    by_complexity.sort_by_key(|f| f.modes.len());
    for f in by_complexity {
        if f.bic < best_bic + BIC_SIMPLICITY_MARGIN {
            return f.clone();
        }
    }

    best.clone()
}
