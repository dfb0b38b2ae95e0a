//! Bounded Levenberg–Marquardt for a sum of log-normal modes.
//!
//! Given:
//! - log-diameters `x_i = log10 d_i`
//! - observed densities `y_i`
//! - a starting point in packed parameters `[N, log10 µ, log10 σ_g]*`
//!
//! each iteration solves the damped linear least-squares step
//! `[J; sqrt(λ) D] δ = [r; 0]` with the SVD solver, projects the trial point
//! onto the box bounds and accepts it only if the SSE decreases. `D` is the
//! running maximum of the Jacobian column norms (Marquardt scaling), which keeps
//! `N` (hundreds to thousands) and the log parameters (order one) comparable.

use nalgebra::{DMatrix, DVector};

use crate::domain::{FitSettings, MergedDistribution};
use crate::math::solve_damped;
use crate::models::{PARAMS_PER_MODE, fill_jacobian_row, predict_packed};

const LAMBDA_INIT: f64 = 1e-3;
const LAMBDA_MIN: f64 = 1e-12;
/// Damping ceiling; reaching it ends the fit.
const LAMBDA_MAX: f64 = 1e16;
/// Cosine between residual and any free Jacobian column regarded as zero.
const GTOL: f64 = 1e-6;
/// SSE relative to the data's sum of squares treated as an exact fit.
const EXACT_FIT_RTOL: f64 = 1e-20;

/// Points a fit runs on: valued bins with a positive diameter.
#[derive(Debug, Clone, PartialEq)]
pub struct FitData {
    /// log10 diameters, increasing.
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

impl FitData {
    /// Keep pairs with `d > 0` and a finite, non-negative value.
    pub fn new(diameters: &[f64], values: &[f64]) -> Self {
        let (x, y) = diameters
            .iter()
            .zip(values)
            .filter(|&(&d, &v)| d > 0.0 && d.is_finite() && v.is_finite() && v >= 0.0)
            .map(|(&d, &v)| (d.log10(), v))
            .unzip();
        Self { x, y }
    }

    pub fn from_merged(merged: &MergedDistribution) -> Self {
        let (d, v) = merged.valued_points();
        Self::new(&d, &v)
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Covered log10-diameter range.
    pub fn x_range(&self) -> Option<(f64, f64)> {
        Some((*self.x.first()?, *self.x.last()?))
    }

    /// Sum of squared observations.
    pub fn energy(&self) -> f64 {
        self.y.iter().map(|v| v * v).sum()
    }

    /// Sum of squared residuals for packed parameters.
    pub fn sse(&self, params: &[f64]) -> f64 {
        self.x
            .iter()
            .zip(&self.y)
            .map(|(&x, &y)| {
                let r = y - predict_packed(params, x);
                r * r
            })
            .sum()
    }
}

/// Box bounds on packed parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    /// log10 µ range.
    pub m: (f64, f64),
    /// log10 σ_g range.
    pub s: (f64, f64),
}

impl Bounds {
    /// µ within the covered diameter range, σ_g within the configured limits.
    pub fn new(data: &FitData, settings: &FitSettings) -> Self {
        let m = data.x_range().unwrap_or((-3.0, 2.0));
        Self {
            m,
            s: (settings.gsd_min.log10(), settings.gsd_max.log10()),
        }
    }

    /// Clamp packed parameters into the box. Non-finite entries go to the
    /// lower bound.
    pub fn project(&self, params: &mut [f64]) {
        for p in params.chunks_exact_mut(PARAMS_PER_MODE) {
            p[0] = clamp_finite(p[0], 0.0, f64::INFINITY);
            p[1] = clamp_finite(p[1], self.m.0, self.m.1);
            p[2] = clamp_finite(p[2], self.s.0, self.s.1);
        }
    }

    fn at_bound(&self, k: usize, value: f64, gradient: f64) -> bool {
        let (lo, hi) = match k % PARAMS_PER_MODE {
            0 => (0.0, f64::INFINITY),
            1 => self.m,
            _ => self.s,
        };
        (value <= lo && gradient < 0.0) || (value >= hi && gradient > 0.0)
    }
}

fn clamp_finite(v: f64, lo: f64, hi: f64) -> f64 {
    if v.is_nan() { lo } else { v.clamp(lo, hi) }
}

/// Why the optimizer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Relative SSE decrease fell below `ftol`.
    SseTolerance,
    /// Relative step fell below `xtol`.
    StepTolerance,
    /// Damping hit its ceiling at a stationary point.
    Stationary,
    /// Damping hit its ceiling with a non-negligible gradient.
    DampingCeiling,
    MaxIterations,
    /// Residuals or parameters became non-finite.
    NumericalFailure,
}

impl Termination {
    pub fn converged(self) -> bool {
        matches!(
            self,
            Termination::SseTolerance | Termination::StepTolerance | Termination::Stationary
        )
    }
}

/// Final state of one optimizer run.
#[derive(Debug, Clone, PartialEq)]
pub struct LmOutcome {
    pub params: Vec<f64>,
    pub sse: f64,
    pub iterations: usize,
    pub termination: Termination,
}

impl LmOutcome {
    pub fn converged(&self) -> bool {
        self.termination.converged()
    }
}

/// Minimize the SSE from `start` within `bounds`.
pub fn levenberg_marquardt(
    data: &FitData,
    start: &[f64],
    bounds: &Bounds,
    settings: &FitSettings,
) -> LmOutcome {
    let n = data.len();
    let p = start.len();

    let mut params = start.to_vec();
    bounds.project(&mut params);
    let mut sse = data.sse(&params);

    let finish = |params: Vec<f64>, sse: f64, iterations: usize, termination: Termination| LmOutcome {
        params,
        sse,
        iterations,
        termination,
    };

    if !sse.is_finite() {
        return finish(params, sse, 0, Termination::NumericalFailure);
    }
    if sse == 0.0 {
        return finish(params, sse, 0, Termination::SseTolerance);
    }

    let mut lambda = LAMBDA_INIT;
    let mut scale = vec![0.0f64; p];
    let mut jac = DMatrix::<f64>::zeros(n, p);
    let mut row = vec![0.0f64; p];
    let mut residuals = DVector::<f64>::zeros(n);

    for iteration in 1..=settings.max_iterations {
        for (i, (&x, &y)) in data.x.iter().zip(&data.y).enumerate() {
            fill_jacobian_row(&params, x, &mut row);
            for (k, &v) in row.iter().enumerate() {
                jac[(i, k)] = v;
            }
            residuals[i] = y - predict_packed(&params, x);
        }
        for (k, s) in scale.iter_mut().enumerate() {
            *s = s.max(jac.column(k).norm()).max(f64::EPSILON);
        }

        loop {
            let step = solve_damped(&jac, &residuals, lambda, &scale);
            let trial = step.map(|delta| {
                let mut t: Vec<f64> = params.iter().zip(delta.iter()).map(|(a, d)| a + d).collect();
                bounds.project(&mut t);
                t
            });

            if let Some(trial) = trial {
                let trial_sse = data.sse(&trial);
                if trial_sse.is_finite() && trial_sse < sse {
                    let decrease = (sse - trial_sse) / sse;
                    let step_norm = distance(&trial, &params);
                    let param_norm = params.iter().map(|v| v * v).sum::<f64>().sqrt();

                    params = trial;
                    sse = trial_sse;
                    lambda = (lambda / 10.0).max(LAMBDA_MIN);

                    if sse == 0.0 || decrease < settings.ftol {
                        return finish(params, sse, iteration, Termination::SseTolerance);
                    }
                    if step_norm <= settings.xtol * (param_norm + settings.xtol) {
                        return finish(params, sse, iteration, Termination::StepTolerance);
                    }
                    break;
                }
            }

            lambda *= 10.0;
            if lambda > LAMBDA_MAX {
                let energy = data.energy();
                let exact = sse <= EXACT_FIT_RTOL * energy;
                // A model that explains none of the data (e.g. every N = 0) is a
                // plateau, not a fit.
                let explains = sse < energy;
                let termination = if exact || (explains && stationary(&jac, &residuals, &params, &scale, bounds)) {
                    Termination::Stationary
                } else {
                    Termination::DampingCeiling
                };
                return finish(params, sse, iteration, termination);
            }
        }
    }

    finish(params, sse, settings.max_iterations, Termination::MaxIterations)
}

fn distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum::<f64>().sqrt()
}

/// Projected gradient test: every free direction is orthogonal to the residual.
fn stationary(
    jac: &DMatrix<f64>,
    residuals: &DVector<f64>,
    params: &[f64],
    scale: &[f64],
    bounds: &Bounds,
) -> bool {
    let rnorm = residuals.norm();
    if rnorm == 0.0 {
        return true;
    }
    let gradient = jac.transpose() * residuals;
    gradient.iter().enumerate().all(|(k, &g)| {
        bounds.at_bound(k, params[k], g) || (g.abs() / (scale[k] * rnorm)) <= GTOL
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ModeParams;
    use crate::math::log_space;
    use crate::models::{pack, predict, unpack};

    fn synthetic(modes: &[ModeParams]) -> FitData {
        let d = log_space(0.01, 10.0, 90).unwrap();
        let y: Vec<f64> = d.iter().map(|&d| predict(modes, d)).collect();
        FitData::new(&d, &y)
    }

    #[test]
    fn recovers_single_mode_from_offset_start() {
        let truth = [ModeParams::new(1000.0, 0.1, 1.6)];
        let data = synthetic(&truth);
        let settings = FitSettings::default();
        let bounds = Bounds::new(&data, &settings);

        let start = pack(&[ModeParams::new(600.0, 0.2, 2.0)]);
        let out = levenberg_marquardt(&data, &start, &bounds, &settings);

        assert!(out.converged(), "{:?}", out.termination);
        let m = unpack(&out.params)[0];
        assert!((m.total - 1000.0).abs() / 1000.0 < 1e-4);
        assert!((m.gmd - 0.1).abs() / 0.1 < 1e-4);
        assert!((m.gsd - 1.6).abs() / 1.6 < 1e-4);
    }

    #[test]
    fn recovers_two_modes() {
        let truth = [ModeParams::new(2000.0, 0.05, 1.5), ModeParams::new(50.0, 1.5, 1.8)];
        let data = synthetic(&truth);
        let settings = FitSettings::default();
        let bounds = Bounds::new(&data, &settings);

        let start = pack(&[ModeParams::new(1500.0, 0.07, 1.7), ModeParams::new(30.0, 1.0, 2.0)]);
        let out = levenberg_marquardt(&data, &start, &bounds, &settings);

        assert!(out.converged(), "{:?}", out.termination);
        let modes = unpack(&out.params);
        assert!((modes[0].gmd - 0.05).abs() / 0.05 < 1e-3);
        assert!((modes[1].gmd - 1.5).abs() / 1.5 < 1e-3);
    }

    #[test]
    fn iterates_stay_within_bounds() {
        let truth = [ModeParams::new(1000.0, 0.1, 1.02)];
        let data = synthetic(&truth);
        let settings = FitSettings::default();
        let bounds = Bounds::new(&data, &settings);

        let out = levenberg_marquardt(&data, &pack(&[ModeParams::new(10.0, 0.3, 3.0)]), &bounds, &settings);
        let m = unpack(&out.params)[0];
        assert!(m.total >= 0.0);
        assert!(m.gsd >= settings.gsd_min - 1e-12 && m.gsd <= settings.gsd_max + 1e-12);
        assert!(m.gmd >= 0.01 - 1e-12 && m.gmd <= 10.0 + 1e-9);
    }

    #[test]
    fn iteration_cap_reports_non_convergence() {
        let truth = [ModeParams::new(1000.0, 0.1, 1.6)];
        let data = synthetic(&truth);
        let settings = FitSettings {
            max_iterations: 1,
            ..FitSettings::default()
        };
        let bounds = Bounds::new(&data, &settings);
        let out = levenberg_marquardt(&data, &pack(&[ModeParams::new(10.0, 3.0, 4.0)]), &bounds, &settings);
        assert_eq!(out.termination, Termination::MaxIterations);
        assert!(!out.converged());
        assert!(out.sse.is_finite());
    }

    #[test]
    fn zero_amplitude_plateau_is_not_convergence() {
        let truth = [ModeParams::new(1000.0, 0.05, 1.5)];
        let data = synthetic(&truth);
        let settings = FitSettings::default();
        let bounds = Bounds::new(&data, &settings);

        // N = 0 with the mode parked at the top of the axis: no usable gradient.
        let start = pack(&[ModeParams::new(0.0, 10.0, settings.gsd_min)]);
        let out = levenberg_marquardt(&data, &start, &bounds, &settings);
        assert_eq!(out.termination, Termination::DampingCeiling);
        assert!(!out.converged());
        assert_eq!(out.sse, data.energy());
    }

    #[test]
    fn fit_data_drops_unusable_points() {
        let data = FitData::new(&[0.1, 0.2, 0.3, -1.0], &[1.0, f64::NAN, 2.0, 3.0]);
        assert_eq!(data.len(), 2);
    }
}
