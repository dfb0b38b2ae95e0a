//! Least squares solver.
//!
//! The mode fitter solves one small damped linear least-squares problem per
//! Levenberg–Marquardt iteration:
//!
//! ```text
//! minimize ‖J δ − r‖² + λ ‖D δ‖²
//! ```
//!
//! which is an ordinary least-squares problem on the stacked system
//! `[J; sqrt(λ) D] δ = [r; 0]`.
//!
//! Implementation choices:
//! - SVD rather than QR: nalgebra's `QR::solve` targets square systems and the
//!   stacked system is tall.
//! - The parameter dimension is tiny (3 or 6 columns), so SVD cost is negligible.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-12, 1e-10, 1e-8] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Solve the damped step `[J; sqrt(λ) D] δ = [r; 0]`.
///
/// `scale` holds the diagonal of `D` (one entry per column of `j`).
pub fn solve_damped(
    j: &DMatrix<f64>,
    r: &DVector<f64>,
    lambda: f64,
    scale: &[f64],
) -> Option<DVector<f64>> {
    let (n, p) = j.shape();
    debug_assert_eq!(scale.len(), p);

    let mut a = DMatrix::<f64>::zeros(n + p, p);
    a.view_mut((0, 0), (n, p)).copy_from(j);
    let sl = lambda.max(0.0).sqrt();
    for (k, &s) in scale.iter().enumerate() {
        a[(n + k, k)] = sl * s;
    }

    let mut b = DVector::<f64>::zeros(n + p);
    b.rows_mut(0, n).copy_from(r);

    solve_least_squares(&a, &b)
}
