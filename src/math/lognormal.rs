//! Log-normal mode kernel in decadic form.
//!
//! A mode with total number `N`, geometric mean diameter `µ` and geometric
//! standard deviation `σ_g` has density
//!
//! ```text
//! dN/dlog10(D) = N / (log10σ_g · √(2π)) · exp(−(log10(D/µ))² / (2 (log10σ_g)²))
//! ```
//!
//! (Limpert, Stahel & Abbt 2001). Integrating over log10(D) gives `N`.
//!
//! The fitter works on `(N, log10 µ, log10 σ_g)`; the gradient is provided in
//! those coordinates.

const SQRT_2PI: f64 = 2.506_628_274_631_000_7;

/// Density of one mode at diameter `d`.
pub fn lognormal(d: f64, total: f64, gmd: f64, gsd: f64) -> f64 {
    lognormal_log(d.log10(), total, gmd.log10(), gsd.log10())
}

/// Density of one mode with log10 inputs: `x = log10 d`, `m = log10 µ`, `s = log10 σ_g`.
pub fn lognormal_log(x: f64, total: f64, m: f64, s: f64) -> f64 {
    let u = (x - m) / s;
    total / (s * SQRT_2PI) * (-0.5 * u * u).exp()
}

/// Partial derivatives of [`lognormal_log`] w.r.t. `(N, m, s)`.
pub fn lognormal_log_gradient(x: f64, total: f64, m: f64, s: f64) -> [f64; 3] {
    let u = x - m;
    let shape = (-0.5 * u * u / (s * s)).exp() / (s * SQRT_2PI);
    let f = total * shape;
    [shape, f * u / (s * s), f * (u * u / (s * s * s) - 1.0 / s)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrates_to_total() {
        let (total, gmd, gsd) = (1000.0, 0.12, 1.6);
        let n = 4000;
        let (a, b) = (-4.0, 2.0);
        let h = (b - a) / n as f64;
        let integral: f64 = (0..n)
            .map(|i| {
                let x = a + (i as f64 + 0.5) * h;
                lognormal(10f64.powf(x), total, gmd, gsd) * h
            })
            .sum();
        assert!((integral - total).abs() / total < 1e-9);
    }

    #[test]
    fn peaks_at_gmd() {
        let left = lognormal(0.099, 1.0, 0.1, 1.5);
        let centre = lognormal(0.1, 1.0, 0.1, 1.5);
        let right = lognormal(0.101, 1.0, 0.1, 1.5);
        assert!(centre > left && centre > right);
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let (x, total, m, s) = (-0.7, 500.0, -0.9, 0.25);
        let g = lognormal_log_gradient(x, total, m, s);
        let h = 1e-6;
        let fd = [
            (lognormal_log(x, total + h, m, s) - lognormal_log(x, total - h, m, s)) / (2.0 * h),
            (lognormal_log(x, total, m + h, s) - lognormal_log(x, total, m - h, s)) / (2.0 * h),
            (lognormal_log(x, total, m, s + h) - lognormal_log(x, total, m, s - h)) / (2.0 * h),
        ];
        for k in 0..3 {
            let scale = g[k].abs().max(1.0);
            assert!((g[k] - fd[k]).abs() / scale < 1e-5, "component {k}: {} vs {}", g[k], fd[k]);
        }
    }
}
