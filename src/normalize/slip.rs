//! Gas-kinetic helpers: mean free path and Cunningham slip correction.

/// Mean free path of air (µm) at the reference state below.
const MFP_REF_UM: f64 = 0.0665;
const T_REF_K: f64 = 296.15;
const P_REF_HPA: f64 = 1013.25;
/// Sutherland constant for air (K).
const SUTHERLAND_K: f64 = 110.4;

/// Empirical slip-correction coefficients (transition-regime fit).
const SLIP_A: f64 = 1.257;
const SLIP_B: f64 = 0.4;
const SLIP_C: f64 = 1.1;

/// Reference (unit) density for aerodynamic diameters, g/cm³.
pub const REFERENCE_DENSITY: f64 = 1.0;

/// Mean free path of air (µm) at temperature `t_k` and pressure `p_hpa`.
pub fn mean_free_path(t_k: f64, p_hpa: f64) -> f64 {
    MFP_REF_UM * (t_k / T_REF_K) * (P_REF_HPA / p_hpa) * (1.0 + SUTHERLAND_K / T_REF_K)
        / (1.0 + SUTHERLAND_K / t_k)
}

/// Cunningham slip correction for diameter `d` (µm) and mean free path `mfp` (µm).
pub fn slip_correction(d: f64, mfp: f64) -> f64 {
    let kn2 = 2.0 * mfp / d;
    1.0 + kn2 * (SLIP_A + SLIP_B * (-SLIP_C / kn2).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_state_reproduces_reference_mfp() {
        assert!((mean_free_path(T_REF_K, P_REF_HPA) - MFP_REF_UM).abs() < 1e-15);
    }

    #[test]
    fn slip_correction_limits() {
        let mfp = mean_free_path(293.15, 1013.25);
        // Continuum regime: negligible slip.
        assert!((slip_correction(20.0, mfp) - 1.0).abs() < 0.01);
        // Around 0.1 µm the correction is close to 3.
        let c = slip_correction(0.1, mfp);
        assert!(c > 2.5 && c < 3.2, "Cc(0.1um) = {c}");
        // Monotone decreasing in diameter.
        assert!(slip_correction(0.05, mfp) > slip_correction(0.5, mfp));
    }

    #[test]
    fn low_pressure_increases_slip() {
        let d = 0.3;
        let ambient = slip_correction(d, mean_free_path(293.15, 1013.25));
        let reduced = slip_correction(d, mean_free_path(293.15, 500.0));
        assert!(reduced > ambient);
    }
}
