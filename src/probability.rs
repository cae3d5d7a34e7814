use statrs::function::erf::erfc;

const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;
const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_8;

/// Below this point `Φ(x)` is no longer representable and log Φ switches to
/// its asymptotic expansion.
const LOG_CDF_ASYMPTOTIC_BELOW: f64 = -37.0;

/// Standard normal PDF φ(x).
#[inline]
pub fn normal_pdf(x: f64) -> f64 {
    INV_SQRT_2PI * (-0.5 * x * x).exp()
}

/// log φ(x).
#[inline]
pub fn normal_log_pdf(x: f64) -> f64 {
    -0.5 * x * x - LN_SQRT_2PI
}

/// Standard normal CDF Φ(x) computed through the complementary error function.
#[inline]
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * erfc(-x / std::f64::consts::SQRT_2)
}

/// log Φ(x), accurate in both tails.
pub fn normal_log_cdf(x: f64) -> f64 {
    if x > 0.0 {
        // log(1 - Q) keeps precision when Φ(x) rounds to one.
        (-0.5 * erfc(x / std::f64::consts::SQRT_2)).ln_1p()
    } else if x >= LOG_CDF_ASYMPTOTIC_BELOW {
        normal_cdf(x).ln()
    } else {
        let inv_sq = 1.0 / (x * x);
        let series = 1.0 - inv_sq + 3.0 * inv_sq * inv_sq - 15.0 * inv_sq * inv_sq * inv_sq;
        normal_log_pdf(x) - (-x).ln() + series.ln()
    }
}

/// φ(x)/Φ(x), the derivative of log Φ(x).
#[inline]
pub fn normal_pdf_over_cdf(x: f64) -> f64 {
    (normal_log_pdf(x) - normal_log_cdf(x)).exp()
}

/// Logistic sigmoid with the exponent clamped against overflow.
#[inline]
pub fn sigmoid(x: f64) -> f64 {
    let x_clamped = x.clamp(-700.0, 700.0);
    1.0 / (1.0 + f64::exp(-x_clamped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn cdf_matches_reference_values() {
        assert_relative_eq!(normal_cdf(0.0), 0.5, epsilon = 1e-15);
        assert_relative_eq!(normal_cdf(1.0), 0.841_344_746_068_542_9, epsilon = 1e-14);
        assert_relative_eq!(normal_cdf(-2.0), 0.022_750_131_948_179_2, epsilon = 1e-15);
        assert_relative_eq!(normal_cdf(-8.0), 6.220_960_574_271_78e-16, max_relative = 1e-10);
    }

    #[test]
    fn log_cdf_is_continuous_across_branches() {
        for &x in &[0.0, LOG_CDF_ASYMPTOTIC_BELOW] {
            let left = normal_log_cdf(x - 1e-9);
            let right = normal_log_cdf(x + 1e-9);
            assert_relative_eq!(left, right, max_relative = 1e-7);
        }
        assert_relative_eq!(normal_log_cdf(-20.0), normal_cdf(-20.0).ln(), max_relative = 1e-12);
        assert!(normal_log_cdf(-60.0).is_finite());
        assert!(normal_log_cdf(12.0) < 0.0);
    }

    #[test]
    fn mills_ratio_matches_direct_ratio_in_bulk() {
        for &x in &[-5.0, -1.0, 0.0, 0.7, 3.0] {
            assert_relative_eq!(
                normal_pdf_over_cdf(x),
                normal_pdf(x) / normal_cdf(x),
                max_relative = 1e-12
            );
        }
        // Asymptotically φ(x)/Φ(x) ~ -x for very negative x.
        assert_relative_eq!(normal_pdf_over_cdf(-50.0), 50.0, max_relative = 1e-3);
    }

    #[test]
    fn sigmoid_saturates_without_nan() {
        assert_eq!(sigmoid(1e6), 1.0);
        assert!(sigmoid(-1e6) >= 0.0);
        assert_relative_eq!(sigmoid(0.0), 0.5);
    }
}
