use crate::probability::sigmoid;

/// Above this point `log(1 + exp(z))` is replaced by `z`.
pub const TOO_LARGE: f64 = 30.0;

/// `log(1 + exp(z))`, switching to the linear branch at [`TOO_LARGE`].
#[inline]
pub fn value(z: f64) -> f64 {
    if z >= TOO_LARGE { z } else { z.exp().ln_1p() }
}

#[inline]
pub fn derivative(z: f64) -> f64 {
    if z >= TOO_LARGE { 1.0 } else { sigmoid(z) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn switch_point_is_continuous_to_rounding() {
        let below = value(TOO_LARGE - 1e-12);
        let above = value(TOO_LARGE);
        // log(1 + e^30) - 30 = log(1 + e^-30) ~ 9.4e-14
        assert_relative_eq!(below, above, epsilon = 1e-12);
        assert_relative_eq!(derivative(TOO_LARGE - 1e-12), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn large_arguments_do_not_overflow() {
        assert_eq!(value(1e4), 1e4);
        assert_eq!(derivative(1e4), 1.0);
        assert!(value(-800.0) >= 0.0);
    }
}
