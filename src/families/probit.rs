use crate::probability::{normal_log_cdf, normal_pdf_over_cdf};

/// `-log Φ(z)`.
#[inline]
pub fn value(z: f64) -> f64 {
    -normal_log_cdf(z)
}

/// `-φ(z)/Φ(z)`.
#[inline]
pub fn derivative(z: f64) -> f64 {
    -normal_pdf_over_cdf(z)
}
