//! Integrand families for the skew-normal expectation `E[g(Z)]`.
//!
//! Each family supplies a pointwise `g(z)` and its derivative `g'(z)`. The
//! set is closed and selected at call sites through [`IntegrandFamily`].

pub mod mlogit;
pub mod probit;

use serde::{Deserialize, Serialize};

/// Integrand selector for the family integral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegrandFamily {
    /// `g(z) = -log Φ(z)`.
    Probit,
    /// `g(z) = log(1 + exp(z))`, linear above [`mlogit::TOO_LARGE`].
    Mlogit,
}

impl IntegrandFamily {
    #[inline]
    pub fn value(self, z: f64) -> f64 {
        match self {
            IntegrandFamily::Probit => probit::value(z),
            IntegrandFamily::Mlogit => mlogit::value(z),
        }
    }

    #[inline]
    pub fn derivative(self, z: f64) -> f64 {
        match self {
            IntegrandFamily::Probit => probit::derivative(z),
            IntegrandFamily::Mlogit => mlogit::derivative(z),
        }
    }

    /// Returns `(g(z), g'(z))`.
    #[inline]
    pub fn value_and_derivative(self, z: f64) -> (f64, f64) {
        (self.value(z), self.derivative(z))
    }
}
