//! Gauss-Hermite approximations of skew-normal expectations.
//!
//! # Entropy term
//!
//! ```text
//! f(σ²) = ∫ 2 φ(z; σ²) Φ(z) log Φ(z) dz
//! ```
//!
//! Writing `φ(z; σ²) = exp(-z²/(2σ²))/(σ√2π)` and splitting off
//! `exp(z²/(2γ²))` from the integrand gives a Gaussian weight with variance
//! `γ²σ²/(γ²+σ²)`. Substituting `z = s √2 γσ/√(γ²+σ²)` yields
//!
//! ```text
//! f(σ²) ≈ 2γ/√(π(γ²+σ²)) Σᵢ wᵢ exp(zᵢ²/(2γ²)) Φ(zᵢ) log Φ(zᵢ)
//! ```
//!
//! with `γ = 1`. The integrand is already well behaved, so no re-centring is
//! done.
//!
//! # Family integral
//!
//! ```text
//! I(μ, σ, ρ) = 2/(σ√2π) ∫ exp(-(z-μ)²/(2σ²)) Φ(ρ(z-μ)) g(z) dz
//! ```
//!
//! is evaluated with adaptive Gauss-Hermite quadrature centred at the
//! approximate mode `ξ` of the skew-normal density with scale
//! `λ = 1/√(-curvature)` (see [`crate::mode`]):
//!
//! ```text
//! zᵢ = ξ + √2 λ xᵢ
//! I ≈ (2/√π)(λ/σ) Σᵢ wᵢ g(zᵢ) exp(xᵢ² - (zᵢ-μ)²/(2σ²)) Φ(ρ(zᵢ-μ))
//! ```
//!
//! The reverse-mode gradient differentiates this sum exactly, including the
//! dependence of `ξ` and `λ` on `(μ, σ, ρ)`, so it is consistent with the
//! value to rounding error rather than to quadrature error.

use crate::families::IntegrandFamily;
use crate::mode::{SkewNormalParams, mode_and_curvature, mode_scale_jacobian};
use crate::probability::{normal_cdf, normal_log_cdf, normal_pdf};
use crate::quadrature::GaussHermiteRule;
use std::f64::consts::{FRAC_2_SQRT_PI, SQRT_2};

const SQRT_2_OVER_PI: f64 = 0.797_884_560_802_865_4;

/// Sensitivities of a scalar output with respect to `(mu, sigma, rho)`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SkewNormalGradient {
    pub d_mu: f64,
    pub d_sigma: f64,
    pub d_rho: f64,
}

/// Sensitivities of an offset family integral, including the offset itself.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OffsetGradient {
    pub d_mu: f64,
    pub d_sigma: f64,
    pub d_rho: f64,
    pub d_offset: f64,
}

/// Approximates `∫ 2φ(z; σ²)Φ(z) log Φ(z) dz`.
pub fn evaluate_entropy_term(sigma_sq: f64, rule: &GaussHermiteRule) -> f64 {
    debug_assert!(sigma_sq >= 0.0, "sigma_sq must be non-negative");
    let gamma = 1.0f64;
    let gamma_sq = gamma * gamma;

    let mult_sum = FRAC_2_SQRT_PI * gamma / (sigma_sq + gamma_sq).sqrt();
    let mult = mult_sum * sigma_sq.sqrt() / SQRT_2_OVER_PI;

    let mut out = 0.0;
    for (x, w) in rule.iter() {
        let z = x * mult;
        out += w * (z * z / 2.0 / gamma_sq).exp() * normal_cdf(z) * normal_log_cdf(z);
    }
    mult_sum * out
}

/// Below this `σ²` the node term of the entropy gradient uses its
/// second-order expansion around `z = 0`.
const ENTROPY_SMALL_VARIANCE: f64 = 1e-10;

/// Reverse-mode derivative of [`evaluate_entropy_term`] w.r.t. `sigma_sq`,
/// seeded with `upstream`.
///
/// With `h(z) = exp(z²/2)Φ(z) log Φ(z)` the quadrature sum is
/// `m_s Σᵢ wᵢ h(xᵢ m)` where both `m_s` and `m` depend on `σ²`, and
/// `h'(z) = z h(z) + (log Φ(z) + 1)/√(2π)`.
pub fn gradient_entropy_term(sigma_sq: f64, rule: &GaussHermiteRule, upstream: f64) -> f64 {
    debug_assert!(sigma_sq >= 0.0, "sigma_sq must be non-negative");
    let one_p = sigma_sq + 1.0;
    let mult_sum = FRAC_2_SQRT_PI / one_p.sqrt();
    let mult = mult_sum * sigma_sq.sqrt() / SQRT_2_OVER_PI;
    let inv_sqrt_2pi = FRAC_2_SQRT_PI / (2.0 * SQRT_2);

    let mut sum = 0.0;
    let mut node_sum = 0.0;
    for (x, w) in rule.iter() {
        let z = x * mult;
        let log_cdf = normal_log_cdf(z);
        let h = (z * z / 2.0).exp() * normal_cdf(z) * log_cdf;
        sum += w * h;
        if sigma_sq > ENTROPY_SMALL_VARIANCE {
            let dh = z * h + (log_cdf + 1.0) * inv_sqrt_2pi;
            node_sum += w * dh * z;
        }
    }

    // d/dσ² of Σ wᵢ h(xᵢ m) is Σ wᵢ h'(zᵢ) zᵢ / (2σ²(1+σ²)).
    let node_term = if sigma_sq > ENTROPY_SMALL_VARIANCE {
        node_sum / (2.0 * sigma_sq)
    } else {
        // h'(z) z ≈ h''(0) z² with h''(0) = h(0) + 1/π and z² = xᵢ² m_s² σ²/(2/π).
        let h0 = 0.5 * (0.5f64).ln();
        let d2h0 = h0 + std::f64::consts::FRAC_1_PI;
        let second_moment: f64 = rule.iter().map(|(x, w)| w * x * x).sum();
        d2h0 * second_moment * mult_sum * mult_sum / (2.0 * SQRT_2_OVER_PI * SQRT_2_OVER_PI)
    };

    let d_mult_sum = -0.5 * mult_sum / one_p;
    upstream * (d_mult_sum * sum + mult_sum * node_term / one_p)
}

/// Approximates the skew-normal expectation of `family`'s integrand.
pub fn evaluate_family_integral(
    mu: f64,
    sigma: f64,
    rho: f64,
    family: IntegrandFamily,
    rule: &GaussHermiteRule,
) -> f64 {
    debug_assert!(sigma > 0.0, "sigma must be positive");
    let mc = mode_and_curvature(SkewNormalParams::new(mu, sigma, rho));
    let xi = mc.mode;
    let lambda = mc.scale();
    let sigma_sq = sigma * sigma;

    let mult_sum = lambda / sigma * FRAC_2_SQRT_PI;
    let mult = SQRT_2 * lambda;

    let mut out = 0.0;
    for (x, w) in rule.iter() {
        let z = xi + mult * x;
        let diff = z - mu;
        out += w
            * (x * x - diff * diff / 2.0 / sigma_sq).exp()
            * normal_cdf(rho * diff)
            * family.value(z);
    }
    mult_sum * out
}

/// Value of the family integral together with `upstream · ∇(μ, σ, ρ)`.
pub fn family_integral_value_and_gradient(
    mu: f64,
    sigma: f64,
    rho: f64,
    family: IntegrandFamily,
    rule: &GaussHermiteRule,
    upstream: f64,
) -> (f64, SkewNormalGradient) {
    debug_assert!(sigma > 0.0, "sigma must be positive");
    let jac = mode_scale_jacobian(SkewNormalParams::new(mu, sigma, rho));
    let xi = jac.mode;
    let lambda = jac.scale;
    let sigma_sq = sigma * sigma;
    let inv_sigma_sq = 1.0 / sigma_sq;

    let mult_sum = lambda / sigma * FRAC_2_SQRT_PI;
    let mult = SQRT_2 * lambda;

    // Partial sums of the quadrature sum with ξ and λ held fixed.
    let mut sum = 0.0;
    let mut sum_xi = 0.0;
    let mut sum_lambda = 0.0;
    let mut sum_mu = 0.0;
    let mut sum_sigma = 0.0;
    let mut sum_rho = 0.0;

    for (x, w) in rule.iter() {
        let z = xi + mult * x;
        let diff = z - mu;
        let kernel = w * (x * x - diff * diff / 2.0 * inv_sigma_sq).exp();
        let cdf = normal_cdf(rho * diff);
        let pdf = normal_pdf(rho * diff);
        let (g, dg) = family.value_and_derivative(z);

        let term = kernel * g * cdf;
        sum += term;

        // z and z - μ move together when ξ or λ moves.
        let along_z = kernel * (dg * cdf - g * cdf * diff * inv_sigma_sq + g * pdf * rho);
        sum_xi += along_z;
        sum_lambda += along_z * SQRT_2 * x;

        sum_mu += kernel * g * (cdf * diff * inv_sigma_sq - pdf * rho);
        sum_sigma += term * diff * diff * inv_sigma_sq / sigma;
        sum_rho += kernel * g * pdf * diff;
    }

    let value = mult_sum * sum;
    let f_xi = mult_sum * sum_xi;
    let f_lambda = value / lambda + mult_sum * sum_lambda;
    let direct = [
        mult_sum * sum_mu,
        -value / sigma + mult_sum * sum_sigma,
        mult_sum * sum_rho,
    ];

    let total =
        |i: usize| upstream * (direct[i] + f_xi * jac.d_mode[i] + f_lambda * jac.d_scale[i]);

    (
        value,
        SkewNormalGradient {
            d_mu: total(0),
            d_sigma: total(1),
            d_rho: total(2),
        },
    )
}

/// Reverse-mode gradient of [`evaluate_family_integral`] seeded with `upstream`.
pub fn gradient_family_integral(
    mu: f64,
    sigma: f64,
    rho: f64,
    family: IntegrandFamily,
    rule: &GaussHermiteRule,
    upstream: f64,
) -> SkewNormalGradient {
    family_integral_value_and_gradient(mu, sigma, rho, family, rule, upstream).1
}

/// Family integral composed with the family's offset convention.
///
/// `Mlogit` treats `offset` as a log-exposure added to `mu`; `Probit` treats
/// it as the threshold `k` and evaluates at `(k - mu, sigma, -rho)`.
pub fn evaluate_offset_family_integral(
    mu: f64,
    sigma: f64,
    rho: f64,
    offset: f64,
    family: IntegrandFamily,
    rule: &GaussHermiteRule,
) -> f64 {
    match family {
        IntegrandFamily::Mlogit => evaluate_family_integral(mu + offset, sigma, rho, family, rule),
        IntegrandFamily::Probit => evaluate_family_integral(offset - mu, sigma, -rho, family, rule),
    }
}

/// Reverse-mode gradient of [`evaluate_offset_family_integral`].
pub fn gradient_offset_family_integral(
    mu: f64,
    sigma: f64,
    rho: f64,
    offset: f64,
    family: IntegrandFamily,
    rule: &GaussHermiteRule,
    upstream: f64,
) -> OffsetGradient {
    match family {
        IntegrandFamily::Mlogit => {
            let g = gradient_family_integral(mu + offset, sigma, rho, family, rule, upstream);
            OffsetGradient {
                d_mu: g.d_mu,
                d_sigma: g.d_sigma,
                d_rho: g.d_rho,
                d_offset: g.d_mu,
            }
        }
        IntegrandFamily::Probit => {
            let g = gradient_family_integral(offset - mu, sigma, -rho, family, rule, upstream);
            OffsetGradient {
                d_mu: -g.d_mu,
                d_sigma: g.d_sigma,
                d_rho: -g.d_rho,
                d_offset: g.d_mu,
            }
        }
    }
}
