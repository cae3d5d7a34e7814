//! Approximate mode and curvature of the skew-normal density
//!
//! ```text
//! q(z) = 2/σ φ((z - μ)/σ) Φ(ρ(z - μ))
//! ```
//!
//! The mode uses the standard asymptotic expansion in terms of
//! `ν = √(2/π)·α/√(1+α²)` with `α = σρ`, a third-moment correction `γ`, and an
//! exponential tail term. The curvature is the second derivative of `log q`
//! evaluated at that approximate mode. Adaptive quadrature centres its nodes
//! at the mode and scales them by `1/√(-curvature)`.
//!
//! Because `zΦ(z) + φ(z) > 0` for every `z`, the curvature is bounded above by
//! `-1/σ²` and is strictly negative for any `σ > 0`.

use crate::probability::{normal_cdf, normal_pdf};
use std::f64::consts::PI;

const SQRT_2_OVER_PI: f64 = 0.797_884_560_802_865_4;
const HALF_FOUR_MINUS_PI: f64 = (4.0 - PI) / 2.0;
const EPS: f64 = f64::EPSILON;

/// Location, scale and shape of one scalar skew-normal marginal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkewNormalParams {
    pub mu: f64,
    pub sigma: f64,
    pub rho: f64,
}

impl SkewNormalParams {
    pub fn new(mu: f64, sigma: f64, rho: f64) -> Self {
        Self { mu, sigma, rho }
    }
}

/// Approximate mode and log-density curvature at the mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModeCurvature {
    pub mode: f64,
    pub curvature: f64,
}

impl ModeCurvature {
    /// Quadrature scale `1/√(-curvature)`.
    #[inline]
    pub fn scale(&self) -> f64 {
        1.0 / (-self.curvature).sqrt()
    }
}

/// Mode, quadrature scale and their partials w.r.t. `(mu, sigma, rho)`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ModeScaleJacobian {
    pub mode: f64,
    pub scale: f64,
    pub d_mode: [f64; 3],
    pub d_scale: [f64; 3],
}

/// Standardized mode offset `m₀(α)` with `mode = μ + σ m₀(σρ)`, and `dm₀/dα`.
fn standardized_mode(alpha: f64) -> (f64, f64) {
    let a_sign = if alpha <= 0.0 { -1.0 } else { 1.0 };
    let root = (1.0 + alpha * alpha).sqrt();
    let nu = SQRT_2_OVER_PI * alpha / root;
    let d_nu = SQRT_2_OVER_PI / (root * root * root);
    let nu_sq = nu * nu;
    let one_m_nu_sq = 1.0 - nu_sq;

    let gamma = HALF_FOUR_MINUS_PI * nu_sq * nu / one_m_nu_sq.powf(1.5);
    let skew_term = gamma * one_m_nu_sq.sqrt() / 2.0;
    // d/dν of (4-π)/4 · ν³/(1-ν²)
    let d_skew_term =
        0.5 * HALF_FOUR_MINUS_PI * nu_sq * (3.0 - nu_sq) / (one_m_nu_sq * one_m_nu_sq);

    let guarded = a_sign * alpha + EPS;
    let tail = (-2.0 * PI / guarded).exp();
    let m0 = nu - skew_term - a_sign / 2.0 * tail;
    let d_tail = if tail > 0.0 {
        PI * tail / (guarded * guarded)
    } else {
        0.0
    };
    let dm0 = d_nu * (1.0 - d_skew_term) - d_tail;
    (m0, dm0)
}

/// `φ(z)(zΦ(z) + φ(z)) / (Φ(z)² + ε)` and its derivative in `z`.
fn curvature_kernel(z: f64) -> (f64, f64) {
    let phi = normal_pdf(z);
    let cdf = normal_cdf(z);
    let inner = z * cdf + phi;
    let num = phi * inner;
    let den = cdf * cdf + EPS;
    // d(zΦ + φ)/dz = Φ and dφ/dz = -zφ
    let d_num = -z * num + phi * cdf;
    let d_den = 2.0 * cdf * phi;
    (num / den, (d_num * den - num * d_den) / (den * den))
}

/// `a·b` with an exactly-zero factor winning over an infinite one.
#[inline]
fn scaled(a: f64, b: f64) -> f64 {
    if b == 0.0 { 0.0 } else { a * b }
}

/// `-curvature`, kept representable so `1/√(-curvature)` stays finite.
#[inline]
fn negated_curvature(sigma: f64, rho: f64, kernel: f64) -> f64 {
    (1.0 / (sigma * sigma) + scaled(rho * rho, kernel)).max(f64::MIN_POSITIVE)
}

/// Approximate mode and curvature of the skew-normal density.
pub fn mode_and_curvature(params: SkewNormalParams) -> ModeCurvature {
    let SkewNormalParams { mu, sigma, rho } = params;
    let (m0, _) = standardized_mode(sigma * rho);
    let mode = mu + sigma * m0;
    let z = rho * (mode - mu);
    let (kernel, _) = curvature_kernel(z);
    ModeCurvature {
        mode,
        curvature: -negated_curvature(sigma, rho, kernel),
    }
}

pub(crate) fn mode_scale_jacobian(params: SkewNormalParams) -> ModeScaleJacobian {
    let SkewNormalParams { mu, sigma, rho } = params;
    let alpha = sigma * rho;
    let (m0, dm0) = standardized_mode(alpha);
    let mode = mu + sigma * m0;

    // z = ρ(mode - μ) = α m₀(α)
    let z = rho * (mode - mu);
    let dz_dalpha = m0 + alpha * dm0;
    let (kernel, d_kernel) = curvature_kernel(z);

    let neg_curvature = negated_curvature(sigma, rho, kernel);
    let scale = 1.0 / neg_curvature.sqrt();

    let rho_sq = rho * rho;
    let along_z = scaled(rho_sq, d_kernel * dz_dalpha);
    let d_neg_curv_d_sigma = -2.0 / (sigma * sigma * sigma) + scaled(along_z, rho);
    let d_neg_curv_d_rho = scaled(2.0 * rho, kernel) + scaled(along_z, sigma);
    let scale_cubed_half = -0.5 * scale * scale * scale;

    ModeScaleJacobian {
        mode,
        scale,
        d_mode: [1.0, m0 + alpha * dm0, sigma * sigma * dm0],
        d_scale: [
            0.0,
            scale_cubed_half * d_neg_curv_d_sigma,
            scale_cubed_half * d_neg_curv_d_rho,
        ],
    }
}
