//! Raw optimizer vectors to per-group variational parameters and back.
//!
//! Each group occupies one contiguous block of the raw vector:
//!
//! ```text
//! [ mean (r) | packed covariance factor (r(r+1)/2) | rho or skew (r) ]
//! ```
//!
//! Gaussian blocks omit the trailing `r` values. The packed factor holds the
//! lower Cholesky factor `L` of the covariance: first the `r` log-diagonal
//! entries, then the strictly-lower entries column by column
//! (`(1,0), (2,0), ..., (r-1,0), (2,1), ...`). The covariance is `L Lᵀ`.

use crate::linalg::SpdFactor;
use crate::types::{Parameterization, VaError, packed_len};
use ndarray::{Array1, Array2, ArrayView2};
use std::f64::consts::PI;

/// Bound of the transformed skewness, `γ ∈ (-c₁, c₁)`.
pub const SKEWNESS_BOUND: f64 = 0.99527;

/// Largest Pearson skewness a univariate skew-normal can attain,
/// `(4-π)/2 · (2/π)^{3/2} / (1-2/π)^{3/2}`.
pub const SKEWNESS_SUPREMUM: f64 = 0.995_271_746_431_156_2;

const HALF_FOUR_MINUS_PI: f64 = (4.0 - PI) / 2.0;
const SQRT_2_OVER_PI: f64 = 0.797_884_560_802_865_4;
const EPS: f64 = f64::EPSILON;

/// Direct (location, scale, shape) parameters of one group's skew-normal
/// variational factor `2 φ(u; mean, covariance) Φ(rhoᵀ(u - mean))`.
#[derive(Debug, Clone, PartialEq)]
pub struct VariationalGroupParams {
    pub mean: Array1<f64>,
    pub covariance: Array2<f64>,
    pub rho: Array1<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GaussianGroupParams {
    pub mean: Array1<f64>,
    pub covariance: Array2<f64>,
}

/// Mean, covariance and marginal Pearson skewness of a skew-normal factor.
#[derive(Debug, Clone, PartialEq)]
pub struct CentralizedParams {
    pub mean: Array1<f64>,
    pub covariance: Array2<f64>,
    pub skewness: Array1<f64>,
}

fn check_dim(dim: usize) -> Result<(), VaError> {
    if dim == 0 {
        return Err(VaError::InvalidDimension);
    }
    Ok(())
}

fn check_block_len(len: usize, block: usize) -> Result<(), VaError> {
    if len % block != 0 {
        return Err(VaError::ParameterLength { len, block });
    }
    Ok(())
}

/// Covariance `L Lᵀ` from a packed log-Cholesky factor.
pub fn covariance_from_packed(packed: &[f64], dim: usize) -> Result<Array2<f64>, VaError> {
    check_dim(dim)?;
    if packed.len() != packed_len(dim) {
        return Err(VaError::DimensionMismatch(format!(
            "packed factor has {} values, expected {} for dimension {dim}",
            packed.len(),
            packed_len(dim)
        )));
    }
    let mut lower = Array2::<f64>::zeros((dim, dim));
    for i in 0..dim {
        lower[[i, i]] = packed[i].exp();
    }
    let mut k = dim;
    for col in 0..dim {
        for row in (col + 1)..dim {
            lower[[row, col]] = packed[k];
            k += 1;
        }
    }
    Ok(lower.dot(&lower.t()))
}

/// Inverse of [`covariance_from_packed`] for a symmetric positive-definite
/// matrix.
pub fn pack_covariance(covariance: ArrayView2<'_, f64>) -> Result<Vec<f64>, VaError> {
    let dim = covariance.nrows();
    check_dim(dim)?;
    let lower = SpdFactor::new(covariance)?.lower();
    let mut packed = Vec::with_capacity(packed_len(dim));
    packed.extend((0..dim).map(|i| lower[[i, i]].ln()));
    for col in 0..dim {
        for row in (col + 1)..dim {
            packed.push(lower[[row, col]]);
        }
    }
    Ok(packed)
}

/// Maps an unbounded value to a skewness in `(-c₁, c₁)`.
#[inline]
pub fn transformed_to_skewness(t: f64) -> f64 {
    if !t.is_finite() {
        log::warn!("non-finite transformed skewness {t}; using zero skewness");
        return 0.0;
    }
    2.0 * SKEWNESS_BOUND / (1.0 + (-t).exp()) - SKEWNESS_BOUND
}

/// Inverse of [`transformed_to_skewness`]. Skewness outside `(-c₁, c₁)` is
/// clamped just inside the bound.
pub fn skewness_to_transformed(gamma: f64) -> f64 {
    let limit = SKEWNESS_BOUND * (1.0 - 1e-10);
    let g = if gamma.is_nan() {
        log::warn!("NaN skewness; using zero");
        0.0
    } else if gamma.abs() > limit {
        log::warn!("skewness {gamma} outside (-{SKEWNESS_BOUND}, {SKEWNESS_BOUND}); clamping");
        gamma.signum() * limit
    } else {
        gamma
    };
    let p = (g + SKEWNESS_BOUND) / (2.0 * SKEWNESS_BOUND);
    (p / (1.0 - p)).ln()
}

/// Mean `ν` of the standardized skew-normal with Pearson skewness `γ`.
///
/// Solves `γ = (4-π)/2 · ν³/(1-ν²)^{3/2}`.
pub fn gamma_to_nu(gamma: f64) -> f64 {
    let g = if gamma.abs() >= SKEWNESS_SUPREMUM {
        log::warn!("invalid gamma parameter {gamma}; clamping below {SKEWNESS_SUPREMUM}");
        gamma.signum() * SKEWNESS_SUPREMUM * (1.0 - 1e-12)
    } else {
        gamma
    };
    let t = (g.abs() / HALF_FOUR_MINUS_PI).cbrt();
    g.signum() * t / (1.0 + t * t).sqrt()
}

/// Inverse of [`gamma_to_nu`].
#[inline]
pub fn nu_to_gamma(nu: f64) -> f64 {
    let one_m = (1.0 - nu * nu).max(EPS);
    HALF_FOUR_MINUS_PI * nu * nu * nu / one_m.powf(1.5)
}

/// Shape `ρ = √π ν / (ω √(2 - πν²))` of a marginal with mean offset `ν` and
/// scale `ω`.
fn nu_to_rho(nu: f64, omega: f64) -> f64 {
    let mut denom = 2.0 - PI * nu * nu;
    if denom <= EPS {
        log::warn!("skew-normal shape undefined at nu={nu}; clamping 2 - pi nu^2 to {EPS}");
        denom = EPS;
    }
    PI.sqrt() * nu / (omega * denom.sqrt())
}

/// Splits `raw` into per-group direct parameters.
///
/// With [`Parameterization::CentralizedTransformed`] the first two blocks
/// of every group are the mean and covariance of the variational
/// distribution and the last block is the transformed skewness; they are
/// converted to location, scale and shape per dimension.
pub fn unpack_variational_params(
    raw: &[f64],
    dim: usize,
    parameterization: Parameterization,
) -> Result<Vec<VariationalGroupParams>, VaError> {
    check_dim(dim)?;
    let n_packed = packed_len(dim);
    let block = 2 * dim + n_packed;
    check_block_len(raw.len(), block)?;

    raw.chunks_exact(block)
        .map(|chunk| {
            let (mean, rest) = chunk.split_at(dim);
            let (packed, skew) = rest.split_at(n_packed);
            let mean = Array1::from(mean.to_vec());
            let covariance = covariance_from_packed(packed, dim)?;
            Ok(match parameterization {
                Parameterization::Direct => VariationalGroupParams {
                    mean,
                    covariance,
                    rho: Array1::from(skew.to_vec()),
                },
                Parameterization::CentralizedTransformed => {
                    centralized_to_direct(mean, covariance, skew)
                }
            })
        })
        .collect()
}

fn centralized_to_direct(
    mut mean: Array1<f64>,
    mut covariance: Array2<f64>,
    transformed_skew: &[f64],
) -> VariationalGroupParams {
    let dim = mean.len();
    let mut rho = Array1::<f64>::zeros(dim);
    let mut shift = Array1::<f64>::zeros(dim);
    for i in 0..dim {
        let nu = gamma_to_nu(transformed_to_skewness(transformed_skew[i]));
        let omega = (covariance[[i, i]] / (1.0 - nu * nu)).sqrt();
        rho[i] = nu_to_rho(nu, omega);
        shift[i] = nu * omega;
    }
    mean -= &shift;
    for i in 0..dim {
        for j in 0..dim {
            covariance[[i, j]] += shift[i] * shift[j];
        }
    }
    VariationalGroupParams {
        mean,
        covariance,
        rho,
    }
}

/// Splits `raw` into per-group Gaussian parameters (no skew block).
pub fn unpack_gaussian_params(raw: &[f64], dim: usize) -> Result<Vec<GaussianGroupParams>, VaError> {
    check_dim(dim)?;
    let n_packed = packed_len(dim);
    check_block_len(raw.len(), dim + n_packed)?;

    raw.chunks_exact(dim + n_packed)
        .map(|chunk| {
            let (mean, packed) = chunk.split_at(dim);
            Ok(GaussianGroupParams {
                mean: Array1::from(mean.to_vec()),
                covariance: covariance_from_packed(packed, dim)?,
            })
        })
        .collect()
}

/// Mean, covariance and marginal skewness implied by direct parameters.
///
/// With `δ = Ωρ/√(1 + ρᵀΩρ)` the moments are `ξ + √(2/π)δ` and
/// `Ω - (2/π)δδᵀ`.
pub fn centralized_moments(params: &VariationalGroupParams) -> CentralizedParams {
    let omega_rho = params.covariance.dot(&params.rho);
    let quad = params.rho.dot(&omega_rho);
    let delta = omega_rho / (1.0 + quad).sqrt();
    let mean_shift = &delta * SQRT_2_OVER_PI;

    let dim = params.mean.len();
    let mut covariance = params.covariance.clone();
    for i in 0..dim {
        for j in 0..dim {
            covariance[[i, j]] -= mean_shift[i] * mean_shift[j];
        }
    }
    let skewness = Array1::from_shape_fn(dim, |i| {
        let sd = covariance[[i, i]].max(EPS).sqrt();
        let standardized = mean_shift[i] / sd;
        // standardized = ν/√(1-ν²) in terms of the marginal ν
        HALF_FOUR_MINUS_PI * standardized.powi(3)
    });

    CentralizedParams {
        mean: &params.mean + &mean_shift,
        covariance,
        skewness,
    }
}

/// Encodes centralized parameters into a raw vector laid out for
/// [`Parameterization::CentralizedTransformed`].
pub fn pack_centralized_params(groups: &[CentralizedParams]) -> Result<Vec<f64>, VaError> {
    let Some(first) = groups.first() else {
        return Ok(Vec::new());
    };
    let dim = first.mean.len();
    check_dim(dim)?;
    let mut raw = Vec::with_capacity(groups.len() * (2 * dim + packed_len(dim)));
    for (g, group) in groups.iter().enumerate() {
        if group.mean.len() != dim
            || group.skewness.len() != dim
            || group.covariance.dim() != (dim, dim)
        {
            return Err(VaError::DimensionMismatch(format!(
                "group {g} does not have dimension {dim}"
            )));
        }
        raw.extend(group.mean.iter().copied());
        raw.extend(pack_covariance(group.covariance.view())?);
        raw.extend(group.skewness.iter().map(|&s| skewness_to_transformed(s)));
    }
    Ok(raw)
}
