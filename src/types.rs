use crate::quadrature::MAX_NODES;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::linalg::LinalgError;

/// Errors raised by the variational integral engine.
///
/// Numerical edge cases (vanishing denominators, overflowing exponentials)
/// are never reported here; they are guarded locally and produce finite
/// values.
#[derive(Debug, Error)]
pub enum VaError {
    #[error("invalid Gauss-Hermite node count {n}: must be in 1..={max}")]
    InvalidNodeCount { n: usize, max: usize },

    #[error("quadrature rule with {n} nodes requested for the first time inside a parallel region")]
    CacheConstructionInParallel { n: usize },

    #[error("random effect dimension must be positive")]
    InvalidDimension,

    #[error(
        "variational parameter vector of length {len} is not a multiple of the per-group block size {block}"
    )]
    ParameterLength { len: usize, block: usize },

    #[error("input dimensions are inconsistent: {0}")]
    DimensionMismatch(String),

    #[error("term refers to group {group} but only {n_groups} groups were unpacked")]
    GroupOutOfRange { group: usize, n_groups: usize },

    #[error("scale parameter must be positive and finite, got {0}")]
    InvalidScale(f64),

    #[error(transparent)]
    Linalg(#[from] LinalgError),
}

/// Variational family used for the random effects of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ApproximationMethod {
    /// Gaussian variational approximation.
    Gva,
    /// Skew-normal variational approximation.
    #[default]
    Snva,
}

/// Layout of the skew block of an SNVA parameter vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Parameterization {
    /// Location, packed scale factor and shape `rho`.
    Direct,
    /// Mean, packed covariance factor and bounded-transformed skewness.
    #[default]
    CentralizedTransformed,
}

pub fn default_n_nodes() -> usize {
    20
}

/// Engine configuration for lower-bound evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VaConfig {
    #[serde(default)]
    pub method: ApproximationMethod,
    #[serde(default)]
    pub parameterization: Parameterization,
    #[serde(default = "default_n_nodes")]
    pub n_nodes: usize,
}

impl Default for VaConfig {
    fn default() -> Self {
        Self {
            method: ApproximationMethod::default(),
            parameterization: Parameterization::default(),
            n_nodes: default_n_nodes(),
        }
    }
}

impl VaConfig {
    pub fn gva(n_nodes: usize) -> Self {
        Self {
            method: ApproximationMethod::Gva,
            parameterization: Parameterization::Direct,
            n_nodes,
        }
    }

    pub fn snva(parameterization: Parameterization, n_nodes: usize) -> Self {
        Self {
            method: ApproximationMethod::Snva,
            parameterization,
            n_nodes,
        }
    }

    pub fn validate(&self) -> Result<(), VaError> {
        if self.n_nodes == 0 || self.n_nodes > MAX_NODES {
            return Err(VaError::InvalidNodeCount {
                n: self.n_nodes,
                max: MAX_NODES,
            });
        }
        Ok(())
    }

    /// Number of raw parameters per group for random effect dimension `dim`.
    pub fn block_size(&self, dim: usize) -> usize {
        match self.method {
            ApproximationMethod::Gva => dim + packed_len(dim),
            ApproximationMethod::Snva => 2 * dim + packed_len(dim),
        }
    }
}

/// Number of free values in a packed lower-triangular factor of size `dim`.
#[inline]
pub fn packed_len(dim: usize) -> usize {
    dim * (dim + 1) / 2
}
