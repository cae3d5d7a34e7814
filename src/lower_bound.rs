//! GVA/SNVA lower-bound dispatch.
//!
//! For each group the variational factor `q(u)` is either Gaussian
//! `N(μ, Λ)` or skew-normal `2 φ(u; μ, Λ) Φ(ρᵀ(u - μ))`, against the prior
//! `u ~ N(0, Σ)`. The group contribution is
//!
//! ```text
//! E_q[log p(u)] - E_q[log q(u)] - Σ_terms weight · E_q[g(aᵀu + offset)]
//! ```
//!
//! where the family terms are expected negative log-likelihood kernels
//! evaluated on the (skew-normal) marginal of the linear predictor `aᵀu`.

use crate::families::IntegrandFamily;
use crate::integral::{evaluate_entropy_term, evaluate_offset_family_integral};
use crate::linalg::SpdFactor;
use crate::params::{unpack_gaussian_params, unpack_variational_params};
use crate::quadrature::{GaussHermiteRule, get_quadrature_rule};
use crate::types::{ApproximationMethod, VaConfig, VaError};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rayon::prelude::*;
use std::f64::consts::LN_2;

const SQRT_2_OVER_PI: f64 = 0.797_884_560_802_865_4;

/// Sink for per-group lower-bound contributions.
pub trait LowerBoundAccumulator {
    fn add_group(&mut self, group: usize, contribution: f64);
}

/// Running total.
impl LowerBoundAccumulator for f64 {
    #[inline]
    fn add_group(&mut self, _group: usize, contribution: f64) {
        *self += contribution;
    }
}

/// Per-group totals, grown on demand.
impl LowerBoundAccumulator for Vec<f64> {
    fn add_group(&mut self, group: usize, contribution: f64) {
        if self.len() <= group {
            self.resize(group + 1, 0.0);
        }
        self[group] += contribution;
    }
}

/// Zero-mean Gaussian prior `N(0, Σ)` of one group's random effects.
pub struct RandomEffectPrior {
    precision: Array2<f64>,
    log_det: f64,
}

impl RandomEffectPrior {
    pub fn new(covariance: ArrayView2<'_, f64>) -> Result<Self, VaError> {
        if covariance.nrows() == 0 {
            return Err(VaError::InvalidDimension);
        }
        let factor = SpdFactor::new(covariance)?;
        Ok(Self {
            precision: factor.inverse(),
            log_det: factor.log_det(),
        })
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.precision.nrows()
    }

    /// `Σ⁻¹`.
    pub fn precision(&self) -> ArrayView2<'_, f64> {
        self.precision.view()
    }

    /// `log |Σ|`.
    pub fn log_det(&self) -> f64 {
        self.log_det
    }
}

/// One expected-likelihood term `weight · E_q[g(aᵀu + offset)]` of a group.
///
/// The offset follows the family convention of
/// [`evaluate_offset_family_integral`].
#[derive(Debug, Clone, PartialEq)]
pub struct FamilyTerm {
    pub group: usize,
    pub loading: Array1<f64>,
    pub offset: f64,
    pub family: IntegrandFamily,
    pub weight: f64,
}

impl FamilyTerm {
    /// Term on the single random effect `component` of a `dim`-dimensional
    /// group.
    pub fn unit(
        group: usize,
        component: usize,
        dim: usize,
        offset: f64,
        family: IntegrandFamily,
        weight: f64,
    ) -> Self {
        let mut loading = Array1::<f64>::zeros(dim);
        if component < dim {
            loading[component] = 1.0;
        }
        Self {
            group,
            loading,
            offset,
            family,
            weight,
        }
    }
}

/// Per-group variational state the contributions are computed from.
struct GroupState {
    mean: Array1<f64>,
    covariance: Array2<f64>,
    rho: Option<Array1<f64>>,
}

/// Evaluates the lower bound for every group in `theta_va` and adds the
/// group contributions to `acc` in group order.
///
/// The quadrature rule is fetched before any parallel work starts; the
/// per-group work runs on the rayon pool.
pub fn accumulate_lower_bound<A: LowerBoundAccumulator + ?Sized>(
    config: &VaConfig,
    theta_va: &[f64],
    dim: usize,
    prior: &RandomEffectPrior,
    terms: &[FamilyTerm],
    acc: &mut A,
) -> Result<(), VaError> {
    config.validate()?;
    let rule = get_quadrature_rule(config.n_nodes)?;
    if prior.dim() != dim {
        return Err(VaError::DimensionMismatch(format!(
            "prior has dimension {}, random effects have dimension {dim}",
            prior.dim()
        )));
    }

    let groups: Vec<GroupState> = match config.method {
        ApproximationMethod::Gva => unpack_gaussian_params(theta_va, dim)?
            .into_iter()
            .map(|g| GroupState {
                mean: g.mean,
                covariance: g.covariance,
                rho: None,
            })
            .collect(),
        ApproximationMethod::Snva => {
            unpack_variational_params(theta_va, dim, config.parameterization)?
                .into_iter()
                .map(|g| GroupState {
                    mean: g.mean,
                    covariance: g.covariance,
                    rho: Some(g.rho),
                })
                .collect()
        }
    };

    let n_groups = groups.len();
    let mut terms_by_group: Vec<Vec<&FamilyTerm>> = vec![Vec::new(); n_groups];
    for term in terms {
        if term.group >= n_groups {
            return Err(VaError::GroupOutOfRange {
                group: term.group,
                n_groups,
            });
        }
        if term.loading.len() != dim {
            return Err(VaError::DimensionMismatch(format!(
                "term loading has length {}, expected {dim}",
                term.loading.len()
            )));
        }
        terms_by_group[term.group].push(term);
    }

    let contributions: Vec<f64> = groups
        .par_iter()
        .zip(terms_by_group.par_iter())
        .map(|(group, group_terms)| group_contribution(group, group_terms, prior, rule))
        .collect::<Result<_, VaError>>()?;

    for (g, &value) in contributions.iter().enumerate() {
        acc.add_group(g, value);
    }
    log::debug!(
        "{:?} lower bound: {} groups, {} family terms, {} nodes, total {:.6e}",
        config.method,
        n_groups,
        terms.len(),
        rule.len(),
        contributions.iter().sum::<f64>()
    );
    Ok(())
}

fn group_contribution(
    group: &GroupState,
    terms: &[&FamilyTerm],
    prior: &RandomEffectPrior,
    rule: &GaussHermiteRule,
) -> Result<f64, VaError> {
    let dim = group.mean.len() as f64;
    let lambda = &group.covariance;
    let log_det_lambda = SpdFactor::new(lambda.view())?.log_det();
    let precision = prior.precision();
    let trace = (&precision * lambda).sum();
    let prec_mean = precision.dot(&group.mean);
    let mean_quad = group.mean.dot(&prec_mean);

    let base = 0.5 * dim - 0.5 * prior.log_det() + 0.5 * log_det_lambda;
    let mut out = match &group.rho {
        None => base - 0.5 * (trace + mean_quad),
        Some(rho) => {
            let lambda_rho = lambda.dot(rho);
            let shape_sq = rho.dot(&lambda_rho);
            let delta = &lambda_rho / (1.0 + shape_sq).sqrt();
            let cross = 2.0 * SQRT_2_OVER_PI * prec_mean.dot(&delta);
            base - LN_2 - 0.5 * (trace + mean_quad + cross) - evaluate_entropy_term(shape_sq, rule)
        }
    };

    for term in terms {
        let (location, scale, shape) =
            linear_predictor_marginal(term.loading.view(), group)?;
        out -= term.weight
            * evaluate_offset_family_integral(
                location,
                scale,
                shape,
                term.offset,
                term.family,
                rule,
            );
    }
    Ok(out)
}

/// Location, scale and shape of the skew-normal marginal of `aᵀu`.
fn linear_predictor_marginal(
    loading: ArrayView1<'_, f64>,
    group: &GroupState,
) -> Result<(f64, f64, f64), VaError> {
    let lambda = &group.covariance;
    let location = loading.dot(&group.mean);
    let lambda_a = lambda.dot(&loading);
    let scale_sq = loading.dot(&lambda_a);
    let scale = scale_sq.sqrt();
    if !(scale > 0.0 && scale.is_finite()) {
        return Err(VaError::InvalidScale(scale));
    }
    let shape = match &group.rho {
        None => 0.0,
        Some(rho) => {
            let a_lambda_rho = lambda_a.dot(rho);
            let shape_sq = rho.dot(&lambda.dot(rho));
            // ≥ 1 by Cauchy-Schwarz
            let radicand = (1.0 + shape_sq - a_lambda_rho * a_lambda_rho / scale_sq).max(1.0);
            a_lambda_rho / scale_sq / radicand.sqrt()
        }
    };
    Ok((location, scale, shape))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::pack_covariance;
    use crate::types::Parameterization;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn group_block(mean: &[f64], cov: &Array2<f64>, rho: Option<&[f64]>) -> Vec<f64> {
        let mut raw = mean.to_vec();
        raw.extend(pack_covariance(cov.view()).expect("spd"));
        if let Some(rho) = rho {
            raw.extend_from_slice(rho);
        }
        raw
    }

    fn prior() -> RandomEffectPrior {
        RandomEffectPrior::new(array![[1.5, 0.2], [0.2, 0.7]].view()).expect("spd prior")
    }

    #[test]
    fn gaussian_bound_without_terms_is_negative_kl() {
        let cov = array![[0.4, 0.1], [0.1, 0.3]];
        let mean = [0.2, -0.5];
        let theta = group_block(&mean, &cov, None);
        let sigma = array![[1.5, 0.2], [0.2, 0.7]];

        let mut total = 0.0;
        accumulate_lower_bound(&VaConfig::gva(10), &theta, 2, &prior(), &[], &mut total)
            .expect("valid input");

        let sigma_inv = SpdFactor::new(sigma.view()).expect("spd").inverse();
        let m = Array1::from(mean.to_vec());
        let kl = 0.5
            * ((&sigma_inv * &cov).sum() + m.dot(&sigma_inv.dot(&m)) - 2.0
                + SpdFactor::new(sigma.view()).expect("spd").log_det()
                - SpdFactor::new(cov.view()).expect("spd").log_det());
        assert_relative_eq!(total, -kl, epsilon = 1e-12);
        assert!(total < 0.0);
    }

    #[test]
    fn skew_normal_with_zero_shape_matches_gaussian() {
        let cov = array![[0.4, 0.1], [0.1, 0.3]];
        let mean = [0.2, -0.5];
        let terms = vec![
            FamilyTerm::unit(0, 0, 2, 0.3, IntegrandFamily::Probit, 1.0),
            FamilyTerm::unit(0, 1, 2, -0.4, IntegrandFamily::Mlogit, 2.0),
            FamilyTerm {
                group: 0,
                loading: array![0.5, 1.0],
                offset: 0.1,
                family: IntegrandFamily::Mlogit,
                weight: 0.5,
            },
        ];

        let mut gva = 0.0;
        accumulate_lower_bound(
            &VaConfig::gva(20),
            &group_block(&mean, &cov, None),
            2,
            &prior(),
            &terms,
            &mut gva,
        )
        .expect("gva");

        let mut snva = 0.0;
        accumulate_lower_bound(
            &VaConfig::snva(Parameterization::Direct, 20),
            &group_block(&mean, &cov, Some(&[0.0, 0.0])),
            2,
            &prior(),
            &terms,
            &mut snva,
        )
        .expect("snva");

        assert_relative_eq!(gva, snva, epsilon = 1e-10);
    }

    #[test]
    fn per_group_accumulator_sums_to_total() {
        let mut theta = group_block(&[0.1, 0.2], &array![[0.5, 0.0], [0.0, 0.2]], Some(&[1.0, -2.0]));
        theta.extend(group_block(&[-0.3, 0.4], &array![[0.3, 0.05], [0.05, 0.6]], Some(&[0.0, 0.5])));
        theta.extend(group_block(&[0.0, 0.0], &array![[1.0, 0.0], [0.0, 1.0]], Some(&[0.3, 0.3])));
        let terms = vec![
            FamilyTerm::unit(0, 1, 2, 0.0, IntegrandFamily::Probit, 1.0),
            FamilyTerm::unit(2, 0, 2, 1.0, IntegrandFamily::Mlogit, 1.0),
        ];
        let config = VaConfig::snva(Parameterization::Direct, 15);

        let mut total = 0.0;
        accumulate_lower_bound(&config, &theta, 2, &prior(), &terms, &mut total).expect("total");
        let mut per_group: Vec<f64> = Vec::new();
        accumulate_lower_bound(&config, &theta, 2, &prior(), &terms, &mut per_group)
            .expect("per group");

        assert_eq!(per_group.len(), 3);
        assert_relative_eq!(per_group.iter().sum::<f64>(), total, epsilon = 1e-12);
        assert!(per_group.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn rejects_bad_inputs() {
        let theta = group_block(&[0.0, 0.0], &array![[1.0, 0.0], [0.0, 1.0]], Some(&[0.0, 0.0]));
        let config = VaConfig::snva(Parameterization::Direct, 10);
        let mut acc = 0.0;

        let far = [FamilyTerm::unit(4, 0, 2, 0.0, IntegrandFamily::Probit, 1.0)];
        assert!(matches!(
            accumulate_lower_bound(&config, &theta, 2, &prior(), &far, &mut acc),
            Err(VaError::GroupOutOfRange { group: 4, n_groups: 1 })
        ));

        let zero = [FamilyTerm {
            group: 0,
            loading: array![0.0, 0.0],
            offset: 0.0,
            family: IntegrandFamily::Probit,
            weight: 1.0,
        }];
        assert!(matches!(
            accumulate_lower_bound(&config, &theta, 2, &prior(), &zero, &mut acc),
            Err(VaError::InvalidScale(_))
        ));

        assert!(matches!(
            accumulate_lower_bound(&config, &theta[..6], 2, &prior(), &[], &mut acc),
            Err(VaError::ParameterLength { len: 6, block: 7 })
        ));
        assert!(matches!(
            accumulate_lower_bound(&VaConfig::gva(0), &theta, 2, &prior(), &[], &mut acc),
            Err(VaError::InvalidNodeCount { n: 0, .. })
        ));
        assert_eq!(acc, 0.0);
    }

    #[test]
    fn marginal_shape_matches_univariate_case() {
        let group = GroupState {
            mean: array![0.7],
            covariance: array![[0.49]],
            rho: Some(array![1.3]),
        };
        let (loc, scale, shape) =
            linear_predictor_marginal(array![1.0].view(), &group).expect("positive scale");
        assert_relative_eq!(loc, 0.7);
        assert_relative_eq!(scale, 0.7, epsilon = 1e-15);
        assert_relative_eq!(shape, 1.3, max_relative = 1e-12);
    }
}
