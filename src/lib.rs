#![deny(dead_code)]
#![deny(unused_imports)]

pub mod families;
pub mod integral;
pub mod linalg;
pub mod lower_bound;
pub mod mode;
pub mod params;
pub mod probability;
pub mod quadrature;
pub mod types;

pub use families::IntegrandFamily;
pub use integral::{
    OffsetGradient, SkewNormalGradient, evaluate_entropy_term, evaluate_family_integral,
    evaluate_offset_family_integral, family_integral_value_and_gradient, gradient_entropy_term,
    gradient_family_integral, gradient_offset_family_integral,
};
pub use lower_bound::{FamilyTerm, LowerBoundAccumulator, RandomEffectPrior, accumulate_lower_bound};
pub use mode::{ModeCurvature, SkewNormalParams, mode_and_curvature};
pub use params::{
    CentralizedParams, GaussianGroupParams, VariationalGroupParams, centralized_moments,
    covariance_from_packed, pack_centralized_params, pack_covariance, unpack_gaussian_params,
    unpack_variational_params,
};
pub use quadrature::{GaussHermiteRule, MAX_NODES, get_quadrature_rule, warm_quadrature_cache};
pub use types::{ApproximationMethod, Parameterization, VaConfig, VaError};
