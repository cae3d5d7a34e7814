use approx::assert_relative_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use snva::{
    IntegrandFamily, SkewNormalParams, VaError, evaluate_entropy_term, evaluate_family_integral,
    evaluate_offset_family_integral, get_quadrature_rule, gradient_entropy_term,
    gradient_family_integral,
    gradient_offset_family_integral, mode_and_curvature, warm_quadrature_cache,
};

const FAMILIES: [IntegrandFamily; 2] = [IntegrandFamily::Probit, IntegrandFamily::Mlogit];

#[test]
fn curvature_is_negative_on_random_parameters() {
    let mut rng = StdRng::seed_from_u64(17);
    for _ in 0..5_000 {
        let mu = rng.random_range(-10.0..10.0);
        let sigma = 10f64.powf(rng.random_range(-3.0..1.5));
        let rho = if rng.random::<f64>() < 0.2 {
            rng.random_range(-1e-6..1e-6)
        } else {
            10f64.powf(rng.random_range(-3.0..3.0)) * if rng.random::<bool>() { 1.0 } else { -1.0 }
        };
        let mc = mode_and_curvature(SkewNormalParams::new(mu, sigma, rho));
        assert!(
            mc.curvature < 0.0 && mc.curvature.is_finite(),
            "({mu}, {sigma}, {rho}) gave curvature {}",
            mc.curvature
        );
        assert!(mc.scale().is_finite());
    }
}

#[test]
fn gradient_agrees_with_finite_differences_at_random_points() {
    let rule = get_quadrature_rule(24).expect("rule");
    let mut rng = StdRng::seed_from_u64(2024);
    let h = 1e-6;
    for _ in 0..60 {
        let mu = rng.random_range(-2.0..2.0);
        let sigma = rng.random_range(0.3..2.0);
        let rho = rng.random_range(-3.0..3.0);
        for family in FAMILIES {
            let f = |m: f64, s: f64, r: f64| evaluate_family_integral(m, s, r, family, rule);
            let grad = gradient_family_integral(mu, sigma, rho, family, rule, 1.0);
            let fd = [
                (f(mu + h, sigma, rho) - f(mu - h, sigma, rho)) / (2.0 * h),
                (f(mu, sigma + h, rho) - f(mu, sigma - h, rho)) / (2.0 * h),
                (f(mu, sigma, rho + h) - f(mu, sigma, rho - h)) / (2.0 * h),
            ];
            let analytic = [grad.d_mu, grad.d_sigma, grad.d_rho];
            for i in 0..3 {
                assert!(
                    (analytic[i] - fd[i]).abs() <= 1e-5 * analytic[i].abs().max(1.0),
                    "{family:?} at ({mu}, {sigma}, {rho}) component {i}: {} vs {}",
                    analytic[i],
                    fd[i]
                );
            }
        }
    }
}

#[test]
fn offset_gradient_agrees_with_finite_differences() {
    let rule = get_quadrature_rule(20).expect("rule");
    let h = 1e-6;
    let (mu, sigma, rho, offset) = (0.3, 0.9, -1.4, 0.6);
    for family in FAMILIES {
        let f = |m: f64, s: f64, r: f64, k: f64| {
            evaluate_offset_family_integral(m, s, r, k, family, rule)
        };
        let g = gradient_offset_family_integral(mu, sigma, rho, offset, family, rule, 1.0);
        let fd = [
            (f(mu + h, sigma, rho, offset) - f(mu - h, sigma, rho, offset)) / (2.0 * h),
            (f(mu, sigma + h, rho, offset) - f(mu, sigma - h, rho, offset)) / (2.0 * h),
            (f(mu, sigma, rho + h, offset) - f(mu, sigma, rho - h, offset)) / (2.0 * h),
            (f(mu, sigma, rho, offset + h) - f(mu, sigma, rho, offset - h)) / (2.0 * h),
        ];
        let analytic = [g.d_mu, g.d_sigma, g.d_rho, g.d_offset];
        for i in 0..4 {
            assert!(
                (analytic[i] - fd[i]).abs() <= 1e-5 * analytic[i].abs().max(1.0),
                "{family:?} component {i}: {} vs {}",
                analytic[i],
                fd[i]
            );
        }
    }
}

#[test]
fn mlogit_far_above_threshold_is_skew_normal_mean() {
    let rule = get_quadrature_rule(30).expect("rule");
    let (mu, sigma, rho) = (60.0, 0.5, 1.0);
    let alpha: f64 = sigma * rho;
    let mean = mu + sigma * (2.0 / std::f64::consts::PI).sqrt() * alpha / (1.0 + alpha * alpha).sqrt();
    let value = evaluate_family_integral(mu, sigma, rho, IntegrandFamily::Mlogit, rule);
    assert_relative_eq!(value, mean, epsilon = 1e-4);

    let grad = gradient_family_integral(mu, sigma, rho, IntegrandFamily::Mlogit, rule, 1.0);
    assert_relative_eq!(grad.d_mu, 1.0, epsilon = 1e-4);
}

#[test]
fn cache_is_shared_after_warming_and_refused_when_cold_in_parallel() {
    warm_quadrature_cache(&[33]).expect("warm outside pool");
    let warm = get_quadrature_rule(33).expect("rule");
    let all_same = (0..64)
        .into_par_iter()
        .map(|_| get_quadrature_rule(33).map(|r| std::ptr::eq(r, warm)))
        .collect::<Result<Vec<bool>, VaError>>()
        .expect("cached reads inside the pool");
    assert!(all_same.iter().all(|&same| same));

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(2)
        .build()
        .expect("pool");
    let cold = pool.install(|| get_quadrature_rule(89).map(|_| ()));
    assert!(matches!(
        cold,
        Err(VaError::CacheConstructionInParallel { n: 89 })
    ));
    assert!(matches!(
        get_quadrature_rule(0),
        Err(VaError::InvalidNodeCount { n: 0, .. })
    ));
}

#[test]
fn entropy_gradient_agrees_with_finite_differences_at_random_variances() {
    let rule = get_quadrature_rule(24).expect("rule");
    let mut rng = StdRng::seed_from_u64(31);
    for _ in 0..40 {
        let sigma_sq = 10f64.powf(rng.random_range(-3.0..2.5));
        let h = 1e-5 * sigma_sq;
        let fd = (evaluate_entropy_term(sigma_sq + h, rule) - evaluate_entropy_term(sigma_sq - h, rule))
            / (2.0 * h);
        let analytic = gradient_entropy_term(sigma_sq, rule, 1.0);
        assert!(
            (analytic - fd).abs() <= 1e-6 * analytic.abs() + 1e-9,
            "sigma_sq={sigma_sq}: analytic {analytic} vs fd {fd}"
        );
    }
}
