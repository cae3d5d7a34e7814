//! Gauss-Hermite quadrature rules and the process-wide rule cache.
//!
//! Rules integrate against the physicist's weight `exp(-x²)`:
//!
//! ```text
//! ∫ exp(-x²) f(x) dx ≈ Σᵢ wᵢ f(xᵢ),   Σᵢ wᵢ = √π
//! ```
//!
//! # Construction
//!
//! Nodes and weights come from the Golub-Welsch algorithm: the nodes are the
//! eigenvalues of the symmetric tridiagonal Jacobi matrix of the Hermite
//! recurrence, found with implicit QR and Wilkinson shifts. For large node
//! counts the eigenvector-based weights lose relative accuracy in the tails,
//! so every node is polished with Newton steps on the orthonormal Hermite
//! recurrence and the weight is recomputed as `2 / p'ₙ(xᵢ)²`.
//!
//! # Cache discipline
//!
//! Each node count owns one `OnceLock` slot in a static table. Reads of a
//! built slot are lock-free. Building a slot is only legal outside a rayon
//! parallel region: callers fetch (or [`warm_quadrature_cache`]) the rules
//! they need before spawning per-group work. A first-time request from inside
//! a worker is a contract violation and fails with
//! [`VaError::CacheConstructionInParallel`].

use crate::types::VaError;
use std::sync::OnceLock;

/// Largest node count served by the rule cache.
pub const MAX_NODES: usize = 100;

const NEWTON_MAX_STEPS: usize = 8;
const QR_MAX_ITER: usize = 200;

static RULE_CACHE: [OnceLock<GaussHermiteRule>; MAX_NODES] =
    [const { OnceLock::new() }; MAX_NODES];

/// Gauss-Hermite quadrature rule: nodes and weights.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussHermiteRule {
    /// Quadrature nodes (roots of Hermite polynomial), strictly increasing
    nodes: Vec<f64>,
    /// Quadrature weights (for physicist's Hermite, sum to sqrt(π))
    weights: Vec<f64>,
}

impl GaussHermiteRule {
    /// Builds an uncached rule with `n` nodes.
    pub fn new(n: usize) -> Result<Self, VaError> {
        if n == 0 || n > MAX_NODES {
            return Err(VaError::InvalidNodeCount { n, max: MAX_NODES });
        }
        Ok(compute_gauss_hermite_n(n))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[inline]
    pub fn nodes(&self) -> &[f64] {
        &self.nodes
    }

    #[inline]
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Iterates `(node, weight)` pairs in increasing node order.
    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.nodes.iter().copied().zip(self.weights.iter().copied())
    }
}

/// Returns the cached `n`-node rule, building it on first use.
pub fn get_quadrature_rule(n: usize) -> Result<&'static GaussHermiteRule, VaError> {
    if n == 0 || n > MAX_NODES {
        return Err(VaError::InvalidNodeCount { n, max: MAX_NODES });
    }
    let slot = &RULE_CACHE[n - 1];
    if let Some(rule) = slot.get() {
        return Ok(rule);
    }
    if in_parallel_region() {
        return Err(VaError::CacheConstructionInParallel { n });
    }
    Ok(slot.get_or_init(|| {
        log::debug!("building {n}-node Gauss-Hermite rule");
        compute_gauss_hermite_n(n)
    }))
}

/// Builds every requested rule up front so later parallel sections only read.
pub fn warm_quadrature_cache(node_counts: &[usize]) -> Result<(), VaError> {
    for &n in node_counts {
        get_quadrature_rule(n)?;
    }
    Ok(())
}

#[inline]
fn in_parallel_region() -> bool {
    rayon::current_thread_index().is_some()
}

fn compute_gauss_hermite_n(n: usize) -> GaussHermiteRule {
    let mut diag = vec![0.0f64; n];
    let mut off_diag = vec![0.0f64; n.saturating_sub(1)];
    for (i, od) in off_diag.iter_mut().enumerate() {
        *od = (((i + 1) as f64) / 2.0).sqrt();
    }
    let mut nodes = symmetric_tridiagonal_eigenvalues(&mut diag, &mut off_diag);
    nodes.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    // The rule is symmetric; enforce it exactly before polishing.
    for i in 0..n / 2 {
        let j = n - 1 - i;
        let half_width = 0.5 * (nodes[j] - nodes[i]);
        nodes[i] = -half_width;
        nodes[j] = half_width;
    }
    if n % 2 == 1 {
        nodes[n / 2] = 0.0;
    }

    let mut weights = vec![0.0f64; n];
    for (node, weight) in nodes.iter_mut().zip(weights.iter_mut()) {
        let (x, w) = polish_node(*node, n);
        *node = x;
        *weight = w;
    }

    GaussHermiteRule { nodes, weights }
}

/// Evaluates the orthonormal Hermite polynomials `pₙ(x)` and `pₙ₋₁(x)`.
fn orthonormal_hermite_pair(x: f64, n: usize) -> (f64, f64) {
    let mut p_prev = 0.0f64;
    let mut p = std::f64::consts::PI.powf(-0.25);
    for j in 1..=n {
        let jf = j as f64;
        let p_next = x * (2.0 / jf).sqrt() * p - ((jf - 1.0) / jf).sqrt() * p_prev;
        p_prev = p;
        p = p_next;
    }
    (p, p_prev)
}

/// Newton refinement of one node; returns the node and its weight.
fn polish_node(x0: f64, n: usize) -> (f64, f64) {
    let scale = (2.0 * n as f64).sqrt();
    let mut x = x0;
    for _ in 0..NEWTON_MAX_STEPS {
        let (p, p_prev) = orthonormal_hermite_pair(x, n);
        let dp = scale * p_prev;
        let step = p / dp;
        if !step.is_finite() {
            break;
        }
        x -= step;
        if step.abs() <= 4.0 * f64::EPSILON * x.abs().max(1.0) {
            break;
        }
    }
    let (_, p_prev) = orthonormal_hermite_pair(x, n);
    let dp = scale * p_prev;
    (x, 2.0 / (dp * dp))
}

/// Eigenvalues of a symmetric tridiagonal matrix using implicit QR with Wilkinson shifts.
///
/// Weights are recomputed from the polished nodes, so no eigenvectors are
/// accumulated.
fn symmetric_tridiagonal_eigenvalues(diag: &mut [f64], off_diag: &mut [f64]) -> Vec<f64> {
    let eps = 1e-15;
    let mut n = diag.len();
    while n > 1 {
        let mut converged = false;
        for _ in 0..QR_MAX_ITER {
            // Find the start of the unreduced block ending at n - 1.
            let mut m = n - 1;
            while m > 0 {
                if off_diag[m - 1].abs() <= eps * (diag[m - 1].abs() + diag[m].abs()) {
                    off_diag[m - 1] = 0.0;
                    break;
                }
                m -= 1;
            }
            if m == n - 1 {
                n -= 1;
                converged = true;
                break;
            }
            let shift = wilkinson_shift(diag[n - 2], diag[n - 1], off_diag[n - 2]);
            let mut x = diag[m] - shift;
            let mut y = off_diag[m];
            for k in m..(n - 1) {
                let (c, s) = if y.abs() > eps {
                    let r = x.hypot(y);
                    if r > 0.0 && r.is_finite() {
                        (x / r, -y / r)
                    } else {
                        (1.0, 0.0)
                    }
                } else {
                    (1.0, 0.0)
                };
                if k > m {
                    off_diag[k - 1] = x.hypot(y);
                }
                let d1 = diag[k];
                let d2 = diag[k + 1];
                let e_k = off_diag[k];
                diag[k] = c * c * d1 + s * s * d2 - 2.0 * c * s * e_k;
                diag[k + 1] = s * s * d1 + c * c * d2 + 2.0 * c * s * e_k;
                off_diag[k] = c * s * (d1 - d2) + (c * c - s * s) * e_k;
                if k < n - 2 {
                    x = off_diag[k];
                    y = -s * off_diag[k + 1];
                    off_diag[k + 1] *= c;
                }
            }
        }
        if !converged {
            // Force trailing deflation; Newton polishing repairs the node.
            off_diag[n - 2] = 0.0;
            n -= 1;
        }
    }
    diag.to_vec()
}

#[inline]
fn wilkinson_shift(a: f64, c: f64, b: f64) -> f64 {
    let d = (a - c) * 0.5;
    let t = d.hypot(b);
    let sgn = if d >= 0.0 { 1.0 } else { -1.0 }; // sign(0)=+1
    let denom = d + sgn * t;

    if denom.abs() > f64::EPSILON * t.max(1.0) {
        c - (b * b) / denom
    } else {
        c - t
    }
}
