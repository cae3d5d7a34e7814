//! Small dense SPD helpers bridging ndarray inputs to faer factorizations.

pub use faer::linalg::solvers::{Llt as FaerLlt, Solve as FaerSolve};
use faer::linalg::solvers::LltError;
use faer::{Mat, MatRef, Side};
use ndarray::{Array2, ArrayView2};
use thiserror::Error;

const SYMMETRY_REL_TOL: f64 = 1e-10;

#[derive(Debug, Error)]
pub enum LinalgError {
    #[error("matrix must be square, got {rows}x{cols}")]
    NotSquare { rows: usize, cols: usize },
    #[error("matrix is not symmetric at ({row}, {col})")]
    NotSymmetric { row: usize, col: usize },
    #[error("Cholesky factorization failed: {0:?}")]
    Cholesky(LltError),
}

#[inline]
fn array2_to_mat(array: ArrayView2<'_, f64>) -> Mat<f64> {
    Mat::from_fn(array.nrows(), array.ncols(), |i, j| array[[i, j]])
}

fn mat_to_array(mat: MatRef<'_, f64>) -> Array2<f64> {
    let mut out = Array2::<f64>::zeros((mat.nrows(), mat.ncols()));
    for j in 0..mat.ncols() {
        for i in 0..mat.nrows() {
            out[[i, j]] = mat[(i, j)];
        }
    }
    out
}

fn check_symmetric(matrix: ArrayView2<'_, f64>) -> Result<(), LinalgError> {
    let (rows, cols) = matrix.dim();
    if rows != cols {
        return Err(LinalgError::NotSquare { rows, cols });
    }
    for i in 0..rows {
        for j in 0..i {
            let a = matrix[[i, j]];
            let b = matrix[[j, i]];
            let scale = a.abs().max(b.abs()).max(1.0);
            if (a - b).abs() > SYMMETRY_REL_TOL * scale {
                return Err(LinalgError::NotSymmetric { row: i, col: j });
            }
        }
    }
    Ok(())
}

/// Cholesky factor `A = L Lᵀ` of a symmetric positive-definite matrix.
pub struct SpdFactor {
    llt: FaerLlt<f64>,
}

impl SpdFactor {
    pub fn new(matrix: ArrayView2<'_, f64>) -> Result<Self, LinalgError> {
        check_symmetric(matrix)?;
        let mat = array2_to_mat(matrix);
        let llt = FaerLlt::new(mat.as_ref(), Side::Lower).map_err(LinalgError::Cholesky)?;
        Ok(Self { llt })
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.llt.L().nrows()
    }

    /// Lower-triangular factor `L`.
    pub fn lower(&self) -> Array2<f64> {
        mat_to_array(self.llt.L())
    }

    /// `log |A| = 2 Σ log Lᵢᵢ`.
    pub fn log_det(&self) -> f64 {
        let l = self.llt.L();
        (0..l.nrows()).map(|i| 2.0 * l[(i, i)].ln()).sum()
    }

    pub fn inverse(&self) -> Array2<f64> {
        let n = self.dim();
        let mut rhs = Mat::<f64>::identity(n, n);
        self.llt.solve_in_place(rhs.as_mut());
        mat_to_array(rhs.as_ref())
    }
}
