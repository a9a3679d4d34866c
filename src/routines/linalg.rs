use crate::error::{NmfError, Result};
use faer::{FaerMat, Mat};
use ndarray::{Array1, Array2, Axis};

/// Thin singular value decomposition `A = U·diag(s)·Vᵀ`, singular values in decreasing order.
#[derive(Debug, Clone)]
pub struct ThinSvd {
    pub u: Array2<f64>,
    pub s: Array1<f64>,
    pub vt: Array2<f64>,
}

/// Computes the thin SVD of `a` with faer.
pub fn thin_svd(a: &Array2<f64>) -> Result<ThinSvd> {
    let (m, n) = a.dim();
    if m == 0 || n == 0 {
        return Err(NmfError::LeastSquares(format!(
            "cannot decompose an empty {}x{} matrix",
            m, n
        )));
    }
    if a.iter().any(|v| !v.is_finite()) {
        return Err(NmfError::LeastSquares(
            "matrix must have finite entries".to_string(),
        ));
    }

    let mat = Mat::from_fn(m, n, |i, j| a[[i, j]]);
    let svd = mat.thin_svd();
    let (u_ref, v_ref, s_ref) = (svd.u(), svd.v(), svd.s_diagonal());
    let r = s_ref.nrows();
    let u = Array2::from_shape_fn((m, r), |(i, j)| u_ref.read(i, j));
    let vt = Array2::from_shape_fn((r, n), |(j, i)| v_ref.read(i, j));
    let s = Array1::from_shape_fn(r, |j| s_ref.read(j, 0));

    Ok(ThinSvd { u, s, vt })
}

/// Minimum-norm least squares solution of `A·X = B`.
///
/// Singular values below `eps·max(m, n)·s_max` are treated as zero, which is what
/// `numpy.linalg.lstsq` does with its default cutoff. Rank deficient and
/// under-determined systems are therefore accepted.
pub fn lstsq(a: &Array2<f64>, b: &Array2<f64>) -> Result<Array2<f64>> {
    if a.nrows() != b.nrows() {
        return Err(NmfError::ShapeMismatch {
            what: "least squares right-hand side",
            expected: (a.nrows(), b.ncols()),
            found: b.dim(),
        });
    }
    let svd = thin_svd(a)?;
    let s_max = svd.s.iter().cloned().fold(0.0_f64, f64::max);
    if s_max == 0.0 {
        return Ok(Array2::zeros((a.ncols(), b.ncols())));
    }
    let cutoff = f64::EPSILON * a.nrows().max(a.ncols()) as f64 * s_max;

    // X = V·diag(1/s)·Uᵀ·B
    let mut utb = svd.u.t().dot(b);
    for (mut row, &s) in utb.axis_iter_mut(Axis(0)).zip(svd.s.iter()) {
        if s > cutoff {
            row /= s;
        } else {
            row.fill(0.0);
        }
    }
    Ok(svd.vt.t().dot(&utb))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn svd_reconstructs_the_matrix() {
        let a = array![[3.0, 1.0, 0.5], [1.0, 2.0, 0.0], [0.0, 1.0, 4.0], [2.0, 0.0, 1.0]];
        let svd = thin_svd(&a).unwrap();
        assert!(svd.s.windows(2).into_iter().all(|w| w[0] >= w[1]));
        let rebuilt = svd.u.dot(&Array2::from_diag(&svd.s)).dot(&svd.vt);
        for (x, y) in a.iter().zip(rebuilt.iter()) {
            assert_abs_diff_eq!(x, y, epsilon = 1e-10);
        }
    }

    #[test]
    fn svd_of_wide_matrix_is_thin() {
        let a = array![[1.0, 0.0, 2.0, 1.0], [0.0, 3.0, 1.0, 0.0]];
        let svd = thin_svd(&a).unwrap();
        assert_eq!(svd.u.dim(), (2, 2));
        assert_eq!(svd.s.len(), 2);
        assert_eq!(svd.vt.dim(), (2, 4));
        assert!(svd.s.iter().all(|s| *s >= 0.0));
        let rebuilt = svd.u.dot(&Array2::from_diag(&svd.s)).dot(&svd.vt);
        for (x, y) in a.iter().zip(rebuilt.iter()) {
            assert_abs_diff_eq!(x, y, epsilon = 1e-10);
        }
    }

    #[test]
    fn lstsq_solves_square_system() {
        let a = array![[2.0, 0.0], [1.0, 3.0]];
        let b = array![[4.0], [11.0]];
        let x = lstsq(&a, &b).unwrap();
        assert_abs_diff_eq!(x[[0, 0]], 2.0, epsilon = 1e-10);
        assert_abs_diff_eq!(x[[1, 0]], 3.0, epsilon = 1e-10);
    }

    #[test]
    fn lstsq_returns_minimum_norm_solution() {
        // x0 + x1 = 2 has the minimum norm solution (1, 1)
        let a = array![[1.0, 1.0]];
        let b = array![[2.0]];
        let x = lstsq(&a, &b).unwrap();
        assert_abs_diff_eq!(x[[0, 0]], 1.0, epsilon = 1e-10);
        assert_abs_diff_eq!(x[[1, 0]], 1.0, epsilon = 1e-10);
    }

    #[test]
    fn lstsq_rejects_mismatched_rows() {
        let a = Array2::<f64>::ones((3, 2));
        let b = Array2::<f64>::ones((2, 1));
        assert!(matches!(lstsq(&a, &b), Err(NmfError::ShapeMismatch { .. })));
    }
}
