//! Small dense linear algebra for symmetric positive-definite matrices
//!
//! Covariance matrices in this crate are at most a few dozen channels wide,
//! so a cyclic Jacobi sweep is accurate and fast enough.

use crate::error::{DecoderError, Result};
use ndarray::{Array1, Array2, ArrayView2};

const MAX_SWEEPS: usize = 100;

/// Eigenvalues below this are clamped before taking logs or roots.
pub const EIGEN_FLOOR: f64 = 1e-10;

/// Eigendecomposition of a symmetric matrix.
///
/// Returns `(eigenvalues, eigenvectors)` where column `i` of the second array
/// is the eigenvector of eigenvalue `i`. Eigenvalues are not sorted.
pub fn symmetric_eigen(a: &ArrayView2<f64>) -> Result<(Array1<f64>, Array2<f64>)> {
    let n = a.nrows();
    if a.ncols() != n {
        return Err(DecoderError::ShapeError {
            expected: format!("square matrix of size {}", n),
            actual: format!("{}x{}", n, a.ncols()),
        });
    }

    let mut m = a.to_owned();
    let mut v = Array2::<f64>::eye(n);
    let scale: f64 = m.iter().map(|x| x * x).sum::<f64>().max(f64::MIN_POSITIVE);

    for _sweep in 0..MAX_SWEEPS {
        let mut off = 0.0;
        for p in 0..n {
            for q in (p + 1)..n {
                off += m[[p, q]] * m[[p, q]];
            }
        }
        if off <= 1e-24 * scale {
            break;
        }

        for p in 0..n {
            for q in (p + 1)..n {
                let apq = m[[p, q]];
                if apq.abs() < f64::MIN_POSITIVE {
                    continue;
                }
                let theta = (m[[q, q]] - m[[p, p]]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..n {
                    let mkp = m[[k, p]];
                    let mkq = m[[k, q]];
                    m[[k, p]] = c * mkp - s * mkq;
                    m[[k, q]] = s * mkp + c * mkq;
                }
                for k in 0..n {
                    let mpk = m[[p, k]];
                    let mqk = m[[q, k]];
                    m[[p, k]] = c * mpk - s * mqk;
                    m[[q, k]] = s * mpk + c * mqk;
                }
                for k in 0..n {
                    let vkp = v[[k, p]];
                    let vkq = v[[k, q]];
                    v[[k, p]] = c * vkp - s * vkq;
                    v[[k, q]] = s * vkp + c * vkq;
                }
            }
        }
    }

    let eigenvalues = Array1::from_iter((0..n).map(|i| m[[i, i]]));
    Ok((eigenvalues, v))
}

/// Rebuild `V diag(f(λ)) Vᵀ` from an eigendecomposition.
fn spectral_map<F>(a: &ArrayView2<f64>, f: F) -> Result<Array2<f64>>
where
    F: Fn(f64) -> f64,
{
    let (eigenvalues, vectors) = symmetric_eigen(a)?;
    let mapped = eigenvalues.mapv(|l| f(l.max(EIGEN_FLOOR)));
    let scaled = &vectors * &mapped.insert_axis(ndarray::Axis(0));
    Ok(scaled.dot(&vectors.t()))
}

/// Matrix logarithm of an SPD matrix.
pub fn logm(a: &ArrayView2<f64>) -> Result<Array2<f64>> {
    spectral_map(a, f64::ln)
}

/// Matrix exponential of a symmetric matrix.
pub fn expm(a: &ArrayView2<f64>) -> Result<Array2<f64>> {
    let (eigenvalues, vectors) = symmetric_eigen(a)?;
    let scaled = &vectors * &eigenvalues.mapv(f64::exp).insert_axis(ndarray::Axis(0));
    Ok(scaled.dot(&vectors.t()))
}

/// Inverse square root of an SPD matrix.
pub fn inv_sqrtm(a: &ArrayView2<f64>) -> Result<Array2<f64>> {
    spectral_map(a, |l| 1.0 / l.sqrt())
}

/// Upper triangle of a symmetric matrix as a vector, off-diagonal entries
/// weighted by `sqrt(2)` so the Euclidean norm matches the Frobenius norm.
pub fn upper_triangle(a: &ArrayView2<f64>) -> Array1<f64> {
    let n = a.nrows();
    let mut out = Vec::with_capacity(n * (n + 1) / 2);
    for i in 0..n {
        out.push(a[[i, i]]);
        for j in (i + 1)..n {
            out.push(std::f64::consts::SQRT_2 * a[[i, j]]);
        }
    }
    Array1::from_vec(out)
}

/// Frobenius distance between two matrices of equal shape.
pub fn frobenius_distance(a: &ArrayView2<f64>, b: &ArrayView2<f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_eigen_diagonal() {
        let a = array![[3.0, 0.0], [0.0, 1.0]];
        let (vals, _) = symmetric_eigen(&a.view()).unwrap();
        let mut vals = vals.to_vec();
        vals.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert!((vals[0] - 1.0).abs() < 1e-12);
        assert!((vals[1] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_eigen_reconstruction() {
        let a = array![[4.0, 1.0, 0.5], [1.0, 3.0, 0.2], [0.5, 0.2, 2.0]];
        let (vals, vecs) = symmetric_eigen(&a.view()).unwrap();
        let rebuilt = (&vecs * &vals.insert_axis(ndarray::Axis(0))).dot(&vecs.t());
        for (x, y) in rebuilt.iter().zip(a.iter()) {
            assert!((x - y).abs() < 1e-9);
        }
    }

    #[test]
    fn test_logm_of_identity_is_zero() {
        let eye = Array2::<f64>::eye(4);
        let log = logm(&eye.view()).unwrap();
        assert!(log.iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn test_expm_inverts_logm() {
        let a = array![[2.0, 0.3], [0.3, 1.0]];
        let back = expm(&logm(&a.view()).unwrap().view()).unwrap();
        for (x, y) in back.iter().zip(a.iter()) {
            assert!((x - y).abs() < 1e-9);
        }
    }

    #[test]
    fn test_inv_sqrtm_whitens() {
        let a = array![[4.0, 1.0], [1.0, 2.0]];
        let w = inv_sqrtm(&a.view()).unwrap();
        let white = w.dot(&a).dot(&w);
        assert!((white[[0, 0]] - 1.0).abs() < 1e-9);
        assert!((white[[1, 1]] - 1.0).abs() < 1e-9);
        assert!(white[[0, 1]].abs() < 1e-9);
    }

    #[test]
    fn test_upper_triangle_norm() {
        let a = array![[1.0, 2.0], [2.0, 3.0]];
        let v = upper_triangle(&a.view());
        assert_eq!(v.len(), 3);
        let frob: f64 = a.iter().map(|x| x * x).sum();
        let vec_norm: f64 = v.iter().map(|x| x * x).sum();
        assert!((frob - vec_norm).abs() < 1e-12);
    }
}
