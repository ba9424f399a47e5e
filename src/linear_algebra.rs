//! Linear algebra operations for mixture estimation
//!
//! Thin helpers over `nalgebra` for the dense operations the estimator
//! needs: LU-based determinant and inverse, weighted outer-product
//! accumulation, row extraction and per-block sample statistics.

use crate::errors::{GmmError, GmmResult};
use nalgebra::{Cholesky, DMatrix, DVector};

/// Validates that a matrix contains no NaN or Inf values
pub fn ensure_finite_matrix(a: &DMatrix<f64>, operation: &str) -> GmmResult<()> {
    for i in 0..a.nrows() {
        for j in 0..a.ncols() {
            let val = a[(i, j)];
            if !val.is_finite() {
                return Err(GmmError::NonFiniteInput {
                    reason: format!(
                        "Non-finite value ({}) at position [{},{}] in {}",
                        val, i, j, operation
                    ),
                });
            }
        }
    }
    Ok(())
}

/// True when every entry of `mean` and `covariance` is finite.
pub fn all_finite(mean: &DVector<f64>, covariance: &DMatrix<f64>) -> bool {
    mean.iter().chain(covariance.iter()).all(|v| v.is_finite())
}

/// Determinant of a square matrix via LU decomposition.
pub fn lu_determinant(a: &DMatrix<f64>) -> f64 {
    a.clone().lu().determinant()
}

/// Determinant and inverse of a square matrix from a single LU decomposition.
///
/// The inverse is `None` when the matrix is exactly singular.
pub fn determinant_and_inverse(a: &DMatrix<f64>) -> (f64, Option<DMatrix<f64>>) {
    let lu = a.clone().lu();
    (lu.determinant(), lu.try_inverse())
}

/// Row `i` of the sample matrix as a column vector.
pub fn sample(data: &DMatrix<f64>, i: usize) -> DVector<f64> {
    data.row(i).transpose()
}

/// Accumulates `weight * v * vᵀ` into `target`.
pub fn add_weighted_outer(target: &mut DMatrix<f64>, v: &DVector<f64>, weight: f64) {
    target.ger(weight, v, v, 1.0);
}

/// Per-column minimum and maximum of the sample matrix.
pub fn column_bounds(data: &DMatrix<f64>) -> (DVector<f64>, DVector<f64>) {
    let dim = data.ncols();
    let mut min = DVector::from_element(dim, f64::INFINITY);
    let mut max = DVector::from_element(dim, f64::NEG_INFINITY);
    for i in 0..data.nrows() {
        for j in 0..dim {
            let v = data[(i, j)];
            min[j] = min[j].min(v);
            max[j] = max[j].max(v);
        }
    }
    (min, max)
}

/// Mean of rows `start..end`.
pub fn block_mean(data: &DMatrix<f64>, start: usize, end: usize) -> DVector<f64> {
    let mut mean = DVector::zeros(data.ncols());
    for i in start..end {
        mean += sample(data, i);
    }
    if end > start {
        mean /= (end - start) as f64;
    }
    mean
}

/// Unbiased sample covariance of rows `start..end` around `mean`.
///
/// A block with a single row yields the zero matrix.
pub fn block_covariance(
    data: &DMatrix<f64>,
    start: usize,
    end: usize,
    mean: &DVector<f64>,
) -> DMatrix<f64> {
    let dim = data.ncols();
    let mut cov = DMatrix::zeros(dim, dim);
    for i in start..end {
        let diff = sample(data, i) - mean;
        add_weighted_outer(&mut cov, &diff, 1.0);
    }
    let n = end.saturating_sub(start);
    if n > 1 {
        cov /= (n - 1) as f64;
    }
    cov
}

/// True when the matrix admits a Cholesky factorization.
pub fn is_positive_definite(a: &DMatrix<f64>) -> bool {
    Cholesky::new(a.clone()).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_determinant_and_inverse() {
        let a = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 3.0]);
        let (det, inv) = determinant_and_inverse(&a);
        assert_approx_eq!(det, 11.0, 1e-12);

        let inv = inv.expect("matrix is regular");
        let identity = &a * &inv;
        assert_approx_eq!(identity[(0, 0)], 1.0, 1e-12);
        assert_approx_eq!(identity[(0, 1)], 0.0, 1e-12);
        assert_approx_eq!(identity[(1, 1)], 1.0, 1e-12);
    }

    #[test]
    fn test_singular_has_no_inverse() {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 4.0]);
        let (det, inv) = determinant_and_inverse(&a);
        assert_approx_eq!(det, 0.0, 1e-12);
        assert!(inv.is_none());
    }

    #[test]
    fn test_weighted_outer_product() {
        let mut m = DMatrix::zeros(2, 2);
        let v = DVector::from_vec(vec![1.0, 2.0]);
        add_weighted_outer(&mut m, &v, 0.5);
        assert_approx_eq!(m[(0, 0)], 0.5);
        assert_approx_eq!(m[(0, 1)], 1.0);
        assert_approx_eq!(m[(1, 0)], 1.0);
        assert_approx_eq!(m[(1, 1)], 2.0);
    }

    #[test]
    fn test_block_statistics() {
        let data = DMatrix::from_row_slice(4, 2, &[0.0, 0.0, 2.0, 0.0, 10.0, 10.0, 12.0, 14.0]);
        let mean = block_mean(&data, 0, 2);
        assert_approx_eq!(mean[0], 1.0);
        assert_approx_eq!(mean[1], 0.0);

        let cov = block_covariance(&data, 0, 2, &mean);
        assert_approx_eq!(cov[(0, 0)], 2.0);
        assert_approx_eq!(cov[(1, 1)], 0.0);

        let single = block_covariance(&data, 3, 4, &sample(&data, 3));
        assert_eq!(single, DMatrix::zeros(2, 2));
    }

    #[test]
    fn test_column_bounds_and_finiteness() {
        let data = DMatrix::from_row_slice(3, 2, &[1.0, -4.0, 3.0, 2.0, -1.0, 0.5]);
        let (min, max) = column_bounds(&data);
        assert_eq!(min.as_slice(), &[-1.0, -4.0]);
        assert_eq!(max.as_slice(), &[3.0, 2.0]);
        assert!(ensure_finite_matrix(&data, "test").is_ok());

        let mut bad = data.clone();
        bad[(1, 1)] = f64::NAN;
        assert!(ensure_finite_matrix(&bad, "test").is_err());

        let mean = DVector::from_vec(vec![0.0, 1.0]);
        assert!(all_finite(&mean, &(&data.transpose() * &data)));
        assert!(!all_finite(&mean, &bad));
    }

    #[test]
    fn test_positive_definite_check() {
        assert!(is_positive_definite(&DMatrix::identity(3, 3)));
        assert!(!is_positive_definite(&DMatrix::zeros(3, 3)));
    }
}
