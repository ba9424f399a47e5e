//! Synthetic Gaussian mixture samples for testing and validation.
//!
//! Samples are drawn component by component, so the rows of the generated
//! matrix are grouped: the first `counts[0]` rows come from component 0,
//! the next `counts[1]` from component 1, and so on. Each sample is
//! `mean + L·z` with `L` the Cholesky factor of the covariance and `z`
//! standard normal.

use crate::errors::{GmmError, GmmResult};
use crate::random::MixtureRng;
use nalgebra::{Cholesky, DMatrix, DVector};
use rand::Rng;
use rand_distr::StandardNormal;

/// Draw grouped samples from a known mixture.
///
/// # Example
/// ```rust
/// use nalgebra::{DMatrix, DVector};
/// use smem_gmm::generators::generate_gaussian_mixture;
///
/// let means = vec![DVector::zeros(2), DVector::from_element(2, 10.0)];
/// let covs = vec![DMatrix::identity(2, 2) * 0.5, DMatrix::identity(2, 2) * 0.5];
/// let data = generate_gaussian_mixture(&means, &covs, &[100, 100], Some(42)).unwrap();
/// assert_eq!(data.shape(), (200, 2));
/// ```
pub fn generate_gaussian_mixture(
    means: &[DVector<f64>],
    covariances: &[DMatrix<f64>],
    counts: &[usize],
    seed: Option<u64>,
) -> GmmResult<DMatrix<f64>> {
    if means.is_empty() {
        return Err(GmmError::InvalidComponentCount {
            requested: 0,
            samples: counts.iter().sum(),
        });
    }
    if covariances.len() != means.len() {
        return Err(GmmError::DimensionMismatch {
            expected: means.len(),
            actual: covariances.len(),
        });
    }
    if counts.len() != means.len() {
        return Err(GmmError::DimensionMismatch {
            expected: means.len(),
            actual: counts.len(),
        });
    }

    let dim = means[0].len();
    let mut factors = Vec::with_capacity(means.len());
    for (l, (mean, cov)) in means.iter().zip(covariances).enumerate() {
        if mean.len() != dim || cov.nrows() != dim || cov.ncols() != dim {
            return Err(GmmError::DimensionMismatch {
                expected: dim,
                actual: if mean.len() != dim { mean.len() } else { cov.nrows() },
            });
        }
        let chol = Cholesky::new(cov.clone()).ok_or_else(|| GmmError::InvalidParameter {
            parameter: format!("covariances[{}]", l),
            value: crate::linear_algebra::lu_determinant(cov),
            constraint: "symmetric positive definite".to_string(),
        })?;
        factors.push(chol.unpack());
    }

    let total: usize = counts.iter().sum();
    let mut data = DMatrix::zeros(total, dim);
    let mut rng = MixtureRng::for_seed(seed);
    let mut row = 0;

    for ((mean, factor), &count) in means.iter().zip(&factors).zip(counts) {
        for _ in 0..count {
            let z = DVector::from_fn(dim, |_, _| rng.inner().sample::<f64, _>(StandardNormal));
            let x = mean + factor * z;
            data.set_row(row, &x.transpose());
            row += 1;
        }
    }

    Ok(data)
}
