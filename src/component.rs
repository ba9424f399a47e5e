//! Gaussian mixture components and their likelihood evaluation.
//!
//! Each component keeps its covariance together with a cached inverse and
//! determinant. The cache is refreshed (and the covariance rescued when it
//! has become near-singular) before every E-step, so density evaluation is a
//! pure read.

use crate::errors::{GmmError, GmmResult};
use crate::linear_algebra::{determinant_and_inverse, ensure_finite_matrix};
use crate::rescue::{rescue_covariance, SINGULARITY_THRESHOLD};
use nalgebra::{DMatrix, DVector};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::ops::{Index, IndexMut};

/// One multivariate normal component with its mixing weight.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GaussianComponent {
    /// Mean vector (length D)
    pub mean: DVector<f64>,
    /// Covariance matrix (D×D, symmetric)
    pub covariance: DMatrix<f64>,
    /// Mixing weight in [0, 1]
    pub alpha: f64,
    /// Cached inverse of `covariance`
    inverse_covariance: DMatrix<f64>,
    /// Cached determinant of `covariance`
    determinant: f64,
}

impl GaussianComponent {
    /// Create a component, computing the likelihood cache from the covariance.
    ///
    /// A singular covariance is accepted here; the cache is repaired by
    /// [`refresh_cache`](Self::refresh_cache) before the component is used.
    pub fn new(mean: DVector<f64>, covariance: DMatrix<f64>, alpha: f64) -> GmmResult<Self> {
        let dim = mean.len();
        if dim == 0 {
            return Err(GmmError::InsufficientData {
                required: 1,
                actual: 0,
            });
        }
        if covariance.nrows() != dim || covariance.ncols() != dim {
            return Err(GmmError::DimensionMismatch {
                expected: dim,
                actual: if covariance.nrows() != dim {
                    covariance.nrows()
                } else {
                    covariance.ncols()
                },
            });
        }
        if !(0.0..=1.0).contains(&alpha) {
            return Err(GmmError::InvalidParameter {
                parameter: "alpha".to_string(),
                value: alpha,
                constraint: "[0, 1]".to_string(),
            });
        }
        ensure_finite_matrix(&covariance, "component covariance")?;

        let mut component = Self {
            mean,
            covariance,
            alpha,
            inverse_covariance: DMatrix::zeros(dim, dim),
            determinant: 0.0,
        };
        component.load_cache();
        Ok(component)
    }

    /// Spherical component `variance · I` centred at `mean`.
    pub fn spherical(mean: DVector<f64>, variance: f64, alpha: f64) -> GmmResult<Self> {
        let dim = mean.len();
        Self::new(mean, DMatrix::identity(dim, dim) * variance, alpha)
    }

    /// Dimension D of the component.
    pub fn dimension(&self) -> usize {
        self.mean.len()
    }

    /// Cached determinant of the covariance.
    pub fn determinant(&self) -> f64 {
        self.determinant
    }

    /// Cached inverse of the covariance.
    pub fn inverse_covariance(&self) -> &DMatrix<f64> {
        &self.inverse_covariance
    }

    /// Replace mean, covariance and weight. The cache is stale until the
    /// next [`refresh_cache`](Self::refresh_cache).
    pub(crate) fn set_parameters(&mut self, mean: DVector<f64>, covariance: DMatrix<f64>, alpha: f64) {
        self.mean = mean;
        self.covariance = covariance;
        self.alpha = alpha;
    }

    fn load_cache(&mut self) -> bool {
        let (det, inverse) = determinant_and_inverse(&self.covariance);
        self.determinant = det;
        match inverse {
            Some(inverse) => {
                self.inverse_covariance = inverse;
                true
            }
            None => false,
        }
    }

    /// Recompute determinant and inverse, rescuing the covariance first when
    /// its determinant is below [`SINGULARITY_THRESHOLD`].
    ///
    /// Returns `true` when the covariance had to be rescued. `index` is only
    /// used for error reporting.
    pub fn refresh_cache(&mut self, index: usize, emergency_lambda: f64) -> GmmResult<bool> {
        let mut inverted = self.load_cache();
        let det = self.determinant;

        if det.is_nan() || det == f64::INFINITY {
            return Err(GmmError::divergence(
                "covariance update",
                format!("component {} has determinant {}", index, det),
            ));
        }

        let rescued = det < SINGULARITY_THRESHOLD;
        if rescued {
            log::debug!(
                "component {}: covariance determinant {:.3e} below threshold, rescuing",
                index,
                det
            );
            rescue_covariance(&mut self.covariance, emergency_lambda)?;
            inverted = self.load_cache();
        }

        if !inverted {
            return Err(GmmError::SingularCovariance {
                component: index,
                determinant: self.determinant,
            });
        }
        Ok(rescued)
    }

    /// Natural log of the normal density at `x` from the cached inverse and determinant.
    pub fn log_density(&self, x: &DVector<f64>) -> f64 {
        let diff = x - &self.mean;
        let mahalanobis = diff.dot(&(&self.inverse_covariance * &diff));
        let dim = self.dimension() as f64;
        -0.5 * (mahalanobis + dim * (2.0 * PI).ln() + self.determinant.ln())
    }

    /// Normal density at `x`.
    pub fn density(&self, x: &DVector<f64>) -> f64 {
        self.log_density(x).exp()
    }
}

/// Fixed-size, ordered set of mixture components.
///
/// Cloning gives an independent deep copy, which is what split-and-merge
/// snapshots rely on.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ComponentBank {
    components: Vec<GaussianComponent>,
}

impl ComponentBank {
    /// Build a bank from components that all share one dimension.
    pub fn new(components: Vec<GaussianComponent>) -> GmmResult<Self> {
        let first = components.first().ok_or(GmmError::InvalidComponentCount {
            requested: 0,
            samples: 0,
        })?;
        let dim = first.dimension();
        if let Some(other) = components.iter().find(|c| c.dimension() != dim) {
            return Err(GmmError::DimensionMismatch {
                expected: dim,
                actual: other.dimension(),
            });
        }
        Ok(Self { components })
    }

    /// Number of components M.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// True for a bank without components (never produced by [`ComponentBank::new`]).
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Dimension D shared by all components.
    pub fn dimension(&self) -> usize {
        self.components.first().map_or(0, GaussianComponent::dimension)
    }

    /// Iterate over the components in order.
    pub fn iter(&self) -> std::slice::Iter<'_, GaussianComponent> {
        self.components.iter()
    }

    /// Sum of the mixing weights.
    pub fn alpha_sum(&self) -> f64 {
        self.components.iter().map(|c| c.alpha).sum()
    }

    /// Refresh the likelihood cache of the listed components.
    pub fn refresh(&mut self, indices: &[usize], emergency_lambda: f64) -> GmmResult<usize> {
        let mut rescued = 0;
        for &l in indices {
            if self.components[l].refresh_cache(l, emergency_lambda)? {
                rescued += 1;
            }
        }
        Ok(rescued)
    }

    /// Refresh the likelihood cache of every component.
    pub fn refresh_all(&mut self, emergency_lambda: f64) -> GmmResult<usize> {
        let all: Vec<usize> = (0..self.len()).collect();
        self.refresh(&all, emergency_lambda)
    }

    /// Log of the mixture density `Σ_l alpha_l · N(x; l)`.
    pub fn log_mixture_density(&self, x: &DVector<f64>) -> f64 {
        let terms: Vec<f64> = self
            .components
            .iter()
            .map(|c| c.alpha.ln() + c.log_density(x))
            .collect();
        crate::objective::log_sum_exp(&terms)
    }
}

impl Index<usize> for ComponentBank {
    type Output = GaussianComponent;

    fn index(&self, index: usize) -> &Self::Output {
        &self.components[index]
    }
}

impl IndexMut<usize> for ComponentBank {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.components[index]
    }
}

impl<'a> IntoIterator for &'a ComponentBank {
    type Item = &'a GaussianComponent;
    type IntoIter = std::slice::Iter<'a, GaussianComponent>;

    fn into_iter(self) -> Self::IntoIter {
        self.components.iter()
    }
}
