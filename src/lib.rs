//! # Split-and-Merge Gaussian Mixture Estimation
//!
//! Maximum-likelihood fitting of Gaussian mixture models to unlabeled
//! multivariate samples by Expectation-Maximization, optionally refined by the
//! Split-and-Merge EM (SMEM) heuristic, which escapes the poor local optima
//! plain EM tends to converge to.
//!
//! ## Key Features
//!
//! - **Regularized EM**: covariance updates carry a `λ·I` prior so that
//!   components with little support stay invertible
//! - **Covariance rescue**: near-singular covariances are inflated along the
//!   diagonal instead of aborting the fit
//! - **Split-and-merge**: ranked merge/split trials with partial EM,
//!   snapshot and rollback
//! - **Reproducibility**: all randomness flows through a seedable ChaCha20
//!   generator
//!
//! ## Quick Start
//!
//! ```rust
//! use nalgebra::{DMatrix, DVector};
//! use smem_gmm::generators::generate_gaussian_mixture;
//! use smem_gmm::{GaussianMixtureEstimator, GmmConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let means = vec![DVector::zeros(2), DVector::from_element(2, 10.0)];
//!     let covs = vec![DMatrix::identity(2, 2) * 0.5; 2];
//!     let data = generate_gaussian_mixture(&means, &covs, &[100, 100], Some(42))?;
//!
//!     let config = GmmConfig::split_merge(2).with_seed(7);
//!     let mut estimator = GaussianMixtureEstimator::new(config);
//!     let fit = estimator.estimate(&data)?;
//!
//!     for (mean, alpha) in fit.means().iter().zip(fit.alphas()) {
//!         println!("mean = {:?}, weight = {:.3}", mean.as_slice(), alpha);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! [`GaussianMixtureEstimator`] validates the input, seeds the components
//! ([`initialization`]), runs the [`em_core::EmEngine`] to convergence and,
//! when enabled, hands the result to the
//! [`split_merge::SplitMergeController`].

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod config;
pub mod errors;
pub mod linear_algebra;
pub mod progress;
pub mod random;
pub mod results;

// Estimation
pub mod component;
pub mod em_core;
pub mod estimator;
pub mod initialization;
pub mod objective;
pub mod rescue;
pub mod split_merge;

// Validation
pub mod generators;

// Re-exports for convenience - main public API
pub use component::{ComponentBank, GaussianComponent};
pub use config::GmmConfig;
pub use errors::{GmmError, GmmResult};
pub use estimator::GaussianMixtureEstimator;
pub use progress::{LogProgress, ProgressReporter, SilentProgress};
pub use random::{clear_global_seed, global_seed, MixtureRng, RandomSource};
pub use results::{MixtureFit, ModelCriteria, SplitMergeSummary};
