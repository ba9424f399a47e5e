//! # Estimator Configuration
//!
//! This module contains the configuration structure controlling mixture
//! estimation: model size, regularization strengths, iteration budgets for
//! the plain and split-and-merge phases, and reproducibility controls.

use crate::errors::{validate_parameter, validate_positive, GmmError, GmmResult};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Largest accepted `emergency_lambda`.
pub const MAX_EMERGENCY_LAMBDA: f64 = 1e6;

/// Configuration for Gaussian mixture estimation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GmmConfig {
    /// Number of mixture components M
    pub number_of_components: usize,
    /// Refine the plain EM result with split-and-merge trials
    pub use_split_merge: bool,
    /// Weight of the diagonal regularizer added to every covariance update.
    /// Larger values pull covariances towards the identity.
    pub lambda: f64,
    /// Diagonal emphasis factor used when a covariance becomes near-singular
    pub emergency_lambda: f64,
    /// Maximum number of full EM steps per EM run
    pub iterations: usize,
    /// Maximum number of partial EM steps per split-and-merge trial
    pub partial_iterations: usize,
    /// Maximum number of split-and-merge trials per ranking pass
    pub c_max: usize,
    /// Magnitude of the random mean perturbation when splitting a component
    pub epsilon: f64,
    /// Fraction of the per-dimension data range used as initial mean jitter
    pub jitter: f64,
    /// Relative improvement of Q below which EM is considered converged
    pub convergence_tolerance: f64,
    /// Always run `iterations` plain EM steps, even after convergence
    pub force_iterations: bool,
    /// Drive the attached progress reporter
    pub report_progress: bool,
    /// Keep the final responsibility matrix in the result
    pub keep_responsibilities: bool,
    /// Random seed for reproducibility (falls back to the global seed)
    pub seed: Option<u64>,
}

impl Default for GmmConfig {
    fn default() -> Self {
        Self {
            number_of_components: 3,
            use_split_merge: false,
            lambda: 0.1,
            emergency_lambda: 0.1,
            iterations: 100,
            partial_iterations: 50,
            c_max: 5,
            epsilon: 0.2,
            jitter: 0.1,
            convergence_tolerance: 1e-10,
            force_iterations: false,
            report_progress: false,
            keep_responsibilities: false,
            seed: None,
        }
    }
}

impl GmmConfig {
    /// Plain EM with `components` components.
    pub fn plain(components: usize) -> Self {
        Self {
            number_of_components: components,
            ..Self::default()
        }
    }

    /// Split-and-merge EM with `components` components.
    pub fn split_merge(components: usize) -> Self {
        Self {
            number_of_components: components,
            use_split_merge: true,
            ..Self::default()
        }
    }

    /// Set the regularization weight.
    pub fn with_lambda(mut self, lambda: f64) -> Self {
        self.lambda = lambda;
        self
    }

    /// Set the maximum number of full EM steps.
    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    /// Set the maximum number of partial EM steps per trial.
    pub fn with_partial_iterations(mut self, partial_iterations: usize) -> Self {
        self.partial_iterations = partial_iterations;
        self
    }

    /// Set the maximum number of split-and-merge trials per pass.
    pub fn with_c_max(mut self, c_max: usize) -> Self {
        self.c_max = c_max;
        self
    }

    /// Set the random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Always run the full iteration budget.
    pub fn with_forced_iterations(mut self) -> Self {
        self.force_iterations = true;
        self
    }

    /// Keep the final responsibility matrix in the fit result.
    pub fn with_responsibilities(mut self) -> Self {
        self.keep_responsibilities = true;
        self
    }

    /// Enable progress reporting.
    pub fn with_progress_reporting(mut self) -> Self {
        self.report_progress = true;
        self
    }

    /// Check the parameters that do not depend on the data.
    pub fn validate(&self) -> GmmResult<()> {
        if self.number_of_components == 0 {
            return Err(GmmError::InvalidComponentCount {
                requested: 0,
                samples: 0,
            });
        }
        validate_positive(self.lambda, "lambda")?;
        // rescue multiplies the diagonal by (1 + emergency_lambda)² per round
        validate_parameter(
            self.emergency_lambda,
            f64::MIN_POSITIVE,
            MAX_EMERGENCY_LAMBDA,
            "emergency_lambda",
        )?;
        if self.iterations == 0 {
            return Err(GmmError::InvalidParameter {
                parameter: "iterations".to_string(),
                value: 0.0,
                constraint: ">= 1".to_string(),
            });
        }
        validate_parameter(self.epsilon, 0.0, f64::MAX, "epsilon")?;
        validate_parameter(self.jitter, 0.0, 1.0, "jitter")?;
        validate_parameter(self.convergence_tolerance, 0.0, 1.0, "convergence_tolerance")?;
        Ok(())
    }

    /// Upper bound on progress steps of one split-and-merge ranking pass.
    pub fn split_merge_steps(&self) -> usize {
        self.c_max * (self.partial_iterations + self.iterations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_reference_parameters() {
        let config = GmmConfig::default();
        assert_eq!(config.number_of_components, 3);
        assert_eq!(config.iterations, 100);
        assert_eq!(config.partial_iterations, 50);
        assert_eq!(config.c_max, 5);
        assert!(!config.use_split_merge);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets() {
        let plain = GmmConfig::plain(4);
        assert_eq!(plain.number_of_components, 4);
        assert!(!plain.use_split_merge);

        let smem = GmmConfig::split_merge(5).with_seed(7).with_c_max(2);
        assert!(smem.use_split_merge);
        assert_eq!(smem.seed, Some(7));
        assert_eq!(smem.split_merge_steps(), 2 * (50 + 100));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(GmmConfig::plain(0).validate().is_err());
        assert!(GmmConfig::plain(2).with_lambda(0.0).validate().is_err());
        assert!(GmmConfig::plain(2).with_iterations(0).validate().is_err());

        let mut config = GmmConfig::plain(2);
        config.jitter = 2.0;
        assert!(matches!(
            config.validate(),
            Err(GmmError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_emergency_lambda_is_bounded() {
        let mut config = GmmConfig::plain(2);
        config.emergency_lambda = MAX_EMERGENCY_LAMBDA;
        assert!(config.validate().is_ok());

        for bad in [0.0, -0.1, 1e200, f64::INFINITY, f64::NAN] {
            config.emergency_lambda = bad;
            match config.validate() {
                Err(GmmError::InvalidParameter { parameter, .. }) => {
                    assert_eq!(parameter, "emergency_lambda")
                }
                other => panic!("Expected InvalidParameter for {}, got {:?}", bad, other),
            }
        }
    }
}
