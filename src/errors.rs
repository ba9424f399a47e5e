//! Error types and validation functions for mixture estimation.
//!
//! Configuration problems are reported before any work starts. Numerical
//! problems that the estimator can repair locally (near-singular covariances)
//! never surface as errors; only failures that leave the model unusable do.

use thiserror::Error;

/// Error types for Gaussian mixture estimation.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum GmmError {
    /// The requested number of components cannot be fitted to the data.
    #[error("Invalid component count: {requested} components requested for {samples} samples")]
    InvalidComponentCount {
        /// Number of components requested
        requested: usize,
        /// Number of samples available
        samples: usize,
    },

    /// Sample dimensionality does not match the estimator or the supplied model.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension the estimator was built for
        expected: usize,
        /// Dimension that was supplied
        actual: usize,
    },

    /// Not enough samples for the requested operation.
    #[error("Insufficient data: need at least {required} samples, got {actual}")]
    InsufficientData {
        /// Minimum required samples
        required: usize,
        /// Samples provided
        actual: usize,
    },

    /// Invalid parameter value in the estimator configuration.
    #[error("Invalid parameter: {parameter} = {value}, expected {constraint}")]
    InvalidParameter {
        /// Parameter name
        parameter: String,
        /// Invalid value provided
        value: f64,
        /// Valid range or constraint description
        constraint: String,
    },

    /// Input samples contain NaN or infinite values.
    #[error("Non-finite input: {reason}")]
    NonFiniteInput {
        /// Where the offending value was found
        reason: String,
    },

    /// The objective became NaN or a covariance could not be repaired.
    ///
    /// The model state at this point is undefined and must not be used.
    #[error("Numerical divergence during {stage}: {reason}")]
    NumericalDivergence {
        /// Estimation stage that failed (e.g. "full EM step")
        stage: String,
        /// Detailed reason for the failure
        reason: String,
    },

    /// A covariance matrix could not be inverted even after rescue.
    #[error("Singular covariance for component {component} (det = {determinant:.3e})")]
    SingularCovariance {
        /// Component index
        component: usize,
        /// Determinant that was reached
        determinant: f64,
    },
}

impl GmmError {
    /// True for errors raised by input/configuration validation.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            GmmError::InvalidComponentCount { .. }
                | GmmError::DimensionMismatch { .. }
                | GmmError::InsufficientData { .. }
                | GmmError::InvalidParameter { .. }
                | GmmError::NonFiniteInput { .. }
        )
    }

    /// True for errors raised while the algorithm was running.
    pub fn is_numerical_failure(&self) -> bool {
        matches!(
            self,
            GmmError::NumericalDivergence { .. } | GmmError::SingularCovariance { .. }
        )
    }

    pub(crate) fn divergence(stage: &str, reason: impl Into<String>) -> Self {
        GmmError::NumericalDivergence {
            stage: stage.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type for mixture estimation operations.
pub type GmmResult<T> = Result<T, GmmError>;

/// Validates that a parameter is within expected bounds.
///
/// # Example
/// ```rust
/// use smem_gmm::errors::validate_parameter;
///
/// assert!(validate_parameter(0.1, 0.0, 1.0, "lambda").is_ok());
/// assert!(validate_parameter(1.5, 0.0, 1.0, "lambda").is_err());
/// ```
pub fn validate_parameter(value: f64, min: f64, max: f64, name: &str) -> GmmResult<()> {
    if value.is_nan() {
        return Err(GmmError::InvalidParameter {
            parameter: name.to_string(),
            value,
            constraint: "must not be NaN".to_string(),
        });
    }

    if value < min || value > max {
        Err(GmmError::InvalidParameter {
            parameter: name.to_string(),
            value,
            constraint: format!("[{}, {}]", min, max),
        })
    } else {
        Ok(())
    }
}

/// Validates that a parameter is strictly positive and finite.
pub fn validate_positive(value: f64, name: &str) -> GmmResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(GmmError::InvalidParameter {
            parameter: name.to_string(),
            value,
            constraint: "finite and > 0".to_string(),
        })
    }
}
