//! Repair of near-singular covariance matrices.
//!
//! A component that ends up explaining too little probability mass can
//! collapse onto a lower-dimensional subspace. The likelihood evaluator needs
//! a valid inverse, so instead of aborting the fit the covariance is inflated
//! along its diagonal until the determinant is usable again.

use crate::errors::{GmmError, GmmResult};
use crate::linear_algebra::lu_determinant;
use nalgebra::DMatrix;

/// Upper bound on diagonal inflation rounds before giving up.
pub const MAX_RESCUE_ROUNDS: usize = 1000;

/// Determinants below this value trigger a rescue.
pub const SINGULARITY_THRESHOLD: f64 = f64::EPSILON;

/// Inflates the diagonal of `covariance` until its determinant exceeds
/// [`SINGULARITY_THRESHOLD`], returning the new determinant.
///
/// With `f = emergency_lambda + 1` the matrix is first scaled by `1/f`, then
/// its diagonal is multiplied by `f²` per round. If a round leaves the
/// determinant unchanged the matrix is reset to `emergency_lambda · I`.
pub fn rescue_covariance(covariance: &mut DMatrix<f64>, emergency_lambda: f64) -> GmmResult<f64> {
    let n = covariance.nrows();
    let f = emergency_lambda + 1.0;
    let factor = f * f;

    *covariance /= f;

    let mut det = 0.0;
    let mut rounds = 0;
    while det < SINGULARITY_THRESHOLD {
        if rounds == MAX_RESCUE_ROUNDS {
            return Err(GmmError::divergence(
                "covariance rescue",
                format!(
                    "determinant still {:.3e} after {} inflation rounds",
                    det, MAX_RESCUE_ROUNDS
                ),
            ));
        }
        rounds += 1;

        for i in 0..n {
            covariance[(i, i)] *= factor;
        }
        let old_det = det;
        det = lu_determinant(covariance);

        if !det.is_finite() {
            return Err(GmmError::divergence(
                "covariance rescue",
                format!("determinant became {} while inflating the diagonal", det),
            ));
        }

        if det == old_det {
            // inflation is not moving the determinant, start over from a scaled identity
            covariance.fill(0.0);
            covariance.fill_diagonal(emergency_lambda);
            det = emergency_lambda.powi(n as i32);
        }
    }

    log::debug!("rescued covariance after {} rounds, det = {:.3e}", rounds, det);
    Ok(det)
}
