//! Fitted mixture models and what can be computed from them.

use crate::component::ComponentBank;
use crate::errors::{GmmError, GmmResult};
use crate::linear_algebra::sample;
use nalgebra::{DMatrix, DVector};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Counters from a split-and-merge run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SplitMergeSummary {
    /// Ranking passes performed (the last one accepts nothing)
    pub rounds: usize,
    /// Split-and-merge trials attempted
    pub trials: usize,
    /// Trials that improved Q and were kept
    pub accepted: usize,
}

/// Model selection criteria for a fitted mixture.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ModelCriteria {
    /// Akaike Information Criterion
    pub aic: f64,
    /// Bayesian Information Criterion
    pub bic: f64,
    /// Hannan-Quinn Information Criterion
    pub hqic: f64,
    /// Number of free parameters
    pub num_parameters: usize,
}

/// Result of one estimation call.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MixtureFit {
    /// Fitted components with their mixing weights
    pub components: ComponentBank,
    /// Q after every plain EM step, followed by the Q of every accepted
    /// split-and-merge trial
    pub q_trace: Vec<f64>,
    /// Final responsibility matrix (M×N), when requested
    pub responsibilities: Option<DMatrix<f64>>,
    /// Plain EM steps performed before any split-and-merge refinement
    pub em_iterations: usize,
    /// Whether the plain EM phase converged within its budget
    pub converged: bool,
    /// Split-and-merge counters, when the refinement ran
    pub split_merge: Option<SplitMergeSummary>,
}

impl MixtureFit {
    /// Number of components M.
    pub fn num_components(&self) -> usize {
        self.components.len()
    }

    /// Dimension D of the samples.
    pub fn dimension(&self) -> usize {
        self.components.dimension()
    }

    /// Last recorded value of Q.
    pub fn final_q(&self) -> Option<f64> {
        self.q_trace.last().copied()
    }

    /// Component means in order.
    pub fn means(&self) -> Vec<DVector<f64>> {
        self.components.iter().map(|c| c.mean.clone()).collect()
    }

    /// Component covariances in order.
    pub fn covariances(&self) -> Vec<DMatrix<f64>> {
        self.components.iter().map(|c| c.covariance.clone()).collect()
    }

    /// Mixing weights in order.
    pub fn alphas(&self) -> Vec<f64> {
        self.components.iter().map(|c| c.alpha).collect()
    }

    fn check_dimension(&self, data: &DMatrix<f64>) -> GmmResult<()> {
        if data.ncols() != self.dimension() {
            return Err(GmmError::DimensionMismatch {
                expected: self.dimension(),
                actual: data.ncols(),
            });
        }
        Ok(())
    }

    /// Total log-likelihood `Σ_i ln Σ_l alpha_l N(x_i; l)` of `data` (one sample per row).
    pub fn log_likelihood(&self, data: &DMatrix<f64>) -> GmmResult<f64> {
        self.check_dimension(data)?;
        let mut total = 0.0;
        for i in 0..data.nrows() {
            total += self.components.log_mixture_density(&sample(data, i));
        }
        if total.is_nan() {
            return Err(GmmError::divergence("log-likelihood", "result is NaN"));
        }
        Ok(total)
    }

    /// Posterior component probabilities, one row per sample (N×M).
    pub fn predict_proba(&self, data: &DMatrix<f64>) -> GmmResult<DMatrix<f64>> {
        self.check_dimension(data)?;
        let m = self.num_components();
        let mut proba = DMatrix::zeros(data.nrows(), m);

        for i in 0..data.nrows() {
            let x = sample(data, i);
            let log_weights: Vec<f64> = self
                .components
                .iter()
                .map(|c| c.alpha.ln() + c.log_density(&x))
                .collect();
            let norm = crate::objective::log_sum_exp(&log_weights);
            if !norm.is_finite() {
                return Err(GmmError::divergence(
                    "posterior evaluation",
                    format!("sample {} has mixture log-density {}", i, norm),
                ));
            }
            for (l, lw) in log_weights.iter().enumerate() {
                proba[(i, l)] = (lw - norm).exp();
            }
        }
        Ok(proba)
    }

    /// Most probable component for each sample.
    pub fn predict(&self, data: &DMatrix<f64>) -> GmmResult<Vec<usize>> {
        let proba = self.predict_proba(data)?;
        Ok((0..proba.nrows())
            .map(|i| {
                let row = proba.row(i);
                (0..row.len())
                    .max_by(|&a, &b| row[a].total_cmp(&row[b]))
                    .unwrap_or(0)
            })
            .collect())
    }

    /// AIC, BIC and HQIC of the fit on `data`.
    ///
    /// Free parameters: `M·D` means, `M·D(D+1)/2` covariance entries and
    /// `M−1` weights.
    pub fn model_criteria(&self, data: &DMatrix<f64>) -> GmmResult<ModelCriteria> {
        let log_likelihood = self.log_likelihood(data)?;
        let m = self.num_components();
        let d = self.dimension();
        let num_parameters = m * d + m * d * (d + 1) / 2 + m.saturating_sub(1);

        let n = data.nrows() as f64;
        let k = num_parameters as f64;
        let aic = 2.0 * k - 2.0 * log_likelihood;
        let bic = k * n.ln() - 2.0 * log_likelihood;
        let hqic = 2.0 * k * n.ln().ln() - 2.0 * log_likelihood;

        Ok(ModelCriteria {
            aic,
            bic,
            hqic,
            num_parameters,
        })
    }
}
