//! Estimator façade: validation, initialization and dispatch.
//!
//! [`GaussianMixtureEstimator`] is the entry point of the crate. Every call
//! to [`estimate`](GaussianMixtureEstimator::estimate) starts from scratch:
//!
//! 1. validate configuration and samples
//! 2. seed the components from contiguous sample blocks
//! 3. run plain EM to convergence
//! 4. optionally refine with split-and-merge trials
//!
//! # Example
//!
//! ```rust
//! use nalgebra::DMatrix;
//! use smem_gmm::{GaussianMixtureEstimator, GmmConfig};
//!
//! let data = DMatrix::from_row_slice(6, 1, &[0.0, 0.1, 0.2, 5.0, 5.1, 5.2]);
//! let mut estimator = GaussianMixtureEstimator::new(GmmConfig::plain(2).with_seed(1));
//! let fit = estimator.estimate(&data).unwrap();
//! assert_eq!(fit.num_components(), 2);
//! ```

use crate::component::ComponentBank;
use crate::config::GmmConfig;
use crate::em_core::EmEngine;
use crate::errors::{GmmError, GmmResult};
use crate::initialization::initialize_blocks;
use crate::linear_algebra::ensure_finite_matrix;
use crate::progress::{ProgressReporter, SilentProgress};
use crate::random::MixtureRng;
use crate::results::MixtureFit;
use crate::split_merge::SplitMergeController;
use nalgebra::DMatrix;

/// Gaussian mixture estimator using EM with optional split-and-merge.
pub struct GaussianMixtureEstimator {
    config: GmmConfig,
    /// Sample dimension fixed at construction, if any
    dimension: Option<usize>,
    progress: Box<dyn ProgressReporter>,
    last_fit: Option<MixtureFit>,
}

impl std::fmt::Debug for GaussianMixtureEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GaussianMixtureEstimator")
            .field("config", &self.config)
            .field("dimension", &self.dimension)
            .field("progress", &"dyn ProgressReporter")
            .field("last_fit", &self.last_fit.is_some())
            .finish()
    }
}

impl Default for GaussianMixtureEstimator {
    fn default() -> Self {
        Self::new(GmmConfig::default())
    }
}

impl GaussianMixtureEstimator {
    /// Estimator accepting samples of any dimension.
    pub fn new(config: GmmConfig) -> Self {
        Self {
            config,
            dimension: None,
            progress: Box::new(SilentProgress),
            last_fit: None,
        }
    }

    /// Estimator that rejects samples whose dimension is not `dimension`.
    pub fn with_dimension(config: GmmConfig, dimension: usize) -> Self {
        Self {
            dimension: Some(dimension),
            ..Self::new(config)
        }
    }

    /// Attach a progress reporter (only driven when `report_progress` is set).
    pub fn with_progress(mut self, progress: Box<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Current configuration.
    pub fn config(&self) -> &GmmConfig {
        &self.config
    }

    /// Replace the configuration; the previous fit is discarded.
    pub fn set_config(&mut self, config: GmmConfig) {
        self.config = config;
        self.last_fit = None;
    }

    /// Fixed sample dimension, if one was set.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Result of the last successful call; `None` after a failed one.
    pub fn last_fit(&self) -> Option<&MixtureFit> {
        self.last_fit.as_ref()
    }

    /// Fit the mixture to `data` (one sample per row).
    pub fn estimate(&mut self, data: &DMatrix<f64>) -> GmmResult<MixtureFit> {
        self.last_fit = None;
        self.validate_input(data)?;

        let mut rng = MixtureRng::for_seed(self.config.seed);
        let outcome = initialize_blocks(
            data,
            self.config.number_of_components,
            self.config.jitter,
            &mut rng,
        )
        .and_then(|bank| self.fit(data, bank, &mut rng));
        self.finish(outcome)
    }

    /// Fit the mixture starting from `initial` instead of the block initializer.
    pub fn estimate_from(
        &mut self,
        data: &DMatrix<f64>,
        initial: ComponentBank,
    ) -> GmmResult<MixtureFit> {
        self.last_fit = None;
        self.validate_input(data)?;

        if initial.len() != self.config.number_of_components {
            return Err(GmmError::InvalidParameter {
                parameter: "initial components".to_string(),
                value: initial.len() as f64,
                constraint: format!("== {}", self.config.number_of_components),
            });
        }
        if initial.dimension() != data.ncols() {
            return Err(GmmError::DimensionMismatch {
                expected: data.ncols(),
                actual: initial.dimension(),
            });
        }
        if (initial.alpha_sum() - 1.0).abs() > 1e-6 {
            log::warn!(
                "initial mixing weights sum to {:.6}, EM renormalizes them",
                initial.alpha_sum()
            );
        }

        let mut rng = MixtureRng::for_seed(self.config.seed);
        let outcome = self.fit(data, initial, &mut rng);
        self.finish(outcome)
    }

    fn validate_input(&self, data: &DMatrix<f64>) -> GmmResult<()> {
        let n = data.nrows();
        let m = self.config.number_of_components;
        if m == 0 || m > n {
            return Err(GmmError::InvalidComponentCount {
                requested: m,
                samples: n,
            });
        }
        self.config.validate()?;

        if data.ncols() == 0 {
            return Err(GmmError::InvalidParameter {
                parameter: "dimension".to_string(),
                value: 0.0,
                constraint: ">= 1".to_string(),
            });
        }
        if let Some(expected) = self.dimension {
            if data.ncols() != expected {
                return Err(GmmError::DimensionMismatch {
                    expected,
                    actual: data.ncols(),
                });
            }
        }
        ensure_finite_matrix(data, "samples")
    }

    fn fit(
        &mut self,
        data: &DMatrix<f64>,
        mut bank: ComponentBank,
        rng: &mut MixtureRng,
    ) -> GmmResult<MixtureFit> {
        let config = &self.config;
        let mut silent = SilentProgress;
        let progress: &mut dyn ProgressReporter = if config.report_progress {
            &mut *self.progress
        } else {
            &mut silent
        };

        let mut engine = EmEngine::new(
            data,
            config.number_of_components,
            config.lambda,
            config.emergency_lambda,
        );
        let run = engine.run_to_convergence(&mut bank, config, progress)?;
        let mut q_trace = run.q_trace;

        let (mut engine, split_merge) = if config.use_split_merge {
            let mut controller = SplitMergeController::new(engine, config);
            let summary = controller.run(&mut bank, rng, progress)?;
            q_trace.extend_from_slice(controller.accepted_q());
            (controller.into_engine(), Some(summary))
        } else {
            (engine, None)
        };

        let responsibilities = if config.keep_responsibilities {
            engine.compute_responsibilities(&mut bank)?;
            Some(engine.into_responsibilities())
        } else {
            None
        };

        Ok(MixtureFit {
            components: bank,
            q_trace,
            responsibilities,
            em_iterations: run.iterations,
            converged: run.converged,
            split_merge,
        })
    }

    fn finish(&mut self, outcome: GmmResult<MixtureFit>) -> GmmResult<MixtureFit> {
        match outcome {
            Ok(fit) => {
                log::info!(
                    "fitted {} components: {} EM iterations, final Q = {:?}",
                    fit.num_components(),
                    fit.em_iterations,
                    fit.final_q()
                );
                self.last_fit = Some(fit.clone());
                Ok(fit)
            }
            Err(e) => {
                log::warn!("mixture estimation failed: {}", e);
                Err(e)
            }
        }
    }
}
