//! Expectation-Maximization engine for Gaussian mixtures.
//!
//! The engine borrows the sample matrix, owns the responsibility matrix `P`
//! (M×N, one row per component) and the fixed regularizer `λ·I`, and updates
//! a [`ComponentBank`] in place. Two step kinds are provided:
//!
//! - **full step**: E-step over every component followed by the closed-form
//!   M-step for all of them.
//! - **partial step**: the same, restricted to a subset of components. The
//!   restricted rows of `P` are renormalized so that, per sample, they keep
//!   the probability mass they had before the step; the other rows and
//!   components are untouched.
//!
//! Responsibilities are normalized in log space so that samples far away
//! from every component still get well-defined posteriors.

use crate::component::ComponentBank;
use crate::config::GmmConfig;
use crate::errors::{GmmError, GmmResult};
use crate::linear_algebra::{add_weighted_outer, all_finite, sample};
use crate::objective::{full_q, improves, log_sum_exp, restricted_q};
use crate::progress::ProgressReporter;
use nalgebra::{DMatrix, DVector};

/// EM state for one fit: borrowed samples, responsibilities and regularizer.
#[derive(Debug, Clone)]
pub struct EmEngine<'a> {
    data: &'a DMatrix<f64>,
    regularizer: DMatrix<f64>,
    emergency_lambda: f64,
    responsibilities: DMatrix<f64>,
}

/// Outcome of running full EM steps until convergence or budget.
#[derive(Debug, Clone, PartialEq)]
pub struct EmRun {
    /// Q after every full step
    pub q_trace: Vec<f64>,
    /// Number of full steps performed
    pub iterations: usize,
    /// Whether Q stopped improving before the budget ran out
    pub converged: bool,
}

impl<'a> EmEngine<'a> {
    /// Create an engine for `components` components over `data` (one sample per row).
    pub fn new(data: &'a DMatrix<f64>, components: usize, lambda: f64, emergency_lambda: f64) -> Self {
        let dim = data.ncols();
        let n = data.nrows();
        Self {
            data,
            regularizer: DMatrix::identity(dim, dim) * lambda,
            emergency_lambda,
            responsibilities: DMatrix::from_element(components, n, 1.0 / components.max(1) as f64),
        }
    }

    /// The sample matrix this engine works on.
    pub fn data(&self) -> &'a DMatrix<f64> {
        self.data
    }

    /// Current responsibility matrix (M×N).
    pub fn responsibilities(&self) -> &DMatrix<f64> {
        &self.responsibilities
    }

    /// Replace the responsibility matrix, e.g. when rolling back a trial.
    pub fn restore_responsibilities(&mut self, responsibilities: DMatrix<f64>) {
        self.responsibilities = responsibilities;
    }

    /// Consume the engine, returning the responsibility matrix.
    pub fn into_responsibilities(self) -> DMatrix<f64> {
        self.responsibilities
    }

    /// E-step over all components: refresh every likelihood cache, then
    /// recompute `P` so that each column sums to one.
    pub fn compute_responsibilities(&mut self, bank: &mut ComponentBank) -> GmmResult<()> {
        bank.refresh_all(self.emergency_lambda)?;
        let all: Vec<usize> = (0..bank.len()).collect();
        for i in 0..self.data.nrows() {
            self.assign_sample(bank, &all, i, 1.0)?;
        }
        Ok(())
    }

    /// E-step restricted to `indices`: each sample's mass over those rows is
    /// redistributed among them by their weighted densities.
    fn compute_partial_responsibilities(
        &mut self,
        bank: &mut ComponentBank,
        indices: &[usize],
    ) -> GmmResult<()> {
        bank.refresh(indices, self.emergency_lambda)?;
        for i in 0..self.data.nrows() {
            let mass: f64 = indices.iter().map(|&l| self.responsibilities[(l, i)]).sum();
            self.assign_sample(bank, indices, i, mass)?;
        }
        Ok(())
    }

    fn assign_sample(
        &mut self,
        bank: &ComponentBank,
        indices: &[usize],
        i: usize,
        mass: f64,
    ) -> GmmResult<()> {
        let x = sample(self.data, i);
        let log_weights: Vec<f64> = indices
            .iter()
            .map(|&l| bank[l].alpha.ln() + bank[l].log_density(&x))
            .collect();
        let norm = log_sum_exp(&log_weights);

        if norm.is_nan() || norm == f64::INFINITY {
            return Err(GmmError::divergence(
                "E-step",
                format!("likelihood of sample {} is {}", i, norm),
            ));
        }

        if norm == f64::NEG_INFINITY {
            // no component carries weight here, share the mass evenly
            let share = mass / indices.len() as f64;
            for &l in indices {
                self.responsibilities[(l, i)] = share;
            }
        } else {
            for (&l, lw) in indices.iter().zip(&log_weights) {
                self.responsibilities[(l, i)] = mass * (lw - norm).exp();
            }
        }
        Ok(())
    }

    /// M-step for the listed components, followed by a cache refresh.
    fn maximize(&self, bank: &mut ComponentBank, indices: &[usize]) -> GmmResult<()> {
        let n = self.data.nrows();
        let dim = self.data.ncols();

        for &l in indices {
            let count: f64 = self.responsibilities.row(l).sum();

            let mut mean = bank[l].mean.clone();
            if count > f64::MIN_POSITIVE {
                let mut weighted = DVector::zeros(dim);
                for i in 0..n {
                    let p = self.responsibilities[(l, i)];
                    if p != 0.0 {
                        weighted.axpy(p, &sample(self.data, i), 1.0);
                    }
                }
                mean = weighted / count;
            }

            let mut covariance = self.regularizer.clone();
            for i in 0..n {
                let p = self.responsibilities[(l, i)];
                if p != 0.0 {
                    let diff = sample(self.data, i) - &mean;
                    add_weighted_outer(&mut covariance, &diff, p);
                }
            }
            covariance /= count + 1.0;
            if !all_finite(&mean, &covariance) {
                return Err(GmmError::divergence(
                    "M-step",
                    format!("component {} parameters overflowed", l),
                ));
            }

            bank[l].set_parameters(mean, covariance, count / n as f64);
        }

        bank.refresh(indices, self.emergency_lambda)?;
        Ok(())
    }

    /// One E-step and M-step over all components without evaluating Q.
    pub fn em_step(&mut self, bank: &mut ComponentBank) -> GmmResult<()> {
        self.compute_responsibilities(bank)?;
        let all: Vec<usize> = (0..bank.len()).collect();
        self.maximize(bank, &all)
    }

    /// One full EM step; returns Q of the updated bank.
    pub fn full_step(&mut self, bank: &mut ComponentBank) -> GmmResult<f64> {
        self.em_step(bank)?;
        let q = full_q(bank, self.data, &self.responsibilities);
        if q.is_nan() {
            return Err(GmmError::divergence("full EM step", "Q is NaN"));
        }
        Ok(q)
    }

    /// One EM step restricted to `indices`; returns the restricted Q.
    pub fn partial_step(&mut self, bank: &mut ComponentBank, indices: &[usize]) -> GmmResult<f64> {
        self.compute_partial_responsibilities(bank, indices)?;
        self.maximize(bank, indices)?;
        let q = restricted_q(indices, bank, self.data, &self.responsibilities);
        if q.is_nan() {
            return Err(GmmError::divergence("partial EM step", "restricted Q is NaN"));
        }
        Ok(q)
    }

    /// Q of `bank` under the current responsibilities.
    pub fn q(&self, bank: &ComponentBank) -> GmmResult<f64> {
        let q = full_q(bank, self.data, &self.responsibilities);
        if q.is_nan() {
            return Err(GmmError::divergence("objective evaluation", "Q is NaN"));
        }
        Ok(q)
    }

    /// Run full EM steps until Q stops improving by more than the configured
    /// tolerance or the iteration budget is spent.
    pub fn run_to_convergence(
        &mut self,
        bank: &mut ComponentBank,
        config: &GmmConfig,
        progress: &mut dyn ProgressReporter,
    ) -> GmmResult<EmRun> {
        progress.reset();
        progress.set_max_steps(config.iterations);

        let mut q_trace = Vec::with_capacity(config.iterations);
        let mut previous: Option<f64> = None;
        let mut converged = false;

        for iteration in 0..config.iterations {
            let q = self.full_step(bank)?;
            progress.step("iterations");
            log::debug!("EM iteration {}: Q = {:.6}", iteration + 1, q);
            q_trace.push(q);

            if let Some(prev) = previous {
                if !converged && !improves(q, prev, config.convergence_tolerance) {
                    converged = true;
                    if !config.force_iterations {
                        break;
                    }
                }
            }
            previous = Some(q);
        }

        if !converged {
            log::warn!(
                "EM did not converge within {} iterations (last Q = {:?})",
                config.iterations,
                q_trace.last()
            );
        }

        Ok(EmRun {
            iterations: q_trace.len(),
            q_trace,
            converged,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::GaussianComponent;
    use crate::progress::SilentProgress;
    use assert_approx_eq::assert_approx_eq;

    fn clustered_data() -> DMatrix<f64> {
        let mut rows = Vec::new();
        for k in 0..20 {
            let t = k as f64 * 0.05;
            rows.extend_from_slice(&[t, -t]);
            rows.extend_from_slice(&[6.0 + t, 5.0 - t]);
        }
        DMatrix::from_row_slice(40, 2, &rows)
    }

    fn rough_bank() -> ComponentBank {
        ComponentBank::new(vec![
            GaussianComponent::spherical(DVector::from_vec(vec![1.0, 1.0]), 2.0, 0.5).unwrap(),
            GaussianComponent::spherical(DVector::from_vec(vec![4.0, 4.0]), 2.0, 0.5).unwrap(),
        ])
        .unwrap()
    }

    #[test]
    fn test_responsibilities_sum_to_one() {
        let data = clustered_data();
        let mut bank = rough_bank();
        let mut engine = EmEngine::new(&data, 2, 0.1, 0.1);
        engine.compute_responsibilities(&mut bank).unwrap();

        let p = engine.responsibilities();
        for i in 0..data.nrows() {
            assert_approx_eq!(p.column(i).sum(), 1.0, 1e-9);
        }
    }

    #[test]
    fn test_full_steps_increase_q_and_keep_alphas_normalized() {
        let data = clustered_data();
        let mut bank = rough_bank();
        let mut engine = EmEngine::new(&data, 2, 0.1, 0.1);

        let mut previous = f64::NEG_INFINITY;
        for _ in 0..10 {
            let q = engine.full_step(&mut bank).unwrap();
            let slack = 1e-3 * previous.abs().max(1.0);
            assert!(q >= previous - slack, "Q decreased: {} -> {}", previous, q);
            assert_approx_eq!(bank.alpha_sum(), 1.0, 1e-9);
            previous = q;
        }
        assert!(bank[0].mean[0] < 1.0);
        assert!(bank[1].mean[0] > 5.0);
    }

    #[test]
    fn test_partial_step_preserves_subset_mass() {
        let data = clustered_data();
        let mut bank = ComponentBank::new(vec![
            GaussianComponent::spherical(DVector::from_vec(vec![0.5, -0.5]), 1.0, 0.4).unwrap(),
            GaussianComponent::spherical(DVector::from_vec(vec![3.0, 3.0]), 1.0, 0.3).unwrap(),
            GaussianComponent::spherical(DVector::from_vec(vec![6.5, 4.5]), 1.0, 0.3).unwrap(),
        ])
        .unwrap();
        let mut engine = EmEngine::new(&data, 3, 0.1, 0.1);
        engine.compute_responsibilities(&mut bank).unwrap();

        let before = engine.responsibilities().clone();
        let untouched = bank[0].clone();

        engine.partial_step(&mut bank, &[1, 2]).unwrap();
        let after = engine.responsibilities();

        for i in 0..data.nrows() {
            let mass_before = before[(1, i)] + before[(2, i)];
            let mass_after = after[(1, i)] + after[(2, i)];
            assert_approx_eq!(mass_before, mass_after, 1e-12);
            assert_eq!(before[(0, i)], after[(0, i)]);
        }
        assert_eq!(bank[0], untouched);

        let n = data.nrows();
        let subset_mass: f64 = (0..n).map(|i| before[(1, i)] + before[(2, i)]).sum();
        assert_approx_eq!(bank[1].alpha + bank[2].alpha, subset_mass / n as f64, 1e-12);
    }

    #[test]
    fn test_empty_component_keeps_mean() {
        let data = clustered_data();
        let mut bank = ComponentBank::new(vec![
            GaussianComponent::spherical(DVector::from_vec(vec![3.0, 2.0]), 4.0, 1.0).unwrap(),
            GaussianComponent::spherical(DVector::from_vec(vec![500.0, 500.0]), 0.01, 0.0).unwrap(),
        ])
        .unwrap();
        let mut engine = EmEngine::new(&data, 2, 0.1, 0.1);
        engine.full_step(&mut bank).unwrap();

        assert_eq!(bank[1].alpha, 0.0);
        assert_eq!(bank[1].mean[0], 500.0);
        assert_approx_eq!(bank[1].covariance[(0, 0)], 0.1, 1e-12);
    }

    #[test]
    fn test_run_to_convergence_records_trace() {
        let data = clustered_data();
        let mut bank = rough_bank();
        let mut engine = EmEngine::new(&data, 2, 0.1, 0.1);
        let config = GmmConfig::plain(2).with_iterations(200);

        let run = engine
            .run_to_convergence(&mut bank, &config, &mut SilentProgress)
            .unwrap();
        assert!(run.converged);
        assert_eq!(run.iterations, run.q_trace.len());
        assert!(run.iterations < 200);
    }

    #[test]
    fn test_forced_iterations_use_whole_budget() {
        let data = clustered_data();
        let mut bank = rough_bank();
        let mut engine = EmEngine::new(&data, 2, 0.1, 0.1);
        let config = GmmConfig::plain(2).with_iterations(30).with_forced_iterations();

        let run = engine
            .run_to_convergence(&mut bank, &config, &mut SilentProgress)
            .unwrap();
        assert_eq!(run.iterations, 30);
    }
}
