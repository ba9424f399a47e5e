//! Split-and-merge refinement of a converged mixture.
//!
//! Plain EM tends to get stuck with two components sharing one cluster while
//! another cluster is covered by a single, overly wide component. Each trial
//! merges the two most similar components into one slot and splits the most
//! overloaded component into the freed slot, re-optimizes, and keeps the
//! result only if the global Q improves.
//!
//! Trial sequence for one candidate `(a, b, k)`:
//!
//! 1. snapshot the bank and the responsibilities
//! 2. merge `a` and `b` into slot `a`, split `k` into slots `b` and `k`
//! 3. partial EM on `{a, b, k}` while the restricted Q increases
//! 4. full EM while Q increases
//! 5. accept if Q beats the pre-trial Q, otherwise restore the snapshot
//!
//! After an acceptance the candidates are ranked again; the refinement ends
//! after a ranking pass in which no trial is accepted.

use crate::component::ComponentBank;
use crate::config::GmmConfig;
use crate::em_core::EmEngine;
use crate::errors::GmmResult;
use crate::linear_algebra::{lu_determinant, sample};
use crate::objective::improves;
use crate::progress::ProgressReporter;
use crate::random::RandomSource;
use crate::results::SplitMergeSummary;
use nalgebra::{DMatrix, DVector};

/// Component indices considered together in one trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    /// Merge target, receives the merged component
    pub merge_a: usize,
    /// Merged away, receives one half of the split
    pub merge_b: usize,
    /// Split source, keeps the other half
    pub split: usize,
}

impl Candidate {
    /// Distinct indices touched by the trial, ascending.
    pub fn indices(&self) -> Vec<usize> {
        let mut indices = vec![self.merge_a, self.merge_b, self.split];
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}

/// Merge criterion: inner product of two responsibility rows.
pub fn merge_score(responsibilities: &DMatrix<f64>, a: usize, b: usize) -> f64 {
    responsibilities.row(a).dot(&responsibilities.row(b))
}

/// Split criterion for component `k`: the Kullback-Leibler divergence between
/// the component's density and the local data density it is responsible for.
///
/// Components with no mass or a non-finite score get `f64::MIN`.
pub fn split_score(
    bank: &ComponentBank,
    data: &DMatrix<f64>,
    responsibilities: &DMatrix<f64>,
    k: usize,
) -> f64 {
    let mass: f64 = responsibilities.row(k).sum();
    if mass <= f64::MIN_POSITIVE {
        return f64::MIN;
    }
    let log_mass = mass.ln();

    let mut score = 0.0;
    for i in 0..data.nrows() {
        let p = responsibilities[(k, i)];
        if p > 0.0 {
            // ln(p / (density · mass)) evaluated in log space
            score += p * (p.ln() - bank[k].log_density(&sample(data, i)) - log_mass);
        }
    }
    score /= mass;

    if score.is_finite() {
        score
    } else {
        f64::MIN
    }
}

/// Candidate list ordered by merge score (outer) and split score (inner).
///
/// With two components the only candidate merges both and re-splits the
/// result; a single component yields no candidates.
pub fn rank_candidates(
    bank: &ComponentBank,
    data: &DMatrix<f64>,
    responsibilities: &DMatrix<f64>,
) -> Vec<Candidate> {
    let m = bank.len();
    if m < 2 {
        return Vec::new();
    }
    if m == 2 {
        return vec![Candidate {
            merge_a: 0,
            merge_b: 1,
            split: 0,
        }];
    }

    let mut merges: Vec<(usize, usize, f64)> = Vec::with_capacity(m * (m - 1) / 2);
    for a in 0..m {
        for b in (a + 1)..m {
            merges.push((a, b, merge_score(responsibilities, a, b)));
        }
    }
    merges.sort_by(|x, y| y.2.total_cmp(&x.2));

    let mut splits: Vec<(usize, f64)> = (0..m)
        .map(|k| (k, split_score(bank, data, responsibilities, k)))
        .collect();
    splits.sort_by(|x, y| y.1.total_cmp(&x.1));

    let mut candidates = Vec::with_capacity(merges.len() * (m - 2));
    for &(a, b, _) in &merges {
        for &(k, _) in &splits {
            if k != a && k != b {
                candidates.push(Candidate {
                    merge_a: a,
                    merge_b: b,
                    split: k,
                });
            }
        }
    }
    candidates
}

/// Replace the candidate's components by the merged and split seeds.
///
/// `epsilon` scales the random mean offsets of the split halves;
/// `emergency_lambda` is the fallback variance when the split source's
/// covariance has no usable determinant.
pub fn reseed(
    bank: &mut ComponentBank,
    candidate: &Candidate,
    epsilon: f64,
    emergency_lambda: f64,
    rng: &mut dyn RandomSource,
) {
    let Candidate {
        merge_a: a,
        merge_b: b,
        split: k,
    } = *candidate;

    let alpha = bank[a].alpha + bank[b].alpha;
    let (wa, wb) = if alpha > 0.0 {
        (bank[a].alpha / alpha, bank[b].alpha / alpha)
    } else {
        (0.5, 0.5)
    };
    let mean = &bank[a].mean * wa + &bank[b].mean * wb;
    let covariance = &bank[a].covariance * wa + &bank[b].covariance * wb;
    bank[a].set_parameters(mean, covariance, alpha);

    let source = bank[k].clone();
    let dim = source.dimension();
    let det = lu_determinant(&source.covariance);
    let variance = if det > 0.0 && det.is_finite() {
        det.powf(1.0 / dim as f64)
    } else {
        emergency_lambda
    };
    let covariance = DMatrix::identity(dim, dim) * variance;
    let half = source.alpha / 2.0;

    let offset_b = perturbation(&source.mean, epsilon, rng);
    let offset_k = perturbation(&source.mean, epsilon, rng);
    bank[b].set_parameters(&source.mean + offset_b, covariance.clone(), half);
    bank[k].set_parameters(&source.mean + offset_k, covariance, half);
}

fn perturbation(mean: &DVector<f64>, epsilon: f64, rng: &mut dyn RandomSource) -> DVector<f64> {
    mean.map(|mu| {
        let width = mu.abs();
        (rng.frand(width) - width / 2.0) * epsilon
    })
}

/// Drives split-and-merge trials over an [`EmEngine`].
#[derive(Debug)]
pub struct SplitMergeController<'a, 'c> {
    engine: EmEngine<'a>,
    config: &'c GmmConfig,
    accepted_q: Vec<f64>,
}

impl<'a, 'c> SplitMergeController<'a, 'c> {
    /// Wrap an engine whose bank has already been fitted by plain EM.
    pub fn new(engine: EmEngine<'a>, config: &'c GmmConfig) -> Self {
        Self {
            engine,
            config,
            accepted_q: Vec::new(),
        }
    }

    /// Q of every accepted trial, in order.
    pub fn accepted_q(&self) -> &[f64] {
        &self.accepted_q
    }

    /// Release the engine, e.g. to read the final responsibilities.
    pub fn into_engine(self) -> EmEngine<'a> {
        self.engine
    }

    /// Run ranking passes until one accepts nothing.
    pub fn run(
        &mut self,
        bank: &mut ComponentBank,
        rng: &mut dyn RandomSource,
        progress: &mut dyn ProgressReporter,
    ) -> GmmResult<SplitMergeSummary> {
        let mut summary = SplitMergeSummary::default();

        loop {
            summary.rounds += 1;
            progress.reset();
            progress.set_max_steps(self.config.split_merge_steps());

            self.engine.compute_responsibilities(bank)?;
            let old_q = self.engine.q(bank)?;
            let candidates =
                rank_candidates(bank, self.engine.data(), self.engine.responsibilities());

            let mut accepted = false;
            for candidate in candidates.iter().take(self.config.c_max) {
                summary.trials += 1;
                if let Some(q) = self.trial(bank, candidate, old_q, rng, progress)? {
                    log::info!(
                        "split-and-merge accepted {:?}: Q {:.6} -> {:.6}",
                        candidate,
                        old_q,
                        q
                    );
                    self.accepted_q.push(q);
                    summary.accepted += 1;
                    accepted = true;
                    break;
                }
            }

            if !accepted {
                break;
            }
        }

        log::debug!(
            "split-and-merge finished: {} rounds, {} trials, {} accepted",
            summary.rounds,
            summary.trials,
            summary.accepted
        );
        Ok(summary)
    }

    /// One trial; returns the new Q if accepted. A rejected trial leaves the
    /// bank and the responsibilities exactly as they were.
    pub fn trial(
        &mut self,
        bank: &mut ComponentBank,
        candidate: &Candidate,
        old_q: f64,
        rng: &mut dyn RandomSource,
        progress: &mut dyn ProgressReporter,
    ) -> GmmResult<Option<f64>> {
        let snapshot = bank.clone();
        let responsibilities = self.engine.responsibilities().clone();

        reseed(
            bank,
            candidate,
            self.config.epsilon,
            self.config.emergency_lambda,
            rng,
        );

        let indices = candidate.indices();
        let mut previous = f64::MIN;
        let mut current = f64::MIN / 2.0;
        let mut iteration = 0;
        while iteration < self.config.partial_iterations && current > previous {
            previous = current;
            current = self.engine.partial_step(bank, &indices)?;
            progress.step("partial step");
            iteration += 1;
        }

        let mut previous = f64::MIN;
        let mut q = f64::MIN / 2.0;
        let mut iteration = 0;
        while iteration < self.config.iterations && q > previous {
            previous = q;
            q = self.engine.full_step(bank)?;
            progress.step("full step");
            iteration += 1;
        }

        if improves(q, old_q, self.config.convergence_tolerance) {
            Ok(Some(q))
        } else {
            log::debug!("rejected {:?}: Q {:.6} <= {:.6}", candidate, q, old_q);
            *bank = snapshot;
            self.engine.restore_responsibilities(responsibilities);
            Ok(None)
        }
    }
}
