//! Invariants of the EM engine and the split-and-merge controller.
//!
//! Responsibilities stay normalized, mixing weights sum to one, Q does not
//! fall across full steps, rejected trials leave no trace, and seeding makes
//! everything reproducible.

use assert_approx_eq::assert_approx_eq;
use nalgebra::{DMatrix, DVector};
use smem_gmm::em_core::EmEngine;
use smem_gmm::generators::generate_gaussian_mixture;
use smem_gmm::initialization::initialize_blocks;
use smem_gmm::split_merge::{rank_candidates, SplitMergeController};
use smem_gmm::*;

fn three_cluster_data() -> DMatrix<f64> {
    let means = vec![
        DVector::from_vec(vec![0.0, 0.0]),
        DVector::from_vec(vec![6.0, 1.0]),
        DVector::from_vec(vec![2.0, 7.0]),
    ];
    let covs = vec![
        DMatrix::from_row_slice(2, 2, &[1.0, 0.3, 0.3, 0.5]),
        DMatrix::identity(2, 2) * 0.7,
        DMatrix::from_row_slice(2, 2, &[0.4, -0.1, -0.1, 1.2]),
    ];
    generate_gaussian_mixture(&means, &covs, &[80, 60, 60], Some(2024)).unwrap()
}

fn initial_bank(data: &DMatrix<f64>, m: usize, seed: u64) -> ComponentBank {
    let mut rng = MixtureRng::with_seed(seed);
    initialize_blocks(data, m, 0.1, &mut rng).unwrap()
}

#[test]
fn test_responsibilities_and_weights_stay_normalized() {
    let data = three_cluster_data();
    let mut bank = initial_bank(&data, 4, 1);
    let mut engine = EmEngine::new(&data, 4, 0.1, 0.1);

    for _ in 0..25 {
        engine.full_step(&mut bank).unwrap();
        let p = engine.responsibilities();
        for i in 0..data.nrows() {
            assert_approx_eq!(p.column(i).sum(), 1.0, 1e-6);
        }
        assert_approx_eq!(bank.alpha_sum(), 1.0, 1e-6);
        assert!(p.iter().all(|&v| (0.0..=1.0 + 1e-12).contains(&v)));
    }
}

#[test]
fn test_q_does_not_decrease_across_full_steps() {
    let data = three_cluster_data();
    let mut bank = initial_bank(&data, 3, 7);
    let mut engine = EmEngine::new(&data, 3, 0.1, 0.1);

    let mut previous = engine.full_step(&mut bank).unwrap();
    for step in 0..40 {
        let q = engine.full_step(&mut bank).unwrap();
        let slack = 1e-3 * previous.abs().max(1.0);
        assert!(
            q >= previous - slack,
            "step {}: Q fell from {} to {}",
            step,
            previous,
            q
        );
        previous = q;
    }
}

#[test]
fn test_partial_steps_keep_columns_normalized() {
    let data = three_cluster_data();
    let mut bank = initial_bank(&data, 4, 3);
    let mut engine = EmEngine::new(&data, 4, 0.1, 0.1);
    // weights must match the responsibilities before a subset is updated
    engine.full_step(&mut bank).unwrap();

    for _ in 0..10 {
        let q = engine.partial_step(&mut bank, &[0, 2, 3]).unwrap();
        assert!(q.is_finite());
        let p = engine.responsibilities();
        for i in 0..data.nrows() {
            assert_approx_eq!(p.column(i).sum(), 1.0, 1e-9);
        }
        assert_approx_eq!(bank.alpha_sum(), 1.0, 1e-9);
    }
}

#[test]
fn test_fixed_point_is_reached() {
    let data = three_cluster_data();
    let config = GmmConfig::plain(3).with_seed(1);
    let mut bank = initial_bank(&data, 3, 1);
    let mut engine = EmEngine::new(&data, 3, config.lambda, config.emergency_lambda);

    let run = engine
        .run_to_convergence(&mut bank, &config, &mut SilentProgress)
        .unwrap();
    assert!(run.converged);
    assert!(run.iterations < config.iterations);

    // one more step barely moves Q
    let last = *run.q_trace.last().unwrap();
    let next = engine.full_step(&mut bank).unwrap();
    assert!((next - last).abs() <= 1e-6 * last.abs().max(1.0));
}

#[test]
fn test_rejected_trials_roll_back_exactly() {
    let data = three_cluster_data();
    let config = GmmConfig::split_merge(4).with_seed(5);
    let mut bank = initial_bank(&data, 4, 5);
    let mut engine = EmEngine::new(&data, 4, config.lambda, config.emergency_lambda);
    engine
        .run_to_convergence(&mut bank, &config, &mut SilentProgress)
        .unwrap();
    engine.compute_responsibilities(&mut bank).unwrap();

    let candidates = rank_candidates(&bank, &data, engine.responsibilities());
    assert_eq!(candidates.len(), 6 * 2);

    let bank_before = bank.clone();
    let p_before = engine.responsibilities().clone();
    let mut controller = SplitMergeController::new(engine, &config);
    let mut rng = MixtureRng::with_seed(5);

    for candidate in candidates.iter().take(3) {
        let outcome = controller
            .trial(&mut bank, candidate, f64::MAX, &mut rng, &mut SilentProgress)
            .unwrap();
        assert!(outcome.is_none());
        assert_eq!(bank, bank_before);
    }
    let engine = controller.into_engine();
    assert_eq!(engine.responsibilities(), &p_before);
}

#[test]
fn test_split_merge_rounds_end_with_a_rejecting_pass() {
    let data = three_cluster_data();
    let mut estimator = GaussianMixtureEstimator::new(GmmConfig::split_merge(3).with_seed(17));
    let fit = estimator.estimate(&data).unwrap();

    let accepted = &fit.q_trace[fit.em_iterations..];
    assert!(accepted.iter().all(|q| q.is_finite()));
    let summary = fit.split_merge.unwrap();
    assert_eq!(accepted.len(), summary.accepted);
    assert_eq!(summary.rounds, summary.accepted + 1);
    assert!(summary.trials <= summary.rounds * 5);
    assert_approx_eq!(fit.alphas().iter().sum::<f64>(), 1.0, 1e-6);
}

#[test]
fn test_global_seed_makes_unseeded_fits_reproducible() {
    let data = three_cluster_data();
    global_seed(314);
    let mut a = GaussianMixtureEstimator::new(GmmConfig::split_merge(3));
    let mut b = GaussianMixtureEstimator::new(GmmConfig::split_merge(3));
    let fit_a = a.estimate(&data).unwrap();
    let fit_b = b.estimate(&data).unwrap();
    clear_global_seed();

    assert_eq!(fit_a, fit_b);
}

#[test]
fn test_split_merge_progress_protocol() {
    use std::sync::{Arc, Mutex};

    struct Shared(Arc<Mutex<Vec<String>>>);

    impl ProgressReporter for Shared {
        fn reset(&mut self) {
            self.0.lock().unwrap().push("reset".into());
        }
        fn set_max_steps(&mut self, steps: usize) {
            self.0.lock().unwrap().push(format!("max {}", steps));
        }
        fn step(&mut self, label: &str) {
            self.0.lock().unwrap().push(label.into());
        }
    }

    let data = three_cluster_data();
    let events = Arc::new(Mutex::new(Vec::new()));
    let config = GmmConfig::split_merge(3)
        .with_seed(8)
        .with_c_max(2)
        .with_progress_reporting();
    let max = format!("max {}", config.split_merge_steps());
    let mut estimator = GaussianMixtureEstimator::new(config)
        .with_progress(Box::new(Shared(Arc::clone(&events))));
    let fit = estimator.estimate(&data).unwrap();
    let summary = fit.split_merge.unwrap();

    let events = events.lock().unwrap();
    let resets = events.iter().filter(|e| *e == "reset").count();
    let passes = events.iter().filter(|e| **e == max).count();
    assert_eq!(resets, 1 + summary.rounds);
    assert_eq!(passes, summary.rounds);

    let full_steps = events.iter().filter(|e| *e == "full step").count();
    let partial_steps = events.iter().filter(|e| *e == "partial step").count();
    if summary.trials > 0 {
        assert!(full_steps >= 2 * summary.trials);
        assert!(partial_steps >= summary.trials);
    }
    let em_steps = events.iter().filter(|e| *e == "iterations").count();
    assert_eq!(em_steps, fit.em_iterations);
}
