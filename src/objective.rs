//! The EM objective Q and small numeric helpers shared by the engine.
//!
//! `Q = Σ_l Σ_i P[l][i] · (ln alpha_l + ln N(x_i; mu_l, Sigma_l))`, the
//! expected complete-data log-likelihood under the responsibilities `P`.

use crate::component::{ComponentBank, GaussianComponent};
use crate::linear_algebra::sample;
use nalgebra::DMatrix;

/// Q over all components.
pub fn full_q(bank: &ComponentBank, data: &DMatrix<f64>, responsibilities: &DMatrix<f64>) -> f64 {
    let all: Vec<usize> = (0..bank.len()).collect();
    restricted_q(&all, bank, data, responsibilities)
}

/// Q restricted to the responsibility rows named by `indices`.
///
/// Returns NaN as soon as any term is NaN.
pub fn restricted_q(
    indices: &[usize],
    bank: &ComponentBank,
    data: &DMatrix<f64>,
    responsibilities: &DMatrix<f64>,
) -> f64 {
    let mut q = 0.0;
    for &l in indices {
        let term = component_q(&bank[l], l, data, responsibilities);
        if term.is_nan() {
            return f64::NAN;
        }
        q += term;
    }
    q
}

fn component_q(
    component: &GaussianComponent,
    l: usize,
    data: &DMatrix<f64>,
    responsibilities: &DMatrix<f64>,
) -> f64 {
    let log_alpha = component.alpha.ln();
    let mut q = 0.0;
    for i in 0..data.nrows() {
        let p = responsibilities[(l, i)];
        if p == 0.0 {
            continue;
        }
        let term = p * (log_alpha + component.log_density(&sample(data, i)));
        if term.is_nan() {
            return f64::NAN;
        }
        q += term;
    }
    q
}

/// True when `new` beats `old` by more than `tolerance`, relative to `max(|old|, 1)`.
pub fn improves(new: f64, old: f64, tolerance: f64) -> bool {
    new > old + tolerance * old.abs().max(1.0)
}

/// Numerically stable `ln Σ exp(v)`.
///
/// Returns `-inf` for an empty slice or when every value is `-inf`.
pub fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY || !max.is_finite() {
        return max;
    }
    let sum: f64 = values.iter().map(|v| (v - max).exp()).sum();
    max + sum.ln()
}
