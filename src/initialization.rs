//! Initial component placement from contiguous sample blocks.
//!
//! The samples are cut into M consecutive blocks of `⌊N/M⌋` rows (the last
//! block absorbs the remainder). Each block seeds one component: its mean,
//! jittered by a small uniform offset and clipped to the data's bounding
//! box, its sample covariance scaled by `1/M`, and the weight `1/M`.

use crate::component::{ComponentBank, GaussianComponent};
use crate::errors::{GmmError, GmmResult};
use crate::linear_algebra::{all_finite, block_covariance, block_mean, column_bounds};
use crate::random::RandomSource;
use nalgebra::DMatrix;

/// Seed `components` components from consecutive blocks of `data`.
///
/// `jitter` is the fraction of each column's range used as the width of the
/// uniform mean perturbation.
pub fn initialize_blocks(
    data: &DMatrix<f64>,
    components: usize,
    jitter: f64,
    rng: &mut dyn RandomSource,
) -> GmmResult<ComponentBank> {
    let n = data.nrows();
    if components == 0 || components > n {
        return Err(GmmError::InvalidComponentCount {
            requested: components,
            samples: n,
        });
    }

    let (min, max) = column_bounds(data);
    let range = &max - &min;
    let block = n / components;
    let alpha = 1.0 / components as f64;

    let mut seeded = Vec::with_capacity(components);
    for c in 0..components {
        let start = c * block;
        let end = if c + 1 == components { n } else { start + block };

        let mut mean = block_mean(data, start, end);
        let covariance = block_covariance(data, start, end, &mean) / components as f64;
        if !all_finite(&mean, &covariance) {
            return Err(GmmError::divergence(
                "initialization",
                format!("block {} statistics overflowed (rows {}..{})", c, start, end),
            ));
        }

        for j in 0..mean.len() {
            let width = jitter * range[j];
            mean[j] += rng.frand(width) - width / 2.0;
            mean[j] = mean[j].clamp(min[j], max[j]);
        }

        seeded.push(GaussianComponent::new(mean, covariance, alpha)?);
    }

    log::debug!(
        "initialized {} components from blocks of {} samples",
        components,
        block
    );
    ComponentBank::new(seeded)
}
