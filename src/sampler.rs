//! Weighted sampling and the exact-proportion queue
//!
//! Both take the random source as an argument so sessions stay reproducible
//! under a seeded generator.

use crate::distribution::Distribution;
use crate::error::ConfigError;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::VecDeque;

/// Guard against `len * p` landing a hair under an integer.
const FLOOR_EPSILON: f64 = 1e-9;

/// Sum weights, rejecting negative or non-finite entries and a non-positive total.
fn checked_total(weights: impl Iterator<Item = f64>) -> Result<f64, ConfigError> {
    let mut total = 0.0;
    for w in weights {
        if !w.is_finite() || w < 0.0 {
            return Err(ConfigError::NonPositiveWeight { total: w });
        }
        total += w;
    }
    if total <= 0.0 {
        return Err(ConfigError::NonPositiveWeight { total });
    }
    Ok(total)
}

/// Draw an index with probability proportional to its weight.
///
/// Weights need not be normalized.
pub fn sample_index<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Result<usize, ConfigError> {
    let total = checked_total(weights.iter().copied())?;
    let draw = rng.gen_range(0.0..total);

    let mut cumulative = 0.0;
    let mut last_positive = 0;
    for (i, &w) in weights.iter().enumerate() {
        if w > 0.0 {
            last_positive = i;
        }
        cumulative += w;
        if cumulative > draw {
            return Ok(i);
        }
    }
    // Rounding left the draw past the final cumulative sum.
    Ok(last_positive)
}

/// Draw an item from `(item, weight)` pairs.
pub fn sample_weighted<T: Clone, R: Rng + ?Sized>(
    items: &[(T, f64)],
    rng: &mut R,
) -> Result<T, ConfigError> {
    let weights: Vec<f64> = items.iter().map(|(_, w)| *w).collect();
    let idx = sample_index(&weights, rng)?;
    Ok(items[idx].0.clone())
}

/// Shuffled sequence of positions with literal per-position counts.
///
/// Position `i` appears `floor(len * p_i)` times. Leftover slots go to the
/// positions with the largest fractional remainders (lower index first on
/// ties), cycling through that order if more slots remain than positions.
#[derive(Clone, Debug, Default)]
pub struct ProportionQueue {
    queue: VecDeque<usize>,
}

impl ProportionQueue {
    /// Positions in canonical (unshuffled) order.
    pub fn counts(len: usize, dist: &Distribution) -> Vec<usize> {
        let exact: Vec<f64> = dist.weights().iter().map(|p| len as f64 * p).collect();
        let mut counts: Vec<usize> = exact
            .iter()
            .map(|x| (x + FLOOR_EPSILON).floor() as usize)
            .collect();

        let assigned: usize = counts.iter().sum();
        let mut remaining = len.saturating_sub(assigned);
        if remaining > 0 {
            let mut order: Vec<usize> = (0..counts.len()).collect();
            let frac = |i: usize| exact[i] - counts[i] as f64;
            let fracs: Vec<f64> = order.iter().map(|&i| frac(i)).collect();
            order.sort_by(|&a, &b| fracs[b].total_cmp(&fracs[a]).then(a.cmp(&b)));
            for &i in order.iter().cycle() {
                if remaining == 0 {
                    break;
                }
                counts[i] += 1;
                remaining -= 1;
            }
        }
        counts
    }

    /// Build and shuffle a queue for a bundle of `len` trials.
    pub fn build<R: Rng + ?Sized>(len: usize, dist: &Distribution, rng: &mut R) -> Self {
        let mut positions: Vec<usize> = Self::counts(len, dist)
            .into_iter()
            .enumerate()
            .flat_map(|(pos, n)| std::iter::repeat(pos).take(n))
            .collect();
        positions.shuffle(rng);
        Self {
            queue: positions.into(),
        }
    }

    /// Take the next position.
    pub fn pop(&mut self) -> Option<usize> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
