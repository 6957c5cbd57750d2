//! Distributions, context keys, and distractor counts
//!
//! A context is identified by its hole distribution quantized to hundredths.
//! Each probability is stored as an integer from 0 to 100, the same fixed-point
//! scale the novel distributions are drawn at, so two distributions share a key
//! exactly when they agree to two decimals.

use crate::error::ConfigError;
use rand::Rng;
use rand_distr::Dirichlet;
use std::collections::BTreeMap;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Fixed-point scale for context keys.
pub const KEY_SCALE: f64 = 100.0;

/// Allowed drift of the weight sum from 1 before renormalizing.
const SUM_TOLERANCE: f64 = 1e-6;

/// Probability of the target appearing at each hole.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "Vec<f64>", into = "Vec<f64>"))]
pub struct Distribution {
    weights: Vec<f64>,
}

impl Distribution {
    /// Create from nonnegative weights, renormalizing if the sum is off.
    pub fn new(weights: Vec<f64>) -> Result<Self, ConfigError> {
        if weights.is_empty() {
            return Err(ConfigError::EmptyDistribution);
        }
        let mut total = 0.0;
        for &w in &weights {
            if !w.is_finite() || w < 0.0 {
                return Err(ConfigError::NonPositiveWeight { total: w });
            }
            total += w;
        }
        if total <= 0.0 {
            return Err(ConfigError::NonPositiveWeight { total });
        }

        let weights = if (total - 1.0).abs() > SUM_TOLERANCE {
            weights.into_iter().map(|w| w / total).collect()
        } else {
            weights
        };
        Ok(Self { weights })
    }

    /// Uniform distribution over `n` holes.
    pub fn uniform(n: usize) -> Result<Self, ConfigError> {
        Self::new(vec![1.0; n])
    }

    /// Create from integer hundredths that already sum to 100.
    fn from_hundredths(hundredths: &[u16]) -> Result<Self, ConfigError> {
        Self::new(hundredths.iter().map(|&h| h as f64 / KEY_SCALE).collect())
    }

    /// Draw from a symmetric Dirichlet with unit concentration, rounded to
    /// hundredths. Rounding residue is pushed onto the largest entries so the
    /// hundredths always total exactly 100.
    pub fn sample_dirichlet<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Result<Self, ConfigError> {
        if n == 0 {
            return Err(ConfigError::EmptyDistribution);
        }
        let draws: Vec<f64> = if n == 1 {
            vec![1.0]
        } else {
            let dirichlet = Dirichlet::new(&vec![1.0; n]).map_err(|_| ConfigError::Invalid {
                field: "alpha",
                reason: "Dirichlet concentration must be positive",
            })?;
            rng.sample(&dirichlet)
        };
        let total: f64 = draws.iter().sum();
        let mut hundredths: Vec<i32> = if total > 0.0 {
            draws
                .iter()
                .map(|d| (d / total * KEY_SCALE).round() as i32)
                .collect()
        } else {
            vec![0; n]
        };

        let mut residual = KEY_SCALE as i32 - hundredths.iter().sum::<i32>();
        while residual != 0 {
            let step = residual.signum();
            // Largest entry absorbs each hundredth; it cannot go negative.
            let (idx, _) = hundredths
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(&a.0)))
                .ok_or(ConfigError::EmptyDistribution)?;
            hundredths[idx] += step;
            residual -= step;
        }

        let hundredths: Vec<u16> = hundredths.into_iter().map(|h| h as u16).collect();
        Self::from_hundredths(&hundredths)
    }

    /// Number of holes.
    #[inline]
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Probability at a hole.
    #[inline]
    pub fn get(&self, idx: usize) -> f64 {
        self.weights[idx]
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Canonical quantized key.
    pub fn key(&self) -> ContextKey {
        ContextKey(
            self.weights
                .iter()
                .map(|w| (w.clamp(0.0, 1.0) * KEY_SCALE).round() as u16)
                .collect(),
        )
    }
}

impl TryFrom<Vec<f64>> for Distribution {
    type Error = ConfigError;

    fn try_from(weights: Vec<f64>) -> Result<Self, Self::Error> {
        Self::new(weights)
    }
}

impl From<Distribution> for Vec<f64> {
    fn from(dist: Distribution) -> Self {
        dist.weights
    }
}

/// Quantized identity of a distribution (probabilities in hundredths).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ContextKey(Vec<u16>);

impl ContextKey {
    pub fn from_raw(hundredths: Vec<u16>) -> Self {
        Self(hundredths)
    }

    pub fn as_raw(&self) -> &[u16] {
        &self.0
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|h| h.to_string()).collect();
        write!(f, "[{}]", parts.join(","))
    }
}

/// Background distractor species.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Species {
    Cat,
    Dinosaur,
    Hippo,
    Rabbit,
    Snail,
}

impl Species {
    pub const ALL: [Species; 5] = [
        Species::Cat,
        Species::Dinosaur,
        Species::Hippo,
        Species::Rabbit,
        Species::Snail,
    ];

    /// Lowercase label used in record headers.
    pub fn label(self) -> &'static str {
        match self {
            Species::Cat => "cat",
            Species::Dinosaur => "dinosaur",
            Species::Hippo => "hippo",
            Species::Rabbit => "rabbit",
            Species::Snail => "snail",
        }
    }

    /// Image asset the render collaborator loads for this species.
    pub fn asset(self) -> &'static str {
        match self {
            Species::Cat => "images/cat.png",
            Species::Dinosaur => "images/dinasor.png",
            Species::Hippo => "images/hippo.png",
            Species::Rabbit => "images/rabbit.png",
            Species::Snail => "images/snail.png",
        }
    }
}

/// Number of distractors of each species on screen.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(from = "BTreeMap<Species, u32>", into = "BTreeMap<Species, u32>"))]
pub struct DistractorCounts {
    counts: BTreeMap<Species, u32>,
}

impl DistractorCounts {
    /// No distractors.
    pub fn empty() -> Self {
        Self {
            counts: Species::ALL.iter().map(|&s| (s, 0)).collect(),
        }
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (Species, u32)>) -> Self {
        let mut out = Self::empty();
        for (species, n) in pairs {
            out.counts.insert(species, n);
        }
        out
    }

    /// Scatter `budget` distractors across species uniformly at random.
    pub fn sample<R: Rng + ?Sized>(budget: u32, rng: &mut R) -> Self {
        let mut out = Self::empty();
        for _ in 0..budget {
            let species = Species::ALL[rng.gen_range(0..Species::ALL.len())];
            *out.counts.entry(species).or_insert(0) += 1;
        }
        out
    }

    pub fn get(&self, species: Species) -> u32 {
        self.counts.get(&species).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u32 {
        self.counts.values().sum()
    }

    pub fn check_budget(&self, budget: u32) -> Result<(), ConfigError> {
        let total = self.total();
        if total > budget {
            return Err(ConfigError::DistractorBudgetExceeded { total, budget });
        }
        Ok(())
    }

    /// Species with their counts, in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (Species, u32)> + '_ {
        Species::ALL.iter().map(move |&s| (s, self.get(s)))
    }
}

impl Default for DistractorCounts {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<BTreeMap<Species, u32>> for DistractorCounts {
    fn from(map: BTreeMap<Species, u32>) -> Self {
        Self::from_pairs(map)
    }
}

impl From<DistractorCounts> for BTreeMap<Species, u32> {
    fn from(counts: DistractorCounts) -> Self {
        counts.counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_renormalize_on_construction() {
        let d = Distribution::new(vec![1.0, 1.0, 2.0]).unwrap();
        assert_abs_diff_eq!(d.get(2), 0.5);
        assert_abs_diff_eq!(d.weights().iter().sum::<f64>(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_reject_bad_weights() {
        assert!(matches!(Distribution::new(vec![]), Err(ConfigError::EmptyDistribution)));
        assert!(Distribution::new(vec![0.0, 0.0]).is_err());
        assert!(Distribution::new(vec![0.5, -0.1, 0.6]).is_err());
        assert!(Distribution::new(vec![f64::NAN, 1.0]).is_err());
    }

    #[test]
    fn test_key_is_quantized() {
        let a = Distribution::new(vec![0.1, 0.2, 0.7]).unwrap();
        let b = Distribution::new(vec![0.1 + 1e-12, 0.2, 0.7 - 1e-12]).unwrap();
        assert_eq!(a.key(), b.key());
        assert_eq!(a.key().as_raw(), &[10, 20, 70]);
        assert_eq!(a.key().to_string(), "[10,20,70]");
    }

    #[test]
    fn test_dirichlet_sums_to_one_in_hundredths() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        for _ in 0..500 {
            let d = Distribution::sample_dirichlet(4, &mut rng).unwrap();
            let key = d.key();
            assert_eq!(key.as_raw().iter().map(|&h| h as u32).sum::<u32>(), 100);
            assert!(d.weights().iter().all(|&w| w >= 0.0));
        }
    }

    #[test]
    fn test_dirichlet_single_hole() {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let d = Distribution::sample_dirichlet(1, &mut rng).unwrap();
        assert_eq!(d.key().as_raw(), &[100]);
        assert!(matches!(
            Distribution::sample_dirichlet(0, &mut rng),
            Err(ConfigError::EmptyDistribution)
        ));
    }

    #[test]
    fn test_distractor_sample_uses_whole_budget() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let counts = DistractorCounts::sample(8, &mut rng);
        assert_eq!(counts.total(), 8);
        assert!(counts.check_budget(8).is_ok());
        assert!(counts.check_budget(7).is_err());
        assert_eq!(counts.iter().count(), Species::ALL.len());
    }

    #[test]
    fn test_species_assets_are_distinct() {
        let assets: std::collections::BTreeSet<_> =
            Species::ALL.iter().map(|s| s.asset()).collect();
        assert_eq!(assets.len(), Species::ALL.len());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_distractor_counts_json_map() {
        let counts: DistractorCounts = serde_json::from_str(r#"{"cat": 2, "snail": 1}"#).unwrap();
        assert_eq!(counts.get(Species::Cat), 2);
        assert_eq!(counts.get(Species::Hippo), 0);
        assert_eq!(counts.total(), 3);
    }
}
