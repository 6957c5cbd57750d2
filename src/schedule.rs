//! Blocks and bundles
//!
//! A block is resolved into concrete bundles when it starts, so contextual
//! selection can depend on what earlier blocks showed.

use crate::config::{PlanMode, SessionConfig};
use crate::context::ContextEngine;
use crate::distribution::{ContextKey, Distribution, DistractorCounts};
use crate::error::ConfigError;
use crate::sampler::{sample_index, ProportionQueue};
use rand::Rng;
use std::collections::HashSet;

/// Contiguous run of trials sharing one distribution and distractor set.
#[derive(Clone, Debug, PartialEq)]
pub struct Bundle {
    pub length: usize,
    pub distribution: Distribution,
    pub distractors: DistractorCounts,
    pub key: ContextKey,
    pub familiar: bool,
}

impl Bundle {
    pub fn new(
        length: usize,
        distribution: Distribution,
        distractors: DistractorCounts,
        familiar: bool,
    ) -> Self {
        let key = distribution.key();
        Self {
            length,
            distribution,
            distractors,
            key,
            familiar,
        }
    }
}

/// Ordered bundles of one block.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Block {
    pub bundles: Vec<Bundle>,
}

impl Block {
    pub fn trials(&self) -> usize {
        self.bundles.iter().map(|b| b.length).sum()
    }
}

/// Turns the configured block sequences into concrete blocks.
#[derive(Clone, Debug)]
pub struct Planner {
    mode: PlanMode,
    dist_seq: Vec<Vec<(usize, usize)>>,
    bundle_length_seq: Vec<Vec<usize>>,
    mole_dists: Vec<Distribution>,
    distractor_dists: Vec<DistractorCounts>,
    /// Fixed-mode distributions already installed in an earlier bundle.
    seen: HashSet<ContextKey>,
    previous: Option<ContextKey>,
}

impl Planner {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            mode: config.mode,
            dist_seq: config.dist_seq.clone(),
            bundle_length_seq: config.bundle_length_seq.clone(),
            mole_dists: config.all_mole_dists.clone(),
            distractor_dists: config.all_distractor_dists.clone(),
            seen: HashSet::new(),
            previous: None,
        }
    }

    pub fn block_count(&self) -> usize {
        self.bundle_length_seq.len()
    }

    /// Resolve block `block` into bundles.
    pub fn resolve<R: Rng + ?Sized>(
        &mut self,
        block: usize,
        engine: &mut ContextEngine,
        rng: &mut R,
    ) -> Result<Block, ConfigError> {
        let lengths = self
            .bundle_length_seq
            .get(block)
            .ok_or(ConfigError::PoolIndexOutOfRange {
                pool: "bundle_length_seq",
                index: block,
                len: self.bundle_length_seq.len(),
            })?
            .clone();

        engine.begin_block();
        let mut bundles = Vec::with_capacity(lengths.len());
        match self.mode {
            PlanMode::Fixed => {
                let dists = self.dist_seq.get(block).ok_or(ConfigError::BlockCountMismatch {
                    dist_blocks: self.dist_seq.len(),
                    length_blocks: self.bundle_length_seq.len(),
                })?;
                for (&length, &(mole, distractor)) in lengths.iter().zip(dists) {
                    let distribution = self
                        .mole_dists
                        .get(mole)
                        .cloned()
                        .ok_or(ConfigError::PoolIndexOutOfRange {
                            pool: "all_mole_dists",
                            index: mole,
                            len: self.mole_dists.len(),
                        })?;
                    let configured = self.distractor_dists.get(distractor).ok_or(
                        ConfigError::PoolIndexOutOfRange {
                            pool: "all_distractor_dists",
                            index: distractor,
                            len: self.distractor_dists.len(),
                        },
                    )?;
                    let familiar = !self.seen.insert(distribution.key());
                    let distractors = engine.distractors_for(configured);
                    bundles.push(Bundle::new(length, distribution, distractors, familiar));
                }
            }
            PlanMode::Contextual => {
                for &length in &lengths {
                    let selection = engine.select_context(self.previous.as_ref(), rng)?;
                    self.previous = Some(selection.context.key.clone());
                    bundles.push(Bundle::new(
                        length,
                        selection.context.distribution,
                        selection.context.distractors,
                        selection.familiar,
                    ));
                }
            }
        }
        Ok(Block { bundles })
    }
}

/// Where the next position comes from within a bundle.
#[derive(Clone, Debug)]
pub enum PositionSource {
    Sampled(Distribution),
    Exact(ProportionQueue),
}

impl PositionSource {
    pub fn for_bundle<R: Rng + ?Sized>(bundle: &Bundle, exact: bool, rng: &mut R) -> Self {
        if exact {
            PositionSource::Exact(ProportionQueue::build(bundle.length, &bundle.distribution, rng))
        } else {
            PositionSource::Sampled(bundle.distribution.clone())
        }
    }

    /// Next hole index.
    pub fn next<R: Rng + ?Sized>(
        &mut self,
        fallback: &Distribution,
        rng: &mut R,
    ) -> Result<usize, ConfigError> {
        match self {
            PositionSource::Sampled(dist) => sample_index(dist.weights(), rng),
            PositionSource::Exact(queue) => match queue.pop() {
                Some(pos) => Ok(pos),
                None => sample_index(fallback.weights(), rng),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContextConfig;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn setup(config: &SessionConfig) -> (Planner, ContextEngine, ChaCha8Rng) {
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let engine = ContextEngine::new(
            config.context.clone(),
            config.correlation(),
            config.holes(),
            &mut rng,
        );
        (Planner::new(config), engine, rng)
    }

    #[test]
    fn test_fixed_plan_follows_dist_seq() {
        let config = SessionConfig::demo();
        let (mut planner, mut engine, mut rng) = setup(&config);
        assert_eq!(planner.block_count(), 2);

        let first = planner.resolve(0, &mut engine, &mut rng).unwrap();
        assert_eq!(first.bundles.len(), 3);
        assert_eq!(first.trials(), 12);
        assert_eq!(first.bundles[0].distribution, config.all_mole_dists[1]);
        assert!(first.bundles.iter().all(|b| !b.familiar));

        let second = planner.resolve(1, &mut engine, &mut rng).unwrap();
        assert!(second.bundles.iter().all(|b| b.familiar));
    }

    #[test]
    fn test_contextual_plan_never_repeats_back_to_back() {
        let mut config = SessionConfig::demo();
        config.mode = PlanMode::Contextual;
        config.bundle_length_seq = vec![vec![3; 10], vec![3; 10]];
        let (mut planner, mut engine, mut rng) = setup(&config);

        let mut keys = Vec::new();
        for block in 0..2 {
            let b = planner.resolve(block, &mut engine, &mut rng).unwrap();
            keys.extend(b.bundles.into_iter().map(|b| b.key));
        }
        for pair in keys.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }
        assert!(engine.check_invariants());
    }

    #[test]
    fn test_uncorrelated_fixed_plan_uses_session_distractors() {
        let mut config = SessionConfig::demo();
        config.correlated = false;
        let (mut planner, mut engine, mut rng) = setup(&config);
        let block = planner.resolve(0, &mut engine, &mut rng).unwrap();
        for bundle in &block.bundles {
            assert_eq!(&bundle.distractors, engine.fixed_distractors());
        }
    }

    #[test]
    fn test_contextual_plan_surfaces_exhaustion() {
        let mut config = SessionConfig::demo();
        config.mode = PlanMode::Contextual;
        config.context = ContextConfig {
            distractor_budget: 0,
            max_novel_retries: 5,
            ..ContextConfig::default()
        };
        config.bundle_length_seq = vec![vec![2, 2]];
        let (mut planner, mut engine, mut rng) = setup(&config);
        assert!(matches!(
            planner.resolve(0, &mut engine, &mut rng),
            Err(ConfigError::NovelRetriesExhausted { retries: 5, .. })
        ));
    }

    #[test]
    fn test_exact_source_drains_queue() {
        let dist = Distribution::new(vec![0.1, 0.1, 0.2, 0.6]).unwrap();
        let bundle = Bundle::new(4, dist.clone(), DistractorCounts::empty(), false);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut source = PositionSource::for_bundle(&bundle, true, &mut rng);
        let mut drawn: Vec<usize> = (0..4)
            .map(|_| source.next(&dist, &mut rng).unwrap())
            .collect();
        drawn.sort();
        assert_eq!(drawn, vec![0, 2, 3, 3]);
    }
}
