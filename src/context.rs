//! Context engine - familiar vs novel distributions
//!
//! Contexts live in a history keyed by their quantized distribution. A choice
//! pool holds one reinforcement weight per context plus a reserved novel
//! entry. Each selection excludes the previous context, samples the pool, and
//! either reinforces a familiar context or synthesizes a new one.
//!
//! ## Invariant
//!
//! After every call the pool's context keys equal the history keys, and the
//! novel entry never appears in the history.

use crate::config::{ContextConfig, Correlation};
use crate::distribution::{ContextKey, Distribution, DistractorCounts};
use crate::error::ConfigError;
use crate::sampler::sample_weighted;
use rand::Rng;
use std::collections::BTreeMap;
use tracing::debug;

/// Key of the choice pool.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PoolKey {
    Novel,
    Context(ContextKey),
}

/// A distribution and the distractors shown with it.
#[derive(Clone, Debug, PartialEq)]
pub struct Context {
    pub key: ContextKey,
    pub distribution: Distribution,
    pub distractors: DistractorCounts,
}

/// Outcome of [`ContextEngine::select_context`].
#[derive(Clone, Debug, PartialEq)]
pub struct Selection {
    pub context: Context,
    pub familiar: bool,
}

/// Pool of contexts for one session.
#[derive(Clone, Debug)]
pub struct ContextEngine {
    config: ContextConfig,
    correlation: Correlation,
    holes: usize,
    history: BTreeMap<ContextKey, Context>,
    choice_weights: BTreeMap<PoolKey, f64>,
    /// Session-wide distractors used when uncorrelated.
    fixed_distractors: DistractorCounts,
}

impl ContextEngine {
    /// Create an engine for `holes` positions.
    ///
    /// The uncorrelated distractor set is drawn here, once per session.
    pub fn new<R: Rng + ?Sized>(
        config: ContextConfig,
        correlation: Correlation,
        holes: usize,
        rng: &mut R,
    ) -> Self {
        let fixed_distractors = DistractorCounts::sample(config.distractor_budget, rng);
        let mut engine = Self {
            config,
            correlation,
            holes,
            history: BTreeMap::new(),
            choice_weights: BTreeMap::new(),
            fixed_distractors,
        };
        engine.reset();
        engine
    }

    /// Forget all contexts.
    pub fn reset(&mut self) {
        self.history.clear();
        self.choice_weights.clear();
        self.choice_weights.insert(PoolKey::Novel, self.config.alpha);
    }

    /// Called at block start; clears history unless contexts carry over.
    pub fn begin_block(&mut self) {
        if !self.config.carry_history_across_blocks {
            self.reset();
        }
    }

    /// Pick the next context, never repeating `previous` immediately.
    pub fn select_context<R: Rng + ?Sized>(
        &mut self,
        previous: Option<&ContextKey>,
        rng: &mut R,
    ) -> Result<Selection, ConfigError> {
        let pool: Vec<(PoolKey, f64)> = self
            .choice_weights
            .iter()
            .filter(|(key, _)| match (key, previous) {
                (PoolKey::Context(k), Some(prev)) => k != prev,
                _ => true,
            })
            .map(|(key, &w)| (key.clone(), w))
            .collect();

        let selection = match sample_weighted(&pool, rng)? {
            PoolKey::Context(key) => self.reinforce(&key)?,
            PoolKey::Novel => self.synthesize(rng)?,
        };
        debug_assert!(self.check_invariants());
        Ok(selection)
    }

    fn reinforce(&mut self, key: &ContextKey) -> Result<Selection, ConfigError> {
        let context = self
            .history
            .get(key)
            .cloned()
            .ok_or(ConfigError::Invalid {
                field: "context pool",
                reason: "pool entry without history",
            })?;
        if let Some(w) = self.choice_weights.get_mut(&PoolKey::Context(key.clone())) {
            *w += 1.0;
        }
        debug!(key = %key, "familiar context");
        Ok(Selection {
            context,
            familiar: true,
        })
    }

    fn synthesize<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<Selection, ConfigError> {
        for attempt in 0..self.config.max_novel_retries {
            let distribution = Distribution::sample_dirichlet(self.holes, rng)?;
            let key = distribution.key();
            if self.history.contains_key(&key) {
                continue;
            }

            let distractors = match self.correlation {
                Correlation::Correlated => {
                    let counts = DistractorCounts::sample(self.config.distractor_budget, rng);
                    if self.history.values().any(|c| c.distractors == counts) {
                        continue;
                    }
                    counts
                }
                Correlation::Uncorrelated => self.fixed_distractors.clone(),
            };

            debug!(key = %key, attempt, "novel context");
            let context = Context {
                key: key.clone(),
                distribution,
                distractors,
            };
            self.insert(context.clone());
            return Ok(Selection {
                context,
                familiar: false,
            });
        }

        Err(ConfigError::NovelRetriesExhausted {
            retries: self.config.max_novel_retries,
            budget: self.config.distractor_budget,
        })
    }

    fn insert(&mut self, context: Context) {
        self.choice_weights
            .insert(PoolKey::Context(context.key.clone()), 1.0);
        self.history.insert(context.key.clone(), context);
    }

    /// Seed the history with a pre-specified context.
    ///
    /// Returns `false` if the key was already known.
    pub fn register(&mut self, distribution: Distribution, distractors: DistractorCounts) -> bool {
        let key = distribution.key();
        if self.history.contains_key(&key) {
            return false;
        }
        self.insert(Context {
            key,
            distribution,
            distractors,
        });
        true
    }

    /// Whether a key is in the history.
    pub fn is_known(&self, key: &ContextKey) -> bool {
        self.history.contains_key(key)
    }

    /// Distractors to show with a pre-specified bundle under the current correlation.
    pub fn distractors_for(&self, configured: &DistractorCounts) -> DistractorCounts {
        match self.correlation {
            Correlation::Correlated => configured.clone(),
            Correlation::Uncorrelated => self.fixed_distractors.clone(),
        }
    }

    // =========================================================================
    // INSPECTION
    // =========================================================================

    pub fn history(&self) -> &BTreeMap<ContextKey, Context> {
        &self.history
    }

    pub fn choice_weight(&self, key: &PoolKey) -> Option<f64> {
        self.choice_weights.get(key).copied()
    }

    pub fn fixed_distractors(&self) -> &DistractorCounts {
        &self.fixed_distractors
    }

    pub fn correlation(&self) -> Correlation {
        self.correlation
    }

    /// Pool keys minus the novel entry equal the history keys.
    pub fn check_invariants(&self) -> bool {
        if !self.choice_weights.contains_key(&PoolKey::Novel) {
            return false;
        }
        let pooled: Vec<&ContextKey> = self
            .choice_weights
            .keys()
            .filter_map(|k| match k {
                PoolKey::Context(key) => Some(key),
                PoolKey::Novel => None,
            })
            .collect();
        let known: Vec<&ContextKey> = self.history.keys().collect();
        pooled == known
    }
}
