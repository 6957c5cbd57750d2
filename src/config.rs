//! Session configuration

use crate::distribution::{Distribution, DistractorCounts};
use crate::error::{ConfigError, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Hole anchors of the original four-hole playfield.
pub const DEFAULT_HOLE_POSITIONS: [(f64, f64); 4] =
    [(320.0, 450.0), (300.0, 600.0), (700.0, 500.0), (680.0, 650.0)];

/// Timing and geometry of the target.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TargetConfig {
    /// Rise speed in screen units per second.
    pub ascent_speed: f64,
    /// Sink speed in screen units per second.
    pub descent_speed: f64,
    /// Lock duration once settled, in milliseconds.
    pub max_locked_ms: f64,
    /// Lock duration after a hit, in milliseconds.
    pub hit_locked_ms: f64,
    /// Target sprite width.
    pub width: f64,
    /// Target sprite height.
    pub height: f64,
    /// Horizontal offset of the target from its hole anchor.
    pub offset_x: f64,
    /// Depth below the hole anchor at which the target is hidden.
    pub sink_margin: f64,
    /// How far the target bottom stays below the rim once settled.
    pub emerge_margin: f64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            ascent_speed: 240.0,
            descent_speed: 290.0,
            max_locked_ms: 2000.0,
            hit_locked_ms: 200.0,
            width: 100.0,
            height: 90.0,
            offset_x: 50.0,
            sink_margin: 25.0,
            emerge_margin: 28.0,
        }
    }
}

impl TargetConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.ascent_speed > 0.0) || !(self.descent_speed > 0.0) {
            return Err(ConfigError::Invalid {
                field: "target",
                reason: "speeds must be > 0",
            });
        }
        if !(self.max_locked_ms >= 0.0) || !(self.hit_locked_ms >= 0.0) {
            return Err(ConfigError::Invalid {
                field: "target",
                reason: "lock durations must be >= 0",
            });
        }
        if !(self.width > 0.0) || !(self.height > self.emerge_margin) {
            return Err(ConfigError::Invalid {
                field: "target",
                reason: "size must be positive and taller than emerge_margin",
            });
        }
        Ok(())
    }
}

/// Whether distractors follow the context or stay fixed for the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Correlation {
    Correlated,
    Uncorrelated,
}

impl Correlation {
    pub fn from_flag(correlated: bool) -> Self {
        if correlated {
            Correlation::Correlated
        } else {
            Correlation::Uncorrelated
        }
    }
}

/// Context engine tuning.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ContextConfig {
    /// Pool weight of the novel entry.
    pub alpha: f64,
    /// Number of distractors in a freshly drawn context.
    pub distractor_budget: u32,
    /// Rejected draws tolerated before giving up on a novel context.
    pub max_novel_retries: u32,
    /// Keep contexts from earlier blocks available as familiar ones.
    pub carry_history_across_blocks: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            distractor_budget: 8,
            max_novel_retries: 64,
            carry_history_across_blocks: true,
        }
    }
}

impl ContextConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.alpha.is_finite() || self.alpha <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "context.alpha",
                reason: "must be finite and > 0",
            });
        }
        if self.max_novel_retries == 0 {
            return Err(ConfigError::Invalid {
                field: "context.max_novel_retries",
                reason: "must be > 0",
            });
        }
        Ok(())
    }
}

/// Region distractors may occupy.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SceneConfig {
    pub width: f64,
    pub height: f64,
    /// Top edge of the band distractors are placed in.
    pub distractor_top: f64,
    /// Gap kept from the right and bottom edges.
    pub distractor_margin: f64,
    pub distractor_width: f64,
    pub distractor_height: f64,
    pub hole_width: f64,
    pub hole_height: f64,
    /// Attempts per distractor before it is left out.
    pub max_placement_attempts: u32,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            width: 1000.0,
            height: 734.0,
            distractor_top: 400.0,
            distractor_margin: 10.0,
            distractor_width: 60.0,
            distractor_height: 60.0,
            hole_width: 180.0,
            hole_height: 60.0,
            max_placement_attempts: 200,
        }
    }
}

/// How bundles get their distributions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum PlanMode {
    /// Pre-specified by `dist_seq`.
    Fixed,
    /// Chosen by the context engine at block start.
    Contextual,
}

/// Full configuration of a session.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SessionConfig {
    /// Used to name the output file.
    pub subject_id: String,
    /// Per block, one `(mole dist index, distractor dist index)` per bundle.
    pub dist_seq: Vec<Vec<(usize, usize)>>,
    /// Per block, one trial count per bundle.
    pub bundle_length_seq: Vec<Vec<usize>>,
    pub all_mole_dists: Vec<Distribution>,
    pub all_distractor_dists: Vec<DistractorCounts>,
    pub hole_positions: Vec<(f64, f64)>,
    pub correlated: bool,
    pub exact_proportion: bool,
    pub compress: bool,
    pub mode: PlanMode,
    /// Seed of the session random source.
    pub seed: u64,
    pub target: TargetConfig,
    pub context: ContextConfig,
    pub scene: SceneConfig,
    pub countdown_ms: u64,
    /// Minimum rest between blocks before continue is accepted.
    pub rest_min_ms: u64,
    pub warm_up_trials: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            subject_id: "anonymous".to_string(),
            dist_seq: Vec::new(),
            bundle_length_seq: Vec::new(),
            all_mole_dists: Vec::new(),
            all_distractor_dists: Vec::new(),
            hole_positions: DEFAULT_HOLE_POSITIONS.to_vec(),
            correlated: true,
            exact_proportion: false,
            compress: false,
            mode: PlanMode::Fixed,
            seed: 0,
            target: TargetConfig::default(),
            context: ContextConfig::default(),
            scene: SceneConfig::default(),
            countdown_ms: 3000,
            rest_min_ms: 120_000,
            warm_up_trials: 20,
        }
    }
}

impl SessionConfig {
    /// Number of holes.
    pub fn holes(&self) -> usize {
        self.hole_positions.len()
    }

    pub fn correlation(&self) -> Correlation {
        Correlation::from_flag(self.correlated)
    }

    /// Total trials across all blocks.
    pub fn total_trials(&self) -> usize {
        self.bundle_length_seq.iter().flatten().sum()
    }

    /// Validate configuration. Runs before any trial.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hole_positions.is_empty() {
            return Err(ConfigError::NoHoles);
        }
        self.target.validate()?;
        self.context.validate()?;

        for (block, lengths) in self.bundle_length_seq.iter().enumerate() {
            for (bundle, &len) in lengths.iter().enumerate() {
                if len == 0 {
                    return Err(ConfigError::EmptyBundle { block, bundle });
                }
            }
        }

        for dist in &self.all_mole_dists {
            if dist.len() != self.holes() {
                return Err(ConfigError::WidthMismatch {
                    expected: self.holes(),
                    got: dist.len(),
                });
            }
        }
        for counts in &self.all_distractor_dists {
            counts.check_budget(self.context.distractor_budget)?;
        }

        if self.mode == PlanMode::Fixed {
            if self.dist_seq.len() != self.bundle_length_seq.len() {
                return Err(ConfigError::BlockCountMismatch {
                    dist_blocks: self.dist_seq.len(),
                    length_blocks: self.bundle_length_seq.len(),
                });
            }
            for (block, (dists, lengths)) in
                self.dist_seq.iter().zip(&self.bundle_length_seq).enumerate()
            {
                if dists.len() != lengths.len() {
                    return Err(ConfigError::BundleCountMismatch {
                        block,
                        dists: dists.len(),
                        lengths: lengths.len(),
                    });
                }
                for &(mole, distractor) in dists {
                    if mole >= self.all_mole_dists.len() {
                        return Err(ConfigError::PoolIndexOutOfRange {
                            pool: "all_mole_dists",
                            index: mole,
                            len: self.all_mole_dists.len(),
                        });
                    }
                    if distractor >= self.all_distractor_dists.len() {
                        return Err(ConfigError::PoolIndexOutOfRange {
                            pool: "all_distractor_dists",
                            index: distractor,
                            len: self.all_distractor_dists.len(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Parse a JSON configuration. Missing fields take their defaults.
    #[cfg(feature = "serde")]
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON configuration file.
    #[cfg(feature = "serde")]
    pub fn from_json_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// The two-block demo experiment: three skewed distributions over four holes.
    pub fn demo() -> Self {
        let dist = |w: [f64; 4]| Distribution::new(w.to_vec());
        let even = DistractorCounts::from_pairs(
            crate::distribution::Species::ALL.iter().map(|&s| (s, 1)),
        );
        Self {
            dist_seq: vec![vec![(1, 1), (2, 2), (0, 0)], vec![(1, 1), (2, 2), (0, 0)]],
            bundle_length_seq: vec![vec![4, 4, 4], vec![4, 4, 4]],
            all_mole_dists: [
                dist([0.1, 0.1, 0.2, 0.6]),
                dist([0.2, 0.6, 0.1, 0.1]),
                dist([0.6, 0.2, 0.1, 0.1]),
            ]
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .unwrap_or_default(),
            all_distractor_dists: vec![even.clone(), even.clone(), even],
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_is_valid() {
        let config = SessionConfig::demo();
        assert!(config.validate().is_ok());
        assert_eq!(config.total_trials(), 24);
        assert_eq!(config.all_mole_dists.len(), 3);
    }

    #[test]
    fn test_block_count_mismatch() {
        let mut config = SessionConfig::demo();
        config.bundle_length_seq.pop();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BlockCountMismatch {
                dist_blocks: 2,
                length_blocks: 1
            })
        ));
    }

    #[test]
    fn test_bundle_count_mismatch() {
        let mut config = SessionConfig::demo();
        config.bundle_length_seq[1].push(4);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BundleCountMismatch { block: 1, .. })
        ));
    }

    #[test]
    fn test_contextual_mode_ignores_dist_seq() {
        let mut config = SessionConfig::demo();
        config.mode = PlanMode::Contextual;
        config.dist_seq.clear();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_indices_and_widths() {
        let mut config = SessionConfig::demo();
        config.dist_seq[0][0] = (7, 0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::PoolIndexOutOfRange { pool: "all_mole_dists", .. })
        ));

        let mut config = SessionConfig::demo();
        config.hole_positions.pop();
        assert!(matches!(config.validate(), Err(ConfigError::WidthMismatch { .. })));
    }

    #[test]
    fn test_distractor_budget_checked() {
        let mut config = SessionConfig::demo();
        config.context.distractor_budget = 3;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DistractorBudgetExceeded { total: 5, budget: 3 })
        ));
    }

    #[test]
    fn test_zero_length_bundle_rejected() {
        let mut config = SessionConfig::demo();
        config.bundle_length_seq[0][2] = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyBundle { block: 0, bundle: 2 })
        ));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_parse_json() {
        let raw = r#"{
            "subject_id": "s01",
            "dist_seq": [[[0, 0], [1, 0]]],
            "bundle_length_seq": [[5, 5]],
            "all_mole_dists": [[0.25, 0.25, 0.25, 0.25], [1, 1, 1, 5]],
            "all_distractor_dists": [{"cat": 2, "hippo": 1}],
            "exact_proportion": true,
            "rest_min_ms": 0
        }"#;
        let config = SessionConfig::from_json_str(raw).unwrap();
        assert_eq!(config.subject_id, "s01");
        assert!(config.exact_proportion);
        assert_eq!(config.holes(), 4);
        assert!((config.all_mole_dists[1].get(3) - 0.625).abs() < 1e-12);
        assert_eq!(config.target, TargetConfig::default());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_parse_json_rejects_bad_distribution() {
        let raw = r#"{ "all_mole_dists": [[0, 0, 0, 0]] }"#;
        assert!(SessionConfig::from_json_str(raw).is_err());
    }
}
