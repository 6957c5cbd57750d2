//! Error types
//!
//! Configuration problems are fatal and surface before any trial runs.
//! Events that arrive in an incompatible target state are not errors at all:
//! the target ignores them and reports an `Ignored` outcome.

use thiserror::Error;

/// A session cannot be built or continued with the given configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("no hole positions configured")]
    NoHoles,
    #[error("block count mismatch: dist_seq has {dist_blocks} blocks, bundle_length_seq has {length_blocks}")]
    BlockCountMismatch {
        dist_blocks: usize,
        length_blocks: usize,
    },
    #[error("block {block}: dist_seq has {dists} bundles, bundle_length_seq has {lengths}")]
    BundleCountMismatch {
        block: usize,
        dists: usize,
        lengths: usize,
    },
    #[error("block {block}, bundle {bundle}: bundle length must be > 0")]
    EmptyBundle { block: usize, bundle: usize },
    #[error("{pool} index {index} out of range (pool has {len} entries)")]
    PoolIndexOutOfRange {
        pool: &'static str,
        index: usize,
        len: usize,
    },
    #[error("distribution has {got} weights, expected one per hole ({expected})")]
    WidthMismatch { expected: usize, got: usize },
    #[error("distribution is empty")]
    EmptyDistribution,
    #[error("weights must be finite and >= 0, with a positive total (total = {total})")]
    NonPositiveWeight { total: f64 },
    #[error("distractor count {total} exceeds budget {budget}")]
    DistractorBudgetExceeded { total: u32, budget: u32 },
    #[error("could not draw a novel context after {retries} attempts; distractor budget {budget} too small")]
    NovelRetriesExhausted { retries: u32, budget: u32 },
    #[error("position {index} out of range for {holes} holes")]
    PositionOutOfRange { index: usize, holes: usize },
    #[error("invalid setting `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

/// Top-level error returned by session construction and teardown.
#[derive(Debug, Error)]
pub enum WamError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("record output failed: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "serde")]
    #[error("config parse failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed record at line {line}: {reason}")]
    Parse { line: usize, reason: String },
}

pub type Result<T, E = WamError> = std::result::Result<T, E>;
