//! Whack Context - reaction-game experiment core
//!
//! A target appears at one of several holes according to a controlled
//! distribution, the participant hits it, and every trial is logged with its
//! reaction time and the distribution that produced it.
//!
//! # Core Types
//!
//! - **Target**: rise / lock / sink state machine with millisecond timing
//! - **ContextEngine**: pool of familiar distributions plus a novel entry
//! - **Session**: block / bundle / trial scheduler with explicit phases
//! - **RecordSink**: header-once delimited trial log, flushed per bundle
//!
//! # Architecture: Session / Collaborators / Observers
//!
//! 1. **Session** - owns all experiment state and advances one tick at a time
//! 2. **Collaborators** - a display loop feeds elapsed time and input events in
//!    and draws the [`Frame`] it gets back
//! 3. **Observers** - [`SessionObserver`]s receive hits, trials and phase changes
//!
//! Nothing in the core reads the wall clock or an unseeded random source:
//! time arrives with each tick and randomness comes from the session's seeded
//! generator.
//!
//! # Core Concepts
//!
//! - **Bundle**: run of trials sharing one distribution and distractor set
//! - **Block**: ordered bundles, followed by a mandatory rest
//! - **Context**: a distribution seen before; familiar when reused
//! - **Exact proportion**: literal per-hole counts instead of per-trial draws
//!
//! # Example: Headless Session
//!
//! ```rust
//! use whack_context::{
//!     ParticipantProfile, Phase, RecordSink, Session, SessionConfig, SimulatedParticipant,
//! };
//! use rand::SeedableRng;
//! use rand_chacha::ChaCha8Rng;
//!
//! // 1. Two blocks of three four-trial bundles over four holes
//! let config = SessionConfig {
//!     countdown_ms: 0,
//!     rest_min_ms: 0,
//!     ..SessionConfig::demo()
//! };
//!
//! // 2. Records go to any writer
//! let mut out = Vec::new();
//! let mut session = Session::new(config, RecordSink::new(&mut out)).unwrap();
//!
//! // 3. A scripted participant stands in for the display loop
//! let mut participant =
//!     SimulatedParticipant::new(ParticipantProfile::default(), ChaCha8Rng::seed_from_u64(3));
//! assert_eq!(session.run(&mut participant).unwrap(), Phase::Done);
//! drop(session);
//!
//! // 4. One header plus one row per trial
//! assert_eq!(String::from_utf8(out).unwrap().lines().count(), 25);
//! ```

mod config;
mod context;
mod distribution;
mod error;
mod observer;
mod record;
mod sampler;
mod scene;
mod schedule;
mod session;
mod sim;
mod target;

pub use config::{
    ContextConfig, Correlation, PlanMode, SceneConfig, SessionConfig, TargetConfig,
    DEFAULT_HOLE_POSITIONS,
};
pub use context::{Context, ContextEngine, PoolKey, Selection};
pub use distribution::{ContextKey, DistractorCounts, Distribution, Species, KEY_SCALE};
pub use error::{ConfigError, Result, WamError};
pub use observer::{ChannelObserver, FnObserver, SessionEvent, SessionObserver};
pub use record::{header_fields, RecordReader, RecordSink, TrialRecord};
pub use sampler::{sample_index, sample_weighted, ProportionQueue};
pub use scene::{Distractor, Drawable, Scene};
pub use schedule::{Block, Bundle, Planner, PositionSource};
pub use session::{Frame, InputEvent, Phase, Session, Tick, TickSource, Usage};
pub use sim::{ParticipantProfile, SimulatedParticipant};
pub use target::{score_for, HitOutcome, Rect, Target, TargetPhase, TargetStep, SCORE_SCALE};
