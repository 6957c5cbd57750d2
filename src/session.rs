//! Session scheduler - blocks, bundles, trials
//!
//! The session is advanced one tick at a time with the elapsed wall time and
//! the input events gathered since the previous tick. It never waits on its
//! own: between ticks control belongs to whoever drives it, either an external
//! event loop calling [`Session::tick`] or [`Session::run`] pulling from a
//! [`TickSource`].
//!
//! ```text
//! Countdown -> Running -> Rest -> Countdown -> Running -> ... -> Done
//!      \___________\________\__________ Cancel ______________-> Cancelled
//! ```

use crate::config::SessionConfig;
use crate::context::ContextEngine;
use crate::distribution::{ContextKey, Distribution, DistractorCounts};
use crate::error::{ConfigError, Result};
use crate::observer::{SessionEvent, SessionObserver};
use crate::record::{RecordSink, TrialRecord};
use crate::scene::{Drawable, Scene};
use crate::schedule::{Block, Bundle, Planner, PositionSource};
use crate::target::{HitOutcome, Target, TargetStep};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Scheduler phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// "Get ready" countdown before a block.
    Countdown,
    /// Trials running.
    Running,
    /// Mandatory rest between blocks.
    Rest,
    /// All blocks completed.
    Done,
    /// Stopped by a cancel or quit.
    Cancelled,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Cancelled)
    }
}

/// Discrete input from the participant.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum InputEvent {
    PointerDown { x: f64, y: f64 },
    Cancel,
    ToggleAudio,
    /// Leave the rest screen.
    Continue,
}

/// Elapsed time and the events gathered since the previous tick.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Tick {
    pub elapsed: Duration,
    pub events: Vec<InputEvent>,
}

impl Tick {
    pub fn new(elapsed: Duration, events: Vec<InputEvent>) -> Self {
        Self { elapsed, events }
    }
}

/// Input and render collaborator driving [`Session::run`].
pub trait TickSource {
    /// Wait for the next tick. `None` means the participant quit.
    fn next_tick(&mut self) -> Option<Tick>;

    /// Show the current frame.
    fn present(&mut self, _frame: &Frame) {}
}

/// Everything the render collaborator needs for one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub phase: Phase,
    /// Whole seconds left in the countdown.
    pub countdown_secs: Option<u64>,
    /// Rest screen may be dismissed.
    pub can_continue: bool,
    pub drawables: Vec<Drawable>,
    pub score: u64,
    pub audio_enabled: bool,
    pub block: usize,
    pub session_trial: usize,
}

/// Per-distribution usage counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Usage {
    pub trials: u64,
    pub bundles: u64,
}

/// One experimental session.
pub struct Session<W: Write, R: Rng = ChaCha8Rng> {
    config: SessionConfig,
    rng: R,
    engine: ContextEngine,
    blocks: Vec<Block>,
    target: Target,
    scene: Scene,
    sink: RecordSink<W>,
    observers: Vec<Arc<dyn SessionObserver>>,
    recording: bool,

    phase: Phase,
    clock: Duration,
    phase_elapsed: Duration,
    block_idx: usize,
    bundle_idx: usize,
    source: Option<PositionSource>,

    session_trial: usize,
    block_trial: usize,
    bundle_trial: usize,
    score: u64,
    usage: HashMap<ContextKey, Usage>,
    audio_enabled: bool,
}

impl<W: Write> Session<W, ChaCha8Rng> {
    /// Create a session seeded from `config.seed`.
    pub fn new(config: SessionConfig, sink: RecordSink<W>) -> Result<Self> {
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Self::with_rng(config, sink, rng)
    }

    /// Practice session: one uniform bundle, nothing recorded.
    pub fn warm_up(config: SessionConfig, sink: RecordSink<W>) -> Result<Self> {
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Self::warm_up_with_rng(config, sink, rng)
    }
}

impl<W: Write, R: Rng> Session<W, R> {
    /// Create a session with an explicit random source.
    ///
    /// Every block is resolved here, so configuration failures surface
    /// before the first trial.
    pub fn with_rng(config: SessionConfig, sink: RecordSink<W>, mut rng: R) -> Result<Self> {
        config.validate()?;
        let mut engine = ContextEngine::new(
            config.context.clone(),
            config.correlation(),
            config.holes(),
            &mut rng,
        );
        let mut planner = Planner::new(&config);
        let blocks = (0..planner.block_count())
            .map(|b| planner.resolve(b, &mut engine, &mut rng))
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Ok(Self::assemble(config, sink, rng, engine, blocks, true))
    }

    pub fn warm_up_with_rng(
        config: SessionConfig,
        sink: RecordSink<W>,
        mut rng: R,
    ) -> Result<Self> {
        config.target.validate()?;
        if config.hole_positions.is_empty() {
            return Err(ConfigError::NoHoles.into());
        }
        if config.warm_up_trials == 0 {
            return Err(ConfigError::Invalid {
                field: "warm_up_trials",
                reason: "must be > 0",
            }
            .into());
        }
        let engine = ContextEngine::new(
            config.context.clone(),
            config.correlation(),
            config.holes(),
            &mut rng,
        );
        let bundle = Bundle::new(
            config.warm_up_trials,
            Distribution::uniform(config.holes())?,
            engine.distractors_for(&DistractorCounts::empty()),
            false,
        );
        let blocks = vec![Block {
            bundles: vec![bundle],
        }];
        Ok(Self::assemble(config, sink, rng, engine, blocks, false))
    }

    fn assemble(
        config: SessionConfig,
        sink: RecordSink<W>,
        rng: R,
        engine: ContextEngine,
        blocks: Vec<Block>,
        recording: bool,
    ) -> Self {
        let target = Target::new(config.target.clone(), config.hole_positions.clone());
        let scene = Scene::new(config.scene.clone(), &config.hole_positions);
        let phase = if blocks.is_empty() {
            Phase::Done
        } else {
            Phase::Countdown
        };
        Self {
            config,
            rng,
            engine,
            blocks,
            target,
            scene,
            sink,
            observers: Vec::new(),
            recording,
            phase,
            clock: Duration::ZERO,
            phase_elapsed: Duration::ZERO,
            block_idx: 0,
            bundle_idx: 0,
            source: None,
            session_trial: 0,
            block_trial: 0,
            bundle_trial: 0,
            score: 0,
            usage: HashMap::new(),
            audio_enabled: true,
        }
    }

    /// Subscribe an observer. The caller may keep its own handle.
    pub fn subscribe(&mut self, observer: Arc<dyn SessionObserver>) {
        self.observers.push(observer);
    }

    fn notify(&self, event: SessionEvent) {
        for observer in &self.observers {
            observer.on_event(&event);
        }
    }

    // =========================================================================
    // TIME ADVANCEMENT
    // =========================================================================

    /// Advance the session by one tick.
    pub fn tick(&mut self, elapsed: Duration, events: &[InputEvent]) -> Result<Phase> {
        if self.phase.is_terminal() {
            return Ok(self.phase);
        }
        self.clock += elapsed;

        if events.contains(&InputEvent::Cancel) {
            self.cancel();
            return Ok(self.phase);
        }
        for event in events {
            if *event == InputEvent::ToggleAudio {
                self.audio_enabled = !self.audio_enabled;
                self.notify(SessionEvent::AudioToggled {
                    enabled: self.audio_enabled,
                });
            }
        }

        match self.phase {
            Phase::Countdown => {
                self.phase_elapsed += elapsed;
                if self.phase_elapsed >= Duration::from_millis(self.config.countdown_ms) {
                    self.start_block();
                }
            }
            Phase::Running => self.run_trial_tick(elapsed, events)?,
            Phase::Rest => {
                self.phase_elapsed += elapsed;
                let wants_continue = events.iter().any(|e| {
                    matches!(e, InputEvent::Continue | InputEvent::PointerDown { .. })
                });
                if wants_continue && self.rest_over() {
                    self.begin_countdown(self.block_idx + 1);
                }
            }
            Phase::Done | Phase::Cancelled => {}
        }
        Ok(self.phase)
    }

    /// Drive the session from `source` until it ends, then close the sink.
    ///
    /// Returns the terminal phase, or the first record output failure.
    pub fn run<S: TickSource + ?Sized>(&mut self, source: &mut S) -> Result<Phase> {
        info!(
            subject = %self.config.subject_id,
            blocks = self.blocks.len(),
            recording = self.recording,
            "session started"
        );
        while !self.phase.is_terminal() {
            source.present(&self.frame());
            let outcome = match source.next_tick() {
                Some(tick) => self.tick(tick.elapsed, &tick.events),
                None => self.tick(Duration::ZERO, &[InputEvent::Cancel]),
            };
            if let Err(err) = outcome {
                self.sink.flush();
                let _ = self.sink.close();
                return Err(err);
            }
        }
        source.present(&self.frame());
        self.sink.close()?;
        Ok(self.phase)
    }

    fn run_trial_tick(&mut self, elapsed: Duration, events: &[InputEvent]) -> Result<()> {
        for event in events {
            if let InputEvent::PointerDown { x, y } = *event {
                if let HitOutcome::Scored {
                    alive_ms,
                    score_delta,
                } = self.target.hit(x, y, self.clock)
                {
                    self.score += score_delta;
                    self.notify(SessionEvent::Hit {
                        alive_ms,
                        score_delta,
                        score: self.score,
                    });
                }
            }
        }

        if self.target.moveable() {
            let bundle = &self.blocks[self.block_idx].bundles[self.bundle_idx];
            let source = self
                .source
                .get_or_insert_with(|| PositionSource::Sampled(bundle.distribution.clone()));
            let hole = source.next(&bundle.distribution, &mut self.rng)?;
            self.scene.arrange(&bundle.distractors, &mut self.rng);
            self.target.move_to(hole, self.clock)?;
        }

        if self.target.advance(elapsed) == TargetStep::Completed {
            self.complete_trial();
        }
        Ok(())
    }

    fn complete_trial(&mut self) {
        let bundle = &self.blocks[self.block_idx].bundles[self.bundle_idx];
        let usage = self.usage.entry(bundle.key.clone()).or_default();
        usage.trials += 1;

        let record = TrialRecord {
            block: self.block_idx,
            bundle: self.bundle_idx,
            session_trial: self.session_trial,
            block_trial: self.block_trial,
            bundle_trial: self.bundle_trial,
            rt_ms: self.target.reaction_time_ms(),
            familiar: bundle.familiar,
            position: self.target.hole().unwrap_or_default(),
            probabilities: bundle.distribution.weights().to_vec(),
            distractors: bundle.distractors.clone(),
            score: self.score,
            bundle_length: bundle.length,
            dist_trials: usage.trials,
            dist_bundles: usage.bundles,
            hit_offset: self.target.relative_hit(),
        };
        let bundle_length = bundle.length;

        if self.recording {
            self.sink.push(record.clone());
        }
        self.notify(SessionEvent::TrialCompleted(Box::new(record)));

        self.session_trial += 1;
        self.block_trial += 1;
        self.bundle_trial += 1;

        if self.bundle_trial >= bundle_length {
            self.sink.flush();
            self.next_bundle();
        }
    }

    // =========================================================================
    // PHASE TRANSITIONS
    // =========================================================================

    fn begin_countdown(&mut self, block: usize) {
        self.block_idx = block;
        self.phase = Phase::Countdown;
        self.phase_elapsed = Duration::ZERO;
        self.notify(SessionEvent::CountdownStarted { block });
    }

    fn start_block(&mut self) {
        let bundles = self.blocks[self.block_idx].bundles.len();
        debug!(block = self.block_idx, bundles, "block started");
        self.phase = Phase::Running;
        self.phase_elapsed = Duration::ZERO;
        self.block_trial = 0;
        self.notify(SessionEvent::BlockStarted {
            block: self.block_idx,
            bundles,
        });
        self.install_bundle(0);
    }

    fn install_bundle(&mut self, bundle_idx: usize) {
        self.bundle_idx = bundle_idx;
        self.bundle_trial = 0;
        let bundle = &self.blocks[self.block_idx].bundles[bundle_idx];
        self.source = Some(PositionSource::for_bundle(
            bundle,
            self.config.exact_proportion,
            &mut self.rng,
        ));
        self.usage.entry(bundle.key.clone()).or_default().bundles += 1;
        debug!(
            block = self.block_idx,
            bundle = bundle_idx,
            key = %bundle.key,
            familiar = bundle.familiar,
            length = bundle.length,
            "bundle installed"
        );
        self.notify(SessionEvent::BundleStarted {
            block: self.block_idx,
            bundle: bundle_idx,
            key: bundle.key.clone(),
            familiar: bundle.familiar,
            length: bundle.length,
        });
    }

    fn next_bundle(&mut self) {
        if self.bundle_idx + 1 < self.blocks[self.block_idx].bundles.len() {
            self.install_bundle(self.bundle_idx + 1);
        } else if self.block_idx + 1 < self.blocks.len() {
            self.phase = Phase::Rest;
            self.phase_elapsed = Duration::ZERO;
            self.source = None;
            debug!(block = self.block_idx, score = self.score, "rest");
            self.notify(SessionEvent::RestStarted {
                completed_block: self.block_idx,
                score: self.score,
            });
        } else {
            self.finish();
        }
    }

    fn rest_over(&self) -> bool {
        self.phase_elapsed >= Duration::from_millis(self.config.rest_min_ms)
    }

    fn finish(&mut self) {
        self.sink.flush();
        self.phase = Phase::Done;
        self.source = None;
        info!(trials = self.session_trial, score = self.score, "session finished");
        self.notify(SessionEvent::Finished {
            trials: self.session_trial,
            score: self.score,
        });
    }

    /// Stop immediately. Completed trials are flushed; the in-flight one is dropped.
    pub fn cancel(&mut self) {
        if self.phase.is_terminal() {
            return;
        }
        self.sink.flush();
        self.phase = Phase::Cancelled;
        self.source = None;
        info!(completed = self.session_trial, "session cancelled");
        self.notify(SessionEvent::Cancelled {
            completed_trials: self.session_trial,
        });
    }

    /// Final flush; returns the first record output failure, if any.
    pub fn close(&mut self) -> Result<()> {
        self.sink.close()
    }

    // =========================================================================
    // STATE
    // =========================================================================

    /// Snapshot for the render collaborator.
    pub fn frame(&self) -> Frame {
        let countdown_secs = (self.phase == Phase::Countdown).then(|| {
            let left = self
                .config
                .countdown_ms
                .saturating_sub(self.phase_elapsed.as_millis() as u64);
            left.div_ceil(1000)
        });
        let drawables = match self.phase {
            Phase::Running => self.scene.drawables(&self.target),
            _ => Vec::new(),
        };
        Frame {
            phase: self.phase,
            countdown_secs,
            can_continue: self.phase == Phase::Rest && self.rest_over(),
            drawables,
            score: self.score,
            audio_enabled: self.audio_enabled,
            block: self.block_idx,
            session_trial: self.session_trial,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn clock(&self) -> Duration {
        self.clock
    }

    pub fn score(&self) -> u64 {
        self.score
    }

    pub fn completed_trials(&self) -> usize {
        self.session_trial
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn engine(&self) -> &ContextEngine {
        &self.engine
    }

    pub fn sink(&self) -> &RecordSink<W> {
        &self.sink
    }

    pub fn usage(&self, key: &ContextKey) -> Usage {
        self.usage.get(key).copied().unwrap_or_default()
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio_enabled
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}
