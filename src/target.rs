//! Target state machine - the mole
//!
//! One reactive target rises out of a hole, stays locked in place for a
//! while, and sinks back. Motion and lock timers scale with the elapsed time
//! of each tick. Timestamps come from the session clock, so the machine
//! itself never reads wall time.
//!
//! ```text
//! Idle --move_to--> Rising --anchor reached--> Settled --lock expired--> Descending
//!  ^                                                                        |
//!  +------------------------------ Hidden <------------ hidden position ----+
//! ```

use crate::config::TargetConfig;
use crate::error::ConfigError;
use std::time::Duration;
use tracing::trace;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Numerator of the score formula: `round(SCORE_SCALE / alive_ms)`.
pub const SCORE_SCALE: f64 = 5000.0;

/// Axis-aligned rectangle in screen units.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    /// Strict containment: points on the border do not count.
    pub fn contains_strict(&self, px: f64, py: f64) -> bool {
        px > self.x && px < self.x + self.w && py > self.y && py < self.y + self.h
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.x + other.w
            && other.x < self.x + self.w
            && self.y < other.y + other.h
            && other.y < self.y + self.h
    }
}

/// Motion phase of the target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetPhase {
    Idle,
    Rising,
    Settled,
    Descending,
    Hidden,
}

/// What a call to [`Target::advance`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetStep {
    /// Nothing to report.
    Continue,
    /// Reached the anchor and locked in place.
    Settled,
    /// Lock expired, started sinking.
    Released,
    /// Back in the hole: the trial is over.
    Completed,
}

/// Result of a pointer-down delivered to the target.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum HitOutcome {
    /// Valid hit.
    Scored { alive_ms: u64, score_delta: u64 },
    /// Pointer outside the target.
    Missed,
    /// Target not settled, or already hit this rise.
    Ignored,
}

/// The single reactive target.
#[derive(Clone, Debug)]
pub struct Target {
    config: TargetConfig,
    holes: Vec<(f64, f64)>,
    phase: TargetPhase,
    hole: Option<usize>,
    rect: Rect,
    visible: bool,
    lock_remaining_ms: f64,
    hit: bool,
    rel_hit: Option<(f64, f64)>,
    hit_point: Option<(f64, f64)>,
    started_at: Option<Duration>,
    hit_at: Option<Duration>,
    moves: u64,
}

impl Target {
    /// Create a target over the given hole anchors.
    pub fn new(config: TargetConfig, holes: Vec<(f64, f64)>) -> Self {
        let rect = Rect::new(0.0, 0.0, config.width, config.height);
        Self {
            config,
            holes,
            phase: TargetPhase::Idle,
            hole: None,
            rect,
            visible: false,
            lock_remaining_ms: 0.0,
            hit: false,
            rel_hit: None,
            hit_point: None,
            started_at: None,
            hit_at: None,
            moves: 0,
        }
    }

    // =========================================================================
    // MOVES
    // =========================================================================

    /// Whether a new move may be requested.
    pub fn moveable(&self) -> bool {
        matches!(self.phase, TargetPhase::Idle | TargetPhase::Hidden)
    }

    /// Place the target under `hole` and start rising.
    ///
    /// Returns `Ok(false)` when the target is still visible.
    pub fn move_to(&mut self, hole: usize, now: Duration) -> Result<bool, ConfigError> {
        if hole >= self.holes.len() {
            return Err(ConfigError::PositionOutOfRange {
                index: hole,
                holes: self.holes.len(),
            });
        }
        if !self.moveable() {
            trace!(hole, phase = ?self.phase, "move ignored while target visible");
            return Ok(false);
        }

        let hx = self.holes[hole].0;
        self.rect.x = hx + self.config.offset_x;
        self.rect.y = self.hidden_y(hole);
        self.hole = Some(hole);
        self.hit = false;
        self.rel_hit = None;
        self.hit_point = None;
        self.hit_at = None;
        self.started_at = Some(now);
        self.lock_remaining_ms = 0.0;
        self.visible = true;
        self.phase = TargetPhase::Rising;
        Ok(true)
    }

    fn hidden_y(&self, hole: usize) -> f64 {
        self.holes[hole].1 + self.config.sink_margin
    }

    // =========================================================================
    // TIME ADVANCEMENT
    // =========================================================================

    /// Advance motion and lock timers by one tick.
    pub fn advance(&mut self, elapsed: Duration) -> TargetStep {
        let Some(hole) = self.hole else {
            return TargetStep::Continue;
        };
        let seconds = elapsed.as_secs_f64();
        let hole_y = self.holes[hole].1;

        match self.phase {
            TargetPhase::Rising => {
                if self.rect.y + self.rect.h - self.config.emerge_margin < hole_y {
                    return self.settle();
                }
                self.rect.y -= (self.config.ascent_speed * seconds).max(1.0);
                if self.rect.y + self.rect.h - self.config.emerge_margin < hole_y {
                    return self.settle();
                }
                TargetStep::Continue
            }
            TargetPhase::Settled => {
                self.lock_remaining_ms -= seconds * 1000.0;
                if self.lock_remaining_ms <= 0.0 {
                    self.lock_remaining_ms = 0.0;
                    self.phase = TargetPhase::Descending;
                    return TargetStep::Released;
                }
                TargetStep::Continue
            }
            TargetPhase::Descending => {
                let hidden_y = self.hidden_y(hole);
                let step = (self.config.descent_speed * seconds).max(1.0);
                self.rect.y = (self.rect.y + step).min(hidden_y);
                if self.rect.y >= hidden_y {
                    self.phase = TargetPhase::Hidden;
                    self.visible = false;
                    self.moves += 1;
                    return TargetStep::Completed;
                }
                TargetStep::Continue
            }
            TargetPhase::Idle | TargetPhase::Hidden => TargetStep::Continue,
        }
    }

    fn settle(&mut self) -> TargetStep {
        self.phase = TargetPhase::Settled;
        self.lock_remaining_ms = self.config.max_locked_ms;
        TargetStep::Settled
    }

    // =========================================================================
    // HITS
    // =========================================================================

    /// Deliver a pointer-down at `(x, y)`.
    pub fn hit(&mut self, x: f64, y: f64, now: Duration) -> HitOutcome {
        if self.phase != TargetPhase::Settled || self.hit {
            trace!(x, y, phase = ?self.phase, already_hit = self.hit, "hit ignored");
            return HitOutcome::Ignored;
        }
        if !self.rect.contains_strict(x, y) {
            return HitOutcome::Missed;
        }

        self.hit = true;
        self.hit_at = Some(now);
        self.rel_hit = Some((x - self.rect.x, y - self.rect.y));
        self.hit_point = Some((x, y));
        self.lock_remaining_ms = self.lock_remaining_ms.min(self.config.hit_locked_ms);

        let alive_ms = self.alive_ms().unwrap_or(1);
        let score_delta = score_for(alive_ms);
        HitOutcome::Scored {
            alive_ms,
            score_delta,
        }
    }

    /// Milliseconds between appearance and the hit, at least 1.
    fn alive_ms(&self) -> Option<u64> {
        let start = self.started_at?;
        let end = self.hit_at?;
        let ms = end.saturating_sub(start).as_secs_f64() * 1000.0;
        Some((ms.round() as u64).max(1))
    }

    /// Reaction time of the current rise, `None` on a miss.
    pub fn reaction_time_ms(&self) -> Option<u64> {
        if self.hit {
            self.alive_ms()
        } else {
            None
        }
    }

    // =========================================================================
    // STATE
    // =========================================================================

    pub fn phase(&self) -> TargetPhase {
        self.phase
    }

    pub fn hole(&self) -> Option<usize> {
        self.hole
    }

    pub fn hole_count(&self) -> usize {
        self.holes.len()
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn was_hit(&self) -> bool {
        self.hit
    }

    /// Hit position relative to the target's top-left corner.
    pub fn relative_hit(&self) -> Option<(f64, f64)> {
        self.rel_hit
    }

    /// Absolute hit position, for drawing the impact marker.
    pub fn hit_point(&self) -> Option<(f64, f64)> {
        self.hit_point
    }

    pub fn lock_remaining_ms(&self) -> f64 {
        self.lock_remaining_ms
    }

    /// Number of completed rises.
    pub fn moves(&self) -> u64 {
        self.moves
    }

    /// Portion of the target above the hole rim, relative to the target.
    ///
    /// The render collaborator clips the sprite to this rectangle.
    pub fn visible_slice(&self) -> Option<Rect> {
        let hole = self.hole?;
        if !self.visible {
            return None;
        }
        let rim = self.hidden_y(hole);
        let h = (rim - self.rect.y).clamp(0.0, self.rect.h);
        Some(Rect::new(0.0, 0.0, self.rect.w, h))
    }
}

/// Score awarded for a hit after `alive_ms` milliseconds.
pub fn score_for(alive_ms: u64) -> u64 {
    (SCORE_SCALE / alive_ms.max(1) as f64).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: Duration = Duration::from_millis(16);

    fn target() -> Target {
        Target::new(TargetConfig::default(), vec![(320.0, 450.0), (700.0, 500.0)])
    }

    /// Advance until the target reports `want`, returning the clock.
    fn run_until(t: &mut Target, mut now: Duration, want: TargetStep) -> Duration {
        for _ in 0..10_000 {
            now += FRAME;
            if t.advance(FRAME) == want {
                return now;
            }
        }
        panic!("target never reached {:?}", want);
    }

    fn centre(t: &Target) -> (f64, f64) {
        let r = t.rect();
        (r.x + r.w / 2.0, r.y + r.h / 2.0)
    }

    #[test]
    fn test_full_cycle_without_hit() {
        let mut t = target();
        assert!(t.moveable());
        assert!(t.move_to(1, Duration::ZERO).unwrap());
        assert_eq!(t.phase(), TargetPhase::Rising);
        assert!(!t.moveable());

        let now = run_until(&mut t, Duration::ZERO, TargetStep::Settled);
        assert_eq!(t.lock_remaining_ms(), TargetConfig::default().max_locked_ms);

        let now = run_until(&mut t, now, TargetStep::Released);
        run_until(&mut t, now, TargetStep::Completed);

        assert_eq!(t.phase(), TargetPhase::Hidden);
        assert!(!t.is_visible());
        assert_eq!(t.moves(), 1);
        assert_eq!(t.reaction_time_ms(), None);
        assert!(t.moveable());
    }

    #[test]
    fn test_out_of_range_position_is_an_error() {
        let mut t = target();
        assert!(matches!(
            t.move_to(2, Duration::ZERO),
            Err(ConfigError::PositionOutOfRange { index: 2, holes: 2 })
        ));
    }

    #[test]
    fn test_move_ignored_while_visible() {
        let mut t = target();
        t.move_to(0, Duration::ZERO).unwrap();
        assert!(!t.move_to(1, Duration::ZERO).unwrap());
        assert_eq!(t.hole(), Some(0));
    }

    #[test]
    fn test_rising_always_makes_progress() {
        let mut t = target();
        t.move_to(0, Duration::ZERO).unwrap();
        let y0 = t.rect().y;
        t.advance(Duration::ZERO);
        assert!(t.rect().y <= y0 - 1.0);
    }

    #[test]
    fn test_hit_scores_once_per_rise() {
        let mut t = target();
        t.move_to(0, Duration::ZERO).unwrap();
        run_until(&mut t, Duration::ZERO, TargetStep::Settled);

        let (x, y) = centre(&t);
        let outcome = t.hit(x, y, Duration::from_millis(500));
        assert_eq!(
            outcome,
            HitOutcome::Scored {
                alive_ms: 500,
                score_delta: 10
            }
        );
        assert_eq!(t.hit(x, y, Duration::from_millis(600)), HitOutcome::Ignored);
        assert_eq!(t.reaction_time_ms(), Some(500));
        assert!(t.lock_remaining_ms() <= TargetConfig::default().hit_locked_ms);
        let (rx, ry) = t.relative_hit().unwrap();
        assert!(rx > 0.0 && ry > 0.0);
    }

    #[test]
    fn test_hit_while_rising_is_ignored() {
        let mut t = target();
        t.move_to(0, Duration::ZERO).unwrap();
        let (x, y) = centre(&t);
        assert_eq!(t.hit(x, y, Duration::from_millis(10)), HitOutcome::Ignored);
        assert!(!t.was_hit());
    }

    #[test]
    fn test_hit_on_border_misses() {
        let mut t = target();
        t.move_to(0, Duration::ZERO).unwrap();
        run_until(&mut t, Duration::ZERO, TargetStep::Settled);
        let r = t.rect();
        assert_eq!(t.hit(r.x, r.y + 1.0, Duration::from_millis(300)), HitOutcome::Missed);
        assert_eq!(t.hit(r.x + r.w, r.y + 1.0, Duration::from_millis(300)), HitOutcome::Missed);
        // A miss does not use up the rise.
        let (x, y) = centre(&t);
        assert!(matches!(t.hit(x, y, Duration::from_millis(300)), HitOutcome::Scored { .. }));
    }

    #[test]
    fn test_zero_alive_time_clamped() {
        let mut t = target();
        t.move_to(0, Duration::from_millis(100)).unwrap();
        run_until(&mut t, Duration::ZERO, TargetStep::Settled);
        let (x, y) = centre(&t);
        // Hit timestamp equal to the start: alive time clamps to 1 ms.
        assert_eq!(
            t.hit(x, y, Duration::from_millis(100)),
            HitOutcome::Scored {
                alive_ms: 1,
                score_delta: 5000
            }
        );
    }

    #[test]
    fn test_hit_shortens_lock() {
        let mut t = target();
        t.move_to(0, Duration::ZERO).unwrap();
        let now = run_until(&mut t, Duration::ZERO, TargetStep::Settled);
        let (x, y) = centre(&t);
        t.hit(x, y, now);

        // 200 ms lock after hit: released within 13 frames, not 2 s.
        let mut released = false;
        for _ in 0..13 {
            if t.advance(FRAME) == TargetStep::Released {
                released = true;
                break;
            }
        }
        assert!(released);
    }

    #[test]
    fn test_visible_slice_grows_while_rising() {
        let mut t = target();
        t.move_to(0, Duration::ZERO).unwrap();
        let first = t.visible_slice().unwrap().h;
        t.advance(Duration::from_millis(100));
        let second = t.visible_slice().unwrap().h;
        assert!(second > first);
    }

    #[test]
    fn test_score_formula() {
        assert_eq!(score_for(500), 10);
        assert_eq!(score_for(0), 5000);
        assert_eq!(score_for(3000), 2);
        assert_eq!(score_for(1500), 3);
    }
}
