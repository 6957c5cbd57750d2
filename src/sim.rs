//! Scripted participant for headless runs
//!
//! Sees only what a render collaborator would draw and answers with input
//! events, so it exercises the same path as a real display loop.

use crate::scene::Drawable;
use crate::session::{Frame, InputEvent, Phase, Tick, TickSource};
use crate::target::Rect;
use rand::Rng;
use std::time::Duration;

/// Behaviour of the simulated participant.
#[derive(Clone, Debug)]
pub struct ParticipantProfile {
    /// Frame interval.
    pub step: Duration,
    /// Mean delay between the target appearing and the click.
    pub reaction_ms: u64,
    /// Uniform jitter added to the reaction, in `[0, jitter_ms]`.
    pub jitter_ms: u64,
    /// Chance of not reacting to a target at all.
    pub miss_rate: f64,
}

impl Default for ParticipantProfile {
    fn default() -> Self {
        Self {
            step: Duration::from_millis(16),
            reaction_ms: 550,
            jitter_ms: 300,
            miss_rate: 0.1,
        }
    }
}

/// A participant that clicks the target after a fixed reaction delay.
pub struct SimulatedParticipant<R: Rng> {
    profile: ParticipantProfile,
    rng: R,
    clock: Duration,
    /// Appearance time and planned click delay of the visible target.
    current: Option<(Duration, Option<Duration>)>,
    target: Option<Rect>,
    clicked: bool,
    phase: Phase,
    can_continue: bool,
    completed: usize,
    quit_after: Option<usize>,
}

impl<R: Rng> SimulatedParticipant<R> {
    pub fn new(profile: ParticipantProfile, rng: R) -> Self {
        Self {
            profile,
            rng,
            clock: Duration::ZERO,
            current: None,
            target: None,
            clicked: false,
            phase: Phase::Countdown,
            can_continue: false,
            completed: 0,
            quit_after: None,
        }
    }

    /// Quit (end the tick stream) once this many trials are complete.
    pub fn quit_after_trials(&mut self, trials: usize) {
        self.quit_after = Some(trials);
    }

    fn plan_reaction(&mut self) -> Option<Duration> {
        if self.profile.miss_rate > 0.0 && self.rng.gen_bool(self.profile.miss_rate.min(1.0)) {
            return None;
        }
        let jitter = if self.profile.jitter_ms > 0 {
            self.rng.gen_range(0..=self.profile.jitter_ms)
        } else {
            0
        };
        Some(Duration::from_millis(self.profile.reaction_ms + jitter))
    }
}

impl<R: Rng> TickSource for SimulatedParticipant<R> {
    fn present(&mut self, frame: &Frame) {
        self.phase = frame.phase;
        self.can_continue = frame.can_continue;
        self.completed = frame.session_trial;

        let rect = frame.drawables.iter().find_map(|d| match d {
            Drawable::Target { rect, .. } => Some(*rect),
            _ => None,
        });
        match rect {
            Some(rect) => {
                if self.current.is_none() {
                    let reaction = self.plan_reaction();
                    self.current = Some((self.clock, reaction));
                    self.clicked = false;
                }
                self.target = Some(rect);
            }
            None => {
                self.current = None;
                self.target = None;
            }
        }
    }

    fn next_tick(&mut self) -> Option<Tick> {
        if self.quit_after.is_some_and(|n| self.completed >= n) {
            return None;
        }

        let step = self.profile.step;
        let mut events = Vec::new();
        match self.phase {
            Phase::Rest if self.can_continue => events.push(InputEvent::Continue),
            Phase::Running => {
                if let (Some((appeared, Some(reaction))), Some(rect)) = (self.current, self.target) {
                    if !self.clicked && self.clock + step >= appeared + reaction {
                        events.push(InputEvent::PointerDown {
                            x: rect.x + rect.w / 2.0,
                            y: rect.y + rect.h / 2.0,
                        });
                        self.clicked = true;
                    }
                }
            }
            _ => {}
        }
        self.clock += step;
        Some(Tick::new(step, events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn frame(phase: Phase, target: Option<Rect>) -> Frame {
        Frame {
            phase,
            countdown_secs: None,
            can_continue: phase == Phase::Rest,
            drawables: target
                .map(|rect| {
                    vec![Drawable::Target {
                        rect,
                        visible: Rect::new(0.0, 0.0, rect.w, rect.h),
                    }]
                })
                .unwrap_or_default(),
            score: 0,
            audio_enabled: true,
            block: 0,
            session_trial: 0,
        }
    }

    fn exact(reaction_ms: u64) -> SimulatedParticipant<ChaCha8Rng> {
        let profile = ParticipantProfile {
            step: Duration::from_millis(10),
            reaction_ms,
            jitter_ms: 0,
            miss_rate: 0.0,
        };
        SimulatedParticipant::new(profile, ChaCha8Rng::seed_from_u64(0))
    }

    #[test]
    fn test_clicks_once_after_reaction() {
        let mut p = exact(30);
        let rect = Rect::new(100.0, 100.0, 40.0, 40.0);
        let mut clicks = 0;
        for _ in 0..10 {
            p.present(&frame(Phase::Running, Some(rect)));
            let tick = p.next_tick().unwrap();
            clicks += tick.events.len();
            if !tick.events.is_empty() {
                assert_eq!(tick.events[0], InputEvent::PointerDown { x: 120.0, y: 120.0 });
                assert_eq!(p.clock, Duration::from_millis(30));
            }
        }
        assert_eq!(clicks, 1);
    }

    #[test]
    fn test_continues_rest() {
        let mut p = exact(30);
        p.present(&frame(Phase::Rest, None));
        assert_eq!(p.next_tick().unwrap().events, vec![InputEvent::Continue]);
    }

    #[test]
    fn test_always_missing_never_clicks() {
        let profile = ParticipantProfile {
            miss_rate: 1.0,
            ..ParticipantProfile::default()
        };
        let mut p = SimulatedParticipant::new(profile, ChaCha8Rng::seed_from_u64(0));
        let rect = Rect::new(0.0, 0.0, 10.0, 10.0);
        for _ in 0..200 {
            p.present(&frame(Phase::Running, Some(rect)));
            assert!(p.next_tick().unwrap().events.is_empty());
        }
    }

    #[test]
    fn test_quit() {
        let mut p = exact(30);
        p.quit_after_trials(0);
        p.present(&frame(Phase::Running, None));
        assert!(p.next_tick().is_none());
    }
}
