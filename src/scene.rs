//! Scene layout - distractor placement and the drawable frame
//!
//! The render collaborator receives rectangles and visual state only. It never
//! feeds anything back except input events.

use crate::config::SceneConfig;
use crate::distribution::{DistractorCounts, Species};
use crate::target::{Rect, Target};
use rand::Rng;
use tracing::debug;

/// A placed distractor.
#[derive(Clone, Debug, PartialEq)]
pub struct Distractor {
    pub species: Species,
    pub rect: Rect,
}

impl Distractor {
    pub fn asset(&self) -> &'static str {
        self.species.asset()
    }
}

/// Something the render collaborator draws, in layer order.
#[derive(Clone, Debug, PartialEq)]
pub enum Drawable {
    Hole { index: usize, rect: Rect },
    Distractor(Distractor),
    /// The target, clipped to `visible` (relative to `rect`).
    Target { rect: Rect, visible: Rect },
    /// Impact marker centred on the hit point.
    HitMarker { x: f64, y: f64 },
}

/// Static playfield plus the current distractor arrangement.
#[derive(Clone, Debug)]
pub struct Scene {
    config: SceneConfig,
    holes: Vec<Rect>,
    distractors: Vec<Distractor>,
}

impl Scene {
    pub fn new(config: SceneConfig, hole_positions: &[(f64, f64)]) -> Self {
        let holes = hole_positions
            .iter()
            .map(|&(x, y)| Rect::new(x, y, config.hole_width, config.hole_height))
            .collect();
        Self {
            config,
            holes,
            distractors: Vec::new(),
        }
    }

    /// Areas distractors must not cover: each hole and the space above it,
    /// where the target rises.
    fn blocked(&self) -> impl Iterator<Item = Rect> + '_ {
        self.holes.iter().flat_map(|h| {
            let cover = Rect::new(h.x, h.y - h.h, h.w, h.h);
            [*h, cover]
        })
    }

    /// Scatter distractors at random non-overlapping spots.
    ///
    /// A distractor that finds no free spot within the attempt limit is left out.
    pub fn arrange<R: Rng + ?Sized>(&mut self, counts: &DistractorCounts, rng: &mut R) {
        self.distractors.clear();
        let c = &self.config;
        let (w, h) = (c.distractor_width, c.distractor_height);
        let max_x = (c.width - w - c.distractor_margin).max(0.0);
        let min_y = c.distractor_top.min(c.height);
        let max_y = (c.height - h - c.distractor_margin).max(min_y);

        let mut dropped = 0;
        for (species, n) in counts.iter() {
            for _ in 0..n {
                let mut placed = None;
                for _ in 0..self.config.max_placement_attempts {
                    let x = rng.gen_range(0.0..=max_x).round();
                    let y = rng.gen_range(min_y..=max_y).round();
                    let rect = Rect::new(x, y, w, h);
                    let collides = self.blocked().any(|b| b.intersects(&rect))
                        || self.distractors.iter().any(|d| d.rect.intersects(&rect));
                    if !collides {
                        placed = Some(rect);
                        break;
                    }
                }
                match placed {
                    Some(rect) => self.distractors.push(Distractor { species, rect }),
                    None => dropped += 1,
                }
            }
        }
        if dropped > 0 {
            debug!(dropped, "no room for some distractors");
        }
    }

    pub fn distractors(&self) -> &[Distractor] {
        &self.distractors
    }

    pub fn holes(&self) -> &[Rect] {
        &self.holes
    }

    /// Drawables in layer order: holes, distractors, target, hit marker.
    pub fn drawables(&self, target: &Target) -> Vec<Drawable> {
        let mut out: Vec<Drawable> = self
            .holes
            .iter()
            .enumerate()
            .map(|(index, &rect)| Drawable::Hole { index, rect })
            .collect();
        out.extend(self.distractors.iter().cloned().map(Drawable::Distractor));
        if let Some(visible) = target.visible_slice() {
            out.push(Drawable::Target {
                rect: target.rect(),
                visible,
            });
        }
        if target.is_visible() {
            if let Some((x, y)) = target.hit_point() {
                out.push(Drawable::HitMarker { x, y });
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TargetConfig, DEFAULT_HOLE_POSITIONS};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::time::Duration;

    fn scene() -> Scene {
        Scene::new(SceneConfig::default(), &DEFAULT_HOLE_POSITIONS)
    }

    #[test]
    fn test_arrange_places_without_overlap() {
        let mut s = scene();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let counts = DistractorCounts::from_pairs([(Species::Cat, 2), (Species::Snail, 3)]);
        s.arrange(&counts, &mut rng);

        let placed = s.distractors();
        assert_eq!(placed.len(), 5);
        for (i, a) in placed.iter().enumerate() {
            assert!(a.rect.y >= 400.0);
            assert!(a.rect.x + a.rect.w <= 1000.0);
            for hole in s.holes() {
                assert!(!a.rect.intersects(hole));
            }
            for b in &placed[i + 1..] {
                assert!(!a.rect.intersects(&b.rect));
            }
        }
    }

    #[test]
    fn test_arrange_is_reproducible() {
        let counts = DistractorCounts::from_pairs([(Species::Hippo, 4)]);
        let mut a = scene();
        let mut b = scene();
        a.arrange(&counts, &mut ChaCha8Rng::seed_from_u64(9));
        b.arrange(&counts, &mut ChaCha8Rng::seed_from_u64(9));
        assert_eq!(a.distractors(), b.distractors());
    }

    #[test]
    fn test_crowded_scene_drops_instead_of_looping() {
        let config = SceneConfig {
            distractor_width: 400.0,
            distractor_height: 150.0,
            max_placement_attempts: 20,
            ..SceneConfig::default()
        };
        let mut s = Scene::new(config, &[]);
        let counts = DistractorCounts::from_pairs([(Species::Rabbit, 50)]);
        s.arrange(&counts, &mut ChaCha8Rng::seed_from_u64(2));
        assert!(s.distractors().len() < 50);
    }

    #[test]
    fn test_drawables_include_visible_target() {
        let s = scene();
        let mut target = Target::new(TargetConfig::default(), DEFAULT_HOLE_POSITIONS.to_vec());
        assert_eq!(s.drawables(&target).len(), 4);

        target.move_to(2, Duration::ZERO).unwrap();
        target.advance(Duration::from_millis(50));
        let drawables = s.drawables(&target);
        assert!(matches!(drawables.last(), Some(Drawable::Target { .. })));
    }
}
