//! Edit animations: fade out removed visuals, reflow moved ones, fade in inserted ones.
//!
//! Visuals are placed at their final bounds before a sequence starts; the sequencer only drives
//! [`VisualTransform`]s back to identity. Snapping is therefore always a single identity write.

use alloc::vec::Vec;

use crate::host::{Renderer, VisualId, VisualTransform};
use crate::{Bounds, Orientation};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Easing {
    Linear,
    SmoothStep,
    EaseInOutCubic,
}

impl Easing {
    pub fn sample(self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Self::Linear => t,
            Self::SmoothStep => t * t * (3.0 - 2.0 * t),
            Self::EaseInOutCubic => {
                if t < 0.5 {
                    4.0 * t * t * t
                } else {
                    let u = -2.0 * t + 2.0;
                    1.0 - (u * u * u) / 2.0
                }
            }
        }
    }
}

/// Timing knobs for edit animations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AnimationConfig {
    pub fade_out_ms: u64,
    pub fade_in_ms: u64,
    /// Shortest move pass.
    pub move_min_ms: u64,
    /// Longest move pass.
    pub move_max_ms: u64,
    /// Extra move time per 100 px of the pass's largest displacement.
    pub move_ms_per_100px: u64,
    /// Gap between the end of one non-empty phase and the start of the next.
    pub phase_delay_ms: u64,
    pub easing: Easing,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            fade_out_ms: 120,
            fade_in_ms: 120,
            move_min_ms: 150,
            move_max_ms: 400,
            move_ms_per_100px: 40,
            phase_delay_ms: 30,
            easing: Easing::EaseInOutCubic,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PhaseKind {
    FadeOut,
    /// Slide across tracks (cross axis); only used when some move changes track.
    MoveCross,
    MoveMain,
    FadeIn,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Phase {
    pub kind: PhaseKind,
    /// Relative to the start of the sequence.
    pub start_ms: u64,
    pub duration_ms: u64,
}

impl Phase {
    pub fn end_ms(&self) -> u64 {
        self.start_ms + self.duration_ms
    }

    fn progress(&self, elapsed: u64) -> f32 {
        if elapsed <= self.start_ms {
            return 0.0;
        }
        ((elapsed - self.start_ms) as f32 / self.duration_ms.max(1) as f32).min(1.0)
    }
}

/// A visual moving from `from` to `to`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MoveInput {
    pub visual: VisualId,
    pub from: Bounds,
    pub to: Bounds,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Move {
    visual: VisualId,
    /// `from - to`, split by axis.
    main: i64,
    cross: i64,
}

/// An ordered animation plan.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AnimationPlan {
    pub phases: Vec<Phase>,
    orientation: Orientation,
    removed: Vec<VisualId>,
    moves: Vec<Move>,
    inserted: Vec<VisualId>,
}

impl AnimationPlan {
    /// Builds the phase list. Phases with nothing to animate are left out and each phase starts
    /// `phase_delay_ms` after the previous one ends.
    pub fn new(
        config: &AnimationConfig,
        orientation: Orientation,
        removed: &[VisualId],
        moves: &[MoveInput],
        inserted: &[VisualId],
    ) -> Self {
        let moves: Vec<Move> = moves
            .iter()
            .filter(|m| m.from != m.to)
            .map(|m| Move {
                visual: m.visual,
                main: m.from.main_start(orientation) as i64 - m.to.main_start(orientation) as i64,
                cross: m.from.cross_start(orientation) as i64
                    - m.to.cross_start(orientation) as i64,
            })
            .collect();

        let mut phases = Vec::new();
        let mut push = |kind, duration_ms| {
            let start_ms = phases
                .last()
                .map_or(0, |p: &Phase| p.end_ms() + config.phase_delay_ms);
            phases.push(Phase {
                kind,
                start_ms,
                duration_ms,
            });
        };

        if !removed.is_empty() {
            push(PhaseKind::FadeOut, config.fade_out_ms);
        }
        let crosses_tracks = moves.iter().any(|m| m.main != 0 && m.cross != 0);
        if crosses_tracks {
            let max_cross = moves.iter().map(|m| m.cross.unsigned_abs()).max().unwrap_or(0);
            push(PhaseKind::MoveCross, move_duration(config, max_cross));
        }
        if !moves.is_empty() {
            let max = moves
                .iter()
                .map(|m| {
                    if crosses_tracks {
                        m.main.unsigned_abs()
                    } else {
                        m.main.unsigned_abs().max(m.cross.unsigned_abs())
                    }
                })
                .max()
                .unwrap_or(0);
            push(PhaseKind::MoveMain, move_duration(config, max));
        }
        if !inserted.is_empty() {
            push(PhaseKind::FadeIn, config.fade_in_ms);
        }

        Self {
            phases,
            orientation,
            removed: removed.to_vec(),
            moves,
            inserted: inserted.to_vec(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    pub fn duration_ms(&self) -> u64 {
        self.phases.last().map_or(0, Phase::end_ms)
    }

    pub fn phase(&self, kind: PhaseKind) -> Option<&Phase> {
        self.phases.iter().find(|p| p.kind == kind)
    }

    pub fn removed(&self) -> &[VisualId] {
        &self.removed
    }

    fn transform_at(
        &self,
        elapsed: u64,
        easing: Easing,
    ) -> impl Iterator<Item = (VisualId, VisualTransform)> + '_ {
        let progress = move |kind| {
            self.phase(kind)
                .map_or(1.0, |p| easing.sample(p.progress(elapsed)))
        };
        let fade_out = progress(PhaseKind::FadeOut);
        let fade_in = progress(PhaseKind::FadeIn);
        let cross_phase = self.phase(PhaseKind::MoveCross).is_some();
        let cross_t = progress(PhaseKind::MoveCross);
        let main_t = progress(PhaseKind::MoveMain);
        let orientation = self.orientation;

        let removed = self.removed.iter().map(move |&v| {
            (
                v,
                VisualTransform {
                    opacity: 1.0 - fade_out,
                    ..VisualTransform::IDENTITY
                },
            )
        });
        let moves = self.moves.iter().map(move |m| {
            let remaining = |delta: i64, t: f32| round(delta as f32 * (1.0 - t));
            let main = remaining(m.main, main_t);
            let cross = if cross_phase {
                remaining(m.cross, cross_t)
            } else {
                remaining(m.cross, main_t)
            };
            let (dx, dy) = match orientation {
                Orientation::Vertical => (cross, main),
                Orientation::Horizontal => (main, cross),
            };
            (
                m.visual,
                VisualTransform {
                    dx,
                    dy,
                    opacity: 1.0,
                },
            )
        });
        let inserted = self.inserted.iter().map(move |&v| {
            (
                v,
                VisualTransform {
                    opacity: fade_in,
                    ..VisualTransform::IDENTITY
                },
            )
        });
        removed.chain(moves).chain(inserted)
    }
}

// `f32::round` needs std.
fn round(v: f32) -> i64 {
    if v >= 0.0 {
        (v + 0.5) as i64
    } else {
        (v - 0.5) as i64
    }
}

fn move_duration(config: &AnimationConfig, displacement: u64) -> u64 {
    let scaled = config.move_min_ms + displacement * config.move_ms_per_100px / 100;
    scaled.clamp(config.move_min_ms, config.move_max_ms.max(config.move_min_ms))
}

#[derive(Clone, Debug)]
struct Running {
    plan: AnimationPlan,
    started_ms: u64,
    easing: Easing,
}

/// Drives one [`AnimationPlan`] at a time.
#[derive(Clone, Debug, Default)]
pub struct AnimationSequencer {
    active: Option<Running>,
}

impl AnimationSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Applies the initial transforms and starts the clock.
    pub fn start(
        &mut self,
        plan: AnimationPlan,
        easing: Easing,
        now_ms: u64,
        renderer: &mut dyn Renderer,
    ) {
        vdebug!(
            phases = plan.phases.len(),
            duration_ms = plan.duration_ms(),
            "AnimationSequencer::start"
        );
        for (visual, transform) in plan.transform_at(0, easing) {
            renderer.apply_transform(visual, transform);
        }
        self.active = Some(Running {
            plan,
            started_ms: now_ms,
            easing,
        });
    }

    /// Advances the active sequence. Returns the removed visuals once it finishes so the caller
    /// can drop them; `None` while running or idle.
    pub fn tick(&mut self, now_ms: u64, renderer: &mut dyn Renderer) -> Option<Vec<VisualId>> {
        let running = self.active.as_ref()?;
        let elapsed = now_ms.saturating_sub(running.started_ms);
        if elapsed >= running.plan.duration_ms() {
            return Some(self.finish(renderer));
        }
        for (visual, transform) in running.plan.transform_at(elapsed, running.easing) {
            renderer.apply_transform(visual, transform);
        }
        None
    }

    /// Cancels the remaining phases and snaps every animated visual to its final geometry.
    /// Returns the removed visuals, which must be dropped by the caller.
    pub fn cancel_and_snap(&mut self, renderer: &mut dyn Renderer) -> Vec<VisualId> {
        if self.active.is_none() {
            return Vec::new();
        }
        vdebug!("AnimationSequencer::cancel_and_snap");
        self.finish(renderer)
    }

    fn finish(&mut self, renderer: &mut dyn Renderer) -> Vec<VisualId> {
        let Some(Running { plan, .. }) = self.active.take() else {
            return Vec::new();
        };
        for m in &plan.moves {
            renderer.apply_transform(m.visual, VisualTransform::IDENTITY);
        }
        for &v in &plan.inserted {
            renderer.apply_transform(v, VisualTransform::IDENTITY);
        }
        plan.removed
    }
}
