use alloc::vec::Vec;

use virtualview::{
    Align, DataSource, Easing, Entity, Measurer, PumpStatus, Realizer, Renderer, Ticket,
    ViewError, ViewEvent, ViewOptions,
};

use crate::{FocusAnchor, Tween, apply_focus_anchor, capture_focus_anchor};

/// What one [`Controller::tick`] produced.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub status: PumpStatus,
    /// Offset the host scroll container should show, when the engine moved it.
    pub scroll_to: Option<u64>,
    /// Events drained from the engine during this tick.
    pub events: Vec<ViewEvent>,
}

/// A framework-neutral driver around a [`Realizer`].
///
/// It holds no UI objects. Hosts call:
/// - `on_scroll` / `end_scroll_gesture` / `on_resize` when UI events occur
/// - `tick(now_ms)` once per frame, mirroring `Frame::scroll_to` into the scroll container
/// - `render_complete` after painting
pub struct Controller<D: DataSource, R: Renderer, M: Measurer> {
    view: Realizer<D, R, M>,
    tween: Option<Tween>,
}

impl<D: DataSource, R: Renderer, M: Measurer> Controller<D, R, M> {
    pub fn new(options: ViewOptions, data: D, renderer: R, measurer: M) -> Self {
        Self::from_realizer(Realizer::new(options, data, renderer, measurer))
    }

    pub fn from_realizer(view: Realizer<D, R, M>) -> Self {
        Self { view, tween: None }
    }

    pub fn realizer(&self) -> &Realizer<D, R, M> {
        &self.view
    }

    pub fn realizer_mut(&mut self) -> &mut Realizer<D, R, M> {
        &mut self.view
    }

    pub fn into_realizer(self) -> Realizer<D, R, M> {
        self.view
    }

    pub fn is_animating(&self) -> bool {
        self.tween.is_some()
    }

    pub fn tween(&self) -> Option<&Tween> {
        self.tween.as_ref()
    }

    /// Drops the active tween where it is. The engine keeps the last sampled offset.
    pub fn cancel_animation(&mut self) {
        if self.tween.take().is_some() {
            self.view.end_scroll_gesture();
        }
    }

    /// User scroll (wheel, drag, inertia). Cancels any active tween.
    pub fn on_scroll(&mut self, offset: u64) {
        self.tween = None;
        self.view.on_scroll(offset);
    }

    pub fn end_scroll_gesture(&mut self) {
        self.view.end_scroll_gesture();
    }

    pub fn on_resize(&mut self) {
        self.view.resize();
    }

    pub fn render_complete(&mut self) {
        self.view.render_complete();
    }

    /// Advances the active tween, then pumps the engine for one frame.
    pub fn tick(&mut self, now_ms: u64) -> Result<Frame, ViewError> {
        let mut scroll_to = None;
        if let Some(tween) = self.tween {
            let offset = tween.sample(now_ms);
            if offset != self.view.scroll_offset() {
                self.view.on_scroll(offset);
            }
            scroll_to = Some(offset);
            if tween.is_done(now_ms) {
                vtrace!(offset, "tween finished");
                self.tween = None;
                self.view.end_scroll_gesture();
            }
        }

        let status = self.view.pump(now_ms)?;
        let events = self.view.drain_events();
        for event in &events {
            match event {
                ViewEvent::ScrollRequested { offset, .. } => scroll_to = Some(*offset),
                // A failed pass put the view back where it last settled.
                ViewEvent::ScrollRestored { offset } => {
                    if self.tween.take().is_some() {
                        vdebug!(offset, "tween dropped by a restored offset");
                    }
                    scroll_to = Some(*offset);
                }
                _ => {}
            }
        }
        Ok(Frame {
            status,
            scroll_to,
            events,
        })
    }

    /// Jumps to `entity` without animation. The resulting offset arrives in the next
    /// `Frame::scroll_to`; the ticket settles through `Frame::events`.
    pub fn scroll_to_entity(&mut self, entity: Entity, align: Align) -> Ticket {
        self.tween = None;
        self.view.ensure_visible(entity, align)
    }

    /// Starts a tween that ends with `entity` aligned. Returns the target offset, or `None`
    /// when the layout does not know the entity yet.
    pub fn start_tween_to_entity(
        &mut self,
        entity: Entity,
        align: Align,
        now_ms: u64,
        duration_ms: u64,
        easing: Easing,
    ) -> Option<u64> {
        let to = self.view.offset_for(entity, align)?;
        Some(self.start_tween_to_offset(to, now_ms, duration_ms, easing))
    }

    /// Starts a tween to `offset`, clamped to the scrollable extent. Returns the target.
    pub fn start_tween_to_offset(
        &mut self,
        offset: u64,
        now_ms: u64,
        duration_ms: u64,
        easing: Easing,
    ) -> u64 {
        let to = offset.min(self.view.max_scroll_offset());
        let from = match self.tween {
            Some(tween) => tween.sample(now_ms),
            None => self.view.scroll_offset(),
        };
        vdebug!(from, to, duration_ms, "start tween");
        self.tween = Some(Tween::new(from, to, now_ms, duration_ms, easing));
        to
    }

    pub fn capture_focus_anchor<K>(
        &self,
        key_for: impl FnOnce(usize) -> K,
    ) -> Option<FocusAnchor<K>> {
        capture_focus_anchor(&self.view, key_for)
    }

    /// Applies an anchor after a reload. Cancels any active tween and returns the offset the
    /// host should scroll to.
    pub fn apply_focus_anchor<K>(
        &mut self,
        anchor: &FocusAnchor<K>,
        key_to_index: impl FnOnce(&K) -> Option<usize>,
    ) -> Option<u64> {
        self.tween = None;
        apply_focus_anchor(&mut self.view, anchor, key_to_index)
    }
}

impl<D: DataSource, R: Renderer, M: Measurer> core::fmt::Debug for Controller<D, R, M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Controller")
            .field("view", &self.view)
            .field("tween", &self.tween)
            .finish()
    }
}
