//! The realization state machine.
//!
//! A [`Realizer`] owns the structural tree, the layout strategy, the materialization window and
//! the animation sequencer, and drives them from a cooperative job queue. Hosts call the request
//! methods (`realize_page`, `on_scroll`, `update_tree`, ...) whenever something happens and
//! [`Realizer::pump`] once per frame; results come back through [`Realizer::drain_events`].
//!
//! Every request is routed through the current [`RealizationState`]. A request that arrives in a
//! state that cannot serve it right away is folded into the work already pending, so a burst of
//! scrolls or edits costs one pass, not one per call.

use alloc::boxed::Box;
use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;

use crate::animation::{AnimationPlan, AnimationSequencer, MoveInput};
use crate::events::{PumpStatus, Settled, Ticket, ViewEvent};
use crate::host::{
    DataSource, GroupDescriptor, ItemRequest, Measurer, RecordHandle, Renderer, RequestId,
    VisualId, VisualTransform,
};
use crate::layout::{self, LayoutSite, LayoutStrategy};
use crate::notifications::{Notification, NotificationBatch};
use crate::scheduler::{JobStep, Priority, Scheduler, TimeSlice};
use crate::tree::{GroupNode, Tree};
use crate::tree_builder::{BuildStep, TreeBuilder};
use crate::window::{EditEffect, ItemState, PassId, WindowManager};
use crate::{
    Adjacent, AffectedRange, Align, Bounds, DataError, Entity, EntityKind, FrameState,
    HitTestResult, ModifiedElement, NavigationKey, OrderingMetadata, Point, ScrollDirection, Size,
    ViewError, ViewOptions, WindowState,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RealizationState {
    /// Nothing requested yet.
    Created,
    /// The tree builder is creating slots.
    Building,
    LayingOut,
    /// A layout was interrupted by a notification batch or a stop.
    LayoutCanceled,
    /// A realize pass is requesting and attaching items.
    Realizing,
    /// A realize pass started by a scroll is running.
    Scrolling,
    /// The scroll pass finished; waiting for the gesture to end.
    ScrollingPaused,
    /// Edit animations are playing.
    RealizingAnimating,
    /// Stale visuals are being dropped; waiting for the host's render-complete signal.
    Unrealizing,
    Canceled,
    Completed,
    /// Containers created in the background are being laid out.
    LayingOutNewContainers,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Work {
    BuildTree,
    Layout,
    StartPass,
    PlaceSpanning,
    Realize { pass: PassId, index: usize },
    LazyEvict,
    Ordering { pass: PassId },
}

impl Work {
    /// Work that may run while a notification batch is open.
    fn runs_during_batch(&self) -> bool {
        matches!(
            self,
            Work::PlaceSpanning | Work::LazyEvict | Work::Ordering { .. }
        )
    }
}

/// First item (and header) rendered on the measuring surface when sizes are not configured.
#[derive(Debug, Default)]
struct Probe {
    surface: bool,
    request: Option<RequestId>,
    record: Option<RecordHandle>,
    visual: Option<VisualId>,
    header: Option<VisualId>,
}

/// Edits whose animation starts once the next pass completes.
#[derive(Debug, Default)]
struct PendingEdit {
    /// Visual and its bounds before the edit.
    moves: Vec<(VisualId, Bounds)>,
    removed: Vec<VisualId>,
    inserted: Vec<usize>,
}

/// Drives tree building, layout and realization for one items view.
pub struct Realizer<D: DataSource, R: Renderer, M: Measurer> {
    options: ViewOptions,
    data: D,
    renderer: R,
    measurer: M,

    state: RealizationState,
    scheduler: Scheduler<Work>,
    builder: TreeBuilder,
    layout: Box<dyn LayoutStrategy>,
    window: WindowManager,
    animation: AnimationSequencer,

    count: usize,
    viewport: Size,
    measured_item: Option<Size>,
    measured_header: Option<Size>,
    probe: Probe,

    affected: AffectedRange,
    modified_items: Vec<ModifiedElement>,
    modified_groups: Vec<ModifiedElement>,
    pending_edit: Option<PendingEdit>,

    scroll_offset: u64,
    /// Offset the running pass was computed for.
    pass_offset: u64,
    /// Offset of the last pass that completed; failures restore it.
    settled_offset: u64,
    /// The running pass re-realizes a rolled-back window.
    recovering: bool,
    direction: ScrollDirection,
    is_scrolling: bool,

    batch: Option<NotificationBatch>,
    batch_depth: usize,

    pass_open: bool,
    viewport_signaled: bool,
    replay: bool,
    now_ms: u64,

    events: VecDeque<ViewEvent>,
    next_ticket: u64,
    /// Tickets the running pass settles.
    active: Vec<Ticket>,
    /// Tickets the next pass settles.
    queued: Vec<Ticket>,
    waiters: Vec<(Ticket, Entity)>,
    ensures: Vec<(Ticket, Entity, Align)>,
}

impl<D: DataSource, R: Renderer, M: Measurer> Realizer<D, R, M> {
    pub fn new(options: ViewOptions, data: D, renderer: R, measurer: M) -> Self {
        vdebug!(?options, "Realizer::new");
        let layout = layout::build(
            options.layout,
            options.item_info.clone(),
            options.group_info.clone(),
        );
        let tree = Tree::new(options.block_capacity, options.groups_enabled);
        Self {
            builder: TreeBuilder::new(options.build_chunk_initial, options.build_chunk_max),
            window: WindowManager::new(tree, options.eviction_slack),
            layout,
            options,
            data,
            renderer,
            measurer,
            state: RealizationState::Created,
            scheduler: Scheduler::new(),
            animation: AnimationSequencer::new(),
            count: 0,
            viewport: Size::default(),
            measured_item: None,
            measured_header: None,
            probe: Probe::default(),
            affected: AffectedRange::new(),
            modified_items: Vec::new(),
            modified_groups: Vec::new(),
            pending_edit: None,
            scroll_offset: 0,
            pass_offset: 0,
            settled_offset: 0,
            recovering: false,
            direction: ScrollDirection::Forward,
            is_scrolling: false,
            batch: None,
            batch_depth: 0,
            pass_open: false,
            viewport_signaled: false,
            replay: false,
            now_ms: 0,
            events: VecDeque::new(),
            next_ticket: 0,
            active: Vec::new(),
            queued: Vec::new(),
            waiters: Vec::new(),
            ensures: Vec::new(),
        }
    }

    pub fn options(&self) -> &ViewOptions {
        &self.options
    }

    pub fn state(&self) -> RealizationState {
        self.state
    }

    pub fn window_state(&self) -> WindowState {
        self.window.state()
    }

    pub fn frame_state(&self) -> FrameState {
        FrameState {
            scroll_offset: self.scroll_offset,
            is_scrolling: self.is_scrolling,
            window: self.window.state(),
        }
    }

    pub fn scroll_offset(&self) -> u64 {
        self.scroll_offset
    }

    pub fn window(&self) -> &WindowManager {
        &self.window
    }

    pub fn tree(&self) -> &Tree {
        self.window.tree()
    }

    pub fn layout(&self) -> &dyn LayoutStrategy {
        &*self.layout
    }

    pub fn data(&self) -> &D {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut D {
        &mut self.data
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    pub fn measurer(&self) -> &M {
        &self.measurer
    }

    pub fn measurer_mut(&mut self) -> &mut M {
        &mut self.measurer
    }

    pub fn is_animating(&self) -> bool {
        self.animation.is_active()
    }

    /// The host was unavailable during the last layout; the next trigger replays it.
    pub fn needs_replay(&self) -> bool {
        self.replay
    }

    /// A notification batch is open. Hosts should treat the view as not quiescent.
    pub fn has_outstanding_notifications(&self) -> bool {
        self.batch.is_some()
    }

    pub fn drain_events(&mut self) -> Vec<ViewEvent> {
        self.events.drain(..).collect()
    }

    pub fn set_options(&mut self, options: ViewOptions) {
        let rebuild = self.options.needs_rebuild(&options);
        let relayout = self.options.needs_relayout(&options);
        vdebug!(rebuild, relayout, "Realizer::set_options");

        self.window.set_slack(options.eviction_slack);
        if options.build_chunk_initial != self.options.build_chunk_initial
            || options.build_chunk_max != self.options.build_chunk_max
        {
            self.builder = TreeBuilder::new(options.build_chunk_initial, options.build_chunk_max);
        }
        if options.item_size != self.options.item_size {
            self.measured_item = None;
        }
        if options.header_size != self.options.header_size {
            self.measured_header = None;
        }
        self.options = options;

        if rebuild {
            self.snap_animation();
            self.window.clear(&mut self.data, &mut self.renderer);
            *self.window.tree_mut() =
                Tree::new(self.options.block_capacity, self.options.groups_enabled);
            self.layout = self.build_layout();
            if self.state != RealizationState::Created {
                self.rebuild_tree();
            }
        } else if relayout {
            self.layout = self.build_layout();
            if self.state != RealizationState::Created {
                self.relayout();
            }
        }
    }

    pub fn update_options(&mut self, f: impl FnOnce(&mut ViewOptions)) {
        let mut next = self.options.clone();
        f(&mut next);
        self.set_options(next);
    }

    fn build_layout(&self) -> Box<dyn LayoutStrategy> {
        layout::build(
            self.options.layout,
            self.options.item_info.clone(),
            self.options.group_info.clone(),
        )
    }

    fn transition(&mut self, to: RealizationState) {
        let from = self.state;
        if from == to {
            return;
        }
        vdebug!(?from, ?to, "state transition");
        self.state = to;
        self.events.push_back(ViewEvent::StateChanged { from, to });
    }

    fn ticket(&mut self) -> Ticket {
        self.next_ticket += 1;
        Ticket(self.next_ticket)
    }

    fn settle(&mut self, ticket: Ticket, result: Result<Settled, ViewError>) {
        self.events.push_back(ViewEvent::Outcome { ticket, result });
    }

    fn schedule_once(&mut self, priority: Priority, work: Work) {
        if !self.scheduler.any(|w| *w == work) {
            self.scheduler.schedule(priority, work);
        }
    }

    fn layout_ready(&self) -> bool {
        self.layout.is_initialized()
            && !matches!(
                self.state,
                RealizationState::Created | RealizationState::Building
            )
    }

    // ---------------------------------------------------------------------------------------
    // Requests
    // ---------------------------------------------------------------------------------------

    /// Drops the tree and every materialized item, then rebuilds from the data source.
    pub fn rebuild_tree(&mut self) {
        let count = self.data.count();
        vinfo!(count, "Realizer::rebuild_tree");
        self.snap_animation();
        self.window.clear(&mut self.data, &mut self.renderer);
        self.scheduler.retain(|_| false);
        let groups = self.current_groups(count);
        self.builder.rebuild(self.window.tree_mut(), &groups);
        self.count = count;
        self.affected.add_all();
        self.modified_items.clear();
        self.modified_groups.clear();
        self.pass_open = false;
        self.replay = false;
        self.transition(RealizationState::Building);
        self.scheduler.schedule(Priority::High, Work::BuildTree);
    }

    /// Recomputes every position. Running animations snap to their final geometry.
    pub fn relayout(&mut self) {
        vdebug!(state = ?self.state, "Realizer::relayout");
        let animating = self.animation.is_active() || self.pending_edit.is_some();
        self.snap_animation();
        self.affected.add_all();
        self.replay = false;
        match self.state {
            RealizationState::Created | RealizationState::Building => {}
            _ => {
                if animating {
                    self.transition(RealizationState::Canceled);
                }
                self.transition(RealizationState::LayingOut);
                self.schedule_once(Priority::High, Work::Layout);
            }
        }
    }

    /// The viewport changed size. Animations snap and the state passes through `Canceled`
    /// until the next layout runs.
    pub fn resize(&mut self) {
        vdebug!(state = ?self.state, "Realizer::resize");
        self.snap_animation();
        self.replay = false;
        match self.state {
            RealizationState::Created | RealizationState::Building => {}
            _ => {
                self.transition(RealizationState::Canceled);
                self.schedule_once(Priority::High, Work::Layout);
            }
        }
    }

    /// Lays out containers that appeared after the last pass.
    pub fn layout_new_containers(&mut self) {
        match self.state {
            RealizationState::Completed
            | RealizationState::Unrealizing
            | RealizationState::ScrollingPaused => {
                self.transition(RealizationState::LayingOutNewContainers);
                self.schedule_once(Priority::High, Work::Layout);
            }
            // A pending pass or layout picks them up.
            _ => {}
        }
    }

    /// Realizes the window around the current scroll offset. The returned ticket settles when
    /// that window is complete.
    pub fn realize_page(&mut self) -> Ticket {
        let ticket = self.ticket();
        vdebug!(ticket = ticket.0, state = ?self.state, "Realizer::realize_page");
        self.queued.push(ticket);
        self.kick(Work::StartPass);
        ticket
    }

    /// Makes sure work is pending that will eventually start a realize pass.
    fn kick(&mut self, pass_work: Work) {
        if self.replay {
            self.replay = false;
            self.transition(RealizationState::LayingOut);
            self.schedule_once(Priority::High, Work::Layout);
            return;
        }
        match self.state {
            RealizationState::Created => self.rebuild_tree(),
            RealizationState::Building
            | RealizationState::LayingOut
            | RealizationState::LayingOutNewContainers => {}
            RealizationState::Canceled | RealizationState::LayoutCanceled => {
                if !self
                    .scheduler
                    .any(|w| matches!(w, Work::Layout | Work::BuildTree))
                {
                    if self.window.tree().is_complete() {
                        self.schedule_once(Priority::High, Work::Layout);
                    } else {
                        self.schedule_once(Priority::High, Work::BuildTree);
                    }
                }
            }
            _ => self.schedule_once(Priority::Max, pass_work),
        }
    }

    /// Scrolls so `entity` is visible with the given alignment.
    ///
    /// The new offset is reported as [`ViewEvent::ScrollRequested`]; the ticket settles once the
    /// window around it is realized.
    pub fn ensure_visible(&mut self, entity: Entity, align: Align) -> Ticket {
        let ticket = self.ticket();
        vdebug!(ticket = ticket.0, ?entity, ?align, "Realizer::ensure_visible");
        if self.layout_ready() && !self.layout_stale() {
            if self.scroll_into_view(ticket, entity, align) {
                self.kick(Work::StartPass);
            }
        } else {
            self.ensures.push((ticket, entity, align));
            self.kick(Work::StartPass);
        }
        ticket
    }

    fn layout_stale(&self) -> bool {
        self.replay
            || matches!(
                self.state,
                RealizationState::LayingOut
                    | RealizationState::LayoutCanceled
                    | RealizationState::Canceled
            )
    }

    /// Settles `ticket` with its target bounds once the layout knows them exactly.
    pub fn wait_for_entity_position(&mut self, entity: Entity) -> Ticket {
        let ticket = self.ticket();
        self.waiters.push((ticket, entity));
        if self.layout_ready() {
            self.resolve_waiters();
        } else if self.state == RealizationState::Created {
            self.rebuild_tree();
        }
        ticket
    }

    /// The host scrolled. Offsets past the scrollable extent are clamped once a layout exists.
    pub fn on_scroll(&mut self, offset: u64) {
        let offset = if self.layout_ready() && !self.layout_stale() {
            offset.min(self.max_scroll_offset())
        } else {
            offset
        };
        if offset != self.scroll_offset {
            self.direction = if offset > self.scroll_offset {
                ScrollDirection::Forward
            } else {
                ScrollDirection::Backward
            };
        }
        vtrace!(offset, direction = ?self.direction, "Realizer::on_scroll");
        self.scroll_offset = offset;
        self.is_scrolling = true;
        if matches!(
            self.state,
            RealizationState::Realizing
                | RealizationState::ScrollingPaused
                | RealizationState::RealizingAnimating
                | RealizationState::Unrealizing
                | RealizationState::Completed
        ) && !self.replay
        {
            self.transition(RealizationState::Scrolling);
        }
        self.kick(Work::StartPass);
    }

    /// The scroll gesture (including inertia) ended.
    pub fn end_scroll_gesture(&mut self) {
        vtrace!("Realizer::end_scroll_gesture");
        self.is_scrolling = false;
        if self.state == RealizationState::ScrollingPaused {
            self.enter_unrealizing();
        }
    }

    /// The host painted the last batch of placements.
    pub fn render_complete(&mut self) {
        if self.state == RealizationState::Unrealizing {
            self.transition(RealizationState::Completed);
        }
    }

    /// Cancels the running pass. With `stop_tree_creation`, background tree building stops too.
    pub fn stop(&mut self, stop_tree_creation: bool) {
        vdebug!(stop_tree_creation, state = ?self.state, "Realizer::stop");
        self.scheduler.retain(|w| match w {
            Work::BuildTree => !stop_tree_creation,
            Work::LazyEvict | Work::Ordering { .. } => true,
            Work::Layout | Work::StartPass | Work::PlaceSpanning | Work::Realize { .. } => false,
        });
        self.snap_animation();
        self.pass_open = false;
        self.supersede_all();
        let to = match self.state {
            RealizationState::LayingOut | RealizationState::LayingOutNewContainers => {
                RealizationState::LayoutCanceled
            }
            RealizationState::Created => return,
            _ => RealizationState::Canceled,
        };
        self.transition(to);
    }

    fn supersede_all(&mut self) {
        let tickets: Vec<Ticket> = self.active.drain(..).chain(self.queued.drain(..)).collect();
        for ticket in tickets {
            self.settle(ticket, Ok(Settled::Superseded));
        }
    }

    /// Applies an edit that has already happened in the data source.
    ///
    /// The tree is reconciled and materialized items are remapped in this call, so the window
    /// never refers to a stale index; positions follow in the next layout.
    pub fn update_tree(&mut self, count: usize, delta: isize, modified: &[ModifiedElement]) {
        vdebug!(count, delta, modified = modified.len(), state = ?self.state, "Realizer::update_tree");
        if count as isize - self.count as isize != delta {
            vwarn!(
                count,
                delta,
                previous = self.count,
                "update_tree delta disagrees with the count change"
            );
        }
        if self.state == RealizationState::Created {
            self.count = count;
            return;
        }
        if self.animation.is_active() {
            let removed = self.animation.cancel_and_snap(&mut self.renderer);
            self.window.retire(&removed, &mut self.renderer);
        }

        let before = self.attached_bounds();
        let groups = self.current_groups(count);
        let old_groups: Vec<GroupNode> = self.window.tree().groups().to_vec();
        let boundary = self.builder.reconcile(self.window.tree_mut(), &groups);
        if self.options.groups_enabled {
            self.modified_groups.extend(diff_groups(&old_groups, &groups));
        }
        let effect = self
            .window
            .apply_edit(count, modified, &mut self.data, &mut self.renderer);
        // Queued requests name pre-edit indices; the next pass reissues them.
        self.scheduler.retain(|w| !matches!(w, Work::Realize { .. }));
        self.pass_open = false;

        for m in modified {
            if let Some(i) = m.old_index {
                self.affected.add_index(i);
            }
            if let Some(i) = m.new_index {
                self.affected.add_index(i);
            }
        }
        if let Some(boundary) = boundary {
            self.affected.add(boundary..usize::MAX);
        }
        self.modified_items.extend_from_slice(modified);
        self.count = count;
        self.record_edit(effect, &before);

        if !self.window.tree().is_complete() {
            if self.state != RealizationState::Building {
                self.transition(RealizationState::Building);
            }
            self.schedule_once(Priority::High, Work::BuildTree);
        } else if self.state != RealizationState::Building {
            self.transition(RealizationState::LayingOut);
            self.schedule_once(Priority::High, Work::Layout);
        }
    }

    fn attached_bounds(&self) -> BTreeMap<usize, Bounds> {
        self.window
            .items()
            .filter(|(_, item)| item.state == ItemState::Attached)
            .filter_map(|(index, _)| Some((index, self.layout.item_geometry(index)?.bounds)))
            .collect()
    }

    fn record_edit(&mut self, effect: EditEffect, before: &BTreeMap<usize, Bounds>) {
        let removed: Vec<VisualId> = effect.removed.iter().map(|&(_, v)| v).collect();
        if !self.options.animations_enabled {
            self.window.retire(&removed, &mut self.renderer);
            return;
        }
        let edit = self.pending_edit.get_or_insert_with(PendingEdit::default);
        for r in &effect.relocated {
            if edit.moves.iter().any(|&(v, _)| v == r.visual) {
                continue;
            }
            if let Some(&from) = before.get(&r.old_index) {
                edit.moves.push((r.visual, from));
            }
        }
        edit.removed.extend(removed);
        edit.inserted.extend(effect.inserted);
    }

    fn current_groups(&self, count: usize) -> Vec<GroupDescriptor> {
        if self.options.groups_enabled {
            self.data.groups()
        } else {
            alloc::vec![GroupDescriptor {
                key: 0,
                start_index: 0,
                count,
            }]
        }
    }

    /// Delivers a record requested earlier with [`ItemRequest::Pending`].
    ///
    /// Fatal errors are returned; data failures settle the pass's tickets instead.
    pub fn item_ready(
        &mut self,
        request: RequestId,
        result: Result<RecordHandle, DataError>,
    ) -> Result<(), ViewError> {
        if self.probe.request == Some(request) {
            self.probe.request = None;
            match result {
                Ok(record) => self.probe.record = Some(record),
                Err(source) => self.fail_pass(ViewError::Data { index: 0, source }),
            }
            return Ok(());
        }
        match self
            .window
            .complete_request(request, result, &mut self.data, &mut self.renderer)
        {
            Ok(_) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                self.fail_pass(e);
                return Ok(());
            }
        }
        self.window.attach_ready(&*self.layout, &mut self.renderer);
        self.check_pass_progress();
        Ok(())
    }

    // ---------------------------------------------------------------------------------------
    // Notifications
    // ---------------------------------------------------------------------------------------

    /// Opens a batch. Realize work is deferred until the matching [`Self::end_notifications`].
    pub fn begin_notifications(&mut self) {
        if self.batch.is_none() {
            vtrace!(count = self.count, "Realizer::begin_notifications");
            self.batch = Some(NotificationBatch::new(self.count));
            if self.state == RealizationState::LayingOut {
                self.transition(RealizationState::LayoutCanceled);
            }
        }
        self.batch_depth += 1;
    }

    pub fn notify(&mut self, notification: Notification) {
        match self.batch.as_mut() {
            Some(batch) => batch.push(notification),
            None => {
                self.begin_notifications();
                if let Some(batch) = self.batch.as_mut() {
                    batch.push(notification);
                }
                self.end_notifications();
            }
        }
    }

    pub fn end_notifications(&mut self) {
        self.batch_depth = self.batch_depth.saturating_sub(1);
        if self.batch_depth > 0 {
            return;
        }
        let Some(batch) = self.batch.take() else {
            return;
        };
        if batch.is_empty() {
            return;
        }
        let summary = batch.finish();
        vdebug!(?summary, "Realizer::end_notifications");
        if summary.reload {
            self.rebuild_tree();
        } else {
            self.update_tree(summary.count, summary.delta, &summary.modified);
        }
    }

    // ---------------------------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------------------------

    pub fn hit_test(&self, point: Point) -> Option<HitTestResult> {
        if !self.layout.is_initialized() {
            return None;
        }
        self.layout.hit_test(point)
    }

    pub fn get_adjacent(&self, entity: Entity, key: NavigationKey) -> Adjacent {
        if !self.layout.is_initialized() {
            return Adjacent::Boundary;
        }
        self.layout.get_adjacent(entity, key)
    }

    pub fn total_extent(&self) -> u64 {
        self.layout.total_extent()
    }

    // ---------------------------------------------------------------------------------------
    // Frame loop
    // ---------------------------------------------------------------------------------------

    /// Runs queued work until the frame budget is spent.
    ///
    /// Only fatal errors are returned. Data failures settle tickets with an error
    /// [`ViewEvent::Outcome`] and the window rolls back.
    pub fn pump(&mut self, now_ms: u64) -> Result<PumpStatus, ViewError> {
        self.now_ms = now_ms;
        self.scheduler.start_frame();
        if let Some(removed) = self.animation.tick(now_ms, &mut self.renderer) {
            self.animation_finished(&removed);
        }

        let clock = self.options.clock.clone();
        let never = || 0u64;
        let (read, deadline): (&dyn Fn() -> u64, u64) = match &clock {
            Some(clock) => (
                &**clock as &dyn Fn() -> u64,
                now_ms.saturating_add(self.options.time_slice_ms),
            ),
            None => (&never as &dyn Fn() -> u64, u64::MAX),
        };
        let slice = TimeSlice::new(read, deadline);

        loop {
            let locked = self.batch.is_some();
            let Some(job) = self
                .scheduler
                .pop_matching(|w| !locked || w.runs_during_batch())
            else {
                break;
            };
            vtrace!(work = ?job.work, priority = ?job.priority, "run job");
            let step = match self.run(job.work, &slice) {
                Ok(step) => step,
                Err(e) if e.is_fatal() => {
                    vwarn!(%e, "fatal realization error");
                    return Err(e);
                }
                Err(e) => {
                    self.fail_pass(e);
                    JobStep::Done
                }
            };
            match step {
                JobStep::Done => {}
                JobStep::Yield(work) => self.scheduler.resume(job.id, job.priority, work),
                JobStep::NextFrame(work) => self.scheduler.park(job.id, job.priority, work),
            }
            if slice.should_yield() {
                break;
            }
        }

        let idle = self.scheduler.is_idle() && !self.animation.is_active();
        Ok(if idle {
            PumpStatus::Idle
        } else {
            PumpStatus::Busy
        })
    }

    fn run(&mut self, work: Work, slice: &TimeSlice<'_>) -> Result<JobStep<Work>, ViewError> {
        match work {
            Work::BuildTree => Ok(self.build_step(slice)),
            Work::Layout => self.layout_step(),
            Work::StartPass => {
                self.start_pass()?;
                Ok(JobStep::Done)
            }
            Work::PlaceSpanning => Ok(self.place_spanning_step(slice)),
            Work::Realize { pass, index } => self.realize_step(pass, index),
            Work::LazyEvict => {
                let done = self.window.lazy_evict_step(
                    self.direction,
                    slice,
                    &mut self.data,
                    &mut self.renderer,
                );
                Ok(if done {
                    JobStep::Done
                } else {
                    JobStep::NextFrame(Work::LazyEvict)
                })
            }
            Work::Ordering { pass } => {
                self.publish_ordering(pass);
                Ok(JobStep::Done)
            }
        }
    }

    fn build_step(&mut self, slice: &TimeSlice<'_>) -> JobStep<Work> {
        match self.builder.step(self.window.tree_mut(), slice) {
            BuildStep::Yielded => JobStep::Yield(Work::BuildTree),
            BuildStep::Done => {
                self.window.rebind_slots();
                vdebug!(
                    items = self.window.tree().item_count(),
                    "tree complete"
                );
                match self.state {
                    RealizationState::Building => {
                        self.transition(RealizationState::LayingOut);
                        self.schedule_once(Priority::High, Work::Layout);
                    }
                    RealizationState::Completed
                    | RealizationState::Unrealizing
                    | RealizationState::ScrollingPaused => self.layout_new_containers(),
                    _ => self.schedule_once(Priority::High, Work::Layout),
                }
                JobStep::Done
            }
        }
    }

    fn viewport_main(&self) -> u64 {
        self.options.orientation.main(self.viewport) as u64
    }

    fn realize_extent(&self) -> (u64, u64) {
        let page = self.viewport_main();
        let pad = page.saturating_mul(self.options.prefetch_pages as u64);
        let first = self.scroll_offset.saturating_sub(pad);
        let last = self
            .scroll_offset
            .saturating_add(page)
            .saturating_add(pad)
            .saturating_sub(1);
        (first, last)
    }

    fn site(&self) -> LayoutSite {
        LayoutSite {
            orientation: self.options.orientation,
            viewport: self.viewport,
            item_size: self
                .options
                .item_size
                .or(self.measured_item)
                .unwrap_or_default(),
            header_size: self
                .options
                .header_size
                .or(self.measured_header)
                .unwrap_or_default(),
            groups_enabled: self.options.groups_enabled,
            realize_extent: self.realize_extent(),
        }
    }

    fn layout_step(&mut self) -> Result<JobStep<Work>, ViewError> {
        let viewport = self.measurer.viewport();
        if viewport.is_empty() {
            self.host_unavailable();
            return Ok(JobStep::Done);
        }
        self.viewport = viewport;
        if !self.ensure_measured()? {
            return Ok(JobStep::NextFrame(Work::Layout));
        }
        if self.state != RealizationState::LayingOutNewContainers {
            self.transition(RealizationState::LayingOut);
        }

        let site = self.site();
        if self.layout.is_initialized() {
            self.layout.update_site(site);
        } else {
            self.layout.initialize(site, self.options.groups_enabled);
        }
        let snapshot = self.window.tree().snapshot();
        let changed = self.affected.take();
        let modified_items = core::mem::take(&mut self.modified_items);
        let modified_groups = core::mem::take(&mut self.modified_groups);
        let outcome = self
            .layout
            .layout(&snapshot, &changed, &modified_items, &modified_groups)?;
        self.sync_group_offsets();
        if outcome.layout_complete {
            self.events.push_back(ViewEvent::LayoutComplete);
        } else {
            self.schedule_once(Priority::Idle, Work::PlaceSpanning);
        }

        self.clamp_scroll();
        self.resolve_waiters();
        let ensures = core::mem::take(&mut self.ensures);
        for (ticket, entity, align) in ensures {
            self.scroll_into_view(ticket, entity, align);
        }
        self.start_pass()?;
        Ok(JobStep::Done)
    }

    /// Measures the first item and header on the hidden surface when sizes are not
    /// configured. Returns `false` while a measurement is outstanding.
    fn ensure_measured(&mut self) -> Result<bool, ViewError> {
        let tree = self.window.tree();
        let need_item = self.options.item_size.is_none()
            && self.measured_item.is_none()
            && tree.item_count() > 0;
        let header_key = tree.groups().first().map(|g| g.key);
        let need_header = self.options.groups_enabled
            && self.options.header_size.is_none()
            && self.measured_header.is_none()
            && header_key.is_some();
        if !need_item && !need_header {
            return Ok(true);
        }
        if !self.probe.surface {
            self.measurer.create_surface();
            self.probe.surface = true;
        }

        if need_item {
            if self.probe.visual.is_none() {
                let record = match self.probe.record {
                    Some(record) => record,
                    None if self.probe.request.is_some() => return Ok(false),
                    None => match self.data.request_item(0) {
                        ItemRequest::Ready(record) => record,
                        ItemRequest::Pending(id) => {
                            self.probe.request = Some(id);
                            return Ok(false);
                        }
                        ItemRequest::Failed(source) => {
                            self.close_probe();
                            return Err(ViewError::Data { index: 0, source });
                        }
                    },
                };
                self.probe.record = Some(record);
                self.probe.visual = Some(self.renderer.render_item(0, record));
            }
            let Some(visual) = self.probe.visual else {
                return Ok(false);
            };
            let Some(metrics) = self.measurer.measure(visual) else {
                return Ok(false);
            };
            vdebug!(?metrics, "measured item");
            self.measured_item = Some(metrics.total());
            self.renderer.remove(visual);
            self.probe.visual = None;
            if let Some(record) = self.probe.record.take() {
                self.data.release_item(record);
            }
        }

        if need_header {
            let visual = match self.probe.header {
                Some(visual) => visual,
                None => {
                    let visual = self.renderer.render_header(0, header_key.unwrap_or_default());
                    self.probe.header = Some(visual);
                    visual
                }
            };
            let Some(metrics) = self.measurer.measure(visual) else {
                return Ok(false);
            };
            vdebug!(?metrics, "measured header");
            self.measured_header = Some(metrics.total());
            self.renderer.remove(visual);
            self.probe.header = None;
        }

        self.close_probe();
        Ok(true)
    }

    fn close_probe(&mut self) {
        if let Some(visual) = self.probe.visual.take() {
            self.renderer.remove(visual);
        }
        if let Some(visual) = self.probe.header.take() {
            self.renderer.remove(visual);
        }
        if let Some(record) = self.probe.record.take() {
            self.data.release_item(record);
        }
        if let Some(id) = self.probe.request.take() {
            self.data.cancel_request(id);
        }
        if self.probe.surface {
            self.measurer.remove_surface();
            self.probe.surface = false;
        }
    }

    /// Hidden or zero-extent host: settle with an empty window and replay on the next trigger.
    fn host_unavailable(&mut self) {
        vwarn!("host viewport has no extent; realization paused");
        self.transition(RealizationState::Canceled);
        self.close_probe();
        self.window.clear(&mut self.data, &mut self.renderer);
        self.scheduler
            .retain(|w| !matches!(w, Work::Realize { .. } | Work::StartPass));
        self.pass_open = false;
        let tickets: Vec<Ticket> = self.active.drain(..).chain(self.queued.drain(..)).collect();
        for ticket in tickets {
            self.settle(ticket, Ok(Settled::Deferred));
        }
        self.replay = true;
        self.transition(RealizationState::Completed);
    }

    fn sync_group_offsets(&mut self) {
        let offsets: Vec<u64> = (0..self.window.tree().group_count())
            .map(|g| self.layout.group_geometry(g).map_or(0, |geo| geo.offset))
            .collect();
        for (node, offset) in self.window.tree_mut().groups_mut().iter_mut().zip(offsets) {
            node.offset = offset;
        }
    }

    /// Largest scroll offset that still fills the viewport.
    pub fn max_scroll_offset(&self) -> u64 {
        self.layout.total_extent().saturating_sub(self.viewport_main())
    }

    fn clamp_scroll(&mut self) {
        let max = self.max_scroll_offset();
        if self.scroll_offset > max {
            vdebug!(from = self.scroll_offset, to = max, "clamp scroll offset");
            self.scroll_offset = max;
        }
    }

    fn entity_bounds(&self, entity: Entity) -> Result<Option<Bounds>, ViewError> {
        match entity.kind {
            EntityKind::Item => {
                if entity.index >= self.count {
                    return Err(ViewError::OutOfRange(entity));
                }
                if !self.layout.is_settled(entity.index) {
                    return Ok(None);
                }
                Ok(self.layout.item_geometry(entity.index).map(|g| g.bounds))
            }
            EntityKind::GroupHeader => {
                if entity.index >= self.window.tree().group_count() {
                    return Err(ViewError::OutOfRange(entity));
                }
                let bounds = self.layout.header_bounds(entity.index).or_else(|| {
                    let geometry = self.layout.group_geometry(entity.index)?;
                    Some(
                        self.options
                            .orientation
                            .bounds(geometry.offset, 0, 0, geometry.cross_size),
                    )
                });
                Ok(bounds)
            }
        }
    }

    fn resolve_waiters(&mut self) {
        if !self.layout.is_initialized() {
            return;
        }
        let waiters = core::mem::take(&mut self.waiters);
        for (ticket, entity) in waiters {
            match self.entity_bounds(entity) {
                Ok(None) => self.waiters.push((ticket, entity)),
                Ok(Some(bounds)) => self.events.push_back(ViewEvent::EntityPosition {
                    ticket,
                    result: Ok(bounds),
                }),
                Err(e) => self.events.push_back(ViewEvent::EntityPosition {
                    ticket,
                    result: Err(e),
                }),
            }
        }
    }

    /// Exact bounds of `entity`, or its estimated bounds while lazy layout work is pending.
    fn target_bounds(&self, entity: Entity) -> Result<Bounds, ViewError> {
        match self.entity_bounds(entity)? {
            Some(bounds) => Ok(bounds),
            None if entity.kind == EntityKind::Item => self
                .layout
                .item_geometry(entity.index)
                .map(|g| g.bounds)
                .ok_or(ViewError::OutOfRange(entity)),
            None => Err(ViewError::OutOfRange(entity)),
        }
    }

    fn aligned_offset(&self, bounds: Bounds, align: Align) -> u64 {
        let orientation = self.options.orientation;
        let start = bounds.main_start(orientation);
        let end = bounds.main_end(orientation);
        let view = self.viewport_main();
        let current = self.scroll_offset;
        let target = match align {
            Align::Start => start,
            Align::End => end.saturating_sub(view),
            Align::Center => (start + (end - start) / 2).saturating_sub(view / 2),
            Align::Auto => {
                if start >= current && end <= current.saturating_add(view) {
                    current
                } else if start < current {
                    start
                } else {
                    end.saturating_sub(view)
                }
            }
        };
        target.min(self.max_scroll_offset())
    }

    /// Offset that would show `entity` with `align`, without scrolling. `None` until the layout
    /// has run or when the entity does not exist.
    pub fn offset_for(&self, entity: Entity, align: Align) -> Option<u64> {
        if !self.layout_ready() {
            return None;
        }
        let bounds = self.target_bounds(entity).ok()?;
        Some(self.aligned_offset(bounds, align))
    }

    /// Computes the offset that shows `entity` and queues `ticket` on the next pass. Returns
    /// `false` when the entity is unknown and the ticket was settled with an error.
    fn scroll_into_view(&mut self, ticket: Ticket, entity: Entity, align: Align) -> bool {
        let bounds = match self.target_bounds(entity) {
            Ok(bounds) => bounds,
            Err(e) => {
                self.settle(ticket, Err(e));
                return false;
            }
        };
        let current = self.scroll_offset;
        let target = self.aligned_offset(bounds, align);
        if target != current {
            self.direction = if target > current {
                ScrollDirection::Forward
            } else {
                ScrollDirection::Backward
            };
            self.scroll_offset = target;
        }
        self.events.push_back(ViewEvent::ScrollRequested {
            ticket,
            offset: target,
        });
        self.queued.push(ticket);
        true
    }

    fn compute_window(&self) -> WindowState {
        let page = self.viewport_main();
        if page == 0 {
            return WindowState::default();
        }
        let (first, last) = self.realize_extent();
        let Some((begin, end)) = self.layout.items_from_range(first, last) else {
            return WindowState::default();
        };
        let displayed = self
            .layout
            .items_from_range(self.scroll_offset, self.scroll_offset.saturating_add(page - 1));
        WindowState {
            begin,
            end: end + 1,
            first_displayed: displayed.map(|(f, _)| f),
            last_displayed: displayed.map(|(_, l)| l),
        }
    }

    fn start_pass(&mut self) -> Result<(), ViewError> {
        if !self.layout.is_initialized() {
            return Err(ViewError::LayoutUninitialized);
        }
        if self.layout.has_pending_work() {
            // Groups that entered the realize extent are placed now.
            let site = self.site();
            self.layout.update_site(site);
            let snapshot = self.window.tree().snapshot();
            self.layout
                .layout(&snapshot, &AffectedRange::new(), &[], &[])?;
            self.sync_group_offsets();
        }

        self.recovering = false;
        self.pass_offset = self.scroll_offset;
        let next = self.compute_window();
        let superseded = core::mem::replace(&mut self.active, core::mem::take(&mut self.queued));
        for ticket in superseded {
            self.settle(ticket, Ok(Settled::Superseded));
        }

        let work = self.window.begin_pass(
            next,
            self.direction,
            &mut self.data,
            &mut self.renderer,
        )?;
        let pass = self.window.pass();
        self.scheduler
            .retain(|w| !matches!(w, Work::Realize { .. } | Work::Ordering { .. } | Work::StartPass));
        for &(index, priority) in &work {
            self.scheduler
                .schedule(priority, Work::Realize { pass, index });
        }
        vdebug!(pass = pass.0, window = ?next, requests = work.len(), "pass started");

        if self.options.groups_enabled {
            let groups = match (
                self.layout.group_of_item(next.begin),
                next.end.checked_sub(1).and_then(|l| self.layout.group_of_item(l)),
            ) {
                (Some(first), Some(last)) if !next.is_empty() => first..last + 1,
                _ => 0..0,
            };
            self.window
                .sync_headers(groups, &*self.layout, &mut self.renderer);
        }
        self.window.replace_all(&*self.layout, &mut self.renderer);
        self.hold_pending_moves();

        self.pass_open = true;
        self.viewport_signaled = false;
        if self.state != RealizationState::Scrolling {
            self.transition(RealizationState::Realizing);
        }
        self.window.attach_ready(&*self.layout, &mut self.renderer);
        self.check_pass_progress();
        Ok(())
    }

    fn realize_step(&mut self, pass: PassId, index: usize) -> Result<JobStep<Work>, ViewError> {
        if pass != self.window.pass() {
            return Ok(JobStep::Done);
        }
        self.window
            .realize_index(index, pass, &mut self.data, &mut self.renderer)?;
        self.window.attach_ready(&*self.layout, &mut self.renderer);
        self.check_pass_progress();
        Ok(JobStep::Done)
    }

    fn check_pass_progress(&mut self) {
        if !self.pass_open {
            return;
        }
        let pass = self.window.pass();
        if !self.viewport_signaled && self.window.viewport_realized() {
            self.viewport_signaled = true;
            self.events.push_back(ViewEvent::ViewportRealized { pass });
        }
        if self.window.is_complete() {
            self.finish_pass(pass);
        }
    }

    fn finish_pass(&mut self, pass: PassId) {
        self.pass_open = false;
        self.recovering = false;
        self.settled_offset = self.pass_offset;
        vdebug!(pass = pass.0, "pass complete");
        self.events.push_back(ViewEvent::WindowCompleted { pass });
        for ticket in core::mem::take(&mut self.active) {
            self.settle(ticket, Ok(Settled::Done));
        }
        self.scheduler
            .schedule(Priority::Idle, Work::Ordering { pass });
        if self.window.has_stale() {
            self.schedule_once(Priority::Idle, Work::LazyEvict);
        }
        if self.start_animation() {
            self.transition(RealizationState::RealizingAnimating);
            return;
        }
        if self.is_scrolling && self.state == RealizationState::Scrolling {
            self.transition(RealizationState::ScrollingPaused);
            return;
        }
        self.enter_unrealizing();
    }

    fn enter_unrealizing(&mut self) {
        self.transition(RealizationState::Unrealizing);
        if self.window.has_stale() {
            self.schedule_once(Priority::Idle, Work::LazyEvict);
        }
    }

    /// Sends realization failures back to the requesters and restores the previous window.
    ///
    /// Items of the previous window may already be evicted, so it is realized again from the
    /// offset of the last completed pass. Without a previous window, or when that fails too, the
    /// window is emptied.
    fn fail_pass(&mut self, error: ViewError) {
        vwarn!(%error, recovering = self.recovering, "realize pass failed; rolling back");
        self.close_probe();
        let retry = !self.recovering;
        self.window.rollback();
        self.pass_open = false;
        self.scheduler
            .retain(|w| !matches!(w, Work::Realize { .. } | Work::StartPass));
        let tickets: Vec<Ticket> = self.active.drain(..).chain(self.queued.drain(..)).collect();
        for ticket in tickets {
            self.settle(ticket, Err(error.clone()));
        }

        if retry && !self.window.state().is_empty() && self.layout.is_initialized() {
            let offset = self.settled_offset.min(self.max_scroll_offset());
            if offset != self.scroll_offset {
                self.direction = if offset > self.scroll_offset {
                    ScrollDirection::Forward
                } else {
                    ScrollDirection::Backward
                };
                self.scroll_offset = offset;
                self.events.push_back(ViewEvent::ScrollRestored { offset });
            }
            self.transition(RealizationState::Realizing);
            match self.start_pass() {
                Ok(()) => {
                    if self.pass_open {
                        self.recovering = true;
                    }
                    return;
                }
                Err(e) => vwarn!(%e, "could not restore the previous window"),
            }
        }

        self.recovering = false;
        self.window.clear(&mut self.data, &mut self.renderer);
        self.transition(RealizationState::Completed);
    }

    fn place_spanning_step(&mut self, slice: &TimeSlice<'_>) -> JobStep<Work> {
        if !self.layout.continue_layout(slice) {
            return JobStep::NextFrame(Work::PlaceSpanning);
        }
        vdebug!("lazy layout complete");
        self.sync_group_offsets();
        self.events.push_back(ViewEvent::LayoutComplete);
        self.window.replace_all(&*self.layout, &mut self.renderer);
        self.resolve_waiters();
        self.layout_new_containers();
        JobStep::Done
    }

    fn visual_positions(&self) -> BTreeMap<VisualId, usize> {
        self.window
            .items()
            .filter_map(|(index, item)| Some((item.visual?, index)))
            .collect()
    }

    /// Keeps moved visuals at their pre-edit position until the animation takes over.
    fn hold_pending_moves(&mut self) {
        let Some(edit) = &self.pending_edit else {
            return;
        };
        let positions = self.visual_positions();
        for &(visual, from) in &edit.moves {
            let Some(to) = positions
                .get(&visual)
                .and_then(|&i| self.layout.item_geometry(i))
            else {
                continue;
            };
            self.renderer.apply_transform(
                visual,
                VisualTransform {
                    dx: from.x as i64 - to.bounds.x as i64,
                    dy: from.y as i64 - to.bounds.y as i64,
                    opacity: 1.0,
                },
            );
        }
    }

    fn start_animation(&mut self) -> bool {
        let Some(edit) = self.pending_edit.take() else {
            return false;
        };
        let positions = self.visual_positions();
        let moves: Vec<MoveInput> = edit
            .moves
            .iter()
            .filter_map(|&(visual, from)| {
                let index = *positions.get(&visual)?;
                let to = self.layout.item_geometry(index)?.bounds;
                Some(MoveInput { visual, from, to })
            })
            .collect();
        let inserted: Vec<VisualId> = edit
            .inserted
            .iter()
            .filter_map(|&i| self.window.visual_of(i))
            .collect();
        let plan = AnimationPlan::new(
            &self.options.animation,
            self.options.orientation,
            &edit.removed,
            &moves,
            &inserted,
        );
        if plan.is_empty() {
            return false;
        }
        self.animation.start(
            plan,
            self.options.animation.easing,
            self.now_ms,
            &mut self.renderer,
        );
        true
    }

    fn animation_finished(&mut self, removed: &[VisualId]) {
        vdebug!(removed = removed.len(), "animation finished");
        self.window.retire(removed, &mut self.renderer);
        if self.state == RealizationState::RealizingAnimating {
            if self.is_scrolling {
                self.transition(RealizationState::ScrollingPaused);
            } else {
                self.enter_unrealizing();
            }
        }
    }

    /// Cancels running and pending animations, leaving every visual at its final geometry.
    fn snap_animation(&mut self) {
        let removed = self.animation.cancel_and_snap(&mut self.renderer);
        self.window.retire(&removed, &mut self.renderer);
        if let Some(edit) = self.pending_edit.take() {
            for (visual, _) in edit.moves {
                self.renderer
                    .apply_transform(visual, VisualTransform::IDENTITY);
            }
            self.window.retire(&edit.removed, &mut self.renderer);
        }
    }

    fn publish_ordering(&mut self, pass: PassId) {
        if pass != self.window.pass() {
            return;
        }
        let attached: Vec<(usize, VisualId)> = self
            .window
            .items()
            .filter(|(_, item)| item.state == ItemState::Attached)
            .filter_map(|(index, item)| Some((index, item.visual?)))
            .collect();
        let groups_enabled = self.options.groups_enabled;
        for (k, &(index, visual)) in attached.iter().enumerate() {
            let ordering = OrderingMetadata {
                position_in_set: index + 1,
                set_size: self.count,
                group: if groups_enabled {
                    self.layout.group_of_item(index)
                } else {
                    None
                },
                previous: k.checked_sub(1).map(|p| attached[p].1),
                next: attached.get(k + 1).map(|&(_, v)| v),
            };
            self.renderer.set_ordering(visual, ordering);
        }
    }
}

impl<D: DataSource, R: Renderer, M: Measurer> core::fmt::Debug for Realizer<D, R, M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Realizer")
            .field("state", &self.state)
            .field("count", &self.count)
            .field("scroll_offset", &self.scroll_offset)
            .field("window", &self.window.state())
            .field("pending_jobs", &self.scheduler.len())
            .finish_non_exhaustive()
    }
}

/// Group-level edits between the tree's groups and the data source's new groups, by key.
fn diff_groups(old: &[GroupNode], new: &[GroupDescriptor]) -> Vec<ModifiedElement> {
    let mut out = Vec::new();
    for (i, node) in old.iter().enumerate() {
        match new.iter().position(|d| d.key == node.key) {
            None => out.push(ModifiedElement::removed(i)),
            Some(j) if j != i || new[j].count != node.count => out.push(ModifiedElement {
                old_index: Some(i),
                new_index: Some(j),
                changed: new[j].count != node.count,
            }),
            Some(_) => {}
        }
    }
    for (j, desc) in new.iter().enumerate() {
        if !old.iter().any(|n| n.key == desc.key) {
            out.push(ModifiedElement::inserted(j));
        }
    }
    out
}
