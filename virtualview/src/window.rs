//! Materialization window: which indices have records and visuals, and in which pass they were
//! requested.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;

use crate::host::{DataSource, ItemRequest, RecordHandle, Renderer, RequestId, VisualId};
use crate::layout::LayoutStrategy;
use crate::scheduler::{Priority, TimeSlice};
use crate::tree::{SlotId, Tree};
use crate::{DataError, ModifiedElement, ScrollDirection, ViewError, WindowState};

/// Monotonic realize pass id. Completions tagged with an older id are ignored.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PassId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ItemState {
    /// Inside the window but not rendered yet. Hosts may draw a stand-in.
    Placeholder,
    /// Rendered, waiting for an edge-aligned attach.
    Rendered,
    Attached,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MaterializedItem {
    pub slot: Option<SlotId>,
    pub record: Option<RecordHandle>,
    pub request: Option<RequestId>,
    pub visual: Option<VisualId>,
    pub state: ItemState,
}

impl MaterializedItem {
    fn placeholder(slot: Option<SlotId>) -> Self {
        Self {
            slot,
            record: None,
            request: None,
            visual: None,
            state: ItemState::Placeholder,
        }
    }

    /// Rendered or failed: nothing more will happen to it in this pass.
    pub fn is_resolved(&self) -> bool {
        matches!(
            self.state,
            ItemState::Rendered | ItemState::Attached | ItemState::Failed
        )
    }
}

#[derive(Clone, Copy, Debug)]
struct InFlight {
    index: usize,
    pass: PassId,
}

/// Outcome of asking for one index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RealizeStep {
    Rendered,
    /// A request is in flight; the record arrives through a completion.
    Waiting,
    /// Nothing to do: stale pass, already realized, or no longer in the window.
    Skipped,
}

/// Visual relocated by an edit, for animation planning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Relocation {
    pub visual: VisualId,
    pub old_index: usize,
    pub new_index: usize,
}

/// What an edit did to materialized visuals.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EditEffect {
    pub relocated: Vec<Relocation>,
    /// Removed visuals, still attached so they can fade out. Release them with
    /// [`WindowManager::retire`].
    pub removed: Vec<(usize, VisualId)>,
    pub inserted: Vec<usize>,
}

#[derive(Debug)]
pub struct WindowManager {
    tree: Tree,
    state: WindowState,
    previous: Option<WindowState>,
    items: BTreeMap<usize, MaterializedItem>,
    headers: BTreeMap<usize, VisualId>,
    requests: BTreeMap<RequestId, InFlight>,
    pass: PassId,
    stale: VecDeque<usize>,
    stale_direction: ScrollDirection,
    slack: usize,
}

impl WindowManager {
    pub fn new(tree: Tree, slack: usize) -> Self {
        Self {
            tree,
            state: WindowState::default(),
            previous: None,
            items: BTreeMap::new(),
            headers: BTreeMap::new(),
            requests: BTreeMap::new(),
            pass: PassId(0),
            stale: VecDeque::new(),
            stale_direction: ScrollDirection::Forward,
            slack,
        }
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut Tree {
        &mut self.tree
    }

    pub fn state(&self) -> WindowState {
        self.state
    }

    pub fn pass(&self) -> PassId {
        self.pass
    }

    pub fn set_slack(&mut self, slack: usize) {
        self.slack = slack;
    }

    pub fn item(&self, index: usize) -> Option<&MaterializedItem> {
        self.items.get(&index)
    }

    pub fn items(&self) -> impl Iterator<Item = (usize, &MaterializedItem)> + '_ {
        self.items.iter().map(|(&i, item)| (i, item))
    }

    pub fn visual_of(&self, index: usize) -> Option<VisualId> {
        self.items.get(&index)?.visual
    }

    pub fn header_visual(&self, group: usize) -> Option<VisualId> {
        self.headers.get(&group).copied()
    }

    pub fn headers(&self) -> impl Iterator<Item = (usize, VisualId)> + '_ {
        self.headers.iter().map(|(&g, &v)| (g, v))
    }

    pub fn materialized_count(&self) -> usize {
        self.items.len()
    }

    pub fn in_flight(&self) -> usize {
        self.requests.len()
    }

    pub fn has_stale(&self) -> bool {
        !self.stale.is_empty()
    }

    /// Starts a new realize pass targeting `next`.
    ///
    /// In-flight requests for indices that stay in the window are handed to the new pass;
    /// every other request is cancelled. Stale items farther than the slack from the new
    /// window are evicted now, the rest are queued for [`Self::lazy_evict_step`]. Returns the
    /// indices to realize, each with its priority.
    pub fn begin_pass(
        &mut self,
        next: WindowState,
        direction: ScrollDirection,
        data: &mut dyn DataSource,
        renderer: &mut dyn Renderer,
    ) -> Result<Vec<(usize, Priority)>, ViewError> {
        self.pass = PassId(self.pass.0 + 1);
        self.previous = Some(self.state);
        self.state = next;
        let pass = self.pass;
        vdebug!(pass = pass.0, ?next, ?direction, "WindowManager::begin_pass");

        let mut cancelled = Vec::new();
        for (&id, flight) in self.requests.iter_mut() {
            if next.contains(flight.index) {
                flight.pass = pass;
            } else {
                cancelled.push(id);
            }
        }
        for id in cancelled {
            if let Some(flight) = self.requests.remove(&id) {
                vtrace!(request = id.0, index = flight.index, "cancel request");
                data.cancel_request(id);
                if let Some(item) = self.items.get_mut(&flight.index) {
                    item.request = None;
                }
            }
        }

        self.collect_stale(direction, data, renderer);

        let mut work = Vec::new();
        for index in next.begin..next.end {
            let item = match self.items.get(&index) {
                Some(item) => *item,
                None => {
                    let slot = self
                        .tree
                        .slot_id(index)
                        .ok_or(ViewError::MissingNode { index })?;
                    let item = MaterializedItem::placeholder(Some(slot));
                    self.items.insert(index, item);
                    item
                }
            };
            if item.state == ItemState::Placeholder && item.request.is_none() {
                work.push((index, self.priority_of(index, direction)));
            }
        }
        work.sort_by_key(|&(index, priority)| {
            let order = match direction {
                ScrollDirection::Forward => index,
                ScrollDirection::Backward => usize::MAX - index,
            };
            (priority, order)
        });
        Ok(work)
    }

    fn priority_of(&self, index: usize, direction: ScrollDirection) -> Priority {
        let displayed = self.state.displayed();
        if displayed.contains(index) {
            return Priority::High;
        }
        let ahead = match direction {
            ScrollDirection::Forward => index >= displayed.end_index,
            ScrollDirection::Backward => index < displayed.start_index,
        };
        if ahead {
            Priority::Normal
        } else {
            Priority::BelowNormal
        }
    }

    fn collect_stale(
        &mut self,
        direction: ScrollDirection,
        data: &mut dyn DataSource,
        renderer: &mut dyn Renderer,
    ) {
        let window = self.state;
        let slack = self.slack;
        let outside: Vec<usize> = self
            .items
            .keys()
            .copied()
            .filter(|&i| !window.contains(i))
            .collect();
        let mut lazy = Vec::new();
        for index in outside {
            if distance_outside(&window, index) > slack {
                self.evict(index, data, renderer);
            } else {
                lazy.push(index);
            }
        }
        // Farthest first, so a reversal leaves the nearest ones behind.
        lazy.sort_by_key(|&i| core::cmp::Reverse(distance_outside(&window, i)));
        self.stale.clear();
        self.stale.extend(lazy);
        self.stale_direction = direction;
    }

    fn evict(&mut self, index: usize, data: &mut dyn DataSource, renderer: &mut dyn Renderer) {
        let Some(item) = self.items.remove(&index) else {
            return;
        };
        vtrace!(index, ?item, "evict");
        if let Some(id) = item.request {
            self.requests.remove(&id);
            data.cancel_request(id);
        }
        if let Some(visual) = item.visual {
            renderer.remove(visual);
        }
        if let Some(record) = item.record {
            data.release_item(record);
        }
    }

    /// Evicts queued stale items until the slice runs out. Returns `true` when the queue is
    /// drained or abandoned because the scroll direction reversed.
    pub fn lazy_evict_step(
        &mut self,
        direction: ScrollDirection,
        slice: &TimeSlice<'_>,
        data: &mut dyn DataSource,
        renderer: &mut dyn Renderer,
    ) -> bool {
        while let Some(index) = self.stale.pop_front() {
            if direction != self.stale_direction {
                vdebug!(left = self.stale.len() + 1, "lazy eviction abandoned on reversal");
                self.stale.clear();
                return true;
            }
            if !self.state.contains(index) {
                self.evict(index, data, renderer);
            }
            if slice.should_yield() {
                return self.stale.is_empty();
            }
        }
        true
    }

    /// Requests the record for `index` on behalf of `pass`.
    ///
    /// A data failure on a displayed index is returned; failures in the prefetch band only mark
    /// the item failed.
    pub fn realize_index(
        &mut self,
        index: usize,
        pass: PassId,
        data: &mut dyn DataSource,
        renderer: &mut dyn Renderer,
    ) -> Result<RealizeStep, ViewError> {
        if pass != self.pass {
            return Ok(RealizeStep::Skipped);
        }
        let Some(item) = self.items.get(&index).copied() else {
            return Ok(RealizeStep::Skipped);
        };
        if item.state != ItemState::Placeholder {
            return Ok(RealizeStep::Skipped);
        }
        if item.request.is_some() {
            return Ok(RealizeStep::Waiting);
        }
        vtrace!(index, pass = pass.0, "request item");
        match data.request_item(index) {
            ItemRequest::Ready(record) => {
                self.render(index, record, renderer);
                Ok(RealizeStep::Rendered)
            }
            ItemRequest::Pending(id) => {
                self.requests.insert(id, InFlight { index, pass });
                if let Some(item) = self.items.get_mut(&index) {
                    item.request = Some(id);
                }
                Ok(RealizeStep::Waiting)
            }
            ItemRequest::Failed(source) => self.fail(index, source),
        }
    }

    fn render(&mut self, index: usize, record: RecordHandle, renderer: &mut dyn Renderer) {
        let visual = renderer.render_item(index, record);
        vtrace!(index, visual = visual.0, "rendered");
        if let Some(item) = self.items.get_mut(&index) {
            item.record = Some(record);
            item.request = None;
            item.visual = Some(visual);
            item.state = ItemState::Rendered;
        }
    }

    fn fail(&mut self, index: usize, source: DataError) -> Result<RealizeStep, ViewError> {
        if let Some(item) = self.items.get_mut(&index) {
            item.state = ItemState::Failed;
            item.request = None;
        }
        if self.state.displayed().contains(index) {
            return Err(ViewError::Data { index, source });
        }
        vwarn!(index, %source, "prefetch item failed");
        Ok(RealizeStep::Skipped)
    }

    /// Delivers the result of a pending request. Completions for unknown or cancelled requests
    /// release the record and change nothing else.
    pub fn complete_request(
        &mut self,
        id: RequestId,
        result: Result<RecordHandle, DataError>,
        data: &mut dyn DataSource,
        renderer: &mut dyn Renderer,
    ) -> Result<RealizeStep, ViewError> {
        let Some(flight) = self.requests.remove(&id) else {
            vwarn!(request = id.0, "completion for unknown request");
            if let Ok(record) = result {
                data.release_item(record);
            }
            return Ok(RealizeStep::Skipped);
        };
        let live = flight.pass == self.pass
            && self
                .items
                .get(&flight.index)
                .is_some_and(|item| item.request == Some(id));
        match result {
            Ok(record) if live => {
                self.render(flight.index, record, renderer);
                Ok(RealizeStep::Rendered)
            }
            Ok(record) => {
                data.release_item(record);
                Ok(RealizeStep::Skipped)
            }
            Err(source) if live => self.fail(flight.index, source),
            Err(_) => Ok(RealizeStep::Skipped),
        }
    }

    /// Attaches rendered items in runs that grow outward from the displayed span, so no hole
    /// ever opens between attached visuals. Returns the number of newly attached visuals.
    pub fn attach_ready(
        &mut self,
        layout: &dyn LayoutStrategy,
        renderer: &mut dyn Renderer,
    ) -> usize {
        let window = self.state;
        if window.is_empty() {
            return 0;
        }
        let anchor = window
            .first_displayed
            .unwrap_or(window.begin)
            .clamp(window.begin, window.end - 1);
        let mut attached = 0;
        for index in anchor..window.end {
            match self.attach_one(index, layout, renderer) {
                Some(n) => attached += n,
                None => break,
            }
        }
        for index in (window.begin..anchor).rev() {
            match self.attach_one(index, layout, renderer) {
                Some(n) => attached += n,
                None => break,
            }
        }
        if attached > 0 {
            vtrace!(attached, "attach_ready");
        }
        attached
    }

    /// `None` stops the run at an unresolved item.
    fn attach_one(
        &mut self,
        index: usize,
        layout: &dyn LayoutStrategy,
        renderer: &mut dyn Renderer,
    ) -> Option<usize> {
        let item = self.items.get_mut(&index)?;
        match item.state {
            ItemState::Placeholder => None,
            ItemState::Attached | ItemState::Failed => Some(0),
            ItemState::Rendered => {
                let visual = item.visual?;
                let geometry = layout.item_geometry(index)?;
                renderer.place(visual, geometry.bounds);
                item.state = ItemState::Attached;
                Some(1)
            }
        }
    }

    /// Moves every attached visual to its current layout position.
    pub fn replace_all(&self, layout: &dyn LayoutStrategy, renderer: &mut dyn Renderer) {
        for (&index, item) in &self.items {
            if item.state != ItemState::Attached {
                continue;
            }
            if let (Some(visual), Some(geometry)) = (item.visual, layout.item_geometry(index)) {
                renderer.place(visual, geometry.bounds);
            }
        }
        for (&group, &visual) in &self.headers {
            if let Some(bounds) = layout.header_bounds(group) {
                renderer.place(visual, bounds);
            }
        }
    }

    /// Every displayed index has an attached (or failed) visual.
    pub fn viewport_realized(&self) -> bool {
        let displayed = self.state.displayed();
        (displayed.start_index..displayed.end_index).all(|i| {
            self.items
                .get(&i)
                .is_some_and(|item| matches!(item.state, ItemState::Attached | ItemState::Failed))
        })
    }

    /// Every index in the window is attached or failed.
    pub fn is_complete(&self) -> bool {
        (self.state.begin..self.state.end).all(|i| {
            self.items
                .get(&i)
                .is_some_and(|item| matches!(item.state, ItemState::Attached | ItemState::Failed))
        })
    }

    /// Renders headers for `groups` and removes every other header.
    pub fn sync_headers(
        &mut self,
        groups: core::ops::Range<usize>,
        layout: &dyn LayoutStrategy,
        renderer: &mut dyn Renderer,
    ) {
        let gone: Vec<usize> = self
            .headers
            .keys()
            .copied()
            .filter(|g| !groups.contains(g))
            .collect();
        for g in gone {
            if let Some(visual) = self.headers.remove(&g) {
                renderer.remove(visual);
            }
        }
        for g in groups {
            if self.headers.contains_key(&g) {
                continue;
            }
            let (Some(node), Some(bounds)) = (self.tree.groups().get(g), layout.header_bounds(g))
            else {
                continue;
            };
            let visual = renderer.render_header(g, node.key);
            renderer.place(visual, bounds);
            self.headers.insert(g, visual);
        }
    }

    /// Remaps materialized indices and the window through an edit.
    ///
    /// Removed items leave the map and come back in [`EditEffect::removed`]; items flagged
    /// `changed` drop their record and visual and return to placeholders. Slot bindings are
    /// refreshed against the tree in the same call.
    pub fn apply_edit(
        &mut self,
        count: usize,
        modified: &[ModifiedElement],
        data: &mut dyn DataSource,
        renderer: &mut dyn Renderer,
    ) -> EditEffect {
        let remap = IndexRemap::new(modified);
        let mut effect = EditEffect::default();

        let old_items = core::mem::take(&mut self.items);
        for (old_index, mut item) in old_items {
            let Some(new_index) = remap.map_existing(old_index) else {
                if let Some(id) = item.request {
                    self.requests.remove(&id);
                    data.cancel_request(id);
                }
                if let Some(record) = item.record {
                    data.release_item(record);
                }
                match item.visual {
                    Some(visual) if item.state == ItemState::Attached => {
                        effect.removed.push((old_index, visual))
                    }
                    Some(visual) => renderer.remove(visual),
                    None => {}
                }
                continue;
            };
            if new_index >= count {
                self.evict_detached(item, data, renderer);
                continue;
            }
            if remap.changed(old_index) {
                self.evict_detached(item, data, renderer);
                item = MaterializedItem::placeholder(item.slot);
            }
            if let Some(id) = item.request {
                if let Some(flight) = self.requests.get_mut(&id) {
                    flight.index = new_index;
                }
            }
            if let (Some(visual), ItemState::Attached) = (item.visual, item.state) {
                if new_index != old_index {
                    effect.relocated.push(Relocation {
                        visual,
                        old_index,
                        new_index,
                    });
                }
            }
            self.items.insert(new_index, item);
        }
        effect.inserted = modified
            .iter()
            .filter(|m| m.is_insert())
            .filter_map(|m| m.new_index)
            .collect();

        let before = self.state;
        let map_bound = |i: usize| remap.map_position(i).min(count);
        let mut next = WindowState {
            begin: map_bound(before.begin),
            end: map_bound(before.end),
            first_displayed: before.first_displayed.map(map_bound),
            last_displayed: before.last_displayed.map(|i| map_bound(i + 1).saturating_sub(1)),
        };
        if next.end < next.begin {
            next.end = next.begin;
        }
        if let (Some(first), Some(last)) = (next.first_displayed, next.last_displayed) {
            if first > last || first >= count {
                next.first_displayed = None;
                next.last_displayed = None;
            }
        }
        vdebug!(?before, ?next, count, "WindowManager::apply_edit");
        self.state = next;
        self.stale.clear();
        self.rebind_slots();
        effect
    }

    fn evict_detached(
        &mut self,
        item: MaterializedItem,
        data: &mut dyn DataSource,
        renderer: &mut dyn Renderer,
    ) {
        if let Some(id) = item.request {
            self.requests.remove(&id);
            data.cancel_request(id);
        }
        if let Some(visual) = item.visual {
            renderer.remove(visual);
        }
        if let Some(record) = item.record {
            data.release_item(record);
        }
    }

    /// Removes visuals handed out in [`EditEffect::removed`] once their fade-out is done.
    pub fn retire(&mut self, visuals: &[VisualId], renderer: &mut dyn Renderer) {
        for &visual in visuals {
            renderer.remove(visual);
        }
    }

    /// Points every materialized item at its current tree slot.
    pub fn rebind_slots(&mut self) {
        for (&index, item) in self.items.iter_mut() {
            if let Some(slot) = self.tree.slot_id(index) {
                item.slot = Some(slot);
            }
        }
    }

    /// Restores the window of the previous pass after a data failure. Items outside it are
    /// queued for lazy eviction.
    pub fn rollback(&mut self) {
        let Some(previous) = self.previous.take() else {
            return;
        };
        vdebug!(?previous, "WindowManager::rollback");
        self.state = previous;
        let outside: Vec<usize> = self
            .items
            .keys()
            .copied()
            .filter(|&i| !previous.contains(i))
            .collect();
        self.stale.extend(outside);
    }

    /// Sets the window without starting a pass. Used when the host pauses with an empty window.
    pub fn reset_state(&mut self, state: WindowState) {
        self.state = state;
    }

    /// Drops every visual, record and request.
    pub fn clear(&mut self, data: &mut dyn DataSource, renderer: &mut dyn Renderer) {
        let indices: Vec<usize> = self.items.keys().copied().collect();
        for index in indices {
            self.evict(index, data, renderer);
        }
        for (id, _) in core::mem::take(&mut self.requests) {
            data.cancel_request(id);
        }
        for (_, visual) in core::mem::take(&mut self.headers) {
            renderer.remove(visual);
        }
        self.stale.clear();
        self.state = WindowState::default();
        self.previous = None;
    }
}

fn distance_outside(window: &WindowState, index: usize) -> usize {
    if index < window.begin {
        window.begin - index
    } else {
        index.saturating_sub(window.end) + 1
    }
}

/// Old → new index mapping for one edit batch.
struct IndexRemap {
    /// Old indices of removed and moved elements, sorted.
    vacated: Vec<usize>,
    /// New indices of inserted and moved elements, sorted.
    filled: Vec<usize>,
    moved: BTreeMap<usize, usize>,
    changed: Vec<usize>,
}

impl IndexRemap {
    fn new(modified: &[ModifiedElement]) -> Self {
        let mut vacated = Vec::new();
        let mut filled = Vec::new();
        let mut moved = BTreeMap::new();
        let mut changed = Vec::new();
        for m in modified {
            match (m.old_index, m.new_index) {
                // Kept even when `old == new`: other edits may have shifted everything
                // around it, so it still occupies a filled position.
                (Some(old), Some(new)) => {
                    vacated.push(old);
                    filled.push(new);
                    moved.insert(old, new);
                }
                (Some(old), None) => vacated.push(old),
                (None, Some(new)) => filled.push(new),
                _ => {}
            }
            if m.changed {
                if let Some(old) = m.old_index {
                    changed.push(old);
                }
            }
        }
        vacated.sort_unstable();
        vacated.dedup();
        filled.sort_unstable();
        filled.dedup();
        changed.sort_unstable();
        Self {
            vacated,
            filled,
            moved,
            changed,
        }
    }

    /// New index of the element that sat at `old`, or `None` if it was removed.
    fn map_existing(&self, old: usize) -> Option<usize> {
        if let Some(&new) = self.moved.get(&old) {
            return Some(new);
        }
        if self.vacated.binary_search(&old).is_ok() {
            return None;
        }
        Some(self.map_position(old))
    }

    /// New position of the boundary before old index `old`: the number of untouched elements
    /// before it, spread around the filled positions.
    fn map_position(&self, old: usize) -> usize {
        let rank = old - self.vacated.partition_point(|&v| v < old);
        let mut position = rank;
        for &f in &self.filled {
            if f <= position {
                position += 1;
            } else {
                break;
            }
        }
        position
    }

    fn changed(&self, old: usize) -> bool {
        self.changed.binary_search(&old).is_ok()
    }
}
