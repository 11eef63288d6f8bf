use crate::layout::{CellSpanningLayout, FlowLayout, LayoutSite, UniformLayout};
use crate::scheduler::{JobStep, Priority, Scheduler, TimeSlice};
use crate::tree::{GroupSnapshot, Tree, TreeSnapshot};
use crate::window::{ItemState, WindowManager};
use crate::*;

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use proptest::prelude::*;

#[derive(Clone, Copy, Debug)]
struct Lcg(u64);

impl Lcg {
    fn new(seed: u64) -> Self {
        Self(seed)
    }

    fn next_u64(&mut self) -> u64 {
        // Deterministic, dependency-free PRNG for tests.
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0
    }

    fn gen_range_u64(&mut self, start: u64, end_exclusive: u64) -> u64 {
        debug_assert!(start < end_exclusive);
        let span = end_exclusive - start;
        start + (self.next_u64() % span)
    }

    fn gen_range_usize(&mut self, start: usize, end_exclusive: usize) -> usize {
        self.gen_range_u64(start as u64, end_exclusive as u64) as usize
    }
}

// ---------------------------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------------------------

/// Data source over a list of item identities. Records remember the identity they were issued
/// for, so tests can check that every visual shows the item currently at its index.
#[derive(Debug, Default)]
struct MockData {
    items: Vec<u64>,
    groups: Option<Vec<GroupDescriptor>>,
    deferred: bool,
    fail: BTreeSet<usize>,
    next_identity: u64,
    next_id: u64,
    outstanding: BTreeMap<RecordHandle, u64>,
    pending: Vec<(RequestId, usize)>,
    cancelled: Vec<RequestId>,
    released: usize,
}

impl MockData {
    fn new(count: usize) -> Self {
        Self {
            items: (0..count as u64).collect(),
            next_identity: count as u64,
            ..Self::default()
        }
    }

    fn fresh(&mut self) -> u64 {
        self.next_identity += 1;
        self.next_identity + 1_000_000
    }

    fn issue(&mut self, index: usize) -> RecordHandle {
        self.next_id += 1;
        let record = RecordHandle(self.next_id);
        self.outstanding.insert(record, self.items[index]);
        record
    }

    fn insert(&mut self, index: usize) {
        let identity = self.fresh();
        self.items.insert(index, identity);
    }

    fn replace(&mut self, index: usize) {
        self.items[index] = self.fresh();
    }
}

impl DataSource for MockData {
    fn count(&self) -> usize {
        self.items.len()
    }

    fn groups(&self) -> Vec<GroupDescriptor> {
        match &self.groups {
            Some(groups) => groups.clone(),
            None => vec![GroupDescriptor {
                key: 0,
                start_index: 0,
                count: self.items.len(),
            }],
        }
    }

    fn request_item(&mut self, index: usize) -> ItemRequest {
        assert!(index < self.items.len(), "request for {index} past the end");
        if self.fail.contains(&index) {
            return ItemRequest::Failed(DataError::NotAvailable);
        }
        if self.deferred {
            self.next_id += 1;
            let id = RequestId(self.next_id);
            self.pending.push((id, index));
            return ItemRequest::Pending(id);
        }
        ItemRequest::Ready(self.issue(index))
    }

    fn cancel_request(&mut self, request: RequestId) {
        self.cancelled.push(request);
        self.pending.retain(|&(id, _)| id != request);
    }

    fn release_item(&mut self, record: RecordHandle) {
        assert!(
            self.outstanding.remove(&record).is_some(),
            "{record:?} released twice or never issued"
        );
        self.released += 1;
    }
}

#[derive(Debug, Default)]
struct MockRenderer {
    next: u64,
    live: BTreeSet<VisualId>,
    placed: BTreeMap<VisualId, Bounds>,
    transforms: BTreeMap<VisualId, VisualTransform>,
    ordering: BTreeMap<VisualId, OrderingMetadata>,
    headers: BTreeMap<VisualId, usize>,
}

impl MockRenderer {
    fn create(&mut self) -> VisualId {
        self.next += 1;
        let visual = VisualId(self.next);
        self.live.insert(visual);
        visual
    }
}

impl Renderer for MockRenderer {
    fn render_item(&mut self, _index: usize, _record: RecordHandle) -> VisualId {
        self.create()
    }

    fn render_header(&mut self, group: usize, _key: u64) -> VisualId {
        let visual = self.create();
        self.headers.insert(visual, group);
        visual
    }

    fn place(&mut self, visual: VisualId, bounds: Bounds) {
        assert!(self.live.contains(&visual), "placing removed {visual:?}");
        self.placed.insert(visual, bounds);
    }

    fn apply_transform(&mut self, visual: VisualId, transform: VisualTransform) {
        self.transforms.insert(visual, transform);
    }

    fn remove(&mut self, visual: VisualId) {
        assert!(self.live.remove(&visual), "{visual:?} removed twice");
        self.placed.remove(&visual);
        self.transforms.remove(&visual);
        self.headers.remove(&visual);
        self.ordering.remove(&visual);
    }

    fn set_ordering(&mut self, visual: VisualId, ordering: OrderingMetadata) {
        self.ordering.insert(visual, ordering);
    }
}

#[derive(Debug)]
struct MockMeasurer {
    viewport: Size,
    metrics: ItemMetrics,
    /// Number of `measure` calls that report "not ready" before answering.
    not_ready: u32,
    surfaces: i32,
    measured: usize,
}

impl MockMeasurer {
    fn new(viewport: Size) -> Self {
        Self {
            viewport,
            metrics: ItemMetrics::default(),
            not_ready: 0,
            surfaces: 0,
            measured: 0,
        }
    }
}

impl Measurer for MockMeasurer {
    fn viewport(&self) -> Size {
        self.viewport
    }

    fn create_surface(&mut self) {
        self.surfaces += 1;
    }

    fn remove_surface(&mut self) {
        self.surfaces -= 1;
    }

    fn measure(&mut self, _visual: VisualId) -> Option<ItemMetrics> {
        if self.not_ready > 0 {
            self.not_ready -= 1;
            return None;
        }
        self.measured += 1;
        Some(self.metrics)
    }
}

type View = Realizer<MockData, MockRenderer, MockMeasurer>;

struct Harness {
    view: View,
    now: u64,
}

impl Harness {
    fn new(options: ViewOptions, data: MockData, viewport: Size) -> Self {
        Self {
            view: Realizer::new(
                options,
                data,
                MockRenderer::default(),
                MockMeasurer::new(viewport),
            ),
            now: 0,
        }
    }

    /// 300x300 viewport, 100x100 items: three per track, three tracks per page.
    fn grid(count: usize) -> Self {
        let options = ViewOptions::new(LayoutKind::Grid { max_slots: None })
            .with_item_size(Some(Size::new(100, 100)))
            .with_animations_enabled(false);
        Self::new(options, MockData::new(count), Size::new(300, 300))
    }

    fn pump(&mut self) -> PumpStatus {
        self.now += 16;
        self.view.pump(self.now).expect("pump")
    }

    /// Pumps frames until no work is left, then reports the frame as painted.
    fn settle(&mut self) {
        for _ in 0..10_000 {
            if self.pump() == PumpStatus::Idle {
                self.view.render_complete();
                return;
            }
        }
        panic!("view did not settle: {:?}", self.view);
    }

    fn start(&mut self) -> Ticket {
        let ticket = self.view.realize_page();
        self.settle();
        ticket
    }

    /// Completes every request the data source is holding.
    fn deliver_all(&mut self) {
        let pending = core::mem::take(&mut self.view.data_mut().pending);
        for (id, index) in pending {
            let record = self.view.data_mut().issue(index);
            self.view.item_ready(id, Ok(record)).expect("item_ready");
        }
    }

    fn outcome(&mut self, ticket: Ticket) -> Option<Result<Settled, ViewError>> {
        self.view.drain_events().into_iter().find_map(|e| match e {
            ViewEvent::Outcome { ticket: t, result } if t == ticket => Some(result),
            _ => None,
        })
    }
}

/// Every index of the window is attached where the layout says it belongs and shows the item
/// currently at that index; nothing is leaked.
fn assert_consistent(h: &Harness) {
    let view = &h.view;
    let data = view.data();
    let renderer = view.renderer();
    let window = view.window_state();
    assert!(window.end <= data.items.len(), "{window:?} past the end");
    for i in window.begin..window.end {
        let item = view
            .window()
            .item(i)
            .unwrap_or_else(|| panic!("index {i} missing from {window:?}"));
        assert_eq!(item.state, ItemState::Attached, "index {i}");
        let visual = item.visual.expect("attached items have a visual");
        let geometry = view.layout().item_geometry(i).expect("geometry");
        assert_eq!(renderer.placed.get(&visual), Some(&geometry.bounds), "index {i}");
    }

    let mut records = 0;
    let mut visuals = 0;
    for (i, item) in view.window().items() {
        if let Some(record) = item.record {
            records += 1;
            assert_eq!(
                data.outstanding.get(&record),
                Some(&data.items[i]),
                "record at index {i} shows another item"
            );
        }
        if item.visual.is_some() {
            visuals += 1;
        }
    }
    assert_eq!(records, data.outstanding.len(), "leaked records");
    let headers = view.window().headers().count();
    assert_eq!(visuals + headers, renderer.live.len(), "leaked visuals");
}

// ---------------------------------------------------------------------------------------------
// Layout fixtures
// ---------------------------------------------------------------------------------------------

fn site(orientation: Orientation, viewport: Size, item: Size) -> LayoutSite {
    LayoutSite {
        orientation,
        viewport,
        item_size: item,
        header_size: Size::default(),
        groups_enabled: false,
        realize_extent: (0, u64::MAX),
    }
}

fn snapshot(groups: &[(u64, usize)]) -> TreeSnapshot {
    let mut start = 0;
    TreeSnapshot {
        groups: groups
            .iter()
            .map(|&(key, count)| {
                let g = GroupSnapshot {
                    key,
                    start_index: start,
                    count,
                };
                start += count;
                g
            })
            .collect(),
    }
}

fn descriptors(groups: &[(u64, usize)]) -> Vec<GroupDescriptor> {
    snapshot(groups)
        .groups
        .iter()
        .map(|g| GroupDescriptor {
            key: g.key,
            start_index: g.start_index,
            count: g.count,
        })
        .collect()
}

fn lay_out(layout: &mut dyn LayoutStrategy, site: LayoutSite, groups: &[(u64, usize)]) {
    layout.initialize(site, site.groups_enabled);
    layout
        .layout(&snapshot(groups), &AffectedRange::new(), &[], &[])
        .expect("layout");
}

fn built_tree(groups: &[(u64, usize)], groups_enabled: bool) -> Tree {
    let mut tree = Tree::new(None, groups_enabled);
    let mut builder = TreeBuilder::new(64, 1024);
    builder.rebuild(&mut tree, &descriptors(groups));
    let clock = || 0u64;
    let slice = TimeSlice::new(&clock, u64::MAX);
    assert_eq!(builder.step(&mut tree, &slice), BuildStep::Done);
    tree
}

fn hit(layout: &dyn LayoutStrategy, x: u64, y: u64) -> (usize, Option<usize>) {
    let r = layout.hit_test(Point::new(x, y)).expect("hit");
    (r.index, r.insert_after_index)
}

fn adjacent(layout: &dyn LayoutStrategy, entity: Entity, key: NavigationKey) -> Adjacent {
    layout.get_adjacent(entity, key)
}

fn item(i: usize) -> Adjacent {
    Adjacent::Entity(Entity::item(i))
}

fn span_sizes(i: usize) -> Size {
    match i % 4 {
        1 => Size::new(160, 80),
        2 => Size::new(80, 160),
        _ => Size::new(80, 80),
    }
}

fn spanning_layout() -> CellSpanningLayout {
    let item_info: layout::ItemInfoCallback = Arc::new(span_sizes);
    let group_info: layout::GroupInfoCallback = Arc::new(|_| GroupSpanInfo {
        enable_cell_spanning: true,
        cell: Size::new(80, 80),
    });
    CellSpanningLayout::new(Some(item_info), Some(group_info))
}

// ---------------------------------------------------------------------------------------------
// Occupancy
// ---------------------------------------------------------------------------------------------

#[test]
fn occupancy_places_first_fit_from_a_forward_cursor() {
    let cell = Size::new(80, 80);
    let mut map = OccupancyMap::new(3);
    for i in 0..4 {
        let (rows, cols) = OccupancyMap::footprint(span_sizes(i), cell, Orientation::Vertical);
        map.place(i, rows, cols, span_sizes(i));
    }
    let cells: Vec<(usize, usize, usize, usize)> = map
        .placements()
        .iter()
        .map(|p| (p.track, p.slot, p.row_span, p.col_span))
        .collect();
    assert_eq!(cells, vec![(0, 0, 1, 1), (0, 1, 1, 2), (1, 0, 2, 1), (1, 2, 1, 1)]);

    // (1, 1) stays empty: the cursor had already passed it.
    assert_eq!(map.entry_at(1, 1), None);
    assert_eq!(map.preceding(1, 1).map(|p| p.item_index), Some(2));
    assert_eq!(map.entry_at(2, 0).map(|p| p.item_index), Some(2));
    assert_eq!(map.track_count(), 3);
}

#[test]
fn occupancy_clamps_wide_items_to_the_track() {
    let mut map = OccupancyMap::new(2);
    let p = map.place(0, 1, 5, Size::new(500, 80));
    assert_eq!((p.slot, p.col_span), (0, 2));
    let p = map.place(1, 0, 0, Size::default());
    assert_eq!((p.track, p.slot, p.row_span, p.col_span), (1, 0, 1, 1));
}

proptest! {
    #[test]
    fn occupancy_placements_never_overlap(
        slots in 1usize..6,
        spans in proptest::collection::vec((1usize..4, 1usize..4), 0..60),
    ) {
        let mut map = OccupancyMap::new(slots);
        for (i, &(rows, cols)) in spans.iter().enumerate() {
            map.place(i, rows, cols, Size::default());
        }
        let placements = map.placements();
        prop_assert_eq!(placements.len(), spans.len());
        for (i, a) in placements.iter().enumerate() {
            prop_assert!(a.slot + a.col_span <= slots);
            for b in &placements[i + 1..] {
                prop_assert!(!a.overlaps(b), "{:?} overlaps {:?}", a, b);
                // Origins advance in scan order.
                prop_assert!(a.track * slots + a.slot < b.track * slots + b.slot);
            }
        }
    }
}

proptest! {
    #[test]
    fn occupancy_intersecting_matches_a_linear_scan(
        spans in proptest::collection::vec((1usize..5, 1usize..4), 1..60),
        t0 in 0usize..40,
        len in 0usize..10,
    ) {
        let mut map = OccupancyMap::new(3);
        for (i, &(rows, cols)) in spans.iter().enumerate() {
            map.place(i, rows, cols, Size::default());
        }
        let t1 = t0 + len;
        let hits: Vec<usize> = map
            .placements()
            .iter()
            .enumerate()
            .filter(|(_, p)| p.track <= t1 && p.track + p.row_span > t0)
            .map(|(i, _)| i)
            .collect();
        let expected = hits.first().map(|&first| (first, hits[hits.len() - 1]));
        prop_assert_eq!(map.intersecting(t0, t1), expected);
    }
}

// ---------------------------------------------------------------------------------------------
// Affected range
// ---------------------------------------------------------------------------------------------

#[test]
fn affected_range_merges_touching_intervals() {
    let mut r = AffectedRange::new();
    r.add(5..8);
    r.add(8..10);
    r.add(1..2);
    r.add_index(0);
    assert_eq!(r.ranges(), &[0..2, 5..10]);
    assert!(r.intersects(9..20));
    assert!(!r.intersects(2..5));
    assert_eq!(r.envelope(), Some(0..10));

    let taken = r.take();
    assert!(r.is_empty());
    assert!(taken.contains(6));

    r.add_all();
    assert!(r.is_all());
    r.add(3..4);
    assert!(r.is_all());
}

proptest! {
    #[test]
    fn affected_range_covers_every_added_index(
        ranges in proptest::collection::vec((0usize..500, 0usize..40), 0..64),
    ) {
        let mut r = AffectedRange::new();
        for &(start, len) in &ranges {
            r.add(start..start + len);
        }
        for &(start, len) in &ranges {
            for i in start..start + len {
                prop_assert!(r.contains(i));
            }
        }
        let intervals = r.ranges();
        prop_assert!(intervals.len() <= 16);
        for pair in intervals.windows(2) {
            prop_assert!(pair[0].end < pair[1].start);
        }
    }
}

// ---------------------------------------------------------------------------------------------
// Scheduler and tree
// ---------------------------------------------------------------------------------------------

#[test]
fn scheduler_runs_tiers_in_order_and_parks_until_the_next_frame() {
    let mut s: Scheduler<&str> = Scheduler::new();
    s.schedule(Priority::Idle, "idle");
    s.schedule(Priority::Normal, "normal");
    s.schedule(Priority::Max, "max");

    let job = s.pop().expect("job");
    assert_eq!(job.work, "max");
    s.park(job.id, job.priority, "max again");

    let job = s.pop().expect("job");
    assert_eq!(job.work, "normal");
    s.schedule(Priority::Normal, "second normal");
    s.resume(job.id, job.priority, "normal continued");
    assert_eq!(s.pop().map(|j| j.work), Some("normal continued"));

    assert_eq!(s.pop_matching(|w| *w != "second normal").map(|j| j.work), Some("idle"));
    s.retain(|w| *w != "second normal");
    assert!(s.pop().is_none());
    assert!(!s.is_idle());

    s.start_frame();
    assert_eq!(s.pop().map(|j| j.work), Some("max again"));
    assert!(s.is_idle());

    let step: JobStep<u8> = JobStep::NextFrame(1);
    assert_ne!(step, JobStep::Done);
}

#[test]
fn tree_builder_doubles_chunks_up_to_the_cap() {
    let mut tree = Tree::new(Some(8), false);
    let mut builder = TreeBuilder::new(4, 16);
    builder.rebuild(&mut tree, &descriptors(&[(1, 100)]));

    // Yield after every chunk.
    let clock = || 0u64;
    let slice = TimeSlice::new(&clock, 0);
    let mut built = Vec::new();
    loop {
        let step = builder.step(&mut tree, &slice);
        built.push(tree.built_count());
        if step == BuildStep::Done {
            break;
        }
    }
    assert_eq!(built, vec![4, 12, 28, 44, 60, 76, 92, 100]);
    assert!(tree.is_complete());
    assert_eq!(builder.chunk_size(), 16);

    // Blocks hold 8 slots each.
    let slot = tree.slot_ref(19).expect("slot");
    assert_eq!((slot.group, slot.block, slot.position), (0, 2, 19));
}

#[test]
fn reconcile_keeps_slots_before_the_first_changed_group() {
    let mut tree = built_tree(&[(1, 5), (2, 5)], true);
    let before: Vec<_> = (0..10).map(|i| tree.slot_id(i)).collect();
    let header = tree.header_slot(1);

    let mut builder = TreeBuilder::new(4, 16);
    assert_eq!(builder.reconcile(&mut tree, &descriptors(&[(1, 5), (2, 5)])), None);
    let boundary = builder.reconcile(&mut tree, &descriptors(&[(1, 5), (2, 7)]));
    assert_eq!(boundary, Some(10));
    assert!(!tree.is_complete());
    assert_eq!(tree.built_count(), 10);
    let after: Vec<_> = (0..10).map(|i| tree.slot_id(i)).collect();
    assert_eq!(before, after);
    assert_eq!(tree.header_slot(1), header);

    // A new group in front shifts everything.
    let boundary = builder.reconcile(&mut tree, &descriptors(&[(0, 2), (1, 5), (2, 7)]));
    assert_eq!(boundary, Some(0));
    assert_eq!(tree.group_of(2), Some(1));
}

// ---------------------------------------------------------------------------------------------
// Uniform layouts
// ---------------------------------------------------------------------------------------------

#[test]
fn uniform_grid_positions_follow_index_arithmetic() {
    let mut layout = UniformLayout::new(None);
    lay_out(
        &mut layout,
        site(Orientation::Vertical, Size::new(300, 300), Size::new(100, 100)),
        &[(0, 100)],
    );
    assert_eq!(layout.items_per_track(), 3);
    let g = layout.item_geometry(7).expect("geometry");
    assert_eq!((g.track, g.slot), (2, 1));
    assert_eq!(
        g.bounds,
        Bounds {
            x: 100,
            y: 200,
            width: 100,
            height: 100
        }
    );
    assert_eq!(layout.total_extent(), 3400);
    assert_eq!(layout.items_from_range(0, 299), Some((0, 8)));
    assert_eq!(layout.items_from_range(150, 449), Some((3, 14)));
    assert_eq!(layout.items_from_range(3400, 3500), None);

    let mut capped = UniformLayout::new(Some(2));
    lay_out(
        &mut capped,
        site(Orientation::Vertical, Size::new(300, 300), Size::new(100, 100)),
        &[(0, 100)],
    );
    assert_eq!(capped.items_per_track(), 2);
    assert_eq!(capped.total_extent(), 5000);
}

#[test]
fn uniform_layout_is_idempotent() {
    let mut layout = UniformLayout::new(None);
    let s = site(Orientation::Horizontal, Size::new(500, 250), Size::new(90, 60));
    lay_out(&mut layout, s, &[(0, 40), (1, 7)]);
    let first: Vec<_> = (0..47).map(|i| layout.item_geometry(i)).collect();
    for _ in 0..2 {
        layout
            .layout(&snapshot(&[(0, 40), (1, 7)]), &AffectedRange::new(), &[], &[])
            .expect("layout");
        let again: Vec<_> = (0..47).map(|i| layout.item_geometry(i)).collect();
        assert_eq!(first, again);
    }
    assert!(!layout.update_site(s));
}

#[test]
fn hit_test_splits_along_the_layout_axis() {
    let item = Size::new(100, 100);
    let viewport = Size::new(300, 300);

    let mut grid = UniformLayout::new(None);
    lay_out(&mut grid, site(Orientation::Vertical, viewport, item), &[(0, 100)]);
    assert_eq!(hit(&grid, 30, 150), (3, Some(2)));
    assert_eq!(hit(&grid, 80, 150), (3, Some(3)));
    assert_eq!(hit(&grid, 10, 10), (0, None));
    // Past the last item of a partial track.
    assert_eq!(hit(&grid, 250, 3350), (99, Some(99)));

    let mut list = FlowLayout::new();
    lay_out(&mut list, site(Orientation::Vertical, viewport, item), &[(0, 100)]);
    assert_eq!(hit(&list, 250, 30), (0, None));
    assert_eq!(hit(&list, 250, 70), (0, Some(0)));
    assert_eq!(
        list.item_geometry(2).map(|g| g.bounds),
        Some(Bounds {
            x: 0,
            y: 200,
            width: 300,
            height: 100
        })
    );

    let mut grid = UniformLayout::new(None);
    lay_out(&mut grid, site(Orientation::Horizontal, viewport, item), &[(0, 100)]);
    assert_eq!(hit(&grid, 150, 30), (3, Some(2)));
    assert_eq!(hit(&grid, 150, 260), (5, Some(5)));

    let mut list = FlowLayout::new();
    lay_out(&mut list, site(Orientation::Horizontal, viewport, item), &[(0, 100)]);
    assert_eq!(hit(&list, 120, 290), (1, Some(0)));
    assert_eq!(hit(&list, 190, 10), (1, Some(1)));
}

#[test]
fn hit_test_on_headers_and_empty_groups() {
    let mut s = site(Orientation::Vertical, Size::new(300, 300), Size::new(100, 100));
    s.groups_enabled = true;
    s.header_size = Size::new(300, 40);

    let mut layout = UniformLayout::new(None);
    lay_out(&mut layout, s, &[(10, 5), (20, 4)]);
    assert_eq!(layout.group_geometry(1).map(|g| g.offset), Some(240));
    assert_eq!(
        layout.header_bounds(1),
        Some(Bounds {
            x: 0,
            y: 240,
            width: 300,
            height: 40
        })
    );
    assert_eq!(layout.item_geometry(5).map(|g| (g.bounds.x, g.bounds.y)), Some((0, 280)));
    assert_eq!(hit(&layout, 150, 20), (0, None));
    assert_eq!(hit(&layout, 150, 250), (5, Some(4)));

    let mut layout = UniformLayout::new(None);
    lay_out(&mut layout, s, &[(1, 3), (2, 0), (3, 3)]);
    assert_eq!(hit(&layout, 10, 150), (3, Some(2)));

    let mut layout = UniformLayout::new(None);
    lay_out(&mut layout, s, &[(1, 3), (2, 0)]);
    assert_eq!(hit(&layout, 10, 150), (2, Some(2)));
}

#[test]
fn keyboard_navigation_in_uniform_grids() {
    let mut s = site(Orientation::Vertical, Size::new(300, 300), Size::new(100, 100));
    let mut layout = UniformLayout::new(None);
    lay_out(&mut layout, s, &[(0, 10)]);
    let nav = |i, key| adjacent(&layout, Entity::item(i), key);
    assert_eq!(nav(1, NavigationKey::Down), item(4));
    assert_eq!(nav(2, NavigationKey::Right), item(3));
    assert_eq!(nav(3, NavigationKey::Left), item(2));
    assert_eq!(nav(1, NavigationKey::Up), Adjacent::Boundary);
    assert_eq!(nav(7, NavigationKey::Down), item(9));
    assert_eq!(nav(9, NavigationKey::Down), Adjacent::Boundary);
    assert_eq!(nav(9, NavigationKey::Right), Adjacent::Boundary);
    assert_eq!(nav(5, NavigationKey::Home), item(0));
    assert_eq!(nav(5, NavigationKey::End), item(9));

    s.orientation = Orientation::Horizontal;
    let mut layout = UniformLayout::new(None);
    lay_out(&mut layout, s, &[(0, 10)]);
    assert_eq!(adjacent(&layout, Entity::item(1), NavigationKey::Right), item(4));
    assert_eq!(adjacent(&layout, Entity::item(1), NavigationKey::Down), item(2));

    // Crossing groups keeps the slot.
    s.orientation = Orientation::Vertical;
    s.groups_enabled = true;
    s.header_size = Size::new(300, 40);
    let mut layout = UniformLayout::new(None);
    lay_out(&mut layout, s, &[(1, 5), (2, 4)]);
    assert_eq!(adjacent(&layout, Entity::item(4), NavigationKey::Down), item(6));
    assert_eq!(adjacent(&layout, Entity::item(6), NavigationKey::Up), item(4));
    assert_eq!(
        adjacent(&layout, Entity::header(0), NavigationKey::Down),
        Adjacent::Entity(Entity::header(1))
    );
    assert_eq!(
        adjacent(&layout, Entity::header(1), NavigationKey::Down),
        Adjacent::Boundary
    );
}

// ---------------------------------------------------------------------------------------------
// Cell spanning
// ---------------------------------------------------------------------------------------------

#[test]
fn cell_spanning_geometry_hit_test_and_navigation() {
    let mut layout = spanning_layout();
    lay_out(
        &mut layout,
        site(Orientation::Vertical, Size::new(240, 400), Size::new(80, 80)),
        &[(0, 4)],
    );
    let map = layout.occupancy(0).expect("spanning group");
    assert_eq!(map.slots_per_track(), 3);
    let bounds = |i| layout.item_geometry(i).map(|g| g.bounds);
    assert_eq!(
        bounds(1),
        Some(Bounds {
            x: 80,
            y: 0,
            width: 160,
            height: 80
        })
    );
    assert_eq!(
        bounds(2),
        Some(Bounds {
            x: 0,
            y: 80,
            width: 80,
            height: 160
        })
    );
    assert_eq!(bounds(3).map(|b| (b.x, b.y)), Some((160, 80)));
    assert_eq!(layout.total_extent(), 240);

    // The gap at (1, 1) drops after the preceding item.
    assert_eq!(hit(&layout, 90, 90), (2, Some(2)));
    assert_eq!(hit(&layout, 100, 10), (1, Some(0)));
    assert_eq!(hit(&layout, 200, 10), (1, Some(1)));

    let nav = |i, key| adjacent(&layout, Entity::item(i), key);
    assert_eq!(nav(0, NavigationKey::Down), item(2));
    assert_eq!(nav(1, NavigationKey::Down), item(2));
    assert_eq!(nav(3, NavigationKey::Up), item(1));
    assert_eq!(nav(2, NavigationKey::Down), Adjacent::Boundary);
}

#[test]
fn cell_spanning_places_far_groups_lazily() {
    let mut layout = spanning_layout();
    let mut s = site(Orientation::Vertical, Size::new(240, 400), Size::new(80, 80));
    s.realize_extent = (0, 100);
    layout.initialize(s, false);
    let outcome = layout
        .layout(&snapshot(&[(1, 4), (2, 4)]), &AffectedRange::new(), &[], &[])
        .expect("layout");
    assert!(!outcome.layout_complete);
    assert!(layout.has_pending_work());
    assert!(layout.is_settled(3));
    assert!(!layout.is_settled(5));
    // One estimated cell per unplaced item: two tracks.
    assert_eq!(layout.total_extent(), 240 + 160);

    let clock = || 0u64;
    assert!(layout.continue_layout(&TimeSlice::new(&clock, u64::MAX)));
    assert!(!layout.has_pending_work());
    assert!(layout.is_settled(5));
    assert_eq!(layout.total_extent(), 480);
    assert_eq!(
        layout.item_geometry(5).map(|g| g.bounds),
        Some(Bounds {
            x: 80,
            y: 240,
            width: 160,
            height: 80
        })
    );
    // Both groups use cell spanning, so crossing lands on the first item.
    assert_eq!(adjacent(&layout, Entity::item(3), NavigationKey::Down), item(4));
}

#[test]
fn cell_spanning_places_a_single_group_only_through_the_realize_extent() {
    let mut layout = spanning_layout();
    let mut s = site(Orientation::Vertical, Size::new(240, 240), Size::new(80, 80));
    s.realize_extent = (0, 479);
    layout.initialize(s, false);
    let outcome = layout
        .layout(&snapshot(&[(0, 2000)]), &AffectedRange::new(), &[], &[])
        .expect("layout");
    assert!(!outcome.layout_complete);
    assert!(layout.has_pending_work());
    let placed = layout.occupancy(0).map(OccupancyMap::len).expect("spanning group");
    assert!(placed > 0 && placed < 2000, "{placed} placed up front");
    assert!(layout.is_settled(0));
    assert!(!layout.is_settled(1999));

    // Everything intersecting the extent is placed; the first unplaced item starts past it.
    let (first, last) = layout.items_from_range(0, 479).expect("items");
    assert_eq!(first, 0);
    assert!((first..=last).all(|i| layout.is_settled(i)));
    let next = layout.item_geometry(placed).expect("estimated geometry");
    assert!(next.bounds.y > 479, "{next:?}");
    let early = layout.item_geometry(10).expect("geometry");

    // A spent slice still places one chunk.
    let clock = || 0u64;
    assert!(!layout.continue_layout(&TimeSlice::new(&clock, 0)));
    let more = layout.occupancy(0).map(OccupancyMap::len).expect("spanning group");
    assert!(more > placed && more < 2000);

    assert!(layout.continue_layout(&TimeSlice::new(&clock, u64::MAX)));
    assert!(!layout.has_pending_work());
    let map = layout.occupancy(0).expect("spanning group");
    assert_eq!(map.len(), 2000);
    assert!(layout.is_settled(1999));
    assert_eq!(layout.total_extent(), map.track_count() as u64 * 80);
    assert_eq!(layout.item_geometry(10), Some(early));
}

#[test]
fn spanning_items_from_range_agrees_with_item_geometry() {
    let mut layout = spanning_layout();
    let mut s = site(Orientation::Vertical, Size::new(240, 240), Size::new(80, 80));
    s.realize_extent = (0, 799);
    layout.initialize(s, false);
    layout
        .layout(&snapshot(&[(0, 300)]), &AffectedRange::new(), &[], &[])
        .expect("layout");
    assert!(layout.has_pending_work());

    let check = |layout: &CellSpanningLayout| {
        for (from, to) in [(0, 79), (100, 400), (560, 900), (1500, 1700), (4000, 4100)] {
            let hits: Vec<usize> = (0..300)
                .filter(|&i| {
                    let b = layout.item_geometry(i).expect("geometry").bounds;
                    b.y <= to && b.y + b.height as u64 > from
                })
                .collect();
            let (first, last) = layout.items_from_range(from, to).expect("items");
            assert_eq!(Some(&first), hits.first(), "{from}..={to}");
            assert_eq!(Some(&last), hits.last(), "{from}..={to}");
        }
    };
    // Unplaced items are estimated one cell each, after the placed tracks.
    check(&layout);
    let clock = || 0u64;
    assert!(layout.continue_layout(&TimeSlice::new(&clock, u64::MAX)));
    check(&layout);
}

#[test]
fn cell_spanning_falls_back_to_uniform_groups() {
    let group_info: layout::GroupInfoCallback = Arc::new(|g| GroupSpanInfo {
        enable_cell_spanning: g == 1,
        cell: Size::new(80, 80),
    });
    let item_info: layout::ItemInfoCallback = Arc::new(span_sizes);
    let mut layout = CellSpanningLayout::new(Some(item_info), Some(group_info));
    lay_out(
        &mut layout,
        site(Orientation::Vertical, Size::new(240, 400), Size::new(80, 80)),
        &[(1, 4), (2, 4)],
    );
    assert!(layout.occupancy(0).is_none());
    assert!(layout.occupancy(1).is_some());
    assert_eq!(layout.item_geometry(3).map(|g| (g.track, g.slot)), Some((1, 0)));
    assert_eq!(layout.group_geometry(1).map(|g| g.offset), Some(160));
    // Leaving a spanning group lands on the edge item of the neighbour.
    assert_eq!(adjacent(&layout, Entity::item(5), NavigationKey::Up), item(3));
}

// ---------------------------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------------------------

#[test]
fn notification_batch_reports_pre_batch_indices() {
    let mut batch = NotificationBatch::new(10);
    assert!(batch.is_empty());
    batch.push(Notification::Removed { index: 2 });
    batch.push(Notification::Inserted { index: 0 });
    batch.push(Notification::Changed { index: 5 });
    let summary = batch.finish();
    assert_eq!(summary.count, 10);
    assert_eq!(summary.delta, 0);
    assert!(!summary.reload);
    assert_eq!(
        summary.modified,
        vec![
            ModifiedElement::inserted(0),
            ModifiedElement::removed(2),
            ModifiedElement {
                old_index: Some(5),
                new_index: Some(5),
                changed: true
            },
        ]
    );

    let mut batch = NotificationBatch::new(5);
    batch.push(Notification::Moved { from: 0, to: 4 });
    batch.push(Notification::Reload);
    let summary = batch.finish();
    assert_eq!(summary.modified, vec![ModifiedElement::moved(0, 4)]);
    assert!(summary.reload);
}

proptest! {
    #[test]
    fn notification_batches_track_every_touched_element(
        ops in proptest::collection::vec((0u8..3, any::<u16>(), any::<u16>()), 0..24),
    ) {
        let initial: Vec<u64> = (0..20).collect();
        let mut current = initial.clone();
        let mut fresh = 1000u64;
        let mut batch = NotificationBatch::new(initial.len());
        for (kind, a, b) in ops {
            match kind {
                0 => {
                    let index = a as usize % (current.len() + 1);
                    current.insert(index, fresh);
                    fresh += 1;
                    batch.push(Notification::Inserted { index });
                }
                1 if !current.is_empty() => {
                    let index = a as usize % current.len();
                    current.remove(index);
                    batch.push(Notification::Removed { index });
                }
                2 if !current.is_empty() => {
                    let from = a as usize % current.len();
                    let to = b as usize % current.len();
                    let v = current.remove(from);
                    current.insert(to, v);
                    batch.push(Notification::Moved { from, to });
                }
                _ => {}
            }
        }
        let summary = batch.finish();
        prop_assert_eq!(summary.count, current.len());
        prop_assert_eq!(summary.delta, current.len() as isize - 20);
        let mut inserted = 0;
        let mut removed = 0;
        for m in &summary.modified {
            match (m.old_index, m.new_index) {
                (Some(o), Some(n)) => {
                    prop_assert_eq!(current[n], initial[o]);
                }
                (Some(o), None) => {
                    removed += 1;
                    prop_assert!(!current.contains(&initial[o]));
                }
                (None, Some(n)) => {
                    inserted += 1;
                    prop_assert!(current[n] >= 1000);
                }
                (None, None) => prop_assert!(false, "empty modification"),
            }
        }
        prop_assert_eq!(inserted, current.iter().filter(|&&v| v >= 1000).count());
        prop_assert_eq!(removed, initial.iter().filter(|v| !current.contains(v)).count());
    }
}

// ---------------------------------------------------------------------------------------------
// Materialization window
// ---------------------------------------------------------------------------------------------

fn realize_all(
    wm: &mut WindowManager,
    data: &mut MockData,
    renderer: &mut MockRenderer,
    work: &[(usize, Priority)],
) {
    let pass = wm.pass();
    for &(index, _) in work {
        wm.realize_index(index, pass, data, renderer).expect("realize");
    }
}

#[test]
fn window_pass_orders_requests_by_visibility_and_direction() {
    let mut wm = WindowManager::new(built_tree(&[(0, 100)], false), 32);
    let mut data = MockData::new(100);
    let mut renderer = MockRenderer::default();
    let next = WindowState {
        begin: 21,
        end: 48,
        first_displayed: Some(30),
        last_displayed: Some(38),
    };
    let work = wm
        .begin_pass(next, ScrollDirection::Forward, &mut data, &mut renderer)
        .expect("pass");
    assert_eq!(work.len(), 27);
    assert_eq!(work[0], (30, Priority::High));
    assert_eq!(work[8], (38, Priority::High));
    assert_eq!(work[9], (39, Priority::Normal));
    assert_eq!(work[18], (21, Priority::BelowNormal));

    let mut wm = WindowManager::new(built_tree(&[(0, 100)], false), 32);
    let work = wm
        .begin_pass(next, ScrollDirection::Backward, &mut data, &mut renderer)
        .expect("pass");
    assert_eq!(work[0], (38, Priority::High));
    assert_eq!(work[9], (29, Priority::Normal));
    assert_eq!(work[18], (47, Priority::BelowNormal));
}

#[test]
fn window_remaps_through_a_removal_before_it() {
    let mut wm = WindowManager::new(built_tree(&[(0, 100)], false), 32);
    let mut data = MockData::new(100);
    let mut renderer = MockRenderer::default();
    let next = WindowState {
        begin: 40,
        end: 60,
        first_displayed: Some(45),
        last_displayed: Some(55),
    };
    let work = wm
        .begin_pass(next, ScrollDirection::Forward, &mut data, &mut renderer)
        .expect("pass");
    realize_all(&mut wm, &mut data, &mut renderer, &work);
    let visual_at_40 = wm.visual_of(40);
    assert!(visual_at_40.is_some());

    data.items.remove(10);
    let effect = wm.apply_edit(99, &[ModifiedElement::removed(10)], &mut data, &mut renderer);
    assert!(effect.removed.is_empty());
    assert_eq!(
        wm.state(),
        WindowState {
            begin: 39,
            end: 59,
            first_displayed: Some(44),
            last_displayed: Some(54),
        }
    );
    assert_eq!(wm.visual_of(39), visual_at_40);
    assert_eq!(wm.visual_of(59), None);
    assert_eq!(wm.materialized_count(), 20);
}

#[test]
fn lazy_eviction_stops_when_the_scroll_direction_reverses() {
    let clock = || 0u64;
    let never = TimeSlice::new(&clock, u64::MAX);
    let every_item = TimeSlice::new(&clock, 0);

    for reverse in [true, false] {
        let mut wm = WindowManager::new(built_tree(&[(0, 100)], false), 100);
        let mut data = MockData::new(100);
        let mut renderer = MockRenderer::default();
        let first = WindowState {
            begin: 0,
            end: 20,
            first_displayed: Some(0),
            last_displayed: Some(8),
        };
        let work = wm
            .begin_pass(first, ScrollDirection::Forward, &mut data, &mut renderer)
            .expect("pass");
        realize_all(&mut wm, &mut data, &mut renderer, &work);

        let second = WindowState {
            begin: 30,
            end: 50,
            first_displayed: Some(35),
            last_displayed: Some(43),
        };
        wm.begin_pass(second, ScrollDirection::Forward, &mut data, &mut renderer)
            .expect("pass");
        assert!(wm.has_stale());
        assert_eq!(wm.materialized_count(), 40);

        if reverse {
            let done = wm.lazy_evict_step(ScrollDirection::Backward, &never, &mut data, &mut renderer);
            assert!(done);
            assert!(!wm.has_stale());
            assert_eq!(wm.materialized_count(), 40);
            assert_eq!(data.outstanding.len(), 20);
        } else {
            // Farthest first.
            let done = wm.lazy_evict_step(ScrollDirection::Forward, &every_item, &mut data, &mut renderer);
            assert!(!done);
            assert!(wm.item(0).is_none());
            assert!(wm.item(1).is_some());
            assert!(wm.lazy_evict_step(ScrollDirection::Forward, &never, &mut data, &mut renderer));
            assert_eq!(wm.materialized_count(), 20);
            assert!(data.outstanding.is_empty());
            assert!(renderer.live.is_empty());
        }
    }
}

// ---------------------------------------------------------------------------------------------
// Animation
// ---------------------------------------------------------------------------------------------

#[test]
fn animation_plan_sequences_phases_and_snaps() {
    let config = AnimationConfig::default();
    let (gone, moving, added) = (VisualId(1), VisualId(2), VisualId(3));
    let moves = [MoveInput {
        visual: moving,
        from: Bounds {
            x: 0,
            y: 100,
            width: 100,
            height: 100,
        },
        to: Bounds {
            x: 200,
            y: 0,
            width: 100,
            height: 100,
        },
    }];
    let plan = AnimationPlan::new(&config, Orientation::Vertical, &[gone], &moves, &[added]);
    let kinds: Vec<PhaseKind> = plan.phases.iter().map(|p| p.kind).collect();
    assert_eq!(
        kinds,
        vec![
            PhaseKind::FadeOut,
            PhaseKind::MoveCross,
            PhaseKind::MoveMain,
            PhaseKind::FadeIn
        ]
    );
    let cross = plan.phase(PhaseKind::MoveCross).copied().expect("cross");
    assert_eq!((cross.start_ms, cross.duration_ms), (150, 230));
    assert_eq!(plan.duration_ms(), 750);

    let mut renderer = MockRenderer::default();
    let mut seq = AnimationSequencer::new();
    seq.start(plan, Easing::Linear, 1000, &mut renderer);
    assert_eq!(renderer.transforms[&moving].dx, -200);
    assert_eq!(renderer.transforms[&moving].dy, 100);
    assert_eq!(renderer.transforms[&added].opacity, 0.0);

    assert_eq!(seq.tick(1390, &mut renderer), None);
    assert_eq!(renderer.transforms[&moving].dx, 0);
    assert_eq!(renderer.transforms[&moving].dy, 100);
    assert_eq!(renderer.transforms[&gone].opacity, 0.0);

    let removed = seq.cancel_and_snap(&mut renderer);
    assert_eq!(removed, vec![gone]);
    assert!(!seq.is_active());
    assert!(renderer.transforms[&moving].is_identity());
    assert!(renderer.transforms[&added].is_identity());
    assert!(seq.cancel_and_snap(&mut renderer).is_empty());
}

#[test]
fn empty_animation_plan_has_no_phases() {
    let still = MoveInput {
        visual: VisualId(1),
        from: Bounds::default(),
        to: Bounds::default(),
    };
    let plan = AnimationPlan::new(&AnimationConfig::default(), Orientation::Vertical, &[], &[still], &[]);
    assert!(plan.is_empty());
    assert_eq!(Easing::SmoothStep.sample(0.5), 0.5);
}

// ---------------------------------------------------------------------------------------------
// Realizer
// ---------------------------------------------------------------------------------------------

#[test]
fn first_page_realizes_the_window_around_the_viewport() {
    let mut h = Harness::grid(100);
    let ticket = h.start();
    assert_eq!(
        h.view.window_state(),
        WindowState {
            begin: 0,
            end: 18,
            first_displayed: Some(0),
            last_displayed: Some(8),
        }
    );
    assert_eq!(h.view.total_extent(), 3400);
    assert_eq!(h.view.state(), RealizationState::Completed);
    assert_eq!(h.outcome(ticket), Some(Ok(Settled::Done)));
    assert_consistent(&h);

    let g = h.view.layout().item_geometry(7).expect("geometry");
    let visual = h.view.window().visual_of(7).expect("visual");
    assert_eq!(h.view.renderer().placed[&visual], g.bounds);
}

#[test]
fn state_machine_walks_through_the_realize_states() {
    let mut h = Harness::grid(100);
    h.view.realize_page();
    h.settle();
    let states: Vec<(RealizationState, RealizationState)> = h
        .view
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            ViewEvent::StateChanged { from, to } => Some((from, to)),
            _ => None,
        })
        .collect();
    use RealizationState::*;
    assert_eq!(
        states,
        vec![
            (Created, Building),
            (Building, LayingOut),
            (LayingOut, Realizing),
            (Realizing, Unrealizing),
            (Unrealizing, Completed),
        ]
    );
}

#[test]
fn viewport_realized_fires_before_window_completed() {
    let mut h = Harness::grid(100);
    h.start();
    let events = h.view.drain_events();
    let viewport = events
        .iter()
        .position(|e| matches!(e, ViewEvent::ViewportRealized { .. }));
    let window = events
        .iter()
        .position(|e| matches!(e, ViewEvent::WindowCompleted { .. }));
    assert!(viewport.is_some() && viewport < window);
    assert!(events.contains(&ViewEvent::LayoutComplete));
}

#[test]
fn scrolling_moves_the_window_and_pauses_until_the_gesture_ends() {
    let mut h = Harness::grid(100);
    h.start();
    h.view.on_scroll(1000);
    assert_eq!(h.view.state(), RealizationState::Scrolling);
    h.settle();
    assert_eq!(h.view.state(), RealizationState::ScrollingPaused);
    assert_eq!(
        h.view.window_state(),
        WindowState {
            begin: 21,
            end: 48,
            first_displayed: Some(30),
            last_displayed: Some(38),
        }
    );
    assert!(h.view.frame_state().is_scrolling);
    h.view.end_scroll_gesture();
    h.settle();
    assert_eq!(h.view.state(), RealizationState::Completed);
    // Old items were evicted lazily after the pass.
    assert!(h.view.window().item(0).is_none());
    assert_consistent(&h);
}

#[test]
fn stale_completions_release_their_record_once() {
    let mut h = Harness::grid(100);
    h.view.data_mut().deferred = true;
    let first = h.start();
    assert_eq!(h.view.data().pending.len(), 18);
    assert_eq!(h.view.state(), RealizationState::Realizing);
    let old = h.view.data().pending.clone();

    h.view.on_scroll(2000);
    h.settle();
    assert_eq!(h.outcome(first), Some(Ok(Settled::Superseded)));
    assert_eq!(h.view.data().cancelled.len(), 18);
    assert_eq!(h.view.data().pending.len(), 27);

    // A data source that delivers anyway: the record comes straight back.
    let (stale, index) = old[0];
    let record = h.view.data_mut().issue(index);
    h.view.item_ready(stale, Ok(record)).expect("item_ready");
    assert_eq!(h.view.data().released, 1);
    assert!(h.view.data().outstanding.is_empty());

    h.deliver_all();
    h.view.end_scroll_gesture();
    h.settle();
    assert!(h.view.window().is_complete());
    assert_consistent(&h);

    h.view.rebuild_tree();
    assert!(h.view.data().outstanding.is_empty());
    assert!(h.view.renderer().live.is_empty());
}

#[test]
fn attach_grows_outward_without_holes() {
    let mut h = Harness::grid(100);
    h.view.data_mut().deferred = true;
    h.start();
    let pending = h.view.data().pending.clone();
    // Deliver 5 first: it cannot attach before 0..=4.
    let (id5, _) = *pending.iter().find(|&&(_, i)| i == 5).expect("5 pending");
    let record = h.view.data_mut().issue(5);
    h.view.item_ready(id5, Ok(record)).expect("item_ready");
    assert_eq!(h.view.window().item(5).map(|i| i.state), Some(ItemState::Rendered));

    for &(id, index) in pending.iter().filter(|&&(_, i)| i < 5) {
        let record = h.view.data_mut().issue(index);
        h.view.item_ready(id, Ok(record)).expect("item_ready");
    }
    assert_eq!(h.view.window().item(5).map(|i| i.state), Some(ItemState::Attached));
    assert_eq!(h.view.window().item(6).map(|i| i.state), Some(ItemState::Placeholder));
}

#[test]
fn relayout_is_idempotent() {
    let mut h = Harness::grid(100);
    h.start();
    let geometry: Vec<_> = (0..100).map(|i| h.view.layout().item_geometry(i)).collect();
    let placed = h.view.renderer().placed.clone();
    for _ in 0..2 {
        h.view.relayout();
        assert_eq!(h.view.state(), RealizationState::LayingOut);
        h.settle();
        let again: Vec<_> = (0..100).map(|i| h.view.layout().item_geometry(i)).collect();
        assert_eq!(geometry, again);
        assert_eq!(placed, h.view.renderer().placed);
    }
}

#[test]
fn resize_during_an_animation_snaps_and_cancels() {
    let options = ViewOptions::new(LayoutKind::Grid { max_slots: None })
        .with_item_size(Some(Size::new(100, 100)));
    let mut h = Harness::new(options, MockData::new(100), Size::new(300, 300));
    h.start();
    let removed_visual = h.view.window().visual_of(0).expect("visual");

    h.view.data_mut().items.remove(0);
    h.view.notify(Notification::Removed { index: 0 });
    h.pump();
    assert_eq!(h.view.state(), RealizationState::RealizingAnimating);
    assert!(h.view.is_animating());
    assert!(h.view.renderer().live.contains(&removed_visual));
    assert!(h
        .view
        .renderer()
        .transforms
        .values()
        .any(|t| !t.is_identity()));

    h.view.measurer_mut().viewport = Size::new(400, 300);
    h.view.resize();
    assert_eq!(h.view.state(), RealizationState::Canceled);
    assert!(!h.view.is_animating());
    assert!(!h.view.renderer().live.contains(&removed_visual));
    assert!(h.view.renderer().transforms.values().all(|t| t.is_identity()));

    h.settle();
    assert_eq!(h.view.state(), RealizationState::Completed);
    let g = h.view.layout().item_geometry(5).expect("geometry");
    assert_eq!((g.track, g.slot), (1, 1));
    assert_consistent(&h);
}

#[test]
fn edit_animation_runs_to_completion() {
    let options = ViewOptions::new(LayoutKind::Grid { max_slots: None })
        .with_item_size(Some(Size::new(100, 100)));
    let mut h = Harness::new(options, MockData::new(100), Size::new(300, 300));
    h.start();
    let moved = h.view.window().visual_of(4).expect("visual");

    h.view.data_mut().insert(2);
    h.view.notify(Notification::Inserted { index: 2 });
    h.settle();
    assert!(!h.view.is_animating());
    assert_eq!(h.view.state(), RealizationState::Completed);
    assert_eq!(h.view.window().visual_of(5), Some(moved));
    assert!(h.view.renderer().transforms[&moved].is_identity());
    assert_consistent(&h);
}

#[test]
fn notifications_inside_a_batch_apply_once_at_the_end() {
    let mut h = Harness::grid(100);
    h.start();
    h.view.relayout();
    h.view.begin_notifications();
    assert_eq!(h.view.state(), RealizationState::LayoutCanceled);
    assert!(h.view.has_outstanding_notifications());

    h.view.data_mut().items.remove(0);
    h.view.notify(Notification::Removed { index: 0 });
    h.view.data_mut().replace(3);
    h.view.notify(Notification::Changed { index: 3 });
    // Nested batches close with the outermost one.
    h.view.begin_notifications();
    h.view.data_mut().items.remove(10);
    h.view.notify(Notification::Removed { index: 10 });
    h.view.end_notifications();
    assert_eq!(h.pump(), PumpStatus::Busy);
    assert_eq!(h.view.state(), RealizationState::LayoutCanceled);

    h.view.end_notifications();
    assert!(!h.view.has_outstanding_notifications());
    h.settle();
    assert_eq!(h.view.total_extent(), 3300);
    assert_consistent(&h);
}

#[test]
fn random_edits_keep_the_window_gap_free_and_leak_free() {
    let mut rng = Lcg::new(0x5eed_0001);
    let mut h = Harness::grid(60);
    h.start();

    let edit = |h: &mut Harness, rng: &mut Lcg| {
        let count = h.view.data().items.len();
        match rng.gen_range_usize(0, 4) {
            0 => {
                let index = rng.gen_range_usize(0, count + 1);
                h.view.data_mut().insert(index);
                h.view.notify(Notification::Inserted { index });
            }
            1 if count > 1 => {
                let index = rng.gen_range_usize(0, count);
                h.view.data_mut().items.remove(index);
                h.view.notify(Notification::Removed { index });
            }
            2 if count > 0 => {
                let index = rng.gen_range_usize(0, count);
                h.view.data_mut().replace(index);
                h.view.notify(Notification::Changed { index });
            }
            _ if count > 1 => {
                let from = rng.gen_range_usize(0, count);
                let to = rng.gen_range_usize(0, count);
                let data = h.view.data_mut();
                let v = data.items.remove(from);
                data.items.insert(to, v);
                h.view.notify(Notification::Moved { from, to });
            }
            _ => {}
        }
    };

    for _ in 0..80 {
        match rng.gen_range_usize(0, 4) {
            0 => {
                let max = h.view.total_extent().saturating_sub(300);
                let offset = rng.gen_range_u64(0, max + 1);
                h.view.on_scroll(offset);
                h.settle();
                h.view.end_scroll_gesture();
            }
            1 => {
                h.view.begin_notifications();
                for _ in 0..rng.gen_range_usize(1, 6) {
                    edit(&mut h, &mut rng);
                }
                h.view.end_notifications();
            }
            _ => edit(&mut h, &mut rng),
        }
        h.settle();
        assert_consistent(&h);
    }
}

#[test]
fn data_failure_in_the_viewport_rolls_the_window_back() {
    let mut h = Harness::grid(100);
    h.view.data_mut().fail.insert(4);
    let ticket = h.start();
    match h.outcome(ticket) {
        Some(Err(ViewError::Data { index, source })) => {
            assert_eq!(index, 4);
            assert_eq!(source, DataError::NotAvailable);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(h.view.state(), RealizationState::Completed);
    assert!(h.view.window_state().is_empty());
    assert!(h.view.data().outstanding.is_empty());
    assert!(h.view.renderer().live.is_empty());

    // Failures in the prefetch band only mark the item.
    h.view.data_mut().fail.clear();
    h.view.data_mut().fail.insert(15);
    let ticket = h.view.realize_page();
    h.settle();
    assert_eq!(h.outcome(ticket), Some(Ok(Settled::Done)));
    assert_eq!(h.view.window().item(15).map(|i| i.state), Some(ItemState::Failed));
}

#[test]
fn hidden_host_defers_and_replays() {
    let mut h = Harness::grid(100);
    h.view.measurer_mut().viewport = Size::new(0, 0);
    let ticket = h.start();
    assert_eq!(h.outcome(ticket), Some(Ok(Settled::Deferred)));
    assert!(h.view.needs_replay());
    assert_eq!(h.view.state(), RealizationState::Completed);
    assert!(h.view.renderer().live.is_empty());

    h.view.measurer_mut().viewport = Size::new(300, 300);
    let ticket = h.start();
    assert!(!h.view.needs_replay());
    assert_eq!(h.outcome(ticket), Some(Ok(Settled::Done)));
    assert_eq!(h.view.window_state().end, 18);
}

#[test]
fn stop_supersedes_pending_tickets() {
    let mut h = Harness::grid(100);
    h.view.data_mut().deferred = true;
    let ticket = h.start();
    h.view.stop(false);
    assert_eq!(h.view.state(), RealizationState::Canceled);
    assert_eq!(h.outcome(ticket), Some(Ok(Settled::Superseded)));

    // The requests in flight carry over to the next pass.
    h.view.data_mut().deferred = false;
    let ticket = h.start();
    assert_eq!(h.view.data().pending.len(), 18);
    h.deliver_all();
    h.settle();
    assert_eq!(h.outcome(ticket), Some(Ok(Settled::Done)));
}

#[test]
fn ensure_visible_scrolls_and_settles() {
    let mut h = Harness::grid(100);
    h.start();
    h.view.drain_events();

    let ticket = h.view.ensure_visible(Entity::item(50), Align::Start);
    h.settle();
    let events = h.view.drain_events();
    assert!(events.contains(&ViewEvent::ScrollRequested {
        ticket,
        offset: 1600
    }));
    assert!(events.contains(&ViewEvent::Outcome {
        ticket,
        result: Ok(Settled::Done)
    }));
    assert_eq!(h.view.scroll_offset(), 1600);
    assert!(h.view.window_state().displayed().contains(50));

    let ticket = h.view.ensure_visible(Entity::item(52), Align::Auto);
    assert!(h.view.drain_events().contains(&ViewEvent::ScrollRequested {
        ticket,
        offset: 1600
    }));
    h.settle();

    let ticket = h.view.ensure_visible(Entity::item(99), Align::Center);
    assert!(h.view.drain_events().contains(&ViewEvent::ScrollRequested {
        ticket,
        offset: 3100
    }));
    h.settle();

    let ticket = h.view.ensure_visible(Entity::item(500), Align::Start);
    assert_eq!(
        h.outcome(ticket),
        Some(Err(ViewError::OutOfRange(Entity::item(500))))
    );
}

#[test]
fn ensure_visible_before_the_first_layout_waits_for_it() {
    let mut h = Harness::grid(100);
    let ticket = h.view.ensure_visible(Entity::item(30), Align::Start);
    h.settle();
    assert_eq!(h.view.scroll_offset(), 1000);
    assert_eq!(h.outcome(ticket), Some(Ok(Settled::Done)));
}

#[test]
fn ordering_metadata_follows_attached_items() {
    let mut h = Harness::grid(100);
    h.start();
    let window = h.view.window();
    let visual = window.visual_of(3).expect("visual");
    let ordering = h.view.renderer().ordering[&visual];
    assert_eq!(ordering.position_in_set, 4);
    assert_eq!(ordering.set_size, 100);
    assert_eq!(ordering.group, None);
    assert_eq!(ordering.previous, window.visual_of(2));
    assert_eq!(ordering.next, window.visual_of(4));
}

#[test]
fn unsized_items_are_measured_on_a_hidden_surface() {
    let options = ViewOptions::new(LayoutKind::Grid { max_slots: None }).with_animations_enabled(false);
    let mut h = Harness::new(options, MockData::new(100), Size::new(300, 300));
    h.view.measurer_mut().metrics = ItemMetrics {
        content: Size::new(90, 90),
        outer: Size::new(10, 10),
    };
    h.view.measurer_mut().not_ready = 2;
    h.start();
    assert_eq!(h.view.measurer().measured, 1);
    assert_eq!(h.view.measurer().surfaces, 0);
    assert_eq!(h.view.total_extent(), 3400);
    assert_eq!(h.view.window_state().end, 18);
    assert_consistent(&h);
}

#[test]
fn group_headers_are_materialized_with_their_items() {
    let options = ViewOptions::new(LayoutKind::Grid { max_slots: None })
        .with_groups_enabled(true)
        .with_item_size(Some(Size::new(100, 100)))
        .with_header_size(Some(Size::new(300, 40)));
    let mut data = MockData::new(9);
    data.groups = Some(descriptors(&[(10, 5), (20, 4)]));
    let mut h = Harness::new(options, data, Size::new(300, 300));
    h.start();

    let header = h.view.window().header_visual(1).expect("header");
    assert_eq!(h.view.renderer().headers[&header], 1);
    assert_eq!(
        h.view.renderer().placed[&header],
        Bounds {
            x: 0,
            y: 240,
            width: 300,
            height: 40
        }
    );
    let visual = h.view.window().visual_of(6).expect("visual");
    assert_eq!(h.view.renderer().ordering[&visual].group, Some(1));
    assert_eq!(h.view.tree().groups()[1].offset, 240);
    assert_eq!(
        h.view.get_adjacent(Entity::item(4), NavigationKey::Down),
        item(6)
    );
    assert_eq!(h.view.hit_test(Point::new(10, 250)).map(|r| r.index), Some(5));
    assert_consistent(&h);
}

#[test]
fn entity_positions_resolve_once_lazy_spanning_finishes() {
    let options = ViewOptions::new(LayoutKind::CellSpanning)
        .with_groups_enabled(true)
        .with_item_size(Some(Size::new(80, 80)))
        .with_header_size(Some(Size::new(240, 20)))
        .with_prefetch_pages(0)
        .with_item_info(Some(span_sizes))
        .with_group_info(Some(|_: usize| GroupSpanInfo {
            enable_cell_spanning: true,
            cell: Size::new(80, 80),
        }));
    let mut data = MockData::new(8);
    data.groups = Some(descriptors(&[(1, 4), (2, 4)]));
    let mut h = Harness::new(options, data, Size::new(240, 160));

    let ticket = h.view.wait_for_entity_position(Entity::item(5));
    let missing = h.view.wait_for_entity_position(Entity::item(8));
    h.settle();
    let events = h.view.drain_events();
    assert!(events.contains(&ViewEvent::LayoutComplete));
    assert!(events.contains(&ViewEvent::EntityPosition {
        ticket,
        result: Ok(Bounds {
            x: 80,
            y: 280,
            width: 160,
            height: 80
        })
    }));
    assert!(events.contains(&ViewEvent::EntityPosition {
        ticket: missing,
        result: Err(ViewError::OutOfRange(Entity::item(8)))
    }));
    assert_eq!(h.view.total_extent(), 520);
    assert_consistent(&h);
}

#[test]
fn switching_layouts_rebuilds_the_tree() {
    let mut h = Harness::grid(100);
    h.start();
    h.view.update_options(|o| o.layout = LayoutKind::List);
    assert_eq!(h.view.state(), RealizationState::Building);
    h.settle();
    assert_eq!(h.view.layout().kind(), LayoutKind::List);
    assert_eq!(
        h.view.window_state(),
        WindowState {
            begin: 0,
            end: 6,
            first_displayed: Some(0),
            last_displayed: Some(2),
        }
    );
    assert_eq!(h.view.total_extent(), 10_000);
    assert_consistent(&h);

    h.view
        .update_options(|o| o.orientation = Orientation::Horizontal);
    assert_eq!(h.view.state(), RealizationState::LayingOut);
    h.settle();
    let g = h.view.layout().item_geometry(1).expect("geometry");
    assert_eq!((g.bounds.x, g.bounds.y, g.bounds.height), (100, 0, 300));
    assert_consistent(&h);
}

#[test]
fn time_sliced_builds_spread_across_frames() {
    let now = Arc::new(core::sync::atomic::AtomicU64::new(0));
    let clock = now.clone();
    let options = ViewOptions::new(LayoutKind::List)
        .with_item_size(Some(Size::new(100, 10)))
        .with_animations_enabled(false)
        .with_build_chunks(8, 64)
        .with_time_slice_ms(0)
        .with_clock(move || clock.load(core::sync::atomic::Ordering::Relaxed));
    let mut h = Harness::new(options, MockData::new(1000), Size::new(100, 100));
    h.view.realize_page();

    let mut frames = 0;
    for _ in 0..1000 {
        frames += 1;
        h.now += 16;
        now.store(h.now, core::sync::atomic::Ordering::Relaxed);
        if h.view.pump(h.now).expect("pump") == PumpStatus::Idle {
            break;
        }
    }
    assert!(frames > 5, "finished in {frames} frames");
    assert!(h.view.tree().is_complete());
    assert_eq!(h.view.window_state().end, 20);
}

#[test]
fn offset_for_matches_ensure_visible_without_scrolling() {
    let mut h = Harness::grid(100);
    assert_eq!(h.view.offset_for(Entity::item(50), Align::Start), None);
    h.start();

    assert_eq!(h.view.offset_for(Entity::item(50), Align::Start), Some(1600));
    assert_eq!(h.view.offset_for(Entity::item(99), Align::Center), Some(3100));
    assert_eq!(h.view.offset_for(Entity::item(4), Align::Auto), Some(0));
    assert_eq!(h.view.offset_for(Entity::item(100), Align::Start), None);
    assert_eq!(h.view.scroll_offset(), 0);
    assert_eq!(h.view.max_scroll_offset(), 3100);
}

#[test]
fn cell_spanning_view_finishes_a_large_group_after_the_first_pass() {
    let options = ViewOptions::new(LayoutKind::CellSpanning)
        .with_item_size(Some(Size::new(80, 80)))
        .with_animations_enabled(false)
        .with_item_info(Some(span_sizes))
        .with_group_info(Some(|_: usize| GroupSpanInfo {
            enable_cell_spanning: true,
            cell: Size::new(80, 80),
        }));
    let mut h = Harness::new(options, MockData::new(2000), Size::new(240, 240));
    h.start();
    let events = h.view.drain_events();
    let position = |wanted: &ViewEvent| events.iter().position(|e| e == wanted);
    let completed = events
        .iter()
        .position(|e| matches!(e, ViewEvent::WindowCompleted { .. }))
        .expect("window completed");
    let laid_out = position(&ViewEvent::LayoutComplete).expect("layout complete");
    assert!(completed < laid_out, "{events:?}");
    assert!(!h.view.layout().has_pending_work());
    assert!(h.view.layout().is_settled(1999));
    assert_eq!(h.view.state(), RealizationState::Completed);
    assert_consistent(&h);
}

#[test]
fn failed_pass_after_a_far_scroll_restores_the_previous_window() {
    let mut h = Harness::grid(1000);
    h.start();
    h.view.drain_events();
    let before = h.view.window_state();

    h.view.data_mut().fail.insert(905);
    h.view.on_scroll(30_000);
    h.settle();
    let events = h.view.drain_events();
    assert!(events.contains(&ViewEvent::ScrollRestored { offset: 0 }), "{events:?}");
    assert_eq!(h.view.scroll_offset(), 0);
    assert_eq!(h.view.window_state(), before);
    assert_eq!(
        before,
        WindowState {
            begin: 0,
            end: 18,
            first_displayed: Some(0),
            last_displayed: Some(8),
        }
    );

    h.view.end_scroll_gesture();
    h.settle();
    assert_eq!(h.view.state(), RealizationState::Completed);
    assert_consistent(&h);

    // The window is usable again once the data recovers.
    h.view.data_mut().fail.clear();
    h.view.on_scroll(30_000);
    h.view.end_scroll_gesture();
    h.settle();
    assert!(h.view.window_state().displayed().contains(905));
    assert_consistent(&h);
}

#[test]
fn failed_recovery_empties_the_window() {
    let mut h = Harness::grid(1000);
    h.start();
    h.view.data_mut().fail.extend([4, 905]);
    h.view.on_scroll(30_000);
    h.view.end_scroll_gesture();
    h.settle();
    assert!(h
        .view
        .drain_events()
        .contains(&ViewEvent::ScrollRestored { offset: 0 }));
    assert_eq!(h.view.state(), RealizationState::Completed);
    assert!(h.view.window_state().is_empty());
    assert!(h.view.data().outstanding.is_empty());
    assert!(h.view.renderer().live.is_empty());
}

#[test]
fn scroll_offsets_past_the_end_are_clamped() {
    let mut h = Harness::grid(100);
    h.start();

    h.view.on_scroll(50_000);
    assert_eq!(h.view.scroll_offset(), 3100);
    h.view.end_scroll_gesture();
    h.settle();
    let window = h.view.window_state();
    assert!(!window.is_empty());
    assert_eq!(window.last_displayed, Some(99));
    assert_consistent(&h);
}

#[test]
fn update_tree_trusts_the_count_over_a_mismatched_delta() {
    let mut h = Harness::grid(100);
    h.start();
    for _ in 0..5 {
        let identity = h.view.data_mut().fresh();
        h.view.data_mut().items.push(identity);
    }
    h.view.update_tree(105, 0, &[]);
    h.settle();
    assert_eq!(h.view.total_extent(), 3500);
    assert_eq!(h.view.max_scroll_offset(), 3200);
    assert_consistent(&h);
}
