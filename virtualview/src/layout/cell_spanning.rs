use alloc::collections::VecDeque;
use alloc::vec::Vec;

use super::groups::{AxisMove, GroupEntry, GroupTable};
use super::uniform::{hit_outside_items, items_per_track, split_hit};
use super::{
    GroupInfoCallback, ItemInfoCallback, LayoutKind, LayoutOutcome, LayoutSite, LayoutStrategy,
};
use crate::key::KeyIndexMap;
use crate::occupancy::{OccupancyMap, Placement};
use crate::scheduler::TimeSlice;
use crate::tree::TreeSnapshot;
use crate::{
    Adjacent, AffectedRange, Bounds, Entity, GroupGeometry, GroupSpanInfo, HitTestResult,
    ItemGeometry, ModifiedElement, NavigationKey, Point, Size, ViewError,
};

/// Items placed between time-slice checks while finishing a group lazily.
const PLACE_CHUNK: usize = 32;

#[derive(Clone, Debug)]
struct SpanGroup {
    info: GroupSpanInfo,
    /// `None` for groups laid out uniformly.
    map: Option<OccupancyMap>,
    /// Items placed so far; placement is complete once it reaches the group's count.
    placed: usize,
}

impl SpanGroup {
    fn spanning(&self) -> bool {
        self.map.is_some()
    }
}

/// Variable-sized items on a per-group [`OccupancyMap`].
///
/// Items up to the end of the realize extent are placed synchronously during `layout`.
/// Everything past it, including the tail of a group that straddles the extent, gets an
/// estimated extent of one cell per item and is placed later by `continue_layout`, a chunk at
/// a time.
pub struct CellSpanningLayout {
    item_info: Option<ItemInfoCallback>,
    group_info: Option<GroupInfoCallback>,
    site: Option<LayoutSite>,
    table: GroupTable,
    spans: Vec<SpanGroup>,
    pending: VecDeque<usize>,
    invalidated: bool,
}

impl core::fmt::Debug for CellSpanningLayout {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CellSpanningLayout")
            .field("site", &self.site)
            .field("groups", &self.table.len())
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

impl CellSpanningLayout {
    pub fn new(item_info: Option<ItemInfoCallback>, group_info: Option<GroupInfoCallback>) -> Self {
        Self {
            item_info,
            group_info,
            site: None,
            table: GroupTable::default(),
            spans: Vec::new(),
            pending: VecDeque::new(),
            invalidated: true,
        }
    }

    /// Occupancy map of `group`, if it uses cell spanning.
    pub fn occupancy(&self, group: usize) -> Option<&OccupancyMap> {
        self.spans.get(group)?.map.as_ref()
    }

    fn group_info(&self, site: &LayoutSite, group: usize) -> GroupSpanInfo {
        match &self.group_info {
            Some(info) => info(group),
            None => GroupSpanInfo {
                enable_cell_spanning: true,
                cell: site.item_size,
            },
        }
    }

    fn item_size(&self, site: &LayoutSite, index: usize) -> Size {
        match &self.item_info {
            Some(info) => info(index),
            None => site.item_size,
        }
    }

    fn new_span(&self, site: &LayoutSite, g: usize) -> SpanGroup {
        let info = self.group_info(site, g);
        let map = info.enable_cell_spanning.then(|| {
            let cell_cross = site.orientation.cross(info.cell).max(1);
            OccupancyMap::new(items_per_track(site.viewport_cross(), cell_cross, None))
        });
        SpanGroup {
            info,
            map,
            placed: 0,
        }
    }

    /// Sets slot and extent fields of a freshly dirtied entry. Spanning groups start from an
    /// estimate of one cell per item.
    fn prepare_entry(site: &LayoutSite, span: &SpanGroup, e: &mut GroupEntry) {
        let (unit_main, unit_cross) = if span.spanning() {
            (
                site.orientation.main(span.info.cell).max(1),
                site.orientation.cross(span.info.cell).max(1),
            )
        } else {
            (site.unit_main(), site.unit_cross())
        };
        e.slots = match &span.map {
            Some(map) => map.slots_per_track(),
            None => items_per_track(site.viewport_cross(), unit_cross, None),
        };
        e.tracks = e.count.div_ceil(e.slots);
        e.track_extent = unit_main;
        e.slot_extent = unit_cross;
        e.header_extent = site.header_extent();
        e.dirty = false;
    }

    /// Places up to `limit` more items of group `g`. Returns `true` once the group is done.
    fn place_some(&mut self, site: &LayoutSite, g: usize, limit: usize) -> bool {
        let Some(e) = self.table.entry(g) else {
            return true;
        };
        let (start, count) = (e.start_index, e.count);
        let Some(span) = self.spans.get(g) else {
            return true;
        };
        if span.placed >= count || !span.spanning() {
            return true;
        }
        let cell = span.info.cell;
        let from = span.placed;
        let to = (from + limit).min(count);
        let sizes: Vec<Size> = (from..to)
            .map(|rel| self.item_size(site, start + rel))
            .collect();

        let Some(span) = self.spans.get_mut(g) else {
            return true;
        };
        let Some(map) = span.map.as_mut() else {
            return true;
        };
        for (rel, size) in (from..to).zip(sizes) {
            let (rows, cols) = OccupancyMap::footprint(size, cell, site.orientation);
            map.place(start + rel, rows, cols, size);
        }
        span.placed = to;
        let done = to >= count;
        let tracks = if done {
            map.track_count()
        } else {
            // Placed tracks plus one cell per remaining item.
            map.track_count() + (count - to).div_ceil(map.slots_per_track())
        };
        if let Some(e) = self.table.entry_mut(g) {
            e.tracks = tracks;
        }
        done
    }

    /// Places items of `g` until one starts past `last_pixel`, leaving the rest for
    /// `continue_layout`. Returns `true` once the group is done.
    fn place_through(&mut self, site: &LayoutSite, g: usize, last_pixel: u64) -> bool {
        let origin = self.table.items_origin(g);
        loop {
            let Some(e) = self.table.entry(g) else {
                return true;
            };
            let past = self
                .spans
                .get(g)
                .and_then(|s| s.map.as_ref())
                .and_then(|m| m.placements().last())
                .is_some_and(|p| origin + (p.track as u64) * e.track_extent as u64 > last_pixel);
            if past {
                return self.spans.get(g).is_none_or(|s| s.placed >= e.count);
            }
            if self.place_some(site, g, PLACE_CHUNK) {
                return true;
            }
        }
    }

    fn placement(&self, g: usize, index: usize) -> Option<&Placement> {
        self.spans.get(g)?.map.as_ref()?.placement_of(index)
    }

    /// Track, slot and spans of an item, exact when placed and estimated otherwise.
    fn cell_of(&self, g: usize, index: usize) -> Option<(usize, usize, usize, usize)> {
        let e = self.table.entry(g)?;
        if let Some(p) = self.placement(g, index) {
            return Some((p.track, p.slot, p.row_span, p.col_span));
        }
        let span = self.spans.get(g)?;
        let rel = index - e.start_index;
        match &span.map {
            Some(map) => {
                let unplaced = rel.saturating_sub(span.placed);
                let track = map.track_count() + unplaced / e.slots;
                Some((track, unplaced % e.slots, 1, 1))
            }
            None => Some((rel / e.slots, rel % e.slots, 1, 1)),
        }
    }

    fn is_spanning(&self, g: usize) -> bool {
        self.spans.get(g).is_some_and(SpanGroup::spanning)
    }

    fn hit_items(&self, g: usize, main: u64, cross: u64) -> Option<HitTestResult> {
        let e = self.table.entry(g)?;
        let track = self.table.track_at(g, main);
        let slot = ((cross / e.slot_extent.max(1) as u64) as usize).min(e.slots - 1);
        let origin = self.table.items_origin(g);

        let Some(map) = self.spans.get(g).and_then(|s| s.map.as_ref()) else {
            let rel = track * e.slots + slot;
            let Some(index) = (rel < e.count).then_some(e.start_index + rel) else {
                let last = e.last_index()?;
                return Some(HitTestResult {
                    index: last,
                    insert_after_index: Some(last),
                });
            };
            let leading = if e.slots == 1 {
                let start = origin + (track as u64) * e.track_extent as u64;
                main.saturating_sub(start) < (e.track_extent / 2) as u64
            } else {
                cross.saturating_sub(slot as u64 * e.slot_extent as u64)
                    < (e.slot_extent / 2) as u64
            };
            return Some(split_hit(index, leading));
        };

        match map.entry_at(track, slot) {
            Some(p) => {
                let leading = if e.slots == 1 {
                    let start = origin + (p.track as u64) * e.track_extent as u64;
                    let extent = (p.row_span as u64) * e.track_extent as u64;
                    main.saturating_sub(start) < extent / 2
                } else {
                    let start = (p.slot as u64) * e.slot_extent as u64;
                    let extent = (p.col_span as u64) * e.slot_extent as u64;
                    cross.saturating_sub(start) < extent / 2
                };
                Some(split_hit(p.item_index, leading))
            }
            // Gap left by the forward-only cursor: drop after whatever precedes it.
            None => match map.preceding(track, slot) {
                Some(p) => Some(split_hit(p.item_index, false)),
                None => Some(split_hit(e.start_index, true)),
            },
        }
    }

    fn within_group(&self, g: usize, index: usize, mv: AxisMove) -> Option<usize> {
        let e = self.table.entry(g)?;
        let Some(map) = self.spans.get(g).and_then(|s| s.map.as_ref()) else {
            let rel = index - e.start_index;
            return match mv {
                AxisMove::MainNext if rel + e.slots < e.count => Some(index + e.slots),
                AxisMove::MainNext if rel / e.slots + 1 < e.tracks => e.last_index(),
                AxisMove::MainPrev if rel >= e.slots => Some(index - e.slots),
                _ => None,
            };
        };
        let Some(p) = map.placement_of(index) else {
            // Not placed yet: step by one estimated track.
            return match mv {
                AxisMove::MainNext => {
                    (index + e.slots < e.end_index()).then_some(index + e.slots)
                }
                AxisMove::MainPrev => index
                    .checked_sub(e.slots)
                    .filter(|&i| i >= e.start_index),
                _ => None,
            };
        };
        let distance = |q: &Placement| q.slot.abs_diff(p.slot);
        match mv {
            AxisMove::MainNext => map
                .placements()
                .iter()
                .filter(|q| q.track >= p.track + p.row_span)
                .min_by_key(|q| (q.track, distance(q), q.item_index))
                .map(|q| q.item_index),
            AxisMove::MainPrev => map
                .placements()
                .iter()
                .filter(|q| q.track + q.row_span <= p.track)
                .min_by_key(|q| (usize::MAX - q.track, distance(q), q.item_index))
                .map(|q| q.item_index),
            _ => None,
        }
    }
}

impl LayoutStrategy for CellSpanningLayout {
    fn kind(&self) -> LayoutKind {
        LayoutKind::CellSpanning
    }

    fn initialize(&mut self, mut site: LayoutSite, groups_enabled: bool) {
        site.groups_enabled = groups_enabled;
        vdebug!(?site, "CellSpanningLayout::initialize");
        self.site = Some(site);
        self.table.clear();
        self.spans.clear();
        self.pending.clear();
        self.invalidated = true;
    }

    fn uninitialize(&mut self) {
        self.site = None;
        self.table.clear();
        self.spans.clear();
        self.pending.clear();
    }

    fn is_initialized(&self) -> bool {
        self.site.is_some()
    }

    fn update_site(&mut self, site: LayoutSite) -> bool {
        let Some(old) = self.site.as_mut() else {
            return false;
        };
        let site = LayoutSite {
            groups_enabled: old.groups_enabled,
            ..site
        };
        let differs = old.geometry_differs(&site);
        *old = site;
        self.invalidated |= differs;
        differs
    }

    fn layout(
        &mut self,
        tree: &TreeSnapshot,
        changed: &AffectedRange,
        modified_items: &[ModifiedElement],
        modified_groups: &[ModifiedElement],
    ) -> Result<LayoutOutcome, ViewError> {
        let site = self.site.ok_or(ViewError::LayoutUninitialized)?;

        let mut by_key = KeyIndexMap::default();
        for (i, e) in self.table.entries().iter().enumerate() {
            by_key.insert(e.key, i);
        }
        let mut old_spans: Vec<Option<SpanGroup>> =
            core::mem::take(&mut self.spans).into_iter().map(Some).collect();
        // Incomplete groups are requeued below.
        self.pending.clear();

        self.table.sync(
            tree,
            changed,
            modified_items,
            modified_groups,
            self.invalidated,
        );
        self.invalidated = false;

        let mut spans = Vec::with_capacity(self.table.len());
        for g in 0..self.table.len() {
            let Some(e) = self.table.entry(g) else {
                continue;
            };
            let kept = if e.dirty {
                None
            } else {
                by_key
                    .get(&e.key)
                    .and_then(|&at| old_spans.get_mut(at))
                    .and_then(Option::take)
            };
            let span = match kept {
                Some(span) => span,
                None => {
                    let span = self.new_span(&site, g);
                    if let Some(e) = self.table.entry_mut(g) {
                        Self::prepare_entry(&site, &span, e);
                    }
                    span
                }
            };
            spans.push(span);
        }
        self.spans = spans;
        self.table.refresh_offsets();

        // Place through the end of the realize extent; queue the rest.
        let mut placed_groups = 0usize;
        for g in 0..self.table.len() {
            let incomplete = match (self.spans.get(g), self.table.entry(g)) {
                (Some(span), Some(e)) => span.spanning() && span.placed < e.count,
                _ => false,
            };
            if !incomplete {
                continue;
            }
            if self.table.offset(g) <= site.realize_extent.1 {
                let done = self.place_through(&site, g, site.realize_extent.1);
                self.table.update_extent(g);
                placed_groups += 1;
                if done {
                    continue;
                }
            }
            self.pending.push_back(g);
        }

        vdebug!(
            groups = self.table.len(),
            placed_groups,
            pending = self.pending.len(),
            total = self.table.total(),
            "CellSpanningLayout::layout"
        );
        Ok(LayoutOutcome {
            realized_range_complete: true,
            layout_complete: self.pending.is_empty(),
        })
    }

    fn continue_layout(&mut self, slice: &TimeSlice<'_>) -> bool {
        let Some(site) = self.site else {
            self.pending.clear();
            return true;
        };
        while let Some(&g) = self.pending.front() {
            loop {
                let done = self.place_some(&site, g, PLACE_CHUNK);
                self.table.update_extent(g);
                if done {
                    self.pending.pop_front();
                    break;
                }
                if slice.should_yield() {
                    vtrace!(group = g, "CellSpanningLayout::continue_layout yield");
                    return false;
                }
            }
            if slice.should_yield() {
                return self.pending.is_empty();
            }
        }
        true
    }

    fn has_pending_work(&self) -> bool {
        !self.pending.is_empty()
    }

    fn is_settled(&self, index: usize) -> bool {
        let Some(g) = self.table.group_of_item(index) else {
            return false;
        };
        !self.is_spanning(g) || self.placement(g, index).is_some()
    }

    fn hit_test(&self, point: Point) -> Option<HitTestResult> {
        let site = self.site?;
        let main = site.orientation.point_main(point);
        let cross = site.orientation.point_cross(point);
        let g = self.table.group_at(main)?;
        if let Some(hit) = hit_outside_items(&self.table, g, main) {
            return Some(hit);
        }
        self.hit_items(g, main, cross)
    }

    fn get_adjacent(&self, entity: Entity, key: NavigationKey) -> Adjacent {
        let Some(site) = self.site else {
            return Adjacent::Boundary;
        };
        let table = &self.table;
        table.adjacent(
            entity,
            AxisMove::from_key(key, site.orientation),
            |g, index, mv| self.within_group(g, index, mv),
            |g| self.is_spanning(g),
            |index| {
                table
                    .group_of_item(index)
                    .and_then(|g| self.cell_of(g, index))
                    .map_or(0, |(_, slot, _, _)| slot)
            },
            |h, slot, forward| {
                let Some(e) = table.entry(h) else {
                    return 0;
                };
                let slot = slot.min(e.slots - 1);
                let rel = if forward {
                    slot
                } else {
                    e.tracks.saturating_sub(1) * e.slots + slot
                };
                e.start_index + rel.min(e.count - 1)
            },
        )
    }

    fn items_from_range(&self, first_pixel: u64, last_pixel: u64) -> Option<(usize, usize)> {
        self.table
            .items_from_range(first_pixel, last_pixel, |g, t0, t1| {
                let e = self.table.entry(g)?;
                if !self.is_spanning(g) {
                    let first = t0 * e.slots;
                    let end = ((t1 + 1) * e.slots).min(e.count);
                    return (first < end).then(|| (e.start_index + first, e.start_index + end - 1));
                }
                let span = self.spans.get(g)?;
                let map = span.map.as_ref()?;
                let placed = map
                    .intersecting(t0, t1)
                    .map(|(a, b)| (e.start_index + a, e.start_index + b));
                // Unplaced items are estimated one cell each, starting after the placed tracks.
                let tc = map.track_count();
                let unplaced = e.count - span.placed;
                let estimated = if unplaced == 0 || t1 < tc {
                    None
                } else {
                    let first = t0.saturating_sub(tc) * e.slots;
                    let end = ((t1 - tc + 1) * e.slots).min(unplaced);
                    (first < end).then(|| {
                        let base = e.start_index + span.placed;
                        (base + first, base + end - 1)
                    })
                };
                match (placed, estimated) {
                    (Some((lo, _)), Some((_, hi))) => Some((lo, hi)),
                    (Some(range), None) | (None, Some(range)) => Some(range),
                    (None, None) => None,
                }
            })
    }

    fn item_geometry(&self, index: usize) -> Option<ItemGeometry> {
        let site = self.site?;
        let g = self.table.group_of_item(index)?;
        let e = self.table.entry(g)?;
        let (track, slot, rows, cols) = self.cell_of(g, index)?;
        let main = self.table.items_origin(g) + (track as u64) * e.track_extent as u64;
        let cross = (slot as u64) * e.slot_extent as u64;
        Some(ItemGeometry {
            index,
            group: g,
            track,
            slot,
            bounds: site.orientation.bounds(
                main,
                cross,
                e.track_extent.saturating_mul(rows as u32),
                e.slot_extent.saturating_mul(cols as u32),
            ),
        })
    }

    fn header_bounds(&self, group: usize) -> Option<Bounds> {
        let site = self.site?;
        self.table
            .header_bounds(group, site.orientation, site.viewport_cross())
    }

    fn group_geometry(&self, group: usize) -> Option<GroupGeometry> {
        self.table.geometry(group)
    }

    fn group_of_item(&self, index: usize) -> Option<usize> {
        self.table.group_of_item(index)
    }

    fn group_count(&self) -> usize {
        self.table.len()
    }

    fn total_extent(&self) -> u64 {
        self.table.total()
    }
}
