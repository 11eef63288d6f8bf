use super::groups::{AxisMove, GroupEntry, GroupTable};
use super::{LayoutKind, LayoutOutcome, LayoutSite, LayoutStrategy};
use crate::tree::TreeSnapshot;
use crate::{
    Adjacent, AffectedRange, Bounds, Entity, GroupGeometry, HitTestResult, ItemGeometry,
    ModifiedElement, NavigationKey, Point, ViewError,
};

/// Every item shares one outer size; positions are pure arithmetic on the index.
#[derive(Clone, Debug)]
pub struct UniformLayout {
    max_slots: Option<usize>,
    /// Stretch single-slot items across the viewport.
    stretch: bool,
    site: Option<LayoutSite>,
    table: GroupTable,
    invalidated: bool,
}

impl UniformLayout {
    pub fn new(max_slots: Option<usize>) -> Self {
        Self {
            max_slots,
            stretch: false,
            site: None,
            table: GroupTable::default(),
            invalidated: true,
        }
    }

    /// Items per track for the current site.
    pub fn items_per_track(&self) -> usize {
        self.site.map_or(1, |site| {
            items_per_track(site.viewport_cross(), site.unit_cross(), self.max_slots)
        })
    }

    fn position(&self, index: usize) -> Option<(usize, &GroupEntry, usize, usize)> {
        let g = self.table.group_of_item(index)?;
        let e = self.table.entry(g)?;
        let rel = index - e.start_index;
        Some((g, e, rel / e.slots, rel % e.slots))
    }

    fn hit_items(&self, g: usize, main: u64, cross: u64) -> Option<HitTestResult> {
        let e = self.table.entry(g)?;
        let track = self.table.track_at(g, main);
        let slot = ((cross / e.slot_extent.max(1) as u64) as usize).min(e.slots - 1);
        let rel = track * e.slots + slot;
        if rel >= e.count {
            let last = e.last_index()?;
            return Some(HitTestResult {
                index: last,
                insert_after_index: Some(last),
            });
        }
        let index = e.start_index + rel;
        let leading = if e.slots == 1 {
            let start = self.table.items_origin(g) + (track as u64) * e.track_extent as u64;
            main.saturating_sub(start) < (e.track_extent / 2) as u64
        } else {
            let start = (slot as u64) * e.slot_extent as u64;
            cross.saturating_sub(start) < (e.slot_extent / 2) as u64
        };
        Some(split_hit(index, leading))
    }
}

fn recompute(site: &LayoutSite, max_slots: Option<usize>, stretch: bool, e: &mut GroupEntry) {
    let slots = items_per_track(site.viewport_cross(), site.unit_cross(), max_slots);
    e.slots = slots;
    e.tracks = e.count.div_ceil(slots);
    e.track_extent = site.unit_main();
    e.slot_extent = if stretch && slots == 1 {
        site.unit_cross().max(site.viewport_cross())
    } else {
        site.unit_cross()
    };
    e.header_extent = site.header_extent();
    e.dirty = false;
}

pub(super) fn items_per_track(cross: u32, unit: u32, max_slots: Option<usize>) -> usize {
    let fit = (cross / unit.max(1)) as usize;
    let capped = match max_slots {
        Some(max) => fit.min(max),
        None => fit,
    };
    capped.max(1)
}

/// Splits a hit on `index` into "insert before" or "insert after".
pub(super) fn split_hit(index: usize, leading: bool) -> HitTestResult {
    HitTestResult {
        index,
        insert_after_index: if leading {
            index.checked_sub(1)
        } else {
            Some(index)
        },
    }
}

/// Resolves a hit that lands on a header band or on an empty group.
pub(super) fn hit_outside_items(table: &GroupTable, g: usize, main: u64) -> Option<HitTestResult> {
    let e = table.entry(g)?;
    if e.count > 0 && main >= table.items_origin(g) {
        return None;
    }
    if e.count > 0 {
        return Some(split_hit(e.start_index, true));
    }
    if let Some(h) = table.next_nonempty(g) {
        let start = table.entry(h)?.start_index;
        return Some(split_hit(start, true));
    }
    let last = table.entry(table.prev_nonempty(g)?)?.last_index()?;
    Some(split_hit(last, false))
}

impl LayoutStrategy for UniformLayout {
    fn kind(&self) -> LayoutKind {
        LayoutKind::Grid {
            max_slots: self.max_slots,
        }
    }

    fn initialize(&mut self, mut site: LayoutSite, groups_enabled: bool) {
        site.groups_enabled = groups_enabled;
        vdebug!(?site, "UniformLayout::initialize");
        self.site = Some(site);
        self.table.clear();
        self.invalidated = true;
    }

    fn uninitialize(&mut self) {
        self.site = None;
        self.table.clear();
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
        self.table.sync(
            tree,
            changed,
            modified_items,
            modified_groups,
            self.invalidated,
        );
        let mut recomputed = 0usize;
        for g in 0..self.table.len() {
            if let Some(e) = self.table.entry_mut(g).filter(|e| e.dirty) {
                recompute(&site, self.max_slots, self.stretch, e);
                recomputed += 1;
            }
        }
        self.table.refresh_offsets();
        self.invalidated = false;
        vdebug!(
            groups = self.table.len(),
            recomputed,
            total = self.table.total(),
            "UniformLayout::layout"
        );
        Ok(LayoutOutcome {
            realized_range_complete: true,
            layout_complete: true,
        })
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
            |g, index, mv| {
                let e = table.entry(g)?;
                let rel = index - e.start_index;
                match mv {
                    AxisMove::MainNext => {
                        if rel + e.slots < e.count {
                            Some(index + e.slots)
                        } else if rel / e.slots + 1 < e.tracks {
                            e.last_index()
                        } else {
                            None
                        }
                    }
                    AxisMove::MainPrev => (rel >= e.slots).then(|| index - e.slots),
                    _ => None,
                }
            },
            |_| false,
            |index| {
                self.position(index)
                    .map_or(0, |(_, _, _, slot)| slot)
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
                let first = t0 * e.slots;
                let end = ((t1 + 1) * e.slots).min(e.count);
                (first < end).then(|| (e.start_index + first, e.start_index + end - 1))
            })
    }

    fn item_geometry(&self, index: usize) -> Option<ItemGeometry> {
        let site = self.site?;
        let (g, e, track, slot) = self.position(index)?;
        let main = self.table.items_origin(g) + (track as u64) * e.track_extent as u64;
        let cross = (slot as u64) * e.slot_extent as u64;
        Some(ItemGeometry {
            index,
            group: g,
            track,
            slot,
            bounds: site
                .orientation
                .bounds(main, cross, e.track_extent, e.slot_extent),
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

/// One item per track, stretched across the viewport.
#[derive(Clone, Debug)]
pub struct FlowLayout {
    inner: UniformLayout,
}

impl FlowLayout {
    pub fn new() -> Self {
        let mut inner = UniformLayout::new(Some(1));
        inner.stretch = true;
        Self { inner }
    }
}

impl Default for FlowLayout {
    fn default() -> Self {
        Self::new()
    }
}

impl LayoutStrategy for FlowLayout {
    fn kind(&self) -> LayoutKind {
        LayoutKind::List
    }

    fn initialize(&mut self, site: LayoutSite, groups_enabled: bool) {
        self.inner.initialize(site, groups_enabled);
    }

    fn uninitialize(&mut self) {
        self.inner.uninitialize();
    }

    fn is_initialized(&self) -> bool {
        self.inner.is_initialized()
    }

    fn update_site(&mut self, site: LayoutSite) -> bool {
        self.inner.update_site(site)
    }

    fn layout(
        &mut self,
        tree: &TreeSnapshot,
        changed: &AffectedRange,
        modified_items: &[ModifiedElement],
        modified_groups: &[ModifiedElement],
    ) -> Result<LayoutOutcome, ViewError> {
        self.inner
            .layout(tree, changed, modified_items, modified_groups)
    }

    fn hit_test(&self, point: Point) -> Option<HitTestResult> {
        self.inner.hit_test(point)
    }

    fn get_adjacent(&self, entity: Entity, key: NavigationKey) -> Adjacent {
        self.inner.get_adjacent(entity, key)
    }

    fn items_from_range(&self, first_pixel: u64, last_pixel: u64) -> Option<(usize, usize)> {
        self.inner.items_from_range(first_pixel, last_pixel)
    }

    fn item_geometry(&self, index: usize) -> Option<ItemGeometry> {
        self.inner.item_geometry(index)
    }

    fn header_bounds(&self, group: usize) -> Option<Bounds> {
        self.inner.header_bounds(group)
    }

    fn group_geometry(&self, group: usize) -> Option<GroupGeometry> {
        self.inner.group_geometry(group)
    }

    fn group_of_item(&self, index: usize) -> Option<usize> {
        self.inner.group_of_item(index)
    }

    fn group_count(&self) -> usize {
        self.inner.group_count()
    }

    fn total_extent(&self) -> u64 {
        self.inner.total_extent()
    }
}
