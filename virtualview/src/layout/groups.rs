use alloc::vec::Vec;

use crate::fenwick::Fenwick;
use crate::key::KeyIndexMap;
use crate::tree::{GroupKey, TreeSnapshot};
use crate::{
    Adjacent, AffectedRange, Bounds, Entity, EntityKind, GroupGeometry, ModifiedElement,
    NavigationKey, Orientation,
};

/// Cached main-axis geometry of one group.
#[derive(Clone, Debug)]
pub(crate) struct GroupEntry {
    pub key: GroupKey,
    pub start_index: usize,
    pub count: usize,
    pub tracks: usize,
    pub slots: usize,
    pub track_extent: u32,
    pub slot_extent: u32,
    pub header_extent: u32,
    /// Needs recomputation in the current pass.
    pub dirty: bool,
}

impl GroupEntry {
    pub fn end_index(&self) -> usize {
        self.start_index + self.count
    }

    pub fn extent(&self) -> u64 {
        (self.header_extent as u64)
            .saturating_add((self.tracks as u64).saturating_mul(self.track_extent as u64))
    }

    pub fn last_index(&self) -> Option<usize> {
        self.end_index().checked_sub(1).filter(|_| self.count > 0)
    }
}

/// Axis-relative form of a navigation key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum AxisMove {
    MainPrev,
    MainNext,
    CrossPrev,
    CrossNext,
    First,
    Last,
}

impl AxisMove {
    pub fn from_key(key: NavigationKey, orientation: Orientation) -> Self {
        match (orientation, key) {
            (_, NavigationKey::Home) => Self::First,
            (_, NavigationKey::End) => Self::Last,
            (Orientation::Vertical, NavigationKey::Up)
            | (Orientation::Horizontal, NavigationKey::Left) => Self::MainPrev,
            (Orientation::Vertical, NavigationKey::Down)
            | (Orientation::Horizontal, NavigationKey::Right) => Self::MainNext,
            (Orientation::Vertical, NavigationKey::Left)
            | (Orientation::Horizontal, NavigationKey::Up) => Self::CrossPrev,
            (Orientation::Vertical, NavigationKey::Right)
            | (Orientation::Horizontal, NavigationKey::Down) => Self::CrossNext,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub(crate) struct GroupTable {
    entries: Vec<GroupEntry>,
    offsets: Fenwick,
}

impl GroupTable {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[GroupEntry] {
        &self.entries
    }

    pub fn entry(&self, group: usize) -> Option<&GroupEntry> {
        self.entries.get(group)
    }

    pub fn entry_mut(&mut self, group: usize) -> Option<&mut GroupEntry> {
        self.entries.get_mut(group)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.offsets = Fenwick::default();
    }

    pub fn item_count(&self) -> usize {
        self.entries.last().map_or(0, GroupEntry::end_index)
    }

    /// Rebuilds the entry list from `tree`, keeping entries whose key and count are unchanged
    /// and that no edit touched. Kept entries come back clean; every other entry is dirty.
    pub fn sync(
        &mut self,
        tree: &TreeSnapshot,
        changed: &AffectedRange,
        modified_items: &[ModifiedElement],
        modified_groups: &[ModifiedElement],
        invalidate_all: bool,
    ) {
        let mut by_key = KeyIndexMap::default();
        for (i, e) in self.entries.iter().enumerate() {
            by_key.insert(e.key, i);
        }
        let mut old: Vec<Option<GroupEntry>> =
            core::mem::take(&mut self.entries).into_iter().map(Some).collect();

        for (g, snap) in tree.groups.iter().enumerate() {
            let range = snap.start_index..snap.start_index + snap.count;
            let touched = invalidate_all
                || changed.intersects(range.clone())
                || modified_groups.iter().any(|m| m.new_index == Some(g))
                || modified_items
                    .iter()
                    .filter_map(|m| m.new_index)
                    .any(|i| range.contains(&i));
            let kept = by_key
                .get(&snap.key)
                .and_then(|&at| old.get_mut(at))
                .and_then(Option::take)
                .filter(|e| e.count == snap.count);
            let entry = match kept {
                Some(mut e) => {
                    e.start_index = snap.start_index;
                    e.dirty = touched;
                    e
                }
                None => GroupEntry {
                    key: snap.key,
                    start_index: snap.start_index,
                    count: snap.count,
                    tracks: 0,
                    slots: 1,
                    track_extent: 0,
                    slot_extent: 0,
                    header_extent: 0,
                    dirty: true,
                },
            };
            self.entries.push(entry);
        }
    }

    /// Recomputes offsets after entries changed.
    pub fn refresh_offsets(&mut self) {
        let extents: Vec<u64> = self.entries.iter().map(GroupEntry::extent).collect();
        self.offsets = Fenwick::from_values(&extents);
    }

    /// Updates one group's extent in place and shifts later offsets.
    pub fn update_extent(&mut self, group: usize) {
        if let Some(e) = self.entries.get(group) {
            let extent = e.extent();
            if self.offsets.len() == self.entries.len() {
                self.offsets.set(group, extent);
            } else {
                self.refresh_offsets();
            }
        }
    }

    pub fn offset(&self, group: usize) -> u64 {
        self.offsets.prefix_sum(group)
    }

    pub fn total(&self) -> u64 {
        self.offsets.total()
    }

    pub fn group_at(&self, main: u64) -> Option<usize> {
        self.offsets.index_at(main)
    }

    pub fn group_of_item(&self, index: usize) -> Option<usize> {
        let g = self
            .entries
            .partition_point(|e| e.start_index <= index)
            .checked_sub(1)?;
        (index < self.entries[g].end_index()).then_some(g)
    }

    pub fn geometry(&self, group: usize) -> Option<GroupGeometry> {
        let e = self.entries.get(group)?;
        Some(GroupGeometry {
            offset: self.offset(group),
            extent: e.extent(),
            header_extent: e.header_extent,
            cross_size: (e.slots as u32).saturating_mul(e.slot_extent),
            tracks: e.tracks,
        })
    }

    pub fn header_bounds(
        &self,
        group: usize,
        orientation: Orientation,
        cross: u32,
    ) -> Option<Bounds> {
        let e = self.entries.get(group)?;
        if e.header_extent == 0 {
            return None;
        }
        Some(orientation.bounds(self.offset(group), 0, e.header_extent, cross))
    }

    /// Main-axis position of the first track of `group`.
    pub fn items_origin(&self, group: usize) -> u64 {
        let header = self.entries.get(group).map_or(0, |e| e.header_extent as u64);
        self.offset(group).saturating_add(header)
    }

    /// Track of `group` containing main-axis pixel `main`, clamped to the group's tracks.
    pub fn track_at(&self, group: usize, main: u64) -> usize {
        let Some(e) = self.entries.get(group) else {
            return 0;
        };
        let local = main.saturating_sub(self.items_origin(group));
        let track = local / e.track_extent.max(1) as u64;
        (track as usize).min(e.tracks.saturating_sub(1))
    }

    pub fn next_nonempty(&self, group: usize) -> Option<usize> {
        (group + 1..self.entries.len()).find(|&g| self.entries[g].count > 0)
    }

    pub fn prev_nonempty(&self, group: usize) -> Option<usize> {
        (0..group).rev().find(|&g| self.entries[g].count > 0)
    }

    /// Resolves `[first, last]` main-axis pixels to an inclusive item range. `span` maps a
    /// group and an inclusive track range to the items placed on those tracks.
    pub fn items_from_range(
        &self,
        first: u64,
        last: u64,
        span: impl Fn(usize, usize, usize) -> Option<(usize, usize)>,
    ) -> Option<(usize, usize)> {
        if self.item_count() == 0 || first > last || first >= self.total() {
            return None;
        }
        let g0 = self.group_at(first)?;
        let g1 = self.group_at(last)?;
        let mut lo: Option<usize> = None;
        let mut hi: Option<usize> = None;
        for g in g0..=g1 {
            let e = &self.entries[g];
            if e.count == 0 || e.tracks == 0 {
                continue;
            }
            let t0 = if g == g0 { self.track_at(g, first) } else { 0 };
            let t1 = if g == g1 {
                self.track_at(g, last)
            } else {
                e.tracks - 1
            };
            if let Some((a, b)) = span(g, t0, t1.max(t0)) {
                lo = Some(lo.map_or(a, |x| x.min(a)));
                hi = Some(hi.map_or(b, |x| x.max(b)));
            }
        }
        Some((lo?, hi?))
    }

    /// Arrow-key navigation shared by all strategies.
    ///
    /// `within` moves inside a group along the main axis and returns `None` when the move
    /// leaves the group; `spanning` tells whether a group uses cell spanning; `slot_of` gives
    /// the cross-axis slot of an item and `at_slot` picks the item at a slot of a group's
    /// first or last track.
    pub fn adjacent(
        &self,
        entity: Entity,
        mv: AxisMove,
        within: impl Fn(usize, usize, AxisMove) -> Option<usize>,
        spanning: impl Fn(usize) -> bool,
        slot_of: impl Fn(usize) -> usize,
        at_slot: impl Fn(usize, usize, bool) -> usize,
    ) -> Adjacent {
        let count = self.item_count();
        if entity.kind == EntityKind::GroupHeader {
            let groups = self.entries.len();
            let target = match mv {
                AxisMove::First => (groups > 0).then_some(0),
                AxisMove::Last => groups.checked_sub(1),
                AxisMove::MainPrev | AxisMove::CrossPrev => entity.index.checked_sub(1),
                AxisMove::MainNext | AxisMove::CrossNext => {
                    (entity.index + 1 < groups).then_some(entity.index + 1)
                }
            };
            return match target {
                Some(g) => Adjacent::Entity(Entity::header(g)),
                None => Adjacent::Boundary,
            };
        }

        let index = entity.index;
        if count == 0 || index >= count {
            return Adjacent::Boundary;
        }
        let item = |i: usize| Adjacent::Entity(Entity::item(i));
        match mv {
            AxisMove::First => item(0),
            AxisMove::Last => item(count - 1),
            AxisMove::CrossPrev => index.checked_sub(1).map_or(Adjacent::Boundary, item),
            AxisMove::CrossNext => {
                if index + 1 < count {
                    item(index + 1)
                } else {
                    Adjacent::Boundary
                }
            }
            AxisMove::MainNext | AxisMove::MainPrev => {
                let Some(g) = self.group_of_item(index) else {
                    return Adjacent::Boundary;
                };
                if let Some(i) = within(g, index, mv) {
                    return item(i);
                }
                let forward = mv == AxisMove::MainNext;
                let next = if forward {
                    self.next_nonempty(g)
                } else {
                    self.prev_nonempty(g)
                };
                let Some(h) = next else {
                    return Adjacent::Boundary;
                };
                let e = &self.entries[h];
                if spanning(g) || spanning(h) {
                    let target = if forward {
                        e.start_index
                    } else {
                        e.end_index() - 1
                    };
                    return item(target);
                }
                item(at_slot(h, slot_of(index), forward))
            }
        }
    }
}
