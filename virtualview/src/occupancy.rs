use alloc::vec::Vec;

use crate::{Orientation, Size};

/// One placed item in an [`OccupancyMap`].
///
/// `row_span` counts tracks and `col_span` counts slots, whatever the orientation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Placement {
    pub item_index: usize,
    pub track: usize,
    pub slot: usize,
    pub row_span: usize,
    pub col_span: usize,
    pub content_size: Size,
}

impl Placement {
    pub fn covers(&self, track: usize, slot: usize) -> bool {
        track >= self.track
            && track < self.track + self.row_span
            && slot >= self.slot
            && slot < self.slot + self.col_span
    }

    pub fn overlaps(&self, other: &Placement) -> bool {
        self.track < other.track + other.row_span
            && other.track < self.track + self.row_span
            && self.slot < other.slot + other.col_span
            && other.slot < self.slot + self.col_span
    }
}

/// Per-group placement table for variable-sized items.
///
/// Items are placed greedily, first fit, scanning every slot of a track before moving on to the
/// next track. The scan starts from a cursor that only moves forward: after an item lands at
/// linear cell `p` the cursor becomes `p + row_span`, and cells behind the cursor are never
/// reconsidered even if they are still empty. Placement is therefore amortized `O(n)` and the
/// resulting gaps are part of the observable layout.
#[derive(Clone, Debug)]
pub struct OccupancyMap {
    slots_per_track: usize,
    // Track-major, `track * slots_per_track + slot`, grows as tracks are touched.
    cells: Vec<Option<u32>>,
    placements: Vec<Placement>,
    cursor: usize,
    max_row_span: usize,
}

impl OccupancyMap {
    pub fn new(slots_per_track: usize) -> Self {
        Self {
            slots_per_track: slots_per_track.max(1),
            cells: Vec::new(),
            placements: Vec::new(),
            cursor: 0,
            max_row_span: 1,
        }
    }

    pub fn slots_per_track(&self) -> usize {
        self.slots_per_track
    }

    pub fn len(&self) -> usize {
        self.placements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.placements.is_empty()
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.placements.clear();
        self.cursor = 0;
        self.max_row_span = 1;
    }

    /// Footprint of an item in whole cells as `(row_span, col_span)`, each at least 1.
    pub fn footprint(size: Size, cell: Size, orientation: Orientation) -> (usize, usize) {
        let span = |extent: u32, unit: u32| -> usize {
            if unit == 0 {
                return 1;
            }
            (extent.div_ceil(unit) as usize).max(1)
        };
        let rows = span(orientation.main(size), orientation.main(cell));
        let cols = span(orientation.cross(size), orientation.cross(cell));
        (rows, cols)
    }

    /// Places the next item. Items must be placed in index order.
    pub fn place(
        &mut self,
        item_index: usize,
        row_span: usize,
        col_span: usize,
        content_size: Size,
    ) -> Placement {
        let slots = self.slots_per_track;
        let row_span = row_span.max(1);
        let col_span = col_span.clamp(1, slots);

        let mut pos = self.cursor;
        loop {
            let track = pos / slots;
            let slot = pos % slots;
            if slot + col_span <= slots && self.is_free(track, slot, row_span, col_span) {
                break;
            }
            pos += 1;
        }

        let placement = Placement {
            item_index,
            track: pos / slots,
            slot: pos % slots,
            row_span,
            col_span,
            content_size,
        };
        let id = self.placements.len() as u32;
        self.mark(&placement, id);
        self.placements.push(placement);
        self.cursor = pos + row_span;
        self.max_row_span = self.max_row_span.max(row_span);
        placement
    }

    fn is_free(&self, track: usize, slot: usize, row_span: usize, col_span: usize) -> bool {
        (track..track + row_span).all(|t| {
            (slot..slot + col_span).all(|s| {
                self.cells
                    .get(t * self.slots_per_track + s)
                    .is_none_or(|c| c.is_none())
            })
        })
    }

    fn mark(&mut self, p: &Placement, id: u32) {
        let needed = (p.track + p.row_span) * self.slots_per_track;
        if self.cells.len() < needed {
            self.cells.resize(needed, None);
        }
        for t in p.track..p.track + p.row_span {
            for s in p.slot..p.slot + p.col_span {
                self.cells[t * self.slots_per_track + s] = Some(id);
            }
        }
    }

    pub fn placements(&self) -> &[Placement] {
        &self.placements
    }

    /// Positions `(first, last)` in [`Self::placements`] of the first and last placement that
    /// intersects tracks `t0..=t1`.
    ///
    /// Origins never move backwards in placement order, so only placements starting within
    /// the tallest span before `t0` are scanned.
    pub fn intersecting(&self, t0: usize, t1: usize) -> Option<(usize, usize)> {
        let reach = t0.saturating_sub(self.max_row_span - 1);
        let from = self.placements.partition_point(|p| p.track < reach);
        let to = self.placements.partition_point(|p| p.track <= t1);
        let mut hits = self.placements[from..to.max(from)]
            .iter()
            .enumerate()
            .filter(|(_, p)| p.track + p.row_span > t0)
            .map(|(i, _)| from + i);
        let first = hits.next()?;
        Some((first, hits.last().unwrap_or(first)))
    }

    pub fn placement_of(&self, item_index: usize) -> Option<&Placement> {
        let i = self
            .placements
            .binary_search_by_key(&item_index, |p| p.item_index)
            .ok()?;
        self.placements.get(i)
    }

    pub fn entry_at(&self, track: usize, slot: usize) -> Option<&Placement> {
        if slot >= self.slots_per_track {
            return None;
        }
        let id = (*self.cells.get(track * self.slots_per_track + slot)?)?;
        self.placements.get(id as usize)
    }

    /// Number of tracks touched by any placement.
    pub fn track_count(&self) -> usize {
        self.cells.len() / self.slots_per_track
    }

    /// Last placement whose origin precedes `(track, slot)` in scan order.
    pub fn preceding(&self, track: usize, slot: usize) -> Option<&Placement> {
        let target = track * self.slots_per_track + slot;
        self.placements
            .iter()
            .take_while(|p| p.track * self.slots_per_track + p.slot <= target)
            .last()
    }
}
