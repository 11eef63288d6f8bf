//! Pluggable layout strategies.
//!
//! Every strategy computes geometry from a [`TreeSnapshot`] plus the [`AffectedRange`] of the
//! last edits. Geometry outside the affected range is reused verbatim, so calling
//! [`LayoutStrategy::layout`] twice with no intervening change yields identical results.

mod cell_spanning;
mod groups;
mod uniform;

use alloc::boxed::Box;
use alloc::sync::Arc;

use crate::scheduler::TimeSlice;
use crate::tree::TreeSnapshot;
use crate::{
    Adjacent, AffectedRange, Bounds, Entity, GroupGeometry, GroupSpanInfo, HitTestResult,
    ItemGeometry, ModifiedElement, NavigationKey, Orientation, Point, Size, ViewError,
};

pub use cell_spanning::CellSpanningLayout;
pub use uniform::{FlowLayout, UniformLayout};

/// Strategy selector, fixed at construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LayoutKind {
    /// Uniform grid; `max_slots` caps the number of items per track.
    Grid { max_slots: Option<usize> },
    /// One item per track.
    List,
    /// Variable-sized items placed on a per-group occupancy map.
    CellSpanning,
}

impl Default for LayoutKind {
    fn default() -> Self {
        Self::Grid { max_slots: None }
    }
}

/// Host-derived, read-only inputs a strategy lays out against.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LayoutSite {
    pub orientation: Orientation,
    pub viewport: Size,
    /// Outer size of one uniform item (content + margins).
    pub item_size: Size,
    /// Outer size of a group header; ignored when groups are disabled.
    pub header_size: Size,
    pub groups_enabled: bool,
    /// Main-axis pixels the next realize pass covers, inclusive. Geometry up to its end is
    /// always exact after `layout`; anything past it may be finished lazily.
    pub realize_extent: (u64, u64),
}

impl LayoutSite {
    pub fn viewport_cross(&self) -> u32 {
        self.orientation.cross(self.viewport)
    }

    pub fn viewport_main(&self) -> u32 {
        self.orientation.main(self.viewport)
    }

    pub fn unit_main(&self) -> u32 {
        self.orientation.main(self.item_size).max(1)
    }

    pub fn unit_cross(&self) -> u32 {
        self.orientation.cross(self.item_size).max(1)
    }

    pub fn header_extent(&self) -> u32 {
        if self.groups_enabled {
            self.orientation.main(self.header_size)
        } else {
            0
        }
    }

    /// Whether switching from `self` to `next` invalidates cached geometry.
    pub(crate) fn geometry_differs(&self, next: &LayoutSite) -> bool {
        self.orientation != next.orientation
            || self.viewport_cross() != next.viewport_cross()
            || self.item_size != next.item_size
            || self.header_extent() != next.header_extent()
            || self.groups_enabled != next.groups_enabled
    }
}

/// Completion flags of a layout pass.
///
/// `realized_range_complete` is set once geometry inside the realize extent is correct;
/// `layout_complete` once every group, including lazily placed ones, is correct.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LayoutOutcome {
    pub realized_range_complete: bool,
    pub layout_complete: bool,
}

/// Capability interface shared by all layout variants.
pub trait LayoutStrategy {
    fn kind(&self) -> LayoutKind;

    fn initialize(&mut self, site: LayoutSite, groups_enabled: bool);

    fn uninitialize(&mut self);

    fn is_initialized(&self) -> bool;

    /// Feeds fresh host inputs. Returns `true` when cached geometry was invalidated.
    fn update_site(&mut self, site: LayoutSite) -> bool;

    fn layout(
        &mut self,
        tree: &TreeSnapshot,
        changed: &AffectedRange,
        modified_items: &[ModifiedElement],
        modified_groups: &[ModifiedElement],
    ) -> Result<LayoutOutcome, ViewError>;

    /// Continues lazily scheduled work. Returns `true` once the layout is complete.
    fn continue_layout(&mut self, _slice: &TimeSlice<'_>) -> bool {
        true
    }

    fn has_pending_work(&self) -> bool {
        false
    }

    /// Whether the geometry of item `index` is final rather than estimated.
    fn is_settled(&self, _index: usize) -> bool {
        true
    }

    fn hit_test(&self, point: Point) -> Option<HitTestResult>;

    fn get_adjacent(&self, entity: Entity, key: NavigationKey) -> Adjacent;

    /// Inclusive index range of items intersecting main-axis pixels `[first, last]`.
    fn items_from_range(&self, first_pixel: u64, last_pixel: u64) -> Option<(usize, usize)>;

    fn item_geometry(&self, index: usize) -> Option<ItemGeometry>;

    fn header_bounds(&self, group: usize) -> Option<Bounds>;

    fn group_geometry(&self, group: usize) -> Option<GroupGeometry>;

    fn group_of_item(&self, index: usize) -> Option<usize>;

    fn group_count(&self) -> usize;

    fn total_extent(&self) -> u64;
}

/// Item size provider for cell spanning.
pub type ItemInfoCallback = Arc<dyn Fn(usize) -> Size + Send + Sync>;
/// Per-group cell spanning configuration provider.
pub type GroupInfoCallback = Arc<dyn Fn(usize) -> GroupSpanInfo + Send + Sync>;

pub(crate) fn build(
    kind: LayoutKind,
    item_info: Option<ItemInfoCallback>,
    group_info: Option<GroupInfoCallback>,
) -> Box<dyn LayoutStrategy> {
    match kind {
        LayoutKind::Grid { max_slots } => Box::new(UniformLayout::new(max_slots)),
        LayoutKind::List => Box::new(FlowLayout::new()),
        LayoutKind::CellSpanning => Box::new(CellSpanningLayout::new(item_info, group_info)),
    }
}
