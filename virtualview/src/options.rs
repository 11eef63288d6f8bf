use alloc::sync::Arc;

use crate::layout::{GroupInfoCallback, ItemInfoCallback, LayoutKind};
use crate::{AnimationConfig, GroupSpanInfo, Orientation, Size};

/// Host time source in milliseconds, consulted by cooperative loops to decide when to yield.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Configuration for [`crate::Realizer`].
///
/// This type is designed to be cheap to clone: callbacks are stored in `Arc`s so adapters can
/// update a few fields and call `Realizer::set_options` without reallocating closures.
pub struct ViewOptions {
    pub layout: LayoutKind,
    pub orientation: Orientation,
    /// Materialize a header before each group's items.
    pub groups_enabled: bool,

    /// Fixed outer item size. When `None`, the first item is rendered on the measuring surface
    /// and its measured size is used for every item.
    pub item_size: Option<Size>,
    /// Fixed outer header size. When `None` and groups are enabled, the first header is
    /// measured.
    pub header_size: Option<Size>,

    /// Viewport lengths materialized before and after the visible range.
    pub prefetch_pages: u32,
    /// Stale items within this many indices of the window are evicted lazily; farther ones are
    /// evicted at the start of the pass.
    pub eviction_slack: usize,

    /// Slots per block in each group's items container; `None` keeps containers flat.
    pub block_capacity: Option<usize>,
    pub build_chunk_initial: usize,
    pub build_chunk_max: usize,

    /// Frame budget for cooperative work.
    pub time_slice_ms: u64,
    /// Time source checked against the frame budget. Without one, a frame never yields early.
    pub clock: Option<Clock>,

    pub animations_enabled: bool,
    pub animation: AnimationConfig,

    /// Per-group cell spanning configuration (cell-spanning layouts only).
    pub group_info: Option<GroupInfoCallback>,
    /// Per-item outer size (cell-spanning layouts only).
    pub item_info: Option<ItemInfoCallback>,
}

impl Clone for ViewOptions {
    fn clone(&self) -> Self {
        Self {
            layout: self.layout,
            orientation: self.orientation,
            groups_enabled: self.groups_enabled,
            item_size: self.item_size,
            header_size: self.header_size,
            prefetch_pages: self.prefetch_pages,
            eviction_slack: self.eviction_slack,
            block_capacity: self.block_capacity,
            build_chunk_initial: self.build_chunk_initial,
            build_chunk_max: self.build_chunk_max,
            time_slice_ms: self.time_slice_ms,
            clock: self.clock.clone(),
            animations_enabled: self.animations_enabled,
            animation: self.animation,
            group_info: self.group_info.clone(),
            item_info: self.item_info.clone(),
        }
    }
}

impl Default for ViewOptions {
    fn default() -> Self {
        Self::new(LayoutKind::default())
    }
}

impl ViewOptions {
    pub fn new(layout: LayoutKind) -> Self {
        Self {
            layout,
            orientation: Orientation::Vertical,
            groups_enabled: false,
            item_size: None,
            header_size: None,
            prefetch_pages: 1,
            eviction_slack: 32,
            block_capacity: None,
            build_chunk_initial: 32,
            build_chunk_max: 1024,
            time_slice_ms: 8,
            clock: None,
            animations_enabled: true,
            animation: AnimationConfig::default(),
            group_info: None,
            item_info: None,
        }
    }

    pub fn with_orientation(mut self, orientation: Orientation) -> Self {
        self.orientation = orientation;
        self
    }

    pub fn with_groups_enabled(mut self, groups_enabled: bool) -> Self {
        self.groups_enabled = groups_enabled;
        self
    }

    pub fn with_item_size(mut self, item_size: Option<Size>) -> Self {
        self.item_size = item_size;
        self
    }

    pub fn with_header_size(mut self, header_size: Option<Size>) -> Self {
        self.header_size = header_size;
        self
    }

    pub fn with_prefetch_pages(mut self, prefetch_pages: u32) -> Self {
        self.prefetch_pages = prefetch_pages;
        self
    }

    pub fn with_eviction_slack(mut self, eviction_slack: usize) -> Self {
        self.eviction_slack = eviction_slack;
        self
    }

    pub fn with_block_capacity(mut self, block_capacity: Option<usize>) -> Self {
        self.block_capacity = block_capacity;
        self
    }

    pub fn with_build_chunks(mut self, initial: usize, max: usize) -> Self {
        self.build_chunk_initial = initial;
        self.build_chunk_max = max;
        self
    }

    pub fn with_time_slice_ms(mut self, time_slice_ms: u64) -> Self {
        self.time_slice_ms = time_slice_ms;
        self
    }

    pub fn with_clock(mut self, clock: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    pub fn with_animations_enabled(mut self, animations_enabled: bool) -> Self {
        self.animations_enabled = animations_enabled;
        self
    }

    pub fn with_animation(mut self, animation: AnimationConfig) -> Self {
        self.animation = animation;
        self
    }

    pub fn with_group_info(
        mut self,
        group_info: Option<impl Fn(usize) -> GroupSpanInfo + Send + Sync + 'static>,
    ) -> Self {
        self.group_info = group_info.map(|f| Arc::new(f) as _);
        self
    }

    pub fn with_item_info(
        mut self,
        item_info: Option<impl Fn(usize) -> Size + Send + Sync + 'static>,
    ) -> Self {
        self.item_info = item_info.map(|f| Arc::new(f) as _);
        self
    }

    /// Whether switching from `self` to `next` needs a new layout strategy and tree.
    pub(crate) fn needs_rebuild(&self, next: &ViewOptions) -> bool {
        self.layout != next.layout
            || self.groups_enabled != next.groups_enabled
            || self.block_capacity != next.block_capacity
    }

    /// Whether switching from `self` to `next` needs a full relayout.
    pub(crate) fn needs_relayout(&self, next: &ViewOptions) -> bool {
        self.orientation != next.orientation
            || self.item_size != next.item_size
            || self.header_size != next.header_size
            || self.group_info.is_some() != next.group_info.is_some()
            || self.item_info.is_some() != next.item_info.is_some()
    }
}

impl core::fmt::Debug for ViewOptions {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ViewOptions")
            .field("layout", &self.layout)
            .field("orientation", &self.orientation)
            .field("groups_enabled", &self.groups_enabled)
            .field("item_size", &self.item_size)
            .field("header_size", &self.header_size)
            .field("prefetch_pages", &self.prefetch_pages)
            .field("eviction_slack", &self.eviction_slack)
            .field("block_capacity", &self.block_capacity)
            .field("build_chunk_initial", &self.build_chunk_initial)
            .field("build_chunk_max", &self.build_chunk_max)
            .field("time_slice_ms", &self.time_slice_ms)
            .field("animations_enabled", &self.animations_enabled)
            .field("animation", &self.animation)
            .finish_non_exhaustive()
    }
}
