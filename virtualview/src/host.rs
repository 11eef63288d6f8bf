//! Collaborator contracts: the data source, the renderer, and the host measurement oracle.
//!
//! The engine holds no UI objects. Visuals and records are opaque ids owned by the host.

use alloc::vec::Vec;

use crate::tree::GroupKey;
use crate::{Bounds, DataError, OrderingMetadata, Size};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VisualId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RecordHandle(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RequestId(pub u64);

/// Result of asking the data source for the record at an index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ItemRequest {
    Ready(RecordHandle),
    /// The record will be delivered later through `Realizer::item_ready`.
    Pending(RequestId),
    Failed(DataError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GroupDescriptor {
    pub key: GroupKey,
    pub start_index: usize,
    pub count: usize,
}

/// Ordered, random-access item retrieval.
pub trait DataSource {
    fn count(&self) -> usize;

    /// Current groups, ordered and contiguous. Only consulted when groups are enabled.
    fn groups(&self) -> Vec<GroupDescriptor> {
        alloc::vec![GroupDescriptor {
            key: 0,
            start_index: 0,
            count: self.count(),
        }]
    }

    fn request_item(&mut self, index: usize) -> ItemRequest;

    /// Abandons a pending request. The data source must not deliver it afterwards.
    fn cancel_request(&mut self, request: RequestId);

    fn release_item(&mut self, record: RecordHandle);
}

/// Turns records into visuals and positions them.
pub trait Renderer {
    fn render_item(&mut self, index: usize, record: RecordHandle) -> VisualId;

    fn render_header(&mut self, group: usize, key: GroupKey) -> VisualId;

    /// Attaches (or moves) a visual at its final content-space bounds.
    fn place(&mut self, visual: VisualId, bounds: Bounds);

    /// Applies a transient transform relative to the placed bounds.
    fn apply_transform(&mut self, visual: VisualId, transform: VisualTransform);

    fn remove(&mut self, visual: VisualId);

    fn set_ordering(&mut self, _visual: VisualId, _ordering: OrderingMetadata) {}
}

/// Content extent plus the outer (margin/border/padding) extent around it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ItemMetrics {
    pub content: Size,
    pub outer: Size,
}

impl ItemMetrics {
    pub fn total(&self) -> Size {
        Size {
            width: self.content.width.saturating_add(self.outer.width),
            height: self.content.height.saturating_add(self.outer.height),
        }
    }
}

/// Host measurement oracle.
pub trait Measurer {
    /// Viewport content size. A zero extent means the host is hidden or detached.
    fn viewport(&self) -> Size;

    fn create_surface(&mut self);

    fn remove_surface(&mut self);

    /// Measures a visual on the hidden surface. `None` means the measurement is not ready yet.
    fn measure(&mut self, visual: VisualId) -> Option<ItemMetrics>;
}

/// Offset and opacity applied on top of a visual's placed bounds.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VisualTransform {
    pub dx: i64,
    pub dy: i64,
    pub opacity: f32,
}

impl VisualTransform {
    pub const IDENTITY: Self = Self {
        dx: 0,
        dy: 0,
        opacity: 1.0,
    };

    pub fn is_identity(&self) -> bool {
        self.dx == 0 && self.dy == 0 && self.opacity >= 1.0
    }
}
