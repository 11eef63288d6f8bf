#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EntityKind {
    Item,
    GroupHeader,
}

/// A logical reference to an item or a group header, independent of materialization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Entity {
    pub kind: EntityKind,
    pub index: usize,
}

impl Entity {
    pub fn item(index: usize) -> Self {
        Self {
            kind: EntityKind::Item,
            index,
        }
    }

    pub fn header(group: usize) -> Self {
        Self {
            kind: EntityKind::GroupHeader,
            index: group,
        }
    }

    pub fn is_item(&self) -> bool {
        self.kind == EntityKind::Item
    }
}

/// Scroll axis of the view.
///
/// `Vertical` scrolls along y: tracks are rows and slots are columns. `Horizontal` scrolls along
/// x: tracks are columns and slots are rows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Orientation {
    #[default]
    Vertical,
    Horizontal,
}

impl Orientation {
    /// Extent of `size` along the scroll axis.
    pub fn main(self, size: Size) -> u32 {
        match self {
            Self::Vertical => size.height,
            Self::Horizontal => size.width,
        }
    }

    /// Extent of `size` across the scroll axis.
    pub fn cross(self, size: Size) -> u32 {
        match self {
            Self::Vertical => size.width,
            Self::Horizontal => size.height,
        }
    }

    pub fn point_main(self, point: Point) -> u64 {
        match self {
            Self::Vertical => point.y,
            Self::Horizontal => point.x,
        }
    }

    pub fn point_cross(self, point: Point) -> u64 {
        match self {
            Self::Vertical => point.x,
            Self::Horizontal => point.y,
        }
    }

    pub fn size(self, main: u32, cross: u32) -> Size {
        match self {
            Self::Vertical => Size {
                width: cross,
                height: main,
            },
            Self::Horizontal => Size {
                width: main,
                height: cross,
            },
        }
    }

    pub fn bounds(self, main: u64, cross: u64, main_size: u32, cross_size: u32) -> Bounds {
        match self {
            Self::Vertical => Bounds {
                x: cross,
                y: main,
                width: cross_size,
                height: main_size,
            },
            Self::Horizontal => Bounds {
                x: main,
                y: cross,
                width: main_size,
                height: cross_size,
            },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ScrollDirection {
    Forward,
    Backward,
}

impl ScrollDirection {
    pub fn reversed(self) -> Self {
        match self {
            Self::Forward => Self::Backward,
            Self::Backward => Self::Forward,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Align {
    Start,
    Center,
    End,
    Auto,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Point {
    pub x: u64,
    pub y: u64,
}

impl Point {
    pub const fn new(x: u64, y: u64) -> Self {
        Self { x, y }
    }
}

/// Content-space rectangle of a laid out entity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bounds {
    pub x: u64,
    pub y: u64,
    pub width: u32,
    pub height: u32,
}

impl Bounds {
    pub fn main_start(&self, orientation: Orientation) -> u64 {
        match orientation {
            Orientation::Vertical => self.y,
            Orientation::Horizontal => self.x,
        }
    }

    pub fn main_end(&self, orientation: Orientation) -> u64 {
        self.main_start(orientation)
            .saturating_add(orientation.main(self.size()) as u64)
    }

    pub fn cross_start(&self, orientation: Orientation) -> u64 {
        match orientation {
            Orientation::Vertical => self.x,
            Orientation::Horizontal => self.y,
        }
    }

    pub fn size(&self) -> Size {
        Size {
            width: self.width,
            height: self.height,
        }
    }
}

/// Geometry of a single laid out item.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ItemGeometry {
    pub index: usize,
    pub group: usize,
    /// Track inside the owning group.
    pub track: usize,
    pub slot: usize,
    pub bounds: Bounds,
}

/// Geometry of a group: its main-axis offset and extent, including the header band.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GroupGeometry {
    pub offset: u64,
    pub extent: u64,
    pub header_extent: u32,
    pub cross_size: u32,
    pub tracks: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HitTestResult {
    pub index: usize,
    /// Index after which a drop at this point would insert. `None` means "before the first item".
    pub insert_after_index: Option<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NavigationKey {
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Adjacent {
    Entity(Entity),
    Boundary,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VirtualRange {
    pub start_index: usize,
    pub end_index: usize, // exclusive
}

impl VirtualRange {
    pub const EMPTY: Self = Self {
        start_index: 0,
        end_index: 0,
    };

    pub fn is_empty(&self) -> bool {
        self.start_index >= self.end_index
    }

    pub fn len(&self) -> usize {
        self.end_index.saturating_sub(self.start_index)
    }

    pub fn contains(&self, index: usize) -> bool {
        index >= self.start_index && index < self.end_index
    }
}

/// An element touched by an edit: where it was before and where it is now.
///
/// `old_index == None` marks an insertion, `new_index == None` a removal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ModifiedElement {
    pub old_index: Option<usize>,
    pub new_index: Option<usize>,
    /// The record behind the element changed and its visual must be re-rendered.
    pub changed: bool,
}

impl ModifiedElement {
    pub fn inserted(new_index: usize) -> Self {
        Self {
            old_index: None,
            new_index: Some(new_index),
            changed: false,
        }
    }

    pub fn removed(old_index: usize) -> Self {
        Self {
            old_index: Some(old_index),
            new_index: None,
            changed: false,
        }
    }

    pub fn moved(old_index: usize, new_index: usize) -> Self {
        Self {
            old_index: Some(old_index),
            new_index: Some(new_index),
            changed: false,
        }
    }

    pub fn is_insert(&self) -> bool {
        self.old_index.is_none() && self.new_index.is_some()
    }

    pub fn is_remove(&self) -> bool {
        self.old_index.is_some() && self.new_index.is_none()
    }
}

/// Per-group configuration for cell-spanning layouts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GroupSpanInfo {
    pub enable_cell_spanning: bool,
    /// Base cell size; item footprints are rounded up to whole cells.
    pub cell: Size,
}

/// Accessibility flow order for an attached visual.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OrderingMetadata {
    /// 1-based position of the item in the whole collection.
    pub position_in_set: usize,
    pub set_size: usize,
    pub group: Option<usize>,
    pub previous: Option<crate::VisualId>,
    pub next: Option<crate::VisualId>,
}
