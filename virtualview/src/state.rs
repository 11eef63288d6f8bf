use crate::VirtualRange;

/// A lightweight, serializable snapshot of the materialization window.
///
/// `begin..end` is the realization span. `first_displayed..=last_displayed` is the strictly
/// visible subset; both are `None` while nothing is visible.
///
/// With `feature = "serde"`, this type implements `Serialize`/`Deserialize`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WindowState {
    pub begin: usize,
    pub end: usize,
    pub first_displayed: Option<usize>,
    pub last_displayed: Option<usize>,
}

impl WindowState {
    pub fn range(&self) -> VirtualRange {
        VirtualRange {
            start_index: self.begin,
            end_index: self.end,
        }
    }

    pub fn contains(&self, index: usize) -> bool {
        index >= self.begin && index < self.end
    }

    /// The displayed span as a half-open range, empty when nothing is displayed.
    pub fn displayed(&self) -> VirtualRange {
        match (self.first_displayed, self.last_displayed) {
            (Some(first), Some(last)) if first <= last => VirtualRange {
                start_index: first,
                end_index: last + 1,
            },
            _ => VirtualRange::EMPTY,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.begin >= self.end
    }
}

/// A combined snapshot of scroll position and window, for restoring UI state across frames or
/// sessions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FrameState {
    pub scroll_offset: u64,
    pub is_scrolling: bool,
    pub window: WindowState,
}
