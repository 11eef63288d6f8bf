//! A headless realization engine for virtualized grid and list views.
//!
//! For host-side utilities (frame driving, scroll tweens, focus anchors), see the
//! `virtualview-adapter` crate.
//!
//! The engine decides which items of a possibly huge collection get a visual, where each one
//! goes, and when to create, reuse and drop them as the user scrolls and the data changes:
//! - a structural tree of groups and slots, built in time-sliced chunks
//! - pluggable layout strategies (uniform grid, list, cell spanning)
//! - a materialization window with prefetch pages and lazy eviction
//! - staged edit animations
//! - a realization state machine driven by a cooperative scheduler
//!
//! It is UI-agnostic. A host provides three collaborators:
//! - a [`DataSource`] that hands out records by index
//! - a [`Renderer`] that turns records into visuals and positions them
//! - a [`Measurer`] for the viewport size and item metrics
//!
//! Work happens in [`Realizer::pump`], called once per frame.
#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]

extern crate alloc;

#[cfg(test)]
extern crate std;

#[macro_use]
mod macros;

mod affected_range;
mod animation;
mod error;
mod events;
mod fenwick;
mod host;
mod key;
pub mod layout;
mod notifications;
mod occupancy;
mod options;
mod realizer;
pub mod scheduler;
mod state;
pub mod tree;
mod tree_builder;
mod types;
pub mod window;

#[cfg(test)]
mod tests;

pub use affected_range::AffectedRange;
pub use animation::{
    AnimationConfig, AnimationPlan, AnimationSequencer, Easing, MoveInput, Phase, PhaseKind,
};
pub use error::{DataError, ViewError};
pub use events::{PumpStatus, Settled, Ticket, ViewEvent};
pub use host::{
    DataSource, GroupDescriptor, ItemMetrics, ItemRequest, Measurer, RecordHandle, Renderer,
    RequestId, VisualId, VisualTransform,
};
pub use layout::{LayoutKind, LayoutStrategy};
pub use notifications::{BatchSummary, Notification, NotificationBatch};
pub use occupancy::{OccupancyMap, Placement};
pub use options::{Clock, ViewOptions};
pub use realizer::{RealizationState, Realizer};
pub use state::{FrameState, WindowState};
pub use tree_builder::{BuildStep, TreeBuilder};
pub use types::{
    Adjacent, Align, Bounds, Entity, EntityKind, GroupGeometry, GroupSpanInfo, HitTestResult,
    ItemGeometry, ModifiedElement, NavigationKey, OrderingMetadata, Orientation, Point,
    ScrollDirection, Size, VirtualRange,
};
