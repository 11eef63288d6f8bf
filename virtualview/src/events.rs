use crate::realizer::RealizationState;
use crate::window::PassId;
use crate::{Bounds, ViewError};

/// Handle for an asynchronous request. Its result arrives later as a [`ViewEvent`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Ticket(pub u64);

/// How a request settled when it did not fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Settled {
    /// The window the request targeted is fully realized.
    Done,
    /// A newer request took over before this one finished.
    Superseded,
    /// The host is hidden or has no extent; the request replays on the next trigger.
    Deferred,
}

/// Notifications drained by the host after each pump.
#[derive(Clone, Debug, PartialEq)]
pub enum ViewEvent {
    StateChanged {
        from: RealizationState,
        to: RealizationState,
    },
    /// Every displayed index of the pass is attached.
    ViewportRealized { pass: PassId },
    /// The whole window of the pass is attached.
    WindowCompleted { pass: PassId },
    /// Lazily scheduled layout work finished; every offset is exact.
    LayoutComplete,
    /// The engine wants the host to scroll to `offset` to honor an `ensure_visible`.
    ScrollRequested { ticket: Ticket, offset: u64 },
    /// A failed pass moved the scroll offset back to the last realized window.
    ScrollRestored { offset: u64 },
    Outcome {
        ticket: Ticket,
        result: Result<Settled, ViewError>,
    },
    EntityPosition {
        ticket: Ticket,
        result: Result<Bounds, ViewError>,
    },
}

/// Whether [`crate::Realizer::pump`] left work behind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PumpStatus {
    Idle,
    Busy,
}
