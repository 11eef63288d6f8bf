use alloc::string::String;

use crate::Entity;

/// Failures reported by the data source collaborator.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DataError {
    #[error("item is not available")]
    NotAvailable,
    #[error("item is no longer meaningful")]
    NoLongerMeaningful,
    #[error("{0}")]
    Other(String),
}

/// Errors surfaced by the engine.
///
/// Cancellation and a hidden/zero-extent host are not errors: superseded work unwinds silently
/// and an unavailable host only pauses realization.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ViewError {
    #[error("data source failed for index {index}: {source}")]
    Data { index: usize, source: DataError },
    /// The structural tree and the window disagree. This is fatal.
    #[error("no structural node exists for index {index}")]
    MissingNode { index: usize },
    #[error("layout strategy is not initialized")]
    LayoutUninitialized,
    #[error("{0:?} is out of range")]
    OutOfRange(Entity),
}

impl ViewError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::MissingNode { .. })
    }
}
