//! Error types for the famcal engine.

use thiserror::Error;

/// Errors that can occur in famcal operations.
///
/// Malformed recurrence rules are deliberately absent: a bad rule degrades
/// to an empty expansion and is never surfaced as an error. Likewise a
/// reconcile that finds no related records is not an error; it degrades to
/// creating the records from scratch.
#[derive(Error, Debug)]
pub enum FamCalError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Notification transport error: {0}")]
    Transport(String),

    #[error("Notification flag store error: {0}")]
    FlagStore(String),

    #[error("Invalid person set: {0}")]
    InvalidPersonSet(String),

    /// An edit was partially applied: some of its storage operations
    /// succeeded before one failed. The caller decides whether to retry
    /// the remainder.
    #[error("Edit partially applied ({completed}/{total} operations): {source}")]
    PartialEdit {
        completed: usize,
        total: usize,
        source: Box<FamCalError>,
    },
}

/// Result type alias for famcal operations.
pub type FamCalResult<T> = Result<T, FamCalError>;
