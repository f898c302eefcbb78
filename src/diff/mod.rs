//! Logical-event reconciliation.
//!
//! One user-visible event assigned to several persons is stored as one
//! record per person. When an edit changes the assigned person set, the
//! reconciler diffs the new set against the currently stored records and
//! emits the create/update/delete operations that keep the
//! one-record-per-person model consistent.

mod diff_kind;
mod record_diff;
mod reconcile;

pub use diff_kind::DiffKind;
pub use record_diff::RecordDiff;
pub use reconcile::{reconcile, EditContext, ReconcilePlan};
