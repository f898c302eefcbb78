//! Core engine for the famcal family calendar.
//!
//! Three pieces with real invariants live here:
//! - `recurrence`: expanding a record's recurrence rule into concrete
//!   occurrences within a query window
//! - `diff`: reconciling a multi-person logical event against its
//!   one-record-per-person storage representation when assignments change
//! - `notify`: the lead-time window scheduler that dispatches each
//!   (record, recipient, phase) reminder at most once
//!
//! Rendering, OAuth, push delivery, and physical persistence are external
//! collaborators behind the traits in `storage` and `notify`.

pub mod clock;
pub mod diff;
pub mod error;
pub mod notify;
pub mod record;
pub mod recurrence;
pub mod storage;

pub use clock::{Clock, SystemClock};
pub use diff::{reconcile, DiffKind, EditContext, ReconcilePlan, RecordDiff};
pub use error::{FamCalError, FamCalResult};
pub use record::{
    Frequency, LogicalEventId, MonthlyMode, NotificationPrefs, Person, PhasePrefs, Recurrence,
    ScheduleRecord,
};
pub use recurrence::{expand_occurrences, Occurrence, OccurrenceId, MAX_OCCURRENCES};
pub use storage::{delete_single_occurrence, RecordFilter, RecordPatch, Storage};
