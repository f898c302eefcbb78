//! Reminder notifications.
//!
//! A periodic tick scans stored records, expands them into occurrences,
//! and dispatches a reminder when an occurrence's start or end enters the
//! lead-time window: at most once per (record, recipient, phase), tracked
//! by durable dedup flags with a 24-hour purge.

mod flag_store;
mod scheduler;
mod transport;

pub use flag_store::{KvStore, MemoryKvStore, NotificationFlagStore, NotificationKey};
pub use scheduler::{
    DispatchSummary, NotificationScheduler, Phase, SchedulerConfig, SchedulerController,
};
pub use transport::{render_message, NotificationTransport};
