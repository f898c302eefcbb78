//! Stored schedule records and their recurrence rules.
//!
//! A `ScheduleRecord` is one stored row, always assigned to exactly one
//! [`Person`]. A user-visible event shared by several family members is
//! represented as several records with identical title/start/end (a
//! "logical event"); see the `diff` module for how that set is kept in
//! sync when assignments change.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Who a record is assigned to. Closed set; `All` stands for the whole
/// family and is never combined with individual persons in one logical
/// event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Person {
    All,
    ParentA,
    ParentB,
    ChildA,
    ChildB,
}

impl Person {
    pub fn as_str(&self) -> &'static str {
        match self {
            Person::All => "all",
            Person::ParentA => "parent_a",
            Person::ParentB => "parent_b",
            Person::ChildA => "child_a",
            Person::ChildB => "child_b",
        }
    }
}

impl fmt::Display for Person {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-recipient notification switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhasePrefs {
    pub notify_on_start: bool,
    pub notify_on_end: bool,
}

/// Recipient identity -> notification switches. BTreeMap for deterministic
/// dispatch order.
pub type NotificationPrefs = BTreeMap<String, PhasePrefs>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    None,
    Daily,
    Weekly,
    Monthly,
}

/// How a monthly rule picks its day in each month.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonthlyMode {
    /// Same calendar day, clamped to the last valid day of shorter months.
    #[default]
    DayOfMonth,
    /// Same ordinal weekday, e.g. "2nd Tuesday".
    DayOfWeekOrdinal,
}

/// How a record repeats and which generated dates are suppressed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recurrence {
    pub frequency: Frequency,
    /// Weekly refinement: weekdays to emit on, Sunday = 0 .. Saturday = 6.
    /// Empty means "the start's weekday".
    #[serde(default)]
    pub weekdays: BTreeSet<u8>,
    #[serde(default)]
    pub monthly_mode: MonthlyMode,
    /// Last instant the rule may generate occurrences for. Absent means
    /// the query window bounds the expansion.
    pub end_date: Option<DateTime<Utc>>,
    /// Date-only values suppressed from the expansion ("this instance was
    /// deleted" without touching the base record).
    #[serde(default)]
    pub exclusion_dates: BTreeSet<NaiveDate>,
}

impl Recurrence {
    /// A non-repeating rule.
    pub fn none() -> Self {
        Recurrence {
            frequency: Frequency::None,
            weekdays: BTreeSet::new(),
            monthly_mode: MonthlyMode::DayOfMonth,
            end_date: None,
            exclusion_dates: BTreeSet::new(),
        }
    }

    pub fn is_recurring(&self) -> bool {
        self.frequency != Frequency::None
    }
}

impl Default for Recurrence {
    fn default() -> Self {
        Recurrence::none()
    }
}

/// One stored calendar entry, owned by the storage collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRecord {
    /// Opaque id, assigned by storage at creation, immutable. Empty on a
    /// record that has not been persisted yet.
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    /// Absent for point events. Must be strictly after `start` when present.
    pub end: Option<DateTime<Utc>>,
    pub person: Person,
    #[serde(default)]
    pub recurrence: Recurrence,
    #[serde(default)]
    pub notification_prefs: NotificationPrefs,
    #[serde(default)]
    pub important: bool,
    /// Set by storage on write.
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Identity of a logical event: the (title, start, end) tuple shared by
/// every per-person record that makes it up. Resolution is by exact match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalEventId {
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

impl LogicalEventId {
    pub fn of(record: &ScheduleRecord) -> Self {
        LogicalEventId {
            title: record.title.clone(),
            start: record.start,
            end: record.end,
        }
    }

    pub fn matches(&self, record: &ScheduleRecord) -> bool {
        record.title == self.title && record.start == self.start && record.end == self.end
    }
}
