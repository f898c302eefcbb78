//! Recurrence expansion for schedule records.
//!
//! Expands a record's recurrence rule into concrete occurrences within a
//! query window, respecting exclusion dates. Expansion is pure and
//! recomputed per call; occurrences are never stored.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::record::{Frequency, MonthlyMode, NotificationPrefs, Person, ScheduleRecord};

/// Hard bound on occurrences emitted per expansion, regardless of how wide
/// the window is or how far out `end_date` lies.
pub const MAX_OCCURRENCES: usize = 100;

/// Composite key of one occurrence: the base record plus the concrete date.
/// Serialized to a string only at the UI boundary (via `Display`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OccurrenceId {
    pub base_id: String,
    pub date: NaiveDate,
}

impl fmt::Display for OccurrenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}__{}", self.base_id, self.date.format("%Y-%m-%d"))
    }
}

/// An ephemeral materialization of a record for one concrete date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Occurrence {
    pub id: OccurrenceId,
    pub title: String,
    pub description: Option<String>,
    pub person: Person,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub notification_prefs: NotificationPrefs,
    pub important: bool,
}

impl Occurrence {
    /// Id of the base record this occurrence was expanded from.
    pub fn original_id(&self) -> &str {
        &self.id.base_id
    }

    fn of(record: &ScheduleRecord, start: DateTime<Utc>, duration: Option<Duration>) -> Self {
        Occurrence {
            id: OccurrenceId {
                base_id: record.id.clone(),
                date: start.date_naive(),
            },
            title: record.title.clone(),
            description: record.description.clone(),
            person: record.person,
            start,
            end: duration.map(|d| start + d),
            notification_prefs: record.notification_prefs.clone(),
            important: record.important,
        }
    }
}

/// Expand a record into concrete occurrences within `[window_start, window_end]`.
///
/// A non-recurring record is returned as a single occurrence mirroring the
/// record, without windowing; the caller windows recurring and
/// non-recurring results uniformly. A malformed rule (`end_date` before the
/// record's start) yields an empty result rather than an error.
pub fn expand_occurrences(
    record: &ScheduleRecord,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Vec<Occurrence> {
    let rule = &record.recurrence;
    let duration = record.end.map(|e| e - record.start);

    if rule.frequency == Frequency::None {
        return vec![Occurrence::of(record, record.start, duration)];
    }

    let limit = match rule.end_date {
        Some(end_date) => end_date.min(window_end),
        None => window_end,
    };

    let mut out = Vec::new();
    let emit = |current: DateTime<Utc>, out: &mut Vec<Occurrence>| {
        if current >= window_start && !rule.exclusion_dates.contains(&current.date_naive()) {
            out.push(Occurrence::of(record, current, duration));
        }
    };

    match rule.frequency {
        Frequency::None => unreachable!("handled above"),
        Frequency::Daily => {
            let mut current = record.start;
            while current <= limit && out.len() < MAX_OCCURRENCES {
                emit(current, &mut out);
                current += Duration::days(1);
            }
        }
        Frequency::Weekly => {
            let weekdays = effective_weekdays(&rule.weekdays, record.start);
            // Walk day by day through each 7-day stride, emitting on
            // matching weekdays.
            let mut current = record.start;
            while current <= limit && out.len() < MAX_OCCURRENCES {
                if weekdays.contains(&weekday_index(current.weekday())) {
                    emit(current, &mut out);
                }
                current += Duration::days(1);
            }
        }
        Frequency::Monthly => {
            let mut months = 0u32;
            loop {
                let current = monthly_occurrence(record.start, months, rule.monthly_mode);
                if current > limit || out.len() >= MAX_OCCURRENCES {
                    break;
                }
                emit(current, &mut out);
                months += 1;
            }
        }
    }

    out
}

/// Sunday = 0 .. Saturday = 6, matching the stored weekday sets.
fn weekday_index(weekday: Weekday) -> u8 {
    weekday.num_days_from_sunday() as u8
}

fn effective_weekdays(weekdays: &BTreeSet<u8>, start: DateTime<Utc>) -> BTreeSet<u8> {
    if weekdays.is_empty() {
        BTreeSet::from([weekday_index(start.weekday())])
    } else {
        weekdays.clone()
    }
}

/// The occurrence `months_ahead` months after `start`, preserving the
/// start's time of day.
fn monthly_occurrence(
    start: DateTime<Utc>,
    months_ahead: u32,
    mode: MonthlyMode,
) -> DateTime<Utc> {
    let base = start.date_naive();
    let date = match mode {
        // chrono clamps the day to the target month's length.
        MonthlyMode::DayOfMonth => base + Months::new(months_ahead),
        MonthlyMode::DayOfWeekOrdinal => {
            let ordinal = (base.day() - 1) / 7 + 1;
            let anchor = base.with_day(1).unwrap() + Months::new(months_ahead);
            nth_weekday_of_month(anchor.year(), anchor.month(), start.weekday(), ordinal)
        }
    };
    date.and_time(start.time()).and_utc()
}

/// The `ordinal`-th `weekday` of the given month. A month with no 5th such
/// weekday falls back to the last one.
fn nth_weekday_of_month(year: i32, month: u32, weekday: Weekday, ordinal: u32) -> NaiveDate {
    let first = NaiveDate::from_ymd_opt(year, month, 1).unwrap();
    let offset = (weekday.num_days_from_sunday() + 7 - first.weekday().num_days_from_sunday()) % 7;
    let last_day = (first + Months::new(1) - Duration::days(1)).day();

    let mut day = 1 + offset + 7 * (ordinal - 1);
    while day > last_day {
        day -= 7;
    }
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}
