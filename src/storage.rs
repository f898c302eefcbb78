//! Storage collaborator interface.
//!
//! The engine never persists records itself; it describes operations for
//! the storage collaborator to perform. Storage owns record identity and
//! the `created_at`/`updated_at` timestamps. Failed calls surface as
//! [`FamCalError::Storage`] to the immediate caller; the engine never
//! retries internally.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FamCalError, FamCalResult};
use crate::record::{NotificationPrefs, Person, Recurrence, ScheduleRecord};

/// Filter for [`Storage::list`]. Default lists everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordFilter {
    pub person: Option<Person>,
}

/// Partial field update for [`Storage::update`]. `None` fields are left
/// untouched. `person` is deliberately absent: a record's assignee never
/// changes in place, reassignment goes through reconciliation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<Option<DateTime<Utc>>>,
    pub recurrence: Option<Recurrence>,
    pub notification_prefs: Option<NotificationPrefs>,
    pub important: Option<bool>,
}

impl RecordPatch {
    /// A patch that overwrites every editable field with the given
    /// record's values.
    pub fn overwrite_from(record: &ScheduleRecord) -> Self {
        RecordPatch {
            title: Some(record.title.clone()),
            description: Some(record.description.clone()),
            start: Some(record.start),
            end: Some(record.end),
            recurrence: Some(record.recurrence.clone()),
            notification_prefs: Some(record.notification_prefs.clone()),
            important: Some(record.important),
        }
    }

    /// Apply this patch to an in-memory copy of a record.
    pub fn apply_to(&self, record: &mut ScheduleRecord) {
        if let Some(title) = &self.title {
            record.title = title.clone();
        }
        if let Some(description) = &self.description {
            record.description = description.clone();
        }
        if let Some(start) = self.start {
            record.start = start;
        }
        if let Some(end) = self.end {
            record.end = end;
        }
        if let Some(recurrence) = &self.recurrence {
            record.recurrence = recurrence.clone();
        }
        if let Some(prefs) = &self.notification_prefs {
            record.notification_prefs = prefs.clone();
        }
        if let Some(important) = self.important {
            record.important = important;
        }
    }
}

/// The storage collaborator.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn list(&self, filter: &RecordFilter) -> FamCalResult<Vec<ScheduleRecord>>;

    /// Persist a new record (its `id` is ignored) and return the assigned id.
    async fn create(&self, record: &ScheduleRecord) -> FamCalResult<String>;

    async fn update(&self, id: &str, patch: &RecordPatch) -> FamCalResult<()>;

    async fn delete(&self, id: &str) -> FamCalResult<()>;

    /// Suppress a single generated date of a recurring record.
    async fn add_exclusion_date(&self, id: &str, date: NaiveDate) -> FamCalResult<()>;
}

/// Delete one occurrence of a recurring series without touching the base
/// record. Deleting the whole series is a plain [`Storage::delete`] of the
/// base record. Editing a single occurrence is unsupported.
pub async fn delete_single_occurrence(
    storage: &dyn Storage,
    record: &ScheduleRecord,
    date: NaiveDate,
) -> FamCalResult<()> {
    if !record.recurrence.is_recurring() {
        return Err(FamCalError::Storage(format!(
            "Record '{}' is not recurring; delete the record instead",
            record.id
        )));
    }
    storage.add_exclusion_date(&record.id, date).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Frequency, NotificationPrefs};
    use crate::recurrence::expand_occurrences;
    use async_trait::async_trait;
    use chrono::{NaiveDate, TimeZone};
    use std::sync::Mutex;

    struct MemoryStorage {
        records: Mutex<Vec<ScheduleRecord>>,
    }

    impl MemoryStorage {
        fn new(records: Vec<ScheduleRecord>) -> Self {
            MemoryStorage {
                records: Mutex::new(records),
            }
        }

        fn snapshot(&self) -> Vec<ScheduleRecord> {
            self.records.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Storage for MemoryStorage {
        async fn list(&self, _filter: &RecordFilter) -> FamCalResult<Vec<ScheduleRecord>> {
            Ok(self.snapshot())
        }

        async fn create(&self, _record: &ScheduleRecord) -> FamCalResult<String> {
            unimplemented!("not used by these tests")
        }

        async fn update(&self, _id: &str, _patch: &RecordPatch) -> FamCalResult<()> {
            unimplemented!("not used by these tests")
        }

        async fn delete(&self, _id: &str) -> FamCalResult<()> {
            unimplemented!("not used by these tests")
        }

        async fn add_exclusion_date(&self, id: &str, date: NaiveDate) -> FamCalResult<()> {
            let mut records = self.records.lock().unwrap();
            let record = records
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or_else(|| FamCalError::Storage(format!("no record {id}")))?;
            record.recurrence.exclusion_dates.insert(date);
            Ok(())
        }
    }

    fn record(recurrence: Recurrence) -> ScheduleRecord {
        ScheduleRecord {
            id: "rec1".into(),
            title: "Swimming".into(),
            description: None,
            start: Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap(),
            end: None,
            person: Person::ChildA,
            recurrence,
            notification_prefs: NotificationPrefs::new(),
            important: false,
            created_at: None,
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn deleting_one_occurrence_excludes_only_that_date() {
        let daily = record(Recurrence {
            frequency: Frequency::Daily,
            ..Recurrence::none()
        });
        let storage = MemoryStorage::new(vec![daily.clone()]);
        let skipped = NaiveDate::from_ymd_opt(2025, 1, 8).unwrap();

        delete_single_occurrence(&storage, &daily, skipped)
            .await
            .unwrap();

        let stored = &storage.snapshot()[0];
        assert!(stored.recurrence.exclusion_dates.contains(&skipped));

        let dates: Vec<NaiveDate> = expand_occurrences(
            stored,
            stored.start,
            Utc.with_ymd_and_hms(2025, 1, 10, 23, 59, 59).unwrap(),
        )
        .iter()
        .map(|o| o.id.date)
        .collect();
        assert_eq!(
            dates,
            vec![
                NaiveDate::from_ymd_opt(2025, 1, 6).unwrap(),
                NaiveDate::from_ymd_opt(2025, 1, 7).unwrap(),
                NaiveDate::from_ymd_opt(2025, 1, 9).unwrap(),
                NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
            ]
        );
    }

    #[tokio::test]
    async fn non_recurring_record_is_rejected() {
        let single = record(Recurrence::none());
        let storage = MemoryStorage::new(vec![single.clone()]);

        let err = delete_single_occurrence(
            &storage,
            &single,
            NaiveDate::from_ymd_opt(2025, 1, 6).unwrap(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, FamCalError::Storage(_)));
        assert!(storage.snapshot()[0].recurrence.exclusion_dates.is_empty());
    }
}
