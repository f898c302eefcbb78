//! Person-set reconciliation for logical events.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::diff::RecordDiff;
use crate::error::{FamCalError, FamCalResult};
use crate::record::{LogicalEventId, NotificationPrefs, Person, Recurrence, ScheduleRecord};
use crate::storage::{RecordPatch, Storage};

/// An edit to a logical event, as handed over by the UI collaborator.
///
/// `original` is the *pre-edit* identity; related records are resolved
/// against it, never against the post-edit values, so edits that change
/// the title or time still find their siblings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditContext {
    pub original: LogicalEventId,
    pub title: String,
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub persons: BTreeSet<Person>,
    pub recurrence: Recurrence,
    pub notification_prefs: NotificationPrefs,
    pub important: bool,
}

impl EditContext {
    pub fn new_identity(&self) -> LogicalEventId {
        LogicalEventId {
            title: self.title.clone(),
            start: self.start,
            end: self.end,
        }
    }

    /// Validate the person set at the boundary: it must be non-empty, and
    /// `All` is never combined with individual persons.
    fn validate_persons(&self) -> FamCalResult<()> {
        if self.persons.is_empty() {
            return Err(FamCalError::InvalidPersonSet(
                "at least one person must be assigned".into(),
            ));
        }
        if self.persons.contains(&Person::All) && self.persons.len() > 1 {
            return Err(FamCalError::InvalidPersonSet(
                "'all' cannot be combined with individual persons".into(),
            ));
        }
        Ok(())
    }

    /// Materialize the edited values as a record for one person.
    fn record_for(&self, person: Person, id: String) -> ScheduleRecord {
        ScheduleRecord {
            id,
            title: self.title.clone(),
            description: self.description.clone(),
            start: self.start,
            end: self.end,
            person,
            recurrence: self.recurrence.clone(),
            notification_prefs: self.notification_prefs.clone(),
            important: self.important,
            created_at: None,
            updated_at: None,
        }
    }
}

/// The operations storage must perform to bring the stored records in line
/// with an edit. Produced by [`reconcile`], applied by
/// [`ReconcilePlan::apply`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcilePlan {
    pub to_create: Vec<RecordDiff>,
    pub to_update: Vec<RecordDiff>,
    pub to_delete: Vec<RecordDiff>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }

    pub fn len(&self) -> usize {
        self.to_create.len() + self.to_update.len() + self.to_delete.len()
    }

    /// Apply the plan through the storage collaborator, sequentially:
    /// deletes, then updates, then creates. Sequential application keeps
    /// the one-record-per-person invariant observable at every step, but a
    /// crash mid-way leaves the logical event partially synchronized; the
    /// engine does not self-heal that.
    ///
    /// On failure the error carries how many operations completed, so the
    /// caller can surface a best-effort count and decide whether to retry
    /// the remainder.
    pub async fn apply(&self, storage: &dyn Storage) -> FamCalResult<usize> {
        let total = self.len();
        let mut completed = 0usize;

        let wrap = |completed: usize, e: FamCalError| FamCalError::PartialEdit {
            completed,
            total,
            source: Box::new(e),
        };

        for diff in &self.to_delete {
            let old = diff.old.as_ref().expect("Delete must carry old record");
            storage
                .delete(&old.id)
                .await
                .map_err(|e| wrap(completed, e))?;
            debug!(id = %old.id, person = %old.person, "Deleted record");
            completed += 1;
        }

        for diff in &self.to_update {
            let old = diff.old.as_ref().expect("Update must carry old record");
            let new = diff.new.as_ref().expect("Update must carry new record");
            storage
                .update(&old.id, &RecordPatch::overwrite_from(new))
                .await
                .map_err(|e| wrap(completed, e))?;
            debug!(id = %old.id, person = %new.person, "Updated record");
            completed += 1;
        }

        for diff in &self.to_create {
            let new = diff.new.as_ref().expect("Create must carry new record");
            let id = storage.create(new).await.map_err(|e| wrap(completed, e))?;
            debug!(id = %id, person = %new.person, "Created record");
            completed += 1;
        }

        Ok(completed)
    }
}

/// Diff an edited logical event against the currently stored records.
///
/// Pure: `current_records` is the storage snapshot to reconcile against
/// (typically `storage.list(..)`), and the returned plan describes the
/// operations without performing them.
///
/// Finding zero related records is not an error: every new person falls
/// into the create set and the logical event is rebuilt from scratch.
/// Creates are guarded for idempotency: a record already matching the
/// *post-edit* identity and person is updated instead of duplicated, so
/// applying the same edit twice cannot produce two records for one person.
pub fn reconcile(
    ctx: &EditContext,
    current_records: &[ScheduleRecord],
) -> FamCalResult<ReconcilePlan> {
    ctx.validate_persons()?;

    let related: Vec<&ScheduleRecord> = current_records
        .iter()
        .filter(|r| ctx.original.matches(r))
        .collect();
    let related_ids: BTreeSet<&str> = related.iter().map(|r| r.id.as_str()).collect();
    let existing: BTreeMap<Person, &ScheduleRecord> =
        related.iter().map(|r| (r.person, *r)).collect();

    let new_identity = ctx.new_identity();
    let mut plan = ReconcilePlan::default();

    // Persons no longer assigned lose their record.
    for record in &related {
        if !ctx.persons.contains(&record.person) {
            plan.to_delete.push(RecordDiff::delete((*record).clone()));
        }
    }

    for person in &ctx.persons {
        if let Some(old) = existing.get(person) {
            // Kept person: full overwrite with the edited values.
            plan.to_update.push(RecordDiff::update(
                (*old).clone(),
                ctx.record_for(*person, old.id.clone()),
            ));
        } else if let Some(old) = current_records.iter().find(|r| {
            r.person == *person && new_identity.matches(r) && !related_ids.contains(r.id.as_str())
        }) {
            // Idempotency guard: a record with the post-edit identity
            // already exists for this person (e.g. the same plan was
            // applied before). Update it rather than creating a twin.
            plan.to_update.push(RecordDiff::update(
                old.clone(),
                ctx.record_for(*person, old.id.clone()),
            ));
        } else {
            plan.to_create
                .push(RecordDiff::create(ctx.record_for(*person, String::new())));
        }
    }

    debug!(
        creates = plan.to_create.len(),
        updates = plan.to_update.len(),
        deletes = plan.to_delete.len(),
        "Reconciled logical event '{}'",
        ctx.title
    );

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::RecordFilter;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    /// In-memory storage double mirroring the collaborator contract.
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
        async fn list(&self, filter: &RecordFilter) -> FamCalResult<Vec<ScheduleRecord>> {
            let records = self.records.lock().unwrap();
            Ok(records
                .iter()
                .filter(|r| filter.person.map_or(true, |p| r.person == p))
                .cloned()
                .collect())
        }

        async fn create(&self, record: &ScheduleRecord) -> FamCalResult<String> {
            let id = uuid::Uuid::new_v4().to_string();
            let mut stored = record.clone();
            stored.id = id.clone();
            stored.created_at = Some(Utc::now());
            self.records.lock().unwrap().push(stored);
            Ok(id)
        }

        async fn update(&self, id: &str, patch: &RecordPatch) -> FamCalResult<()> {
            let mut records = self.records.lock().unwrap();
            let record = records
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or_else(|| FamCalError::Storage(format!("no record {id}")))?;
            patch.apply_to(record);
            record.updated_at = Some(Utc::now());
            Ok(())
        }

        async fn delete(&self, id: &str) -> FamCalResult<()> {
            let mut records = self.records.lock().unwrap();
            let before = records.len();
            records.retain(|r| r.id != id);
            if records.len() == before {
                return Err(FamCalError::Storage(format!("no record {id}")));
            }
            Ok(())
        }

        async fn add_exclusion_date(
            &self,
            id: &str,
            date: chrono::NaiveDate,
        ) -> FamCalResult<()> {
            let mut records = self.records.lock().unwrap();
            let record = records
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or_else(|| FamCalError::Storage(format!("no record {id}")))?;
            record.recurrence.exclusion_dates.insert(date);
            Ok(())
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 1, 18, 0, 0).unwrap()
    }

    fn end() -> Option<DateTime<Utc>> {
        Some(Utc.with_ymd_and_hms(2025, 2, 1, 19, 0, 0).unwrap())
    }

    fn stored(id: &str, person: Person) -> ScheduleRecord {
        ScheduleRecord {
            id: id.into(),
            title: "Family dinner".into(),
            description: None,
            start: start(),
            end: end(),
            person,
            recurrence: Recurrence::none(),
            notification_prefs: NotificationPrefs::new(),
            important: false,
            created_at: None,
            updated_at: None,
        }
    }

    fn edit(persons: impl IntoIterator<Item = Person>) -> EditContext {
        EditContext {
            original: LogicalEventId {
                title: "Family dinner".into(),
                start: start(),
                end: end(),
            },
            title: "Family dinner".into(),
            description: Some("Bring dessert".into()),
            start: start(),
            end: end(),
            persons: persons.into_iter().collect(),
            recurrence: Recurrence::none(),
            notification_prefs: NotificationPrefs::new(),
            important: false,
        }
    }

    #[test]
    fn person_set_change_diffs_into_three_buckets() {
        let current = vec![stored("mom", Person::ParentB), stored("dad", Person::ParentA)];
        let plan = reconcile(&edit([Person::ParentA, Person::ChildA]), &current).unwrap();

        assert_eq!(plan.to_delete.len(), 1);
        assert_eq!(plan.to_delete[0].old.as_ref().unwrap().person, Person::ParentB);

        assert_eq!(plan.to_create.len(), 1);
        assert_eq!(plan.to_create[0].new.as_ref().unwrap().person, Person::ChildA);

        assert_eq!(plan.to_update.len(), 1);
        let updated = plan.to_update[0].new.as_ref().unwrap();
        assert_eq!(updated.person, Person::ParentA);
        assert_eq!(updated.id, "dad");
        assert_eq!(updated.description.as_deref(), Some("Bring dessert"));
    }

    #[test]
    fn collapsing_to_all_removes_individual_records() {
        let current = vec![stored("mom", Person::ParentB), stored("dad", Person::ParentA)];
        let plan = reconcile(&edit([Person::All]), &current).unwrap();

        let deleted: Vec<Person> = plan
            .to_delete
            .iter()
            .map(|d| d.old.as_ref().unwrap().person)
            .collect();
        assert_eq!(deleted, vec![Person::ParentB, Person::ParentA]);
        assert_eq!(plan.to_update.len(), 0);
        assert_eq!(plan.to_create.len(), 1);
        assert_eq!(plan.to_create[0].new.as_ref().unwrap().person, Person::All);
    }

    #[test]
    fn resolution_uses_pre_edit_identity() {
        let current = vec![stored("dad", Person::ParentA)];
        let mut ctx = edit([Person::ParentA]);
        ctx.title = "Family brunch".into();
        ctx.start = Utc.with_ymd_and_hms(2025, 2, 2, 11, 0, 0).unwrap();
        ctx.end = Some(Utc.with_ymd_and_hms(2025, 2, 2, 12, 0, 0).unwrap());

        let plan = reconcile(&ctx, &current).unwrap();
        assert_eq!(plan.to_create.len(), 0);
        assert_eq!(plan.to_update.len(), 1);
        assert_eq!(plan.to_update[0].new.as_ref().unwrap().title, "Family brunch");
    }

    #[test]
    fn missing_related_records_degrade_to_create_from_scratch() {
        let plan = reconcile(&edit([Person::ParentA, Person::ChildB]), &[]).unwrap();
        assert_eq!(plan.to_delete.len(), 0);
        assert_eq!(plan.to_update.len(), 0);
        assert_eq!(plan.to_create.len(), 2);
    }

    #[test]
    fn all_combined_with_individuals_is_rejected() {
        let err = reconcile(&edit([Person::All, Person::ParentA]), &[]).unwrap_err();
        assert!(matches!(err, FamCalError::InvalidPersonSet(_)));

        let err = reconcile(&edit([]), &[]).unwrap_err();
        assert!(matches!(err, FamCalError::InvalidPersonSet(_)));
    }

    #[tokio::test]
    async fn applying_the_same_edit_twice_does_not_duplicate_records() {
        let storage = MemoryStorage::new(vec![
            stored("mom", Person::ParentB),
            stored("dad", Person::ParentA),
        ]);
        let ctx = edit([Person::ParentA, Person::ChildA]);

        let plan = reconcile(&ctx, &storage.snapshot()).unwrap();
        plan.apply(&storage).await.unwrap();

        // Second application of the same edit: the child_a record now
        // exists under the post-edit identity and must be updated, not
        // created again.
        let plan = reconcile(&ctx, &storage.snapshot()).unwrap();
        assert_eq!(plan.to_create.len(), 0);
        plan.apply(&storage).await.unwrap();

        let records = storage.snapshot();
        let child_records: Vec<_> = records
            .iter()
            .filter(|r| r.person == Person::ChildA)
            .collect();
        assert_eq!(child_records.len(), 1);
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn reconciled_state_has_one_record_per_person() {
        let storage = MemoryStorage::new(vec![
            stored("mom", Person::ParentB),
            stored("dad", Person::ParentA),
        ]);
        let ctx = edit([Person::All]);

        let plan = reconcile(&ctx, &storage.snapshot()).unwrap();
        let completed = plan.apply(&storage).await.unwrap();
        assert_eq!(completed, 3); // two deletes + one create

        let records = storage.snapshot();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].person, Person::All);
        assert!(!records[0].id.is_empty());
    }

    #[tokio::test]
    async fn partial_failure_reports_completed_count() {
        // Storage with only mom's record: deleting dad's will fail after
        // mom's delete succeeded.
        let storage = MemoryStorage::new(vec![stored("mom", Person::ParentB)]);

        let plan = ReconcilePlan {
            to_create: vec![],
            to_update: vec![],
            to_delete: vec![
                RecordDiff::delete(stored("mom", Person::ParentB)),
                RecordDiff::delete(stored("dad", Person::ParentA)),
            ],
        };

        let err = plan.apply(&storage).await.unwrap_err();
        match err {
            FamCalError::PartialEdit {
                completed, total, ..
            } => {
                assert_eq!(completed, 1);
                assert_eq!(total, 2);
            }
            other => panic!("expected PartialEdit, got {other}"),
        }
    }
}
