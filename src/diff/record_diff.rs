use std::fmt;

use serde::{Deserialize, Serialize};

use crate::diff::DiffKind;
use crate::record::ScheduleRecord;

/// One storage operation produced by reconciliation.
///
/// `Create` carries only `new` (id unassigned), `Delete` only `old`,
/// `Update` both: the stored record and the full overwrite replacing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordDiff {
    pub kind: DiffKind,
    pub old: Option<ScheduleRecord>,
    pub new: Option<ScheduleRecord>,
}

impl fmt::Display for RecordDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let record = self.record();
        write!(f, "{} {} ({})", self.kind, record.title, record.person)
    }
}

impl RecordDiff {
    pub fn create(new: ScheduleRecord) -> RecordDiff {
        RecordDiff {
            kind: DiffKind::Create,
            old: None,
            new: Some(new),
        }
    }

    pub fn update(old: ScheduleRecord, new: ScheduleRecord) -> RecordDiff {
        RecordDiff {
            kind: DiffKind::Update,
            old: Some(old),
            new: Some(new),
        }
    }

    pub fn delete(old: ScheduleRecord) -> RecordDiff {
        RecordDiff {
            kind: DiffKind::Delete,
            old: Some(old),
            new: None,
        }
    }

    /// Get the record (prefer new, fall back to old).
    pub fn record(&self) -> &ScheduleRecord {
        self.new
            .as_ref()
            .or(self.old.as_ref())
            .expect("RecordDiff must carry at least one record")
    }
}
