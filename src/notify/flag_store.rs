//! Durable dedup flags for dispatched notifications.
//!
//! Flags live in a small key-value collaborator so that restarting the
//! scheduler never re-fires a reminder that was already sent. Keys are not
//! date-qualified; instead flags are purged once older than the TTL, which
//! day-scopes them (a recurring record fires the same key again on a later
//! day only after the previous day's flag is gone).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use crate::error::{FamCalError, FamCalResult};
use crate::notify::scheduler::Phase;

const FLAG_PREFIX: &str = "notified";

/// The consumed key-value collaborator. Only the flag store talks to it.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> FamCalResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> FamCalResult<()>;
    fn remove(&self, key: &str) -> FamCalResult<()>;
    fn keys(&self) -> FamCalResult<Vec<String>>;
}

/// In-process key-value store. The default backing for tests and for
/// deployments without a durable store.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        MemoryKvStore::default()
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> FamCalResult<Option<String>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> FamCalResult<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> FamCalResult<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    fn keys(&self) -> FamCalResult<Vec<String>> {
        Ok(self.entries.lock().unwrap().keys().cloned().collect())
    }
}

/// Stable dedup key for one dispatched notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationKey {
    pub recipient: String,
    pub record_id: String,
    pub phase: Phase,
    pub lead_minutes: i64,
}

impl fmt::Display for NotificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}__{}__{}__{}__{}m",
            FLAG_PREFIX, self.recipient, self.record_id, self.phase, self.lead_minutes
        )
    }
}

/// Keyed flag store with an explicit TTL/purge contract, independent of
/// the underlying persistence technology.
pub struct NotificationFlagStore {
    store: Box<dyn KvStore>,
    ttl: Duration,
}

impl NotificationFlagStore {
    pub fn new(store: Box<dyn KvStore>, ttl: Duration) -> Self {
        NotificationFlagStore { store, ttl }
    }

    pub fn is_set(&self, key: &NotificationKey) -> FamCalResult<bool> {
        Ok(self.store.get(&key.to_string())?.is_some())
    }

    /// Mark a notification as dispatched at `now`.
    pub fn mark(&self, key: &NotificationKey, now: DateTime<Utc>) -> FamCalResult<()> {
        self.store.set(&key.to_string(), &now.to_rfc3339())
    }

    /// Remove flags older than the TTL. Returns how many were purged.
    ///
    /// A flag whose timestamp does not parse means the store is corrupted;
    /// that is reported rather than repaired, so duplicate-notification
    /// bugs stay visible.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> FamCalResult<usize> {
        let mut purged = 0;
        for key in self.store.keys()? {
            if !key.starts_with(FLAG_PREFIX) {
                continue;
            }
            let Some(value) = self.store.get(&key)? else {
                continue;
            };
            let dispatched_at = DateTime::parse_from_rfc3339(&value).map_err(|e| {
                FamCalError::FlagStore(format!("corrupted flag '{key}': {e}"))
            })?;
            if now - dispatched_at.with_timezone(&Utc) > self.ttl {
                self.store.remove(&key)?;
                purged += 1;
            }
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn key() -> NotificationKey {
        NotificationKey {
            recipient: "mom-phone".into(),
            record_id: "rec1".into(),
            phase: Phase::Start,
            lead_minutes: 10,
        }
    }

    #[test]
    fn key_renders_stable_string() {
        assert_eq!(key().to_string(), "notified__mom-phone__rec1__start__10m");
    }

    #[test]
    fn mark_then_purge_after_ttl() {
        let store = NotificationFlagStore::new(Box::new(MemoryKvStore::new()), Duration::hours(24));
        let t0 = Utc.with_ymd_and_hms(2025, 1, 6, 8, 50, 0).unwrap();

        store.mark(&key(), t0).unwrap();
        assert!(store.is_set(&key()).unwrap());

        // Not yet expired at exactly 24h.
        assert_eq!(store.purge_expired(t0 + Duration::hours(24)).unwrap(), 0);
        assert!(store.is_set(&key()).unwrap());

        assert_eq!(
            store
                .purge_expired(t0 + Duration::hours(24) + Duration::minutes(1))
                .unwrap(),
            1
        );
        assert!(!store.is_set(&key()).unwrap());
    }

    #[test]
    fn corrupted_flag_is_reported_not_repaired() {
        let kv = MemoryKvStore::new();
        kv.set("notified__x__y__start__10m", "not-a-timestamp").unwrap();
        let store = NotificationFlagStore::new(Box::new(kv), Duration::hours(24));

        let err = store.purge_expired(Utc::now()).unwrap_err();
        assert!(matches!(err, FamCalError::FlagStore(_)));
    }
}
