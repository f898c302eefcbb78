//! Lead-time window detection and the periodic notification tick.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::clock::Clock;
use crate::error::FamCalResult;
use crate::notify::flag_store::{NotificationFlagStore, NotificationKey};
use crate::notify::transport::{render_message, NotificationTransport};
use crate::recurrence::{expand_occurrences, Occurrence};
use crate::storage::{RecordFilter, Storage};

/// Which boundary of an occurrence a reminder refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Start,
    End,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Start => "start",
            Phase::End => "end",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Scheduler timing knobs. The wide tolerance compensates for the
/// 60-second tick granularity and clock drift.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub lead_time_minutes: i64,
    pub tolerance_minutes: i64,
    pub tick_interval_secs: u64,
    pub flag_ttl_hours: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            lead_time_minutes: 10,
            tolerance_minutes: 2,
            tick_interval_secs: 60,
            flag_ttl_hours: 24,
        }
    }
}

impl SchedulerConfig {
    pub fn lead_time(&self) -> Duration {
        Duration::minutes(self.lead_time_minutes)
    }

    pub fn tolerance(&self) -> Duration {
        Duration::minutes(self.tolerance_minutes)
    }

    pub fn flag_ttl(&self) -> Duration {
        Duration::hours(self.flag_ttl_hours)
    }
}

/// Outcome of one tick, logged at debug level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub dispatched: usize,
    pub skipped_duplicate: usize,
    pub failed: usize,
    pub purged_flags: usize,
}

/// Detects occurrences whose start or end has entered the lead-time
/// window and dispatches each (record, recipient, phase) at most once.
pub struct NotificationScheduler {
    storage: Arc<dyn Storage>,
    transport: Arc<dyn NotificationTransport>,
    flags: NotificationFlagStore,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
}

impl NotificationScheduler {
    pub fn new(
        storage: Arc<dyn Storage>,
        transport: Arc<dyn NotificationTransport>,
        flags: NotificationFlagStore,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        NotificationScheduler {
            storage,
            transport,
            flags,
            clock,
            config,
        }
    }

    /// One tick: purge stale flags, scan all records, dispatch what is due.
    ///
    /// A failed dispatch is logged and left unflagged so the next tick
    /// retries it while the window is still open.
    pub async fn check_and_send(&self) -> FamCalResult<DispatchSummary> {
        let now = self.clock.now();
        let mut summary = DispatchSummary {
            purged_flags: self.flags.purge_expired(now)?,
            ..DispatchSummary::default()
        };

        let records = self.storage.list(&RecordFilter::default()).await?;

        // One day to either side covers every occurrence whose lead-time
        // window can overlap this tick.
        let window_start = now - Duration::days(1);
        let window_end = now + Duration::days(1);

        for record in &records {
            for occurrence in expand_occurrences(record, window_start, window_end) {
                self.check_occurrence(&occurrence, now, &mut summary).await;
            }
        }

        debug!(
            dispatched = summary.dispatched,
            skipped_duplicate = summary.skipped_duplicate,
            failed = summary.failed,
            purged_flags = summary.purged_flags,
            "Notification tick complete"
        );
        Ok(summary)
    }

    async fn check_occurrence(
        &self,
        occurrence: &Occurrence,
        now: DateTime<Utc>,
        summary: &mut DispatchSummary,
    ) {
        for (recipient, phase_prefs) in &occurrence.notification_prefs {
            if phase_prefs.notify_on_start && self.is_due(occurrence.start, now) {
                self.dispatch_once(occurrence, recipient, Phase::Start, now, summary)
                    .await;
            }
            if phase_prefs.notify_on_end {
                if let Some(end) = occurrence.end {
                    if self.is_due(end, now) {
                        self.dispatch_once(occurrence, recipient, Phase::End, now, summary)
                            .await;
                    }
                }
            }
        }
    }

    /// Due iff `lead - tolerance < target - now <= lead + tolerance`.
    fn is_due(&self, target: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let delta = target - now;
        let lead = self.config.lead_time();
        let tolerance = self.config.tolerance();
        delta > lead - tolerance && delta <= lead + tolerance
    }

    async fn dispatch_once(
        &self,
        occurrence: &Occurrence,
        recipient: &str,
        phase: Phase,
        now: DateTime<Utc>,
        summary: &mut DispatchSummary,
    ) {
        let key = NotificationKey {
            recipient: recipient.to_string(),
            record_id: occurrence.original_id().to_string(),
            phase,
            lead_minutes: self.config.lead_time_minutes,
        };

        match self.flags.is_set(&key) {
            Ok(true) => {
                summary.skipped_duplicate += 1;
                return;
            }
            Ok(false) => {}
            Err(e) => {
                error!(key = %key, "Flag store lookup failed: {e}");
                summary.failed += 1;
                return;
            }
        }

        let message = render_message(occurrence, phase);
        match self.transport.send(recipient, &message).await {
            Ok(()) => {
                // Only a successful dispatch is flagged; a failure retries
                // on the next tick within the same window.
                if let Err(e) = self.flags.mark(&key, now) {
                    error!(key = %key, "Failed to persist dedup flag: {e}");
                }
                summary.dispatched += 1;
                debug!(key = %key, recipient, "Dispatched notification");
            }
            Err(e) => {
                warn!(key = %key, recipient, "Notification dispatch failed: {e}");
                summary.failed += 1;
            }
        }
    }
}

/// Owns the periodic tick task. Stopping never clears dedup flags, so the
/// scheduler can be stopped and restarted (e.g. on credential revocation)
/// without re-notifying.
pub struct SchedulerController {
    scheduler: Arc<NotificationScheduler>,
    handle: Option<JoinHandle<()>>,
    shutdown: Option<watch::Sender<bool>>,
}

impl SchedulerController {
    pub fn new(scheduler: NotificationScheduler) -> Self {
        SchedulerController {
            scheduler: Arc::new(scheduler),
            handle: None,
            shutdown: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Spawn the tick loop. A no-op if already running.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }

        let scheduler = Arc::clone(&self.scheduler);
        let (tx, mut rx) = watch::channel(false);
        let tick = std::time::Duration::from_secs(scheduler.config.tick_interval_secs);

        self.shutdown = Some(tx);
        self.handle = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = scheduler.check_and_send().await {
                            error!("Notification tick failed: {e}");
                        }
                    }
                    _ = rx.changed() => break,
                }
            }
        }));
    }

    /// Signal the tick loop to exit. Already-set flags are untouched.
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(true);
        }
        self.handle = None;
    }
}
