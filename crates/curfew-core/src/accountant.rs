//! Coalescing of counted usage into durable commits

use curfew_store::{
    AuditEvent, AuditEventType, CommitItem, CommitOutcome, SessionDurationSlot, Store,
    StoreResult, TimeSlot, UsedTimeCommit,
};
use curfew_util::{CategoryId, CommitId, LocalTime};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Duration;
use tracing::{debug, warn};

use crate::Handling;

/// Counted time that triggers a commit for a stable category set
pub const DEFAULT_COMMIT_INTERVAL: Duration = Duration::from_millis(30_000);

/// What a commit does for one category, besides adding time to the full day
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountingAttributes {
    pub consume_extra_time: bool,
    pub additional_slots: BTreeSet<TimeSlot>,
    pub session_slots: BTreeSet<SessionDurationSlot>,
    pub time_warnings: BTreeSet<u32>,
}

impl From<&Handling> for CountingAttributes {
    fn from(handling: &Handling) -> Self {
        Self {
            consume_extra_time: handling.should_count_extra_time,
            additional_slots: handling.additional_counting_slots.clone(),
            session_slots: handling.session_duration_slots.clone(),
            time_warnings: handling.time_warnings.clone(),
        }
    }
}

/// Categories counted in one tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CountedUsage {
    pub categories: BTreeMap<CategoryId, CountingAttributes>,
    /// Tightest commit ceiling of the counted categories
    pub max_time_to_add: Option<u64>,
}

impl CountedUsage {
    pub fn add(&mut self, handling: &Handling) {
        self.categories
            .insert(handling.category_id.clone(), CountingAttributes::from(handling));
        if let Some(max) = handling.max_time_to_add {
            self.max_time_to_add = Some(self.max_time_to_add.map_or(max, |m| m.min(max)));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn category_ids(&self) -> BTreeSet<CategoryId> {
        self.categories.keys().cloned().collect()
    }
}

/// A commit that reached the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedCommit {
    pub commit: UsedTimeCommit,
    pub outcome: CommitOutcome,
}

#[derive(Debug)]
struct PendingUsage {
    day_of_epoch: i64,
    categories: BTreeMap<CategoryId, CountingAttributes>,
    counted_millis: u64,
}

/// Accumulates counted time and writes it when the counted set changes,
/// the day changes or enough time has been counted.
#[derive(Debug)]
pub struct UsageAccountant {
    commit_interval: u64,
    pending: Option<PendingUsage>,
    /// Commits not yet written; a failed commit stays at the front
    queued: VecDeque<UsedTimeCommit>,
}

impl UsageAccountant {
    pub fn new(commit_interval: Duration) -> Self {
        Self {
            commit_interval: commit_interval.as_millis() as u64,
            pending: None,
            queued: VecDeque::new(),
        }
    }

    /// Counted time not yet handed to the store
    pub fn pending_millis(&self) -> u64 {
        self.pending.as_ref().map_or(0, |p| p.counted_millis)
    }

    /// Commits waiting for a retry
    pub fn queued_commits(&self) -> usize {
        self.queued.len()
    }

    /// Credit `elapsed` to the categories counted at `time`.
    ///
    /// A change of the counted set or of the day flushes what was counted so
    /// far first; `elapsed` always belongs to the new set.
    pub fn report(
        &mut self,
        store: &dyn Store,
        time: &LocalTime,
        usage: &CountedUsage,
        elapsed: Duration,
        recently_started: &BTreeSet<CategoryId>,
    ) -> StoreResult<Vec<AppliedCommit>> {
        let changed = self.pending.as_ref().is_some_and(|pending| {
            pending.day_of_epoch != time.day_of_epoch || pending.categories != usage.categories
        });
        if changed && let Some(pending) = self.pending.take() {
            debug!(
                counted_millis = pending.counted_millis,
                "Counted categories changed, flushing"
            );
            self.queue(pending, time.timestamp, recently_started);
        }

        if !usage.is_empty() {
            let pending = self.pending.get_or_insert_with(|| PendingUsage {
                day_of_epoch: time.day_of_epoch,
                categories: usage.categories.clone(),
                counted_millis: 0,
            });
            pending.counted_millis += elapsed.as_millis() as u64;

            let ceiling = usage
                .max_time_to_add
                .map_or(self.commit_interval, |max| max.min(self.commit_interval));
            if pending.counted_millis >= ceiling
                && let Some(pending) = self.pending.take()
            {
                self.queue(pending, time.timestamp, recently_started);
            }
        }

        self.write_queued(store)
    }

    /// Write everything counted so far, e.g. before pausing
    pub fn flush(
        &mut self,
        store: &dyn Store,
        time: &LocalTime,
        recently_started: &BTreeSet<CategoryId>,
    ) -> StoreResult<Vec<AppliedCommit>> {
        if let Some(pending) = self.pending.take() {
            self.queue(pending, time.timestamp, recently_started);
        }
        self.write_queued(store)
    }

    /// Split pending usage into a commit that advances sessions and one for
    /// recently started categories that does not
    fn queue(
        &mut self,
        pending: PendingUsage,
        timestamp: i64,
        recently_started: &BTreeSet<CategoryId>,
    ) {
        if pending.counted_millis == 0 {
            return;
        }

        let (without_timestamp, with_timestamp): (Vec<_>, Vec<_>) = pending
            .categories
            .into_iter()
            .map(|(category_id, attributes)| CommitItem {
                category_id,
                consume_extra_time: attributes.consume_extra_time,
                additional_slots: attributes.additional_slots,
                session_slots: attributes.session_slots,
            })
            .partition(|item| recently_started.contains(&item.category_id));

        for (items, trusted_timestamp) in [
            (with_timestamp, Some(timestamp)),
            (without_timestamp, None),
        ] {
            if items.is_empty() {
                continue;
            }
            self.queued.push_back(UsedTimeCommit {
                id: CommitId::new(),
                day_of_epoch: pending.day_of_epoch,
                time_to_add_millis: pending.counted_millis,
                trusted_timestamp,
                items,
            });
        }
    }

    fn write_queued(&mut self, store: &dyn Store) -> StoreResult<Vec<AppliedCommit>> {
        let mut applied = Vec::new();

        while let Some(commit) = self.queued.pop_front() {
            let outcome = match store.commit_used_time(&commit) {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(commit_id = %commit.id, error = %e, "Commit failed, will retry");
                    self.queued.push_front(commit);
                    return Err(e);
                }
            };

            debug!(
                commit_id = %commit.id,
                day = commit.day_of_epoch,
                millis = commit.time_to_add_millis,
                categories = commit.items.len(),
                with_timestamp = commit.trusted_timestamp.is_some(),
                "Committed used time"
            );
            let _ = store.append_audit(AuditEvent::new(AuditEventType::UsedTimeCommitted {
                commit_id: commit.id,
                day_of_epoch: commit.day_of_epoch,
                time_to_add_millis: commit.time_to_add_millis,
                categories: commit.items.iter().map(|i| i.category_id.clone()).collect(),
                with_timestamp: commit.trusted_timestamp.is_some(),
            }));
            for category_id in &outcome.dropped {
                let _ = store.append_audit(AuditEvent::new(
                    AuditEventType::CategoryDroppedFromCommit {
                        commit_id: commit.id,
                        category_id: category_id.clone(),
                        time_to_add_millis: commit.time_to_add_millis,
                    },
                ));
            }

            applied.push(AppliedCommit { commit, outcome });
        }

        Ok(applied)
    }
}

impl Default for UsageAccountant {
    fn default() -> Self {
        Self::new(DEFAULT_COMMIT_INTERVAL)
    }
}
