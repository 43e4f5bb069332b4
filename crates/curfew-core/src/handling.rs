//! Per-tick evaluation of categories

use curfew_api::{BatteryStatus, BlockingReason, NetworkId};
use curfew_host_api::DeviceStatusSource;
use curfew_store::{Category, CategoryStore, SessionDurationSlot, TimeSlot};
use curfew_util::{CategoryId, MILLIS_PER_MINUTE, TimeSnapshot};
use std::collections::{BTreeSet, HashMap};
use tracing::trace;

use crate::{RemainingTime, RuleEvaluator, SessionDurationEvaluator, SessionRemaining};

/// Device state every evaluation in one tick is based on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub time: TimeSnapshot,
    pub battery: BatteryStatus,
}

/// Evaluated state of one category for one tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handling {
    pub category_id: CategoryId,
    pub title: String,
    /// `None` when no rule constrains the category right now
    pub remaining: Option<RemainingTime>,
    pub remaining_session: Option<SessionRemaining>,
    /// Why the category itself blocks; ancestors are not considered
    pub blocking_reason: Option<BlockingReason>,
    pub block_all_notifications: bool,
    pub notification_delay_millis: u64,
    pub should_count_time: bool,
    pub should_count_extra_time: bool,
    /// Counted time after which a commit is needed to keep the result exact
    pub max_time_to_add: Option<u64>,
    /// Trusted timestamp at which this result may change without usage
    pub depends_on_max_time: i64,
    pub depends_on_network: bool,
    /// Blocking applies to the whole system, not only one application
    pub system_level_blocking: bool,
    pub additional_counting_slots: BTreeSet<TimeSlot>,
    pub session_duration_slots: BTreeSet<SessionDurationSlot>,
    pub time_warnings: BTreeSet<u32>,
}

impl Handling {
    pub fn is_blocked(&self) -> bool {
        self.blocking_reason.is_some()
    }

    /// Time left before the category blocks, the tighter of quota and session
    pub fn time_left(&self) -> Option<i64> {
        let quota = self.remaining.map(|r| r.including_extra_time);
        let session = self.remaining_session.map(|s| s.remaining);
        match (quota, session) {
            (Some(q), Some(s)) => Some(q.min(s)),
            (q, s) => q.or(s),
        }
    }
}

/// Memoizes category evaluations for exactly one reconciliation tick.
///
/// The cache borrows the tick's category view, so it cannot outlive the
/// snapshot it was built from. Build a new one every tick.
pub struct CategoryHandlingCache<'a> {
    store: &'a CategoryStore,
    device: &'a dyn DeviceStatusSource,
    status: StatusSnapshot,
    network: Option<Option<NetworkId>>,
    handlings: HashMap<CategoryId, Handling>,
}

impl<'a> CategoryHandlingCache<'a> {
    /// Start a tick with the given status snapshot
    pub fn report_status(
        store: &'a CategoryStore,
        device: &'a dyn DeviceStatusSource,
        status: StatusSnapshot,
    ) -> Self {
        Self {
            store,
            device,
            status,
            network: None,
            handlings: HashMap::new(),
        }
    }

    pub fn status(&self) -> &StatusSnapshot {
        &self.status
    }

    pub fn store(&self) -> &'a CategoryStore {
        self.store
    }

    /// Handling of a category, evaluated on first use in this tick
    pub fn get(&mut self, id: &CategoryId) -> Option<&Handling> {
        if !self.handlings.contains_key(id) {
            let store = self.store;
            let category = store.category(id)?;
            let handling = self.evaluate(category);
            self.handlings.insert(id.clone(), handling);
        }
        self.handlings.get(id)
    }

    /// Network identity, read at most once per tick
    fn network(&mut self) -> Option<&NetworkId> {
        if self.network.is_none() {
            self.network = Some(self.device.network_id());
        }
        self.network.as_ref().and_then(Option::as_ref)
    }

    fn evaluate(&mut self, category: &Category) -> Handling {
        let store = self.store;
        let time = self.status.time.local;
        let now = time.timestamp;
        let user = store.user();
        let rules = store.rules(&category.id);

        let remaining =
            RuleEvaluator::remaining(&time, rules, category.extra_time_millis(), |slot| {
                store.used_time_by_day_of_week(&category.id, slot)
            });
        let remaining_session = SessionDurationEvaluator::remaining(&time, rules, |key| {
            store.session_duration(&category.id, key).copied()
        });

        let limits_disabled = user.are_limits_disabled(now);
        let (blocking_reason, depends_on_network) =
            self.blocking_reason(category, limits_disabled, remaining, remaining_session);

        let should_count_time = !limits_disabled && blocking_reason.is_none();
        let should_count_extra_time =
            should_count_time && remaining.is_some_and(|r| r.uses_extra_time());

        let mut depends_on_max_time = time.start_of_next_day_timestamp();
        let mut later = |at: i64| {
            if at > now {
                depends_on_max_time = depends_on_max_time.min(at);
            }
        };
        if let Some(minutes) = category
            .blocked_minutes
            .minutes_until_change(time.minute_of_week())
        {
            later(time.start_of_next_minute_timestamp() + (minutes as i64 - 1) * MILLIS_PER_MINUTE);
        }
        if category.temporarily_blocked && category.temporarily_blocked_end_time != 0 {
            later(category.temporarily_blocked_end_time);
        }
        later(user.limits_disabled_until);
        if let Some(at) = RuleEvaluator::next_change(&time, rules) {
            later(at);
        }
        if let Some(at) = remaining_session.and_then(|s| s.changes_at) {
            later(at);
        }

        let mut handling = Handling {
            category_id: category.id.clone(),
            title: category.title.clone(),
            remaining,
            remaining_session,
            blocking_reason,
            block_all_notifications: category.block_all_notifications,
            notification_delay_millis: category.notification_delay_millis,
            should_count_time,
            should_count_extra_time,
            max_time_to_add: None,
            depends_on_max_time,
            depends_on_network,
            system_level_blocking: blocking_reason.is_some()
                && user.category_for_not_assigned_apps.as_ref() == Some(&category.id),
            additional_counting_slots: RuleEvaluator::counting_slots(&time, rules),
            session_duration_slots: SessionDurationEvaluator::session_slots(&time, rules),
            time_warnings: category.time_warnings.clone(),
        };
        handling.max_time_to_add = max_time_to_add(&handling, now);

        trace!(
            category_id = %handling.category_id,
            reason = ?handling.blocking_reason,
            remaining = ?handling.remaining,
            "Evaluated category"
        );

        handling
    }

    /// First reason the category itself blocks for, in decision order, and
    /// whether the network identity was consulted
    fn blocking_reason(
        &mut self,
        category: &Category,
        limits_disabled: bool,
        remaining: Option<RemainingTime>,
        remaining_session: Option<SessionRemaining>,
    ) -> (Option<BlockingReason>, bool) {
        let time = self.status.time.local;
        let battery = self.status.battery;

        if battery.level < category.min_battery_for(battery.charging) {
            return (Some(BlockingReason::BatteryLimit), false);
        }
        if category.is_temporarily_blocked(time.timestamp) {
            return (Some(BlockingReason::TemporarilyBlocked), false);
        }
        if limits_disabled {
            return (None, false);
        }
        if category.blocked_minutes.is_blocked(time.minute_of_week()) {
            return (Some(BlockingReason::BlockedAtThisTime), false);
        }

        let depends_on_network = !category.allowed_networks.is_empty();
        if depends_on_network
            && !self
                .network()
                .is_some_and(|network| category.allowed_networks.contains(network))
        {
            return (Some(BlockingReason::RequiredNetworkMissing), true);
        }

        let reason = if remaining.is_some_and(|r| r.is_over()) {
            if category.extra_time_millis() > 0 {
                Some(BlockingReason::TimeOverExtraTimeCanBeUsedLater)
            } else {
                Some(BlockingReason::TimeOver)
            }
        } else if remaining_session.is_some_and(|s| s.remaining <= 0) {
            Some(BlockingReason::SessionDurationLimit)
        } else {
            None
        };

        (reason, depends_on_network)
    }
}

/// Counted time after which a limit, a boundary or a warning threshold is reached
fn max_time_to_add(handling: &Handling, now: i64) -> Option<u64> {
    if !handling.should_count_time {
        return None;
    }

    let mut limits = vec![handling.depends_on_max_time - now];
    if let Some(remaining) = handling.remaining {
        limits.push(if handling.should_count_extra_time {
            remaining.including_extra_time
        } else {
            remaining.default
        });
    }
    if let Some(session) = handling.remaining_session {
        limits.push(session.remaining);
    }
    if let Some(left) = handling.time_left() {
        let next_warning = handling
            .time_warnings
            .iter()
            .map(|minutes| *minutes as i64 * MILLIS_PER_MINUTE)
            .filter(|threshold| *threshold < left)
            .max();
        if let Some(threshold) = next_warning {
            limits.push(left - threshold);
        }
    }

    limits
        .into_iter()
        .filter(|limit| *limit > 0)
        .min()
        .map(|limit| limit as u64)
}
