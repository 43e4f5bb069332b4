//! Data model entities read and written by the engine

use curfew_api::{NetworkId, UserType};
use curfew_util::{
    AppId, CategoryId, CommitId, DaysOfWeek, MINUTES_PER_DAY, MINUTES_PER_WEEK, RuleId, UserId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

/// Deepest parent chain a category tree may have
pub const MAX_CATEGORY_DEPTH: usize = 32;

const BLOCKED_MINUTES_BYTES: usize = MINUTES_PER_WEEK / 8;

/// Invariant violations detected while constructing model values
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("Blocked minutes mask must be {expected} bytes, got {actual}")]
    BlockedMinutesLength { expected: usize, actual: usize },

    #[error("Extra time must not be negative: {0}")]
    NegativeExtraTime(i64),

    #[error("Minute of day out of range: {0}")]
    MinuteOutOfRange(u16),

    #[error("Rule time window is empty: {start}..={end}")]
    EmptyTimeWindow { start: u16, end: u16 },

    #[error("Battery threshold out of range: {0}")]
    BatteryThresholdOutOfRange(u8),

    #[error("Category {0} cannot be its own ancestor")]
    CategoryCycle(CategoryId),

    #[error("Category tree deeper than {MAX_CATEGORY_DEPTH} levels at {0}")]
    CategoryTooDeep(CategoryId),

    #[error("Parent category {parent} belongs to another user than {category}")]
    ParentOfOtherUser {
        category: CategoryId,
        parent: CategoryId,
    },
}

/// Weekly schedule with one bit per minute; a set bit forbids usage
#[derive(Clone, PartialEq, Eq)]
pub struct BlockedMinutes(Vec<u8>);

impl BlockedMinutes {
    pub fn empty() -> Self {
        Self(vec![0; BLOCKED_MINUTES_BYTES])
    }

    /// Restore a schedule from its stored form. The length is checked, never padded.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ModelError> {
        if bytes.len() != BLOCKED_MINUTES_BYTES {
            return Err(ModelError::BlockedMinutesLength {
                expected: BLOCKED_MINUTES_BYTES,
                actual: bytes.len(),
            });
        }
        Ok(Self(bytes.to_vec()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_blocked(&self, minute_of_week: usize) -> bool {
        let minute = minute_of_week % MINUTES_PER_WEEK;
        self.0[minute / 8] & (1 << (minute % 8)) != 0
    }

    /// Set every minute in `start..=end` (minutes of week) to `blocked`
    pub fn set_range(&mut self, start: usize, end: usize, blocked: bool) {
        for minute in start..=end.min(MINUTES_PER_WEEK - 1) {
            let bit = 1 << (minute % 8);
            if blocked {
                self.0[minute / 8] |= bit;
            } else {
                self.0[minute / 8] &= !bit;
            }
        }
    }

    pub fn with_blocked_range(mut self, start: usize, end: usize) -> Self {
        self.set_range(start, end, true);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Minutes from `minute_of_week` until the blocked state changes,
    /// or `None` if the whole week has the same state
    pub fn minutes_until_change(&self, minute_of_week: usize) -> Option<usize> {
        let current = self.is_blocked(minute_of_week);
        (1..MINUTES_PER_WEEK).find(|offset| self.is_blocked(minute_of_week + offset) != current)
    }
}

impl Default for BlockedMinutes {
    fn default() -> Self {
        Self::empty()
    }
}

impl std::fmt::Debug for BlockedMinutes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let blocked = self.0.iter().map(|b| b.count_ones()).sum::<u32>();
        write!(f, "BlockedMinutes({} of {} blocked)", blocked, MINUTES_PER_WEEK)
    }
}

/// A node in the per-user quota tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub id: CategoryId,
    pub user_id: UserId,
    pub parent_id: Option<CategoryId>,
    pub title: String,
    pub blocked_minutes: BlockedMinutes,
    extra_time_millis: u64,
    pub temporarily_blocked: bool,
    /// Trusted timestamp when the temporary block ends; 0 = indefinite
    pub temporarily_blocked_end_time: i64,
    /// Minimum battery level while charging
    pub min_battery_charging: u8,
    /// Minimum battery level on battery power
    pub min_battery_mobile: u8,
    pub block_all_notifications: bool,
    pub notification_delay_millis: u64,
    /// Remaining-time thresholds (in minutes) that trigger a warning
    pub time_warnings: BTreeSet<u32>,
    /// Empty means every network is allowed
    pub allowed_networks: BTreeSet<NetworkId>,
}

impl Category {
    pub fn new(id: impl Into<CategoryId>, user_id: impl Into<UserId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            parent_id: None,
            title: title.into(),
            blocked_minutes: BlockedMinutes::empty(),
            extra_time_millis: 0,
            temporarily_blocked: false,
            temporarily_blocked_end_time: 0,
            min_battery_charging: 0,
            min_battery_mobile: 0,
            block_all_notifications: false,
            notification_delay_millis: 0,
            time_warnings: BTreeSet::new(),
            allowed_networks: BTreeSet::new(),
        }
    }

    pub fn with_parent(mut self, parent: impl Into<CategoryId>) -> Self {
        self.parent_id = Some(parent.into());
        self
    }

    pub fn with_blocked_minutes(mut self, blocked_minutes: BlockedMinutes) -> Self {
        self.blocked_minutes = blocked_minutes;
        self
    }

    /// Set the granted extra time; negative values are rejected
    pub fn with_extra_time(mut self, millis: i64) -> Result<Self, ModelError> {
        self.set_extra_time(millis)?;
        Ok(self)
    }

    pub fn with_battery_limits(mut self, charging: u8, mobile: u8) -> Result<Self, ModelError> {
        for level in [charging, mobile] {
            if level > 100 {
                return Err(ModelError::BatteryThresholdOutOfRange(level));
            }
        }
        self.min_battery_charging = charging;
        self.min_battery_mobile = mobile;
        Ok(self)
    }

    pub fn with_time_warnings(mut self, minutes: impl IntoIterator<Item = u32>) -> Self {
        self.time_warnings = minutes.into_iter().collect();
        self
    }

    pub fn extra_time_millis(&self) -> u64 {
        self.extra_time_millis
    }

    pub fn set_extra_time(&mut self, millis: i64) -> Result<(), ModelError> {
        self.extra_time_millis =
            u64::try_from(millis).map_err(|_| ModelError::NegativeExtraTime(millis))?;
        Ok(())
    }

    /// Whether the administrator's temporary block is in effect at `timestamp`
    pub fn is_temporarily_blocked(&self, timestamp: i64) -> bool {
        self.temporarily_blocked
            && (self.temporarily_blocked_end_time == 0 || timestamp < self.temporarily_blocked_end_time)
    }

    pub fn min_battery_for(&self, charging: bool) -> u8 {
        if charging {
            self.min_battery_charging
        } else {
            self.min_battery_mobile
        }
    }
}

/// A window of the day in which a rule applies and time is counted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start_minute: u16,
    pub end_minute: u16,
}

impl TimeSlot {
    pub const FULL_DAY: TimeSlot = TimeSlot {
        start_minute: 0,
        end_minute: MINUTES_PER_DAY - 1,
    };

    pub fn new(start_minute: u16, end_minute: u16) -> Result<Self, ModelError> {
        for minute in [start_minute, end_minute] {
            if minute >= MINUTES_PER_DAY {
                return Err(ModelError::MinuteOutOfRange(minute));
            }
        }
        if start_minute > end_minute {
            return Err(ModelError::EmptyTimeWindow {
                start: start_minute,
                end: end_minute,
            });
        }
        Ok(Self {
            start_minute,
            end_minute,
        })
    }

    pub fn contains(&self, minute_of_day: u16) -> bool {
        minute_of_day >= self.start_minute && minute_of_day <= self.end_minute
    }

    pub fn is_full_day(&self) -> bool {
        *self == Self::FULL_DAY
    }
}

/// A daily (or session) limit scoped to a subset of weekdays
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub id: RuleId,
    pub category_id: CategoryId,
    pub days: DaysOfWeek,
    pub max_millis: i64,
    /// Also caps usage paid for with extra time
    pub applies_to_extra_time_usage: bool,
    pub slot: TimeSlot,
    /// Count only today's usage instead of every masked day of the week
    pub per_day: bool,
    /// 0 = no session limit
    pub session_duration_millis: u64,
    pub session_pause_millis: u64,
}

impl Rule {
    pub fn new(
        id: impl Into<RuleId>,
        category_id: impl Into<CategoryId>,
        days: DaysOfWeek,
        max_millis: i64,
    ) -> Self {
        Self {
            id: id.into(),
            category_id: category_id.into(),
            days,
            max_millis,
            applies_to_extra_time_usage: false,
            slot: TimeSlot::FULL_DAY,
            per_day: false,
            session_duration_millis: 0,
            session_pause_millis: 0,
        }
    }

    pub fn limiting_extra_time(mut self) -> Self {
        self.applies_to_extra_time_usage = true;
        self
    }

    pub fn per_day(mut self) -> Self {
        self.per_day = true;
        self
    }

    pub fn in_slot(mut self, slot: TimeSlot) -> Self {
        self.slot = slot;
        self
    }

    pub fn with_session_limit(mut self, duration_millis: u64, pause_millis: u64) -> Self {
        self.session_duration_millis = duration_millis;
        self.session_pause_millis = pause_millis;
        self
    }

    pub fn has_session_limit(&self) -> bool {
        self.session_duration_millis > 0 && self.session_pause_millis > 0
    }

    /// A rule that only limits sessions leaves the daily cap to other rules
    pub fn limits_daily_total(&self) -> bool {
        !(self.has_session_limit() && self.max_millis >= curfew_util::MILLIS_PER_DAY)
    }

    /// Whether this rule constrains the given weekday and minute
    pub fn applies_at(&self, day_of_week: u8, minute_of_day: u16) -> bool {
        self.days.contains_index(day_of_week) && self.slot.contains(minute_of_day)
    }

    pub fn session_slot(&self) -> Option<SessionDurationSlot> {
        self.has_session_limit().then(|| SessionDurationSlot {
            max_session_duration: self.session_duration_millis,
            session_pause_duration: self.session_pause_millis,
            slot: self.slot,
        })
    }
}

/// Accumulated usage of one category on one day within one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsedTimeItem {
    pub day_of_epoch: i64,
    pub slot: TimeSlot,
    pub used_millis: i64,
}

/// Identity of a continuous-session limit within a category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionDurationSlot {
    pub max_session_duration: u64,
    pub session_pause_duration: u64,
    pub slot: TimeSlot,
}

/// Persisted progress of a continuous session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionDurationItem {
    pub key: SessionDurationSlot,
    /// Trusted timestamp of the last counted usage
    pub last_usage: i64,
    pub last_session_duration: u64,
}

/// A device user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub user_type: UserType,
    pub category_for_not_assigned_apps: Option<CategoryId>,
    /// Trusted timestamp until which all limits are lifted; 0 = none
    pub limits_disabled_until: i64,
    /// Allow assigning single activities to categories
    pub activity_level_blocking: bool,
}

impl User {
    pub fn new(id: impl Into<UserId>, name: impl Into<String>, user_type: UserType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            user_type,
            category_for_not_assigned_apps: None,
            limits_disabled_until: 0,
            activity_level_blocking: false,
        }
    }

    pub fn are_limits_disabled(&self, timestamp: i64) -> bool {
        self.limits_disabled_until > timestamp
    }
}

/// Assignment of an application (or one of its activities) to a category
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CategoryApp {
    pub category_id: CategoryId,
    pub app_id: AppId,
    pub activity: Option<String>,
}

/// Device-wide engine state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceState {
    pub enabled: bool,
    pub current_user_id: Option<UserId>,
    pub temporarily_allowed_apps: BTreeSet<AppId>,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            enabled: true,
            current_user_id: None,
            temporarily_allowed_apps: BTreeSet::new(),
        }
    }
}

/// Per-category part of a used-time commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitItem {
    pub category_id: CategoryId,
    /// Subtract the added time from the category's extra time
    pub consume_extra_time: bool,
    /// Partial-day slots counted in addition to the full day
    pub additional_slots: BTreeSet<TimeSlot>,
    pub session_slots: BTreeSet<SessionDurationSlot>,
}

/// One durable used-time write, applied atomically
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsedTimeCommit {
    pub id: CommitId,
    pub day_of_epoch: i64,
    pub time_to_add_millis: u64,
    /// Trusted timestamp to record as last session usage; `None` leaves sessions untouched
    pub trusted_timestamp: Option<i64>,
    pub items: Vec<CommitItem>,
}

/// Result of applying a commit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitOutcome {
    /// Categories that no longer existed; their share was dropped
    pub dropped: Vec<CategoryId>,
}
