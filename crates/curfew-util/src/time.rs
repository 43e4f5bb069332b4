//! Time utilities for curfew
//!
//! Provides trusted wall-clock snapshots (for all blocking decisions),
//! monotonic uptime (for session tracking and elapsed-time accounting), and
//! the day/week arithmetic the quota engine works in.
//!
//! # Mock Time for Development
//!
//! In debug builds, the `CURFEW_MOCK_TIME` environment variable can be set
//! to override the system time for all time-sensitive operations. This is useful
//! for testing blocked time areas and weekday-scoped rules.
//!
//! Format: `YYYY-MM-DD HH:MM:SS` (e.g., `2025-12-25 14:30:00`)
//!
//! Example:
//! ```bash
//! CURFEW_MOCK_TIME="2025-12-25 14:30:00" ./run-dev
//! ```

use chrono::{DateTime, Datelike, Local, NaiveDateTime, TimeZone, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;

/// Environment variable name for mock time (debug builds only)
pub const MOCK_TIME_ENV_VAR: &str = "CURFEW_MOCK_TIME";

pub const MINUTES_PER_DAY: u16 = 1440;
pub const MINUTES_PER_WEEK: usize = 7 * MINUTES_PER_DAY as usize;
pub const MILLIS_PER_MINUTE: i64 = 60 * 1000;
pub const MILLIS_PER_DAY: i64 = MINUTES_PER_DAY as i64 * MILLIS_PER_MINUTE;

/// `NaiveDate::from_ymd(1970, 1, 1).num_days_from_ce()`
const UNIX_EPOCH_DAYS_FROM_CE: i64 = 719_163;

/// Cached mock time offset from the real time when the process started.
/// This allows mock time to advance naturally.
static MOCK_TIME_OFFSET: OnceLock<Option<chrono::Duration>> = OnceLock::new();

/// Initialize the mock time offset based on the environment variable.
/// Returns the offset between mock time and real time at process start.
#[allow(clippy::disallowed_methods)] // This is the internal implementation that wraps Local::now()
fn get_mock_time_offset() -> Option<chrono::Duration> {
    *MOCK_TIME_OFFSET.get_or_init(|| {
        #[cfg(debug_assertions)]
        {
            if let Ok(mock_time_str) = std::env::var(MOCK_TIME_ENV_VAR) {
                if let Ok(naive_dt) =
                    NaiveDateTime::parse_from_str(&mock_time_str, "%Y-%m-%d %H:%M:%S")
                {
                    if let Some(mock_dt) = Local.from_local_datetime(&naive_dt).single() {
                        let offset = mock_dt.signed_duration_since(chrono::Local::now());
                        tracing::info!(
                            mock_time = %mock_time_str,
                            offset_secs = offset.num_seconds(),
                            "Mock time enabled"
                        );
                        return Some(offset);
                    }
                    tracing::warn!(
                        mock_time = %mock_time_str,
                        "Failed to convert mock time to local timezone"
                    );
                } else {
                    tracing::warn!(
                        mock_time = %mock_time_str,
                        expected_format = "%Y-%m-%d %H:%M:%S",
                        "Invalid mock time format"
                    );
                }
            }
            None
        }
        #[cfg(not(debug_assertions))]
        {
            None
        }
    })
}

/// Returns whether mock time is currently active.
pub fn is_mock_time_active() -> bool {
    get_mock_time_offset().is_some()
}

/// Get the current local time, respecting mock time settings in debug builds.
#[allow(clippy::disallowed_methods)] // This is the wrapper that provides mock time support
pub fn now() -> DateTime<Local> {
    let real_now = chrono::Local::now();

    match get_mock_time_offset() {
        Some(offset) => real_now + offset,
        None => real_now,
    }
}

/// Monotonic time since boot, immune to wall-clock changes.
///
/// Stored as a duration so collaborators (and tests) can construct it from
/// whatever uptime counter the platform exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Uptime(Duration);

impl Uptime {
    pub const ZERO: Uptime = Uptime(Duration::ZERO);

    pub fn from_millis(millis: u64) -> Self {
        Self(Duration::from_millis(millis))
    }

    pub fn from_duration(d: Duration) -> Self {
        Self(d)
    }

    pub fn as_millis(&self) -> u64 {
        self.0.as_millis() as u64
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }

    /// Duration since `earlier`, or zero if `earlier` is in the future
    pub fn saturating_since(&self, earlier: Uptime) -> Duration {
        self.0.saturating_sub(earlier.0)
    }
}

impl std::ops::Add<Duration> for Uptime {
    type Output = Uptime;

    fn add(self, rhs: Duration) -> Self::Output {
        Uptime(self.0 + rhs)
    }
}

/// Days of the week mask, bit 0 = Monday
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct DaysOfWeek(u8);

impl DaysOfWeek {
    pub const MONDAY: u8 = 1 << 0;
    pub const TUESDAY: u8 = 1 << 1;
    pub const WEDNESDAY: u8 = 1 << 2;
    pub const THURSDAY: u8 = 1 << 3;
    pub const FRIDAY: u8 = 1 << 4;
    pub const SATURDAY: u8 = 1 << 5;
    pub const SUNDAY: u8 = 1 << 6;

    pub const WEEKDAYS: DaysOfWeek = DaysOfWeek(
        Self::MONDAY | Self::TUESDAY | Self::WEDNESDAY | Self::THURSDAY | Self::FRIDAY,
    );
    pub const WEEKENDS: DaysOfWeek = DaysOfWeek(Self::SATURDAY | Self::SUNDAY);
    pub const ALL_DAYS: DaysOfWeek = DaysOfWeek(0x7F);
    pub const NONE: DaysOfWeek = DaysOfWeek(0);

    pub fn new(mask: u8) -> Self {
        Self(mask & 0x7F)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn contains(&self, weekday: Weekday) -> bool {
        self.contains_index(weekday.num_days_from_monday() as u8)
    }

    /// `day` is 0 for Monday through 6 for Sunday
    pub fn contains_index(&self, day: u8) -> bool {
        day < 7 && (self.0 & (1 << day)) != 0
    }

    /// Day indices (0 = Monday) set in this mask
    pub fn indices(&self) -> impl Iterator<Item = u8> + '_ {
        (0u8..7).filter(move |day| self.contains_index(*day))
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for DaysOfWeek {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// A trusted wall-clock instant resolved into the local calendar.
///
/// All blocking decisions of one tick are made against a single value of
/// this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalTime {
    /// Milliseconds since the unix epoch
    pub timestamp: i64,
    /// Days since 1970-01-01 in the local calendar
    pub day_of_epoch: i64,
    /// 0 = Monday .. 6 = Sunday
    pub day_of_week: u8,
    pub minute_of_day: u16,
    pub millis_of_day: i64,
}

impl LocalTime {
    pub fn from_datetime<Tz: TimeZone>(dt: &DateTime<Tz>) -> Self {
        let date = dt.date_naive();
        let time = dt.time();
        let millis_in_second = (time.nanosecond() / 1_000_000).min(999) as i64;
        let millis_of_day = time.num_seconds_from_midnight() as i64 * 1000 + millis_in_second;

        Self {
            timestamp: dt.timestamp_millis(),
            day_of_epoch: date.num_days_from_ce() as i64 - UNIX_EPOCH_DAYS_FROM_CE,
            day_of_week: date.weekday().num_days_from_monday() as u8,
            minute_of_day: (millis_of_day / MILLIS_PER_MINUTE) as u16,
            millis_of_day,
        }
    }

    pub fn weekday(&self) -> Weekday {
        match self.day_of_week {
            0 => Weekday::Mon,
            1 => Weekday::Tue,
            2 => Weekday::Wed,
            3 => Weekday::Thu,
            4 => Weekday::Fri,
            5 => Weekday::Sat,
            _ => Weekday::Sun,
        }
    }

    /// Index into a weekly minute schedule (0 = Monday 00:00)
    pub fn minute_of_week(&self) -> usize {
        self.day_of_week as usize * MINUTES_PER_DAY as usize + self.minute_of_day as usize
    }

    /// Epoch day of the Monday that starts the running week
    pub fn first_day_of_week(&self) -> i64 {
        self.day_of_epoch - self.day_of_week as i64
    }

    pub fn start_of_day_timestamp(&self) -> i64 {
        self.timestamp - self.millis_of_day
    }

    pub fn start_of_next_day_timestamp(&self) -> i64 {
        self.start_of_day_timestamp() + MILLIS_PER_DAY
    }

    /// Timestamp at which the local clock reaches `minute_of_day` today
    pub fn timestamp_at_minute(&self, minute_of_day: u16) -> i64 {
        self.start_of_day_timestamp() + minute_of_day as i64 * MILLIS_PER_MINUTE
    }

    pub fn start_of_next_minute_timestamp(&self) -> i64 {
        self.timestamp_at_minute(self.minute_of_day + 1)
    }
}

/// A trusted time snapshot taken once per reconciliation tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSnapshot {
    pub local: LocalTime,
    pub uptime: Uptime,
}

impl TimeSnapshot {
    pub fn new<Tz: TimeZone>(wall: &DateTime<Tz>, uptime: Uptime) -> Self {
        Self {
            local: LocalTime::from_datetime(wall),
            uptime,
        }
    }
}

/// Helper to format durations in human-readable form
pub fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Format a (possibly negative) millisecond quota for display
pub fn format_millis(millis: i64) -> String {
    if millis <= 0 {
        return "0s".to_string();
    }
    format_duration(Duration::from_millis(millis as u64))
}
