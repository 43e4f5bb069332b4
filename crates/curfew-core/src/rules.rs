//! Daily quota evaluation

use curfew_store::{Rule, TimeSlot};
use curfew_util::LocalTime;
use std::collections::BTreeSet;

/// Remaining daily quota of one category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemainingTime {
    /// Without extra time; negative once the quota is exceeded
    pub default: i64,
    pub including_extra_time: i64,
}

impl RemainingTime {
    /// Default quota is used up and extra time is being spent
    pub fn uses_extra_time(&self) -> bool {
        self.default <= 0 && self.including_extra_time > 0
    }

    pub fn is_over(&self) -> bool {
        self.including_extra_time <= 0
    }
}

/// Computes remaining daily quota from rules, used time and extra time
pub struct RuleEvaluator;

impl RuleEvaluator {
    /// Remaining quota at `time`, or `None` when no rule constrains the
    /// current weekday and minute.
    ///
    /// `used_time` returns the used milliseconds in a slot per weekday of
    /// the running week (index 0 = first day of the week).
    pub fn remaining(
        time: &LocalTime,
        rules: &[Rule],
        extra_time_millis: u64,
        used_time: impl Fn(TimeSlot) -> [i64; 7],
    ) -> Option<RemainingTime> {
        let today = time.day_of_week;
        let mut default: Option<i64> = None;
        let mut extra_time_cap: Option<i64> = None;

        for rule in rules.iter().filter(|rule| is_daily_cap_at(rule, time)) {
            let table = used_time(rule.slot);
            let used: i64 = if rule.per_day {
                table[today as usize]
            } else {
                rule.days
                    .indices()
                    .filter(|day| *day <= today)
                    .map(|day| table[day as usize])
                    .sum()
            };

            let remaining = rule.max_millis - used;
            default = Some(default.map_or(remaining, |d| d.min(remaining)));
            if rule.applies_to_extra_time_usage {
                extra_time_cap = Some(extra_time_cap.map_or(remaining, |c| c.min(remaining)));
            }
        }

        let default = default?;
        let extra = i64::try_from(extra_time_millis).unwrap_or(i64::MAX);
        let mut including_extra_time = default.max(0).saturating_add(extra);
        if let Some(cap) = extra_time_cap {
            including_extra_time = including_extra_time.min(cap);
        }

        Some(RemainingTime {
            default,
            including_extra_time,
        })
    }

    /// Partial-day slots that usage at `time` is counted in, besides the full day
    pub fn counting_slots(time: &LocalTime, rules: &[Rule]) -> BTreeSet<TimeSlot> {
        rules
            .iter()
            .filter(|rule| rule.applies_at(time.day_of_week, time.minute_of_day))
            .map(|rule| rule.slot)
            .filter(|slot| !slot.is_full_day())
            .collect()
    }

    /// Next timestamp today at which a rule window opens or closes
    pub fn next_change(time: &LocalTime, rules: &[Rule]) -> Option<i64> {
        let minute = time.minute_of_day;

        rules
            .iter()
            .filter(|rule| rule.days.contains_index(time.day_of_week))
            .filter_map(|rule| {
                if rule.slot.contains(minute) {
                    Some(time.timestamp_at_minute(rule.slot.end_minute + 1))
                } else if rule.slot.start_minute > minute {
                    Some(time.timestamp_at_minute(rule.slot.start_minute))
                } else {
                    None
                }
            })
            .min()
    }
}

fn is_daily_cap_at(rule: &Rule, time: &LocalTime) -> bool {
    rule.applies_at(time.day_of_week, time.minute_of_day) && rule.limits_daily_total()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::monday_noon;
    use curfew_util::{DaysOfWeek, MILLIS_PER_DAY, MILLIS_PER_MINUTE};

    const HOUR: i64 = 60 * MILLIS_PER_MINUTE;

    fn no_usage(_: TimeSlot) -> [i64; 7] {
        [0; 7]
    }

    #[test]
    fn unconstrained_without_matching_rule() {
        let time = monday_noon().local;
        let weekend = Rule::new("r", "games", DaysOfWeek::WEEKENDS, HOUR);

        assert_eq!(RuleEvaluator::remaining(&time, &[], 0, no_usage), None);
        assert_eq!(RuleEvaluator::remaining(&time, &[weekend], 5_000, no_usage), None);
    }

    #[test]
    fn single_rule_subtracts_used_time() {
        let time = monday_noon().local;
        let rule = Rule::new("r", "games", DaysOfWeek::ALL_DAYS, 3_600_000);

        let fresh = RuleEvaluator::remaining(&time, &[rule.clone()], 0, no_usage).unwrap();
        assert_eq!(fresh.default, 3_600_000);

        let used = |_| [1_800_000, 0, 0, 0, 0, 0, 0];
        let remaining = RuleEvaluator::remaining(&time, &[rule], 0, used).unwrap();
        assert_eq!(remaining.default, 1_800_000);
        assert_eq!(remaining.including_extra_time, 1_800_000);
    }

    #[test]
    fn weekly_rule_sums_masked_days_up_to_today() {
        // Thursday of the week
        let mut time = monday_noon().local;
        time.day_of_week = 3;

        let weekdays = Rule::new("r", "games", DaysOfWeek::WEEKDAYS, 5 * HOUR);
        // Sunday usage (index 6) belongs to the future and must be ignored
        let used = |_| [HOUR, HOUR, 0, HOUR / 2, 0, 0, HOUR];

        let remaining = RuleEvaluator::remaining(&time, &[weekdays], 0, used).unwrap();
        assert_eq!(remaining.default, 5 * HOUR - (2 * HOUR + HOUR / 2));
    }

    #[test]
    fn per_day_rule_counts_today_only() {
        let mut time = monday_noon().local;
        time.day_of_week = 2;

        let daily = Rule::new("r", "games", DaysOfWeek::ALL_DAYS, HOUR).per_day();
        let used = |_| [HOUR, HOUR, HOUR / 4, 0, 0, 0, 0];

        let remaining = RuleEvaluator::remaining(&time, &[daily], 0, used).unwrap();
        assert_eq!(remaining.default, 3 * HOUR / 4);
    }

    #[test]
    fn minimum_over_matching_rules() {
        let time = monday_noon().local;
        let rules = [
            Rule::new("week", "games", DaysOfWeek::ALL_DAYS, 10 * HOUR),
            Rule::new("day", "games", DaysOfWeek::ALL_DAYS, 2 * HOUR).per_day(),
        ];
        let used = |_| [HOUR, 0, 0, 0, 0, 0, 0];

        let remaining = RuleEvaluator::remaining(&time, &rules, 0, used).unwrap();
        assert_eq!(remaining.default, HOUR);
    }

    #[test]
    fn slot_rule_uses_slot_usage_and_window() {
        let time = monday_noon().local;
        let evening = TimeSlot::new(18 * 60, 23 * 60 + 59).unwrap();
        let midday = TimeSlot::new(11 * 60, 13 * 60 + 59).unwrap();

        let outside = Rule::new("eve", "games", DaysOfWeek::ALL_DAYS, HOUR).in_slot(evening);
        assert_eq!(RuleEvaluator::remaining(&time, &[outside], 0, no_usage), None);

        let inside = Rule::new("noon", "games", DaysOfWeek::ALL_DAYS, HOUR).in_slot(midday);
        let used = |slot: TimeSlot| {
            if slot == midday {
                [HOUR / 2, 0, 0, 0, 0, 0, 0]
            } else {
                [5 * HOUR, 0, 0, 0, 0, 0, 0]
            }
        };
        let remaining = RuleEvaluator::remaining(&time, &[inside.clone()], 0, used).unwrap();
        assert_eq!(remaining.default, HOUR / 2);

        assert_eq!(
            RuleEvaluator::counting_slots(&time, &[inside]),
            BTreeSet::from([midday])
        );
    }

    #[test]
    fn extra_time_is_used_once_default_is_exhausted() {
        let time = monday_noon().local;
        let rule = Rule::new("r", "games", DaysOfWeek::ALL_DAYS, HOUR);

        let before = RuleEvaluator::remaining(&time, &[rule.clone()], 600_000, |_| {
            [HOUR / 2, 0, 0, 0, 0, 0, 0]
        })
        .unwrap();
        assert_eq!(before.including_extra_time, HOUR / 2 + 600_000);
        assert!(!before.uses_extra_time());

        let after = RuleEvaluator::remaining(&time, &[rule], 600_000, |_| {
            [HOUR + 1_000, 0, 0, 0, 0, 0, 0]
        })
        .unwrap();
        assert_eq!(after.default, -1_000);
        assert_eq!(after.including_extra_time, 600_000);
        assert!(after.uses_extra_time());
        assert!(!after.is_over());
    }

    #[test]
    fn extra_time_limiting_rule_caps_extra_time() {
        let time = monday_noon().local;
        let rules = [
            Rule::new("daily", "games", DaysOfWeek::ALL_DAYS, HOUR).per_day(),
            Rule::new("hard", "games", DaysOfWeek::ALL_DAYS, 2 * HOUR)
                .per_day()
                .limiting_extra_time(),
        ];
        let used = |_| [HOUR + HOUR / 2, 0, 0, 0, 0, 0, 0];

        let remaining = RuleEvaluator::remaining(&time, &rules, 4 * HOUR as u64, used).unwrap();
        assert_eq!(remaining.default, -HOUR / 2);
        assert_eq!(remaining.including_extra_time, HOUR / 2);
    }

    #[test]
    fn session_only_rule_is_not_a_daily_cap() {
        let time = monday_noon().local;
        let session = Rule::new("s", "games", DaysOfWeek::ALL_DAYS, MILLIS_PER_DAY)
            .with_session_limit(30 * 60_000, 10 * 60_000);

        assert_eq!(RuleEvaluator::remaining(&time, &[session], 0, no_usage), None);
    }

    #[test]
    fn next_change_is_nearest_window_edge() {
        let time = monday_noon().local;
        let rules = [
            Rule::new("noon", "games", DaysOfWeek::ALL_DAYS, HOUR)
                .in_slot(TimeSlot::new(11 * 60, 12 * 60 + 29).unwrap()),
            Rule::new("eve", "games", DaysOfWeek::ALL_DAYS, HOUR)
                .in_slot(TimeSlot::new(18 * 60, 23 * 60 + 59).unwrap()),
        ];

        assert_eq!(
            RuleEvaluator::next_change(&time, &rules),
            Some(time.timestamp_at_minute(12 * 60 + 30))
        );
    }
}
