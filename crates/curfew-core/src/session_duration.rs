//! Continuous session limits

use curfew_store::{Rule, SessionDurationItem, SessionDurationSlot};
use curfew_util::LocalTime;
use std::collections::BTreeSet;

/// Remaining continuous-session time of one category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionRemaining {
    /// Milliseconds until the tightest session limit is reached
    pub remaining: i64,
    /// When a running pause completes and the result changes on its own
    pub changes_at: Option<i64>,
}

/// Computes remaining session time from session rules and their persisted progress
pub struct SessionDurationEvaluator;

impl SessionDurationEvaluator {
    /// Remaining session time at `time`, or `None` when no session rule applies.
    ///
    /// A session whose last usage is at least one pause ago has been reset.
    pub fn remaining(
        time: &LocalTime,
        rules: &[Rule],
        progress: impl Fn(&SessionDurationSlot) -> Option<SessionDurationItem>,
    ) -> Option<SessionRemaining> {
        let now = time.timestamp;
        let mut result: Option<SessionRemaining> = None;

        for key in Self::session_slots(time, rules) {
            let max = key.max_session_duration as i64;
            let pause = key.session_pause_duration as i64;

            let (remaining, changes_at) = match progress(&key) {
                Some(item) if now - item.last_usage < pause => (
                    max - item.last_session_duration as i64,
                    Some(item.last_usage + pause),
                ),
                _ => (max, None),
            };

            result = Some(match result {
                None => SessionRemaining {
                    remaining,
                    changes_at,
                },
                Some(current) => SessionRemaining {
                    remaining: current.remaining.min(remaining),
                    changes_at: match (current.changes_at, changes_at) {
                        (Some(a), Some(b)) => Some(a.min(b)),
                        (a, b) => a.or(b),
                    },
                },
            });
        }

        result
    }

    /// Session limits that usage at `time` advances
    pub fn session_slots(time: &LocalTime, rules: &[Rule]) -> BTreeSet<SessionDurationSlot> {
        rules
            .iter()
            .filter(|rule| rule.applies_at(time.day_of_week, time.minute_of_day))
            .filter_map(Rule::session_slot)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::monday_noon;
    use curfew_util::{DaysOfWeek, MILLIS_PER_DAY};

    const MINUTE: u64 = 60_000;

    fn session_rule() -> Rule {
        Rule::new("s", "games", DaysOfWeek::ALL_DAYS, MILLIS_PER_DAY)
            .with_session_limit(30 * MINUTE, 10 * MINUTE)
    }

    fn item(last_usage: i64, last_session_duration: u64) -> SessionDurationItem {
        SessionDurationItem {
            key: session_rule().session_slot().unwrap(),
            last_usage,
            last_session_duration,
        }
    }

    #[test]
    fn no_session_rule() {
        let time = monday_noon().local;
        let rule = Rule::new("r", "games", DaysOfWeek::ALL_DAYS, 3_600_000);
        assert_eq!(SessionDurationEvaluator::remaining(&time, &[rule], |_| None), None);
    }

    #[test]
    fn fresh_session_has_full_budget() {
        let time = monday_noon().local;
        let remaining =
            SessionDurationEvaluator::remaining(&time, &[session_rule()], |_| None).unwrap();
        assert_eq!(remaining.remaining, 30 * MINUTE as i64);
        assert_eq!(remaining.changes_at, None);
    }

    #[test]
    fn ongoing_session_subtracts_duration() {
        let time = monday_noon().local;
        let last_usage = time.timestamp - 60_000;
        let progress = item(last_usage, 20 * MINUTE);

        let remaining =
            SessionDurationEvaluator::remaining(&time, &[session_rule()], |_| Some(progress))
                .unwrap();
        assert_eq!(remaining.remaining, 10 * MINUTE as i64);
        assert_eq!(remaining.changes_at, Some(last_usage + 10 * MINUTE as i64));
    }

    #[test]
    fn pause_resets_session() {
        let time = monday_noon().local;
        let progress = item(time.timestamp - 10 * MINUTE as i64, 30 * MINUTE);

        let remaining =
            SessionDurationEvaluator::remaining(&time, &[session_rule()], |_| Some(progress))
                .unwrap();
        assert_eq!(remaining.remaining, 30 * MINUTE as i64);
    }

    #[test]
    fn exhausted_session_changes_when_pause_ends() {
        let time = monday_noon().local;
        let last_usage = time.timestamp - 2 * MINUTE as i64;
        let progress = item(last_usage, 31 * MINUTE);

        let remaining =
            SessionDurationEvaluator::remaining(&time, &[session_rule()], |_| Some(progress))
                .unwrap();
        assert_eq!(remaining.remaining, -(MINUTE as i64));
        assert_eq!(remaining.changes_at, Some(time.timestamp + 8 * MINUTE as i64));
    }
}
