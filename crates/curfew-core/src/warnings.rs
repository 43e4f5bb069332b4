//! Time warnings when remaining time crosses a configured threshold

use curfew_util::{CategoryId, MILLIS_PER_MINUTE};
use std::collections::HashMap;

use crate::Handling;

/// A category's remaining time dropped to a warning threshold
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeWarning {
    pub category_id: CategoryId,
    pub title: String,
    pub minutes: u32,
}

impl TimeWarning {
    pub fn text(&self) -> String {
        match self.minutes {
            1 => format!("{}: 1 minute left", self.title),
            m => format!("{}: {} minutes left", self.title, m),
        }
    }
}

/// Remembers the last seen remaining time per counted category
#[derive(Debug, Default)]
pub struct WarningTracker {
    last_left: HashMap<CategoryId, i64>,
}

impl WarningTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Warning for the smallest threshold crossed since the previous check
    pub fn check(&mut self, handling: &Handling) -> Option<TimeWarning> {
        let left = handling.time_left()?;
        let previous = self.last_left.insert(handling.category_id.clone(), left)?;

        handling
            .time_warnings
            .iter()
            .find(|minutes| {
                let threshold = **minutes as i64 * MILLIS_PER_MINUTE;
                previous > threshold && left <= threshold
            })
            .map(|minutes| TimeWarning {
                category_id: handling.category_id.clone(),
                title: handling.title.clone(),
                minutes: *minutes,
            })
    }

    /// Forget categories that are no longer counted
    pub fn retain(&mut self, counted: impl Fn(&CategoryId) -> bool) {
        self.last_left.retain(|id, _| counted(id));
    }

    pub fn clear(&mut self) {
        self.last_left.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RemainingTime;
    use std::collections::BTreeSet;

    fn handling(left: i64) -> Handling {
        Handling {
            category_id: CategoryId::new("games"),
            title: "Games".into(),
            remaining: Some(RemainingTime {
                default: left,
                including_extra_time: left,
            }),
            remaining_session: None,
            blocking_reason: None,
            block_all_notifications: false,
            notification_delay_millis: 0,
            should_count_time: true,
            should_count_extra_time: false,
            max_time_to_add: None,
            depends_on_max_time: i64::MAX,
            depends_on_network: false,
            system_level_blocking: false,
            additional_counting_slots: BTreeSet::new(),
            session_duration_slots: BTreeSet::new(),
            time_warnings: BTreeSet::from([1, 5, 10]),
        }
    }

    #[test]
    fn warns_once_when_crossing() {
        let mut tracker = WarningTracker::new();
        assert_eq!(tracker.check(&handling(5 * 60_000 + 1)), None);

        let warning = tracker.check(&handling(5 * 60_000)).unwrap();
        assert_eq!(warning.minutes, 5);
        assert_eq!(warning.text(), "Games: 5 minutes left");

        assert_eq!(tracker.check(&handling(4 * 60_000)), None);
    }

    #[test]
    fn first_observation_never_warns() {
        let mut tracker = WarningTracker::new();
        assert_eq!(tracker.check(&handling(30_000)), None);
    }

    #[test]
    fn jump_reports_most_urgent_threshold() {
        let mut tracker = WarningTracker::new();
        tracker.check(&handling(11 * 60_000));
        let warning = tracker.check(&handling(30_000)).unwrap();
        assert_eq!(warning.minutes, 1);
    }

    #[test]
    fn forgotten_category_starts_over() {
        let mut tracker = WarningTracker::new();
        tracker.check(&handling(6 * 60_000));
        tracker.retain(|_| false);
        assert_eq!(tracker.check(&handling(5 * 60_000)), None);
    }
}
