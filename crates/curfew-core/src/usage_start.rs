//! Tracking when categories started being counted

use curfew_util::{CategoryId, Uptime};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

/// How long a category counts as recently started
pub const RECENTLY_STARTED_WINDOW: Duration = Duration::from_millis(5000);

/// Remembers the uptime at which each currently counted category was first seen
#[derive(Debug)]
pub struct UsageStartTracker {
    window: Duration,
    first_seen: HashMap<CategoryId, Uptime>,
}

impl UsageStartTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            first_seen: HashMap::new(),
        }
    }

    /// Record the categories counted at `uptime`. Categories no longer
    /// counted are forgotten; new ones start at `uptime`.
    pub fn report(&mut self, uptime: Uptime, categories: &BTreeSet<CategoryId>) {
        self.first_seen.retain(|id, _| categories.contains(id));
        for id in categories {
            self.first_seen.entry(id.clone()).or_insert(uptime);
        }
    }

    /// Categories first seen less than one window before `uptime`
    pub fn recently_started(&self, uptime: Uptime) -> BTreeSet<CategoryId> {
        self.first_seen
            .iter()
            .filter(|(_, first)| uptime.saturating_since(**first) < self.window)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn clear(&mut self) {
        self.first_seen.clear();
    }
}

impl Default for UsageStartTracker {
    fn default() -> Self {
        Self::new(RECENTLY_STARTED_WINDOW)
    }
}
