//! Fixtures shared by the unit tests

use curfew_api::UserType;
use curfew_host_api::{MockHost, TimeSource};
use curfew_store::{CategoryStore, User};
use curfew_util::TimeSnapshot;

/// Monday 2025-01-06 12:00 UTC, the mock host's start time
pub fn monday_noon() -> TimeSnapshot {
    MockHost::new().snapshot()
}

pub fn child() -> User {
    User::new("kid", "Kid", UserType::Child)
}

/// Empty view of the child's categories for the week of `time`
pub fn child_store(time: &TimeSnapshot) -> CategoryStore {
    CategoryStore::new(child(), time.local.first_day_of_week())
}
