//! Core events emitted by the reconciliation loop

use curfew_api::BlockingDecision;
use curfew_util::{AppId, CategoryId, CommitId};

use crate::TimeWarning;

/// Events emitted by the reconciliation loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreEvent {
    /// The local day changed since the previous tick
    DayChanged { day_of_epoch: i64 },

    /// Used time older than the retention window was deleted
    UsedTimePurged { before_day: i64, rows: usize },

    /// Counted usage was written
    UsedTimeCommitted {
        commit_id: CommitId,
        categories: Vec<CategoryId>,
        time_to_add_millis: u64,
        with_timestamp: bool,
    },

    /// A category disappeared before its usage was written
    CategoryDropped {
        commit_id: CommitId,
        category_id: CategoryId,
    },

    /// Remaining time crossed a warning threshold
    Warning(TimeWarning),

    /// An application was locked (`Some`) or released (`None`)
    LockChanged {
        app_id: AppId,
        decision: Option<BlockingDecision>,
    },

    /// The tick failed; enforcement fell back to unlocked
    TickFailed { message: String },
}
