//! Audit event types

use chrono::{DateTime, Local};
use curfew_api::BlockingReason;
use curfew_util::{AppId, CategoryId, CommitId};
use serde::{Deserialize, Serialize};

/// Types of audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    /// Service started
    ServiceStarted,

    /// Service stopped
    ServiceStopped,

    /// Engine enabled or disabled
    EnabledChanged { enabled: bool },

    /// Used time written for a set of categories
    UsedTimeCommitted {
        commit_id: CommitId,
        day_of_epoch: i64,
        time_to_add_millis: u64,
        categories: Vec<CategoryId>,
        with_timestamp: bool,
    },

    /// A category vanished before its used time could be written
    CategoryDroppedFromCommit {
        commit_id: CommitId,
        category_id: CategoryId,
        time_to_add_millis: u64,
    },

    /// Used time rows aged out of the retention window
    UsedTimePurged { before_day: i64, rows: usize },

    /// Application locked or released
    LockChanged {
        locked: bool,
        app_id: AppId,
        reason: Option<BlockingReason>,
        category_id: Option<CategoryId>,
    },
}

/// Full audit event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: i64,

    /// Event timestamp
    pub timestamp: DateTime<Local>,

    /// Event type and details
    pub event: AuditEventType,
}

impl AuditEvent {
    pub fn new(event: AuditEventType) -> Self {
        Self {
            id: 0, // Will be set by store
            timestamp: curfew_util::now(),
            event,
        }
    }
}
