//! Enforcement actions, permissions and the status descriptor

use bitflags::bitflags;
use curfew_util::{AppId, CategoryId};
use serde::{Deserialize, Serialize};

use crate::BlockingDecision;

bitflags! {
    /// Platform permissions the engine depends on
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Permissions: u8 {
        /// Foreground application sampling
        const USAGE_STATS = 1 << 0;
        /// Reading and suppressing notifications
        const NOTIFICATION_ACCESS = 1 << 1;
        /// Drawing the lock overlay
        const OVERLAY = 1 << 2;
        /// Device owner / system-level suspension
        const DEVICE_OWNER = 1 << 3;
    }
}

/// Permission and enablement state, as synchronized by the status loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionStatus {
    pub granted: Permissions,
}

impl PermissionStatus {
    pub fn all() -> Self {
        Self {
            granted: Permissions::all(),
        }
    }

    pub fn has(&self, permission: Permissions) -> bool {
        self.granted.contains(permission)
    }
}

/// Side effects the reconciliation loop asks the platform to perform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum EnforcementAction {
    /// Show the lock overlay over a blocked application
    Lock { decision: BlockingDecision },
    /// Remove the lock overlay from one application
    Unlock { app_id: AppId },
    /// Mute a background audio application that is blocked
    Mute { app_id: AppId },
    /// Restore audio for a previously muted application
    Unmute { app_id: AppId },
    /// Suspend or resume applications at the operating system level
    SetSystemSuspension { suspended: bool },
    /// Show a time warning notification
    Notify { title: String, text: String },
}

/// What the engine is currently doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Disabled,
    Idle,
    NotRestricted,
    Running,
    Blocked,
    PermissionMissing,
    Error,
}

/// Status message descriptor for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub kind: StatusKind,
    pub title: String,
    pub text: String,
    /// Category the message is about, if any
    pub category_id: Option<CategoryId>,
}

impl StatusMessage {
    pub fn new(kind: StatusKind, title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            text: text.into(),
            category_id: None,
        }
    }

    pub fn for_category(mut self, category_id: CategoryId) -> Self {
        self.category_id = Some(category_id);
        self
    }

    pub fn disabled() -> Self {
        Self::new(StatusKind::Disabled, "curfew", "Limits are disabled")
    }

    pub fn idle() -> Self {
        Self::new(StatusKind::Idle, "curfew", "No application in use")
    }

    pub fn not_restricted() -> Self {
        Self::new(StatusKind::NotRestricted, "curfew", "Current user has no limits")
    }

    /// Generic message shown after a failed tick
    pub fn error() -> Self {
        Self::new(StatusKind::Error, "curfew", "Error while checking limits")
    }
}
