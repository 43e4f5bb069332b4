//! Shared types for the curfew engine boundary

use curfew_util::{AppId, CategoryId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of device user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    /// Administrator of the device; never restricted
    Parent,
    /// Restricted user subject to quota enforcement
    Child,
}

impl UserType {
    pub fn is_restricted(&self) -> bool {
        matches!(self, UserType::Child)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UserType::Parent => "parent",
            UserType::Child => "child",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "parent" => Some(UserType::Parent),
            "child" => Some(UserType::Child),
            _ => None,
        }
    }
}

/// One running application as reported by the foreground sampler
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForegroundApp {
    pub app_id: AppId,
    /// Activity (screen/window class) inside the application, if known
    pub activity: Option<String>,
}

impl ForegroundApp {
    pub fn new(app_id: impl Into<AppId>) -> Self {
        Self {
            app_id: app_id.into(),
            activity: None,
        }
    }

    pub fn with_activity(mut self, activity: impl Into<String>) -> Self {
        self.activity = Some(activity.into());
        self
    }
}

/// Battery snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatteryStatus {
    /// Battery percentage (0-100)
    pub level: u8,
    /// Whether the device runs on external power
    pub charging: bool,
}

impl BatteryStatus {
    pub fn new(level: u8, charging: bool) -> Self {
        Self {
            level: level.min(100),
            charging,
        }
    }

    /// Devices without a battery always report a full, charging battery
    pub fn mains_powered() -> Self {
        Self::new(100, true)
    }
}

impl Default for BatteryStatus {
    fn default() -> Self {
        Self::mains_powered()
    }
}

/// Opaque identity of the network the device is connected to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NetworkId(String);

impl NetworkId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why an application or category is blocked right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockingReason {
    /// The application has no category and there is no fallback category
    NotPartOfAnCategory,
    /// Battery is below the category minimum for the current power source
    BatteryLimit,
    /// The category was blocked by the administrator
    TemporarilyBlocked,
    /// The weekly schedule forbids the current minute
    BlockedAtThisTime,
    /// The category is restricted to networks the device is not on
    RequiredNetworkMissing,
    /// Daily quota and extra time are used up
    TimeOver,
    /// Daily quota is used up; extra time exists but cannot be used now
    TimeOverExtraTimeCanBeUsedLater,
    /// The continuous session limit was reached
    SessionDurationLimit,
}

impl BlockingReason {
    pub fn description(&self) -> &'static str {
        match self {
            BlockingReason::NotPartOfAnCategory => "not assigned to a category",
            BlockingReason::BatteryLimit => "battery too low",
            BlockingReason::TemporarilyBlocked => "temporarily blocked",
            BlockingReason::BlockedAtThisTime => "blocked at this time",
            BlockingReason::RequiredNetworkMissing => "required network missing",
            BlockingReason::TimeOver => "time over",
            BlockingReason::TimeOverExtraTimeCanBeUsedLater => {
                "time over, extra time can be used later"
            }
            BlockingReason::SessionDurationLimit => "session duration limit reached",
        }
    }
}

impl fmt::Display for BlockingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Whether a block applies to the whole application or only one activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockingLevel {
    App,
    Activity,
}

/// Blocking decision for one running application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockingDecision {
    pub app: ForegroundApp,
    /// `None` means the application may keep running
    pub reason: Option<BlockingReason>,
    /// Category in the parent chain that produced the reason
    pub category_id: Option<CategoryId>,
    pub level: BlockingLevel,
    /// All notifications of the application should be suppressed
    pub block_notifications: bool,
    /// Grace period before suppressed notifications are removed
    #[serde(default)]
    pub notification_delay_millis: u64,
}

impl BlockingDecision {
    pub fn allowed(app: ForegroundApp) -> Self {
        Self {
            app,
            reason: None,
            category_id: None,
            level: BlockingLevel::App,
            block_notifications: false,
            notification_delay_millis: 0,
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.reason.is_some()
    }
}
