//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Paths used by the service
    #[serde(default)]
    pub service: RawServiceConfig,

    /// Reconciliation loop tuning
    #[serde(default)]
    pub engine: RawEngineConfig,

    /// Permission and enablement polling
    #[serde(default)]
    pub status_sync: RawStatusSyncConfig,

    /// Users to create or update at startup
    #[serde(default)]
    pub users: Vec<RawUser>,

    /// Categories to create or update at startup
    #[serde(default)]
    pub categories: Vec<RawCategory>,
}

/// Service-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServiceConfig {
    /// Data directory for the store
    pub data_dir: Option<PathBuf>,

    /// Log directory
    pub log_dir: Option<PathBuf>,

    /// Where the status descriptor is published as JSON
    pub status_file: Option<PathBuf>,

    /// Login name whose processes are sampled and enforced on
    /// (defaults to the current user's id)
    pub account: Option<String>,
}

/// Engine settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawEngineConfig {
    /// "fast" or "slow"
    pub speed: Option<String>,

    /// Applications never blocked or counted (the service's own UI, shells)
    #[serde(default)]
    pub ignored_apps: Vec<String>,

    /// Days of used time to keep (default 14)
    pub used_time_retention_days: Option<u32>,

    /// How long a category counts as recently started (default 5000)
    pub recently_started_window_ms: Option<u64>,

    /// Counted time that triggers a commit (default 30000)
    pub commit_interval_ms: Option<u64>,
}

/// Status synchronization settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawStatusSyncConfig {
    /// Seconds between status reads (default 5)
    pub interval_seconds: Option<u64>,

    /// Delay between the two reads of one check (default 500)
    pub debounce_ms: Option<u64>,
}

/// Raw user definition
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawUser {
    /// Unique stable ID
    pub id: String,

    /// Display name
    pub name: String,

    /// "child" or "parent"
    #[serde(rename = "type")]
    pub user_type: String,

    /// Category for apps without an assignment
    pub default_category: Option<String>,

    /// Allow single activities to be assigned to categories
    #[serde(default)]
    pub activity_level_blocking: bool,

    /// Make this the current device user
    #[serde(default)]
    pub current: bool,
}

/// Raw category definition
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawCategory {
    /// Unique stable ID
    pub id: String,

    /// Owning user
    pub user: String,

    /// Display title
    pub title: String,

    /// Parent category of the same user
    pub parent: Option<String>,

    /// Application ids assigned to this category
    #[serde(default)]
    pub apps: Vec<String>,

    /// Single activities assigned to this category
    #[serde(default)]
    pub activities: Vec<RawActivity>,

    /// Windows in which the category is always blocked
    #[serde(default)]
    pub blocked: Vec<RawTimeWindow>,

    /// Extra time granted when the category is first created
    pub extra_time_minutes: Option<u64>,

    /// Minimum battery level while charging
    pub min_battery_charging: Option<u8>,

    /// Minimum battery level on battery power
    pub min_battery_mobile: Option<u8>,

    /// Suppress all notifications of apps in this category
    #[serde(default)]
    pub block_notifications: bool,

    /// Seconds a notification may stay visible before it is suppressed
    pub notification_delay_seconds: Option<u64>,

    /// Remaining minutes at which to warn (default 1, 3, 5, 10, 15)
    pub warnings_minutes: Option<Vec<u32>>,

    /// Networks the category may be used on; empty allows all
    #[serde(default)]
    pub networks: Vec<String>,

    /// Time limit rules
    #[serde(default)]
    pub rules: Vec<RawRule>,
}

/// Activity assignment
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawActivity {
    pub app: String,
    pub activity: String,
}

/// Time window
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawTimeWindow {
    /// Days of week: "weekdays", "weekends", "all", or list like ["mon", "tue", "wed"]
    pub days: RawDays,

    /// Start time (HH:MM format)
    pub start: String,

    /// End time (HH:MM format, exclusive; "24:00" for end of day)
    pub end: String,
}

/// Days specification
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RawDays {
    Preset(String),
    List(Vec<String>),
}

/// Time limit rule
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawRule {
    /// Stable ID; generated from the category and position if absent
    pub id: Option<String>,

    /// Days the rule applies on; usage on all of them shares the limit
    pub days: RawDays,

    /// Allowed minutes
    pub max_minutes: u64,

    /// Start of the window the rule applies in (HH:MM)
    pub start: Option<String>,

    /// End of the window the rule applies in (HH:MM, exclusive)
    pub end: Option<String>,

    /// Count only today's usage
    #[serde(default)]
    pub per_day: bool,

    /// The limit also applies to extra time
    #[serde(default)]
    pub limits_extra_time: bool,

    /// Maximum continuous session in minutes
    pub session_minutes: Option<u64>,

    /// Break that ends a session, in minutes
    pub pause_minutes: Option<u64>,
}
