//! Validated settings structures

use crate::schema::{
    RawCategory, RawConfig, RawEngineConfig, RawRule, RawServiceConfig, RawStatusSyncConfig,
    RawTimeWindow, RawUser,
};
use crate::validation::{parse_days, parse_end_minute, parse_start_minute};
use curfew_api::{NetworkId, UserType};
use curfew_store::{BlockedMinutes, Category, CategoryApp, ModelError, Rule, TimeSlot, User};
use curfew_util::{AppId, CategoryId, DaysOfWeek, MILLIS_PER_MINUTE, MINUTES_PER_DAY, UserId};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

/// Time warning thresholds used when a category sets none
pub const DEFAULT_WARNING_MINUTES: [u32; 5] = [1, 3, 5, 10, 15];

/// Validated settings ready for use by the service
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub service: ServiceConfig,
    pub engine: EngineConfig,
    pub status_sync: StatusSyncConfig,
    /// Users and categories to write into the store at startup
    pub policy: PolicySeed,
}

impl Settings {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Result<Self, ModelError> {
        Ok(Self {
            service: ServiceConfig::from_raw(raw.service),
            engine: EngineConfig::from_raw(raw.engine),
            status_sync: StatusSyncConfig::from_raw(raw.status_sync),
            policy: PolicySeed::from_raw(raw.users, raw.categories)?,
        })
    }
}

/// Service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub log_dir: PathBuf,
    pub data_dir: PathBuf,
    pub status_file: Option<PathBuf>,
    pub account: Option<String>,
}

impl ServiceConfig {
    fn from_raw(raw: RawServiceConfig) -> Self {
        Self {
            log_dir: raw.log_dir.unwrap_or_else(curfew_util::default_log_dir),
            data_dir: raw.data_dir.unwrap_or_else(curfew_util::default_data_dir),
            status_file: raw.status_file,
            account: raw.account,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from_raw(RawServiceConfig::default())
    }
}

/// Reconciliation loop speed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Speed {
    #[default]
    Fast,
    Slow,
}

impl Speed {
    pub fn tick_interval(&self) -> Duration {
        match self {
            Speed::Fast => Duration::from_millis(100),
            Speed::Slow => Duration::from_millis(1000),
        }
    }

    /// Longest elapsed time credited as usage for one tick
    pub fn max_backfill(&self) -> Duration {
        match self {
            Speed::Fast => Duration::from_millis(1000),
            Speed::Slow => Duration::from_millis(2000),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub speed: Speed,
    /// Applications that are never blocked or counted
    pub ignored_apps: BTreeSet<AppId>,
    pub used_time_retention_days: u32,
    pub recently_started_window: Duration,
    pub commit_interval: Duration,
}

impl EngineConfig {
    fn from_raw(raw: RawEngineConfig) -> Self {
        let speed = match raw.speed.as_deref() {
            Some("slow") => Speed::Slow,
            _ => Speed::Fast,
        };

        Self {
            speed,
            ignored_apps: raw.ignored_apps.into_iter().map(AppId::new).collect(),
            used_time_retention_days: raw.used_time_retention_days.unwrap_or(14),
            recently_started_window: Duration::from_millis(
                raw.recently_started_window_ms.unwrap_or(5000),
            ),
            commit_interval: Duration::from_millis(raw.commit_interval_ms.unwrap_or(30_000)),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_raw(RawEngineConfig::default())
    }
}

/// Status synchronization configuration
#[derive(Debug, Clone)]
pub struct StatusSyncConfig {
    pub interval: Duration,
    pub debounce: Duration,
}

impl StatusSyncConfig {
    fn from_raw(raw: RawStatusSyncConfig) -> Self {
        Self {
            interval: Duration::from_secs(raw.interval_seconds.unwrap_or(5)),
            debounce: Duration::from_millis(raw.debounce_ms.unwrap_or(500)),
        }
    }
}

impl Default for StatusSyncConfig {
    fn default() -> Self {
        Self::from_raw(RawStatusSyncConfig::default())
    }
}

/// Users, categories, rules and app assignments declared in the config
#[derive(Debug, Clone, Default)]
pub struct PolicySeed {
    pub users: Vec<User>,
    pub current_user: Option<UserId>,
    /// Parents always precede their children
    pub categories: Vec<Category>,
    pub rules: Vec<(CategoryId, Vec<Rule>)>,
    pub apps: Vec<CategoryApp>,
}

impl PolicySeed {
    fn from_raw(users: Vec<RawUser>, categories: Vec<RawCategory>) -> Result<Self, ModelError> {
        let current_user = users
            .iter()
            .find(|u| u.current)
            .map(|u| UserId::new(u.id.clone()));
        let users = users.into_iter().map(convert_user).collect();

        let mut seed = Self {
            users,
            current_user,
            ..Default::default()
        };

        for raw in order_parents_first(categories) {
            let category_id = CategoryId::new(raw.id.clone());

            for app in &raw.apps {
                seed.apps.push(CategoryApp {
                    category_id: category_id.clone(),
                    app_id: AppId::new(app.clone()),
                    activity: None,
                });
            }
            for activity in &raw.activities {
                seed.apps.push(CategoryApp {
                    category_id: category_id.clone(),
                    app_id: AppId::new(activity.app.clone()),
                    activity: Some(activity.activity.clone()),
                });
            }

            let rules = raw
                .rules
                .iter()
                .enumerate()
                .map(|(index, rule)| convert_rule(rule, &category_id, index))
                .collect::<Result<Vec<_>, _>>()?;
            seed.rules.push((category_id, rules));
            seed.categories.push(convert_category(raw)?);
        }

        Ok(seed)
    }
}

/// Sort so that every category comes after its parent. Categories whose
/// parent never appears (rejected by validation) keep their relative order
/// at the end.
fn order_parents_first(mut pending: Vec<RawCategory>) -> Vec<RawCategory> {
    let mut ordered: Vec<RawCategory> = Vec::with_capacity(pending.len());
    let mut placed = BTreeSet::new();

    loop {
        let before = pending.len();
        let (ready, rest): (Vec<_>, Vec<_>) = pending.into_iter().partition(|c| {
            c.parent
                .as_ref()
                .is_none_or(|parent| placed.contains(parent))
        });
        for category in ready {
            placed.insert(category.id.clone());
            ordered.push(category);
        }
        pending = rest;
        if pending.is_empty() || pending.len() == before {
            break;
        }
    }

    ordered.extend(pending);
    ordered
}

fn convert_user(raw: RawUser) -> User {
    let user_type = UserType::parse(&raw.user_type).unwrap_or(UserType::Child);
    let mut user = User::new(raw.id, raw.name, user_type);
    user.category_for_not_assigned_apps = raw.default_category.map(CategoryId::new);
    user.activity_level_blocking = raw.activity_level_blocking;
    user
}

fn convert_window(window: &RawTimeWindow, blocked: &mut BlockedMinutes) {
    let days = DaysOfWeek::new(parse_days(&window.days).unwrap_or(0x7F));
    let start = parse_start_minute(&window.start).unwrap_or(0) as usize;
    let end = parse_end_minute(&window.end).unwrap_or(MINUTES_PER_DAY) as usize;
    if start >= end {
        return;
    }

    for day in days.indices() {
        let day_start = day as usize * MINUTES_PER_DAY as usize;
        blocked.set_range(day_start + start, day_start + end - 1, true);
    }
}

fn convert_category(raw: RawCategory) -> Result<Category, ModelError> {
    let mut blocked = BlockedMinutes::empty();
    for window in &raw.blocked {
        convert_window(window, &mut blocked);
    }

    let extra_time = raw.extra_time_minutes.unwrap_or(0) as i64 * MILLIS_PER_MINUTE;
    let mut category = Category::new(raw.id, raw.user, raw.title)
        .with_blocked_minutes(blocked)
        .with_extra_time(extra_time)?
        .with_battery_limits(
            raw.min_battery_charging.unwrap_or(0),
            raw.min_battery_mobile.unwrap_or(0),
        )?
        .with_time_warnings(
            raw.warnings_minutes
                .unwrap_or_else(|| DEFAULT_WARNING_MINUTES.to_vec()),
        );

    category.parent_id = raw.parent.map(CategoryId::new);
    category.block_all_notifications = raw.block_notifications;
    category.notification_delay_millis = raw.notification_delay_seconds.unwrap_or(0) * 1000;
    category.allowed_networks = raw.networks.into_iter().map(NetworkId::new).collect();
    Ok(category)
}

fn convert_rule(raw: &RawRule, category_id: &CategoryId, index: usize) -> Result<Rule, ModelError> {
    let id = raw
        .id
        .clone()
        .unwrap_or_else(|| format!("{}-rule-{}", category_id, index));
    let start = raw
        .start
        .as_deref()
        .map(parse_start_minute)
        .transpose()
        .unwrap_or(None)
        .unwrap_or(0);
    let end = raw
        .end
        .as_deref()
        .map(parse_end_minute)
        .transpose()
        .unwrap_or(None)
        .unwrap_or(MINUTES_PER_DAY);

    let mut rule = Rule::new(
        id,
        category_id.clone(),
        DaysOfWeek::new(parse_days(&raw.days).unwrap_or(0x7F)),
        raw.max_minutes as i64 * MILLIS_PER_MINUTE,
    )
    .in_slot(TimeSlot::new(start, end.saturating_sub(1))?);

    if raw.per_day {
        rule = rule.per_day();
    }
    if raw.limits_extra_time {
        rule = rule.limiting_extra_time();
    }
    if let (Some(session), Some(pause)) = (raw.session_minutes, raw.pause_minutes) {
        rule = rule.with_session_limit(
            session * MILLIS_PER_MINUTE as u64,
            pause * MILLIS_PER_MINUTE as u64,
        );
    }

    Ok(rule)
}
