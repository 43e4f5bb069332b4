//! Configuration validation

use crate::schema::{RawCategory, RawConfig, RawDays, RawRule, RawTimeWindow, RawUser};
use curfew_api::UserType;
use curfew_store::MAX_CATEGORY_DEPTH;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Category '{category_id}': {message}")]
    CategoryError {
        category_id: String,
        message: String,
    },

    #[error("User '{user_id}': {message}")]
    UserError { user_id: String, message: String },

    #[error("Duplicate category ID: {0}")]
    DuplicateCategoryId(String),

    #[error("Duplicate user ID: {0}")]
    DuplicateUserId(String),

    #[error("Invalid time format '{value}': {message}")]
    InvalidTimeFormat { value: String, message: String },

    #[error("Engine config error: {0}")]
    EngineError(String),

    #[error("Global config error: {0}")]
    GlobalError(String),
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = validate_engine(config);

    let mut users = HashMap::new();
    for user in &config.users {
        if users.insert(user.id.as_str(), user).is_some() {
            errors.push(ValidationError::DuplicateUserId(user.id.clone()));
        }
    }

    let mut categories = HashMap::new();
    for category in &config.categories {
        if categories.insert(category.id.as_str(), category).is_some() {
            errors.push(ValidationError::DuplicateCategoryId(category.id.clone()));
        }
    }

    if config.users.iter().filter(|u| u.current).count() > 1 {
        errors.push(ValidationError::GlobalError(
            "at most one user can be current".into(),
        ));
    }

    for user in &config.users {
        errors.extend(validate_user(user, &categories));
    }

    let mut assigned_apps = HashSet::new();
    for category in &config.categories {
        errors.extend(validate_category(category, &users, &categories));

        for app in &category.apps {
            if !assigned_apps.insert((category.user.as_str(), app.as_str(), "")) {
                errors.push(category_error(
                    category,
                    format!("app '{}' is assigned to more than one category", app),
                ));
            }
        }
        for activity in &category.activities {
            let key = (
                category.user.as_str(),
                activity.app.as_str(),
                activity.activity.as_str(),
            );
            if !assigned_apps.insert(key) {
                errors.push(category_error(
                    category,
                    format!(
                        "activity '{}/{}' is assigned to more than one category",
                        activity.app, activity.activity
                    ),
                ));
            }
        }
    }

    errors
}

fn validate_engine(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let engine = &config.engine;

    if let Some(speed) = &engine.speed
        && !matches!(speed.as_str(), "fast" | "slow")
    {
        errors.push(ValidationError::EngineError(format!(
            "speed must be \"fast\" or \"slow\", got \"{}\"",
            speed
        )));
    }

    if let Some(days) = engine.used_time_retention_days
        && days < 7
    {
        errors.push(ValidationError::EngineError(format!(
            "used_time_retention_days must cover a full week, got {}",
            days
        )));
    }

    if engine.commit_interval_ms == Some(0) {
        errors.push(ValidationError::EngineError(
            "commit_interval_ms must be positive".into(),
        ));
    }

    if engine.ignored_apps.iter().any(|app| app.trim().is_empty()) {
        errors.push(ValidationError::EngineError(
            "ignored_apps cannot contain empty ids".into(),
        ));
    }

    let interval_seconds = config.status_sync.interval_seconds.unwrap_or(5);
    let debounce_ms = config.status_sync.debounce_ms.unwrap_or(500);
    if interval_seconds == 0 {
        errors.push(ValidationError::GlobalError(
            "status_sync.interval_seconds must be positive".into(),
        ));
    } else if debounce_ms >= interval_seconds * 1000 {
        errors.push(ValidationError::GlobalError(format!(
            "status_sync.debounce_ms ({}) must be shorter than the interval ({}s)",
            debounce_ms, interval_seconds
        )));
    }

    errors
}

fn validate_user(user: &RawUser, categories: &HashMap<&str, &RawCategory>) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if UserType::parse(&user.user_type).is_none() {
        errors.push(ValidationError::UserError {
            user_id: user.id.clone(),
            message: format!("type must be \"child\" or \"parent\", got \"{}\"", user.user_type),
        });
    }

    if let Some(default_category) = &user.default_category {
        match categories.get(default_category.as_str()) {
            Some(category) if category.user == user.id => {}
            Some(_) => errors.push(ValidationError::UserError {
                user_id: user.id.clone(),
                message: format!("default category '{}' belongs to another user", default_category),
            }),
            None => errors.push(ValidationError::UserError {
                user_id: user.id.clone(),
                message: format!("default category '{}' does not exist", default_category),
            }),
        }
    }

    errors
}

fn category_error(category: &RawCategory, message: impl Into<String>) -> ValidationError {
    ValidationError::CategoryError {
        category_id: category.id.clone(),
        message: message.into(),
    }
}

fn validate_category(
    category: &RawCategory,
    users: &HashMap<&str, &RawUser>,
    categories: &HashMap<&str, &RawCategory>,
) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if !users.contains_key(category.user.as_str()) {
        errors.push(category_error(
            category,
            format!("user '{}' does not exist", category.user),
        ));
    }

    if let Some(parent) = &category.parent {
        match categories.get(parent.as_str()) {
            Some(p) if p.user != category.user => errors.push(category_error(
                category,
                format!("parent '{}' belongs to another user", parent),
            )),
            Some(_) => {
                if let Some(message) = check_ancestors(category, categories) {
                    errors.push(category_error(category, message));
                }
            }
            None => errors.push(category_error(
                category,
                format!("parent '{}' does not exist", parent),
            )),
        }
    }

    for (label, level) in [
        ("min_battery_charging", category.min_battery_charging),
        ("min_battery_mobile", category.min_battery_mobile),
    ] {
        if let Some(level) = level
            && level > 100
        {
            errors.push(category_error(
                category,
                format!("{} must be 0-100, got {}", label, level),
            ));
        }
    }

    if category.apps.iter().any(|app| app.trim().is_empty()) {
        errors.push(category_error(category, "apps cannot contain empty ids"));
    }

    if category.networks.iter().any(|n| n.trim().is_empty()) {
        errors.push(category_error(category, "networks cannot contain empty ids"));
    }

    for window in &category.blocked {
        errors.extend(validate_time_window(window, category));
    }

    let mut rule_ids = HashSet::new();
    for rule in &category.rules {
        if let Some(id) = &rule.id
            && !rule_ids.insert(id.as_str())
        {
            errors.push(category_error(category, format!("duplicate rule id '{}'", id)));
        }
        errors.extend(validate_rule(rule, category));
    }

    errors
}

/// Walk the configured parents and report a cycle or an over-deep tree
fn check_ancestors(
    category: &RawCategory,
    categories: &HashMap<&str, &RawCategory>,
) -> Option<String> {
    let mut current = category.parent.as_deref();

    for _ in 0..MAX_CATEGORY_DEPTH {
        let id = current?;
        if id == category.id {
            return Some("parent chain forms a cycle".into());
        }
        current = categories.get(id).and_then(|c| c.parent.as_deref());
    }

    Some(format!("parent chain is deeper than {} levels", MAX_CATEGORY_DEPTH))
}

fn validate_time_window(window: &RawTimeWindow, category: &RawCategory) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    // Validate days
    if let Err(e) = parse_days(&window.days) {
        errors.push(category_error(category, e));
    }

    // Validate start time
    let start = parse_start_minute(&window.start).map_err(|e| {
        errors.push(ValidationError::InvalidTimeFormat {
            value: window.start.clone(),
            message: e,
        })
    });

    // Validate end time
    let end = parse_end_minute(&window.end).map_err(|e| {
        errors.push(ValidationError::InvalidTimeFormat {
            value: window.end.clone(),
            message: e,
        })
    });

    if let (Ok(start), Ok(end)) = (start, end)
        && start >= end
    {
        errors.push(category_error(
            category,
            format!("blocked window {}-{} is empty", window.start, window.end),
        ));
    }

    errors
}

fn validate_rule(rule: &RawRule, category: &RawCategory) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let rule_name = rule.id.clone().unwrap_or_else(|| "rule".into());

    let days = parse_days(&rule.days);
    match &days {
        Err(e) => errors.push(category_error(category, e.clone())),
        Ok(0) => errors.push(category_error(
            category,
            format!("{} applies on no day", rule_name),
        )),
        Ok(_) => {}
    }

    // A limit spanning all masked days can be at most that many days long
    let day_count = days.map(|mask| mask.count_ones() as u64).unwrap_or(7);
    let max_days = if rule.per_day { 1 } else { day_count.max(1) };
    if rule.max_minutes > max_days * 24 * 60 {
        errors.push(category_error(
            category,
            format!(
                "{} allows {} minutes, more than {} day(s)",
                rule_name, rule.max_minutes, max_days
            ),
        ));
    }

    let start = match &rule.start {
        Some(s) => parse_start_minute(s).map_err(|e| {
            errors.push(ValidationError::InvalidTimeFormat {
                value: s.clone(),
                message: e,
            })
        }),
        None => Ok(0),
    };
    let end = match &rule.end {
        Some(s) => parse_end_minute(s).map_err(|e| {
            errors.push(ValidationError::InvalidTimeFormat {
                value: s.clone(),
                message: e,
            })
        }),
        None => Ok(24 * 60),
    };
    if let (Ok(start), Ok(end)) = (start, end)
        && start >= end
    {
        errors.push(category_error(
            category,
            format!("{} has an empty time window", rule_name),
        ));
    }

    match (rule.session_minutes, rule.pause_minutes) {
        (Some(session), Some(pause)) if session == 0 || pause == 0 => {
            errors.push(category_error(
                category,
                format!("{} needs positive session and pause minutes", rule_name),
            ));
        }
        (Some(_), None) | (None, Some(_)) => {
            errors.push(category_error(
                category,
                format!("{} sets only one of session_minutes and pause_minutes", rule_name),
            ));
        }
        _ => {}
    }

    errors
}

/// Parse HH:MM time format
pub fn parse_time(s: &str) -> Result<(u8, u8), String> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 2 {
        return Err("Expected HH:MM format".into());
    }

    let hour: u8 = parts[0]
        .parse()
        .map_err(|_| "Invalid hour".to_string())?;
    let minute: u8 = parts[1]
        .parse()
        .map_err(|_| "Invalid minute".to_string())?;

    if hour >= 24 {
        return Err("Hour must be 0-23".into());
    }
    if minute >= 60 {
        return Err("Minute must be 0-59".into());
    }

    Ok((hour, minute))
}

/// Minute of day at which a window starts
pub fn parse_start_minute(s: &str) -> Result<u16, String> {
    let (hour, minute) = parse_time(s)?;
    Ok(hour as u16 * 60 + minute as u16)
}

/// Minute of day at which a window ends (exclusive); "24:00" is the end of the day
pub fn parse_end_minute(s: &str) -> Result<u16, String> {
    if s == "24:00" {
        return Ok(24 * 60);
    }
    parse_start_minute(s)
}

/// Parse days specification
pub fn parse_days(days: &RawDays) -> Result<u8, String> {
    match days {
        RawDays::Preset(preset) => match preset.to_lowercase().as_str() {
            "all" | "every" | "daily" => Ok(0x7F),
            "weekdays" => Ok(0x1F), // Mon-Fri
            "weekends" => Ok(0x60), // Sat-Sun
            other => Err(format!("Unknown day preset: {}", other)),
        },
        RawDays::List(list) => {
            let mut mask = 0u8;
            for day in list {
                let bit = match day.to_lowercase().as_str() {
                    "mon" | "monday" => 1 << 0,
                    "tue" | "tuesday" => 1 << 1,
                    "wed" | "wednesday" => 1 << 2,
                    "thu" | "thursday" => 1 << 3,
                    "fri" | "friday" => 1 << 4,
                    "sat" | "saturday" => 1 << 5,
                    "sun" | "sunday" => 1 << 6,
                    other => return Err(format!("Unknown day: {}", other)),
                };
                mask |= bit;
            }
            Ok(mask)
        }
    }
}
