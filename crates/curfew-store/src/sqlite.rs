//! SQLite-based store implementation

use chrono::{DateTime, Local};
use curfew_api::{NetworkId, UserType};
use curfew_util::{AppId, CategoryId, DaysOfWeek, RuleId, UserId};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::{
    AuditEvent, BlockedMinutes, Category, CategoryApp, CategoryStore, CommitOutcome, DeviceState,
    MAX_CATEGORY_DEPTH, ModelError, Rule, SessionDurationItem, SessionDurationSlot, Store,
    StoreError, StoreResult, TimeSlot, UsedTimeCommit, UsedTimeItem, User,
};

/// SQLite-based store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            -- Audit log (append-only)
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_json TEXT NOT NULL
            );

            -- Device state (single row)
            CREATE TABLE IF NOT EXISTS devices (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                enabled INTEGER NOT NULL DEFAULT 1,
                current_user_id TEXT
            );

            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                user_type TEXT NOT NULL,
                category_for_not_assigned_apps TEXT,
                limits_disabled_until INTEGER NOT NULL DEFAULT 0,
                activity_level_blocking INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS categories (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                parent_id TEXT,
                title TEXT NOT NULL,
                blocked_minutes BLOB NOT NULL,
                extra_time_ms INTEGER NOT NULL DEFAULT 0 CHECK (extra_time_ms >= 0),
                temporarily_blocked INTEGER NOT NULL DEFAULT 0,
                temporarily_blocked_end INTEGER NOT NULL DEFAULT 0,
                min_battery_charging INTEGER NOT NULL DEFAULT 0,
                min_battery_mobile INTEGER NOT NULL DEFAULT 0,
                block_all_notifications INTEGER NOT NULL DEFAULT 0,
                notification_delay_ms INTEGER NOT NULL DEFAULT 0,
                time_warnings TEXT NOT NULL DEFAULT '[]',
                allowed_networks TEXT NOT NULL DEFAULT '[]'
            );

            CREATE TABLE IF NOT EXISTS rules (
                id TEXT PRIMARY KEY,
                category_id TEXT NOT NULL REFERENCES categories(id) ON DELETE CASCADE,
                day_mask INTEGER NOT NULL,
                max_ms INTEGER NOT NULL,
                applies_to_extra_time INTEGER NOT NULL DEFAULT 0,
                start_minute INTEGER NOT NULL DEFAULT 0,
                end_minute INTEGER NOT NULL DEFAULT 1439,
                per_day INTEGER NOT NULL DEFAULT 0,
                session_duration_ms INTEGER NOT NULL DEFAULT 0,
                session_pause_ms INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS category_apps (
                category_id TEXT NOT NULL REFERENCES categories(id) ON DELETE CASCADE,
                user_id TEXT NOT NULL,
                app_id TEXT NOT NULL,
                activity TEXT NOT NULL DEFAULT '',
                PRIMARY KEY (user_id, app_id, activity)
            );

            -- Usage accounting per day and counting slot
            CREATE TABLE IF NOT EXISTS used_times (
                category_id TEXT NOT NULL REFERENCES categories(id) ON DELETE CASCADE,
                day_of_epoch INTEGER NOT NULL,
                start_minute INTEGER NOT NULL,
                end_minute INTEGER NOT NULL,
                used_ms INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (category_id, day_of_epoch, start_minute, end_minute)
            );

            CREATE TABLE IF NOT EXISTS session_durations (
                category_id TEXT NOT NULL REFERENCES categories(id) ON DELETE CASCADE,
                max_session_ms INTEGER NOT NULL,
                session_pause_ms INTEGER NOT NULL,
                start_minute INTEGER NOT NULL,
                end_minute INTEGER NOT NULL,
                last_usage INTEGER NOT NULL,
                last_session_ms INTEGER NOT NULL,
                PRIMARY KEY (category_id, max_session_ms, session_pause_ms, start_minute, end_minute)
            );

            CREATE TABLE IF NOT EXISTS temporarily_allowed_apps (
                app_id TEXT PRIMARY KEY
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
            CREATE INDEX IF NOT EXISTS idx_used_times_day ON used_times(day_of_epoch);
            CREATE INDEX IF NOT EXISTS idx_categories_user ON categories(user_id);
            CREATE INDEX IF NOT EXISTS idx_rules_category ON rules(category_id);
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }
}

fn to_sql_millis(millis: u64) -> i64 {
    i64::try_from(millis).unwrap_or(i64::MAX)
}

fn from_sql_millis(millis: i64) -> u64 {
    u64::try_from(millis).unwrap_or(0)
}

fn read_user(conn: &Connection, user_id: &UserId) -> StoreResult<Option<User>> {
    let row = conn
        .query_row(
            r#"
            SELECT name, user_type, category_for_not_assigned_apps,
                   limits_disabled_until, activity_level_blocking
            FROM users WHERE id = ?
            "#,
            [user_id.as_str()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, bool>(4)?,
                ))
            },
        )
        .optional()?;

    let Some((name, user_type, fallback, limits_disabled_until, activity_level_blocking)) = row
    else {
        return Ok(None);
    };

    let user_type = UserType::parse(&user_type)
        .ok_or_else(|| StoreError::Serialization(format!("unknown user type {}", user_type)))?;

    Ok(Some(User {
        id: user_id.clone(),
        name,
        user_type,
        category_for_not_assigned_apps: fallback.map(CategoryId::new),
        limits_disabled_until,
        activity_level_blocking,
    }))
}

struct CategoryRow {
    id: String,
    parent_id: Option<String>,
    title: String,
    blocked_minutes: Vec<u8>,
    extra_time_ms: i64,
    temporarily_blocked: bool,
    temporarily_blocked_end: i64,
    min_battery_charging: u8,
    min_battery_mobile: u8,
    block_all_notifications: bool,
    notification_delay_ms: i64,
    time_warnings: String,
    allowed_networks: String,
}

impl CategoryRow {
    fn into_category(self, user_id: &UserId) -> StoreResult<Category> {
        let mut category = Category::new(self.id, user_id.clone(), self.title)
            .with_blocked_minutes(BlockedMinutes::from_bytes(&self.blocked_minutes)?)
            .with_extra_time(self.extra_time_ms)?
            .with_battery_limits(self.min_battery_charging, self.min_battery_mobile)?
            .with_time_warnings(serde_json::from_str::<Vec<u32>>(&self.time_warnings)?);

        category.parent_id = self.parent_id.map(CategoryId::new);
        category.temporarily_blocked = self.temporarily_blocked;
        category.temporarily_blocked_end_time = self.temporarily_blocked_end;
        category.block_all_notifications = self.block_all_notifications;
        category.notification_delay_millis = from_sql_millis(self.notification_delay_ms);
        category.allowed_networks = serde_json::from_str::<BTreeSet<NetworkId>>(&self.allowed_networks)?;
        Ok(category)
    }
}

fn slot_from_sql(start: i64, end: i64) -> StoreResult<TimeSlot> {
    let minute = |m: i64| u16::try_from(m).map_err(|_| ModelError::MinuteOutOfRange(u16::MAX));
    Ok(TimeSlot::new(minute(start)?, minute(end)?)?)
}

fn write_rule(conn: &Connection, rule: &Rule) -> StoreResult<()> {
    conn.execute(
        r#"
        INSERT INTO rules (id, category_id, day_mask, max_ms, applies_to_extra_time,
                           start_minute, end_minute, per_day,
                           session_duration_ms, session_pause_ms)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        ON CONFLICT(id) DO UPDATE SET
            category_id = excluded.category_id,
            day_mask = excluded.day_mask,
            max_ms = excluded.max_ms,
            applies_to_extra_time = excluded.applies_to_extra_time,
            start_minute = excluded.start_minute,
            end_minute = excluded.end_minute,
            per_day = excluded.per_day,
            session_duration_ms = excluded.session_duration_ms,
            session_pause_ms = excluded.session_pause_ms
        "#,
        params![
            rule.id.as_str(),
            rule.category_id.as_str(),
            rule.days.bits(),
            rule.max_millis,
            rule.applies_to_extra_time_usage,
            rule.slot.start_minute,
            rule.slot.end_minute,
            rule.per_day,
            to_sql_millis(rule.session_duration_millis),
            to_sql_millis(rule.session_pause_millis),
        ],
    )?;
    Ok(())
}

/// Walk up from the new parent to make sure the tree stays acyclic,
/// single-user and shallow
fn check_parent_chain(tx: &Transaction<'_>, category: &Category) -> StoreResult<()> {
    let Some(mut current) = category.parent_id.clone() else {
        return Ok(());
    };

    for depth in 0..MAX_CATEGORY_DEPTH {
        if current == category.id {
            return Err(ModelError::CategoryCycle(category.id.clone()).into());
        }

        let row: Option<(String, Option<String>)> = tx
            .query_row(
                "SELECT user_id, parent_id FROM categories WHERE id = ?",
                [current.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((user_id, parent)) = row else {
            return Err(StoreError::NotFound(format!("parent category {}", current)));
        };

        if depth == 0 && user_id != category.user_id.as_str() {
            return Err(ModelError::ParentOfOtherUser {
                category: category.id.clone(),
                parent: current,
            }
            .into());
        }

        match parent {
            Some(parent) => current = CategoryId::new(parent),
            None => return Ok(()),
        }
    }

    Err(ModelError::CategoryTooDeep(category.id.clone()).into())
}

impl Store for SqliteStore {
    fn append_audit(&self, mut event: AuditEvent) -> StoreResult<()> {
        let conn = self.conn()?;
        let event_json = serde_json::to_string(&event.event)?;

        conn.execute(
            "INSERT INTO audit_log (timestamp, event_json) VALUES (?, ?)",
            params![event.timestamp.to_rfc3339(), event_json],
        )?;

        event.id = conn.last_insert_rowid();
        debug!(event_id = event.id, "Audit event appended");

        Ok(())
    }

    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, timestamp, event_json FROM audit_log ORDER BY id DESC LIMIT ?",
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
            let id: i64 = row.get(0)?;
            let timestamp_str: String = row.get(1)?;
            let event_json: String = row.get(2)?;
            Ok((id, timestamp_str, event_json))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, timestamp_str, event_json) = row?;
            let timestamp = DateTime::parse_from_rfc3339(&timestamp_str)
                .map(|dt| dt.with_timezone(&Local))
                .unwrap_or_else(|_| curfew_util::now());
            let event: crate::AuditEventType = serde_json::from_str(&event_json)?;

            events.push(AuditEvent {
                id,
                timestamp,
                event,
            });
        }

        Ok(events)
    }

    fn load_device_state(&self) -> StoreResult<DeviceState> {
        let conn = self.conn()?;

        let row: Option<(bool, Option<String>)> = conn
            .query_row(
                "SELECT enabled, current_user_id FROM devices WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let mut state = DeviceState::default();
        if let Some((enabled, current_user_id)) = row {
            state.enabled = enabled;
            state.current_user_id = current_user_id.map(UserId::new);
        }

        let mut stmt = conn.prepare("SELECT app_id FROM temporarily_allowed_apps")?;
        for app_id in stmt.query_map([], |row| row.get::<_, String>(0))? {
            state.temporarily_allowed_apps.insert(AppId::new(app_id?));
        }

        Ok(state)
    }

    fn set_enabled(&self, enabled: bool) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO devices (id, enabled) VALUES (1, ?)
            ON CONFLICT(id) DO UPDATE SET enabled = excluded.enabled
            "#,
            [enabled],
        )?;
        info!(enabled, "Engine enablement changed");
        Ok(())
    }

    fn set_current_user(&self, user_id: Option<&UserId>) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO devices (id, current_user_id) VALUES (1, ?)
            ON CONFLICT(id) DO UPDATE SET current_user_id = excluded.current_user_id
            "#,
            [user_id.map(UserId::as_str)],
        )?;
        debug!(user_id = ?user_id, "Current user set");
        Ok(())
    }

    fn set_temporarily_allowed(&self, app_id: &AppId, allowed: bool) -> StoreResult<()> {
        let conn = self.conn()?;
        if allowed {
            conn.execute(
                "INSERT OR IGNORE INTO temporarily_allowed_apps (app_id) VALUES (?)",
                [app_id.as_str()],
            )?;
        } else {
            conn.execute(
                "DELETE FROM temporarily_allowed_apps WHERE app_id = ?",
                [app_id.as_str()],
            )?;
        }
        debug!(app_id = %app_id, allowed, "Temporarily allowed app updated");
        Ok(())
    }

    fn get_user(&self, user_id: &UserId) -> StoreResult<Option<User>> {
        let conn = self.conn()?;
        read_user(&conn, user_id)
    }

    fn upsert_user(&self, user: &User) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO users (id, name, user_type, category_for_not_assigned_apps,
                               limits_disabled_until, activity_level_blocking)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                user_type = excluded.user_type,
                category_for_not_assigned_apps = excluded.category_for_not_assigned_apps,
                limits_disabled_until = excluded.limits_disabled_until,
                activity_level_blocking = excluded.activity_level_blocking
            "#,
            params![
                user.id.as_str(),
                user.name,
                user.user_type.as_str(),
                user.category_for_not_assigned_apps
                    .as_ref()
                    .map(CategoryId::as_str),
                user.limits_disabled_until,
                user.activity_level_blocking,
            ],
        )?;
        debug!(user_id = %user.id, "User saved");
        Ok(())
    }

    fn upsert_category(&self, category: &Category) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        check_parent_chain(&tx, category)?;

        tx.execute(
            r#"
            INSERT INTO categories (id, user_id, parent_id, title, blocked_minutes, extra_time_ms,
                                    temporarily_blocked, temporarily_blocked_end,
                                    min_battery_charging, min_battery_mobile,
                                    block_all_notifications, notification_delay_ms,
                                    time_warnings, allowed_networks)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT(id) DO UPDATE SET
                user_id = excluded.user_id,
                parent_id = excluded.parent_id,
                title = excluded.title,
                blocked_minutes = excluded.blocked_minutes,
                temporarily_blocked = excluded.temporarily_blocked,
                temporarily_blocked_end = excluded.temporarily_blocked_end,
                min_battery_charging = excluded.min_battery_charging,
                min_battery_mobile = excluded.min_battery_mobile,
                block_all_notifications = excluded.block_all_notifications,
                notification_delay_ms = excluded.notification_delay_ms,
                time_warnings = excluded.time_warnings,
                allowed_networks = excluded.allowed_networks
            "#,
            params![
                category.id.as_str(),
                category.user_id.as_str(),
                category.parent_id.as_ref().map(CategoryId::as_str),
                category.title,
                category.blocked_minutes.as_bytes(),
                to_sql_millis(category.extra_time_millis()),
                category.temporarily_blocked,
                category.temporarily_blocked_end_time,
                category.min_battery_charging,
                category.min_battery_mobile,
                category.block_all_notifications,
                to_sql_millis(category.notification_delay_millis),
                serde_json::to_string(&category.time_warnings)?,
                serde_json::to_string(&category.allowed_networks)?,
            ],
        )?;

        tx.commit()?;
        debug!(category_id = %category.id, parent = ?category.parent_id, "Category saved");
        Ok(())
    }

    fn delete_category(&self, category_id: &CategoryId) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "UPDATE categories SET parent_id = NULL WHERE parent_id = ?",
            [category_id.as_str()],
        )?;
        tx.execute(
            "UPDATE users SET category_for_not_assigned_apps = NULL WHERE category_for_not_assigned_apps = ?",
            [category_id.as_str()],
        )?;
        let deleted = tx.execute("DELETE FROM categories WHERE id = ?", [category_id.as_str()])?;

        tx.commit()?;

        if deleted == 0 {
            return Err(StoreError::NotFound(format!("category {}", category_id)));
        }
        info!(category_id = %category_id, "Category deleted");
        Ok(())
    }

    fn set_extra_time(&self, category_id: &CategoryId, millis: u64) -> StoreResult<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE categories SET extra_time_ms = ? WHERE id = ?",
            params![to_sql_millis(millis), category_id.as_str()],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("category {}", category_id)));
        }
        debug!(category_id = %category_id, extra_time_ms = millis, "Extra time set");
        Ok(())
    }

    fn upsert_rule(&self, rule: &Rule) -> StoreResult<()> {
        let conn = self.conn()?;
        write_rule(&conn, rule)?;
        debug!(rule_id = %rule.id, category_id = %rule.category_id, "Rule saved");
        Ok(())
    }

    fn delete_rule(&self, rule_id: &RuleId) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM rules WHERE id = ?", [rule_id.as_str()])?;
        Ok(())
    }

    fn set_rules(&self, category_id: &CategoryId, rules: &[Rule]) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM rules WHERE category_id = ?", [category_id.as_str()])?;
        for rule in rules {
            if rule.category_id != *category_id {
                return Err(StoreError::NotFound(format!(
                    "rule {} belongs to {}, not {}",
                    rule.id, rule.category_id, category_id
                )));
            }
            write_rule(&tx, rule)?;
        }

        tx.commit()?;
        debug!(category_id = %category_id, rules = rules.len(), "Rules replaced");
        Ok(())
    }

    fn assign_app(&self, app: &CategoryApp) -> StoreResult<()> {
        let conn = self.conn()?;

        let user_id: Option<String> = conn
            .query_row(
                "SELECT user_id FROM categories WHERE id = ?",
                [app.category_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let user_id =
            user_id.ok_or_else(|| StoreError::NotFound(format!("category {}", app.category_id)))?;

        conn.execute(
            r#"
            INSERT INTO category_apps (category_id, user_id, app_id, activity)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(user_id, app_id, activity)
            DO UPDATE SET category_id = excluded.category_id
            "#,
            params![
                app.category_id.as_str(),
                user_id,
                app.app_id.as_str(),
                app.activity.as_deref().unwrap_or(""),
            ],
        )?;
        debug!(app_id = %app.app_id, category_id = %app.category_id, "App assigned");
        Ok(())
    }

    fn unassign_app(
        &self,
        user_id: &UserId,
        app_id: &AppId,
        activity: Option<&str>,
    ) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM category_apps WHERE user_id = ? AND app_id = ? AND activity = ?",
            params![user_id.as_str(), app_id.as_str(), activity.unwrap_or("")],
        )?;
        Ok(())
    }

    fn load_category_store(
        &self,
        user_id: &UserId,
        first_day_of_week: i64,
    ) -> StoreResult<CategoryStore> {
        let conn = self.conn()?;

        let user = read_user(&conn, user_id)?
            .ok_or_else(|| StoreError::NotFound(format!("user {}", user_id)))?;
        let mut view = CategoryStore::new(user, first_day_of_week);

        let mut stmt = conn.prepare(
            r#"
            SELECT id, parent_id, title, blocked_minutes, extra_time_ms,
                   temporarily_blocked, temporarily_blocked_end,
                   min_battery_charging, min_battery_mobile,
                   block_all_notifications, notification_delay_ms,
                   time_warnings, allowed_networks
            FROM categories WHERE user_id = ?
            "#,
        )?;
        let rows = stmt.query_map([user_id.as_str()], |row| {
            Ok(CategoryRow {
                id: row.get(0)?,
                parent_id: row.get(1)?,
                title: row.get(2)?,
                blocked_minutes: row.get(3)?,
                extra_time_ms: row.get(4)?,
                temporarily_blocked: row.get(5)?,
                temporarily_blocked_end: row.get(6)?,
                min_battery_charging: row.get(7)?,
                min_battery_mobile: row.get(8)?,
                block_all_notifications: row.get(9)?,
                notification_delay_ms: row.get(10)?,
                time_warnings: row.get(11)?,
                allowed_networks: row.get(12)?,
            })
        })?;
        for row in rows {
            view.insert_category(row?.into_category(user_id)?);
        }

        let mut stmt = conn.prepare(
            r#"
            SELECT r.id, r.category_id, r.day_mask, r.max_ms, r.applies_to_extra_time,
                   r.start_minute, r.end_minute, r.per_day,
                   r.session_duration_ms, r.session_pause_ms
            FROM rules r JOIN categories c ON c.id = r.category_id
            WHERE c.user_id = ?
            ORDER BY r.id
            "#,
        )?;
        let rows = stmt.query_map([user_id.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, u8>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, bool>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, i64>(6)?,
                row.get::<_, bool>(7)?,
                row.get::<_, i64>(8)?,
                row.get::<_, i64>(9)?,
            ))
        })?;
        for row in rows {
            let (id, category_id, mask, max_ms, extra, start, end, per_day, session, pause) = row?;
            view.insert_rule(Rule {
                id: RuleId::new(id),
                category_id: CategoryId::new(category_id),
                days: DaysOfWeek::new(mask),
                max_millis: max_ms,
                applies_to_extra_time_usage: extra,
                slot: slot_from_sql(start, end)?,
                per_day,
                session_duration_millis: from_sql_millis(session),
                session_pause_millis: from_sql_millis(pause),
            });
        }

        let mut stmt = conn.prepare(
            r#"
            SELECT u.category_id, u.day_of_epoch, u.start_minute, u.end_minute, u.used_ms
            FROM used_times u JOIN categories c ON c.id = u.category_id
            WHERE c.user_id = ?1 AND u.day_of_epoch BETWEEN ?2 AND ?2 + 6
            "#,
        )?;
        let rows = stmt.query_map(params![user_id.as_str(), first_day_of_week], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?;
        for row in rows {
            let (category_id, day_of_epoch, start, end, used_millis) = row?;
            view.insert_used_time(
                CategoryId::new(category_id),
                UsedTimeItem {
                    day_of_epoch,
                    slot: slot_from_sql(start, end)?,
                    used_millis,
                },
            );
        }

        let mut stmt = conn.prepare(
            r#"
            SELECT s.category_id, s.max_session_ms, s.session_pause_ms, s.start_minute,
                   s.end_minute, s.last_usage, s.last_session_ms
            FROM session_durations s JOIN categories c ON c.id = s.category_id
            WHERE c.user_id = ?
            "#,
        )?;
        let rows = stmt.query_map([user_id.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, i64>(6)?,
            ))
        })?;
        for row in rows {
            let (category_id, max, pause, start, end, last_usage, last_session) = row?;
            view.insert_session_duration(
                CategoryId::new(category_id),
                SessionDurationItem {
                    key: SessionDurationSlot {
                        max_session_duration: from_sql_millis(max),
                        session_pause_duration: from_sql_millis(pause),
                        slot: slot_from_sql(start, end)?,
                    },
                    last_usage,
                    last_session_duration: from_sql_millis(last_session),
                },
            );
        }

        let mut stmt = conn
            .prepare("SELECT category_id, app_id, activity FROM category_apps WHERE user_id = ?")?;
        let rows = stmt.query_map([user_id.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        for row in rows {
            let (category_id, app_id, activity) = row?;
            view.insert_app(CategoryApp {
                category_id: CategoryId::new(category_id),
                app_id: AppId::new(app_id),
                activity: (!activity.is_empty()).then_some(activity),
            });
        }

        Ok(view)
    }

    fn commit_used_time(&self, commit: &UsedTimeCommit) -> StoreResult<CommitOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut outcome = CommitOutcome::default();
        let added = to_sql_millis(commit.time_to_add_millis);

        for item in &commit.items {
            let exists: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM categories WHERE id = ?",
                    [item.category_id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;

            if exists.is_none() {
                warn!(
                    commit_id = %commit.id,
                    category_id = %item.category_id,
                    dropped_ms = commit.time_to_add_millis,
                    "Category no longer exists, dropping its used time"
                );
                outcome.dropped.push(item.category_id.clone());
                continue;
            }

            let mut slots = item.additional_slots.clone();
            slots.insert(TimeSlot::FULL_DAY);
            for slot in &slots {
                tx.execute(
                    r#"
                    INSERT INTO used_times (category_id, day_of_epoch, start_minute, end_minute, used_ms)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    ON CONFLICT(category_id, day_of_epoch, start_minute, end_minute)
                    DO UPDATE SET used_ms = used_ms + excluded.used_ms
                    "#,
                    params![
                        item.category_id.as_str(),
                        commit.day_of_epoch,
                        slot.start_minute,
                        slot.end_minute,
                        added,
                    ],
                )?;
            }

            if item.consume_extra_time {
                tx.execute(
                    "UPDATE categories SET extra_time_ms = MAX(0, extra_time_ms - ?1) WHERE id = ?2",
                    params![added, item.category_id.as_str()],
                )?;
            }

            let Some(timestamp) = commit.trusted_timestamp else {
                continue;
            };

            for session in &item.session_slots {
                let max = to_sql_millis(session.max_session_duration);
                let pause = to_sql_millis(session.session_pause_duration);

                let previous: Option<(i64, i64)> = tx
                    .query_row(
                        r#"
                        SELECT last_usage, last_session_ms FROM session_durations
                        WHERE category_id = ?1 AND max_session_ms = ?2 AND session_pause_ms = ?3
                          AND start_minute = ?4 AND end_minute = ?5
                        "#,
                        params![
                            item.category_id.as_str(),
                            max,
                            pause,
                            session.slot.start_minute,
                            session.slot.end_minute,
                        ],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;

                let last_session = match previous {
                    Some((last_usage, last_session)) if timestamp - added - last_usage < pause => {
                        last_session.saturating_add(added)
                    }
                    _ => added,
                };

                tx.execute(
                    r#"
                    INSERT INTO session_durations (category_id, max_session_ms, session_pause_ms,
                                                   start_minute, end_minute, last_usage, last_session_ms)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    ON CONFLICT(category_id, max_session_ms, session_pause_ms, start_minute, end_minute)
                    DO UPDATE SET last_usage = excluded.last_usage,
                                  last_session_ms = excluded.last_session_ms
                    "#,
                    params![
                        item.category_id.as_str(),
                        max,
                        pause,
                        session.slot.start_minute,
                        session.slot.end_minute,
                        timestamp,
                        last_session,
                    ],
                )?;
            }
        }

        tx.commit()?;

        debug!(
            commit_id = %commit.id,
            day = commit.day_of_epoch,
            added_ms = commit.time_to_add_millis,
            categories = commit.items.len(),
            dropped = outcome.dropped.len(),
            with_timestamp = commit.trusted_timestamp.is_some(),
            "Used time committed"
        );
        Ok(outcome)
    }

    fn purge_used_times_before(&self, day_of_epoch: i64) -> StoreResult<usize> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "DELETE FROM used_times WHERE day_of_epoch < ?",
            [day_of_epoch],
        )?;
        if rows > 0 {
            info!(before_day = day_of_epoch, rows, "Purged expired used time");
        }
        Ok(rows)
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AuditEventType, CommitItem};
    use curfew_util::{CommitId, MILLIS_PER_MINUTE};

    const TODAY: i64 = 20_000;

    fn store_with_child() -> SqliteStore {
        let store = SqliteStore::in_memory().unwrap();
        store
            .upsert_user(&User::new("child", "Kid", UserType::Child))
            .unwrap();
        store
            .upsert_category(&Category::new("games", "child", "Games"))
            .unwrap();
        store
    }

    fn commit(categories: &[&str], millis: u64, timestamp: Option<i64>) -> UsedTimeCommit {
        UsedTimeCommit {
            id: CommitId::new(),
            day_of_epoch: TODAY,
            time_to_add_millis: millis,
            trusted_timestamp: timestamp,
            items: categories
                .iter()
                .map(|id| CommitItem {
                    category_id: CategoryId::new(*id),
                    consume_extra_time: false,
                    additional_slots: BTreeSet::new(),
                    session_slots: BTreeSet::new(),
                })
                .collect(),
        }
    }

    fn used_today(store: &SqliteStore, category: &str, slot: TimeSlot) -> i64 {
        let view = store
            .load_category_store(&UserId::new("child"), TODAY)
            .unwrap();
        view.used_time_by_day_of_week(&CategoryId::new(category), slot)[0]
    }

    #[test]
    fn test_in_memory_store() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.is_healthy());
    }

    #[test]
    fn test_audit_log() {
        let store = SqliteStore::in_memory().unwrap();

        let event = AuditEvent::new(AuditEventType::ServiceStarted);
        store.append_audit(event).unwrap();

        let events = store.get_recent_audits(10).unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0].event, AuditEventType::ServiceStarted));
    }

    #[test]
    fn test_device_state_defaults() {
        let store = SqliteStore::in_memory().unwrap();
        let state = store.load_device_state().unwrap();
        assert!(state.enabled);
        assert!(state.current_user_id.is_none());

        store.set_enabled(false).unwrap();
        store.set_current_user(Some(&UserId::new("child"))).unwrap();
        store
            .set_temporarily_allowed(&AppId::new("calculator"), true)
            .unwrap();

        let state = store.load_device_state().unwrap();
        assert!(!state.enabled);
        assert_eq!(state.current_user_id, Some(UserId::new("child")));
        assert!(state.temporarily_allowed_apps.contains(&AppId::new("calculator")));
    }

    #[test]
    fn test_category_round_trip() {
        let store = store_with_child();
        let category = Category::new("video", "child", "Video")
            .with_blocked_minutes(BlockedMinutes::empty().with_blocked_range(0, 419))
            .with_extra_time(600_000)
            .unwrap()
            .with_time_warnings([1, 5]);
        store.upsert_category(&category).unwrap();

        let view = store.load_category_store(&UserId::new("child"), TODAY).unwrap();
        let loaded = view.category(&CategoryId::new("video")).unwrap();
        assert_eq!(loaded, &category);
    }

    #[test]
    fn test_used_time_accumulates() {
        let store = store_with_child();

        store.commit_used_time(&commit(&["games"], 30_000, None)).unwrap();
        assert_eq!(used_today(&store, "games", TimeSlot::FULL_DAY), 30_000);

        store.commit_used_time(&commit(&["games"], 20_000, None)).unwrap();
        assert_eq!(used_today(&store, "games", TimeSlot::FULL_DAY), 50_000);
    }

    #[test]
    fn test_additional_slots_are_counted() {
        let store = store_with_child();
        let evening = TimeSlot::new(1080, 1439).unwrap();

        let mut c = commit(&["games"], 10_000, None);
        c.items[0].additional_slots.insert(evening);
        store.commit_used_time(&c).unwrap();

        assert_eq!(used_today(&store, "games", TimeSlot::FULL_DAY), 10_000);
        assert_eq!(used_today(&store, "games", evening), 10_000);
    }

    #[test]
    fn test_missing_category_is_dropped() {
        let store = store_with_child();

        let outcome = store
            .commit_used_time(&commit(&["deleted", "games"], 15_000, None))
            .unwrap();

        assert_eq!(outcome.dropped, vec![CategoryId::new("deleted")]);
        assert_eq!(used_today(&store, "games", TimeSlot::FULL_DAY), 15_000);
    }

    #[test]
    fn test_extra_time_never_negative() {
        let store = store_with_child();
        store.set_extra_time(&CategoryId::new("games"), 10_000).unwrap();

        let mut c = commit(&["games"], 30_000, None);
        c.items[0].consume_extra_time = true;
        store.commit_used_time(&c).unwrap();
        store.commit_used_time(&c).unwrap();

        let view = store.load_category_store(&UserId::new("child"), TODAY).unwrap();
        let games = view.category(&CategoryId::new("games")).unwrap();
        assert_eq!(games.extra_time_millis(), 0);
    }

    #[test]
    fn test_session_duration_continues_and_resets() {
        let store = store_with_child();
        let session = SessionDurationSlot {
            max_session_duration: 30 * MILLIS_PER_MINUTE as u64,
            session_pause_duration: 10 * MILLIS_PER_MINUTE as u64,
            slot: TimeSlot::FULL_DAY,
        };
        let with_session = |millis: u64, timestamp: i64| {
            let mut c = commit(&["games"], millis, Some(timestamp));
            c.items[0].session_slots.insert(session);
            c
        };
        let last_session = |store: &SqliteStore| {
            let view = store.load_category_store(&UserId::new("child"), TODAY).unwrap();
            *view
                .session_duration(&CategoryId::new("games"), &session)
                .unwrap()
        };

        store.commit_used_time(&with_session(30_000, 1_000_000)).unwrap();
        store.commit_used_time(&with_session(30_000, 1_030_000)).unwrap();
        let item = last_session(&store);
        assert_eq!(item.last_session_duration, 60_000);
        assert_eq!(item.last_usage, 1_030_000);

        // Eleven minutes later the pause has elapsed
        let later = 1_030_000 + 11 * MILLIS_PER_MINUTE + 30_000;
        store.commit_used_time(&with_session(30_000, later)).unwrap();
        assert_eq!(last_session(&store).last_session_duration, 30_000);

        // Commits without a timestamp leave sessions untouched
        let mut c = commit(&["games"], 30_000, None);
        c.items[0].session_slots.insert(session);
        store.commit_used_time(&c).unwrap();
        assert_eq!(last_session(&store).last_usage, later);
    }

    #[test]
    fn test_upsert_keeps_extra_time() {
        let store = store_with_child();
        store.set_extra_time(&CategoryId::new("games"), 60_000).unwrap();

        let renamed = Category::new("games", "child", "Renamed")
            .with_extra_time(5)
            .unwrap();
        store.upsert_category(&renamed).unwrap();

        let view = store.load_category_store(&UserId::new("child"), TODAY).unwrap();
        let games = view.category(&CategoryId::new("games")).unwrap();
        assert_eq!(games.title, "Renamed");
        assert_eq!(games.extra_time_millis(), 60_000);
    }

    #[test]
    fn test_set_rules_replaces_previous() {
        let store = store_with_child();
        let games = CategoryId::new("games");
        store
            .set_rules(
                &games,
                &[
                    Rule::new("a", "games", DaysOfWeek::ALL_DAYS, 1_000),
                    Rule::new("b", "games", DaysOfWeek::WEEKENDS, 2_000),
                ],
            )
            .unwrap();
        store
            .set_rules(&games, &[Rule::new("c", "games", DaysOfWeek::WEEKDAYS, 3_000)])
            .unwrap();

        let view = store.load_category_store(&UserId::new("child"), TODAY).unwrap();
        let ids: Vec<_> = view.rules(&games).iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["c"]);
    }

    #[test]
    fn test_purge_used_times() {
        let store = store_with_child();
        let mut old = commit(&["games"], 5_000, None);
        old.day_of_epoch = TODAY - 20;
        store.commit_used_time(&old).unwrap();
        store.commit_used_time(&commit(&["games"], 5_000, None)).unwrap();

        assert_eq!(store.purge_used_times_before(TODAY - 14).unwrap(), 1);
        assert_eq!(used_today(&store, "games", TimeSlot::FULL_DAY), 5_000);
    }

    #[test]
    fn test_parent_cycle_is_rejected() {
        let store = store_with_child();
        store
            .upsert_category(&Category::new("shooter", "child", "Shooter").with_parent("games"))
            .unwrap();

        let err = store
            .upsert_category(&Category::new("games", "child", "Games").with_parent("shooter"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Model(ModelError::CategoryCycle(_))));
    }

    #[test]
    fn test_parent_of_other_user_is_rejected() {
        let store = store_with_child();
        store
            .upsert_user(&User::new("sibling", "Other", UserType::Child))
            .unwrap();

        let err = store
            .upsert_category(&Category::new("theirs", "sibling", "Theirs").with_parent("games"))
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Model(ModelError::ParentOfOtherUser { .. })
        ));
    }

    #[test]
    fn test_delete_category_cascades() {
        let store = store_with_child();
        store
            .upsert_rule(&Rule::new("r1", "games", DaysOfWeek::ALL_DAYS, 3_600_000))
            .unwrap();
        store
            .assign_app(&CategoryApp {
                category_id: CategoryId::new("games"),
                app_id: AppId::new("supertux"),
                activity: None,
            })
            .unwrap();
        store.commit_used_time(&commit(&["games"], 5_000, None)).unwrap();

        store.delete_category(&CategoryId::new("games")).unwrap();

        let view = store.load_category_store(&UserId::new("child"), TODAY).unwrap();
        assert!(view.category(&CategoryId::new("games")).is_none());
        assert!(view.rules(&CategoryId::new("games")).is_empty());
        assert!(
            view.assigned_category(&curfew_api::ForegroundApp::new("supertux"))
                .is_none()
        );
    }

    #[test]
    fn test_file_backed_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(curfew_util::DATABASE_FILENAME);
        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .upsert_user(&User::new("child", "Kid", UserType::Child))
                .unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert!(store.get_user(&UserId::new("child")).unwrap().is_some());
    }
}
