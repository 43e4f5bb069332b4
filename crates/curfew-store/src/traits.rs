//! Store trait definitions

use curfew_util::{AppId, CategoryId, RuleId, UserId};

use crate::{
    AuditEvent, Category, CategoryApp, CategoryStore, CommitOutcome, DeviceState, Rule,
    StoreResult, UsedTimeCommit, User,
};

/// Main store trait
pub trait Store: Send + Sync {
    // Audit log

    /// Append an audit event
    fn append_audit(&self, event: AuditEvent) -> StoreResult<()>;

    /// Get recent audit events
    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>>;

    // Device and users

    /// Load the device-wide state; a fresh store is enabled with no user
    fn load_device_state(&self) -> StoreResult<DeviceState>;

    fn set_enabled(&self, enabled: bool) -> StoreResult<()>;

    fn set_current_user(&self, user_id: Option<&UserId>) -> StoreResult<()>;

    fn set_temporarily_allowed(&self, app_id: &AppId, allowed: bool) -> StoreResult<()>;

    fn get_user(&self, user_id: &UserId) -> StoreResult<Option<User>>;

    fn upsert_user(&self, user: &User) -> StoreResult<()>;

    // Categories and rules

    /// Insert or replace a category. Fails if the parent chain would form a
    /// cycle, cross users or exceed the maximum depth. The extra time of an
    /// existing category is kept; use `set_extra_time` to change it.
    fn upsert_category(&self, category: &Category) -> StoreResult<()>;

    /// Delete a category with its rules, app assignments and used time.
    /// Child categories become roots.
    fn delete_category(&self, category_id: &CategoryId) -> StoreResult<()>;

    fn set_extra_time(&self, category_id: &CategoryId, millis: u64) -> StoreResult<()>;

    fn upsert_rule(&self, rule: &Rule) -> StoreResult<()>;

    fn delete_rule(&self, rule_id: &RuleId) -> StoreResult<()>;

    /// Replace all rules of a category in one transaction
    fn set_rules(&self, category_id: &CategoryId, rules: &[Rule]) -> StoreResult<()>;

    /// Assign an app (or one activity) to a category, replacing any previous
    /// assignment for the same user
    fn assign_app(&self, app: &CategoryApp) -> StoreResult<()>;

    fn unassign_app(
        &self,
        user_id: &UserId,
        app_id: &AppId,
        activity: Option<&str>,
    ) -> StoreResult<()>;

    // Per-tick view

    /// Read everything the engine needs for one user in one tick. Used time
    /// is loaded for the week starting at `first_day_of_week`.
    fn load_category_store(
        &self,
        user_id: &UserId,
        first_day_of_week: i64,
    ) -> StoreResult<CategoryStore>;

    // Usage accounting

    /// Apply a used-time commit in one transaction. Categories that no longer
    /// exist are skipped and reported in the outcome.
    fn commit_used_time(&self, commit: &UsedTimeCommit) -> StoreResult<CommitOutcome>;

    /// Delete used time of days before `day_of_epoch`, returning the row count
    fn purge_used_times_before(&self, day_of_epoch: i64) -> StoreResult<usize>;

    // Health

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}
