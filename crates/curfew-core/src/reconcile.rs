//! The reconciliation loop: one tick of sampling, evaluating, counting and enforcing

use curfew_api::{
    BlockingDecision, EnforcementAction, ForegroundApp, StatusKind, StatusMessage,
};
use curfew_config::{EngineConfig, Speed};
use curfew_host_api::{DeviceStatusSource, HostError, TimeSource, UsageSampler};
use curfew_store::{AuditEvent, AuditEventType, CategoryStore, Store, StoreError};
use curfew_util::{AppId, LocalTime, TimeSnapshot, Uptime, format_millis};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    AppBaseHandling, AppliedCommit, BlockingDecisionEngine, CategoryHandlingCache, CoreEvent,
    CountedUsage, StatusSnapshot, UsageAccountant, UsageStartTracker, WarningTracker,
};

/// Shortest sleep between two ticks
pub const MIN_TICK_SLEEP: Duration = Duration::from_millis(10);

/// Errors that abort a single tick
#[derive(Debug, Error)]
pub enum TickError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Host error: {0}")]
    Host(#[from] HostError),
}

/// Device inputs read during a tick
pub struct Sensors<'a> {
    pub time: &'a dyn TimeSource,
    pub usage: &'a dyn UsageSampler,
    pub device: &'a dyn DeviceStatusSource,
}

/// Everything one tick decided
#[derive(Debug, Clone)]
pub struct TickReport {
    /// Side effects to apply, in order
    pub actions: Vec<EnforcementAction>,
    pub status: StatusMessage,
    /// One decision per foreground application
    pub decisions: Vec<BlockingDecision>,
    pub events: Vec<CoreEvent>,
    /// Engine disabled or no restricted user; nothing is evaluated
    pub paused: bool,
    /// Time to sleep before the next tick
    pub sleep: Duration,
}

impl TickReport {
    fn new() -> Self {
        Self {
            actions: Vec::new(),
            status: StatusMessage::idle(),
            decisions: Vec::new(),
            events: Vec::new(),
            paused: false,
            sleep: Duration::ZERO,
        }
    }
}

/// Owns all state that lives across ticks. Only one tick runs at a time.
pub struct ReconciliationLoop {
    store: Arc<dyn Store>,
    config: EngineConfig,
    tracker: UsageStartTracker,
    accountant: UsageAccountant,
    warnings: WarningTracker,
    last_uptime: Option<Uptime>,
    last_day: Option<i64>,
    locked: BTreeMap<AppId, BlockingDecision>,
    muted: BTreeSet<AppId>,
    system_suspended: bool,
    last_error: Option<String>,
}

impl ReconciliationLoop {
    pub fn new(store: Arc<dyn Store>, config: EngineConfig) -> Self {
        info!(
            speed = ?config.speed,
            ignored_apps = config.ignored_apps.len(),
            "Reconciliation loop initialized"
        );

        Self {
            store,
            tracker: UsageStartTracker::new(config.recently_started_window),
            accountant: UsageAccountant::new(config.commit_interval),
            warnings: WarningTracker::new(),
            config,
            last_uptime: None,
            last_day: None,
            locked: BTreeMap::new(),
            muted: BTreeSet::new(),
            system_suspended: false,
            last_error: None,
        }
    }

    pub fn speed(&self) -> Speed {
        self.config.speed
    }

    /// Message of the most recent failed tick
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Applications currently locked, with the decision that locked them
    pub fn locked(&self) -> &BTreeMap<AppId, BlockingDecision> {
        &self.locked
    }

    /// Run one tick. Never fails: errors are logged, kept in the last-error
    /// slot and answered with released locks and an error status.
    pub fn tick(&mut self, sensors: &Sensors<'_>) -> TickReport {
        let snapshot = sensors.time.snapshot();
        let mut report = TickReport::new();

        match self.run(sensors, snapshot, &mut report) {
            Ok(status) => report.status = status,
            Err(e) => {
                error!(error = %e, "Tick failed");
                self.last_error = Some(e.to_string());
                report.events.push(CoreEvent::TickFailed {
                    message: e.to_string(),
                });
                report.status = StatusMessage::error();
                self.set_locks(BTreeMap::new(), &mut report);
            }
        }

        let spent = sensors.time.snapshot().uptime.saturating_since(snapshot.uptime);
        report.sleep = self
            .config
            .speed
            .tick_interval()
            .saturating_sub(spent)
            .max(MIN_TICK_SLEEP);
        report
    }

    /// Write pending usage and release all enforcement, e.g. on shutdown
    pub fn shutdown(&mut self, time: &dyn TimeSource) -> Result<Vec<EnforcementAction>, TickError> {
        let mut report = TickReport::new();
        self.pause(time.snapshot(), &mut report)?;
        info!("Reconciliation loop stopped");
        Ok(report.actions)
    }

    fn run(
        &mut self,
        sensors: &Sensors<'_>,
        snapshot: TimeSnapshot,
        report: &mut TickReport,
    ) -> Result<StatusMessage, TickError> {
        let time = snapshot.local;
        let device = self.store.load_device_state()?;

        if !device.enabled {
            self.pause(snapshot, report)?;
            return Ok(StatusMessage::disabled());
        }

        let user = match &device.current_user_id {
            Some(id) => self.store.get_user(id)?,
            None => None,
        };
        let Some(user) = user.filter(|user| user.user_type.is_restricted()) else {
            self.pause(snapshot, report)?;
            return Ok(StatusMessage::not_restricted());
        };

        self.roll_over_day(&time, report)?;

        let elapsed = self.last_uptime.map_or(Duration::ZERO, |previous| {
            snapshot
                .uptime
                .saturating_since(previous)
                .min(self.config.speed.max_backfill())
        });
        self.last_uptime = Some(snapshot.uptime);

        let categories = self
            .store
            .load_category_store(&user.id, time.first_day_of_week())?;
        let sample = match sensors.usage.sample() {
            Ok(sample) => Some(sample),
            Err(HostError::PermissionMissing(what)) => {
                debug!(permission = %what, "Usage sampling unavailable, counting everything");
                None
            }
            Err(e) => return Err(e.into()),
        };

        let status = StatusSnapshot {
            time: snapshot,
            battery: sensors.device.battery(),
        };
        let mut cache = CategoryHandlingCache::report_status(&categories, sensors.device, status);
        let engine =
            BlockingDecisionEngine::new(&categories, &device, &self.config.ignored_apps);

        let mut counted = CountedUsage::default();
        let mut locks = BTreeMap::new();
        let mut mute = BTreeSet::new();
        let mut system_level = false;

        if let Some(base) = engine.sample_handling(sample.as_ref()) {
            count_categories(&base, &mut cache, &mut counted);
            for id in base.categories() {
                system_level |= cache.get(id).is_some_and(|h| h.system_level_blocking);
            }

            // Without a sample, applications locked earlier stay locked
            // while their categories still block them
            if matches!(base, AppBaseHandling::CountEverything { .. }) {
                for app in self.locked.values().map(|d| d.app.clone()) {
                    let decision = engine.decide(&app, &engine.base_handling(&app), &mut cache);
                    if decision.is_blocked() {
                        locks.insert(app.app_id, decision);
                    }
                }
            }
        } else if let Some(sample) = &sample {
            for app in &sample.foreground {
                let base = engine.base_handling(app);
                let decision = engine.decide(app, &base, &mut cache);

                if decision.is_blocked() {
                    system_level |= is_system_level(&decision, &mut cache);
                    locks
                        .entry(app.app_id.clone())
                        .or_insert_with(|| decision.clone());
                } else {
                    count_categories(&base, &mut cache, &mut counted);
                }
                report.decisions.push(decision);
            }

            if let Some(audio) = &sample.audio {
                let app = ForegroundApp::new(audio.clone());
                let base = engine.base_handling(&app);
                let decision = engine.decide(&app, &base, &mut cache);

                if decision.is_blocked() {
                    mute.insert(audio.clone());
                } else {
                    count_categories(&base, &mut cache, &mut counted);
                }
            }
        }

        let counted_ids = counted.category_ids();
        self.tracker.report(snapshot.uptime, &counted_ids);
        let recently_started = self.tracker.recently_started(snapshot.uptime);
        let applied = self.accountant.report(
            self.store.as_ref(),
            &time,
            &counted,
            elapsed,
            &recently_started,
        )?;
        push_commit_events(applied, report);

        self.warnings.retain(|id| counted_ids.contains(id));
        for id in &counted_ids {
            if let Some(handling) = cache.get(id)
                && let Some(warning) = self.warnings.check(handling)
            {
                info!(category_id = %warning.category_id, minutes = warning.minutes, "Time warning");
                report.actions.push(EnforcementAction::Notify {
                    title: warning.title.clone(),
                    text: warning.text(),
                });
                report.events.push(CoreEvent::Warning(warning));
            }
        }

        let shown = report
            .decisions
            .iter()
            .find(|d| d.is_blocked())
            .or_else(|| locks.values().next());
        let message = if let Some(decision) = shown {
            blocked_status(decision, &categories)
        } else if sample.is_none() {
            StatusMessage::new(
                StatusKind::PermissionMissing,
                "curfew",
                "Usage access is missing, all categories are counted",
            )
        } else if counted.is_empty() {
            StatusMessage::idle()
        } else {
            let tightest = counted_ids
                .iter()
                .filter_map(|id| cache.get(id).map(|h| (h.time_left(), h.clone())))
                .min_by_key(|(left, _)| left.unwrap_or(i64::MAX));
            match tightest {
                Some((Some(left), handling)) => StatusMessage::new(
                    StatusKind::Running,
                    handling.title,
                    format!("{} left", format_millis(left)),
                )
                .for_category(handling.category_id),
                Some((None, handling)) => {
                    StatusMessage::new(StatusKind::Running, handling.title, "No time limit")
                        .for_category(handling.category_id)
                }
                None => StatusMessage::idle(),
            }
        };

        self.set_locks(locks, report);
        self.set_muted(mute, report);
        self.set_system_suspended(system_level, report);

        Ok(message)
    }

    /// Stop counting and release every enforcement until the engine runs again
    fn pause(&mut self, snapshot: TimeSnapshot, report: &mut TickReport) -> Result<(), TickError> {
        report.paused = true;

        let recently_started = self.tracker.recently_started(snapshot.uptime);
        let applied = self
            .accountant
            .flush(self.store.as_ref(), &snapshot.local, &recently_started)?;
        push_commit_events(applied, report);

        self.tracker.clear();
        self.warnings.clear();
        self.last_uptime = None;

        self.set_locks(BTreeMap::new(), report);
        self.set_muted(BTreeSet::new(), report);
        self.set_system_suspended(false, report);
        Ok(())
    }

    /// Purge used time that left the retention window once per day
    fn roll_over_day(&mut self, time: &LocalTime, report: &mut TickReport) -> Result<(), TickError> {
        if self.last_day == Some(time.day_of_epoch) {
            return Ok(());
        }

        if self.last_day.is_some() {
            info!(day = time.day_of_epoch, "Day changed");
            report.events.push(CoreEvent::DayChanged {
                day_of_epoch: time.day_of_epoch,
            });
        }

        let before_day = time.day_of_epoch + 1 - self.config.used_time_retention_days as i64;
        let rows = self.store.purge_used_times_before(before_day)?;
        if rows > 0 {
            let _ = self
                .store
                .append_audit(AuditEvent::new(AuditEventType::UsedTimePurged {
                    before_day,
                    rows,
                }));
            report
                .events
                .push(CoreEvent::UsedTimePurged { before_day, rows });
        }

        self.last_day = Some(time.day_of_epoch);
        Ok(())
    }

    /// Lock newly blocked applications, relock those whose decision changed
    /// and release the rest
    fn set_locks(&mut self, locks: BTreeMap<AppId, BlockingDecision>, report: &mut TickReport) {
        for (app_id, decision) in &locks {
            if self.locked.get(app_id) == Some(decision) {
                continue;
            }
            info!(
                app_id = %app_id,
                reason = ?decision.reason,
                category_id = ?decision.category_id,
                "Locking"
            );
            report.actions.push(EnforcementAction::Lock {
                decision: decision.clone(),
            });
            self.lock_changed(app_id, Some(decision), report);
        }

        let released: Vec<AppId> = self
            .locked
            .keys()
            .filter(|app_id| !locks.contains_key(*app_id))
            .cloned()
            .collect();
        for app_id in released {
            info!(app_id = %app_id, "Unlocking");
            report.actions.push(EnforcementAction::Unlock {
                app_id: app_id.clone(),
            });
            self.lock_changed(&app_id, None, report);
        }

        self.locked = locks;
    }

    fn lock_changed(
        &self,
        app_id: &AppId,
        decision: Option<&BlockingDecision>,
        report: &mut TickReport,
    ) {
        let _ = self
            .store
            .append_audit(AuditEvent::new(AuditEventType::LockChanged {
                locked: decision.is_some(),
                app_id: app_id.clone(),
                reason: decision.and_then(|d| d.reason),
                category_id: decision.and_then(|d| d.category_id.clone()),
            }));
        report.events.push(CoreEvent::LockChanged {
            app_id: app_id.clone(),
            decision: decision.cloned(),
        });
    }

    fn set_muted(&mut self, muted: BTreeSet<AppId>, report: &mut TickReport) {
        for app_id in muted.difference(&self.muted) {
            debug!(app_id = %app_id, "Muting blocked audio");
            report.actions.push(EnforcementAction::Mute {
                app_id: app_id.clone(),
            });
        }
        for app_id in self.muted.difference(&muted) {
            report.actions.push(EnforcementAction::Unmute {
                app_id: app_id.clone(),
            });
        }
        self.muted = muted;
    }

    fn set_system_suspended(&mut self, suspended: bool, report: &mut TickReport) {
        if suspended != self.system_suspended {
            warn!(suspended, "System level blocking changed");
            report
                .actions
                .push(EnforcementAction::SetSystemSuspension { suspended });
            self.system_suspended = suspended;
        }
    }
}

fn count_categories(
    base: &AppBaseHandling,
    cache: &mut CategoryHandlingCache<'_>,
    counted: &mut CountedUsage,
) {
    for id in base.categories() {
        if let Some(handling) = cache.get(id)
            && handling.should_count_time
        {
            counted.add(handling);
        }
    }
}

fn is_system_level(decision: &BlockingDecision, cache: &mut CategoryHandlingCache<'_>) -> bool {
    decision
        .category_id
        .as_ref()
        .and_then(|id| cache.get(id))
        .is_some_and(|handling| handling.system_level_blocking)
}

fn blocked_status(decision: &BlockingDecision, categories: &CategoryStore) -> StatusMessage {
    let reason = decision
        .reason
        .map_or("blocked", |reason| reason.description());
    match decision
        .category_id
        .as_ref()
        .and_then(|id| categories.category(id))
    {
        Some(category) => StatusMessage::new(
            StatusKind::Blocked,
            category.title.clone(),
            format!("{} is blocked: {}", decision.app.app_id, reason),
        )
        .for_category(category.id.clone()),
        None => StatusMessage::new(
            StatusKind::Blocked,
            decision.app.app_id.to_string(),
            format!("{} is blocked: {}", decision.app.app_id, reason),
        ),
    }
}

fn push_commit_events(applied: Vec<AppliedCommit>, report: &mut TickReport) {
    for AppliedCommit { commit, outcome } in applied {
        for category_id in outcome.dropped {
            report.events.push(CoreEvent::CategoryDropped {
                commit_id: commit.id,
                category_id,
            });
        }
        report.events.push(CoreEvent::UsedTimeCommitted {
            commit_id: commit.id,
            categories: commit.items.into_iter().map(|i| i.category_id).collect(),
            time_to_add_millis: commit.time_to_add_millis,
            with_timestamp: commit.trusted_timestamp.is_some(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::child;
    use curfew_api::{BlockingReason, UserType};
    use curfew_host_api::MockHost;
    use curfew_store::{
        Category, CategoryApp, CommitItem, Rule, SqliteStore, TimeSlot, UsedTimeCommit, User,
    };
    use curfew_util::{CategoryId, CommitId, DaysOfWeek, MILLIS_PER_DAY, UserId};

    const TICK: Duration = Duration::from_millis(100);

    fn setup() -> (Arc<SqliteStore>, MockHost) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        store.upsert_user(&child()).unwrap();
        store.set_current_user(Some(&UserId::new("kid"))).unwrap();
        store
            .upsert_category(&Category::new("games", "kid", "Games"))
            .unwrap();
        for app in ["supertuxkart", "spotify"] {
            store
                .assign_app(&CategoryApp {
                    category_id: "games".into(),
                    app_id: app.into(),
                    activity: None,
                })
                .unwrap();
        }
        (store, MockHost::new())
    }

    fn sensors(host: &MockHost) -> Sensors<'_> {
        Sensors {
            time: host,
            usage: host,
            device: host,
        }
    }

    fn block_games(store: &SqliteStore) {
        let mut games = Category::new("games", "kid", "Games");
        games.temporarily_blocked = true;
        store.upsert_category(&games).unwrap();
    }

    fn used_today(store: &SqliteStore, host: &MockHost) -> i64 {
        let time = host.snapshot().local;
        store
            .load_category_store(&UserId::new("kid"), time.first_day_of_week())
            .unwrap()
            .used_time_by_day_of_week(&CategoryId::new("games"), TimeSlot::FULL_DAY)
            [time.day_of_week as usize]
    }

    #[test]
    fn disabled_engine_pauses() {
        let (store, host) = setup();
        store.set_enabled(false).unwrap();
        let mut engine = ReconciliationLoop::new(store, EngineConfig::default());

        let report = engine.tick(&sensors(&host));
        assert!(report.paused);
        assert_eq!(report.status.kind, StatusKind::Disabled);
        assert!(report.actions.is_empty());
        assert_eq!(report.sleep, TICK);
    }

    #[test]
    fn parent_user_is_not_restricted() {
        let (store, host) = setup();
        store
            .upsert_user(&User::new("mum", "Mum", UserType::Parent))
            .unwrap();
        store.set_current_user(Some(&UserId::new("mum"))).unwrap();
        let mut engine = ReconciliationLoop::new(store, EngineConfig::default());

        let report = engine.tick(&sensors(&host));
        assert!(report.paused);
        assert_eq!(report.status.kind, StatusKind::NotRestricted);
    }

    #[test]
    fn blocked_app_locks_once_and_unlocks() {
        let (store, host) = setup();
        block_games(&store);
        let mut engine = ReconciliationLoop::new(store, EngineConfig::default());
        host.set_foreground(vec![ForegroundApp::new("supertuxkart")]);

        let report = engine.tick(&sensors(&host));
        assert_eq!(report.decisions[0].reason, Some(BlockingReason::TemporarilyBlocked));
        assert!(matches!(report.actions[..], [EnforcementAction::Lock { .. }]));
        assert_eq!(report.status.kind, StatusKind::Blocked);
        assert_eq!(report.status.title, "Games");

        host.advance(TICK);
        assert!(engine.tick(&sensors(&host)).actions.is_empty());

        host.set_foreground(vec![ForegroundApp::new("curfew-settings")]);
        host.advance(TICK);
        let report = engine.tick(&sensors(&host));
        assert_eq!(report.decisions[0].reason, Some(BlockingReason::NotPartOfAnCategory));
        assert!(matches!(
            &report.actions[..],
            [EnforcementAction::Lock { decision }, EnforcementAction::Unlock { app_id }]
                if decision.app.app_id.as_str() == "curfew-settings"
                    && app_id.as_str() == "supertuxkart"
        ));

        host.set_foreground(vec![]);
        host.advance(TICK);
        let report = engine.tick(&sensors(&host));
        assert_eq!(
            report.actions,
            vec![EnforcementAction::Unlock {
                app_id: AppId::new("curfew-settings")
            }]
        );
        assert_eq!(report.status.kind, StatusKind::Idle);
        assert!(engine.locked().is_empty());
    }

    #[test]
    fn every_blocked_app_is_locked() {
        let (store, host) = setup();
        block_games(&store);
        let mut engine = ReconciliationLoop::new(store, EngineConfig::default());
        host.set_foreground(vec![
            ForegroundApp::new("supertuxkart"),
            ForegroundApp::new("spotify"),
        ]);

        let report = engine.tick(&sensors(&host));
        let locked: Vec<_> = report
            .actions
            .iter()
            .filter_map(|a| match a {
                EnforcementAction::Lock { decision } => Some(decision.app.app_id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(locked, vec!["spotify", "supertuxkart"]);
        assert_eq!(engine.locked().len(), 2);
        assert_eq!(report.status.text, "supertuxkart is blocked: temporarily blocked");

        host.advance(TICK);
        assert!(engine.tick(&sensors(&host)).actions.is_empty());

        host.set_foreground(vec![ForegroundApp::new("spotify")]);
        host.advance(TICK);
        let report = engine.tick(&sensors(&host));
        assert_eq!(
            report.actions,
            vec![EnforcementAction::Unlock {
                app_id: AppId::new("supertuxkart")
            }]
        );
        assert!(report.events.contains(&CoreEvent::LockChanged {
            app_id: AppId::new("supertuxkart"),
            decision: None,
        }));
        assert!(engine.locked().contains_key(&AppId::new("spotify")));
    }

    #[test]
    fn locks_survive_missing_usage_access() {
        let (store, host) = setup();
        block_games(&store);
        let mut engine = ReconciliationLoop::new(store.clone(), EngineConfig::default());
        host.set_foreground(vec![ForegroundApp::new("supertuxkart")]);
        engine.tick(&sensors(&host));

        host.revoke_usage_access();
        for _ in 0..10 {
            host.advance(TICK);
            let report = engine.tick(&sensors(&host));
            assert!(report.actions.is_empty());
            assert_eq!(report.status.kind, StatusKind::Blocked);
        }
        assert!(engine.locked().contains_key(&AppId::new("supertuxkart")));

        // Lifting the block releases the app even without a sample
        store
            .upsert_category(&Category::new("games", "kid", "Games"))
            .unwrap();
        host.advance(TICK);
        let report = engine.tick(&sensors(&host));
        assert_eq!(
            report.actions,
            vec![EnforcementAction::Unlock {
                app_id: AppId::new("supertuxkart")
            }]
        );
        assert_eq!(report.status.kind, StatusKind::PermissionMissing);
    }

    #[test]
    fn usage_is_counted_until_time_over() {
        let (store, host) = setup();
        store
            .set_rules(
                &CategoryId::new("games"),
                &[Rule::new("minute", "games", DaysOfWeek::ALL_DAYS, 60_000)],
            )
            .unwrap();
        let mut engine = ReconciliationLoop::new(store.clone(), EngineConfig::default());
        host.set_foreground(vec![ForegroundApp::new("supertuxkart")]);

        let mut locks = 0;
        let mut commits = 0;
        for i in 0..=601 {
            if i > 0 {
                host.advance(TICK);
            }
            let report = engine.tick(&sensors(&host));
            locks += report
                .actions
                .iter()
                .filter(|a| matches!(a, EnforcementAction::Lock { .. }))
                .count();
            commits += report
                .events
                .iter()
                .filter(|e| matches!(e, CoreEvent::UsedTimeCommitted { .. }))
                .count();
            if i == 100 {
                assert_eq!(report.status.kind, StatusKind::Running);
                assert_eq!(report.status.text, "1m 0s left");
            }
        }

        assert_eq!(commits, 2);
        assert_eq!(locks, 1);
        assert_eq!(used_today(&store, &host), 60_000);
        assert_eq!(
            engine
                .locked()
                .get(&AppId::new("supertuxkart"))
                .and_then(|d| d.reason),
            Some(BlockingReason::TimeOver)
        );
    }

    #[test]
    fn session_limit_skips_recently_started_usage() {
        let (store, host) = setup();
        store
            .set_rules(
                &CategoryId::new("games"),
                &[Rule::new("session", "games", DaysOfWeek::ALL_DAYS, MILLIS_PER_DAY)
                    .with_session_limit(3_000, 30_000)],
            )
            .unwrap();
        let mut engine = ReconciliationLoop::new(store.clone(), EngineConfig::default());
        host.set_foreground(vec![ForegroundApp::new("supertuxkart")]);

        let mut commits = Vec::new();
        let mut limited_at = None;
        for i in 0..=100 {
            if i > 0 {
                host.advance(TICK);
            }
            let report = engine.tick(&sensors(&host));
            commits.extend(report.events.into_iter().filter_map(|e| match e {
                CoreEvent::UsedTimeCommitted {
                    time_to_add_millis,
                    with_timestamp,
                    ..
                } => Some((time_to_add_millis, with_timestamp)),
                _ => None,
            }));
            if report.decisions[0].reason == Some(BlockingReason::SessionDurationLimit) {
                assert!(matches!(report.actions[..], [EnforcementAction::Lock { .. }]));
                limited_at = Some(i);
                break;
            }
        }

        // The first commit falls inside the start window and leaves the
        // session untouched, so the limit is reached one session later
        assert_eq!(commits, vec![(3_000, false), (3_000, true)]);
        assert_eq!(limited_at, Some(61));
        assert_eq!(used_today(&store, &host), 6_000);
    }

    #[test]
    fn elapsed_time_is_clamped() {
        let (store, host) = setup();
        let mut engine = ReconciliationLoop::new(store.clone(), EngineConfig::default());
        host.set_foreground(vec![ForegroundApp::new("supertuxkart")]);

        engine.tick(&sensors(&host));
        host.advance(Duration::from_secs(600));
        engine.tick(&sensors(&host));
        engine.shutdown(&host).unwrap();

        assert_eq!(used_today(&store, &host), 1_000);
    }

    #[test]
    fn time_warning_is_notified() {
        let (store, host) = setup();
        store
            .upsert_category(&Category::new("games", "kid", "Games").with_time_warnings([1]))
            .unwrap();
        store
            .set_rules(
                &CategoryId::new("games"),
                &[Rule::new("two", "games", DaysOfWeek::ALL_DAYS, 120_000)],
            )
            .unwrap();
        let mut engine = ReconciliationLoop::new(store, EngineConfig::default());
        host.set_foreground(vec![ForegroundApp::new("supertuxkart")]);

        let mut notifications = Vec::new();
        for i in 0..=601 {
            if i > 0 {
                host.advance(TICK);
            }
            notifications.extend(
                engine
                    .tick(&sensors(&host))
                    .actions
                    .into_iter()
                    .filter(|a| matches!(a, EnforcementAction::Notify { .. })),
            );
        }

        assert_eq!(
            notifications,
            vec![EnforcementAction::Notify {
                title: "Games".into(),
                text: "Games: 1 minute left".into(),
            }]
        );
    }

    #[test]
    fn missing_usage_access_counts_everything() {
        let (store, host) = setup();
        let mut engine = ReconciliationLoop::new(store.clone(), EngineConfig::default());
        host.revoke_usage_access();

        for i in 0..=300 {
            if i > 0 {
                host.advance(TICK);
            }
            let report = engine.tick(&sensors(&host));
            assert_eq!(report.status.kind, StatusKind::PermissionMissing);
        }

        assert_eq!(used_today(&store, &host), 30_000);
    }

    #[test]
    fn blocked_audio_is_muted() {
        let (store, host) = setup();
        block_games(&store);
        let mut engine = ReconciliationLoop::new(store, EngineConfig::default());

        host.set_audio(Some(AppId::new("spotify")));
        let report = engine.tick(&sensors(&host));
        assert_eq!(
            report.actions,
            vec![EnforcementAction::Mute {
                app_id: AppId::new("spotify")
            }]
        );

        host.set_audio(None);
        host.advance(TICK);
        let report = engine.tick(&sensors(&host));
        assert_eq!(
            report.actions,
            vec![EnforcementAction::Unmute {
                app_id: AppId::new("spotify")
            }]
        );
    }

    #[test]
    fn failed_tick_clears_overlay_only() {
        let (store, host) = setup();
        block_games(&store);
        let mut engine = ReconciliationLoop::new(store, EngineConfig::default());
        host.set_foreground(vec![ForegroundApp::new("supertuxkart")]);
        engine.tick(&sensors(&host));
        assert!(!engine.locked().is_empty());

        *host.fail_sample.lock().unwrap() = true;
        host.advance(TICK);
        let report = engine.tick(&sensors(&host));
        assert_eq!(
            report.actions,
            vec![EnforcementAction::Unlock {
                app_id: AppId::new("supertuxkart")
            }]
        );
        assert_eq!(report.status, StatusMessage::error());
        assert!(engine.last_error().is_some());
        assert_eq!(report.sleep, TICK);

        *host.fail_sample.lock().unwrap() = false;
        host.advance(TICK);
        let report = engine.tick(&sensors(&host));
        assert!(matches!(report.actions[..], [EnforcementAction::Lock { .. }]));
    }

    #[test]
    fn first_tick_purges_expired_used_time() {
        let (store, host) = setup();
        let today = host.snapshot().local.day_of_epoch;
        store
            .commit_used_time(&UsedTimeCommit {
                id: CommitId::new(),
                day_of_epoch: today - 30,
                time_to_add_millis: 1_000,
                trusted_timestamp: None,
                items: vec![CommitItem {
                    category_id: CategoryId::new("games"),
                    consume_extra_time: false,
                    additional_slots: BTreeSet::new(),
                    session_slots: BTreeSet::new(),
                }],
            })
            .unwrap();
        let mut engine = ReconciliationLoop::new(store, EngineConfig::default());

        let report = engine.tick(&sensors(&host));
        assert!(report.events.contains(&CoreEvent::UsedTimePurged {
            before_day: today - 13,
            rows: 1
        }));

        host.advance(Duration::from_secs(24 * 3600));
        let report = engine.tick(&sensors(&host));
        assert!(report.events.contains(&CoreEvent::DayChanged {
            day_of_epoch: today + 1
        }));
    }

    #[test]
    fn slow_speed_sleeps_longer() {
        let (store, host) = setup();
        let config = EngineConfig {
            speed: Speed::Slow,
            ..EngineConfig::default()
        };
        let mut engine = ReconciliationLoop::new(store, config);

        assert_eq!(engine.tick(&sensors(&host)).sleep, Duration::from_secs(1));
    }
}
