//! Integration tests for curfewd
//!
//! These tests drive the reconciliation loop end to end: a seeded store,
//! mock collaborators, and enforcement applied through the mock enforcer.

use curfew_api::{
    BatteryStatus, BlockingReason, EnforcementAction, ForegroundApp, NetworkId, StatusKind,
};
use curfew_config::parse_config;
use curfew_core::{ReconciliationLoop, Sensors, TickReport};
use curfew_host_api::{Enforcer, MockHost, TimeSource};
use curfew_store::{SqliteStore, Store, TimeSlot};
use curfew_util::{AppId, CategoryId, UserId};
use std::sync::Arc;
use std::time::Duration;

const TICK: Duration = Duration::from_millis(100);

const ENGINE_CONFIG: &str = r#"
    config_version = 1

    [engine]
    ignored_apps = ["curfew-overlay"]
"#;

const KID: &str = r#"
    [[users]]
    id = "kid"
    name = "Kid"
    type = "child"
    current = true
"#;

struct Harness {
    store: Arc<SqliteStore>,
    host: MockHost,
    engine: ReconciliationLoop,
    ticks: usize,
}

impl Harness {
    /// Seed the `kid` user plus `categories`
    fn new(categories: &str) -> Self {
        Self::with_policy(&format!("{}\n{}", KID, categories))
    }

    fn with_policy(policy: &str) -> Self {
        let settings = parse_config(&format!("{}\n{}", ENGINE_CONFIG, policy)).unwrap();
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        settings.policy.apply(store.as_ref()).unwrap();

        let engine = ReconciliationLoop::new(store.clone(), settings.engine.clone());
        Self {
            store,
            host: MockHost::new(),
            engine,
            ticks: 0,
        }
    }

    /// Advance one tick interval (except before the first tick), run the
    /// loop and apply its side effects
    async fn tick(&mut self) -> TickReport {
        if self.ticks > 0 {
            self.host.advance(TICK);
        }
        self.ticks += 1;

        let report = self.engine.tick(&Sensors {
            time: &self.host,
            usage: &self.host,
            device: &self.host,
        });
        for action in &report.actions {
            self.host.apply(action).await.unwrap();
        }
        self.host.publish_status(&report.status).await.unwrap();
        report
    }

    async fn run(&mut self, ticks: usize) -> TickReport {
        let mut last = None;
        for _ in 0..ticks {
            last = Some(self.tick().await);
        }
        last.unwrap()
    }

    fn used_today(&self, category: &str) -> i64 {
        let time = self.host.snapshot().local;
        self.store
            .load_category_store(&UserId::new("kid"), time.first_day_of_week())
            .unwrap()
            .used_time_by_day_of_week(&CategoryId::new(category), TimeSlot::FULL_DAY)
            [time.day_of_week as usize]
    }

    fn extra_time(&self, category: &str) -> u64 {
        let time = self.host.snapshot().local;
        self.store
            .load_category_store(&UserId::new("kid"), time.first_day_of_week())
            .unwrap()
            .category(&CategoryId::new(category))
            .unwrap()
            .extra_time_millis()
    }

    fn locks(actions: &[EnforcementAction]) -> usize {
        actions
            .iter()
            .filter(|a| matches!(a, EnforcementAction::Lock { .. }))
            .count()
    }
}

const ONE_MINUTE_GAMES: &str = r#"
    [[categories]]
    id = "games"
    user = "kid"
    title = "Games"
    apps = ["supertuxkart"]
    warnings_minutes = []

    [[categories.rules]]
    days = "all"
    max_minutes = 1
"#;

#[tokio::test]
async fn quota_is_counted_then_enforced() {
    let mut h = Harness::new(ONE_MINUTE_GAMES);
    h.host.set_foreground(vec![ForegroundApp::new("supertuxkart")]);

    let report = h.run(101).await;
    assert_eq!(report.status.kind, StatusKind::Running);
    assert_eq!(report.status.text, "1m 0s left");

    let report = h.run(501).await;
    assert_eq!(report.decisions[0].reason, Some(BlockingReason::TimeOver));
    assert_eq!(h.used_today("games"), 60_000);

    let actions = h.host.take_actions();
    assert_eq!(Harness::locks(&actions), 1);
    assert_eq!(h.host.last_status().unwrap().kind, StatusKind::Blocked);

    // Leaving the app removes the overlay
    h.host.set_foreground(vec![]);
    h.tick().await;
    assert_eq!(
        h.host.take_actions(),
        vec![EnforcementAction::Unlock {
            app_id: AppId::new("supertuxkart")
        }]
    );
    assert_eq!(h.used_today("games"), 60_000);
}

#[tokio::test]
async fn blocked_apps_stay_locked_without_usage_access() {
    let mut h = Harness::new(ONE_MINUTE_GAMES);
    h.host.set_foreground(vec![ForegroundApp::new("supertuxkart")]);
    h.run(602).await;
    assert_eq!(Harness::locks(&h.host.take_actions()), 1);

    h.host.revoke_usage_access();
    let report = h.run(50).await;
    assert!(h.host.take_actions().is_empty());
    assert_eq!(report.status.kind, StatusKind::Blocked);
    assert_eq!(h.used_today("games"), 60_000);
}

#[tokio::test]
async fn extra_time_is_spent_after_the_quota() {
    let mut h = Harness::new(
        r#"
        [[categories]]
        id = "games"
        user = "kid"
        title = "Games"
        apps = ["supertuxkart"]
        warnings_minutes = []
        extra_time_minutes = 1

        [[categories.rules]]
        days = "all"
        max_minutes = 1
        "#,
    );
    h.host.set_foreground(vec![ForegroundApp::new("supertuxkart")]);

    let report = h.run(601).await;
    assert_eq!(h.used_today("games"), 60_000);
    assert_eq!(report.decisions[0].reason, None);

    let report = h.run(601).await;
    assert_eq!(h.used_today("games"), 120_000);
    assert_eq!(h.extra_time("games"), 0);
    assert_eq!(report.decisions[0].reason, Some(BlockingReason::TimeOver));
    assert_eq!(Harness::locks(&h.host.take_actions()), 1);
}

#[tokio::test]
async fn blocked_parent_blocks_child_apps() {
    let mut h = Harness::new(
        r#"
        [[categories]]
        id = "other"
        user = "kid"
        title = "Other"

        [[categories.blocked]]
        days = "all"
        start = "00:00"
        end = "24:00"

        [[categories]]
        id = "games"
        user = "kid"
        title = "Games"
        parent = "other"
        apps = ["supertuxkart"]
        "#,
    );
    h.host.set_foreground(vec![ForegroundApp::new("supertuxkart")]);

    let report = h.tick().await;
    let decision = &report.decisions[0];
    assert_eq!(decision.reason, Some(BlockingReason::BlockedAtThisTime));
    assert_eq!(decision.category_id, Some(CategoryId::new("other")));
    assert_eq!(report.status.title, "Other");
    assert!(
        !report
            .actions
            .contains(&EnforcementAction::SetSystemSuspension { suspended: true })
    );
}

#[tokio::test]
async fn default_category_blocking_is_system_level() {
    let mut h = Harness::with_policy(
        r#"
        [[users]]
        id = "teen"
        name = "Teen"
        type = "child"
        default_category = "evening"
        current = true

        [[categories]]
        id = "evening"
        user = "teen"
        title = "Evening"

        [[categories.blocked]]
        days = "all"
        start = "00:00"
        end = "24:00"
        "#,
    );
    h.host.set_foreground(vec![ForegroundApp::new("firefox")]);

    let report = h.tick().await;
    assert_eq!(report.decisions[0].category_id, Some(CategoryId::new("evening")));
    assert!(
        report
            .actions
            .contains(&EnforcementAction::SetSystemSuspension { suspended: true })
    );
}

#[tokio::test]
async fn battery_and_network_requirements() {
    let mut h = Harness::new(
        r#"
        [[categories]]
        id = "games"
        user = "kid"
        title = "Games"
        apps = ["supertuxkart"]
        min_battery_mobile = 20
        networks = ["home"]
        "#,
    );
    h.host.set_foreground(vec![ForegroundApp::new("supertuxkart")]);
    h.host.set_network(Some(NetworkId::new("home")));

    assert_eq!(h.tick().await.decisions[0].reason, None);

    h.host.set_network(Some(NetworkId::new("school")));
    assert_eq!(
        h.tick().await.decisions[0].reason,
        Some(BlockingReason::RequiredNetworkMissing)
    );

    h.host.set_network(Some(NetworkId::new("home")));
    h.host.set_battery(BatteryStatus::new(10, false));
    assert_eq!(
        h.tick().await.decisions[0].reason,
        Some(BlockingReason::BatteryLimit)
    );

    h.host.set_battery(BatteryStatus::new(10, true));
    assert_eq!(h.tick().await.decisions[0].reason, None);
}

#[tokio::test]
async fn unassigned_and_ignored_apps() {
    let mut h = Harness::new(ONE_MINUTE_GAMES);

    h.host.set_foreground(vec![ForegroundApp::new("curfew-overlay")]);
    let report = h.tick().await;
    assert_eq!(report.decisions[0].reason, None);
    assert_eq!(report.status.kind, StatusKind::Idle);

    h.host.set_foreground(vec![ForegroundApp::new("minetest")]);
    let report = h.tick().await;
    assert_eq!(
        report.decisions[0].reason,
        Some(BlockingReason::NotPartOfAnCategory)
    );
    assert!(report.decisions[0].block_notifications);
}

#[tokio::test]
async fn disabling_releases_enforcement_and_keeps_usage() {
    let mut h = Harness::new(ONE_MINUTE_GAMES);
    h.host.set_foreground(vec![ForegroundApp::new("supertuxkart")]);
    h.run(51).await;

    h.store.set_enabled(false).unwrap();
    let report = h.tick().await;
    assert!(report.paused);
    assert_eq!(report.status.kind, StatusKind::Disabled);
    assert_eq!(h.used_today("games"), 5_000);

    // Nothing is counted while disabled
    h.run(100).await;
    assert_eq!(h.used_today("games"), 5_000);

    h.store.set_enabled(true).unwrap();
    let report = h.tick().await;
    assert!(!report.paused);
    assert_eq!(report.status.kind, StatusKind::Running);
}

#[tokio::test]
async fn usage_survives_restart() {
    let mut h = Harness::new(ONE_MINUTE_GAMES);
    h.host.set_foreground(vec![ForegroundApp::new("supertuxkart")]);
    h.run(201).await;

    let actions = h.engine.shutdown(&h.host).unwrap();
    assert!(actions.is_empty());
    assert_eq!(h.used_today("games"), 20_000);

    let store: Arc<dyn Store> = h.store.clone();
    h.engine = ReconciliationLoop::new(store, Default::default());
    h.host.advance(Duration::from_secs(60));
    let report = h.engine.tick(&Sensors {
        time: &h.host,
        usage: &h.host,
        device: &h.host,
    });
    assert_eq!(report.status.text, "40s left");
}

#[test]
fn config_file_is_loaded_and_validated() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("config.toml");

    std::fs::write(&path, format!("{}\n{}\n{}", ENGINE_CONFIG, KID, ONE_MINUTE_GAMES)).unwrap();
    let settings = curfew_config::load_config(&path).unwrap();
    assert_eq!(settings.policy.categories.len(), 1);

    // Unknown parents are rejected
    std::fs::write(
        &path,
        format!(
            "{}\n{}\n{}",
            ENGINE_CONFIG,
            KID,
            ONE_MINUTE_GAMES.replace("apps =", "parent = \"missing\"\n    apps =")
        ),
    )
    .unwrap();
    assert!(curfew_config::load_config(&path).is_err());
}
