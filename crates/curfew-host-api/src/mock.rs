//! Mock collaborators for testing

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, TimeZone};
use curfew_api::{
    BatteryStatus, EnforcementAction, ForegroundApp, NetworkId, PermissionStatus, StatusMessage,
};
use curfew_util::{AppId, TimeSnapshot, Uptime};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::{
    DeviceStatusSource, Enforcer, HostError, HostResult, PermissionProbe, TimeSource,
    UsageSample, UsageSampler,
};

/// Mock host implementing every collaborator trait, for unit and
/// integration testing
pub struct MockHost {
    wall: Mutex<DateTime<FixedOffset>>,
    uptime: Mutex<Uptime>,
    /// `None` simulates a revoked usage permission
    foreground: Mutex<Option<Vec<ForegroundApp>>>,
    audio: Mutex<Option<AppId>>,
    battery: Mutex<BatteryStatus>,
    network: Mutex<Option<NetworkId>>,
    network_queries: AtomicUsize,
    permissions: Mutex<PermissionStatus>,
    /// Reads returned before falling back to `permissions`
    permission_reads: Mutex<VecDeque<PermissionStatus>>,
    actions: Mutex<Vec<EnforcementAction>>,
    statuses: Mutex<Vec<StatusMessage>>,

    /// Configure sampling to fail with an error other than a missing permission
    pub fail_sample: Mutex<bool>,

    /// Configure enforcement to fail
    pub fail_enforce: Mutex<bool>,
}

impl MockHost {
    /// Mock host at 2025-01-06 12:00 UTC (a Monday) with nothing running
    pub fn new() -> Self {
        let utc = FixedOffset::east_opt(0).unwrap();
        Self::at(utc.with_ymd_and_hms(2025, 1, 6, 12, 0, 0).unwrap())
    }

    pub fn at(wall: DateTime<FixedOffset>) -> Self {
        Self {
            wall: Mutex::new(wall),
            uptime: Mutex::new(Uptime::from_millis(60_000)),
            foreground: Mutex::new(Some(Vec::new())),
            audio: Mutex::new(None),
            battery: Mutex::new(BatteryStatus::mains_powered()),
            network: Mutex::new(None),
            network_queries: AtomicUsize::new(0),
            permissions: Mutex::new(PermissionStatus::all()),
            permission_reads: Mutex::new(VecDeque::new()),
            actions: Mutex::new(Vec::new()),
            statuses: Mutex::new(Vec::new()),
            fail_sample: Mutex::new(false),
            fail_enforce: Mutex::new(false),
        }
    }

    pub fn set_time(&self, wall: DateTime<FixedOffset>) {
        *self.wall.lock().unwrap() = wall;
    }

    /// Advance wall clock and uptime together
    pub fn advance(&self, by: Duration) {
        let mut wall = self.wall.lock().unwrap();
        *wall += chrono::Duration::from_std(by).unwrap_or_default();
        let mut uptime = self.uptime.lock().unwrap();
        *uptime = *uptime + by;
    }

    /// Move the wall clock without touching uptime (clock change)
    pub fn jump_wall_clock(&self, by: chrono::Duration) {
        *self.wall.lock().unwrap() += by;
    }

    pub fn set_foreground(&self, apps: Vec<ForegroundApp>) {
        *self.foreground.lock().unwrap() = Some(apps);
    }

    /// Make the sampler report a missing permission
    pub fn revoke_usage_access(&self) {
        *self.foreground.lock().unwrap() = None;
    }

    pub fn set_audio(&self, app: Option<AppId>) {
        *self.audio.lock().unwrap() = app;
    }

    pub fn set_battery(&self, battery: BatteryStatus) {
        *self.battery.lock().unwrap() = battery;
    }

    pub fn set_network(&self, network: Option<NetworkId>) {
        *self.network.lock().unwrap() = network;
    }

    /// How often the network identity was read
    pub fn network_queries(&self) -> usize {
        self.network_queries.load(Ordering::SeqCst)
    }

    pub fn set_permissions(&self, permissions: PermissionStatus) {
        *self.permissions.lock().unwrap() = permissions;
    }

    /// Queue one-off permission reads, e.g. to simulate flapping
    pub fn queue_permission_reads(&self, reads: impl IntoIterator<Item = PermissionStatus>) {
        self.permission_reads.lock().unwrap().extend(reads);
    }

    /// Drain the actions applied so far
    pub fn take_actions(&self) -> Vec<EnforcementAction> {
        std::mem::take(&mut *self.actions.lock().unwrap())
    }

    /// Last published status
    pub fn last_status(&self) -> Option<StatusMessage> {
        self.statuses.lock().unwrap().last().cloned()
    }
}

impl Default for MockHost {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MockHost {
    fn snapshot(&self) -> TimeSnapshot {
        TimeSnapshot::new(&*self.wall.lock().unwrap(), *self.uptime.lock().unwrap())
    }
}

impl UsageSampler for MockHost {
    fn sample(&self) -> HostResult<UsageSample> {
        if *self.fail_sample.lock().unwrap() {
            return Err(HostError::Unavailable("Mock sampling failure".into()));
        }
        let foreground = self
            .foreground
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| HostError::PermissionMissing("usage stats".into()))?;

        Ok(UsageSample {
            foreground,
            audio: self.audio.lock().unwrap().clone(),
        })
    }
}

impl DeviceStatusSource for MockHost {
    fn battery(&self) -> BatteryStatus {
        *self.battery.lock().unwrap()
    }

    fn network_id(&self) -> Option<NetworkId> {
        self.network_queries.fetch_add(1, Ordering::SeqCst);
        self.network.lock().unwrap().clone()
    }
}

#[async_trait]
impl Enforcer for MockHost {
    async fn apply(&self, action: &EnforcementAction) -> HostResult<()> {
        if *self.fail_enforce.lock().unwrap() {
            return Err(HostError::EnforcementFailed("Mock enforcement failure".into()));
        }
        self.actions.lock().unwrap().push(action.clone());
        Ok(())
    }

    async fn publish_status(&self, status: &StatusMessage) -> HostResult<()> {
        self.statuses.lock().unwrap().push(status.clone());
        Ok(())
    }
}

#[async_trait]
impl PermissionProbe for MockHost {
    async fn permissions(&self) -> PermissionStatus {
        self.permission_reads
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| *self.permissions.lock().unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use curfew_api::Permissions;

    #[test]
    fn advance_moves_both_clocks() {
        let host = MockHost::new();
        let before = host.snapshot();
        host.advance(Duration::from_secs(90));
        let after = host.snapshot();

        assert_eq!(after.local.timestamp - before.local.timestamp, 90_000);
        assert_eq!(after.uptime.saturating_since(before.uptime), Duration::from_secs(90));
        assert_eq!(after.local.minute_of_day, 12 * 60 + 1);
    }

    #[test]
    fn revoked_access_is_permission_missing() {
        let host = MockHost::new();
        host.set_foreground(vec![ForegroundApp::new("game")]);
        assert_eq!(host.sample().unwrap().foreground.len(), 1);

        host.revoke_usage_access();
        assert!(matches!(host.sample(), Err(HostError::PermissionMissing(_))));
    }

    #[test]
    fn network_reads_are_counted() {
        let host = MockHost::new();
        host.set_network(Some(NetworkId::new("home")));
        assert_eq!(host.network_id(), Some(NetworkId::new("home")));
        assert_eq!(host.network_queries(), 1);
    }

    #[tokio::test]
    async fn queued_permission_reads_come_first() {
        let host = MockHost::new();
        let none = PermissionStatus {
            granted: Permissions::empty(),
        };
        host.queue_permission_reads([none]);

        assert_eq!(host.permissions().await, none);
        assert_eq!(host.permissions().await, PermissionStatus::all());
    }

    #[tokio::test]
    async fn enforcement_is_recorded() {
        let host = MockHost::new();
        let unlock = EnforcementAction::Unlock {
            app_id: AppId::new("game"),
        };
        host.apply(&unlock).await.unwrap();
        assert_eq!(host.take_actions(), vec![unlock.clone()]);

        *host.fail_enforce.lock().unwrap() = true;
        assert!(host.apply(&unlock).await.is_err());
    }
}
