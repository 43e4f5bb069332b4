//! Linux host adapter implementation

use async_trait::async_trait;
use curfew_api::{
    BlockingDecision, EnforcementAction, ForegroundApp, PermissionStatus, Permissions,
    StatusMessage,
};
use curfew_host_api::{
    Enforcer, HostError, HostResult, PermissionProbe, UsageSample, UsageSampler,
};
use curfew_util::AppId;
use nix::sys::signal::Signal;
use nix::unistd::{Uid, User};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::process::{PROC_ROOT, ProcessTable, signal_all};
use crate::volume::AudioControl;

/// Linux host adapter: samples, locks and mutes one account's applications
pub struct LinuxHost {
    table: ProcessTable,
    audio: AudioControl,
    status_file: Option<PathBuf>,
    /// Pids stopped for each locked application
    stopped: Mutex<BTreeMap<AppId, BTreeSet<i32>>>,
}

impl LinuxHost {
    pub fn new(uid: Uid, status_file: Option<PathBuf>) -> Self {
        Self::with_parts(ProcessTable::new(PROC_ROOT, uid), AudioControl::new(), status_file)
    }

    pub fn with_parts(
        table: ProcessTable,
        audio: AudioControl,
        status_file: Option<PathBuf>,
    ) -> Self {
        info!(
            uid = table.uid().as_raw(),
            sound = ?audio.backend().map(|b| b.name()),
            status_file = ?status_file,
            "Linux host initialized"
        );

        Self {
            table,
            audio,
            status_file,
            stopped: Mutex::new(BTreeMap::new()),
        }
    }

    /// Resolve a login name to its uid
    pub fn resolve_account(name: &str) -> HostResult<Uid> {
        match User::from_name(name) {
            Ok(Some(user)) => Ok(user.uid),
            Ok(None) => Err(HostError::Unavailable(format!("No such account: {}", name))),
            Err(e) => Err(HostError::Internal(format!(
                "Failed to look up account {}: {}",
                name, e
            ))),
        }
    }

    fn stopped(&self) -> MutexGuard<'_, BTreeMap<AppId, BTreeSet<i32>>> {
        self.stopped.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock(&self, decision: &BlockingDecision) -> HostResult<()> {
        let app = &decision.app.app_id;
        let pids = self.table.pids_of(app)?;
        signal_all(&pids, Signal::SIGSTOP)?;
        info!(
            app_id = %app,
            pids = pids.len(),
            block_notifications = decision.block_notifications,
            notification_delay_ms = decision.notification_delay_millis,
            "Stopped blocked application"
        );
        self.stopped()
            .entry(app.clone())
            .or_default()
            .extend(pids);
        Ok(())
    }

    fn unlock(&self, app: &AppId) -> HostResult<()> {
        let Some(pids) = self.stopped().remove(app) else {
            return Ok(());
        };

        // Skip pids reused by other accounts
        let own: Vec<i32> = pids.into_iter().filter(|pid| self.table.owns(*pid)).collect();
        signal_all(&own, Signal::SIGCONT)?;
        info!(app_id = %app, pids = own.len(), "Resumed unblocked application");
        Ok(())
    }

    /// Processes of locked applications that are running but not stopped,
    /// such as a relaunched instance. Exited pids are forgotten.
    fn escaped_pids(&self) -> HostResult<BTreeMap<AppId, Vec<i32>>> {
        let mut stopped = self.stopped();
        let mut escaped = BTreeMap::new();

        for (app, known) in stopped.iter_mut() {
            let current: BTreeSet<i32> = self.table.pids_of(app)?.into_iter().collect();
            let fresh: Vec<i32> = current.difference(known).copied().collect();
            *known = current;
            if !fresh.is_empty() {
                escaped.insert(app.clone(), fresh);
            }
        }

        Ok(escaped)
    }

    fn set_sessions_locked(&self, locked: bool) -> HostResult<()> {
        let verb = if locked { "lock-sessions" } else { "unlock-sessions" };
        let status = Command::new("loginctl").arg(verb).status()?;
        if status.success() {
            Ok(())
        } else {
            Err(HostError::EnforcementFailed(format!(
                "loginctl {} exited with {}",
                verb, status
            )))
        }
    }

    fn notify(&self, title: &str, text: &str) {
        match Command::new("notify-send")
            .args(["--app-name=curfew", title, text])
            .status()
        {
            Ok(status) if status.success() => {}
            Ok(status) => warn!(%status, "notify-send failed"),
            Err(e) => warn!(error = %e, "notify-send unavailable"),
        }
    }
}

impl UsageSampler for LinuxHost {
    fn sample(&self) -> HostResult<UsageSample> {
        let foreground = self
            .table
            .running_apps()?
            .into_iter()
            .map(ForegroundApp::new)
            .collect();

        let audio = match self.audio.streams() {
            Ok(streams) => streams
                .into_iter()
                .filter(|s| s.is_playing())
                .filter(|s| s.pid.is_some_and(|pid| self.table.owns(pid)))
                .find_map(|s| s.app_id()),
            Err(e) => {
                debug!(error = %e, "Audio streams unavailable");
                None
            }
        };

        Ok(UsageSample { foreground, audio })
    }
}

#[async_trait]
impl Enforcer for LinuxHost {
    async fn apply(&self, action: &EnforcementAction) -> HostResult<()> {
        match action {
            EnforcementAction::Lock { decision } => self.lock(decision),
            EnforcementAction::Unlock { app_id } => self.unlock(app_id),
            EnforcementAction::Mute { app_id } => self.audio.set_app_muted(app_id, true),
            EnforcementAction::Unmute { app_id } => self.audio.set_app_muted(app_id, false),
            EnforcementAction::SetSystemSuspension { suspended } => {
                self.set_sessions_locked(*suspended)
            }
            EnforcementAction::Notify { title, text } => {
                self.notify(title, text);
                Ok(())
            }
        }
    }

    async fn reapply_locks(&self) -> HostResult<()> {
        for (app, pids) in self.escaped_pids()? {
            signal_all(&pids, Signal::SIGSTOP)?;
            info!(app_id = %app, pids = pids.len(), "Stopped relaunched blocked application");
        }
        Ok(())
    }

    async fn publish_status(&self, status: &StatusMessage) -> HostResult<()> {
        let Some(path) = &self.status_file else {
            debug!(kind = ?status.kind, text = %status.text, "Status");
            return Ok(());
        };
        write_status_file(path, status)
    }
}

#[async_trait]
impl PermissionProbe for LinuxHost {
    async fn permissions(&self) -> PermissionStatus {
        let euid = Uid::effective();
        let mut granted = Permissions::empty();

        if self.table.scan().is_ok() {
            granted |= Permissions::USAGE_STATS;
        }
        if euid.is_root() || euid == self.table.uid() {
            granted |= Permissions::OVERLAY;
        }
        if euid.is_root() {
            granted |= Permissions::DEVICE_OWNER;
        }
        if Command::new("notify-send")
            .arg("--version")
            .output()
            .is_ok_and(|o| o.status.success())
        {
            granted |= Permissions::NOTIFICATION_ACCESS;
        }

        PermissionStatus { granted }
    }
}

/// Replace the status file atomically
fn write_status_file(path: &Path, status: &StatusMessage) -> HostResult<()> {
    let json = serde_json::to_vec_pretty(status)
        .map_err(|e| HostError::Internal(format!("Failed to encode status: {}", e)))?;

    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
