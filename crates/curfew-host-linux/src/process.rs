//! Process table access through procfs

use nix::sys::signal::{self, Signal};
use nix::unistd::{Pid, Uid};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use curfew_host_api::{HostError, HostResult};
use curfew_util::AppId;

/// Default procfs mount point
pub const PROC_ROOT: &str = "/proc";

/// One process of the watched account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: i32,
    /// Short command name from `comm`, used as the application id
    pub comm: String,
    /// Process group leader equals the process itself
    pub group_leader: bool,
    /// Stopped by job control or by us
    pub stopped: bool,
}

impl ProcessInfo {
    pub fn app_id(&self) -> AppId {
        AppId::new(self.comm.as_str())
    }
}

/// Read-only view of the process table, limited to one account
#[derive(Debug, Clone)]
pub struct ProcessTable {
    root: PathBuf,
    uid: Uid,
}

impl ProcessTable {
    pub fn new(root: impl Into<PathBuf>, uid: Uid) -> Self {
        Self {
            root: root.into(),
            uid,
        }
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    /// All processes owned by the account. Processes that exit while the
    /// table is read are skipped.
    pub fn scan(&self) -> HostResult<Vec<ProcessInfo>> {
        let entries = fs::read_dir(&self.root).map_err(|e| match e.kind() {
            io::ErrorKind::PermissionDenied => {
                HostError::PermissionMissing(format!("Cannot read {}", self.root.display()))
            }
            _ => HostError::Io(e),
        })?;

        let mut processes = Vec::new();
        for entry in entries.flatten() {
            let Some(pid) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<i32>().ok())
            else {
                continue;
            };

            let path = entry.path();
            let owner = match fs::metadata(&path) {
                Ok(meta) => meta.uid(),
                Err(_) => continue,
            };
            if owner != self.uid.as_raw() {
                continue;
            }

            if let Some(info) = read_process(&path, pid) {
                processes.push(info);
            }
        }

        processes.sort_by_key(|p| p.pid);
        Ok(processes)
    }

    /// Distinct application ids of the account's process group leaders
    pub fn running_apps(&self) -> HostResult<BTreeSet<AppId>> {
        Ok(self
            .scan()?
            .into_iter()
            .filter(|p| p.group_leader)
            .map(|p| p.app_id())
            .collect())
    }

    /// Whether `pid` belongs to the account
    pub fn owns(&self, pid: i32) -> bool {
        fs::metadata(self.root.join(pid.to_string()))
            .is_ok_and(|meta| meta.uid() == self.uid.as_raw())
    }

    /// Pids of every process running `app`
    pub fn pids_of(&self, app: &AppId) -> HostResult<Vec<i32>> {
        Ok(self
            .scan()?
            .into_iter()
            .filter(|p| p.comm == app.as_str())
            .map(|p| p.pid)
            .collect())
    }
}

fn read_process(path: &Path, pid: i32) -> Option<ProcessInfo> {
    let comm = fs::read_to_string(path.join("comm")).ok()?;
    let stat = fs::read_to_string(path.join("stat")).ok()?;
    let (state, pgrp) = parse_stat(&stat)?;

    Some(ProcessInfo {
        pid,
        comm: comm.trim().to_string(),
        group_leader: pgrp == pid,
        stopped: state == 'T',
    })
}

/// State and process group from a `stat` line. The command name may
/// contain spaces and parentheses, so fields are read after the last `)`.
fn parse_stat(stat: &str) -> Option<(char, i32)> {
    let rest = &stat[stat.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    let state = fields.next()?.chars().next()?;
    let _ppid = fields.next()?;
    let pgrp = fields.next()?.parse().ok()?;
    Some((state, pgrp))
}

/// Send `sig` to every pid, ignoring processes that already exited
pub fn signal_all(pids: &[i32], sig: Signal) -> HostResult<()> {
    for pid in pids {
        match signal::kill(Pid::from_raw(*pid), sig) {
            Ok(()) => debug!(pid, signal = ?sig, "Signalled process"),
            Err(nix::errno::Errno::ESRCH) => {}
            Err(nix::errno::Errno::EPERM) => {
                return Err(HostError::PermissionMissing(format!(
                    "Not allowed to send {:?} to {}",
                    sig, pid
                )));
            }
            Err(e) => {
                warn!(pid, signal = ?sig, error = %e, "Failed to signal process");
                return Err(HostError::EnforcementFailed(format!(
                    "Failed to send {:?} to {}: {}",
                    sig, pid, e
                )));
            }
        }
    }
    Ok(())
}
