//! Collaborator traits

use async_trait::async_trait;
use curfew_api::{
    BatteryStatus, EnforcementAction, ForegroundApp, NetworkId, PermissionStatus, StatusMessage,
};
use curfew_util::{AppId, CurfewError, TimeSnapshot};
use thiserror::Error;

/// Errors from collaborator operations
#[derive(Debug, Error)]
pub enum HostError {
    /// A platform permission needed for the operation is not granted
    #[error("Permission missing: {0}")]
    PermissionMissing(String),

    #[error("Not available: {0}")]
    Unavailable(String),

    #[error("Enforcement failed: {0}")]
    EnforcementFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<HostError> for CurfewError {
    fn from(e: HostError) -> Self {
        match e {
            HostError::PermissionMissing(msg) => CurfewError::permission(msg),
            other => CurfewError::host(other.to_string()),
        }
    }
}

pub type HostResult<T> = Result<T, HostError>;

/// Applications observed in one sampling pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageSample {
    /// Applications in the foreground; several on multi-window systems
    pub foreground: Vec<ForegroundApp>,
    /// Application currently playing audio in the background
    pub audio: Option<AppId>,
}

/// Trusted wall clock plus monotonic uptime
pub trait TimeSource: Send + Sync {
    /// Take one snapshot; every decision in a tick uses the same one
    fn snapshot(&self) -> TimeSnapshot;
}

/// Reports which applications the restricted user is running
pub trait UsageSampler: Send + Sync {
    /// Returns `HostError::PermissionMissing` when usage access is revoked
    fn sample(&self) -> HostResult<UsageSample>;
}

/// Battery and network state of the device
pub trait DeviceStatusSource: Send + Sync {
    fn battery(&self) -> BatteryStatus;

    /// Identity of the connected network, if any. Only queried when a
    /// category restricts networks.
    fn network_id(&self) -> Option<NetworkId>;
}

/// Performs enforcement side effects
#[async_trait]
pub trait Enforcer: Send + Sync {
    /// Apply one action decided by the reconciliation loop
    async fn apply(&self, action: &EnforcementAction) -> HostResult<()>;

    /// Re-apply locks to locked applications that escaped them since the
    /// last tick, e.g. by being relaunched
    async fn reapply_locks(&self) -> HostResult<()> {
        Ok(())
    }

    /// Publish the status descriptor for display
    async fn publish_status(&self, status: &StatusMessage) -> HostResult<()>;
}

/// Queries which platform permissions are granted
#[async_trait]
pub trait PermissionProbe: Send + Sync {
    async fn permissions(&self) -> PermissionStatus;
}
