//! Permission and enablement synchronization
//!
//! Runs beside the reconciliation loop. Every check reads the state twice,
//! one debounce apart, and applies it only when both reads agree.

use curfew_api::{PermissionStatus, Permissions};
use curfew_host_api::PermissionProbe;
use curfew_store::{AuditEvent, AuditEventType, Store, StoreResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

/// One read of the synchronized state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReading {
    pub permissions: PermissionStatus,
    pub enabled: bool,
}

pub struct StatusSync {
    probe: Arc<dyn PermissionProbe>,
    store: Arc<dyn Store>,
    debounce: Duration,
    /// Last applied reading; also serializes checks
    applied: Mutex<Option<StatusReading>>,
    enabled_tx: watch::Sender<bool>,
}

impl StatusSync {
    pub fn new(
        probe: Arc<dyn PermissionProbe>,
        store: Arc<dyn Store>,
        debounce: Duration,
        enabled: bool,
    ) -> (Self, watch::Receiver<bool>) {
        let (enabled_tx, enabled_rx) = watch::channel(enabled);
        let sync = Self {
            probe,
            store,
            debounce,
            applied: Mutex::new(None),
            enabled_tx,
        };
        (sync, enabled_rx)
    }

    async fn read(&self) -> StoreResult<StatusReading> {
        Ok(StatusReading {
            permissions: self.probe.permissions().await,
            enabled: self.store.load_device_state()?.enabled,
        })
    }

    /// Run one double-read check. Returns the reading if it was applied.
    pub async fn check(&self) -> StoreResult<Option<StatusReading>> {
        let mut applied = self.applied.lock().await;

        let first = self.read().await?;
        tokio::time::sleep(self.debounce).await;
        let second = self.read().await?;

        if first != second {
            debug!(?first, ?second, "Status changed between reads, skipping");
            return Ok(None);
        }
        if *applied == Some(second) {
            return Ok(None);
        }

        let previous = applied.replace(second);
        if !second.permissions.has(Permissions::USAGE_STATS) {
            warn!("Usage access missing, all categories will be counted");
        }
        info!(
            granted = ?second.permissions.granted,
            enabled = second.enabled,
            "Status synchronized"
        );

        if previous.is_some_and(|p| p.enabled != second.enabled) {
            let _ = self
                .store
                .append_audit(AuditEvent::new(AuditEventType::EnabledChanged {
                    enabled: second.enabled,
                }));
        }
        self.enabled_tx.send_replace(second.enabled);

        Ok(Some(second))
    }

    /// Check every `interval` until `shutdown` turns true
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.check().await {
                        warn!(error = %e, "Status check failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!("Status sync shutting down");
                        break;
                    }
                }
            }
        }
    }
}
