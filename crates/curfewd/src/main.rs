//! curfewd - The curfew background service
//!
//! This is the main entry point for the curfewd service.
//! It wires together all the components:
//! - Configuration loading and policy seeding
//! - Store initialization
//! - Reconciliation loop
//! - Host adapter (Linux)
//! - Status synchronization

mod status_sync;

use anyhow::{Context, Result};
use clap::Parser;
use curfew_api::StatusMessage;
use curfew_config::{Settings, load_config};
use curfew_core::{CoreEvent, ReconciliationLoop, Sensors, TickReport};
use curfew_host_api::Enforcer;
use curfew_host_linux::{LinuxHost, SysfsDevice, SystemClock};
use curfew_store::{AuditEvent, AuditEventType, SqliteStore, Store};
use curfew_util::{DATABASE_FILENAME, default_config_path, is_mock_time_active};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::status_sync::StatusSync;

/// curfewd - Screen-time quota enforcement service
#[derive(Parser, Debug)]
#[command(name = "curfewd")]
#[command(about = "Screen-time quota enforcement service", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/curfew/config.toml)
    #[arg(short, long, env = "CURFEW_CONFIG", default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Data directory override (or set CURFEW_DATA_DIR env var)
    #[arg(short, long, env = "CURFEW_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Main service state
struct Service {
    settings: Settings,
    engine: ReconciliationLoop,
    host: Arc<LinuxHost>,
    device: SysfsDevice,
    clock: SystemClock,
    store: Arc<dyn Store>,
    last_status: Option<StatusMessage>,
}

impl Service {
    fn new(args: &Args, settings: Settings) -> Result<Self> {
        info!(
            config_path = %args.config.display(),
            users = settings.policy.users.len(),
            categories = settings.policy.categories.len(),
            "Configuration loaded"
        );

        let data_dir = args
            .data_dir
            .clone()
            .unwrap_or_else(|| settings.service.data_dir.clone());

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

        let db_path = data_dir.join(DATABASE_FILENAME);
        let store: Arc<dyn Store> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );

        info!(db_path = %db_path.display(), "Store initialized");

        settings
            .policy
            .apply(store.as_ref())
            .context("Failed to apply configured policy")?;

        store.append_audit(AuditEvent::new(AuditEventType::ServiceStarted))?;

        let account = match &settings.service.account {
            Some(account) => account.clone(),
            None => store
                .load_device_state()?
                .current_user_id
                .map(|id| id.to_string())
                .context("No account configured and no current user set")?,
        };
        let uid = LinuxHost::resolve_account(&account)
            .with_context(|| format!("Failed to resolve account {:?}", account))?;
        info!(account = %account, uid = uid.as_raw(), "Restricted account resolved");

        let host = Arc::new(LinuxHost::new(uid, settings.service.status_file.clone()));
        let engine = ReconciliationLoop::new(store.clone(), settings.engine.clone());

        Ok(Self {
            settings,
            engine,
            host,
            device: SysfsDevice::new(),
            clock: SystemClock::new(),
            store,
            last_status: None,
        })
    }

    async fn run(mut self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let enabled = self.store.load_device_state()?.enabled;
        let (sync, mut enabled_rx) = StatusSync::new(
            self.host.clone(),
            self.store.clone(),
            self.settings.status_sync.debounce,
            enabled,
        );
        let sync_task = tokio::spawn(
            Arc::new(sync).run(self.settings.status_sync.interval, shutdown_rx),
        );

        let mut sigterm = signal(SignalKind::terminate())
            .context("Failed to create SIGTERM handler")?;
        let mut sigint = signal(SignalKind::interrupt())
            .context("Failed to create SIGINT handler")?;

        info!(speed = ?self.engine.speed(), "Service running");

        loop {
            let report = {
                let sensors = Sensors {
                    time: &self.clock,
                    usage: self.host.as_ref(),
                    device: &self.device,
                };
                self.engine.tick(&sensors)
            };
            let waiting_for_enable = report.paused && !*enabled_rx.borrow_and_update();
            let sleep = report.sleep;
            self.apply(report).await;

            if waiting_for_enable {
                debug!("Engine disabled, waiting");
                tokio::select! {
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, shutting down gracefully");
                        break;
                    }
                    _ = sigint.recv() => {
                        info!("Received SIGINT, shutting down gracefully");
                        break;
                    }
                    Ok(()) = enabled_rx.changed() => continue,
                }
            }

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully");
                    break;
                }
                Ok(()) = enabled_rx.changed() => {
                    debug!("Enablement changed, ticking early");
                }
                _ = tokio::time::sleep(sleep) => {}
            }
        }

        info!("Shutting down curfewd");

        let _ = shutdown_tx.send(true);
        let _ = sync_task.await;

        match self.engine.shutdown(&self.clock) {
            Ok(actions) => {
                for action in actions {
                    if let Err(e) = self.host.apply(&action).await {
                        warn!(error = %e, ?action, "Failed to release enforcement");
                    }
                }
            }
            Err(e) => warn!(error = %e, "Failed to write pending usage"),
        }

        if let Err(e) = self
            .store
            .append_audit(AuditEvent::new(AuditEventType::ServiceStopped))
        {
            warn!(error = %e, "Failed to log service shutdown");
        }

        info!("Shutdown complete");
        Ok(())
    }

    /// Perform a tick's side effects and publish its status if it changed
    async fn apply(&mut self, report: TickReport) {
        for event in &report.events {
            log_event(event);
        }

        for action in &report.actions {
            if let Err(e) = self.host.apply(action).await {
                warn!(error = %e, ?action, "Enforcement action failed");
            }
        }
        if let Err(e) = self.host.reapply_locks().await {
            warn!(error = %e, "Failed to reapply locks");
        }

        if self.last_status.as_ref() != Some(&report.status) {
            match self.host.publish_status(&report.status).await {
                Ok(()) => self.last_status = Some(report.status),
                Err(e) => warn!(error = %e, "Failed to publish status"),
            }
        }
    }
}

fn log_event(event: &CoreEvent) {
    match event {
        CoreEvent::DayChanged { day_of_epoch } => info!(day_of_epoch, "Day changed"),
        CoreEvent::UsedTimePurged { before_day, rows } => {
            info!(before_day, rows, "Expired used time purged")
        }
        CoreEvent::UsedTimeCommitted {
            commit_id,
            categories,
            time_to_add_millis,
            with_timestamp,
        } => debug!(
            commit_id = %commit_id,
            categories = ?categories,
            time_to_add_millis,
            with_timestamp,
            "Used time committed"
        ),
        CoreEvent::CategoryDropped {
            commit_id,
            category_id,
        } => warn!(commit_id = %commit_id, category_id = %category_id, "Category dropped from commit"),
        CoreEvent::Warning(warning) => info!(
            category_id = %warning.category_id,
            minutes = warning.minutes,
            "Time warning issued"
        ),
        CoreEvent::LockChanged { app_id, decision } => match decision {
            Some(decision) => info!(
                app_id = %app_id,
                reason = ?decision.reason,
                "Application locked"
            ),
            None => info!(app_id = %app_id, "Application released"),
        },
        CoreEvent::TickFailed { message } => warn!(error = %message, "Tick failed"),
    }
}

const LOG_FILENAME: &str = "curfewd.log";

/// Log to stderr and, as JSON lines, to a file in `log_dir`
fn init_logging(level: &str, log_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {:?}", log_dir))?;
    let log_path = log_dir.join(LOG_FILENAME);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {:?}", log_path))?;

    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_filter(filter()))
        .with(
            fmt::layer()
                .json()
                .with_writer(Mutex::new(file))
                .with_filter(filter()),
        )
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let settings = load_config(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    init_logging(&args.log_level, &settings.service.log_dir)?;

    info!(version = env!("CARGO_PKG_VERSION"), "curfewd starting");
    if is_mock_time_active() {
        warn!("Mock time is active, quotas follow the shifted clock");
    }

    let service = Service::new(&args, settings)?;
    service.run().await
}
