//! Collaborator-facing types for curfew
//!
//! This crate defines what the engine consumes from and hands back to the
//! platform around it:
//! - Device inputs (foreground apps, battery, network identity, permissions)
//! - Blocking reasons and per-application decisions
//! - Enforcement actions and the status message descriptor

mod status;
mod types;

pub use status::*;
pub use types::*;

/// Version of the status document the service publishes
pub const STATUS_VERSION: u32 = 1;
