//! Shared utilities for curfew
//!
//! This crate provides:
//! - ID types (CategoryId, UserId, AppId, RuleId, CommitId)
//! - Time utilities (trusted time snapshots, uptime, week/day math)
//! - Error types
//! - Default paths for config, data, and log directories

mod error;
mod ids;
mod paths;
mod time;

pub use error::*;
pub use ids::*;
pub use paths::*;
pub use time::*;
