//! Quota engine for curfew
//!
//! This crate is the heart of curfewd, containing:
//! - Rule and session duration evaluation (how much time is left)
//! - The per-tick category handling cache
//! - Blocking decisions walking the category tree
//! - Usage accounting with coalesced commits
//! - The reconciliation loop that ties them together

mod accountant;
mod blocking;
mod events;
mod handling;
mod reconcile;
mod rules;
mod session_duration;
mod usage_start;
mod warnings;

#[cfg(test)]
mod testing;

pub use accountant::*;
pub use blocking::*;
pub use events::*;
pub use handling::*;
pub use reconcile::*;
pub use rules::*;
pub use session_duration::*;
pub use usage_start::*;
pub use warnings::*;
