//! Collaborator trait interfaces for curfew
//!
//! This crate defines the interface between the quota engine and the
//! platform: foreground sampling, device status, trusted time, enforcement
//! side effects and permission probing. It contains no platform code itself.

mod mock;
mod traits;

pub use mock::*;
pub use traits::*;
