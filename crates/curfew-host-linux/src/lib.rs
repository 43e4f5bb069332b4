//! Linux host adapter for curfewd
//!
//! Provides:
//! - Foreground sampling from procfs for one account
//! - Locking by stopping (SIGSTOP) and resuming (SIGCONT) blocked applications
//! - Per-application audio muting with auto-detection of sound systems
//! - Battery state from sysfs and network identity from the default route
//! - Wall clock plus CLOCK_BOOTTIME uptime

mod adapter;
mod clock;
mod device;
mod process;
mod volume;

pub use adapter::*;
pub use clock::*;
pub use device::*;
pub use process::*;
pub use volume::*;
