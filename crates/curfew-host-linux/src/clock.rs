//! System clock

use curfew_host_api::TimeSource;
use curfew_util::{TimeSnapshot, Uptime};
use nix::time::{ClockId, clock_gettime};
use std::time::{Duration, Instant};
use tracing::warn;

/// Wall clock from the system (or `CURFEW_MOCK_TIME` in debug builds) and
/// uptime from `CLOCK_BOOTTIME`, which keeps counting while suspended
#[derive(Debug, Clone)]
pub struct SystemClock {
    started: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    fn uptime(&self) -> Uptime {
        match clock_gettime(ClockId::CLOCK_BOOTTIME) {
            Ok(ts) => Uptime::from_duration(Duration::new(ts.tv_sec() as u64, ts.tv_nsec() as u32)),
            Err(e) => {
                warn!(error = %e, "CLOCK_BOOTTIME unavailable, using process uptime");
                Uptime::from_duration(self.started.elapsed())
            }
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemClock {
    fn snapshot(&self) -> TimeSnapshot {
        TimeSnapshot::new(&curfew_util::now(), self.uptime())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_is_monotonic() {
        let clock = SystemClock::new();
        let first = clock.snapshot();
        std::thread::sleep(Duration::from_millis(20));
        let second = clock.snapshot();

        assert!(second.uptime > first.uptime);
        assert!(second.uptime.saturating_since(first.uptime) >= Duration::from_millis(20));
    }
}
