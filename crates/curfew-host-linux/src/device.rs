//! Battery and network state from sysfs and procfs

use curfew_api::{BatteryStatus, NetworkId};
use curfew_host_api::DeviceStatusSource;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Reads power supplies from `/sys/class/power_supply` and the default
/// route from `/proc/net/route`
#[derive(Debug, Clone)]
pub struct SysfsDevice {
    sys_root: PathBuf,
    proc_root: PathBuf,
}

impl SysfsDevice {
    pub fn new() -> Self {
        Self::with_roots("/sys", crate::PROC_ROOT)
    }

    pub fn with_roots(sys_root: impl Into<PathBuf>, proc_root: impl Into<PathBuf>) -> Self {
        Self {
            sys_root: sys_root.into(),
            proc_root: proc_root.into(),
        }
    }

    /// Interface carrying the default IPv4 route
    fn default_interface(&self) -> Option<String> {
        let routes = fs::read_to_string(self.proc_root.join("net/route")).ok()?;
        parse_default_route(&routes)
    }
}

impl Default for SysfsDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceStatusSource for SysfsDevice {
    fn battery(&self) -> BatteryStatus {
        let power_supply = self.sys_root.join("class/power_supply");
        let Ok(entries) = fs::read_dir(&power_supply) else {
            return BatteryStatus::mains_powered();
        };

        let mut battery = None;
        let mut ac_online = false;

        for entry in entries.flatten() {
            let path = entry.path();
            match read_trimmed(&path, "type").as_deref() {
                Some("Battery") if battery.is_none() => battery = read_battery_info(&path),
                Some("Mains") => ac_online |= read_trimmed(&path, "online").as_deref() == Some("1"),
                _ => {}
            }
        }

        match battery {
            Some((level, charging)) => BatteryStatus::new(level, charging || ac_online),
            None => BatteryStatus::mains_powered(),
        }
    }

    fn network_id(&self) -> Option<NetworkId> {
        let interface = self.default_interface()?;
        let address = read_trimmed(&self.sys_root.join("class/net").join(&interface), "address");
        debug!(interface = %interface, address = ?address, "Read network identity");

        // interface@mac
        Some(NetworkId::new(match address {
            Some(address) => format!("{}@{}", interface, address),
            None => interface,
        }))
    }
}

fn read_trimmed(dir: &Path, file: &str) -> Option<String> {
    fs::read_to_string(dir.join(file))
        .ok()
        .map(|s| s.trim().to_string())
}

fn read_battery_info(path: &Path) -> Option<(u8, bool)> {
    let capacity: u8 = read_trimmed(path, "capacity")?.parse().ok()?;
    let status = read_trimmed(path, "status")?;
    let charging =
        status.eq_ignore_ascii_case("charging") || status.eq_ignore_ascii_case("full");

    Some((capacity.min(100), charging))
}

/// First interface whose destination is 0.0.0.0
fn parse_default_route(routes: &str) -> Option<String> {
    routes.lines().skip(1).find_map(|line| {
        let mut fields = line.split_whitespace();
        let interface = fields.next()?;
        let destination = fields.next()?;
        (destination == "00000000").then(|| interface.to_string())
    })
}
