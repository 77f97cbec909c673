//! Host facilities reported in the system status.

use std::fs;
use std::path::{Path, PathBuf};

use sysinfo::{MemoryRefreshKind, RefreshKind, System};

/// Battery charge and memory readout from the host.
pub trait Platform: Send {
    /// Battery charge in percent, or `None` when running without a battery.
    fn battery_percent(&mut self) -> Option<u8>;

    /// Free memory in bytes.
    fn free_memory(&mut self) -> u64;
}

/// Default location of power supply information on Linux.
const POWER_SUPPLY_DIR: &str = "/sys/class/power_supply";

/// Platform backed by `sysinfo` and the Linux power supply class.
pub struct HostPlatform {
    system: System,
    power_supply_dir: PathBuf,
}

impl std::fmt::Debug for HostPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostPlatform")
            .field("power_supply_dir", &self.power_supply_dir)
            .finish_non_exhaustive()
    }
}

impl Default for HostPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl HostPlatform {
    pub fn new() -> Self {
        Self {
            system: System::new_with_specifics(
                RefreshKind::nothing().with_memory(MemoryRefreshKind::everything()),
            ),
            power_supply_dir: PathBuf::from(POWER_SUPPLY_DIR),
        }
    }

    /// Read battery capacity from a different power supply directory.
    #[must_use]
    pub fn power_supply_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.power_supply_dir = dir.into();
        self
    }
}

/// Capacity of the first battery found under `dir`.
fn read_battery_capacity(dir: &Path) -> Option<u8> {
    let mut supplies: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    supplies.sort();

    supplies.into_iter().find_map(|supply| {
        let kind = fs::read_to_string(supply.join("type")).ok()?;
        if kind.trim() != "Battery" {
            return None;
        }
        let capacity: u16 = fs::read_to_string(supply.join("capacity"))
            .ok()?
            .trim()
            .parse()
            .ok()?;
        Some(capacity.min(100) as u8)
    })
}

impl Platform for HostPlatform {
    fn battery_percent(&mut self) -> Option<u8> {
        read_battery_capacity(&self.power_supply_dir)
    }

    fn free_memory(&mut self) -> u64 {
        self.system
            .refresh_memory_specifics(MemoryRefreshKind::nothing().with_ram());
        self.system.available_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supply(dir: &Path, name: &str, kind: &str, capacity: Option<&str>) {
        let path = dir.join(name);
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join("type"), kind).unwrap();
        if let Some(capacity) = capacity {
            fs::write(path.join("capacity"), capacity).unwrap();
        }
    }

    #[test]
    fn test_battery_read_from_power_supply() {
        let dir = tempfile::tempdir().unwrap();
        supply(dir.path(), "AC", "Mains\n", None);
        supply(dir.path(), "BAT0", "Battery\n", Some("87\n"));

        let mut platform = HostPlatform::new().power_supply_dir(dir.path());
        assert_eq!(platform.battery_percent(), Some(87));
    }

    #[test]
    fn test_battery_capacity_clamped() {
        let dir = tempfile::tempdir().unwrap();
        supply(dir.path(), "BAT0", "Battery", Some("104"));
        assert_eq!(read_battery_capacity(dir.path()), Some(100));
    }

    #[test]
    fn test_no_battery_found() {
        let dir = tempfile::tempdir().unwrap();
        supply(dir.path(), "AC", "Mains", None);
        assert_eq!(read_battery_capacity(dir.path()), None);
        assert_eq!(read_battery_capacity(&dir.path().join("missing")), None);
    }

    #[test]
    fn test_free_memory_reported() {
        let mut platform = HostPlatform::new();
        assert!(platform.free_memory() > 0);
    }
}
