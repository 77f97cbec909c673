//! Partition naming and file metadata.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use envmon_types::SensorReading;
use time::Date;
use time::macros::format_description;

/// Prefix shared by every partition file.
pub const PARTITION_PREFIX: &str = "sensor_data_";
/// Extension of a partition still waiting to be synced.
pub const PARTITION_EXTENSION: &str = ".csv";
/// Suffix appended once a partition has been synced.
pub const SYNCED_SUFFIX: &str = ".synced";

/// Which day a partition covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionKey {
    /// Calendar date, used once the clock is synchronized.
    Date(Date),
    /// Days since boot, used before the clock is synchronized.
    UptimeDay(u64),
}

impl PartitionKey {
    /// Key for a given uptime in milliseconds.
    pub fn from_uptime_ms(uptime_ms: u64) -> Self {
        PartitionKey::UptimeDay(uptime_ms / 86_400_000)
    }

    /// Partition file name, e.g. `sensor_data_2024-03-15.csv`.
    pub fn file_name(&self) -> String {
        format!("{PARTITION_PREFIX}{self}{PARTITION_EXTENSION}")
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionKey::Date(date) => {
                let label = date
                    .format(format_description!("[year]-[month]-[day]"))
                    .map_err(|_| fmt::Error)?;
                f.write_str(&label)
            }
            PartitionKey::UptimeDay(day) => write!(f, "day{day:05}"),
        }
    }
}

/// A partition file found in the data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionFile {
    /// Full path to the file.
    pub path: PathBuf,
    /// File name without directory.
    pub name: String,
    /// Size in bytes.
    pub size_bytes: u64,
    /// Last modification time, if the filesystem reports one.
    pub modified: Option<SystemTime>,
    /// Whether the partition has been marked synced.
    pub synced: bool,
}

impl PartitionFile {
    /// Build from a path, or `None` if it is not a partition file.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_string();
        if !name.starts_with(PARTITION_PREFIX) {
            return None;
        }
        let synced = if name.ends_with(PARTITION_EXTENSION) {
            false
        } else if name.ends_with(&format!("{PARTITION_EXTENSION}{SYNCED_SUFFIX}")) {
            true
        } else {
            return None;
        };

        let metadata = fs::metadata(path).ok()?;
        if !metadata.is_file() {
            return None;
        }

        Some(Self {
            path: path.to_path_buf(),
            name,
            size_bytes: metadata.len(),
            modified: metadata.modified().ok(),
            synced,
        })
    }

    /// Path this partition is renamed to when marked synced.
    pub fn synced_path(&self) -> PathBuf {
        if self.synced {
            self.path.clone()
        } else {
            let mut name = self.name.clone();
            name.push_str(SYNCED_SUFFIX);
            self.path.with_file_name(name)
        }
    }

    /// Ordering key: oldest modification first, then name.
    pub(crate) fn age_key(&self) -> (Option<SystemTime>, &str) {
        (self.modified, self.name.as_str())
    }
}

/// A reading read back from a partition, with its record index.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    /// Zero-based position of the record in the partition, header excluded.
    pub index: u64,
    pub reading: SensorReading,
}
