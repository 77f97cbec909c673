//! Durable local buffering for envmon sensor readings.
//!
//! Readings that cannot be uploaded are appended to day-partitioned CSV
//! files on removable storage. Partitions are replayed to the sink later and
//! renamed to `*.csv.synced` once delivered.
//!
//! # Features
//!
//! - One file per calendar day, or per uptime day before the clock is synced
//! - Schema header written once per partition
//! - Lazy enumeration of unsynced partitions and batched read-back
//! - Usage accounting against a configured capacity or the host disk
//! - Retention and pressure-driven archival
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use envmon_core::{EventLog, SystemClock};
//! use envmon_store::{LocalStore, StoreOptions};
//! use envmon_types::SensorReading;
//!
//! let clock = Arc::new(SystemClock::new());
//! let log = Arc::new(EventLog::new(clock.clone()));
//! let mut store = LocalStore::new(StoreOptions::new("/media/sd"), clock, log);
//! store.initialize()?;
//! store.append(&SensorReading::default())?;
//!
//! for partition in store.list_unsynced() {
//!     println!("{} ({} bytes)", partition.name, partition.size_bytes);
//! }
//! # Ok::<(), envmon_store::StorageError>(())
//! ```

mod error;
mod models;
pub mod schema;
mod store;

pub use error::{Result, StorageError};
pub use models::{
    PARTITION_EXTENSION, PARTITION_PREFIX, PartitionFile, PartitionKey, SYNCED_SUFFIX,
    StoredRecord,
};
pub use store::{
    ArchiveReport, CRITICAL_THRESHOLD, DATA_DIR_NAME, DEFAULT_RETENTION, LocalStore,
    StoreOptions, WARNING_THRESHOLD,
};

/// Default storage root following platform conventions.
///
/// - Linux: `~/.local/share/envmon`
/// - macOS: `~/Library/Application Support/envmon`
/// - Windows: `C:\Users\<user>\AppData\Local\envmon`
pub fn default_data_root() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("envmon")
}
