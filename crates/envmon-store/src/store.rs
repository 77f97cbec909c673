//! Date-partitioned CSV log on removable storage.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use csv::StringRecord;
use sysinfo::Disks;
use tracing::{debug, info, warn};

use envmon_core::{Clock, Component, EventCode, EventLog};
use envmon_types::SensorReading;

use crate::error::{Result, StorageError};
use crate::models::{PartitionFile, PartitionKey, StoredRecord};
use crate::schema;

/// Directory created under the storage root.
pub const DATA_DIR_NAME: &str = "sensor_data";
/// Usage percentage at which archival starts.
pub const WARNING_THRESHOLD: u8 = 85;
/// Usage percentage at which archival deletes more than expired files.
pub const CRITICAL_THRESHOLD: u8 = 90;
/// How long synced partitions are kept.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Options for a [`LocalStore`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Mount point of the storage medium.
    pub root: PathBuf,
    /// Space the store may use. `None` means the whole disk.
    pub capacity_bytes: Option<u64>,
    /// Age after which synced partitions are deleted.
    pub retention: Duration,
}

impl StoreOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            capacity_bytes: None,
            retention: DEFAULT_RETENTION,
        }
    }

    #[must_use]
    pub fn capacity_bytes(mut self, capacity: u64) -> Self {
        self.capacity_bytes = Some(capacity);
        self
    }

    #[must_use]
    pub fn retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }
}

/// What [`LocalStore::archive_old_files`] removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveReport {
    /// Synced partitions past the retention window.
    pub expired: usize,
    /// Synced partitions removed to free space.
    pub synced_removed: usize,
    /// Unsynced partitions removed to free space.
    pub unsynced_removed: usize,
    pub usage_before: u8,
    pub usage_after: u8,
}

impl ArchiveReport {
    /// Total partitions removed.
    pub fn removed(&self) -> usize {
        self.expired + self.synced_removed + self.unsynced_removed
    }
}

struct OpenPartition {
    name: String,
    path: PathBuf,
    writer: csv::Writer<File>,
}

/// Append-only reading log split into one CSV file per day.
///
/// Partitions are named from the calendar date once the clock is
/// synchronized and from the uptime day before that. Each file gets the
/// header once, when it is created.
pub struct LocalStore {
    options: StoreOptions,
    data_dir: PathBuf,
    clock: Arc<dyn Clock>,
    log: Arc<EventLog>,
    ready: bool,
    current: Option<OpenPartition>,
    records_written: u64,
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("data_dir", &self.data_dir)
            .field("ready", &self.ready)
            .field("current", &self.current.as_ref().map(|p| &p.name))
            .field("records_written", &self.records_written)
            .finish()
    }
}

impl LocalStore {
    /// Create a store. Nothing touches the disk until [`initialize`](Self::initialize).
    pub fn new(options: StoreOptions, clock: Arc<dyn Clock>, log: Arc<EventLog>) -> Self {
        let data_dir = options.root.join(DATA_DIR_NAME);
        Self {
            options,
            data_dir,
            clock,
            log,
            ready: false,
            current: None,
            records_written: 0,
        }
    }

    /// Check the medium and create the data directory.
    pub fn initialize(&mut self) -> Result<()> {
        self.ready = false;
        self.current = None;

        if !self.options.root.is_dir() {
            self.log.error(
                Component::Storage,
                EventCode::StorageInitFailed,
                format!("Storage medium not present at {}", self.options.root.display()),
            );
            return Err(StorageError::MediumAbsent {
                path: self.options.root.clone(),
            });
        }

        fs::create_dir_all(&self.data_dir).map_err(|source| {
            self.log.error(
                Component::Storage,
                EventCode::StorageInitFailed,
                format!("Cannot create {}: {}", self.data_dir.display(), source),
            );
            StorageError::CreateDirectory {
                path: self.data_dir.clone(),
                source,
            }
        })?;

        self.ready = true;
        self.log.info(
            Component::Storage,
            format!("Local storage ready at {}", self.data_dir.display()),
        );
        Ok(())
    }

    /// Whether appends can be attempted.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn root(&self) -> &Path {
        &self.options.root
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Path of the partition currently open for appending.
    pub fn current_partition(&self) -> Option<&Path> {
        self.current.as_ref().map(|p| p.path.as_path())
    }

    /// Records appended since creation.
    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Partition the next append goes to.
    ///
    /// The first clock sync also rotates: the open `dayNNNNN` partition is
    /// closed and appends continue in the partition named by the date.
    pub fn partition_key(&self) -> PartitionKey {
        match self.clock.wall_time() {
            Some(now) => PartitionKey::Date(now.date()),
            None => PartitionKey::from_uptime_ms(self.clock.now_ms()),
        }
    }

    /// Append one reading, rotating to a new partition when the day changed.
    pub fn append(&mut self, reading: &SensorReading) -> Result<()> {
        if !self.ready {
            return Err(StorageError::NotReady);
        }
        // An open handle keeps accepting writes after the medium is pulled
        if !self.options.root.is_dir() {
            return Err(self.medium_lost());
        }

        let name = self.partition_key().file_name();
        if self.current.as_ref().is_none_or(|p| p.name != name) {
            self.open_partition(name)?;
        }

        let Some(partition) = self.current.as_mut() else {
            return Err(StorageError::NotReady);
        };
        let written = partition
            .writer
            .write_record(&schema::to_record(reading))
            .and_then(|()| partition.writer.flush().map_err(csv::Error::from));

        match written {
            Ok(()) => {
                self.records_written += 1;
                Ok(())
            }
            Err(source) => {
                let path = partition.path.clone();
                self.current = None;
                Err(self.write_failed(path, source))
            }
        }
    }

    fn open_partition(&mut self, name: String) -> Result<()> {
        if let Some(mut previous) = self.current.take() {
            if let Err(e) = previous.writer.flush() {
                warn!("Failed to flush {}: {}", previous.path.display(), e);
            }
            self.log.info(
                Component::Storage,
                format!("Rotating partition {} -> {}", previous.name, name),
            );
        }

        let path = self.data_dir.join(&name);
        let file = fs::create_dir_all(&self.data_dir)
            .and_then(|()| OpenOptions::new().create(true).append(true).open(&path));
        let file = match file {
            Ok(file) => file,
            Err(source) => {
                self.log.error(
                    Component::Storage,
                    EventCode::StorageWriteFailed,
                    format!("Cannot open {}: {}", path.display(), source),
                );
                return Err(StorageError::OpenFailed { path, source });
            }
        };

        let is_new = file.metadata().map(|m| m.len() == 0).unwrap_or(true);
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if is_new {
            let header = writer
                .write_record(schema::HEADER)
                .and_then(|()| writer.flush().map_err(csv::Error::from));
            if let Err(source) = header {
                return Err(self.write_failed(path, source));
            }
            debug!("Created partition {}", path.display());
        }

        self.current = Some(OpenPartition { name, path, writer });
        Ok(())
    }

    fn write_failed(&mut self, path: PathBuf, source: csv::Error) -> StorageError {
        if !self.options.root.is_dir() {
            return self.medium_lost();
        }
        self.log.error(
            Component::Storage,
            EventCode::StorageWriteFailed,
            format!("Write to {} failed: {}", path.display(), source),
        );
        StorageError::WriteFailed { path, source }
    }

    fn medium_lost(&mut self) -> StorageError {
        self.ready = false;
        self.current = None;
        self.log.error(
            Component::Storage,
            EventCode::StorageWriteFailed,
            format!("Storage medium removed from {}", self.options.root.display()),
        );
        StorageError::MediumAbsent {
            path: self.options.root.clone(),
        }
    }

    /// All partition files, synced or not, in directory order.
    pub fn partitions(&self) -> impl Iterator<Item = PartitionFile> + '_ {
        fs::read_dir(&self.data_dir)
            .into_iter()
            .flatten()
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| PartitionFile::from_path(&entry.path()))
    }

    /// Partitions not yet marked synced.
    ///
    /// Enumeration is lazy; call again to restart it.
    pub fn list_unsynced(&self) -> impl Iterator<Item = PartitionFile> + '_ {
        self.partitions().filter(|file| !file.synced)
    }

    /// The least recently modified unsynced partition.
    pub fn oldest_unsynced(&self) -> Option<PartitionFile> {
        self.list_unsynced()
            .min_by(|a, b| a.age_key().cmp(&b.age_key()))
    }

    /// Rename a partition to `<name>.csv.synced`.
    ///
    /// Marking an already synced partition is a no-op. If the open partition
    /// is marked, the next append starts a fresh file for the same day.
    pub fn mark_synced(&mut self, file: &PartitionFile) -> Result<PathBuf> {
        let target = file.synced_path();
        if file.synced || (!file.path.exists() && target.exists()) {
            return Ok(target);
        }

        if self.current.as_ref().is_some_and(|p| p.path == file.path)
            && let Some(mut partition) = self.current.take()
        {
            partition.writer.flush()?;
        }

        if target.exists() {
            // Same day synced before; keep one synced file per day
            merge_into(&file.path, &target)?;
        } else {
            fs::rename(&file.path, &target).map_err(|source| StorageError::Rename {
                from: file.path.clone(),
                to: target.clone(),
                source,
            })?;
        }

        info!("Partition {} marked synced", file.name);
        Ok(target)
    }

    /// Read every reading of a partition. Fails on the first malformed record.
    pub fn read_partition(&self, file: &PartitionFile) -> Result<Vec<SensorReading>> {
        let mut reader = open_reader(&file.path)?;
        let mut readings = Vec::new();
        for record in reader.byte_records() {
            let record = record.map_err(|source| StorageError::Read {
                path: file.path.clone(),
                source,
            })?;
            let line = record.position().map(|p| p.line()).unwrap_or(0);
            let record = StringRecord::from_byte_record_lossy(record);
            let reading = schema::from_record(&record).map_err(|source| StorageError::Parse {
                path: file.path.clone(),
                line,
                source,
            })?;
            readings.push(reading);
        }
        Ok(readings)
    }

    /// Read up to `limit` readings starting at record `offset`.
    ///
    /// Malformed records are skipped with a warning and still count towards
    /// the index. Invalid UTF-8 is decoded lossily. An empty result means
    /// nothing remains at or after `offset`.
    pub fn read_batch(
        &self,
        file: &PartitionFile,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<StoredRecord>> {
        let mut reader = open_reader(&file.path)?;
        let mut batch = Vec::with_capacity(limit);

        for (index, record) in (0u64..).zip(reader.byte_records()) {
            if batch.len() >= limit {
                break;
            }
            if index < offset {
                continue;
            }
            let record = record.map_err(|source| StorageError::Read {
                path: file.path.clone(),
                source,
            })?;
            match schema::from_record(&StringRecord::from_byte_record_lossy(record)) {
                Ok(reading) => batch.push(StoredRecord { index, reading }),
                Err(e) => warn!(
                    "Skipping record {} of {}: {}",
                    index,
                    file.name,
                    e
                ),
            }
        }
        Ok(batch)
    }

    /// Bytes used by partition files.
    pub fn used_bytes(&self) -> u64 {
        self.partitions().map(|f| f.size_bytes).sum()
    }

    /// Storage usage in percent, 0 to 100.
    ///
    /// Relative to the configured capacity when set, otherwise to the disk
    /// holding the storage root.
    pub fn usage_percent(&self) -> u8 {
        let (used, total) = match self.options.capacity_bytes {
            Some(capacity) => (self.used_bytes(), capacity),
            None => match disk_space(&self.options.root) {
                Some((total, available)) => (total.saturating_sub(available), total),
                None => return 0,
            },
        };
        percent(used, total)
    }

    /// Free space by deleting old partitions.
    ///
    /// Synced partitions past the retention window always go. At or above
    /// [`CRITICAL_THRESHOLD`], synced partitions are removed oldest first,
    /// then unsynced ones other than the open partition, until usage falls
    /// below [`WARNING_THRESHOLD`].
    pub fn archive_old_files(&mut self) -> Result<ArchiveReport> {
        if !self.ready {
            return Err(StorageError::NotReady);
        }

        let mut report = ArchiveReport {
            usage_before: self.usage_percent(),
            ..ArchiveReport::default()
        };

        let now = SystemTime::now();
        let expired: Vec<PartitionFile> = self
            .partitions()
            .filter(|f| f.synced)
            .filter(|f| {
                f.modified
                    .and_then(|m| now.duration_since(m).ok())
                    .is_some_and(|age| age > self.options.retention)
            })
            .collect();
        for file in expired {
            if self.remove_partition(&file) {
                report.expired += 1;
            }
        }

        if self.usage_percent() >= CRITICAL_THRESHOLD {
            let mut synced: Vec<PartitionFile> = self.partitions().filter(|f| f.synced).collect();
            synced.sort_by(|a, b| a.age_key().cmp(&b.age_key()));
            for file in synced {
                if self.usage_percent() < WARNING_THRESHOLD {
                    break;
                }
                if self.remove_partition(&file) {
                    report.synced_removed += 1;
                }
            }

            let current = self.current.as_ref().map(|p| p.path.clone());
            let mut unsynced: Vec<PartitionFile> = self
                .list_unsynced()
                .filter(|f| Some(&f.path) != current.as_ref())
                .collect();
            unsynced.sort_by(|a, b| a.age_key().cmp(&b.age_key()));
            for file in unsynced {
                if self.usage_percent() < WARNING_THRESHOLD {
                    break;
                }
                if self.remove_partition(&file) {
                    report.unsynced_removed += 1;
                    self.log.warning(
                        Component::Storage,
                        EventCode::StorageArchiveFailed,
                        format!("Deleted unsynced partition {} to free space", file.name),
                    );
                }
            }
        }

        report.usage_after = self.usage_percent();
        if report.removed() > 0 {
            self.log.info(
                Component::Storage,
                format!(
                    "Archived {} partitions, usage {}% -> {}%",
                    report.removed(),
                    report.usage_before,
                    report.usage_after
                ),
            );
        }
        Ok(report)
    }

    fn remove_partition(&self, file: &PartitionFile) -> bool {
        match fs::remove_file(&file.path) {
            Ok(()) => {
                debug!("Removed partition {}", file.name);
                true
            }
            Err(e) => {
                self.log.warning(
                    Component::Storage,
                    EventCode::StorageArchiveFailed,
                    format!("Cannot remove {}: {}", file.name, e),
                );
                false
            }
        }
    }
}

fn open_reader(path: &Path) -> Result<csv::Reader<File>> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|source| StorageError::Read {
            path: path.to_path_buf(),
            source,
        })
}

/// Append the data rows of `source` to `target`, then delete `source`.
fn merge_into(source: &Path, target: &Path) -> Result<()> {
    let contents = fs::read_to_string(source)?;
    let rows = contents.split_once('\n').map_or("", |(_, rest)| rest);
    let mut out = OpenOptions::new().append(true).open(target)?;
    out.write_all(rows.as_bytes())?;
    out.flush()?;
    fs::remove_file(source)?;
    Ok(())
}

fn percent(used: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (u128::from(used) * 100 / u128::from(total)).min(100);
    pct as u8
}

/// Total and available bytes of the disk holding `path`.
fn disk_space(path: &Path) -> Option<(u64, u64)> {
    let path = path.canonicalize().ok()?;
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| (disk.total_space(), disk.available_space()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use envmon_core::MockClock;
    use time::macros::datetime;

    struct Fixture {
        _dir: tempfile::TempDir,
        clock: Arc<MockClock>,
        log: Arc<EventLog>,
        store: LocalStore,
    }

    fn fixture_with(options: impl FnOnce(StoreOptions) -> StoreOptions) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(MockClock::new());
        let log = Arc::new(EventLog::new(clock.clone()));
        let mut store = LocalStore::new(
            options(StoreOptions::new(dir.path())),
            clock.clone(),
            log.clone(),
        );
        store.initialize().unwrap();
        Fixture {
            _dir: dir,
            clock,
            log,
            store,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(|o| o)
    }

    fn reading(timestamp: u64) -> SensorReading {
        SensorReading {
            timestamp,
            temperature: 21.5,
            ..SensorReading::default()
        }
    }

    fn line_count(path: &Path) -> usize {
        fs::read_to_string(path).unwrap().lines().count()
    }

    fn set_age(path: &Path, age: Duration) {
        let file = OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    #[test]
    fn test_initialize_requires_medium() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(MockClock::new());
        let log = Arc::new(EventLog::new(clock.clone()));
        let mut store = LocalStore::new(
            StoreOptions::new(dir.path().join("sdcard")),
            clock,
            log.clone(),
        );

        let err = store.initialize().unwrap_err();
        assert!(err.is_medium_absent());
        assert!(!store.is_ready());
        assert!(matches!(
            store.append(&reading(1)),
            Err(StorageError::NotReady)
        ));
        assert_eq!(
            log.latest().unwrap().code,
            Some(EventCode::StorageInitFailed)
        );
    }

    #[test]
    fn test_initialize_creates_data_dir() {
        let f = fixture();
        assert!(f.store.is_ready());
        assert!(f.store.data_dir().is_dir());
        assert!(f.store.data_dir().ends_with(DATA_DIR_NAME));
    }

    #[test]
    fn test_append_writes_header_once() {
        let mut f = fixture();
        for ts in 1..=3 {
            f.store.append(&reading(ts)).unwrap();
        }
        let path = f.store.current_partition().unwrap().to_path_buf();
        assert!(path.ends_with("sensor_data_day00000.csv"));

        let contents = fs::read_to_string(&path).unwrap();
        let mut lines = contents.lines();
        assert_eq!(lines.next().unwrap(), schema::HEADER.join(","));
        assert_eq!(
            lines.next().unwrap(),
            "1,21.50,0.00,0.00,0.00,0.00,0.00,0.00,0,0.00,M5Stack_001"
        );
        assert_eq!(line_count(&path), 4);
    }

    #[test]
    fn test_reopening_existing_partition_skips_header() {
        let mut f = fixture();
        f.store.append(&reading(1)).unwrap();
        let path = f.store.current_partition().unwrap().to_path_buf();

        f.store.initialize().unwrap();
        f.store.append(&reading(2)).unwrap();
        assert_eq!(line_count(&path), 3);
    }

    #[test]
    fn test_day_change_rotates_partition() {
        let mut f = fixture();
        f.clock.set_wall_time(datetime!(2024-03-15 23:59:58 UTC));
        f.store.append(&reading(1)).unwrap();
        f.clock.advance_ms(4_000);
        f.store.append(&reading(2)).unwrap();

        let dir = f.store.data_dir().to_path_buf();
        let first = dir.join("sensor_data_2024-03-15.csv");
        let second = dir.join("sensor_data_2024-03-16.csv");
        assert_eq!(line_count(&first), 2);
        assert_eq!(line_count(&second), 2);
        assert_eq!(f.store.current_partition().unwrap(), second.as_path());
        assert!(
            f.log
                .recent(5)
                .iter()
                .any(|e| e.message.starts_with("Rotating partition"))
        );
    }

    #[test]
    fn test_unsynced_partition_named_by_uptime_day() {
        let mut f = fixture();
        f.clock.advance_ms(3 * 86_400_000 + 5);
        f.store.append(&reading(1)).unwrap();
        assert!(
            f.store
                .current_partition()
                .unwrap()
                .ends_with("sensor_data_day00003.csv")
        );
    }

    #[test]
    fn test_list_unsynced_and_mark_synced() {
        let mut f = fixture();
        f.store.append(&reading(1)).unwrap();
        f.clock.advance_ms(86_400_000);
        f.store.append(&reading(2)).unwrap();

        let unsynced: Vec<_> = f.store.list_unsynced().collect();
        assert_eq!(unsynced.len(), 2);

        let first = f
            .store
            .list_unsynced()
            .find(|p| p.name == "sensor_data_day00000.csv")
            .unwrap();
        let target = f.store.mark_synced(&first).unwrap();
        assert!(target.ends_with("sensor_data_day00000.csv.synced"));
        assert!(target.exists());

        // Idempotent
        assert_eq!(f.store.mark_synced(&first).unwrap(), target);
        let synced = PartitionFile::from_path(&target).unwrap();
        assert_eq!(f.store.mark_synced(&synced).unwrap(), target);

        let names: Vec<_> = f.store.list_unsynced().map(|p| p.name).collect();
        assert_eq!(names, vec!["sensor_data_day00001.csv".to_string()]);
    }

    #[test]
    fn test_mark_synced_open_partition_starts_fresh_file() {
        let mut f = fixture();
        f.store.append(&reading(1)).unwrap();
        let open = f.store.oldest_unsynced().unwrap();
        f.store.mark_synced(&open).unwrap();
        assert!(f.store.current_partition().is_none());

        f.store.append(&reading(2)).unwrap();
        let fresh = f.store.oldest_unsynced().unwrap();
        assert_eq!(f.store.read_partition(&fresh).unwrap().len(), 1);

        // Marking the same day again merges into the synced file
        let target = f.store.mark_synced(&fresh).unwrap();
        let synced = PartitionFile::from_path(&target).unwrap();
        let timestamps: Vec<_> = f
            .store
            .read_partition(&synced)
            .unwrap()
            .into_iter()
            .map(|r| r.timestamp)
            .collect();
        assert_eq!(timestamps, vec![1, 2]);
        assert_eq!(f.store.list_unsynced().count(), 0);
    }

    #[test]
    fn test_read_batch_offsets_and_skips_malformed() {
        let mut f = fixture();
        for ts in 1..=5 {
            f.store.append(&reading(ts)).unwrap();
        }
        let path = f.store.current_partition().unwrap().to_path_buf();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "garbage").unwrap();
        drop(file);
        f.store.append(&reading(7)).unwrap();

        let partition = f.store.oldest_unsynced().unwrap();
        let batch = f.store.read_batch(&partition, 0, 3).unwrap();
        assert_eq!(
            batch.iter().map(|r| r.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );

        let batch = f.store.read_batch(&partition, 3, 10).unwrap();
        assert_eq!(
            batch.iter().map(|r| r.reading.timestamp).collect::<Vec<_>>(),
            vec![4, 5, 7]
        );
        assert_eq!(batch.last().unwrap().index, 6);
        assert!(f.store.read_batch(&partition, 7, 10).unwrap().is_empty());

        assert!(matches!(
            f.store.read_partition(&partition),
            Err(StorageError::Parse { .. })
        ));
    }

    #[test]
    fn test_read_batch_decodes_invalid_utf8_lossily() {
        let mut f = fixture();
        for ts in 1..=3 {
            f.store.append(&reading(ts)).unwrap();
        }
        let path = f.store.current_partition().unwrap().to_path_buf();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"4,21.50,0.00,0.00,0.00,0.00,0.00,0.00,0,0.00,bench\xff01\n")
            .unwrap();
        drop(file);
        f.store.append(&reading(5)).unwrap();

        let partition = f.store.oldest_unsynced().unwrap();
        let batch = f.store.read_batch(&partition, 2, 10).unwrap();
        assert_eq!(
            batch.iter().map(|r| r.reading.timestamp).collect::<Vec<_>>(),
            vec![3, 4, 5]
        );
        assert_eq!(batch[1].reading.device_id, "bench\u{FFFD}01");
        assert_eq!(f.store.read_partition(&partition).unwrap().len(), 5);
    }

    #[test]
    fn test_clock_sync_rotates_uptime_partition() {
        let mut f = fixture();
        f.store.append(&reading(1)).unwrap();
        let uptime = f.store.current_partition().unwrap().to_path_buf();

        f.clock.set_wall_time(datetime!(2024-03-15 10:00:00 UTC));
        f.store.append(&reading(2)).unwrap();
        assert!(
            f.store
                .current_partition()
                .unwrap()
                .ends_with("sensor_data_2024-03-15.csv")
        );
        assert_eq!(line_count(&uptime), 2);
    }

    #[test]
    fn test_usage_against_configured_capacity() {
        let mut f = fixture_with(|o| o.capacity_bytes(10_000));
        assert_eq!(f.store.usage_percent(), 0);
        for ts in 0..50 {
            f.store.append(&reading(ts)).unwrap();
        }
        let used = f.store.used_bytes();
        assert!(used > 0);
        assert_eq!(u64::from(f.store.usage_percent()), (used * 100 / 10_000).min(100));
    }

    #[test]
    fn test_usage_against_disk() {
        let f = fixture();
        assert!(f.store.usage_percent() <= 100);
    }

    #[test]
    fn test_archive_removes_expired_synced_partitions() {
        let mut f = fixture_with(|o| o.capacity_bytes(1_000_000));
        f.store.append(&reading(1)).unwrap();
        let old = f.store.oldest_unsynced().unwrap();
        let old_synced = f.store.mark_synced(&old).unwrap();
        set_age(&old_synced, Duration::from_secs(40 * 24 * 3600));

        f.clock.advance_ms(86_400_000);
        f.store.append(&reading(2)).unwrap();
        let recent = f.store.oldest_unsynced().unwrap();
        let recent_synced = f.store.mark_synced(&recent).unwrap();

        let report = f.store.archive_old_files().unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(report.synced_removed, 0);
        assert!(!old_synced.exists());
        assert!(recent_synced.exists());
    }

    #[test]
    fn test_archive_under_pressure_prefers_synced_then_oldest_unsynced() {
        // Each partition is a header plus one record
        let mut f = fixture_with(|o| o.capacity_bytes(1));
        let mut paths = Vec::new();
        for day in 0..4u64 {
            f.clock.set_now_ms(day * 86_400_000);
            f.store.append(&reading(day)).unwrap();
            paths.push(f.store.current_partition().unwrap().to_path_buf());
        }
        let per_file = fs::metadata(&paths[0]).unwrap().len();

        // Day 1 is synced, the rest are not
        let day1 = PartitionFile::from_path(&paths[1]).unwrap();
        let day1_synced = f.store.mark_synced(&day1).unwrap();
        for (age, path) in [(4, &paths[0]), (3, &day1_synced), (2, &paths[2])] {
            set_age(path, Duration::from_secs(age * 3600));
        }

        // Room for slightly more than two files: 4 files is far over 90 %
        f.store.options.capacity_bytes = Some(per_file * 2 + per_file / 2);
        let report = f.store.archive_old_files().unwrap();

        assert_eq!(report.synced_removed, 1);
        assert_eq!(report.unsynced_removed, 1);
        assert!(!day1_synced.exists());
        assert!(!paths[0].exists());
        assert!(paths[2].exists());
        assert!(paths[3].exists(), "open partition is never removed");
        assert!(report.usage_after < WARNING_THRESHOLD);
        assert!(
            f.log
                .by_component(Component::Storage)
                .iter()
                .any(|e| e.message.contains("Deleted unsynced partition"))
        );
    }

    #[test]
    fn test_append_after_medium_removed() {
        let mut f = fixture();
        f.store.append(&reading(1)).unwrap();
        let root = f.store.root().to_path_buf();
        fs::remove_dir_all(&root).unwrap();

        f.clock.advance_ms(86_400_000);
        let err = f.store.append(&reading(2)).unwrap_err();
        assert!(err.is_medium_absent());
        assert!(!f.store.is_ready());
    }

    #[test]
    fn test_percent_bounds() {
        assert_eq!(percent(0, 0), 0);
        assert_eq!(percent(50, 100), 50);
        assert_eq!(percent(500, 100), 100);
    }
}
