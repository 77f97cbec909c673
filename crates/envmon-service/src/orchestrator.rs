//! The control loop: routes readings, refreshes status and runs maintenance.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use envmon_core::{
    Clock, Component, DrainReport, EventCode, EventLog, Platform, SensorResult,
    SensorSource, UploadChannel,
};
use envmon_store::{LocalStore, PartitionFile, WARNING_THRESHOLD};
use envmon_types::{RecoveryMode, SampleRate, SensorReading, StorageMode, SystemStatus};

/// Interval between status refreshes.
pub const STATUS_INTERVAL: Duration = Duration::from_secs(5);
/// Interval between maintenance passes.
pub const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Battery level reported when the platform has no battery.
const MAINS_BATTERY_PERCENT: u8 = 100;

/// Where a reading ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// Delivered to the sink directly.
    Uploaded,
    /// Appended to local storage.
    Stored,
    /// Buffered in the upload queue.
    Queued,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Uploaded => write!(f, "uploaded"),
            Route::Stored => write!(f, "stored"),
            Route::Queued => write!(f, "queued"),
        }
    }
}

/// Overall condition of the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    /// Sensor healthy and at least one way to keep readings.
    Operational,
    /// Running, but the sensor data is stale or storage is unavailable.
    Impaired,
    /// The sensor failed to initialize. Periodic operation is disabled.
    Degraded,
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Health::Operational => write!(f, "operational"),
            Health::Impaired => write!(f, "impaired"),
            Health::Degraded => write!(f, "degraded"),
        }
    }
}

/// Per-route reading counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteStats {
    pub uploaded: u64,
    pub stored: u64,
    pub queued: u64,
    /// Stored readings later delivered by offline sync.
    pub replayed: u64,
}

/// What one call to [`Orchestrator::tick`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickOutcome {
    /// Route of the reading produced this tick, if any.
    pub route: Option<Route>,
    /// Queue drain performed by the upload channel, if any.
    pub drained: Option<DrainReport>,
    /// Stored readings replayed to the sink.
    pub replayed: usize,
    /// Whether the status snapshot was refreshed.
    pub status_refreshed: bool,
    /// Whether a maintenance pass ran.
    pub maintenance: bool,
}

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Interval between status refreshes.
    pub status_interval: Duration,
    /// Interval between maintenance passes.
    pub maintenance_interval: Duration,
    /// Storage preference.
    pub storage_mode: StorageMode,
    /// Upload readings and stored partitions automatically.
    pub auto_upload: bool,
    /// File the event log is flushed to.
    pub event_log_path: Option<PathBuf>,
    /// Sampling rate requested after the sensor initializes.
    pub sampling: Option<SampleRate>,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            status_interval: STATUS_INTERVAL,
            maintenance_interval: MAINTENANCE_INTERVAL,
            storage_mode: StorageMode::default(),
            auto_upload: true,
            event_log_path: None,
            sampling: None,
        }
    }
}

impl OrchestratorOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn status_interval(mut self, interval: Duration) -> Self {
        self.status_interval = interval;
        self
    }

    #[must_use]
    pub fn maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    #[must_use]
    pub fn storage_mode(mut self, mode: StorageMode) -> Self {
        self.storage_mode = mode;
        self
    }

    #[must_use]
    pub fn auto_upload(mut self, enabled: bool) -> Self {
        self.auto_upload = enabled;
        self
    }

    #[must_use]
    pub fn event_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.event_log_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn sampling(mut self, rate: SampleRate) -> Self {
        self.sampling = Some(rate);
        self
    }
}

/// Replay position inside a stored partition.
#[derive(Debug, Clone)]
struct SyncCursor {
    file: PartitionFile,
    next_index: u64,
}

type StatusObserver = Box<dyn FnMut(&SystemStatus) + Send>;

/// Owns the sensor, the local store and the upload channel, and decides
/// where each reading goes.
///
/// Every reading ends up in exactly one place: delivered, appended to disk
/// or buffered in the upload queue.
pub struct Orchestrator {
    sensor: SensorSource,
    store: LocalStore,
    channel: UploadChannel,
    platform: Box<dyn Platform>,
    clock: Arc<dyn Clock>,
    log: Arc<EventLog>,
    options: OrchestratorOptions,
    status: SystemStatus,
    status_observer: Option<StatusObserver>,
    initialized: bool,
    degraded: bool,
    last_status_ms: Option<u64>,
    last_maintenance_ms: u64,
    cursor: Option<SyncCursor>,
    routes: RouteStats,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("sensor", &self.sensor)
            .field("store", &self.store)
            .field("channel", &self.channel)
            .field("options", &self.options)
            .field("status", &self.status)
            .field("initialized", &self.initialized)
            .field("degraded", &self.degraded)
            .field("routes", &self.routes)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Assemble an orchestrator from its components.
    pub fn new(
        sensor: SensorSource,
        store: LocalStore,
        channel: UploadChannel,
        platform: Box<dyn Platform>,
        clock: Arc<dyn Clock>,
        log: Arc<EventLog>,
    ) -> Self {
        Self {
            sensor,
            store,
            channel,
            platform,
            clock,
            log,
            options: OrchestratorOptions::default(),
            status: SystemStatus::default(),
            status_observer: None,
            initialized: false,
            degraded: false,
            last_status_ms: None,
            last_maintenance_ms: 0,
            cursor: None,
            routes: RouteStats::default(),
        }
    }

    /// Replace the options.
    #[must_use]
    pub fn options(mut self, options: OrchestratorOptions) -> Self {
        self.options = options;
        self
    }

    /// Register a callback invoked with every refreshed status snapshot.
    #[must_use]
    pub fn status_observer<F>(mut self, observer: F) -> Self
    where
        F: FnMut(&SystemStatus) + Send + 'static,
    {
        self.status_observer = Some(Box::new(observer));
        self
    }

    /// Bring up every component.
    ///
    /// A sensor failure leaves the monitor degraded and [`tick`](Self::tick)
    /// does nothing afterwards. Storage and network failures are logged and
    /// the monitor runs without them.
    pub fn initialize(&mut self) -> SensorResult<()> {
        self.log.info(Component::System, "Starting environmental monitor");

        if let Err(e) = self.sensor.initialize() {
            self.degraded = true;
            self.log.critical(
                Component::System,
                EventCode::SensorInitFailed,
                format!("Sensor unavailable, entering degraded mode: {e}"),
            );
            return Err(e);
        }
        if let Some(rate) = self.options.sampling {
            // Rejection keeps the subscription chosen at init
            let _ = self.sensor.set_sampling_mode(rate);
        }

        if self.options.storage_mode == StorageMode::Online {
            info!("Online storage mode, local store disabled");
        } else if let Err(e) = self.store.initialize() {
            self.log.warning(
                Component::Storage,
                EventCode::StorageInitFailed,
                format!("Continuing without local storage: {e}"),
            );
        }

        if let Err(e) = self.channel.initialize() {
            self.log.warning(
                Component::Network,
                EventCode::NetworkConnectFailed,
                format!("Continuing without network: {e}"),
            );
        }

        self.initialized = true;
        self.last_maintenance_ms = self.clock.now_ms();
        self.log.info(
            Component::System,
            format!(
                "Monitor running (storage {}, upload {})",
                self.options.storage_mode,
                if self.options.auto_upload { "on" } else { "off" }
            ),
        );
        Ok(())
    }

    fn direct_upload_allowed(&self) -> bool {
        self.options.auto_upload
            && self.options.storage_mode != StorageMode::Offline
            && self.channel.recovery_mode() != RecoveryMode::FullOffline
    }

    fn offline_sync_allowed(&self) -> bool {
        self.options.auto_upload && self.options.storage_mode != StorageMode::Offline
    }

    /// Route one reading to the sink, the local store or the upload queue.
    pub fn on_reading(&mut self, reading: SensorReading) -> Route {
        let route = self.route(reading);
        match route {
            Route::Uploaded => self.routes.uploaded += 1,
            Route::Stored => self.routes.stored += 1,
            Route::Queued => self.routes.queued += 1,
        }
        debug!("Reading routed: {}", route);
        route
    }

    fn route(&mut self, reading: SensorReading) -> Route {
        if self.direct_upload_allowed() && self.channel.is_connected() {
            if self.channel.deliver(&reading).is_ok() {
                return Route::Uploaded;
            }
            if self.channel.recovery_mode() == RecoveryMode::TempStorage
                && self.store.is_ready()
                && self.store.append(&reading).is_ok()
            {
                return Route::Stored;
            }
            self.channel.enqueue(reading);
            return Route::Queued;
        }

        if self.store.is_ready() {
            match self.store.append(&reading) {
                Ok(()) => return Route::Stored,
                Err(e) => warn!("Append failed, queueing reading instead: {}", e),
            }
        }
        self.channel.enqueue(reading);
        Route::Queued
    }

    /// One iteration of the control loop.
    ///
    /// Does nothing until [`initialize`](Self::initialize) has succeeded.
    pub fn tick(&mut self) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        if !self.initialized || self.degraded {
            return outcome;
        }

        if let Some(reading) = self.sensor.poll() {
            outcome.route = Some(self.on_reading(reading));
        }
        outcome.drained = self.channel.tick();
        outcome.replayed = self.sync_offline();

        let now = self.clock.now_ms();
        if self
            .last_status_ms
            .is_none_or(|last| elapsed(now, last, self.options.status_interval))
        {
            self.last_status_ms = Some(now);
            self.refresh_status();
            outcome.status_refreshed = true;
        }
        if elapsed(now, self.last_maintenance_ms, self.options.maintenance_interval) {
            self.last_maintenance_ms = now;
            self.maintenance();
            outcome.maintenance = true;
        }

        outcome
    }

    /// Replay one batch of the oldest unsynced partition.
    ///
    /// Runs only while connected with an empty upload queue. Stops at the
    /// first failed delivery and resumes from that record next time. An
    /// exhausted partition is marked synced.
    pub fn sync_offline(&mut self) -> usize {
        if !self.offline_sync_allowed()
            || !self.channel.is_connected()
            || !self.channel.queue().is_empty()
            || !self.store.is_ready()
        {
            return 0;
        }

        let mut cursor = match self.cursor.take() {
            Some(cursor) => cursor,
            None => match self.store.oldest_unsynced() {
                Some(file) => {
                    info!("Replaying stored partition {}", file.name);
                    SyncCursor {
                        file,
                        next_index: 0,
                    }
                }
                None => return 0,
            },
        };

        let limit = self.channel.options().batch_limit;
        let batch = match self.store.read_batch(&cursor.file, cursor.next_index, limit) {
            Ok(batch) => batch,
            Err(e) => {
                warn!("Cannot replay {}: {}", cursor.file.name, e);
                self.cursor = Some(cursor);
                return 0;
            }
        };

        if batch.is_empty() {
            match self.store.mark_synced(&cursor.file) {
                Ok(path) => self.log.info(
                    Component::Storage,
                    format!("Partition {} synced to {}", cursor.file.name, path.display()),
                ),
                Err(e) => {
                    self.log.error(
                        Component::Storage,
                        EventCode::StorageArchiveFailed,
                        format!("Cannot mark {} synced: {}", cursor.file.name, e),
                    );
                    self.cursor = Some(cursor);
                }
            }
            return 0;
        }

        let mut replayed = 0;
        for record in batch {
            if self.channel.deliver(&record.reading).is_err() {
                break;
            }
            cursor.next_index = record.index + 1;
            replayed += 1;
        }
        self.routes.replayed += replayed as u64;
        self.cursor = Some(cursor);
        replayed
    }

    fn refresh_status(&mut self) {
        self.status = SystemStatus {
            sensor_healthy: self.sensor.is_initialized() && self.sensor.is_data_valid(),
            connection: self.channel.state(),
            storage_usage_percent: if self.store.is_ready() {
                self.store.usage_percent()
            } else {
                0
            },
            battery_percent: self
                .platform
                .battery_percent()
                .unwrap_or(MAINS_BATTERY_PERCENT),
            uptime_secs: self.clock.uptime().as_secs(),
            free_memory: self.platform.free_memory(),
            signal_strength: self.channel.signal_strength(),
        };
        if let Some(observer) = self.status_observer.as_mut() {
            observer(&self.status);
        }
    }

    /// Periodic housekeeping.
    pub fn maintenance(&mut self) {
        debug!("Running maintenance");

        if self.options.storage_mode != StorageMode::Online && !self.store.is_ready() {
            match self.store.initialize() {
                Ok(()) => self.log.info(Component::Storage, "Local storage recovered"),
                Err(e) => debug!("Local storage still unavailable: {}", e),
            }
        }

        if self.store.is_ready() && self.store.usage_percent() > WARNING_THRESHOLD {
            match self.store.archive_old_files() {
                Ok(report) => self.log.info(
                    Component::Storage,
                    format!(
                        "Archived {} partitions, usage {}% -> {}%",
                        report.removed(),
                        report.usage_before,
                        report.usage_after
                    ),
                ),
                Err(e) => self.log.error(
                    Component::Storage,
                    EventCode::StorageArchiveFailed,
                    format!("Archival failed: {e}"),
                ),
            }
        }

        if self.options.auto_upload
            && self.channel.is_connected()
            && !self.channel.queue().is_empty()
        {
            let report = self.channel.drain_once();
            debug!(
                "Maintenance drain delivered {}, {} remaining",
                report.delivered, report.remaining
            );
        }

        if !self.clock.is_synced()
            && self.channel.is_connected()
            && let Err(e) = self.clock.synchronize()
        {
            self.log.warning(
                Component::System,
                EventCode::TimeSyncFailed,
                format!("Clock sync failed: {e}"),
            );
        }

        if !self.sensor.is_full_mode() {
            let _ = self.sensor.upgrade_to_full_mode();
        }
        self.sensor.check_stack_status();

        self.flush_event_log();
    }

    fn flush_event_log(&self) {
        let Some(path) = &self.options.event_log_path else {
            return;
        };
        match self.log.flush_to(path) {
            Ok(count) => debug!("Flushed {} events to {}", count, path.display()),
            Err(e) => warn!("Cannot flush event log to {}: {}", path.display(), e),
        }
    }

    /// Flush the event log. The orchestrator stays usable afterwards.
    pub fn shutdown(&mut self) {
        self.log.info(
            Component::System,
            format!(
                "Shutting down: {} uploaded, {} stored, {} queued, {} replayed",
                self.routes.uploaded, self.routes.stored, self.routes.queued, self.routes.replayed
            ),
        );
        if !self.channel.queue().is_empty() {
            warn!(
                "{} queued readings not delivered",
                self.channel.queue().len()
            );
        }
        self.flush_event_log();
    }

    /// Latest status snapshot.
    pub fn status(&self) -> &SystemStatus {
        &self.status
    }

    /// Overall condition.
    pub fn health(&self) -> Health {
        if self.degraded {
            Health::Degraded
        } else if !self.initialized
            || !self.status.sensor_healthy
            || (!self.store.is_ready() && !self.channel.is_connected())
        {
            Health::Impaired
        } else {
            Health::Operational
        }
    }

    /// Whether the sensor failed to initialize.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn routes(&self) -> RouteStats {
        self.routes
    }

    pub fn sensor(&self) -> &SensorSource {
        &self.sensor
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn channel(&self) -> &UploadChannel {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut UploadChannel {
        &mut self.channel
    }

    pub fn event_log(&self) -> &Arc<EventLog> {
        &self.log
    }
}

fn elapsed(now_ms: u64, since_ms: u64, interval: Duration) -> bool {
    let interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
    now_ms.saturating_sub(since_ms) >= interval_ms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed() {
        assert!(!elapsed(4_999, 0, STATUS_INTERVAL));
        assert!(elapsed(5_000, 0, STATUS_INTERVAL));
        assert!(!elapsed(0, 10, STATUS_INTERVAL));
    }

    #[test]
    fn test_options_builder() {
        let options = OrchestratorOptions::new()
            .storage_mode(StorageMode::Online)
            .auto_upload(false)
            .sampling(SampleRate::Continuous)
            .event_log_path("/tmp/events.jsonl");
        assert_eq!(options.storage_mode, StorageMode::Online);
        assert!(!options.auto_upload);
        assert_eq!(options.sampling, Some(SampleRate::Continuous));
        assert_eq!(options.status_interval, STATUS_INTERVAL);
        assert_eq!(options.maintenance_interval, MAINTENANCE_INTERVAL);
    }

    #[test]
    fn test_route_display() {
        assert_eq!(Route::Uploaded.to_string(), "uploaded");
        assert_eq!(Health::Degraded.to_string(), "degraded");
    }
}
