//! Wiring of host components from configuration.

use std::sync::Arc;
use std::time::Duration;

use time::UtcOffset;
use tracing::info;

use envmon_core::{
    ChannelOptions, Clock, EventLog, HostPlatform, HttpTransport, OfflineTransport,
    SensorSource, SimulatedStack, SystemClock, Transport, TransportError, UploadChannel,
};
use envmon_store::{LocalStore, StoreOptions};

use crate::config::Config;
use crate::orchestrator::{Orchestrator, OrchestratorOptions};

/// Errors assembling the monitor from configuration.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BuildError {
    #[error("Invalid UTC offset of {minutes} minutes: {source}")]
    Offset {
        minutes: i32,
        source: time::error::ComponentRange,
    },
    #[error("Cannot set up upload transport: {0}")]
    Transport(#[from] TransportError),
}

/// Build the upload transport named by `[upload]`.
///
/// No endpoint means the monitor runs offline.
pub fn build_transport(config: &Config) -> Result<Box<dyn Transport>, BuildError> {
    let upload = &config.upload;
    if !upload.has_endpoint() {
        info!("No upload endpoint configured, running offline");
        return Ok(Box::new(OfflineTransport));
    }

    let mut transport = HttpTransport::new(upload.endpoint.trim())?
        .timeout(Duration::from_secs(upload.timeout_secs));
    if let Some(key) = &upload.api_key {
        transport = transport.api_key(key.clone());
    }
    Ok(Box::new(transport))
}

/// Assemble an orchestrator running against the host.
///
/// The sensor stack is simulated. The HTTP client is blocking, so call this
/// from the thread that will run the control loop.
pub fn build_orchestrator(config: &Config) -> Result<Orchestrator, BuildError> {
    let minutes = config.device.utc_offset_minutes;
    let offset = UtcOffset::from_whole_seconds(minutes * 60)
        .map_err(|source| BuildError::Offset { minutes, source })?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::with_offset(offset));
    let log = Arc::new(EventLog::with_capacity(
        clock.clone(),
        config.logging.event_log_capacity,
    ));

    let stack = SimulatedStack::new(clock.clone()).with_runin(config.sensor.initial_runin);
    let sensor = SensorSource::new(Box::new(stack), clock.clone(), log.clone())
        .device_id(config.device.id.clone());

    let mut store_options = StoreOptions::new(&config.storage.root)
        .retention(config.storage.retention());
    if let Some(capacity) = config.storage.capacity_bytes() {
        store_options = store_options.capacity_bytes(capacity);
    }
    let store = LocalStore::new(store_options, clock.clone(), log.clone());

    let channel_options = ChannelOptions::new()
        .probe_interval(Duration::from_secs(config.upload.probe_interval_secs))
        .batch_limit(config.upload.batch_size)
        .queue_capacity(config.upload.queue_capacity)
        .auto_drain(config.upload.enabled);
    let channel = UploadChannel::with_options(
        build_transport(config)?,
        clock.clone(),
        log.clone(),
        channel_options,
    );

    let mut options = OrchestratorOptions::new()
        .status_interval(Duration::from_secs(config.device.status_interval_secs))
        .maintenance_interval(Duration::from_secs(config.device.maintenance_interval_secs))
        .storage_mode(config.storage.mode)
        .auto_upload(config.upload.enabled)
        .sampling(config.sensor.sample_rate());
    if let Some(path) = &config.logging.event_log_file {
        options = options.event_log_path(path);
    }

    Ok(Orchestrator::new(
        sensor,
        store,
        channel,
        Box::new(HostPlatform::new()),
        clock,
        log,
    )
    .options(options))
}
