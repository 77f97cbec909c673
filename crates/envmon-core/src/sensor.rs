//! Sensor acquisition with calibration tracking.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use envmon_types::{CalibrationState, DEFAULT_DEVICE_ID, SampleRate, SensorReading};

use crate::clock::Clock;
use crate::error::{InitFailureReason, SensorError, SensorResult};
use crate::events::{Component, EventCode, EventLog};
use crate::stack::{
    INIT_CANDIDATES, OutputSet, ReadingAdapter, SENSOR_ADDRESSES, SensorStack, SignalAdapter,
    StackStatus, Subscription, UPGRADE_CANDIDATES,
};

/// A reading older than this is no longer valid.
pub const STALE_AFTER: Duration = Duration::from_secs(600);

/// Callback invoked synchronously with every new reading.
pub type ReadingObserver = Box<dyn FnMut(&SensorReading) + Send>;

/// Owns the sensor stack and the latest reading.
pub struct SensorSource {
    stack: Box<dyn SensorStack>,
    adapter: Box<dyn ReadingAdapter>,
    clock: Arc<dyn Clock>,
    log: Arc<EventLog>,
    observer: Option<ReadingObserver>,
    current: SensorReading,
    address: Option<u8>,
    active: Option<Subscription>,
    initialized: bool,
    last_reading_ms: Option<u64>,
    last_status: StackStatus,
    consecutive_failures: u32,
    readings: u64,
}

impl fmt::Debug for SensorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SensorSource")
            .field("device_id", &self.current.device_id)
            .field("address", &self.address)
            .field("active", &self.active)
            .field("initialized", &self.initialized)
            .finish()
    }
}

impl SensorSource {
    /// Create a source over a sensor stack using the default [`SignalAdapter`].
    pub fn new(stack: Box<dyn SensorStack>, clock: Arc<dyn Clock>, log: Arc<EventLog>) -> Self {
        Self {
            stack,
            adapter: Box::new(SignalAdapter),
            clock,
            log,
            observer: None,
            current: SensorReading::new(DEFAULT_DEVICE_ID),
            address: None,
            active: None,
            initialized: false,
            last_reading_ms: None,
            last_status: StackStatus::OK,
            consecutive_failures: 0,
            readings: 0,
        }
    }

    /// Set the device identifier stamped on readings.
    #[must_use]
    pub fn device_id(mut self, device_id: impl Into<String>) -> Self {
        self.current.device_id = device_id.into();
        self
    }

    /// Replace the output-to-reading adapter.
    #[must_use]
    pub fn adapter(mut self, adapter: Box<dyn ReadingAdapter>) -> Self {
        self.adapter = adapter;
        self
    }

    /// Register the callback invoked with each new reading.
    #[must_use]
    pub fn observer<F>(mut self, observer: F) -> Self
    where
        F: FnMut(&SensorReading) + Send + 'static,
    {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Find the sensor on the bus and subscribe to the richest accepted output set.
    pub fn initialize(&mut self) -> SensorResult<()> {
        let Some(address) = self.probe_addresses() else {
            self.log.error(
                Component::Sensor,
                EventCode::SensorInitFailed,
                "No sensor found on the bus",
            );
            return Err(SensorError::InitFailed(InitFailureReason::NoSensor {
                addresses: SENSOR_ADDRESSES.to_vec(),
            }));
        };
        self.address = Some(address);
        self.log.info(
            Component::Sensor,
            format!("Sensor found at 0x{address:02X}"),
        );

        for candidate in INIT_CANDIDATES {
            match self.subscribe(candidate) {
                Ok(()) => {
                    self.initialized = true;
                    self.log.info(
                        Component::Sensor,
                        format!("Sensor subscribed to {candidate}"),
                    );
                    self.check_stack_status();
                    return Ok(());
                }
                Err(e) => self.log.warning(
                    Component::Sensor,
                    EventCode::SubscriptionFailed,
                    format!("Subscription {candidate} rejected: {e}"),
                ),
            }
        }

        self.log.error(
            Component::Sensor,
            EventCode::SensorInitFailed,
            "Sensor rejected every subscription",
        );
        Err(SensorError::InitFailed(InitFailureReason::NoSubscription {
            attempts: INIT_CANDIDATES.len(),
        }))
    }

    fn probe_addresses(&mut self) -> Option<u8> {
        for address in SENSOR_ADDRESSES {
            match self.stack.begin(address) {
                Ok(()) => return Some(address),
                Err(e) => debug!("No sensor at 0x{:02X}: {}", address, e),
            }
        }
        None
    }

    fn subscribe(&mut self, subscription: Subscription) -> SensorResult<()> {
        self.stack
            .update_subscription(subscription.outputs.signals(), subscription.rate)
            .map_err(|e| SensorError::SubscriptionFailed {
                rate: subscription.rate,
                reason: e.message,
            })?;
        self.active = Some(subscription);
        Ok(())
    }

    /// Drive one processing step of the stack.
    ///
    /// Returns the new reading when the step produced outputs. The observer,
    /// if any, has already seen it.
    pub fn poll(&mut self) -> Option<SensorReading> {
        if !self.initialized {
            return None;
        }

        let outputs = match self.stack.run() {
            Ok(Some(outputs)) if !outputs.is_empty() => outputs,
            Ok(_) => return None,
            Err(e) => {
                self.consecutive_failures += 1;
                if self.consecutive_failures == 1 {
                    self.log.warning(
                        Component::Sensor,
                        EventCode::SensorReadFailed,
                        format!("Sensor processing step failed: {e}"),
                    );
                }
                self.check_stack_status();
                return None;
            }
        };
        if self.consecutive_failures > 0 {
            self.log.info(
                Component::Sensor,
                format!(
                    "Sensor recovered after {} failed steps",
                    self.consecutive_failures
                ),
            );
            self.consecutive_failures = 0;
        }

        let timestamp = self.clock.timestamp();
        let reading = self
            .adapter
            .deliver_reading(&self.current, &outputs, timestamp);
        self.note_transitions(&reading);

        self.current = reading;
        self.last_reading_ms = Some(self.clock.now_ms());
        self.readings += 1;
        if let Some(observer) = self.observer.as_mut() {
            observer(&self.current);
        }
        Some(self.current.clone())
    }

    fn note_transitions(&self, next: &SensorReading) {
        let before = self.current.calibration_state();
        let after = next.calibration_state();
        if before != after {
            self.log.info(
                Component::Sensor,
                format!(
                    "Calibration {} -> {} (run-in {:.0}%)",
                    before, after, next.runin_status
                ),
            );
        }
        if self.current.stabilized != next.stabilized {
            let state = if next.stabilized { "stabilized" } else { "unstable" };
            self.log
                .info(Component::Sensor, format!("Gas sensor {state}"));
        }
    }

    /// Whether the latest reading is current and usable.
    pub fn is_data_valid(&self) -> bool {
        self.initialized
            && self.current.timestamp > 0
            && self
                .reading_age()
                .is_some_and(|age| age < STALE_AFTER)
    }

    /// Age of the latest reading.
    pub fn reading_age(&self) -> Option<Duration> {
        self.last_reading_ms
            .map(|at| Duration::from_millis(self.clock.now_ms().saturating_sub(at)))
    }

    /// The latest reading if it is valid.
    pub fn valid_reading(&self) -> SensorResult<&SensorReading> {
        if !self.initialized {
            return Err(SensorError::NotInitialized);
        }
        if self.is_data_valid() {
            Ok(&self.current)
        } else {
            Err(SensorError::Stale {
                age: self.reading_age().unwrap_or(Duration::MAX),
            })
        }
    }

    /// The latest reading, valid or not.
    pub fn current_reading(&self) -> &SensorReading {
        &self.current
    }

    pub fn calibration_state(&self) -> CalibrationState {
        self.current.calibration_state()
    }

    pub fn is_calibrated(&self) -> bool {
        self.current.is_calibrated
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Bus address the sensor answered at.
    pub fn address(&self) -> Option<u8> {
        self.address
    }

    pub fn active_subscription(&self) -> Option<Subscription> {
        self.active
    }

    /// Whether the full output set is active.
    pub fn is_full_mode(&self) -> bool {
        self.active.is_some_and(|s| s.outputs == OutputSet::Full)
    }

    /// Number of readings produced since start.
    pub fn readings_produced(&self) -> u64 {
        self.readings
    }

    /// Re-subscribe to the full output set, fastest accepted rate first.
    ///
    /// On failure the previous subscription stays active.
    pub fn upgrade_to_full_mode(&mut self) -> SensorResult<Subscription> {
        if !self.initialized {
            return Err(SensorError::NotInitialized);
        }
        let previous = self.active;
        let mut last_error = None;
        for candidate in UPGRADE_CANDIDATES {
            if previous == Some(candidate) {
                return Ok(candidate);
            }
            match self.subscribe(candidate) {
                Ok(()) => {
                    self.log.info(
                        Component::Sensor,
                        format!("Sensor upgraded to {candidate}"),
                    );
                    return Ok(candidate);
                }
                Err(e) => last_error = Some(e),
            }
        }
        let err = last_error.unwrap_or(SensorError::NotInitialized);
        self.log.warning(
            Component::Sensor,
            EventCode::SubscriptionFailed,
            format!("Full mode upgrade failed: {err}"),
        );
        Err(err)
    }

    /// Change the sampling rate, keeping the active output set.
    ///
    /// On failure the previous subscription stays active.
    pub fn set_sampling_mode(&mut self, rate: SampleRate) -> SensorResult<()> {
        let Some(active) = self.active.filter(|_| self.initialized) else {
            return Err(SensorError::NotInitialized);
        };
        if active.rate == rate {
            return Ok(());
        }
        let next = Subscription::new(active.outputs, rate);
        match self.subscribe(next) {
            Ok(()) => {
                self.log
                    .info(Component::Sensor, format!("Sampling mode set to {next}"));
                Ok(())
            }
            Err(e) => {
                self.log.warning(
                    Component::Sensor,
                    EventCode::SubscriptionFailed,
                    format!("Sampling mode {next} rejected: {e}"),
                );
                Err(e)
            }
        }
    }

    /// Read the stack status and report changes to the event log.
    pub fn check_stack_status(&mut self) -> StackStatus {
        let status = self.stack.status();
        if status != self.last_status {
            if status.is_error() {
                self.log.error(
                    Component::Sensor,
                    EventCode::SensorReadFailed,
                    format!("Sensor stack error {}", status.0),
                );
            } else if status == StackStatus::TIMING_VIOLATION {
                self.log.warning(
                    Component::Sensor,
                    EventCode::SensorStatusWarning,
                    "Sensor stack timing violation, processing step called off schedule",
                );
            } else if status.is_warning() {
                self.log.warning(
                    Component::Sensor,
                    EventCode::SensorStatusWarning,
                    format!("Sensor stack warning {}", status.0),
                );
            }
            self.last_status = status;
        }
        status
    }
}
