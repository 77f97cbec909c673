//! Core types for environmental sensor data.

use core::fmt;
use core::str::FromStr;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Device identifier used when none is configured.
pub const DEFAULT_DEVICE_ID: &str = "M5Stack_001";

/// Run-in percentage at which the gas sensor counts as calibrated.
pub const CALIBRATED_THRESHOLD: f32 = 75.0;

/// Run-in percentage at which the gas sensor leaves the uncalibrated band.
pub const STABILIZING_THRESHOLD: f32 = 25.0;

/// A single snapshot produced by the sensor stack.
///
/// Extended measurements (`co2_equivalent`, `iaq`, `voc_equivalent`) keep
/// their zero value until the active subscription produces them. Always check
/// the matching `has_*` flag before treating a zero as a measurement.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SensorReading {
    /// Unix seconds once the clock is synchronized, seconds since boot before that.
    pub timestamp: u64,
    /// Temperature in degrees Celsius.
    pub temperature: f32,
    /// Relative humidity in percent.
    pub humidity: f32,
    /// Barometric pressure in hPa.
    pub pressure: f32,
    /// Estimated CO2 equivalent in ppm.
    pub co2_equivalent: f32,
    /// Indoor air quality index.
    pub iaq: f32,
    /// Breath VOC equivalent in ppm.
    pub voc_equivalent: f32,
    /// Raw gas resistance in ohms.
    pub gas_resistance: f32,
    /// Whether the gas sensor reports a stable baseline.
    pub stabilized: bool,
    /// Calibration completeness, 0 to 100.
    pub runin_status: f32,
    /// Identifier of the producing device.
    pub device_id: String,
    /// `co2_equivalent` holds a produced value.
    pub has_co2_data: bool,
    /// `iaq` holds a produced value.
    pub has_iaq_data: bool,
    /// `voc_equivalent` holds a produced value.
    pub has_voc_data: bool,
    /// `runin_status` is at or above [`CALIBRATED_THRESHOLD`].
    pub is_calibrated: bool,
}

impl Default for SensorReading {
    fn default() -> Self {
        Self::new(DEFAULT_DEVICE_ID)
    }
}

impl SensorReading {
    /// Create an empty reading for the given device.
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            timestamp: 0,
            temperature: 0.0,
            humidity: 0.0,
            pressure: 0.0,
            co2_equivalent: 0.0,
            iaq: 0.0,
            voc_equivalent: 0.0,
            gas_resistance: 0.0,
            stabilized: false,
            runin_status: 0.0,
            device_id: device_id.into(),
            has_co2_data: false,
            has_iaq_data: false,
            has_voc_data: false,
            is_calibrated: false,
        }
    }

    /// Calibration band derived from `runin_status`.
    #[must_use]
    pub fn calibration_state(&self) -> CalibrationState {
        CalibrationState::from_runin(self.runin_status)
    }

    /// Set `runin_status` and recompute `is_calibrated` from it.
    pub fn set_runin_status(&mut self, runin_status: f32) {
        self.runin_status = runin_status;
        self.is_calibrated = runin_status >= CALIBRATED_THRESHOLD;
    }

    /// Whether any extended (non-raw) measurement is present.
    #[must_use]
    pub fn has_extended_data(&self) -> bool {
        self.has_co2_data || self.has_iaq_data || self.has_voc_data
    }
}

/// Calibration band of the gas sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CalibrationState {
    /// Run-in below 25 %.
    #[default]
    Uncalibrated,
    /// Run-in between 25 % and 74 %.
    Stabilizing,
    /// Run-in at 75 % or above.
    Calibrated,
}

impl CalibrationState {
    /// Classify a run-in percentage. NaN is treated as uncalibrated.
    #[must_use]
    pub fn from_runin(runin_status: f32) -> Self {
        if runin_status >= CALIBRATED_THRESHOLD {
            CalibrationState::Calibrated
        } else if runin_status >= STABILIZING_THRESHOLD {
            CalibrationState::Stabilizing
        } else {
            CalibrationState::Uncalibrated
        }
    }
}

impl fmt::Display for CalibrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationState::Uncalibrated => write!(f, "uncalibrated"),
            CalibrationState::Stabilizing => write!(f, "stabilizing"),
            CalibrationState::Calibrated => write!(f, "calibrated"),
        }
    }
}

/// State of the link toward the remote sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ConnectionState {
    /// No link.
    #[default]
    Disconnected,
    /// Association in progress.
    Connecting,
    /// Link is up.
    Connected,
    /// The last probe itself failed.
    Error,
}

impl ConnectionState {
    /// Returns true if the link is up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Error => write!(f, "error"),
        }
    }
}

/// Preference for where readings go when direct delivery is not possible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RecoveryMode {
    /// Failed deliveries go to the in-memory retry queue.
    #[default]
    MemoryQueue,
    /// Failed deliveries go to local storage when it is ready.
    TempStorage,
    /// Direct delivery is skipped entirely.
    FullOffline,
}

impl fmt::Display for RecoveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryMode::MemoryQueue => write!(f, "memory_queue"),
            RecoveryMode::TempStorage => write!(f, "temp_storage"),
            RecoveryMode::FullOffline => write!(f, "full_offline"),
        }
    }
}

impl FromStr for RecoveryMode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "memory_queue" | "memory" => Ok(RecoveryMode::MemoryQueue),
            "temp_storage" | "storage" => Ok(RecoveryMode::TempStorage),
            "full_offline" | "offline" => Ok(RecoveryMode::FullOffline),
            _ => Err(ParseError::InvalidValue(format!(
                "unknown recovery mode '{s}'"
            ))),
        }
    }
}

/// Configured storage preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum StorageMode {
    /// Deliver directly, never write to local storage.
    Online,
    /// Never deliver directly, always buffer locally.
    Offline,
    /// Deliver when connected, buffer locally otherwise.
    #[default]
    Hybrid,
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageMode::Online => write!(f, "online"),
            StorageMode::Offline => write!(f, "offline"),
            StorageMode::Hybrid => write!(f, "hybrid"),
        }
    }
}

impl FromStr for StorageMode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "online" => Ok(StorageMode::Online),
            "offline" => Ok(StorageMode::Offline),
            "hybrid" => Ok(StorageMode::Hybrid),
            _ => Err(ParseError::InvalidValue(format!(
                "unknown storage mode '{s}'"
            ))),
        }
    }
}

/// Discrete sampling rates supported by the sensor stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SampleRate {
    /// One sample per second.
    Continuous,
    /// One sample every 3 seconds.
    LowPower,
    /// One sample every 5 minutes.
    UltraLowPower,
}

impl SampleRate {
    /// Interval between two samples at this rate.
    #[must_use]
    pub fn interval(&self) -> Duration {
        match self {
            SampleRate::Continuous => Duration::from_secs(1),
            SampleRate::LowPower => Duration::from_secs(3),
            SampleRate::UltraLowPower => Duration::from_secs(300),
        }
    }

    /// Pick the fastest rate whose interval is not shorter than `interval`.
    ///
    /// Anything at or above five minutes maps to [`SampleRate::UltraLowPower`].
    #[must_use]
    pub fn for_interval(interval: Duration) -> Self {
        if interval < SampleRate::LowPower.interval() {
            SampleRate::Continuous
        } else if interval < SampleRate::UltraLowPower.interval() {
            SampleRate::LowPower
        } else {
            SampleRate::UltraLowPower
        }
    }
}

impl fmt::Display for SampleRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleRate::Continuous => write!(f, "continuous"),
            SampleRate::LowPower => write!(f, "low_power"),
            SampleRate::UltraLowPower => write!(f, "ultra_low_power"),
        }
    }
}

/// Signal strength reported while no link is up.
pub const NO_SIGNAL_DBM: i8 = -100;

/// Derived snapshot of overall system health.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SystemStatus {
    /// The sensor is initialized and its latest reading is current.
    pub sensor_healthy: bool,
    /// Link state of the upload channel.
    pub connection: ConnectionState,
    /// Local storage usage, 0 to 100.
    pub storage_usage_percent: u8,
    /// Battery charge, 0 to 100.
    pub battery_percent: u8,
    /// Seconds since the system started.
    pub uptime_secs: u64,
    /// Free memory in bytes.
    pub free_memory: u64,
    /// Link signal strength in dBm.
    pub signal_strength: i8,
}

impl Default for SystemStatus {
    fn default() -> Self {
        Self {
            sensor_healthy: false,
            connection: ConnectionState::Disconnected,
            storage_usage_percent: 0,
            battery_percent: 0,
            uptime_secs: 0,
            free_memory: 0,
            signal_strength: NO_SIGNAL_DBM,
        }
    }
}
