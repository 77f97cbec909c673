//! Error types for envmon-core.
//!
//! # Error Recovery Strategies
//!
//! | Error | Strategy |
//! |-------|----------|
//! | [`SensorError::InitFailed`] | Fatal at startup, the system stays degraded |
//! | [`SensorError::SubscriptionFailed`] | Keep the previous subscription, retry on maintenance |
//! | [`SensorError::Stale`] | Ignore the reading, wait for the next processing step |
//! | [`TransportError::NotConnected`] | Buffer the reading, wait for the next probe |
//! | [`TransportError::DeliveryFailed`] | Buffer the reading, the link is re-probed on schedule |
//! | [`TimeSyncError`] | Keep uptime-based timestamps, retry on maintenance |
//!
//! None of these errors demote the connection state. Only a probe does.

use std::time::Duration;

use thiserror::Error;

use envmon_types::SampleRate;

/// Errors raised by the sensor acquisition path.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SensorError {
    /// The sensor could not be brought up.
    #[error("Sensor initialization failed: {0}")]
    InitFailed(InitFailureReason),

    /// A subscription change was rejected; the previous one stays active.
    #[error("Subscription at {rate} failed: {reason}")]
    SubscriptionFailed {
        /// Rate that was requested.
        rate: SampleRate,
        /// Message from the sensor stack.
        reason: String,
    },

    /// The latest reading is too old to be trusted.
    #[error("Sensor data is stale ({age:?} old)")]
    Stale {
        /// Age of the latest reading.
        age: Duration,
    },

    /// The operation needs an initialized sensor.
    #[error("Sensor not initialized")]
    NotInitialized,
}

/// Why sensor initialization failed.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum InitFailureReason {
    /// No sensor answered at any of the probed bus addresses.
    NoSensor {
        /// Addresses that were probed, in order.
        addresses: Vec<u8>,
    },
    /// The sensor answered but rejected every subscription candidate.
    NoSubscription {
        /// Number of candidates tried.
        attempts: usize,
    },
}

impl std::fmt::Display for InitFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoSensor { addresses } => {
                let list = addresses
                    .iter()
                    .map(|a| format!("0x{a:02X}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "no sensor found at {list}")
            }
            Self::NoSubscription { attempts } => {
                write!(f, "all {attempts} subscription candidates were rejected")
            }
        }
    }
}

/// Error reported by a sensor stack implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("sensor stack error {code}: {message}")]
pub struct StackError {
    /// Stack status code (negative for errors).
    pub code: i32,
    /// Human-readable description.
    pub message: String,
}

impl StackError {
    /// Create a new stack error.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Errors raised by the upload channel and its transports.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// Delivery was attempted while the link is not up.
    #[error("Not connected to the sink")]
    NotConnected,

    /// The sink rejected or dropped a delivery.
    #[error("Delivery failed: {reason}")]
    DeliveryFailed {
        /// Description of the failure.
        reason: String,
    },

    /// The link probe could not be completed.
    #[error("Sink not reachable at {endpoint}: {reason}")]
    Unreachable {
        /// Endpoint that was probed.
        endpoint: String,
        /// Description of the failure.
        reason: String,
    },

    /// The transport could not be set up.
    #[error("Transport initialization failed: {0}")]
    Init(String),

    /// Invalid transport configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl TransportError {
    /// Create a delivery failure.
    pub fn delivery(reason: impl Into<String>) -> Self {
        Self::DeliveryFailed {
            reason: reason.into(),
        }
    }
}

/// Errors raised while synchronizing the wall clock.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TimeSyncError {
    /// No plausible time was obtained within the attempt budget.
    #[error("Time sync gave up after {attempts} attempts")]
    Unavailable {
        /// Number of attempts made.
        attempts: u32,
    },

    /// The time source returned a value before the plausibility floor.
    #[error("Implausible wall-clock time: {seconds}s since epoch")]
    Implausible {
        /// Seconds since the Unix epoch.
        seconds: u64,
    },
}

/// Result type alias for sensor operations.
pub type SensorResult<T> = std::result::Result<T, SensorError>;

/// Result type alias for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;
