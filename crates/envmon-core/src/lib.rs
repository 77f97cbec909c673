//! Acquisition and delivery core for the envmon environmental monitor.
//!
//! This crate drives a gas/climate sensor stack and moves its readings
//! toward a remote sink over an intermittent link.
//!
//! # Features
//!
//! - **Sensor acquisition**: address and subscription fallback ladders,
//!   calibration tracking and staleness checks ([`SensorSource`])
//! - **Upload channel**: link state machine, bounded drop-oldest queue and
//!   batched draining ([`UploadChannel`])
//! - **Event log**: bounded in-memory diagnostic ring mirrored to `tracing`
//!   ([`EventLog`])
//! - **Clock**: monotonic time plus wall-clock synchronization ([`Clock`])
//! - **Simulation**: a software sensor stack and scriptable test doubles
//!
//! # Cargo features
//!
//! - `http`: enables [`HttpTransport`](http::HttpTransport), which posts
//!   readings as JSON with the blocking `reqwest` client.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//!
//! use envmon_core::{EventLog, MockClock, SensorSource, SimulatedStack};
//!
//! let clock = Arc::new(MockClock::new());
//! let log = Arc::new(EventLog::new(clock.clone()));
//! let stack = SimulatedStack::new(clock.clone());
//!
//! let mut sensor = SensorSource::new(Box::new(stack), clock.clone(), log);
//! sensor.initialize().unwrap();
//!
//! clock.advance_ms(3_000);
//! let reading = sensor.poll().unwrap();
//! println!("{:.1} °C", reading.temperature);
//! ```

pub mod clock;
pub mod error;
pub mod events;
#[cfg(feature = "http")]
pub mod http;
pub mod mock;
pub mod platform;
pub mod retry;
pub mod sensor;
pub mod simulated;
pub mod stack;
pub mod transport;
pub mod upload;

pub use clock::{Clock, PLAUSIBLE_EPOCH_SECS, SystemClock};
pub use error::{
    InitFailureReason, SensorError, SensorResult, StackError, TimeSyncError, TransportError,
    TransportResult,
};
pub use events::{Component, EventCode, EventLog, LogEntry, Severity};
pub use mock::{MockClock, MockPlatform, MockTransport};
pub use platform::{HostPlatform, Platform};
pub use retry::{RetryConfig, with_retry};
pub use sensor::{ReadingObserver, STALE_AFTER, SensorSource};
pub use simulated::{SimulatedStack, StackControls};
pub use stack::{
    OutputSet, OutputSignal, ReadingAdapter, SensorOutput, SensorStack, SignalAdapter,
    StackStatus, Subscription,
};
pub use transport::{LinkStatus, OfflineTransport, Transport};
pub use upload::{ChannelOptions, ChannelStats, DrainReport, UploadChannel, UploadQueue};

#[cfg(feature = "http")]
pub use http::HttpTransport;

// Re-export the shared data model
pub use envmon_types::{
    CalibrationState, ConnectionState, RecoveryMode, SampleRate, SensorReading, StorageMode,
    SystemStatus,
};
