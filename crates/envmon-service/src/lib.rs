//! Control loop for the envmon environmental monitor.
//!
//! This crate ties the sensor, the local store and the upload channel
//! together:
//! - Routes every reading to the sink, the local store or the upload queue
//! - Replays stored partitions once the sink is reachable again
//! - Refreshes a [`SystemStatus`](envmon_types::SystemStatus) snapshot every
//!   few seconds
//! - Runs periodic maintenance (archival, clock sync, sensor upgrade, event
//!   log flush)
//!
//! # Configuration
//!
//! The `envmon` binary reads configuration from
//! `~/.config/envmon/envmon.toml`:
//!
//! ```toml
//! [device]
//! id = "M5Stack_001"
//! utc_offset_minutes = 60
//!
//! [sensor]
//! sampling_interval_ms = 3000
//!
//! [upload]
//! enabled = true
//! endpoint = "http://192.168.1.10:8080"
//! api_key = "your-api-key"
//!
//! [storage]
//! mode = "hybrid"   # online | offline | hybrid
//! root = "/media/sd"
//! capacity_mb = 1024
//!
//! [logging]
//! level = "info"
//! event_log_file = "/media/sd/events.jsonl"
//! ```
//!
//! Invalid or unreadable configuration is reported and replaced by defaults.

pub mod config;
pub mod orchestrator;
pub mod runtime;

pub use config::{Config, ConfigError, ValidationError, default_config_path};
pub use orchestrator::{
    Health, MAINTENANCE_INTERVAL, Orchestrator, OrchestratorOptions, Route, RouteStats,
    STATUS_INTERVAL, TickOutcome,
};
pub use runtime::{BuildError, build_orchestrator, build_transport};
