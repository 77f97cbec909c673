//! Platform-agnostic types for the envmon environmental monitor.
//!
//! This crate provides the data model shared by the acquisition, storage and
//! upload crates (envmon-core, envmon-store, envmon-service).
//!
//! # Features
//!
//! - Sensor readings with explicit presence flags for extended measurements
//! - Calibration, connectivity, recovery and storage-mode enums
//! - System status snapshot
//! - Error types for record and value parsing
//!
//! # Example
//!
//! ```
//! use envmon_types::{CalibrationState, SensorReading};
//!
//! let mut reading = SensorReading::new("M5Stack_001");
//! reading.set_runin_status(80.0);
//! assert!(reading.is_calibrated);
//! assert_eq!(reading.calibration_state(), CalibrationState::Calibrated);
//! ```

pub mod error;
pub mod types;

pub use error::{ParseError, ParseResult};
pub use types::{
    CALIBRATED_THRESHOLD, CalibrationState, ConnectionState, DEFAULT_DEVICE_ID, NO_SIGNAL_DBM,
    RecoveryMode, STABILIZING_THRESHOLD, SampleRate, SensorReading, StorageMode, SystemStatus,
};

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_new_reading_has_no_extended_data() {
        let reading = SensorReading::new("dev");
        assert_eq!(reading.device_id, "dev");
        assert_eq!(reading.timestamp, 0);
        assert!(!reading.has_co2_data);
        assert!(!reading.has_iaq_data);
        assert!(!reading.has_voc_data);
        assert!(!reading.has_extended_data());
        assert!(!reading.is_calibrated);
    }

    #[test]
    fn test_default_reading_uses_default_device_id() {
        assert_eq!(SensorReading::default().device_id, DEFAULT_DEVICE_ID);
    }

    #[test]
    fn test_calibration_bands() {
        assert_eq!(CalibrationState::from_runin(0.0), CalibrationState::Uncalibrated);
        assert_eq!(CalibrationState::from_runin(24.9), CalibrationState::Uncalibrated);
        assert_eq!(CalibrationState::from_runin(25.0), CalibrationState::Stabilizing);
        assert_eq!(CalibrationState::from_runin(74.9), CalibrationState::Stabilizing);
        assert_eq!(CalibrationState::from_runin(75.0), CalibrationState::Calibrated);
        assert_eq!(CalibrationState::from_runin(100.0), CalibrationState::Calibrated);
        assert_eq!(
            CalibrationState::from_runin(f32::NAN),
            CalibrationState::Uncalibrated
        );
    }

    #[test]
    fn test_set_runin_status_updates_flag() {
        let mut reading = SensorReading::default();
        reading.set_runin_status(74.99);
        assert!(!reading.is_calibrated);
        reading.set_runin_status(75.0);
        assert!(reading.is_calibrated);
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Error.is_connected());
    }

    #[test]
    fn test_recovery_mode_from_str() {
        assert_eq!(
            "memory_queue".parse::<RecoveryMode>().unwrap(),
            RecoveryMode::MemoryQueue
        );
        assert_eq!(
            "TEMP-STORAGE".parse::<RecoveryMode>().unwrap(),
            RecoveryMode::TempStorage
        );
        assert_eq!(
            "offline".parse::<RecoveryMode>().unwrap(),
            RecoveryMode::FullOffline
        );
        assert!("sometimes".parse::<RecoveryMode>().is_err());
    }

    #[test]
    fn test_storage_mode_from_str() {
        assert_eq!("HYBRID".parse::<StorageMode>().unwrap(), StorageMode::Hybrid);
        assert_eq!("online".parse::<StorageMode>().unwrap(), StorageMode::Online);
        let err = "cloud".parse::<StorageMode>().unwrap_err();
        assert!(err.to_string().contains("cloud"));
    }

    #[test]
    fn test_sample_rate_for_interval() {
        assert_eq!(
            SampleRate::for_interval(Duration::from_secs(1)),
            SampleRate::Continuous
        );
        assert_eq!(
            SampleRate::for_interval(Duration::from_secs(3)),
            SampleRate::LowPower
        );
        assert_eq!(
            SampleRate::for_interval(Duration::from_secs(60)),
            SampleRate::LowPower
        );
        assert_eq!(
            SampleRate::for_interval(Duration::from_secs(300)),
            SampleRate::UltraLowPower
        );
    }

    #[test]
    fn test_system_status_default() {
        let status = SystemStatus::default();
        assert!(!status.sensor_healthy);
        assert_eq!(status.connection, ConnectionState::Disconnected);
        assert_eq!(status.signal_strength, NO_SIGNAL_DBM);
        assert_eq!(status.uptime_secs, 0);
    }

    #[test]
    fn test_reading_serializes_to_json() {
        let mut reading = SensorReading::new("dev");
        reading.temperature = 21.5;
        reading.has_co2_data = true;
        reading.co2_equivalent = 612.0;
        let json = serde_json::to_string(&reading).unwrap();
        assert!(json.contains("\"device_id\":\"dev\""));
        assert!(json.contains("\"has_co2_data\":true"));

        let back: SensorReading = serde_json::from_str(&json).unwrap();
        assert_eq!(back, reading);
    }

    #[test]
    fn test_enum_serde_names() {
        assert_eq!(
            serde_json::to_string(&RecoveryMode::TempStorage).unwrap(),
            "\"temp_storage\""
        );
        assert_eq!(
            serde_json::to_string(&StorageMode::Hybrid).unwrap(),
            "\"hybrid\""
        );
    }
}

/// Property-based tests for the calibration flag.
#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// `is_calibrated` and the calibrated band always agree with the threshold.
        #[test]
        fn is_calibrated_matches_threshold(runin in 0.0f32..=100.0) {
            let mut reading = SensorReading::default();
            reading.set_runin_status(runin);
            prop_assert_eq!(reading.is_calibrated, runin >= CALIBRATED_THRESHOLD);
            prop_assert_eq!(
                reading.calibration_state() == CalibrationState::Calibrated,
                reading.is_calibrated
            );
        }
    }
}
