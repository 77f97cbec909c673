//! Monitor configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use envmon_types::{DEFAULT_DEVICE_ID, SampleRate, StorageMode};

/// Monitor configuration, read from `envmon.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Device identity and control loop timing.
    pub device: DeviceConfig,
    /// Sensor acquisition.
    pub sensor: SensorConfig,
    /// Remote sink.
    pub upload: UploadConfig,
    /// Local buffering.
    pub storage: StorageConfig,
    /// Logging and the event log file.
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return every error found.
    ///
    /// # Example
    ///
    /// ```
    /// use envmon_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.device.validate());
        errors.extend(self.sensor.validate());
        errors.extend(self.upload.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.logging.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate, falling back to defaults on any error.
    ///
    /// The error, if any, is returned alongside so the caller can report it
    /// once logging is up.
    pub fn load_or_default(path: Option<&Path>) -> (Self, Option<ConfigError>) {
        let loaded = match path {
            Some(path) => Self::load(path),
            None => Self::load_default(),
        };
        match loaded.and_then(|config| config.validate().map(|()| config)) {
            Ok(config) => (config, None),
            Err(e) => (Self::default(), Some(e)),
        }
    }
}

/// Device identity and control loop timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Identifier stamped on every reading.
    pub id: String,
    /// Offset of local time from UTC, in minutes. Used for partition dates.
    pub utc_offset_minutes: i32,
    /// Interval between system status refreshes, in seconds.
    pub status_interval_secs: u64,
    /// Interval between maintenance passes, in seconds.
    pub maintenance_interval_secs: u64,
    /// Sleep between control loop iterations, in milliseconds.
    pub loop_interval_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            id: DEFAULT_DEVICE_ID.to_string(),
            utc_offset_minutes: 0,
            status_interval_secs: 5,
            maintenance_interval_secs: 300,
            loop_interval_ms: 100,
        }
    }
}

/// Largest accepted UTC offset magnitude in minutes (UTC-12:00 to UTC+14:00).
const MIN_UTC_OFFSET_MINUTES: i32 = -12 * 60;
const MAX_UTC_OFFSET_MINUTES: i32 = 14 * 60;

impl DeviceConfig {
    /// Validate device configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.id.trim().is_empty() {
            errors.push(ValidationError::new("device.id", "device id cannot be empty"));
        } else if self.id.contains(',') || self.id.contains('\n') {
            errors.push(ValidationError::new(
                "device.id",
                format!("device id '{}' cannot contain commas or newlines", self.id),
            ));
        }

        if !(MIN_UTC_OFFSET_MINUTES..=MAX_UTC_OFFSET_MINUTES).contains(&self.utc_offset_minutes) {
            errors.push(ValidationError::new(
                "device.utc_offset_minutes",
                format!(
                    "offset {} is out of range ({} to {})",
                    self.utc_offset_minutes, MIN_UTC_OFFSET_MINUTES, MAX_UTC_OFFSET_MINUTES
                ),
            ));
        }

        if self.status_interval_secs == 0 {
            errors.push(ValidationError::new(
                "device.status_interval_secs",
                "status interval must be at least 1 second",
            ));
        }
        if self.maintenance_interval_secs == 0 {
            errors.push(ValidationError::new(
                "device.maintenance_interval_secs",
                "maintenance interval must be at least 1 second",
            ));
        }
        if self.loop_interval_ms == 0 || self.loop_interval_ms > 1000 {
            errors.push(ValidationError::new(
                "device.loop_interval_ms",
                format!(
                    "loop interval {} must be between 1 and 1000 ms",
                    self.loop_interval_ms
                ),
            ));
        }

        errors
    }
}

/// Minimum sampling interval in milliseconds (1 second).
pub const MIN_SAMPLING_INTERVAL_MS: u64 = 1_000;
/// Maximum sampling interval in milliseconds (5 minutes).
pub const MAX_SAMPLING_INTERVAL_MS: u64 = 300_000;

/// Sensor acquisition settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Requested sampling interval in milliseconds.
    pub sampling_interval_ms: u64,
    /// Run-in percentage the simulated sensor starts from.
    pub initial_runin: f32,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            sampling_interval_ms: 3_000,
            initial_runin: 0.0,
        }
    }
}

impl SensorConfig {
    /// Sensor stack rate closest to the requested interval.
    pub fn sample_rate(&self) -> SampleRate {
        SampleRate::for_interval(Duration::from_millis(self.sampling_interval_ms))
    }

    /// Validate sensor configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.sampling_interval_ms < MIN_SAMPLING_INTERVAL_MS {
            errors.push(ValidationError::new(
                "sensor.sampling_interval_ms",
                format!(
                    "sampling interval {} is too short (minimum {} ms)",
                    self.sampling_interval_ms, MIN_SAMPLING_INTERVAL_MS
                ),
            ));
        } else if self.sampling_interval_ms > MAX_SAMPLING_INTERVAL_MS {
            errors.push(ValidationError::new(
                "sensor.sampling_interval_ms",
                format!(
                    "sampling interval {} is too long (maximum {} ms / 5 minutes)",
                    self.sampling_interval_ms, MAX_SAMPLING_INTERVAL_MS
                ),
            ));
        }

        if !(0.0..=100.0).contains(&self.initial_runin) {
            errors.push(ValidationError::new(
                "sensor.initial_runin",
                format!("run-in {} must be between 0 and 100", self.initial_runin),
            ));
        }

        errors
    }
}

/// Remote sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Upload readings automatically.
    pub enabled: bool,
    /// Base URL of the sink. Empty means no sink is configured.
    pub endpoint: String,
    /// API key sent with every request.
    pub api_key: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Interval between link probes in seconds.
    pub probe_interval_secs: u64,
    /// Readings delivered per drain.
    pub batch_size: usize,
    /// In-memory retry queue capacity.
    pub queue_capacity: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: String::new(),
            api_key: None,
            timeout_secs: 10,
            probe_interval_secs: 30,
            batch_size: 10,
            queue_capacity: 1000,
        }
    }
}

impl UploadConfig {
    /// Whether a sink is configured.
    pub fn has_endpoint(&self) -> bool {
        !self.endpoint.trim().is_empty()
    }

    /// Validate upload configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.has_endpoint()
            && !self.endpoint.starts_with("http://")
            && !self.endpoint.starts_with("https://")
        {
            errors.push(ValidationError::new(
                "upload.endpoint",
                format!(
                    "endpoint '{}' must start with http:// or https://",
                    self.endpoint
                ),
            ));
        }

        if let Some(key) = &self.api_key
            && key.is_empty()
        {
            errors.push(ValidationError::new(
                "upload.api_key",
                "api key cannot be empty string (omit it instead)",
            ));
        }

        if self.timeout_secs == 0 || self.timeout_secs > 120 {
            errors.push(ValidationError::new(
                "upload.timeout_secs",
                format!("timeout {} must be between 1 and 120 seconds", self.timeout_secs),
            ));
        }
        if self.probe_interval_secs == 0 {
            errors.push(ValidationError::new(
                "upload.probe_interval_secs",
                "probe interval must be at least 1 second",
            ));
        }
        if self.batch_size == 0 {
            errors.push(ValidationError::new(
                "upload.batch_size",
                "batch size must be at least 1",
            ));
        }
        if self.queue_capacity == 0 {
            errors.push(ValidationError::new(
                "upload.queue_capacity",
                "queue capacity must be at least 1",
            ));
        }

        errors
    }
}

/// Local buffering settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Where readings go when they cannot be delivered.
    pub mode: StorageMode,
    /// Mount point of the storage medium.
    pub root: PathBuf,
    /// Space the store may use in MiB. Unset means the whole disk.
    pub capacity_mb: Option<u64>,
    /// Days synced partitions are kept.
    pub retention_days: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            mode: StorageMode::default(),
            root: envmon_store::default_data_root(),
            capacity_mb: None,
            retention_days: 30,
        }
    }
}

impl StorageConfig {
    /// Configured capacity in bytes.
    pub fn capacity_bytes(&self) -> Option<u64> {
        self.capacity_mb.map(|mb| mb.saturating_mul(1024 * 1024))
    }

    /// Retention window.
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days.saturating_mul(24 * 60 * 60))
    }

    /// Validate storage configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.root.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.root",
                "storage root cannot be empty",
            ));
        }
        if self.capacity_mb == Some(0) {
            errors.push(ValidationError::new(
                "storage.capacity_mb",
                "capacity must be at least 1 MiB (omit it to use the whole disk)",
            ));
        }
        if self.retention_days == 0 {
            errors.push(ValidationError::new(
                "storage.retention_days",
                "retention must be at least 1 day",
            ));
        }

        errors
    }
}

/// Log levels accepted in `[logging] level`.
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level for envmon crates. `RUST_LOG` takes precedence.
    pub level: String,
    /// Entries kept in the in-memory event log.
    pub event_log_capacity: usize,
    /// File the event log is flushed to. Unset disables flushing.
    pub event_log_file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            event_log_capacity: envmon_core::events::DEFAULT_LOG_CAPACITY,
            event_log_file: Some(envmon_store::default_data_root().join("events.jsonl")),
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if !LOG_LEVELS.contains(&self.level.to_ascii_lowercase().as_str()) {
            errors.push(ValidationError::new(
                "logging.level",
                format!(
                    "unknown level '{}': expected one of {}",
                    self.level,
                    LOG_LEVELS.join(", ")
                ),
            ));
        }
        if self.event_log_capacity == 0 {
            errors.push(ValidationError::new(
                "logging.event_log_capacity",
                "event log capacity must be at least 1",
            ));
        }
        if let Some(path) = &self.event_log_file
            && path.as_os_str().is_empty()
        {
            errors.push(ValidationError::new(
                "logging.event_log_file",
                "event log file cannot be empty (omit it instead)",
            ));
        }

        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `upload.endpoint`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("envmon")
        .join("envmon.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_errors(errors: &[ValidationError], field: &str) -> usize {
        errors.iter().filter(|e| e.field == field).count()
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.device.id, "M5Stack_001");
        assert_eq!(config.sensor.sampling_interval_ms, 3_000);
        assert!(config.upload.enabled);
        assert!(!config.upload.has_endpoint());
        assert_eq!(config.storage.mode, StorageMode::Hybrid);
        assert_eq!(config.upload.queue_capacity, 1000);
    }

    #[test]
    fn test_default_config_validates() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("envmon/envmon.toml"));
    }

    #[test]
    fn test_sample_rate_from_interval() {
        let mut sensor = SensorConfig::default();
        assert_eq!(sensor.sample_rate(), SampleRate::LowPower);
        sensor.sampling_interval_ms = 1_000;
        assert_eq!(sensor.sample_rate(), SampleRate::Continuous);
        sensor.sampling_interval_ms = 300_000;
        assert_eq!(sensor.sample_rate(), SampleRate::UltraLowPower);
    }

    #[test]
    fn test_sampling_interval_bounds() {
        let mut sensor = SensorConfig {
            sampling_interval_ms: 999,
            ..SensorConfig::default()
        };
        let errors = sensor.validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("too short"));

        sensor.sampling_interval_ms = 1_000;
        assert!(sensor.validate().is_empty());
        sensor.sampling_interval_ms = 300_000;
        assert!(sensor.validate().is_empty());

        sensor.sampling_interval_ms = 300_001;
        let errors = sensor.validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("too long"));
    }

    #[test]
    fn test_upload_validation() {
        let valid = UploadConfig {
            endpoint: "https://sink.example.com".to_string(),
            api_key: Some("secret".to_string()),
            ..UploadConfig::default()
        };
        assert!(valid.validate().is_empty());

        let invalid = UploadConfig {
            endpoint: "sink.example.com".to_string(),
            api_key: Some(String::new()),
            timeout_secs: 0,
            batch_size: 0,
            queue_capacity: 0,
            probe_interval_secs: 0,
            ..UploadConfig::default()
        };
        let errors = invalid.validate();
        assert_eq!(errors.len(), 6);
        assert_eq!(field_errors(&errors, "upload.endpoint"), 1);
        assert_eq!(field_errors(&errors, "upload.api_key"), 1);
    }

    #[test]
    fn test_device_validation() {
        let device = DeviceConfig {
            id: "a,b".to_string(),
            utc_offset_minutes: 15 * 60,
            status_interval_secs: 0,
            ..DeviceConfig::default()
        };
        let errors = device.validate();
        assert_eq!(errors.len(), 3);
        assert_eq!(field_errors(&errors, "device.utc_offset_minutes"), 1);
    }

    #[test]
    fn test_storage_and_logging_validation() {
        let storage = StorageConfig {
            root: PathBuf::new(),
            capacity_mb: Some(0),
            retention_days: 0,
            ..StorageConfig::default()
        };
        assert_eq!(storage.validate().len(), 3);

        let logging = LoggingConfig {
            level: "loud".to_string(),
            event_log_capacity: 0,
            event_log_file: None,
        };
        let errors = logging.validate();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].message.contains("unknown level"));
    }

    #[test]
    fn test_validation_collects_all_sections() {
        let mut config = Config::default();
        config.sensor.sampling_interval_ms = 10;
        config.upload.endpoint = "ftp://x".to_string();
        config.logging.level = "verbose".to_string();

        let Err(ConfigError::Validation(errors)) = config.validate() else {
            panic!("expected validation errors");
        };
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_config_full_toml() {
        let toml = r#"
            [device]
            id = "kitchen"
            utc_offset_minutes = 540

            [sensor]
            sampling_interval_ms = 1000

            [upload]
            endpoint = "http://192.168.1.10:8080"
            api_key = "abc123"
            batch_size = 20

            [storage]
            mode = "offline"
            root = "/media/sd"
            capacity_mb = 512

            [logging]
            level = "debug"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.device.id, "kitchen");
        assert_eq!(config.device.utc_offset_minutes, 540);
        assert_eq!(config.device.status_interval_secs, 5);
        assert_eq!(config.sensor.sample_rate(), SampleRate::Continuous);
        assert_eq!(config.upload.batch_size, 20);
        assert_eq!(config.upload.queue_capacity, 1000);
        assert_eq!(config.storage.mode, StorageMode::Offline);
        assert_eq!(config.storage.capacity_bytes(), Some(512 * 1024 * 1024));
        assert_eq!(config.logging.level, "debug");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("envmon.toml");

        let mut config = Config::default();
        config.device.id = "bench".to_string();
        config.upload.endpoint = "https://sink.example.com".to_string();
        config.storage.capacity_mb = Some(64);

        config.save(&config_path).unwrap();
        let loaded = Config::load_validated(&config_path).unwrap();
        assert_eq!(loaded.device.id, "bench");
        assert_eq!(loaded.upload.endpoint, "https://sink.example.com");
        assert_eq!(loaded.storage.capacity_mb, Some(64));
    }

    #[test]
    fn test_config_load_nonexistent() {
        let result = Config::load("/nonexistent/path/envmon.toml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_config_load_invalid_toml() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("invalid.toml");
        std::fs::write(&config_path, "this is not valid { toml").unwrap();

        let result = Config::load(&config_path);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_load_or_default_falls_back() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("envmon.toml");
        std::fs::write(&config_path, "[sensor]\nsampling_interval_ms = 5").unwrap();

        let (config, error) = Config::load_or_default(Some(&config_path));
        assert!(matches!(error, Some(ConfigError::Validation(_))));
        assert_eq!(config.sensor.sampling_interval_ms, 3_000);

        std::fs::write(&config_path, "[sensor]\nsampling_interval_ms = 5000").unwrap();
        let (config, error) = Config::load_or_default(Some(&config_path));
        assert!(error.is_none());
        assert_eq!(config.sensor.sampling_interval_ms, 5_000);
    }

    #[test]
    fn test_config_error_display() {
        let error = ConfigError::Validation(vec![
            ValidationError::new("sensor.sampling_interval_ms", "too short"),
            ValidationError::new("upload.endpoint", "bad scheme"),
        ]);
        let display = format!("{}", error);
        assert!(display.contains("  - sensor.sampling_interval_ms: too short"));
        assert!(display.contains("upload.endpoint"));
    }
}
