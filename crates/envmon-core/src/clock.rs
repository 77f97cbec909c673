//! Monotonic and wall-clock time sources.
//!
//! All interval checks in the pipeline go through [`Clock::now_ms`], so tests
//! can drive time explicitly with [`crate::MockClock`]. Wall-clock time is only
//! reported after a successful [`Clock::synchronize`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use time::{OffsetDateTime, UtcOffset};
use tracing::{info, warn};

use crate::error::TimeSyncError;
use crate::retry::{RetryConfig, with_retry};

/// Earliest wall-clock value (seconds since epoch) accepted as synchronized.
pub const PLAUSIBLE_EPOCH_SECS: u64 = 1_000_000_000;

/// A source of monotonic time and, once synchronized, calendar time.
pub trait Clock: Send + Sync {
    /// Milliseconds since the system started. Never goes backwards.
    fn now_ms(&self) -> u64;

    /// Local calendar time, or `None` until the clock has been synchronized.
    fn wall_time(&self) -> Option<OffsetDateTime>;

    /// Try to obtain calendar time. Must give up after a bounded effort.
    fn synchronize(&self) -> Result<OffsetDateTime, TimeSyncError>;

    /// Whether calendar time is available.
    fn is_synced(&self) -> bool {
        self.wall_time().is_some()
    }

    /// Reading timestamp: unix seconds when synced, uptime seconds otherwise.
    fn timestamp(&self) -> u64 {
        match self.wall_time() {
            Some(now) => u64::try_from(now.unix_timestamp()).unwrap_or(0),
            None => self.now_ms() / 1000,
        }
    }

    /// Time since the system started.
    fn uptime(&self) -> Duration {
        Duration::from_millis(self.now_ms())
    }
}

/// Clock backed by the host's monotonic and real-time clocks.
#[derive(Debug)]
pub struct SystemClock {
    boot: Instant,
    offset: UtcOffset,
    synced: AtomicBool,
    retry: RetryConfig,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    /// Create a clock reporting calendar time in UTC.
    pub fn new() -> Self {
        Self::with_offset(UtcOffset::UTC)
    }

    /// Create a clock reporting calendar time at a fixed UTC offset.
    pub fn with_offset(offset: UtcOffset) -> Self {
        Self {
            boot: Instant::now(),
            offset,
            synced: AtomicBool::new(false),
            retry: RetryConfig::for_time_sync(),
        }
    }

    /// Override the synchronization attempt budget.
    #[must_use]
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = config;
        self
    }

    /// Offset applied to calendar time.
    pub fn offset(&self) -> UtcOffset {
        self.offset
    }

    fn read_system_time(&self) -> Result<OffsetDateTime, TimeSyncError> {
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        if seconds > PLAUSIBLE_EPOCH_SECS {
            Ok(OffsetDateTime::now_utc().to_offset(self.offset))
        } else {
            Err(TimeSyncError::Implausible { seconds })
        }
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(self.boot.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn wall_time(&self) -> Option<OffsetDateTime> {
        if self.synced.load(Ordering::Acquire) {
            Some(OffsetDateTime::now_utc().to_offset(self.offset))
        } else {
            None
        }
    }

    fn synchronize(&self) -> Result<OffsetDateTime, TimeSyncError> {
        match with_retry(&self.retry, "time sync", || self.read_system_time()) {
            Ok(now) => {
                self.synced.store(true, Ordering::Release);
                info!("Clock synchronized: {}", now);
                Ok(now)
            }
            Err(e) => {
                warn!("Clock synchronization failed: {}", e);
                Err(TimeSyncError::Unavailable {
                    attempts: self.retry.attempts(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_starts_unsynced() {
        let clock = SystemClock::new();
        assert!(!clock.is_synced());
        assert!(clock.wall_time().is_none());
        assert_eq!(clock.timestamp(), clock.now_ms() / 1000);
    }

    #[test]
    fn test_system_clock_synchronizes_on_host() {
        let clock = SystemClock::new().retry(RetryConfig::none());
        let now = clock.synchronize().unwrap();
        assert!(now.unix_timestamp() > PLAUSIBLE_EPOCH_SECS as i64);
        assert!(clock.is_synced());
        assert!(clock.timestamp() > PLAUSIBLE_EPOCH_SECS);
    }

    #[test]
    fn test_system_clock_applies_offset() {
        let offset = UtcOffset::from_hms(9, 0, 0).unwrap();
        let clock = SystemClock::with_offset(offset).retry(RetryConfig::none());
        clock.synchronize().unwrap();
        assert_eq!(clock.wall_time().unwrap().offset(), offset);
    }

    #[test]
    fn test_monotonic_time_does_not_go_backwards() {
        let clock = SystemClock::new();
        let a = clock.now_ms();
        let b = clock.now_ms();
        assert!(b >= a);
    }
}
