//! Test doubles for the pipeline's hardware and network seams.
//!
//! - [`MockClock`]: manually advanced monotonic time with controllable sync
//! - [`MockTransport`]: scriptable link status and delivery failures
//! - [`MockPlatform`]: fixed battery and memory values
//!
//! All doubles are cheap to clone or share, so a test can keep a handle for
//! control while the pipeline owns another.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicI8, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use time::OffsetDateTime;
use time::macros::datetime;

use envmon_types::SensorReading;

use crate::clock::Clock;
use crate::error::{TimeSyncError, TransportError, TransportResult};
use crate::platform::Platform;
use crate::transport::{LinkStatus, Transport};

/// Calendar time a [`MockClock`] reports after its first synchronization.
pub const MOCK_SYNC_TIME: OffsetDateTime = datetime!(2024-03-15 12:00:00 UTC);

#[derive(Debug, Clone, Copy)]
struct SyncPoint {
    wall: OffsetDateTime,
    at_ms: u64,
}

/// Clock whose time only moves when the test says so.
#[derive(Debug)]
pub struct MockClock {
    now_ms: AtomicU64,
    sync_available: AtomicBool,
    sync_attempts: AtomicU32,
    sync_target: Mutex<OffsetDateTime>,
    synced: Mutex<Option<SyncPoint>>,
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MockClock {
    /// Create an unsynchronized clock at uptime zero.
    pub fn new() -> Self {
        Self {
            now_ms: AtomicU64::new(0),
            sync_available: AtomicBool::new(true),
            sync_attempts: AtomicU32::new(0),
            sync_target: Mutex::new(MOCK_SYNC_TIME),
            synced: Mutex::new(None),
        }
    }

    pub fn set_now_ms(&self, ms: u64) {
        self.now_ms.store(ms, Ordering::SeqCst);
    }

    pub fn advance_ms(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, duration: Duration) {
        self.advance_ms(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX));
    }

    /// Mark the clock synchronized at `wall` immediately.
    pub fn set_wall_time(&self, wall: OffsetDateTime) {
        *self.synced.lock().unwrap_or_else(PoisonError::into_inner) = Some(SyncPoint {
            wall,
            at_ms: self.now_ms(),
        });
    }

    /// Calendar time adopted by the next successful [`Clock::synchronize`].
    pub fn set_sync_target(&self, wall: OffsetDateTime) {
        *self
            .sync_target
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = wall;
    }

    /// Make synchronization succeed or fail.
    pub fn set_sync_available(&self, available: bool) {
        self.sync_available.store(available, Ordering::SeqCst);
    }

    /// Number of [`Clock::synchronize`] calls so far.
    pub fn sync_attempts(&self) -> u32 {
        self.sync_attempts.load(Ordering::SeqCst)
    }

    /// Forget calendar time.
    pub fn desync(&self) {
        *self.synced.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }

    fn wall_time(&self) -> Option<OffsetDateTime> {
        let synced = *self.synced.lock().unwrap_or_else(PoisonError::into_inner);
        synced.map(|point| {
            let elapsed = self.now_ms().saturating_sub(point.at_ms);
            point.wall + Duration::from_millis(elapsed)
        })
    }

    fn synchronize(&self) -> Result<OffsetDateTime, TimeSyncError> {
        let attempts = self.sync_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.sync_available.load(Ordering::SeqCst) {
            return Err(TimeSyncError::Unavailable { attempts });
        }
        let target = *self
            .sync_target
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.set_wall_time(target);
        Ok(target)
    }
}

#[derive(Debug)]
struct TransportState {
    link: LinkStatus,
    fail_probes: bool,
    fail_deliveries: bool,
    failing_attempts: BTreeSet<u64>,
    delivered: Vec<SensorReading>,
    initialize_error: Option<String>,
}

#[derive(Debug)]
struct TransportInner {
    state: Mutex<TransportState>,
    probes: AtomicU64,
    attempts: AtomicU64,
    signal: AtomicI8,
    has_signal: AtomicBool,
}

/// Transport with a scriptable link and delivery outcome.
///
/// Clones share state, so keep one clone for assertions.
#[derive(Debug, Clone)]
pub struct MockTransport {
    inner: Arc<TransportInner>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Create a transport whose link is down.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TransportInner {
                state: Mutex::new(TransportState {
                    link: LinkStatus::Down,
                    fail_probes: false,
                    fail_deliveries: false,
                    failing_attempts: BTreeSet::new(),
                    delivered: Vec::new(),
                    initialize_error: None,
                }),
                probes: AtomicU64::new(0),
                attempts: AtomicU64::new(0),
                signal: AtomicI8::new(0),
                has_signal: AtomicBool::new(false),
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, TransportState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_link(&self, link: LinkStatus) {
        self.state().link = link;
    }

    /// Make probes return an error instead of a status.
    pub fn fail_probes(&self, fail: bool) {
        self.state().fail_probes = fail;
    }

    /// Make every delivery fail.
    pub fn fail_deliveries(&self, fail: bool) {
        self.state().fail_deliveries = fail;
    }

    /// Make the `n`th delivery attempt (1-based, counted over the lifetime) fail.
    pub fn fail_attempt(&self, n: u64) {
        self.state().failing_attempts.insert(n);
    }

    /// Make [`Transport::initialize`] fail.
    pub fn fail_initialize(&self, reason: impl Into<String>) {
        self.state().initialize_error = Some(reason.into());
    }

    pub fn set_signal(&self, dbm: i8) {
        self.inner.signal.store(dbm, Ordering::SeqCst);
        self.inner.has_signal.store(true, Ordering::SeqCst);
    }

    pub fn probe_count(&self) -> u64 {
        self.inner.probes.load(Ordering::SeqCst)
    }

    pub fn delivery_attempts(&self) -> u64 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Readings delivered successfully, in delivery order.
    pub fn delivered(&self) -> Vec<SensorReading> {
        self.state().delivered.clone()
    }

    pub fn delivered_timestamps(&self) -> Vec<u64> {
        self.state().delivered.iter().map(|r| r.timestamp).collect()
    }
}

impl Transport for MockTransport {
    fn initialize(&mut self) -> TransportResult<()> {
        match self.state().initialize_error.clone() {
            Some(reason) => Err(TransportError::Init(reason)),
            None => Ok(()),
        }
    }

    fn probe(&mut self) -> TransportResult<LinkStatus> {
        self.inner.probes.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        if state.fail_probes {
            return Err(TransportError::Unreachable {
                endpoint: "mock".to_string(),
                reason: "probe failure injected".to_string(),
            });
        }
        Ok(state.link)
    }

    fn deliver(&mut self, reading: &SensorReading) -> TransportResult<()> {
        let attempt = self.inner.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.state();
        if state.fail_deliveries || state.failing_attempts.remove(&attempt) {
            return Err(TransportError::delivery(format!(
                "delivery failure injected (attempt {attempt})"
            )));
        }
        state.delivered.push(reading.clone());
        Ok(())
    }

    fn signal_strength(&self) -> Option<i8> {
        self.inner
            .has_signal
            .load(Ordering::SeqCst)
            .then(|| self.inner.signal.load(Ordering::SeqCst))
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}

/// Platform with fixed readouts.
#[derive(Debug, Clone, Copy)]
pub struct MockPlatform {
    pub battery: Option<u8>,
    pub free_memory: u64,
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self {
            battery: Some(100),
            free_memory: 64 * 1024 * 1024,
        }
    }
}

impl Platform for MockPlatform {
    fn battery_percent(&mut self) -> Option<u8> {
        self.battery
    }

    fn free_memory(&mut self) -> u64 {
        self.free_memory
    }
}
