//! Upload channel: link state machine, bounded retry queue and batch drain.
//!
//! The connection state changes only when the link is probed. A failed
//! delivery never demotes the state by itself; the next scheduled probe does.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use envmon_types::{ConnectionState, NO_SIGNAL_DBM, RecoveryMode, SensorReading};

use crate::clock::Clock;
use crate::error::{TransportError, TransportResult};
use crate::events::{Component, EventCode, EventLog};
use crate::transport::{LinkStatus, Transport};

/// Default number of readings held in memory.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;
/// Default number of readings delivered per drain.
pub const DEFAULT_BATCH_LIMIT: usize = 10;
/// Default interval between link probes.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// Bounded FIFO of readings awaiting delivery.
///
/// When full, pushing evicts the oldest reading.
#[derive(Debug, Clone)]
pub struct UploadQueue {
    items: VecDeque<SensorReading>,
    capacity: usize,
}

impl UploadQueue {
    /// Create a queue holding at most `capacity` readings (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity.min(DEFAULT_QUEUE_CAPACITY)),
            capacity,
        }
    }

    /// Append a reading, returning the evicted oldest one if the queue was full.
    pub fn push(&mut self, reading: SensorReading) -> Option<SensorReading> {
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(reading);
        evicted
    }

    /// Take the oldest reading.
    pub fn pop_front(&mut self) -> Option<SensorReading> {
        self.items.pop_front()
    }

    /// Put a reading back at the head after a failed delivery.
    ///
    /// Returns the reading if there is no room for it.
    pub fn requeue(&mut self, reading: SensorReading) -> Option<SensorReading> {
        if self.items.len() >= self.capacity {
            return Some(reading);
        }
        self.items.push_front(reading);
        None
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest-first iteration.
    pub fn iter(&self) -> impl Iterator<Item = &SensorReading> {
        self.items.iter()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

/// Options for an [`UploadChannel`].
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// Interval between link probes.
    pub probe_interval: Duration,
    /// Maximum deliveries per drain.
    pub batch_limit: usize,
    /// In-memory queue capacity.
    pub queue_capacity: usize,
    /// Drain the queue from [`UploadChannel::tick`] while connected.
    pub auto_drain: bool,
    /// Synchronize the clock when the link comes up.
    pub sync_clock_on_connect: bool,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            probe_interval: DEFAULT_PROBE_INTERVAL,
            batch_limit: DEFAULT_BATCH_LIMIT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            auto_drain: true,
            sync_clock_on_connect: true,
        }
    }
}

impl ChannelOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    #[must_use]
    pub fn batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit.max(1);
        self
    }

    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn auto_drain(mut self, enabled: bool) -> Self {
        self.auto_drain = enabled;
        self
    }

    #[must_use]
    pub fn sync_clock_on_connect(mut self, enabled: bool) -> Self {
        self.sync_clock_on_connect = enabled;
        self
    }
}

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Readings delivered, directly or from the queue.
    pub delivered: u64,
    /// Delivery attempts that failed.
    pub failed: u64,
    /// Readings dropped because the queue was full.
    pub evicted: u64,
    /// Readings put back after a failed drain delivery.
    pub requeued: u64,
    /// Link probes performed.
    pub probes: u64,
}

/// Outcome of one [`UploadChannel::drain_once`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Readings delivered in this drain.
    pub delivered: usize,
    /// The drain stopped on a failed delivery.
    pub stopped_on_failure: bool,
    /// Readings still queued.
    pub remaining: usize,
}

/// Link state machine plus retry queue toward the remote sink.
pub struct UploadChannel {
    transport: Box<dyn Transport>,
    clock: Arc<dyn Clock>,
    log: Arc<EventLog>,
    options: ChannelOptions,
    queue: UploadQueue,
    state: ConnectionState,
    recovery_mode: RecoveryMode,
    last_probe_ms: Option<u64>,
    stats: ChannelStats,
}

impl fmt::Debug for UploadChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadChannel")
            .field("transport", &self.transport.describe())
            .field("state", &self.state)
            .field("queued", &self.queue.len())
            .field("recovery_mode", &self.recovery_mode)
            .finish()
    }
}

impl UploadChannel {
    /// Create a channel with default options.
    pub fn new(transport: Box<dyn Transport>, clock: Arc<dyn Clock>, log: Arc<EventLog>) -> Self {
        Self::with_options(transport, clock, log, ChannelOptions::default())
    }

    /// Create a channel with custom options.
    pub fn with_options(
        transport: Box<dyn Transport>,
        clock: Arc<dyn Clock>,
        log: Arc<EventLog>,
        options: ChannelOptions,
    ) -> Self {
        let queue = UploadQueue::new(options.queue_capacity);
        Self {
            transport,
            clock,
            log,
            options,
            queue,
            state: ConnectionState::Disconnected,
            recovery_mode: RecoveryMode::default(),
            last_probe_ms: None,
            stats: ChannelStats::default(),
        }
    }

    /// Set up the transport. Failure leaves the channel usable as a queue.
    pub fn initialize(&mut self) -> TransportResult<()> {
        self.state = ConnectionState::Disconnected;
        match self.transport.initialize() {
            Ok(()) => {
                self.log.info(
                    Component::Network,
                    format!("Upload channel ready ({})", self.transport.describe()),
                );
                Ok(())
            }
            Err(e) => {
                self.log.warning(
                    Component::Network,
                    EventCode::NetworkConnectFailed,
                    format!("Transport setup failed: {e}"),
                );
                Err(e)
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn recovery_mode(&self) -> RecoveryMode {
        self.recovery_mode
    }

    /// Set the degradation hint consumed by the orchestrator.
    pub fn set_recovery_mode(&mut self, mode: RecoveryMode) {
        if mode != self.recovery_mode {
            self.log.info(
                Component::Network,
                format!("Recovery mode {} -> {}", self.recovery_mode, mode),
            );
            self.recovery_mode = mode;
        }
    }

    pub fn queue(&self) -> &UploadQueue {
        &self.queue
    }

    pub fn stats(&self) -> ChannelStats {
        self.stats
    }

    pub fn options(&self) -> &ChannelOptions {
        &self.options
    }

    /// Signal strength while connected, [`NO_SIGNAL_DBM`] otherwise.
    pub fn signal_strength(&self) -> i8 {
        if self.is_connected() {
            self.transport.signal_strength().unwrap_or(NO_SIGNAL_DBM)
        } else {
            NO_SIGNAL_DBM
        }
    }

    /// Whether a scheduled probe is due. The first probe is due immediately.
    pub fn probe_due(&self) -> bool {
        let interval_ms = u64::try_from(self.options.probe_interval.as_millis()).unwrap_or(u64::MAX);
        self.last_probe_ms
            .is_none_or(|last| self.clock.now_ms().saturating_sub(last) >= interval_ms)
    }

    /// Probe the link now and apply the resulting state.
    pub fn probe(&mut self) -> ConnectionState {
        self.last_probe_ms = Some(self.clock.now_ms());
        self.stats.probes += 1;

        let next = match self.transport.probe() {
            Ok(LinkStatus::Up) => ConnectionState::Connected,
            Ok(LinkStatus::Associating) => ConnectionState::Connecting,
            Ok(LinkStatus::Down) => ConnectionState::Disconnected,
            Err(e) => {
                if self.state != ConnectionState::Error {
                    self.log.warning(
                        Component::Network,
                        EventCode::NetworkConnectFailed,
                        format!("Link probe failed: {e}"),
                    );
                }
                ConnectionState::Error
            }
        };
        self.transition(next);
        self.state
    }

    fn transition(&mut self, next: ConnectionState) {
        if next == self.state {
            return;
        }
        let previous = self.state;
        self.state = next;
        self.log.info(
            Component::Network,
            format!("Connection {previous} -> {next}"),
        );

        if next == ConnectionState::Connected && self.options.sync_clock_on_connect {
            if let Err(e) = self.clock.synchronize() {
                self.log.warning(
                    Component::Network,
                    EventCode::TimeSyncFailed,
                    format!("Clock sync after connect failed: {e}"),
                );
            }
        }
    }

    /// Periodic work: probe when due, then drain while connected.
    pub fn tick(&mut self) -> Option<DrainReport> {
        if self.probe_due() {
            self.probe();
        }
        if self.options.auto_drain && self.is_connected() && !self.queue.is_empty() {
            Some(self.drain_once())
        } else {
            None
        }
    }

    /// Buffer a reading for later delivery, evicting the oldest when full.
    pub fn enqueue(&mut self, reading: SensorReading) {
        if let Some(evicted) = self.queue.push(reading) {
            self.stats.evicted += 1;
            self.log.warning(
                Component::Network,
                EventCode::QueueOverflow,
                format!(
                    "Upload queue full, dropped oldest reading (timestamp {})",
                    evicted.timestamp
                ),
            );
        }
    }

    /// Deliver up to one batch from the queue head, stopping at the first failure.
    ///
    /// A failed reading goes back to the head so order is preserved.
    pub fn drain_once(&mut self) -> DrainReport {
        let mut report = DrainReport::default();
        if !self.is_connected() {
            report.remaining = self.queue.len();
            return report;
        }

        for _ in 0..self.options.batch_limit {
            let Some(reading) = self.queue.pop_front() else {
                break;
            };
            match self.transport.deliver(&reading) {
                Ok(()) => {
                    report.delivered += 1;
                    self.stats.delivered += 1;
                }
                Err(e) => {
                    self.stats.failed += 1;
                    self.log.warning(
                        Component::Network,
                        EventCode::NetworkUploadFailed,
                        format!("Queued delivery failed: {e}"),
                    );
                    if self.queue.requeue(reading).is_some() {
                        self.stats.evicted += 1;
                    } else {
                        self.stats.requeued += 1;
                    }
                    report.stopped_on_failure = true;
                    break;
                }
            }
        }

        report.remaining = self.queue.len();
        report
    }

    /// Deliver a reading directly. Only allowed while connected.
    pub fn deliver(&mut self, reading: &SensorReading) -> TransportResult<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        match self.transport.deliver(reading) {
            Ok(()) => {
                self.stats.delivered += 1;
                Ok(())
            }
            Err(e) => {
                self.stats.failed += 1;
                self.log.warning(
                    Component::Network,
                    EventCode::NetworkUploadFailed,
                    format!("Direct delivery failed: {e}"),
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockClock, MockTransport};

    fn reading(timestamp: u64) -> SensorReading {
        SensorReading {
            timestamp,
            ..SensorReading::default()
        }
    }

    struct Fixture {
        clock: Arc<MockClock>,
        log: Arc<EventLog>,
        transport: MockTransport,
        channel: UploadChannel,
    }

    fn fixture(options: ChannelOptions) -> Fixture {
        let clock = Arc::new(MockClock::new());
        let log = Arc::new(EventLog::new(clock.clone()));
        let transport = MockTransport::new();
        let channel = UploadChannel::with_options(
            Box::new(transport.clone()),
            clock.clone(),
            log.clone(),
            options,
        );
        Fixture {
            clock,
            log,
            transport,
            channel,
        }
    }

    fn connected(options: ChannelOptions) -> Fixture {
        let mut f = fixture(options);
        f.transport.set_link(LinkStatus::Up);
        assert_eq!(f.channel.probe(), ConnectionState::Connected);
        f
    }

    fn timestamps(queue: &UploadQueue) -> Vec<u64> {
        queue.iter().map(|r| r.timestamp).collect()
    }

    #[test]
    fn test_queue_drops_oldest_when_full() {
        let mut queue = UploadQueue::new(3);
        for ts in 1..=3 {
            assert!(queue.push(reading(ts)).is_none());
        }
        let evicted = queue.push(reading(4)).unwrap();
        assert_eq!(evicted.timestamp, 1);
        assert_eq!(timestamps(&queue), vec![2, 3, 4]);
        assert!(queue.is_full());
    }

    #[test]
    fn test_queue_requeue_goes_to_head() {
        let mut queue = UploadQueue::new(3);
        queue.push(reading(1));
        queue.push(reading(2));
        let head = queue.pop_front().unwrap();
        assert!(queue.requeue(head).is_none());
        assert_eq!(timestamps(&queue), vec![1, 2]);

        queue.push(reading(3));
        assert_eq!(queue.requeue(reading(0)).unwrap().timestamp, 0);
    }

    #[test]
    fn test_overflow_keeps_newest_thousand_in_order() {
        let mut f = fixture(ChannelOptions::default());
        for ts in 1..=1500 {
            f.channel.enqueue(reading(ts));
        }
        let queue = f.channel.queue();
        assert_eq!(queue.len(), 1000);
        assert_eq!(timestamps(queue), (501..=1500).collect::<Vec<_>>());
        assert_eq!(f.channel.stats().evicted, 500);
        assert!(
            f.log
                .recent(1)
                .iter()
                .all(|e| e.code == Some(EventCode::QueueOverflow))
        );
    }

    #[test]
    fn test_first_tick_probes_immediately() {
        let mut f = fixture(ChannelOptions::default());
        f.transport.set_link(LinkStatus::Up);
        assert!(f.channel.probe_due());
        f.channel.tick();
        assert_eq!(f.channel.state(), ConnectionState::Connected);
        assert_eq!(f.transport.probe_count(), 1);
    }

    #[test]
    fn test_probe_interval_is_respected() {
        let mut f = fixture(ChannelOptions::default());
        f.channel.tick();
        f.clock.advance_ms(29_999);
        f.channel.tick();
        assert_eq!(f.transport.probe_count(), 1);
        f.clock.advance_ms(1);
        f.channel.tick();
        assert_eq!(f.transport.probe_count(), 2);
    }

    #[test]
    fn test_probe_result_mapping() {
        let mut f = fixture(ChannelOptions::default());
        f.transport.set_link(LinkStatus::Associating);
        assert_eq!(f.channel.probe(), ConnectionState::Connecting);
        f.transport.set_link(LinkStatus::Down);
        assert_eq!(f.channel.probe(), ConnectionState::Disconnected);
        f.transport.fail_probes(true);
        assert_eq!(f.channel.probe(), ConnectionState::Error);
        f.transport.fail_probes(false);
        f.transport.set_link(LinkStatus::Up);
        assert_eq!(f.channel.probe(), ConnectionState::Connected);
    }

    #[test]
    fn test_connect_triggers_clock_sync_once() {
        let mut f = fixture(ChannelOptions::default());
        f.transport.set_link(LinkStatus::Up);
        f.channel.probe();
        f.channel.probe();
        assert_eq!(f.clock.sync_attempts(), 1);
        assert!(f.clock.wall_time().is_some());

        f.transport.set_link(LinkStatus::Down);
        f.channel.probe();
        f.transport.set_link(LinkStatus::Up);
        f.channel.probe();
        assert_eq!(f.clock.sync_attempts(), 2);
    }

    #[test]
    fn test_state_changes_are_logged() {
        let mut f = connected(ChannelOptions::default());
        f.transport.set_link(LinkStatus::Down);
        f.channel.probe();
        let messages: Vec<_> = f
            .log
            .by_component(Component::Network)
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert!(messages.iter().any(|m| m == "Connection disconnected -> connected"));
        assert!(messages.iter().any(|m| m == "Connection connected -> disconnected"));
    }

    #[test]
    fn test_delivery_failure_does_not_demote_state() {
        let mut f = connected(ChannelOptions::default());
        f.transport.fail_deliveries(true);
        assert!(matches!(
            f.channel.deliver(&reading(1)),
            Err(TransportError::DeliveryFailed { .. })
        ));
        assert_eq!(f.channel.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_deliver_requires_connection() {
        let mut f = fixture(ChannelOptions::default());
        assert!(matches!(
            f.channel.deliver(&reading(1)),
            Err(TransportError::NotConnected)
        ));
        assert_eq!(f.transport.delivery_attempts(), 0);
    }

    #[test]
    fn test_drain_respects_batch_limit() {
        let mut f = connected(ChannelOptions::default());
        for ts in 1..=25 {
            f.channel.enqueue(reading(ts));
        }
        let report = f.channel.drain_once();
        assert_eq!(report.delivered, 10);
        assert_eq!(report.remaining, 15);
        assert!(!report.stopped_on_failure);
        assert_eq!(
            f.transport.delivered_timestamps(),
            (1..=10).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_drain_stops_at_failure_and_preserves_order() {
        let mut f = connected(ChannelOptions::default());
        for ts in 1..=8 {
            f.channel.enqueue(reading(ts));
        }
        // Fourth attempt fails
        f.transport.fail_attempt(4);
        let report = f.channel.drain_once();

        assert_eq!(report.delivered, 3);
        assert!(report.stopped_on_failure);
        assert_eq!(timestamps(f.channel.queue()), vec![4, 5, 6, 7, 8]);
        assert_eq!(f.channel.stats().requeued, 1);

        let report = f.channel.drain_once();
        assert_eq!(report.delivered, 5);
        assert_eq!(
            f.transport.delivered_timestamps(),
            (1..=8).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_drain_noop_when_disconnected() {
        let mut f = fixture(ChannelOptions::default());
        f.channel.enqueue(reading(1));
        let report = f.channel.drain_once();
        assert_eq!(report.delivered, 0);
        assert_eq!(report.remaining, 1);
        assert_eq!(f.transport.delivery_attempts(), 0);
    }

    #[test]
    fn test_tick_drains_when_connected() {
        let mut f = fixture(ChannelOptions::default());
        f.transport.set_link(LinkStatus::Up);
        for ts in 1..=3 {
            f.channel.enqueue(reading(ts));
        }
        let report = f.channel.tick().unwrap();
        assert_eq!(report.delivered, 3);
        assert!(f.channel.queue().is_empty());
        assert!(f.channel.tick().is_none());
    }

    #[test]
    fn test_tick_without_auto_drain() {
        let mut f = fixture(ChannelOptions::default().auto_drain(false));
        f.transport.set_link(LinkStatus::Up);
        f.channel.enqueue(reading(1));
        assert!(f.channel.tick().is_none());
        assert_eq!(f.channel.queue().len(), 1);
    }

    #[test]
    fn test_signal_strength_defaults_when_disconnected() {
        let f = fixture(ChannelOptions::default());
        f.transport.set_signal(-60);
        assert_eq!(f.channel.signal_strength(), NO_SIGNAL_DBM);
        let f = connected(ChannelOptions::default());
        f.transport.set_signal(-60);
        assert_eq!(f.channel.signal_strength(), -60);
    }

    #[test]
    fn test_recovery_mode_is_caller_set() {
        let mut f = fixture(ChannelOptions::default());
        assert_eq!(f.channel.recovery_mode(), RecoveryMode::MemoryQueue);
        f.channel.set_recovery_mode(RecoveryMode::TempStorage);
        assert_eq!(f.channel.recovery_mode(), RecoveryMode::TempStorage);
        assert_eq!(f.channel.state(), ConnectionState::Disconnected);
    }
}

/// Property-based tests for the queue bound.
#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// The queue never exceeds its capacity and keeps the newest readings in order.
        #[test]
        fn queue_never_exceeds_capacity(capacity in 1usize..64, pushes in 0usize..256) {
            let mut queue = UploadQueue::new(capacity);
            for ts in 0..pushes as u64 {
                queue.push(SensorReading { timestamp: ts, ..SensorReading::default() });
                prop_assert!(queue.len() <= capacity);
            }
            let kept: Vec<u64> = queue.iter().map(|r| r.timestamp).collect();
            let start = pushes.saturating_sub(capacity) as u64;
            prop_assert_eq!(kept, (start..pushes as u64).collect::<Vec<_>>());
        }
    }
}
