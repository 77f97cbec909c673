//! Link to the remote sink.

use envmon_types::SensorReading;

use crate::error::{TransportError, TransportResult};

/// Raw result of a link probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    /// The sink is reachable.
    Up,
    /// The link is still being established.
    Associating,
    /// The sink is not reachable.
    Down,
}

/// A way of delivering readings to the remote sink.
///
/// Implementations must bound every call with a timeout; they run inside the
/// single control loop.
pub trait Transport: Send {
    /// One-time setup before the first probe.
    fn initialize(&mut self) -> TransportResult<()> {
        Ok(())
    }

    /// Check the link. An `Err` means the probe itself could not be completed.
    fn probe(&mut self) -> TransportResult<LinkStatus>;

    /// Deliver one reading.
    fn deliver(&mut self, reading: &SensorReading) -> TransportResult<()>;

    /// Link signal strength in dBm, if the transport knows it.
    fn signal_strength(&self) -> Option<i8> {
        None
    }

    /// Short description used in logs.
    fn describe(&self) -> String;
}

/// Transport with no sink configured. The link is always down.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineTransport;

impl Transport for OfflineTransport {
    fn probe(&mut self) -> TransportResult<LinkStatus> {
        Ok(LinkStatus::Down)
    }

    fn deliver(&mut self, _reading: &SensorReading) -> TransportResult<()> {
        Err(TransportError::NotConnected)
    }

    fn describe(&self) -> String {
        "offline".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offline_transport_is_always_down() {
        let mut transport = OfflineTransport;
        assert_eq!(transport.probe().unwrap(), LinkStatus::Down);
        assert!(matches!(
            transport.deliver(&SensorReading::default()),
            Err(TransportError::NotConnected)
        ));
        assert_eq!(transport.signal_strength(), None);
    }
}
