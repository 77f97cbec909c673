//! Capabilities required from a gas/climate sensor stack.
//!
//! A sensor stack is the vendor processing library sitting between the bus
//! and the application: it is started at a bus address, subscribed to a set
//! of output signals at a sampling rate, and driven by repeated calls to
//! [`SensorStack::run`]. Raw outputs are turned into [`SensorReading`]s by a
//! [`ReadingAdapter`].

use std::fmt;

use envmon_types::{SampleRate, SensorReading};

use crate::error::StackError;

/// Bus address probed first.
pub const PRIMARY_ADDRESS: u8 = 0x77;
/// Bus address probed when the primary does not answer.
pub const SECONDARY_ADDRESS: u8 = 0x76;
/// Probe order used during initialization.
pub const SENSOR_ADDRESSES: [u8; 2] = [PRIMARY_ADDRESS, SECONDARY_ADDRESS];

/// A signal the sensor stack can be subscribed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputSignal {
    Iaq,
    StaticIaq,
    Co2Equivalent,
    BreathVocEquivalent,
    RawTemperature,
    RawPressure,
    RawHumidity,
    RawGas,
    StabilizationStatus,
    RuninStatus,
}

impl OutputSignal {
    /// Whether this signal requires the full processing pipeline.
    pub fn is_extended(&self) -> bool {
        matches!(
            self,
            OutputSignal::Iaq
                | OutputSignal::StaticIaq
                | OutputSignal::Co2Equivalent
                | OutputSignal::BreathVocEquivalent
        )
    }
}

const FULL_SIGNALS: &[OutputSignal] = &[
    OutputSignal::Iaq,
    OutputSignal::StaticIaq,
    OutputSignal::Co2Equivalent,
    OutputSignal::BreathVocEquivalent,
    OutputSignal::RawTemperature,
    OutputSignal::RawPressure,
    OutputSignal::RawHumidity,
    OutputSignal::RawGas,
    OutputSignal::StabilizationStatus,
    OutputSignal::RuninStatus,
];

const BASIC_SIGNALS: &[OutputSignal] = &[
    OutputSignal::RawTemperature,
    OutputSignal::RawHumidity,
    OutputSignal::RawPressure,
    OutputSignal::RawGas,
    OutputSignal::StabilizationStatus,
    OutputSignal::RuninStatus,
];

/// Named group of output signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputSet {
    /// Air quality estimates plus raw climate values.
    Full,
    /// Raw climate values and calibration progress only.
    Basic,
}

impl OutputSet {
    /// Signals in this set.
    pub fn signals(&self) -> &'static [OutputSignal] {
        match self {
            OutputSet::Full => FULL_SIGNALS,
            OutputSet::Basic => BASIC_SIGNALS,
        }
    }
}

impl fmt::Display for OutputSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputSet::Full => write!(f, "full"),
            OutputSet::Basic => write!(f, "basic"),
        }
    }
}

/// An output set at a sampling rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    pub outputs: OutputSet,
    pub rate: SampleRate,
}

impl Subscription {
    pub const fn new(outputs: OutputSet, rate: SampleRate) -> Self {
        Self { outputs, rate }
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}", self.outputs, self.rate)
    }
}

/// Subscriptions tried at startup, richest first.
pub const INIT_CANDIDATES: [Subscription; 3] = [
    Subscription::new(OutputSet::Full, SampleRate::LowPower),
    Subscription::new(OutputSet::Full, SampleRate::UltraLowPower),
    Subscription::new(OutputSet::Basic, SampleRate::UltraLowPower),
];

/// Subscriptions tried when upgrading to the full output set.
pub const UPGRADE_CANDIDATES: [Subscription; 2] = [
    Subscription::new(OutputSet::Full, SampleRate::LowPower),
    Subscription::new(OutputSet::Full, SampleRate::UltraLowPower),
];

/// One value produced by a processing step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorOutput {
    pub signal: OutputSignal,
    pub value: f32,
}

impl SensorOutput {
    pub fn new(signal: OutputSignal, value: f32) -> Self {
        Self { signal, value }
    }
}

/// Status code reported by the stack after each call.
///
/// Zero is OK, negative codes are errors, positive codes are warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StackStatus(pub i32);

impl StackStatus {
    pub const OK: StackStatus = StackStatus(0);
    /// The processing step was called too late or too early.
    pub const TIMING_VIOLATION: StackStatus = StackStatus(14);

    pub fn is_ok(&self) -> bool {
        self.0 == 0
    }

    pub fn is_warning(&self) -> bool {
        self.0 > 0
    }

    pub fn is_error(&self) -> bool {
        self.0 < 0
    }
}

/// The processing library driving the physical sensor.
pub trait SensorStack: Send {
    /// Start the sensor at a bus address.
    fn begin(&mut self, address: u8) -> Result<(), StackError>;

    /// Replace the active subscription.
    ///
    /// On failure the previous subscription must remain in effect.
    fn update_subscription(
        &mut self,
        outputs: &[OutputSignal],
        rate: SampleRate,
    ) -> Result<(), StackError>;

    /// Drive one processing step. Returns outputs when a sample completed.
    fn run(&mut self) -> Result<Option<Vec<SensorOutput>>, StackError>;

    /// Status of the most recent call.
    fn status(&self) -> StackStatus;
}

/// Converts raw stack outputs into a reading.
pub trait ReadingAdapter: Send {
    /// Build the next reading from the previous one and a step's outputs.
    fn deliver_reading(
        &self,
        previous: &SensorReading,
        outputs: &[SensorOutput],
        timestamp: u64,
    ) -> SensorReading;
}

/// Default adapter mapping stack signals onto reading fields.
///
/// Raw climate values carry over from the previous reading when a step does
/// not produce them. Extended values and their `has_*` flags are reset on
/// every step so a downgraded subscription never reports stale estimates.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalAdapter;

impl ReadingAdapter for SignalAdapter {
    fn deliver_reading(
        &self,
        previous: &SensorReading,
        outputs: &[SensorOutput],
        timestamp: u64,
    ) -> SensorReading {
        let mut reading = SensorReading {
            timestamp,
            temperature: previous.temperature,
            humidity: previous.humidity,
            pressure: previous.pressure,
            gas_resistance: previous.gas_resistance,
            stabilized: previous.stabilized,
            ..SensorReading::new(previous.device_id.clone())
        };
        reading.set_runin_status(previous.runin_status);

        let mut static_iaq = None;
        for output in outputs {
            match output.signal {
                OutputSignal::Iaq => {
                    reading.iaq = output.value;
                    reading.has_iaq_data = true;
                }
                OutputSignal::StaticIaq => static_iaq = Some(output.value),
                OutputSignal::Co2Equivalent => {
                    reading.co2_equivalent = output.value;
                    reading.has_co2_data = true;
                }
                OutputSignal::BreathVocEquivalent => {
                    reading.voc_equivalent = output.value;
                    reading.has_voc_data = true;
                }
                OutputSignal::RawTemperature => reading.temperature = output.value,
                // Pa to hPa
                OutputSignal::RawPressure => reading.pressure = output.value / 100.0,
                OutputSignal::RawHumidity => reading.humidity = output.value,
                OutputSignal::RawGas => reading.gas_resistance = output.value,
                OutputSignal::StabilizationStatus => reading.stabilized = output.value == 1.0,
                OutputSignal::RuninStatus => reading.set_runin_status(output.value),
            }
        }

        if !reading.has_iaq_data
            && let Some(value) = static_iaq
        {
            reading.iaq = value;
            reading.has_iaq_data = true;
        }

        reading
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_outputs() -> Vec<SensorOutput> {
        vec![
            SensorOutput::new(OutputSignal::Iaq, 42.0),
            SensorOutput::new(OutputSignal::Co2Equivalent, 650.0),
            SensorOutput::new(OutputSignal::BreathVocEquivalent, 0.8),
            SensorOutput::new(OutputSignal::RawTemperature, 23.4),
            SensorOutput::new(OutputSignal::RawPressure, 101_325.0),
            SensorOutput::new(OutputSignal::RawHumidity, 48.0),
            SensorOutput::new(OutputSignal::RawGas, 52_000.0),
            SensorOutput::new(OutputSignal::StabilizationStatus, 1.0),
            SensorOutput::new(OutputSignal::RuninStatus, 80.0),
        ]
    }

    #[test]
    fn test_adapter_maps_full_outputs() {
        let previous = SensorReading::new("dev");
        let reading = SignalAdapter.deliver_reading(&previous, &full_outputs(), 100);

        assert_eq!(reading.timestamp, 100);
        assert_eq!(reading.device_id, "dev");
        assert!((reading.pressure - 1013.25).abs() < 0.001);
        assert_eq!(reading.co2_equivalent, 650.0);
        assert!(reading.has_co2_data && reading.has_iaq_data && reading.has_voc_data);
        assert!(reading.stabilized);
        assert!(reading.is_calibrated);
    }

    #[test]
    fn test_adapter_basic_outputs_leave_extended_unset() {
        let previous = SignalAdapter.deliver_reading(&SensorReading::new("dev"), &full_outputs(), 1);
        let basic = vec![
            SensorOutput::new(OutputSignal::RawTemperature, 20.0),
            SensorOutput::new(OutputSignal::RuninStatus, 10.0),
        ];
        let reading = SignalAdapter.deliver_reading(&previous, &basic, 2);

        assert_eq!(reading.temperature, 20.0);
        assert_eq!(reading.humidity, 48.0);
        assert_eq!(reading.co2_equivalent, 0.0);
        assert!(!reading.has_co2_data);
        assert!(!reading.has_iaq_data);
        assert!(!reading.has_voc_data);
        assert!(!reading.is_calibrated);
    }

    #[test]
    fn test_adapter_stabilization_requires_exact_one() {
        let outputs = vec![SensorOutput::new(OutputSignal::StabilizationStatus, 0.0)];
        let reading = SignalAdapter.deliver_reading(&SensorReading::default(), &outputs, 1);
        assert!(!reading.stabilized);
    }

    #[test]
    fn test_adapter_static_iaq_fallback() {
        let outputs = vec![SensorOutput::new(OutputSignal::StaticIaq, 30.0)];
        let reading = SignalAdapter.deliver_reading(&SensorReading::default(), &outputs, 1);
        assert!(reading.has_iaq_data);
        assert_eq!(reading.iaq, 30.0);
    }

    #[test]
    fn test_candidate_ladders() {
        assert_eq!(INIT_CANDIDATES[0].outputs, OutputSet::Full);
        assert_eq!(INIT_CANDIDATES[2].outputs, OutputSet::Basic);
        assert!(UPGRADE_CANDIDATES.iter().all(|c| c.outputs == OutputSet::Full));
        assert_eq!(OutputSet::Full.signals().len(), 10);
        assert_eq!(OutputSet::Basic.signals().len(), 6);
        assert!(OutputSet::Basic.signals().iter().all(|s| !s.is_extended()));
    }

    #[test]
    fn test_stack_status_classes() {
        assert!(StackStatus::OK.is_ok());
        assert!(StackStatus::TIMING_VIOLATION.is_warning());
        assert!(StackStatus(-1).is_error());
    }
}
