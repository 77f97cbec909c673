//! Simulated sensor stack for hosts without sensor hardware.
//!
//! [`SimulatedStack`] produces plausible indoor climate values as a random
//! walk, paced by the subscribed sampling rate, and slowly advances the
//! run-in status the way a freshly powered gas sensor does. Runtime fault
//! injection goes through the shared [`StackControls`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::Rng;

use envmon_types::SampleRate;

use crate::clock::Clock;
use crate::error::StackError;
use crate::stack::{
    OutputSignal, PRIMARY_ADDRESS, SECONDARY_ADDRESS, SensorOutput, SensorStack, StackStatus,
};

/// Fault injection and scripting shared by all clones of a [`SimulatedStack`].
#[derive(Debug)]
pub struct StackControls {
    primary_present: AtomicBool,
    secondary_present: AtomicBool,
    reject_full: AtomicBool,
    fail_runs: AtomicBool,
    status: AtomicI32,
    run_count: AtomicU64,
    rejected_rates: Mutex<Vec<SampleRate>>,
    scripted: Mutex<VecDeque<Vec<SensorOutput>>>,
}

impl Default for StackControls {
    fn default() -> Self {
        Self {
            primary_present: AtomicBool::new(true),
            secondary_present: AtomicBool::new(true),
            reject_full: AtomicBool::new(false),
            fail_runs: AtomicBool::new(false),
            status: AtomicI32::new(0),
            run_count: AtomicU64::new(0),
            rejected_rates: Mutex::new(Vec::new()),
            scripted: Mutex::new(VecDeque::new()),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl StackControls {
    /// Make the sensor answer (or not) at a bus address.
    pub fn set_present(&self, address: u8, present: bool) {
        match address {
            PRIMARY_ADDRESS => self.primary_present.store(present, Ordering::SeqCst),
            SECONDARY_ADDRESS => self.secondary_present.store(present, Ordering::SeqCst),
            _ => {}
        }
    }

    fn is_present(&self, address: u8) -> bool {
        match address {
            PRIMARY_ADDRESS => self.primary_present.load(Ordering::SeqCst),
            SECONDARY_ADDRESS => self.secondary_present.load(Ordering::SeqCst),
            _ => false,
        }
    }

    /// Reject subscriptions at a sampling rate.
    pub fn reject_rate(&self, rate: SampleRate) {
        let mut rates = lock(&self.rejected_rates);
        if !rates.contains(&rate) {
            rates.push(rate);
        }
    }

    /// Accept subscriptions at every rate again.
    pub fn accept_all_rates(&self) {
        lock(&self.rejected_rates).clear();
    }

    /// Reject any subscription that includes extended signals.
    pub fn reject_full_outputs(&self, reject: bool) {
        self.reject_full.store(reject, Ordering::SeqCst);
    }

    /// Make every processing step fail.
    pub fn fail_runs(&self, fail: bool) {
        self.fail_runs.store(fail, Ordering::SeqCst);
    }

    /// Set the status code reported by the stack.
    pub fn set_status(&self, code: i32) {
        self.status.store(code, Ordering::SeqCst);
    }

    /// Queue outputs returned by the next processing step, ahead of simulated samples.
    pub fn push_outputs(&self, outputs: Vec<SensorOutput>) {
        lock(&self.scripted).push_back(outputs);
    }

    /// Number of processing steps driven so far.
    pub fn run_count(&self) -> u64 {
        self.run_count.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
struct Climate {
    temperature: f32,
    humidity: f32,
    pressure_pa: f32,
    gas_ohms: f32,
    runin: f32,
}

impl Default for Climate {
    fn default() -> Self {
        Self {
            temperature: 22.0,
            humidity: 45.0,
            pressure_pa: 101_325.0,
            gas_ohms: 50_000.0,
            runin: 0.0,
        }
    }
}

impl Climate {
    fn step(&mut self, runin_step: f32) {
        let mut rng = rand::rng();
        self.temperature =
            (self.temperature + rng.random_range(-0.05f32..=0.05)).clamp(10.0, 35.0);
        self.humidity = (self.humidity + rng.random_range(-0.2f32..=0.2)).clamp(20.0, 80.0);
        self.pressure_pa =
            (self.pressure_pa + rng.random_range(-5.0f32..=5.0)).clamp(95_000.0, 105_000.0);
        self.gas_ohms =
            (self.gas_ohms + rng.random_range(-500.0f32..=500.0)).clamp(5_000.0, 200_000.0);
        self.runin = (self.runin + runin_step).min(100.0);
    }

    /// Air quality index derived from gas resistance, lower resistance is worse air.
    fn iaq(&self) -> f32 {
        (500.0 * (1.0 - (self.gas_ohms / 200_000.0))).clamp(0.0, 500.0)
    }

    fn value(&self, signal: OutputSignal) -> f32 {
        match signal {
            OutputSignal::Iaq | OutputSignal::StaticIaq => self.iaq(),
            OutputSignal::Co2Equivalent => 400.0 + self.iaq() * 5.0,
            OutputSignal::BreathVocEquivalent => 0.5 + self.iaq() / 100.0,
            OutputSignal::RawTemperature => self.temperature,
            OutputSignal::RawPressure => self.pressure_pa,
            OutputSignal::RawHumidity => self.humidity,
            OutputSignal::RawGas => self.gas_ohms,
            OutputSignal::StabilizationStatus => {
                if self.runin >= 50.0 {
                    1.0
                } else {
                    0.0
                }
            }
            OutputSignal::RuninStatus => self.runin,
        }
    }
}

/// A [`SensorStack`] producing simulated samples.
///
/// Clones share [`StackControls`] but not simulation state.
#[derive(Clone)]
pub struct SimulatedStack {
    clock: Arc<dyn Clock>,
    controls: Arc<StackControls>,
    climate: Climate,
    runin_step: f32,
    started_at: Option<u8>,
    subscription: Option<(Vec<OutputSignal>, SampleRate)>,
    next_sample_ms: u64,
}

impl std::fmt::Debug for SimulatedStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedStack")
            .field("started_at", &self.started_at)
            .field("subscription", &self.subscription)
            .finish()
    }
}

impl SimulatedStack {
    /// Create a simulated stack paced by `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            controls: Arc::new(StackControls::default()),
            climate: Climate::default(),
            runin_step: 1.0,
            started_at: None,
            subscription: None,
            next_sample_ms: 0,
        }
    }

    /// Start with a given run-in percentage.
    #[must_use]
    pub fn with_runin(mut self, runin: f32) -> Self {
        self.climate.runin = runin.clamp(0.0, 100.0);
        self
    }

    /// Run-in percentage gained per simulated sample.
    #[must_use]
    pub fn runin_step(mut self, step: f32) -> Self {
        self.runin_step = step.max(0.0);
        self
    }

    /// Shared fault-injection handle.
    pub fn controls(&self) -> Arc<StackControls> {
        Arc::clone(&self.controls)
    }
}

impl SensorStack for SimulatedStack {
    fn begin(&mut self, address: u8) -> Result<(), StackError> {
        if self.controls.is_present(address) {
            self.started_at = Some(address);
            Ok(())
        } else {
            Err(StackError::new(-1, format!("no device at 0x{address:02X}")))
        }
    }

    fn update_subscription(
        &mut self,
        outputs: &[OutputSignal],
        rate: SampleRate,
    ) -> Result<(), StackError> {
        if self.started_at.is_none() {
            return Err(StackError::new(-2, "sensor not started"));
        }
        if lock(&self.controls.rejected_rates).contains(&rate) {
            return Err(StackError::new(-3, format!("rate {rate} not supported")));
        }
        if self.controls.reject_full.load(Ordering::SeqCst)
            && outputs.iter().any(OutputSignal::is_extended)
        {
            return Err(StackError::new(-4, "extended outputs not available"));
        }
        self.subscription = Some((outputs.to_vec(), rate));
        self.next_sample_ms = self.clock.now_ms();
        Ok(())
    }

    fn run(&mut self) -> Result<Option<Vec<SensorOutput>>, StackError> {
        self.controls.run_count.fetch_add(1, Ordering::SeqCst);
        if self.controls.fail_runs.load(Ordering::SeqCst) {
            return Err(StackError::new(-5, "processing step failed"));
        }
        if let Some(outputs) = lock(&self.controls.scripted).pop_front() {
            return Ok(Some(outputs));
        }

        let Some((signals, rate)) = &self.subscription else {
            return Ok(None);
        };
        let now = self.clock.now_ms();
        if now < self.next_sample_ms {
            return Ok(None);
        }
        let interval_ms = u64::try_from(rate.interval().as_millis()).unwrap_or(u64::MAX);
        self.next_sample_ms = now.saturating_add(interval_ms);

        self.climate.step(self.runin_step);
        Ok(Some(
            signals
                .iter()
                .map(|&signal| SensorOutput::new(signal, self.climate.value(signal)))
                .collect(),
        ))
    }

    fn status(&self) -> StackStatus {
        StackStatus(self.controls.status.load(Ordering::SeqCst))
    }
}
