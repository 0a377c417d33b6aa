//! Deterministic stand-ins for the hardware: scripted sensors, a virtual
//! monotonic clock, and a PWM generator that records every write.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hugin::calibration::CaliInfo;
use hugin::clock::Clock;
use hugin::device::{Device, Readout, Sensors};
use hugin::error::{Error, SensorKind};
use hugin::pwm::EscBus;

/// Virtual monotonic clock: time only advances when somebody sleeps.
pub struct TestClock {
    now: AtomicU64,
}

impl TestClock {
    pub fn new() -> Self {
        Self {
            now: AtomicU64::new(0),
        }
    }
}

impl Clock for TestClock {
    fn now_ns(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn sleep_ns(&self, ns: u64) {
        self.now.fetch_add(ns, Ordering::SeqCst);
    }
}

/// A sensor that returns a fixed sample, with scriptable failures.
pub struct StubSensor {
    kind: SensorKind,
    sample: [f32; 3],
    period: Duration,
    fail_every: Option<usize>,
    fail_all: bool,
    calls: usize,
    reads: Arc<AtomicUsize>,
    events: Option<(&'static str, Arc<Mutex<Vec<&'static str>>>)>,
    out: Readout<3>,
}

impl StubSensor {
    pub fn new(kind: SensorKind, sample: [f32; 3]) -> Self {
        Self {
            kind,
            sample,
            period: Duration::ZERO,
            fail_every: None,
            fail_all: false,
            calls: 0,
            reads: Arc::new(AtomicUsize::new(0)),
            events: None,
            out: Readout::new(20.0, 400.0),
        }
    }

    /// Nominal period; the default of zero makes the stub always due.
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Fail every `n`-th raw read.
    pub fn failing_every(mut self, n: usize) -> Self {
        self.fail_every = Some(n);
        self
    }

    pub fn failing_always(mut self) -> Self {
        self.fail_all = true;
        self
    }

    /// Log `label` into `log` on every raw read, for ordering assertions.
    pub fn with_events(mut self, label: &'static str, log: Arc<Mutex<Vec<&'static str>>>) -> Self {
        self.events = Some((label, log));
        self
    }

    /// Shared counter of successful raw reads.
    pub fn read_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.reads)
    }
}

impl Device for StubSensor {
    fn kind(&self) -> SensorKind {
        self.kind
    }

    fn read_raw(&mut self) -> Result<(), Error> {
        self.calls += 1;
        if let Some((label, log)) = &self.events {
            log.lock().unwrap().push(label);
        }
        if self.fail_all {
            return Err(Error::SensorRead { which: self.kind });
        }
        if let Some(n) = self.fail_every {
            if self.calls % n == 0 {
                return Err(Error::SensorRead { which: self.kind });
            }
        }
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn convert(&mut self) -> Result<bool, Error> {
        let sample = self.sample;
        self.out.cali.apply(&sample, &mut self.out.data);
        Ok(true)
    }

    fn input_filter(&mut self) {
        self.out.apply_filter();
    }

    fn period(&self) -> Duration {
        self.period
    }

    fn data(&self) -> &[f32] {
        &self.out.data
    }

    fn filtered(&self) -> &[f32] {
        &self.out.filtered
    }

    fn cali(&self) -> &CaliInfo {
        &self.out.cali
    }

    fn cali_mut(&mut self) -> &mut CaliInfo {
        &mut self.out.cali
    }

    fn last_update_ns(&self) -> u64 {
        self.out.last_update_ns
    }

    fn mark_updated(&mut self, now_ns: u64) {
        self.out.last_update_ns = now_ns;
    }
}

/// PWM generator recording `(setpoints, timestamp)` for every write.
pub struct RecordingEsc {
    writes: Arc<Mutex<Vec<([u32; 4], u64)>>>,
    clock: Arc<TestClock>,
    events: Option<(&'static str, Arc<Mutex<Vec<&'static str>>>)>,
}

impl RecordingEsc {
    pub fn new(clock: Arc<TestClock>) -> (Self, Arc<Mutex<Vec<([u32; 4], u64)>>>) {
        let writes = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                writes: Arc::clone(&writes),
                clock,
                events: None,
            },
            writes,
        )
    }

    pub fn with_events(mut self, label: &'static str, log: Arc<Mutex<Vec<&'static str>>>) -> Self {
        self.events = Some((label, log));
        self
    }
}

impl EscBus for RecordingEsc {
    fn write_channels(&mut self, power: &[u32; 4]) -> Result<(), Error> {
        if let Some((label, log)) = &self.events {
            log.lock().unwrap().push(label);
        }
        self.writes
            .lock()
            .unwrap()
            .push((*power, self.clock.now_ns()));
        Ok(())
    }
}

/// A full sensor bank of stubs plus the read counters for each.
pub struct StubBank {
    pub sensors: Sensors,
    pub acc_reads: Arc<AtomicUsize>,
    pub gyr_reads: Arc<AtomicUsize>,
    pub mag_reads: Arc<AtomicUsize>,
    pub bar_reads: Arc<AtomicUsize>,
    pub bar_ht_reads: Arc<AtomicUsize>,
}

pub fn stub_bank() -> StubBank {
    let acc = StubSensor::new(SensorKind::Adxl345, [0.0, 0.0, 9.81]);
    let gyr = StubSensor::new(SensorKind::L3g4200d, [0.1, -0.2, 0.05]);
    let mag = StubSensor::new(SensorKind::Hmc5883l, [20.0, 5.0, 42.0]);
    let bar = StubSensor::new(SensorKind::Bmp085, [120.0, 25.0, 99_900.0]);
    let bar_ht = StubSensor::new(SensorKind::Ms5611, [121.0, 25.5, 99_850.0]);
    StubBank {
        acc_reads: acc.read_counter(),
        gyr_reads: gyr.read_counter(),
        mag_reads: mag.read_counter(),
        bar_reads: bar.read_counter(),
        bar_ht_reads: bar_ht.read_counter(),
        sensors: Sensors {
            accelerometer: Box::new(acc),
            gyroscope: Box::new(gyr),
            magnetometer: Box::new(mag),
            barometer: Box::new(bar),
            barometer_ht: Box::new(bar_ht),
        },
    }
}
