//! Uniform contract over the heterogeneous bus devices.
//!
//! Every sensor exposes the same capability set: initialize, raw read (one
//! bus transaction), conversion to physical units, low-pass filtering, and
//! shutdown. The calibration orchestrator and the sample scheduler drive
//! devices exclusively through this trait, so a test harness can substitute
//! scripted stubs for the real chips.

use std::time::Duration;

use log::info;

use crate::bus::Bus;
use crate::calibration::CaliInfo;
use crate::error::{Error, SensorKind};
use crate::filter::LowPass;

/// Outcome of a sampling attempt that is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// A complete physical sample was produced and the filter advanced.
    Fresh,
    /// The device's period has not elapsed, or an intermediate ADC stage
    /// completed without yielding a full sample. Not logged, not an error.
    NotDue,
}

pub trait Device: Send {
    /// Which chip this is; determines error attribution and the shell's
    /// exit code on init failure.
    fn kind(&self) -> SensorKind;

    /// Stable human-readable name; also names the calibration log file.
    fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Bring the chip up: identity check and configuration writes.
    fn init(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// One bus transaction filling the device's native raw sample. The
    /// caller holds the bus for the duration of this call and releases it
    /// before conversion.
    fn read_raw(&mut self) -> Result<(), Error>;

    /// Raw to physical units, applying bias and scale from calibration.
    ///
    /// Returns `true` when a complete physical sample is available. Staged
    /// devices (the barometer ADC cycles) return `false` for the
    /// intermediate step.
    fn convert(&mut self) -> Result<bool, Error>;

    /// Advance the per-channel low-pass bank with the current sample.
    fn input_filter(&mut self);

    /// Shut the chip down.
    fn end(&mut self) -> Result<(), Error> {
        info!("{} end", self.name());
        Ok(())
    }

    /// Nominal inter-sample period. May vary between calls for devices with
    /// staged ADC cycles.
    fn period(&self) -> Duration;

    /// Most recent converted sample, physical units, length 1 or 3.
    fn data(&self) -> &[f32];

    /// Low-pass-filtered estimate, same length as `data`.
    fn filtered(&self) -> &[f32];

    fn cali(&self) -> &CaliInfo;
    fn cali_mut(&mut self) -> &mut CaliInfo;

    /// Monotonic timestamp of the last successful raw read.
    fn last_update_ns(&self) -> u64;
    fn mark_updated(&mut self, now_ns: u64);

    /// Largest acceptable |bias| component after calibration.
    fn bias_limit(&self) -> f32 {
        f32::INFINITY
    }
}

/// Per-device sampling state shared by all concrete devices: converted
/// sample, filtered estimate, calibration info, filter bank and the
/// last-update timestamp.
#[derive(Debug)]
pub struct Readout<const D: usize> {
    pub data: [f32; D],
    pub filtered: [f32; D],
    pub cali: CaliInfo,
    filters: [LowPass; D],
    pub last_update_ns: u64,
}

impl<const D: usize> Readout<D> {
    pub fn new(cutoff_hz: f32, sample_rate_hz: f32) -> Self {
        Self {
            data: [0.0; D],
            filtered: [0.0; D],
            cali: CaliInfo::new(D),
            filters: std::array::from_fn(|_| LowPass::new(cutoff_hz, sample_rate_hz)),
            last_update_ns: 0,
        }
    }

    /// Run every channel of the current sample through its filter.
    pub fn apply_filter(&mut self) {
        for (j, filter) in self.filters.iter_mut().enumerate() {
            self.filtered[j] = filter.update(self.data[j]);
        }
    }
}

/// The five sensors on the bus, exclusively owned by the I²C subsystem for
/// the life of the process.
pub struct Sensors {
    pub accelerometer: Box<dyn Device>,
    pub gyroscope: Box<dyn Device>,
    pub magnetometer: Box<dyn Device>,
    pub barometer: Box<dyn Device>,
    pub barometer_ht: Box<dyn Device>,
}

impl Sensors {
    /// Initialize every sensor in probe order, each under the bus guard.
    /// The first failure aborts startup.
    pub fn init_all(&mut self, bus: &Bus) -> Result<(), Error> {
        for dev in [
            &mut self.accelerometer,
            &mut self.gyroscope,
            &mut self.magnetometer,
            &mut self.barometer,
            &mut self.barometer_ht,
        ] {
            let _guard = bus.enter();
            dev.init()?;
        }
        Ok(())
    }

    /// Shut every sensor down. Continues past individual failures so the
    /// bus ends up fully released either way; the first error is reported.
    pub fn end_all(&mut self, bus: &Bus) -> Result<(), Error> {
        let mut first_err = None;
        for dev in [
            &mut self.accelerometer,
            &mut self.gyroscope,
            &mut self.magnetometer,
            &mut self.barometer,
            &mut self.barometer_ht,
        ] {
            let _guard = bus.enter();
            if let Err(e) = dev.end() {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Bus-guarded raw read followed by conversion and filtering outside the
/// bus. The calibration workers call this once per sample.
///
/// Returns `true` when a complete physical sample was produced.
pub fn acquire_sample(dev: &mut dyn Device, bus: &Bus) -> Result<bool, Error> {
    {
        let _bus = bus.enter();
        dev.read_raw()?;
    }
    let complete = dev.convert()?;
    if complete {
        dev.input_filter();
    }
    Ok(complete)
}

/// The scheduler's per-tick sampling operation.
///
/// Consults the device's last-update timestamp first: a device whose period
/// has not elapsed is skipped without touching the bus. Otherwise performs a
/// bus-guarded read, converts, filters, and advances the timestamp.
pub fn refresh(dev: &mut dyn Device, bus: &Bus, now_ns: u64) -> Result<Freshness, Error> {
    let period = dev.period().as_nanos() as u64;
    if now_ns.saturating_sub(dev.last_update_ns()) < period {
        return Ok(Freshness::NotDue);
    }
    {
        let _bus = bus.enter();
        dev.read_raw()?;
    }
    dev.mark_updated(now_ns);
    if dev.convert()? {
        dev.input_filter();
        Ok(Freshness::Fresh)
    } else {
        Ok(Freshness::NotDue)
    }
}
