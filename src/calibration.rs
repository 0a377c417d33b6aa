//! Stationary calibration: per-device bias/deviation learning.
//!
//! One worker thread per sensor collects its sample series in parallel with
//! the others; the single bus is the only shared resource and is held for a
//! raw read at a time, never across a sleep. Sleeps dominate each sampling
//! period, so effective parallelism stays high despite the serialized bus.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use log::{debug, info};
use ndarray::Array1;

use crate::bus::Bus;
use crate::clock::Clock;
use crate::config;
use crate::device::{acquire_sample, Device, Sensors};
use crate::error::Error;

/// Bias and spread learned during the stationary phase, applied to every
/// subsequent reading. Mutated only while calibrating; read-only in flight.
#[derive(Debug, Clone)]
pub struct CaliInfo {
    mean: Vec<f32>,
    sd: Vec<f32>,
    scale: Option<Vec<f32>>,
}

impl CaliInfo {
    /// Zeroed bias and deviation vectors of length `dim`.
    pub fn new(dim: usize) -> Self {
        Self {
            mean: vec![0.0; dim],
            sd: vec![0.0; dim],
            scale: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &[f32] {
        &self.mean
    }

    pub fn mean_mut(&mut self) -> &mut [f32] {
        &mut self.mean
    }

    pub fn sd(&self) -> &[f32] {
        &self.sd
    }

    pub fn sd_mut(&mut self) -> &mut [f32] {
        &mut self.sd
    }

    /// Install a per-axis scale table. Must match the bias dimension.
    pub fn set_scale(&mut self, scale: Vec<f32>) {
        assert_eq!(scale.len(), self.mean.len());
        self.scale = Some(scale);
    }

    /// Bias-correct one channel: `(raw - bias) * scale`.
    pub fn apply_one(&self, j: usize, raw: f32) -> f32 {
        let scaled = raw - self.mean[j];
        match &self.scale {
            Some(scale) => scaled * scale[j],
            None => scaled,
        }
    }

    /// Bias-correct a whole sample.
    pub fn apply(&self, raw: &[f32], out: &mut [f32]) {
        for j in 0..self.mean.len() {
            out[j] = self.apply_one(j, raw[j]);
        }
    }
}

/// Spawns the per-sensor calibration workers and aggregates their
/// statistics into each device's [`CaliInfo`].
pub struct Calibrator<'a> {
    bus: &'a Bus,
    clock: &'a dyn Clock,
    stop: &'a AtomicBool,
    log_dir: PathBuf,
}

impl<'a> Calibrator<'a> {
    pub fn new(bus: &'a Bus, clock: &'a dyn Clock, stop: &'a AtomicBool) -> Self {
        Self {
            bus,
            clock,
            stop,
            log_dir: PathBuf::from("."),
        }
    }

    /// Directory receiving the `<name>_calibration.log` files.
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self
    }

    /// Run all five workers to completion and report the first failure.
    pub fn run(&self, sensors: &mut Sensors) -> Result<(), Error> {
        let Sensors {
            accelerometer,
            gyroscope,
            magnetometer,
            barometer,
            barometer_ht,
        } = sensors;
        let acc = accelerometer.as_mut();
        let gyr = gyroscope.as_mut();
        let mag = magnetometer.as_mut();
        let bar = barometer.as_mut();
        let bar_ht = barometer_ht.as_mut();

        let outcomes = thread::scope(|scope| {
            let handles = vec![
                scope.spawn(move || self.worker(acc, config::N_SAMPLE_CALIBRATION)),
                scope.spawn(move || self.worker(gyr, config::N_SAMPLE_CALIBRATION)),
                scope.spawn(move || self.worker(mag, config::N_SAMPLE_CALIBRATION_MAG)),
                scope.spawn(move || self.worker(bar, config::N_SAMPLE_CALIBRATION_BARO)),
                scope.spawn(move || self.worker(bar_ht, config::N_SAMPLE_CALIBRATION_BARO)),
            ];
            handles
                .into_iter()
                .map(|h| h.join().expect("calibration worker panicked"))
                .collect::<Vec<_>>()
        });

        for outcome in outcomes {
            outcome?;
        }
        Ok(())
    }

    /// Collect `n_samples` converted samples from one device, then store
    /// mean and sample standard deviation per axis.
    fn worker(&self, dev: &mut dyn Device, n_samples: usize) -> Result<(), Error> {
        let which = dev.kind();
        let dim = dev.cali().dim();
        let path = self.log_dir.join(format!("{}_calibration.log", dev.name()));
        let mut log = BufWriter::new(File::create(&path)?);

        let started_ns = self.clock.now_ns();
        let mut nominal_ns: u64 = 0;
        let mut series: Vec<Vec<f32>> = vec![Vec::with_capacity(n_samples); dim];
        let mut taken = 0usize;
        let mut consecutive = 0u32;

        while taken < n_samples {
            if self.stop.load(Ordering::Relaxed) {
                return Err(Error::CalibrationAborted {
                    which,
                    failures: consecutive,
                });
            }

            let outcome = acquire_sample(dev, self.bus);
            // The device reports the duration of the ADC cycle it just
            // started; sleeping it out keeps the bus free for the others.
            let period_ns = dev.period().as_nanos() as u64;
            self.clock.sleep_ns(period_ns);
            nominal_ns += period_ns;

            match outcome {
                Ok(true) => {
                    consecutive = 0;
                    let elapsed = (self.clock.now_ns() - started_ns) as f64 / 1e9;
                    write!(log, "{:.6}", elapsed)?;
                    for (j, column) in series.iter_mut().enumerate() {
                        let v = dev.data()[j];
                        column.push(v);
                        write!(log, "\t{:.6}", v)?;
                    }
                    writeln!(log)?;
                    taken += 1;
                }
                Ok(false) => {} // intermediate ADC stage, nothing to record
                Err(e) if e.is_transient() => {
                    writeln!(log, "===========")?;
                    consecutive += 1;
                    if consecutive >= config::CALIBRATION_RETRY_BUDGET {
                        return Err(Error::CalibrationAborted {
                            which,
                            failures: consecutive,
                        });
                    }
                }
                Err(e) => return Err(e),
            }

            if nominal_ns > 0 && self.clock.now_ns() - started_ns > 10 * nominal_ns {
                return Err(Error::CalibrationAborted {
                    which,
                    failures: consecutive,
                });
            }
        }
        log.flush()?;

        let cali = dev.cali_mut();
        for (j, column) in series.into_iter().enumerate() {
            // Accumulate in f64 so the mean of thousands of samples does
            // not drown in single-precision rounding.
            let column = Array1::from_iter(column.into_iter().map(f64::from));
            cali.mean_mut()[j] = column.mean().unwrap_or(0.0) as f32;
            cali.sd_mut()[j] = column.std(1.0) as f32;
        }
        debug!(
            "{} calibration mean {:?} sd {:?}",
            dev.name(),
            dev.cali().mean(),
            dev.cali().sd()
        );

        let limit = dev.bias_limit();
        if dev.cali().mean().iter().any(|m| m.abs() >= limit) {
            return Err(Error::CalibrationAborted { which, failures: 0 });
        }
        info!("{} calibrated over {} samples", dev.name(), n_samples);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_info_is_zeroed() {
        let cali = CaliInfo::new(3);
        assert_eq!(cali.mean(), &[0.0; 3]);
        assert_eq!(cali.sd(), &[0.0; 3]);
        assert_eq!(cali.dim(), 3);
    }

    #[test]
    fn apply_subtracts_bias() {
        let mut cali = CaliInfo::new(3);
        cali.mean_mut().copy_from_slice(&[1.0, -2.0, 9.81]);
        let mut out = [0.0; 3];
        cali.apply(&[1.0, -2.0, 9.81], &mut out);
        assert_eq!(out, [0.0, 0.0, 0.0]);
    }

    #[test]
    fn apply_honors_scale_table() {
        let mut cali = CaliInfo::new(2);
        cali.mean_mut().copy_from_slice(&[1.0, 1.0]);
        cali.set_scale(vec![2.0, 0.5]);
        assert_eq!(cali.apply_one(0, 2.0), 2.0);
        assert_eq!(cali.apply_one(1, 3.0), 1.0);
    }
}
