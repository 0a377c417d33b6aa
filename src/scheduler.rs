//! The periodic control loop.
//!
//! A single dedicated thread visits the sensors serially each tick, paced by
//! absolute deadlines so the period never drifts. Every tick reads the
//! inertial pair; every `PWM_CONTROL_PERIOD`-th tick additionally writes the
//! actuator setpoints and reads the slow sensors. The ordering within a tick
//! matters: the magnetometer correction consumes the PWM values written just
//! before it.

use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::Sender;
use log::{debug, error, info, warn};

use crate::bus::Bus;
use crate::clock::Clock;
use crate::config::{CONTROL_PERIOD_NS, PWM_CONTROL_PERIOD, PWM_MIN};
use crate::device::{refresh, Device, Freshness, Sensors};
use crate::error::Error;
use crate::exchange::FlightData;
use crate::mag;
use crate::pwm::PwmOutput;

pub struct Scheduler<'a> {
    bus: &'a Bus,
    clock: &'a dyn Clock,
    stop: &'a AtomicBool,
    period_ns: u64,
    snapshots: Option<Sender<FlightData>>,
}

impl<'a> Scheduler<'a> {
    pub fn new(bus: &'a Bus, clock: &'a dyn Clock, stop: &'a AtomicBool) -> Self {
        Self {
            bus,
            clock,
            stop,
            period_ns: CONTROL_PERIOD_NS,
            snapshots: None,
        }
    }

    /// Publish a snapshot of the record on every slow tick. The channel is
    /// bounded and sends never block; a full channel drops the snapshot.
    pub fn with_snapshots(mut self, tx: Sender<FlightData>) -> Self {
        self.snapshots = Some(tx);
        self
    }

    /// Run until the stop flag is raised or a fatal error occurs. On every
    /// exit path the actuators are parked at `PWM_MIN` and the bus is left
    /// free. `control` is the seam for the external estimator/PID pair: it
    /// sees the freshly updated record once per tick and owns `power`.
    pub fn run(
        &self,
        sensors: &mut Sensors,
        pwm: &mut PwmOutput,
        data: &mut FlightData,
        mut control: impl FnMut(&mut FlightData),
    ) -> Result<(), Error> {
        elevate_priority();
        info!("control loop started, period {} ns", self.period_ns);

        let start_ns = self.clock.now_ns();
        let mut deadline_ns = start_ns;
        let mut prev_ns = start_ns;
        let mut tick: u64 = 0;

        let result = loop {
            if self.stop.load(Ordering::Relaxed) {
                info!("control loop cancelled after {tick} ticks");
                break Ok(());
            }
            let now_ns = self.clock.now_ns();
            data.t = (now_ns - start_ns) as f32 / 1e9;
            data.dt = (now_ns - prev_ns) as f32 / 1e9;
            prev_ns = now_ns;

            let slow_tick = tick % PWM_CONTROL_PERIOD == 0;
            if let Err(e) = self.tick_body(sensors, pwm, data, slow_tick, now_ns) {
                error!("control loop fatal: {e}");
                break Err(e);
            }
            control(data);

            if slow_tick {
                if let Some(tx) = &self.snapshots {
                    // Dropping a snapshot is fine; blocking the loop is not.
                    let _ = tx.try_send(data.clone());
                }
            }

            tick += 1;
            deadline_ns += self.period_ns;
            self.clock.sleep_until_ns(deadline_ns);
        };

        let idle = [PWM_MIN; 4];
        if let Err(e) = pwm.write_only(&idle, self.bus) {
            error!("failed to park actuators: {e}");
        }
        data.power = idle;
        result
    }

    fn tick_body(
        &self,
        sensors: &mut Sensors,
        pwm: &mut PwmOutput,
        data: &mut FlightData,
        slow_tick: bool,
        now_ns: u64,
    ) -> Result<(), Error> {
        // Inertial phase: accelerometer first, gyroscope second, every tick.
        if self.poll(sensors.accelerometer.as_mut(), now_ns)? == Freshness::Fresh {
            data.acc.copy_from_slice(sensors.accelerometer.data());
            data.acc_est.copy_from_slice(sensors.accelerometer.filtered());
        }
        if self.poll(sensors.gyroscope.as_mut(), now_ns)? == Freshness::Fresh {
            data.gyr.copy_from_slice(sensors.gyroscope.data());
            data.gyr_est.copy_from_slice(sensors.gyroscope.filtered());
        }

        if !slow_tick {
            return Ok(());
        }

        // Slow phase. The PWM write comes first: the magnetometer
        // correction below depends on the setpoints now on the wire.
        match pwm.write(&data.power, self.bus, now_ns) {
            Ok(Freshness::Fresh) => data.dt_accu += data.dt,
            Ok(Freshness::NotDue) => data.dt_accu = 0.0,
            Err(e) if e.is_transient() => {
                debug!("pwm write skipped: {e}");
                data.dt_accu = 0.0;
            }
            Err(e) => return Err(e),
        }

        if self.poll(sensors.magnetometer.as_mut(), now_ns)? == Freshness::Fresh {
            data.mag.copy_from_slice(sensors.magnetometer.data());
            data.mag_est.copy_from_slice(sensors.magnetometer.filtered());
            mag::compensate(&data.power, &mut data.mag_est);
        }

        if self.poll(sensors.barometer.as_mut(), now_ns)? == Freshness::Fresh {
            data.attitude = sensors.barometer.data()[0];
            data.att_est = sensors.barometer.filtered()[0];
            data.temperature = sensors.barometer.data()[1];
            data.pressure = sensors.barometer.data()[2];
        }
        if self.poll(sensors.barometer_ht.as_mut(), now_ns)? == Freshness::Fresh {
            data.attitude_ht = sensors.barometer_ht.data()[0];
            data.att_ht_est = sensors.barometer_ht.filtered()[0];
        }
        Ok(())
    }

    /// A transient read failure skips the sensor for this tick; everything
    /// else propagates and takes the loop down.
    fn poll(&self, dev: &mut dyn Device, now_ns: u64) -> Result<Freshness, Error> {
        match refresh(dev, self.bus, now_ns) {
            Ok(freshness) => Ok(freshness),
            Err(e) if e.is_transient() => {
                debug!("{}: {e}, skipping this tick", dev.name());
                Ok(Freshness::NotDue)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(target_os = "linux")]
fn elevate_priority() {
    // SAFETY: plain syscall wrappers on a valid sched_param.
    unsafe {
        let param = libc::sched_param { sched_priority: 49 };
        if libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) != 0 {
            warn!("SCHED_FIFO unavailable, control loop runs at normal priority");
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn elevate_priority() {
    warn!("no realtime scheduling on this platform");
}
