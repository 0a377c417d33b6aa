use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::Receiver;
use log::{error, info};

use hugin::bus::Bus;
use hugin::calibration::Calibrator;
use hugin::chips::{bus_clock_speed, Adxl345, Bmp085, Hmc5883l, L3g4200d, Ms5611, Pca9685};
use hugin::clock::{Clock, Monotonic};
use hugin::config::PWM_MIN;
use hugin::device::Sensors;
use hugin::exchange::FlightData;
use hugin::memory::Memory;
use hugin::pwm::PwmOutput;
use hugin::scheduler::Scheduler;

const FLIGHT_RECORD_CAPACITY: usize = 5000;

fn main() {
    env_logger::init();

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))
            .expect("Unable to set Ctrl-C handler");
    }

    if let Err(e) = run(&stop) {
        error!("{e:#}");
        let code = e
            .downcast_ref::<hugin::Error>()
            .map(hugin::Error::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

fn run(stop: &Arc<AtomicBool>) -> Result<()> {
    let bus = Bus::new();
    let clock = Monotonic::new();

    info!("bringing up the i2c devices");
    let mut sensors = Sensors {
        accelerometer: Box::new(Adxl345::new()?),
        gyroscope: Box::new(L3g4200d::new()?),
        magnetometer: Box::new(Hmc5883l::new()?),
        barometer: Box::new(Bmp085::new()?),
        barometer_ht: Box::new(Ms5611::new()?),
    };
    sensors.init_all(&bus)?;
    info!("i2c clock frequency: {} Hz", bus_clock_speed()?);
    let mut pwm = PwmOutput::new(Box::new(Pca9685::new()?));
    pwm.init(&bus)?;

    info!("calibrating, keep the airframe still");
    Calibrator::new(&bus, &clock, stop).run(&mut sensors)?;

    let mut data = FlightData::default();
    data.init_from_calibration(&sensors);

    pwm.arm(&bus, &clock)?;
    // Give the ESCs time to settle before the loop takes over.
    clock.sleep_ns(5_000_000_000);

    let (tx, rx) = crossbeam_channel::bounded(64);
    {
        let bus = &bus;
        let clock = &clock;
        let stop = stop.as_ref();
        let sensors = &mut sensors;
        let pwm = &mut pwm;
        let data = &mut data;
        thread::scope(move |scope| -> Result<()> {
            let logger = scope.spawn(move || logger_loop(rx));
            let flight = scope.spawn(move || {
                let scheduler = Scheduler::new(bus, clock, stop).with_snapshots(tx);
                scheduler.run(sensors, pwm, data, |d| {
                    // The estimator/PID pair plugs in here; until it does,
                    // the airframe stays on the ground.
                    d.power = [PWM_MIN; 4];
                })
            });
            flight
                .join()
                .map_err(|_| anyhow!("control loop thread panicked"))??;
            logger
                .join()
                .map_err(|_| anyhow!("logger thread panicked"))??;
            Ok(())
        })?;
    }

    sensors.end_all(&bus)?;
    pwm.end(&bus)?;
    info!("bus released, stat = {}", bus.stat());
    Ok(())
}

/// Drains flight snapshots into a tab-separated log and keeps the most
/// recent window for the shutdown dump. Ends when the scheduler hangs up.
fn logger_loop(rx: Receiver<FlightData>) -> Result<()> {
    let mut file =
        BufWriter::new(File::create("flight.log").context("Unable to create flight log")?);
    let mut memory = Memory::new(FLIGHT_RECORD_CAPACITY);
    let mut line = String::with_capacity(512);
    let mut prev_t = 0.0;

    while let Ok(snapshot) = rx.recv() {
        line.clear();
        snapshot.write_record(prev_t, &mut line);
        writeln!(file, "{line}")?;
        prev_t = snapshot.t;
        memory.push(snapshot);
    }
    file.flush()?;

    let dump = File::create("flight_record.yaml").context("Unable to create flight record")?;
    serde_yaml::to_writer(dump, &memory.iter().collect::<Vec<_>>())
        .context("Unable to write flight record")?;
    info!(
        "flight record written, {} of {} snapshots retained",
        memory.len(),
        memory.total()
    );
    Ok(())
}
