mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{stub_bank, RecordingEsc, StubSensor, TestClock};
use hugin::bus::Bus;
use hugin::clock::Clock;
use hugin::config::{CONTROL_PERIOD_NS, PWM_MAX, PWM_MIN};
use hugin::device::{refresh, Device, Freshness, Sensors};
use hugin::error::SensorKind;
use hugin::exchange::FlightData;
use hugin::mag::MAG_CORR;
use hugin::pwm::PwmOutput;
use hugin::scheduler::Scheduler;

fn flight_data() -> FlightData {
    FlightData {
        power: [PWM_MIN; 4],
        ..FlightData::default()
    }
}

#[test]
fn tick_pacing_and_visit_counts() {
    let clock = Arc::new(TestClock::new());
    let bus = Bus::new();
    let stop = AtomicBool::new(false);
    let mut bank = stub_bank();
    let (esc, writes) = RecordingEsc::new(Arc::clone(&clock));
    let mut pwm = PwmOutput::new(Box::new(esc)).with_min_interval(0);
    let mut data = flight_data();

    let mut ticks = 0u64;
    Scheduler::new(&bus, &*clock, &stop)
        .run(&mut bank.sensors, &mut pwm, &mut data, |_| {
            ticks += 1;
            if ticks == 1000 {
                stop.store(true, Ordering::SeqCst);
            }
        })
        .unwrap();

    // 1000 ticks of 4 ms under the virtual clock: 4.000 s, +/- 1 ms.
    let elapsed = clock.now_ns();
    let expected = 1000 * CONTROL_PERIOD_NS;
    assert!(elapsed.abs_diff(expected) <= 1_000_000, "elapsed {elapsed}");

    assert_eq!(bank.acc_reads.load(Ordering::SeqCst), 1000);
    assert_eq!(bank.gyr_reads.load(Ordering::SeqCst), 1000);
    assert_eq!(bank.mag_reads.load(Ordering::SeqCst), 500);

    // 500 in-flight writes plus the shutdown park at PWM_MIN.
    let writes = writes.lock().unwrap();
    assert_eq!(writes.len(), 501);
    assert_eq!(writes.last().unwrap().0, [PWM_MIN; 4]);
}

#[test]
fn tick_ordering_within_a_tick() {
    let clock = Arc::new(TestClock::new());
    let bus = Bus::new();
    let stop = AtomicBool::new(false);
    let events = Arc::new(Mutex::new(Vec::new()));

    let mut sensors = Sensors {
        accelerometer: Box::new(
            StubSensor::new(SensorKind::Adxl345, [0.0, 0.0, 9.81])
                .with_events("acc", Arc::clone(&events)),
        ),
        gyroscope: Box::new(
            StubSensor::new(SensorKind::L3g4200d, [0.0; 3]).with_events("gyr", Arc::clone(&events)),
        ),
        magnetometer: Box::new(
            StubSensor::new(SensorKind::Hmc5883l, [0.0; 3]).with_events("mag", Arc::clone(&events)),
        ),
        barometer: Box::new(
            StubSensor::new(SensorKind::Bmp085, [0.0; 3]).with_events("bar", Arc::clone(&events)),
        ),
        barometer_ht: Box::new(
            StubSensor::new(SensorKind::Ms5611, [0.0; 3]).with_events("bar2", Arc::clone(&events)),
        ),
    };

    let (esc, _writes) = RecordingEsc::new(Arc::clone(&clock));
    let esc = esc.with_events("pwm", Arc::clone(&events));
    let mut pwm = PwmOutput::new(Box::new(esc)).with_min_interval(0);
    let mut data = flight_data();

    let mut ticks = 0u64;
    Scheduler::new(&bus, &*clock, &stop)
        .run(&mut sensors, &mut pwm, &mut data, |_| {
            ticks += 1;
            if ticks == 4 {
                stop.store(true, Ordering::SeqCst);
            }
        })
        .unwrap();

    let events = events.lock().unwrap();
    // Slow tick: inertial pair, then PWM before the magnetometer (the
    // cross-talk correction needs the setpoints already on the wire),
    // then the barometers.
    assert_eq!(
        &events[..6],
        &["acc", "gyr", "pwm", "mag", "bar", "bar2"],
        "slow tick order"
    );
    // Fast tick: inertial pair only.
    assert_eq!(&events[6..8], &["acc", "gyr"], "fast tick order");
}

#[test]
fn cancellation_parks_the_actuators() {
    let clock = Arc::new(TestClock::new());
    let bus = Bus::new();
    let stop = AtomicBool::new(false);
    let mut bank = stub_bank();
    let (esc, writes) = RecordingEsc::new(Arc::clone(&clock));
    let mut pwm = PwmOutput::new(Box::new(esc)).with_min_interval(0);
    let mut data = flight_data();

    let mut ticks = 0u64;
    Scheduler::new(&bus, &*clock, &stop)
        .run(&mut bank.sensors, &mut pwm, &mut data, |d| {
            d.power = [3000; 4];
            ticks += 1;
            if ticks == 500 {
                stop.store(true, Ordering::SeqCst);
            }
        })
        .unwrap();

    // The flag is honored within one tick.
    assert_eq!(ticks, 500);
    assert!(clock.now_ns() <= 501 * CONTROL_PERIOD_NS);

    let writes = writes.lock().unwrap();
    let (last, _) = writes.last().unwrap();
    assert_eq!(*last, [PWM_MIN; 4]);
    // In-flight writes carried the commanded power.
    assert_eq!(writes[writes.len() - 2].0, [3000; 4]);

    assert_eq!(bus.stat(), 0, "bus must be free after shutdown");
    assert_eq!(data.power, [PWM_MIN; 4]);
}

#[test]
fn mag_crosstalk_removed_for_spinning_motors() {
    let clock = Arc::new(TestClock::new());
    let bus = Bus::new();
    let stop = AtomicBool::new(false);
    let mut bank = stub_bank();
    bank.sensors.magnetometer = Box::new(StubSensor::new(
        SensorKind::Hmc5883l,
        [100.0, 100.0, 100.0],
    ));
    let (esc, _writes) = RecordingEsc::new(Arc::clone(&clock));
    let mut pwm = PwmOutput::new(Box::new(esc)).with_min_interval(0);
    let mut data = flight_data();
    data.power = [3000; 4];

    // A single slow tick: the magnetometer filter primes to exactly 100
    // and the correction for the four spinning motors is applied once.
    let mut ticks = 0u64;
    Scheduler::new(&bus, &*clock, &stop)
        .run(&mut bank.sensors, &mut pwm, &mut data, |_| {
            ticks += 1;
            if ticks == 1 {
                stop.store(true, Ordering::SeqCst);
            }
        })
        .unwrap();

    // Reference fit, same operation order as the compensator.
    let fit = |p: f32, t: &[f32; 3]| t[0] * p.sqrt() + t[1] * p.powf(0.25) + t[2];
    let mut expected = [100.0f32; 3];
    for i in 0..4 {
        for (j, e) in expected.iter_mut().enumerate() {
            *e -= fit(3000.0, &MAG_CORR[i][j]);
        }
    }
    assert_eq!(data.mag_est, expected);
}

#[test]
fn esc_arming_sequence() {
    let clock = Arc::new(TestClock::new());
    let bus = Bus::new();
    let (esc, writes) = RecordingEsc::new(Arc::clone(&clock));
    let mut pwm = PwmOutput::new(Box::new(esc));

    pwm.arm(&bus, &*clock).unwrap();

    {
        let writes = writes.lock().unwrap();
        assert_eq!(writes.len(), 3);
        assert_eq!(writes[0].0, [PWM_MIN; 4]);
        assert_eq!(writes[1].0, [PWM_MAX; 4]);
        assert_eq!(writes[2].0, [PWM_MIN; 4]);
        assert!(writes[1].1 - writes[0].1 >= 40_000_000);
        assert!(writes[2].1 - writes[1].1 >= 70_000_000);
        assert!(clock.now_ns() - writes[2].1 >= 50_000_000);
    }

    // Arming happens exactly once.
    pwm.arm(&bus, &*clock).unwrap();
    assert_eq!(writes.lock().unwrap().len(), 3);
}

#[test]
fn refresh_honors_the_device_period() {
    let bus = Bus::new();
    let mut dev = StubSensor::new(SensorKind::Hmc5883l, [1.0, 2.0, 3.0])
        .with_period(Duration::from_millis(10));

    assert_eq!(refresh(&mut dev, &bus, 0).unwrap(), Freshness::NotDue);
    assert_eq!(refresh(&mut dev, &bus, 10_000_000).unwrap(), Freshness::Fresh);
    assert_eq!(refresh(&mut dev, &bus, 15_000_000).unwrap(), Freshness::NotDue);
    assert_eq!(refresh(&mut dev, &bus, 20_000_000).unwrap(), Freshness::Fresh);

    // Timestamps only move forward.
    assert_eq!(dev.last_update_ns(), 20_000_000);
}

#[test]
fn shutdown_leaves_the_bus_as_before_init() {
    let bus = Bus::new();
    let mut bank = stub_bank();
    assert_eq!(bus.stat(), 0);
    bank.sensors.init_all(&bus).unwrap();
    bank.sensors.end_all(&bus).unwrap();
    assert_eq!(bus.stat(), 0);
}
