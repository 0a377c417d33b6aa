//! Compile-time flight parameters.
//!
//! All periods are in nanoseconds, all rates in Hz, PWM values in raw
//! controller ticks.

/// Period of one control cycle (250 Hz).
pub const CONTROL_PERIOD_NS: u64 = 4_000_000;

/// PID proportional gain.
pub const KP: f32 = 7.5;
/// PID integral gain.
pub const KI: f32 = 0.7;
/// PID derivative gain.
pub const KD: f32 = 140.0;

/// Lowest PWM value the ESCs accept (motor idle).
pub const PWM_MIN: u32 = 1750;
/// Highest PWM value the ESCs accept (full throttle).
pub const PWM_MAX: u32 = 3500;

/// ADXL345 accelerometer sample rate.
pub const ADXL345_RATE: u32 = 400;
/// L3G4200D gyroscope sample rate.
pub const L3G4200D_RATE: u32 = 400;
/// HMC5883L magnetometer sample rate.
pub const HMC5883L_RATE: u32 = 75;

/// BMP085 pressure conversion time at OSS = 3.
pub const BMP085_PERIOD_LONG_NS: u64 = 25_500_000;
/// BMP085 temperature conversion time.
pub const BMP085_PERIOD_SHORT_NS: u64 = 4_500_000;
/// MS5611 conversion period (also the minimum inter-write interval of the
/// PWM driver).
pub const MS5611_PERIOD_NS: u64 = 10_000_000;

/// PWM setpoints are written out every this many control ticks.
pub const PWM_CONTROL_PERIOD: u64 = 2;

/// Samples collected per inertial sensor during stationary calibration.
pub const N_SAMPLE_CALIBRATION: usize = 3000;
/// Magnetometer calibration sample count.
pub const N_SAMPLE_CALIBRATION_MAG: usize = N_SAMPLE_CALIBRATION / 5;
/// Barometer calibration sample count (each of the two barometers).
pub const N_SAMPLE_CALIBRATION_BARO: usize = N_SAMPLE_CALIBRATION / 10;

/// A calibration worker that fails this many reads in a row gives up.
pub const CALIBRATION_RETRY_BUDGET: u32 = 10;
