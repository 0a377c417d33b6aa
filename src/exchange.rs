//! Shared snapshot of the latest sensor readings and derived estimates,
//! consumed by the estimator and the flight logger.

use std::fmt::Write as _;

use serde::Serialize;

use crate::config::PWM_MIN;
use crate::device::Sensors;
use crate::math::{norm, RAD_TO_DEG};

/// One tick's worth of flight state. All units SI except the PWM ticks.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FlightData {
    /// Seconds since the control loop started.
    pub t: f32,
    /// Duration of the last tick.
    pub dt: f32,
    /// Time accumulated since the last successful PWM write.
    pub dt_accu: f32,

    /// Accelerometer, bias-corrected [m/s²].
    pub acc: [f32; 3],
    /// Gyroscope, bias-corrected [deg/s].
    pub gyr: [f32; 3],
    /// Magnetometer, bias-corrected [µT].
    pub mag: [f32; 3],
    pub acc_est: [f32; 3],
    pub gyr_est: [f32; 3],
    pub mag_est: [f32; 3],

    /// Altitude above the calibration site, BMP085 [m].
    pub attitude: f32,
    pub att_est: f32,
    /// Altitude above the calibration site, MS5611 [m].
    pub attitude_ht: f32,
    pub att_ht_est: f32,

    /// Ambient temperature [°C].
    pub temperature: f32,
    /// Ambient pressure [Pa].
    pub pressure: f32,

    /// Roll, pitch, yaw [deg].
    pub angle: [f32; 3],
    /// Actuator setpoints, PWM ticks in [PWM_MIN, PWM_MAX].
    pub power: [u32; 4],
}

impl FlightData {
    /// Seed the record from the freshly learned calibration: gravity gives
    /// the initial roll and pitch, the compass the initial yaw, and the
    /// actuators start at idle.
    pub fn init_from_calibration(&mut self, sensors: &Sensors) {
        let acc_cali = sensors.accelerometer.cali();
        for j in 0..3 {
            self.acc[j] = acc_cali.mean()[j];
            self.acc_est[j] = acc_cali.mean()[j];
            self.gyr[j] = 0.0;
        }
        let mag_cali = sensors.magnetometer.cali();
        for j in 0..3 {
            self.mag[j] = mag_cali.mean()[j];
            self.mag_est[j] = mag_cali.mean()[j];
        }
        let bar_cali = sensors.barometer.cali();
        self.attitude = 0.0;
        self.att_est = 0.0;
        self.attitude_ht = 0.0;
        self.att_ht_est = 0.0;
        self.temperature = bar_cali.mean()[1];
        self.pressure = bar_cali.mean()[2];

        self.angle[0] = self.acc[1].atan2(self.acc[2]) * RAD_TO_DEG;
        self.angle[1] = -self.acc[0].atan2(norm(&self.acc)) * RAD_TO_DEG;
        self.angle[2] = (self.mag[1] / norm(&self.mag[..2])).acos() * RAD_TO_DEG;

        self.power = [PWM_MIN; 4];
    }

    /// Append the tab-separated record columns to `line`. The caller owns
    /// the buffer and the previous timestamp, so concurrent loggers never
    /// share state.
    pub fn write_record(&self, prev_t: f32, line: &mut String) {
        let acc_n = unit_or_one(norm(&self.acc));
        let mag_n = unit_or_one(norm(&self.mag));
        let acc_est_n = unit_or_one(norm(&self.acc_est));
        let mag_est_n = unit_or_one(norm(&self.mag_est));

        let _ = write!(line, "{}\t{}\t{}", self.t, self.dt, self.t - prev_t);
        for v in self.angle {
            let _ = write!(line, "\t{v}");
        }
        for v in self.acc {
            let _ = write!(line, "\t{}", v / acc_n);
        }
        for v in self.gyr {
            let _ = write!(line, "\t{v}");
        }
        for v in self.mag {
            let _ = write!(line, "\t{}", v / mag_n);
        }
        for v in self.acc_est {
            let _ = write!(line, "\t{}", v / acc_est_n);
        }
        for v in self.gyr_est {
            let _ = write!(line, "\t{v}");
        }
        for v in self.mag_est {
            let _ = write!(line, "\t{}", v / mag_est_n);
        }
        let _ = write!(
            line,
            "\t{}\t{}\t{}\t{}\t{}\t{}",
            self.attitude,
            self.att_est,
            self.attitude_ht,
            self.att_ht_est,
            self.temperature,
            self.pressure
        );
        for p in self.power {
            let _ = write!(line, "\t{p}");
        }
    }
}

fn unit_or_one(n: f32) -> f32 {
    if n > 0.0 {
        n
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_has_stable_column_count() {
        let data = FlightData::default();
        let mut line = String::new();
        data.write_record(0.0, &mut line);
        // 3 time columns + 3 angles + 6x3 vector channels + 6 scalars + 4 power
        assert_eq!(line.split('\t').count(), 34);
    }

    #[test]
    fn level_airframe_starts_level() {
        let mut data = FlightData::default();
        data.acc = [0.0, 0.0, 9.81];
        data.mag = [20.0, 0.0, 40.0];
        data.angle[0] = data.acc[1].atan2(data.acc[2]) * RAD_TO_DEG;
        assert!(data.angle[0].abs() < 1e-6);
    }
}
