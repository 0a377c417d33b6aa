//! ADXL345 three-axis accelerometer.

use std::time::Duration;

use rppal::i2c::I2c;

use crate::calibration::CaliInfo;
use crate::config::ADXL345_RATE;
use crate::device::{Device, Readout};
use crate::error::{Error, SensorKind};

const ADDR: u16 = 0x53;

const REG_DEVID: u8 = 0x00;
const REG_BW_RATE: u8 = 0x2C;
const REG_POWER_CTL: u8 = 0x2D;
const REG_DATA_FORMAT: u8 = 0x31;
const REG_DATAX0: u8 = 0x32;

const DEVID: u8 = 0xE5;
const RATE_400HZ: u8 = 0x0C;
const MEASURE: u8 = 0x08;
// Full resolution, +/-16 g.
const FULL_RES_16G: u8 = 0x0B;

// 3.9 mg/LSB in full-resolution mode, expressed in m/s².
const SCALE: f32 = 0.0039 * 9.80665;
// Output register range in full-resolution +/-16 g mode.
const RAW_LIMIT: i32 = 4096;

const CUTOFF_HZ: f32 = 20.0;

pub struct Adxl345 {
    i2c: I2c,
    raw: [i16; 3],
    out: Readout<3>,
}

impl Adxl345 {
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            i2c: super::open(ADDR)?,
            raw: [0; 3],
            out: Readout::new(CUTOFF_HZ, ADXL345_RATE as f32),
        })
    }
}

impl Device for Adxl345 {
    fn kind(&self) -> SensorKind {
        SensorKind::Adxl345
    }

    fn init(&mut self) -> Result<(), Error> {
        let init_err = |e: rppal::i2c::Error| Error::SensorInit {
            which: SensorKind::Adxl345,
            reason: e.to_string(),
        };
        let id = self.i2c.smbus_read_byte(REG_DEVID).map_err(init_err)?;
        if id != DEVID {
            return Err(Error::SensorInit {
                which: SensorKind::Adxl345,
                reason: format!("unexpected device id {id:#04x}"),
            });
        }
        self.i2c
            .smbus_write_byte(REG_BW_RATE, RATE_400HZ)
            .map_err(init_err)?;
        self.i2c
            .smbus_write_byte(REG_DATA_FORMAT, FULL_RES_16G)
            .map_err(init_err)?;
        self.i2c
            .smbus_write_byte(REG_POWER_CTL, MEASURE)
            .map_err(init_err)?;
        Ok(())
    }

    fn read_raw(&mut self) -> Result<(), Error> {
        let mut buf = [0u8; 6];
        self.i2c
            .block_read(REG_DATAX0, &mut buf)
            .map_err(|_| Error::SensorRead {
                which: SensorKind::Adxl345,
            })?;
        for j in 0..3 {
            self.raw[j] = i16::from_le_bytes([buf[2 * j], buf[2 * j + 1]]);
        }
        Ok(())
    }

    fn convert(&mut self) -> Result<bool, Error> {
        let mut physical = [0.0f32; 3];
        for j in 0..3 {
            if i32::from(self.raw[j]).abs() > RAW_LIMIT {
                return Err(Error::Conversion {
                    which: SensorKind::Adxl345,
                });
            }
            physical[j] = self.raw[j] as f32 * SCALE;
        }
        self.out.cali.apply(&physical, &mut self.out.data);
        Ok(true)
    }

    fn input_filter(&mut self) {
        self.out.apply_filter();
    }

    fn period(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / ADXL345_RATE as u64)
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

    fn bias_limit(&self) -> f32 {
        // Gravity on one axis plus installation tilt.
        15.0
    }
}
