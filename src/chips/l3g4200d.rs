//! L3G4200D three-axis gyroscope.

use std::time::Duration;

use rppal::i2c::I2c;

use crate::calibration::CaliInfo;
use crate::config::L3G4200D_RATE;
use crate::device::{Device, Readout};
use crate::error::{Error, SensorKind};

const ADDR: u16 = 0x69;

const REG_WHO_AM_I: u8 = 0x0F;
const REG_CTRL1: u8 = 0x20;
const REG_CTRL4: u8 = 0x23;
const REG_OUT_X_L: u8 = 0x28;
// Set on the register address to auto-increment through all six bytes.
const AUTO_INCREMENT: u8 = 0x80;

const WHO_AM_I: u8 = 0xD3;
// ODR 400 Hz, 50 Hz bandwidth, normal mode, all axes on.
const CTRL1_400HZ_ALL_AXES: u8 = 0x9F;
// +/-2000 dps full scale.
const CTRL4_2000DPS: u8 = 0x30;

// 70 mdps/LSB at 2000 dps.
const SCALE: f32 = 0.07;

const CUTOFF_HZ: f32 = 50.0;

pub struct L3g4200d {
    i2c: I2c,
    raw: [i16; 3],
    out: Readout<3>,
}

impl L3g4200d {
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            i2c: super::open(ADDR)?,
            raw: [0; 3],
            out: Readout::new(CUTOFF_HZ, L3G4200D_RATE as f32),
        })
    }
}

impl Device for L3g4200d {
    fn kind(&self) -> SensorKind {
        SensorKind::L3g4200d
    }

    fn init(&mut self) -> Result<(), Error> {
        let init_err = |e: rppal::i2c::Error| Error::SensorInit {
            which: SensorKind::L3g4200d,
            reason: e.to_string(),
        };
        let id = self.i2c.smbus_read_byte(REG_WHO_AM_I).map_err(init_err)?;
        if id != WHO_AM_I {
            return Err(Error::SensorInit {
                which: SensorKind::L3g4200d,
                reason: format!("unexpected who-am-i {id:#04x}"),
            });
        }
        self.i2c
            .smbus_write_byte(REG_CTRL1, CTRL1_400HZ_ALL_AXES)
            .map_err(init_err)?;
        self.i2c
            .smbus_write_byte(REG_CTRL4, CTRL4_2000DPS)
            .map_err(init_err)?;
        Ok(())
    }

    fn read_raw(&mut self) -> Result<(), Error> {
        let mut buf = [0u8; 6];
        self.i2c
            .block_read(REG_OUT_X_L | AUTO_INCREMENT, &mut buf)
            .map_err(|_| Error::SensorRead {
                which: SensorKind::L3g4200d,
            })?;
        for j in 0..3 {
            self.raw[j] = i16::from_le_bytes([buf[2 * j], buf[2 * j + 1]]);
        }
        Ok(())
    }

    fn convert(&mut self) -> Result<bool, Error> {
        let mut physical = [0.0f32; 3];
        for j in 0..3 {
            physical[j] = self.raw[j] as f32 * SCALE;
        }
        self.out.cali.apply(&physical, &mut self.out.data);
        Ok(true)
    }

    fn input_filter(&mut self) {
        self.out.apply_filter();
    }

    fn period(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / L3G4200D_RATE as u64)
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
        // A stationary gyro drifts, it does not spin.
        10.0
    }
}
