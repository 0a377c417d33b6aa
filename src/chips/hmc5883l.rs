//! HMC5883L three-axis magnetometer.

use std::time::Duration;

use rppal::i2c::I2c;

use crate::calibration::CaliInfo;
use crate::config::HMC5883L_RATE;
use crate::device::{Device, Readout};
use crate::error::{Error, SensorKind};

const ADDR: u16 = 0x1E;

const REG_CONFIG_A: u8 = 0x00;
const REG_CONFIG_B: u8 = 0x01;
const REG_MODE: u8 = 0x02;
const REG_DATA: u8 = 0x03;
const REG_ID_A: u8 = 0x0A;

// 8-sample averaging, 75 Hz output.
const CONFIG_A_75HZ: u8 = 0x78;
// Gain 1090 LSB/gauss.
const CONFIG_B_GAIN_1090: u8 = 0x20;
const MODE_CONTINUOUS: u8 = 0x00;

const ID: [u8; 3] = *b"H43";

// LSB to microtesla at gain 1090 (1 gauss = 100 µT).
const SCALE: f32 = 100.0 / 1090.0;
// The chip latches this value on ADC overflow.
const OVERFLOW: i16 = -4096;

const CUTOFF_HZ: f32 = 10.0;

pub struct Hmc5883l {
    i2c: I2c,
    raw: [i16; 3],
    out: Readout<3>,
}

impl Hmc5883l {
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            i2c: super::open(ADDR)?,
            raw: [0; 3],
            out: Readout::new(CUTOFF_HZ, HMC5883L_RATE as f32),
        })
    }
}

impl Device for Hmc5883l {
    fn kind(&self) -> SensorKind {
        SensorKind::Hmc5883l
    }

    fn init(&mut self) -> Result<(), Error> {
        let init_err = |e: rppal::i2c::Error| Error::SensorInit {
            which: SensorKind::Hmc5883l,
            reason: e.to_string(),
        };
        let mut id = [0u8; 3];
        self.i2c.block_read(REG_ID_A, &mut id).map_err(init_err)?;
        if id != ID {
            return Err(Error::SensorInit {
                which: SensorKind::Hmc5883l,
                reason: format!("unexpected identification {id:02x?}"),
            });
        }
        self.i2c
            .smbus_write_byte(REG_CONFIG_A, CONFIG_A_75HZ)
            .map_err(init_err)?;
        self.i2c
            .smbus_write_byte(REG_CONFIG_B, CONFIG_B_GAIN_1090)
            .map_err(init_err)?;
        self.i2c
            .smbus_write_byte(REG_MODE, MODE_CONTINUOUS)
            .map_err(init_err)?;
        Ok(())
    }

    fn read_raw(&mut self) -> Result<(), Error> {
        let mut buf = [0u8; 6];
        self.i2c
            .block_read(REG_DATA, &mut buf)
            .map_err(|_| Error::SensorRead {
                which: SensorKind::Hmc5883l,
            })?;
        // Register order is X, Z, Y, big-endian.
        self.raw[0] = i16::from_be_bytes([buf[0], buf[1]]);
        self.raw[2] = i16::from_be_bytes([buf[2], buf[3]]);
        self.raw[1] = i16::from_be_bytes([buf[4], buf[5]]);
        Ok(())
    }

    fn convert(&mut self) -> Result<bool, Error> {
        let mut physical = [0.0f32; 3];
        for j in 0..3 {
            if self.raw[j] == OVERFLOW {
                return Err(Error::Conversion {
                    which: SensorKind::Hmc5883l,
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
        Duration::from_nanos(1_000_000_000 / HMC5883L_RATE as u64)
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
        // Earth field is ~65 µT; anything beyond this is hard-iron trouble.
        120.0
    }
}
