//! BMP085 barometric pressure sensor.
//!
//! The chip has one ADC shared between a temperature and a pressure
//! conversion; each raw read collects the finished conversion and starts the
//! other one. The device therefore reports a varying period: 4.5 ms after
//! kicking off a temperature cycle, 25.5 ms after a pressure cycle at the
//! highest oversampling.

use std::time::Duration;

use rppal::i2c::I2c;

use crate::calibration::CaliInfo;
use crate::config::{BMP085_PERIOD_LONG_NS, BMP085_PERIOD_SHORT_NS};
use crate::device::{Device, Readout};
use crate::error::{Error, SensorKind};

const ADDR: u16 = 0x77;

const REG_EEPROM: u8 = 0xAA;
const REG_CONTROL: u8 = 0xF4;
const REG_DATA: u8 = 0xF6;

const CMD_TEMPERATURE: u8 = 0x2E;
const CMD_PRESSURE: u8 = 0x34;
// Ultra-high-resolution mode.
const OSS: u8 = 3;

// The slow phase visits at 125 Hz; the IIR coefficient is derived from the
// effective alternating sample rate instead.
const CUTOFF_HZ: f32 = 2.0;
const EFFECTIVE_RATE_HZ: f32 = 33.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Temperature,
    Pressure,
}

#[derive(Debug, Default, Clone, Copy)]
struct Eeprom {
    ac1: i16,
    ac2: i16,
    ac3: i16,
    ac4: u16,
    ac5: u16,
    ac6: u16,
    b1: i16,
    b2: i16,
    mc: i16,
    md: i16,
}

pub struct Bmp085 {
    i2c: I2c,
    eeprom: Eeprom,
    /// Conversion currently running in the ADC.
    stage: Stage,
    /// Conversion read out by the last `read_raw`.
    read_out: Stage,
    period_ns: u64,
    ut: i32,
    up: i32,
    b5: i32,
    temperature: f32,
    out: Readout<3>,
}

impl Bmp085 {
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            i2c: super::open(ADDR)?,
            eeprom: Eeprom::default(),
            stage: Stage::Temperature,
            read_out: Stage::Temperature,
            period_ns: BMP085_PERIOD_SHORT_NS,
            ut: 0,
            up: 0,
            b5: 0,
            temperature: 0.0,
            out: Readout::new(CUTOFF_HZ, EFFECTIVE_RATE_HZ),
        })
    }

    fn start(&mut self, stage: Stage) -> Result<(), Error> {
        let (cmd, period_ns) = match stage {
            Stage::Temperature => (CMD_TEMPERATURE, BMP085_PERIOD_SHORT_NS),
            Stage::Pressure => (CMD_PRESSURE | (OSS << 6), BMP085_PERIOD_LONG_NS),
        };
        self.i2c
            .smbus_write_byte(REG_CONTROL, cmd)
            .map_err(|_| Error::SensorRead {
                which: SensorKind::Bmp085,
            })?;
        self.stage = stage;
        self.period_ns = period_ns;
        Ok(())
    }
}

impl Device for Bmp085 {
    fn kind(&self) -> SensorKind {
        SensorKind::Bmp085
    }

    fn init(&mut self) -> Result<(), Error> {
        let init_err = |e: rppal::i2c::Error| Error::SensorInit {
            which: SensorKind::Bmp085,
            reason: e.to_string(),
        };
        let mut buf = [0u8; 22];
        self.i2c.block_read(REG_EEPROM, &mut buf).map_err(init_err)?;
        let word = |i: usize| u16::from_be_bytes([buf[2 * i], buf[2 * i + 1]]);
        for i in 0..11 {
            // An unprogrammed EEPROM word reads all-zero or all-one.
            if word(i) == 0x0000 || word(i) == 0xFFFF {
                return Err(Error::SensorInit {
                    which: SensorKind::Bmp085,
                    reason: format!("eeprom word {i} unprogrammed"),
                });
            }
        }
        self.eeprom = Eeprom {
            ac1: word(0) as i16,
            ac2: word(1) as i16,
            ac3: word(2) as i16,
            ac4: word(3),
            ac5: word(4),
            ac6: word(5),
            b1: word(6) as i16,
            b2: word(7) as i16,
            mc: word(9) as i16,
            md: word(10) as i16,
        };
        self.start(Stage::Temperature)
    }

    fn read_raw(&mut self) -> Result<(), Error> {
        let read_err = |_| Error::SensorRead {
            which: SensorKind::Bmp085,
        };
        match self.stage {
            Stage::Temperature => {
                let mut buf = [0u8; 2];
                self.i2c.block_read(REG_DATA, &mut buf).map_err(read_err)?;
                self.ut = i32::from(u16::from_be_bytes(buf));
                self.read_out = Stage::Temperature;
                self.start(Stage::Pressure)
            }
            Stage::Pressure => {
                let mut buf = [0u8; 3];
                self.i2c.block_read(REG_DATA, &mut buf).map_err(read_err)?;
                let up = (u32::from(buf[0]) << 16 | u32::from(buf[1]) << 8 | u32::from(buf[2]))
                    >> (8 - OSS);
                self.up = up as i32;
                self.read_out = Stage::Pressure;
                self.start(Stage::Temperature)
            }
        }
    }

    fn convert(&mut self) -> Result<bool, Error> {
        let e = self.eeprom;
        match self.read_out {
            Stage::Temperature => {
                let x1 = ((self.ut - i32::from(e.ac6)) * i32::from(e.ac5)) >> 15;
                if x1 + i32::from(e.md) == 0 {
                    return Err(Error::Conversion {
                        which: SensorKind::Bmp085,
                    });
                }
                let x2 = (i32::from(e.mc) << 11) / (x1 + i32::from(e.md));
                self.b5 = x1 + x2;
                self.temperature = ((self.b5 + 8) >> 4) as f32 / 10.0;
                Ok(false)
            }
            Stage::Pressure => {
                let b6 = self.b5 - 4000;
                let x1 = (i32::from(e.b2) * ((b6 * b6) >> 12)) >> 11;
                let x2 = (i32::from(e.ac2) * b6) >> 11;
                let x3 = x1 + x2;
                let b3 = (((i32::from(e.ac1) * 4 + x3) << OSS) + 2) / 4;
                let x1 = (i32::from(e.ac3) * b6) >> 13;
                let x2 = (i32::from(e.b1) * ((b6 * b6) >> 12)) >> 16;
                let x3 = ((x1 + x2) + 2) >> 2;
                let b4 = (u32::from(e.ac4) * ((x3 + 32768) as u32)) >> 15;
                if b4 == 0 {
                    return Err(Error::Conversion {
                        which: SensorKind::Bmp085,
                    });
                }
                let b7 = ((self.up - b3) as u32).wrapping_mul(50_000 >> OSS);
                let p = if b7 < 0x8000_0000 {
                    ((b7 * 2) / b4) as i32
                } else {
                    ((b7 / b4) * 2) as i32
                };
                let x1 = (p >> 8) * (p >> 8);
                let x1 = (x1 * 3038) >> 16;
                let x2 = (-7357 * p) >> 16;
                let pressure = (p + ((x1 + x2 + 3791) >> 4)) as f32;

                let altitude = super::pressure_to_altitude(pressure);
                self.out.data[0] = self.out.cali.apply_one(0, altitude);
                self.out.data[1] = self.temperature;
                self.out.data[2] = pressure;
                Ok(true)
            }
        }
    }

    fn input_filter(&mut self) {
        self.out.apply_filter();
    }

    fn period(&self) -> Duration {
        Duration::from_nanos(self.period_ns)
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
}
