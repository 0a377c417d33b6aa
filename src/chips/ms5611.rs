//! MS5611 high-resolution barometric pressure sensor.
//!
//! Same shared-ADC shape as the BMP085 but with a fixed conversion period:
//! every raw read collects the finished D1/D2 conversion and starts the
//! other one.

use std::time::Duration;

use rppal::i2c::I2c;

use crate::calibration::CaliInfo;
use crate::config::MS5611_PERIOD_NS;
use crate::device::{Device, Readout};
use crate::error::{Error, SensorKind};

const ADDR: u16 = 0x76;

const CMD_RESET: u8 = 0x1E;
const CMD_ADC_READ: u8 = 0x00;
// OSR 4096 conversions (~9 ms).
const CMD_CONVERT_D1: u8 = 0x48;
const CMD_CONVERT_D2: u8 = 0x58;
const REG_PROM: u8 = 0xA2;

const CUTOFF_HZ: f32 = 2.0;
const EFFECTIVE_RATE_HZ: f32 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// D1, raw pressure.
    Pressure,
    /// D2, raw temperature.
    Temperature,
}

pub struct Ms5611 {
    i2c: I2c,
    prom: [u16; 6],
    stage: Stage,
    read_out: Stage,
    d1: u32,
    d2: u32,
    out: Readout<3>,
}

impl Ms5611 {
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            i2c: super::open(ADDR)?,
            prom: [0; 6],
            stage: Stage::Temperature,
            read_out: Stage::Temperature,
            d1: 0,
            d2: 0,
            out: Readout::new(CUTOFF_HZ, EFFECTIVE_RATE_HZ),
        })
    }

    fn start(&mut self, stage: Stage) -> Result<(), Error> {
        let cmd = match stage {
            Stage::Pressure => CMD_CONVERT_D1,
            Stage::Temperature => CMD_CONVERT_D2,
        };
        self.i2c.smbus_send_byte(cmd).map_err(|_| Error::SensorRead {
            which: SensorKind::Ms5611,
        })?;
        self.stage = stage;
        Ok(())
    }
}

impl Device for Ms5611 {
    fn kind(&self) -> SensorKind {
        SensorKind::Ms5611
    }

    fn init(&mut self) -> Result<(), Error> {
        let init_err = |e: rppal::i2c::Error| Error::SensorInit {
            which: SensorKind::Ms5611,
            reason: e.to_string(),
        };
        self.i2c.smbus_send_byte(CMD_RESET).map_err(init_err)?;
        std::thread::sleep(Duration::from_millis(3));
        for (i, coeff) in self.prom.iter_mut().enumerate() {
            let mut buf = [0u8; 2];
            self.i2c
                .block_read(REG_PROM + 2 * i as u8, &mut buf)
                .map_err(init_err)?;
            *coeff = u16::from_be_bytes(buf);
        }
        if self.prom.iter().all(|&c| c == 0) {
            return Err(Error::SensorInit {
                which: SensorKind::Ms5611,
                reason: "prom reads all-zero".into(),
            });
        }
        self.start(Stage::Temperature)
    }

    fn read_raw(&mut self) -> Result<(), Error> {
        let mut buf = [0u8; 3];
        self.i2c
            .block_read(CMD_ADC_READ, &mut buf)
            .map_err(|_| Error::SensorRead {
                which: SensorKind::Ms5611,
            })?;
        let value = u32::from(buf[0]) << 16 | u32::from(buf[1]) << 8 | u32::from(buf[2]);
        if value == 0 {
            // Read while still converting; the conversion is lost, restart.
            let stage = self.stage;
            self.start(stage)?;
            return Err(Error::SensorRead {
                which: SensorKind::Ms5611,
            });
        }
        match self.stage {
            Stage::Temperature => {
                self.d2 = value;
                self.read_out = Stage::Temperature;
                self.start(Stage::Pressure)
            }
            Stage::Pressure => {
                self.d1 = value;
                self.read_out = Stage::Pressure;
                self.start(Stage::Temperature)
            }
        }
    }

    fn convert(&mut self) -> Result<bool, Error> {
        if self.read_out == Stage::Temperature {
            return Ok(false);
        }
        let c = self.prom.map(i64::from);
        let dt = i64::from(self.d2) - (c[4] << 8);
        let temp = 2000 + ((dt * c[5]) >> 23);
        let off = (c[1] << 16) + ((c[3] * dt) >> 7);
        let sens = (c[0] << 15) + ((c[2] * dt) >> 8);
        let p = ((((i64::from(self.d1) * sens) >> 21) - off) >> 15) as f32;

        let altitude = super::pressure_to_altitude(p);
        self.out.data[0] = self.out.cali.apply_one(0, altitude);
        self.out.data[1] = temp as f32 / 100.0;
        self.out.data[2] = p;
        Ok(true)
    }

    fn input_filter(&mut self) {
        self.out.apply_filter();
    }

    fn period(&self) -> Duration {
        Duration::from_nanos(MS5611_PERIOD_NS)
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
