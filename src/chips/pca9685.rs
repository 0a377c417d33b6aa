//! PCA9685PW sixteen-channel PWM generator; channels 0-3 drive the ESCs.

use rppal::i2c::I2c;

use crate::error::{Error, SensorKind};
use crate::pwm::EscBus;

const ADDR: u16 = 0x40;

const REG_MODE1: u8 = 0x00;
const REG_LED0_ON_L: u8 = 0x06;
const REG_PRESCALE: u8 = 0xFE;

const MODE1_SLEEP: u8 = 0x10;
const MODE1_AUTO_INCREMENT: u8 = 0x20;
const MODE1_RESTART: u8 = 0x80;

// 25 MHz / (4096 * 400 Hz) - 1, rounded.
const PRESCALE_400HZ: u8 = 14;

const COUNTER_MAX: u32 = 4095;

pub struct Pca9685 {
    i2c: I2c,
}

impl Pca9685 {
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            i2c: super::open(ADDR)?,
        })
    }
}

impl EscBus for Pca9685 {
    fn init(&mut self) -> Result<(), Error> {
        let init_err = |e: rppal::i2c::Error| Error::SensorInit {
            which: SensorKind::Pca9685pw,
            reason: e.to_string(),
        };
        // The prescaler can only be set while the oscillator sleeps.
        self.i2c
            .smbus_write_byte(REG_MODE1, MODE1_SLEEP)
            .map_err(init_err)?;
        self.i2c
            .smbus_write_byte(REG_PRESCALE, PRESCALE_400HZ)
            .map_err(init_err)?;
        self.i2c
            .smbus_write_byte(REG_MODE1, MODE1_AUTO_INCREMENT)
            .map_err(init_err)?;
        // Oscillator start-up time per datasheet.
        std::thread::sleep(std::time::Duration::from_micros(500));
        self.i2c
            .smbus_write_byte(REG_MODE1, MODE1_RESTART | MODE1_AUTO_INCREMENT)
            .map_err(init_err)?;
        Ok(())
    }

    fn write_channels(&mut self, power: &[u32; 4]) -> Result<(), Error> {
        let mut buf = [0u8; 16];
        for (ch, &p) in power.iter().enumerate() {
            let off = p.min(COUNTER_MAX) as u16;
            buf[4 * ch] = 0;
            buf[4 * ch + 1] = 0;
            buf[4 * ch + 2] = (off & 0xFF) as u8;
            buf[4 * ch + 3] = (off >> 8) as u8;
        }
        self.i2c
            .block_write(REG_LED0_ON_L, &buf)
            .map_err(|_| Error::SensorRead {
                which: SensorKind::Pca9685pw,
            })
    }

    fn end(&mut self) -> Result<(), Error> {
        // Kill the outputs before letting go of the chip.
        let zeros = [0u8; 16];
        self.i2c
            .block_write(REG_LED0_ON_L, &zeros)
            .and_then(|_| self.i2c.smbus_write_byte(REG_MODE1, MODE1_SLEEP))
            .map_err(|e| Error::SensorInit {
                which: SensorKind::Pca9685pw,
                reason: e.to_string(),
            })
    }
}
