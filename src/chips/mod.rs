//! Register-level drivers for the chips on the bus.
//!
//! Each driver owns its own handle to `/dev/i2c-1`; the bus arbiter in
//! [`crate::bus`] serializes the actual transactions. Drivers verify the
//! chip identity at init and convert raw counts to SI units, leaving bias
//! correction to the calibration layer.

mod adxl345;
mod bmp085;
mod hmc5883l;
mod l3g4200d;
mod ms5611;
mod pca9685;

pub use adxl345::Adxl345;
pub use bmp085::Bmp085;
pub use hmc5883l::Hmc5883l;
pub use l3g4200d::L3g4200d;
pub use ms5611::Ms5611;
pub use pca9685::Pca9685;

use rppal::i2c::I2c;

use crate::error::Error;

/// Standard atmosphere at sea level [Pa].
pub(crate) const PRESSURE_SEA_LEVEL: f32 = 101_325.0;

/// Altitude from pressure via the international barometric formula [m].
pub(crate) fn pressure_to_altitude(pressure: f32) -> f32 {
    44_330.0 * (1.0 - (pressure / PRESSURE_SEA_LEVEL).powf(0.190295))
}

pub(crate) fn open(addr: u16) -> Result<I2c, Error> {
    let mut i2c = I2c::new().map_err(|e| Error::BusInit(e.to_string()))?;
    i2c.set_slave_address(addr)
        .map_err(|e| Error::BusInit(e.to_string()))?;
    Ok(i2c)
}

/// Kernel-managed bus clock rate [Hz]. The divider itself is a boot-time
/// kernel parameter; it can only be read back here.
pub fn bus_clock_speed() -> Result<u32, Error> {
    let i2c = I2c::new().map_err(|e| Error::BusInit(e.to_string()))?;
    i2c.clock_speed().map_err(|e| Error::BusInit(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sea_level_is_zero_altitude() {
        assert!(pressure_to_altitude(PRESSURE_SEA_LEVEL).abs() < 1e-3);
    }

    #[test]
    fn lower_pressure_is_higher_up() {
        assert!(pressure_to_altitude(90_000.0) > pressure_to_altitude(100_000.0));
    }
}
