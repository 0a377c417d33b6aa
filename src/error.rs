use thiserror::Error;

/// The six chips on the bus, in probe order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    Adxl345,
    L3g4200d,
    Hmc5883l,
    Bmp085,
    Ms5611,
    Pca9685pw,
}

impl SensorKind {
    pub fn name(self) -> &'static str {
        match self {
            SensorKind::Adxl345 => "ADXL345",
            SensorKind::L3g4200d => "L3G4200D",
            SensorKind::Hmc5883l => "HMC5883L",
            SensorKind::Bmp085 => "BMP085",
            SensorKind::Ms5611 => "MS5611",
            SensorKind::Pca9685pw => "PCA9685PW",
        }
    }

    /// Shell exit code when this sensor fails to initialize.
    pub fn exit_code(self) -> i32 {
        match self {
            SensorKind::Adxl345 => -1,
            SensorKind::L3g4200d => -2,
            SensorKind::Hmc5883l => -3,
            SensorKind::Bmp085 => -4,
            SensorKind::Ms5611 => -5,
            SensorKind::Pca9685pw => -6,
        }
    }
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// The I²C bus itself could not be brought up. Fatal.
    #[error("i2c bus bring-up failed: {0}")]
    BusInit(String),

    /// WHOAMI mismatch or a rejected configuration write. Fatal.
    #[error("{which} initialization failed: {reason}")]
    SensorInit { which: SensorKind, reason: String },

    /// A single raw read timed out or returned an invalid status.
    /// Transient; retried by the caller.
    #[error("{which} read failed")]
    SensorRead { which: SensorKind },

    /// The raw value is outside the device's datasheet range.
    #[error("{which} raw value out of datasheet range")]
    Conversion { which: SensorKind },

    /// A calibration worker exhausted its retry budget or overran its
    /// deadline.
    #[error("{which} calibration aborted after {failures} consecutive failures")]
    CalibrationAborted { which: SensorKind, failures: u32 },

    /// Caller handed the PWM driver a setpoint outside [PWM_MIN, PWM_MAX].
    /// Indicates an estimator bug; fatal.
    #[error("pwm channel {channel} setpoint {value} outside permitted range")]
    PwmOutOfRange { channel: usize, value: u32 },

    /// The append-only calibration log could not be written.
    #[error("calibration log i/o failed: {0}")]
    CaliLog(#[from] std::io::Error),
}

impl Error {
    /// Exit code the outer shell reports for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::SensorInit { which, .. } => which.exit_code(),
            _ => 1,
        }
    }

    /// Transient errors are retried locally instead of being propagated.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::SensorRead { .. } | Error::Conversion { .. })
    }
}
