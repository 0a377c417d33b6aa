//! Bounded-value actuator commands with a rate limit.
//!
//! The four ESCs hang off one PWM generator on the same I²C bus as the
//! sensors, so every write goes through the bus arbiter. The contract layer
//! enforces the setpoint bounds and the minimum inter-write interval; the
//! register-level generator behind [`EscBus`] stays swappable (real chip or
//! test stub).

use log::info;

use crate::bus::Bus;
use crate::clock::Clock;
use crate::config::{MS5611_PERIOD_NS, PWM_MAX, PWM_MIN};
use crate::device::Freshness;
use crate::error::Error;

/// Register-level PWM generator.
pub trait EscBus: Send {
    fn init(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// Push four channel setpoints in one bus transaction.
    fn write_channels(&mut self, power: &[u32; 4]) -> Result<(), Error>;

    fn end(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

pub struct PwmOutput {
    esc: Box<dyn EscBus>,
    min_interval_ns: u64,
    last_write_ns: Option<u64>,
    armed: bool,
}

impl PwmOutput {
    pub fn new(esc: Box<dyn EscBus>) -> Self {
        Self {
            esc,
            min_interval_ns: MS5611_PERIOD_NS,
            last_write_ns: None,
            armed: false,
        }
    }

    /// Override the minimum inter-write interval (test harnesses).
    pub fn with_min_interval(mut self, ns: u64) -> Self {
        self.min_interval_ns = ns;
        self
    }

    pub fn init(&mut self, bus: &Bus) -> Result<(), Error> {
        let _guard = bus.enter();
        self.esc.init()
    }

    pub fn end(&mut self, bus: &Bus) -> Result<(), Error> {
        let _guard = bus.enter();
        self.esc.end()
    }

    fn check_range(power: &[u32; 4]) -> Result<(), Error> {
        for (channel, &value) in power.iter().enumerate() {
            if !(PWM_MIN..=PWM_MAX).contains(&value) {
                return Err(Error::PwmOutOfRange { channel, value });
            }
        }
        Ok(())
    }

    /// Rate-limited setpoint write. Returns `NotDue` without touching the
    /// bus when called before the inter-write interval has elapsed.
    pub fn write(&mut self, power: &[u32; 4], bus: &Bus, now_ns: u64) -> Result<Freshness, Error> {
        Self::check_range(power)?;
        if let Some(last) = self.last_write_ns {
            if now_ns.saturating_sub(last) < self.min_interval_ns {
                return Ok(Freshness::NotDue);
            }
        }
        {
            let _guard = bus.enter();
            self.esc.write_channels(power)?;
        }
        self.last_write_ns = Some(now_ns);
        Ok(Freshness::Fresh)
    }

    /// Unconditioned write: no rate limit, still bounds-checked. Used for
    /// arming and for parking the motors on shutdown.
    pub fn write_only(&mut self, power: &[u32; 4], bus: &Bus) -> Result<(), Error> {
        Self::check_range(power)?;
        let _guard = bus.enter();
        self.esc.write_channels(power)
    }

    /// ESC arming handshake, run exactly once on the transition to flight:
    /// MIN, wait 40 ms; MAX, wait 70 ms; MIN, wait 50 ms.
    pub fn arm(&mut self, bus: &Bus, clock: &dyn Clock) -> Result<(), Error> {
        if self.armed {
            return Ok(());
        }
        info!("arming escs");
        self.write_only(&[PWM_MIN; 4], bus)?;
        clock.sleep_ns(40_000_000);
        self.write_only(&[PWM_MAX; 4], bus)?;
        clock.sleep_ns(70_000_000);
        self.write_only(&[PWM_MIN; 4], bus)?;
        clock.sleep_ns(50_000_000);
        self.armed = true;
        Ok(())
    }
}
