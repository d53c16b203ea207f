//! Trait abstraction for the register-addressed bus to enable testing

use embedded_hal::i2c::{Error as _, I2c};
use serde::Deserialize;
use tracing::{info, warn};

use super::simulated::SimulatedBus;
use crate::error::{MeterError, Result};

/// Bus device used when none is configured
pub const DEFAULT_I2C_DEVICE: &str = "/dev/i2c-1";

/// Which bus the converters are reached through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusKind {
    /// Linux I2C character device
    #[default]
    I2c,
    /// In-memory converters, no hardware needed
    Simulated,
}

/// Byte-level access to the converters
#[cfg_attr(test, mockall::automock)]
pub trait AdcBus: Send {
    /// Write a single configuration byte to the device at `address`
    fn write_register(&mut self, address: u8, byte: u8) -> Result<()>;

    /// Send `command` to the device at `address`, then read `buf.len()` bytes back
    fn read_block(&mut self, address: u8, command: u8, buf: &mut [u8]) -> Result<()>;
}

impl<B: AdcBus + ?Sized> AdcBus for Box<B> {
    fn write_register(&mut self, address: u8, byte: u8) -> Result<()> {
        (**self).write_register(address, byte)
    }

    fn read_block(&mut self, address: u8, command: u8, buf: &mut [u8]) -> Result<()> {
        (**self).read_block(address, command, buf)
    }
}

/// Open the bus selected by `kind`
///
/// Falls back to [`SimulatedBus`] when the I2C device cannot be opened, so
/// the meter keeps running on machines without the converter board.
pub fn open_bus(kind: BusKind, device: &str) -> Box<dyn AdcBus> {
    match kind {
        BusKind::Simulated => {
            warn!("Running in simulation mode without real hardware access");
            Box::new(SimulatedBus::new())
        }
        BusKind::I2c => match open_i2c(device) {
            Ok(bus) => {
                info!("Opened I2C bus {}", device);
                bus
            }
            Err(e) => {
                warn!("{}. Falling back to simulated converters", e);
                Box::new(SimulatedBus::new())
            }
        },
    }
}

#[cfg(target_os = "linux")]
fn open_i2c(device: &str) -> Result<Box<dyn AdcBus>> {
    let i2c = linux_embedded_hal::I2cdev::new(device)
        .map_err(|e| MeterError::Bus(format!("Failed to open {}: {}", device, e)))?;
    Ok(Box::new(I2cBus::new(i2c)))
}

#[cfg(not(target_os = "linux"))]
fn open_i2c(device: &str) -> Result<Box<dyn AdcBus>> {
    Err(MeterError::Bus(format!("Failed to open {}: I2C needs Linux", device)))
}

/// Wrapper around any `embedded_hal` I2C bus that implements [`AdcBus`]
pub struct I2cBus<I> {
    i2c: I,
}

impl<I: I2c> I2cBus<I> {
    pub fn new(i2c: I) -> Self {
        Self { i2c }
    }

    /// Release the underlying bus
    pub fn into_inner(self) -> I {
        self.i2c
    }
}

impl<I> AdcBus for I2cBus<I>
where
    I: I2c + Send,
{
    fn write_register(&mut self, address: u8, byte: u8) -> Result<()> {
        self.i2c.write(address, &[byte]).map_err(|e| {
            MeterError::Bus(format!("Failed to write 0x{:02X}: {:?}", address, e.kind()))
        })
    }

    fn read_block(&mut self, address: u8, command: u8, buf: &mut [u8]) -> Result<()> {
        self.i2c.write_read(address, &[command], buf).map_err(|e| {
            MeterError::Bus(format!("Failed to read 0x{:02X}: {:?}", address, e.kind()))
        })
    }
}
