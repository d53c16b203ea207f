//! # Converter Module
//!
//! Raw sample acquisition from the 8-channel delta-sigma converter board.
//!
//! This module handles:
//! - Mapping logical channels 1-8 onto two 4-input converters
//! - Building configuration bytes for resolution, gain and conversion mode
//! - Starting conversions and polling the status byte until they finish
//! - Decoding 12/14/16/18-bit two's-complement samples

pub mod bus;
pub mod decoder;
pub mod driver;
pub mod protocol;
pub mod simulated;

pub use bus::{open_bus, AdcBus, BusKind, I2cBus, DEFAULT_I2C_DEVICE};
pub use driver::Adc;
pub use protocol::{BitDepth, ConversionMode, Gain};
pub use simulated::SimulatedBus;

use crate::error::Result;

/// Source of raw converter samples
///
/// Implemented by [`Adc`]; channel models only talk to this trait.
#[cfg_attr(test, mockall::automock)]
pub trait RawSampler {
    /// Switch resolution and gain for the following reads
    fn configure(&mut self, bit_depth: BitDepth, gain: Gain) -> Result<()>;

    /// Run one conversion on `channel` (1-8) and return the signed sample
    fn read_raw(&mut self, channel: u8) -> Result<i32>;
}
