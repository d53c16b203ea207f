//! # Converter Protocol Constants and Types
//!
//! Configuration-byte layout and conversion settings for the MCP342x-style
//! delta-sigma converters behind the 8-channel board. Each board carries two
//! 4-input converters on the same bus.

use serde::Deserialize;
use std::time::Duration;

use crate::error::{MeterError, Result};

/// Lowest address the converter can be strapped to
pub const ADC_ADDRESS_MIN: u8 = 0x68;

/// Highest address the converter can be strapped to
pub const ADC_ADDRESS_MAX: u8 = 0x6F;

/// Default address of the converter serving channels 1-4
pub const DEFAULT_ADC_A_ADDRESS: u8 = 0x68;

/// Default address of the converter serving channels 5-8
pub const DEFAULT_ADC_B_ADDRESS: u8 = 0x69;

/// Number of multiplexer inputs per converter
pub const INPUTS_PER_DEVICE: u8 = 4;

/// Highest logical channel number on the board
pub const CHANNEL_COUNT: u8 = 8;

/// Ready / start-conversion flag (bit 7)
///
/// Written as 1 in one-shot mode to start a conversion. Read back as 0 once
/// the result register holds a fresh conversion.
pub const CONFIG_READY_BIT: u8 = 0x80;

/// Multiplexer input selection (bits 6-5)
pub const CONFIG_CHANNEL_MASK: u8 = 0x60;

/// Shift of the multiplexer input selection
pub const CONFIG_CHANNEL_SHIFT: u8 = 5;

/// Conversion mode (bit 4)
pub const CONFIG_MODE_MASK: u8 = 0x10;

/// Sample rate / resolution selection (bits 3-2)
pub const CONFIG_RATE_MASK: u8 = 0x0C;

/// Programmable gain selection (bits 1-0)
pub const CONFIG_GAIN_MASK: u8 = 0x03;

/// Multiplier applied to the nominal conversion time to get the poll timeout
pub const CONVERSION_TIMEOUT_FACTOR: f64 = 100.0;

/// Pause between two status polls
pub const POLL_INTERVAL: Duration = Duration::from_micros(10);

/// Resolution of a single conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "u8")]
pub enum BitDepth {
    Bits12,
    Bits14,
    Bits16,
    Bits18,
}

impl BitDepth {
    /// All supported resolutions, lowest first
    pub const ALL: [BitDepth; 4] = [
        BitDepth::Bits12,
        BitDepth::Bits14,
        BitDepth::Bits16,
        BitDepth::Bits18,
    ];

    /// Number of significant bits in a sample
    pub fn bits(self) -> u32 {
        match self {
            BitDepth::Bits12 => 12,
            BitDepth::Bits14 => 14,
            BitDepth::Bits16 => 16,
            BitDepth::Bits18 => 18,
        }
    }

    /// Number of payload bytes the converter returns for one sample
    pub fn payload_len(self) -> usize {
        self.bits().div_ceil(8) as usize
    }

    /// Rate selection bits of the configuration byte
    pub fn config_bits(self) -> u8 {
        match self {
            BitDepth::Bits12 => 0x00,
            BitDepth::Bits14 => 0x04,
            BitDepth::Bits16 => 0x08,
            BitDepth::Bits18 => 0x0C,
        }
    }

    /// Nominal conversion time (240, 60, 15 and 3.75 samples per second)
    pub fn seconds_per_sample(self) -> f64 {
        match self {
            BitDepth::Bits12 => 0.004_16,
            BitDepth::Bits14 => 0.016_66,
            BitDepth::Bits16 => 0.066_66,
            BitDepth::Bits18 => 0.266_66,
        }
    }

    /// Longest time to wait for a conversion before giving up
    pub fn conversion_timeout(self) -> Duration {
        Duration::from_secs_f64(self.seconds_per_sample() * CONVERSION_TIMEOUT_FACTOR)
    }
}

impl TryFrom<u8> for BitDepth {
    type Error = MeterError;

    fn try_from(bits: u8) -> Result<Self> {
        match bits {
            12 => Ok(BitDepth::Bits12),
            14 => Ok(BitDepth::Bits14),
            16 => Ok(BitDepth::Bits16),
            18 => Ok(BitDepth::Bits18),
            other => Err(MeterError::Config(format!(
                "invalid bit depth {}: must be one of 12, 14, 16, 18",
                other
            ))),
        }
    }
}

/// Programmable gain amplifier setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "u8")]
pub enum Gain {
    X1,
    X2,
    X4,
    X8,
}

impl Gain {
    /// Amplification factor
    pub fn factor(self) -> u8 {
        match self {
            Gain::X1 => 1,
            Gain::X2 => 2,
            Gain::X4 => 4,
            Gain::X8 => 8,
        }
    }

    /// Gain selection bits of the configuration byte
    pub fn config_bits(self) -> u8 {
        match self {
            Gain::X1 => 0x00,
            Gain::X2 => 0x01,
            Gain::X4 => 0x02,
            Gain::X8 => 0x03,
        }
    }
}

impl Default for Gain {
    fn default() -> Self {
        Gain::X1
    }
}

impl TryFrom<u8> for Gain {
    type Error = MeterError;

    fn try_from(factor: u8) -> Result<Self> {
        match factor {
            1 => Ok(Gain::X1),
            2 => Ok(Gain::X2),
            4 => Ok(Gain::X4),
            8 => Ok(Gain::X8),
            other => Err(MeterError::Config(format!(
                "invalid gain {}: must be one of 1, 2, 4, 8",
                other
            ))),
        }
    }
}

/// How the converter starts conversions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionMode {
    /// One conversion per start flag written
    #[default]
    OneShot,
    /// Free running conversions
    Continuous,
}

impl ConversionMode {
    /// Mode bit of the configuration byte
    pub fn config_bits(self) -> u8 {
        match self {
            ConversionMode::OneShot => 0x00,
            ConversionMode::Continuous => 0x10,
        }
    }
}

/// One of the two converters on the board
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    /// Serves channels 1-4
    A,
    /// Serves channels 5-8
    B,
}

/// Map a logical channel (1-8) to its converter and multiplexer input
///
/// # Errors
///
/// Returns a configuration error for channels outside 1-8
pub fn locate_channel(channel: u8) -> Result<(Device, u8)> {
    if channel == 0 || channel > CHANNEL_COUNT {
        return Err(MeterError::Config(format!(
            "channel {} is out of range (must be 1-{})",
            channel, CHANNEL_COUNT
        )));
    }

    let device = if channel <= INPUTS_PER_DEVICE { Device::A } else { Device::B };
    let input = (channel - 1) % INPUTS_PER_DEVICE;
    Ok((device, input))
}

/// Assemble a configuration byte (ready flag cleared)
pub fn config_byte(input: u8, mode: ConversionMode, bit_depth: BitDepth, gain: Gain) -> u8 {
    ((input << CONFIG_CHANNEL_SHIFT) & CONFIG_CHANNEL_MASK)
        | mode.config_bits()
        | bit_depth.config_bits()
        | gain.config_bits()
}

/// Check that a converter address lies within the strappable range
///
/// # Errors
///
/// Returns a configuration error for addresses outside 0x68-0x6F
pub fn validate_address(address: u8) -> Result<u8> {
    if (ADC_ADDRESS_MIN..=ADC_ADDRESS_MAX).contains(&address) {
        Ok(address)
    } else {
        Err(MeterError::Config(format!(
            "address 0x{:02X} out of range 0x{:02X} to 0x{:02X}",
            address, ADC_ADDRESS_MIN, ADC_ADDRESS_MAX
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_depth_from_u8() {
        assert_eq!(BitDepth::try_from(12).unwrap(), BitDepth::Bits12);
        assert_eq!(BitDepth::try_from(18).unwrap(), BitDepth::Bits18);
        assert!(BitDepth::try_from(10).is_err());
        assert!(BitDepth::try_from(24).is_err());
    }

    #[test]
    fn test_payload_len() {
        assert_eq!(BitDepth::Bits12.payload_len(), 2);
        assert_eq!(BitDepth::Bits14.payload_len(), 2);
        assert_eq!(BitDepth::Bits16.payload_len(), 2);
        assert_eq!(BitDepth::Bits18.payload_len(), 3);
    }

    #[test]
    fn test_conversion_timeout_scales_with_depth() {
        let t12 = BitDepth::Bits12.conversion_timeout();
        let t18 = BitDepth::Bits18.conversion_timeout();
        assert!(t12 < t18);
        // 18 bit conversions may take up to ~27 seconds before we give up
        assert!((t18.as_secs_f64() - 26.666).abs() < 0.01);
    }

    #[test]
    fn test_gain_from_u8() {
        assert_eq!(Gain::try_from(1).unwrap(), Gain::X1);
        assert_eq!(Gain::try_from(8).unwrap(), Gain::X8);
        assert!(Gain::try_from(3).is_err());
        assert_eq!(Gain::X4.factor(), 4);
    }

    #[test]
    fn test_locate_channel() {
        assert_eq!(locate_channel(1).unwrap(), (Device::A, 0));
        assert_eq!(locate_channel(4).unwrap(), (Device::A, 3));
        assert_eq!(locate_channel(5).unwrap(), (Device::B, 0));
        assert_eq!(locate_channel(8).unwrap(), (Device::B, 3));
        assert!(locate_channel(0).is_err());
        assert!(locate_channel(9).is_err());
    }

    #[test]
    fn test_config_byte_layout() {
        // input 2, continuous, 18 bit, gain 8
        let byte = config_byte(2, ConversionMode::Continuous, BitDepth::Bits18, Gain::X8);
        assert_eq!(byte, 0b0101_1111);
        assert_eq!(byte & CONFIG_READY_BIT, 0);

        let byte = config_byte(0, ConversionMode::OneShot, BitDepth::Bits12, Gain::X1);
        assert_eq!(byte, 0x00);
    }

    #[test]
    fn test_validate_address() {
        assert!(validate_address(0x68).is_ok());
        assert!(validate_address(0x6F).is_ok());
        assert!(validate_address(0x67).is_err());
        assert!(validate_address(0x70).is_err());
    }
}
