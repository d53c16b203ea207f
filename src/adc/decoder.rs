//! # Sample Decoder
//!
//! Turns the big-endian payload bytes of a conversion into a signed sample.

use super::protocol::BitDepth;
use crate::error::{MeterError, Result};

/// Decode a two's-complement sample of `bit_depth` bits
///
/// The converter left-pads the most significant payload byte with copies of
/// the sign bit; only the low `bits % 8` bits of that byte are significant
/// unless the depth is byte aligned.
///
/// # Arguments
///
/// * `payload` - Payload bytes as read from the converter (status byte excluded)
/// * `bit_depth` - Resolution the conversion was made with
///
/// # Errors
///
/// Returns a bus error if fewer payload bytes than the depth needs were supplied
///
/// # Examples
///
/// ```
/// use energy_meter::adc::decoder::decode_twos_complement;
/// use energy_meter::adc::protocol::BitDepth;
///
/// assert_eq!(decode_twos_complement(&[0x07, 0xFF], BitDepth::Bits12).unwrap(), 2047);
/// assert_eq!(decode_twos_complement(&[0xF8, 0x00], BitDepth::Bits12).unwrap(), -2048);
/// assert_eq!(decode_twos_complement(&[0x03, 0xFF, 0xFF], BitDepth::Bits18).unwrap(), -1);
/// ```
pub fn decode_twos_complement(payload: &[u8], bit_depth: BitDepth) -> Result<i32> {
    let len = bit_depth.payload_len();
    if payload.len() < len {
        return Err(MeterError::Bus(format!(
            "Sample too short: expected {} bytes, got {}",
            len,
            payload.len()
        )));
    }

    let bits = bit_depth.bits();
    let top_bits = bits % 8;
    let top_mask: u8 = if top_bits == 0 { 0xFF } else { (1u8 << top_bits) - 1 };

    let raw = payload[..len]
        .iter()
        .enumerate()
        .fold(0u32, |acc, (i, &byte)| {
            let byte = if i == 0 { byte & top_mask } else { byte };
            (acc << 8) | u32::from(byte)
        });

    let sign_bit = 1u32 << (bits - 1);
    if raw & sign_bit == 0 {
        Ok(raw as i32)
    } else {
        Ok(raw as i32 - (1i32 << bits))
    }
}
