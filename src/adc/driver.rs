//! # Converter Driver
//!
//! Drives the two converters on the board: channel selection, conversion
//! start, completion polling and sample decoding.

use std::thread;
use std::time::Instant;

use tracing::{debug, trace};

use super::bus::AdcBus;
use super::decoder::decode_twos_complement;
use super::protocol::*;
use super::RawSampler;
use crate::error::{MeterError, Result};

/// Eight-channel converter board
///
/// Channels 1-4 live on the first converter, 5-8 on the second. Resolution
/// and gain are shared by both converters and rewritten only when they
/// change.
pub struct Adc<B> {
    bus: B,
    address_a: u8,
    address_b: u8,
    bit_depth: BitDepth,
    gain: Gain,
    mode: ConversionMode,
}

impl<B> std::fmt::Debug for Adc<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adc")
            .field("address_a", &format_args!("0x{:02X}", self.address_a))
            .field("address_b", &format_args!("0x{:02X}", self.address_b))
            .field("bit_depth", &self.bit_depth)
            .field("gain", &self.gain)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl<B: AdcBus> Adc<B> {
    /// Set up both converters on `bus`
    ///
    /// Writes the initial 18-bit, unity gain configuration to both devices.
    ///
    /// # Arguments
    ///
    /// * `bus` - Bus both converters are attached to
    /// * `addresses` - Addresses of the converters for channels 1-4 and 5-8
    /// * `mode` - Conversion mode used for every read
    ///
    /// # Errors
    ///
    /// Returns error if an address is outside 0x68-0x6F or the initial
    /// configuration write fails
    pub fn new(bus: B, addresses: [u8; 2], mode: ConversionMode) -> Result<Self> {
        let mut adc = Self {
            bus,
            address_a: validate_address(addresses[0])?,
            address_b: validate_address(addresses[1])?,
            bit_depth: BitDepth::Bits18,
            gain: Gain::X1,
            mode,
        };
        adc.write_settings()?;
        Ok(adc)
    }

    pub fn bit_depth(&self) -> BitDepth {
        self.bit_depth
    }

    pub fn gain(&self) -> Gain {
        self.gain
    }

    pub fn mode(&self) -> ConversionMode {
        self.mode
    }

    /// Release the bus
    pub fn into_bus(self) -> B {
        self.bus
    }

    fn address_of(&self, device: Device) -> u8 {
        match device {
            Device::A => self.address_a,
            Device::B => self.address_b,
        }
    }

    /// Write resolution and gain to both converters
    fn write_settings(&mut self) -> Result<()> {
        let config = config_byte(0, self.mode, self.bit_depth, self.gain);
        debug!(
            "Configuring converters: {} bit, gain x{} (0x{:02X})",
            self.bit_depth.bits(),
            self.gain.factor(),
            config
        );
        self.bus.write_register(self.address_a, config)?;
        self.bus.write_register(self.address_b, config)?;
        Ok(())
    }

    /// Select `channel` and, in one-shot mode, start a conversion
    ///
    /// # Returns
    ///
    /// * `(address, config)` - Device owning the channel and the configuration
    ///   byte (start flag cleared) to poll it with
    pub fn select_and_start(&mut self, channel: u8) -> Result<(u8, u8)> {
        let (device, input) = locate_channel(channel)?;
        let address = self.address_of(device);
        let config = config_byte(input, self.mode, self.bit_depth, self.gain);

        let command = match self.mode {
            ConversionMode::OneShot => config | CONFIG_READY_BIT,
            ConversionMode::Continuous => config,
        };
        self.bus.write_register(address, command)?;

        Ok((address, config))
    }

    /// Poll `address` until the status byte reports a finished conversion
    ///
    /// Reads the payload plus the trailing status byte until bit 7 of the
    /// status clears. Gives up after the depth-dependent timeout.
    ///
    /// # Returns
    ///
    /// * `Result<Vec<u8>>` - Payload bytes without the status byte
    ///
    /// # Errors
    ///
    /// Returns `ConversionTimeout` if the conversion did not finish in time,
    /// or a bus error if a read fails
    pub fn await_conversion(&mut self, channel: u8, address: u8, config: u8) -> Result<Vec<u8>> {
        let payload_len = self.bit_depth.payload_len();
        let timeout = self.bit_depth.conversion_timeout();
        let mut buf = vec![0u8; payload_len + 1];
        let started = Instant::now();

        loop {
            self.bus.read_block(address, config, &mut buf)?;

            let status = buf[payload_len];
            if status & CONFIG_READY_BIT == 0 {
                buf.truncate(payload_len);
                return Ok(buf);
            }

            let waited = started.elapsed();
            if waited > timeout {
                return Err(MeterError::ConversionTimeout { channel, waited });
            }

            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl<B: AdcBus> RawSampler for Adc<B> {
    fn configure(&mut self, bit_depth: BitDepth, gain: Gain) -> Result<()> {
        if bit_depth == self.bit_depth && gain == self.gain {
            return Ok(());
        }
        self.bit_depth = bit_depth;
        self.gain = gain;
        self.write_settings()
    }

    fn read_raw(&mut self, channel: u8) -> Result<i32> {
        let (address, config) = self.select_and_start(channel)?;
        let payload = self.await_conversion(channel, address, config)?;
        let sample = decode_twos_complement(&payload, self.bit_depth)?;
        trace!("Channel {} raw sample {}", channel, sample);
        Ok(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adc::bus::mocks::ScriptedBus;
    use crate::adc::bus::MockAdcBus;
    use mockall::predicate::eq;

    fn adc(mode: ConversionMode) -> (Adc<ScriptedBus>, ScriptedBus) {
        let bus = ScriptedBus::new();
        let adc = Adc::new(bus.clone(), [0x68, 0x69], mode).unwrap();
        bus.clear();
        (adc, bus)
    }

    #[test]
    fn test_new_writes_initial_config_to_both_devices() {
        let bus = ScriptedBus::new();
        let _adc = Adc::new(bus.clone(), [0x6A, 0x6B], ConversionMode::Continuous).unwrap();

        // 18 bit (0x0C), continuous (0x10), gain 1
        assert_eq!(bus.get_writes(), vec![(0x6A, 0x1C), (0x6B, 0x1C)]);
    }

    #[test]
    fn test_new_rejects_out_of_range_address() {
        let result = Adc::new(ScriptedBus::new(), [0x68, 0x70], ConversionMode::OneShot);
        assert!(matches!(result, Err(MeterError::Config(_))));

        let result = Adc::new(ScriptedBus::new(), [0x20, 0x69], ConversionMode::OneShot);
        assert!(matches!(result, Err(MeterError::Config(_))));
    }

    #[test]
    fn test_configure_writes_only_on_change() {
        let (mut adc, bus) = adc(ConversionMode::OneShot);

        adc.configure(BitDepth::Bits18, Gain::X1).unwrap();
        assert!(bus.get_writes().is_empty());

        adc.configure(BitDepth::Bits12, Gain::X2).unwrap();
        assert_eq!(bus.get_writes(), vec![(0x68, 0x01), (0x69, 0x01)]);
        assert_eq!(adc.bit_depth(), BitDepth::Bits12);
        assert_eq!(adc.gain(), Gain::X2);
    }

    #[test]
    fn test_select_and_start_one_shot_sets_start_flag() {
        let (mut adc, bus) = adc(ConversionMode::OneShot);

        let (address, config) = adc.select_and_start(3).unwrap();
        assert_eq!(address, 0x68);
        // input 2, one-shot, 18 bit, gain 1
        assert_eq!(config, 0x4C);
        assert_eq!(bus.get_writes(), vec![(0x68, 0xCC)]);
    }

    #[test]
    fn test_select_and_start_continuous_routes_to_second_device() {
        let (mut adc, bus) = adc(ConversionMode::Continuous);

        let (address, config) = adc.select_and_start(6).unwrap();
        assert_eq!(address, 0x69);
        // input 1, continuous, 18 bit, gain 1
        assert_eq!(config, 0x3C);
        assert_eq!(bus.get_writes(), vec![(0x69, 0x3C)]);
    }

    #[test]
    fn test_select_and_start_rejects_bad_channel() {
        let (mut adc, _bus) = adc(ConversionMode::OneShot);
        assert!(adc.select_and_start(0).is_err());
        assert!(adc.select_and_start(9).is_err());
    }

    #[test]
    fn test_read_raw_polls_until_ready() {
        let (mut adc, bus) = adc(ConversionMode::OneShot);
        adc.configure(BitDepth::Bits16, Gain::X1).unwrap();
        bus.clear();

        // Two busy polls, then a finished -2 sample
        bus.push_response(&[0x00, 0x00, 0x88]);
        bus.push_response(&[0x00, 0x00, 0x88]);
        bus.push_response(&[0xFF, 0xFE, 0x08]);

        assert_eq!(adc.read_raw(1).unwrap(), -2);
        assert_eq!(bus.get_reads().len(), 3);
        assert!(bus.get_reads().iter().all(|&(addr, cmd)| addr == 0x68 && cmd == 0x08));
    }

    #[test]
    fn test_read_raw_18_bit_reads_four_bytes() {
        let (mut adc, bus) = adc(ConversionMode::Continuous);
        bus.push_response(&[0x01, 0x00, 0x00, 0x1C]);

        assert_eq!(adc.read_raw(8).unwrap(), 65536);
        assert_eq!(bus.get_reads(), vec![(0x69, 0x7C)]);
    }

    #[test]
    fn test_await_conversion_times_out() {
        let (mut adc, bus) = adc(ConversionMode::OneShot);
        adc.configure(BitDepth::Bits12, Gain::X1).unwrap();
        bus.push_response(&[0x00, 0x00, 0x80]);

        match adc.read_raw(2) {
            Err(MeterError::ConversionTimeout { channel, waited }) => {
                assert_eq!(channel, 2);
                assert!(waited >= BitDepth::Bits12.conversion_timeout());
            }
            other => panic!("Expected ConversionTimeout, got: {:?}", other),
        }
    }

    #[test]
    fn test_bus_error_propagates() {
        let mut bus = MockAdcBus::new();
        bus.expect_write_register()
            .with(eq(0x68), eq(0x0C))
            .returning(|_, _| Ok(()));
        bus.expect_write_register()
            .with(eq(0x69), eq(0x0C))
            .returning(|_, _| Ok(()));
        bus.expect_write_register()
            .with(eq(0x68), eq(0xCC))
            .returning(|_, _| Err(MeterError::Bus("nack".to_string())));

        let mut adc = Adc::new(bus, [0x68, 0x69], ConversionMode::OneShot).unwrap();
        assert!(matches!(adc.read_raw(3), Err(MeterError::Bus(_))));
    }

    #[test]
    fn test_mock_bus_sees_single_start_per_read() {
        let mut bus = MockAdcBus::new();
        bus.expect_write_register()
            .with(eq(0x68), eq(0x0C))
            .times(1)
            .returning(|_, _| Ok(()));
        bus.expect_write_register()
            .with(eq(0x69), eq(0x0C))
            .times(1)
            .returning(|_, _| Ok(()));
        bus.expect_write_register()
            .with(eq(0x69), eq(0x8C))
            .times(1)
            .returning(|_, _| Ok(()));
        bus.expect_read_block()
            .withf(|address, command, _| *address == 0x69 && *command == 0x0C)
            .times(1)
            .returning(|_, _, buf| {
                buf.copy_from_slice(&[0x00, 0x00, 0x2A, 0x0C]);
                Ok(())
            });

        let mut adc = Adc::new(bus, [0x68, 0x69], ConversionMode::OneShot).unwrap();
        assert_eq!(adc.read_raw(5).unwrap(), 42);
    }
}
