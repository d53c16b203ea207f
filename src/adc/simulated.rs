//! # Simulated Converters
//!
//! Stands in for the converter board when no hardware is attached. Both
//! devices answer with a 50 Hz sine on top of a little noise, encoded for
//! whatever resolution they were last configured with.

use std::collections::{HashMap, HashSet};
use std::f64::consts::PI;
use std::time::Instant;

use rand::Rng;
use tracing::trace;

use super::bus::AdcBus;
use super::protocol::*;
use crate::error::Result;

/// Mains frequency of the simulated signal
const SIGNAL_HZ: f64 = 50.0;

/// Signal amplitude as a fraction of full scale
const SIGNAL_AMPLITUDE: f64 = 0.4;

/// Noise amplitude as a fraction of full scale
const NOISE_AMPLITUDE: f64 = 0.01;

/// In-memory bus emulating two converters
#[derive(Debug)]
pub struct SimulatedBus {
    /// Last configuration byte written per device
    configs: HashMap<u8, u8>,
    /// Devices with a started conversion that has not been polled yet
    pending: HashSet<u8>,
    started: Instant,
}

impl Default for SimulatedBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self {
            configs: HashMap::new(),
            pending: HashSet::new(),
            started: Instant::now(),
        }
    }

    /// Configuration byte last seen by the device at `address`
    pub fn config_of(&self, address: u8) -> Option<u8> {
        self.configs.get(&address).copied()
    }

    fn bit_depth_of(config: u8) -> BitDepth {
        match config & CONFIG_RATE_MASK {
            0x00 => BitDepth::Bits12,
            0x04 => BitDepth::Bits14,
            0x08 => BitDepth::Bits16,
            _ => BitDepth::Bits18,
        }
    }

    /// Produce a sample for the multiplexer input selected in `config`
    fn sample(&self, config: u8) -> i32 {
        let bits = Self::bit_depth_of(config).bits();
        let full_scale = f64::from(1u32 << (bits - 1));
        let input = f64::from((config & CONFIG_CHANNEL_MASK) >> CONFIG_CHANNEL_SHIFT);

        let t = self.started.elapsed().as_secs_f64();
        let phase = 2.0 * PI * SIGNAL_HZ * t + input * PI / 2.0;
        let noise = rand::thread_rng().gen_range(-NOISE_AMPLITUDE..NOISE_AMPLITUDE);

        let value = (SIGNAL_AMPLITUDE * phase.sin() + noise) * full_scale;
        value.round().clamp(-full_scale, full_scale - 1.0) as i32
    }

    /// Encode `value` like the converter does, sign bits repeated into the padding
    fn encode(value: i32, bit_depth: BitDepth) -> Vec<u8> {
        let len = bit_depth.payload_len();
        value.to_be_bytes()[4 - len..].to_vec()
    }
}

impl AdcBus for SimulatedBus {
    fn write_register(&mut self, address: u8, byte: u8) -> Result<()> {
        let is_start = byte & CONFIG_READY_BIT != 0;
        self.configs.insert(address, byte & !CONFIG_READY_BIT);
        if is_start {
            self.pending.insert(address);
        }
        Ok(())
    }

    fn read_block(&mut self, address: u8, command: u8, buf: &mut [u8]) -> Result<()> {
        // The command byte doubles as a configuration write on these devices
        let config = command & !CONFIG_READY_BIT;
        self.configs.insert(address, config);

        let bit_depth = Self::bit_depth_of(config);
        let payload = Self::encode(self.sample(config), bit_depth);

        // Report one busy poll after every conversion start
        let busy = self.pending.remove(&address);
        let status = if busy { config | CONFIG_READY_BIT } else { config };

        trace!("Simulated read 0x{:02X}: {:02X?} status 0x{:02X}", address, payload, status);

        for (dst, src) in buf.iter_mut().zip(payload.iter().chain(std::iter::once(&status))) {
            *dst = *src;
        }
        Ok(())
    }
}
