//! # Energy Statistics Module
//!
//! Today's readings and the power, energy, current and voltage summaries
//! derived from them.
//!
//! This module handles:
//! - Storing one reading set per sample interval in a day-long buffer
//! - Resetting the buffer when the first reading of a new day arrives
//! - Live power and voltage from the most recent reading
//! - Energy per time bin and for the whole day so far
//! - Mean current and voltage per time bin
//!
//! ## Concurrency
//!
//! One [`EnergyStatistics`] is shared between the acquisition thread and any
//! number of readers. All operations take the same lock for their full
//! duration, so a reader never sees half of a reading set or a buffer in
//! the middle of a reset.
//!
//! ## Usage
//!
//! ```
//! use std::collections::HashMap;
//! use energy_meter::adc::{BitDepth, Gain};
//! use energy_meter::channel::{Channel, ChannelKind};
//! use energy_meter::stats::EnergyStatistics;
//!
//! let voltage = Channel::new("mains", 1, BitDepth::Bits16, Gain::X1, ChannelKind::Voltage, "V");
//! let phase = Channel::new("L1", 2, BitDepth::Bits16, Gain::X1, ChannelKind::PhaseCurrent, "A");
//! let stats = EnergyStatistics::new(vec![voltage.clone(), phase.clone()], 5)?;
//!
//! stats.add_reading(&HashMap::from([(voltage, 230.0), (phase, 2.0)]))?;
//! assert_eq!(stats.live_power(None)?, 460.0);
//! # Ok::<(), energy_meter::error::MeterError>(())
//! ```

mod binning;
mod buffer;

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{Local, NaiveDateTime};
use tracing::{debug, info, warn};

use crate::channel::{Channel, ChannelKind};
use crate::error::{MeterError, Result};
use buffer::{DailyBuffer, Row};

pub use binning::SECONDS_PER_DAY;

/// Shared record of today's consumption
#[derive(Debug)]
pub struct EnergyStatistics {
    current_channels: Vec<Channel>,
    voltage_channel: Channel,
    sample_every: u32,
    buffer: Mutex<DailyBuffer>,
}

impl EnergyStatistics {
    /// Create the statistics for `channels`, sampled every `sample_every` seconds
    ///
    /// # Errors
    ///
    /// Returns a configuration error if there is not exactly one voltage
    /// channel, a channel appears twice, or `sample_every` is zero
    pub fn new(channels: Vec<Channel>, sample_every: u32) -> Result<Self> {
        Self::with_start(channels, sample_every, Local::now().naive_local())
    }

    /// Like [`EnergyStatistics::new`], with the buffer started at `now`
    pub fn with_start(channels: Vec<Channel>, sample_every: u32, now: NaiveDateTime) -> Result<Self> {
        if sample_every == 0 || sample_every > SECONDS_PER_DAY {
            return Err(MeterError::Config(format!(
                "sample_every must be between 1 and {} seconds",
                SECONDS_PER_DAY
            )));
        }

        let mut seen = HashSet::new();
        for channel in &channels {
            if !seen.insert(channel) {
                return Err(MeterError::Config(format!("channel {} is configured twice", channel)));
            }
        }

        let (mut voltage_channels, current_channels): (Vec<Channel>, Vec<Channel>) = channels
            .into_iter()
            .partition(|channel| channel.kind() == ChannelKind::Voltage);

        if voltage_channels.len() != 1 {
            return Err(MeterError::Config(format!(
                "exactly one voltage channel is required, found {}",
                voltage_channels.len()
            )));
        }
        let voltage_channel = voltage_channels.remove(0);

        let buffer = DailyBuffer::new(now, sample_every, current_channels.len());
        debug!(
            "Statistics buffer for {} with {} slots, starting at slot {}",
            buffer.day(),
            buffer.capacity(),
            buffer.cursor()
        );

        Ok(Self {
            current_channels,
            voltage_channel,
            sample_every,
            buffer: Mutex::new(buffer),
        })
    }

    /// Current channels in row order
    pub fn current_channels(&self) -> &[Channel] {
        &self.current_channels
    }

    pub fn voltage_channel(&self) -> &Channel {
        &self.voltage_channel
    }

    /// Sample interval in seconds
    pub fn sample_every(&self) -> u32 {
        self.sample_every
    }

    fn lock(&self) -> MutexGuard<'_, DailyBuffer> {
        // Buffer writes never leave a slot half-updated
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn row_of(&self, channel: &Channel) -> Result<Row> {
        if *channel == self.voltage_channel {
            return Ok(Row::Voltage);
        }
        self.current_channels
            .iter()
            .position(|c| c == channel)
            .map(Row::Current)
            .ok_or_else(|| MeterError::UnknownChannel(channel.name().to_string()))
    }

    /// Current rows summed for power: all phases, or one named current channel
    fn selected_rows(&self, channel: Option<&str>) -> Result<Vec<usize>> {
        match channel {
            None => Ok(self
                .current_channels
                .iter()
                .enumerate()
                .filter(|(_, c)| c.kind() == ChannelKind::PhaseCurrent)
                .map(|(i, _)| i)
                .collect()),
            Some(name) => self
                .current_channels
                .iter()
                .position(|c| c.name() == name)
                .map(|i| vec![i])
                .ok_or_else(|| MeterError::UnknownChannel(name.to_string())),
        }
    }

    /// Record one reading set, timestamped with the current wall-clock time
    ///
    /// # Errors
    ///
    /// Returns `UnknownChannel` if a reading belongs to a channel these
    /// statistics were not created with; nothing is written in that case
    pub fn add_reading(&self, readings: &HashMap<Channel, f64>) -> Result<()> {
        self.add_reading_at(readings, Local::now().naive_local())
    }

    /// Record one reading set that arrived at `now`
    ///
    /// If the day's buffer has no slot left the reading is dropped with a
    /// warning.
    pub fn add_reading_at(&self, readings: &HashMap<Channel, f64>, now: NaiveDateTime) -> Result<()> {
        let mut buffer = self.lock();

        if buffer.is_expired(now) {
            info!("New day {}, resetting daily statistics", now.date());
            *buffer = DailyBuffer::new(now, self.sample_every, self.current_channels.len());
        }

        let values = readings
            .iter()
            .map(|(channel, &value)| Ok((self.row_of(channel)?, value)))
            .collect::<Result<Vec<_>>>()?;

        if !buffer.write(&values, now) {
            warn!(
                "Overflowing sample buffer ({} slots). Discarding new reading",
                buffer.capacity()
            );
        }
        Ok(())
    }

    /// Energy consumed today in watt-hours
    ///
    /// # Arguments
    ///
    /// * `channel` - Restrict to one current channel; `None` sums all phases
    pub fn daily_power(&self, channel: Option<&str>) -> Result<f64> {
        let rows = self.selected_rows(channel)?;
        let buffer = self.lock();
        Ok(buffer.power_history(&rows, 1).iter().sum())
    }

    /// Energy in watt-hours for each of `bins` equal parts of the day
    ///
    /// Missing readings contribute nothing. Time deltas between consecutive
    /// slots are clamped at zero, so a slot whose arrival time overtook the
    /// next slot adds no energy.
    pub fn power_history(&self, bins: usize, channel: Option<&str>) -> Result<Vec<f64>> {
        let rows = self.selected_rows(channel)?;
        let buffer = self.lock();
        Ok(buffer.power_history(&rows, bins))
    }

    /// Power in watts from the most recent reading; NaN before the first one
    pub fn live_power(&self, channel: Option<&str>) -> Result<f64> {
        let rows = self.selected_rows(channel)?;
        let buffer = self.lock();
        Ok(buffer.live_power(&rows))
    }

    /// Voltage of the most recent reading; NaN before the first one
    pub fn live_voltage(&self) -> f64 {
        self.lock().live_voltage()
    }

    /// Mean current per bin for every current channel
    ///
    /// Missing readings are left out of the mean; bins without any reading
    /// are NaN.
    pub fn current_history(&self, bins: usize) -> HashMap<Channel, Vec<f64>> {
        let buffer = self.lock();
        self.current_channels
            .iter()
            .enumerate()
            .map(|(row, channel)| (channel.clone(), buffer.current_history(row, bins)))
            .collect()
    }

    /// Mean voltage per bin, keyed by the voltage channel
    pub fn voltage_history(&self, bins: usize) -> HashMap<Channel, Vec<f64>> {
        let buffer = self.lock();
        HashMap::from([(self.voltage_channel.clone(), buffer.voltage_history(bins))])
    }
}
