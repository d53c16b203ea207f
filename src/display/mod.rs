//! # Display Module
//!
//! Rotating screens that summarize the energy statistics.
//!
//! This module handles:
//! - Display configuration (view type, title, how long it stays up)
//! - Rendering a view into a [`Frame`] from the statistics
//! - Cycling through the configured displays

pub mod frame;

use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::error::Result;
use crate::stats::EnergyStatistics;

pub use frame::{Body, Frame};

/// Which statistic a display shows
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum View {
    /// Energy consumed today
    DailyPower,
    /// Power at the latest reading
    CurrentPower,
    /// Voltage at the latest reading
    CurrentVoltage,
    /// Bar chart of today's energy per bin
    PowerHistory {
        #[serde(default = "default_bins")]
        bins: usize,
    },
}

fn default_bins() -> usize { 24 }

/// One entry of the display rotation
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DisplayConfig {
    #[serde(flatten)]
    pub view: View,

    #[serde(default)]
    pub title: String,

    /// Seconds the display stays up before the next one
    #[serde(default = "default_display_time")]
    pub display_time: u64,

    /// Current channel name; all phase currents when absent
    #[serde(default)]
    pub channel: Option<String>,
}

fn default_display_time() -> u64 { 3 }

impl DisplayConfig {
    /// Render this display from the current statistics
    ///
    /// # Errors
    ///
    /// Returns an error if `channel` names no current channel
    pub fn render(&self, stats: &EnergyStatistics) -> Result<Frame> {
        let selector = self.channel.as_deref();

        let frame = match &self.view {
            View::DailyPower => Frame::value(&self.title, stats.daily_power(selector)?, "Wh", "kWh"),
            View::CurrentPower => Frame::value(&self.title, stats.live_power(selector)?, "W", "kW"),
            View::CurrentVoltage => Frame::value(&self.title, stats.live_voltage(), "V", "kV"),
            View::PowerHistory { bins } => Frame::chart(&self.title, &stats.power_history(*bins, selector)?),
        };

        Ok(frame)
    }
}

/// Cycles through the configured displays
#[derive(Debug)]
pub struct DisplayRotation {
    displays: Vec<DisplayConfig>,
    index: usize,
    active_since: Option<Instant>,
}

impl DisplayRotation {
    pub fn new(displays: Vec<DisplayConfig>) -> Self {
        Self {
            displays,
            index: 0,
            active_since: None,
        }
    }

    /// Display that should be shown at `now`
    ///
    /// Moves on to the next display once the active one has been up for
    /// longer than its `display_time`.
    pub fn current(&mut self, now: Instant) -> Option<&DisplayConfig> {
        if self.displays.is_empty() {
            return None;
        }

        let since = *self.active_since.get_or_insert(now);
        let shown_for = Duration::from_secs(self.displays[self.index].display_time);
        if now.saturating_duration_since(since) > shown_for {
            self.index = (self.index + 1) % self.displays.len();
            self.active_since = Some(now);
        }

        self.displays.get(self.index)
    }
}
