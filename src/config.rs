//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::adc::protocol::{self, DEFAULT_ADC_A_ADDRESS, DEFAULT_ADC_B_ADDRESS};
use crate::adc::{BitDepth, BusKind, ConversionMode, Gain, DEFAULT_I2C_DEVICE};
use crate::channel::{
    Aggregator, AnalogChannel, CalibrationLine, CalibrationPoint, Channel, ChannelKind, STATIC_CHANNEL_INDEX,
};
use crate::display::{DisplayConfig, View};
use crate::error::{MeterError, Result};
use crate::publish::MessageTemplate;
use crate::stats::SECONDS_PER_DAY;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Seconds between sample cycles; defaults to the channel count
    #[serde(default)]
    pub sample_every: Option<u32>,

    #[serde(default)]
    pub adc: AdcConfig,

    pub channels: Vec<ChannelConfig>,

    #[serde(default)]
    pub publish: PublishConfig,

    #[serde(default)]
    pub displays: Vec<DisplayConfig>,
}

/// Converter configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AdcConfig {
    /// Bus addresses of device A (channels 1-4) and device B (channels 5-8)
    #[serde(default = "default_addresses")]
    pub addresses: Vec<u8>,

    #[serde(default)]
    pub conversion_mode: ConversionMode,

    #[serde(default)]
    pub bus: BusKind,

    /// I2C character device the converters hang off
    #[serde(default = "default_device")]
    pub device: String,
}

impl Default for AdcConfig {
    fn default() -> Self {
        Self {
            addresses: default_addresses(),
            conversion_mode: ConversionMode::default(),
            bus: BusKind::default(),
            device: default_device(),
        }
    }
}

/// One analog channel
#[derive(Debug, Deserialize, Clone)]
pub struct ChannelConfig {
    pub name: String,

    /// Converter input 1-8, or 0 for a static channel
    pub channel: u8,

    pub bits: BitDepth,

    #[serde(default)]
    pub gain: Gain,

    #[serde(default = "default_samples")]
    pub samples: usize,

    #[serde(default)]
    pub aggregator: Aggregator,

    pub kind: ChannelKind,

    #[serde(default)]
    pub unit: String,

    #[serde(default)]
    pub zeropoint: Option<CalibrationPoint>,

    #[serde(default)]
    pub fullscale: Option<CalibrationPoint>,

    /// Reported value of a static channel
    #[serde(default)]
    pub value: Option<f64>,
}

/// Outgoing message configuration
#[derive(Debug, Default, Deserialize, Clone)]
pub struct PublishConfig {
    #[serde(default)]
    pub messages: Vec<MessageTemplate>,
}

// Default value functions
fn default_addresses() -> Vec<u8> { vec![DEFAULT_ADC_A_ADDRESS, DEFAULT_ADC_B_ADDRESS] }
fn default_samples() -> usize { 1 }
fn default_device() -> String { DEFAULT_I2C_DEVICE.to_string() }

impl ChannelConfig {
    /// Channel identity used by the statistics engine
    pub fn identity(&self) -> Channel {
        Channel::new(
            self.name.clone(),
            self.channel,
            self.bits,
            self.gain,
            self.kind,
            self.unit.clone(),
        )
    }

    /// Build the calibrated channel model
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a static channel has no `value`,
    /// a converter channel lacks calibration points, or the points are
    /// degenerate
    pub fn build(&self) -> Result<AnalogChannel> {
        if self.channel == STATIC_CHANNEL_INDEX {
            let value = self.value.ok_or_else(|| {
                MeterError::Config(format!("static channel {} needs a value", self.name))
            })?;
            return Ok(AnalogChannel::fixed(self.identity(), value));
        }

        if self.value.is_some() {
            return Err(MeterError::Config(format!(
                "channel {} has a value but reads input {}; use channel = 0 for static channels",
                self.name, self.channel
            )));
        }

        let (Some(zero), Some(full)) = (self.zeropoint, self.fullscale) else {
            return Err(MeterError::Config(format!(
                "channel {} needs both zeropoint and fullscale",
                self.name
            )));
        };
        let calibration = CalibrationLine::from_points(zero, full)?;

        AnalogChannel::new(self.identity(), calibration, self.samples, self.aggregator)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use energy_meter::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Seconds between sample cycles
    ///
    /// Defaults to one second per configured channel.
    pub fn sample_every(&self) -> u32 {
        self.sample_every
            .unwrap_or(self.channels.len() as u32)
            .max(1)
    }

    /// Addresses of device A and device B
    pub fn adc_addresses(&self) -> Result<[u8; 2]> {
        let [a, b] = self.adc.addresses.as_slice() else {
            return Err(MeterError::Config(format!(
                "adc.addresses must list exactly two addresses, found {}",
                self.adc.addresses.len()
            )));
        };
        Ok([protocol::validate_address(*a)?, protocol::validate_address(*b)?])
    }

    /// Build the calibrated model of every configured channel
    pub fn build_channels(&self) -> Result<Vec<AnalogChannel>> {
        self.channels.iter().map(ChannelConfig::build).collect()
    }

    /// Validate configuration values
    ///
    /// # Returns
    ///
    /// * `Result<()>` - Ok if valid, Err if invalid
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        self.adc_addresses()?;

        if let Some(seconds) = self.sample_every {
            if seconds == 0 || seconds > SECONDS_PER_DAY {
                return Err(MeterError::Config(format!(
                    "sample_every must be between 1 and {}",
                    SECONDS_PER_DAY
                )));
            }
        }

        if self.channels.is_empty() {
            return Err(MeterError::Config("at least one channel is required".to_string()));
        }

        self.build_channels()?;

        let mut seen = HashSet::new();
        for channel in &self.channels {
            if !seen.insert(channel.name.as_str()) {
                return Err(MeterError::Config(format!(
                    "channel name {} is used twice",
                    channel.name
                )));
            }
        }

        let voltage_channels = self
            .channels
            .iter()
            .filter(|c| c.kind == ChannelKind::Voltage)
            .count();
        if voltage_channels != 1 {
            return Err(MeterError::Config(format!(
                "exactly one voltage channel is required, found {}",
                voltage_channels
            )));
        }

        for display in &self.displays {
            self.validate_display(display)?;
        }

        Ok(())
    }

    fn validate_display(&self, display: &DisplayConfig) -> Result<()> {
        if display.display_time == 0 {
            return Err(MeterError::Config(format!(
                "display {:?} must stay up at least one second",
                display.title
            )));
        }

        if let View::PowerHistory { bins } = display.view {
            if bins == 0 {
                return Err(MeterError::Config(format!(
                    "display {:?} needs at least one bin",
                    display.title
                )));
            }
        }

        if let Some(name) = &display.channel {
            let known = self
                .channels
                .iter()
                .any(|c| c.kind.is_current() && &c.name == name);
            if !known {
                return Err(MeterError::Config(format!(
                    "display {:?} refers to unknown current channel {}",
                    display.title, name
                )));
            }
        }

        Ok(())
    }
}
