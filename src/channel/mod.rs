//! # Channel Module
//!
//! Calibrated analog channels on top of the raw converter samples.
//!
//! This module handles:
//! - Channel identity (name + converter input) and semantic kind
//! - Two-point calibration of raw counts
//! - Combining several samples into one reading (mean or RMS)
//! - Static channels that report a fixed value without touching hardware

pub mod aggregator;
pub mod calibration;

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::Deserialize;
use tracing::debug;

use crate::adc::protocol::CHANNEL_COUNT;
use crate::adc::{BitDepth, Gain, RawSampler};
use crate::error::{MeterError, Result};

pub use aggregator::Aggregator;
pub use calibration::{CalibrationLine, CalibrationPoint};

/// Input index marking a static channel that is never read from the converter
pub const STATIC_CHANNEL_INDEX: u8 = 0;

/// What a channel measures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Mains voltage; exactly one per meter
    Voltage,
    /// Current of one supply phase, part of the whole-house total
    PhaseCurrent,
    /// Any other current (individual circuits, appliances)
    OtherCurrent,
}

impl ChannelKind {
    /// Whether the channel measures a current
    pub fn is_current(self) -> bool {
        matches!(self, ChannelKind::PhaseCurrent | ChannelKind::OtherCurrent)
    }
}

/// Identity of one analog channel
///
/// Two channels are equal when name and converter input match; the other
/// fields describe how the channel is sampled.
#[derive(Debug, Clone)]
pub struct Channel {
    name: String,
    index: u8,
    bit_depth: BitDepth,
    gain: Gain,
    kind: ChannelKind,
    unit: String,
}

impl Channel {
    pub fn new(
        name: impl Into<String>,
        index: u8,
        bit_depth: BitDepth,
        gain: Gain,
        kind: ChannelKind,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            index,
            bit_depth,
            gain,
            kind,
            unit: unit.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Converter input (1-8), or [`STATIC_CHANNEL_INDEX`]
    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn bit_depth(&self) -> BitDepth {
        self.bit_depth
    }

    pub fn gain(&self) -> Gain {
        self.gain
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn is_static(&self) -> bool {
        self.index == STATIC_CHANNEL_INDEX
    }
}

impl PartialEq for Channel {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.index == other.index
    }
}

impl Eq for Channel {}

impl Hash for Channel {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.index.hash(state);
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_static() {
            write!(f, "{} (static)", self.name)
        } else {
            write!(f, "{} (ch{})", self.name, self.index)
        }
    }
}

/// A channel together with everything needed to turn samples into a reading
#[derive(Debug, Clone)]
pub struct AnalogChannel {
    channel: Channel,
    calibration: CalibrationLine,
    samples: usize,
    aggregator: Aggregator,
    fixed_value: Option<f64>,
}

impl AnalogChannel {
    /// Create a converter-backed channel
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the converter input is outside 1-8
    /// or `samples` is zero
    pub fn new(
        channel: Channel,
        calibration: CalibrationLine,
        samples: usize,
        aggregator: Aggregator,
    ) -> Result<Self> {
        if channel.index == STATIC_CHANNEL_INDEX || channel.index > CHANNEL_COUNT {
            return Err(MeterError::Config(format!(
                "channel {} must use an input between 1 and {}",
                channel.name, CHANNEL_COUNT
            )));
        }
        if samples == 0 {
            return Err(MeterError::Config(format!(
                "channel {} must collect at least one sample",
                channel.name
            )));
        }

        Ok(Self {
            channel,
            calibration,
            samples,
            aggregator,
            fixed_value: None,
        })
    }

    /// Create a static channel that always reads `value`
    ///
    /// The channel's input index is forced to [`STATIC_CHANNEL_INDEX`].
    pub fn fixed(mut channel: Channel, value: f64) -> Self {
        channel.index = STATIC_CHANNEL_INDEX;
        Self {
            channel,
            calibration: CalibrationLine::identity(),
            samples: 1,
            aggregator: Aggregator::Average,
            fixed_value: Some(value),
        }
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn calibration(&self) -> &CalibrationLine {
        &self.calibration
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn aggregator(&self) -> Aggregator {
        self.aggregator
    }

    /// Produce one calibrated reading
    ///
    /// Each raw sample is scaled before aggregation so that RMS is taken
    /// around the physical zero rather than the raw one.
    ///
    /// # Errors
    ///
    /// Propagates conversion timeouts and bus errors from the sampler
    pub fn read<S: RawSampler + ?Sized>(&self, sampler: &mut S) -> Result<f64> {
        if let Some(value) = self.fixed_value {
            return Ok(value);
        }

        sampler.configure(self.channel.bit_depth, self.channel.gain)?;

        let mut scaled = Vec::with_capacity(self.samples);
        for _ in 0..self.samples {
            let raw = sampler.read_raw(self.channel.index)?;
            scaled.push(self.calibration.scale(f64::from(raw)));
        }

        let value = self.aggregator.apply(&scaled);
        debug!(
            "new measurement from channel {}: {:.3} {}",
            self.channel.name, value, self.channel.unit
        );
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adc::MockRawSampler;
    use mockall::predicate::eq;
    use mockall::Sequence;
    use std::collections::HashMap;

    fn channel(name: &str, index: u8, kind: ChannelKind) -> Channel {
        Channel::new(name, index, BitDepth::Bits16, Gain::X2, kind, "A")
    }

    fn offset_line() -> CalibrationLine {
        // slope 1, intercept 10
        CalibrationLine::from_points(CalibrationPoint::new(0.0, 10.0), CalibrationPoint::new(1.0, 11.0))
            .unwrap()
    }

    fn sampler_returning(samples: Vec<i32>) -> MockRawSampler {
        let mut sampler = MockRawSampler::new();
        let mut seq = Sequence::new();
        sampler
            .expect_configure()
            .with(eq(BitDepth::Bits16), eq(Gain::X2))
            .times(1)
            .returning(|_, _| Ok(()));
        for sample in samples {
            sampler
                .expect_read_raw()
                .with(eq(3))
                .times(1)
                .in_sequence(&mut seq)
                .returning(move |_| Ok(sample));
        }
        sampler
    }

    #[test]
    fn test_identity_by_name_and_index() {
        let a = Channel::new("L1", 1, BitDepth::Bits12, Gain::X1, ChannelKind::PhaseCurrent, "A");
        let b = Channel::new("L1", 1, BitDepth::Bits18, Gain::X8, ChannelKind::PhaseCurrent, "mA");
        let c = Channel::new("L1", 2, BitDepth::Bits12, Gain::X1, ChannelKind::PhaseCurrent, "A");
        assert_eq!(a, b);
        assert_ne!(a, c);

        let mut map = HashMap::new();
        map.insert(a, 1.0);
        assert_eq!(map.get(&b), Some(&1.0));
        assert_eq!(map.get(&c), None);
    }

    #[test]
    fn test_kind_is_current() {
        assert!(ChannelKind::PhaseCurrent.is_current());
        assert!(ChannelKind::OtherCurrent.is_current());
        assert!(!ChannelKind::Voltage.is_current());
    }

    #[test]
    fn test_read_scales_then_averages() {
        let line = CalibrationLine::from_points(
            CalibrationPoint::new(0.0, 0.0),
            CalibrationPoint::new(1000.0, 100.0),
        )
        .unwrap();
        let model = AnalogChannel::new(channel("L1", 3, ChannelKind::PhaseCurrent), line, 2, Aggregator::Average)
            .unwrap();

        let mut sampler = sampler_returning(vec![400, 600]);
        let value = model.read(&mut sampler).unwrap();
        assert!((value - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_rms_is_taken_after_scaling() {
        let model = AnalogChannel::new(
            channel("L1", 3, ChannelKind::PhaseCurrent),
            offset_line(),
            2,
            Aggregator::Rms,
        )
        .unwrap();

        let mut sampler = sampler_returning(vec![1, -1]);
        let value = model.read(&mut sampler).unwrap();

        // Scaled samples are 11 and 9
        let expected = ((11.0f64 * 11.0 + 9.0 * 9.0) / 2.0).sqrt();
        assert!((value - expected).abs() < 1e-9);

        // Aggregating first would have produced rms([1, -1]) scaled = 11
        let aggregate_then_scale = offset_line().scale(Aggregator::Rms.apply(&[1.0, -1.0]));
        assert!((aggregate_then_scale - 11.0).abs() < 1e-9);
        assert!((value - aggregate_then_scale).abs() > 0.5);
    }

    #[test]
    fn test_static_channel_never_touches_sampler() {
        let model = AnalogChannel::fixed(channel("grid", 5, ChannelKind::Voltage), 230.0);
        assert!(model.channel().is_static());
        assert_eq!(model.channel().index(), STATIC_CHANNEL_INDEX);

        // No expectations: any call would panic
        let mut sampler = MockRawSampler::new();
        assert_eq!(model.read(&mut sampler).unwrap(), 230.0);
    }

    #[test]
    fn test_timeout_propagates() {
        let model = AnalogChannel::new(
            channel("L1", 3, ChannelKind::PhaseCurrent),
            offset_line(),
            3,
            Aggregator::Average,
        )
        .unwrap();

        let mut sampler = MockRawSampler::new();
        sampler.expect_configure().returning(|_, _| Ok(()));
        sampler.expect_read_raw().times(1).returning(|channel| {
            Err(MeterError::ConversionTimeout {
                channel,
                waited: std::time::Duration::from_millis(420),
            })
        });

        assert!(matches!(
            model.read(&mut sampler),
            Err(MeterError::ConversionTimeout { channel: 3, .. })
        ));
    }

    #[test]
    fn test_new_validates_index_and_samples() {
        let line = offset_line();
        assert!(AnalogChannel::new(channel("x", 0, ChannelKind::OtherCurrent), line, 1, Aggregator::Average).is_err());
        assert!(AnalogChannel::new(channel("x", 9, ChannelKind::OtherCurrent), line, 1, Aggregator::Average).is_err());
        assert!(AnalogChannel::new(channel("x", 1, ChannelKind::OtherCurrent), line, 0, Aggregator::Average).is_err());
        assert!(AnalogChannel::new(channel("x", 8, ChannelKind::OtherCurrent), line, 4, Aggregator::Rms).is_ok());
    }

    #[test]
    fn test_display() {
        assert_eq!(channel("L1", 3, ChannelKind::PhaseCurrent).to_string(), "L1 (ch3)");
        let fixed = AnalogChannel::fixed(channel("ref", 3, ChannelKind::Voltage), 1.0);
        assert_eq!(fixed.channel().to_string(), "ref (static)");
    }
}
