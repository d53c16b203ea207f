//! Reduction of several scaled samples to a single reading

use serde::Deserialize;

/// How the samples of one read are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregator {
    /// Arithmetic mean
    #[default]
    Average,
    /// Root mean square
    Rms,
}

impl Aggregator {
    /// Combine `values`; NaN for an empty slice
    #[must_use]
    pub fn apply(&self, values: &[f64]) -> f64 {
        if values.is_empty() {
            return f64::NAN;
        }
        let n = values.len() as f64;
        match self {
            Aggregator::Average => values.iter().sum::<f64>() / n,
            Aggregator::Rms => (values.iter().map(|v| v * v).sum::<f64>() / n).sqrt(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average() {
        assert_eq!(Aggregator::Average.apply(&[1.0, 2.0, 3.0, 6.0]), 3.0);
    }

    #[test]
    fn test_rms() {
        assert_eq!(Aggregator::Rms.apply(&[3.0, -3.0]), 3.0);
        assert!((Aggregator::Rms.apply(&[1.0, 7.0]) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_is_nan() {
        assert!(Aggregator::Average.apply(&[]).is_nan());
        assert!(Aggregator::Rms.apply(&[]).is_nan());
    }

    #[test]
    fn test_default_is_average() {
        assert_eq!(Aggregator::default(), Aggregator::Average);
    }
}
