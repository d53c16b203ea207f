//! Timestamp-aligned aggregation of slot values into equal-width day bins

use chrono::NaiveDateTime;

/// Seconds in one calendar day
pub const SECONDS_PER_DAY: u32 = 86_400;

/// Equal-width partition of a calendar day
#[derive(Debug, Clone, Copy)]
pub struct DayBins {
    start: NaiveDateTime,
    count: usize,
    width_secs: f64,
}

impl DayBins {
    /// Split the day starting at `start` (local midnight) into `count` bins
    pub fn new(start: NaiveDateTime, count: usize) -> Self {
        let width_secs = if count == 0 {
            0.0
        } else {
            f64::from(SECONDS_PER_DAY) / count as f64
        };
        Self { start, count, width_secs }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Bin holding `timestamp`; times outside the day land in the edge bins
    pub fn index_of(&self, timestamp: NaiveDateTime) -> Option<usize> {
        if self.count == 0 {
            return None;
        }
        let offset = (timestamp - self.start).num_milliseconds() as f64 / 1000.0;
        let bin = (offset / self.width_secs).floor();
        if bin <= 0.0 {
            Some(0)
        } else {
            Some((bin as usize).min(self.count - 1))
        }
    }

    /// Sum `values` per bin, missing (NaN) values contribute zero
    pub fn sum(&self, timestamps: &[NaiveDateTime], values: &[f64]) -> Vec<f64> {
        let mut sums = vec![0.0; self.count];
        for (&timestamp, &value) in timestamps.iter().zip(values) {
            if value.is_nan() {
                continue;
            }
            if let Some(bin) = self.index_of(timestamp) {
                sums[bin] += value;
            }
        }
        sums
    }

    /// Mean of `values` per bin, ignoring NaN; bins without data are NaN
    pub fn mean(&self, timestamps: &[NaiveDateTime], values: &[f64]) -> Vec<f64> {
        let mut sums = vec![0.0; self.count];
        let mut counts = vec![0usize; self.count];
        for (&timestamp, &value) in timestamps.iter().zip(values) {
            if value.is_nan() {
                continue;
            }
            if let Some(bin) = self.index_of(timestamp) {
                sums[bin] += value;
                counts[bin] += 1;
            }
        }
        sums.iter()
            .zip(&counts)
            .map(|(&sum, &count)| if count == 0 { f64::NAN } else { sum / count as f64 })
            .collect()
    }
}
