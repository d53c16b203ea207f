//! # Daily Sample Buffer
//!
//! Fixed-capacity record of today's readings, one slot per sample interval.
//! Slots start out with their nominal time and NaN values; a write replaces
//! the slot's timestamp with the actual arrival time.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};

use super::binning::{DayBins, SECONDS_PER_DAY};

/// Where a value of a reading goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Row {
    /// Index into the current rows
    Current(usize),
    Voltage,
}

/// Today's readings
#[derive(Debug)]
pub(crate) struct DailyBuffer {
    day: NaiveDate,
    start: NaiveDateTime,
    interval: Duration,
    timestamps: Vec<NaiveDateTime>,
    currents: Vec<Vec<f64>>,
    voltage: Vec<f64>,
    cursor: usize,
    last_written: Option<usize>,
}

impl DailyBuffer {
    /// Allocate the buffer for the day containing `now`
    ///
    /// The write cursor starts at the slot `now` falls into, since sampling
    /// rarely begins at midnight.
    pub(crate) fn new(now: NaiveDateTime, interval_secs: u32, current_rows: usize) -> Self {
        let day = now.date();
        let start = day.and_time(NaiveTime::MIN);
        let interval = Duration::seconds(i64::from(interval_secs));
        let slots = SECONDS_PER_DAY.div_ceil(interval_secs) as usize;

        let timestamps = (0..slots).map(|i| start + interval * i as i32).collect();

        let elapsed = (now - start).num_seconds().max(0) as u64;
        let cursor = (elapsed / u64::from(interval_secs)) as usize;

        Self {
            day,
            start,
            interval,
            timestamps,
            currents: vec![vec![f64::NAN; slots]; current_rows],
            voltage: vec![f64::NAN; slots],
            cursor,
            last_written: None,
        }
    }

    pub(crate) fn day(&self) -> NaiveDate {
        self.day
    }

    pub(crate) fn capacity(&self) -> usize {
        self.timestamps.len()
    }

    pub(crate) fn cursor(&self) -> usize {
        self.cursor
    }

    /// Nominal time of the last slot
    pub(crate) fn last_nominal(&self) -> NaiveDateTime {
        self.start + self.interval * (self.capacity() as i32 - 1)
    }

    /// Whether `now` lies past the last slot's nominal time
    pub(crate) fn is_expired(&self, now: NaiveDateTime) -> bool {
        now > self.last_nominal()
    }

    /// Store one reading set in the slot under the cursor and advance it
    ///
    /// # Returns
    ///
    /// * `false` - The day has no slot left, nothing was written
    pub(crate) fn write(&mut self, values: &[(Row, f64)], now: NaiveDateTime) -> bool {
        let index = self.cursor;
        if index >= self.capacity() {
            return false;
        }

        for &(row, value) in values {
            match row {
                Row::Current(r) => self.currents[r][index] = value,
                Row::Voltage => self.voltage[index] = value,
            }
        }
        self.timestamps[index] = now;
        self.last_written = Some(index);
        self.cursor += 1;
        true
    }

    /// Sum of the selected current rows at `slot`, missing values count as zero
    fn current_sum(&self, rows: &[usize], slot: usize) -> f64 {
        rows.iter()
            .map(|&r| self.currents[r][slot])
            .filter(|v| !v.is_nan())
            .sum()
    }

    /// Energy per bin in watt-hours for the selected current rows
    ///
    /// Each slot contributes `current * voltage * dt`, where `dt` is the time
    /// to the following slot. Negative `dt` (a written slot overtaking the
    /// next nominal time) is clamped to zero.
    pub(crate) fn power_history(&self, rows: &[usize], bins: usize) -> Vec<f64> {
        let slots = self.capacity();
        if slots < 2 {
            return vec![0.0; bins];
        }

        let energy: Vec<f64> = (0..slots - 1)
            .map(|i| {
                let dt = (self.timestamps[i + 1] - self.timestamps[i]).num_milliseconds() as f64 / 1000.0;
                self.current_sum(rows, i) * self.voltage[i] * dt.max(0.0)
            })
            .collect();

        DayBins::new(self.start, bins)
            .sum(&self.timestamps[..slots - 1], &energy)
            .into_iter()
            .map(|watt_seconds| watt_seconds / 3600.0)
            .collect()
    }

    /// Instantaneous power at the most recently written slot
    pub(crate) fn live_power(&self, rows: &[usize]) -> f64 {
        match self.last_written {
            Some(slot) => self.current_sum(rows, slot) * self.voltage[slot],
            None => f64::NAN,
        }
    }

    /// Voltage at the most recently written slot
    pub(crate) fn live_voltage(&self) -> f64 {
        self.last_written.map_or(f64::NAN, |slot| self.voltage[slot])
    }

    /// Mean of one current row per bin
    pub(crate) fn current_history(&self, row: usize, bins: usize) -> Vec<f64> {
        DayBins::new(self.start, bins).mean(&self.timestamps, &self.currents[row])
    }

    /// Mean voltage per bin
    pub(crate) fn voltage_history(&self, bins: usize) -> Vec<f64> {
        DayBins::new(self.start, bins).mean(&self.timestamps, &self.voltage)
    }
}
