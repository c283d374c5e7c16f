//! Shared statistics over reading windows.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::detect::DetectError;
use crate::telemetry::Reading;

/// A simple series of values for averaging.
#[derive(Debug, Clone, Default)]
pub struct TimeSeries {
    values: Vec<f64>,
}

impl TimeSeries {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn push(&mut self, value: f64) {
        self.values.push(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn sum(&self) -> f64 {
        self.values.iter().sum()
    }

    pub fn mean(&self) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        Some(self.sum() / self.values.len() as f64)
    }
}

/// Mean energy per hour-of-day. Hours without samples have no expectation.
#[derive(Debug, Clone)]
pub struct HourlyProfile {
    hours: [Option<f64>; 24],
}

impl HourlyProfile {
    pub fn from_readings(readings: &[Reading]) -> Self {
        let mut buckets: [TimeSeries; 24] = Default::default();
        for r in readings {
            buckets[r.hour() as usize].push(r.energy_kwh);
        }
        let mut hours = [None; 24];
        for (slot, series) in hours.iter_mut().zip(buckets.iter()) {
            *slot = series.mean();
        }
        Self { hours }
    }

    pub fn expected(&self, hour: u32) -> Option<f64> {
        self.hours.get(hour as usize).copied().flatten()
    }
}

/// Group readings by calendar date, preserving order within each date.
pub fn group_by_date(readings: &[Reading]) -> BTreeMap<NaiveDate, Vec<&Reading>> {
    let mut grouped: BTreeMap<NaiveDate, Vec<&Reading>> = BTreeMap::new();
    for r in readings {
        grouped.entry(r.timestamp.date()).or_default().push(r);
    }
    grouped
}

/// Whether `hour` lies in `[start, end]`, wrapping past midnight when
/// `start > end` (e.g. 23..=5).
pub fn hour_in_range(hour: u32, start: u32, end: u32) -> bool {
    if start <= end {
        hour >= start && hour <= end
    } else {
        hour >= start || hour <= end
    }
}

/// Reject windows a detector cannot reason about.
pub fn validate(readings: &[Reading]) -> Result<(), DetectError> {
    let mut prev = None;
    for r in readings {
        if !r.energy_kwh.is_finite() || r.energy_kwh < 0.0 {
            return Err(DetectError::InvalidEnergy {
                at: r.timestamp,
                value: r.energy_kwh,
            });
        }
        if let Some(p) = prev {
            if r.timestamp < p {
                return Err(DetectError::OutOfOrder { at: r.timestamp });
            }
        }
        prev = Some(r.timestamp);
    }
    Ok(())
}
