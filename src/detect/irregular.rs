//! Irregular patterns: generation at night and erratic fluctuation.

use crate::config::IrregularPatternConfig;
use crate::detect::series::{hour_in_range, validate};
use crate::detect::{Candidate, Confidence, DetectError, Detector, Evidence, Period, Severity};
use crate::registry::Device;
use crate::telemetry::{Reading, ReadingWindow};

/// Runs two independent checks; each may emit its own finding.
pub struct IrregularPatternDetector {
    config: IrregularPatternConfig,
}

impl IrregularPatternDetector {
    pub fn new(config: IrregularPatternConfig) -> Self {
        Self { config }
    }

    fn nighttime(&self, readings: &[Reading]) -> Option<Candidate> {
        let cfg = &self.config;
        let night: Vec<&Reading> = readings
            .iter()
            .filter(|r| {
                hour_in_range(r.hour(), cfg.night_start_hour, cfg.night_end_hour)
                    && r.energy_kwh > cfg.night_energy_threshold
            })
            .collect();

        if night.len() < cfg.night_min_occurrences {
            return None;
        }
        let period = Period::new(night.first()?.timestamp, night.last()?.timestamp)?;

        Some(Candidate {
            severity: Severity::Warning,
            confidence: Confidence::Medium,
            period,
            description: format!(
                "Unexpected energy generation detected during nighttime hours ({} occurrences)",
                night.len()
            ),
            evidence: Evidence::NighttimeGeneration {
                expected_value: 0.0,
                actual_value: night.len() as f64,
                threshold: 0.0,
                night_readings: night.len(),
            },
        })
    }

    fn erratic(&self, readings: &[Reading]) -> Option<Candidate> {
        let cfg = &self.config;
        if readings.is_empty() {
            return None;
        }

        let spikes = readings
            .windows(2)
            .filter(|pair| {
                let (prev, cur) = (pair[0].energy_kwh, pair[1].energy_kwh);
                prev != 0.0 && cur != 0.0 && ((cur - prev) / prev).abs() * 100.0 > cfg.fluctuation_percent
            })
            .count();

        let total = readings.len();
        if (spikes as f64 / total as f64) <= cfg.max_spike_rate {
            return None;
        }
        let period = Period::new(readings.first()?.timestamp, readings.last()?.timestamp)?;

        Some(Candidate {
            severity: Severity::Warning,
            confidence: Confidence::Low,
            period,
            description: format!("Highly erratic generation pattern with {spikes} sharp fluctuations"),
            evidence: Evidence::ErraticFluctuation {
                actual_value: spikes as f64,
                threshold: total as f64 * cfg.max_spike_rate,
                spike_count: spikes,
                total_readings: total,
            },
        })
    }
}

impl Detector for IrregularPatternDetector {
    fn name(&self) -> &'static str {
        "irregular_pattern"
    }

    fn detect(&self, window: &ReadingWindow, _device: &Device) -> Result<Vec<Candidate>, DetectError> {
        let readings = window.readings();
        validate(readings)?;
        Ok(self
            .nighttime(readings)
            .into_iter()
            .chain(self.erratic(readings))
            .collect())
    }
}
