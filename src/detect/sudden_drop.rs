//! Sudden drop against an hour-of-day baseline.

use crate::config::SuddenDropConfig;
use crate::detect::series::{validate, HourlyProfile};
use crate::detect::{
    round_to, Candidate, Confidence, DetectError, Detector, Evidence, Period, Severity,
};
use crate::registry::Device;
use crate::telemetry::ReadingWindow;

/// Splits the window into a baseline and a recent segment and flags recent
/// daytime readings that fall well below the baseline mean for their hour.
pub struct SuddenDropDetector {
    config: SuddenDropConfig,
}

impl SuddenDropDetector {
    pub fn new(config: SuddenDropConfig) -> Self {
        Self { config }
    }
}

impl Detector for SuddenDropDetector {
    fn name(&self) -> &'static str {
        "sudden_drop"
    }

    fn detect(&self, window: &ReadingWindow, _device: &Device) -> Result<Vec<Candidate>, DetectError> {
        let cfg = &self.config;
        let readings = window.readings();
        if readings.len() < cfg.min_readings {
            return Ok(Vec::new());
        }
        validate(readings)?;

        let split = (readings.len() as f64 * cfg.baseline_fraction).floor() as usize;
        let (baseline, recent) = readings.split_at(split.min(readings.len()));
        let profile = HourlyProfile::from_readings(baseline);

        let mut out = Vec::new();
        for r in recent {
            let hour = r.hour();
            if hour < cfg.day_start_hour || hour > cfg.day_end_hour {
                continue;
            }
            let Some(expected) = profile.expected(hour) else {
                continue;
            };
            if expected < cfg.min_expected {
                continue;
            }

            let actual = r.energy_kwh;
            let drop_percent = (expected - actual) * 100.0 / expected;
            if drop_percent <= cfg.drop_percent {
                continue;
            }

            // Exactly at the critical threshold stays a warning.
            let severity = if drop_percent > cfg.critical_drop_percent {
                Severity::Critical
            } else {
                Severity::Warning
            };

            out.push(Candidate {
                severity,
                confidence: Confidence::Medium,
                period: Period::instant(r.timestamp),
                description: format!(
                    "Energy generation dropped by {drop_percent:.1}% compared to expected output"
                ),
                evidence: Evidence::SuddenDrop {
                    expected_value: round_to(expected, 2),
                    actual_value: round_to(actual, 2),
                    drop_percent: round_to(drop_percent, 1),
                    threshold: cfg.drop_percent,
                },
            });
        }

        Ok(out)
    }
}
