//! Reporting gaps during operational hours.

use crate::config::MissingDataConfig;
use crate::detect::series::validate;
use crate::detect::{
    round_to, Candidate, Confidence, DetectError, Detector, Evidence, Period, Severity,
};
use crate::registry::Device;
use crate::telemetry::ReadingWindow;

pub struct MissingDataDetector {
    config: MissingDataConfig,
    nominal_interval_minutes: u32,
}

impl MissingDataDetector {
    pub fn new(config: MissingDataConfig, nominal_interval_minutes: u32) -> Self {
        Self {
            config,
            nominal_interval_minutes,
        }
    }
}

impl Detector for MissingDataDetector {
    fn name(&self) -> &'static str {
        "missing_data"
    }

    fn detect(&self, window: &ReadingWindow, _device: &Device) -> Result<Vec<Candidate>, DetectError> {
        let readings = window.readings();
        validate(readings)?;
        let cfg = &self.config;

        let mut out = Vec::new();
        for pair in readings.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            let gap_hours = (next.timestamp - prev.timestamp).num_seconds() as f64 / 3600.0;

            // The gap counts only if the last report before it was in operational hours.
            let hour = prev.hour();
            if hour < cfg.operational_start_hour || hour > cfg.operational_end_hour {
                continue;
            }
            if gap_hours <= cfg.max_gap_hours {
                continue;
            }
            let Some(period) = Period::new(prev.timestamp, next.timestamp) else {
                continue;
            };

            let severity = if gap_hours > cfg.critical_gap_hours {
                Severity::Critical
            } else {
                Severity::Warning
            };
            let expected_interval = if prev.interval_minutes > 0 {
                prev.interval_minutes
            } else {
                self.nominal_interval_minutes
            };

            out.push(Candidate {
                severity,
                confidence: Confidence::High,
                period,
                description: format!("Data reporting gap of {gap_hours:.1} hours detected"),
                evidence: Evidence::MissingData {
                    gap_duration: round_to(gap_hours, 1),
                    expected_value: expected_interval as f64 / 60.0,
                    actual_value: round_to(gap_hours, 1),
                    threshold: cfg.max_gap_hours,
                },
            });
        }

        Ok(out)
    }
}
