//! Zero generation during peak hours.

use crate::config::ZeroGenerationConfig;
use crate::detect::series::{group_by_date, hour_in_range, validate};
use crate::detect::{Candidate, Confidence, DetectError, Detector, Evidence, Period, Severity};
use crate::registry::Device;
use crate::telemetry::ReadingWindow;

/// Flags dates on which every peak-hour reading is zero.
pub struct ZeroGenerationDetector {
    config: ZeroGenerationConfig,
}

impl ZeroGenerationDetector {
    pub fn new(config: ZeroGenerationConfig) -> Self {
        Self { config }
    }
}

impl Detector for ZeroGenerationDetector {
    fn name(&self) -> &'static str {
        "zero_generation"
    }

    fn detect(&self, window: &ReadingWindow, device: &Device) -> Result<Vec<Candidate>, DetectError> {
        validate(window.readings())?;
        if !(device.capacity_watts.is_finite() && device.capacity_watts > 0.0) {
            return Err(DetectError::InvalidCapacity(device.capacity_watts));
        }

        let cfg = &self.config;
        let mut out = Vec::new();

        for (_date, day) in group_by_date(window.readings()) {
            let peak: Vec<_> = day
                .into_iter()
                .filter(|r| hour_in_range(r.hour(), cfg.peak_start_hour, cfg.peak_end_hour))
                .collect();

            if peak.len() < cfg.min_peak_readings || !peak.iter().all(|r| r.energy_kwh == 0.0) {
                continue;
            }
            let (Some(first), Some(last)) = (peak.first(), peak.last()) else {
                continue;
            };
            let Some(period) = Period::new(first.timestamp, last.timestamp) else {
                continue;
            };

            let duration_minutes: u32 = peak.iter().map(|r| r.interval_minutes).sum();
            let severity = if duration_minutes >= cfg.critical_duration_minutes {
                Severity::Critical
            } else {
                Severity::Warning
            };

            out.push(Candidate {
                severity,
                confidence: Confidence::High,
                period,
                description: format!(
                    "No energy generation detected during peak hours ({duration_minutes} minutes of zero output)"
                ),
                evidence: Evidence::ZeroGeneration {
                    expected_value: device.capacity_watts * cfg.expected_peak_ratio,
                    actual_value: 0.0,
                    threshold: 0.0,
                    peak_readings: peak.len(),
                    duration_minutes,
                },
            });
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::FindingKind;
    use crate::registry::fixtures;
    use crate::telemetry::{ts, Reading};

    fn detector() -> ZeroGenerationDetector {
        ZeroGenerationDetector::new(ZeroGenerationConfig::default())
    }

    #[test]
    fn test_three_zero_peak_readings_is_warning() {
        let window = ReadingWindow::new(vec![
            Reading::new(ts("2024-06-01", "10:00"), 0.0, 15),
            Reading::new(ts("2024-06-01", "10:15"), 0.0, 15),
            Reading::new(ts("2024-06-01", "10:30"), 0.0, 15),
        ]);
        let device = fixtures::device("d1", "u1", 5000.0);

        let found = detector().detect(&window, &device).unwrap();
        assert_eq!(found.len(), 1);
        let c = &found[0];
        assert_eq!(c.kind(), FindingKind::ZeroGeneration);
        assert_eq!(c.severity, Severity::Warning);
        assert_eq!(c.confidence, Confidence::High);
        assert_eq!(c.period.start, ts("2024-06-01", "10:00"));
        assert_eq!(c.period.end, ts("2024-06-01", "10:30"));
        match &c.evidence {
            Evidence::ZeroGeneration {
                expected_value,
                actual_value,
                duration_minutes,
                ..
            } => {
                assert_eq!(*expected_value, 3500.0);
                assert_eq!(*actual_value, 0.0);
                assert_eq!(*duration_minutes, 45);
            }
            other => panic!("unexpected evidence {other:?}"),
        }
    }

    #[test]
    fn test_full_dead_peak_is_critical() {
        // 10:00 through 15:45 at 15-minute spacing: 24 readings, 360 minutes.
        let base = ts("2024-06-01", "10:00");
        let readings = (0..24)
            .map(|i| Reading::new(base + chrono::Duration::minutes(15 * i), 0.0, 15))
            .collect();
        let found = detector()
            .detect(&ReadingWindow::new(readings), &fixtures::device("d1", "u1", 5000.0))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].severity, Severity::Critical);
    }

    #[test]
    fn test_any_nonzero_peak_reading_clears_the_day() {
        let window = ReadingWindow::new(vec![
            Reading::new(ts("2024-06-01", "10:00"), 0.0, 15),
            Reading::new(ts("2024-06-01", "11:00"), 0.4, 15),
            Reading::new(ts("2024-06-01", "12:00"), 0.0, 15),
        ]);
        let found = detector()
            .detect(&window, &fixtures::device("d1", "u1", 5000.0))
            .unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_single_peak_reading_is_not_enough() {
        let window = ReadingWindow::new(vec![
            Reading::new(ts("2024-06-01", "09:45"), 0.0, 15),
            Reading::new(ts("2024-06-01", "12:00"), 0.0, 15),
            Reading::new(ts("2024-06-01", "16:00"), 0.0, 15),
        ]);
        let found = detector()
            .detect(&window, &fixtures::device("d1", "u1", 5000.0))
            .unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_one_finding_per_qualifying_date() {
        let window = ReadingWindow::new(vec![
            Reading::new(ts("2024-06-01", "10:00"), 0.0, 15),
            Reading::new(ts("2024-06-01", "14:00"), 0.0, 15),
            Reading::new(ts("2024-06-02", "10:00"), 2.0, 15),
            Reading::new(ts("2024-06-02", "14:00"), 2.0, 15),
            Reading::new(ts("2024-06-03", "11:00"), 0.0, 15),
            Reading::new(ts("2024-06-03", "15:30"), 0.0, 15),
        ]);
        let found = detector()
            .detect(&window, &fixtures::device("d1", "u1", 5000.0))
            .unwrap();
        let starts: Vec<_> = found.iter().map(|c| c.period.start).collect();
        assert_eq!(
            starts,
            vec![ts("2024-06-01", "10:00"), ts("2024-06-03", "11:00")]
        );
    }

    #[test]
    fn test_zero_capacity_is_a_detector_error() {
        let window = ReadingWindow::new(vec![Reading::new(ts("2024-06-01", "10:00"), 0.0, 15)]);
        let err = detector()
            .detect(&window, &fixtures::device("d1", "u1", 0.0))
            .unwrap_err();
        assert!(matches!(err, DetectError::InvalidCapacity(_)));
    }
}
