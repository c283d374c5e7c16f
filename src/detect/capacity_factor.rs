//! Daily capacity factor outside the expected band.

use crate::config::CapacityFactorConfig;
use crate::detect::series::{group_by_date, validate, TimeSeries};
use crate::detect::{
    round_to, Candidate, Confidence, DetectError, Detector, Evidence, Period, Severity,
};
use crate::registry::Device;
use crate::telemetry::ReadingWindow;

/// Typical daily capacity factor for a healthy installation, in percent.
const TYPICAL_CAPACITY_FACTOR: f64 = 20.0;

pub struct CapacityFactorDetector {
    config: CapacityFactorConfig,
}

impl CapacityFactorDetector {
    pub fn new(config: CapacityFactorConfig) -> Self {
        Self { config }
    }
}

impl Detector for CapacityFactorDetector {
    fn name(&self) -> &'static str {
        "capacity_factor"
    }

    fn detect(&self, window: &ReadingWindow, device: &Device) -> Result<Vec<Candidate>, DetectError> {
        validate(window.readings())?;
        let capacity_kw = device.capacity_kw();
        if !(capacity_kw.is_finite() && capacity_kw > 0.0) {
            return Err(DetectError::InvalidCapacity(device.capacity_watts));
        }

        let cfg = &self.config;
        let max_daily_kwh = capacity_kw * 24.0;

        let mut abnormal = Vec::new();
        for (date, day) in group_by_date(window.readings()) {
            let total: f64 = day.iter().map(|r| r.energy_kwh).sum();
            let factor = total / max_daily_kwh * 100.0;
            if factor < cfg.normal_min_percent || factor > cfg.normal_max_percent {
                abnormal.push((date, factor));
            }
        }

        if abnormal.len() < cfg.min_abnormal_days {
            return Ok(Vec::new());
        }
        let (Some(&(first_day, _)), Some(&(last_day, _))) = (abnormal.first(), abnormal.last())
        else {
            return Ok(Vec::new());
        };
        let Some(period) = Period::new(
            first_day.and_time(chrono::NaiveTime::MIN),
            last_day.and_time(chrono::NaiveTime::MIN),
        ) else {
            return Ok(Vec::new());
        };

        let factors = TimeSeries::new(abnormal.iter().map(|(_, f)| *f).collect());
        let Some(average) = factors.mean() else {
            return Ok(Vec::new());
        };

        let severity =
            if average < cfg.critical_below_percent || average > cfg.critical_above_percent {
                Severity::Critical
            } else {
                Severity::Warning
            };
        let threshold = if average < TYPICAL_CAPACITY_FACTOR {
            cfg.normal_min_percent
        } else {
            cfg.normal_max_percent
        };

        Ok(vec![Candidate {
            severity,
            confidence: Confidence::High,
            period,
            description: format!(
                "Abnormal capacity factor: {average:.1}% over {} days (normal range: {}-{}%)",
                abnormal.len(),
                cfg.normal_min_percent,
                cfg.normal_max_percent
            ),
            evidence: Evidence::CapacityFactor {
                capacity_factor: round_to(average, 2),
                expected_value: TYPICAL_CAPACITY_FACTOR,
                actual_value: round_to(average, 2),
                threshold,
                abnormal_days: abnormal.len(),
            },
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::FindingKind;
    use crate::registry::fixtures;
    use crate::telemetry::{ts, Reading};

    fn detect(readings: Vec<Reading>) -> Vec<Candidate> {
        CapacityFactorDetector::new(CapacityFactorConfig::default())
            .detect(
                &ReadingWindow::new(readings),
                &fixtures::device("d1", "u1", 5000.0),
            )
            .unwrap()
    }

    /// One reading per date carrying the whole day's energy.
    fn daily(values: &[(&str, f64)]) -> Vec<Reading> {
        values
            .iter()
            .map(|(date, kwh)| Reading::new(ts(date, "12:00"), *kwh, 15))
            .collect()
    }

    #[test]
    fn test_three_low_days_yield_one_finding() {
        // 5 kW * 24 h = 120 kWh max; 7.2 kWh is a 6% capacity factor.
        let found = detect(daily(&[
            ("2024-06-01", 7.2),
            ("2024-06-02", 7.2),
            ("2024-06-03", 7.2),
        ]));
        assert_eq!(found.len(), 1);
        let c = &found[0];
        assert_eq!(c.kind(), FindingKind::CapacityFactor);
        assert_eq!(c.confidence, Confidence::High);
        assert_eq!(c.severity, Severity::Warning);
        assert_eq!(c.period.start, ts("2024-06-01", "00:00"));
        assert_eq!(c.period.end, ts("2024-06-03", "00:00"));
        match c.evidence {
            Evidence::CapacityFactor {
                capacity_factor,
                threshold,
                abnormal_days,
                ..
            } => {
                assert_eq!(capacity_factor, 6.0);
                assert_eq!(threshold, 10.0);
                assert_eq!(abnormal_days, 3);
            }
            _ => panic!("wrong evidence"),
        }
    }

    #[test]
    fn test_very_low_average_is_critical() {
        let found = detect(daily(&[
            ("2024-06-01", 1.0),
            ("2024-06-02", 2.0),
            ("2024-06-04", 0.5),
        ]));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].severity, Severity::Critical);
        assert_eq!(found[0].period.end, ts("2024-06-04", "00:00"));
    }

    #[test]
    fn test_very_high_average_is_critical() {
        // 48 kWh is a 40% capacity factor.
        let found = detect(daily(&[
            ("2024-06-01", 48.0),
            ("2024-06-02", 48.0),
            ("2024-06-03", 48.0),
        ]));
        assert_eq!(found[0].severity, Severity::Critical);
        match found[0].evidence {
            Evidence::CapacityFactor { threshold, .. } => assert_eq!(threshold, 30.0),
            _ => panic!("wrong evidence"),
        }
    }

    #[test]
    fn test_two_abnormal_days_are_not_enough() {
        let found = detect(daily(&[
            ("2024-06-01", 6.0),
            ("2024-06-02", 24.0),
            ("2024-06-03", 6.0),
        ]));
        assert!(found.is_empty());
    }
}
