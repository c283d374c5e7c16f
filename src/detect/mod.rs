//! Anomaly detectors, the dedup gate and the per-device engine.
//!
//! Detectors are pure: each takes one device's reading window and returns
//! candidate findings. Persistence and deduplication live in [`engine`] and
//! [`dedup`].

pub mod capacity_factor;
pub mod dedup;
pub mod engine;
pub mod irregular;
pub mod missing_data;
pub mod series;
pub mod sudden_drop;
pub mod zero_generation;

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::DetectionConfig;
use crate::error::EngineError;
use crate::registry::Device;
use crate::telemetry::ReadingWindow;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("reading at {at} has invalid energy value {value}")]
    InvalidEnergy { at: NaiveDateTime, value: f64 },

    #[error("readings out of order at {at}")]
    OutOfOrder { at: NaiveDateTime },

    #[error("device capacity must be positive, got {0}")]
    InvalidCapacity(f64),
}

/// Severity levels for findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Strength of the evidence behind a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// The five finding types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FindingKind {
    ZeroGeneration,
    SuddenDrop,
    CapacityFactor,
    IrregularPattern,
    MissingData,
}

macro_rules! str_enum {
    ($ty:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $s,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.pad(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = EngineError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_uppercase().as_str() {
                    $($s => Ok($ty::$variant),)+
                    other => Err(EngineError::Validation(format!(
                        "unknown {} '{}'",
                        stringify!($ty),
                        other
                    ))),
                }
            }
        }
    };
}

str_enum!(Severity {
    Info => "INFO",
    Warning => "WARNING",
    Critical => "CRITICAL",
});

str_enum!(Confidence {
    Low => "LOW",
    Medium => "MEDIUM",
    High => "HIGH",
});

str_enum!(FindingKind {
    ZeroGeneration => "ZERO_GENERATION",
    SuddenDrop => "SUDDEN_DROP",
    CapacityFactor => "CAPACITY_FACTOR",
    IrregularPattern => "IRREGULAR_PATTERN",
    MissingData => "MISSING_DATA",
});

impl FindingKind {
    pub const ALL: [FindingKind; 5] = [
        FindingKind::ZeroGeneration,
        FindingKind::SuddenDrop,
        FindingKind::CapacityFactor,
        FindingKind::IrregularPattern,
        FindingKind::MissingData,
    ];
}

/// Evidence window bounds. Always `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Period {
    /// Returns `None` if the bounds are inverted.
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    pub fn instant(at: NaiveDateTime) -> Self {
        Self { start: at, end: at }
    }
}

/// Structured evidence, one variant per detector check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum Evidence {
    ZeroGeneration {
        expected_value: f64,
        actual_value: f64,
        threshold: f64,
        peak_readings: usize,
        duration_minutes: u32,
    },
    SuddenDrop {
        expected_value: f64,
        actual_value: f64,
        drop_percent: f64,
        threshold: f64,
    },
    CapacityFactor {
        capacity_factor: f64,
        expected_value: f64,
        actual_value: f64,
        threshold: f64,
        abnormal_days: usize,
    },
    NighttimeGeneration {
        expected_value: f64,
        actual_value: f64,
        threshold: f64,
        night_readings: usize,
    },
    ErraticFluctuation {
        actual_value: f64,
        threshold: f64,
        spike_count: usize,
        total_readings: usize,
    },
    MissingData {
        gap_duration: f64,
        expected_value: f64,
        actual_value: f64,
        threshold: f64,
    },
}

impl Evidence {
    pub fn kind(&self) -> FindingKind {
        match self {
            Evidence::ZeroGeneration { .. } => FindingKind::ZeroGeneration,
            Evidence::SuddenDrop { .. } => FindingKind::SuddenDrop,
            Evidence::CapacityFactor { .. } => FindingKind::CapacityFactor,
            Evidence::NighttimeGeneration { .. } | Evidence::ErraticFluctuation { .. } => {
                FindingKind::IrregularPattern
            }
            Evidence::MissingData { .. } => FindingKind::MissingData,
        }
    }
}

/// A detection not yet checked against existing findings.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub severity: Severity,
    pub confidence: Confidence,
    pub period: Period,
    pub description: String,
    pub evidence: Evidence,
}

impl Candidate {
    pub fn kind(&self) -> FindingKind {
        self.evidence.kind()
    }
}

/// A stateless anomaly check over one device's reading window.
pub trait Detector: Send + Sync {
    fn name(&self) -> &'static str;

    fn detect(&self, window: &ReadingWindow, device: &Device) -> Result<Vec<Candidate>, DetectError>;
}

/// The full detector set, configured from `config`.
pub fn detectors(config: &DetectionConfig) -> Vec<Box<dyn Detector>> {
    vec![
        Box::new(zero_generation::ZeroGenerationDetector::new(
            config.zero_generation.clone(),
        )),
        Box::new(sudden_drop::SuddenDropDetector::new(config.sudden_drop.clone())),
        Box::new(capacity_factor::CapacityFactorDetector::new(
            config.capacity_factor.clone(),
        )),
        Box::new(irregular::IrregularPatternDetector::new(
            config.irregular_pattern.clone(),
        )),
        Box::new(missing_data::MissingDataDetector::new(
            config.missing_data.clone(),
            config.nominal_interval_minutes,
        )),
    ]
}

/// Round to `places` decimals for reported evidence.
pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_honours_column_width() {
        assert_eq!(format!("{:<10}|", Severity::Warning), "WARNING   |");
        assert_eq!(format!("{:<17}|", FindingKind::ZeroGeneration), "ZERO_GENERATION  |");
    }

    #[test]
    fn test_kind_roundtrips_through_str() {
        for kind in FindingKind::ALL {
            assert_eq!(kind.as_str().parse::<FindingKind>().unwrap(), kind);
        }
        assert_eq!(
            "sudden_drop".parse::<FindingKind>().unwrap(),
            FindingKind::SuddenDrop
        );
        assert!("SPIKE".parse::<FindingKind>().is_err());
    }

    #[test]
    fn test_period_rejects_inverted_bounds() {
        let a = crate::telemetry::ts("2024-06-01", "10:00");
        let b = crate::telemetry::ts("2024-06-01", "11:00");
        assert!(Period::new(a, b).is_some());
        assert!(Period::new(b, a).is_none());
    }

    #[test]
    fn test_both_irregular_checks_share_a_kind() {
        let night = Evidence::NighttimeGeneration {
            expected_value: 0.0,
            actual_value: 3.0,
            threshold: 0.0,
            night_readings: 3,
        };
        let erratic = Evidence::ErraticFluctuation {
            actual_value: 10.0,
            threshold: 4.0,
            spike_count: 10,
            total_readings: 20,
        };
        assert_eq!(night.kind(), FindingKind::IrregularPattern);
        assert_eq!(erratic.kind(), FindingKind::IrregularPattern);
    }

    #[test]
    fn test_evidence_serializes_with_check_tag() {
        let ev = Evidence::MissingData {
            gap_duration: 3.0,
            expected_value: 0.25,
            actual_value: 3.0,
            threshold: 2.0,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["check"], "missing_data");
        assert_eq!(json["gap_duration"], 3.0);
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(69.96, 1), 70.0);
        assert_eq!(round_to(3.14159, 2), 3.14);
    }
}
