//! Findings -- persisted anomaly records and their status lifecycle.
//!
//! ```text
//! OPEN --acknowledge--> ACKNOWLEDGED
//! OPEN | ACKNOWLEDGED --resolve--> RESOLVED          (terminal)
//! OPEN | ACKNOWLEDGED --false positive--> FALSE_POSITIVE (terminal)
//! ```

pub mod filter;
pub mod store;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::detect::{Candidate, Confidence, Evidence, FindingKind, Period, Severity};
use crate::error::{EngineError, EngineResult};

pub use filter::{FindingFilter, FindingQuery};
pub use store::{FindingStats, FindingStore, FleetSummary, Scope};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FindingStatus {
    Open,
    Acknowledged,
    Resolved,
    FalsePositive,
}

impl FindingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingStatus::Open => "OPEN",
            FindingStatus::Acknowledged => "ACKNOWLEDGED",
            FindingStatus::Resolved => "RESOLVED",
            FindingStatus::FalsePositive => "FALSE_POSITIVE",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, FindingStatus::Resolved | FindingStatus::FalsePositive)
    }

    /// Open or acknowledged: the incident is still live.
    pub fn is_live(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for FindingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for FindingStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "OPEN" => Ok(FindingStatus::Open),
            "ACKNOWLEDGED" => Ok(FindingStatus::Acknowledged),
            "RESOLVED" => Ok(FindingStatus::Resolved),
            "FALSE_POSITIVE" => Ok(FindingStatus::FalsePositive),
            other => Err(EngineError::Validation(format!(
                "unknown finding status '{other}'"
            ))),
        }
    }
}

/// A persisted anomaly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: Uuid,
    pub device_id: String,
    /// Owner at detection time, copied from the device.
    pub user_id: String,
    pub kind: FindingKind,
    pub severity: Severity,
    pub confidence: Confidence,
    pub affected_period: Period,
    pub description: String,
    pub details: Evidence,
    pub status: FindingStatus,
    pub detected_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolution_notes: Option<String>,
}

impl Finding {
    /// A new OPEN finding for `device_id` from a surviving candidate.
    pub fn from_candidate(
        candidate: Candidate,
        device_id: &str,
        user_id: &str,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            device_id: device_id.to_string(),
            user_id: user_id.to_string(),
            kind: candidate.kind(),
            severity: candidate.severity,
            confidence: candidate.confidence,
            affected_period: candidate.period,
            description: candidate.description,
            details: candidate.evidence,
            status: FindingStatus::Open,
            detected_at,
            resolved_at: None,
            resolved_by: None,
            resolution_notes: None,
        }
    }

    /// Apply a status transition in place. On error the finding is unchanged.
    pub fn apply(
        &mut self,
        transition: &Transition,
        actor: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        let next = transition.next_status(self.status)?;
        match transition {
            Transition::Acknowledge => {}
            Transition::Resolve { notes } => {
                self.resolved_at = Some(now);
                self.resolved_by = Some(actor.to_string());
                self.resolution_notes = Some(notes.trim().to_string());
            }
            Transition::MarkFalsePositive { notes } => {
                self.resolved_at = Some(now);
                self.resolved_by = Some(actor.to_string());
                self.resolution_notes = Some(
                    notes
                        .as_deref()
                        .map(str::trim)
                        .filter(|n| !n.is_empty())
                        .unwrap_or("Marked as false positive")
                        .to_string(),
                );
            }
        }
        self.status = next;
        Ok(())
    }
}

/// A user-requested status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Acknowledge,
    Resolve { notes: String },
    MarkFalsePositive { notes: Option<String> },
}

impl Transition {
    pub fn verb(&self) -> &'static str {
        match self {
            Transition::Acknowledge => "acknowledge",
            Transition::Resolve { .. } => "resolve",
            Transition::MarkFalsePositive { .. } => "mark as false positive",
        }
    }

    /// The status this transition leads to from `current`, or why it cannot.
    pub fn next_status(&self, current: FindingStatus) -> EngineResult<FindingStatus> {
        let conflict = || EngineError::Conflict {
            current: current.to_string(),
            attempted: self.verb(),
        };
        match self {
            Transition::Acknowledge => {
                if current != FindingStatus::Open {
                    return Err(conflict());
                }
                Ok(FindingStatus::Acknowledged)
            }
            Transition::Resolve { notes } => {
                if current.is_terminal() {
                    return Err(conflict());
                }
                if notes.trim().is_empty() {
                    return Err(EngineError::Validation(
                        "resolution notes are required to resolve a finding".into(),
                    ));
                }
                Ok(FindingStatus::Resolved)
            }
            Transition::MarkFalsePositive { .. } => {
                if current.is_terminal() {
                    return Err(conflict());
                }
                Ok(FindingStatus::FalsePositive)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::telemetry::ts;

    pub fn candidate(time: &str) -> Candidate {
        let at = ts("2024-06-01", time);
        Candidate {
            severity: Severity::Warning,
            confidence: Confidence::High,
            period: Period::instant(at),
            description: "gap".into(),
            evidence: Evidence::MissingData {
                gap_duration: 3.0,
                expected_value: 0.25,
                actual_value: 3.0,
                threshold: 2.0,
            },
        }
    }

    pub fn finding() -> Finding {
        Finding::from_candidate(candidate("09:00"), "d1", "u1", Utc::now())
    }
}
