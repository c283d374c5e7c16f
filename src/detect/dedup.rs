//! Suppresses candidates that repeat an incident already on record.

use chrono::{Duration, NaiveDateTime};

use crate::detect::{Candidate, FindingKind};
use crate::findings::Finding;

/// A candidate duplicates a live finding of the same kind on the same device
/// whose period starts within `window` of its own, in either direction.
pub struct DedupGate {
    window: Duration,
}

impl DedupGate {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    /// Split `candidates` into survivors and a suppressed count. `live` must
    /// be the device's open and acknowledged findings. Survivors join the
    /// comparison set, so one batch cannot report the same incident twice.
    pub fn filter(&self, candidates: Vec<Candidate>, live: &[Finding]) -> (Vec<Candidate>, usize) {
        let mut seen: Vec<(FindingKind, NaiveDateTime)> = live
            .iter()
            .filter(|f| f.status.is_live())
            .map(|f| (f.kind, f.affected_period.start))
            .collect();

        let mut survivors = Vec::new();
        let mut suppressed = 0;
        for candidate in candidates {
            let kind = candidate.kind();
            let start = candidate.period.start;
            let duplicate = seen
                .iter()
                .any(|(k, s)| *k == kind && self.within(start, *s));
            if duplicate {
                suppressed += 1;
                continue;
            }
            seen.push((kind, start));
            survivors.push(candidate);
        }
        (survivors, suppressed)
    }

    fn within(&self, a: NaiveDateTime, b: NaiveDateTime) -> bool {
        a - b <= self.window && b - a <= self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{Evidence, Period};
    use crate::findings::{fixtures, FindingStatus};
    use crate::telemetry::ts;

    fn gate() -> DedupGate {
        DedupGate::new(Duration::hours(24))
    }

    fn live_at(date: &str, time: &str) -> Finding {
        let mut f = fixtures::finding();
        f.affected_period = Period::instant(ts(date, time));
        f
    }

    #[test]
    fn test_nothing_on_record_lets_everything_through() {
        let (kept, dropped) = gate().filter(vec![fixtures::candidate("09:00")], &[]);
        assert_eq!(kept.len(), 1);
        assert_eq!(dropped, 0);
    }

    #[test]
    fn test_live_finding_within_window_suppresses() {
        let live = [live_at("2024-05-31", "12:00")];
        let (kept, dropped) = gate().filter(vec![fixtures::candidate("09:00")], &live);
        assert!(kept.is_empty());
        assert_eq!(dropped, 1);
    }

    #[test]
    fn test_window_is_symmetric() {
        // Existing finding starts after the candidate.
        let live = [live_at("2024-06-02", "08:00")];
        let (kept, _) = gate().filter(vec![fixtures::candidate("09:00")], &live);
        assert!(kept.is_empty());
    }

    #[test]
    fn test_outside_window_survives() {
        let live = [live_at("2024-05-30", "08:00")];
        let (kept, _) = gate().filter(vec![fixtures::candidate("09:00")], &live);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_other_kind_does_not_suppress() {
        let mut other = live_at("2024-06-01", "09:00");
        other.kind = FindingKind::ZeroGeneration;
        let (kept, _) = gate().filter(vec![fixtures::candidate("09:00")], &[other]);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_terminal_findings_are_ignored() {
        let mut resolved = live_at("2024-06-01", "09:00");
        resolved.status = FindingStatus::Resolved;
        let (kept, _) = gate().filter(vec![fixtures::candidate("09:00")], &[resolved]);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_duplicates_within_one_batch_collapse() {
        let (kept, dropped) = gate().filter(
            vec![fixtures::candidate("09:00"), fixtures::candidate("14:00")],
            &[],
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(dropped, 1);
        assert_eq!(kept[0].period.start, ts("2024-06-01", "09:00"));
    }

    #[test]
    fn test_irregular_checks_dedup_against_each_other() {
        let night = Candidate {
            evidence: Evidence::NighttimeGeneration {
                expected_value: 0.0,
                actual_value: 3.0,
                threshold: 0.0,
                night_readings: 3,
            },
            ..fixtures::candidate("09:00")
        };
        let erratic = Candidate {
            evidence: Evidence::ErraticFluctuation {
                actual_value: 9.0,
                threshold: 2.0,
                spike_count: 9,
                total_readings: 10,
            },
            ..fixtures::candidate("10:00")
        };
        let (kept, dropped) = gate().filter(vec![night, erratic], &[]);
        assert_eq!(kept.len(), 1);
        assert_eq!(dropped, 1);
    }
}
