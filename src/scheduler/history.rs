//! Execution history for detection passes.

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineResult;
use crate::storage::{fmt_ts, Db};

/// What started a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunTrigger {
    Scheduled,
    Admin { user_id: String },
    User { user_id: String },
    Cli,
}

impl RunTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunTrigger::Scheduled => "SCHEDULED",
            RunTrigger::Admin { .. } => "ADMIN",
            RunTrigger::User { .. } => "USER",
            RunTrigger::Cli => "CLI",
        }
    }
}

/// Result of one device's detection run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceRunOutcome {
    pub device_id: String,
    /// Candidates produced by all detectors, before dedup.
    pub candidates: usize,
    pub created: usize,
    pub suppressed: usize,
    /// Detectors that errored and were skipped for this device.
    pub detectors_failed: Vec<String>,
    pub skipped_no_data: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceFailure {
    pub device_id: String,
    pub error: String,
}

/// Summary of a fleet or per-user pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetRunReport {
    pub id: Uuid,
    pub trigger: RunTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub devices_scanned: usize,
    pub devices_skipped: usize,
    pub findings_created: usize,
    pub findings_suppressed: usize,
    pub failures: Vec<DeviceFailure>,
}

impl FleetRunReport {
    pub fn start(trigger: RunTrigger, started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            trigger,
            started_at,
            finished_at: started_at,
            devices_scanned: 0,
            devices_skipped: 0,
            findings_created: 0,
            findings_suppressed: 0,
            failures: Vec::new(),
        }
    }

    pub fn record_outcome(&mut self, outcome: &DeviceRunOutcome) {
        self.devices_scanned += 1;
        if outcome.skipped_no_data {
            self.devices_skipped += 1;
        }
        self.findings_created += outcome.created;
        self.findings_suppressed += outcome.suppressed;
    }

    pub fn record_failure(&mut self, device_id: &str, error: impl ToString) {
        self.devices_scanned += 1;
        self.failures.push(DeviceFailure {
            device_id: device_id.to_string(),
            error: error.to_string(),
        });
    }

    pub fn devices_failed(&self) -> usize {
        self.failures.len()
    }
}

/// The `fleet_runs` table.
#[derive(Clone)]
pub struct RunHistory {
    db: Db,
}

impl RunHistory {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn record(&self, report: &FleetRunReport) -> EngineResult<()> {
        let report = report.clone();
        self.db
            .call("record_run", move |conn| {
                conn.execute(
                    "INSERT INTO fleet_runs (id, trigger_kind, devices_scanned, devices_skipped,
                        devices_failed, findings_created, findings_suppressed, report_json,
                        started_at, finished_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        report.id.to_string(),
                        report.trigger.as_str(),
                        report.devices_scanned as i64,
                        report.devices_skipped as i64,
                        report.devices_failed() as i64,
                        report.findings_created as i64,
                        report.findings_suppressed as i64,
                        serde_json::to_string(&report)?,
                        fmt_ts(&report.started_at.naive_utc()),
                        fmt_ts(&report.finished_at.naive_utc()),
                    ],
                )?;
                Ok(())
            })
            .await
    }

    /// Newest first.
    pub async fn recent(&self, limit: usize) -> EngineResult<Vec<FleetRunReport>> {
        let limit = limit as i64;
        self.db
            .call("recent_runs", move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT report_json FROM fleet_runs ORDER BY started_at DESC, rowid DESC LIMIT ?1",
                )?;
                let rows = stmt.query_map(params![limit], |r| r.get::<_, String>(0))?;
                let mut out = Vec::new();
                for r in rows {
                    out.push(serde_json::from_str(&r?)?);
                }
                Ok(out)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testutil::test_db;

    #[test]
    fn test_report_tallies_outcomes() {
        let mut report = FleetRunReport::start(RunTrigger::Scheduled, Utc::now());
        report.record_outcome(&DeviceRunOutcome {
            device_id: "d1".into(),
            candidates: 3,
            created: 2,
            suppressed: 1,
            ..Default::default()
        });
        report.record_outcome(&DeviceRunOutcome {
            device_id: "d2".into(),
            skipped_no_data: true,
            ..Default::default()
        });
        report.record_failure("d3", "store unavailable");

        assert_eq!(report.devices_scanned, 3);
        assert_eq!(report.devices_skipped, 1);
        assert_eq!(report.devices_failed(), 1);
        assert_eq!(report.findings_created, 2);
        assert_eq!(report.findings_suppressed, 1);
    }

    #[tokio::test]
    async fn test_history_roundtrip_newest_first() {
        let t = test_db();
        let history = RunHistory::new(t.db.clone());
        let first = FleetRunReport::start(RunTrigger::Scheduled, Utc::now() - chrono::Duration::hours(1));
        let second = FleetRunReport::start(
            RunTrigger::Admin {
                user_id: "admin".into(),
            },
            Utc::now(),
        );
        history.record(&first).await.unwrap();
        history.record(&second).await.unwrap();

        let runs = history.recent(10).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, second.id);
        assert_eq!(runs[1].trigger, RunTrigger::Scheduled);

        assert_eq!(history.recent(1).await.unwrap().len(), 1);
    }
}
