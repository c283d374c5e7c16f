//! SQLite-backed finding persistence.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::Serialize;
use uuid::Uuid;

use crate::detect::{FindingKind, Period};
use crate::error::{EngineError, EngineResult};
use crate::findings::{Finding, FindingFilter, FindingStatus, Transition};
use crate::storage::{fmt_ts, parse_ts, Db};

/// Whose findings an operation may see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    User(String),
    Fleet,
}

impl Scope {
    fn user_id(&self) -> Option<String> {
        match self {
            Scope::User(id) => Some(id.clone()),
            Scope::Fleet => None,
        }
    }

    fn permits(&self, finding: &Finding) -> bool {
        match self {
            Scope::User(id) => finding.user_id == *id,
            Scope::Fleet => true,
        }
    }
}

/// Aggregate counts over a scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FindingStats {
    pub total: u64,
    pub open: u64,
    /// Live (open or acknowledged) findings by severity.
    pub critical: u64,
    pub warning: u64,
    pub by_type: BTreeMap<FindingKind, u64>,
}

/// Fleet-wide stats for the admin dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct FleetSummary {
    #[serde(flatten)]
    pub stats: FindingStats,
    pub by_severity: BTreeMap<String, u64>,
    pub recent: Vec<Finding>,
}

/// Result of persisting one device's surviving candidates.
#[derive(Debug, Default)]
pub struct InsertOutcome {
    pub inserted: Vec<Finding>,
    /// Rows the live-incident index turned away.
    pub suppressed: usize,
}

const FINDING_COLUMNS: &str = "id, device_id, user_id, kind, severity, confidence, \
     period_start, period_end, description, evidence_json, status, detected_at, \
     resolved_at, resolved_by, resolution_notes";

fn finding_from_row(row: &Row<'_>) -> EngineResult<Finding> {
    let id: String = row.get(0)?;
    let start = parse_ts(&row.get::<_, String>(6)?)?;
    let end = parse_ts(&row.get::<_, String>(7)?)?;
    let resolved_at: Option<String> = row.get(12)?;

    Ok(Finding {
        id: Uuid::parse_str(&id)
            .map_err(|e| EngineError::Internal(format!("bad finding id '{id}': {e}")))?,
        device_id: row.get(1)?,
        user_id: row.get(2)?,
        kind: row.get::<_, String>(3)?.parse()?,
        severity: row.get::<_, String>(4)?.parse()?,
        confidence: row.get::<_, String>(5)?.parse()?,
        affected_period: Period::new(start, end)
            .ok_or_else(|| EngineError::Internal(format!("finding {id} has inverted period")))?,
        description: row.get(8)?,
        details: serde_json::from_str(&row.get::<_, String>(9)?)?,
        status: row.get::<_, String>(10)?.parse()?,
        detected_at: parse_ts(&row.get::<_, String>(11)?)?.and_utc(),
        resolved_at: resolved_at
            .as_deref()
            .map(parse_ts)
            .transpose()?
            .map(|t| t.and_utc()),
        resolved_by: row.get(13)?,
        resolution_notes: row.get(14)?,
    })
}

fn utc_text(t: &DateTime<Utc>) -> String {
    fmt_ts(&t.naive_utc())
}

fn load(conn: &Connection, id: &str) -> EngineResult<Option<Finding>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {FINDING_COLUMNS} FROM findings WHERE id = ?1"
    ))?;
    let mut rows = stmt.query(params![id])?;
    match rows.next()? {
        Some(row) => Ok(Some(finding_from_row(row)?)),
        None => Ok(None),
    }
}

fn load_scoped(conn: &Connection, id: Uuid, scope: &Scope) -> EngineResult<Finding> {
    let finding =
        load(conn, &id.to_string())?.ok_or_else(|| EngineError::not_found("finding", id))?;
    if !scope.permits(&finding) {
        return Err(EngineError::Unauthorized);
    }
    Ok(finding)
}

#[derive(Clone)]
pub struct FindingStore {
    db: Db,
}

impl FindingStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Persist a batch in one transaction. A finding that collides with a
    /// live incident for the same device, kind and day is dropped.
    pub async fn insert_batch(&self, findings: Vec<Finding>) -> EngineResult<InsertOutcome> {
        if findings.is_empty() {
            return Ok(InsertOutcome::default());
        }
        self.db
            .call("insert_findings", move |conn| {
                let tx = conn.transaction()?;
                let mut outcome = InsertOutcome::default();
                {
                    let mut stmt = tx.prepare(
                        "INSERT INTO findings (id, device_id, user_id, kind, severity, confidence,
                            period_start, period_end, description, evidence_json, status,
                            detected_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
                         ON CONFLICT DO NOTHING",
                    )?;
                    for f in &findings {
                        let changed = stmt.execute(params![
                            f.id.to_string(),
                            f.device_id,
                            f.user_id,
                            f.kind.as_str(),
                            f.severity.as_str(),
                            f.confidence.as_str(),
                            fmt_ts(&f.affected_period.start),
                            fmt_ts(&f.affected_period.end),
                            f.description,
                            serde_json::to_string(&f.details)?,
                            f.status.as_str(),
                            utc_text(&f.detected_at),
                        ])?;
                        if changed == 0 {
                            outcome.suppressed += 1;
                        } else {
                            outcome.inserted.push(f.clone());
                        }
                    }
                }
                tx.commit()?;
                Ok(outcome)
            })
            .await
    }

    /// Open and acknowledged findings for one device, oldest period first.
    pub async fn live_for_device(&self, device_id: &str) -> EngineResult<Vec<Finding>> {
        let device_id = device_id.to_string();
        self.db
            .call("live_findings", move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {FINDING_COLUMNS} FROM findings
                     WHERE device_id = ?1 AND status IN ('OPEN', 'ACKNOWLEDGED')
                     ORDER BY period_start"
                ))?;
                let mut rows = stmt.query(params![device_id])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(finding_from_row(row)?);
                }
                Ok(out)
            })
            .await
    }

    /// Findings in `scope` matching `filter`, newest first.
    pub async fn list(&self, scope: &Scope, filter: &FindingFilter) -> EngineResult<Vec<Finding>> {
        let user_id = scope.user_id();
        let kind = filter.kind.map(|k| k.as_str());
        let severity = filter.severity.map(|s| s.as_str());
        let status = filter.status.map(|s| s.as_str());
        let from = filter.detected_from.as_ref().map(utc_text);
        let to = filter.detected_to.as_ref().map(utc_text);
        let limit = filter.limit as i64;

        self.db
            .call("list_findings", move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {FINDING_COLUMNS} FROM findings
                     WHERE (?1 IS NULL OR user_id = ?1)
                       AND (?2 IS NULL OR kind = ?2)
                       AND (?3 IS NULL OR severity = ?3)
                       AND (?4 IS NULL OR status = ?4)
                       AND (?5 IS NULL OR detected_at >= ?5)
                       AND (?6 IS NULL OR detected_at <= ?6)
                     ORDER BY detected_at DESC, id
                     LIMIT ?7"
                ))?;
                let mut rows =
                    stmt.query(params![user_id, kind, severity, status, from, to, limit])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(finding_from_row(row)?);
                }
                Ok(out)
            })
            .await
    }

    /// One finding; `Unauthorized` if it belongs to another user.
    pub async fn get(&self, id: Uuid, scope: &Scope) -> EngineResult<Finding> {
        let scope = scope.clone();
        self.db
            .call("get_finding", move |conn| load_scoped(conn, id, &scope))
            .await
    }

    /// Apply a lifecycle transition and persist it. The update is guarded on
    /// the status that was read, so a concurrent change surfaces as a
    /// conflict instead of being overwritten.
    pub async fn transition(
        &self,
        id: Uuid,
        scope: &Scope,
        actor: &str,
        transition: Transition,
        now: DateTime<Utc>,
    ) -> EngineResult<Finding> {
        let scope = scope.clone();
        let actor = actor.to_string();
        self.db
            .call("transition_finding", move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let mut finding = load_scoped(&tx, id, &scope)?;
                let previous = finding.status;
                finding.apply(&transition, &actor, now)?;

                let changed = tx.execute(
                    "UPDATE findings
                     SET status = ?1, resolved_at = ?2, resolved_by = ?3,
                         resolution_notes = ?4, updated_at = ?5
                     WHERE id = ?6 AND status = ?7",
                    params![
                        finding.status.as_str(),
                        finding.resolved_at.as_ref().map(utc_text),
                        finding.resolved_by,
                        finding.resolution_notes,
                        utc_text(&now),
                        id.to_string(),
                        previous.as_str(),
                    ],
                )?;
                if changed == 0 {
                    let current = tx
                        .query_row(
                            "SELECT status FROM findings WHERE id = ?1",
                            params![id.to_string()],
                            |r| r.get::<_, String>(0),
                        )
                        .optional()?
                        .unwrap_or_else(|| previous.to_string());
                    return Err(EngineError::Conflict {
                        current,
                        attempted: transition.verb(),
                    });
                }
                tx.commit()?;
                Ok(finding)
            })
            .await
    }

    pub async fn stats(&self, scope: &Scope) -> EngineResult<FindingStats> {
        let user_id = scope.user_id();
        self.db
            .call("finding_stats", move |conn| stats_in(conn, user_id.as_deref()))
            .await
    }

    /// Fleet-wide stats plus severity breakdown and the ten newest open findings.
    pub async fn summary(&self) -> EngineResult<FleetSummary> {
        self.db
            .call("fleet_summary", |conn| {
                let stats = stats_in(conn, None)?;

                let mut by_severity = BTreeMap::new();
                let mut stmt =
                    conn.prepare("SELECT severity, COUNT(*) FROM findings GROUP BY severity")?;
                let rows = stmt.query_map([], |r| {
                    Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
                })?;
                for r in rows {
                    let (severity, n) = r?;
                    by_severity.insert(severity, n as u64);
                }

                let mut stmt = conn.prepare(&format!(
                    "SELECT {FINDING_COLUMNS} FROM findings
                     WHERE status = 'OPEN'
                     ORDER BY detected_at DESC, id
                     LIMIT 10"
                ))?;
                let mut rows = stmt.query([])?;
                let mut recent = Vec::new();
                while let Some(row) = rows.next()? {
                    recent.push(finding_from_row(row)?);
                }

                Ok(FleetSummary {
                    stats,
                    by_severity,
                    recent,
                })
            })
            .await
    }
}

fn stats_in(conn: &Connection, user_id: Option<&str>) -> EngineResult<FindingStats> {
    let (total, open, critical, warning): (i64, i64, i64, i64) = conn.query_row(
        "SELECT COUNT(*),
                COALESCE(SUM(status = 'OPEN'), 0),
                COALESCE(SUM(status IN ('OPEN', 'ACKNOWLEDGED') AND severity = 'CRITICAL'), 0),
                COALESCE(SUM(status IN ('OPEN', 'ACKNOWLEDGED') AND severity = 'WARNING'), 0)
         FROM findings WHERE (?1 IS NULL OR user_id = ?1)",
        params![user_id],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
    )?;

    let mut by_type = BTreeMap::new();
    let mut stmt = conn.prepare(
        "SELECT kind, COUNT(*) FROM findings
         WHERE (?1 IS NULL OR user_id = ?1)
         GROUP BY kind",
    )?;
    let mut rows = stmt.query(params![user_id])?;
    while let Some(row) = rows.next()? {
        let kind: FindingKind = row.get::<_, String>(0)?.parse()?;
        by_type.insert(kind, row.get::<_, i64>(1)? as u64);
    }

    Ok(FindingStats {
        total: total as u64,
        open: open as u64,
        critical: critical as u64,
        warning: warning as u64,
        by_type,
    })
}
