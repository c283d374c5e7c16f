//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            name TEXT,
            is_admin INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS devices (
            id TEXT PRIMARY KEY,
            user_id TEXT REFERENCES users(id),
            serial_number TEXT NOT NULL UNIQUE,
            name TEXT,
            capacity_watts REAL NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS readings (
            id INTEGER PRIMARY KEY,
            device_id TEXT NOT NULL REFERENCES devices(id),
            ts TEXT NOT NULL,
            energy_kwh REAL NOT NULL,
            interval_minutes INTEGER NOT NULL,
            UNIQUE (device_id, ts)
        );

        CREATE TABLE IF NOT EXISTS findings (
            id TEXT PRIMARY KEY,
            device_id TEXT NOT NULL REFERENCES devices(id),
            user_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            severity TEXT NOT NULL,
            confidence TEXT NOT NULL,
            period_start TEXT NOT NULL,
            period_end TEXT NOT NULL,
            description TEXT NOT NULL,
            evidence_json TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'OPEN',
            detected_at TEXT NOT NULL,
            resolved_at TEXT,
            resolved_by TEXT,
            resolution_notes TEXT,
            updated_at TEXT NOT NULL,
            CHECK (period_start <= period_end)
        );

        CREATE TABLE IF NOT EXISTS fleet_runs (
            id TEXT PRIMARY KEY,
            trigger_kind TEXT NOT NULL,
            devices_scanned INTEGER NOT NULL,
            devices_skipped INTEGER NOT NULL,
            devices_failed INTEGER NOT NULL,
            findings_created INTEGER NOT NULL,
            findings_suppressed INTEGER NOT NULL,
            report_json TEXT NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_devices_status ON devices(status);
        CREATE INDEX IF NOT EXISTS idx_devices_user ON devices(user_id, status);
        CREATE INDEX IF NOT EXISTS idx_readings_device_ts ON readings(device_id, ts);
        CREATE INDEX IF NOT EXISTS idx_findings_user ON findings(user_id, status, severity);
        CREATE INDEX IF NOT EXISTS idx_findings_device ON findings(device_id, detected_at);
        CREATE INDEX IF NOT EXISTS idx_findings_kind ON findings(kind, severity);
        CREATE INDEX IF NOT EXISTS idx_fleet_runs_started ON fleet_runs(started_at);

        -- At most one live finding per device, kind and day of period start.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_findings_live_incident
            ON findings(device_id, kind, substr(period_start, 1, 10))
            WHERE status IN ('OPEN', 'ACKNOWLEDGED');

        INSERT OR IGNORE INTO schema_version (version) VALUES (1);",
    )?;

    Ok(())
}
