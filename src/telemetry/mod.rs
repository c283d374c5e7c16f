//! Telemetry store -- append-only generation readings per device.

use chrono::{Duration, NaiveDateTime, Timelike};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::storage::{fmt_ts, parse_ts, Db};

/// One generation reading.
///
/// Timestamps are naive device-local time; hours and calendar dates are taken
/// directly from them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub timestamp: NaiveDateTime,
    /// Energy generated during the interval, in kWh.
    pub energy_kwh: f64,
    /// Length of the reporting interval this reading covers.
    pub interval_minutes: u32,
}

impl Reading {
    pub fn new(timestamp: NaiveDateTime, energy_kwh: f64, interval_minutes: u32) -> Self {
        Self {
            timestamp,
            energy_kwh,
            interval_minutes,
        }
    }

    pub fn hour(&self) -> u32 {
        self.timestamp.hour()
    }
}

/// Readings for one device in ascending timestamp order.
#[derive(Debug, Clone, Default)]
pub struct ReadingWindow {
    readings: Vec<Reading>,
}

impl ReadingWindow {
    /// Build a window, sorting by timestamp.
    pub fn new(mut readings: Vec<Reading>) -> Self {
        readings.sort_by_key(|r| r.timestamp);
        Self { readings }
    }

    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn first(&self) -> Option<&Reading> {
        self.readings.first()
    }

    pub fn last(&self) -> Option<&Reading> {
        self.readings.last()
    }
}

/// SQLite-backed reading queries.
#[derive(Clone)]
pub struct TelemetryStore {
    db: Db,
}

impl TelemetryStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Distinct readings for `device_id` with `start <= ts <= end`, ascending.
    /// An empty result is not an error.
    pub async fn window(
        &self,
        device_id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> EngineResult<ReadingWindow> {
        let device_id = device_id.to_string();
        let (start, end) = (fmt_ts(&start), fmt_ts(&end));
        let readings = self
            .db
            .call("reading_window", move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT ts, energy_kwh, interval_minutes FROM readings
                     WHERE device_id = ?1 AND ts >= ?2 AND ts <= ?3
                     ORDER BY ts ASC",
                )?;
                let rows = stmt.query_map(params![device_id, start, end], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, u32>(2)?,
                    ))
                })?;

                let mut readings = Vec::new();
                for r in rows {
                    let (ts, energy, interval) = r?;
                    readings.push(Reading::new(parse_ts(&ts)?, energy, interval));
                }
                Ok(readings)
            })
            .await?;
        Ok(ReadingWindow { readings })
    }

    /// The window ending at `now` and reaching back `lookback`.
    pub async fn recent(
        &self,
        device_id: &str,
        now: NaiveDateTime,
        lookback: Duration,
    ) -> EngineResult<ReadingWindow> {
        self.window(device_id, now - lookback, now).await
    }

    /// Append one reading. Returns false when the timestamp was already stored.
    pub async fn record(&self, device_id: &str, reading: Reading) -> EngineResult<bool> {
        Ok(self.record_batch(device_id, vec![reading]).await? == 1)
    }

    /// Append readings; a reading at an existing (device, timestamp) is ignored.
    /// Returns how many rows were inserted.
    pub async fn record_batch(&self, device_id: &str, readings: Vec<Reading>) -> EngineResult<usize> {
        let device_id = device_id.to_string();
        self.db
            .call("record_readings", move |conn| {
                let tx = conn.transaction()?;
                let mut inserted = 0;
                {
                    let mut stmt = tx.prepare(
                        "INSERT OR IGNORE INTO readings (device_id, ts, energy_kwh, interval_minutes)
                         VALUES (?1, ?2, ?3, ?4)",
                    )?;
                    for r in &readings {
                        inserted += stmt.execute(params![
                            device_id,
                            fmt_ts(&r.timestamp),
                            r.energy_kwh,
                            r.interval_minutes
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(inserted)
            })
            .await
    }
}

#[cfg(test)]
pub(crate) fn ts(date: &str, time: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(&format!("{date}T{time}"), "%Y-%m-%dT%H:%M").unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{fixtures, DeviceRegistry};
    use crate::storage::testutil::test_db;

    #[test]
    fn test_window_sorts_readings() {
        let w = ReadingWindow::new(vec![
            Reading::new(ts("2024-06-01", "10:15"), 1.0, 15),
            Reading::new(ts("2024-06-01", "10:00"), 2.0, 15),
        ]);
        assert_eq!(w.first().unwrap().energy_kwh, 2.0);
        assert_eq!(w.last().unwrap().hour(), 10);
    }

    #[tokio::test]
    async fn test_window_bounds_are_inclusive_and_ordered() {
        let t = test_db();
        let registry = DeviceRegistry::new(t.db.clone());
        registry.upsert_user(fixtures::user("u1")).await.unwrap();
        registry
            .upsert_device(fixtures::device("d1", "u1", 5000.0))
            .await
            .unwrap();

        let store = TelemetryStore::new(t.db.clone());
        let inserted = store
            .record_batch(
                "d1",
                vec![
                    Reading::new(ts("2024-06-02", "12:00"), 3.0, 15),
                    Reading::new(ts("2024-06-01", "12:00"), 1.0, 15),
                    Reading::new(ts("2024-06-03", "12:00"), 4.0, 15),
                    Reading::new(ts("2024-06-01", "12:00"), 9.0, 15),
                ],
            )
            .await
            .unwrap();
        assert_eq!(inserted, 3);

        let w = store
            .window("d1", ts("2024-06-01", "12:00"), ts("2024-06-02", "12:00"))
            .await
            .unwrap();
        let values: Vec<f64> = w.readings().iter().map(|r| r.energy_kwh).collect();
        assert_eq!(values, vec![1.0, 3.0]);

        assert!(!store
            .record("d1", Reading::new(ts("2024-06-02", "12:00"), 7.0, 15))
            .await
            .unwrap());
        assert!(store
            .record("d1", Reading::new(ts("2024-06-02", "12:15"), 7.0, 15))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_unknown_device_window_is_empty() {
        let t = test_db();
        let store = TelemetryStore::new(t.db.clone());
        let w = store
            .recent("ghost", ts("2024-06-08", "00:00"), Duration::days(7))
            .await
            .unwrap();
        assert!(w.is_empty());
    }
}
