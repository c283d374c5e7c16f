//! Device registry -- devices, their owners and operating status.
//!
//! The registry is owned by the wider platform; the engine reads devices by
//! id and lists the active ones. The write side exists for imports and tests.

use std::fmt;
use std::str::FromStr;

use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::storage::Db;

/// Operating status of a device. Only `Active` devices are scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceStatus {
    Active,
    Inactive,
    Maintenance,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Active => "ACTIVE",
            DeviceStatus::Inactive => "INACTIVE",
            DeviceStatus::Maintenance => "MAINTENANCE",
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for DeviceStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(DeviceStatus::Active),
            "INACTIVE" => Ok(DeviceStatus::Inactive),
            "MAINTENANCE" => Ok(DeviceStatus::Maintenance),
            other => Err(EngineError::Validation(format!(
                "unknown device status '{other}'"
            ))),
        }
    }
}

/// A generation device (solar unit).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    /// Owning user; devices may exist unassigned.
    pub user_id: Option<String>,
    pub serial_number: String,
    pub name: Option<String>,
    /// Nameplate capacity in watts.
    pub capacity_watts: f64,
    pub status: DeviceStatus,
}

impl Device {
    pub fn capacity_kw(&self) -> f64 {
        self.capacity_watts / 1000.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
}

const DEVICE_COLUMNS: &str = "id, user_id, serial_number, name, capacity_watts, status";

fn device_from_row(row: &Row<'_>) -> rusqlite::Result<(Device, String)> {
    let status: String = row.get(5)?;
    Ok((
        Device {
            id: row.get(0)?,
            user_id: row.get(1)?,
            serial_number: row.get(2)?,
            name: row.get(3)?,
            capacity_watts: row.get(4)?,
            status: DeviceStatus::Active,
        },
        status,
    ))
}

fn finish_device((mut device, status): (Device, String)) -> EngineResult<Device> {
    device.status = status
        .parse()
        .map_err(|_| EngineError::Internal(format!("device {} has bad status", device.id)))?;
    Ok(device)
}

/// SQLite-backed device and user lookups.
#[derive(Clone)]
pub struct DeviceRegistry {
    db: Db,
}

impl DeviceRegistry {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn get_device(&self, id: &str) -> EngineResult<Option<Device>> {
        let id = id.to_string();
        self.db
            .call("get_device", move |conn| {
                let row = conn
                    .query_row(
                        &format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE id = ?1"),
                        params![id],
                        device_from_row,
                    )
                    .optional()?;
                row.map(finish_device).transpose()
            })
            .await
    }

    pub async fn get_user(&self, id: &str) -> EngineResult<Option<User>> {
        let id = id.to_string();
        self.db
            .call("get_user", move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT id, name, is_admin FROM users WHERE id = ?1",
                        params![id],
                        |row| {
                            Ok(User {
                                id: row.get(0)?,
                                name: row.get(1)?,
                                is_admin: row.get::<_, i64>(2)? != 0,
                            })
                        },
                    )
                    .optional()?)
            })
            .await
    }

    /// All devices with status ACTIVE.
    pub async fn list_active(&self) -> EngineResult<Vec<Device>> {
        self.list_where("list_active", None).await
    }

    /// ACTIVE devices owned by one user.
    pub async fn list_active_for_user(&self, user_id: &str) -> EngineResult<Vec<Device>> {
        self.list_where("list_active_for_user", Some(user_id.to_string()))
            .await
    }

    async fn list_where(
        &self,
        op: &'static str,
        user_id: Option<String>,
    ) -> EngineResult<Vec<Device>> {
        self.db
            .call(op, move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {DEVICE_COLUMNS} FROM devices
                     WHERE status = 'ACTIVE' AND (?1 IS NULL OR user_id = ?1)
                     ORDER BY id"
                ))?;
                let rows = stmt.query_map(params![user_id], device_from_row)?;
                let mut devices = Vec::new();
                for r in rows {
                    devices.push(finish_device(r?)?);
                }
                Ok(devices)
            })
            .await
    }

    pub async fn upsert_user(&self, user: User) -> EngineResult<()> {
        self.db
            .call("upsert_user", move |conn| {
                conn.execute(
                    "INSERT INTO users (id, name, is_admin) VALUES (?1, ?2, ?3)
                     ON CONFLICT(id) DO UPDATE SET name = excluded.name, is_admin = excluded.is_admin",
                    params![user.id, user.name, user.is_admin as i64],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn upsert_device(&self, device: Device) -> EngineResult<()> {
        if !(device.capacity_watts.is_finite() && device.capacity_watts > 0.0) {
            return Err(EngineError::Validation(format!(
                "device {} must have a positive capacity",
                device.id
            )));
        }
        self.db
            .call("upsert_device", move |conn| {
                conn.execute(
                    "INSERT INTO devices (id, user_id, serial_number, name, capacity_watts, status)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(id) DO UPDATE SET
                        user_id = excluded.user_id,
                        serial_number = excluded.serial_number,
                        name = excluded.name,
                        capacity_watts = excluded.capacity_watts,
                        status = excluded.status",
                    params![
                        device.id,
                        device.user_id,
                        device.serial_number,
                        device.name,
                        device.capacity_watts,
                        device.status.as_str()
                    ],
                )?;
                Ok(())
            })
            .await
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testutil::test_db;

    #[tokio::test]
    async fn test_list_active_skips_other_statuses() {
        let t = test_db();
        let registry = DeviceRegistry::new(t.db.clone());
        registry.upsert_user(fixtures::user("u1")).await.unwrap();
        registry.upsert_user(fixtures::user("u2")).await.unwrap();

        registry
            .upsert_device(fixtures::device("d1", "u1", 5000.0))
            .await
            .unwrap();
        let mut idle = fixtures::device("d2", "u1", 3000.0);
        idle.status = DeviceStatus::Maintenance;
        registry.upsert_device(idle).await.unwrap();
        registry
            .upsert_device(fixtures::device("d3", "u2", 4000.0))
            .await
            .unwrap();

        let all: Vec<String> = registry
            .list_active()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(all, vec!["d1", "d3"]);

        let mine = registry.list_active_for_user("u1").await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].id, "d1");
        assert_eq!(mine[0].capacity_kw(), 5.0);
    }

    #[tokio::test]
    async fn test_get_missing_device_is_none() {
        let t = test_db();
        let registry = DeviceRegistry::new(t.db.clone());
        assert!(registry.get_device("nope").await.unwrap().is_none());
        assert!(registry.get_user("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_zero_capacity_rejected() {
        let t = test_db();
        let registry = DeviceRegistry::new(t.db.clone());
        let err = registry
            .upsert_device(fixtures::device("d1", "u1", 0.0))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("ACTIVE".parse::<DeviceStatus>().unwrap(), DeviceStatus::Active);
        assert!("active".parse::<DeviceStatus>().is_err());
    }
}
