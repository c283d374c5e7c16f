//! Bulk loading of users, devices and readings from a JSON document.
//!
//! ```json
//! {
//!   "users":    [{ "id": "u1", "name": "Ada", "is_admin": false }],
//!   "devices":  [{ "id": "d1", "user_id": "u1", "serial_number": "SN-1",
//!                  "capacity_watts": 5000.0, "status": "ACTIVE" }],
//!   "readings": [{ "device_id": "d1", "readings": [
//!                  { "timestamp": "2024-06-01T12:00:00", "energy_kwh": 1.2,
//!                    "interval_minutes": 15 } ] }]
//! }
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::registry::{Device, DeviceRegistry, User};
use crate::storage::Db;
use crate::telemetry::{Reading, TelemetryStore};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FleetDocument {
    pub users: Vec<User>,
    pub devices: Vec<Device>,
    pub readings: Vec<DeviceReadings>,
}

#[derive(Debug, Deserialize)]
pub struct DeviceReadings {
    pub device_id: String,
    pub readings: Vec<Reading>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub users: usize,
    pub devices: usize,
    pub readings_inserted: usize,
    pub readings_duplicate: usize,
}

pub async fn import_file(db: &Db, path: &Path) -> Result<ImportSummary> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read import file: {}", path.display()))?;
    let doc: FleetDocument = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse import file: {}", path.display()))?;
    import(db, doc).await
}

/// Users first, then devices, then readings, so references resolve.
pub async fn import(db: &Db, doc: FleetDocument) -> Result<ImportSummary> {
    let registry = DeviceRegistry::new(db.clone());
    let telemetry = TelemetryStore::new(db.clone());
    let mut summary = ImportSummary::default();

    for user in doc.users {
        let id = user.id.clone();
        registry
            .upsert_user(user)
            .await
            .with_context(|| format!("failed to import user {id}"))?;
        summary.users += 1;
    }
    for device in doc.devices {
        let id = device.id.clone();
        registry
            .upsert_device(device)
            .await
            .with_context(|| format!("failed to import device {id}"))?;
        summary.devices += 1;
    }
    for batch in doc.readings {
        let total = batch.readings.len();
        let inserted = telemetry
            .record_batch(&batch.device_id, batch.readings)
            .await
            .with_context(|| format!("failed to import readings for {}", batch.device_id))?;
        summary.readings_inserted += inserted;
        summary.readings_duplicate += total - inserted;
    }

    info!(
        users = summary.users,
        devices = summary.devices,
        readings = summary.readings_inserted,
        duplicates = summary.readings_duplicate,
        "import finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testutil::test_db;

    const DOC: &str = r#"{
        "users": [{ "id": "u1", "name": "Ada" }],
        "devices": [{ "id": "d1", "user_id": "u1", "serial_number": "SN-1",
                      "name": null, "capacity_watts": 5000.0, "status": "ACTIVE" }],
        "readings": [{ "device_id": "d1", "readings": [
            { "timestamp": "2024-06-01T12:00:00", "energy_kwh": 1.2, "interval_minutes": 15 },
            { "timestamp": "2024-06-01T12:15:00", "energy_kwh": 1.1, "interval_minutes": 15 },
            { "timestamp": "2024-06-01T12:15:00", "energy_kwh": 1.1, "interval_minutes": 15 }
        ] }]
    }"#;

    #[tokio::test]
    async fn test_import_loads_everything_and_skips_duplicates() {
        let t = test_db();
        let doc: FleetDocument = serde_json::from_str(DOC).unwrap();
        let summary = import(&t.db, doc).await.unwrap();
        assert_eq!(
            summary,
            ImportSummary {
                users: 1,
                devices: 1,
                readings_inserted: 2,
                readings_duplicate: 1,
            }
        );

        let registry = DeviceRegistry::new(t.db.clone());
        assert_eq!(registry.list_active().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_import_file_reports_parse_errors() {
        let t = test_db();
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("fleet.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = import_file(&t.db, &path).await.unwrap_err();
        assert!(err.to_string().contains("failed to parse import file"));
    }
}
