use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::Config;
use crate::detect::dedup::DedupGate;
use crate::detect::{detectors, Detector};
use crate::error::{EngineError, EngineResult};
use crate::findings::{Finding, FindingStore};
use crate::registry::{Device, DeviceRegistry};
use crate::scheduler::history::{DeviceRunOutcome, FleetRunReport, RunTrigger};
use crate::storage::Db;
use crate::telemetry::TelemetryStore;

/// Runs the detector set over devices and persists what survives the dedup
/// gate.
pub struct DetectionEngine {
    registry: DeviceRegistry,
    telemetry: TelemetryStore,
    findings: FindingStore,
    detectors: Vec<Box<dyn Detector>>,
    gate: DedupGate,
    clock: Arc<dyn Clock>,
    lookback: chrono::Duration,
    concurrency: usize,
    device_timeout: Duration,
    // One async lock per device so overlapping triggers cannot race the
    // gate's read-then-write. Entries live only while a run holds or waits.
    device_locks: DeviceLocks,
}

type DeviceLocks = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// Holds a device's run lock and drops the map entry once nobody else is
/// waiting on it.
struct DeviceLease<'a> {
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
    locks: &'a DeviceLocks,
    device_id: String,
}

impl Drop for DeviceLease<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Clones are only taken under this map lock, so a count of one means
        // no other run holds or waits on the entry.
        if locks
            .get(&self.device_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.device_id);
        }
    }
}

impl DetectionEngine {
    pub fn new(db: Db, config: &Config, clock: Arc<dyn Clock>) -> Self {
        let detection = &config.detection;
        Self {
            registry: DeviceRegistry::new(db.clone()),
            telemetry: TelemetryStore::new(db.clone()),
            findings: FindingStore::new(db),
            detectors: detectors(detection),
            gate: DedupGate::new(chrono::Duration::hours(detection.dedup_window_hours as i64)),
            clock,
            lookback: chrono::Duration::days(detection.lookback_days as i64),
            concurrency: config.scheduler.concurrency.max(1),
            device_timeout: config.scheduler.device_timeout(),
            device_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the detector set.
    pub fn with_detectors(mut self, detectors: Vec<Box<dyn Detector>>) -> Self {
        self.detectors = detectors;
        self
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    async fn lease(&self, device_id: &str) -> DeviceLease<'_> {
        let lock = {
            let mut locks = self
                .device_locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            locks.entry(device_id.to_string()).or_default().clone()
        };
        DeviceLease {
            guard: Some(lock.lock_owned().await),
            locks: &self.device_locks,
            device_id: device_id.to_string(),
        }
    }

    /// Detect, dedup and persist for a single device.
    pub async fn run_for_device(&self, device_id: &str) -> EngineResult<DeviceRunOutcome> {
        let device = self
            .registry
            .get_device(device_id)
            .await?
            .ok_or_else(|| EngineError::not_found("device", device_id))?;
        let owner = self.owner_of(&device).await?;

        let _lease = self.lease(&device.id).await;

        let mut outcome = DeviceRunOutcome {
            device_id: device.id.clone(),
            ..Default::default()
        };

        let now = self.clock.now();
        let window = self
            .telemetry
            .recent(&device.id, now.naive_utc(), self.lookback)
            .await?;
        if window.is_empty() {
            debug!(device_id = %device.id, "no readings in window, skipping");
            outcome.skipped_no_data = true;
            return Ok(outcome);
        }

        let mut candidates = Vec::new();
        for detector in &self.detectors {
            match detector.detect(&window, &device) {
                Ok(found) => candidates.extend(found),
                Err(e) => {
                    warn!(device_id = %device.id, detector = detector.name(), error = %e, "detector failed, skipping");
                    outcome.detectors_failed.push(detector.name().to_string());
                }
            }
        }
        outcome.candidates = candidates.len();
        if candidates.is_empty() {
            return Ok(outcome);
        }

        let live = self.findings.live_for_device(&device.id).await?;
        let (survivors, suppressed) = self.gate.filter(candidates, &live);
        outcome.suppressed = suppressed;

        let new_findings: Vec<Finding> = survivors
            .into_iter()
            .map(|c| Finding::from_candidate(c, &device.id, &owner, now))
            .collect();
        let inserted = self.findings.insert_batch(new_findings).await?;
        outcome.suppressed += inserted.suppressed;
        outcome.created = inserted.inserted.len();

        for f in &inserted.inserted {
            info!(
                device_id = %device.id,
                finding_id = %f.id,
                kind = %f.kind,
                severity = %f.severity,
                "finding created"
            );
        }
        Ok(outcome)
    }

    async fn owner_of(&self, device: &Device) -> EngineResult<String> {
        let user_id = device
            .user_id
            .as_deref()
            .ok_or_else(|| EngineError::not_found("user", format!("owner of device {}", device.id)))?;
        let user = self
            .registry
            .get_user(user_id)
            .await?
            .ok_or_else(|| EngineError::not_found("user", user_id))?;
        Ok(user.id)
    }

    /// All ACTIVE devices. Per-device failures are recorded in the report and
    /// never abort the pass.
    pub async fn run_for_fleet(&self, trigger: RunTrigger) -> EngineResult<FleetRunReport> {
        let devices = self.registry.list_active().await?;
        Ok(self.run_devices(trigger, devices).await)
    }

    /// ACTIVE devices owned by `user_id`. `NotFound` if the user has none.
    pub async fn run_for_user(&self, user_id: &str) -> EngineResult<FleetRunReport> {
        let devices = self.registry.list_active_for_user(user_id).await?;
        if devices.is_empty() {
            return Err(EngineError::not_found("active devices for user", user_id));
        }
        let trigger = RunTrigger::User {
            user_id: user_id.to_string(),
        };
        Ok(self.run_devices(trigger, devices).await)
    }

    async fn run_devices(&self, trigger: RunTrigger, devices: Vec<Device>) -> FleetRunReport {
        let mut report = FleetRunReport::start(trigger, self.clock.now());
        info!(trigger = report.trigger.as_str(), devices = devices.len(), "detection pass started");

        let results: Vec<(String, EngineResult<DeviceRunOutcome>)> = stream::iter(devices)
            .map(|device| async move {
                let result =
                    match tokio::time::timeout(self.device_timeout, self.run_for_device(&device.id))
                        .await
                    {
                        Ok(r) => r,
                        Err(_) => Err(EngineError::Timeout(format!(
                            "device run after {:?}",
                            self.device_timeout
                        ))),
                    };
                (device.id, result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (device_id, result) in results {
            match result {
                Ok(outcome) => report.record_outcome(&outcome),
                Err(e) => {
                    warn!(device_id = %device_id, error = %e, "device run failed");
                    report.record_failure(&device_id, e);
                }
            }
        }

        report.finished_at = self.clock.now();
        info!(
            trigger = report.trigger.as_str(),
            scanned = report.devices_scanned,
            skipped = report.devices_skipped,
            failed = report.devices_failed(),
            created = report.findings_created,
            suppressed = report.findings_suppressed,
            "detection pass finished"
        );
        report
    }
}
