use std::sync::Arc;

use crate::clock::Clock;
use crate::config::{Config, DetectionConfig};
use crate::detect::engine::DetectionEngine;
use crate::findings::FindingStore;
use crate::registry::DeviceRegistry;
use crate::scheduler::RunHistory;
use crate::storage::Db;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<DetectionEngine>,
    pub findings: FindingStore,
    pub registry: DeviceRegistry,
    pub history: RunHistory,
    pub detection: Arc<DetectionConfig>,
}

impl AppState {
    pub fn new(db: Db, config: &Config, clock: Arc<dyn Clock>) -> Self {
        Self::with_engine(db.clone(), config, Arc::new(DetectionEngine::new(db, config, clock)))
    }

    /// Share an engine with the scheduler loop.
    pub fn with_engine(db: Db, config: &Config, engine: Arc<DetectionEngine>) -> Self {
        Self {
            engine,
            findings: FindingStore::new(db.clone()),
            registry: DeviceRegistry::new(db.clone()),
            history: RunHistory::new(db),
            detection: Arc::new(config.detection.clone()),
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        self.engine.clock()
    }
}
