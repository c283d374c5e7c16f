//! TOML configuration for solarwatch.
//!
//! Every section carries `#[serde(default)]` so a partial file only
//! overrides what it names. The config file path is resolved from the CLI
//! flag, then `SOLARWATCH_CONFIG`, then the standard system location.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for the solarwatch process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve configuration from, in order:
    /// 1. An explicit path (from `--config`). Failing to load it is an error.
    /// 2. The path in the `SOLARWATCH_CONFIG` environment variable.
    /// 3. `/etc/solarwatch/solarwatch.toml`.
    /// 4. Compiled-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var("SOLARWATCH_CONFIG") {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "SOLARWATCH_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new("/etc/solarwatch/solarwatch.toml");
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }
}

// ---------------------------------------------------------------------------
// Server / storage / scheduler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address and port for the HTTP API.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Upper bound for a single store call (query or write), in milliseconds.
    pub timeout_ms: u64,
    /// Pause before the single retry of a transiently failed store call.
    pub retry_backoff_ms: u64,
}

impl StorageConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/solarwatch.db"),
            timeout_ms: 10_000,
            retry_backoff_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Whether `serve` starts the recurring fleet pass.
    pub enabled: bool,
    /// Six-field cron expression (sec min hour dom month dow).
    pub cron: String,
    /// Devices processed concurrently during a fleet pass.
    pub concurrency: usize,
    /// Wall-clock budget for one device's orchestration.
    pub device_timeout_secs: u64,
}

impl SchedulerConfig {
    pub fn device_timeout(&self) -> Duration {
        Duration::from_secs(self.device_timeout_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cron: "0 15 * * * *".to_string(), // hourly at :15
            concurrency: 4,
            device_timeout_secs: 60,
        }
    }
}

// ---------------------------------------------------------------------------
// Detection thresholds
// ---------------------------------------------------------------------------

/// Thresholds for every detector plus the window and dedup settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Size of the reading window, counted back from "now".
    pub lookback_days: i64,
    /// Reporting interval assumed when a reading does not carry one.
    pub nominal_interval_minutes: u32,
    /// Open findings whose period starts this close to a candidate's suppress it.
    pub dedup_window_hours: i64,
    pub zero_generation: ZeroGenerationConfig,
    pub sudden_drop: SuddenDropConfig,
    pub capacity_factor: CapacityFactorConfig,
    pub irregular_pattern: IrregularPatternConfig,
    pub missing_data: MissingDataConfig,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            lookback_days: 7,
            nominal_interval_minutes: 15,
            dedup_window_hours: 24,
            zero_generation: ZeroGenerationConfig::default(),
            sudden_drop: SuddenDropConfig::default(),
            capacity_factor: CapacityFactorConfig::default(),
            irregular_pattern: IrregularPatternConfig::default(),
            missing_data: MissingDataConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZeroGenerationConfig {
    /// First peak hour (inclusive).
    pub peak_start_hour: u32,
    /// Last peak hour (inclusive).
    pub peak_end_hour: u32,
    /// Minimum peak readings on a date before an all-zero day counts.
    pub min_peak_readings: usize,
    /// Expected peak output as a fraction of nameplate capacity.
    pub expected_peak_ratio: f64,
    pub critical_duration_minutes: u32,
}

impl Default for ZeroGenerationConfig {
    fn default() -> Self {
        Self {
            peak_start_hour: 10,
            peak_end_hour: 15,
            min_peak_readings: 2,
            expected_peak_ratio: 0.7,
            critical_duration_minutes: 240,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SuddenDropConfig {
    pub min_readings: usize,
    /// Leading share of the window used as the baseline segment.
    pub baseline_fraction: f64,
    pub day_start_hour: u32,
    pub day_end_hour: u32,
    /// Expected values below this are skipped.
    pub min_expected: f64,
    pub drop_percent: f64,
    /// Drops strictly above this are critical.
    pub critical_drop_percent: f64,
}

impl Default for SuddenDropConfig {
    fn default() -> Self {
        Self {
            min_readings: 50,
            baseline_fraction: 0.7,
            day_start_hour: 6,
            day_end_hour: 20,
            min_expected: 0.1,
            drop_percent: 50.0,
            critical_drop_percent: 70.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacityFactorConfig {
    pub normal_min_percent: f64,
    pub normal_max_percent: f64,
    pub min_abnormal_days: usize,
    pub critical_below_percent: f64,
    pub critical_above_percent: f64,
}

impl Default for CapacityFactorConfig {
    fn default() -> Self {
        Self {
            normal_min_percent: 10.0,
            normal_max_percent: 30.0,
            min_abnormal_days: 3,
            critical_below_percent: 5.0,
            critical_above_percent: 35.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IrregularPatternConfig {
    /// Night starts at this hour and wraps past midnight.
    pub night_start_hour: u32,
    /// Last night hour (inclusive).
    pub night_end_hour: u32,
    pub night_energy_threshold: f64,
    pub night_min_occurrences: usize,
    pub fluctuation_percent: f64,
    /// Share of readings with sharp changes above which the window is erratic.
    pub max_spike_rate: f64,
}

impl Default for IrregularPatternConfig {
    fn default() -> Self {
        Self {
            night_start_hour: 23,
            night_end_hour: 5,
            night_energy_threshold: 0.1,
            night_min_occurrences: 3,
            fluctuation_percent: 30.0,
            max_spike_rate: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MissingDataConfig {
    pub max_gap_hours: f64,
    pub critical_gap_hours: f64,
    pub operational_start_hour: u32,
    /// Last operational hour (inclusive).
    pub operational_end_hour: u32,
}

impl Default for MissingDataConfig {
    fn default() -> Self {
        Self {
            max_gap_hours: 2.0,
            critical_gap_hours: 24.0,
            operational_start_hour: 6,
            operational_end_hour: 20,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level, overridden by `RUST_LOG`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
