use super::defaults::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub locks: LockSettings,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub compensation: CompensationSettings,
    #[serde(default)]
    pub reconciliation: ReconciliationSettings,
    /// Declarative schedule table, one `[[schedule]]` entry per job.
    #[serde(default = "default_schedule")]
    pub schedule: Vec<ScheduleSettings>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            logging: LoggingSettings::default(),
            locks: LockSettings::default(),
            store: StoreSettings::default(),
            compensation: CompensationSettings::default(),
            reconciliation: ReconciliationSettings::default(),
            schedule: default_schedule(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Identifies this process in logs and job contexts.
    #[serde(default = "default_instance_id")]
    pub instance_id: String,
    /// Grace period for in-flight runs on shutdown.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            instance_id: default_instance_id(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Directory for log files (default: "./logs")
    #[serde(default = "default_logs_path")]
    pub logs_path: String,
    #[serde(default = "default_true")]
    pub log_to_console: bool,
    /// "compact", "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
    /// Optional per-target log level overrides
    /// [logging.targets]
    /// courier_jobs = "debug"
    #[serde(default)]
    pub targets: HashMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            logs_path: default_logs_path(),
            log_to_console: true,
            format: default_log_format(),
            targets: HashMap::new(),
        }
    }
}

/// Where locks live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockBackend {
    /// Process-local; only safe with a single instance.
    #[default]
    Memory,
    /// Shared SQLite file; safe across processes on one host.
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockSettings {
    #[serde(default)]
    pub backend: LockBackend,
    #[serde(default = "default_lock_sqlite_path")]
    pub sqlite_path: String,
    /// Retry interval for spin acquisition.
    #[serde(default = "default_spin_interval_ms")]
    pub spin_interval_ms: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            backend: LockBackend::default(),
            sqlite_path: default_lock_sqlite_path(),
            spin_interval_ms: default_spin_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// SQLite database holding topic messages and task runs.
    #[serde(default = "default_store_sqlite_path")]
    pub sqlite_path: String,
    /// Base URL of the sandbox service that owns task status.
    #[serde(default = "default_sandbox_base_url")]
    pub sandbox_base_url: String,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            sqlite_path: default_store_sqlite_path(),
            sandbox_base_url: default_sandbox_base_url(),
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

/// Stuck-message compensation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationSettings {
    /// Per-run switch, re-read at the start of every run.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_compensation_lock_key")]
    pub global_lock_key: String,
    #[serde(default = "default_compensation_lock_ttl_secs")]
    pub global_lock_ttl_secs: u64,
    /// Age after which a pending message counts as stuck.
    #[serde(default = "default_compensation_stale_after_secs")]
    pub stale_after_secs: u64,
    /// Maximum units per run.
    #[serde(default = "default_compensation_batch_limit")]
    pub batch_limit: usize,
    /// Units processed concurrently per chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// TTL of the per-topic lock. Independent of any consumer-side lock.
    #[serde(default = "default_unit_lock_ttl_secs")]
    pub unit_lock_ttl_secs: u64,
    /// Per-topic lock keys are `<prefix>:<topic id>`.
    #[serde(default = "default_unit_lock_prefix")]
    pub unit_lock_prefix: String,
}

impl Default for CompensationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            global_lock_key: default_compensation_lock_key(),
            global_lock_ttl_secs: default_compensation_lock_ttl_secs(),
            stale_after_secs: default_compensation_stale_after_secs(),
            batch_limit: default_compensation_batch_limit(),
            chunk_size: default_chunk_size(),
            unit_lock_ttl_secs: default_unit_lock_ttl_secs(),
            unit_lock_prefix: default_unit_lock_prefix(),
        }
    }
}

impl CompensationSettings {
    pub fn global_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.global_lock_ttl_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn unit_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.unit_lock_ttl_secs)
    }
}

/// Task status reconciliation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_reconciliation_lock_key")]
    pub global_lock_key: String,
    #[serde(default = "default_reconciliation_lock_ttl_secs")]
    pub global_lock_ttl_secs: u64,
    #[serde(default = "default_reconciliation_stale_after_secs")]
    pub stale_after_secs: u64,
    #[serde(default = "default_reconciliation_batch_limit")]
    pub batch_limit: usize,
    /// Pause between two external status lookups.
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,
    /// Local status that marks a record as still in progress.
    #[serde(default = "default_in_progress_status")]
    pub in_progress_status: String,
}

impl Default for ReconciliationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            global_lock_key: default_reconciliation_lock_key(),
            global_lock_ttl_secs: default_reconciliation_lock_ttl_secs(),
            stale_after_secs: default_reconciliation_stale_after_secs(),
            batch_limit: default_reconciliation_batch_limit(),
            throttle_ms: default_throttle_ms(),
            in_progress_status: default_in_progress_status(),
        }
    }
}

impl ReconciliationSettings {
    pub fn global_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.global_lock_ttl_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }
}

/// One row of the schedule table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSettings {
    pub job_id: String,
    pub interval_secs: u64,
    /// Skip a tick while the previous local run is still in flight.
    #[serde(default = "default_true")]
    pub singleton: bool,
    /// `false` keeps the job from ever being scheduled.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl ScheduleSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl ServerConfig {
    /// Per-run switch for `job_id`. Jobs without a dedicated section fall
    /// back to their schedule entry; unknown jobs are off.
    pub fn job_enabled(&self, job_id: &str) -> bool {
        match job_id {
            COMPENSATION_JOB_ID => self.compensation.enabled,
            RECONCILIATION_JOB_ID => self.reconciliation.enabled,
            other => self
                .schedule
                .iter()
                .find(|entry| entry.job_id == other)
                .map(|entry| entry.enabled)
                .unwrap_or(false),
        }
    }
}
