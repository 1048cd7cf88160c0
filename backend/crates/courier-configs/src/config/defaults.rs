use super::types::ScheduleSettings;

/// Job id of the stuck-message compensation run.
pub const COMPENSATION_JOB_ID: &str = "msg_queue_compensation";

/// Job id of the task status reconciliation run.
pub const RECONCILIATION_JOB_ID: &str = "task_status_reconcile";

// Default value functions
pub fn default_true() -> bool {
    true
}

pub fn default_instance_id() -> String {
    "courier-1".to_string()
}

pub fn default_shutdown_timeout_secs() -> u64 {
    30
}

pub fn default_log_level() -> String {
    "info".to_string()
}

pub fn default_log_format() -> String {
    "compact".to_string()
}

pub fn default_logs_path() -> String {
    "./logs".to_string()
}

pub fn default_lock_sqlite_path() -> String {
    "./data/locks.db".to_string()
}

pub fn default_spin_interval_ms() -> u64 {
    50
}

pub fn default_store_sqlite_path() -> String {
    "./data/courier.db".to_string()
}

pub fn default_sandbox_base_url() -> String {
    "http://127.0.0.1:8090".to_string()
}

pub fn default_http_timeout_secs() -> u64 {
    10
}

pub fn default_compensation_lock_key() -> String {
    format!("{}:global:run", COMPENSATION_JOB_ID)
}

pub fn default_compensation_lock_ttl_secs() -> u64 {
    900 // 15 minutes, longer than any run
}

pub fn default_compensation_stale_after_secs() -> u64 {
    1200 // 20 minutes
}

pub fn default_compensation_batch_limit() -> usize {
    50
}

pub fn default_chunk_size() -> usize {
    20
}

pub fn default_unit_lock_ttl_secs() -> u64 {
    20
}

pub fn default_unit_lock_prefix() -> String {
    format!("{}:topic", COMPENSATION_JOB_ID)
}

pub fn default_reconciliation_lock_key() -> String {
    format!("{}:global:run", RECONCILIATION_JOB_ID)
}

pub fn default_reconciliation_lock_ttl_secs() -> u64 {
    3600 // 1 hour
}

pub fn default_reconciliation_stale_after_secs() -> u64 {
    10800 // 3 hours
}

pub fn default_reconciliation_batch_limit() -> usize {
    100
}

pub fn default_throttle_ms() -> u64 {
    100
}

pub fn default_in_progress_status() -> String {
    "running".to_string()
}

pub fn default_schedule() -> Vec<ScheduleSettings> {
    vec![
        ScheduleSettings {
            job_id: COMPENSATION_JOB_ID.to_string(),
            interval_secs: 30,
            singleton: true,
            enabled: true,
        },
        ScheduleSettings {
            job_id: RECONCILIATION_JOB_ID.to_string(),
            interval_secs: 3600,
            singleton: true,
            enabled: true,
        },
    ]
}
