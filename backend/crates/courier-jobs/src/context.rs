use log::{debug, error, info, warn};

/// Shared between the schedule runner and every run it spawns.
pub use tokio_util::sync::CancellationToken;

/// Immutable per-run context handed to every worker of a run.
///
/// Anything a unit handler needs from the triggering scope (instance,
/// locale) travels here explicitly.
#[derive(Clone, Debug)]
pub struct JobContext {
    pub job_id: String,
    /// Fresh for every invocation; appears in every log line of the run.
    pub run_id: String,
    pub instance_id: String,
    pub locale: Option<String>,
    pub started_at_ms: i64,
    pub cancellation_token: CancellationToken,
}

impl JobContext {
    pub fn new(job_id: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self::with_cancellation(job_id, instance_id, CancellationToken::new())
    }

    pub fn with_cancellation(
        job_id: impl Into<String>,
        instance_id: impl Into<String>,
        token: CancellationToken,
    ) -> Self {
        let run_id = uuid::Uuid::new_v4().simple().to_string();
        Self {
            job_id: job_id.into(),
            run_id: run_id[..12].to_string(),
            instance_id: instance_id.into(),
            locale: None,
            started_at_ms: Self::now_millis(),
            cancellation_token: token,
        }
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Resolves once the run is cancelled.
    pub async fn cancelled(&self) {
        self.cancellation_token.cancelled().await
    }

    /// Log debug message with [JobId/RunId] prefix
    pub fn log_debug(&self, message: &str) {
        debug!("[{}/{}] {}", self.job_id, self.run_id, message);
    }

    /// Log info message with [JobId/RunId] prefix
    pub fn log_info(&self, message: &str) {
        info!("[{}/{}] {}", self.job_id, self.run_id, message);
    }

    /// Log warning message with [JobId/RunId] prefix
    pub fn log_warn(&self, message: &str) {
        warn!("[{}/{}] {}", self.job_id, self.run_id, message);
    }

    /// Log error message with [JobId/RunId] prefix
    pub fn log_error(&self, message: &str) {
        error!("[{}/{}] {}", self.job_id, self.run_id, message);
    }

    pub fn elapsed_ms(&self) -> i64 {
        Self::now_millis() - self.started_at_ms
    }

    pub fn now_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}
