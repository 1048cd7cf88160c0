//! Sandbox task status over HTTP.

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

use courier_configs::StoreSettings;
use courier_jobs::ExternalStatusSource;

use crate::error::{Result, StoreError};

const OK_CODE: i64 = 1000;
const MAX_RETRIES: u32 = 3;
const RETRY_STEP: Duration = Duration::from_millis(100);

/// `{"code": 1000, "message": "...", "data": {"status": "..."}}`
#[derive(Debug, Deserialize)]
struct StatusEnvelope {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<TaskStatus>,
}

#[derive(Debug, Deserialize)]
struct TaskStatus {
    status: String,
}

#[derive(Clone)]
pub struct HttpStatusSource {
    base_url: String,
    http_client: reqwest::Client,
}

impl HttpStatusSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Http(format!("HTTP client: {}", e)))?;
        Ok(Self::with_client(base_url, http_client))
    }

    pub fn from_settings(settings: &StoreSettings) -> Result<Self> {
        Self::new(
            settings.sandbox_base_url.clone(),
            Duration::from_secs(settings.http_timeout_secs),
        )
    }

    pub fn with_client(base_url: impl Into<String>, http_client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        }
    }

    /// Authoritative status of `task_id`, `None` if the sandbox has no such task.
    pub async fn task_status(&self, task_id: &str) -> Result<Option<String>> {
        let url = self.task_url(task_id)?;
        let mut retries = 0;

        loop {
            debug!("Sandbox status GET {} (attempt {}/{})", url, retries + 1, MAX_RETRIES + 1);

            match self.http_client.get(url.clone()).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::NOT_FOUND {
                        return Ok(None);
                    }
                    if !status.is_success() {
                        let message = response
                            .text()
                            .await
                            .unwrap_or_else(|_| "Unknown error".to_string());
                        return Err(StoreError::ServerError {
                            status: status.as_u16(),
                            message,
                        });
                    }

                    let envelope: StatusEnvelope = response.json().await?;
                    if envelope.code != OK_CODE {
                        return Err(StoreError::InvalidResponse(format!(
                            "code {}: {}",
                            envelope.code, envelope.message
                        )));
                    }
                    return Ok(envelope.data.map(|d| d.status));
                },
                Err(e) if retries < MAX_RETRIES && (e.is_timeout() || e.is_connect()) => {
                    retries += 1;
                    warn!(
                        "Sandbox status retriable error (attempt {}/{}): {}",
                        retries,
                        MAX_RETRIES + 1,
                        e
                    );
                    tokio::time::sleep(RETRY_STEP * retries).await;
                },
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// `{base}/api/v1/sandbox/tasks/{task_id}/status` with `task_id` escaped
    /// as a single path segment.
    fn task_url(&self, task_id: &str) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| StoreError::Http(format!("invalid sandbox URL '{}': {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| StoreError::Http(format!("sandbox URL '{}' cannot take a path", self.base_url)))?
            .pop_if_empty()
            .extend(["api", "v1", "sandbox", "tasks", task_id, "status"]);
        Ok(url)
    }
}

#[async_trait]
impl ExternalStatusSource for HttpStatusSource {
    async fn fetch_status(&self, record_id: &str) -> courier_jobs::Result<Option<String>> {
        Ok(self.task_status(record_id).await?)
    }
}
