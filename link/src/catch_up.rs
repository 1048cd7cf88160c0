//! Offline catch-up pull over HTTP.
//!
//! After a reconnect the client pulls whatever it missed while offline,
//! page by page, following the opaque `page_token` the server hands back.

use log::{debug, warn};
use std::time::{Duration, Instant};

use crate::error::{LinkError, Result};
use crate::models::{CatchUpPage, CatchUpRequest, ResponseEnvelope};

const PULL_PATH: &str = "/api/v1/messages/pull";
const MAX_RETRIES: u32 = 3;
const RETRY_STEP: Duration = Duration::from_millis(100);

/// Safety stop for [`CatchUpClient::fetch_all`] against a server that never
/// clears `has_more`.
const MAX_PAGES: usize = 1000;

#[derive(Clone)]
pub struct CatchUpClient {
    base_url: String,
    http_client: reqwest::Client,
    bearer_token: Option<String>,
}

impl CatchUpClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| LinkError::ConfigurationError(format!("HTTP client: {}", e)))?;
        Ok(Self::with_client(base_url, http_client))
    }

    pub fn with_client(base_url: impl Into<String>, http_client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
            bearer_token: None,
        }
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Pull one page. `page_token = None` starts from the oldest missed item.
    pub async fn fetch_page(&self, page_token: Option<&str>, limit: u32) -> Result<CatchUpPage> {
        let request = CatchUpRequest {
            page_token: page_token.map(str::to_string),
            limit,
        };
        let url = format!("{}{}", self.base_url, PULL_PATH);
        let mut retries = 0;

        loop {
            let mut req_builder = self.http_client.post(&url).json(&request);
            if let Some(token) = &self.bearer_token {
                req_builder = req_builder.bearer_auth(token);
            }

            let attempt_start = Instant::now();
            debug!(
                "[courier-link] Catch-up POST {} (attempt {}/{})",
                url,
                retries + 1,
                MAX_RETRIES + 1
            );

            match req_builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        let message = response
                            .text()
                            .await
                            .unwrap_or_else(|_| "Unknown error".to_string());
                        warn!(
                            "[courier-link] Catch-up failed: status={} message=\"{}\"",
                            status, message
                        );
                        return Err(LinkError::ServerError {
                            status_code: status.as_u16(),
                            message,
                        });
                    }

                    let envelope: ResponseEnvelope = response.json().await?;
                    let page: CatchUpPage = serde_json::from_value(envelope.into_result()?)?;
                    debug!(
                        "[courier-link] Catch-up page: items={} has_more={} duration_ms={}",
                        page.items.len(),
                        page.has_more,
                        attempt_start.elapsed().as_millis()
                    );
                    return Ok(page);
                },
                Err(e) if retries < MAX_RETRIES && Self::is_retriable(&e) => {
                    retries += 1;
                    warn!(
                        "[courier-link] Catch-up retriable error (attempt {}/{}): {}",
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

    /// Follow page tokens until the server reports nothing more.
    pub async fn fetch_all(&self, limit: u32) -> Result<Vec<serde_json::Value>> {
        let mut items = Vec::new();
        let mut token: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let page = self.fetch_page(token.as_deref(), limit).await?;
            items.extend(page.items);
            if !page.has_more {
                return Ok(items);
            }
            match page.page_token {
                Some(next) if token.as_deref() != Some(next.as_str()) => token = Some(next),
                _ => {
                    warn!("[courier-link] Catch-up reported more items without a new page token");
                    return Ok(items);
                },
            }
        }

        warn!("[courier-link] Catch-up stopped after {} pages", MAX_PAGES);
        Ok(items)
    }

    fn is_retriable(err: &reqwest::Error) -> bool {
        err.is_timeout() || err.is_connect()
    }
}
