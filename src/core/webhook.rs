// src/core/webhook.rs

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

/// The automation scenario accepts at most this many files per delivery.
pub const MAX_FILES: usize = 3;

/// One named text blob attached to the payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactFile {
    pub name: String,
    pub content: String,
}

impl ArtifactFile {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self { name: name.into(), content: content.into() }
    }
}

/// The JSON body posted to the automation webhook.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookPayload {
    pub target_domain: String,
    pub files: Vec<ArtifactFile>,
    pub timestamp: DateTime<Utc>,
}

impl WebhookPayload {
    pub fn new(target_domain: &str, files: Vec<ArtifactFile>) -> Result<Self, DispatchError> {
        if files.len() > MAX_FILES {
            return Err(DispatchError::TooManyFiles(files.len()));
        }
        Ok(Self {
            target_domain: target_domain.to_string(),
            files,
            timestamp: Utc::now(),
        })
    }
}

/// Whatever the endpoint answered, 2xx or not.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookResponse {
    pub status_code: u16,
    pub body: Value,
}

impl WebhookResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// What the automation platform usually means by a given status.
    pub fn hint(&self) -> Option<&'static str> {
        match self.status_code {
            400 => Some("the webhook rejected the payload as malformed"),
            410 => Some("no scenario is listening on this webhook, it is probably switched off"),
            500..=599 => Some("the scenario failed downstream (AI summary or document creation)"),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("a webhook delivery carries at most {MAX_FILES} files, got {0}")]
    TooManyFiles(usize),
    #[error("webhook request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Exponential backoff for transport errors and 5xx answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 0, base_delay: Duration::from_secs(1) }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): base, 2×base, 4×base...
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

pub struct WebhookDispatcher {
    http: reqwest::Client,
    url: Url,
    retry: RetryPolicy,
}

impl WebhookDispatcher {
    pub fn new(url: Url, timeout: Duration, retry: RetryPolicy) -> Result<Self, DispatchError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, url, retry })
    }

    /// Posts the payload once (plus configured retries) and returns the raw outcome.
    pub async fn dispatch(&self, payload: &WebhookPayload) -> Result<WebhookResponse, DispatchError> {
        info!(
            target = %payload.target_domain,
            files = payload.files.len(),
            host = self.url.host_str().unwrap_or_default(),
            "Dispatching report to webhook."
        );

        let mut attempt = 0;
        loop {
            let outcome = self.post_once(payload).await;
            let retryable = match &outcome {
                Ok(resp) => resp.status_code >= 500,
                Err(DispatchError::Transport(_)) => true,
                Err(_) => false,
            };
            if !retryable || attempt >= self.retry.max_retries {
                return self.log_outcome(outcome);
            }
            let delay = self.retry.delay(attempt);
            warn!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "Webhook delivery failed, retrying.");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn post_once(&self, payload: &WebhookPayload) -> Result<WebhookResponse, DispatchError> {
        // The URL is the webhook's only credential; keep it out of error text.
        let response = self
            .http
            .post(self.url.clone())
            .json(payload)
            .send()
            .await
            .map_err(|e| DispatchError::Transport(e.without_url()))?;
        let status_code = response.status().as_u16();
        let text = response.text().await.map_err(|e| DispatchError::Transport(e.without_url()))?;
        debug!(status_code, bytes = text.len(), "Webhook answered.");
        let body = serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text.trim().to_string()));
        Ok(WebhookResponse { status_code, body })
    }

    fn log_outcome(
        &self,
        outcome: Result<WebhookResponse, DispatchError>,
    ) -> Result<WebhookResponse, DispatchError> {
        match &outcome {
            Ok(resp) if resp.is_success() => info!(status = resp.status_code, "Webhook accepted the report."),
            Ok(resp) => warn!(
                status = resp.status_code,
                hint = resp.hint().unwrap_or("unexpected status"),
                "Webhook did not accept the report."
            ),
            Err(e) => warn!(error = %e, "Webhook delivery failed."),
        }
        outcome
    }
}
