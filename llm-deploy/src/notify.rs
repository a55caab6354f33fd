//! Evaluation notifier: POST the completion payload to the caller's callback.
//!
//! Delivery failures never fail the job. The notifier always returns a
//! `NotificationResult` describing what happened.

use std::time::Duration;

use async_trait::async_trait;

use crate::job::{CompletionPayload, NotificationResult};
use crate::retry::{self, RetryPolicy, Retryable};

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("callback unreachable: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("callback returned {status}")]
    Status { status: u16 },

    #[error("invalid callback URL: {0}")]
    InvalidUrl(String),
}

impl Retryable for NotificationError {
    fn is_retryable(&self) -> bool {
        !matches!(self, NotificationError::InvalidUrl(_))
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, url: &str, payload: &CompletionPayload) -> NotificationResult;
}

pub struct HttpNotifier {
    http: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpNotifier {
    /// `timeout` bounds each attempt, not the whole delivery.
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Result<Self, NotificationError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(NotificationError::Transport)?;
        Ok(Self { http, retry })
    }

    async fn attempt(&self, url: &str, payload: &CompletionPayload) -> Result<serde_json::Value, NotificationError> {
        let resp = self
            .http
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(NotificationError::Transport)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(NotificationError::Status { status: status.as_u16() });
        }
        let text = resp.text().await.unwrap_or_default();
        Ok(serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text)))
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, url: &str, payload: &CompletionPayload) -> NotificationResult {
        if let Err(e) = url::Url::parse(url) {
            return NotificationResult::failed(0, NotificationError::InvalidUrl(e.to_string()).to_string());
        }

        let mut attempts = 0;
        let outcome = retry::retry(self.retry, "evaluator notification", |attempt| {
            attempts = attempt;
            self.attempt(url, payload)
        })
        .await;

        match outcome {
            Ok(response) => {
                tracing::info!(attempts, "evaluator notified");
                NotificationResult::delivered(attempts, response)
            }
            Err(e) => {
                tracing::warn!(attempts, error = %e, "giving up on evaluator notification");
                NotificationResult::failed(attempts, e.to_string())
            }
        }
    }
}
