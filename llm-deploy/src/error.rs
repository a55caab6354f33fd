//! Job-level failure taxonomy.
//!
//! Each orchestrator state that can fail has its own variant so callers can
//! branch on the kind. `kind()` is the stable machine-readable tag returned
//! to HTTP callers; the `Display` text is the human-readable message.

use axum::http::StatusCode;

use crate::generator::GenerationError;
use crate::github::PublishError;

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// Caller's secret did not match. No external call was made.
    #[error("invalid secret")]
    Unauthorized,

    /// Body was authorized but does not decode into a job.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid job: {0}")]
    InvalidJob(String),

    #[error("generation failed")]
    Generation(#[source] GenerationError),

    /// Repository name is taken by something this service did not create.
    #[error("repository {repo} exists and is not managed by this service")]
    PublishConflict { repo: String },

    /// Rate limit or outage that outlasted the retry budget.
    #[error("publishing failed after retries")]
    PublishTransient(#[source] PublishError),

    #[error("publishing failed")]
    Publish(#[source] PublishError),

    #[error("job deadline exceeded during {stage}")]
    Timeout { stage: &'static str },
}

impl DeployError {
    pub fn kind(&self) -> &'static str {
        match self {
            DeployError::Unauthorized => "unauthorized",
            DeployError::InvalidRequest(_) => "invalid_request",
            DeployError::InvalidJob(_) => "invalid_job",
            DeployError::Generation(_) => "generation_error",
            DeployError::PublishConflict { .. } => "publish_conflict",
            DeployError::PublishTransient(_) => "publish_transient",
            DeployError::Publish(_) => "publish_error",
            DeployError::Timeout { .. } => "timeout",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            DeployError::Unauthorized => StatusCode::FORBIDDEN,
            DeployError::InvalidRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
            DeployError::InvalidJob(_) => StatusCode::BAD_REQUEST,
            DeployError::Generation(_) => StatusCode::BAD_GATEWAY,
            DeployError::PublishConflict { .. } => StatusCode::CONFLICT,
            DeployError::PublishTransient(_) => StatusCode::SERVICE_UNAVAILABLE,
            DeployError::Publish(_) => StatusCode::BAD_GATEWAY,
            DeployError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl From<GenerationError> for DeployError {
    fn from(e: GenerationError) -> Self {
        DeployError::Generation(e)
    }
}

impl From<PublishError> for DeployError {
    fn from(e: PublishError) -> Self {
        match e {
            PublishError::Conflict { repo } => DeployError::PublishConflict { repo },
            e @ (PublishError::RateLimited { .. } | PublishError::Unavailable(_)) => {
                DeployError::PublishTransient(e)
            }
            e => DeployError::Publish(e),
        }
    }
}
