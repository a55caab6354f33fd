//! Deployment orchestrator.
//!
//! Each job walks a fixed sequence of states:
//!
//! ```text
//! Received → Authorized → Generated → Published → Notified → Completed
//! ```
//!
//! Any state before `Published` can exit to `Failed`, which is terminal and
//! leaves nothing behind. Once the repository is published the job succeeds;
//! a failed notification is reported alongside the success, not instead of it.
//! The whole run is bounded by a per-job deadline.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{timeout_at, Instant};
use tracing::Instrument;

use crate::auth::verify_secret;
use crate::config::DeployConfig;
use crate::error::DeployError;
use crate::generator::{self, ArtifactGenerator};
use crate::github::{GitHubPublisher, PublishRequest, Publisher, RepoFile};
use crate::job::{
    CompletionPayload, DeployResponse, GeneratedArtifact, Job, NotificationResult, PublishedRepository, Round,
};
use crate::llm::LlmClient;
use crate::locks::KeyedLocks;
use crate::notify::{HttpNotifier, Notifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Received,
    Authorized,
    Generated,
    Published,
    Notified,
    Completed,
    Failed,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobState::Received => "received",
            JobState::Authorized => "authorized",
            JobState::Generated => "generated",
            JobState::Published => "published",
            JobState::Notified => "notified",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Result of a job that reached `Completed`.
#[derive(Debug, Clone)]
pub struct DeployOutcome {
    pub published: PublishedRepository,
    pub notification: NotificationResult,
}

impl DeployOutcome {
    pub fn into_response(self) -> DeployResponse {
        let mut warnings = Vec::new();
        if !self.notification.delivered {
            warnings.push(format!(
                "evaluator notification failed: {}",
                self.notification.error.as_deref().unwrap_or("unknown error")
            ));
        }
        if !self.published.pages_enabled {
            warnings.push("GitHub Pages could not be enabled automatically".to_string());
        }
        DeployResponse {
            status: "success".to_string(),
            repo_url: Some(self.published.repo_url),
            pages_url: Some(self.published.pages_url),
            commit_sha: Some(self.published.commit_sha),
            notification: Some(self.notification),
            warnings,
            error: None,
        }
    }
}

pub struct Deployer {
    secret: String,
    generator: ArtifactGenerator,
    publisher: Arc<dyn Publisher>,
    notifier: Arc<dyn Notifier>,
    locks: KeyedLocks,
    deadline: Duration,
}

impl Deployer {
    pub fn new(
        secret: String,
        generator: ArtifactGenerator,
        publisher: Arc<dyn Publisher>,
        notifier: Arc<dyn Notifier>,
        deadline: Duration,
    ) -> Self {
        Self {
            secret,
            generator,
            publisher,
            notifier,
            locks: KeyedLocks::new(),
            deadline,
        }
    }

    /// Wire up the real model, GitHub, and callback clients.
    pub fn from_config(config: &DeployConfig) -> anyhow::Result<Self> {
        let llm = LlmClient::new(
            config.llm_api_key.clone(),
            config.llm_api_url.clone(),
            config.generation_timeout(),
        )?
        .with_model(&config.llm_model)
        .with_max_tokens(config.llm_max_tokens);
        let generator = ArtifactGenerator::new(Arc::new(llm), config.generation_retry());

        let publisher = GitHubPublisher::new(
            &config.github_api_url,
            &config.github_username,
            &config.github_token,
            &config.pages_branch,
            config.github_timeout(),
            config.publish_retry(),
        )?;
        let notifier = HttpNotifier::new(config.notify_timeout(), config.notify_retry())?;

        Ok(Self::new(
            config.shared_secret.clone(),
            generator,
            Arc::new(publisher),
            Arc::new(notifier),
            config.job_deadline(),
        ))
    }

    /// Run a raw request body.
    ///
    /// Only the `secret` field is read before authorization. The rest of
    /// the body is decoded into a job afterwards, so an unauthorized caller
    /// learns nothing about the job schema.
    pub async fn run_request(&self, body: serde_json::Value) -> Result<DeployOutcome, DeployError> {
        let supplied = body.get("secret").and_then(serde_json::Value::as_str).unwrap_or_default();
        if !verify_secret(supplied, &self.secret) {
            tracing::warn!(from = %JobState::Received, to = %JobState::Failed, "secret mismatch, rejecting request");
            return Err(DeployError::Unauthorized);
        }
        let job: Job = serde_json::from_value(body).map_err(|e| {
            tracing::warn!(error = %e, "authorized request does not decode into a job");
            DeployError::InvalidRequest(e.to_string())
        })?;
        self.run(&job).await
    }

    /// Run one job to completion or failure.
    pub async fn run(&self, job: &Job) -> Result<DeployOutcome, DeployError> {
        let span = tracing::info_span!("job", task = %job.task, round = %job.round, nonce = %job.nonce);
        async {
            let mut state = JobState::Received;
            let result = self.drive(job, &mut state).await;
            match &result {
                Ok(outcome) => tracing::info!(
                    repo = %outcome.published.repo_url,
                    notified = outcome.notification.delivered,
                    "job completed"
                ),
                Err(e) => tracing::error!(
                    from = %state,
                    to = %JobState::Failed,
                    kind = e.kind(),
                    error = %Chain(e),
                    "job failed"
                ),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn drive(&self, job: &Job, state: &mut JobState) -> Result<DeployOutcome, DeployError> {
        tracing::info!(email = %job.email, "job received");

        if !verify_secret(&job.secret, &self.secret) {
            tracing::warn!("secret mismatch, rejecting job");
            return Err(DeployError::Unauthorized);
        }
        advance(state, JobState::Authorized);

        job.validate().map_err(DeployError::InvalidJob)?;
        let name = job.repo_name().map_err(DeployError::InvalidJob)?;
        let deadline = Instant::now() + self.deadline;
        let target = self.publisher.target(&name);

        let artifact = timeout_at(deadline, self.generator.generate(job, &target))
            .await
            .map_err(|_| DeployError::Timeout { stage: "generation" })??;
        advance(state, JobState::Generated);

        let request = PublishRequest {
            name: name.clone(),
            task: job.task.clone(),
            files: files_for_round(job.round, artifact),
        };
        let published = {
            let _guard = timeout_at(deadline, self.locks.acquire(&name))
                .await
                .map_err(|_| DeployError::Timeout { stage: "waiting for repository lock" })?;
            timeout_at(deadline, self.publisher.publish(&request))
                .await
                .map_err(|_| DeployError::Timeout { stage: "publishing" })??
        };
        advance(state, JobState::Published);

        let payload = CompletionPayload::for_job(job, &published);
        let notification = match timeout_at(deadline, self.notifier.notify(&job.evaluation_url, &payload)).await {
            Ok(result) => result,
            Err(_) => NotificationResult::failed(0, "job deadline exceeded before delivery"),
        };
        advance(state, JobState::Notified);

        advance(state, JobState::Completed);
        Ok(DeployOutcome { published, notification })
    }
}

fn advance(state: &mut JobState, next: JobState) {
    tracing::info!(from = %state, to = %next, "state transition");
    *state = next;
}

/// Files written for each round.
///
/// Round 1 writes everything. Round 2 replaces the page and the README
/// (regenerated from the new brief) and only adds the LICENSE if it is
/// missing.
pub fn files_for_round(round: Round, artifact: GeneratedArtifact) -> Vec<RepoFile> {
    let license = generator::current_license();
    match round {
        Round::Initial => vec![
            RepoFile::overwrite("index.html", artifact.source, "Initial commit: Add app"),
            RepoFile::overwrite("LICENSE", license, "Add MIT LICENSE"),
            RepoFile::overwrite("README.md", artifact.description, "Add README"),
        ],
        Round::Update => vec![
            RepoFile::overwrite("index.html", artifact.source, "Update app for round 2"),
            RepoFile::create_if_missing("LICENSE", license, "Add MIT LICENSE"),
            RepoFile::overwrite("README.md", artifact.description, "Update README for round 2"),
        ],
    }
}

/// An error followed by its sources. Internal logs only; callers get the
/// kind and the top-level message.
struct Chain<'a>(&'a dyn std::error::Error);

impl std::fmt::Display for Chain<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(cause) = source {
            write!(f, ": {cause}")?;
            source = cause.source();
        }
        Ok(())
    }
}
