//! Job records and the JSON shapes exchanged with callers and the evaluator.

use serde::{Deserialize, Serialize};

/// Maximum repository name length accepted by GitHub.
const MAX_REPO_NAME: usize = 100;

/// Which pass over a task this job is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Round {
    /// First delivery: create the repository.
    Initial,
    /// Revision: update the repository created by round 1.
    Update,
}

impl TryFrom<u8> for Round {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Round::Initial),
            2 => Ok(Round::Update),
            other => Err(format!("round must be 1 or 2, got {other}")),
        }
    }
}

impl From<Round> for u8 {
    fn from(round: Round) -> u8 {
        match round {
            Round::Initial => 1,
            Round::Update => 2,
        }
    }
}

impl std::fmt::Display for Round {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    /// Usually a `data:` URI.
    pub url: String,
}

/// One inbound deployment request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub email: String,
    pub secret: String,
    pub task: String,
    pub round: Round,
    pub nonce: String,
    pub brief: String,
    #[serde(default)]
    pub checks: Vec<String>,
    pub evaluation_url: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl Job {
    /// Checks that only need the job itself. Runs after the secret gate.
    pub fn validate(&self) -> Result<(), String> {
        if self.brief.trim().is_empty() {
            return Err("brief must not be empty".into());
        }
        if self.task.trim().is_empty() {
            return Err("task must not be empty".into());
        }
        let url = url::Url::parse(&self.evaluation_url)
            .map_err(|e| format!("evaluation_url is not a valid URL: {e}"))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(format!("evaluation_url must be http(s), got {}", url.scheme()));
        }
        repo_name_for(&self.task)?;
        Ok(())
    }

    /// Repository that holds this job's artifact.
    pub fn repo_name(&self) -> Result<String, String> {
        repo_name_for(&self.task)
    }
}

/// Derive the repository name from a task identifier.
///
/// Deterministic: every round of the same task maps to the same name.
/// Characters GitHub does not allow become `-`.
pub fn repo_name_for(task: &str) -> Result<String, String> {
    let name: String = task
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let name = name.trim_matches('.').to_string();
    if name.is_empty() || name.chars().all(|c| c == '-') {
        return Err(format!("task {task:?} does not yield a usable repository name"));
    }
    if name.len() > MAX_REPO_NAME {
        return Err(format!("task {task:?} is longer than {MAX_REPO_NAME} characters"));
    }
    Ok(name)
}

/// Output of the artifact generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedArtifact {
    /// Self-contained HTML page.
    pub source: String,
    /// README describing the page.
    pub description: String,
}

/// Where a repository lives and where its site will be served.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoTarget {
    pub name: String,
    pub repo_url: String,
    /// Predicted: Pages propagation is not awaited.
    pub pages_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedRepository {
    pub name: String,
    pub repo_url: String,
    pub pages_url: String,
    /// Head of the Pages branch after the writes.
    pub commit_sha: String,
    /// False when the repository did not exist before this publish.
    pub reused: bool,
    pub pages_enabled: bool,
}

/// Body POSTed to the evaluator's callback URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionPayload {
    pub email: String,
    pub task: String,
    pub round: Round,
    pub nonce: String,
    pub repo_url: String,
    pub commit_sha: String,
    pub pages_url: String,
    pub status: String,
}

impl CompletionPayload {
    pub fn for_job(job: &Job, published: &PublishedRepository) -> Self {
        Self {
            email: job.email.clone(),
            task: job.task.clone(),
            round: job.round,
            nonce: job.nonce.clone(),
            repo_url: published.repo_url.clone(),
            commit_sha: published.commit_sha.clone(),
            pages_url: published.pages_url.clone(),
            status: "success".to_string(),
        }
    }
}

/// What happened when the evaluator was told about the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationResult {
    pub delivered: bool,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NotificationResult {
    pub fn delivered(attempts: u32, response: serde_json::Value) -> Self {
        Self { delivered: true, attempts, response: Some(response), error: None }
    }

    pub fn failed(attempts: u32, error: impl Into<String>) -> Self {
        Self { delivered: false, attempts, response: None, error: Some(error.into()) }
    }
}

/// Machine-readable failure returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

/// Response to `POST /deploy-endpoint`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployResponse {
    /// `"success"` or `"error"`.
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<NotificationResult>,
    /// Set when the job succeeded but something downstream did not.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl DeployResponse {
    pub fn error(kind: &str, message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            repo_url: None,
            pages_url: None,
            commit_sha: None,
            notification: None,
            warnings: Vec::new(),
            error: Some(ErrorBody { kind: kind.to_string(), message: message.into() }),
        }
    }
}
