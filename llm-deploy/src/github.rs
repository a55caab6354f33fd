//! Repository publisher backed by the GitHub REST API.
//!
//! Publishing is an upsert: find or create the repository, write each file
//! only when its stored content differs, then switch on GitHub Pages. Running
//! it twice with the same input converges on the same state without new
//! commits or duplicate repositories.
//!
//! Ownership is tracked through the repository description. A repository with
//! the expected name but a different description was not created by this
//! service and is reported as a conflict instead of being overwritten.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};

use crate::job::{PublishedRepository, RepoTarget};
use crate::retry::{self, RetryPolicy, Retryable};

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("repository {repo} exists and is not managed by this service")]
    Conflict { repo: String },

    #[error("GitHub rate limit exceeded")]
    RateLimited { retry_after: Option<u64> },

    #[error("GitHub unavailable: {0}")]
    Unavailable(String),

    #[error("GitHub rejected the credential: {0}")]
    Unauthorized(String),

    #[error("GitHub returned {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("unexpected GitHub response: {0}")]
    Malformed(String),
}

impl Retryable for PublishError {
    fn is_retryable(&self) -> bool {
        matches!(self, PublishError::RateLimited { .. } | PublishError::Unavailable(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Replace whatever is stored.
    Overwrite,
    /// Leave an existing file untouched.
    CreateIfMissing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoFile {
    pub path: String,
    pub content: String,
    pub mode: WriteMode,
    /// Commit message used when the file is written.
    pub message: String,
}

impl RepoFile {
    pub fn overwrite(path: &str, content: String, message: &str) -> Self {
        Self { path: path.to_string(), content, mode: WriteMode::Overwrite, message: message.to_string() }
    }

    pub fn create_if_missing(path: &str, content: String, message: &str) -> Self {
        Self { path: path.to_string(), content, mode: WriteMode::CreateIfMissing, message: message.to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    /// Repository name, derived from the task.
    pub name: String,
    /// Task identifier; part of the ownership marker.
    pub task: String,
    pub files: Vec<RepoFile>,
}

/// Description written on repositories this service creates.
pub fn ownership_marker(task: &str) -> String {
    format!("Auto-generated app for {task}")
}

/// Persists files into a hosted repository and exposes them as a site.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Addresses a repository with this name will have. No network access.
    fn target(&self, name: &str) -> RepoTarget;

    async fn publish(&self, request: &PublishRequest) -> Result<PublishedRepository, PublishError>;
}

pub struct GitHubPublisher {
    http: reqwest::Client,
    api_url: String,
    owner: String,
    token: String,
    branch: String,
    retry: RetryPolicy,
}

/// Status and decoded body of a GitHub call that did not fail outright.
struct ApiReply {
    status: StatusCode,
    body: Value,
}

impl GitHubPublisher {
    pub fn new(
        api_url: &str,
        owner: &str,
        token: &str,
        branch: &str,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, PublishError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("llm-deploy"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert("x-github-api-version", HeaderValue::from_static("2022-11-28"));
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| PublishError::Unavailable(format!("client setup: {e}")))?;
        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            owner: owner.to_string(),
            token: token.to_string(),
            branch: branch.to_string(),
            retry,
        })
    }

    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<ApiReply, PublishError> {
        let url = format!("{}{}", self.api_url, path);
        let mut req = self.http.request(method.clone(), &url).bearer_auth(&self.token);
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| PublishError::Unavailable(format!("{method} {path}: {e}")))?;

        let status = resp.status();
        let headers = resp.headers().clone();
        let text = resp
            .text()
            .await
            .map_err(|e| PublishError::Unavailable(format!("{method} {path}: {e}")))?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        classify(status, &headers, body)
    }

    async fn call(&self, method: Method, path: &str, body: Option<&Value>) -> Result<ApiReply, PublishError> {
        let what = format!("GitHub {method} {path}");
        retry::retry(self.retry, &what, |_| self.send(method.clone(), path, body)).await
    }

    /// Find or create the repository. Returns its web URL and whether it
    /// already existed.
    async fn ensure_repo(&self, request: &PublishRequest) -> Result<(String, bool), PublishError> {
        let marker = ownership_marker(&request.task);
        let repo_path = format!("/repos/{}/{}", self.owner, request.name);

        let existing = self.call(Method::GET, &repo_path, None).await?;
        match existing.status {
            StatusCode::OK => {
                return self.check_owned(&request.name, &existing.body, &marker).map(|url| (url, true));
            }
            StatusCode::NOT_FOUND => {}
            status => return Err(rejected(status, &existing.body)),
        }

        let create = json!({
            "name": request.name,
            "description": marker,
            "private": false,
            "auto_init": false,
        });
        let created = self.call(Method::POST, "/user/repos", Some(&create)).await?;
        match created.status {
            StatusCode::CREATED => {
                tracing::info!(repo = %request.name, "created repository");
                Ok((html_url(&created.body).unwrap_or_else(|| self.target(&request.name).repo_url), false))
            }
            // Name already taken: someone created it between our GET and POST,
            // or a previous attempt of this very call succeeded.
            StatusCode::UNPROCESSABLE_ENTITY => {
                let again = self.call(Method::GET, &repo_path, None).await?;
                if again.status != StatusCode::OK {
                    return Err(rejected(created.status, &created.body));
                }
                self.check_owned(&request.name, &again.body, &marker).map(|url| (url, true))
            }
            status => Err(rejected(status, &created.body)),
        }
    }

    fn check_owned(&self, name: &str, repo: &Value, marker: &str) -> Result<String, PublishError> {
        let description = repo["description"].as_str().unwrap_or_default();
        if description != marker {
            tracing::warn!(repo = %name, description, "repository name taken by an unmanaged repository");
            return Err(PublishError::Conflict { repo: name.to_string() });
        }
        Ok(html_url(repo).unwrap_or_else(|| self.target(name).repo_url))
    }

    /// Write one file if needed. Returns the commit sha when a commit was made.
    async fn write_file(&self, name: &str, file: &RepoFile) -> Result<Option<String>, PublishError> {
        let path = format!("/repos/{}/{}/contents/{}", self.owner, name, file.path);
        let path = path.as_str();
        // GET and PUT retry together so a stale sha is refreshed.
        retry::retry(self.retry, &format!("write {}", file.path), |_| async move {
            let current = self
                .send(Method::GET, &format!("{path}?ref={}", self.branch), None)
                .await?;
            let existing_sha = match current.status {
                StatusCode::OK => {
                    let sha = current.body["sha"]
                        .as_str()
                        .ok_or_else(|| PublishError::Malformed(format!("{} has no sha", file.path)))?
                        .to_string();
                    if file.mode == WriteMode::CreateIfMissing {
                        tracing::debug!(file = %file.path, "exists, leaving as is");
                        return Ok(None);
                    }
                    if decode_content(&current.body).as_deref() == Some(file.content.as_str()) {
                        tracing::debug!(file = %file.path, "unchanged, skipping write");
                        return Ok(None);
                    }
                    Some(sha)
                }
                StatusCode::NOT_FOUND => None,
                status => return Err(rejected(status, &current.body)),
            };

            let mut body = json!({
                "message": file.message,
                "content": base64::engine::general_purpose::STANDARD.encode(file.content.as_bytes()),
                "branch": self.branch,
            });
            if let Some(sha) = existing_sha {
                body["sha"] = Value::String(sha);
            }
            let put = self.send(Method::PUT, path, Some(&body)).await?;
            match put.status {
                StatusCode::OK | StatusCode::CREATED => {
                    let sha = put.body["commit"]["sha"]
                        .as_str()
                        .ok_or_else(|| PublishError::Malformed("contents response has no commit sha".into()))?;
                    tracing::info!(repo = %name, file = %file.path, commit = %sha, "wrote file");
                    Ok(Some(sha.to_string()))
                }
                // Stored sha moved underneath us.
                StatusCode::CONFLICT => Err(PublishError::Unavailable(format!("{} changed concurrently", file.path))),
                status => Err(rejected(status, &put.body)),
            }
        })
        .await
    }

    async fn head_sha(&self, name: &str) -> Result<String, PublishError> {
        let path = format!("/repos/{}/{}/commits/{}", self.owner, name, self.branch);
        let reply = self.call(Method::GET, &path, None).await?;
        if reply.status != StatusCode::OK {
            return Err(rejected(reply.status, &reply.body));
        }
        reply.body["sha"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| PublishError::Malformed("commit response has no sha".into()))
    }

    /// Turn on Pages for the branch root. Already-enabled counts as success.
    ///
    /// Propagation is asynchronous on GitHub's side and is not awaited.
    async fn enable_pages(&self, name: &str) -> Result<bool, PublishError> {
        let path = format!("/repos/{}/{}/pages", self.owner, name);
        let body = json!({ "source": { "branch": self.branch, "path": "/" } });
        let reply = self.call(Method::POST, &path, Some(&body)).await?;
        match reply.status {
            StatusCode::CREATED => {
                tracing::info!(repo = %name, "enabled GitHub Pages");
                Ok(true)
            }
            StatusCode::CONFLICT => {
                tracing::debug!(repo = %name, "GitHub Pages already enabled");
                Ok(true)
            }
            status => {
                tracing::warn!(
                    repo = %name,
                    status = status.as_u16(),
                    message = %api_message(&reply.body),
                    "could not enable GitHub Pages; enable it in the repository settings"
                );
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl Publisher for GitHubPublisher {
    fn target(&self, name: &str) -> RepoTarget {
        RepoTarget {
            name: name.to_string(),
            repo_url: format!("https://github.com/{}/{}", self.owner, name),
            pages_url: format!("https://{}.github.io/{}/", self.owner.to_lowercase(), name),
        }
    }

    async fn publish(&self, request: &PublishRequest) -> Result<PublishedRepository, PublishError> {
        let (repo_url, reused) = self.ensure_repo(request).await?;

        let mut last_commit = None;
        for file in &request.files {
            if let Some(sha) = self.write_file(&request.name, file).await? {
                last_commit = Some(sha);
            }
        }
        let commit_sha = match last_commit {
            Some(sha) => sha,
            None => self.head_sha(&request.name).await?,
        };

        let pages_enabled = self.enable_pages(&request.name).await?;

        Ok(PublishedRepository {
            name: request.name.clone(),
            repo_url,
            pages_url: self.target(&request.name).pages_url,
            commit_sha,
            reused,
            pages_enabled,
        })
    }
}

/// Map transport-level outcomes to errors; everything else is handed back
/// for the caller to interpret.
fn classify(status: StatusCode, headers: &HeaderMap, body: Value) -> Result<ApiReply, PublishError> {
    let retry_after = headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let exhausted = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == "0");

    match status {
        StatusCode::TOO_MANY_REQUESTS => Err(PublishError::RateLimited { retry_after }),
        StatusCode::FORBIDDEN if exhausted || retry_after.is_some() => {
            Err(PublishError::RateLimited { retry_after })
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(PublishError::Unauthorized(api_message(&body)))
        }
        s if s.is_server_error() => Err(PublishError::Unavailable(format!("{s}: {}", api_message(&body)))),
        _ => Ok(ApiReply { status, body }),
    }
}

fn rejected(status: StatusCode, body: &Value) -> PublishError {
    PublishError::Rejected { status: status.as_u16(), message: api_message(body) }
}

fn api_message(body: &Value) -> String {
    match body {
        Value::String(s) => s.clone(),
        other => other["message"].as_str().unwrap_or("no message").to_string(),
    }
}

fn html_url(repo: &Value) -> Option<String> {
    repo["html_url"].as_str().map(str::to_string)
}

/// Decode the base64 `content` field of a contents response.
fn decode_content(body: &Value) -> Option<String> {
    if body["encoding"].as_str() != Some("base64") {
        return None;
    }
    let packed: String = body["content"].as_str()?.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = base64::engine::general_purpose::STANDARD.decode(packed).ok()?;
    String::from_utf8(bytes).ok()
}
