//! In-memory fakes for the external seams (testing only).
//!
//! `ScriptedModel`, `MemoryPublisher`, and `RecordingNotifier` satisfy the
//! trait contracts without network access and count every call so tests can
//! assert which external systems a job touched.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::generator::GenerationError;
use crate::github::{ownership_marker, PublishError, PublishRequest, Publisher, WriteMode};
use crate::job::{CompletionPayload, NotificationResult, PublishedRepository, RepoTarget};
use crate::llm::ModelClient;
use crate::notify::Notifier;

// ---------------------------------------------------------------------------
// ScriptedModel
// ---------------------------------------------------------------------------

/// What the fake model does on each call.
#[derive(Debug, Clone)]
pub enum ModelBehavior {
    /// Wrap the brief's first line in a minimal page with a heading.
    EchoBrief,
    /// Always return this text.
    Reply(String),
    /// Always fail with an HTTP status.
    Fail(u16),
}

#[derive(Debug)]
pub struct ScriptedModel {
    behavior: ModelBehavior,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new(behavior: ModelBehavior) -> Self {
        Self { behavior, calls: AtomicUsize::new(0), prompts: Mutex::new(Vec::new()) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn complete(&self, _system: &str, prompt: &str) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(prompt.to_string());
        match &self.behavior {
            ModelBehavior::EchoBrief => Ok(page_for_prompt(prompt)),
            ModelBehavior::Reply(text) => Ok(text.clone()),
            ModelBehavior::Fail(status) => Err(GenerationError::Status {
                status: *status,
                body: "scripted failure".into(),
            }),
        }
    }
}

/// Minimal page for a prompt: a heading, plus a paragraph if the brief asks
/// for one.
pub fn page_for_prompt(prompt: &str) -> String {
    let brief = prompt
        .split("REQUIREMENTS:\n")
        .nth(1)
        .and_then(|rest| rest.lines().next())
        .unwrap_or("")
        .trim();
    let mut body = String::from("<h1>Hello!</h1>");
    if brief.contains("paragraph") {
        body.push_str("\n<p>Welcome to the page.</p>");
    }
    format!("<!DOCTYPE html>\n<html>\n<head><title>{brief}</title></head>\n<body>\n{body}\n</body>\n</html>")
}

// ---------------------------------------------------------------------------
// MemoryPublisher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct MemoryRepo {
    pub description: String,
    pub files: BTreeMap<String, String>,
    pub commits: Vec<String>,
    pub pages: bool,
}

/// Publisher backed by a map of repositories.
#[derive(Debug)]
pub struct MemoryPublisher {
    owner: String,
    repos: Mutex<HashMap<String, MemoryRepo>>,
    creates: AtomicUsize,
    calls: AtomicUsize,
    fail_with: Mutex<Option<fn() -> PublishError>>,
}

impl MemoryPublisher {
    pub fn new(owner: &str) -> Self {
        Self {
            owner: owner.to_string(),
            repos: Mutex::new(HashMap::new()),
            creates: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            fail_with: Mutex::new(None),
        }
    }

    /// Seed a repository this service did not create.
    pub fn insert_foreign(&self, name: &str) {
        self.repos.lock().insert(
            name.to_string(),
            MemoryRepo { description: "someone else's project".into(), ..Default::default() },
        );
    }

    /// Make every subsequent publish fail.
    pub fn fail_with(&self, make: fn() -> PublishError) {
        *self.fail_with.lock() = Some(make);
    }

    pub fn repo(&self, name: &str) -> Option<MemoryRepo> {
        self.repos.lock().get(name).cloned()
    }

    pub fn repo_count(&self) -> usize {
        self.repos.lock().len()
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    fn target(&self, name: &str) -> RepoTarget {
        RepoTarget {
            name: name.to_string(),
            repo_url: format!("https://github.com/{}/{}", self.owner, name),
            pages_url: format!("https://{}.github.io/{}/", self.owner.to_lowercase(), name),
        }
    }

    async fn publish(&self, request: &PublishRequest) -> Result<PublishedRepository, PublishError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(make) = *self.fail_with.lock() {
            return Err(make());
        }

        let marker = ownership_marker(&request.task);
        let mut repos = self.repos.lock();
        let (repo, reused) = match repos.entry(request.name.clone()) {
            Entry::Occupied(entry) => {
                if entry.get().description != marker {
                    return Err(PublishError::Conflict { repo: request.name.clone() });
                }
                (entry.into_mut(), true)
            }
            Entry::Vacant(entry) => {
                self.creates.fetch_add(1, Ordering::SeqCst);
                (entry.insert(MemoryRepo { description: marker, ..Default::default() }), false)
            }
        };

        for file in &request.files {
            let stored = repo.files.get(&file.path);
            let skip = match (stored, file.mode) {
                (Some(_), WriteMode::CreateIfMissing) => true,
                (Some(current), WriteMode::Overwrite) => current == &file.content,
                (None, _) => false,
            };
            if !skip {
                repo.files.insert(file.path.clone(), file.content.clone());
                repo.commits.push(format!("commit-{}", repo.commits.len() + 1));
            }
        }
        repo.pages = true;

        let target = self.target(&request.name);
        Ok(PublishedRepository {
            name: request.name.clone(),
            repo_url: target.repo_url,
            pages_url: target.pages_url,
            commit_sha: repo.commits.last().cloned().unwrap_or_default(),
            reused,
            pages_enabled: true,
        })
    }
}

// ---------------------------------------------------------------------------
// RecordingNotifier
// ---------------------------------------------------------------------------

/// Notifier that records payloads and either accepts or rejects them.
#[derive(Debug)]
pub struct RecordingNotifier {
    reachable: bool,
    sent: Mutex<Vec<(String, CompletionPayload)>>,
}

impl RecordingNotifier {
    pub fn reachable() -> Self {
        Self { reachable: true, sent: Mutex::new(Vec::new()) }
    }

    pub fn unreachable() -> Self {
        Self { reachable: false, sent: Mutex::new(Vec::new()) }
    }

    pub fn sent(&self) -> Vec<(String, CompletionPayload)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, url: &str, payload: &CompletionPayload) -> NotificationResult {
        self.sent.lock().push((url.to_string(), payload.clone()));
        if self.reachable {
            NotificationResult::delivered(1, serde_json::json!({"received": true}))
        } else {
            NotificationResult::failed(3, "callback unreachable: connection refused")
        }
    }
}
