//! Loopback mock servers for the three external systems.
//!
//! Each mock is a small axum app bound to `127.0.0.1:0` that records what it
//! receives so tests can assert on the exact traffic a job produced.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use serde_json::{json, Value};

use llm_deploy::generator::ArtifactGenerator;
use llm_deploy::github::GitHubPublisher;
use llm_deploy::llm::LlmClient;
use llm_deploy::notify::HttpNotifier;
use llm_deploy::pipeline::Deployer;
use llm_deploy::retry::RetryPolicy;

pub const OWNER: &str = "octo";
pub const TOKEN: &str = "ghp_test";
pub const SECRET: &str = "s3cret";

/// Serve `app` on an ephemeral loopback port.
pub async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// A loopback URL nothing is listening on.
pub async fn dead_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/notify")
}

pub fn job_json(task: &str, round: u8, brief: &str, evaluation_url: &str) -> Value {
    json!({
        "email": "student@example.com",
        "secret": SECRET,
        "task": task,
        "round": round,
        "nonce": format!("nonce-{round}"),
        "brief": brief,
        "checks": ["heading present"],
        "evaluation_url": evaluation_url,
        "attachments": []
    })
}

// ── Mock GitHub ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MockFile {
    pub sha: String,
    pub content: String,
}

#[derive(Debug, Clone, Default)]
pub struct MockRepo {
    pub description: String,
    pub files: BTreeMap<String, MockFile>,
    pub commits: Vec<String>,
    pub pages: bool,
}

#[derive(Debug, Default)]
pub struct GitHubState {
    pub repos: HashMap<String, MockRepo>,
    /// `"METHOD path"` for every request received.
    pub requests: Vec<String>,
    /// Answer this many upcoming requests with a rate-limit 403.
    pub rate_limited: usize,
}

#[derive(Clone, Default)]
pub struct MockGitHub {
    pub state: Arc<Mutex<GitHubState>>,
}

impl MockGitHub {
    pub async fn start() -> (Self, String) {
        let mock = Self::default();
        let app = Router::new()
            .route("/user/repos", post(create_repo))
            .route("/repos/{owner}/{repo}", get(get_repo))
            .route("/repos/{owner}/{repo}/contents/{*path}", get(get_contents).put(put_contents))
            .route("/repos/{owner}/{repo}/commits/{branch}", get(get_commit))
            .route("/repos/{owner}/{repo}/pages", post(enable_pages))
            .with_state(mock.clone());
        let addr = serve(app).await;
        (mock, format!("http://{addr}"))
    }

    pub fn repo(&self, name: &str) -> Option<MockRepo> {
        self.state.lock().unwrap().repos.get(name).cloned()
    }

    pub fn repo_count(&self) -> usize {
        self.state.lock().unwrap().repos.len()
    }

    pub fn requests(&self) -> Vec<String> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.requests().iter().filter(|r| r.starts_with(prefix)).count()
    }

    pub fn insert_repo(&self, name: &str, description: &str) {
        self.state.lock().unwrap().repos.insert(
            name.to_string(),
            MockRepo { description: description.to_string(), ..Default::default() },
        );
    }

    pub fn rate_limit_next(&self, n: usize) {
        self.state.lock().unwrap().rate_limited = n;
    }
}

fn gh_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "message": message }))).into_response()
}

/// Record the request and apply auth and rate limiting.
fn gate(state: &mut GitHubState, headers: &HeaderMap, line: String) -> Option<Response> {
    state.requests.push(line);
    let expected = format!("Bearer {TOKEN}");
    let auth = headers.get("authorization").and_then(|v| v.to_str().ok());
    if auth != Some(expected.as_str()) {
        return Some(gh_error(StatusCode::UNAUTHORIZED, "Bad credentials"));
    }
    if state.rate_limited > 0 {
        state.rate_limited -= 1;
        let mut resp = gh_error(StatusCode::FORBIDDEN, "API rate limit exceeded");
        resp.headers_mut().insert("x-ratelimit-remaining", "0".parse().unwrap());
        return Some(resp);
    }
    None
}

fn repo_json(name: &str, repo: &MockRepo) -> Value {
    json!({
        "name": name,
        "full_name": format!("{OWNER}/{name}"),
        "description": repo.description,
        "html_url": format!("https://github.com/{OWNER}/{name}"),
    })
}

async fn get_repo(
    State(gh): State<MockGitHub>,
    Path((_owner, repo)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let mut st = gh.state.lock().unwrap();
    if let Some(resp) = gate(&mut st, &headers, format!("GET /repos/{repo}")) {
        return resp;
    }
    match st.repos.get(&repo) {
        Some(r) => Json(repo_json(&repo, r)).into_response(),
        None => gh_error(StatusCode::NOT_FOUND, "Not Found"),
    }
}

async fn create_repo(State(gh): State<MockGitHub>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    let mut st = gh.state.lock().unwrap();
    let name = body["name"].as_str().unwrap_or_default().to_string();
    if let Some(resp) = gate(&mut st, &headers, format!("POST /user/repos {name}")) {
        return resp;
    }
    if st.repos.contains_key(&name) {
        return gh_error(StatusCode::UNPROCESSABLE_ENTITY, "Repository creation failed.");
    }
    let repo = MockRepo {
        description: body["description"].as_str().unwrap_or_default().to_string(),
        ..Default::default()
    };
    let out = repo_json(&name, &repo);
    st.repos.insert(name, repo);
    (StatusCode::CREATED, Json(out)).into_response()
}

async fn get_contents(
    State(gh): State<MockGitHub>,
    Path((_owner, repo, path)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Response {
    let mut st = gh.state.lock().unwrap();
    if let Some(resp) = gate(&mut st, &headers, format!("GET /repos/{repo}/contents/{path}")) {
        return resp;
    }
    let Some(file) = st.repos.get(&repo).and_then(|r| r.files.get(&path)) else {
        return gh_error(StatusCode::NOT_FOUND, "Not Found");
    };
    // GitHub wraps base64 content at 60 columns.
    let encoded = base64::engine::general_purpose::STANDARD.encode(file.content.as_bytes());
    let wrapped: Vec<String> = encoded
        .as_bytes()
        .chunks(60)
        .map(|c| String::from_utf8_lossy(c).to_string())
        .collect();
    Json(json!({
        "path": path,
        "sha": file.sha,
        "encoding": "base64",
        "content": format!("{}\n", wrapped.join("\n")),
    }))
    .into_response()
}

async fn put_contents(
    State(gh): State<MockGitHub>,
    Path((_owner, repo, path)): Path<(String, String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut st = gh.state.lock().unwrap();
    if let Some(resp) = gate(&mut st, &headers, format!("PUT /repos/{repo}/contents/{path}")) {
        return resp;
    }
    let Some(r) = st.repos.get_mut(&repo) else {
        return gh_error(StatusCode::NOT_FOUND, "Not Found");
    };
    let existed = match r.files.get(&path) {
        Some(current) => {
            if body["sha"].as_str() != Some(current.sha.as_str()) {
                return gh_error(StatusCode::CONFLICT, "sha does not match");
            }
            true
        }
        None => false,
    };
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(body["content"].as_str().unwrap_or_default())
        .unwrap();
    let commit = format!("commit-{}", r.commits.len() + 1);
    r.commits.push(commit.clone());
    let blob = format!("blob-{}-{}", path, r.commits.len());
    r.files.insert(
        path,
        MockFile { sha: blob.clone(), content: String::from_utf8(bytes).unwrap() },
    );
    let status = if existed { StatusCode::OK } else { StatusCode::CREATED };
    (status, Json(json!({ "content": { "sha": blob }, "commit": { "sha": commit } }))).into_response()
}

async fn get_commit(
    State(gh): State<MockGitHub>,
    Path((_owner, repo, branch)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Response {
    let mut st = gh.state.lock().unwrap();
    if let Some(resp) = gate(&mut st, &headers, format!("GET /repos/{repo}/commits/{branch}")) {
        return resp;
    }
    match st.repos.get(&repo).and_then(|r| r.commits.last()) {
        Some(sha) => Json(json!({ "sha": sha })).into_response(),
        None => gh_error(StatusCode::CONFLICT, "Git Repository is empty."),
    }
}

async fn enable_pages(
    State(gh): State<MockGitHub>,
    Path((_owner, repo)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let mut st = gh.state.lock().unwrap();
    if let Some(resp) = gate(&mut st, &headers, format!("POST /repos/{repo}/pages")) {
        return resp;
    }
    let Some(r) = st.repos.get_mut(&repo) else {
        return gh_error(StatusCode::NOT_FOUND, "Not Found");
    };
    if r.pages {
        return gh_error(StatusCode::CONFLICT, "GitHub Pages is already enabled.");
    }
    r.pages = true;
    (StatusCode::CREATED, Json(json!({ "html_url": format!("https://{OWNER}.github.io/{repo}/") }))).into_response()
}

// ── Mock evaluator ─────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct MockEvaluator {
    pub received: Arc<Mutex<Vec<Value>>>,
    /// Answer this many upcoming callbacks with a 503.
    pub failures: Arc<Mutex<usize>>,
}

impl MockEvaluator {
    pub async fn start() -> (Self, String) {
        let mock = Self::default();
        let app = Router::new().route("/notify", post(evaluator_notify)).with_state(mock.clone());
        let addr = serve(app).await;
        (mock, format!("http://{addr}/notify"))
    }

    pub fn received(&self) -> Vec<Value> {
        self.received.lock().unwrap().clone()
    }

    pub fn fail_next(&self, n: usize) {
        *self.failures.lock().unwrap() = n;
    }
}

async fn evaluator_notify(State(ev): State<MockEvaluator>, Json(body): Json<Value>) -> Response {
    ev.received.lock().unwrap().push(body);
    let mut failures = ev.failures.lock().unwrap();
    if *failures > 0 {
        *failures -= 1;
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    Json(json!({ "ok": true })).into_response()
}

// ── Mock model gateway ─────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct MockModel {
    pub calls: Arc<Mutex<usize>>,
    /// When set, every call answers with this status.
    pub fail_status: Arc<Mutex<Option<u16>>>,
}

impl MockModel {
    pub async fn start() -> (Self, String) {
        let mock = Self::default();
        let app = Router::new()
            .route("/v1/chat/completions", post(model_complete))
            .with_state(mock.clone());
        let addr = serve(app).await;
        (mock, format!("http://{addr}/v1/chat/completions"))
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }

    pub fn fail_with(&self, status: u16) {
        *self.fail_status.lock().unwrap() = Some(status);
    }
}

async fn model_complete(State(m): State<MockModel>, Json(body): Json<Value>) -> Response {
    *m.calls.lock().unwrap() += 1;
    if let Some(status) = *m.fail_status.lock().unwrap() {
        let status = StatusCode::from_u16(status).unwrap();
        return (status, Json(json!({ "error": { "message": "quota exceeded" } }))).into_response();
    }
    let prompt = body["messages"]
        .as_array()
        .and_then(|msgs| msgs.last())
        .and_then(|m| m["content"].as_str())
        .unwrap_or_default();
    // Models often fence their answer despite instructions.
    let page = format!("```html\n{}\n```", llm_deploy::fakes::page_for_prompt(prompt));
    Json(json!({
        "id": "gen-test",
        "choices": [{
            "index": 0,
            "finish_reason": "stop",
            "message": { "role": "assistant", "content": page }
        }],
        "usage": { "prompt_tokens": 100, "completion_tokens": 50, "total_tokens": 150 }
    }))
    .into_response()
}

// ── Wiring ─────────────────────────────────────────────────────────────

/// A deployer whose clients all point at loopback mocks, with no backoff.
pub fn deployer(model_url: &str, github_url: &str) -> Deployer {
    let timeout = Duration::from_secs(5);
    let llm = LlmClient::new("pipe-token".into(), model_url.to_string(), timeout).unwrap();
    let generator = ArtifactGenerator::new(Arc::new(llm), RetryPolicy::once());
    let publisher = GitHubPublisher::new(
        github_url,
        OWNER,
        TOKEN,
        "main",
        timeout,
        RetryPolicy::fixed(3, Duration::ZERO),
    )
    .unwrap();
    let notifier = HttpNotifier::new(timeout, RetryPolicy::linear(3, Duration::ZERO)).unwrap();
    Deployer::new(
        SECRET.to_string(),
        generator,
        Arc::new(publisher),
        Arc::new(notifier),
        Duration::from_secs(60),
    )
}
