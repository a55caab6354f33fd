//! Process configuration.
//!
//! Parsed once at startup from flags and environment variables, then shared
//! read-only with every component. Nothing below the binary reads the
//! environment directly.

use std::fmt;
use std::time::Duration;

use clap::Parser;

use crate::retry::RetryPolicy;

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8000";
pub const DEFAULT_LLM_API_URL: &str = "https://aipipe.org/openrouter/v1/chat/completions";
pub const DEFAULT_LLM_MODEL: &str = "anthropic/claude-sonnet-4.5";
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

#[derive(Parser, Clone)]
#[command(
    name = "llm-deploy",
    about = "Generate a page with an LLM, publish it to GitHub Pages, notify the evaluator"
)]
pub struct DeployConfig {
    /// Address to listen on (host:port)
    #[arg(long, env = "LISTEN_ADDR")]
    pub listen_addr: Option<String>,

    /// Port to listen on when no address is given. Hosting platforms
    /// usually only provide this.
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// GitHub personal access token used for repository and Pages calls
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: String,

    /// GitHub account that owns the generated repositories
    #[arg(long, env = "GITHUB_USERNAME")]
    pub github_username: String,

    /// Shared secret every deploy request must carry
    #[arg(long = "secret", env = "YOUR_SECRET", hide_env_values = true)]
    pub shared_secret: String,

    /// API token for the model gateway
    #[arg(long, env = "AIPIPE_TOKEN", hide_env_values = true)]
    pub llm_api_key: String,

    /// OpenAI-compatible chat-completions endpoint
    #[arg(long, env = "LLM_API_URL", default_value = DEFAULT_LLM_API_URL)]
    pub llm_api_url: String,

    /// Model identifier passed to the gateway
    #[arg(long, env = "LLM_MODEL", default_value = DEFAULT_LLM_MODEL)]
    pub llm_model: String,

    #[arg(long, env = "LLM_MAX_TOKENS", default_value_t = 8000)]
    pub llm_max_tokens: u32,

    /// Base URL of the GitHub REST API
    #[arg(long, env = "GITHUB_API_URL", default_value = DEFAULT_GITHUB_API_URL)]
    pub github_api_url: String,

    /// Branch that holds the site and serves GitHub Pages
    #[arg(long, env = "PAGES_BRANCH", default_value = "main")]
    pub pages_branch: String,

    #[arg(long, env = "GENERATION_TIMEOUT_SECS", default_value_t = 90)]
    pub generation_timeout_secs: u64,

    #[arg(long, env = "GITHUB_TIMEOUT_SECS", default_value_t = 30)]
    pub github_timeout_secs: u64,

    #[arg(long, env = "NOTIFY_TIMEOUT_SECS", default_value_t = 10)]
    pub notify_timeout_secs: u64,

    /// Wall-clock budget for a whole job, from receipt to response
    #[arg(long, env = "JOB_DEADLINE_SECS", default_value_t = 600)]
    pub job_deadline_secs: u64,

    #[arg(long, env = "GENERATION_ATTEMPTS", default_value_t = 2)]
    pub generation_attempts: u32,

    #[arg(long, env = "PUBLISH_ATTEMPTS", default_value_t = 3)]
    pub publish_attempts: u32,

    #[arg(long, env = "NOTIFY_ATTEMPTS", default_value_t = 3)]
    pub notify_attempts: u32,

    /// Linear backoff step between notification attempts
    #[arg(long, env = "NOTIFY_BACKOFF_SECS", default_value_t = 2)]
    pub notify_backoff_secs: u64,

    /// Emit JSON logs instead of human-readable output
    #[arg(long, env = "LOG_JSON", value_parser = clap::builder::BoolishValueParser::new())]
    pub log_json: bool,
}

impl DeployConfig {
    /// Reject configurations that would fail on the first request.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("GITHUB_TOKEN", &self.github_token),
            ("GITHUB_USERNAME", &self.github_username),
            ("YOUR_SECRET", &self.shared_secret),
            ("AIPIPE_TOKEN", &self.llm_api_key),
        ];
        for (name, value) in required {
            if value.is_empty() {
                return Err(ConfigError::Missing(name));
            }
        }
        if self.generation_attempts == 0 || self.publish_attempts == 0 || self.notify_attempts == 0 {
            return Err(ConfigError::Invalid("attempt counts must be at least 1".into()));
        }
        if self.job_deadline_secs == 0 {
            return Err(ConfigError::Invalid("JOB_DEADLINE_SECS must be positive".into()));
        }
        url::Url::parse(&self.llm_api_url)
            .map_err(|e| ConfigError::Invalid(format!("LLM_API_URL: {e}")))?;
        url::Url::parse(&self.github_api_url)
            .map_err(|e| ConfigError::Invalid(format!("GITHUB_API_URL: {e}")))?;
        Ok(())
    }

    /// Bind address: an explicit address wins, then `PORT`, then the default.
    pub fn bind_addr(&self) -> String {
        match (&self.listen_addr, self.port) {
            (Some(addr), _) => addr.clone(),
            (None, Some(port)) => format!("0.0.0.0:{port}"),
            (None, None) => DEFAULT_LISTEN_ADDR.to_string(),
        }
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    pub fn github_timeout(&self) -> Duration {
        Duration::from_secs(self.github_timeout_secs)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_secs)
    }

    pub fn job_deadline(&self) -> Duration {
        Duration::from_secs(self.job_deadline_secs)
    }

    /// Model calls: few attempts, fixed short pause.
    pub fn generation_retry(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.generation_attempts, Duration::from_secs(2))
    }

    /// GitHub calls: exponential backoff on rate limits and 5xx.
    pub fn publish_retry(&self) -> RetryPolicy {
        RetryPolicy::exponential(self.publish_attempts, Duration::from_secs(2), Duration::from_secs(30))
    }

    /// Evaluator callbacks: linear backoff.
    pub fn notify_retry(&self) -> RetryPolicy {
        RetryPolicy::linear(self.notify_attempts, Duration::from_secs(self.notify_backoff_secs))
    }
}

impl fmt::Debug for DeployConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeployConfig")
            .field("listen_addr", &self.listen_addr)
            .field("port", &self.port)
            .field("github_username", &self.github_username)
            .field("github_token", &redact(&self.github_token))
            .field("shared_secret", &redact(&self.shared_secret))
            .field("llm_api_key", &redact(&self.llm_api_key))
            .field("llm_api_url", &self.llm_api_url)
            .field("llm_model", &self.llm_model)
            .field("github_api_url", &self.github_api_url)
            .field("pages_branch", &self.pages_branch)
            .field("job_deadline_secs", &self.job_deadline_secs)
            .finish_non_exhaustive()
    }
}

/// Mask a secret for logs, keeping only its length visible.
pub fn redact(secret: &str) -> String {
    "*".repeat(secret.chars().count().min(20))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid setting: {0}")]
    Invalid(String),
}
