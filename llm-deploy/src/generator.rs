//! Artifact generation: brief in, single-file web page and README out.
//!
//! The model writes the page. The README and LICENSE are rendered locally
//! from templates so they are deterministic for identical input.

use std::sync::Arc;

use chrono::Datelike;

use crate::job::{Attachment, GeneratedArtifact, Job, RepoTarget};
use crate::llm::ModelClient;
use crate::retry::{self, RetryPolicy, Retryable};

const SYSTEM_PROMPT: &str = "You are an expert web developer. You answer with a single complete HTML document and nothing else.";

/// Attachment URLs are usually data URIs; only a prefix goes into the prompt.
const ATTACHMENT_URL_PREVIEW: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("model request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("model API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed model reply: {0}")]
    Malformed(String),

    #[error("{0}")]
    InvalidInput(String),
}

impl Retryable for GenerationError {
    fn is_retryable(&self) -> bool {
        match self {
            GenerationError::Request(_) | GenerationError::Malformed(_) => true,
            GenerationError::Status { status, .. } => *status == 429 || *status >= 500,
            GenerationError::InvalidInput(_) => false,
        }
    }
}

/// Produces the page and its README for a job.
pub struct ArtifactGenerator {
    model: Arc<dyn ModelClient>,
    retry: RetryPolicy,
}

impl ArtifactGenerator {
    pub fn new(model: Arc<dyn ModelClient>, retry: RetryPolicy) -> Self {
        Self { model, retry }
    }

    /// Ask the model for the page, then render the README around it.
    ///
    /// Never substitutes placeholder content: any failure is returned.
    pub async fn generate(&self, job: &Job, target: &RepoTarget) -> Result<GeneratedArtifact, GenerationError> {
        if job.brief.trim().is_empty() {
            return Err(GenerationError::InvalidInput("brief must not be empty".into()));
        }
        let prompt = build_prompt(&job.brief, &job.checks, &job.attachments);

        let source = retry::retry(self.retry, "generation", |_| {
            let model = Arc::clone(&self.model);
            let prompt = prompt.clone();
            async move {
                let reply = model.complete(SYSTEM_PROMPT, &prompt).await?;
                extract_html(&reply)
            }
        })
        .await?;

        let description = render_readme(&job.task, &job.brief, &job.checks, target);
        Ok(GeneratedArtifact { source, description })
    }
}

/// Build the user prompt for a brief.
pub fn build_prompt(brief: &str, checks: &[String], attachments: &[Attachment]) -> String {
    let mut attachment_info = String::new();
    if !attachments.is_empty() {
        attachment_info.push_str("\n\nAttachments:\n");
        for att in attachments {
            let preview: String = att.url.chars().take(ATTACHMENT_URL_PREVIEW).collect();
            attachment_info.push_str(&format!("- {}: {}...\n", att.name, preview));
        }
    }

    format!(
        "Generate a COMPLETE, PRODUCTION-READY single HTML file for this app.

REQUIREMENTS:
{brief}

EVALUATION CHECKS:
{checks}
{attachment_info}
CRITICAL REQUIREMENTS:
1. Everything must be in ONE HTML file (inline CSS and JavaScript)
2. Use CDN links for external libraries (Bootstrap, marked, highlight.js, etc.)
3. Handle attachments by decoding data URIs in JavaScript
4. Make it work on GitHub Pages (static hosting)
5. Follow all checks exactly
6. Make it clean, professional, and production-ready
7. Add error handling and user feedback

OUTPUT FORMAT:
Return ONLY the complete HTML code, nothing else. No explanations, no markdown code blocks.
Start directly with <!DOCTYPE html>",
        checks = bullet_list(checks),
    )
}

/// Pull the HTML document out of a model reply.
///
/// Strips a surrounding Markdown fence if the model added one anyway.
pub fn extract_html(reply: &str) -> Result<String, GenerationError> {
    let mut text = reply.trim();
    if let Some(rest) = text.strip_prefix("```") {
        // Drop the info string (`html`, `HTML`, or nothing) up to the newline.
        text = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
        text = text.trim_end();
        text = text.strip_suffix("```").unwrap_or(text).trim();
    }
    if text.is_empty() {
        return Err(GenerationError::Malformed("empty reply".into()));
    }
    let lower = text.to_ascii_lowercase();
    if !lower.contains("<html") && !lower.contains("<!doctype") {
        return Err(GenerationError::Malformed("reply is not an HTML document".into()));
    }
    Ok(text.to_string())
}

fn bullet_list(items: &[String]) -> String {
    items.iter().map(|item| format!("- {item}")).collect::<Vec<_>>().join("\n")
}

/// README for the generated repository.
pub fn render_readme(task: &str, brief: &str, checks: &[String], target: &RepoTarget) -> String {
    format!(
        "# {task}

## Overview
This is an automated web application generated to fulfill the following requirements.

## Requirements
{brief}

## Evaluation Criteria
{checks}

## Setup
This is a static web application hosted on GitHub Pages. No installation required.

## Usage
1. Visit the live site: [GitHub Pages URL]({pages_url})
2. The application loads automatically
3. Follow on-screen instructions

## Technical Implementation
- **Frontend**: HTML5, CSS3, JavaScript
- **Hosting**: GitHub Pages
- **Architecture**: Single-page application with inline styles and scripts

## Code Structure
The application is contained in a single `index.html` file with:
- Inline CSS for styling
- Inline JavaScript for functionality
- CDN-hosted external libraries for enhanced features

## License
MIT License - See LICENSE file for details

**Generated App:** {repo_url}
",
        checks = bullet_list(checks),
        pages_url = target.pages_url,
        repo_url = target.repo_url,
    )
}

/// MIT license text for the given copyright year.
pub fn render_license(year: i32) -> String {
    format!(
        "MIT License

Copyright (c) {year}

Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the \"Software\"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:

The above copyright notice and this permission notice shall be included in all
copies or substantial portions of the Software.

THE SOFTWARE IS PROVIDED \"AS IS\", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
SOFTWARE.
"
    )
}

pub fn current_license() -> String {
    render_license(chrono::Utc::now().year())
}
